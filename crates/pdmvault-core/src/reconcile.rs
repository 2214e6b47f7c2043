//! Reconciler
//!
//! Merges a [`LocalSnapshot`], the active remote records and the last-synced
//! marks into one [`DiffStatus`] per path. The function is synchronous,
//! single-pass and side-effect free: it can be re-run at any time against a
//! fresh pair of snapshots.
//!
//! ## Rules, per path
//!
//! 1. ignored by the rule set → `Ignored`
//! 2. record only → `CloudOnly` if never synced here, else `DeletedLocal`
//! 3. local only → `AddedLocal` (unless claimed as a move, see below)
//! 4. both, equal hashes → `Synced`
//! 5. both, hashes differ, checked out by me → `ModifiedLocal`
//! 6. both, hashes differ, record newer than last sync → `Outdated`
//! 7. otherwise → `ModifiedLocal`
//!
//! ## Cross-path detection
//!
//! Before the per-path rules run, two rename patterns are resolved:
//!
//! - **local move**: a local-only file whose hash matches a record at another
//!   path, where that path was synced here and is now missing locally, and
//!   the record is not checked out by someone else → `Moved` at the new path;
//!   the old path is not reported.
//! - **remote rename**: a synced path whose record now lives elsewhere, with
//!   the old local copy untouched and nothing at the new path → `Outdated`
//!   at the new path; the old path is not reported.
//!
//! Candidates are visited in path order and each record is claimed at most
//! once, so the result is deterministic.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::{
    ActorId, ContentHash, DiffStatus, FileRecord, FileState, IgnoreRuleSet, LocalEntry,
    LocalSnapshot, Reconciliation, RecordId, RelativePath, SyncedEntry,
};

/// Everything one reconciliation pass reads
#[derive(Debug, Clone, Copy)]
pub struct ReconcileInput<'a> {
    pub local: &'a LocalSnapshot,
    pub records: &'a [FileRecord],
    pub last_synced: &'a [SyncedEntry],
    pub ignore: &'a IgnoreRuleSet,
    pub me: &'a ActorId,
}

/// Classify one path from its own inputs (rules 1 to 7)
///
/// Returns `None` when there is nothing to report (no local file and no
/// active record). `last` is only honoured when it refers to `record`.
pub fn classify(
    local: Option<&LocalEntry>,
    record: Option<&FileRecord>,
    last: Option<&SyncedEntry>,
    ignored: bool,
    me: &ActorId,
) -> Option<DiffStatus> {
    if ignored {
        return Some(DiffStatus::Ignored);
    }

    let record = record.filter(|r| r.is_active());
    let last = last.filter(|l| record.is_some_and(|r| r.id == l.record_id));
    let local_hash = local
        .filter(|e| !e.is_directory)
        .and_then(|e| e.content_hash.as_ref());

    let status = match (local_hash, record) {
        (None, None) => return None,
        (None, Some(_)) => {
            if last.is_some() {
                DiffStatus::DeletedLocal
            } else {
                DiffStatus::CloudOnly
            }
        }
        (Some(_), None) => DiffStatus::AddedLocal,
        (Some(hash), Some(record)) => {
            if hash == &record.content_hash {
                DiffStatus::Synced
            } else if record.is_checked_out_by(me) {
                DiffStatus::ModifiedLocal
            } else {
                match last {
                    Some(last) if record.version <= last.version => DiffStatus::ModifiedLocal,
                    _ => DiffStatus::Outdated,
                }
            }
        }
    };
    Some(status)
}

/// Run one reconciliation pass
pub fn reconcile(input: &ReconcileInput<'_>, reconciled_at: DateTime<Utc>) -> Reconciliation {
    let local = input.local;
    let mut out = Reconciliation::new(reconciled_at);
    out.scan_errors = local.errors.clone();

    let mut by_path: BTreeMap<&RelativePath, &FileRecord> = BTreeMap::new();
    for record in input.records.iter().filter(|r| r.is_active()) {
        let keep_existing = by_path
            .get(&record.relative_path)
            .is_some_and(|existing| existing.id <= record.id);
        if keep_existing {
            warn!(path = %record.relative_path, "Duplicate active record for path, keeping the lowest id");
        } else {
            by_path.insert(&record.relative_path, record);
        }
    }
    let by_id: HashMap<RecordId, &FileRecord> = by_path.values().map(|r| (r.id, *r)).collect();
    let mut by_hash: HashMap<&ContentHash, Vec<&FileRecord>> = HashMap::new();
    for record in by_path.values().copied() {
        // by_path iteration keeps each bucket sorted by path
        by_hash.entry(&record.content_hash).or_default().push(record);
    }
    let synced: HashMap<&RelativePath, &SyncedEntry> = input
        .last_synced
        .iter()
        .map(|s| (&s.relative_path, s))
        .collect();

    let ignored = |p: &RelativePath| input.ignore.is_ignored(p, false);
    let readable_missing = |p: &RelativePath| local.file(p).is_none() && !local.has_error(p);

    let mut claimed: BTreeSet<RecordId> = BTreeSet::new();
    let mut absorbed: BTreeSet<&RelativePath> = BTreeSet::new();
    let mut renamed: BTreeMap<&RelativePath, &FileRecord> = BTreeMap::new();
    let mut moved: BTreeMap<&RelativePath, &FileRecord> = BTreeMap::new();

    // Remote renames: follow our synced marks to where their records went.
    let mut marks: Vec<&SyncedEntry> = input.last_synced.iter().collect();
    marks.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    for mark in marks {
        let Some(record) = by_id.get(&mark.record_id).copied() else {
            continue;
        };
        let old = &mark.relative_path;
        let new = &record.relative_path;
        if old == new || claimed.contains(&record.id) || by_path.contains_key(old) {
            continue;
        }
        if ignored(old) || ignored(new) || !readable_missing(new) {
            continue;
        }
        let untouched = local
            .file(old)
            .and_then(|e| e.content_hash.as_ref())
            .is_some_and(|h| h == &mark.content_hash);
        if !untouched {
            continue;
        }
        debug!(from = %old, to = %new, record_id = %record.id, "Remote rename detected");
        claimed.insert(record.id);
        absorbed.insert(old);
        renamed.insert(new, record);
    }

    // Local moves: a new local file carrying the content of a record whose
    // own path disappeared.
    for entry in local.files() {
        let path = &entry.relative_path;
        if by_path.contains_key(path) || absorbed.contains(path) {
            continue;
        }
        if ignored(path) || local.has_error(path) {
            continue;
        }
        let Some(hash) = entry.content_hash.as_ref() else {
            continue;
        };
        let candidate = by_hash.get(hash).and_then(|bucket| {
            bucket.iter().copied().find(|r| {
                let from = &r.relative_path;
                !claimed.contains(&r.id)
                    && from != path
                    && !r.is_locked_by_other(input.me)
                    && !ignored(from)
                    && readable_missing(from)
                    && synced.get(from).is_some_and(|s| s.record_id == r.id)
            })
        });
        if let Some(record) = candidate {
            debug!(from = %record.relative_path, to = %path, record_id = %record.id, "Local move detected");
            claimed.insert(record.id);
            absorbed.insert(&record.relative_path);
            moved.insert(path, record);
        }
    }

    let paths: BTreeSet<&RelativePath> = local
        .files()
        .map(|e| &e.relative_path)
        .chain(by_path.keys().copied())
        .collect();

    for path in paths {
        if absorbed.contains(path) || local.has_error(path) {
            continue;
        }
        let local_entry = local.file(path);
        let local_hash = local_entry.and_then(|e| e.content_hash.clone());

        let (status, record) = if let Some(record) = moved.get(path).copied() {
            let status = DiffStatus::Moved {
                record_id: record.id,
                from: record.relative_path.clone(),
            };
            (status, Some(record))
        } else if let Some(record) = renamed.get(path).copied() {
            (DiffStatus::Outdated, Some(record))
        } else {
            let record = by_path.get(path).copied();
            let last = synced.get(path).copied();
            match classify(local_entry, record, last, ignored(path), input.me) {
                Some(status) => (status, record),
                None => continue,
            }
        };

        out.entries.insert(
            path.clone(),
            FileState {
                status,
                record_id: record.map(|r| r.id),
                version: record.map(|r| r.version),
                checkout: record.and_then(|r| r.checkout.clone()),
                local_hash,
                remote_hash: record.map(|r| r.content_hash.clone()),
            },
        );
    }

    debug!(
        paths = out.entries.len(),
        moved = moved.len(),
        renamed = renamed.len(),
        scan_errors = out.scan_errors.len(),
        "Reconciliation pass complete"
    );
    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::{
        CheckoutLock, LocalEntry, MachineId, NewRecord, ScanError, VaultId,
    };

    struct Fixture {
        vault: VaultId,
        local: LocalSnapshot,
        records: Vec<FileRecord>,
        synced: Vec<SyncedEntry>,
        ignore: IgnoreRuleSet,
        me: ActorId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                vault: VaultId::new(),
                local: LocalSnapshot::new(),
                records: Vec::new(),
                synced: Vec::new(),
                ignore: IgnoreRuleSet::empty(),
                me: ActorId::new("alice").unwrap(),
            }
        }

        fn local(&mut self, path: &str, content: &[u8]) -> &mut Self {
            self.local.insert(LocalEntry::file(
                p(path),
                content.len() as u64,
                Utc::now(),
                ContentHash::compute(content),
            ));
            self
        }

        fn record(&mut self, path: &str, content: &[u8], version: u64) -> RecordId {
            let mut record = NewRecord {
                vault_id: self.vault,
                relative_path: p(path),
                content_hash: ContentHash::compute(content),
                size: content.len() as u64,
                state: "wip".to_string(),
            }
            .into_record(RecordId::new(), Utc::now());
            record.version = version;
            let id = record.id;
            self.records.push(record);
            id
        }

        fn lock(&mut self, id: RecordId, actor: &str) {
            let record = self.records.iter_mut().find(|r| r.id == id).unwrap();
            record.checkout = Some(CheckoutLock {
                actor: ActorId::new(actor).unwrap(),
                machine: MachineId::new("ws").unwrap(),
                at: Utc::now(),
            });
        }

        fn synced(&mut self, path: &str, id: RecordId, content: &[u8], version: u64) {
            self.synced.push(SyncedEntry {
                vault_id: self.vault,
                relative_path: p(path),
                record_id: id,
                content_hash: ContentHash::compute(content),
                version,
                synced_at: Utc::now(),
            });
        }

        fn run(&self) -> Reconciliation {
            reconcile(
                &ReconcileInput {
                    local: &self.local,
                    records: &self.records,
                    last_synced: &self.synced,
                    ignore: &self.ignore,
                    me: &self.me,
                },
                Utc::now(),
            )
        }
    }

    fn p(s: &str) -> RelativePath {
        RelativePath::new(s).unwrap()
    }

    fn status(rec: &Reconciliation, path: &str) -> Option<DiffStatus> {
        rec.status(&p(path)).cloned()
    }

    #[test]
    fn test_equal_hashes_are_synced() {
        let mut f = Fixture::new();
        let id = f.record("a.txt", b"one", 2);
        f.synced("a.txt", id, b"one", 2);
        f.local("a.txt", b"one");
        assert_eq!(status(&f.run(), "a.txt"), Some(DiffStatus::Synced));
    }

    #[test]
    fn test_record_only_is_cloud_only_until_synced() {
        let mut f = Fixture::new();
        let id = f.record("a.txt", b"one", 1);
        assert_eq!(status(&f.run(), "a.txt"), Some(DiffStatus::CloudOnly));

        f.synced("a.txt", id, b"one", 1);
        assert_eq!(status(&f.run(), "a.txt"), Some(DiffStatus::DeletedLocal));
    }

    #[test]
    fn test_local_only_is_added() {
        let mut f = Fixture::new();
        f.local("new.step", b"geometry");
        assert_eq!(status(&f.run(), "new.step"), Some(DiffStatus::AddedLocal));
    }

    #[test]
    fn test_my_checkout_beats_newer_version() {
        let mut f = Fixture::new();
        let id = f.record("a.txt", b"server", 5);
        f.synced("a.txt", id, b"old", 3);
        f.lock(id, "alice");
        f.local("a.txt", b"my edit");
        assert_eq!(status(&f.run(), "a.txt"), Some(DiffStatus::ModifiedLocal));
    }

    #[test]
    fn test_newer_record_is_outdated() {
        // x.txt at version 3 with H1, local H2, not checked out by me
        let mut f = Fixture::new();
        let id = f.record("x.txt", b"H1", 3);
        f.synced("x.txt", id, b"H2", 2);
        f.local("x.txt", b"H2");
        let rec = f.run();
        assert_eq!(status(&rec, "x.txt"), Some(DiffStatus::Outdated));
        let state = rec.get(&p("x.txt")).unwrap();
        assert_eq!(state.version, Some(3));
        assert_eq!(state.remote_hash, Some(ContentHash::compute(b"H1")));
        assert_eq!(state.local_hash, Some(ContentHash::compute(b"H2")));
    }

    #[test]
    fn test_differing_copy_never_synced_is_outdated() {
        let mut f = Fixture::new();
        f.record("x.txt", b"H1", 3);
        f.local("x.txt", b"H2");
        assert_eq!(status(&f.run(), "x.txt"), Some(DiffStatus::Outdated));
    }

    #[test]
    fn test_unlocked_local_edit_on_current_version_is_modified() {
        let mut f = Fixture::new();
        let id = f.record("a.txt", b"v1", 1);
        f.synced("a.txt", id, b"v1", 1);
        f.local("a.txt", b"edited without checkout");
        assert_eq!(status(&f.run(), "a.txt"), Some(DiffStatus::ModifiedLocal));
    }

    #[test]
    fn test_ignored_paths() {
        let mut f = Fixture::new();
        f.ignore = IgnoreRuleSet::new(&["*.tmp"]).unwrap();
        f.record("scratch.tmp", b"x", 1);
        f.local("other.tmp", b"y");
        let rec = f.run();
        assert_eq!(status(&rec, "scratch.tmp"), Some(DiffStatus::Ignored));
        assert_eq!(status(&rec, "other.tmp"), Some(DiffStatus::Ignored));
    }

    #[test]
    fn test_local_move_keeps_record_identity() {
        let mut f = Fixture::new();
        let id = f.record("A/part.sldprt", b"H", 1);
        f.synced("A/part.sldprt", id, b"H", 1);
        f.local("B/part.sldprt", b"H");

        let rec = f.run();
        assert_eq!(
            status(&rec, "B/part.sldprt"),
            Some(DiffStatus::Moved {
                record_id: id,
                from: p("A/part.sldprt")
            })
        );
        assert_eq!(rec.get(&p("B/part.sldprt")).unwrap().record_id, Some(id));
        assert!(status(&rec, "A/part.sldprt").is_none());
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn test_move_not_detected_when_locked_by_other() {
        let mut f = Fixture::new();
        let id = f.record("A/part.sldprt", b"H", 1);
        f.synced("A/part.sldprt", id, b"H", 1);
        f.lock(id, "bob");
        f.local("B/part.sldprt", b"H");

        let rec = f.run();
        assert_eq!(status(&rec, "B/part.sldprt"), Some(DiffStatus::AddedLocal));
        assert_eq!(status(&rec, "A/part.sldprt"), Some(DiffStatus::DeletedLocal));
    }

    #[test]
    fn test_move_allowed_under_my_own_checkout() {
        let mut f = Fixture::new();
        let id = f.record("A/part.sldprt", b"H", 1);
        f.synced("A/part.sldprt", id, b"H", 1);
        f.lock(id, "alice");
        f.local("B/part.sldprt", b"H");
        assert!(matches!(
            status(&f.run(), "B/part.sldprt"),
            Some(DiffStatus::Moved { .. })
        ));
    }

    #[test]
    fn test_duplicate_content_with_source_present_is_not_a_move() {
        let mut f = Fixture::new();
        let id = f.record("A/part.sldprt", b"H", 1);
        f.synced("A/part.sldprt", id, b"H", 1);
        f.local("A/part.sldprt", b"H");
        f.local("copy.sldprt", b"H");

        let rec = f.run();
        assert_eq!(status(&rec, "copy.sldprt"), Some(DiffStatus::AddedLocal));
        assert_eq!(status(&rec, "A/part.sldprt"), Some(DiffStatus::Synced));
    }

    #[test]
    fn test_never_downloaded_record_is_not_a_move_source() {
        let mut f = Fixture::new();
        f.record("A/part.sldprt", b"H", 1);
        f.local("B/part.sldprt", b"H");

        let rec = f.run();
        assert_eq!(status(&rec, "B/part.sldprt"), Some(DiffStatus::AddedLocal));
        assert_eq!(status(&rec, "A/part.sldprt"), Some(DiffStatus::CloudOnly));
    }

    #[test]
    fn test_one_record_claimed_by_one_move_only() {
        let mut f = Fixture::new();
        let id = f.record("A/part.sldprt", b"H", 1);
        f.synced("A/part.sldprt", id, b"H", 1);
        f.local("B/part.sldprt", b"H");
        f.local("C/part.sldprt", b"H");

        let rec = f.run();
        // path order decides: B claims the record, C stays local-only
        assert!(matches!(
            status(&rec, "B/part.sldprt"),
            Some(DiffStatus::Moved { .. })
        ));
        assert_eq!(status(&rec, "C/part.sldprt"), Some(DiffStatus::AddedLocal));
    }

    #[test]
    fn test_remote_rename_reports_outdated_at_new_path() {
        let mut f = Fixture::new();
        let id = f.record("B/part.sldprt", b"H", 1);
        f.synced("A/part.sldprt", id, b"H", 1);
        f.local("A/part.sldprt", b"H");

        let rec = f.run();
        assert_eq!(status(&rec, "B/part.sldprt"), Some(DiffStatus::Outdated));
        assert!(status(&rec, "A/part.sldprt").is_none());
    }

    #[test]
    fn test_remote_rename_with_local_edits_is_not_absorbed() {
        let mut f = Fixture::new();
        let id = f.record("B/part.sldprt", b"H", 1);
        f.synced("A/part.sldprt", id, b"H", 1);
        f.local("A/part.sldprt", b"edited");

        let rec = f.run();
        assert_eq!(status(&rec, "A/part.sldprt"), Some(DiffStatus::AddedLocal));
        assert_eq!(status(&rec, "B/part.sldprt"), Some(DiffStatus::CloudOnly));
    }

    #[test]
    fn test_scan_error_paths_are_skipped() {
        let mut f = Fixture::new();
        let id = f.record("locked.bin", b"x", 1);
        f.synced("locked.bin", id, b"x", 1);
        f.local.errors.push(ScanError {
            path: p("locked.bin"),
            message: "permission denied".to_string(),
        });

        let rec = f.run();
        assert!(status(&rec, "locked.bin").is_none());
        assert_eq!(rec.scan_errors.len(), 1);
    }

    #[test]
    fn test_deleted_records_are_ignored() {
        let mut f = Fixture::new();
        f.record("gone.txt", b"x", 1);
        f.records[0].deleted_at = Some(Utc::now());
        f.local("gone.txt", b"x");
        assert_eq!(status(&f.run(), "gone.txt"), Some(DiffStatus::AddedLocal));
    }

    #[test]
    fn test_record_order_does_not_change_result() {
        let mut f = Fixture::new();
        let a = f.record("A/part.sldprt", b"H", 1);
        f.synced("A/part.sldprt", a, b"H", 1);
        f.record("Z/other.sldprt", b"Q", 2);
        f.local("B/part.sldprt", b"H");
        f.local("Z/other.sldprt", b"R");

        let first = f.run();
        f.records.reverse();
        f.synced.reverse();
        let second = f.run();
        assert_eq!(first.entries, second.entries);
    }

    #[test]
    fn test_checkout_carried_into_state() {
        let mut f = Fixture::new();
        let id = f.record("a.txt", b"v", 1);
        f.lock(id, "bob");
        f.local("a.txt", b"v");
        let rec = f.run();
        let state = rec.get(&p("a.txt")).unwrap();
        assert_eq!(state.status, DiffStatus::Synced);
        assert_eq!(state.checkout.as_ref().unwrap().actor.as_str(), "bob");
    }
}
