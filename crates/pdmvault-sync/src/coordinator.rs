//! Checkout coordinator
//!
//! Enforces single-writer-per-file semantics on top of the catalog's
//! conditional updates:
//!
//! ```text
//! Unlocked ──checkout(me)──▶ CheckedOutBy(me) ──checkin/release──▶ Unlocked
//!                                    │
//!                            forceRelease(admin)
//!                                    ▼
//!                                 Unlocked
//! ```
//!
//! Every transition is a single compare-and-swap on the record. A lost race
//! surfaces as a conflict naming the new owner; nothing here retries a
//! failed transition, so a lock is never stolen by accident.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pdmvault_audit::AuditLogger;
use pdmvault_core::domain::{
    CheckoutLock, ContentHash, FileRecord, Identity, RecordId, RecordMutation,
    RelativePath,
};
use pdmvault_core::ports::{IContentStore, ILocalFileSystem, IPresenceSource, IRemoteCatalog};
use pdmvault_core::{ConflictKind, EngineError};
use tracing::{debug, info, instrument, warn};

use crate::retry::CallPolicy;

/// Result of a lock transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOutcome {
    /// The record after the transition (or as found, when nothing changed)
    pub record: FileRecord,
    /// False when the record was already in the requested state
    pub changed: bool,
}

impl LockOutcome {
    fn changed(record: FileRecord) -> Self {
        Self {
            record,
            changed: true,
        }
    }

    fn unchanged(record: FileRecord) -> Self {
        Self {
            record,
            changed: false,
        }
    }
}

/// A lock whose owner kept working long after taking it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleLock {
    pub record_id: RecordId,
    pub path: RelativePath,
    pub lock: CheckoutLock,
    /// Owner's most recent heartbeat from the lock's machine
    pub last_seen: DateTime<Utc>,
}

impl StaleLock {
    /// Time between taking the lock and the last heartbeat
    pub fn held_for(&self) -> ChronoDuration {
        self.last_seen - self.lock.at
    }
}

/// Arbitrates who may edit each record
pub struct CheckoutCoordinator {
    identity: Identity,
    catalog: Arc<dyn IRemoteCatalog>,
    content: Arc<dyn IContentStore>,
    fs: Arc<dyn ILocalFileSystem>,
    audit: Arc<AuditLogger>,
    calls: CallPolicy,
}

impl CheckoutCoordinator {
    pub fn new(
        identity: Identity,
        catalog: Arc<dyn IRemoteCatalog>,
        content: Arc<dyn IContentStore>,
        fs: Arc<dyn ILocalFileSystem>,
        audit: Arc<AuditLogger>,
        calls: CallPolicy,
    ) -> Self {
        Self {
            identity,
            catalog,
            content,
            fs,
            audit,
            calls,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn require_mutate(&self, intent: &str) -> Result<(), EngineError> {
        if self.identity.role.can_mutate() {
            Ok(())
        } else {
            Err(EngineError::Permission(format!(
                "{intent} requires the engineer or admin role, {} is a {}",
                self.identity.actor, self.identity.role
            )))
        }
    }

    /// Conflict for a transition the catalog refused
    fn lost_race(&self, current: &FileRecord) -> EngineError {
        EngineError::conflict(
            &current.relative_path,
            ConflictKind::RaceLost {
                owner: current.checked_out_by().cloned(),
            },
        )
    }

    fn locked_by(record: &FileRecord, lock: &CheckoutLock) -> EngineError {
        EngineError::conflict(
            &record.relative_path,
            ConflictKind::LockedBy {
                owner: lock.actor.clone(),
                machine: lock.machine.clone(),
            },
        )
    }

    async fn update(
        &self,
        record: &FileRecord,
        mutation: &RecordMutation,
    ) -> Result<pdmvault_core::ports::UpdateOutcome, EngineError> {
        self.calls
            .write(
                mutation.name(),
                self.catalog
                    .conditional_update(record.id, record.version, mutation),
            )
            .await
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// `Unlocked → CheckedOutBy(me)`
    ///
    /// Already holding the lock is a no-op.
    ///
    /// # Errors
    /// - `Permission` for viewers
    /// - `Conflict(LockedBy)` if another actor holds the lock
    /// - `Conflict(RaceLost)` if a concurrent writer got there first
    #[instrument(skip(self, record), fields(path = %record.relative_path, record_id = %record.id))]
    pub async fn checkout(&self, record: &FileRecord) -> Result<LockOutcome, EngineError> {
        self.require_mutate("checkout")?;
        if record.is_checked_out_by(&self.identity.actor) {
            debug!("Already checked out by us");
            return Ok(LockOutcome::unchanged(record.clone()));
        }
        if let Some(lock) = &record.checkout {
            return Err(Self::locked_by(record, lock));
        }

        let mutation = RecordMutation::Checkout {
            actor: self.identity.actor.clone(),
            machine: self.identity.machine.clone(),
            at: Utc::now(),
        };
        let outcome = self.update(record, &mutation).await?;
        if !outcome.applied {
            // A timed-out earlier attempt may have landed after all.
            if outcome.record.is_checked_out_by(&self.identity.actor) {
                return Ok(LockOutcome::unchanged(outcome.record));
            }
            info!(owner = ?outcome.record.checked_out_by(), "Checkout lost the race");
            return Err(self.lost_race(&outcome.record));
        }

        info!(version = outcome.record.version, "Checked out");
        self.audit.log_checkout(&outcome.record).await;
        Ok(LockOutcome::changed(outcome.record))
    }

    /// `CheckedOutBy(me) → Unlocked`, publishing the local file's content
    ///
    /// The content is uploaded first; if the conditional unlock then fails
    /// the file stays checked out by us and `Conflict(UnlockFailed)` is
    /// returned. Re-issuing the check-in completes it. Checking in a file we
    /// no longer hold whose content already matches the record is a no-op.
    ///
    /// # Errors
    /// - `Permission` for viewers
    /// - `Conflict(NotCheckedOut)` without our lock
    /// - `Conflict(UnlockFailed)` / `Conflict(RaceLost)` when the unlock did not land
    /// - `Io` / `Network` while reading or uploading
    #[instrument(skip(self, record, local), fields(path = %record.relative_path, record_id = %record.id))]
    pub async fn checkin(
        &self,
        record: &FileRecord,
        local: &Path,
    ) -> Result<LockOutcome, EngineError> {
        self.require_mutate("checkin")?;
        let data = self.fs.read_file(local).await.map_err(EngineError::io)?;
        let hash = ContentHash::compute(&data);
        let size = data.len() as u64;

        if !record.is_checked_out_by(&self.identity.actor) {
            if hash == record.content_hash {
                debug!("Content already published and unlocked");
                return Ok(LockOutcome::unchanged(record.clone()));
            }
            return Err(EngineError::conflict(
                &record.relative_path,
                ConflictKind::NotCheckedOut,
            ));
        }

        let content_changed = hash != record.content_hash;
        if content_changed {
            self.upload(&hash, data).await?;
        }

        let mutation = RecordMutation::Checkin {
            actor: self.identity.actor.clone(),
            content_hash: hash,
            size,
        };
        let outcome = self.update(record, &mutation).await?;
        if !outcome.applied {
            warn!(owner = ?outcome.record.checked_out_by(), "Content uploaded but unlock failed");
            let err = if outcome.record.is_checked_out_by(&self.identity.actor) {
                EngineError::conflict(&record.relative_path, ConflictKind::UnlockFailed)
            } else {
                self.lost_race(&outcome.record)
            };
            return Err(err);
        }

        info!(version = outcome.record.version, content_changed, "Checked in");
        self.audit
            .log_checkin(&outcome.record, content_changed)
            .await;
        Ok(LockOutcome::changed(outcome.record))
    }

    /// Stores content under its hash unless already present
    pub(crate) async fn upload(&self, hash: &ContentHash, data: Vec<u8>) -> Result<(), EngineError> {
        let exists = self
            .calls
            .read("content_exists", || self.content.exists(hash))
            .await?;
        if exists {
            debug!(hash = %hash.short(), "Content already stored");
            return Ok(());
        }
        self.calls
            .read("content_put", || self.content.put(hash, data.clone()))
            .await
    }

    /// `CheckedOutBy(me) → Unlocked` without publishing (discard)
    ///
    /// An unlocked record is left as is.
    ///
    /// # Errors
    /// `Conflict(LockedBy)` if the lock belongs to someone else
    #[instrument(skip(self, record), fields(path = %record.relative_path, record_id = %record.id))]
    pub async fn release(&self, record: &FileRecord) -> Result<LockOutcome, EngineError> {
        let Some(lock) = &record.checkout else {
            return Ok(LockOutcome::unchanged(record.clone()));
        };
        if lock.actor != self.identity.actor {
            return Err(Self::locked_by(record, lock));
        }

        let mutation = RecordMutation::Release {
            actor: self.identity.actor.clone(),
        };
        let outcome = self.update(record, &mutation).await?;
        if !outcome.applied {
            if outcome.record.checkout.is_none() {
                return Ok(LockOutcome::unchanged(outcome.record));
            }
            return Err(self.lost_race(&outcome.record));
        }

        info!("Checkout discarded");
        self.audit.log_discard(&outcome.record).await;
        Ok(LockOutcome::changed(outcome.record))
    }

    /// Administrative `CheckedOutBy(X) → Unlocked`
    ///
    /// X's pending local edits are not uploaded and may be orphaned; the
    /// transition is logged as destructive.
    ///
    /// # Errors
    /// - `Permission` unless the acting role is admin
    /// - `Conflict(RaceLost)` if the lock changed hands meanwhile
    #[instrument(skip(self, record), fields(path = %record.relative_path, record_id = %record.id))]
    pub async fn force_release(&self, record: &FileRecord) -> Result<LockOutcome, EngineError> {
        if !self.identity.role.can_force_release() {
            return Err(EngineError::Permission(format!(
                "force-release requires the admin role, {} is a {}",
                self.identity.actor, self.identity.role
            )));
        }
        let Some(previous) = record.checkout.clone() else {
            return Ok(LockOutcome::unchanged(record.clone()));
        };

        let mutation = RecordMutation::ForceRelease {
            expected_owner: previous.actor.clone(),
        };
        let outcome = self.update(record, &mutation).await?;
        if !outcome.applied {
            if outcome.record.checkout.is_none() {
                return Ok(LockOutcome::unchanged(outcome.record));
            }
            return Err(self.lost_race(&outcome.record));
        }

        self.audit
            .log_force_release(&outcome.record, &previous)
            .await;
        Ok(LockOutcome::changed(outcome.record))
    }

    // ========================================================================
    // Stale locks
    // ========================================================================

    /// Flags locks whose owner's last heartbeat is more than `threshold`
    /// after the checkout
    ///
    /// Owners without any heartbeat are not flagged. Nothing is released.
    ///
    /// # Errors
    /// `Network` if the presence source cannot be queried
    #[instrument(skip(self, records, presence), fields(records = records.len()))]
    pub async fn stale_locks(
        &self,
        records: &[FileRecord],
        presence: &dyn IPresenceSource,
        threshold: ChronoDuration,
    ) -> Result<Vec<StaleLock>, EngineError> {
        let mut stale = Vec::new();
        for record in records.iter().filter(|r| r.is_active()) {
            let Some(lock) = &record.checkout else {
                continue;
            };
            let last_seen = self
                .calls
                .read("last_seen", || presence.last_seen(&lock.actor, &lock.machine))
                .await?;
            let Some(last_seen) = last_seen else {
                continue;
            };
            if last_seen - lock.at > threshold {
                debug!(path = %record.relative_path, owner = %lock.actor, "Stale lock");
                stale.push(StaleLock {
                    record_id: record.id,
                    path: record.relative_path.clone(),
                    lock: lock.clone(),
                    last_seen,
                });
            }
        }
        stale.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(stale)
    }
}
