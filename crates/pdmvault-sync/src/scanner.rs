//! Local scanner
//!
//! Walks the vault root and produces a [`LocalSnapshot`]. The walk itself is
//! cheap (one `stat` per entry); hashing is the expensive part and runs on a
//! bounded pool of threads, skipping files whose `(size, mtime)` match the
//! hash cache.
//!
//! - Ignored and trash directories are pruned, never descended into.
//! - Symlinked files are followed only when they resolve inside the root;
//!   symlinked directories are skipped so a link cannot loop the walk.
//! - Unreadable paths become [`ScanError`]s; their siblings are still scanned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use chrono::{DateTime, Utc};
use pdmvault_core::domain::{
    ContentHash, HashCacheEntry, LocalEntry, LocalSnapshot, RelativePath, ScanError, Vault,
};
use pdmvault_core::EngineError;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::filesystem::{hash_file, system_time_to_utc, TEMP_SUFFIX};

/// A file found by the walk, waiting for its digest
#[derive(Debug, Clone)]
struct PendingFile {
    relative_path: RelativePath,
    absolute: PathBuf,
    size: u64,
    modified: DateTime<Utc>,
}

/// Counters for one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files: usize,
    pub directories: usize,
    pub hashed: usize,
    pub cache_hits: usize,
    pub errors: usize,
}

/// Scans a vault, remembering digests between passes
#[derive(Debug)]
pub struct Scanner {
    hash_workers: usize,
    cache: Mutex<HashMap<RelativePath, HashCacheEntry>>,
    last_stats: Mutex<ScanStats>,
}

impl Scanner {
    /// Creates a scanner hashing on `hash_workers` threads (at least one)
    pub fn new(hash_workers: usize) -> Self {
        Self {
            hash_workers: hash_workers.max(1),
            cache: Mutex::new(HashMap::new()),
            last_stats: Mutex::new(ScanStats::default()),
        }
    }

    /// Seeds the hash cache, typically from the state repository
    pub async fn load_cache(&self, entries: Vec<HashCacheEntry>) {
        let mut cache = self.cache.lock().await;
        cache.clear();
        cache.extend(entries.into_iter().map(|e| (e.relative_path.clone(), e)));
    }

    /// Current hash cache contents, sorted by path
    pub async fn cache_entries(&self) -> Vec<HashCacheEntry> {
        let cache = self.cache.lock().await;
        let mut entries: Vec<HashCacheEntry> = cache.values().cloned().collect();
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        entries
    }

    pub async fn last_stats(&self) -> ScanStats {
        *self.last_stats.lock().await
    }

    /// Scans `vault` and refreshes the hash cache
    ///
    /// # Errors
    /// `Validation` if the vault root is missing or not a directory. Any
    /// failure below the root is reported inside the snapshot instead.
    #[instrument(skip(self, vault), fields(root = %vault.root().display()))]
    pub async fn scan(&self, vault: &Vault) -> Result<LocalSnapshot, EngineError> {
        let vault = vault.clone();
        let previous = self.cache.lock().await.clone();
        let workers = self.hash_workers;

        let (snapshot, cache, stats) =
            tokio::task::spawn_blocking(move || scan_blocking(&vault, &previous, workers))
                .await
                .map_err(|e| EngineError::io(format!("scan task failed: {e}")))??;

        *self.cache.lock().await = cache;
        *self.last_stats.lock().await = stats;
        info!(
            files = stats.files,
            directories = stats.directories,
            hashed = stats.hashed,
            cache_hits = stats.cache_hits,
            errors = stats.errors,
            "Scan complete"
        );
        Ok(snapshot)
    }
}

type ScanOutput = (
    LocalSnapshot,
    HashMap<RelativePath, HashCacheEntry>,
    ScanStats,
);

fn scan_blocking(
    vault: &Vault,
    previous: &HashMap<RelativePath, HashCacheEntry>,
    workers: usize,
) -> Result<ScanOutput, EngineError> {
    let root = vault.root();
    match std::fs::metadata(root) {
        Ok(m) if m.is_dir() => {}
        Ok(_) => {
            return Err(EngineError::Validation(format!(
                "vault root is not a directory: {}",
                root.display()
            )))
        }
        Err(e) => {
            return Err(EngineError::Validation(format!(
                "vault root {} is not accessible: {e}",
                root.display()
            )))
        }
    }
    let canonical_root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());

    let mut snapshot = LocalSnapshot::new();
    let mut stats = ScanStats::default();
    let mut pending = Vec::new();
    walk(
        vault,
        &canonical_root,
        &mut snapshot,
        &mut pending,
        &mut stats,
    );

    let mut cache = HashMap::with_capacity(pending.len());
    let mut to_hash = Vec::new();
    for file in pending {
        match previous.get(&file.relative_path) {
            Some(hit) if hit.matches(file.size, file.modified) => {
                stats.cache_hits += 1;
                insert_file(&mut snapshot, &mut cache, &file, hit.content_hash.clone());
            }
            _ => to_hash.push(file),
        }
    }

    for (file, result) in hash_all(to_hash, workers) {
        match result {
            Ok(hash) => {
                stats.hashed += 1;
                insert_file(&mut snapshot, &mut cache, &file, hash);
            }
            Err(message) => {
                warn!(path = %file.relative_path, error = %message, "Failed to hash file");
                snapshot.errors.push(ScanError {
                    path: file.relative_path,
                    message,
                });
            }
        }
    }

    snapshot.errors.sort_by(|a, b| a.path.cmp(&b.path));
    stats.errors = snapshot.errors.len();
    Ok((snapshot, cache, stats))
}

fn insert_file(
    snapshot: &mut LocalSnapshot,
    cache: &mut HashMap<RelativePath, HashCacheEntry>,
    file: &PendingFile,
    hash: ContentHash,
) {
    cache.insert(
        file.relative_path.clone(),
        HashCacheEntry {
            relative_path: file.relative_path.clone(),
            size: file.size,
            modified: file.modified,
            content_hash: hash.clone(),
        },
    );
    snapshot.insert(LocalEntry::file(
        file.relative_path.clone(),
        file.size,
        file.modified,
        hash,
    ));
}

/// Depth-first walk collecting directories and files to hash
fn walk(
    vault: &Vault,
    canonical_root: &Path,
    snapshot: &mut LocalSnapshot,
    pending: &mut Vec<PendingFile>,
    stats: &mut ScanStats,
) {
    let root = vault.root();
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                report(snapshot, root, &dir, e.to_string());
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report(snapshot, root, &dir, e.to_string());
                    continue;
                }
            };
            let path = entry.path();
            let relative = match RelativePath::from_absolute(root, &path) {
                Ok(relative) => relative,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unrepresentable path");
                    continue;
                }
            };
            if relative.as_str().ends_with(TEMP_SUFFIX) {
                continue;
            }

            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => {
                    report(snapshot, root, &path, e.to_string());
                    continue;
                }
            };

            let metadata = if file_type.is_symlink() {
                match resolve_symlink(&path, canonical_root) {
                    Some(metadata) => metadata,
                    None => continue,
                }
            } else {
                match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        report(snapshot, root, &path, e.to_string());
                        continue;
                    }
                }
            };
            let modified = metadata
                .modified()
                .ok()
                .and_then(system_time_to_utc)
                .unwrap_or_default();

            if metadata.is_dir() {
                if vault.is_excluded(&relative, true) {
                    debug!(path = %relative, "Pruning excluded directory");
                    continue;
                }
                stats.directories += 1;
                snapshot.insert(LocalEntry::directory(relative, modified));
                stack.push(path);
            } else if metadata.is_file() {
                if vault.is_excluded(&relative, false) {
                    continue;
                }
                stats.files += 1;
                pending.push(PendingFile {
                    relative_path: relative,
                    absolute: path,
                    size: metadata.len(),
                    modified,
                });
            }
        }
    }
}

/// Metadata of a symlink's target when it is a file inside the root
fn resolve_symlink(path: &Path, canonical_root: &Path) -> Option<std::fs::Metadata> {
    let target = match std::fs::canonicalize(path) {
        Ok(target) => target,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Skipping dangling symlink");
            return None;
        }
    };
    if !target.starts_with(canonical_root) {
        debug!(path = %path.display(), target = %target.display(), "Skipping symlink leaving the vault");
        return None;
    }
    let metadata = std::fs::metadata(&target).ok()?;
    if metadata.is_dir() {
        debug!(path = %path.display(), "Skipping symlinked directory");
        return None;
    }
    Some(metadata)
}

fn report(snapshot: &mut LocalSnapshot, root: &Path, path: &Path, message: String) {
    warn!(path = %path.display(), error = %message, "Scan error");
    // The root itself has no relative path; it was checked before the walk.
    if let Ok(relative) = RelativePath::from_absolute(root, path) {
        snapshot.errors.push(ScanError {
            path: relative,
            message,
        });
    }
}

/// Hashes `files` on up to `workers` threads, returning results in input order
fn hash_all(
    files: Vec<PendingFile>,
    workers: usize,
) -> Vec<(PendingFile, Result<ContentHash, String>)> {
    if files.is_empty() {
        return Vec::new();
    }
    let workers = workers.min(files.len()).max(1);
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let files = &files;
            let next = &next;
            scope.spawn(move || loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(file) = files.get(index) else {
                    break;
                };
                let result = hash_file(&file.absolute).map_err(|e| e.to_string());
                if tx.send((index, result)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut results: Vec<Option<Result<ContentHash, String>>> = vec![None; files.len()];
    for (index, result) in rx {
        results[index] = Some(result);
    }
    files
        .into_iter()
        .zip(results)
        .map(|(file, result)| {
            let result = result.unwrap_or_else(|| Err("hash worker exited early".to_string()));
            (file, result)
        })
        .collect()
}
