//! Persisted per-path state: last-synced marks and the hash cache

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, RecordId, RelativePath, VaultId};

/// What this machine last downloaded or uploaded for a path
///
/// `content_hash` and `version` are the `lastSyncedHash`/`lastSyncedVersion`
/// inputs of the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedEntry {
    pub vault_id: VaultId,
    pub relative_path: RelativePath,
    pub record_id: RecordId,
    pub content_hash: ContentHash,
    pub version: u64,
    pub synced_at: DateTime<Utc>,
}

/// Cached digest of a local file, valid while size and mtime are unchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashCacheEntry {
    pub relative_path: RelativePath,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub content_hash: ContentHash,
}

impl HashCacheEntry {
    /// Returns true if the cached hash can be reused for a file with this size and mtime
    pub fn matches(&self, size: u64, modified: DateTime<Utc>) -> bool {
        self.size == size && self.modified == modified
    }
}
