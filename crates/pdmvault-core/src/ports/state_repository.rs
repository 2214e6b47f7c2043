//! Sync state repository port (driven/secondary port)
//!
//! Persists what must survive between runs: the last-synced mark of every
//! path, the scanner's hash cache and the audit trail.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, memory) and don't need domain-level classification.
//! - All write operations take references to domain entities, allowing
//!   the caller to retain ownership.

use chrono::{DateTime, Utc};

use crate::domain::{AuditEntry, HashCacheEntry, RelativePath, SyncedEntry, VaultId};

/// Port trait for persisting per-vault sync state
#[async_trait::async_trait]
pub trait ISyncStateRepository: Send + Sync {
    // --- last-synced marks ---

    /// Returns the last-synced mark for a path
    async fn get_synced(
        &self,
        vault_id: VaultId,
        path: &RelativePath,
    ) -> anyhow::Result<Option<SyncedEntry>>;

    /// Returns every last-synced mark of a vault
    async fn list_synced(&self, vault_id: VaultId) -> anyhow::Result<Vec<SyncedEntry>>;

    /// Inserts or replaces the mark for `entry.relative_path`
    async fn save_synced(&self, entry: &SyncedEntry) -> anyhow::Result<()>;

    /// Removes the mark for a path (no-op if absent)
    async fn delete_synced(&self, vault_id: VaultId, path: &RelativePath) -> anyhow::Result<()>;

    // --- hash cache ---

    /// Loads the persisted hash cache of a vault
    async fn load_hash_cache(&self, vault_id: VaultId) -> anyhow::Result<Vec<HashCacheEntry>>;

    /// Replaces the persisted hash cache of a vault
    async fn save_hash_cache(
        &self,
        vault_id: VaultId,
        entries: &[HashCacheEntry],
    ) -> anyhow::Result<()>;

    // --- audit ---

    /// Appends an audit entry
    async fn save_audit(&self, entry: &AuditEntry) -> anyhow::Result<()>;

    /// Returns the audit trail of one path, oldest first
    async fn get_audit_trail(&self, path: &RelativePath) -> anyhow::Result<Vec<AuditEntry>>;

    /// Returns entries since `since`, newest first, up to `limit`
    async fn get_audit_since(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<AuditEntry>>;
}
