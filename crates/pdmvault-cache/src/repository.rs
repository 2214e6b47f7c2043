//! SQLite implementation of ISyncStateRepository
//!
//! ## Type Mapping
//!
//! | Domain Type            | SQL Type | Strategy                                   |
//! |------------------------|----------|--------------------------------------------|
//! | VaultId, RecordId      | TEXT     | UUID string via `.to_string()` / `FromStr` |
//! | RelativePath           | TEXT     | `.as_str()` / `RelativePath::new()`        |
//! | ContentHash            | TEXT     | `.as_str()` / `ContentHash::new()`         |
//! | ActorId, MachineId     | TEXT     | `.as_str()` / `::new()`                    |
//! | DateTime<Utc>          | TEXT     | RFC 3339 with nanoseconds, `Z` suffix      |
//! | u64                    | INTEGER  | cast through `i64`                         |
//! | AuditAction            | TEXT     | `AuditAction::as_str()` / `parse()`        |
//! | AuditResult, details   | TEXT     | serde_json serialization                   |
//!
//! Timestamps use a fixed-width format so that text ordering in SQL matches
//! chronological ordering and hash-cache mtimes survive a round trip exactly.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use pdmvault_core::domain::{
    ActorId, AuditAction, AuditEntry, AuditResult, ContentHash, HashCacheEntry, MachineId,
    RecordId, RelativePath, SyncedEntry, VaultId,
};
use pdmvault_core::ports::ISyncStateRepository;

use crate::CacheError;

/// SQLite-based implementation of the sync state repository port
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    /// Creates a new repository instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CacheError::Corrupt(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

fn parse_u64(value: i64, column: &str) -> Result<u64, CacheError> {
    u64::try_from(value).map_err(|_| {
        CacheError::Corrupt(format!("Negative value {} in column {}", value, column))
    })
}

fn parse_record_id(s: &str) -> Result<RecordId, CacheError> {
    RecordId::from_str(s).map_err(CacheError::from)
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn synced_entry_from_row(row: &SqliteRow) -> Result<SyncedEntry, CacheError> {
    let vault_id: String = row.get("vault_id");
    let relative_path: String = row.get("relative_path");
    let record_id: String = row.get("record_id");
    let content_hash: String = row.get("content_hash");
    let version: i64 = row.get("version");
    let synced_at: String = row.get("synced_at");

    Ok(SyncedEntry {
        vault_id: VaultId::from_str(&vault_id)?,
        relative_path: RelativePath::new(relative_path)?,
        record_id: parse_record_id(&record_id)?,
        content_hash: ContentHash::new(content_hash)?,
        version: parse_u64(version, "version")?,
        synced_at: parse_datetime(&synced_at)?,
    })
}

fn hash_cache_entry_from_row(row: &SqliteRow) -> Result<HashCacheEntry, CacheError> {
    let relative_path: String = row.get("relative_path");
    let size: i64 = row.get("size");
    let modified: String = row.get("modified");
    let content_hash: String = row.get("content_hash");

    Ok(HashCacheEntry {
        relative_path: RelativePath::new(relative_path)?,
        size: parse_u64(size, "size")?,
        modified: parse_datetime(&modified)?,
        content_hash: ContentHash::new(content_hash)?,
    })
}

/// Reconstruct an AuditEntry from a database row, keeping the stored
/// id and timestamp
fn audit_entry_from_row(row: &SqliteRow) -> Result<AuditEntry, CacheError> {
    let id: i64 = row.get("id");
    let timestamp: String = row.get("timestamp");
    let actor: String = row.get("actor");
    let machine: String = row.get("machine");
    let action_str: String = row.get("action");
    let path: Option<String> = row.get("path");
    let record_id: Option<String> = row.get("record_id");
    let result_str: String = row.get("result");
    let details_str: String = row.get("details");

    let action = AuditAction::parse(&action_str).ok_or_else(|| {
        CacheError::Corrupt(format!("Unknown audit action: {}", action_str))
    })?;

    let result: AuditResult = serde_json::from_str(&result_str).map_err(|e| {
        CacheError::Corrupt(format!("Invalid AuditResult '{}': {}", result_str, e))
    })?;

    let details: serde_json::Value = serde_json::from_str(&details_str).unwrap_or_default();

    let mut entry = AuditEntry::new(ActorId::new(actor)?, MachineId::new(machine)?, action, result)
        .with_id(id)
        .with_timestamp(parse_datetime(&timestamp)?)
        .with_details(details);
    if let Some(p) = path.filter(|p| !p.is_empty()) {
        entry = entry.with_path(RelativePath::new(p)?);
    }
    if let Some(r) = record_id.filter(|r| !r.is_empty()) {
        entry = entry.with_record_id(parse_record_id(&r)?);
    }
    Ok(entry)
}

// ============================================================================
// ISyncStateRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl ISyncStateRepository for SqliteStateRepository {
    // --- last-synced marks ---

    async fn get_synced(
        &self,
        vault_id: VaultId,
        path: &RelativePath,
    ) -> anyhow::Result<Option<SyncedEntry>> {
        let row = sqlx::query(
            "SELECT * FROM synced_entries WHERE vault_id = ? AND relative_path = ?",
        )
        .bind(vault_id.to_string())
        .bind(path.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(synced_entry_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_synced(&self, vault_id: VaultId) -> anyhow::Result<Vec<SyncedEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM synced_entries WHERE vault_id = ? ORDER BY relative_path ASC",
        )
        .bind(vault_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(synced_entry_from_row(row)?);
        }
        Ok(entries)
    }

    async fn save_synced(&self, entry: &SyncedEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO synced_entries \
             (vault_id, relative_path, record_id, content_hash, version, synced_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(vault_id, relative_path) DO UPDATE SET \
             record_id = excluded.record_id, \
             content_hash = excluded.content_hash, \
             version = excluded.version, \
             synced_at = excluded.synced_at",
        )
        .bind(entry.vault_id.to_string())
        .bind(entry.relative_path.as_str())
        .bind(entry.record_id.to_string())
        .bind(entry.content_hash.as_str())
        .bind(entry.version as i64)
        .bind(format_datetime(&entry.synced_at))
        .execute(&self.pool)
        .await?;

        tracing::trace!(path = %entry.relative_path, version = entry.version, "Saved synced mark");
        Ok(())
    }

    async fn delete_synced(&self, vault_id: VaultId, path: &RelativePath) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM synced_entries WHERE vault_id = ? AND relative_path = ?")
            .bind(vault_id.to_string())
            .bind(path.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- hash cache ---

    async fn load_hash_cache(&self, vault_id: VaultId) -> anyhow::Result<Vec<HashCacheEntry>> {
        let rows = sqlx::query("SELECT * FROM hash_cache WHERE vault_id = ?")
            .bind(vault_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(hash_cache_entry_from_row(row)?);
        }
        Ok(entries)
    }

    async fn save_hash_cache(
        &self,
        vault_id: VaultId,
        entries: &[HashCacheEntry],
    ) -> anyhow::Result<()> {
        let vault = vault_id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM hash_cache WHERE vault_id = ?")
            .bind(&vault)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            sqlx::query(
                "INSERT INTO hash_cache \
                 (vault_id, relative_path, size, modified, content_hash) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&vault)
            .bind(entry.relative_path.as_str())
            .bind(entry.size as i64)
            .bind(format_datetime(&entry.modified))
            .bind(entry.content_hash.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(entries = entries.len(), "Saved hash cache");
        Ok(())
    }

    // --- audit ---

    async fn save_audit(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let result = serde_json::to_string(entry.result())
            .map_err(|e| anyhow::anyhow!("Failed to serialize audit result: {}", e))?;
        let details = serde_json::to_string(entry.details())
            .map_err(|e| anyhow::anyhow!("Failed to serialize audit details: {}", e))?;

        sqlx::query(
            "INSERT INTO audit_log \
             (timestamp, actor, machine, action, path, record_id, result, details) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(format_datetime(&entry.timestamp()))
        .bind(entry.actor().as_str())
        .bind(entry.machine().as_str())
        .bind(entry.action().as_str())
        .bind(entry.path().map(|p| p.as_str().to_string()))
        .bind(entry.record_id().map(|r| r.to_string()))
        .bind(&result)
        .bind(&details)
        .execute(&self.pool)
        .await?;

        tracing::trace!(action = %entry.action(), "Saved audit entry");
        Ok(())
    }

    async fn get_audit_trail(&self, path: &RelativePath) -> anyhow::Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM audit_log WHERE path = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(path.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(audit_entry_from_row(row)?);
        }
        Ok(entries)
    }

    async fn get_audit_since(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM audit_log WHERE timestamp > ? \
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(format_datetime(&since))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(audit_entry_from_row(row)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datetime_format_is_fixed_width() {
        let a = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_datetime(&a).len(), format_datetime(&b).len());
        assert!(format_datetime(&b) < format_datetime(&a));
        assert_eq!(parse_datetime(&format_datetime(&b)).unwrap(), b);
    }

    #[test]
    fn test_negative_integer_rejected() {
        assert!(parse_u64(-1, "size").is_err());
        assert_eq!(parse_u64(42, "size").unwrap(), 42);
    }
}
