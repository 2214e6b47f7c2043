//! Integration tests for SqliteStateRepository
//!
//! Each test function creates a fresh in-memory database to ensure
//! test isolation.

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use pdmvault_cache::{DatabasePool, SqliteStateRepository};
use pdmvault_core::domain::{
    ActorId, AuditAction, AuditEntry, AuditResult, ContentHash, HashCacheEntry, MachineId,
    RecordId, RelativePath, SyncedEntry, VaultId,
};
use pdmvault_core::ports::ISyncStateRepository;

// ============================================================================
// Test helpers
// ============================================================================

async fn setup() -> SqliteStateRepository {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteStateRepository::new(pool.pool().clone())
}

fn path(p: &str) -> RelativePath {
    RelativePath::new(p).unwrap()
}

fn synced(vault_id: VaultId, p: &str, version: u64) -> SyncedEntry {
    SyncedEntry {
        vault_id,
        relative_path: path(p),
        record_id: RecordId::new(),
        content_hash: ContentHash::compute(p.as_bytes()),
        version,
        synced_at: Utc::now(),
    }
}

fn audit(action: AuditAction, p: &str) -> AuditEntry {
    AuditEntry::new(
        ActorId::new("alice").unwrap(),
        MachineId::new("ws-01").unwrap(),
        action,
        AuditResult::success(),
    )
    .with_path(path(p))
}

// ============================================================================
// Last-synced marks
// ============================================================================

#[tokio::test]
async fn test_save_and_get_synced() {
    let repo = setup().await;
    let vault = VaultId::new();
    let entry = synced(vault, "A/part.sldprt", 3);

    repo.save_synced(&entry).await.unwrap();

    let loaded = repo.get_synced(vault, &entry.relative_path).await.unwrap();
    assert_eq!(loaded, Some(entry));
}

#[tokio::test]
async fn test_save_synced_replaces_existing_mark() {
    let repo = setup().await;
    let vault = VaultId::new();
    let first = synced(vault, "x.txt", 1);
    repo.save_synced(&first).await.unwrap();

    let second = SyncedEntry {
        version: 2,
        content_hash: ContentHash::compute(b"v2"),
        ..first.clone()
    };
    repo.save_synced(&second).await.unwrap();

    let all = repo.list_synced(vault).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].version, 2);
}

#[tokio::test]
async fn test_list_synced_is_scoped_to_vault() {
    let repo = setup().await;
    let v1 = VaultId::new();
    let v2 = VaultId::new();
    repo.save_synced(&synced(v1, "b.txt", 1)).await.unwrap();
    repo.save_synced(&synced(v1, "a.txt", 1)).await.unwrap();
    repo.save_synced(&synced(v2, "c.txt", 1)).await.unwrap();

    let listed = repo.list_synced(v1).await.unwrap();
    let paths: Vec<&str> = listed.iter().map(|e| e.relative_path.as_str()).collect();
    assert_eq!(paths, vec!["a.txt", "b.txt"]);
}

#[tokio::test]
async fn test_delete_synced() {
    let repo = setup().await;
    let vault = VaultId::new();
    let entry = synced(vault, "gone.txt", 1);
    repo.save_synced(&entry).await.unwrap();

    repo.delete_synced(vault, &entry.relative_path).await.unwrap();
    // deleting twice is fine
    repo.delete_synced(vault, &entry.relative_path).await.unwrap();

    assert!(repo
        .get_synced(vault, &entry.relative_path)
        .await
        .unwrap()
        .is_none());
}

// ============================================================================
// Hash cache
// ============================================================================

#[tokio::test]
async fn test_hash_cache_replaces_all_entries() {
    let repo = setup().await;
    let vault = VaultId::new();
    let modified = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
    let a = HashCacheEntry {
        relative_path: path("a.bin"),
        size: 10,
        modified,
        content_hash: ContentHash::compute(b"a"),
    };
    let b = HashCacheEntry {
        relative_path: path("b.bin"),
        ..a.clone()
    };

    repo.save_hash_cache(vault, &[a.clone(), b]).await.unwrap();
    repo.save_hash_cache(vault, &[a.clone()]).await.unwrap();

    let loaded = repo.load_hash_cache(vault).await.unwrap();
    assert_eq!(loaded, vec![a.clone()]);
    // nanosecond mtimes survive storage so the cache still matches
    assert!(loaded[0].matches(10, modified));
}

// ============================================================================
// Audit
// ============================================================================

#[tokio::test]
async fn test_audit_round_trip() {
    let repo = setup().await;
    let record_id = RecordId::new();
    let entry = audit(AuditAction::ForceRelease, "drawing.slddrw")
        .with_record_id(record_id)
        .with_details(json!({"previous_owner": "bob"}));

    repo.save_audit(&entry).await.unwrap();

    let trail = repo.get_audit_trail(&path("drawing.slddrw")).await.unwrap();
    assert_eq!(trail.len(), 1);
    let loaded = &trail[0];
    assert!(loaded.id().is_some());
    assert_eq!(loaded.action(), AuditAction::ForceRelease);
    assert_eq!(loaded.record_id(), Some(record_id));
    assert_eq!(loaded.timestamp(), entry.timestamp());
    assert_eq!(loaded.details()["previous_owner"], "bob");
    assert!(loaded.is_destructive());
}

#[tokio::test]
async fn test_audit_failed_result_round_trip() {
    let repo = setup().await;
    let entry = AuditEntry::new(
        ActorId::new("alice").unwrap(),
        MachineId::new("ws-01").unwrap(),
        AuditAction::Checkout,
        AuditResult::failed("conflict", "checked out by bob on ws-07"),
    )
    .with_path(path("x.txt"));

    repo.save_audit(&entry).await.unwrap();

    let trail = repo.get_audit_trail(&path("x.txt")).await.unwrap();
    assert_eq!(trail[0].result(), entry.result());
}

#[tokio::test]
async fn test_audit_trail_is_oldest_first() {
    let repo = setup().await;
    let base = Utc::now() - Duration::minutes(10);
    for (i, action) in [AuditAction::Checkout, AuditAction::Checkin]
        .into_iter()
        .enumerate()
    {
        let entry = audit(action, "x.txt").with_timestamp(base + Duration::seconds(i as i64));
        repo.save_audit(&entry).await.unwrap();
    }
    repo.save_audit(&audit(AuditAction::Sync, "other.txt"))
        .await
        .unwrap();

    let trail = repo.get_audit_trail(&path("x.txt")).await.unwrap();
    let actions: Vec<AuditAction> = trail.iter().map(|e| e.action()).collect();
    assert_eq!(actions, vec![AuditAction::Checkout, AuditAction::Checkin]);
}

#[tokio::test]
async fn test_audit_since_is_newest_first_and_limited() {
    let repo = setup().await;
    let base = Utc::now() - Duration::hours(1);
    let old = audit(AuditAction::Sync, "old.txt").with_timestamp(base - Duration::hours(1));
    repo.save_audit(&old).await.unwrap();
    for i in 0..3 {
        let entry =
            audit(AuditAction::Download, "new.txt").with_timestamp(base + Duration::minutes(i));
        repo.save_audit(&entry).await.unwrap();
    }

    let recent = repo.get_audit_since(base - Duration::seconds(1), 2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent[0].timestamp() > recent[1].timestamp());
    assert!(recent.iter().all(|e| e.action() == AuditAction::Download));
}
