//! In-memory [`ISyncStateRepository`] for tests and ephemeral runs

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use pdmvault_core::domain::{AuditEntry, HashCacheEntry, RelativePath, SyncedEntry, VaultId};
use pdmvault_core::ports::ISyncStateRepository;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    synced: HashMap<VaultId, BTreeMap<RelativePath, SyncedEntry>>,
    hash_cache: HashMap<VaultId, Vec<HashCacheEntry>>,
    audit: Vec<AuditEntry>,
}

/// Keeps sync state in process memory; lost on drop
#[derive(Debug, Default)]
pub struct InMemoryStateRepository {
    state: RwLock<State>,
}

impl InMemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every audit entry recorded so far, oldest first
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.read().await.audit.clone()
    }
}

#[async_trait::async_trait]
impl ISyncStateRepository for InMemoryStateRepository {
    async fn get_synced(
        &self,
        vault_id: VaultId,
        path: &RelativePath,
    ) -> anyhow::Result<Option<SyncedEntry>> {
        let state = self.state.read().await;
        Ok(state
            .synced
            .get(&vault_id)
            .and_then(|marks| marks.get(path))
            .cloned())
    }

    async fn list_synced(&self, vault_id: VaultId) -> anyhow::Result<Vec<SyncedEntry>> {
        let state = self.state.read().await;
        Ok(state
            .synced
            .get(&vault_id)
            .map(|marks| marks.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_synced(&self, entry: &SyncedEntry) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        state
            .synced
            .entry(entry.vault_id)
            .or_default()
            .insert(entry.relative_path.clone(), entry.clone());
        Ok(())
    }

    async fn delete_synced(&self, vault_id: VaultId, path: &RelativePath) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if let Some(marks) = state.synced.get_mut(&vault_id) {
            marks.remove(path);
        }
        Ok(())
    }

    async fn load_hash_cache(&self, vault_id: VaultId) -> anyhow::Result<Vec<HashCacheEntry>> {
        let state = self.state.read().await;
        Ok(state.hash_cache.get(&vault_id).cloned().unwrap_or_default())
    }

    async fn save_hash_cache(
        &self,
        vault_id: VaultId,
        entries: &[HashCacheEntry],
    ) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        state.hash_cache.insert(vault_id, entries.to_vec());
        Ok(())
    }

    async fn save_audit(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        self.state.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn get_audit_trail(&self, path: &RelativePath) -> anyhow::Result<Vec<AuditEntry>> {
        let state = self.state.read().await;
        Ok(state
            .audit
            .iter()
            .filter(|e| e.path() == Some(path))
            .cloned()
            .collect())
    }

    async fn get_audit_since(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<AuditEntry>> {
        let state = self.state.read().await;
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|e| e.timestamp() >= since)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use pdmvault_core::domain::{
        ActorId, AuditAction, AuditResult, ContentHash, MachineId, RecordId,
    };

    use super::*;

    fn mark(vault: VaultId, path: &str, version: u64) -> SyncedEntry {
        SyncedEntry {
            vault_id: vault,
            relative_path: RelativePath::new(path).unwrap(),
            record_id: RecordId::new(),
            content_hash: ContentHash::compute(path.as_bytes()),
            version,
            synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_synced_marks_are_per_vault() {
        let repo = InMemoryStateRepository::new();
        let (v1, v2) = (VaultId::new(), VaultId::new());
        repo.save_synced(&mark(v1, "a.txt", 1)).await.unwrap();
        repo.save_synced(&mark(v1, "a.txt", 2)).await.unwrap();
        repo.save_synced(&mark(v2, "b.txt", 1)).await.unwrap();

        let listed = repo.list_synced(v1).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].version, 2);

        repo.delete_synced(v1, &RelativePath::new("a.txt").unwrap())
            .await
            .unwrap();
        assert!(repo.list_synced(v1).await.unwrap().is_empty());
        assert_eq!(repo.list_synced(v2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_audit_queries() {
        let repo = InMemoryStateRepository::new();
        let path = RelativePath::new("p.sldprt").unwrap();
        for action in [AuditAction::Checkout, AuditAction::Checkin] {
            let entry = AuditEntry::new(
                ActorId::new("alice").unwrap(),
                MachineId::new("ws-01").unwrap(),
                action,
                AuditResult::success(),
            )
            .with_path(path.clone());
            repo.save_audit(&entry).await.unwrap();
        }

        let trail = repo.get_audit_trail(&path).await.unwrap();
        assert_eq!(trail[0].action(), AuditAction::Checkout);

        let recent = repo
            .get_audit_since(Utc::now() - chrono::Duration::minutes(1), 1)
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].action(), AuditAction::Checkin);
    }
}
