//! In-memory catalog, content store and presence source
//!
//! Used by engine tests and by the CLI when no `remote.base_url` is set.
//! The catalog holds every record behind one mutex, so the version check,
//! the mutation precondition and the write happen atomically, exactly the
//! contract a real backing store gives through a filtered `UPDATE`.
//!
//! ## Failure injection
//!
//! - [`InMemoryCatalog::set_offline`] makes every call fail as unreachable.
//! - [`InMemoryCatalog::reject_next_updates`] reports the next N
//!   conditional updates as lost races without applying them.
//! - [`InMemoryCatalog::set_latency`] delays every call, for timeout tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use pdmvault_core::domain::{
    ActorId, ContentHash, FileRecord, MachineId, NewRecord, RecordId, RecordMutation, VaultId,
};
use pdmvault_core::ports::{
    CatalogChange, CatalogError, IContentStore, IPresenceSource, IRemoteCatalog, UpdateOutcome,
};

/// Capacity of the realtime change channel
const CHANGE_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// InMemoryCatalog
// ============================================================================

/// Authoritative record store kept in process memory
pub struct InMemoryCatalog {
    records: Mutex<HashMap<RecordId, FileRecord>>,
    changes: broadcast::Sender<CatalogChange>,
    offline: AtomicBool,
    rejections: AtomicUsize,
    latency_ms: AtomicU64,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            records: Mutex::new(HashMap::new()),
            changes,
            offline: AtomicBool::new(false),
            rejections: AtomicUsize::new(0),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Simulate the remote being unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Report the next `n` conditional updates as lost races
    pub fn reject_next_updates(&self, n: usize) {
        self.rejections.store(n, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Stores a record as-is, bypassing every check
    ///
    /// Lets tests stage remote state that another client produced.
    pub async fn seed(&self, record: FileRecord) {
        self.records.lock().await.insert(record.id, record.clone());
        let _ = self.changes.send(CatalogChange::Upserted(record));
    }

    /// Returns every record, including soft-deleted ones, sorted by path
    pub async fn snapshot(&self) -> Vec<FileRecord> {
        let mut all: Vec<FileRecord> = self.records.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        all
    }

    async fn gate(&self) -> Result<(), CatalogError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(CatalogError::Unreachable("catalog offline".to_string()));
        }
        Ok(())
    }

    fn take_rejection(&self) -> bool {
        self.rejections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn publish(&self, change: CatalogChange) {
        // no receivers is fine
        let _ = self.changes.send(change);
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn path_taken(
    records: &HashMap<RecordId, FileRecord>,
    vault_id: VaultId,
    path: &pdmvault_core::domain::RelativePath,
    except: Option<RecordId>,
) -> bool {
    records.values().any(|r| {
        r.is_active()
            && r.vault_id == vault_id
            && &r.relative_path == path
            && Some(r.id) != except
    })
}

#[async_trait::async_trait]
impl IRemoteCatalog for InMemoryCatalog {
    async fn list_records(&self, vault_id: VaultId) -> Result<Vec<FileRecord>, CatalogError> {
        self.gate().await?;
        let records = self.records.lock().await;
        let mut active: Vec<FileRecord> = records
            .values()
            .filter(|r| r.vault_id == vault_id && r.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(active)
    }

    async fn get_record(&self, id: RecordId) -> Result<Option<FileRecord>, CatalogError> {
        self.gate().await?;
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn conditional_update(
        &self,
        id: RecordId,
        expected_version: u64,
        mutation: &RecordMutation,
    ) -> Result<UpdateOutcome, CatalogError> {
        self.gate().await?;
        let mut records = self.records.lock().await;
        let current = records.get(&id).cloned().ok_or(CatalogError::NotFound(id))?;

        if self.take_rejection() {
            debug!(record_id = %id, mutation = mutation.name(), "Injected update rejection");
            return Ok(UpdateOutcome::rejected(current));
        }
        if current.version != expected_version || mutation.check(&current).is_err() {
            return Ok(UpdateOutcome::rejected(current));
        }
        if let RecordMutation::Move { new_path, .. } = mutation {
            if path_taken(&records, current.vault_id, new_path, Some(id)) {
                return Err(CatalogError::PathTaken(new_path.clone()));
            }
        }

        let mut next = current;
        mutation
            .apply(&mut next, Utc::now())
            .map_err(|e| CatalogError::Rejected(e.to_string()))?;
        records.insert(id, next.clone());
        drop(records);

        self.publish(CatalogChange::Upserted(next.clone()));
        Ok(UpdateOutcome::applied(next))
    }

    async fn insert(&self, record: NewRecord) -> Result<FileRecord, CatalogError> {
        self.gate().await?;
        let mut records = self.records.lock().await;
        if path_taken(&records, record.vault_id, &record.relative_path, None) {
            return Err(CatalogError::PathTaken(record.relative_path));
        }
        let stored = record.into_record(RecordId::new(), Utc::now());
        records.insert(stored.id, stored.clone());
        drop(records);

        self.publish(CatalogChange::Upserted(stored.clone()));
        Ok(stored)
    }

    async fn soft_delete(
        &self,
        id: RecordId,
        expected_version: u64,
        actor: &ActorId,
    ) -> Result<UpdateOutcome, CatalogError> {
        self.gate().await?;
        let mut records = self.records.lock().await;
        let current = records.get(&id).cloned().ok_or(CatalogError::NotFound(id))?;

        if !current.is_active()
            || current.version != expected_version
            || current.is_locked_by_other(actor)
        {
            return Ok(UpdateOutcome::rejected(current));
        }

        let now = Utc::now();
        let mut next = current;
        next.deleted_at = Some(now);
        next.updated_at = now;
        records.insert(id, next.clone());
        drop(records);

        self.publish(CatalogChange::Deleted {
            id,
            path: next.relative_path.clone(),
        });
        Ok(UpdateOutcome::applied(next))
    }

    fn changes(&self) -> broadcast::Receiver<CatalogChange> {
        self.changes.subscribe()
    }
}

// ============================================================================
// InMemoryContentStore
// ============================================================================

/// Content-addressed blobs kept in process memory
#[derive(Default)]
pub struct InMemoryContentStore {
    blobs: DashMap<ContentHash, Vec<u8>>,
    offline: AtomicBool,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    fn gate(&self) -> Result<(), CatalogError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CatalogError::Unreachable("content store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IContentStore for InMemoryContentStore {
    async fn put(&self, hash: &ContentHash, data: Vec<u8>) -> Result<(), CatalogError> {
        self.gate()?;
        let actual = ContentHash::compute(&data);
        if &actual != hash {
            return Err(CatalogError::Rejected(format!(
                "content hashes to {}, not {}",
                actual.short(),
                hash.short()
            )));
        }
        self.blobs.insert(hash.clone(), data);
        Ok(())
    }

    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, CatalogError> {
        self.gate()?;
        self.blobs
            .get(hash)
            .map(|blob| blob.value().clone())
            .ok_or_else(|| CatalogError::Rejected(format!("no blob stored for {}", hash.short())))
    }

    async fn exists(&self, hash: &ContentHash) -> Result<bool, CatalogError> {
        self.gate()?;
        Ok(self.blobs.contains_key(hash))
    }
}

// ============================================================================
// InMemoryPresence
// ============================================================================

/// Heartbeats kept in process memory
#[derive(Default)]
pub struct InMemoryPresence {
    seen: DashMap<(ActorId, MachineId), DateTime<Utc>>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a heartbeat of `actor` on `machine`
    pub fn heartbeat(&self, actor: &ActorId, machine: &MachineId, at: DateTime<Utc>) {
        self.seen.insert((actor.clone(), machine.clone()), at);
    }
}

#[async_trait::async_trait]
impl IPresenceSource for InMemoryPresence {
    async fn last_seen(
        &self,
        actor: &ActorId,
        machine: &MachineId,
    ) -> Result<Option<DateTime<Utc>>, CatalogError> {
        Ok(self
            .seen
            .get(&(actor.clone(), machine.clone()))
            .map(|at| *at.value()))
    }
}
