//! Vault service
//!
//! Owns one vault's scanner, executor and coordinator, and publishes
//! every reconciliation to subscribers. The command layer talks only to
//! this type.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use pdmvault_audit::AuditLogger;
use pdmvault_core::config::{RemoteConfig, SyncConfig};
use pdmvault_core::domain::{
    DiffStatus, FileRecord, Identity, IgnoreRuleSet, Reconciliation, RelativePath, SyncedEntry,
    Vault,
};
use pdmvault_core::ports::{IContentStore, ILocalFileSystem, IPresenceSource, IRemoteCatalog, ISyncStateRepository};
use pdmvault_core::reconcile::{reconcile, ReconcileInput};
use pdmvault_core::EngineError;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::coordinator::{CheckoutCoordinator, StaleLock};
use crate::executor::{BatchResult, ExecutorPorts, Operation, Plan, SyncExecutor};
use crate::retry::{CallPolicy, RetryPolicy};
use crate::scanner::Scanner;

/// Capacity of the status event channel
const EVENT_CAPACITY: usize = 64;

/// Notification published to subscribers
#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// A batch is about to run on these paths; tentative
    Pending {
        operation: Operation,
        paths: Vec<RelativePath>,
    },
    /// Authoritative statuses after a batch or a remote change
    Reconciled(Arc<Reconciliation>),
}

/// Every collaborator the service drives
#[derive(Clone)]
pub struct ServicePorts {
    pub catalog: Arc<dyn IRemoteCatalog>,
    pub content: Arc<dyn IContentStore>,
    pub presence: Arc<dyn IPresenceSource>,
    pub fs: Arc<dyn ILocalFileSystem>,
    pub state: Arc<dyn ISyncStateRepository>,
}

/// Tunables, usually taken from the configuration file
#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    pub concurrency: usize,
    pub hash_workers: usize,
    pub calls: CallPolicy,
    pub stale_lock_threshold: ChronoDuration,
}

impl ServiceOptions {
    pub fn from_config(sync: &SyncConfig, remote: &RemoteConfig) -> Self {
        Self {
            concurrency: sync.concurrency,
            hash_workers: sync.effective_hash_workers(),
            calls: CallPolicy::new(RetryPolicy::new(sync.max_retries), remote.timeout()),
            stale_lock_threshold: sync.stale_lock_threshold(),
        }
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default(), &RemoteConfig::default())
    }
}

/// One vault, its engine, and its subscribers
pub struct VaultService {
    vault: RwLock<Vault>,
    identity: Identity,
    ports: ServicePorts,
    scanner: Scanner,
    cache_loaded: AtomicBool,
    executor: Arc<SyncExecutor>,
    calls: CallPolicy,
    stale_lock_threshold: ChronoDuration,
    events: broadcast::Sender<StatusEvent>,
    latest: watch::Sender<Option<Arc<Reconciliation>>>,
}

impl VaultService {
    pub fn new(vault: Vault, identity: Identity, ports: ServicePorts, options: ServiceOptions) -> Self {
        let audit = Arc::new(AuditLogger::new(Arc::clone(&ports.state), &identity));
        let coordinator = Arc::new(CheckoutCoordinator::new(
            identity.clone(),
            Arc::clone(&ports.catalog),
            Arc::clone(&ports.content),
            Arc::clone(&ports.fs),
            Arc::clone(&audit),
            options.calls,
        ));
        let executor = Arc::new(SyncExecutor::new(
            ExecutorPorts {
                catalog: Arc::clone(&ports.catalog),
                content: Arc::clone(&ports.content),
                fs: Arc::clone(&ports.fs),
                state: Arc::clone(&ports.state),
            },
            coordinator,
            audit,
            options.calls,
            options.concurrency,
        ));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (latest, _) = watch::channel(None);

        Self {
            vault: RwLock::new(vault),
            identity,
            ports,
            scanner: Scanner::new(options.hash_workers),
            cache_loaded: AtomicBool::new(false),
            executor,
            calls: options.calls,
            stale_lock_threshold: options.stale_lock_threshold,
            events,
            latest,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub async fn vault(&self) -> Vault {
        self.vault.read().await.clone()
    }

    /// Receives every status event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Most recent reconciliation, if any pass has completed
    pub fn latest(&self) -> Option<Arc<Reconciliation>> {
        self.latest.borrow().clone()
    }

    /// Replaces the ignore rules; they apply from the next scan
    pub async fn set_ignore(&self, ignore: IgnoreRuleSet) {
        self.vault.write().await.set_ignore(ignore);
    }

    /// Scans, reconciles and publishes the result
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<Arc<Reconciliation>, EngineError> {
        let plan = self.plan().await?;
        Ok(self.publish(plan.reconciliation))
    }

    /// Runs `operation` on `paths` (directories expand to their contents)
    ///
    /// Empty `paths` selects every candidate for `sync`, `download` and
    /// `checkin`; other operations need explicit paths. Per-file failures
    /// are reported in the [`BatchResult`]; an `Err` means the batch could
    /// not start at all.
    #[instrument(skip(self, paths, cancel), fields(operation = %operation, requested = paths.len()))]
    pub async fn execute(
        &self,
        operation: Operation,
        paths: Vec<RelativePath>,
        cancel: CancellationToken,
    ) -> Result<BatchResult, EngineError> {
        let plan = self.plan().await?;
        let targets = if paths.is_empty() {
            match operation {
                Operation::Sync | Operation::Download | Operation::Checkin => {
                    plan.default_targets(operation, &self.identity)
                }
                _ => {
                    return Err(EngineError::Validation(format!(
                        "{operation} needs at least one path"
                    )))
                }
            }
        } else {
            plan.expand(&paths)
        };

        let _ = self.events.send(StatusEvent::Pending {
            operation,
            paths: targets.clone(),
        });
        let result = self
            .executor
            .execute(operation, Arc::new(plan), targets, cancel)
            .await;

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Reconciliation after batch failed");
        }
        Ok(result)
    }

    pub async fn sync(&self, paths: Vec<RelativePath>, cancel: CancellationToken) -> Result<BatchResult, EngineError> {
        self.execute(Operation::Sync, paths, cancel).await
    }

    pub async fn download(&self, paths: Vec<RelativePath>, cancel: CancellationToken) -> Result<BatchResult, EngineError> {
        self.execute(Operation::Download, paths, cancel).await
    }

    pub async fn checkout(&self, paths: Vec<RelativePath>, cancel: CancellationToken) -> Result<BatchResult, EngineError> {
        self.execute(Operation::Checkout, paths, cancel).await
    }

    pub async fn checkin(&self, paths: Vec<RelativePath>, cancel: CancellationToken) -> Result<BatchResult, EngineError> {
        self.execute(Operation::Checkin, paths, cancel).await
    }

    pub async fn discard(&self, paths: Vec<RelativePath>, cancel: CancellationToken) -> Result<BatchResult, EngineError> {
        self.execute(Operation::Discard, paths, cancel).await
    }

    pub async fn delete_local(&self, paths: Vec<RelativePath>, cancel: CancellationToken) -> Result<BatchResult, EngineError> {
        self.execute(Operation::DeleteLocal, paths, cancel).await
    }

    pub async fn delete_server(
        &self,
        paths: Vec<RelativePath>,
        keep_local: bool,
        cancel: CancellationToken,
    ) -> Result<BatchResult, EngineError> {
        self.execute(Operation::DeleteServer { keep_local }, paths, cancel)
            .await
    }

    pub async fn force_release(&self, paths: Vec<RelativePath>, cancel: CancellationToken) -> Result<BatchResult, EngineError> {
        self.execute(Operation::ForceRelease, paths, cancel).await
    }

    /// Locks whose owners have kept working past the configured threshold
    pub async fn stale_locks(&self) -> Result<Vec<StaleLock>, EngineError> {
        let vault_id = self.vault.read().await.id();
        let records = self
            .calls
            .read("list_records", || self.ports.catalog.list_records(vault_id))
            .await?;
        self.executor
            .coordinator()
            .stale_locks(&records, self.ports.presence.as_ref(), self.stale_lock_threshold)
            .await
    }

    /// Re-reconciles whenever the catalog reports a change, until cancelled
    /// or the channel closes
    pub fn spawn_change_listener(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut changes = self.ports.catalog.changes();
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = changes.recv() => received,
                };
                match received {
                    Ok(change) => debug!(?change, "Catalog change"),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "Change listener lagged, reconciling anyway");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                // Coalesce a burst into one pass.
                while changes.try_recv().is_ok() {}
                if let Err(e) = self.refresh().await {
                    warn!(error = %e, "Reconciliation after remote change failed");
                }
            }
            info!("Change listener stopped");
        })
    }

    // ========================================================================
    // Planning
    // ========================================================================

    fn publish(&self, reconciliation: Reconciliation) -> Arc<Reconciliation> {
        let reconciliation = Arc::new(reconciliation);
        self.latest.send_replace(Some(Arc::clone(&reconciliation)));
        let _ = self
            .events
            .send(StatusEvent::Reconciled(Arc::clone(&reconciliation)));
        reconciliation
    }

    async fn plan(&self) -> Result<Plan, EngineError> {
        let vault = self.vault().await;

        if !self.cache_loaded.swap(true, Ordering::SeqCst) {
            match self.ports.state.load_hash_cache(vault.id()).await {
                Ok(entries) => self.scanner.load_cache(entries).await,
                Err(e) => warn!(error = %e, "Could not load hash cache"),
            }
        }
        let local = self.scanner.scan(&vault).await?;
        let cache = self.scanner.cache_entries().await;
        if let Err(e) = self.ports.state.save_hash_cache(vault.id(), &cache).await {
            warn!(error = %e, "Could not save hash cache");
        }

        let vault_id = vault.id();
        let records = self
            .calls
            .read("list_records", || self.ports.catalog.list_records(vault_id))
            .await?;
        let marks = self
            .ports
            .state
            .list_synced(vault_id)
            .await
            .map_err(EngineError::io)?;

        let reconciliation = reconcile(
            &ReconcileInput {
                local: &local,
                records: &records,
                last_synced: &marks,
                ignore: vault.ignore(),
                me: &self.identity.actor,
            },
            Utc::now(),
        );
        let marks = self.tidy_marks(&vault, &records, marks, &reconciliation).await;

        Ok(Plan {
            vault,
            local,
            marks,
            reconciliation,
        })
    }

    /// Adopts marks for paths found in sync and drops marks whose record is
    /// gone; returns the marks as they now stand
    async fn tidy_marks(
        &self,
        vault: &Vault,
        records: &[FileRecord],
        marks: Vec<SyncedEntry>,
        reconciliation: &Reconciliation,
    ) -> Vec<SyncedEntry> {
        let active: HashSet<_> = records.iter().filter(|r| r.is_active()).map(|r| r.id).collect();
        let mut kept: Vec<SyncedEntry> = Vec::with_capacity(marks.len());

        for mark in marks {
            if active.contains(&mark.record_id) {
                kept.push(mark);
                continue;
            }
            debug!(path = %mark.relative_path, "Dropping mark of deleted record");
            if let Err(e) = self.ports.state.delete_synced(vault.id(), &mark.relative_path).await {
                warn!(path = %mark.relative_path, error = %e, "Could not drop sync mark");
            }
        }

        for (path, state) in &reconciliation.entries {
            if state.status != DiffStatus::Synced {
                continue;
            }
            let (Some(record_id), Some(version), Some(hash)) =
                (state.record_id, state.version, state.remote_hash.clone())
            else {
                continue;
            };
            let current = kept.iter().any(|m| {
                &m.relative_path == path && m.record_id == record_id && m.version == version
            });
            if current {
                continue;
            }
            let entry = SyncedEntry {
                vault_id: vault.id(),
                relative_path: path.clone(),
                record_id,
                content_hash: hash,
                version,
                synced_at: Utc::now(),
            };
            if let Err(e) = self.ports.state.save_synced(&entry).await {
                warn!(path = %path, error = %e, "Could not adopt sync mark");
                continue;
            }
            debug!(path = %path, version, "Adopted sync mark");
            kept.retain(|m| &m.relative_path != path);
            kept.push(entry);
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use pdmvault_catalog::memory::{InMemoryCatalog, InMemoryContentStore, InMemoryPresence};
    use pdmvault_core::domain::{ActorId, ContentHash, MachineId, NewRecord, Role, VaultId};
    use tempfile::TempDir;

    use super::*;
    use crate::filesystem::LocalFileSystemAdapter;
    use crate::memory_state::InMemoryStateRepository;

    fn service(dir: &TempDir, catalog: Arc<InMemoryCatalog>, vault_id: VaultId) -> VaultService {
        let vault = Vault::new(vault_id, dir.path(), IgnoreRuleSet::empty()).unwrap();
        let identity = Identity::new(
            ActorId::new("alice").unwrap(),
            MachineId::new("ws-01").unwrap(),
            Role::Engineer,
        );
        let ports = ServicePorts {
            catalog,
            content: Arc::new(InMemoryContentStore::new()),
            presence: Arc::new(InMemoryPresence::new()),
            fs: Arc::new(LocalFileSystemAdapter::new()),
            state: Arc::new(InMemoryStateRepository::new()),
        };
        VaultService::new(vault, identity, ports, ServiceOptions::default())
    }

    #[tokio::test]
    async fn test_refresh_publishes_latest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let svc = service(&dir, Arc::new(InMemoryCatalog::new()), VaultId::new());
        let mut events = svc.subscribe();
        assert!(svc.latest().is_none());

        let rec = svc.refresh().await.unwrap();
        assert_eq!(
            rec.status(&RelativePath::new("a.txt").unwrap()),
            Some(&DiffStatus::AddedLocal)
        );
        assert!(matches!(events.recv().await.unwrap(), StatusEvent::Reconciled(_)));
        assert_eq!(svc.latest().unwrap(), rec);
    }

    #[tokio::test]
    async fn test_batch_publishes_pending_then_reconciled() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let svc = service(&dir, Arc::new(InMemoryCatalog::new()), VaultId::new());
        let mut events = svc.subscribe();

        let result = svc.sync(Vec::new(), CancellationToken::new()).await.unwrap();
        assert_eq!(result.succeeded, 1);

        match events.recv().await.unwrap() {
            StatusEvent::Pending { operation, paths } => {
                assert_eq!(operation, Operation::Sync);
                assert_eq!(paths, vec![RelativePath::new("a.txt").unwrap()]);
            }
            other => panic!("expected pending, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            StatusEvent::Reconciled(rec) => assert!(rec.is_converged()),
            other => panic!("expected reconciled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_explicit_paths_required_for_destructive_intents() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, Arc::new(InMemoryCatalog::new()), VaultId::new());
        let err = svc
            .delete_server(Vec::new(), false, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_equal_content_adopts_mark() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("x.txt"), b"shared").unwrap();
        let vault_id = VaultId::new();
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog
            .insert(NewRecord {
                vault_id,
                relative_path: RelativePath::new("x.txt").unwrap(),
                content_hash: ContentHash::compute(b"shared"),
                size: 6,
                state: "wip".into(),
            })
            .await
            .unwrap();
        let svc = service(&dir, catalog, vault_id);

        let rec = svc.refresh().await.unwrap();
        assert!(rec.is_converged());
        let marks = svc.ports.state.list_synced(vault_id).await.unwrap();
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].version, 1);
    }

    #[tokio::test]
    async fn test_missing_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, Arc::new(InMemoryCatalog::new()), VaultId::new());
        let root = dir.path().to_path_buf();
        drop(dir);
        assert!(!root.exists());

        let err = svc.sync(Vec::new(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
