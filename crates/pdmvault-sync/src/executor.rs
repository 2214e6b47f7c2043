//! Batch executor
//!
//! Applies one [`Operation`] to a set of paths against a [`Plan`] (the
//! reconciliation the caller decided on). Files run concurrently up to a
//! cap; each holds its path lock for the whole intent. A failure on one
//! file never stops the batch. Cancellation is checked between files:
//! whatever already started finishes, the rest is reported as not
//! attempted.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use pdmvault_audit::AuditLogger;
use pdmvault_core::domain::{
    AuditAction, ContentHash, DiffStatus, FileRecord, FileState, Identity, LocalSnapshot,
    NewRecord, Reconciliation, RecordId, RecordMutation, RelativePath, SyncedEntry, Vault,
};
use pdmvault_core::ports::{IContentStore, ILocalFileSystem, IRemoteCatalog, ISyncStateRepository};
use pdmvault_core::{ConflictKind, EngineError};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::coordinator::CheckoutCoordinator;
use crate::path_locks::{PathGuard, PathLocks};
use crate::retry::CallPolicy;

/// Workflow state given to records created by a first upload
pub const INITIAL_STATE: &str = "wip";

// ============================================================================
// Operations and results
// ============================================================================

/// A user intent applied to a batch of paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Sync,
    Download,
    Checkout,
    Checkin,
    Discard,
    DeleteLocal,
    DeleteServer { keep_local: bool },
    ForceRelease,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Sync => "sync",
            Operation::Download => "download",
            Operation::Checkout => "checkout",
            Operation::Checkin => "checkin",
            Operation::Discard => "discard",
            Operation::DeleteLocal => "delete-local",
            Operation::DeleteServer { .. } => "delete-server",
            Operation::ForceRelease => "force-release",
        }
    }

    /// Audit action recorded when the intent fails
    pub fn audit_action(&self) -> AuditAction {
        match self {
            Operation::Sync => AuditAction::Sync,
            Operation::Download => AuditAction::Download,
            Operation::Checkout => AuditAction::Checkout,
            Operation::Checkin => AuditAction::Checkin,
            Operation::Discard => AuditAction::Discard,
            Operation::DeleteLocal => AuditAction::DeleteLocal,
            Operation::DeleteServer { .. } => AuditAction::DeleteServer,
            Operation::ForceRelease => AuditAction::ForceRelease,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One file's failure inside a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileError {
    pub path: RelativePath,
    #[serde(serialize_with = "serialize_error")]
    pub error: EngineError,
}

fn serialize_error<S: serde::Serializer>(error: &EngineError, s: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeStruct;
    let mut st = s.serialize_struct("EngineError", 3)?;
    st.serialize_field("code", error.code())?;
    st.serialize_field("message", &error.to_string())?;
    st.serialize_field("retryable", &error.is_retryable())?;
    st.end()
}

/// Aggregated outcome of a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub operation: Operation,
    pub total: usize,
    /// Includes the no-ops counted in `unchanged`
    pub succeeded: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Skipped because the batch was cancelled first
    pub not_attempted: usize,
    pub errors: Vec<FileError>,
    pub cancelled: bool,
}

impl BatchResult {
    pub fn new(operation: Operation, total: usize) -> Self {
        Self {
            operation,
            total,
            succeeded: 0,
            unchanged: 0,
            failed: 0,
            not_attempted: 0,
            errors: Vec::new(),
            cancelled: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.not_attempted == 0
    }

    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Error recorded for `path`, if it failed
    pub fn error_for(&self, path: &RelativePath) -> Option<&EngineError> {
        self.errors.iter().find(|e| &e.path == path).map(|e| &e.error)
    }
}

// ============================================================================
// Plan
// ============================================================================

/// The reconciliation a batch acts on, plus the inputs that produced it
#[derive(Debug, Clone)]
pub struct Plan {
    pub vault: Vault,
    pub local: LocalSnapshot,
    pub marks: Vec<SyncedEntry>,
    pub reconciliation: Reconciliation,
}

impl Plan {
    /// State of a path, or why it cannot be acted on
    pub fn state_of(&self, path: &RelativePath) -> Result<&FileState, EngineError> {
        if let Some(state) = self.reconciliation.get(path) {
            return Ok(state);
        }
        if let Some(err) = self
            .local
            .errors
            .iter()
            .find(|e| &e.path == path || path.is_within(&e.path))
        {
            return Err(EngineError::Io(format!("{}: {}", err.path, err.message)));
        }
        Err(EngineError::Validation(format!(
            "{path} is not tracked in this vault"
        )))
    }

    /// Default selection when no paths are given
    pub fn default_targets(&self, operation: Operation, me: &Identity) -> Vec<RelativePath> {
        let select = |pick: &dyn Fn(&FileState) -> bool| {
            self.reconciliation
                .entries
                .iter()
                .filter(|(_, state)| pick(state))
                .map(|(path, _)| path.clone())
                .collect::<Vec<_>>()
        };
        match operation {
            Operation::Sync => select(&|s| s.status.is_uploadable()),
            Operation::Download => select(&|s| s.status.is_downloadable()),
            Operation::Checkin => select(&|s| {
                matches!(&s.checkout, Some(lock) if lock.actor == me.actor)
                    && s.status != DiffStatus::DeletedLocal
            }),
            _ => Vec::new(),
        }
    }

    /// Expands directories to the tracked entries beneath them and drops
    /// duplicates, keeping unknown paths so they fail individually
    pub fn expand(&self, paths: &[RelativePath]) -> Vec<RelativePath> {
        let mut out = BTreeSet::new();
        for path in paths {
            if self.reconciliation.get(path).is_some() {
                out.insert(path.clone());
                continue;
            }
            let beneath: Vec<_> = self
                .reconciliation
                .entries
                .iter()
                .filter(|(p, s)| p.is_within(path) && s.status != DiffStatus::Ignored)
                .map(|(p, _)| p.clone())
                .collect();
            if beneath.is_empty() {
                out.insert(path.clone());
            } else {
                out.extend(beneath);
            }
        }
        out.into_iter().collect()
    }

    /// Another path the intent on `path` also touches
    fn related_path(&self, operation: Operation, path: &RelativePath) -> Option<RelativePath> {
        let state = self.reconciliation.get(path)?;
        match (operation, &state.status) {
            (Operation::Sync, DiffStatus::Moved { from, .. }) => Some(from.clone()),
            (Operation::Download | Operation::Checkout | Operation::Discard, _) => {
                self.stale_mark(path, state.record_id?).map(|m| m.relative_path.clone())
            }
            _ => None,
        }
    }

    /// A mark left at an old path of a record that now lives at `path`
    fn stale_mark(&self, path: &RelativePath, record_id: RecordId) -> Option<&SyncedEntry> {
        self.marks
            .iter()
            .find(|m| m.record_id == record_id && &m.relative_path != path)
    }

    fn local_hash(&self, path: &RelativePath) -> Option<&ContentHash> {
        self.local.file(path).and_then(|e| e.content_hash.as_ref())
    }
}

// ============================================================================
// Executor
// ============================================================================

enum Applied {
    Changed,
    Unchanged,
}

impl Applied {
    fn from_changed(changed: bool) -> Self {
        if changed {
            Applied::Changed
        } else {
            Applied::Unchanged
        }
    }
}

/// Collaborators the executor drives
#[derive(Clone)]
pub struct ExecutorPorts {
    pub catalog: Arc<dyn IRemoteCatalog>,
    pub content: Arc<dyn IContentStore>,
    pub fs: Arc<dyn ILocalFileSystem>,
    pub state: Arc<dyn ISyncStateRepository>,
}

/// Runs batches of per-file intents
pub struct SyncExecutor {
    identity: Identity,
    ports: ExecutorPorts,
    coordinator: Arc<CheckoutCoordinator>,
    audit: Arc<AuditLogger>,
    locks: PathLocks,
    calls: CallPolicy,
    concurrency: usize,
}

impl SyncExecutor {
    pub fn new(
        ports: ExecutorPorts,
        coordinator: Arc<CheckoutCoordinator>,
        audit: Arc<AuditLogger>,
        calls: CallPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            identity: coordinator.identity().clone(),
            ports,
            coordinator,
            audit,
            locks: PathLocks::new(),
            calls,
            concurrency: concurrency.max(1),
        }
    }

    pub fn coordinator(&self) -> &Arc<CheckoutCoordinator> {
        &self.coordinator
    }

    /// Applies `operation` to every path, at most `concurrency` at a time
    #[instrument(skip(self, plan, paths, cancel), fields(operation = %operation, files = paths.len()))]
    pub async fn execute(
        self: &Arc<Self>,
        operation: Operation,
        plan: Arc<Plan>,
        paths: Vec<RelativePath>,
        cancel: CancellationToken,
    ) -> BatchResult {
        let mut result = BatchResult::new(operation, paths.len());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(paths.len());
        let mut queue = paths.into_iter();

        for path in queue.by_ref() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                result.not_attempted += 1;
                break;
            };

            let this = Arc::clone(self);
            let plan = Arc::clone(&plan);
            let cancel = cancel.clone();
            let task_path = path.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                this.run_file(operation, &plan, &task_path, &cancel).await
            });
            handles.push((path, handle));
        }
        result.not_attempted += queue.count();

        for (path, handle) in handles {
            match handle.await {
                Ok(None) => result.not_attempted += 1,
                Ok(Some(Ok(Applied::Changed))) => result.succeeded += 1,
                Ok(Some(Ok(Applied::Unchanged))) => {
                    result.succeeded += 1;
                    result.unchanged += 1;
                }
                Ok(Some(Err(error))) => {
                    result.failed += 1;
                    result.errors.push(FileError { path, error });
                }
                Err(join_err) => {
                    error!(path = %path, error = %join_err, "File task aborted");
                    result.failed += 1;
                    result.errors.push(FileError {
                        path,
                        error: EngineError::Io(format!("task aborted: {join_err}")),
                    });
                }
            }
        }

        result.cancelled = result.not_attempted > 0;
        result.errors.sort_by(|a, b| a.path.cmp(&b.path));
        self.locks.prune();

        info!(
            total = result.total,
            succeeded = result.succeeded,
            unchanged = result.unchanged,
            failed = result.failed,
            not_attempted = result.not_attempted,
            "Batch finished"
        );
        result
    }

    /// `None` when cancellation was observed before the file started
    async fn run_file(
        &self,
        operation: Operation,
        plan: &Plan,
        path: &RelativePath,
        cancel: &CancellationToken,
    ) -> Option<Result<Applied, EngineError>> {
        let _guards: Vec<PathGuard> = match plan.related_path(operation, path) {
            Some(other) => self.locks.acquire_pair(path, &other).await,
            None => vec![self.locks.acquire(path).await],
        };
        if cancel.is_cancelled() {
            debug!(path = %path, "Cancelled before start");
            return None;
        }

        let result = self.apply(operation, plan, path).await;
        if let Err(err) = &result {
            warn!(path = %path, operation = %operation, error = %err, "Intent failed");
            let record_id = plan.reconciliation.get(path).and_then(|s| s.record_id);
            self.audit
                .log_failure(operation.audit_action(), path, record_id, err)
                .await;
        }
        Some(result)
    }

    async fn apply(
        &self,
        operation: Operation,
        plan: &Plan,
        path: &RelativePath,
    ) -> Result<Applied, EngineError> {
        let state = plan.state_of(path)?;
        match operation {
            Operation::Sync => self.sync_file(plan, path, state).await,
            Operation::Download => self.download_file(plan, path, state).await,
            Operation::Checkout => self.checkout_file(plan, path, state).await,
            Operation::Checkin => self.checkin_file(plan, path, state).await,
            Operation::Discard => self.discard_file(plan, path, state).await,
            Operation::DeleteLocal => self.delete_local_file(plan, path, state).await,
            Operation::DeleteServer { keep_local } => {
                self.delete_server_file(plan, path, state, keep_local).await
            }
            Operation::ForceRelease => self.force_release_file(path, state).await,
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn require_mutate(&self, operation: Operation) -> Result<(), EngineError> {
        if self.identity.role.can_mutate() {
            Ok(())
        } else {
            Err(EngineError::Permission(format!(
                "{operation} requires the engineer or admin role, {} is a {}",
                self.identity.actor, self.identity.role
            )))
        }
    }

    /// Current active record behind `state`, still at `path`
    async fn fresh_record(
        &self,
        path: &RelativePath,
        state: &FileState,
    ) -> Result<FileRecord, EngineError> {
        let Some(id) = state.record_id else {
            return Err(wrong_status(path, &state.status));
        };
        let record = self
            .calls
            .read("get_record", || self.ports.catalog.get_record(id))
            .await?;
        match record {
            Some(record) if record.is_active() && &record.relative_path == path => Ok(record),
            _ => Err(EngineError::conflict(path, ConflictKind::RecordChanged)),
        }
    }

    async fn mark_synced(&self, plan: &Plan, record: &FileRecord) -> Result<(), EngineError> {
        let entry = SyncedEntry {
            vault_id: plan.vault.id(),
            relative_path: record.relative_path.clone(),
            record_id: record.id,
            content_hash: record.content_hash.clone(),
            version: record.version,
            synced_at: Utc::now(),
        };
        self.ports
            .state
            .save_synced(&entry)
            .await
            .map_err(EngineError::io)
    }

    async fn forget_mark(&self, plan: &Plan, path: &RelativePath) -> Result<(), EngineError> {
        self.ports
            .state
            .delete_synced(plan.vault.id(), path)
            .await
            .map_err(EngineError::io)
    }

    /// Fetches the record's content into `path` and marks it synced
    async fn fetch_into(&self, plan: &Plan, record: &FileRecord) -> Result<(), EngineError> {
        let path = &record.relative_path;
        let data = self
            .calls
            .read("content_get", || self.ports.content.get(&record.content_hash))
            .await?;
        let actual = ContentHash::compute(&data);
        if actual != record.content_hash {
            return Err(EngineError::Io(format!(
                "content for {path} hashed to {}, expected {}",
                actual.short(),
                record.content_hash.short()
            )));
        }

        let target = plan.vault.absolute(path);
        self.ports
            .fs
            .write_file_atomic(&target, &data)
            .await
            .map_err(EngineError::io)?;
        self.mark_synced(plan, record).await?;
        self.retire_old_copy(plan, record).await;
        self.audit.log_download(record).await;
        debug!(path = %path, bytes = data.len(), "Downloaded");
        Ok(())
    }

    /// After a remote rename lands locally, removes the untouched copy at
    /// the record's previous path
    async fn retire_old_copy(&self, plan: &Plan, record: &FileRecord) {
        let Some(mark) = plan.stale_mark(&record.relative_path, record.id) else {
            return;
        };
        let old = &mark.relative_path;
        if plan.local_hash(old) == Some(&mark.content_hash) {
            if let Err(e) = self.ports.fs.delete_file(&plan.vault.absolute(old)).await {
                warn!(path = %old, error = %e, "Could not remove renamed file's old copy");
                return;
            }
        }
        if let Err(e) = self.forget_mark(plan, old).await {
            warn!(path = %old, error = %e, "Could not drop old sync mark");
        }
    }

    /// Trashes or unlinks a local file; returns where it went
    async fn remove_local(&self, plan: &Plan, path: &RelativePath) -> Result<Option<String>, EngineError> {
        let absolute = plan.vault.absolute(path);
        match plan.vault.trash_dir() {
            Some(trash) => {
                let moved = self
                    .ports
                    .fs
                    .move_to_trash(&absolute, &plan.vault.absolute(trash))
                    .await
                    .map_err(EngineError::io)?;
                let shown = RelativePath::from_absolute(plan.vault.root(), &moved)
                    .map(|p| p.to_string())
                    .unwrap_or_else(|_| moved.display().to_string());
                Ok(Some(shown))
            }
            None => {
                self.ports
                    .fs
                    .delete_file(&absolute)
                    .await
                    .map_err(EngineError::io)?;
                Ok(None)
            }
        }
    }

    // ========================================================================
    // Intents
    // ========================================================================

    /// First upload of `addedLocal` files, or publishing a local move
    async fn sync_file(
        &self,
        plan: &Plan,
        path: &RelativePath,
        state: &FileState,
    ) -> Result<Applied, EngineError> {
        match &state.status {
            DiffStatus::Synced => Ok(Applied::Unchanged),
            DiffStatus::AddedLocal => {
                self.require_mutate(Operation::Sync)?;
                self.upload_new(plan, path).await
            }
            DiffStatus::Moved { record_id, from } => {
                self.require_mutate(Operation::Sync)?;
                self.apply_move(plan, path, *record_id, from).await
            }
            other => Err(wrong_status(path, other)),
        }
    }

    async fn upload_new(&self, plan: &Plan, path: &RelativePath) -> Result<Applied, EngineError> {
        let data = self
            .ports
            .fs
            .read_file(&plan.vault.absolute(path))
            .await
            .map_err(EngineError::io)?;
        let content_hash = ContentHash::compute(&data);
        let size = data.len() as u64;
        self.coordinator.upload(&content_hash, data).await?;

        let new_record = NewRecord {
            vault_id: plan.vault.id(),
            relative_path: path.clone(),
            content_hash,
            size,
            state: INITIAL_STATE.to_string(),
        };
        let record = self
            .calls
            .write("insert", self.ports.catalog.insert(new_record))
            .await?;

        self.mark_synced(plan, &record).await?;
        self.audit.log_sync(&record).await;
        info!(path = %path, record_id = %record.id, "Uploaded new file");
        Ok(Applied::Changed)
    }

    async fn apply_move(
        &self,
        plan: &Plan,
        path: &RelativePath,
        record_id: RecordId,
        from: &RelativePath,
    ) -> Result<Applied, EngineError> {
        let record = self
            .calls
            .read("get_record", || self.ports.catalog.get_record(record_id))
            .await?
            .filter(FileRecord::is_active)
            .ok_or_else(|| EngineError::conflict(path, ConflictKind::RecordChanged))?;
        if &record.relative_path != from {
            return Err(EngineError::conflict(path, ConflictKind::RecordChanged));
        }
        if let Some(lock) = record.checkout.as_ref().filter(|l| l.actor != self.identity.actor) {
            return Err(EngineError::conflict(
                path,
                ConflictKind::LockedBy {
                    owner: lock.actor.clone(),
                    machine: lock.machine.clone(),
                },
            ));
        }

        let mutation = RecordMutation::Move {
            actor: self.identity.actor.clone(),
            new_path: path.clone(),
        };
        let outcome = self
            .calls
            .write(
                mutation.name(),
                self.ports
                    .catalog
                    .conditional_update(record.id, record.version, &mutation),
            )
            .await?;
        if !outcome.applied {
            return Err(EngineError::conflict(
                path,
                ConflictKind::RaceLost {
                    owner: outcome.record.checked_out_by().cloned(),
                },
            ));
        }

        self.forget_mark(plan, from).await?;
        self.mark_synced(plan, &outcome.record).await?;
        self.audit.log_move(record.id, from, path).await;
        info!(from = %from, to = %path, record_id = %record.id, "Published move");
        Ok(Applied::Changed)
    }

    async fn download_file(
        &self,
        plan: &Plan,
        path: &RelativePath,
        state: &FileState,
    ) -> Result<Applied, EngineError> {
        match &state.status {
            DiffStatus::Synced => return Ok(Applied::Unchanged),
            DiffStatus::CloudOnly
            | DiffStatus::Outdated
            | DiffStatus::DeletedLocal
            | DiffStatus::ModifiedLocal => {}
            other => return Err(wrong_status(path, other)),
        }

        let record = self.fresh_record(path, state).await?;
        if plan.local_hash(path) == Some(&record.content_hash) {
            return Ok(Applied::Unchanged);
        }
        if state.status == DiffStatus::ModifiedLocal && record.is_checked_out_by(&self.identity.actor) {
            return Err(EngineError::conflict(path, ConflictKind::LocalChangesWouldBeLost));
        }

        if !self.follow_rename(plan, &record).await? {
            self.fetch_into(plan, &record).await?;
        }
        Ok(Applied::Changed)
    }

    /// Moves the untouched local copy of a remotely renamed record to its
    /// new path; `false` when there is nothing to move and the content
    /// must be fetched
    async fn follow_rename(&self, plan: &Plan, record: &FileRecord) -> Result<bool, EngineError> {
        let Some(mark) = plan.stale_mark(&record.relative_path, record.id) else {
            return Ok(false);
        };
        let old = &mark.relative_path;
        if plan.local.file(&record.relative_path).is_some()
            || plan.local_hash(old) != Some(&record.content_hash)
        {
            return Ok(false);
        }

        self.ports
            .fs
            .rename(&plan.vault.absolute(old), &plan.vault.absolute(&record.relative_path))
            .await
            .map_err(EngineError::io)?;
        self.forget_mark(plan, old).await?;
        self.mark_synced(plan, record).await?;
        self.audit.log_move(record.id, old, &record.relative_path).await;
        info!(from = %old, to = %record.relative_path, "Followed remote rename");
        Ok(true)
    }

    async fn checkout_file(
        &self,
        plan: &Plan,
        path: &RelativePath,
        state: &FileState,
    ) -> Result<Applied, EngineError> {
        self.require_mutate(Operation::Checkout)?;
        let record = self.fresh_record(path, state).await?;
        let outcome = self.coordinator.checkout(&record).await?;

        let needs_content = match plan.local_hash(path) {
            None => true,
            Some(local) => {
                local != &outcome.record.content_hash
                    && state.status != DiffStatus::ModifiedLocal
            }
        };
        if needs_content {
            if let Err(err) = self.fetch_into(plan, &outcome.record).await {
                // A lock we just took must not outlive a failed checkout.
                if outcome.changed {
                    self.undo_checkout(path, &outcome.record).await;
                }
                return Err(err);
            }
        }
        Ok(Applied::from_changed(outcome.changed || needs_content))
    }

    async fn undo_checkout(&self, path: &RelativePath, record: &FileRecord) {
        match self.coordinator.release(record).await {
            Ok(_) => info!(path = %path, "Released lock after failed download"),
            Err(e) => warn!(path = %path, error = %e, "Lock is still held after failed download"),
        }
    }

    async fn checkin_file(
        &self,
        plan: &Plan,
        path: &RelativePath,
        state: &FileState,
    ) -> Result<Applied, EngineError> {
        self.require_mutate(Operation::Checkin)?;
        if plan.local.file(path).is_none() {
            return Err(wrong_status(path, &state.status));
        }
        let record = self.fresh_record(path, state).await?;
        let outcome = self
            .coordinator
            .checkin(&record, &plan.vault.absolute(path))
            .await?;
        self.mark_synced(plan, &outcome.record).await?;
        Ok(Applied::from_changed(outcome.changed))
    }

    /// Gives up our lock and restores the server content
    async fn discard_file(
        &self,
        plan: &Plan,
        path: &RelativePath,
        state: &FileState,
    ) -> Result<Applied, EngineError> {
        let record = self.fresh_record(path, state).await?;
        let outcome = self.coordinator.release(&record).await?;

        let restore = plan.local_hash(path) != Some(&outcome.record.content_hash);
        if restore {
            self.fetch_into(plan, &outcome.record).await?;
        }
        Ok(Applied::from_changed(outcome.changed || restore))
    }

    async fn delete_local_file(
        &self,
        plan: &Plan,
        path: &RelativePath,
        state: &FileState,
    ) -> Result<Applied, EngineError> {
        if plan.local.file(path).is_none() {
            return Ok(Applied::Unchanged);
        }
        let mine = matches!(&state.checkout, Some(lock) if lock.actor == self.identity.actor);
        if mine {
            let record = self.fresh_record(path, state).await?;
            self.coordinator.release(&record).await?;
        }

        let trashed_to = self.remove_local(plan, path).await?;
        self.audit
            .log_delete_local(path, state.record_id, trashed_to.as_deref())
            .await;
        info!(path = %path, trashed_to = ?trashed_to, "Deleted local copy");
        Ok(Applied::Changed)
    }

    async fn delete_server_file(
        &self,
        plan: &Plan,
        path: &RelativePath,
        state: &FileState,
        keep_local: bool,
    ) -> Result<Applied, EngineError> {
        self.require_mutate(Operation::DeleteServer { keep_local })?;
        let Some(id) = state.record_id else {
            return Err(wrong_status(path, &state.status));
        };
        let record = match self
            .calls
            .read("get_record", || self.ports.catalog.get_record(id))
            .await?
        {
            Some(record) if record.is_active() => record,
            _ => {
                debug!(path = %path, "Record already deleted");
                return Ok(Applied::Unchanged);
            }
        };
        if let Some(lock) = record.checkout.as_ref().filter(|l| l.actor != self.identity.actor) {
            return Err(EngineError::conflict(
                path,
                ConflictKind::LockedBy {
                    owner: lock.actor.clone(),
                    machine: lock.machine.clone(),
                },
            ));
        }

        let outcome = self
            .calls
            .write(
                "soft_delete",
                self.ports
                    .catalog
                    .soft_delete(record.id, record.version, &self.identity.actor),
            )
            .await?;
        if !outcome.applied {
            if !outcome.record.is_active() {
                return Ok(Applied::Unchanged);
            }
            return Err(EngineError::conflict(
                path,
                ConflictKind::RaceLost {
                    owner: outcome.record.checked_out_by().cloned(),
                },
            ));
        }

        self.forget_mark(plan, path).await?;
        self.audit.log_delete_server(&outcome.record).await;

        if !keep_local && plan.local.file(path).is_some() {
            let trashed_to = self.remove_local(plan, path).await?;
            self.audit
                .log_delete_local(path, Some(record.id), trashed_to.as_deref())
                .await;
        }
        Ok(Applied::Changed)
    }

    async fn force_release_file(
        &self,
        path: &RelativePath,
        state: &FileState,
    ) -> Result<Applied, EngineError> {
        if !self.identity.role.can_force_release() {
            return Err(EngineError::Permission(format!(
                "force-release requires the admin role, {} is a {}",
                self.identity.actor, self.identity.role
            )));
        }
        let record = self.fresh_record(path, state).await?;
        let outcome = self.coordinator.force_release(&record).await?;
        Ok(Applied::from_changed(outcome.changed))
    }
}

fn wrong_status(path: &RelativePath, status: &DiffStatus) -> EngineError {
    EngineError::conflict(
        path,
        ConflictKind::WrongStatus {
            status: status.name().to_string(),
        },
    )
}
