//! AuditLogger - high-level audit logging service
//!
//! Wraps `ISyncStateRepository::save_audit()` with convenience methods for
//! each auditable engine operation. All methods are non-fatal: errors
//! in audit persistence are logged via `tracing::warn!` but never propagated.

use std::sync::Arc;

use pdmvault_core::{
    domain::{
        ActorId, AuditAction, AuditEntry, AuditResult, CheckoutLock, FileRecord, Identity,
        MachineId, RecordId, RelativePath,
    },
    ports::ISyncStateRepository,
    EngineError,
};
use serde_json::json;

/// High-level audit logger bound to the acting identity.
///
/// All methods silently swallow errors (logging a warning) to ensure
/// audit failures never break a batch.
pub struct AuditLogger {
    state_repo: Arc<dyn ISyncStateRepository>,
    actor: ActorId,
    machine: MachineId,
}

impl AuditLogger {
    /// Creates a new `AuditLogger` recording entries on behalf of `identity`.
    pub fn new(state_repo: Arc<dyn ISyncStateRepository>, identity: &Identity) -> Self {
        Self {
            state_repo,
            actor: identity.actor.clone(),
            machine: identity.machine.clone(),
        }
    }

    fn entry(&self, action: AuditAction, result: AuditResult) -> AuditEntry {
        AuditEntry::new(self.actor.clone(), self.machine.clone(), action, result)
    }

    fn for_record(&self, action: AuditAction, record: &FileRecord) -> AuditEntry {
        self.entry(action, AuditResult::success())
            .with_path(record.relative_path.clone())
            .with_record_id(record.id)
    }

    /// Persist an audit entry, swallowing errors with a tracing warning.
    async fn save(&self, entry: &AuditEntry) {
        if let Err(e) = self.state_repo.save_audit(entry).await {
            tracing::warn!(error = %e, action = %entry.action(), "Failed to save audit entry");
        }
    }

    // ========================================================================
    // Content transfer
    // ========================================================================

    /// Log the first upload of a local-only file.
    pub async fn log_sync(&self, record: &FileRecord) {
        let entry = self
            .for_record(AuditAction::Sync, record)
            .with_details(json!({
                "content_hash": record.content_hash.as_str(),
                "size_bytes": record.size,
            }));
        self.save(&entry).await;
    }

    /// Log a record following a local move.
    pub async fn log_move(&self, record_id: RecordId, from: &RelativePath, to: &RelativePath) {
        let entry = self
            .entry(AuditAction::Move, AuditResult::success())
            .with_path(to.clone())
            .with_record_id(record_id)
            .with_details(json!({
                "from": from.as_str(),
                "to": to.as_str(),
            }));
        self.save(&entry).await;
    }

    /// Log server content written to the local vault.
    pub async fn log_download(&self, record: &FileRecord) {
        let entry = self
            .for_record(AuditAction::Download, record)
            .with_details(json!({
                "version": record.version,
                "content_hash": record.content_hash.as_str(),
                "size_bytes": record.size,
            }));
        self.save(&entry).await;
    }

    // ========================================================================
    // Lock transitions
    // ========================================================================

    /// Log a lock acquired by the acting identity.
    pub async fn log_checkout(&self, record: &FileRecord) {
        let entry = self
            .for_record(AuditAction::Checkout, record)
            .with_details(json!({ "version": record.version }));
        self.save(&entry).await;
    }

    /// Log a check-in; `content_changed` is false when the lock was released
    /// without a version bump.
    pub async fn log_checkin(&self, record: &FileRecord, content_changed: bool) {
        let entry = self
            .for_record(AuditAction::Checkin, record)
            .with_details(json!({
                "version": record.version,
                "content_hash": record.content_hash.as_str(),
                "content_changed": content_changed,
            }));
        self.save(&entry).await;
    }

    /// Log an own lock released without publishing.
    pub async fn log_discard(&self, record: &FileRecord) {
        let entry = self
            .for_record(AuditAction::Discard, record)
            .with_details(json!({ "version": record.version }));
        self.save(&entry).await;
    }

    /// Log an administrative release of someone else's lock.
    ///
    /// Destructive: the previous owner's unsaved local edits are orphaned.
    pub async fn log_force_release(&self, record: &FileRecord, previous: &CheckoutLock) {
        tracing::warn!(
            path = %record.relative_path,
            record_id = %record.id,
            previous_owner = %previous.actor,
            previous_machine = %previous.machine,
            "Lock force-released"
        );
        let entry = self
            .for_record(AuditAction::ForceRelease, record)
            .with_details(json!({
                "previous_owner": previous.actor.as_str(),
                "previous_machine": previous.machine.as_str(),
                "checked_out_at": previous.at.to_rfc3339(),
            }));
        self.save(&entry).await;
    }

    // ========================================================================
    // Deletes
    // ========================================================================

    /// Log removal of a local copy. `trashed_to` is set when the file was
    /// moved to the vault trash instead of unlinked.
    pub async fn log_delete_local(
        &self,
        path: &RelativePath,
        record_id: Option<RecordId>,
        trashed_to: Option<&str>,
    ) {
        let mut entry = self
            .entry(AuditAction::DeleteLocal, AuditResult::success())
            .with_path(path.clone())
            .with_details(json!({ "trashed_to": trashed_to }));
        if let Some(id) = record_id {
            entry = entry.with_record_id(id);
        }
        self.save(&entry).await;
    }

    /// Log a soft-deleted server record.
    pub async fn log_delete_server(&self, record: &FileRecord) {
        tracing::warn!(
            path = %record.relative_path,
            record_id = %record.id,
            "Server record deleted"
        );
        let entry = self
            .for_record(AuditAction::DeleteServer, record)
            .with_details(json!({ "version": record.version }));
        self.save(&entry).await;
    }

    // ========================================================================
    // Failures
    // ========================================================================

    /// Log a failed intent on one path.
    pub async fn log_failure(
        &self,
        action: AuditAction,
        path: &RelativePath,
        record_id: Option<RecordId>,
        error: &EngineError,
    ) {
        let mut entry = self
            .entry(action, AuditResult::failed(error.code(), error.to_string()))
            .with_path(path.clone())
            .with_details(json!({
                "retryable": error.is_retryable(),
                "conflict": error.conflict_kind().map(|k| json!(k)),
            }));
        if let Some(id) = record_id {
            entry = entry.with_record_id(id);
        }
        self.save(&entry).await;
    }
}
