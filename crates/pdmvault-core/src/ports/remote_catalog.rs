//! Remote catalog port (driven/secondary port)
//!
//! The authoritative record store. Every write is conditional on the
//! caller's last-known `version`, which gives compare-and-swap semantics
//! without a central lock manager.
//!
//! ## Design Notes
//!
//! - Unlike the adapter-specific ports, this one returns a typed
//!   [`CatalogError`]: the engine must tell "unreachable" from "path taken".
//! - A lost race is NOT an error. `conditional_update` returns
//!   `UpdateOutcome { applied: false, record }` carrying the current record
//!   so the caller can report the new owner.
//! - `changes()` is the realtime notification channel. Implementations
//!   publish at least their own successful writes.

use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::{
    ActorId, FileRecord, NewRecord, RecordId, RecordMutation, RelativePath, VaultId,
};

/// Failures of the remote collaborator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Connection refused, DNS failure, 5xx
    #[error("catalog unreachable: {0}")]
    Unreachable(String),

    /// Request did not complete in time
    #[error("catalog request timed out")]
    Timeout,

    /// An active record already uses this path
    #[error("path already taken: {0}")]
    PathTaken(RelativePath),

    /// No record with this id
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// Credentials rejected
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Request rejected as malformed
    #[error("rejected: {0}")]
    Rejected(String),
}

impl CatalogError {
    /// Transport-level failures worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Unreachable(_) | CatalogError::Timeout)
    }
}

/// Result of a conditional write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// The record as stored after the call
    pub record: FileRecord,
    /// `false` when the expected version or the mutation's precondition did not hold
    pub applied: bool,
}

impl UpdateOutcome {
    pub fn applied(record: FileRecord) -> Self {
        Self {
            record,
            applied: true,
        }
    }

    pub fn rejected(record: FileRecord) -> Self {
        Self {
            record,
            applied: false,
        }
    }
}

/// Notification pushed on the realtime channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogChange {
    /// A record was created or mutated
    Upserted(FileRecord),
    /// A record was soft-deleted
    Deleted { id: RecordId, path: RelativePath },
}

impl CatalogChange {
    pub fn record_id(&self) -> RecordId {
        match self {
            CatalogChange::Upserted(record) => record.id,
            CatalogChange::Deleted { id, .. } => *id,
        }
    }
}

/// Port trait for the authoritative record store
#[async_trait::async_trait]
pub trait IRemoteCatalog: Send + Sync {
    /// Lists every active record of a vault
    async fn list_records(&self, vault_id: VaultId) -> Result<Vec<FileRecord>, CatalogError>;

    /// Fetches one record, including soft-deleted ones
    async fn get_record(&self, id: RecordId) -> Result<Option<FileRecord>, CatalogError>;

    /// Applies `mutation` only if the stored version equals `expected_version`
    /// and the mutation's precondition holds
    ///
    /// # Errors
    /// `NotFound` for an unknown id; `PathTaken` when a move targets a used path
    async fn conditional_update(
        &self,
        id: RecordId,
        expected_version: u64,
        mutation: &RecordMutation,
    ) -> Result<UpdateOutcome, CatalogError>;

    /// Creates a record at `version = 1`
    ///
    /// # Errors
    /// `PathTaken` if an active record already uses the path
    async fn insert(&self, record: NewRecord) -> Result<FileRecord, CatalogError>;

    /// Marks a record deleted, conditional on `expected_version` and on the
    /// record not being checked out by anyone but `actor`
    async fn soft_delete(
        &self,
        id: RecordId,
        expected_version: u64,
        actor: &ActorId,
    ) -> Result<UpdateOutcome, CatalogError>;

    /// Subscribes to the realtime change channel
    fn changes(&self) -> broadcast::Receiver<CatalogChange>;
}
