//! Domain entities and business logic
//!
//! This module contains the core domain types for pdmvault:
//! - Newtypes for type-safe identifiers, paths and content hashes
//! - Remote file records and their conditional mutations
//! - Local scan snapshots and persisted sync marks
//! - Reconciliation statuses
//! - Vault, identity and ignore rules
//! - Audit entries for lock transitions

pub mod audit;
pub mod errors;
pub mod ignore;
pub mod local;
pub mod newtypes;
pub mod record;
pub mod status;
pub mod synced;
pub mod vault;

// Re-export commonly used types
pub use audit::{AuditAction, AuditEntry, AuditResult};
pub use errors::DomainError;
pub use ignore::IgnoreRuleSet;
pub use local::{LocalEntry, LocalSnapshot, ScanError};
pub use newtypes::*;
pub use record::{CheckoutLock, FileRecord, NewRecord, RecordMutation};
pub use status::{DiffStatus, FileState, Reconciliation};
pub use synced::{HashCacheEntry, SyncedEntry};
pub use vault::{Identity, Role, Vault};
