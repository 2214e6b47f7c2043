//! pdmvault Audit - persisted trail of lock transitions and remote mutations
//!
//! Provides:
//! - `AuditLogger`: High-level service for recording audit entries
//! - Integration with `ISyncStateRepository` for persistent audit storage

pub mod logger;

pub use logger::AuditLogger;
