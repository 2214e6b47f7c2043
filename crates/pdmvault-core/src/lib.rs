//! pdmvault Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core of the vault engine:
//! - **Domain entities** - `FileRecord`, `LocalEntry`, `LocalSnapshot`, `Vault`, `AuditEntry`
//! - **Derived state** - the closed [`DiffStatus`](domain::DiffStatus) classification
//! - **Reconciler** - the pure function merging local and remote state ([`reconcile`])
//! - **Port definitions** - Traits for adapters: `IRemoteCatalog`, `IContentStore`,
//!   `ILocalFileSystem`, `ISyncStateRepository`, `IPresenceSource`
//!
//! # Architecture
//!
//! The domain module contains pure business logic with no I/O.
//! Ports define trait interfaces that adapter crates implement
//! (`pdmvault-catalog`, `pdmvault-cache`, `pdmvault-sync`).

pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod reconcile;

pub use error::{ConflictKind, EngineError};
