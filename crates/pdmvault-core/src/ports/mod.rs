//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRemoteCatalog`] - Authoritative record store with conditional writes
//! - [`IContentStore`] - Content-addressed blob storage
//! - [`ILocalFileSystem`] - Atomic local file operations
//! - [`ISyncStateRepository`] - Last-synced marks, hash cache, audit trail
//! - [`IPresenceSource`] - Heartbeats used for stale-lock detection

pub mod content_store;
pub mod local_filesystem;
pub mod presence;
pub mod remote_catalog;
pub mod state_repository;

pub use content_store::IContentStore;
pub use local_filesystem::ILocalFileSystem;
pub use presence::IPresenceSource;
pub use remote_catalog::{CatalogChange, CatalogError, IRemoteCatalog, UpdateOutcome};
pub use state_repository::ISyncStateRepository;
