//! pdmvault Sync - scanning, locking and batch execution
//!
//! Provides:
//! - Parallel local scanning with a persisted hash cache
//! - Single-writer checkout coordination over conditional updates
//! - Cancellable batch operations with per-path serialization
//! - A service object publishing reconciliation results
//!
//! ## Modules
//!
//! - [`service`] - [`VaultService`], the entry point for the command layer
//! - [`executor`] - Batch operations (`sync`, `download`, `checkout`, ...)
//! - [`coordinator`] - Lock transitions and stale-lock detection
//! - [`scanner`] - Vault walk and content hashing
//! - [`filesystem`] - Local filesystem adapter (atomic writes, trash)
//! - [`memory_state`] - In-memory sync state repository

pub mod coordinator;
pub mod executor;
pub mod filesystem;
pub mod memory_state;
pub mod path_locks;
pub mod retry;
pub mod scanner;
pub mod service;

pub use coordinator::{CheckoutCoordinator, LockOutcome, StaleLock};
pub use executor::{BatchResult, FileError, Operation, Plan, SyncExecutor};
pub use filesystem::LocalFileSystemAdapter;
pub use memory_state::InMemoryStateRepository;
pub use retry::{CallPolicy, RetryPolicy};
pub use scanner::{ScanStats, Scanner};
pub use service::{ServiceOptions, ServicePorts, StatusEvent, VaultService};
