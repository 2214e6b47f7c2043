//! SQLite persistence for per-machine vault state
//!
//! Implements the `ISyncStateRepository` port from `pdmvault-core`:
//! last-synced marks, the scanner's hash cache and the audit trail all live
//! in one database per machine, keyed by vault id.
//!
//! ```no_run
//! use std::path::Path;
//! use pdmvault_cache::{DatabasePool, SqliteStateRepository};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/var/lib/pdmvault/state.db")).await?;
//! let repo = SqliteStateRepository::new(pool.pool().clone());
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteStateRepository;

/// Errors raised by the SQLite state store
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cannot open state database: {0}")]
    Open(String),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("schema migration {version} failed: {message}")]
    Migration { version: i64, message: String },

    /// A stored row no longer decodes into a domain value
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<pdmvault_core::domain::DomainError> for CacheError {
    fn from(e: pdmvault_core::domain::DomainError) -> Self {
        CacheError::Corrupt(e.to_string())
    }
}
