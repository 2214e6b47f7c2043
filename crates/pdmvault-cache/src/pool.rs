//! Connection pool for the state database
//!
//! File databases run in WAL mode so scans can read the hash cache while a
//! batch writes marks. The schema is versioned through `PRAGMA user_version`;
//! each migration runs once.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::CacheError;

/// Ordered schema migrations, indexed by the `user_version` they produce
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("migrations/20260301_initial.sql"))];

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool of SQLite connections holding vault state
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (creating if needed) the database at `db_path` and migrates it
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::Open(format!("{}: {}", parent.display(), e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| CacheError::Open(format!("{}: {}", db_path.display(), e)))?;

        let version = migrate(&pool).await?;
        tracing::info!(path = %db_path.display(), schema = version, "State database ready");
        Ok(Self { pool })
    }

    /// In-memory database for tests
    ///
    /// Pinned to one connection: every SQLite `:memory:` connection is a
    /// separate database.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CacheError::Open(format!("in-memory: {e}")))?;

        migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Applies pending migrations and returns the resulting schema version
async fn migrate(pool: &SqlitePool) -> Result<i64, CacheError> {
    let mut current: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| CacheError::Migration {
                version: *version,
                message: e.to_string(),
            })?;
        // PRAGMA does not take bind parameters.
        sqlx::raw_sql(&format!("PRAGMA user_version = {version}"))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::debug!(version, "Applied state schema migration");
        current = *version;
    }
    Ok(current)
}
