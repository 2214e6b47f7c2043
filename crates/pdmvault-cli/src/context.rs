//! Wiring shared by every command
//!
//! Turns the configuration into a running [`VaultService`]: remote
//! adapters, the SQLite state database, and a Ctrl-C handler that cancels
//! the running batch between files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use pdmvault_cache::{pool::DatabasePool, SqliteStateRepository};
use pdmvault_catalog::connect;
use pdmvault_core::config::Config;
use pdmvault_core::domain::RelativePath;
use pdmvault_sync::{LocalFileSystemAdapter, ServiceOptions, ServicePorts, VaultService};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct EngineContext {
    pub service: Arc<VaultService>,
    pub cancel: CancellationToken,
    // Keeps the connection pool open for the service's lifetime.
    _pool: DatabasePool,
}

impl EngineContext {
    pub async fn open(config: &Config) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            let listed: Vec<String> = errors.iter().map(ToString::to_string).collect();
            bail!("Invalid configuration:\n  {}", listed.join("\n  "));
        }
        require_remote(config)?;

        let vault = config.to_vault().context("Invalid vault configuration")?;
        let identity = config
            .to_identity()
            .context("Invalid identity configuration")?;
        let remote = connect(&config.remote).context("Failed to set up remote catalog")?;

        let db_path = Config::default_db_path();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let pool = DatabasePool::new(Path::new(&db_path))
            .await
            .context("Failed to open state database")?;
        let state = Arc::new(SqliteStateRepository::new(pool.pool().clone()));

        info!(
            vault_id = %vault.id(),
            root = %vault.root().display(),
            actor = %identity.actor,
            role = %identity.role,
            "Opening vault"
        );
        let ports = ServicePorts {
            catalog: remote.catalog.clone(),
            content: remote.content.clone(),
            presence: remote.presence.clone(),
            fs: Arc::new(LocalFileSystemAdapter::new()),
            state,
        };
        let options = ServiceOptions::from_config(&config.sync, &config.remote);
        let service = Arc::new(VaultService::new(vault, identity, ports, options));

        let cancel = CancellationToken::new();
        tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

        Ok(Self {
            service,
            cancel,
            _pool: pool,
        })
    }
}

async fn cancel_on_ctrl_c(token: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("Interrupted, finishing files in progress");
            token.cancel();
        }
        Err(e) => warn!(error = %e, "Could not install Ctrl-C handler"),
    }
}

/// The state database outlives the process, so a per-run in-memory catalog
/// would make every synced file look deleted remotely on the next run.
fn require_remote(config: &Config) -> Result<()> {
    if config.remote.base_url.trim().is_empty() {
        bail!("No remote catalog configured; set remote.base_url in the config file");
    }
    Ok(())
}

/// Parses command-line paths, accepting absolute paths inside the vault
pub fn parse_paths(root: &Path, raw: &[String]) -> Result<Vec<RelativePath>> {
    raw.iter()
        .map(|arg| {
            let candidate = PathBuf::from(arg);
            let parsed = if candidate.is_absolute() {
                RelativePath::from_absolute(root, &candidate)
            } else {
                RelativePath::new(arg)
            };
            parsed.with_context(|| format!("Invalid vault path: {arg}"))
        })
        .collect()
}
