//! pdmvault Catalog - remote collaborator adapters
//!
//! Provides:
//! - [`rest::RestCatalog`]: HTTP client for a PostgREST-style record API
//!   plus object storage, implementing the catalog, content store and
//!   presence ports
//! - [`memory`]: in-process implementations of the same ports, used by
//!   tests and when no remote is configured
//!
//! [`connect`] picks one from the `remote` configuration section.

pub mod memory;
pub mod rest;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pdmvault_core::config::RemoteConfig;
use pdmvault_core::domain::VaultId;
use pdmvault_core::ports::{CatalogError, IContentStore, IPresenceSource, IRemoteCatalog};

pub use memory::{InMemoryCatalog, InMemoryContentStore, InMemoryPresence};
pub use rest::RestCatalog;

/// The three remote ports, backed by the same collaborator
#[derive(Clone)]
pub struct RemoteHandles {
    pub catalog: Arc<dyn IRemoteCatalog>,
    pub content: Arc<dyn IContentStore>,
    pub presence: Arc<dyn IPresenceSource>,
    rest: Option<Arc<RestCatalog>>,
    poll_interval: std::time::Duration,
}

impl RemoteHandles {
    /// Starts the REST change poller when polling is configured
    ///
    /// Returns `None` for the in-memory catalog, which publishes its own
    /// writes directly, or when `poll_interval_secs` is 0.
    pub fn start_polling(
        &self,
        vault_id: VaultId,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if self.poll_interval.is_zero() {
            return None;
        }
        self.rest
            .as_ref()
            .map(|rest| Arc::clone(rest).spawn_poller(vault_id, self.poll_interval, cancel))
    }
}

/// Builds the remote adapters described by `config`
///
/// An empty `base_url` selects a fresh in-memory catalog that lives only as
/// long as the returned handles.
///
/// # Errors
/// Returns `CatalogError::Rejected` if the HTTP client cannot be built
pub fn connect(config: &RemoteConfig) -> Result<RemoteHandles, CatalogError> {
    let poll_interval = std::time::Duration::from_secs(config.poll_interval_secs);
    if config.base_url.is_empty() {
        warn!("No remote configured, using a throwaway in-memory catalog");
        return Ok(RemoteHandles {
            catalog: Arc::new(InMemoryCatalog::new()),
            content: Arc::new(InMemoryContentStore::new()),
            presence: Arc::new(InMemoryPresence::new()),
            rest: None,
            poll_interval,
        });
    }

    let rest = Arc::new(RestCatalog::new(
        &config.base_url,
        config.api_key.clone().unwrap_or_default(),
        config.timeout(),
    )?);
    info!(base_url = %rest.base_url(), "Connected REST catalog");
    Ok(RemoteHandles {
        catalog: rest.clone(),
        content: rest.clone(),
        presence: rest.clone(),
        rest: Some(rest),
        poll_interval,
    })
}
