//! Content store port
//!
//! Content-addressed blob storage keyed by [`ContentHash`]. Uploading the
//! same bytes twice is a no-op, so puts are safe to retry.

use crate::domain::ContentHash;

use super::remote_catalog::CatalogError;

/// Port trait for content-addressed blob storage
#[async_trait::async_trait]
pub trait IContentStore: Send + Sync {
    /// Stores `data` under `hash`
    ///
    /// Implementations may verify that `data` actually hashes to `hash`
    /// and reject it otherwise.
    async fn put(&self, hash: &ContentHash, data: Vec<u8>) -> Result<(), CatalogError>;

    /// Fetches the blob stored under `hash`
    ///
    /// # Errors
    /// `Rejected` if no blob exists for the hash
    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, CatalogError>;

    /// Returns true if a blob is stored under `hash`
    async fn exists(&self, hash: &ContentHash) -> Result<bool, CatalogError>;
}
