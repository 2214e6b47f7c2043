//! Local filesystem port (driven/secondary port)
//!
//! This module defines the interface for reading and mutating files under
//! the vault root.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - All paths are absolute; callers resolve `RelativePath`s against the
//!   vault root first.
//! - Writes must be atomic: a crash never leaves a partially written file
//!   at the destination.

use std::path::{Path, PathBuf};

/// Port trait for local filesystem operations
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Reads the entire contents of a file
    async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>>;

    /// Writes `data` to a temporary sibling and renames it over `path`
    ///
    /// Parent directories are created as needed.
    async fn write_file_atomic(&self, path: &Path, data: &[u8]) -> anyhow::Result<()>;

    /// Deletes a file; deleting a missing file succeeds
    async fn delete_file(&self, path: &Path) -> anyhow::Result<()>;

    /// Moves a file into `trash_dir` under a timestamp-suffixed name
    ///
    /// # Returns
    /// The path the file now lives at
    async fn move_to_trash(&self, path: &Path, trash_dir: &Path) -> anyhow::Result<PathBuf>;

    /// Renames `from` to `to`, creating parent directories of `to`
    ///
    /// Fails if `to` already exists.
    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()>;
}
