//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs` for async file operations.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: content goes to a sibling temp file which is flushed
//!   and renamed over the target, so a crash never leaves a partial file.
//! - **Trash**: user-visible deletes move the file into a vault-local trash
//!   directory under a timestamp-suffixed name instead of unlinking it.
//! - **Hashing**: SHA-256 in 64 KiB chunks on the blocking pool; the same
//!   routine backs the scanner's worker threads ([`hash_file`]).

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pdmvault_core::{
    domain::{ContentHash, ContentHasher},
    ports::ILocalFileSystem,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Suffix of in-flight atomic writes; the scanner never reports these
pub const TEMP_SUFFIX: &str = ".pdmvault-tmp";

const HASH_CHUNK: usize = 64 * 1024;

/// Hashes a file on the calling thread
///
/// # Errors
/// Any I/O error opening or reading the file
pub fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Converts a filesystem timestamp to UTC
pub fn system_time_to_utc(time: std::time::SystemTime) -> Option<DateTime<Utc>> {
    time.duration_since(std::time::UNIX_EPOCH)
        .ok()
        .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()))
}

fn temp_path(target: &Path) -> PathBuf {
    let mut p = target.as_os_str().to_owned();
    p.push(TEMP_SUFFIX);
    PathBuf::from(p)
}

fn trash_name(path: &Path, now: DateTime<Utc>, attempt: u32) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    let stamp = now.format("%Y%m%dT%H%M%S%3fZ");
    if attempt == 0 {
        format!("{name}.{stamp}")
    } else {
        format!("{name}.{stamp}-{attempt}")
    }
}

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem.
///
/// Zero-sized: every operation takes absolute paths, the vault root lives
/// one layer up.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        let data = tokio::fs::read(path).await?;
        debug!(bytes = data.len(), "file read complete");
        Ok(data)
    }

    #[instrument(skip(self, data), fields(path = %path.display(), bytes = data.len()))]
    async fn write_file_atomic(&self, path: &Path, data: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Same directory, so the rename stays on one filesystem.
        let tmp_path = temp_path(path);
        let result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        debug!("write complete");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn delete_file(&self, path: &Path) -> anyhow::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!("file removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(path = %path.display(), trash = %trash_dir.display()))]
    async fn move_to_trash(&self, path: &Path, trash_dir: &Path) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(trash_dir).await?;
        let now = Utc::now();
        let mut attempt = 0;
        let target = loop {
            let candidate = trash_dir.join(trash_name(path, now, attempt));
            if !tokio::fs::try_exists(&candidate).await? {
                break candidate;
            }
            attempt += 1;
        };

        if let Err(rename_err) = tokio::fs::rename(path, &target).await {
            // Trash may sit on another device: copy then unlink.
            if tokio::fs::copy(path, &target).await.is_err() {
                return Err(rename_err.into());
            }
            tokio::fs::remove_file(path).await?;
        }
        debug!(target = %target.display(), "moved to trash");
        Ok(target)
    }

    #[instrument(skip(self), fields(from = %from.display(), to = %to.display()))]
    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        if tokio::fs::try_exists(to).await? {
            anyhow::bail!("rename target already exists: {}", to.display());
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(from, to).await?;
        Ok(())
    }
}

// ============================================================================
// Unit tests
// ============================================================================
