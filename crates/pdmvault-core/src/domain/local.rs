//! Local scan results

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, RelativePath};

/// One file or folder observed under the vault root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    pub relative_path: RelativePath,
    pub is_directory: bool,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// `None` for directories
    pub content_hash: Option<ContentHash>,
}

impl LocalEntry {
    /// Creates a file entry
    pub fn file(
        relative_path: RelativePath,
        size: u64,
        modified: DateTime<Utc>,
        content_hash: ContentHash,
    ) -> Self {
        Self {
            relative_path,
            is_directory: false,
            size,
            modified,
            content_hash: Some(content_hash),
        }
    }

    /// Creates a directory entry
    pub fn directory(relative_path: RelativePath, modified: DateTime<Utc>) -> Self {
        Self {
            relative_path,
            is_directory: true,
            size: 0,
            modified,
            content_hash: None,
        }
    }
}

/// A path that could not be read during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanError {
    pub path: RelativePath,
    pub message: String,
}

/// Result of one scan pass, keyed by vault-relative path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    pub entries: BTreeMap<RelativePath, LocalEntry>,
    pub errors: Vec<ScanError>,
}

impl LocalSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an entry
    pub fn insert(&mut self, entry: LocalEntry) {
        self.entries.insert(entry.relative_path.clone(), entry);
    }

    pub fn get(&self, path: &RelativePath) -> Option<&LocalEntry> {
        self.entries.get(path)
    }

    /// Returns the file entry at `path`, ignoring directories
    pub fn file(&self, path: &RelativePath) -> Option<&LocalEntry> {
        self.entries.get(path).filter(|e| !e.is_directory)
    }

    /// Iterates file entries only
    pub fn files(&self) -> impl Iterator<Item = &LocalEntry> {
        self.entries.values().filter(|e| !e.is_directory)
    }

    /// Returns true if a scan error was reported for `path` or one of
    /// its ancestor directories
    pub fn has_error(&self, path: &RelativePath) -> bool {
        self.errors
            .iter()
            .any(|e| &e.path == path || path.is_within(&e.path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
