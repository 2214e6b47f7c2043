//! Reconciliation results
//!
//! [`DiffStatus`] is a closed classification; consumers match on it
//! exhaustively instead of comparing status strings.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::local::ScanError;
use super::newtypes::{ContentHash, RecordId, RelativePath};
use super::record::CheckoutLock;

/// Derived classification of one vault path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiffStatus {
    /// Local content equals the record's content
    Synced,
    /// Local-only, never uploaded
    AddedLocal,
    /// Local content differs and the change is ours to publish
    ModifiedLocal,
    /// Someone checked in since we last pulled
    Outdated,
    /// Record exists, never downloaded here
    CloudOnly,
    /// Local file removed, record still active
    DeletedLocal,
    /// Same content found under a new path; the record keeps its identity
    Moved {
        record_id: RecordId,
        from: RelativePath,
    },
    /// Excluded by the ignore filter
    Ignored,
}

impl DiffStatus {
    /// Short stable name for display and JSON
    pub fn name(&self) -> &'static str {
        match self {
            DiffStatus::Synced => "synced",
            DiffStatus::AddedLocal => "added_local",
            DiffStatus::ModifiedLocal => "modified_local",
            DiffStatus::Outdated => "outdated",
            DiffStatus::CloudOnly => "cloud_only",
            DiffStatus::DeletedLocal => "deleted_local",
            DiffStatus::Moved { .. } => "moved",
            DiffStatus::Ignored => "ignored",
        }
    }

    /// Statuses a `download` can act on
    pub fn is_downloadable(&self) -> bool {
        matches!(self, DiffStatus::CloudOnly | DiffStatus::Outdated)
    }

    /// Statuses a `sync` can act on
    pub fn is_uploadable(&self) -> bool {
        matches!(self, DiffStatus::AddedLocal | DiffStatus::Moved { .. })
    }
}

impl fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffStatus::Moved { from, .. } => write!(f, "moved (from {from})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Everything the command layer needs to act on one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub status: DiffStatus,
    /// Identity of the matching record, if any
    pub record_id: Option<RecordId>,
    /// The record's version at reconciliation time
    pub version: Option<u64>,
    /// Current lock on the record
    pub checkout: Option<CheckoutLock>,
    pub local_hash: Option<ContentHash>,
    pub remote_hash: Option<ContentHash>,
}

impl FileState {
    /// A state carrying only a status
    pub fn bare(status: DiffStatus) -> Self {
        Self {
            status,
            record_id: None,
            version: None,
            checkout: None,
            local_hash: None,
            remote_hash: None,
        }
    }
}

/// One reconciliation pass over a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub entries: BTreeMap<RelativePath, FileState>,
    pub scan_errors: Vec<ScanError>,
    pub reconciled_at: DateTime<Utc>,
}

impl Reconciliation {
    pub fn new(reconciled_at: DateTime<Utc>) -> Self {
        Self {
            entries: BTreeMap::new(),
            scan_errors: Vec::new(),
            reconciled_at,
        }
    }

    pub fn get(&self, path: &RelativePath) -> Option<&FileState> {
        self.entries.get(path)
    }

    /// Returns the status of `path`, if tracked
    pub fn status(&self, path: &RelativePath) -> Option<&DiffStatus> {
        self.entries.get(path).map(|s| &s.status)
    }

    /// Path to status mapping, the shape the UI layer renders
    pub fn statuses(&self) -> BTreeMap<RelativePath, DiffStatus> {
        self.entries
            .iter()
            .map(|(path, state)| (path.clone(), state.status.clone()))
            .collect()
    }

    /// Number of paths with the given status name
    pub fn count(&self, name: &str) -> usize {
        self.entries
            .values()
            .filter(|s| s.status.name() == name)
            .count()
    }

    /// Returns true if every tracked path is synced or ignored
    pub fn is_converged(&self) -> bool {
        self.entries
            .values()
            .all(|s| matches!(s.status, DiffStatus::Synced | DiffStatus::Ignored))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
