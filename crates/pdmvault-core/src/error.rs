//! Engine error taxonomy
//!
//! Every per-file failure reported by a batch is one of these variants.
//!
//! | variant | retry policy |
//! |---|---|
//! | `Validation` | rejected before any I/O, never retried |
//! | `Conflict` | recoverable by re-reconciling and re-issuing the right intent |
//! | `Io` | retryable |
//! | `Network` | retryable with backoff, never partially applied |
//! | `Permission` | fatal for the intent |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ActorId, DomainError, MachineId, RelativePath};
use crate::ports::CatalogError;

/// Why a conflict was raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictKind {
    /// Another actor holds the lock
    LockedBy { owner: ActorId, machine: MachineId },
    /// A concurrent writer updated the record first
    RaceLost { owner: Option<ActorId> },
    /// A record for this path appeared concurrently
    PathTaken,
    /// The intent needs our own checkout
    NotCheckedOut,
    /// Content was uploaded but the conditional unlock did not land;
    /// the file is still checked out by us
    UnlockFailed,
    /// Local edits under our checkout would be overwritten
    LocalChangesWouldBeLost,
    /// The record changed or disappeared since the last reconciliation
    RecordChanged,
    /// The path's current status does not allow this intent
    WrongStatus { status: String },
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::LockedBy { owner, machine } => {
                write!(f, "checked out by {owner} on {machine}")
            }
            ConflictKind::RaceLost { owner: Some(owner) } => {
                write!(f, "lost the race, now checked out by {owner}")
            }
            ConflictKind::RaceLost { owner: None } => {
                f.write_str("lost the race to a concurrent update")
            }
            ConflictKind::PathTaken => f.write_str("a record for this path already exists"),
            ConflictKind::NotCheckedOut => f.write_str("not checked out by you"),
            ConflictKind::UnlockFailed => {
                f.write_str("content uploaded but the lock could not be released; retry check-in")
            }
            ConflictKind::LocalChangesWouldBeLost => {
                f.write_str("local changes under your checkout would be overwritten")
            }
            ConflictKind::RecordChanged => f.write_str("record changed since last reconciliation"),
            ConflictKind::WrongStatus { status } => write!(f, "not applicable to a {status} file"),
        }
    }
}

/// Errors reported by engine operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed input or missing precondition
    #[error("Validation error: {0}")]
    Validation(String),

    /// Lock held elsewhere or version race lost
    #[error("Conflict on {path}: {kind}")]
    Conflict {
        path: RelativePath,
        kind: ConflictKind,
    },

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Remote collaborator unreachable or slow
    #[error("Network error: {message}")]
    Network { message: String, timed_out: bool },

    /// Insufficient role
    #[error("Permission denied: {0}")]
    Permission(String),
}

impl EngineError {
    pub fn conflict(path: &RelativePath, kind: ConflictKind) -> Self {
        EngineError::Conflict {
            path: path.clone(),
            kind,
        }
    }

    /// Wraps an adapter error as an I/O failure
    pub fn io(err: impl fmt::Display) -> Self {
        EngineError::Io(err.to_string())
    }

    pub fn network(message: impl Into<String>) -> Self {
        EngineError::Network {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(operation: &str) -> Self {
        EngineError::Network {
            message: format!("{operation} timed out"),
            timed_out: true,
        }
    }

    /// Io and Network failures may succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Io(_) | EngineError::Network { .. })
    }

    /// Everything except validation and permission failures can be
    /// resolved without changing the request
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            EngineError::Validation(_) | EngineError::Permission(_)
        )
    }

    /// Returns the conflict kind, if this is a conflict
    pub fn conflict_kind(&self) -> Option<&ConflictKind> {
        match self {
            EngineError::Conflict { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Stable error code for audit entries and JSON output
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict { .. } => "conflict",
            EngineError::Io(_) => "io",
            EngineError::Network { .. } => "network",
            EngineError::Permission(_) => "permission",
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(err: DomainError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<CatalogError> for EngineError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Unreachable(message) => EngineError::network(message),
            CatalogError::Timeout => EngineError::timeout("catalog request"),
            CatalogError::PathTaken(path) => EngineError::conflict(&path, ConflictKind::PathTaken),
            CatalogError::NotFound(id) => {
                EngineError::Validation(format!("record {id} not found"))
            }
            CatalogError::Forbidden(message) => EngineError::Permission(message),
            CatalogError::Rejected(message) => EngineError::Validation(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(EngineError::io("disk full").is_retryable());
        assert!(EngineError::timeout("list").is_retryable());
        assert!(!EngineError::Permission("admin only".into()).is_retryable());

        let conflict = EngineError::conflict(
            &RelativePath::new("a.txt").unwrap(),
            ConflictKind::UnlockFailed,
        );
        assert!(!conflict.is_retryable());
        assert!(conflict.is_recoverable());
        assert!(!EngineError::Validation("bad".into()).is_recoverable());
    }

    #[test]
    fn test_catalog_error_mapping() {
        let path = RelativePath::new("x.step").unwrap();
        let err: EngineError = CatalogError::PathTaken(path.clone()).into();
        assert_eq!(err.conflict_kind(), Some(&ConflictKind::PathTaken));

        let err: EngineError = CatalogError::Timeout.into();
        assert!(matches!(err, EngineError::Network { timed_out: true, .. }));

        let err: EngineError = CatalogError::Forbidden("no".into()).into();
        assert_eq!(err.code(), "permission");
    }

    #[test]
    fn test_conflict_display_names_owner() {
        let err = EngineError::conflict(
            &RelativePath::new("A/p.sldprt").unwrap(),
            ConflictKind::LockedBy {
                owner: ActorId::new("bob").unwrap(),
                machine: MachineId::new("ws-02").unwrap(),
            },
        );
        assert_eq!(
            err.to_string(),
            "Conflict on A/p.sldprt: checked out by bob on ws-02"
        );
    }
}
