//! FileRecord domain entity
//!
//! A `FileRecord` is the remote, authoritative description of one file:
//! its stable identity, content hash, version and lock state.
//!
//! ## Lock state machine
//!
//! ```text
//!     ┌──────────┐   checkout(actor)    ┌──────────────────────┐
//!     │ Unlocked │ ───────────────────► │ CheckedOutBy(actor)  │
//!     └──────────┘                      └──────────────────────┘
//!          ▲                                      │
//!          │   checkin(actor) / release(actor)    │
//!          │   forceRelease(admin)                │
//!          └──────────────────────────────────────┘
//! ```
//!
//! Every transition is expressed as a [`RecordMutation`] applied through a
//! conditional update: it only lands if the caller's expected `version`
//! matches AND the mutation's own precondition holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ActorId, ContentHash, MachineId, RecordId, RelativePath, VaultId};

/// Exclusive-edit lock embedded in a [`FileRecord`]
///
/// The three fields are always set or cleared together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLock {
    /// Actor holding the lock
    pub actor: ActorId,
    /// Machine the lock was taken from
    pub machine: MachineId,
    /// When the lock was taken
    pub at: DateTime<Utc>,
}

/// Remote, authoritative description of one vault file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Stable identity, survives renames
    pub id: RecordId,
    /// Owning vault
    pub vault_id: VaultId,
    /// Vault-relative path, unique among non-deleted records
    pub relative_path: RelativePath,
    /// Hash of the checked-in content
    pub content_hash: ContentHash,
    /// Size of the checked-in content in bytes
    pub size: u64,
    /// Monotonic, incremented on every accepted content-changing check-in
    pub version: u64,
    /// Current checkout, if any
    pub checkout: Option<CheckoutLock>,
    /// Workflow lifecycle tag, opaque to the engine
    pub state: String,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
    /// Last time any mutation landed
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Returns true if the record has not been soft-deleted
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Returns the lock owner, if any
    pub fn checked_out_by(&self) -> Option<&ActorId> {
        self.checkout.as_ref().map(|lock| &lock.actor)
    }

    /// Returns true if `actor` currently holds the lock
    pub fn is_checked_out_by(&self, actor: &ActorId) -> bool {
        self.checked_out_by() == Some(actor)
    }

    /// Returns true if someone other than `actor` holds the lock
    pub fn is_locked_by_other(&self, actor: &ActorId) -> bool {
        matches!(self.checked_out_by(), Some(owner) if owner != actor)
    }
}

/// Payload for inserting a brand-new record (`version = 1`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    /// Owning vault
    pub vault_id: VaultId,
    /// Path to register
    pub relative_path: RelativePath,
    /// Hash of the uploaded content
    pub content_hash: ContentHash,
    /// Size of the uploaded content
    pub size: u64,
    /// Initial workflow state
    pub state: String,
}

impl NewRecord {
    /// Materialize the record a catalog stores for this payload
    pub fn into_record(self, id: RecordId, now: DateTime<Utc>) -> FileRecord {
        FileRecord {
            id,
            vault_id: self.vault_id,
            relative_path: self.relative_path,
            content_hash: self.content_hash,
            size: self.size,
            version: 1,
            checkout: None,
            state: self.state,
            deleted_at: None,
            updated_at: now,
        }
    }
}

/// A conditional change to a [`FileRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordMutation {
    /// Take the lock. Requires: unlocked.
    Checkout {
        actor: ActorId,
        machine: MachineId,
        at: DateTime<Utc>,
    },
    /// Publish new content and release the lock. Requires: locked by `actor`.
    ///
    /// Every accepted check-in bumps `version`, even with unchanged content.
    Checkin {
        actor: ActorId,
        content_hash: ContentHash,
        size: u64,
    },
    /// Release own lock without publishing. Requires: locked by `actor`.
    Release { actor: ActorId },
    /// Administrative release. Requires: locked by `expected_owner`.
    ForceRelease { expected_owner: ActorId },
    /// Rename/move keeping the identity. Requires: not locked by anyone but `actor`.
    Move {
        actor: ActorId,
        new_path: RelativePath,
    },
}

impl RecordMutation {
    /// Short name for logs and audit entries
    pub fn name(&self) -> &'static str {
        match self {
            RecordMutation::Checkout { .. } => "checkout",
            RecordMutation::Checkin { .. } => "checkin",
            RecordMutation::Release { .. } => "release",
            RecordMutation::ForceRelease { .. } => "force_release",
            RecordMutation::Move { .. } => "move",
        }
    }

    /// Check this mutation's precondition against `record`
    ///
    /// # Errors
    /// Returns `DomainError::PreconditionFailed` describing the violated condition
    pub fn check(&self, record: &FileRecord) -> Result<(), DomainError> {
        if !record.is_active() {
            return Err(DomainError::PreconditionFailed(format!(
                "record {} is deleted",
                record.id
            )));
        }
        match self {
            RecordMutation::Checkout { .. } => match record.checked_out_by() {
                None => Ok(()),
                Some(owner) => Err(DomainError::PreconditionFailed(format!(
                    "already checked out by {owner}"
                ))),
            },
            RecordMutation::Checkin { actor, .. } | RecordMutation::Release { actor } => {
                if record.is_checked_out_by(actor) {
                    Ok(())
                } else {
                    Err(DomainError::PreconditionFailed(format!(
                        "not checked out by {actor}"
                    )))
                }
            }
            RecordMutation::ForceRelease { expected_owner } => {
                if record.is_checked_out_by(expected_owner) {
                    Ok(())
                } else {
                    Err(DomainError::PreconditionFailed(format!(
                        "lock is no longer held by {expected_owner}"
                    )))
                }
            }
            RecordMutation::Move { actor, .. } => {
                if record.is_locked_by_other(actor) {
                    Err(DomainError::PreconditionFailed(
                        "record is checked out by another actor".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Check the precondition and apply the mutation in place
    ///
    /// Used by catalog implementations that hold records in memory; the
    /// caller is responsible for the `expected_version` comparison.
    ///
    /// # Errors
    /// Returns `DomainError::PreconditionFailed` and leaves `record` untouched
    pub fn apply(&self, record: &mut FileRecord, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.check(record)?;
        match self {
            RecordMutation::Checkout { actor, machine, at } => {
                record.checkout = Some(CheckoutLock {
                    actor: actor.clone(),
                    machine: machine.clone(),
                    at: *at,
                });
            }
            RecordMutation::Checkin {
                content_hash, size, ..
            } => {
                record.content_hash = content_hash.clone();
                record.size = *size;
                record.version += 1;
                record.checkout = None;
            }
            RecordMutation::Release { .. } | RecordMutation::ForceRelease { .. } => {
                record.checkout = None;
            }
            RecordMutation::Move { new_path, .. } => {
                record.relative_path = new_path.clone();
            }
        }
        record.updated_at = now;
        Ok(())
    }
}
