//! Audit entry domain entities
//!
//! Every lock transition and every remote mutation is recorded so that an
//! administrator can later answer "who released my checkout, and when".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::newtypes::{ActorId, MachineId, RecordId, RelativePath};

/// Actions that can be recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// First upload of a local-only file
    Sync,
    /// Record moved to a new path
    Move,
    /// Server content written locally
    Download,
    /// Lock acquired
    Checkout,
    /// Content published and lock released
    Checkin,
    /// Own lock released without publishing
    Discard,
    /// Local copy removed
    DeleteLocal,
    /// Record soft-deleted on the server
    DeleteServer,
    /// Administrative release of someone else's lock
    ForceRelease,
}

impl AuditAction {
    /// Returns the snake_case name used for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Sync => "sync",
            AuditAction::Move => "move",
            AuditAction::Download => "download",
            AuditAction::Checkout => "checkout",
            AuditAction::Checkin => "checkin",
            AuditAction::Discard => "discard",
            AuditAction::DeleteLocal => "delete_local",
            AuditAction::DeleteServer => "delete_server",
            AuditAction::ForceRelease => "force_release",
        }
    }

    /// Parse the storage name back into an action
    pub fn parse(s: &str) -> Option<Self> {
        let action = match s {
            "sync" => AuditAction::Sync,
            "move" => AuditAction::Move,
            "download" => AuditAction::Download,
            "checkout" => AuditAction::Checkout,
            "checkin" => AuditAction::Checkin,
            "discard" => AuditAction::Discard,
            "delete_local" => AuditAction::DeleteLocal,
            "delete_server" => AuditAction::DeleteServer,
            "force_release" => AuditAction::ForceRelease,
            _ => return None,
        };
        Some(action)
    }

    /// Actions that can orphan someone's work
    pub fn is_destructive(&self) -> bool {
        matches!(self, AuditAction::ForceRelease | AuditAction::DeleteServer)
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an audited action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    /// The action completed successfully
    Success,
    /// The action failed with an error code and message
    Failed {
        /// Error code for categorization
        code: String,
        /// Human-readable error message
        message: String,
    },
}

impl AuditResult {
    /// Creates a successful result
    pub fn success() -> Self {
        AuditResult::Success
    }

    /// Creates a failed result with the given code and message
    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        AuditResult::Failed {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns true if the result is a success
    pub fn is_success(&self) -> bool {
        matches!(self, AuditResult::Success)
    }
}

/// An audit log entry recording one engine operation on one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    id: Option<i64>,
    timestamp: DateTime<Utc>,
    actor: ActorId,
    machine: MachineId,
    action: AuditAction,
    path: Option<RelativePath>,
    record_id: Option<RecordId>,
    result: AuditResult,
    details: Value,
}

impl AuditEntry {
    /// Creates a new audit entry; `id` is assigned when persisted
    pub fn new(actor: ActorId, machine: MachineId, action: AuditAction, result: AuditResult) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            actor,
            machine,
            action,
            path: None,
            record_id: None,
            result,
            details: Value::Null,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    pub fn machine(&self) -> &MachineId {
        &self.machine
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    pub fn path(&self) -> Option<&RelativePath> {
        self.path.as_ref()
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn result(&self) -> &AuditResult {
        &self.result
    }

    pub fn details(&self) -> &Value {
        &self.details
    }

    /// Returns true if the action can orphan another actor's work
    pub fn is_destructive(&self) -> bool {
        self.action.is_destructive()
    }

    /// Sets the ID (typically after a database insert)
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Overrides the timestamp (used when rehydrating from storage)
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_path(mut self, path: RelativePath) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_record_id(mut self, record_id: RecordId) -> Self {
        self.record_id = Some(record_id);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}
