//! Presence port
//!
//! Heartbeats are written by the session layer, which is outside this
//! engine; the coordinator only reads them to flag stale locks.

use chrono::{DateTime, Utc};

use crate::domain::{ActorId, MachineId};

use super::remote_catalog::CatalogError;

/// Source of per-(actor, machine) last-seen heartbeats
#[async_trait::async_trait]
pub trait IPresenceSource: Send + Sync {
    /// Last heartbeat of `actor` on `machine`, `None` if never seen
    async fn last_seen(
        &self,
        actor: &ActorId,
        machine: &MachineId,
    ) -> Result<Option<DateTime<Utc>>, CatalogError>;
}
