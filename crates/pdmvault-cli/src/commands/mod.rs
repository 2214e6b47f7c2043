//! CLI command implementations

pub mod batch;
pub mod stale_locks;
pub mod status;
