//! Stale-locks command - Report locks an admin may want to break
//!
//! A lock is stale when its owner has been seen working long after taking
//! it. Nothing is released; use `pdmvault force-release` for that.

use anyhow::{Context, Result};
use clap::Args;
use pdmvault_core::config::Config;
use pdmvault_sync::StaleLock;

use crate::context::EngineContext;
use crate::output::{stale_lock_line, OutputFormat, Printer};

#[derive(Debug, Args)]
pub struct StaleLocksCommand {}

impl StaleLocksCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let printer = Printer::new(format);
        let ctx = EngineContext::open(config).await?;
        let stale = ctx
            .service
            .stale_locks()
            .await
            .context("Failed to check locks")?;

        if printer.is_json() {
            let rows: Vec<_> = stale.iter().map(to_json).collect();
            printer.json(&serde_json::json!({ "stale_locks": rows }));
            return Ok(());
        }

        if stale.is_empty() {
            printer.headline(true, "No stale locks");
            return Ok(());
        }
        printer.headline(true, &format!("{} stale lock(s)", stale.len()));
        for lock in &stale {
            printer.line(&stale_lock_line(lock));
        }
        Ok(())
    }
}

fn to_json(lock: &StaleLock) -> serde_json::Value {
    serde_json::json!({
        "record_id": lock.record_id.to_string(),
        "path": lock.path.as_str(),
        "owner": lock.lock.actor.as_str(),
        "machine": lock.lock.machine.as_str(),
        "checked_out_at": lock.lock.at.to_rfc3339(),
        "last_seen": lock.last_seen.to_rfc3339(),
        "held_minutes": lock.held_for().num_minutes(),
    })
}
