//! Batch commands - one intent applied to a set of vault paths
//!
//! `sync`, `download`, `checkout`, `checkin`, `discard`, `delete-local`,
//! `delete-server` and `force-release` all share this shape: resolve
//! paths, run the batch, print the aggregated result. Directories expand
//! to the files beneath them.

use anyhow::{bail, Context, Result};
use clap::Args;
use pdmvault_core::config::Config;
use pdmvault_sync::Operation;
use tracing::info;

use crate::context::{parse_paths, EngineContext};
use crate::output::{OutputFormat, Printer};

#[derive(Debug, Args)]
pub struct BatchCommand {
    /// Vault paths (files or directories). With none, `sync`, `download`
    /// and `checkin` act on every candidate.
    pub paths: Vec<String>,
}

impl BatchCommand {
    pub async fn sync(&self, config: &Config, format: OutputFormat) -> Result<()> {
        self.run(Operation::Sync, config, format).await
    }

    pub async fn download(&self, config: &Config, format: OutputFormat) -> Result<()> {
        self.run(Operation::Download, config, format).await
    }

    pub async fn checkout(&self, config: &Config, format: OutputFormat) -> Result<()> {
        self.run(Operation::Checkout, config, format).await
    }

    pub async fn checkin(&self, config: &Config, format: OutputFormat) -> Result<()> {
        self.run(Operation::Checkin, config, format).await
    }

    pub async fn discard(&self, config: &Config, format: OutputFormat) -> Result<()> {
        self.run(Operation::Discard, config, format).await
    }

    pub async fn delete_local(&self, config: &Config, format: OutputFormat) -> Result<()> {
        self.run(Operation::DeleteLocal, config, format).await
    }

    pub async fn force_release(&self, config: &Config, format: OutputFormat) -> Result<()> {
        self.run(Operation::ForceRelease, config, format).await
    }

    async fn run(&self, operation: Operation, config: &Config, format: OutputFormat) -> Result<()> {
        let ctx = EngineContext::open(config).await?;
        let root = ctx.service.vault().await.root().to_path_buf();
        let paths = parse_paths(&root, &self.paths)?;

        info!(operation = %operation, requested = paths.len(), "Running batch");
        let result = ctx
            .service
            .execute(operation, paths, ctx.cancel.clone())
            .await
            .with_context(|| format!("{operation} could not start"))?;

        Printer::new(format).batch(&result);
        if result.failed > 0 {
            bail!("{} of {} file(s) failed", result.failed, result.total);
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct DeleteServerCommand {
    /// Keep the local copies
    #[arg(long)]
    pub keep_local: bool,

    #[command(flatten)]
    pub batch: BatchCommand,
}

impl DeleteServerCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let operation = Operation::DeleteServer {
            keep_local: self.keep_local,
        };
        self.batch.run(operation, config, format).await
    }
}
