//! pdmvault CLI - Command-line interface for the vault engine
//!
//! Provides commands for:
//! - Viewing reconciliation status
//! - Uploading, downloading and deleting vault files
//! - Checking files out and in, discarding checkouts
//! - Administrative force-release and stale-lock reports

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdmvault_core::config::{Config, LoggingConfig};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

mod commands;
mod context;
mod output;

use commands::{
    batch::{BatchCommand, DeleteServerCommand},
    stale_locks::StaleLocksCommand,
    status::StatusCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "pdmvault", version, about = "Engineering vault sync and checkout client")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the status of every vault file
    Status(StatusCommand),
    /// Upload new files and publish local moves
    Sync(BatchCommand),
    /// Fetch the server copy of files
    Download(BatchCommand),
    /// Take the edit lock on files
    Checkout(BatchCommand),
    /// Publish local changes and release the lock
    Checkin(BatchCommand),
    /// Release the lock and restore the server copy
    Discard(BatchCommand),
    /// Remove local copies (to the vault trash when configured)
    DeleteLocal(BatchCommand),
    /// Soft-delete server records
    DeleteServer(DeleteServerCommand),
    /// Break another user's lock (admin only)
    ForceRelease(BatchCommand),
    /// List locks whose owners kept working past the threshold
    StaleLocks(StaleLocksCommand),
}

/// Resolves `--config` or the default location
fn load_config(path: Option<&PathBuf>) -> Result<(PathBuf, Config)> {
    match path {
        Some(path) => {
            let config = Config::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            Ok((path.clone(), config))
        }
        None => {
            let path = Config::default_path();
            let config = Config::load_or_default(&path);
            Ok((path, config))
        }
    }
}

fn init_tracing(verbose: u8, json: bool, logging: &LoggingConfig) -> Result<()> {
    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout is reserved for command output.
    let writer = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(writer);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config_path, config) = load_config(cli.config.as_ref())?;
    init_tracing(cli.verbose, cli.json, &config.logging)?;
    tracing::debug!(config_path = %config_path.display(), "Loaded configuration");

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match cli.command {
        Commands::Status(cmd) => cmd.execute(&config, format).await,
        Commands::Sync(cmd) => cmd.sync(&config, format).await,
        Commands::Download(cmd) => cmd.download(&config, format).await,
        Commands::Checkout(cmd) => cmd.checkout(&config, format).await,
        Commands::Checkin(cmd) => cmd.checkin(&config, format).await,
        Commands::Discard(cmd) => cmd.discard(&config, format).await,
        Commands::DeleteLocal(cmd) => cmd.delete_local(&config, format).await,
        Commands::DeleteServer(cmd) => cmd.execute(&config, format).await,
        Commands::ForceRelease(cmd) => cmd.force_release(&config, format).await,
        Commands::StaleLocks(cmd) => cmd.execute(&config, format).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_delete_server_flags() {
        let cli = Cli::try_parse_from([
            "pdmvault",
            "--json",
            "delete-server",
            "--keep-local",
            "parts/a.sldprt",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::DeleteServer(cmd) => {
                assert!(cmd.keep_local);
                assert_eq!(cmd.batch.paths, vec!["parts/a.sldprt".to_string()]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_explicit_missing_config_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(load_config(Some(&missing)).is_err());
    }
}
