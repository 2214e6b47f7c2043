//! Status command - Display reconciliation status
//!
//! Provides the `pdmvault status` CLI command which:
//! 1. Scans the vault and reconciles it against the catalog
//! 2. Shows counts per status and every file that needs attention
//! 3. Shows lock owners and unreadable paths

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::Args;
use pdmvault_core::config::Config;
use pdmvault_core::domain::{DiffStatus, FileState, Reconciliation, RelativePath};

use crate::context::{parse_paths, EngineContext};
use crate::output::{status_line, OutputFormat, Printer};

/// Display order of statuses
const STATUS_ORDER: &[&str] = &[
    "outdated",
    "modified_local",
    "added_local",
    "moved",
    "cloud_only",
    "deleted_local",
    "synced",
    "ignored",
];

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Limit the report to these files or directories
    pub paths: Vec<String>,

    /// Also list synced and ignored files
    #[arg(long)]
    pub all: bool,
}

impl StatusCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let printer = Printer::new(format);
        let ctx = EngineContext::open(config).await?;
        let root = ctx.service.vault().await.root().to_path_buf();
        let filter = parse_paths(&root, &self.paths)?;

        let reconciliation = ctx
            .service
            .refresh()
            .await
            .context("Failed to reconcile vault")?;
        let selected = select(&reconciliation, &filter);

        if printer.is_json() {
            let json = serde_json::json!({
                "reconciled_at": reconciliation.reconciled_at.to_rfc3339(),
                "converged": reconciliation.is_converged(),
                "files": selected,
                "scan_errors": reconciliation.scan_errors,
            });
            printer.json(&json);
            return Ok(());
        }

        self.print_human(&reconciliation, &selected, &printer);
        Ok(())
    }

    fn print_human(
        &self,
        reconciliation: &Reconciliation,
        selected: &BTreeMap<&RelativePath, &FileState>,
        printer: &Printer,
    ) {
        let at = reconciliation.reconciled_at.format("%Y-%m-%d %H:%M:%S UTC");
        if selected
            .values()
            .all(|s| matches!(s.status, DiffStatus::Synced | DiffStatus::Ignored))
        {
            printer.headline(true, &format!("Vault is up to date ({at})"));
        } else {
            printer.headline(true, &format!("Vault status ({at})"));
        }

        for name in STATUS_ORDER {
            let count = selected.values().filter(|s| s.status.name() == *name).count();
            if count > 0 {
                printer.line(&format!("{name:<16} {count}"));
            }
        }
        printer.line("");

        for (path, state) in selected {
            let quiet = matches!(state.status, DiffStatus::Synced | DiffStatus::Ignored);
            if quiet && !self.all && state.checkout.is_none() {
                continue;
            }
            printer.line(&status_line(path, state));
        }

        for err in &reconciliation.scan_errors {
            printer.headline(false, &format!("could not read {}: {}", err.path, err.message));
        }
    }
}

/// Entries at or beneath any of `filter`; everything when empty
fn select<'a>(
    reconciliation: &'a Reconciliation,
    filter: &[RelativePath],
) -> BTreeMap<&'a RelativePath, &'a FileState> {
    reconciliation
        .entries
        .iter()
        .filter(|(path, _)| filter.is_empty() || filter.iter().any(|f| path.is_within(f)))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn rel(s: &str) -> RelativePath {
        RelativePath::new(s).unwrap()
    }

    #[test]
    fn test_select_filters_by_directory() {
        let mut rec = Reconciliation::new(Utc::now());
        for p in ["asm/a.sldasm", "asm/sub/b.sldprt", "other.txt"] {
            rec.entries
                .insert(rel(p), FileState::bare(DiffStatus::Synced));
        }

        assert_eq!(select(&rec, &[]).len(), 3);
        let only_asm = select(&rec, &[rel("asm")]);
        assert_eq!(only_asm.len(), 2);
        assert!(!only_asm.contains_key(&rel("other.txt")));
    }

    #[test]
    fn test_every_status_has_a_display_slot() {
        let statuses = [
            DiffStatus::Synced,
            DiffStatus::AddedLocal,
            DiffStatus::ModifiedLocal,
            DiffStatus::Outdated,
            DiffStatus::CloudOnly,
            DiffStatus::DeletedLocal,
            DiffStatus::Ignored,
        ];
        for status in statuses {
            assert!(STATUS_ORDER.contains(&status.name()));
        }
    }
}
