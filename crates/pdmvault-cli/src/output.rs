//! Rendering of command results
//!
//! Human output goes to stdout one line per file, with a headline first.
//! `--json` prints a single pretty-printed document instead.

use pdmvault_core::domain::{DiffStatus, FileState, RelativePath};
use pdmvault_sync::{BatchResult, FileError, StaleLock};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Prints results in one [`OutputFormat`]
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    format: OutputFormat,
}

impl Printer {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    pub fn json(&self, value: &serde_json::Value) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("error: could not serialize output: {e}"),
        }
    }

    /// Headline of a human report; a `false` outcome goes to stderr
    pub fn headline(&self, ok: bool, text: &str) {
        if self.is_json() {
            return;
        }
        if ok {
            println!("{text}");
        } else {
            eprintln!("warning: {text}");
        }
    }

    pub fn line(&self, text: &str) {
        if !self.is_json() {
            println!("  {text}");
        }
    }

    pub fn batch(&self, result: &BatchResult) {
        if self.is_json() {
            match serde_json::to_value(result) {
                Ok(json) => self.json(&json),
                Err(e) => eprintln!("error: could not serialize result: {e}"),
            }
            return;
        }
        self.headline(result.is_success(), &batch_summary(result));
        for failure in &result.errors {
            self.line(&failure_line(failure));
        }
        if result.cancelled {
            self.line("cancelled; re-run the command to process the rest");
        }
    }
}

/// One-line summary of a batch
pub fn batch_summary(result: &BatchResult) -> String {
    let mut summary = format!(
        "{}: {}/{} succeeded",
        result.operation, result.succeeded, result.total
    );
    if result.unchanged > 0 {
        summary.push_str(&format!(" ({} already up to date)", result.unchanged));
    }
    if result.failed > 0 {
        summary.push_str(&format!(", {} failed", result.failed));
    }
    if result.not_attempted > 0 {
        summary.push_str(&format!(", {} not attempted", result.not_attempted));
    }
    summary
}

pub fn failure_line(failure: &FileError) -> String {
    let hint = if failure.error.is_retryable() {
        " (retryable)"
    } else {
        ""
    };
    format!("{}: {}{}", failure.path, failure.error, hint)
}

/// `status  path [(from old)] [lock]`, padded so paths line up
pub fn status_line(path: &RelativePath, state: &FileState) -> String {
    let mut line = format!("{:<16} {}", state.status.name(), path);
    if let DiffStatus::Moved { from, .. } = &state.status {
        line.push_str(&format!(" (from {from})"));
    }
    if let Some(lock) = &state.checkout {
        line.push_str(&format!("  [checked out by {}@{}]", lock.actor, lock.machine));
    }
    line
}

pub fn stale_lock_line(lock: &StaleLock) -> String {
    format!(
        "{}  {}@{}  held {}h, last seen {}",
        lock.path,
        lock.lock.actor,
        lock.lock.machine,
        lock.held_for().num_hours(),
        lock.last_seen.format("%Y-%m-%d %H:%M UTC"),
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pdmvault_core::domain::{ActorId, CheckoutLock, MachineId};
    use pdmvault_core::EngineError;
    use pdmvault_sync::Operation;

    use super::*;

    fn rel(s: &str) -> RelativePath {
        RelativePath::new(s).unwrap()
    }

    #[test]
    fn test_batch_summary_mentions_failures_and_skips() {
        let mut result = BatchResult::new(Operation::Checkout, 4);
        result.succeeded = 2;
        result.unchanged = 1;
        result.failed = 1;
        result.not_attempted = 1;

        assert_eq!(
            batch_summary(&result),
            "checkout: 2/4 succeeded (1 already up to date), 1 failed, 1 not attempted"
        );
    }

    #[test]
    fn test_failure_line_flags_retryable_errors() {
        let offline = FileError {
            path: rel("a.txt"),
            error: EngineError::network("offline"),
        };
        let denied = FileError {
            path: rel("b.txt"),
            error: EngineError::Permission("viewer".into()),
        };
        assert!(failure_line(&offline).ends_with("(retryable)"));
        assert!(failure_line(&offline).starts_with("a.txt: "));
        assert!(!failure_line(&denied).contains("retryable"));
    }

    #[test]
    fn test_status_line_shows_move_source_and_lock_owner() {
        let mut state = FileState::bare(DiffStatus::Synced);
        state.checkout = Some(CheckoutLock {
            actor: ActorId::new("bob").unwrap(),
            machine: MachineId::new("ws-07").unwrap(),
            at: Utc::now(),
        });
        let line = status_line(&rel("asm/top.sldasm"), &state);
        assert!(line.starts_with("synced           asm/top.sldasm"));
        assert!(line.ends_with("[checked out by bob@ws-07]"));

        let plain = status_line(&rel("x.txt"), &FileState::bare(DiffStatus::CloudOnly));
        assert_eq!(plain.trim_end(), "cloud_only       x.txt");
    }

    #[test]
    fn test_batch_result_serializes_error_codes() {
        let mut result = BatchResult::new(Operation::DeleteServer { keep_local: true }, 1);
        result.failed = 1;
        result.errors.push(FileError {
            path: rel("x"),
            error: EngineError::Permission("viewer".into()),
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["errors"][0]["path"], "x");
        assert_eq!(json["errors"][0]["error"]["retryable"], false);
    }
}
