//! Retention cleanup command.

use super::print_json;
use crate::cli::Workspace;
use crate::error::Result;
use crate::model::now_ms;
use crate::retention::{self, RETENTION_DAYS, RetentionReport};
use colored::Colorize;
use std::path::PathBuf;

/// Print a sweep report. Shared with `sync run`.
pub(crate) fn print_report(report: &RetentionReport) {
    if report.total() == 0 {
        println!("Nothing older than {RETENTION_DAYS} days.");
    } else {
        println!(
            "Removed {} call(s), {} task(s), {} ticket(s) older than {RETENTION_DAYS} days",
            report.calls, report.activities, report.tickets
        );
    }
    if report.blobs_pruned > 0 {
        println!("  Pruned {} unreferenced audio file(s)", report.blobs_pruned);
    }
    if report.backup_due {
        println!(
            "{}",
            "Some records will be deleted within 10 days. Export anything you need to keep."
                .yellow()
        );
    }
}

/// Execute the cleanup command.
///
/// # Errors
///
/// Returns an error if the database is missing or the sweep fails.
pub fn execute(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let ws = Workspace::open(db_path)?;
    let report = retention::sweep(&mut ws.store(), now_ms())?;
    ws.finish()?;

    if json {
        print_json(&report)
    } else {
        print_report(&report);
        Ok(())
    }
}
