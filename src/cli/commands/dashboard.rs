//! Dashboard command: today's headline counts.

use super::print_json;
use crate::cli::Workspace;
use crate::error::Result;
use crate::model::{date_label, now_ms};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardOutput {
    date: String,
    calls_today: usize,
    pending_tasks: usize,
    open_tickets: usize,
}

/// Execute the dashboard command.
///
/// # Errors
///
/// Returns an error if the database is missing or a count fails.
pub fn execute(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let ws = Workspace::open(db_path)?;
    let now = now_ms();
    let counts = ws.store().dashboard_counts(now)?;
    ws.finish()?;

    let output = DashboardOutput {
        date: date_label(now),
        calls_today: counts.calls_today,
        pending_tasks: counts.pending_tasks,
        open_tickets: counts.open_tickets,
    };
    if json {
        return print_json(&output);
    }

    println!("{} {}", "Dashboard".bold(), output.date.dimmed());
    println!("  Calls today:   {}", output.calls_today.to_string().cyan());
    println!("  Pending tasks: {}", output.pending_tasks.to_string().cyan());
    println!("  Open tickets:  {}", output.open_tickets.to_string().cyan());
    Ok(())
}
