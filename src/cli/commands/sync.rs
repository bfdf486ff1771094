//! Sync commands.
//!
//! - `deskline sync run` - stay attached to the remote until Ctrl-C
//! - `deskline sync status` - device, remote, queue, and record counts
//!
//! Every command already pushes its own changes on exit; `sync run` is for
//! a desk that should keep receiving other devices' changes.

use super::cleanup::print_report;
use super::print_json;
use crate::cli::{SyncCommands, Workspace};
use crate::config::{load_config, resolve_sync_settings};
use crate::error::Result;
use crate::model::{Collection, now_ms};
use crate::remote::RemoteStore;
use crate::retention;
use crate::sync::BridgeStats;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// How often `sync run` repeats the retention sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncStatusOutput {
    device_id: String,
    database: PathBuf,
    remote: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
    connected: bool,
    pending_writes: usize,
    counts: BTreeMap<&'static str, usize>,
    stats: BridgeStats,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshEvent {
    event: &'static str,
    collection: Collection,
}

/// Execute a sync command.
///
/// # Errors
///
/// Returns an error if the database is missing or the operation fails.
pub fn execute(command: &SyncCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    match command {
        SyncCommands::Run => execute_run(db_path, json),
        SyncCommands::Status => execute_status(db_path, json),
    }
}

fn execute_run(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let ws = Workspace::open(db_path)?;

    for collection in Collection::ALL {
        ws.bridge().on_change(collection, move |collection| {
            info!(%collection, "remote changes applied");
            if json {
                if let Ok(line) = serde_json::to_string(&RefreshEvent {
                    event: "refresh",
                    collection,
                }) {
                    println!("{line}");
                }
            } else {
                println!("{} {}", "updated".green(), collection.command_name());
            }
        });
    }

    match ws.bridge().remote() {
        Some(remote) if !json => println!(
            "Syncing with {} as device {}. Press Ctrl-C to stop.",
            remote.name().cyan(),
            ws.device_id().dimmed()
        ),
        None if !json => println!(
            "{}",
            "No remote configured; running the retention sweep only. Press Ctrl-C to stop."
                .yellow()
        ),
        _ => {}
    }

    ws.block_on(async {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, stopping sync");
                    break;
                }
                _ = sweep.tick() => {
                    let result = retention::sweep(&mut ws.store(), now_ms());
                    match result {
                        Ok(report) if json => {
                            if let Err(e) = print_json(&report) {
                                warn!(error = %e, "could not print sweep report");
                            }
                        }
                        Ok(report) if report.total() > 0 || report.backup_due => print_report(&report),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "retention sweep failed"),
                    }
                }
            }
        }
    });

    ws.finish()
}

fn execute_status(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let ws = Workspace::open(db_path)?;
    let settings = resolve_sync_settings(&load_config()?);

    let counts = {
        let store = ws.store();
        let mut counts = BTreeMap::new();
        for collection in Collection::ALL {
            counts.insert(collection.as_str(), store.count(collection)?);
        }
        counts
    };

    let remote = ws.bridge().remote();
    let output = SyncStatusOutput {
        device_id: ws.device_id().to_string(),
        database: ws.db_path().to_path_buf(),
        remote: remote.map(|r| r.name()),
        endpoint: settings.endpoint.clone(),
        project_id: settings.project_id.clone(),
        connected: ws.bridge().is_connected(),
        pending_writes: remote.map_or(0, |r| r.pending_writes()),
        counts,
        stats: ws.bridge().stats(),
    };
    ws.finish()?;

    if json {
        return print_json(&output);
    }

    println!("{}", "Sync status".bold());
    println!("  Device:   {}", output.device_id);
    println!("  Database: {}", output.database.display());
    match output.remote {
        Some(name) => {
            println!("  Remote:   {} ({})", name.cyan(), output.endpoint.as_deref().unwrap_or("-"));
            if let Some(project) = &output.project_id {
                println!("  Project:  {project}");
            }
        }
        None => println!("  Remote:   {}", "not configured (local only)".dimmed()),
    }
    if output.pending_writes > 0 {
        println!(
            "  Queued:   {}",
            format!("{} write(s) waiting for the remote", output.pending_writes).yellow()
        );
    }
    println!("  Records:");
    for (collection, count) in &output.counts {
        println!("    {collection:<10} {count}");
    }
    Ok(())
}
