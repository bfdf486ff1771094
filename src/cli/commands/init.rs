//! Create the local database.
//!
//! `deskline init` writes `~/.deskline/data/deskline.db` (or the `--db`
//! path), applies the schema, and optionally seeds the first admin.

use crate::cli::Workspace;
use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitOutput {
    database: PathBuf,
    device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    admin: Option<String>,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns `AlreadyInitialized` if the database exists and `force` is not
/// set, or an error if the database cannot be created.
pub fn execute(
    db_path: Option<&PathBuf>,
    admin: Option<&str>,
    pin: Option<&str>,
    force: bool,
    json: bool,
) -> Result<()> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or_else(|| {
        Error::Config("Could not determine the Deskline data directory".to_string())
    })?;

    if db_path.exists() {
        if !force {
            return Err(Error::AlreadyInitialized { path: db_path });
        }
        fs::remove_file(&db_path)?;
    }
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let ws = Workspace::open_at(&db_path)?;
    let seeded = match (admin, pin) {
        (Some(name), Some(pin)) => ws.store().ensure_admin(name, pin)?.map(|u| u.name),
        _ => None,
    };

    let output = InitOutput {
        database: db_path,
        device_id: ws.device_id().to_string(),
        admin: seeded,
    };
    ws.finish()?;

    if json {
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!(
            "{} {}",
            "Initialized Deskline at".green(),
            output.database.display()
        );
        println!("  Device: {}", output.device_id.dimmed());
        match &output.admin {
            Some(name) => println!("  Admin:  {}", name.cyan()),
            None => println!(
                "  {}",
                "No admin seeded; rerun with --force --admin NAME --pin PIN to add one.".dimmed()
            ),
        }
    }

    Ok(())
}
