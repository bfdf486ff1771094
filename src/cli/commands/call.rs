//! Call recording commands.
//!
//! - `deskline call add --duration SECS [--client] [--audio FILE]`
//! - `deskline call list [--search TERM]`
//! - `deskline call rename ID CLIENT [--date]`
//! - `deskline call export ID FILE`
//! - `deskline call delete ID` (takes the call's tickets with it)

use super::{key_str, print_json};
use crate::cli::{CallCommands, Workspace};
use crate::directory::UserDirectory;
use crate::error::{Error, Result};
use crate::model::recording::format_duration;
use crate::model::{Collection, Recording, now_ms};
use crate::remote::RemoteStore;
use crate::validate::parse_key;
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CallOutput {
    id: String,
    client_name: String,
    duration: i64,
    date_string: String,
    timestamp: i64,
    user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_ref: Option<String>,
}

impl CallOutput {
    fn new(r: Recording, users: &UserDirectory) -> Self {
        Self {
            id: key_str(r.id.as_ref()),
            user: users.owner_name(r.user_id.as_ref()).to_string(),
            client_name: r.client_name,
            duration: r.duration,
            date_string: r.date_string,
            timestamp: r.timestamp,
            audio_ref: r.audio_ref,
        }
    }
}

#[derive(Serialize)]
struct CallListOutput {
    calls: Vec<CallOutput>,
    count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportOutput {
    id: String,
    path: PathBuf,
    bytes: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteOutput {
    id: String,
    tickets_removed: usize,
}

/// Execute a call command.
///
/// # Errors
///
/// Returns an error if the database is missing or the operation fails.
pub fn execute(
    command: &CallCommands,
    db_path: Option<&PathBuf>,
    acting_user: Option<&str>,
    json: bool,
) -> Result<()> {
    let ws = Workspace::open(db_path)?;

    match command {
        CallCommands::Add {
            client,
            duration,
            audio,
        } => execute_add(&ws, acting_user, client, *duration, audio.as_deref(), json)?,
        CallCommands::List { search } => execute_list(&ws, search.as_deref(), json)?,
        CallCommands::Rename { id, client, date } => {
            let key = parse_key(id)?;
            let recording = ws.store().rename_recording(&key, client, date.as_deref())?;
            let users = UserDirectory::new(&ws.store().list_users()?);
            let output = CallOutput::new(recording, &users);
            if json {
                print_json(&output)?;
            } else {
                println!("Renamed call {} to {}", output.id.cyan(), output.client_name.bold());
            }
        }
        CallCommands::Export { id, output } => execute_export(&ws, id, output, json)?,
        CallCommands::Delete { id } => {
            let key = parse_key(id)?;
            let tickets_removed = {
                let mut store = ws.store();
                let tickets = store.tickets_for_call(&key)?.len();
                store.delete_recording(&key)?;
                tickets
            };
            if json {
                print_json(&DeleteOutput {
                    id: key.to_doc_key(),
                    tickets_removed,
                })?;
            } else {
                println!("Deleted call {}", key.to_doc_key().cyan());
                if tickets_removed > 0 {
                    println!("  {tickets_removed} linked ticket(s) removed");
                }
            }
        }
    }

    ws.finish()
}

fn execute_add(
    ws: &Workspace,
    acting_user: Option<&str>,
    client: &str,
    duration: i64,
    audio: Option<&Path>,
    json: bool,
) -> Result<()> {
    if duration < 0 {
        return Err(Error::InvalidArgument("duration cannot be negative".into()));
    }
    let user = ws.acting_user(acting_user)?;
    let user_id = user
        .id
        .clone()
        .ok_or_else(|| Error::Other(format!("user {} has no ID", user.name)))?;

    let payload = audio.map(fs::read).transpose()?;
    let recording = Recording::new(client, duration, user_id, now_ms());
    let saved = ws.store().add_recording(recording, payload.as_deref())?;

    let output = CallOutput {
        user: user.name,
        ..CallOutput::new(saved, &UserDirectory::default())
    };
    if json {
        print_json(&output)?;
    } else {
        println!(
            "Saved call {} with {} ({})",
            output.id.cyan(),
            output.client_name.bold(),
            format_duration(output.duration)
        );
        if let Some(audio_ref) = &output.audio_ref {
            println!("  Audio: {}", audio_ref.dimmed());
        }
    }
    Ok(())
}

fn execute_list(ws: &Workspace, search: Option<&str>, json: bool) -> Result<()> {
    let (recordings, users) = {
        let store = ws.store();
        let recordings = match search {
            Some(term) => store.search_recordings(term)?,
            None => store.list_recordings()?,
        };
        (recordings, UserDirectory::new(&store.list_users()?))
    };
    let calls: Vec<CallOutput> = recordings
        .into_iter()
        .map(|r| CallOutput::new(r, &users))
        .collect();

    if json {
        return print_json(&CallListOutput {
            count: calls.len(),
            calls,
        });
    }

    if calls.is_empty() {
        println!("No calls.");
        return Ok(());
    }
    println!(
        "{}",
        format!(
            "{:<10} {:<24} {:>6}  {:<11} {:<14} {}",
            "ID", "CLIENT", "LENGTH", "DATE", "AGENT", "AUDIO"
        )
        .bold()
    );
    for c in &calls {
        println!(
            "{} {:<24} {:>6}  {:<11} {:<14} {}",
            format!("{:<10}", c.id).dimmed(),
            c.client_name,
            format_duration(c.duration),
            c.date_string,
            c.user,
            if c.audio_ref.is_some() { "yes" } else { "-" }
        );
    }
    Ok(())
}

fn execute_export(ws: &Workspace, id: &str, path: &Path, json: bool) -> Result<()> {
    let key = parse_key(id)?;
    let recording: Recording = ws.store().require(&key)?;
    let audio_ref = recording
        .audio_ref
        .ok_or_else(|| Error::InvalidArgument(format!("call {key} has no audio")))?;

    let local = ws.store().get_blob(&audio_ref)?;
    let data = match local {
        Some(data) => data,
        None => {
            debug!(key = %audio_ref, "audio not on this device, asking the remote");
            let remote = ws
                .bridge()
                .remote()
                .ok_or_else(|| Error::not_found(Collection::Calls, format!("{key} audio")))?;
            let data = ws
                .block_on(remote.get_blob(&audio_ref))?
                .ok_or_else(|| Error::not_found(Collection::Calls, format!("{key} audio")))?;
            ws.store().store_remote_blob(&audio_ref, &data)?;
            data
        }
    };

    fs::write(path, &data)?;
    if json {
        print_json(&ExportOutput {
            id: key.to_doc_key(),
            path: path.to_path_buf(),
            bytes: data.len(),
        })
    } else {
        println!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}
