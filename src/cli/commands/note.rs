//! Case note commands.

use super::{key_str, print_json, truncate};
use crate::cli::{NoteCommands, Workspace};
use crate::directory::UserDirectory;
use crate::error::{Error, Result};
use crate::model::{CaseNote, CaseNotePatch, Collection, date_label, now_ms};
use crate::validate::parse_key;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NoteOutput {
    id: String,
    date_string: String,
    case_type: String,
    client_name: String,
    notes: String,
    author: String,
    timestamp: i64,
}

impl NoteOutput {
    fn new(n: CaseNote, users: &UserDirectory) -> Self {
        Self {
            id: key_str(n.id.as_ref()),
            author: users.owner_name(n.user_id.as_ref()).to_string(),
            date_string: n.date_string,
            case_type: n.case_type,
            client_name: n.client_name,
            notes: n.notes,
            timestamp: n.timestamp,
        }
    }
}

#[derive(Serialize)]
struct NoteListOutput {
    notes: Vec<NoteOutput>,
    count: usize,
}

#[derive(Serialize)]
struct DeleteOutput {
    id: String,
    deleted: bool,
}

fn require_text(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::InvalidArgument(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn print_note(verb: &str, ws: &Workspace, note: CaseNote, json: bool) -> Result<()> {
    let users = UserDirectory::new(&ws.store().list_users()?);
    let output = NoteOutput::new(note, &users);
    if json {
        return print_json(&output);
    }
    println!(
        "{verb} note {} for {} ({}, {})",
        output.id.cyan(),
        output.client_name.bold(),
        output.case_type,
        output.date_string
    );
    println!("  {}", output.notes);
    Ok(())
}

/// Execute a note command.
///
/// # Errors
///
/// Returns an error if the database is missing or the operation fails.
pub fn execute(
    command: &NoteCommands,
    db_path: Option<&PathBuf>,
    acting_user: Option<&str>,
    json: bool,
) -> Result<()> {
    let ws = Workspace::open(db_path)?;

    match command {
        NoteCommands::Add {
            client,
            case_type,
            notes,
            date,
        } => {
            let timestamp = now_ms();
            let note = CaseNote {
                id: None,
                date_string: date.clone().unwrap_or_else(|| date_label(timestamp)),
                case_type: case_type.trim().to_string(),
                client_name: require_text("client", client)?,
                notes: require_text("notes", notes)?,
                user_id: Some(ws.acting_user_key(acting_user)?),
                timestamp,
            };
            let note = ws.store().insert(note)?;
            print_note("Added", &ws, note, json)?;
        }
        NoteCommands::List { search } => {
            let (notes, users) = {
                let store = ws.store();
                let notes = match search {
                    Some(term) => store.search_case_notes(term)?,
                    None => store.list_case_notes()?,
                };
                (notes, UserDirectory::new(&store.list_users()?))
            };
            let notes: Vec<NoteOutput> = notes
                .into_iter()
                .map(|n| NoteOutput::new(n, &users))
                .collect();

            if json {
                print_json(&NoteListOutput {
                    count: notes.len(),
                    notes,
                })?;
            } else if notes.is_empty() {
                println!("No case notes.");
            } else {
                for n in &notes {
                    println!(
                        "{} {} {} {} {}",
                        format!("{:<10}", n.id).dimmed(),
                        n.date_string,
                        format!("{:<20}", truncate(&n.client_name, 20)).bold(),
                        format!("{:<12}", truncate(&n.case_type, 12)).cyan(),
                        truncate(&n.notes, 60)
                    );
                }
            }
        }
        NoteCommands::Edit {
            id,
            client,
            case_type,
            notes,
            date,
        } => {
            let patch = CaseNotePatch {
                date_string: date.clone(),
                case_type: case_type.as_deref().map(|t| t.trim().to_string()),
                client_name: client.as_deref().map(|c| require_text("client", c)).transpose()?,
                notes: notes.as_deref().map(|n| require_text("notes", n)).transpose()?,
            };
            let note = ws.store().update::<CaseNote>(&parse_key(id)?, &patch)?;
            print_note("Updated", &ws, note, json)?;
        }
        NoteCommands::Delete { id } => {
            let key = parse_key(id)?;
            if !ws.store().delete::<CaseNote>(&key)? {
                return Err(Error::not_found(Collection::CaseNotes, &key));
            }
            if json {
                print_json(&DeleteOutput {
                    id: key.to_doc_key(),
                    deleted: true,
                })?;
            } else {
                println!("Deleted note {}", key.to_doc_key().cyan());
            }
        }
    }

    ws.finish()
}
