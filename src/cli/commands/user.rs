//! User commands.
//!
//! - `deskline login NAME PIN` - check credentials
//! - `deskline user add NAME PIN [--role]` - create a user (admin only)
//! - `deskline user list` - list users
//! - `deskline user remove ID` - delete a user (admin only)

use super::{key_str, print_json};
use crate::cli::{UserCommands, Workspace};
use crate::error::{Error, Result};
use crate::model::{Role, User};
use crate::validate::{parse_key, parse_role};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

/// A user as printed. The PIN is never shown.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserOutput {
    id: String,
    name: String,
    role: Role,
}

impl From<User> for UserOutput {
    fn from(u: User) -> Self {
        Self {
            id: key_str(u.id.as_ref()),
            name: u.name,
            role: u.role,
        }
    }
}

#[derive(Serialize)]
struct UserListOutput {
    users: Vec<UserOutput>,
    count: usize,
}

#[derive(Serialize)]
struct RemoveOutput {
    id: String,
    removed: bool,
}

/// Execute the login command.
///
/// # Errors
///
/// Returns `InvalidCredentials` if the name and PIN do not match a user.
pub fn execute_login(db_path: Option<&PathBuf>, name: &str, pin: &str, json: bool) -> Result<()> {
    let ws = Workspace::open(db_path)?;
    let user = ws.store().authenticate(name, pin)?;
    ws.finish()?;

    let output = UserOutput::from(user);
    if json {
        print_json(&output)?;
    } else {
        println!(
            "{} {} ({})",
            "Signed in as".green(),
            output.name.cyan().bold(),
            output.role.as_str()
        );
    }
    Ok(())
}

/// Execute a user command.
///
/// # Errors
///
/// Returns an error if the database is missing or the operation fails.
pub fn execute(
    command: &UserCommands,
    db_path: Option<&PathBuf>,
    acting_user: Option<&str>,
    json: bool,
) -> Result<()> {
    let ws = Workspace::open(db_path)?;

    match command {
        UserCommands::Add { name, pin, role } => {
            let actor = ws.acting_user(acting_user)?;
            if !actor.is_admin() {
                return Err(Error::PermissionDenied("only admins can add users".into()));
            }
            let role = parse_role(role)?;
            let user = ws.store().add_user(name, pin, role)?;
            let output = UserOutput::from(user);
            if json {
                print_json(&output)?;
            } else {
                println!(
                    "Added {} {} ({})",
                    output.role.as_str(),
                    output.name.cyan().bold(),
                    output.id.dimmed()
                );
            }
        }
        UserCommands::List => {
            let users: Vec<UserOutput> = ws
                .store()
                .list_users()?
                .into_iter()
                .map(UserOutput::from)
                .collect();
            if json {
                let output = UserListOutput {
                    count: users.len(),
                    users,
                };
                print_json(&output)?;
            } else if users.is_empty() {
                println!("No users.");
            } else {
                println!("{}", format!("{:<12} {:<24} {}", "ID", "NAME", "ROLE").bold());
                for u in &users {
                    println!("{} {:<24} {}", format!("{:<12}", u.id).dimmed(), u.name, u.role.as_str());
                }
            }
        }
        UserCommands::Remove { id } => {
            let actor = ws.acting_user(acting_user)?;
            let key = parse_key(id)?;
            ws.store().remove_user(&actor, &key)?;
            if json {
                let output = RemoveOutput {
                    id: key.to_doc_key(),
                    removed: true,
                };
                print_json(&output)?;
            } else {
                println!("Removed user {}", key.to_doc_key().cyan());
            }
        }
    }

    ws.finish()
}
