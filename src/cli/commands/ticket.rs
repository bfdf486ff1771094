//! Ticket commands and the client kanban board.
//!
//! - `deskline ticket add DESCRIPTION [--client] [--priority] [--assign USER]`
//! - `deskline ticket list [--mine] [--search TERM]`
//! - `deskline ticket board`
//! - `deskline ticket move ID CLIENT`
//! - `deskline ticket status ID STATUS`
//! - `deskline ticket assign ID [USER]`
//! - `deskline ticket edit ID [--description] [--client] [--priority] [--status] [--date]`
//! - `deskline ticket delete ID`
//! - `deskline ticket from-call CALL_ID DESCRIPTION`

use super::{key_str, print_json, truncate};
use crate::cli::{TicketAddArgs, TicketCommands, TicketEditArgs, Workspace};
use crate::directory::UserDirectory;
use crate::error::{Error, Result};
use crate::model::recording::format_duration;
use crate::model::ticket::kanban_columns;
use crate::model::{Collection, Priority, Ticket, TicketPatch, TicketStatus, now_ms};
use crate::validate::{parse_key, parse_priority, parse_ticket_status};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TicketOutput {
    id: String,
    description: String,
    status: TicketStatus,
    priority: Priority,
    client_name: String,
    date_string: String,
    created_at: i64,
    owner: String,
    assignee: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<i64>,
}

impl TicketOutput {
    fn new(t: Ticket, users: &UserDirectory) -> Self {
        Self {
            id: key_str(t.id.as_ref()),
            owner: users.owner_name(t.user_id.as_ref()).to_string(),
            assignee: users.assignee_name(t.assignee_id.as_ref()).to_string(),
            client_name: t.column().to_string(),
            description: t.description,
            status: t.status,
            priority: t.priority,
            date_string: t.date_string,
            created_at: t.created_at,
            call_id: t.call_id.map(|k| k.to_doc_key()),
            duration: t.duration,
        }
    }
}

#[derive(Serialize)]
struct TicketListOutput {
    tickets: Vec<TicketOutput>,
    count: usize,
}

#[derive(Serialize)]
struct ColumnOutput {
    client: String,
    tickets: Vec<TicketOutput>,
}

#[derive(Serialize)]
struct BoardOutput {
    columns: Vec<ColumnOutput>,
}

#[derive(Serialize)]
struct DeleteOutput {
    id: String,
    deleted: bool,
}

fn status_label(status: TicketStatus, width: usize) -> colored::ColoredString {
    let text = format!("{:<width$}", status.as_str());
    match status {
        TicketStatus::Open => text.yellow(),
        TicketStatus::Closed => text.green(),
    }
}

fn priority_label(priority: Priority, width: usize) -> colored::ColoredString {
    let text = format!("{:<width$}", priority.as_str());
    match priority {
        Priority::High => text.red().bold(),
        Priority::Medium => text.normal(),
        Priority::Low => text.dimmed(),
    }
}

fn first_line(description: &str) -> &str {
    description.lines().next().unwrap_or_default()
}

/// Print a single ticket after a mutation.
fn print_ticket(verb: &str, ws: &Workspace, ticket: Ticket, json: bool) -> Result<()> {
    let users = UserDirectory::new(&ws.store().list_users()?);
    let output = TicketOutput::new(ticket, &users);
    if json {
        return print_json(&output);
    }

    println!(
        "{verb} ticket {} [{}] {}",
        output.id.cyan(),
        status_label(output.status, 0),
        output.client_name.bold()
    );
    for line in output.description.lines() {
        println!("  {line}");
    }
    println!(
        "  Priority: {}  Assignee: {}  Owner: {}",
        priority_label(output.priority, 0),
        output.assignee,
        output.owner
    );
    if let Some(duration) = output.duration {
        println!("  Call length: {}", format_duration(duration));
    }
    Ok(())
}

/// Execute a ticket command.
///
/// # Errors
///
/// Returns an error if the database is missing or the operation fails.
pub fn execute(
    command: &TicketCommands,
    db_path: Option<&PathBuf>,
    acting_user: Option<&str>,
    json: bool,
) -> Result<()> {
    let ws = Workspace::open(db_path)?;

    match command {
        TicketCommands::Add(args) => execute_add(&ws, acting_user, args, json)?,
        TicketCommands::List { mine, search } => {
            execute_list(&ws, acting_user, *mine, search.as_deref(), json)?;
        }
        TicketCommands::Board => execute_board(&ws, json)?,
        TicketCommands::Move { id, client } => {
            let ticket = ws.store().move_ticket(&parse_key(id)?, client)?;
            print_ticket("Moved", &ws, ticket, json)?;
        }
        TicketCommands::Status { id, status } => {
            let status = parse_ticket_status(status)?;
            let ticket = ws.store().set_ticket_status(&parse_key(id)?, status)?;
            print_ticket("Updated", &ws, ticket, json)?;
        }
        TicketCommands::Assign { id, user } => {
            let key = parse_key(id)?;
            let assignee = match user {
                Some(name) => Some(ws.user_named(name)?.id.ok_or_else(|| {
                    Error::Other(format!("user {name} has no ID"))
                })?),
                None => None,
            };
            let ticket = ws.store().assign_ticket(&key, assignee)?;
            print_ticket("Assigned", &ws, ticket, json)?;
        }
        TicketCommands::Edit(args) => execute_edit(&ws, args, json)?,
        TicketCommands::Delete { id } => {
            let key = parse_key(id)?;
            if !ws.store().delete::<Ticket>(&key)? {
                return Err(Error::not_found(Collection::Tickets, &key));
            }
            if json {
                print_json(&DeleteOutput {
                    id: key.to_doc_key(),
                    deleted: true,
                })?;
            } else {
                println!("Deleted ticket {}", key.to_doc_key().cyan());
            }
        }
        TicketCommands::FromCall {
            call_id,
            description,
        } => {
            let call = parse_key(call_id)?;
            let user_id = ws.acting_user_key(acting_user)?;
            let ticket = ws
                .store()
                .create_ticket_from_call(&call, description, user_id, now_ms())?;
            print_ticket("Opened", &ws, ticket, json)?;
        }
    }

    ws.finish()
}

fn execute_add(
    ws: &Workspace,
    acting_user: Option<&str>,
    args: &TicketAddArgs,
    json: bool,
) -> Result<()> {
    let user_id = ws.acting_user_key(acting_user)?;
    let mut ticket = Ticket::new(&args.description, &args.client, user_id, now_ms());
    if let Some(priority) = &args.priority {
        ticket.priority = parse_priority(priority)?;
    }
    if let Some(name) = &args.assign {
        ticket.assignee_id = ws.user_named(name)?.id;
    }

    let ticket = ws.store().create_ticket(ticket)?;
    print_ticket("Opened", ws, ticket, json)
}

fn execute_list(
    ws: &Workspace,
    acting_user: Option<&str>,
    mine: bool,
    search: Option<&str>,
    json: bool,
) -> Result<()> {
    let owner = if mine {
        Some(ws.acting_user_key(acting_user)?)
    } else {
        None
    };

    let (tickets, users) = {
        let store = ws.store();
        let mut tickets = match search {
            Some(term) => store.search_tickets(term)?,
            None => store.list_tickets(owner.as_ref())?,
        };
        if let (Some(_), Some(owner)) = (search, owner.as_ref()) {
            tickets.retain(|t| t.user_id.as_ref() == Some(owner));
        }
        (tickets, UserDirectory::new(&store.list_users()?))
    };
    let tickets: Vec<TicketOutput> = tickets
        .into_iter()
        .map(|t| TicketOutput::new(t, &users))
        .collect();

    if json {
        return print_json(&TicketListOutput {
            count: tickets.len(),
            tickets,
        });
    }

    if tickets.is_empty() {
        println!("No tickets.");
        return Ok(());
    }
    println!(
        "{}",
        format!(
            "{:<10} {:<7} {:<7} {:<20} {:<14} {}",
            "ID", "STATUS", "PRIO", "CLIENT", "ASSIGNEE", "DESCRIPTION"
        )
        .bold()
    );
    for t in &tickets {
        println!(
            "{} {} {} {:<20} {:<14} {}",
            format!("{:<10}", t.id).dimmed(),
            status_label(t.status, 7),
            priority_label(t.priority, 7),
            truncate(&t.client_name, 20),
            truncate(&t.assignee, 14),
            truncate(first_line(&t.description), 50)
        );
    }
    Ok(())
}

fn execute_board(ws: &Workspace, json: bool) -> Result<()> {
    let (tickets, users) = {
        let store = ws.store();
        (store.list_tickets(None)?, UserDirectory::new(&store.list_users()?))
    };
    let columns: Vec<ColumnOutput> = kanban_columns(tickets)
        .into_iter()
        .map(|(client, tickets)| ColumnOutput {
            client,
            tickets: tickets
                .into_iter()
                .map(|t| TicketOutput::new(t, &users))
                .collect(),
        })
        .collect();

    if json {
        return print_json(&BoardOutput { columns });
    }

    for column in &columns {
        println!(
            "{} {}",
            column.client.cyan().bold(),
            format!("({})", column.tickets.len()).dimmed()
        );
        if column.tickets.is_empty() {
            println!("  {}", "-".dimmed());
        }
        for t in &column.tickets {
            println!(
                "  {} [{}] {} {}",
                t.id.dimmed(),
                status_label(t.status, 0),
                priority_label(t.priority, 0),
                truncate(first_line(&t.description), 60)
            );
        }
        println!();
    }
    Ok(())
}

fn execute_edit(ws: &Workspace, args: &TicketEditArgs, json: bool) -> Result<()> {
    let key = parse_key(&args.id)?;
    let patch = TicketPatch {
        description: args.description.clone(),
        status: args.status.as_deref().map(parse_ticket_status).transpose()?,
        priority: args.priority.as_deref().map(parse_priority).transpose()?,
        date_string: args.date.clone(),
        client_name: args.client.as_deref().map(|c| c.trim().to_string()),
        assignee_id: None,
    };
    let ticket = ws.store().edit_ticket(&key, patch)?;
    print_ticket("Edited", ws, ticket, json)
}
