//! Task (activity) commands.

use super::{key_str, print_json, truncate};
use crate::cli::{TaskCommands, Workspace};
use crate::error::{Error, Result};
use crate::model::{Collection, Task, TaskStatus, now_ms};
use crate::validate::{parse_key, parse_task_status};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskOutput {
    id: String,
    title: String,
    status: TaskStatus,
    timestamp: i64,
}

impl From<Task> for TaskOutput {
    fn from(t: Task) -> Self {
        Self {
            id: key_str(t.id.as_ref()),
            title: t.title,
            status: t.status,
            timestamp: t.timestamp,
        }
    }
}

#[derive(Serialize)]
struct TaskListOutput {
    tasks: Vec<TaskOutput>,
    count: usize,
}

#[derive(Serialize)]
struct DeleteOutput {
    id: String,
    deleted: bool,
}

fn status_marker(status: TaskStatus) -> colored::ColoredString {
    match status {
        TaskStatus::Pending => "[ ]".normal(),
        TaskStatus::Completed => "[x]".green(),
    }
}

fn print_task(verb: &str, task: &TaskOutput, json: bool) -> Result<()> {
    if json {
        print_json(task)
    } else {
        println!(
            "{verb} {} {} {}",
            task.id.cyan(),
            status_marker(task.status),
            task.title
        );
        Ok(())
    }
}

/// Execute a task command.
///
/// # Errors
///
/// Returns an error if the database is missing or the operation fails.
pub fn execute(
    command: &TaskCommands,
    db_path: Option<&PathBuf>,
    acting_user: Option<&str>,
    json: bool,
) -> Result<()> {
    let ws = Workspace::open(db_path)?;

    match command {
        TaskCommands::Add { title } => {
            if title.trim().is_empty() {
                return Err(Error::InvalidArgument("task title cannot be empty".into()));
            }
            let user_id = ws.acting_user_key(acting_user)?;
            let task = ws.store().insert(Task::new(title, user_id, now_ms()))?;
            print_task("Added task", &TaskOutput::from(task), json)?;
        }
        TaskCommands::List { status } => {
            let status = status.as_deref().map(parse_task_status).transpose()?;
            let tasks: Vec<TaskOutput> = ws
                .store()
                .list_tasks()?
                .into_iter()
                .filter(|t| status.is_none_or(|s| t.status == s))
                .map(TaskOutput::from)
                .collect();

            if json {
                print_json(&TaskListOutput {
                    count: tasks.len(),
                    tasks,
                })?;
            } else if tasks.is_empty() {
                println!("No tasks.");
            } else {
                for t in &tasks {
                    println!(
                        "{} {} {}",
                        format!("{:<10}", t.id).dimmed(),
                        status_marker(t.status),
                        truncate(&t.title, 70)
                    );
                }
            }
        }
        TaskCommands::Toggle { id } => {
            let task = ws.store().toggle_task(&parse_key(id)?)?;
            print_task("Toggled", &TaskOutput::from(task), json)?;
        }
        TaskCommands::Rename { id, title } => {
            if title.trim().is_empty() {
                return Err(Error::InvalidArgument("task title cannot be empty".into()));
            }
            let task = ws.store().rename_task(&parse_key(id)?, title)?;
            print_task("Renamed", &TaskOutput::from(task), json)?;
        }
        TaskCommands::Delete { id } => {
            let key = parse_key(id)?;
            if !ws.store().delete::<Task>(&key)? {
                return Err(Error::not_found(Collection::Activities, &key));
            }
            if json {
                print_json(&DeleteOutput {
                    id: key.to_doc_key(),
                    deleted: true,
                })?;
            } else {
                println!("Deleted task {}", key.to_doc_key().cyan());
            }
        }
    }

    ws.finish()
}
