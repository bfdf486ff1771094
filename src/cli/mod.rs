//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;
pub mod workspace;

pub use workspace::Workspace;

/// Deskline - call center front office that works offline and syncs
#[derive(Parser, Debug)]
#[command(name = "deskline", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.deskline/data/deskline.db)
    #[arg(long, global = true, env = "DESKLINE_DB")]
    pub db: Option<PathBuf>,

    /// Act as this user (default: the first admin)
    #[arg(long = "as", global = true, env = "DESKLINE_USER", value_name = "USER")]
    pub acting_user: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the local database
    Init {
        /// Seed an admin user with this name
        #[arg(long, requires = "pin")]
        admin: Option<String>,

        /// PIN for the seeded admin
        #[arg(long, requires = "admin")]
        pin: Option<String>,

        /// Overwrite an existing database
        #[arg(long)]
        force: bool,
    },

    /// Check a user name and PIN
    Login {
        name: String,
        pin: String,
    },

    /// User management
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Call recordings
    Call {
        #[command(subcommand)]
        command: CallCommands,
    },

    /// Tasks (activities)
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Support tickets
    Ticket {
        #[command(subcommand)]
        command: TicketCommands,
    },

    /// Case notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },

    /// Delete calls, tasks, and tickets older than 90 days
    Cleanup,

    /// Headline counts for today
    Dashboard,

    /// Remote sync
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Print version information
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

// ============================================================================
// User Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Add a user (admin only)
    Add {
        name: String,
        pin: String,

        /// Role: admin or agent
        #[arg(long, default_value = "agent")]
        role: String,
    },

    /// List users
    List,

    /// Remove a user (admin only)
    Remove {
        /// User ID
        id: String,
    },
}

// ============================================================================
// Call Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum CallCommands {
    /// Save a call recording
    Add {
        /// Client name (blank for an anonymous client)
        #[arg(long, default_value = "")]
        client: String,

        /// Length in seconds
        #[arg(long)]
        duration: i64,

        /// Audio file to attach
        #[arg(long)]
        audio: Option<PathBuf>,
    },

    /// List recordings, newest first
    List {
        /// Filter by client name
        #[arg(long, short)]
        search: Option<String>,
    },

    /// Change a recording's client name
    Rename {
        id: String,
        client: String,

        /// New date label (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },

    /// Write a recording's audio to a file
    Export {
        id: String,
        output: PathBuf,
    },

    /// Delete a recording and its tickets
    Delete {
        id: String,
    },
}

// ============================================================================
// Task Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Add a pending task
    Add {
        title: String,
    },

    /// List tasks, newest first
    List {
        /// Only this status (pending, completed)
        #[arg(long)]
        status: Option<String>,
    },

    /// Flip a task between pending and completed
    Toggle {
        id: String,
    },

    /// Change a task's title
    Rename {
        id: String,
        title: String,
    },

    /// Delete a task
    Delete {
        id: String,
    },
}

// ============================================================================
// Ticket Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum TicketCommands {
    /// Open a ticket
    Add(TicketAddArgs),

    /// List tickets, newest first
    List {
        /// Only tickets created by the acting user
        #[arg(long)]
        mine: bool,

        /// Filter by client or description
        #[arg(long, short)]
        search: Option<String>,
    },

    /// Show tickets grouped by client
    Board,

    /// Move a ticket to another client column
    Move {
        id: String,

        /// Target column ("Unassigned" clears the client)
        client: String,
    },

    /// Set a ticket's status (Open, Closed)
    Status {
        id: String,
        status: String,
    },

    /// Assign a ticket to a user (omit USER to unassign)
    Assign {
        id: String,
        user: Option<String>,
    },

    /// Edit ticket fields
    Edit(TicketEditArgs),

    /// Delete a ticket
    Delete {
        id: String,
    },

    /// Open a ticket from a call recording
    FromCall {
        call_id: String,
        description: String,
    },
}

#[derive(Args, Debug)]
pub struct TicketAddArgs {
    /// What needs doing; one bullet per line
    pub description: String,

    #[arg(long, default_value = "")]
    pub client: String,

    /// Low, Medium, or High
    #[arg(long)]
    pub priority: Option<String>,

    /// Assignee user name
    #[arg(long)]
    pub assign: Option<String>,
}

#[derive(Args, Debug)]
pub struct TicketEditArgs {
    pub id: String,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub client: Option<String>,

    #[arg(long)]
    pub priority: Option<String>,

    #[arg(long)]
    pub status: Option<String>,

    /// Date label (YYYY-MM-DD)
    #[arg(long)]
    pub date: Option<String>,
}

// ============================================================================
// Note Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum NoteCommands {
    /// Write a case note
    Add {
        #[arg(long)]
        client: String,

        /// Case type, e.g. Billing
        #[arg(long = "type")]
        case_type: String,

        notes: String,

        /// Date label (default: today)
        #[arg(long)]
        date: Option<String>,
    },

    /// List case notes, newest first
    List {
        #[arg(long, short)]
        search: Option<String>,
    },

    /// Edit a case note
    Edit {
        id: String,

        #[arg(long)]
        client: Option<String>,

        #[arg(long = "type")]
        case_type: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long)]
        date: Option<String>,
    },

    /// Delete a case note
    Delete {
        id: String,
    },
}

// ============================================================================
// Sync Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum SyncCommands {
    /// Stay connected and keep syncing until Ctrl-C
    Run,

    /// Show device, remote, and queue state
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ticket_move() {
        let cli = Cli::parse_from(["deskline", "--as", "mina", "ticket", "move", "4", "Acme"]);
        assert_eq!(cli.acting_user.as_deref(), Some("mina"));
        match cli.command {
            Commands::Ticket {
                command: TicketCommands::Move { id, client },
            } => {
                assert_eq!(id, "4");
                assert_eq!(client, "Acme");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_init_admin_requires_pin() {
        assert!(Cli::try_parse_from(["deskline", "init", "--admin", "Mina"]).is_err());
    }
}
