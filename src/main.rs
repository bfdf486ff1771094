//! Deskline CLI entry point.

use clap::Parser;
use deskline::cli::commands;
use deskline::cli::{Cli, Commands};
use deskline::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);
    if cli.no_color {
        colored::control::set_override(false);
    }

    // --json, or stdout is not a terminal
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info,hyper=info,reqwest=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    let db = cli.db.as_ref();
    let user = cli.acting_user.as_deref();

    match &cli.command {
        Commands::Init { admin, pin, force } => {
            commands::init::execute(db, admin.as_deref(), pin.as_deref(), *force, json)
        }
        Commands::Login { name, pin } => commands::user::execute_login(db, name, pin, json),
        Commands::User { command } => commands::user::execute(command, db, user, json),
        Commands::Call { command } => commands::call::execute(command, db, user, json),
        Commands::Task { command } => commands::task::execute(command, db, user, json),
        Commands::Ticket { command } => commands::ticket::execute(command, db, user, json),
        Commands::Note { command } => commands::note::execute(command, db, user, json),
        Commands::Cleanup => commands::cleanup::execute(db, json),
        Commands::Dashboard => commands::dashboard::execute(db, json),
        Commands::Sync { command } => commands::sync::execute(command, db, json),
        Commands::Version => commands::version::execute(json),
        Commands::Completions { shell } => commands::completions::execute(shell),
    }
}
