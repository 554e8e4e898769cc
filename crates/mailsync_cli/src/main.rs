//! mailsync CLI
//!
//! Maintenance tools for an account store file.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics and per-container state
//! - `verify` - Check every log frame without modifying the file
//! - `recover` - Cut the log back to its last valid frame
//! - `dead-letters` - List, requeue or discard failed mutations
//! - `wipe` - Destroy every record of the account

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// mailsync account store tools.
#[derive(Parser)]
#[command(name = "mailsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the account store file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics and per-container state
    Inspect {
        /// Show one line per container
        #[arg(short, long)]
        containers: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every log frame without modifying the file
    Verify,

    /// Cut the log back to its last valid frame
    Recover {
        /// Report what would be discarded without truncating
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Manage mutations the server refused for good
    DeadLetters {
        #[command(subcommand)]
        action: DeadLetterAction,
    },

    /// Destroy every record of the account
    Wipe {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum DeadLetterAction {
    /// List dead-letter entries
    List {
        /// Only entries for this container (e.g. messages/INBOX)
        #[arg(short, long)]
        container: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Put an entry back on the queue with a fresh sequence number
    Requeue {
        /// Sequence number of the entry
        seq: u64,
    },

    /// Delete an entry
    Discard {
        /// Sequence number of the entry
        seq: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { containers, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, containers, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Recover { dry_run } => {
            let path = cli.path.ok_or("Store path required for recover")?;
            commands::recover::run(&path, dry_run)?;
        }
        Commands::DeadLetters { action } => {
            let path = cli.path.ok_or("Store path required for dead-letters")?;
            match action {
                DeadLetterAction::List { container, format } => {
                    commands::dead_letters::list(&path, container.as_deref(), &format)?;
                }
                DeadLetterAction::Requeue { seq } => commands::dead_letters::requeue(&path, seq)?,
                DeadLetterAction::Discard { seq } => commands::dead_letters::discard(&path, seq)?,
            }
        }
        Commands::Wipe { yes } => {
            let path = cli.path.ok_or("Store path required for wipe")?;
            commands::wipe::run(&path, yes)?;
        }
        Commands::Version => {
            println!("mailsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Store log format v{}", mailsync_store::LOG_VERSION);
        }
    }

    Ok(())
}
