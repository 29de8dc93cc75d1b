//! CardSync CLI
//!
//! Maintenance tools for on-device CardSync stores.
//!
//! # Commands
//!
//! - `inspect` - Schema version, entity counts and queue statistics
//! - `dump-queue` - List queued sync operations
//! - `purge` - Drop confirmed operations past a retention window
//! - `retry-failed` - Move failed operations back to pending
//! - `migrate` - Apply pending schema migrations
//! - `compact` - Rewrite both journals

mod commands;

use clap::{Parser, Subcommand};
use commands::dump_queue::StatusFilter;
use commands::{CliError, Format};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// CardSync command-line store tools.
#[derive(Parser)]
#[command(name = "cardsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
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
    /// Display store statistics and metadata
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// List queued sync operations
    DumpQueue {
        /// Only show operations with this status
        #[arg(short, long, value_enum)]
        status: Option<StatusFilter>,

        /// Maximum number of operations to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Remove confirmed operations older than the retention window
    Purge {
        /// Retention window in seconds
        #[arg(long, default_value = "86400")]
        older_than_secs: u64,
    },

    /// Reset failed operations to pending
    RetryFailed,

    /// Apply pending schema migrations
    Migrate {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Compact the entity and queue journals
    Compact,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or(CliError::MissingPath("inspect"))?;
            commands::inspect::run(&path, format)?;
        }
        Commands::DumpQueue {
            status,
            limit,
            format,
        } => {
            let path = cli.path.ok_or(CliError::MissingPath("dump-queue"))?;
            commands::dump_queue::run(&path, status, limit, format)?;
        }
        Commands::Purge { older_than_secs } => {
            let path = cli.path.ok_or(CliError::MissingPath("purge"))?;
            commands::maintenance::purge(&path, Duration::from_secs(older_than_secs))?;
        }
        Commands::RetryFailed => {
            let path = cli.path.ok_or(CliError::MissingPath("retry-failed"))?;
            commands::maintenance::retry_failed(&path)?;
        }
        Commands::Migrate { format } => {
            let path = cli.path.ok_or(CliError::MissingPath("migrate"))?;
            commands::migrate::run(&path, format)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or(CliError::MissingPath("compact"))?;
            commands::maintenance::compact(&path)?;
        }
        Commands::Version => {
            println!("CardSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("CardSync Core v{}", cardsync_core::VERSION);
            println!("Schema version {}", cardsync_core::CURRENT_SCHEMA_VERSION);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_dump_queue_flags() {
        let cli = Cli::parse_from([
            "cardsync",
            "--path",
            "/tmp/store",
            "dump-queue",
            "--status",
            "in-flight",
            "--limit",
            "5",
        ]);
        assert_eq!(cli.path, Some(PathBuf::from("/tmp/store")));
        match cli.command {
            Commands::DumpQueue { status, limit, format } => {
                assert_eq!(status, Some(StatusFilter::InFlight));
                assert_eq!(limit, Some(5));
                assert_eq!(format, Format::Text);
            }
            _ => panic!("expected dump-queue"),
        }
    }
}
