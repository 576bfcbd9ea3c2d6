//! docset CLI
//!
//! Command-line tools for docset snapshot files.
//!
//! # Commands
//!
//! - `inspect` - List tables with row counts and columns
//! - `verify-blobs` - Validate the binary object store
//! - `history` - Show the change history of a document

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// docset command-line snapshot tools.
#[derive(Parser)]
#[command(name = "docset")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the snapshot file
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
    /// List tables with row counts
    Inspect {
        /// Show column names
        #[arg(short, long)]
        columns: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate the binary object store
    VerifyBlobs {
        /// Snapshot files of the payload partitions, in partition order
        #[arg(long = "partition")]
        partitions: Vec<PathBuf>,
    },

    /// Show the change history of a document
    History {
        /// Document table name
        #[arg(short, long)]
        table: String,

        /// Document identifier
        #[arg(short, long)]
        id: i64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

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
        Commands::Inspect { columns, format } => {
            let path = cli.path.ok_or("Snapshot path required for inspect")?;
            commands::inspect::run(&path, columns, &format)?;
        }
        Commands::VerifyBlobs { partitions } => {
            let path = cli.path.ok_or("Snapshot path required for verify-blobs")?;
            commands::verify_blobs::run(&path, &partitions)?;
        }
        Commands::History { table, id, format } => {
            let path = cli.path.ok_or("Snapshot path required for history")?;
            commands::history::run(&path, &table, id, &format)?;
        }
        Commands::Version => {
            println!("docset CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("docset Core v{}", docset_core::DocumentStore::VERSION);
        }
    }

    Ok(())
}
