//! DocDB CLI
//!
//! Command-line tools for exercising the DocDB write path.
//!
//! # Commands
//!
//! - `run` - Execute a batch file against a local in-memory node
//! - `check` - Parse a batch file and describe its commands
//! - `options` - Parse batch query options and show the resulting waits

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// DocDB command-line tools.
#[derive(Parser)]
#[command(name = "docdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a batch file against a local in-memory node
    Run {
        /// JSON batch body
        file: PathBuf,

        /// Attachment stream files, in AttachmentPUT order
        #[arg(short, long = "attachment")]
        attachments: Vec<PathBuf>,

        /// Query option as name=value, e.g. waitForIndexesTimeout=00:00:05
        #[arg(short, long = "query", value_parser = commands::parse_query_pair)]
        query: Vec<(String, String)>,

        /// Index on the node as Name=Collection1,Collection2
        #[arg(long = "index")]
        indexes: Vec<String>,

        /// Replica name on the node
        #[arg(long = "replica")]
        replicas: Vec<String>,

        /// Keep the local indexes and replicas from catching up
        #[arg(long)]
        stalled: bool,

        /// Directory for staged attachment files
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Parse a batch file and describe its commands
    Check {
        /// JSON batch body
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Parse batch query options
    Options {
        /// Query option as name=value
        #[arg(value_parser = commands::parse_query_pair)]
        pairs: Vec<(String, String)>,
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            file,
            attachments,
            query,
            indexes,
            replicas,
            stalled,
            temp_dir,
            format,
        } => {
            let node = commands::run::NodeSpec::parse(&indexes, &replicas, stalled, temp_dir)?;
            commands::run::run(&file, attachments, &query, node, &format)?;
        }
        Commands::Check { file, format } => {
            commands::check::run(&file, &format)?;
        }
        Commands::Options { pairs } => {
            commands::options::run(&pairs)?;
        }
        Commands::Version => {
            println!("DocDB CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
