//! MendSync CLI
//!
//! Command-line tools for inspecting and repairing a MendSync store.
//!
//! # Commands
//!
//! - `status` - Queue, conflict and watermark summary
//! - `pending` / `failed` - List the outbound queues
//! - `conflicts` - List conflicts awaiting a decision
//! - `show` / `put` / `delete` - Read and write single records
//! - `resubmit` - Move a failed entry back to the pending queue
//! - `resolve` - Commit a decision for a conflict
//! - `compact` - Rewrite the journal as a snapshot

mod commands;

use clap::{Args, Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// MendSync store maintenance tools.
#[derive(Parser)]
#[command(name = "mendsync")]
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
    /// Show queue and conflict counts
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: Format,
    },

    /// List entries waiting to be pushed
    Pending {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: Format,
    },

    /// List entries that exhausted their retries
    Failed {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: Format,
    },

    /// List conflicts
    Conflicts {
        /// Include resolved conflicts
        #[arg(short, long)]
        all: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: Format,
    },

    /// Show a single record
    Show {
        /// Record type
        record_type: String,

        /// Record id
        id: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: Format,
    },

    /// Write a record as a local edit
    Put {
        /// Record type
        record_type: String,

        /// Record id
        id: String,

        /// JSON body
        data: String,
    },

    /// Delete a record by writing a tombstone
    Delete {
        /// Record type
        record_type: String,

        /// Record id
        id: String,
    },

    /// Move a failed entry back to the pending queue
    Resubmit {
        /// Sequence number of the failed entry
        seq: u64,
    },

    /// Commit a decision for a pending conflict
    Resolve {
        /// Conflict id
        conflict_id: String,

        #[command(flatten)]
        choice: ResolveChoice,
    },

    /// Rewrite the journal as a single snapshot
    Compact,

    /// Show version information
    Version,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ResolveChoice {
    /// Keep the local payload
    #[arg(long)]
    keep_local: bool,

    /// Take the server payload
    #[arg(long)]
    accept_server: bool,

    /// Use this JSON body instead
    #[arg(long)]
    data: Option<String>,
}

impl From<ResolveChoice> for commands::resolve::Choice {
    fn from(choice: ResolveChoice) -> Self {
        match (choice.keep_local, choice.accept_server, choice.data) {
            (_, _, Some(data)) => Self::Data(data),
            (true, _, None) => Self::KeepLocal,
            _ => Self::AcceptServer,
        }
    }
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

    if let Commands::Version = cli.command {
        println!("MendSync CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("MendSync Protocol v{}", mendsync_protocol::VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or("Store path required (--path)")?;
    let store = commands::open_store(&path)?;

    match cli.command {
        Commands::Status { format } => commands::status::run(&store, &path, format)?,
        Commands::Pending { format } => commands::queue::pending(&store, format)?,
        Commands::Failed { format } => commands::queue::failed(&store, format)?,
        Commands::Conflicts { all, format } => commands::resolve::list(&store, all, format)?,
        Commands::Show {
            record_type,
            id,
            format,
        } => commands::records::show(&store, &record_type, &id, format)?,
        Commands::Put {
            record_type,
            id,
            data,
        } => commands::records::put(&store, &record_type, &id, &data)?,
        Commands::Delete { record_type, id } => {
            commands::records::delete(&store, &record_type, &id)?
        }
        Commands::Resubmit { seq } => commands::queue::resubmit(store, seq)?,
        Commands::Resolve {
            conflict_id,
            choice,
        } => commands::resolve::run(store, &conflict_id, choice.into())?,
        Commands::Compact => commands::compact::run(&store, &path)?,
        Commands::Version => {}
    }

    Ok(())
}
