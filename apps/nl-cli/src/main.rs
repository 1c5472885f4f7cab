//! # nl-cli
//!
//! Operator command line for the NightLedger governance ledger.
//!
//! - `nightledger ingest <file>` — submit events through the rule gate
//! - `nightledger events [--run]` — list events in ledger order
//! - `nightledger status <run>` — projected run status
//! - `nightledger approval list/register/resolve/state` — human approvals
//! - `nightledger audit verify/export` — hash chain checks and decision trails

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{LedgerConfig, LogFormat};

/// NightLedger: tamper-evident ledger and approvals for agent runs.
#[derive(Parser)]
#[command(name = "nightledger", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Ledger database (overrides .nightledger/config.toml).
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit events from a JSON file (one event or an array).
    Ingest {
        /// Path to the JSON file.
        file: PathBuf,
    },
    /// List recorded events.
    Events {
        /// Only events of this run.
        #[arg(long)]
        run: Option<String>,
        /// Print stored records as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the projected status of a run.
    Status {
        /// Run ID.
        run: String,
        #[arg(long)]
        json: bool,
    },
    /// Register, resolve, and inspect approvals.
    Approval {
        #[command(subcommand)]
        command: commands::approval::ApprovalCommands,
    },
    /// Verify hash chains and export decision trails.
    Audit {
        #[command(subcommand)]
        command: commands::audit::AuditCommands,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let mut config = LedgerConfig::load(&project_root)?;
    if let Some(database) = cli.database {
        config.database = database;
    }

    // RUST_LOG wins over the configured filter.
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter)?,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    match config.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
    tracing::debug!(database = %config.database.display(), "configuration loaded");

    match &cli.command {
        Commands::Ingest { file } => commands::ingest::execute(&config, file),
        Commands::Events { run, json } => commands::events::execute(&config, run.as_deref(), *json),
        Commands::Status { run, json } => commands::status::execute(&config, run, *json),
        Commands::Approval { command } => commands::approval::execute(command, &config),
        Commands::Audit { command } => commands::audit::execute(command, &config),
    }
}
