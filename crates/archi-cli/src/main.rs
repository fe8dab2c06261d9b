//! `archi` -- CLI binary for the Archi autonomous agent.
//!
//! Subcommands:
//!
//! - `archi run` -- Start the agent loop (heartbeat, triggers, dream cycles).
//! - `archi status` -- Show goals, budget, and dream-cycle status.
//! - `archi goal add|list` -- Manage goals.
//! - `archi usage [today|month|all]` -- Budget ledger summaries.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod approval;
mod commands;
mod wiring;

/// Archi autonomous agent CLI.
#[derive(Parser)]
#[command(name = "archi", about = "Archi autonomous agent", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Start the agent loop.
    Run,

    /// Show goals, budget, cache, and dream-cycle status.
    Status,

    /// Manage goals.
    Goal {
        #[command(subcommand)]
        action: GoalAction,
    },

    /// Show budget ledger summaries.
    Usage {
        /// Reporting window: today, month, or all.
        #[arg(default_value = "today")]
        period: String,
    },
}

/// Subcommands for `archi goal`.
#[derive(Subcommand)]
enum GoalAction {
    /// Create a new goal.
    Add {
        /// What needs to be achieved.
        description: String,

        /// Why (free text, improves decomposition).
        #[arg(short, long, default_value = "")]
        intent: String,

        /// Priority 1-10, 10 highest.
        #[arg(short, long, default_value_t = 5)]
        priority: u8,
    },

    /// List all goals with progress.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let project_root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Run => commands::run::execute(&project_root).await,
        Commands::Status => commands::status::execute(&project_root).await,
        Commands::Goal { action } => match action {
            GoalAction::Add {
                description,
                intent,
                priority,
            } => commands::goal_cmd::add(&project_root, &description, &intent, priority).await,
            GoalAction::List => commands::goal_cmd::list(&project_root),
        },
        Commands::Usage { period } => commands::usage_cmd::execute(&project_root, &period),
    }
}
