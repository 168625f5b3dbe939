//! Predictive Repair Agent CLI
//!
//! Offline inspection of what the agent has learned: the Q-table, the
//! saved model group and the repair/failure history.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{history, models, qtable};
use std::path::PathBuf;

/// Predictive Repair Agent CLI
#[derive(Parser)]
#[command(name = "repairctl")]
#[command(author, version, about = "Inspect the state learned by the Predictive Repair Agent", long_about = None)]
pub struct Cli {
    /// Directory holding model artifacts and the manifest
    #[arg(
        long,
        env = "REPAIR_AGENT_MODEL_DIR",
        default_value = "/var/lib/repair-agent/models"
    )]
    pub model_dir: PathBuf,

    /// Repair history file
    #[arg(
        long,
        env = "REPAIR_AGENT_HISTORY_PATH",
        default_value = "/var/lib/repair-agent/repair_history.json"
    )]
    pub history: PathBuf,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show learned Q-values
    Qtable {
        /// Only show states of this service
        #[arg(long, short)]
        service: Option<String>,
    },

    /// Show the saved model manifest
    Models {
        /// Load every artifact and check its checksum
        #[arg(long)]
        verify: bool,
    },

    /// Show recent failures and repairs
    History {
        /// Entries per list, newest first
        #[arg(long, short, default_value_t = 20)]
        limit: usize,

        /// Only show entries for this service
        #[arg(long, short)]
        service: Option<String>,
    },
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Qtable { service } => {
            qtable::show_qtable(&cli.model_dir, service.as_deref(), cli.format)
        }
        Commands::Models { verify } => models::show_models(&cli.model_dir, verify, cli.format),
        Commands::History { limit, service } => {
            history::show_history(&cli.history, limit, service.as_deref(), cli.format)
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
