use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnema::{cli, config};

#[derive(Parser)]
#[command(name = "mnema", version, about = "Local-first memory engine for conversational streams")]
struct Cli {
    /// Override the engine state file
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a transcript JSON file (array of {role, content, ...})
    Ingest {
        /// Path to the transcript file
        transcript: PathBuf,
    },
    /// Run a natural-language query against stored memory
    Query {
        /// The query text
        text: String,
        /// Maximum number of results to return
        #[arg(long)]
        max_results: Option<usize>,
    },
    /// Print the token-budgeted context window
    Context {
        /// Maximum nodes to include
        #[arg(long, default_value_t = 20)]
        max_nodes: usize,
        /// Token budget for the window
        #[arg(long, default_value_t = 2000)]
        max_tokens: usize,
    },
    /// Show engine statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::MnemaConfig::load()?;

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.engine.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let state_path = cli
        .state
        .unwrap_or_else(|| config.resolved_state_path());

    match cli.command {
        Command::Ingest { transcript } => {
            cli::ingest::ingest(&config, &transcript, &state_path)?;
        }
        Command::Query { text, max_results } => {
            cli::query::query(&config, &state_path, &text, max_results)?;
        }
        Command::Context {
            max_nodes,
            max_tokens,
        } => {
            cli::context::context(&config, &state_path, max_nodes, max_tokens)?;
        }
        Command::Stats => {
            cli::stats::stats(&config, &state_path)?;
        }
    }

    Ok(())
}
