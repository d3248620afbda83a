//! Kestrel CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Write the default config and data directories
//! - `chat`    — Interactive session; studies on its own when left idle
//! - `ask`     — Single turn
//! - `study`   — Run the study loop in the foreground
//! - `graph`   — Inspect or edit the knowledge graph
//! - `tools`   — List the tool manifest
//! - `status`  — Configuration, topics and UI panels

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "kestrel",
    about = "Kestrel — an autonomous research agent that studies while you are away",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to config.toml
    #[arg(long, global = true, env = "KESTREL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and data directories
    Onboard,

    /// Interactive chat; typing interrupts study, `/study` forces it, `/quit` exits
    Chat,

    /// Send a single message
    Ask {
        /// The message to send
        message: String,
    },

    /// Run the study loop until Ctrl+C or the iteration limit
    Study {
        #[arg(short, long)]
        iterations: Option<u64>,
    },

    /// Inspect or edit the knowledge graph
    Graph {
        #[command(subcommand)]
        action: commands::graph::GraphAction,
    },

    /// List available tools
    Tools,

    /// Show configuration, top topics and UI panels
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "kestrel=debug" } else { "kestrel=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Onboard => commands::onboard::run(config_path)?,
        Commands::Chat => commands::chat::run(config_path).await?,
        Commands::Ask { message } => commands::chat::ask(config_path, &message).await?,
        Commands::Study { iterations } => commands::study::run(config_path, iterations).await?,
        Commands::Graph { action } => commands::graph::run(config_path, action).await?,
        Commands::Tools => commands::tools::run(config_path)?,
        Commands::Status => commands::status::run(config_path)?,
    }

    Ok(())
}
