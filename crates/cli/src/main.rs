//! agentloop CLI, the developer entry point.
//!
//! Commands:
//! - `config`   Create, show or validate the config file
//! - `preview`  Print the model-ready context for a message list
//! - `dry-run`  Drive the run loop against a scripted echo provider

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "agentloop",
    about = "agentloop: step-driven agent runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Read configuration from this file instead of ~/.agentloop/config.toml
    #[arg(long, global = true, env = "AGENTLOOP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Assemble the model context for a JSON message list and print it
    Preview {
        /// JSON file holding an array of `{ "role", "content" }` messages
        #[arg(short, long)]
        messages: PathBuf,

        /// Base system prompt
        #[arg(long)]
        system_role: Option<String>,

        /// Files injected as knowledge into the first user message
        #[arg(long)]
        knowledge: Vec<PathBuf>,
    },

    /// Run one instruction through the loop with a scripted echo model
    DryRun {
        #[arg(short, long)]
        instruction: String,

        /// Override the configured step limit
        #[arg(long)]
        max_steps: Option<u32>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Validate the configuration and report problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force)?,
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
        },
        Commands::Preview {
            messages,
            system_role,
            knowledge,
        } => commands::preview::run(config_path, &messages, system_role, &knowledge)?,
        Commands::DryRun {
            instruction,
            max_steps,
        } => commands::dry_run::run(config_path, instruction, max_steps).await?,
    }

    Ok(())
}
