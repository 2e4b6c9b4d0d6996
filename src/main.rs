// ABOUTME: CLI entry point for pgcat
// ABOUTME: Parses commands, initializes logging, and routes to handlers

use anyhow::Context;
use clap::{Parser, Subcommand};
use pgcat::commands;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pgcat")]
#[command(about = "In-sync relation cache and local-origin output plugin tooling", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace); defaults to the config file's log.level
    #[arg(long, global = true)]
    log: Option<String>,
    /// Path to config.toml (default: ~/.pgcat/config.toml)
    #[arg(long, global = true, env = "PGCAT_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario file against an in-memory catalog
    Run {
        /// Scenario file (TOML)
        scenario: PathBuf,
    },
    /// Inspect configuration
    Config(commands::config::ConfigArgs),
    /// Inspect the base output plugin
    Plugin(commands::plugin::PluginArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = pgcat::config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. Otherwise the configuration file's log.level
    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { scenario } => commands::run(&scenario, &config.plugin).map(|_| ()),
        Commands::Config(args) => commands::config::command(args, &config),
        Commands::Plugin(args) => commands::plugin::command(args, &config.plugin),
    }
}
