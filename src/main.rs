//! Nexus - unified CLI entrypoint.
//!
//! Usage:
//!   nexus start --config config/nexus.toml
//!   nexus init [--path config/nexus.toml] [--force]
//!   nexus config validate --config config/nexus.toml
//!   nexus config show [--format toml|json]

use anyhow::Result;
use clap::Parser;
use nexus::cli::commands::{run_config, run_init, run_start};
use nexus::cli::{Cli, Commands, DEFAULT_CONFIG_PATH};
use nexus::core::config::ConfigOverrides;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let overrides = ConfigOverrides {
        log_level: cli.log_level,
    };

    match cli.command {
        Commands::Start(args) => run_start(args, &config_path, &overrides).await,
        Commands::Init(args) => run_init(args, &config_path),
        Commands::Config(args) => run_config(args, &config_path, &overrides),
    }
}
