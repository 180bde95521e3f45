//! Command-line interface.
//!
//! Unified CLI for Nexus operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/nexus.toml";

/// Nexus - license server liveness core.
#[derive(Parser, Debug)]
#[command(name = "nexus")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the liveness monitor and run until interrupted.
    Start(commands::StartArgs),
    /// Write a default configuration file.
    Init(commands::InitArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}
