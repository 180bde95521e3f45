//! Config command implementation.

use crate::core::config::{Config, ConfigOverrides};
use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use std::path::Path;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration file.
    Validate,
    /// Print the effective configuration, defaults filled in.
    Show {
        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Toml)]
        format: OutputFormat,
    },
}

/// Output format for `config show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Toml,
    Json,
}

/// Run the config command.
pub fn run_config(args: ConfigArgs, config_path: &Path, overrides: &ConfigOverrides) -> Result<()> {
    match args.command {
        ConfigCommand::Validate => {
            load(config_path, overrides)?;
            println!("✓ Configuration {:?} is valid", config_path);
            Ok(())
        }
        ConfigCommand::Show { format } => {
            let config = load(config_path, overrides)?;
            println!("{}", render(&config, format)?);
            Ok(())
        }
    }
}

fn load(path: &Path, overrides: &ConfigOverrides) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }
    let mut config = Config::from_file(path)?;
    config.apply_overrides(overrides);
    config
        .validate()
        .with_context(|| format!("invalid configuration in {:?}", path))?;
    Ok(config)
}

fn render(config: &Config, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Toml => config.to_toml(),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(config)?),
    }
}
