//! Start command implementation.

use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start the liveness monitor.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Run with built-in defaults when the config file does not exist.
    #[arg(long)]
    pub allow_missing_config: bool,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
///
/// `RUST_LOG` wins over the configured level.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Run the start command with the given config path.
pub async fn run_start(
    args: StartArgs,
    config_path: &Path,
    overrides: &ConfigOverrides,
) -> Result<()> {
    let mut config = if args.allow_missing_config && !config_path.exists() {
        Config::default()
    } else {
        Config::from_file(config_path)
            .with_context(|| format!("failed to load config from {:?}", config_path))?
    };
    config.apply_overrides(overrides);

    init_tracing(&config.telemetry.log_level);
    tracing::info!(config = %config_path.display(), "configuration loaded");

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
