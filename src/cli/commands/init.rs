//! Init command implementation.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

/// Write a default configuration file.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Output path (defaults to the global --config path).
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

/// Run the init command.
pub fn run_init(args: InitArgs, config_path: &Path) -> Result<()> {
    let path = args.path.as_deref().unwrap_or(config_path);
    write_default_config(path, args.force)?;
    println!("Wrote default configuration: {:?}", path);
    Ok(())
}

/// Write the default configuration to `path`, creating parent directories.
pub(crate) fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{:?} already exists (use --force to overwrite)", path);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {:?}", parent))?;
    }

    let body = Config::default().to_toml()?;
    let content = format!("# Nexus configuration\n\n{body}");
    std::fs::write(path, content).with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}
