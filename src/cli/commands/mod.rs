//! CLI command implementations.

mod config;
mod init;
mod start;

pub use config::{run_config, ConfigArgs, ConfigCommand, OutputFormat};
pub use init::{run_init, InitArgs};
pub use start::{run_start, StartArgs};
