//! Configuration parsing and validation.
//!
//! Nexus configuration is loaded from a TOML file with CLI overrides. Every
//! section is optional; missing keys fall back to the defaults below.

use crate::liveness::events::OverflowPolicy;
use crate::liveness::monitor::MonitorConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level Nexus configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Liveness monitor configuration.
    #[serde(default)]
    pub monitor: MonitorSection,

    /// Admission control configuration.
    #[serde(default)]
    pub admission: AdmissionSection,

    /// Logging and reporting configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Liveness monitor section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSection {
    /// Expiry loop sleep when no node is tracked, in milliseconds.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Period of the stale-node cleanup loop, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// How long a node stays listed as offline before it is removed, in seconds.
    #[serde(default = "default_max_offline_seconds")]
    pub max_offline_seconds: u64,

    /// Capacity of the state-change event queue.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// What to do when the event queue is full.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            idle_poll_ms: default_idle_poll_ms(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            max_offline_seconds: default_max_offline_seconds(),
            event_queue_capacity: default_event_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

impl From<&MonitorSection> for MonitorConfig {
    fn from(section: &MonitorSection) -> Self {
        MonitorConfig {
            idle_poll: Duration::from_millis(section.idle_poll_ms),
            cleanup_interval: Duration::from_secs(section.cleanup_interval_seconds),
            max_offline: Duration::from_secs(section.max_offline_seconds),
            event_queue_capacity: section.event_queue_capacity,
            overflow_policy: section.overflow_policy,
        }
    }
}

/// Upper bound for `admission.max_lease_seconds` (one day).
pub const MAX_LEASE_SECONDS: u64 = 86_400;

/// Behavior when a requested lease falls outside the configured bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseExceedsBehavior {
    /// Clamp the lease into `[min, max]`.
    #[default]
    Clamp,
    /// Reject the request.
    Reject,
}

/// Admission control section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionSection {
    /// Lease granted to an admitted heartbeat, in seconds.
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: u64,

    /// Smallest lease a caller may request, in seconds.
    #[serde(default = "default_min_lease_seconds")]
    pub min_lease_seconds: u64,

    /// Largest lease a caller may request, in seconds.
    #[serde(default = "default_max_lease_seconds")]
    pub max_lease_seconds: u64,

    /// Clamp or reject out-of-bounds lease requests.
    #[serde(default)]
    pub lease_exceeds: LeaseExceedsBehavior,
}

impl Default for AdmissionSection {
    fn default() -> Self {
        Self {
            lease_seconds: default_lease_seconds(),
            min_lease_seconds: default_min_lease_seconds(),
            max_lease_seconds: default_max_lease_seconds(),
            lease_exceeds: LeaseExceedsBehavior::default(),
        }
    }
}

/// Logging and reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Period of the runtime's liveness summary log line, in seconds.
    #[serde(default = "default_report_interval_seconds")]
    pub report_interval_seconds: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            report_interval_seconds: default_report_interval_seconds(),
        }
    }
}

// Default value functions

fn default_idle_poll_ms() -> u64 {
    1_000
}

fn default_cleanup_interval_seconds() -> u64 {
    600
}

fn default_max_offline_seconds() -> u64 {
    3_600
}

fn default_event_queue_capacity() -> usize {
    1_024
}

fn default_lease_seconds() -> u64 {
    60
}

fn default_min_lease_seconds() -> u64 {
    5
}

fn default_max_lease_seconds() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_report_interval_seconds() -> u64 {
    60
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
    }

    /// Runtime settings for the liveness monitor.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::from(&self.monitor)
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_monitor()?;
        self.validate_admission()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_monitor(&self) -> Result<()> {
        if self.monitor.idle_poll_ms == 0 {
            anyhow::bail!("monitor.idle_poll_ms must be > 0");
        }
        if self.monitor.cleanup_interval_seconds == 0 {
            anyhow::bail!("monitor.cleanup_interval_seconds must be > 0");
        }
        if self.monitor.event_queue_capacity == 0 {
            anyhow::bail!("monitor.event_queue_capacity must be > 0");
        }
        Ok(())
    }

    fn validate_admission(&self) -> Result<()> {
        let admission = &self.admission;
        if admission.min_lease_seconds == 0 {
            anyhow::bail!("admission.min_lease_seconds must be > 0");
        }
        if admission.max_lease_seconds > MAX_LEASE_SECONDS {
            anyhow::bail!(
                "admission.max_lease_seconds ({}) cannot exceed {}",
                admission.max_lease_seconds,
                MAX_LEASE_SECONDS
            );
        }
        if admission.min_lease_seconds > admission.max_lease_seconds {
            anyhow::bail!(
                "admission.min_lease_seconds ({}) cannot exceed admission.max_lease_seconds ({})",
                admission.min_lease_seconds,
                admission.max_lease_seconds
            );
        }
        if admission.lease_seconds < admission.min_lease_seconds
            || admission.lease_seconds > admission.max_lease_seconds
        {
            anyhow::bail!(
                "admission.lease_seconds ({}) must lie within [{}, {}]",
                admission.lease_seconds,
                admission.min_lease_seconds,
                admission.max_lease_seconds
            );
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        if self.telemetry.report_interval_seconds == 0 {
            anyhow::bail!("telemetry.report_interval_seconds must be > 0");
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
}
