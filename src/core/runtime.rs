//! Main runtime orchestration.
//!
//! The runtime wires the liveness core together:
//! - Start order: metrics → monitor (ledger attached as collector) → reporter
//! - Shutdown order: reporter → monitor

use crate::admission::gate::{AdmissionGate, LeasePolicy};
use crate::core::config::Config;
use crate::liveness::monitor::Monitor;
use crate::liveness::stat::OnlineStat;
use crate::ops::observability::{LivenessSummary, NexusMetrics};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Heartbeat monitor health.
    pub monitor: ComponentHealth,
    /// Periodic reporter health.
    pub reporter: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            monitor: ComponentHealth::Starting,
            reporter: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the runtime is ready to accept heartbeats.
    pub fn is_ready(&self) -> bool {
        self.monitor == ComponentHealth::Healthy
    }
}

/// Nexus runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Shared metrics.
    metrics: Arc<NexusMetrics>,

    /// Heartbeat monitor.
    monitor: Arc<Monitor>,

    /// Concurrency ledger fed by the monitor.
    ledger: Arc<OnlineStat>,

    /// Admission gate over monitor and ledger.
    gate: AdmissionGate,

    /// Runtime health status.
    health: RuntimeHealth,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,

    /// Periodic summary task.
    reporter: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let metrics = Arc::new(NexusMetrics::new());
        let monitor = Arc::new(Monitor::with_metrics(
            config.monitor_config(),
            metrics.clone(),
        ));
        let ledger = Arc::new(OnlineStat::with_metrics(metrics.clone()));
        monitor.set_collector(ledger.clone());
        let gate = AdmissionGate::new(
            monitor.clone(),
            ledger.clone(),
            LeasePolicy::from(&config.admission),
            metrics.clone(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            metrics,
            monitor,
            ledger,
            gate,
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            reporter: None,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<NexusMetrics> {
        &self.metrics
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn ledger(&self) -> &Arc<OnlineStat> {
        &self.ledger
    }

    /// Admission gate for request handlers.
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Get the current health status.
    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Current liveness summary.
    pub fn summary(&self) -> LivenessSummary {
        summarize(&self.monitor, &self.ledger)
    }

    /// Start the monitor and the periodic reporter.
    pub async fn start(&mut self) -> Result<()> {
        let monitor_config = self.monitor.config();
        tracing::info!(
            cleanup_interval_secs = monitor_config.cleanup_interval.as_secs(),
            max_offline_secs = monitor_config.max_offline.as_secs(),
            lease_secs = self.gate.policy().default.as_secs(),
            "starting Nexus runtime"
        );

        self.monitor.start();
        self.health.monitor = ComponentHealth::Healthy;

        let interval = Duration::from_secs(self.config.telemetry.report_interval_seconds);
        self.reporter = Some(tokio::spawn(report_loop(
            self.monitor.clone(),
            self.ledger.clone(),
            interval,
            self.shutdown_rx.clone(),
        )));
        self.health.reporter = ComponentHealth::Healthy;

        self.running.store(true, Ordering::Release);
        tracing::info!("Nexus runtime started");
        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for shutdown signal.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Run the runtime until Ctrl-C or a shutdown request.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => tracing::warn!("shutdown signal received (SIGINT)"),
                    Err(e) => tracing::error!(error = %e, "failed to listen for SIGINT"),
                }
            }
            _ = self.wait_for_shutdown() => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await
    }

    /// Stop all runtime components in reverse start order.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping Nexus runtime");
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        self.health.reporter = ComponentHealth::Stopping;
        if let Some(handle) = self.reporter.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "reporter task ended abnormally");
            }
        }
        self.health.reporter = ComponentHealth::Stopped;

        self.health.monitor = ComponentHealth::Stopping;
        self.monitor.stop().await;
        self.health.monitor = ComponentHealth::Stopped;

        let summary = self.summary();
        tracing::info!(
            tracked = summary.tracked,
            online = summary.online,
            heartbeats = summary.heartbeats,
            events_dropped = summary.events_dropped,
            "Nexus runtime stopped"
        );
        Ok(())
    }
}

fn summarize(monitor: &Monitor, ledger: &OnlineStat) -> LivenessSummary {
    let metrics = monitor.metrics();
    LivenessSummary {
        running: monitor.is_running(),
        tracked: monitor.tracked_count(),
        online: monitor.online_count(),
        offline: monitor.offline_count(),
        ledger_entries: ledger.len(),
        heartbeats: metrics.heartbeats(),
        events_dropped: metrics.events_dropped(),
    }
}

async fn report_loop(
    monitor: Arc<Monitor>,
    ledger: Arc<OnlineStat>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = crate::liveness::events::shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {
                let summary = summarize(&monitor, &ledger);
                tracing::info!(
                    tracked = summary.tracked,
                    online = summary.online,
                    offline = summary.offline,
                    ledger_entries = summary.ledger_entries,
                    heartbeats = summary.heartbeats,
                    events_dropped = summary.events_dropped,
                    "liveness summary"
                );
            }
        }
    }
}
