//! Metrics and liveness summaries.
//!
//! Metric namespaces:
//! - nexus.monitor.*
//! - nexus.ledger.*
//! - nexus.admission.*

use crate::liveness::node::NodeState;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metric names.
pub mod metrics {
    /// Heartbeats accepted by the monitor.
    pub const HEARTBEATS_TOTAL: &str = "nexus.monitor.heartbeats_total";
    /// Lifecycle transitions, suffixed with `.<from>_<to>`.
    pub const TRANSITIONS_TOTAL: &str = "nexus.monitor.transitions_total";
    /// State-change events dropped on a full queue.
    pub const EVENTS_DROPPED_TOTAL: &str = "nexus.monitor.events_dropped_total";
    /// Tracked (online or offline) nodes gauge.
    pub const TRACKED_NODES: &str = "nexus.monitor.tracked_nodes";
    /// Online nodes gauge.
    pub const ONLINE_NODES: &str = "nexus.monitor.online_nodes";
    /// Time from emission to delivery of a state change.
    pub const EVENT_DELIVERY_LAG_MS: &str = "nexus.monitor.event_delivery_lag_ms";
    /// Composite keys the ledger could not parse.
    pub const MALFORMED_KEYS_TOTAL: &str = "nexus.ledger.malformed_keys_total";
    /// Admitted requests.
    pub const ADMITTED_TOTAL: &str = "nexus.admission.admitted_total";
    /// Rejected requests, suffixed with `.<reason>`.
    pub const REJECTED_TOTAL: &str = "nexus.admission.rejected_total";
}

/// Metrics registry for Nexus.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, AtomicU64>>,
    gauges: RwLock<HashMap<String, AtomicU64>>,
    /// Histogram observations (count, sum, min, max).
    histograms: RwLock<HashMap<String, Mutex<HistogramData>>>,
}

impl MetricsRegistry {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    /// Add to a counter.
    pub fn counter_add(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Get counter value.
    pub fn counter_get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Set a gauge value.
    pub fn gauge_set(&self, name: &str, value: u64) {
        if let Some(gauge) = self.gauges.read().get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        self.gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value, Ordering::Relaxed);
    }

    /// Get gauge value.
    pub fn gauge_get(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, value: f64) {
        if let Some(data) = self.histograms.read().get(name) {
            data.lock().observe(value);
            return;
        }
        self.histograms
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Mutex::new(HistogramData::default()))
            .lock()
            .observe(value);
    }

    /// Get histogram data.
    pub fn histogram_get(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms.read().get(name).map(|h| h.lock().snapshot())
    }

    /// Export metrics in Prometheus text format, sorted by name.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        let counters: BTreeMap<String, u64> = self
            .counters
            .read()
            .iter()
            .map(|(name, value)| (prometheus_name(name), value.load(Ordering::Relaxed)))
            .collect();
        for (name, value) in counters {
            output.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
        }

        let gauges: BTreeMap<String, u64> = self
            .gauges
            .read()
            .iter()
            .map(|(name, value)| (prometheus_name(name), value.load(Ordering::Relaxed)))
            .collect();
        for (name, value) in gauges {
            output.push_str(&format!("# TYPE {name} gauge\n{name} {value}\n"));
        }

        let histograms: BTreeMap<String, HistogramSnapshot> = self
            .histograms
            .read()
            .iter()
            .map(|(name, data)| (prometheus_name(name), data.lock().snapshot()))
            .collect();
        for (name, snapshot) in histograms {
            output.push_str(&format!(
                "# TYPE {name} summary\n{name}_count {}\n{name}_sum {}\n",
                snapshot.count, snapshot.sum
            ));
        }

        output
    }
}

fn prometheus_name(name: &str) -> String {
    name.replace('.', "_")
}

#[derive(Debug, Clone, Copy)]
struct HistogramData {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Default for HistogramData {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }
}

impl HistogramData {
    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
        }
    }
}

/// Histogram snapshot.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of all observations.
    pub sum: f64,
    /// Minimum value observed.
    pub min: f64,
    /// Maximum value observed.
    pub max: f64,
}

impl HistogramSnapshot {
    /// Calculate mean.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Nexus-specific metrics collector, shared by the monitor, the ledger and
/// the admission gate.
#[derive(Debug, Default)]
pub struct NexusMetrics {
    registry: MetricsRegistry,
}

impl NexusMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the underlying registry.
    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    // === Monitor ===

    pub fn record_heartbeat(&self) {
        self.registry.counter_inc(metrics::HEARTBEATS_TOTAL);
    }

    pub fn record_transition(&self, from: NodeState, to: NodeState) {
        let metric = format!("{}.{}_{}", metrics::TRANSITIONS_TOTAL, from, to);
        self.registry.counter_inc(&metric);
    }

    pub fn record_event_dropped(&self) {
        self.registry.counter_inc(metrics::EVENTS_DROPPED_TOTAL);
    }

    pub fn set_tracked_nodes(&self, count: usize) {
        self.registry.gauge_set(metrics::TRACKED_NODES, count as u64);
    }

    pub fn set_online_nodes(&self, count: usize) {
        self.registry.gauge_set(metrics::ONLINE_NODES, count as u64);
    }

    pub fn record_delivery_lag(&self, lag: Duration) {
        self.registry
            .histogram_observe(metrics::EVENT_DELIVERY_LAG_MS, lag.as_secs_f64() * 1_000.0);
    }

    /// Heartbeats seen so far.
    pub fn heartbeats(&self) -> u64 {
        self.registry.counter_get(metrics::HEARTBEATS_TOTAL)
    }

    /// Transitions `from → to` seen so far.
    pub fn transitions(&self, from: NodeState, to: NodeState) -> u64 {
        let metric = format!("{}.{}_{}", metrics::TRANSITIONS_TOTAL, from, to);
        self.registry.counter_get(&metric)
    }

    /// Events dropped so far.
    pub fn events_dropped(&self) -> u64 {
        self.registry.counter_get(metrics::EVENTS_DROPPED_TOTAL)
    }

    // === Ledger ===

    pub fn record_malformed_key(&self) {
        self.registry.counter_inc(metrics::MALFORMED_KEYS_TOTAL);
    }

    pub fn malformed_keys(&self) -> u64 {
        self.registry.counter_get(metrics::MALFORMED_KEYS_TOTAL)
    }

    // === Admission ===

    pub fn record_admitted(&self) {
        self.registry.counter_inc(metrics::ADMITTED_TOTAL);
    }

    pub fn record_rejected(&self, reason: &str) {
        let metric = format!("{}.{}", metrics::REJECTED_TOTAL, reason);
        self.registry.counter_inc(&metric);
    }

    pub fn admitted(&self) -> u64 {
        self.registry.counter_get(metrics::ADMITTED_TOTAL)
    }

    pub fn rejected(&self, reason: &str) -> u64 {
        let metric = format!("{}.{}", metrics::REJECTED_TOTAL, reason);
        self.registry.counter_get(&metric)
    }

    /// Export all metrics.
    pub fn export(&self) -> String {
        self.registry.export_prometheus()
    }
}

/// Point-in-time liveness summary, logged periodically by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessSummary {
    /// Monitor background tasks running.
    pub running: bool,
    /// Nodes tracked by the monitor.
    pub tracked: usize,
    /// Nodes online.
    pub online: usize,
    /// Nodes offline awaiting removal.
    pub offline: usize,
    /// Identities in the concurrency ledger.
    pub ledger_entries: usize,
    /// Heartbeats accepted since start.
    pub heartbeats: u64,
    /// Events dropped since start.
    pub events_dropped: u64,
}

impl LivenessSummary {
    /// Check if the ledger agrees with the monitor's online count.
    ///
    /// They can drift while events are in flight or after a drop.
    pub fn is_settled(&self) -> bool {
        self.online == self.ledger_entries
    }
}
