//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use nexus::core::config::Config;
use nexus::liveness::events::{OverflowPolicy, StateCollector};
use nexus::liveness::monitor::MonitorConfig;
use nexus::liveness::node::{NodeSnapshot, NodeState};
use parking_lot::Mutex;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    create_config("")
}

/// Create a configuration file with the given TOML body.
pub fn create_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Load a config from a temp file.
pub fn load_config(file: &NamedTempFile) -> Config {
    Config::from_file(file.path()).expect("Failed to load config")
}

/// Monitor settings matching the production defaults.
pub fn monitor_config() -> MonitorConfig {
    MonitorConfig {
        idle_poll: Duration::from_secs(1),
        cleanup_interval: Duration::from_secs(600),
        max_offline: Duration::from_secs(3_600),
        event_queue_capacity: 1_024,
        overflow_policy: OverflowPolicy::Drop,
    }
}

/// Composite node key.
pub fn node_key(product_id: u64, device: &str, license: &str) -> String {
    format!("{product_id}|{device}|{license}")
}

/// Let background tasks run. Under a paused clock this advances time by 1ms.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Collector that records every transition it sees.
#[derive(Debug, Default)]
pub struct RecordingCollector {
    events: Mutex<Vec<(String, NodeState, NodeState)>>,
}

impl RecordingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// All transitions so far, in delivery order.
    pub fn events(&self) -> Vec<(String, NodeState, NodeState)> {
        self.events.lock().clone()
    }

    /// Transitions seen for one key.
    pub fn events_for(&self, key: &str) -> Vec<(NodeState, NodeState)> {
        self.events
            .lock()
            .iter()
            .filter(|(k, _, _)| k == key)
            .map(|(_, from, to)| (*from, *to))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}

impl StateCollector for RecordingCollector {
    fn on_state_change(&self, node: &NodeSnapshot, from: NodeState, to: NodeState) {
        self.events.lock().push((node.key.clone(), from, to));
    }
}

/// Check if a snapshot list contains `key`.
pub fn contains_key(nodes: &[NodeSnapshot], key: &str) -> bool {
    nodes.iter().any(|n| n.key == key)
}

/// Assert that a result is Ok and return the value.
#[track_caller]
pub fn assert_ok<T, E: std::fmt::Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a result is Err.
#[track_caller]
pub fn assert_err<T: std::fmt::Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(v) => panic!("Expected Err, got Ok: {:?}", v),
        Err(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_minimal_config() {
        let file = create_minimal_config();
        let config = load_config(&file);
        assert_eq!(config.monitor.cleanup_interval_seconds, 600);
    }

    #[test]
    fn test_node_key() {
        assert_eq!(node_key(7, "dev", "LIC"), "7|dev|LIC");
    }

    #[test]
    fn test_recording_collector() {
        use nexus::liveness::node::TrackedNode;
        let collector = RecordingCollector::new();
        let node = TrackedNode::new("k", Duration::from_secs(1), tokio::time::Instant::now());
        collector.on_state_change(&node.snapshot(), NodeState::Init, NodeState::Online);
        assert_eq!(
            collector.events_for("k"),
            vec![(NodeState::Init, NodeState::Online)]
        );
    }

    #[test]
    fn test_assert_ok() {
        let result: Result<i32, &str> = Ok(42);
        assert_eq!(assert_ok(result), 42);
    }

    #[test]
    fn test_assert_err() {
        let result: Result<i32, &str> = Err("error");
        assert_eq!(assert_err(result), "error");
    }
}
