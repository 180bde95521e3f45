//! Concurrency ledger.
//!
//! [`OnlineStat`] listens to monitor transitions and keeps the set of
//! currently-online `(product, device, license)` identities, keyed by the raw
//! composite key. Admission control asks it how many sessions a license holds
//! for a product.

use super::events::StateCollector;
use super::node::{NodeSnapshot, NodeState};
use crate::core::error::{NexusError, NexusResult};
use crate::ops::observability::NexusMetrics;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Separator between the fields of a composite key.
pub const KEY_SEPARATOR: char = '|';

/// Parsed composite key: `"<productID>|<deviceCode>|<licenseKey>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OnlineIdentity {
    pub product_id: u64,
    pub device_code: String,
    pub license_key: String,
}

impl OnlineIdentity {
    pub fn new(
        product_id: u64,
        device_code: impl Into<String>,
        license_key: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            device_code: device_code.into(),
            license_key: license_key.into(),
        }
    }

    /// Parse a composite key. Exactly three fields; the first is a decimal
    /// product ID with no sign.
    pub fn parse(key: &str) -> NexusResult<Self> {
        let parts: Vec<&str> = key.split(KEY_SEPARATOR).collect();
        let [product, device, license] = parts.as_slice() else {
            return Err(NexusError::invalid_key(
                key,
                format!("expected 3 fields, found {}", parts.len()),
            ));
        };
        if product.is_empty() || !product.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NexusError::invalid_key(key, "product id must be decimal digits"));
        }
        let product_id = product
            .parse::<u64>()
            .map_err(|e| NexusError::invalid_key(key, format!("invalid product id: {e}")))?;
        Ok(Self::new(product_id, *device, *license))
    }

    /// Composite key for this identity.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OnlineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.product_id,
            self.device_code,
            self.license_key,
            sep = KEY_SEPARATOR
        )
    }
}

/// Set of online identities, fed by monitor state changes.
#[derive(Debug, Default)]
pub struct OnlineStat {
    online: Mutex<HashMap<String, OnlineIdentity>>,
    metrics: Option<Arc<NexusMetrics>>,
}

impl OnlineStat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that counts malformed keys into `metrics`.
    pub fn with_metrics(metrics: Arc<NexusMetrics>) -> Self {
        Self {
            online: Mutex::default(),
            metrics: Some(metrics),
        }
    }

    /// Record `key` as online. Malformed keys are logged and skipped.
    pub fn add_online(&self, key: &str) {
        match OnlineIdentity::parse(key) {
            Ok(identity) => {
                self.online.lock().insert(key.to_string(), identity);
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_malformed_key();
                }
                tracing::warn!(key, error = %e, "skipping malformed node key");
            }
        }
    }

    /// Forget `key`. Unknown keys are ignored.
    pub fn remove_online(&self, key: &str) {
        self.online.lock().remove(key);
    }

    /// Number of online nodes holding `license_key` for `product_id`.
    ///
    /// Counts over a copy so the ledger lock is held only for the clone.
    pub fn get_concurrent_count(&self, license_key: &str, product_id: u64) -> usize {
        let snapshot: Vec<OnlineIdentity> = self.online.lock().values().cloned().collect();
        snapshot
            .iter()
            .filter(|id| id.product_id == product_id && id.license_key == license_key)
            .count()
    }

    /// Composite keys online for `license_key`, across all products.
    pub fn online_keys_for_license(&self, license_key: &str) -> BTreeSet<String> {
        let snapshot: Vec<OnlineIdentity> = self.online.lock().values().cloned().collect();
        snapshot
            .into_iter()
            .filter(|id| id.license_key == license_key)
            .map(|id| id.key())
            .collect()
    }

    /// Check if `key` is currently recorded as online.
    pub fn is_online(&self, key: &str) -> bool {
        self.online.lock().contains_key(key)
    }

    /// Number of online identities.
    pub fn len(&self) -> usize {
        self.online.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateCollector for OnlineStat {
    fn on_state_change(&self, node: &NodeSnapshot, from: NodeState, to: NodeState) {
        match (from, to) {
            (NodeState::Init | NodeState::Offline, NodeState::Online) => {
                tracing::debug!(key = %node.key, %from, "node online");
                self.add_online(&node.key);
            }
            (NodeState::Online, NodeState::Offline) => {
                tracing::debug!(key = %node.key, "node offline");
                self.remove_online(&node.key);
            }
            // Normally a no-op; repairs the ledger when an offline event was dropped.
            (_, NodeState::Removed) => {
                tracing::debug!(key = %node.key, "node removed");
                self.remove_online(&node.key);
            }
            _ => {
                tracing::debug!(key = %node.key, %from, %to, "ignoring transition");
            }
        }
    }
}
