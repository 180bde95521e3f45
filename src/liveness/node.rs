//! Tracked node records and the node lifecycle.
//!
//! A tracked node holds a heartbeat lease:
//! `key → TrackedNode{timeout, last_heartbeat, expires_at, state, heap_index}`
//! with `expires_at = last_heartbeat + timeout`, recomputed on every heartbeat.

use super::heap::Expiring;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Stand-in deadline for leases too long to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, saturating to a far-future instant on overflow.
fn lease_deadline(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Lifecycle state of a tracked node.
///
/// Legal transitions:
///
/// | From    | To      | Trigger                                   |
/// |---------|---------|-------------------------------------------|
/// | Init    | Online  | first heartbeat for an unknown key        |
/// | Online  | Offline | lease lapsed without renewal              |
/// | Offline | Online  | heartbeat for a key still tracked         |
/// | Offline | Removed | offline for longer than the retention     |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Created, not yet announced. Never observed outside the monitor.
    Init,
    /// Lease is current.
    Online,
    /// Lease lapsed; still queryable until removed.
    Offline,
    /// Evicted. Terminal.
    Removed,
}

impl NodeState {
    /// Check whether `self → to` is a legal lifecycle transition.
    pub fn can_transition_to(self, to: NodeState) -> bool {
        matches!(
            (self, to),
            (Self::Init, Self::Online)
                | (Self::Online, Self::Offline)
                | (Self::Offline, Self::Online)
                | (Self::Offline, Self::Removed)
        )
    }

    /// Lowercase name, used in logs and metric names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node liveness record owned by the monitor.
#[derive(Debug, Clone)]
pub struct TrackedNode {
    /// Caller-defined identity (`productID|deviceCode|licenseKey`).
    key: String,

    /// Lease duration.
    timeout: Duration,

    /// Instant of the latest heartbeat.
    last_heartbeat: Instant,

    /// Instant the lease lapses unless renewed.
    expires_at: Instant,

    /// Current lifecycle state.
    state: NodeState,

    /// Position in the expiry heap.
    heap_index: Option<usize>,
}

impl TrackedNode {
    /// Create a node in `Init` whose first lease starts at `now`.
    pub fn new(key: impl Into<String>, timeout: Duration, now: Instant) -> Self {
        Self {
            key: key.into(),
            timeout,
            last_heartbeat: now,
            expires_at: lease_deadline(now, timeout),
            state: NodeState::Init,
            heap_index: None,
        }
    }

    /// Node identity.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Lease duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Replace the lease duration. Takes effect at the next heartbeat.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Instant of the latest heartbeat.
    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Renew the lease from `now`.
    pub fn heartbeat(&mut self, now: Instant) {
        let expires_at = lease_deadline(now, self.timeout);
        self.last_heartbeat = now;
        self.expires_at = expires_at;
    }

    /// Check if the lease has lapsed at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left on the lease at `now`, zero once lapsed.
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    /// Move to `to`, returning the previous state.
    ///
    /// Illegal transitions leave the state untouched and return `None`.
    pub fn transition(&mut self, to: NodeState) -> Option<NodeState> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return None;
        }
        self.state = to;
        Some(from)
    }

    /// Point-in-time copy for callers outside the monitor.
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            key: self.key.clone(),
            timeout: self.timeout,
            last_heartbeat: self.last_heartbeat,
            expires_at: self.expires_at,
            state: self.state,
        }
    }
}

impl Expiring for TrackedNode {
    fn expires_at(&self) -> Instant {
        self.expires_at
    }

    fn heap_index(&self) -> Option<usize> {
        self.heap_index
    }

    fn set_heap_index(&mut self, index: Option<usize>) {
        self.heap_index = index;
    }
}

/// Copy of a tracked node's observable fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    /// Node identity.
    pub key: String,
    /// Lease duration.
    pub timeout: Duration,
    /// Instant of the latest heartbeat.
    pub last_heartbeat: Instant,
    /// Instant the lease lapses.
    pub expires_at: Instant,
    /// State at the time of the snapshot.
    pub state: NodeState,
}
