//! State-change events and their delivery.
//!
//! The monitor emits one [`StateChange`] per lifecycle transition onto a single
//! queue while it still holds its lock, so events for one node are queued in
//! the order they happened. A dedicated task drains the queue in FIFO order and
//! hands each event to the registered [`StateCollector`], one at a time.
//!
//! Emission never waits. With [`OverflowPolicy::Drop`] a full queue drops the
//! event; with [`OverflowPolicy::Grow`] the queue is unbounded.

use super::node::{NodeSnapshot, NodeState};
use crate::ops::observability::NexusMetrics;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Consumer of node lifecycle transitions.
///
/// Runs on the shared delivery task and must return promptly.
pub trait StateCollector: Send + Sync {
    /// Called once per transition, in emission order.
    fn on_state_change(&self, node: &NodeSnapshot, from: NodeState, to: NodeState);
}

/// What happens to an event when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Bounded queue; events that do not fit are dropped.
    #[default]
    Drop,
    /// Unbounded queue; nothing is dropped and memory grows with collector lag.
    Grow,
}

/// A single lifecycle transition.
#[derive(Debug, Clone)]
pub struct StateChange {
    /// Node as it was right after the transition.
    pub node: NodeSnapshot,
    /// Previous state.
    pub from: NodeState,
    /// New state.
    pub to: NodeState,
    /// When the monitor emitted the event.
    pub emitted_at: Instant,
}

/// Producer side of the event queue.
#[derive(Debug)]
pub enum EventSender {
    Bounded(mpsc::Sender<StateChange>),
    Unbounded(mpsc::UnboundedSender<StateChange>),
}

impl EventSender {
    /// Enqueue without waiting. Hands the event back if it was dropped.
    pub fn emit(&self, change: StateChange) -> Result<(), StateChange> {
        match self {
            Self::Bounded(tx) => tx.try_send(change).map_err(|e| e.into_inner()),
            Self::Unbounded(tx) => tx.send(change).map_err(|e| e.0),
        }
    }
}

/// Consumer side of the event queue.
#[derive(Debug)]
pub enum EventReceiver {
    Bounded(mpsc::Receiver<StateChange>),
    Unbounded(mpsc::UnboundedReceiver<StateChange>),
}

impl EventReceiver {
    async fn recv(&mut self) -> Option<StateChange> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<StateChange> {
        match self {
            Self::Bounded(rx) => rx.try_recv().ok(),
            Self::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// Create an event queue for the given policy.
pub fn event_queue(policy: OverflowPolicy, capacity: usize) -> (EventSender, EventReceiver) {
    match policy {
        OverflowPolicy::Drop => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (EventSender::Bounded(tx), EventReceiver::Bounded(rx))
        }
        OverflowPolicy::Grow => {
            let (tx, rx) = mpsc::unbounded_channel();
            (EventSender::Unbounded(tx), EventReceiver::Unbounded(rx))
        }
    }
}

/// Holder for the single active collector.
#[derive(Default)]
pub struct CollectorSlot {
    collector: RwLock<Option<Arc<dyn StateCollector>>>,
}

impl CollectorSlot {
    /// Install a collector, replacing any previous one.
    pub fn set(&self, collector: Arc<dyn StateCollector>) {
        *self.collector.write() = Some(collector);
    }

    /// Detach the current collector.
    pub fn clear(&self) {
        *self.collector.write() = None;
    }

    /// Current collector, if any.
    pub fn get(&self) -> Option<Arc<dyn StateCollector>> {
        self.collector.read().clone()
    }
}

impl std::fmt::Debug for CollectorSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorSlot")
            .field("attached", &self.collector.read().is_some())
            .finish()
    }
}

/// Resolve once shutdown has been requested or the signal sender is gone.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Delivery loop: forward queued events to the collector until shutdown.
///
/// Events already queued when shutdown is requested are still delivered.
pub(crate) async fn run_delivery(
    mut events: EventReceiver,
    collector: Arc<CollectorSlot>,
    metrics: Arc<NexusMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("event delivery loop started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            change = events.recv() => match change {
                Some(change) => deliver(&change, &collector, &metrics),
                None => {
                    tracing::debug!("event queue closed");
                    return;
                }
            },
        }
    }

    let mut drained = 0usize;
    while let Some(change) = events.try_recv() {
        deliver(&change, &collector, &metrics);
        drained += 1;
    }
    tracing::debug!(drained, "event delivery loop stopped");
}

fn deliver(change: &StateChange, collector: &CollectorSlot, metrics: &NexusMetrics) {
    metrics.record_delivery_lag(change.emitted_at.elapsed());
    if let Some(collector) = collector.get() {
        collector.on_state_change(&change.node, change.from, change.to);
    }
}
