//! Heartbeat monitor.
//!
//! The monitor owns every tracked node and drives it through
//! `Init → Online ⇄ Offline → Removed`. One mutex covers the key map, the node
//! arena and the expiry heap. Three background tasks run while the monitor is
//! started:
//!
//! - expiry loop: sleeps until the earliest lease deadline, re-checks it under
//!   the lock and marks lapsed nodes offline
//! - cleanup loop: every `cleanup_interval`, removes nodes that stayed offline
//!   for longer than `max_offline`
//! - delivery loop: forwards queued state changes to the collector
//!
//! No task holds the lock while sleeping. [`Monitor::stop`] signals all three
//! and waits for them to exit.

use super::events::{
    event_queue, run_delivery, shutdown_requested, CollectorSlot, EventReceiver, EventSender,
    OverflowPolicy, StateChange, StateCollector,
};
use super::heap::{Expiring, ExpiryHeap, NodeArena, NodeHandle};
use super::node::{NodeSnapshot, NodeState, TrackedNode};
use crate::ops::observability::NexusMetrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Monitor tuning.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Expiry loop sleep while no node is queued.
    pub idle_poll: Duration,
    /// Period of the stale-node cleanup loop.
    pub cleanup_interval: Duration,
    /// Retention window for offline nodes.
    pub max_offline: Duration,
    /// Event queue capacity (ignored by [`OverflowPolicy::Grow`]).
    pub event_queue_capacity: usize,
    /// Queue saturation behavior.
    pub overflow_policy: OverflowPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(600),
            max_offline: Duration::from_secs(3_600),
            event_queue_capacity: 1_024,
            overflow_policy: OverflowPolicy::Drop,
        }
    }
}

/// Key map, node storage and expiry order. Guarded by one lock.
#[derive(Debug, Default)]
struct NodeTable {
    by_key: HashMap<String, NodeHandle>,
    arena: NodeArena<TrackedNode>,
    heap: ExpiryHeap,
    online: usize,
    offline: usize,
}

impl NodeTable {
    fn count(&mut self, state: NodeState, delta: isize) {
        let counter = match state {
            NodeState::Online => &mut self.online,
            NodeState::Offline => &mut self.offline,
            NodeState::Init | NodeState::Removed => return,
        };
        *counter = counter.saturating_add_signed(delta);
    }

    fn snapshots(&self, state: NodeState) -> Vec<NodeSnapshot> {
        self.arena
            .iter()
            .filter(|(_, node)| node.state() == state)
            .map(|(_, node)| node.snapshot())
            .collect()
    }
}

/// State shared between the monitor handle and its background tasks.
#[derive(Debug)]
struct Shared {
    config: MonitorConfig,
    table: Mutex<NodeTable>,
    events: EventSender,
    collector: Arc<CollectorSlot>,
    metrics: Arc<NexusMetrics>,
    /// Wakes the expiry loop when a heartbeat puts a node at the heap root.
    root_changed: Notify,
    /// Set by `stop`; nothing drains the queue afterwards.
    closed: AtomicBool,
}

impl Shared {
    /// Apply a transition and queue its event. Caller holds the table lock.
    fn transition(
        &self,
        table: &mut NodeTable,
        handle: NodeHandle,
        to: NodeState,
        now: Instant,
    ) -> bool {
        let Some(node) = table.arena.get_mut(handle) else {
            return false;
        };
        let Some(from) = node.transition(to) else {
            tracing::debug!(key = %node.key(), from = %node.state(), %to, "ignored illegal transition");
            return false;
        };
        let snapshot = node.snapshot();
        table.count(from, -1);
        table.count(to, 1);
        self.metrics.record_transition(from, to);
        tracing::debug!(key = %snapshot.key, %from, %to, "node state changed");

        if self.closed.load(Ordering::Acquire) {
            return true;
        }
        let change = StateChange {
            node: snapshot,
            from,
            to,
            emitted_at: now,
        };
        if let Err(dropped) = self.events.emit(change) {
            self.metrics.record_event_dropped();
            tracing::warn!(key = %dropped.node.key, %from, %to, "state change event dropped");
        }
        true
    }

    fn publish_gauges(&self, table: &NodeTable) {
        self.metrics.set_tracked_nodes(table.arena.len());
        self.metrics.set_online_nodes(table.online);
    }

    fn heartbeat(&self, key: &str, timeout: Duration, now: Instant) {
        let mut guard = self.table.lock();
        let table = &mut *guard;

        let handle = match table.by_key.get(key).copied() {
            Some(handle) => {
                let Some(node) = table.arena.get_mut(handle) else {
                    return;
                };
                node.set_timeout(timeout);
                node.heartbeat(now);
                let recovering = node.state() == NodeState::Offline;
                // Offline nodes already left the heap; push re-queues them,
                // queued nodes are repositioned in place.
                table.heap.push(&mut table.arena, handle);
                if recovering {
                    self.transition(table, handle, NodeState::Online, now);
                }
                handle
            }
            None => {
                let handle = table.arena.insert(TrackedNode::new(key, timeout, now));
                table.by_key.insert(key.to_string(), handle);
                table.heap.push(&mut table.arena, handle);
                self.transition(table, handle, NodeState::Online, now);
                handle
            }
        };

        if table.heap.peek_min() == Some(handle) {
            self.root_changed.notify_one();
        }
        self.publish_gauges(table);
    }

    /// How long the expiry loop may sleep before the root needs checking.
    fn next_wait(&self, now: Instant) -> Duration {
        let table = self.table.lock();
        table
            .heap
            .peek_min()
            .and_then(|handle| table.arena.get(handle))
            .map(|node| node.remaining_at(now))
            .unwrap_or(self.config.idle_poll)
    }

    /// Mark every queued node whose lease has lapsed at `now` offline.
    ///
    /// Deadlines are re-read under the lock, so a node renewed while the
    /// expiry loop slept is left alone.
    fn expire_due(&self, now: Instant) -> usize {
        let mut guard = self.table.lock();
        let table = &mut *guard;

        let mut expired = 0;
        while let Some(handle) = table.heap.peek_min() {
            let due = table
                .arena
                .get(handle)
                .is_some_and(|node| node.is_expired_at(now));
            if !due {
                break;
            }
            table.heap.pop_min(&mut table.arena);
            if self.transition(table, handle, NodeState::Offline, now) {
                expired += 1;
            }
        }

        if expired > 0 {
            self.publish_gauges(table);
        }
        expired
    }

    /// Evict nodes offline for longer than the retention window.
    fn remove_stale(&self, now: Instant) -> usize {
        let mut guard = self.table.lock();
        let table = &mut *guard;
        let max_offline = self.config.max_offline;

        let stale: Vec<NodeHandle> = table
            .arena
            .iter()
            .filter(|(_, node)| {
                node.state() == NodeState::Offline
                    && now.saturating_duration_since(node.expires_at()) > max_offline
            })
            .map(|(handle, _)| handle)
            .collect();

        for &handle in &stale {
            table.heap.remove(&mut table.arena, handle);
            self.transition(table, handle, NodeState::Removed, now);
            if let Some(node) = table.arena.remove(handle) {
                table.by_key.remove(node.key());
            }
        }

        if !stale.is_empty() {
            self.publish_gauges(table);
        }
        stale.len()
    }
}

/// Handles of the running background tasks.
struct Tasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

enum Lifecycle {
    /// Constructed, not started yet. Holds the queue's consumer end.
    Ready(EventReceiver),
    Running(Tasks),
    Stopped,
}

/// Heartbeat lease monitor.
pub struct Monitor {
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    running: AtomicBool,
}

impl Monitor {
    /// Create a monitor with its own metrics.
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_metrics(config, Arc::new(NexusMetrics::new()))
    }

    /// Create a monitor recording into shared metrics.
    pub fn with_metrics(config: MonitorConfig, metrics: Arc<NexusMetrics>) -> Self {
        let (events, receiver) = event_queue(config.overflow_policy, config.event_queue_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                table: Mutex::new(NodeTable::default()),
                events,
                collector: Arc::new(CollectorSlot::default()),
                metrics,
                root_changed: Notify::new(),
                closed: AtomicBool::new(false),
            }),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::Ready(receiver)),
            running: AtomicBool::new(false),
        }
    }

    /// Monitor configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    /// Metrics this monitor records into.
    pub fn metrics(&self) -> &Arc<NexusMetrics> {
        &self.shared.metrics
    }

    /// Register or renew the lease for `key`.
    ///
    /// Never waits on I/O or on the collector. A new key goes `Init → Online`;
    /// a key tracked as offline goes back online; an online key only has its
    /// deadline moved. Leases too long to represent saturate to a far-future
    /// deadline.
    pub fn heartbeat(&self, key: &str, timeout: Duration) {
        self.shared.metrics.record_heartbeat();
        self.shared.heartbeat(key, timeout, Instant::now());
    }

    /// Attach the state-change collector, replacing any previous one.
    pub fn set_collector(&self, collector: Arc<dyn StateCollector>) {
        self.shared.collector.set(collector);
    }

    /// Detach the collector. Later events are delivered to nobody.
    pub fn clear_collector(&self) {
        self.shared.collector.clear();
    }

    /// Snapshot of all nodes currently online.
    pub fn get_online_nodes(&self) -> Vec<NodeSnapshot> {
        self.shared.table.lock().snapshots(NodeState::Online)
    }

    /// Snapshot of all nodes currently offline and not yet removed.
    pub fn get_offline_nodes(&self) -> Vec<NodeSnapshot> {
        self.shared.table.lock().snapshots(NodeState::Offline)
    }

    /// Snapshot of a single node.
    pub fn get_node(&self, key: &str) -> Option<NodeSnapshot> {
        let table = self.shared.table.lock();
        let handle = table.by_key.get(key)?;
        table.arena.get(*handle).map(TrackedNode::snapshot)
    }

    /// Number of tracked (online or offline) nodes.
    pub fn tracked_count(&self) -> usize {
        self.shared.table.lock().arena.len()
    }

    /// Number of online nodes.
    pub fn online_count(&self) -> usize {
        self.shared.table.lock().online
    }

    /// Number of offline nodes awaiting removal.
    pub fn offline_count(&self) -> usize {
        self.shared.table.lock().offline
    }

    /// Check that the key map, arena and heap agree with each other.
    ///
    /// Exactly the online nodes are queued, every queued node knows its
    /// heap index, and the heap is ordered by deadline.
    pub fn is_consistent(&self) -> bool {
        let table = self.shared.table.lock();
        let keys_match = table.by_key.len() == table.arena.len()
            && table.by_key.iter().all(|(key, handle)| {
                table.arena.get(*handle).is_some_and(|node| node.key() == key)
            });
        let queued_match = table.arena.iter().all(|(_, node)| {
            (node.state() == NodeState::Online) == node.heap_index().is_some()
        });
        keys_match
            && queued_match
            && table.heap.len() == table.online
            && table.heap.is_consistent(&table.arena)
    }

    /// Check if the background tasks are running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the expiry, cleanup and delivery tasks.
    ///
    /// Must be called from within a Tokio runtime. A monitor runs at most
    /// once; later calls are logged and ignored.
    pub fn start(&self) {
        let Ok(mut lifecycle) = self.lifecycle.try_lock() else {
            tracing::warn!("monitor start ignored: shutdown in progress");
            return;
        };
        let events = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Ready(events) => events,
            Lifecycle::Running(tasks) => {
                *lifecycle = Lifecycle::Running(tasks);
                tracing::warn!("monitor start ignored: already running");
                return;
            }
            Lifecycle::Stopped => {
                tracing::warn!("monitor start ignored: monitor was stopped");
                return;
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handles = vec![
            tokio::spawn(expiry_loop(self.shared.clone(), shutdown_rx.clone())),
            tokio::spawn(cleanup_loop(self.shared.clone(), shutdown_rx.clone())),
            tokio::spawn(run_delivery(
                events,
                self.shared.collector.clone(),
                self.shared.metrics.clone(),
                shutdown_rx,
            )),
        ];
        *lifecycle = Lifecycle::Running(Tasks { shutdown, handles });
        self.running.store(true, Ordering::Release);

        tracing::info!(
            cleanup_interval_secs = self.shared.config.cleanup_interval.as_secs(),
            max_offline_secs = self.shared.config.max_offline.as_secs(),
            overflow_policy = ?self.shared.config.overflow_policy,
            "monitor started"
        );
    }

    /// Signal the background tasks and wait for all of them to exit.
    ///
    /// Idempotent; concurrent callers all return after the tasks are gone.
    /// Events already queued are still delivered. Later heartbeats keep
    /// updating the node table but emit no events.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.shared.closed.store(true, Ordering::Release);
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(tasks) => {
                tracing::info!("stopping monitor");
                let _ = tasks.shutdown.send(true);
                for handle in tasks.handles {
                    if let Err(e) = handle.await {
                        tracing::warn!(error = %e, "monitor task ended abnormally");
                    }
                }
                self.running.store(false, Ordering::Release);
                tracing::info!("monitor stopped");
            }
            Lifecycle::Ready(_) => {
                tracing::debug!("monitor stopped before it was started");
            }
            Lifecycle::Stopped => {}
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Ok(lifecycle) = self.lifecycle.try_lock() {
            if let Lifecycle::Running(tasks) = &*lifecycle {
                let _ = tasks.shutdown.send(true);
            }
        }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn expiry_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!("expiry loop started");
    loop {
        let wait = shared.next_wait(Instant::now());
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = shared.root_changed.notified() => {}
            _ = tokio::time::sleep(wait) => {}
        }
        let expired = shared.expire_due(Instant::now());
        if expired > 0 {
            tracing::debug!(expired, "leases lapsed");
        }
    }
    tracing::debug!("expiry loop stopped");
}

async fn cleanup_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!("cleanup loop started");
    let mut ticker = tokio::time::interval(shared.config.cleanup_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {
                let removed = shared.remove_stale(Instant::now());
                if removed > 0 {
                    tracing::info!(removed, "removed stale offline nodes");
                }
            }
        }
    }
    tracing::debug!("cleanup loop stopped");
}

static GLOBAL: OnceLock<Monitor> = OnceLock::new();

/// Process-wide default monitor, built with [`MonitorConfig::default`] on
/// first use.
///
/// Optional convenience; it still has to be started like any other monitor.
pub fn global() -> &'static Monitor {
    GLOBAL.get_or_init(|| Monitor::new(MonitorConfig::default()))
}
