//! Liveness core tests: expiry heap, monitor lifecycle and the concurrency ledger.

mod common;

use common::{contains_key, monitor_config, node_key, settle, RecordingCollector};
use nexus::liveness::events::OverflowPolicy;
use nexus::liveness::heap::{Expiring, ExpiryHeap, NodeArena, NodeHandle};
use nexus::liveness::monitor::{self, Monitor, MonitorConfig};
use nexus::liveness::node::{NodeState, TrackedNode};
use nexus::liveness::stat::OnlineStat;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const MINUTE: Duration = Duration::from_secs(60);

fn started_monitor(config: MonitorConfig) -> (Arc<Monitor>, Arc<RecordingCollector>) {
    let monitor = Arc::new(Monitor::new(config));
    let collector = Arc::new(RecordingCollector::new());
    monitor.set_collector(collector.clone());
    monitor.start();
    (monitor, collector)
}

// ============================================================================
// Expiry heap
// ============================================================================

#[derive(Debug, Clone)]
enum HeapOp {
    Insert(u64),
    Renew(usize, u64),
    PopMin,
    Remove(usize),
}

fn heap_op() -> impl Strategy<Value = HeapOp> {
    prop_oneof![
        3 => (0u64..10_000).prop_map(HeapOp::Insert),
        3 => (any::<usize>(), 0u64..10_000).prop_map(|(i, ms)| HeapOp::Renew(i, ms)),
        1 => Just(HeapOp::PopMin),
        1 => any::<usize>().prop_map(HeapOp::Remove),
    ]
}

fn min_queued(arena: &NodeArena<TrackedNode>, heap: &ExpiryHeap) -> Option<Instant> {
    heap.handles()
        .iter()
        .filter_map(|h| arena.get(*h))
        .map(|n| n.expires_at())
        .min()
}

proptest! {
    #[test]
    fn heap_root_is_always_earliest(ops in prop::collection::vec(heap_op(), 1..200)) {
        let base = Instant::now();
        let mut arena = NodeArena::new();
        let mut heap = ExpiryHeap::new();
        let mut handles: Vec<NodeHandle> = Vec::new();

        for (i, op) in ops.into_iter().enumerate() {
            match op {
                HeapOp::Insert(ms) => {
                    let node = TrackedNode::new(format!("n{i}"), Duration::from_millis(ms), base);
                    let handle = arena.insert(node);
                    heap.push(&mut arena, handle);
                    handles.push(handle);
                }
                HeapOp::Renew(pick, ms) if !handles.is_empty() => {
                    let handle = handles[pick % handles.len()];
                    if let Some(node) = arena.get_mut(handle) {
                        node.heartbeat(base + Duration::from_millis(ms));
                    }
                    // Re-queues popped nodes, repositions queued ones.
                    heap.push(&mut arena, handle);
                }
                HeapOp::PopMin => {
                    let expected = min_queued(&arena, &heap);
                    let popped = heap.pop_min(&mut arena);
                    let popped_at = popped.and_then(|h| arena.get(h)).map(|n| n.expires_at());
                    prop_assert_eq!(popped_at, expected);
                    if let Some(h) = popped {
                        prop_assert_eq!(arena.get(h).and_then(|n| n.heap_index()), None);
                    }
                }
                HeapOp::Remove(pick) if !handles.is_empty() => {
                    let handle = handles.swap_remove(pick % handles.len());
                    heap.remove(&mut arena, handle);
                    prop_assert!(arena.remove(handle).is_some());
                }
                _ => {}
            }

            prop_assert!(heap.is_consistent(&arena));
            let root = heap.peek_min().and_then(|h| arena.get(h)).map(|n| n.expires_at());
            prop_assert_eq!(root, min_queued(&arena, &heap));
        }
    }

    #[test]
    fn heap_drains_in_deadline_order(deadlines in prop::collection::vec(0u64..100_000, 0..100)) {
        let base = Instant::now();
        let mut arena = NodeArena::new();
        let mut heap = ExpiryHeap::new();
        for (i, ms) in deadlines.iter().enumerate() {
            let handle = arena.insert(TrackedNode::new(i.to_string(), Duration::from_millis(*ms), base));
            heap.push(&mut arena, handle);
        }

        let mut drained = Vec::new();
        while let Some(handle) = heap.pop_min(&mut arena) {
            drained.push(arena.get(handle).map(|n| n.expires_at()));
        }
        let mut expected: Vec<_> = deadlines.iter().map(|ms| Some(base + Duration::from_millis(*ms))).collect();
        expected.sort();
        prop_assert_eq!(drained, expected);
    }
}

// ============================================================================
// Monitor scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn lapsed_lease_goes_offline() {
    let (monitor, collector) = started_monitor(monitor_config());
    monitor.heartbeat("A", MINUTE);

    sleep(Duration::from_secs(61)).await;

    assert!(contains_key(&monitor.get_offline_nodes(), "A"));
    assert!(!contains_key(&monitor.get_online_nodes(), "A"));
    assert_eq!(
        collector.events_for("A"),
        vec![
            (NodeState::Init, NodeState::Online),
            (NodeState::Online, NodeState::Offline)
        ]
    );
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn never_expires_before_deadline() {
    let (monitor, _collector) = started_monitor(monitor_config());
    let timeout = Duration::from_secs(10);
    monitor.heartbeat("A", timeout);

    sleep(timeout - Duration::from_millis(5)).await;
    assert_eq!(monitor.get_node("A").unwrap().state, NodeState::Online);

    sleep(Duration::from_millis(10)).await;
    assert_eq!(monitor.get_node("A").unwrap().state, NodeState::Offline);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn renewal_defers_expiry() {
    let (monitor, collector) = started_monitor(monitor_config());
    let start = Instant::now();
    monitor.heartbeat("A", MINUTE);

    sleep(Duration::from_secs(30)).await;
    monitor.heartbeat("A", MINUTE);
    let node = monitor.get_node("A").unwrap();
    assert_eq!(node.expires_at, node.last_heartbeat + MINUTE);
    assert!(node.expires_at >= start + Duration::from_secs(90));

    sleep(Duration::from_secs(31)).await;
    assert!(contains_key(&monitor.get_online_nodes(), "A"));

    sleep(Duration::from_secs(30)).await;
    assert!(contains_key(&monitor.get_offline_nodes(), "A"));
    assert_eq!(collector.events_for("A").len(), 2);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn shorter_lease_wakes_expiry_loop() {
    let (monitor, _collector) = started_monitor(monitor_config());
    monitor.heartbeat("long", Duration::from_secs(3_600));
    settle().await;

    // The loop is sleeping toward the hour-long deadline.
    monitor.heartbeat("short", Duration::from_secs(5));
    sleep(Duration::from_secs(6)).await;

    assert_eq!(monitor.get_node("short").unwrap().state, NodeState::Offline);
    assert_eq!(monitor.get_node("long").unwrap().state, NodeState::Online);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn heartbeat_recovers_offline_node() {
    let (monitor, collector) = started_monitor(monitor_config());
    monitor.heartbeat("A", Duration::from_secs(10));
    sleep(Duration::from_secs(11)).await;
    assert!(contains_key(&monitor.get_offline_nodes(), "A"));

    monitor.heartbeat("A", Duration::from_secs(10));
    assert!(contains_key(&monitor.get_online_nodes(), "A"));
    assert!(monitor.get_offline_nodes().is_empty());
    assert!(monitor.is_consistent());

    settle().await;
    assert_eq!(
        collector.events_for("A"),
        vec![
            (NodeState::Init, NodeState::Online),
            (NodeState::Online, NodeState::Offline),
            (NodeState::Offline, NodeState::Online)
        ]
    );

    // The recovered node is queued again and lapses again.
    sleep(Duration::from_secs(11)).await;
    assert!(contains_key(&monitor.get_offline_nodes(), "A"));
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn offline_nodes_removed_after_retention() {
    let (monitor, collector) = started_monitor(monitor_config());
    monitor.heartbeat("A", Duration::from_secs(1));

    sleep(Duration::from_secs(65 * 60)).await;
    assert!(contains_key(&monitor.get_offline_nodes(), "A"));

    sleep(Duration::from_secs(6 * 60)).await;
    assert!(monitor.get_offline_nodes().is_empty());
    assert!(monitor.get_online_nodes().is_empty());
    assert_eq!(monitor.tracked_count(), 0);
    assert_eq!(
        collector.events_for("A"),
        vec![
            (NodeState::Init, NodeState::Online),
            (NodeState::Online, NodeState::Offline),
            (NodeState::Offline, NodeState::Removed)
        ]
    );
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn removed_key_starts_a_new_lifecycle() {
    let config = MonitorConfig {
        cleanup_interval: Duration::from_secs(10),
        max_offline: Duration::from_secs(5),
        ..monitor_config()
    };
    let (monitor, collector) = started_monitor(config);
    monitor.heartbeat("A", Duration::from_secs(1));
    sleep(Duration::from_secs(21)).await;
    assert!(monitor.get_node("A").is_none());

    monitor.heartbeat("A", Duration::from_secs(60));
    settle().await;
    let events = collector.events_for("A");
    assert_eq!(events.len(), 4);
    assert_eq!(events[3], (NodeState::Init, NodeState::Online));
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn online_nodes_survive_cleanup() {
    let config = MonitorConfig {
        cleanup_interval: Duration::from_secs(10),
        max_offline: Duration::from_secs(5),
        ..monitor_config()
    };
    let (monitor, _collector) = started_monitor(config);
    for _ in 0..10 {
        monitor.heartbeat("A", Duration::from_secs(15));
        sleep(Duration::from_secs(10)).await;
    }
    assert!(contains_key(&monitor.get_online_nodes(), "A"));
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn ledger_counts_concurrent_sessions() {
    let monitor = Monitor::new(monitor_config());
    let ledger = Arc::new(OnlineStat::new());
    monitor.set_collector(ledger.clone());
    monitor.start();

    let a = node_key(1, "dev-a", "LIC");
    let b = node_key(1, "dev-b", "LIC");
    monitor.heartbeat(&a, Duration::from_secs(10));
    monitor.heartbeat(&b, Duration::from_secs(20));
    settle().await;
    assert_eq!(ledger.get_concurrent_count("LIC", 1), 2);
    assert_eq!(ledger.get_concurrent_count("LIC", 2), 0);

    sleep(Duration::from_secs(11)).await;
    assert_eq!(ledger.get_concurrent_count("LIC", 1), 1);
    assert!(!ledger.is_online(&a));
    assert!(ledger.is_online(&b));

    monitor.heartbeat(&a, Duration::from_secs(10));
    settle().await;
    assert_eq!(ledger.get_concurrent_count("LIC", 1), 2);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn ledger_skips_malformed_keys() {
    let monitor = Monitor::new(monitor_config());
    let ledger = Arc::new(OnlineStat::with_metrics(monitor.metrics().clone()));
    monitor.set_collector(ledger.clone());
    monitor.start();

    monitor.heartbeat("not-a-composite-key", MINUTE);
    monitor.heartbeat(&node_key(3, "d", "L"), MINUTE);
    settle().await;

    assert_eq!(monitor.online_count(), 2);
    assert_eq!(ledger.len(), 1);
    assert_eq!(monitor.metrics().malformed_keys(), 1);
    monitor.stop().await;
}

// ============================================================================
// Event queue
// ============================================================================

#[tokio::test]
async fn full_queue_drops_events_without_blocking() {
    let config = MonitorConfig {
        event_queue_capacity: 2,
        overflow_policy: OverflowPolicy::Drop,
        ..monitor_config()
    };
    let monitor = Monitor::new(config);
    for i in 0..5 {
        monitor.heartbeat(&format!("k{i}"), MINUTE);
    }
    assert_eq!(monitor.online_count(), 5);
    assert_eq!(monitor.metrics().events_dropped(), 3);

    let collector = Arc::new(RecordingCollector::new());
    monitor.set_collector(collector.clone());
    monitor.start();
    monitor.stop().await;
    assert_eq!(collector.len(), 2);
}

#[tokio::test]
async fn grow_policy_keeps_every_event() {
    let config = MonitorConfig {
        event_queue_capacity: 1,
        overflow_policy: OverflowPolicy::Grow,
        ..monitor_config()
    };
    let monitor = Monitor::new(config);
    for i in 0..100 {
        monitor.heartbeat(&format!("k{i}"), MINUTE);
    }
    assert_eq!(monitor.metrics().events_dropped(), 0);

    let collector = Arc::new(RecordingCollector::new());
    monitor.set_collector(collector.clone());
    monitor.start();
    monitor.stop().await;
    assert_eq!(collector.len(), 100);
}

#[tokio::test(start_paused = true)]
async fn events_for_one_node_arrive_in_order() {
    let (monitor, collector) = started_monitor(monitor_config());
    for _ in 0..5 {
        monitor.heartbeat("A", Duration::from_secs(1));
        sleep(Duration::from_secs(2)).await;
    }
    monitor.stop().await;

    let events = collector.events_for("A");
    assert_eq!(events.len(), 10);
    assert_eq!(events[0], (NodeState::Init, NodeState::Online));
    for pair in events.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "transition chain broken: {events:?}");
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn stop_is_idempotent_and_concurrent_safe() {
    let (monitor, _collector) = started_monitor(monitor_config());
    assert!(monitor.is_running());

    tokio::join!(monitor.stop(), monitor.stop(), monitor.stop());
    assert!(!monitor.is_running());
    monitor.stop().await;

    // A stopped monitor does not restart.
    monitor.start();
    assert!(!monitor.is_running());
}

#[tokio::test]
async fn stop_before_start_is_a_no_op() {
    let monitor = Monitor::new(monitor_config());
    monitor.stop().await;
    assert!(!monitor.is_running());
    monitor.heartbeat("A", MINUTE);
    assert_eq!(monitor.online_count(), 1);
}

#[tokio::test]
async fn second_start_is_ignored() {
    let (monitor, _collector) = started_monitor(monitor_config());
    monitor.start();
    assert!(monitor.is_running());
    monitor.stop().await;
}

#[tokio::test]
async fn heartbeats_after_stop_emit_nothing() {
    let config = MonitorConfig {
        overflow_policy: OverflowPolicy::Grow,
        ..monitor_config()
    };
    let (monitor, collector) = started_monitor(config);
    monitor.heartbeat("A", MINUTE);
    monitor.stop().await;
    assert_eq!(collector.len(), 1);

    for i in 0..50 {
        monitor.heartbeat(&format!("k{i}"), MINUTE);
    }
    assert_eq!(monitor.online_count(), 51);
    assert_eq!(monitor.metrics().events_dropped(), 0);
    assert_eq!(collector.len(), 1);
    assert!(monitor.is_consistent());
}

#[test]
fn oversized_lease_is_accepted() {
    let monitor = Monitor::new(monitor_config());
    monitor.heartbeat("1|d|L", Duration::MAX);
    monitor.heartbeat("1|d|L", Duration::from_secs(u64::MAX));
    monitor.heartbeat("2|d|L", MINUTE);

    let node = monitor.get_node("1|d|L").unwrap();
    assert_eq!(node.state, NodeState::Online);
    assert!(node.expires_at > node.last_heartbeat);
    assert!(monitor.is_consistent());
}

#[test]
fn global_monitor_is_shared() {
    let a = monitor::global() as *const Monitor;
    let b = monitor::global() as *const Monitor;
    assert_eq!(a, b);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_heartbeats_keep_heap_consistent() {
    let monitor = Arc::new(Monitor::new(monitor_config()));
    monitor.start();

    let mut tasks = Vec::new();
    for t in 0..32u64 {
        let monitor = monitor.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..50u64 {
                let key = node_key(t, &format!("dev-{i}"), "LIC");
                let timeout = Duration::from_secs(600 + (t * 50 + i) % 97);
                monitor.heartbeat(&key, timeout);
                if i % 10 == 0 {
                    tokio::task::yield_now().await;
                }
                // Renew a few to force repositioning.
                if i % 7 == 0 {
                    monitor.heartbeat(&key, Duration::from_secs(700));
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(monitor.tracked_count(), 32 * 50);
    assert_eq!(monitor.online_count(), 32 * 50);
    assert!(monitor.is_consistent());
    monitor.stop().await;
}

#[test]
fn heap_index_cleared_after_removal() {
    let base = Instant::now();
    let mut arena = NodeArena::new();
    let mut heap = ExpiryHeap::new();
    let a = arena.insert(TrackedNode::new("a", Duration::from_secs(1), base));
    let b = arena.insert(TrackedNode::new("b", Duration::from_secs(2), base));
    heap.push(&mut arena, a);
    heap.push(&mut arena, b);

    assert!(heap.remove(&mut arena, a));
    assert!(!heap.remove(&mut arena, a));
    assert_eq!(arena.get(a).unwrap().heap_index(), None);
    assert_eq!(arena.get(b).unwrap().heap_index(), Some(0));
    assert!(heap.is_consistent(&arena));
}
