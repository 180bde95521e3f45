//! Expiry heap.
//!
//! Tracked nodes live in a [`NodeArena`] and are addressed by [`NodeHandle`].
//! The [`ExpiryHeap`] orders handles by each node's absolute expiry instant so
//! the node that lapses first is always at the root. Every node records its own
//! position in the heap (see [`Expiring::heap_index`]), which makes repositioning
//! after a renewal and removal of an arbitrary node O(log n).
//!
//! Neither type is synchronized; callers hold the monitor's lock.

use tokio::time::Instant;

/// A value that can be ordered in an [`ExpiryHeap`].
pub trait Expiring {
    /// Absolute instant at which the value expires.
    fn expires_at(&self) -> Instant;

    /// Current position in the heap, or `None` when not queued.
    fn heap_index(&self) -> Option<usize>;

    /// Record a new heap position. Only the heap calls this.
    fn set_heap_index(&mut self, index: Option<usize>);
}

/// Stable handle to a node stored in a [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(usize);

impl NodeHandle {
    /// Arena slot this handle points at.
    pub fn slot(self) -> usize {
        self.0
    }
}

/// Slot storage for tracked nodes with free-slot reuse.
#[derive(Debug)]
pub struct NodeArena<N> {
    slots: Vec<Option<N>>,
    free: Vec<usize>,
    len: usize,
}

impl<N> NodeArena<N> {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Store a node and return its handle.
    pub fn insert(&mut self, node: N) -> NodeHandle {
        self.len += 1;
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                NodeHandle(slot)
            }
            None => {
                self.slots.push(Some(node));
                NodeHandle(self.slots.len() - 1)
            }
        }
    }

    /// Take a node out of the arena, freeing its slot.
    pub fn remove(&mut self, handle: NodeHandle) -> Option<N> {
        let node = self.slots.get_mut(handle.0)?.take()?;
        self.free.push(handle.0);
        self.len -= 1;
        Some(node)
    }

    /// Get a node by handle.
    pub fn get(&self, handle: NodeHandle) -> Option<&N> {
        self.slots.get(handle.0)?.as_ref()
    }

    /// Get a mutable node by handle.
    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut N> {
        self.slots.get_mut(handle.0)?.as_mut()
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the arena holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over all stored nodes.
    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &N)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, node)| node.as_ref().map(|n| (NodeHandle(slot), n)))
    }
}

impl<N> Default for NodeArena<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Binary min-heap of node handles ordered by expiry.
#[derive(Debug, Default)]
pub struct ExpiryHeap {
    order: Vec<NodeHandle>,
}

impl ExpiryHeap {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self { order: Vec::new() }
    }

    /// Number of queued nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Handle of the node that expires first.
    pub fn peek_min(&self) -> Option<NodeHandle> {
        self.order.first().copied()
    }

    /// Queued handles in heap order (root first).
    pub fn handles(&self) -> &[NodeHandle] {
        &self.order
    }

    /// Queue a node. A node that is already queued is repositioned instead.
    pub fn push<N: Expiring>(&mut self, arena: &mut NodeArena<N>, handle: NodeHandle) {
        let Some(node) = arena.get_mut(handle) else {
            return;
        };
        if node.heap_index().is_some() {
            self.fix(arena, handle);
            return;
        }
        let index = self.order.len();
        node.set_heap_index(Some(index));
        self.order.push(handle);
        self.sift_up(arena, index);
    }

    /// Restore heap order after a node's expiry changed in place.
    ///
    /// Handles both earlier and later deadlines. Unqueued nodes are ignored.
    pub fn fix<N: Expiring>(&mut self, arena: &mut NodeArena<N>, handle: NodeHandle) {
        let Some(index) = self.position(arena, handle) else {
            return;
        };
        if !self.sift_down(arena, index) {
            self.sift_up(arena, index);
        }
    }

    /// Remove and return the node that expires first.
    pub fn pop_min<N: Expiring>(&mut self, arena: &mut NodeArena<N>) -> Option<NodeHandle> {
        if self.order.is_empty() {
            return None;
        }
        Some(self.remove_at(arena, 0))
    }

    /// Remove an arbitrary node. Returns false if it was not queued.
    pub fn remove<N: Expiring>(&mut self, arena: &mut NodeArena<N>, handle: NodeHandle) -> bool {
        match self.position(arena, handle) {
            Some(index) => {
                self.remove_at(arena, index);
                true
            }
            None => false,
        }
    }

    /// Check heap order and that every queued node knows its true index.
    pub fn is_consistent<N: Expiring>(&self, arena: &NodeArena<N>) -> bool {
        self.order.iter().enumerate().all(|(index, handle)| {
            let Some(node) = arena.get(*handle) else {
                return false;
            };
            if node.heap_index() != Some(index) {
                return false;
            }
            if index == 0 {
                return true;
            }
            arena
                .get(self.order[(index - 1) / 2])
                .is_some_and(|parent| parent.expires_at() <= node.expires_at())
        })
    }

    /// Heap index of a node, validated against the backing array.
    fn position<N: Expiring>(&self, arena: &NodeArena<N>, handle: NodeHandle) -> Option<usize> {
        let index = arena.get(handle)?.heap_index()?;
        (self.order.get(index) == Some(&handle)).then_some(index)
    }

    fn remove_at<N: Expiring>(&mut self, arena: &mut NodeArena<N>, index: usize) -> NodeHandle {
        let removed = self.order.swap_remove(index);
        if let Some(node) = arena.get_mut(removed) {
            node.set_heap_index(None);
        }
        if index < self.order.len() {
            let moved = self.order[index];
            if let Some(node) = arena.get_mut(moved) {
                node.set_heap_index(Some(index));
            }
            if !self.sift_down(arena, index) {
                self.sift_up(arena, index);
            }
        }
        removed
    }

    fn less<N: Expiring>(&self, arena: &NodeArena<N>, i: usize, j: usize) -> bool {
        match (arena.get(self.order[i]), arena.get(self.order[j])) {
            (Some(a), Some(b)) => a.expires_at() < b.expires_at(),
            _ => false,
        }
    }

    fn swap<N: Expiring>(&mut self, arena: &mut NodeArena<N>, i: usize, j: usize) {
        self.order.swap(i, j);
        if let Some(node) = arena.get_mut(self.order[i]) {
            node.set_heap_index(Some(i));
        }
        if let Some(node) = arena.get_mut(self.order[j]) {
            node.set_heap_index(Some(j));
        }
    }

    fn sift_up<N: Expiring>(&mut self, arena: &mut NodeArena<N>, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.less(arena, index, parent) {
                break;
            }
            self.swap(arena, index, parent);
            index = parent;
        }
    }

    /// Returns true if the element moved down.
    fn sift_down<N: Expiring>(&mut self, arena: &mut NodeArena<N>, start: usize) -> bool {
        let len = self.order.len();
        let mut index = start;
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(arena, right, left) {
                right
            } else {
                left
            };
            if !self.less(arena, child, index) {
                break;
            }
            self.swap(arena, index, child);
            index = child;
        }
        index > start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Entry {
        expires_at: Instant,
        heap_index: Option<usize>,
    }

    impl Expiring for Entry {
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

    fn entry(base: Instant, secs: u64) -> Entry {
        Entry {
            expires_at: base + Duration::from_secs(secs),
            heap_index: None,
        }
    }

    #[test]
    fn pops_in_expiry_order() {
        let base = Instant::now();
        let mut arena = NodeArena::new();
        let mut heap = ExpiryHeap::new();

        for secs in [30, 10, 50, 20, 40] {
            let handle = arena.insert(entry(base, secs));
            heap.push(&mut arena, handle);
        }
        assert!(heap.is_consistent(&arena));

        let mut popped = Vec::new();
        while let Some(handle) = heap.pop_min(&mut arena) {
            let node = arena.get(handle).unwrap();
            assert_eq!(node.heap_index(), None);
            popped.push(node.expires_at() - base);
        }
        let secs: Vec<u64> = popped.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn fix_moves_renewed_root_down() {
        let base = Instant::now();
        let mut arena = NodeArena::new();
        let mut heap = ExpiryHeap::new();

        let first = arena.insert(entry(base, 1));
        let second = arena.insert(entry(base, 2));
        heap.push(&mut arena, first);
        heap.push(&mut arena, second);
        assert_eq!(heap.peek_min(), Some(first));

        arena.get_mut(first).unwrap().expires_at = base + Duration::from_secs(10);
        heap.fix(&mut arena, first);

        assert_eq!(heap.peek_min(), Some(second));
        assert!(heap.is_consistent(&arena));
    }

    #[test]
    fn fix_moves_shortened_node_up() {
        let base = Instant::now();
        let mut arena = NodeArena::new();
        let mut heap = ExpiryHeap::new();

        let handles: Vec<_> = (1..=7)
            .map(|secs| {
                let handle = arena.insert(entry(base, secs * 10));
                heap.push(&mut arena, handle);
                handle
            })
            .collect();

        let last = handles[6];
        arena.get_mut(last).unwrap().expires_at = base;
        heap.fix(&mut arena, last);

        assert_eq!(heap.peek_min(), Some(last));
        assert!(heap.is_consistent(&arena));
    }

    #[test]
    fn remove_arbitrary_node() {
        let base = Instant::now();
        let mut arena = NodeArena::new();
        let mut heap = ExpiryHeap::new();

        let handles: Vec<_> = [5, 3, 8, 1, 9, 2]
            .into_iter()
            .map(|secs| {
                let handle = arena.insert(entry(base, secs));
                heap.push(&mut arena, handle);
                handle
            })
            .collect();

        assert!(heap.remove(&mut arena, handles[2]));
        assert!(!heap.remove(&mut arena, handles[2]));
        assert_eq!(heap.len(), 5);
        assert_eq!(arena.get(handles[2]).unwrap().heap_index(), None);
        assert!(heap.is_consistent(&arena));
    }

    #[test]
    fn arena_reuses_freed_slots() {
        let base = Instant::now();
        let mut arena = NodeArena::new();

        let a = arena.insert(entry(base, 1));
        let b = arena.insert(entry(base, 2));
        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());

        let c = arena.insert(entry(base, 3));
        assert_eq!(c.slot(), a.slot());
        assert_eq!(arena.len(), 2);
        assert!(arena.get(b).is_some());
    }

    #[test]
    fn push_of_queued_node_repositions() {
        let base = Instant::now();
        let mut arena = NodeArena::new();
        let mut heap = ExpiryHeap::new();

        let a = arena.insert(entry(base, 5));
        let b = arena.insert(entry(base, 7));
        heap.push(&mut arena, a);
        heap.push(&mut arena, b);

        arena.get_mut(b).unwrap().expires_at = base;
        heap.push(&mut arena, b);

        assert_eq!(heap.len(), 2);
        assert_eq!(heap.peek_min(), Some(b));
    }
}
