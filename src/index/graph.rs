//! Directed proximity graph with per-node locking.

use parking_lot::RwLock;
use smallvec::SmallVec;

/// Adjacency list of one node. Inline capacity covers common degrees;
/// larger degrees spill to the heap.
pub type NeighborList = SmallVec<[u32; 32]>;

/// Bounded-degree directed graph keyed by slot id.
///
/// Every node carries its own lock, so neighbor replacement is atomic per
/// node: a concurrent reader observes either the old list or the new one,
/// never a mix. Nodes reference each other by slot id only, which makes the
/// (intentional) cycles of a proximity graph trivial to own.
pub struct ProximityGraph {
    nodes: Vec<RwLock<NeighborList>>,
    max_degree: usize,
}

impl ProximityGraph {
    pub fn new(total_slots: usize, max_degree: usize) -> Self {
        Self {
            nodes: (0..total_slots).map(|_| RwLock::new(NeighborList::new())).collect(),
            max_degree,
        }
    }

    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Snapshot of a node's neighbors.
    pub fn neighbors(&self, slot: u32) -> NeighborList {
        self.nodes[slot as usize].read().clone()
    }

    /// Atomically replace a node's neighbor list.
    ///
    /// The caller guarantees the list invariants: length bounded by the
    /// degree limit, no self-loop, no duplicates.
    pub fn set_neighbors(&self, slot: u32, list: NeighborList) {
        debug_assert!(list.len() <= self.max_degree);
        debug_assert!(!list.contains(&slot));
        *self.nodes[slot as usize].write() = list;
    }

    /// Add a reverse edge `slot -> target`.
    ///
    /// Returns `true` when the list now exceeds the degree limit and the
    /// caller must re-prune the node. Self-loops and duplicates are ignored.
    pub fn append_back_edge(&self, slot: u32, target: u32) -> bool {
        if slot == target {
            return false;
        }
        let mut list = self.nodes[slot as usize].write();
        if !list.contains(&target) {
            list.push(target);
        }
        list.len() > self.max_degree
    }

    /// Empty a node's neighbor list (slot release).
    pub fn clear(&self, slot: u32) {
        self.nodes[slot as usize].write().clear();
    }
}
