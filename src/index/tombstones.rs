//! Lazily deleted slots.
//!
//! Deletion in a proximity graph is expensive to do eagerly: removing a node
//! breaks edges and can disconnect regions. Instead a delete only marks the
//! slot here. Tombstoned slots keep their vector and neighbor list so that
//! traversal can still hop through them; they are merely excluded from
//! results. Consolidation later rewires the graph around the marked slots
//! and reclaims them in one batch.

use std::collections::HashSet;

/// Set of slots marked for deletion but not yet reclaimed.
///
/// Callers serialize access through the owning index's tombstone lock.
#[derive(Debug, Default)]
pub struct TombstoneSet {
    deleted: HashSet<u32>,
}

impl TombstoneSet {
    /// Mark a slot deleted. Returns `true` if it was newly marked.
    pub fn insert(&mut self, slot: u32) -> bool {
        self.deleted.insert(slot)
    }

    #[inline]
    pub fn contains(&self, slot: u32) -> bool {
        self.deleted.contains(&slot)
    }

    pub fn len(&self) -> usize {
        self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
    }

    /// Copy of the current set, used as a consolidation work list.
    pub fn snapshot(&self) -> HashSet<u32> {
        self.deleted.clone()
    }

    /// Remove every slot in `released` (called once those slots are freed).
    pub fn remove_all(&mut self, released: &HashSet<u32>) {
        for slot in released {
            self.deleted.remove(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marking_is_idempotent() {
        let mut ts = TombstoneSet::default();
        assert!(ts.insert(5));
        assert!(!ts.insert(5));
        assert!(ts.contains(5));
        assert_eq!(ts.len(), 1);
    }

    #[test]
    fn snapshot_then_remove_all() {
        let mut ts = TombstoneSet::default();
        ts.insert(1);
        ts.insert(2);
        let snap = ts.snapshot();
        // A delete arriving after the snapshot survives the removal.
        ts.insert(3);
        ts.remove_all(&snap);
        assert!(!ts.contains(1));
        assert!(!ts.contains(2));
        assert!(ts.contains(3));
    }
}
