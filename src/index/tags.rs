//! External tag to internal slot mapping.

use std::collections::HashMap;

use crate::error::{IndexError, Result};

/// Bijection between user-visible tags and storage slots.
///
/// Tags are the stable identity of a point: slots are recycled by
/// consolidation, tags never are while the point is live. The registry is
/// mutated under a single lock held by the owning index.
#[derive(Debug, Default)]
pub struct TagRegistry {
    tag_to_slot: HashMap<u32, u32>,
    slot_to_tag: HashMap<u32, u32>,
}

impl TagRegistry {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            tag_to_slot: HashMap::with_capacity(n),
            slot_to_tag: HashMap::with_capacity(n),
        }
    }

    /// Register `tag -> slot`, rejecting tags that are already mapped.
    pub fn insert(&mut self, tag: u32, slot: u32) -> Result<()> {
        if self.tag_to_slot.contains_key(&tag) {
            return Err(IndexError::DuplicateTag(tag));
        }
        self.tag_to_slot.insert(tag, slot);
        self.slot_to_tag.insert(slot, tag);
        Ok(())
    }

    pub fn slot_of(&self, tag: u32) -> Option<u32> {
        self.tag_to_slot.get(&tag).copied()
    }

    pub fn tag_of(&self, slot: u32) -> Option<u32> {
        self.slot_to_tag.get(&slot).copied()
    }

    /// Drop the mapping for a slot, returning the tag it carried.
    pub fn remove_by_slot(&mut self, slot: u32) -> Option<u32> {
        let tag = self.slot_to_tag.remove(&slot)?;
        self.tag_to_slot.remove(&tag);
        Some(tag)
    }

    /// Number of mapped points.
    pub fn len(&self) -> usize {
        self.tag_to_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tag_to_slot.is_empty()
    }

    /// Snapshot of all mapped tags, unordered.
    pub fn tags(&self) -> Vec<u32> {
        self.tag_to_slot.keys().copied().collect()
    }

    /// Snapshot of `(tag, slot)` pairs, unordered.
    pub fn entries(&self) -> Vec<(u32, u32)> {
        self.tag_to_slot.iter().map(|(&t, &s)| (t, s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let mut reg = TagRegistry::default();
        reg.insert(7, 0).unwrap();
        reg.insert(9, 3).unwrap();
        assert_eq!(reg.slot_of(7), Some(0));
        assert_eq!(reg.tag_of(3), Some(9));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn duplicate_tag_rejected_and_state_unchanged() {
        let mut reg = TagRegistry::default();
        reg.insert(7, 0).unwrap();
        assert!(matches!(reg.insert(7, 1), Err(IndexError::DuplicateTag(7))));
        assert_eq!(reg.slot_of(7), Some(0));
        assert_eq!(reg.tag_of(1), None);
    }

    #[test]
    fn remove_by_slot_clears_both_directions() {
        let mut reg = TagRegistry::default();
        reg.insert(5, 2).unwrap();
        assert_eq!(reg.remove_by_slot(2), Some(5));
        assert_eq!(reg.slot_of(5), None);
        assert_eq!(reg.tag_of(2), None);
        assert_eq!(reg.remove_by_slot(2), None);
        // Slot and tag may now be reused.
        reg.insert(5, 2).unwrap();
    }
}
