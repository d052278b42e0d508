//! Slot-based aligned vector storage.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::marker::PhantomData;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::distance::{aligned_dim, Element};
use crate::error::{IndexError, Result};

/// Fixed-capacity vector arena indexed by slot id.
///
/// Storage is a single allocation of `total_slots * aligned_dim` elements
/// with alignment of at least `8 * size_of::<T>()`, so distance kernels may
/// assume SIMD-friendly rows. The dimension is rounded up to a multiple of 8
/// and the padding stays zeroed, which keeps padded coordinates out of every
/// distance.
///
/// Slots `0..capacity` cycle through free -> reserved -> freed; the tail
/// `capacity..total_slots` is handed out once at construction (search entry
/// points) and never recycled.
///
/// # Slot protocol
///
/// `write` requires the caller to hold the unique reservation of the slot:
/// between `reserve_slot` and the moment the slot becomes reachable through
/// the graph or the tag registry, nothing else may touch it. Readers only
/// reach a slot through those structures, which are populated after the
/// write completes. `free_slot` may only be called once every live neighbor
/// list has been rewired away from the slot.
pub struct VectorStore<T> {
    data: NonNull<T>,
    layout: Layout,
    dim: usize,
    aligned_dim: usize,
    capacity: usize,
    total_slots: usize,
    free: Mutex<BinaryHeap<Reverse<u32>>>,
    _marker: PhantomData<T>,
}

// Readers and writers of the arena follow the slot protocol above; the free
// list has its own lock.
unsafe impl<T: Element> Send for VectorStore<T> {}
unsafe impl<T: Element> Sync for VectorStore<T> {}

impl<T: Element> VectorStore<T> {
    /// Allocate a store for `capacity` recyclable slots plus `extra_slots`
    /// permanent ones.
    pub fn new(dim: usize, capacity: usize, extra_slots: usize) -> Result<Self> {
        if dim == 0 {
            return Err(IndexError::InvalidParameter("dimension must be nonzero".into()));
        }
        if capacity == 0 {
            return Err(IndexError::InvalidParameter("capacity must be nonzero".into()));
        }
        let aligned = aligned_dim(dim);
        let total_slots = capacity + extra_slots;
        let elems = total_slots * aligned;
        let align = std::mem::align_of::<T>().max(8 * std::mem::size_of::<T>());
        let layout = Layout::from_size_align(elems * std::mem::size_of::<T>(), align)
            .map_err(|e| IndexError::InvalidParameter(format!("arena layout: {e}")))?;
        // Zeroed allocation: all-zero bytes are the zero value for every
        // supported element type, so padding starts out neutral.
        let raw = unsafe { alloc_zeroed(layout) };
        let data = NonNull::new(raw as *mut T)
            .ok_or_else(|| IndexError::InvalidParameter("arena allocation failed".into()))?;
        Ok(Self {
            data,
            layout,
            dim,
            aligned_dim: aligned,
            capacity,
            total_slots,
            free: Mutex::new((0..capacity as u32).map(Reverse).collect()),
            _marker: PhantomData,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn aligned_dim(&self) -> usize {
        self.aligned_dim
    }

    /// Number of recyclable slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_slots(&self) -> usize {
        self.total_slots
    }

    /// Pop the lowest free slot id.
    pub fn reserve_slot(&self) -> Result<u32> {
        match self.free.lock().pop() {
            Some(Reverse(slot)) => Ok(slot),
            None => Err(IndexError::Capacity(self.capacity)),
        }
    }

    /// Return a slot to the free pool. Legal only after consolidation has
    /// removed every edge into it.
    pub fn free_slot(&self, slot: u32) {
        debug_assert!((slot as usize) < self.capacity);
        self.free.lock().push(Reverse(slot));
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    /// Recyclable slots currently reserved (live or tombstoned).
    pub fn reserved(&self) -> usize {
        self.capacity - self.free_count()
    }

    /// Snapshot of every slot that currently holds a point, including the
    /// permanent tail.
    pub fn occupied_slots(&self) -> Vec<u32> {
        let free: HashSet<u32> = self.free.lock().iter().map(|r| r.0).collect();
        (0..self.total_slots as u32)
            .filter(|s| !free.contains(s))
            .collect()
    }

    /// Copy a vector into a slot, zeroing the padded tail.
    ///
    /// Accepts either `dim` elements or a pre-padded `aligned_dim` row.
    /// Caller must hold the slot reservation; see the type docs.
    pub fn write(&self, slot: u32, vector: &[T]) -> Result<()> {
        if vector.len() != self.dim && vector.len() != self.aligned_dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        debug_assert!((slot as usize) < self.total_slots);
        unsafe {
            let dst = self.data.as_ptr().add(slot as usize * self.aligned_dim);
            std::ptr::copy_nonoverlapping(vector.as_ptr(), dst, vector.len());
            let pad = self.aligned_dim - vector.len();
            if pad > 0 {
                std::ptr::write_bytes(dst.add(vector.len()), 0, pad);
            }
        }
        Ok(())
    }

    /// Borrow a stored row, `aligned_dim` elements long.
    #[inline]
    pub fn vector(&self, slot: u32) -> &[T] {
        debug_assert!((slot as usize) < self.total_slots);
        unsafe {
            std::slice::from_raw_parts(
                self.data.as_ptr().add(slot as usize * self.aligned_dim),
                self.aligned_dim,
            )
        }
    }
}

impl<T> Drop for VectorStore<T> {
    fn drop(&mut self) {
        if self.layout.size() > 0 {
            unsafe { dealloc(self.data.as_ptr() as *mut u8, self.layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_returns_lowest_free_slot() {
        let store = VectorStore::<f32>::new(4, 3, 0).unwrap();
        assert_eq!(store.reserve_slot().unwrap(), 0);
        assert_eq!(store.reserve_slot().unwrap(), 1);
        store.free_slot(0);
        assert_eq!(store.reserve_slot().unwrap(), 0);
        assert_eq!(store.reserve_slot().unwrap(), 2);
        assert!(matches!(store.reserve_slot(), Err(IndexError::Capacity(3))));
    }

    #[test]
    fn write_pads_with_zeros() {
        let store = VectorStore::<f32>::new(3, 2, 0).unwrap();
        assert_eq!(store.aligned_dim(), 8);
        let s = store.reserve_slot().unwrap();
        store.write(s, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(store.vector(s), &[1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn reused_slot_is_repadded() {
        let store = VectorStore::<u8>::new(2, 1, 0).unwrap();
        let s = store.reserve_slot().unwrap();
        store.write(s, &[9, 9, 9, 9, 9, 9, 9, 9]).unwrap();
        store.free_slot(s);
        let s = store.reserve_slot().unwrap();
        store.write(s, &[1, 2]).unwrap();
        assert_eq!(store.vector(s), &[1, 2, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn permanent_tail_is_not_reservable() {
        let store = VectorStore::<f32>::new(4, 1, 2).unwrap();
        assert_eq!(store.total_slots(), 3);
        assert_eq!(store.reserve_slot().unwrap(), 0);
        assert!(store.reserve_slot().is_err());
        // Tail slots are still writable/readable.
        store.write(1, &[1.0, 1.0, 1.0, 1.0]).unwrap();
        assert_eq!(&store.vector(1)[..4], &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let store = VectorStore::<f32>::new(4, 1, 0).unwrap();
        let s = store.reserve_slot().unwrap();
        assert!(matches!(
            store.write(s, &[1.0, 2.0]),
            Err(IndexError::DimensionMismatch { expected: 4, actual: 2 })
        ));
    }
}
