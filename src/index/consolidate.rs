//! Delete consolidation.
//!
//! A consolidation pass integrates every tombstoned slot out of the graph:
//! each node that points at a tombstone is rewired to the pruned union of
//! its surviving neighbors and its tombstoned neighbors' surviving
//! neighbors, then the tombstoned slots are released back to the store.
//! Searches and inserts keep running throughout; only concurrent
//! consolidations exclude each other, via a try-lock that reports
//! [`ConsolidateStatus::LockFail`] to the caller instead of blocking.

use std::collections::HashSet;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::distance::{l2_squared, Element};

use super::prune::robust_prune;
use super::{BuildParams, DynamicIndex};

/// Outcome of a consolidation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidateStatus {
    /// The pass ran to completion and released the snapshot.
    Success,
    /// Another consolidation holds the lock; retry later.
    LockFail,
    /// A live node still pointed at a released slot after rewiring. This
    /// indicates a concurrency bug and is fatal to the caller.
    InconsistentCount,
}

/// Counts and timing from a consolidation attempt.
#[derive(Debug, Clone)]
pub struct ConsolidationReport {
    pub status: ConsolidateStatus,
    /// Points visible to search when the report was produced.
    pub active_points: usize,
    /// Capacity of the index, excluding frozen starts.
    pub max_points: usize,
    /// Free slots after the pass.
    pub empty_slots: usize,
    /// Slots returned to the free pool by this pass.
    pub slots_released: usize,
    /// Size of the tombstone snapshot the pass worked on.
    pub delete_set_size: usize,
    /// Wall-clock duration of the attempt.
    pub seconds: f64,
}

impl<T: Element> DynamicIndex<T> {
    /// Rewire the graph around all currently tombstoned slots and reclaim
    /// them. `params` supplies the pruning knobs and worker thread count,
    /// which may differ from the insertion parameters.
    pub fn consolidate_deletes(&self, params: &BuildParams) -> ConsolidationReport {
        let started = Instant::now();
        let Some(_guard) = self.consolidate_lock.try_lock() else {
            return self.report(ConsolidateStatus::LockFail, 0, 0, started);
        };

        let delete_set = self.tombstones.read().snapshot();
        let delete_count = delete_set.len();
        if delete_set.is_empty() {
            return self.report(ConsolidateStatus::Success, 0, 0, started);
        }

        // Slots reserved after this point carry no edges into the snapshot:
        // inserts filter their edges against the tombstone set, which
        // contains the snapshot until the release below.
        let occupied = self.store.occupied_slots();

        match rayon::ThreadPoolBuilder::new()
            .num_threads(params.num_threads)
            .build()
        {
            Ok(pool) => pool.install(|| self.rewire_all(&occupied, &delete_set, params)),
            Err(_) => self.rewire_all(&occupied, &delete_set, params),
        }

        let sound = occupied
            .par_iter()
            .filter(|&&p| !delete_set.contains(&p))
            .all(|&p| {
                self.graph
                    .neighbors(p)
                    .iter()
                    .all(|n| !delete_set.contains(n))
            });
        if !sound {
            warn!(
                deletes = delete_count,
                "live node still points into the delete set after rewiring"
            );
            return self.report(ConsolidateStatus::InconsistentCount, 0, delete_count, started);
        }

        {
            let mut tags = self.tags.lock();
            for &d in &delete_set {
                tags.remove_by_slot(d);
            }
        }
        if let Some(labels) = &self.labels {
            let mut labels = labels.write();
            for &d in &delete_set {
                labels.clear(d);
            }
        }
        for &d in &delete_set {
            self.graph.clear(d);
            self.store.free_slot(d);
        }
        self.tombstones.write().remove_all(&delete_set);

        let report = self.report(
            ConsolidateStatus::Success,
            delete_count,
            delete_count,
            started,
        );
        debug!(
            released = report.slots_released,
            active = report.active_points,
            empty = report.empty_slots,
            seconds = report.seconds,
            "consolidation finished"
        );
        report
    }

    fn rewire_all(&self, occupied: &[u32], delete_set: &HashSet<u32>, params: &BuildParams) {
        occupied.par_iter().for_each(|&p| {
            if delete_set.contains(&p) {
                return;
            }
            let nbrs = self.graph.neighbors(p);
            if !nbrs.iter().any(|n| delete_set.contains(n)) {
                return;
            }

            // Union of surviving neighbors and the survivors one hop behind
            // each tombstoned neighbor.
            let mut pool: HashSet<u32> = HashSet::with_capacity(nbrs.len() * 2);
            for &n in &nbrs {
                if delete_set.contains(&n) {
                    for &nn in &self.graph.neighbors(n) {
                        if nn != p && !delete_set.contains(&nn) {
                            pool.insert(nn);
                        }
                    }
                } else {
                    pool.insert(n);
                }
            }

            let pvec = self.store.vector(p);
            let mut candidates: Vec<(u32, f32)> = pool
                .into_iter()
                .map(|u| (u, l2_squared(pvec, self.store.vector(u))))
                .collect();
            let rewired = robust_prune(
                &self.store,
                p,
                &mut candidates,
                params.alpha,
                params.max_degree,
                params.max_occlusion,
                params.saturate_graph,
            );
            self.graph.set_neighbors(p, rewired);
        });
    }

    fn report(
        &self,
        status: ConsolidateStatus,
        slots_released: usize,
        delete_set_size: usize,
        started: Instant,
    ) -> ConsolidationReport {
        ConsolidationReport {
            status,
            active_points: self.live_points(),
            max_points: self.capacity(),
            empty_slots: self.empty_slots(),
            slots_released,
            delete_set_size,
            seconds: started.elapsed().as_secs_f64(),
        }
    }
}
