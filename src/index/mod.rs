//! Dynamic in-memory proximity-graph index.
//!
//! A bounded-degree directed graph over a slot-based vector store, built
//! and queried concurrently:
//!
//! - [`DynamicIndex::insert_point`] wires a new point in by greedy search
//!   plus occlusion pruning, then installs reverse edges.
//! - [`DynamicIndex::lazy_delete`] only marks a tombstone; the graph is
//!   untouched and the slot stays traversable as a hop.
//! - [`DynamicIndex::consolidate_deletes`] rewires every node that points at
//!   a tombstone and reclaims the marked slots in one batch.
//! - [`DynamicIndex::search`] runs against the same graph at any time.
//!
//! Points are addressed externally by *tag* and internally by *slot*; slots
//! are recycled by consolidation, tags are stable. A configurable number of
//! *frozen start points*, placed on a sphere at construction, anchor every
//! traversal and are never deleted.
//!
//! # Locking
//!
//! Each graph node has its own lock (replacement is atomic per node), the
//! store free-list, tag registry and tombstone set each have one lock with
//! short critical sections, and a dedicated try-lock serializes
//! consolidation passes against each other. Searches never block each
//! other. Inserts hold the tombstone read lock while publishing edges so
//! that no new edge can target a slot the current consolidation pass is
//! about to release.

mod consolidate;
mod graph;
mod prune;
mod search;
mod store;
mod tags;
mod tombstones;

pub use consolidate::{ConsolidateStatus, ConsolidationReport};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::distance::{l2_squared, Element, Metric};
use crate::error::{IndexError, Result};
use crate::io::{write_bin, BinElement};
use crate::labels::LabelIndex;

use self::graph::ProximityGraph;
use self::prune::robust_prune;
use self::search::GreedySearcher;
use self::store::VectorStore;
use self::tags::TagRegistry;
use self::tombstones::TombstoneSet;

/// Construction parameters.
///
/// `l_build` is the beam width used when wiring a point in, `max_degree`
/// bounds every neighbor list, and `alpha` controls how aggressively the
/// occlusion rule prunes (1.0 gives the sparsest graph, 1.2-1.4 denser
/// graphs with smaller diameter).
#[derive(Debug, Clone, Serialize)]
pub struct BuildParams {
    /// Beam width for insertion searches.
    pub l_build: usize,
    /// Maximum out-degree per node.
    pub max_degree: usize,
    /// Occlusion factor, at least 1.0.
    pub alpha: f32,
    /// Cap on candidates examined per prune.
    pub max_occlusion: usize,
    /// Pad pruned lists back up to `max_degree` from the rejected pool.
    pub saturate_graph: bool,
    /// Worker threads for consolidation passes.
    pub num_threads: usize,
    /// Frozen start points anchoring every search.
    pub num_frozen_points: usize,
    /// Whether points carry label sets.
    pub labeled: bool,
    /// Beam width for wiring in labeled points; 0 falls back to `l_build`.
    pub filtered_l_build: usize,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            l_build: 100,
            max_degree: 64,
            alpha: 1.2,
            max_occlusion: 500,
            saturate_graph: false,
            num_threads: 1,
            num_frozen_points: 1,
            labeled: false,
            filtered_l_build: 0,
        }
    }
}

/// Concurrent graph index over a fixed-capacity vector store.
pub struct DynamicIndex<T: Element> {
    metric: Metric,
    params: BuildParams,
    max_points: usize,
    store: VectorStore<T>,
    graph: ProximityGraph,
    tags: Mutex<TagRegistry>,
    tombstones: RwLock<TombstoneSet>,
    labels: Option<RwLock<LabelIndex>>,
    consolidate_lock: Mutex<()>,
    start_slots: Vec<u32>,
    deletes_enabled: AtomicBool,
}

impl<T: Element> DynamicIndex<T> {
    /// Create an empty index with room for `max_points` points plus the
    /// frozen start points.
    pub fn new(metric: Metric, dim: usize, max_points: usize, params: BuildParams) -> Result<Self> {
        if params.alpha < 1.0 {
            return Err(IndexError::InvalidParameter("alpha must be at least 1.0".into()));
        }
        if params.max_degree == 0 || params.l_build == 0 || params.max_occlusion == 0 {
            return Err(IndexError::InvalidParameter(
                "degree, beam width and occlusion cap must be nonzero".into(),
            ));
        }
        if params.num_frozen_points == 0 {
            return Err(IndexError::InvalidParameter(
                "at least one start point is required".into(),
            ));
        }
        let store = VectorStore::new(dim, max_points, params.num_frozen_points)?;
        let total = store.total_slots();
        let graph = ProximityGraph::new(total, params.max_degree);
        let labels = params
            .labeled
            .then(|| RwLock::new(LabelIndex::new(total, None)));
        let start_slots = (max_points as u32..total as u32).collect();
        Ok(Self {
            metric,
            params,
            max_points,
            store,
            graph,
            tags: Mutex::new(TagRegistry::with_capacity(max_points)),
            tombstones: RwLock::new(TombstoneSet::default()),
            labels,
            consolidate_lock: Mutex::new(()),
            start_slots,
            deletes_enabled: AtomicBool::new(false),
        })
    }

    /// Place every frozen start point independently at random on the sphere
    /// of the given radius. Call once, before the index is shared.
    pub fn set_start_points_at_random(&mut self, radius: f32) -> Result<()> {
        let mut rng = rand::rng();
        let dim = self.store.dim();
        for &slot in &self.start_slots {
            let mut v = vec![0f32; dim];
            let mut n = 0f32;
            while n < 1e-12 {
                for x in v.iter_mut() {
                    *x = standard_normal(&mut rng);
                }
                n = crate::distance::norm(&v);
            }
            let row: Vec<T> = v.iter().map(|&x| T::from_f32(x * radius / n)).collect();
            self.store.write(slot, &row)?;
        }
        Ok(())
    }

    /// Designate a label id that matches every filter.
    pub fn set_universal_label(&self, label: u32) -> Result<()> {
        let labels = self.labels.as_ref().ok_or(IndexError::InvalidParameter(
            "index was built without labels".into(),
        ))?;
        labels.write().set_universal(Some(label));
        Ok(())
    }

    /// Allow lazy deletes. Rejected on labeled indices, where deletion is
    /// unsupported.
    pub fn enable_delete(&self) -> Result<()> {
        if self.labels.is_some() {
            return Err(IndexError::DeletesDisabled);
        }
        self.deletes_enabled.store(true, Ordering::Release);
        Ok(())
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn params(&self) -> &BuildParams {
        &self.params
    }

    pub fn dim(&self) -> usize {
        self.store.dim()
    }

    pub fn aligned_dim(&self) -> usize {
        self.store.aligned_dim()
    }

    /// Maximum number of points, excluding the frozen starts.
    pub fn capacity(&self) -> usize {
        self.max_points
    }

    /// Points visible to search: tagged and not tombstoned.
    ///
    /// Saturating: during a consolidation's release window the tag count
    /// briefly drops before the tombstones clear.
    pub fn live_points(&self) -> usize {
        let tagged = self.tags.lock().len();
        tagged.saturating_sub(self.tombstones.read().len())
    }

    /// Free slots available for insertion.
    pub fn empty_slots(&self) -> usize {
        self.store.free_count()
    }

    /// Tags of all live points, unordered.
    pub fn live_tags(&self) -> Vec<u32> {
        let entries = self.tags.lock().entries();
        let ts = self.tombstones.read();
        entries
            .into_iter()
            .filter(|&(_, slot)| !ts.contains(slot))
            .map(|(tag, _)| tag)
            .collect()
    }

    /// Is the tag present but marked for deletion?
    pub fn is_tombstoned(&self, tag: u32) -> bool {
        match self.tags.lock().slot_of(tag) {
            Some(slot) => self.tombstones.read().contains(slot),
            None => false,
        }
    }

    /// Copy of the stored vector for a tag, without padding.
    pub fn get_vector(&self, tag: u32) -> Option<Vec<T>> {
        let slot = self.tags.lock().slot_of(tag)?;
        Some(self.store.vector(slot)[..self.store.dim()].to_vec())
    }

    #[inline]
    fn is_frozen(&self, slot: u32) -> bool {
        slot as usize >= self.max_points
    }

    /// Insert a point under a fresh tag.
    pub fn insert_point(&self, vector: &[T], tag: u32) -> Result<()> {
        self.insert_inner(vector, tag, None)
    }

    /// Insert a labeled point under a fresh tag.
    pub fn insert_point_labeled(&self, vector: &[T], tag: u32, labels: &[u32]) -> Result<()> {
        self.insert_inner(vector, tag, Some(labels))
    }

    fn insert_inner(&self, vector: &[T], tag: u32, point_labels: Option<&[u32]>) -> Result<()> {
        if vector.len() != self.store.dim() && vector.len() != self.store.aligned_dim() {
            return Err(IndexError::DimensionMismatch {
                expected: self.store.dim(),
                actual: vector.len(),
            });
        }
        if self.labels.is_some() != point_labels.is_some() {
            return Err(IndexError::InvalidParameter(
                "label set must be supplied exactly when the index is labeled".into(),
            ));
        }

        // Tag registration and slot reservation are atomic under the tag
        // lock, so a duplicate tag never consumes a slot.
        let slot = {
            let mut tags = self.tags.lock();
            if tags.slot_of(tag).is_some() {
                return Err(IndexError::DuplicateTag(tag));
            }
            let slot = self.store.reserve_slot()?;
            tags.insert(tag, slot)?;
            slot
        };

        if let (Some(labels), Some(pl)) = (&self.labels, point_labels) {
            labels.write().set(slot, pl);
        }
        self.store.write(slot, vector)?;

        // Until set_neighbors below, the slot is invisible: nothing points
        // at it and concurrent searches simply never reach it.
        let query = self.store.vector(slot);
        let mut pool = self.collect_candidates(query, point_labels);

        // Publishing edges under the tombstone read view guarantees that no
        // new edge targets a slot a consolidation pass is releasing.
        let ts = self.tombstones.read();
        pool.retain(|&(s, _)| s != slot && !ts.contains(s));
        let neighbors = robust_prune(
            &self.store,
            slot,
            &mut pool,
            self.params.alpha,
            self.params.max_degree,
            self.params.max_occlusion,
            self.params.saturate_graph,
        );
        self.graph.set_neighbors(slot, neighbors.clone());

        for &t in &neighbors {
            if self.graph.append_back_edge(t, slot) {
                let snapshot = self.graph.neighbors(t);
                let tvec = self.store.vector(t);
                let mut cands: Vec<(u32, f32)> = snapshot
                    .iter()
                    .filter(|&&n| n != t && !ts.contains(n))
                    .map(|&n| (n, l2_squared(tvec, self.store.vector(n))))
                    .collect();
                let pruned = robust_prune(
                    &self.store,
                    t,
                    &mut cands,
                    self.params.alpha,
                    self.params.max_degree,
                    self.params.max_occlusion,
                    self.params.saturate_graph,
                );
                self.graph.set_neighbors(t, pruned);
            }
        }
        Ok(())
    }

    /// Candidate pool for wiring a point in: every node the insertion
    /// search expanded, one filtered traversal per label for labeled points.
    fn collect_candidates(&self, query: &[T], point_labels: Option<&[u32]>) -> Vec<(u32, f32)> {
        let label_guard = self.labels.as_ref().map(|l| l.read());
        match (label_guard.as_deref(), point_labels) {
            (Some(label_index), Some(pl)) if !pl.is_empty() => {
                let beam = if self.params.filtered_l_build > 0 {
                    self.params.filtered_l_build
                } else {
                    self.params.l_build
                };
                let mut seen = HashSet::new();
                let mut pool = Vec::new();
                for &lab in pl {
                    let searcher = GreedySearcher {
                        store: &self.store,
                        graph: &self.graph,
                        filter: Some((label_index, lab)),
                    };
                    let entries = self.entry_slots(Some((label_index, lab)));
                    for (s, d) in searcher.search(query, &entries, beam).expanded {
                        if seen.insert(s) {
                            pool.push((s, d));
                        }
                    }
                }
                pool
            }
            _ => {
                let searcher = GreedySearcher {
                    store: &self.store,
                    graph: &self.graph,
                    filter: None,
                };
                searcher
                    .search(query, &self.start_slots, self.params.l_build)
                    .expanded
            }
        }
    }

    /// Mark the point with this tag for deletion.
    ///
    /// Returns `Ok(true)` when the point was newly marked; deleting an
    /// unknown or already-marked tag is a no-op returning `Ok(false)`.
    pub fn lazy_delete(&self, tag: u32) -> Result<bool> {
        if !self.deletes_enabled.load(Ordering::Acquire) {
            return Err(IndexError::DeletesDisabled);
        }
        let Some(slot) = self.tags.lock().slot_of(tag) else {
            return Ok(false);
        };
        Ok(self.tombstones.write().insert(slot))
    }

    /// Search for the `k` nearest live points. Returns `(tag, distance)`
    /// pairs ascending by distance.
    pub fn search(&self, query: &[T], k: usize, l_search: usize) -> Result<Vec<(u32, f32)>> {
        self.search_internal(query, k, l_search, None, None)
    }

    /// Search restricted to points matching a label (or carrying the
    /// universal label).
    pub fn search_filtered(
        &self,
        query: &[T],
        k: usize,
        l_search: usize,
        label: u32,
    ) -> Result<Vec<(u32, f32)>> {
        if self.labels.is_none() {
            return Err(IndexError::InvalidParameter(
                "index was built without labels".into(),
            ));
        }
        self.search_internal(query, k, l_search, Some(label), None)
    }

    /// Search returning only tags from the allowed set.
    pub fn search_within(
        &self,
        query: &[T],
        k: usize,
        l_search: usize,
        allowed: &HashSet<u32>,
    ) -> Result<Vec<(u32, f32)>> {
        self.search_internal(query, k, l_search, None, Some(allowed))
    }

    fn search_internal(
        &self,
        query: &[T],
        k: usize,
        l_search: usize,
        label: Option<u32>,
        allowed: Option<&HashSet<u32>>,
    ) -> Result<Vec<(u32, f32)>> {
        if query.len() != self.store.dim() && query.len() != self.store.aligned_dim() {
            return Err(IndexError::DimensionMismatch {
                expected: self.store.dim(),
                actual: query.len(),
            });
        }
        let padded = self.pad_query(query);
        let beam_width = l_search.max(k).max(1);

        let label_guard = self.labels.as_ref().map(|l| l.read());
        let filter = match (label_guard.as_deref(), label) {
            (Some(idx), Some(lab)) => Some((idx, lab)),
            _ => None,
        };
        let searcher = GreedySearcher {
            store: &self.store,
            graph: &self.graph,
            filter,
        };
        let entries = self.entry_slots(filter);
        let beam = searcher.search(&padded, &entries, beam_width).beam;
        drop(label_guard);

        // Tombstones observed here are excluded; frozen starts and untagged
        // slots never appear in results.
        let ts = self.tombstones.read();
        let tags = self.tags.lock();
        let mut out = Vec::with_capacity(k);
        for (slot, dist) in beam {
            if self.is_frozen(slot) || ts.contains(slot) {
                continue;
            }
            let Some(tag) = tags.tag_of(slot) else { continue };
            if let Some(allow) = allowed {
                if !allow.contains(&tag) {
                    continue;
                }
            }
            out.push((tag, dist));
            if out.len() == k {
                break;
            }
        }
        Ok(out)
    }

    /// Traversal seeds: the frozen starts, plus the entry slots of the
    /// filter label and of the universal label for filtered traversals.
    fn entry_slots(&self, filter: Option<(&LabelIndex, u32)>) -> Vec<u32> {
        let mut entries = self.start_slots.clone();
        if let Some((labels, want)) = filter {
            if let Some(e) = labels.entry_for(want) {
                entries.push(e);
            }
            if let Some(e) = labels.universal().and_then(|u| labels.entry_for(u)) {
                if !entries.contains(&e) {
                    entries.push(e);
                }
            }
        }
        entries
    }

    fn pad_query(&self, query: &[T]) -> Vec<T> {
        let mut padded = vec![T::default(); self.store.aligned_dim()];
        padded[..query.len()].copy_from_slice(query);
        padded
    }

    /// Walk the whole structure and verify its invariants: degree bounds,
    /// no self-loops or duplicate edges, every edge targets an occupied
    /// slot, and the frozen starts are intact. Diagnostic, not cheap.
    pub fn check_integrity(&self) -> std::result::Result<(), String> {
        let occupied: HashSet<u32> = self.store.occupied_slots().into_iter().collect();
        for &p in &occupied {
            let nbrs = self.graph.neighbors(p);
            if nbrs.len() > self.params.max_degree {
                return Err(format!(
                    "node {p} has degree {} above the bound {}",
                    nbrs.len(),
                    self.params.max_degree
                ));
            }
            let mut seen = HashSet::with_capacity(nbrs.len());
            for &n in &nbrs {
                if n == p {
                    return Err(format!("node {p} has a self-loop"));
                }
                if !seen.insert(n) {
                    return Err(format!("node {p} lists neighbor {n} twice"));
                }
                if !occupied.contains(&n) {
                    return Err(format!("node {p} points at unoccupied slot {n}"));
                }
            }
        }
        let ts = self.tombstones.read();
        for &s in &self.start_slots {
            if !occupied.contains(&s) {
                return Err(format!("start slot {s} is not occupied"));
            }
            if ts.contains(s) {
                return Err(format!("start slot {s} is tombstoned"));
            }
        }
        Ok(())
    }
}

impl<T: BinElement> DynamicIndex<T> {
    /// Persist the index under `<prefix>.data`, `<prefix>.tags`,
    /// `<prefix>.graph` and `<prefix>.meta.json`.
    ///
    /// Live points are written in tag order with slots renumbered densely;
    /// the frozen starts follow them. Edges to tombstoned points are
    /// dropped, so a consolidation pass before saving is not required.
    pub fn save(&self, prefix: &Path) -> Result<()> {
        use byteorder::{LittleEndian, WriteBytesExt};
        use std::fs::File;
        use std::io::{BufWriter, Write};

        let mut entries = self.tags.lock().entries();
        let tombstoned = self.tombstones.read().snapshot();
        entries.retain(|&(_, slot)| !tombstoned.contains(&slot));
        entries.sort_unstable();

        let order: Vec<u32> = entries
            .iter()
            .map(|&(_, slot)| slot)
            .chain(self.start_slots.iter().copied())
            .collect();
        let id_of: std::collections::HashMap<u32, u32> = order
            .iter()
            .enumerate()
            .map(|(i, &slot)| (slot, i as u32))
            .collect();

        let rows: Vec<&[T]> = order.iter().map(|&s| self.store.vector(s)).collect();
        write_bin(&path_with(prefix, ".data"), self.store.dim(), &rows)?;

        let mut tag_file = BufWriter::new(File::create(path_with(prefix, ".tags"))?);
        tag_file.write_u32::<LittleEndian>(entries.len() as u32)?;
        for &(tag, _) in &entries {
            tag_file.write_u32::<LittleEndian>(tag)?;
        }
        tag_file.flush()?;

        let mut graph_file = BufWriter::new(File::create(path_with(prefix, ".graph"))?);
        graph_file.write_u32::<LittleEndian>(order.len() as u32)?;
        graph_file.write_u32::<LittleEndian>(self.params.max_degree as u32)?;
        graph_file.write_u32::<LittleEndian>(self.start_slots.len() as u32)?;
        for &s in &self.start_slots {
            graph_file.write_u32::<LittleEndian>(id_of[&s])?;
        }
        for &slot in &order {
            let remapped: Vec<u32> = self
                .graph
                .neighbors(slot)
                .iter()
                .filter_map(|n| id_of.get(n).copied())
                .collect();
            graph_file.write_u32::<LittleEndian>(remapped.len() as u32)?;
            for n in remapped {
                graph_file.write_u32::<LittleEndian>(n)?;
            }
        }
        graph_file.flush()?;

        let metadata = serde_json::json!({
            "element": T::NAME,
            "metric": match self.metric {
                Metric::L2 => "l2",
                Metric::InnerProduct => "mips",
            },
            "dim": self.store.dim(),
            "aligned_dim": self.store.aligned_dim(),
            "max_points": self.max_points,
            "num_points": entries.len(),
            "num_start_points": self.start_slots.len(),
            "params": self.params,
        });
        let meta_file = File::create(path_with(prefix, ".meta.json"))?;
        serde_json::to_writer_pretty(meta_file, &metadata)
            .map_err(|e| IndexError::FileFormat(format!("metadata: {e}")))?;

        debug!(points = entries.len(), prefix = %prefix.display(), "index saved");
        Ok(())
    }
}

fn path_with(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// One standard normal sample via Box-Muller.
fn standard_normal<R: Rng>(rng: &mut R) -> f32 {
    let u1: f32 = rng.random::<f32>().max(1e-7);
    let u2: f32 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_index(max_points: usize) -> DynamicIndex<f32> {
        let params = BuildParams {
            l_build: 16,
            max_degree: 4,
            alpha: 1.2,
            ..BuildParams::default()
        };
        let mut index = DynamicIndex::new(Metric::L2, 2, max_points, params).unwrap();
        index.set_start_points_at_random(10.0).unwrap();
        index
    }

    #[test]
    fn insert_then_search_finds_the_point() {
        let index = small_index(8);
        index.insert_point(&[1.0, 2.0], 42).unwrap();
        let hits = index.search(&[1.0, 2.0], 1, 8).unwrap();
        assert_eq!(hits[0].0, 42);
        assert!(hits[0].1 < 1e-6);
    }

    #[test]
    fn duplicate_tag_leaves_state_unchanged() {
        let index = small_index(8);
        index.insert_point(&[0.0, 0.0], 7).unwrap();
        let before = index.live_points();
        let err = index.insert_point(&[5.0, 5.0], 7).unwrap_err();
        assert!(matches!(err, IndexError::DuplicateTag(7)));
        assert_eq!(index.live_points(), before);
        assert_eq!(index.get_vector(7).unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn capacity_error_when_full() {
        let index = small_index(2);
        index.insert_point(&[0.0, 0.0], 1).unwrap();
        index.insert_point(&[1.0, 0.0], 2).unwrap();
        assert!(matches!(
            index.insert_point(&[2.0, 0.0], 3),
            Err(IndexError::Capacity(2))
        ));
    }

    #[test]
    fn deletes_require_enable() {
        let index = small_index(4);
        index.insert_point(&[0.0, 0.0], 1).unwrap();
        assert!(matches!(index.lazy_delete(1), Err(IndexError::DeletesDisabled)));
        index.enable_delete().unwrap();
        assert!(index.lazy_delete(1).unwrap());
        assert!(!index.lazy_delete(1).unwrap());
        assert!(!index.lazy_delete(99).unwrap());
    }

    #[test]
    fn tombstoned_point_is_excluded_from_results() {
        let index = small_index(8);
        index.enable_delete().unwrap();
        index.insert_point(&[0.0, 0.0], 1).unwrap();
        index.insert_point(&[0.1, 0.0], 2).unwrap();
        index.lazy_delete(1).unwrap();
        let hits = index.search(&[0.0, 0.0], 2, 8).unwrap();
        assert!(hits.iter().all(|&(tag, _)| tag != 1));
        assert!(hits.iter().any(|&(tag, _)| tag == 2));
    }

    #[test]
    fn frozen_starts_never_appear_in_results() {
        let index = small_index(4);
        index.insert_point(&[0.0, 0.0], 1).unwrap();
        // Query near the sphere radius, where the start point is closest.
        let hits = index.search(&[10.0, 0.0], 4, 8).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn labeled_index_filters_searches() {
        let params = BuildParams {
            l_build: 16,
            max_degree: 4,
            labeled: true,
            filtered_l_build: 8,
            ..BuildParams::default()
        };
        let mut index = DynamicIndex::<f32>::new(Metric::L2, 2, 8, params).unwrap();
        index.set_start_points_at_random(5.0).unwrap();
        index.set_universal_label(0).unwrap();
        index.insert_point_labeled(&[0.0, 0.0], 1, &[1]).unwrap();
        index.insert_point_labeled(&[0.1, 0.0], 2, &[2]).unwrap();
        index.insert_point_labeled(&[0.2, 0.0], 3, &[0]).unwrap();

        let hits = index.search_filtered(&[0.0, 0.0], 3, 8, 1).unwrap();
        let tags: Vec<u32> = hits.iter().map(|h| h.0).collect();
        assert!(tags.contains(&1));
        assert!(!tags.contains(&2));
        // Universal label matches any filter.
        assert!(tags.contains(&3));
    }

    #[test]
    fn search_within_restricts_tags() {
        let index = small_index(8);
        for (i, x) in [0.0f32, 0.5, 1.0, 1.5].iter().enumerate() {
            index.insert_point(&[*x, 0.0], i as u32 + 1).unwrap();
        }
        let allowed: HashSet<u32> = [3, 4].into_iter().collect();
        let hits = index.search_within(&[0.0, 0.0], 2, 8, &allowed).unwrap();
        assert!(hits.iter().all(|&(tag, _)| allowed.contains(&tag)));
        assert_eq!(hits[0].0, 3);
    }

    #[test]
    fn integrity_holds_after_inserts() {
        let index = small_index(16);
        for i in 0..16u32 {
            index
                .insert_point(&[(i % 4) as f32, (i / 4) as f32], i + 1)
                .unwrap();
        }
        index.check_integrity().unwrap();
    }
}
