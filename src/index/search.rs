//! Greedy best-first traversal.
//!
//! The frontier is a bounded list sorted ascending by `(distance, slot)`;
//! the slot component makes tie-breaks deterministic. Each step expands the
//! closest not-yet-expanded candidate and scores its unseen neighbors.
//! Tombstoned nodes participate as hops and are filtered from results by
//! the caller; label filtering, when present, rejects neighbors before they
//! are scored, so traversal stays inside the matching subgraph.

use std::collections::HashSet;

use crate::distance::{l2_squared, Element};
use crate::labels::LabelIndex;

use super::graph::ProximityGraph;
use super::store::VectorStore;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    slot: u32,
    dist: f32,
    expanded: bool,
}

/// Bounded beam ordered ascending by `(dist, slot)`.
struct CandidateBeam {
    data: Vec<Candidate>,
    bound: usize,
    cursor: usize,
}

impl CandidateBeam {
    fn new(bound: usize) -> Self {
        Self {
            data: Vec::with_capacity(bound + 1),
            bound: bound.max(1),
            cursor: 0,
        }
    }

    fn insert(&mut self, slot: u32, dist: f32) {
        let pos = match self
            .data
            .binary_search_by(|c| c.dist.total_cmp(&dist).then(c.slot.cmp(&slot)))
        {
            Ok(_) => return,
            Err(pos) => pos,
        };
        if pos >= self.bound {
            return;
        }
        self.data.insert(
            pos,
            Candidate {
                slot,
                dist,
                expanded: false,
            },
        );
        self.data.truncate(self.bound);
        if pos < self.cursor {
            self.cursor = pos;
        }
    }

    /// Closest candidate not yet expanded, marking it expanded.
    fn next_unexpanded(&mut self) -> Option<Candidate> {
        while self.cursor < self.data.len() {
            if !self.data[self.cursor].expanded {
                self.data[self.cursor].expanded = true;
                return Some(self.data[self.cursor]);
            }
            self.cursor += 1;
        }
        None
    }

    fn into_pairs(self) -> Vec<(u32, f32)> {
        self.data.into_iter().map(|c| (c.slot, c.dist)).collect()
    }
}

/// What a traversal produced.
pub(crate) struct SearchOutcome {
    /// Final beam, ascending by distance.
    pub beam: Vec<(u32, f32)>,
    /// Every node expanded during the traversal, in expansion order. This is
    /// the candidate pool used when wiring a new point into the graph.
    pub expanded: Vec<(u32, f32)>,
}

/// One traversal over the graph, borrowing the structures it walks.
pub(crate) struct GreedySearcher<'a, T: Element> {
    pub store: &'a VectorStore<T>,
    pub graph: &'a ProximityGraph,
    /// Label filter: only slots matching this label (or carrying the
    /// universal label) are scored.
    pub filter: Option<(&'a LabelIndex, u32)>,
}

impl<'a, T: Element> GreedySearcher<'a, T> {
    /// Run the traversal from `entries` with the given beam width. The query
    /// must already be padded to the store's aligned dimension.
    pub fn search(&self, query: &[T], entries: &[u32], beam_width: usize) -> SearchOutcome {
        let mut beam = CandidateBeam::new(beam_width);
        let mut seen: HashSet<u32> = HashSet::with_capacity(beam_width * 4);
        let mut expanded = Vec::new();

        // Entry points seed the frontier unconditionally; the filter applies
        // to nodes discovered from them.
        for &e in entries {
            if seen.insert(e) {
                beam.insert(e, l2_squared(query, self.store.vector(e)));
            }
        }

        while let Some(current) = beam.next_unexpanded() {
            expanded.push((current.slot, current.dist));
            for n in self.graph.neighbors(current.slot) {
                if !seen.insert(n) {
                    continue;
                }
                if let Some((labels, want)) = self.filter {
                    if !labels.matches(n, want) {
                        continue;
                    }
                }
                beam.insert(n, l2_squared(query, self.store.vector(n)));
            }
        }

        SearchOutcome {
            beam: beam.into_pairs(),
            expanded,
        }
    }
}
