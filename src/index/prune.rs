//! Neighbor-set diversification.
//!
//! The occlusion rule keeps the out-degree bounded while preserving the
//! property greedy search depends on: from any node, some neighbor is
//! strictly closer to the target region. A candidate is dropped when an
//! already accepted neighbor sits close enough to "cover" it, with `alpha`
//! relaxing the coverage test to retain longer-range edges.

use crate::distance::{l2_squared, Element};

use super::graph::NeighborList;
use super::store::VectorStore;

/// Reduce `candidates` (distances to `point` precomputed) to a diversified
/// neighbor list of at most `max_degree` slots.
///
/// Candidates are considered in ascending distance order, ties broken by
/// slot id; at most `max_occlusion` of them are examined. A candidate `v`
/// survives if `alpha * d(v, u) > d(point, v)` for every already accepted
/// `u`. With `saturate` set, rejected candidates are appended in order until
/// the list is full.
pub(crate) fn robust_prune<T: Element>(
    store: &VectorStore<T>,
    point: u32,
    candidates: &mut Vec<(u32, f32)>,
    alpha: f32,
    max_degree: usize,
    max_occlusion: usize,
    saturate: bool,
) -> NeighborList {
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    candidates.dedup_by_key(|c| c.0);
    candidates.truncate(max_occlusion);

    let mut out = NeighborList::new();
    for &(v, d_pv) in candidates.iter() {
        if out.len() >= max_degree {
            break;
        }
        if v == point {
            continue;
        }
        let occluded = out.iter().any(|&u| {
            let d_vu = l2_squared(store.vector(v), store.vector(u));
            alpha * d_vu <= d_pv
        });
        if !occluded {
            out.push(v);
        }
    }

    if saturate && out.len() < max_degree {
        for &(v, _) in candidates.iter() {
            if out.len() >= max_degree {
                break;
            }
            if v != point && !out.contains(&v) {
                out.push(v);
            }
        }
    }

    out
}
