//! swann: dynamic approximate nearest neighbor search over a sliding window.
//!
//! A Vamana-style proximity graph in memory, built for *streams*: points
//! arrive on the right, the oldest are lazily deleted on the left, and a
//! background consolidation pass periodically rewires the graph and
//! reclaims their slots, all while searches keep running.
//!
//! # Pieces
//!
//! | Module | What it holds |
//! |--------|---------------|
//! | [`index`] | [`index::DynamicIndex`]: concurrent insert / lazy delete / search / consolidate |
//! | [`streaming`] | [`streaming::StreamingController`]: the sliding-window schedule |
//! | [`distance`] | element types, L2 kernels, the inner-product transform |
//! | [`io`] | binary vector files, truthsets, vector sources |
//! | [`labels`] | label filtering and label file tooling |
//!
//! # Example
//!
//! ```rust,ignore
//! use swann::{BuildParams, DynamicIndex, Metric};
//!
//! let mut index = DynamicIndex::<f32>::new(Metric::L2, 128, 10_000, BuildParams::default())?;
//! index.set_start_points_at_random(1.0)?;
//! index.enable_delete()?;
//!
//! index.insert_point(&embedding, 1)?;
//! let hits = index.search(&query, 10, 100)?;
//!
//! index.lazy_delete(1)?;
//! let report = index.consolidate_deletes(index.params());
//! ```
//!
//! # Identity and lifecycle
//!
//! Callers address points by *tag*; internally points live in recyclable
//! *slots*. A slot is free, live, or tombstoned: `lazy_delete` only marks
//! the tombstone (the node keeps serving as a traversal hop), and
//! consolidation later rewires the graph around the marked slots and frees
//! them. A few *frozen start points* placed on a sphere at construction
//! anchor every search and are never deleted.

pub mod distance;
pub mod error;
pub mod index;
pub mod io;
pub mod labels;
pub mod streaming;

pub use distance::{Element, Metric};
pub use error::{IndexError, Result};
pub use index::{BuildParams, ConsolidateStatus, ConsolidationReport, DynamicIndex};
pub use streaming::{StreamParams, StreamStats, StreamingController};
