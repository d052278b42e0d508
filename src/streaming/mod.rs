//! Sliding-window streaming over a dynamic index.
//!
//! The controller maintains a fixed-size window of points over an ordered
//! vector stream: new points are inserted on the right while the oldest are
//! lazily deleted and consolidated away on the left.
//!
//! ```text
//!            deleted                 active window          not yet seen
//!  ─────────────────────────┆━━━━━━━━━━━━━━━━━━━━━━━━━━━┆─────────────────▶
//!                           ┆                           ┆
//!        lazy_delete + consolidate              insert_point (parallel)
//!            (background task)                   (synchronous phase)
//! ```
//!
//! Each iteration inserts one interval of points in parallel and then hands
//! the oldest interval to a background task that lazy-deletes it and runs
//! [`DynamicIndex::consolidate_deletes`], retrying after a fixed backoff
//! while the consolidate lock is contended. At most one background task is
//! outstanding: the previous one is awaited before the next is spawned, so
//! at any moment there is one inserting phase and at most one consolidating
//! phase, with searches possible throughout.
//!
//! Tags are assigned as `1 + stream position`. After the run completes the
//! live tags are exactly the last `active_window` positions. Deletion is
//! unsupported for labeled streams; the window then only grows.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::distance::Element;
use crate::error::{IndexError, Result};
use crate::index::{BuildParams, ConsolidateStatus, DynamicIndex};
use crate::io::VectorSource;

/// Streaming schedule parameters.
#[derive(Debug, Clone)]
pub struct StreamParams {
    /// Number of most recent points kept live.
    pub active_window: usize,
    /// Points inserted (and deleted) per iteration.
    pub consolidate_interval: usize,
    /// Total points to stream; 0 means the whole source.
    pub max_points_to_insert: usize,
    /// Worker threads for insertion phases.
    pub insert_threads: usize,
    /// Worker threads for consolidation passes.
    pub consolidate_threads: usize,
    /// Wait between consolidation attempts when the lock is contended.
    pub retry_backoff: Duration,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            active_window: 10_000,
            consolidate_interval: 1_000,
            max_points_to_insert: 0,
            insert_threads: default_worker_threads(),
            consolidate_threads: default_worker_threads(),
            retry_backoff: Duration::from_secs(5),
        }
    }
}

impl StreamParams {
    /// Check the schedule against the source size and resolve the number of
    /// points to insert. All violations are fatal.
    fn validate(&self, num_points: usize) -> Result<usize> {
        if self.active_window == 0 || self.consolidate_interval == 0 {
            return Err(IndexError::InvalidParameter(
                "window and interval must be nonzero".into(),
            ));
        }
        let max_insert = if self.max_points_to_insert == 0 {
            num_points
        } else {
            self.max_points_to_insert
        };
        if num_points < max_insert {
            return Err(IndexError::InvalidParameter(format!(
                "source has {num_points} points but {max_insert} were requested"
            )));
        }
        if max_insert < self.active_window + self.consolidate_interval {
            return Err(IndexError::InvalidParameter(format!(
                "{} points cannot cover one window ({}) plus one interval ({})",
                max_insert, self.active_window, self.consolidate_interval
            )));
        }
        if self.consolidate_interval < max_insert / 1000 {
            return Err(IndexError::InvalidParameter(format!(
                "interval {} is too small for {} points and would thrash",
                self.consolidate_interval, max_insert
            )));
        }
        Ok(max_insert)
    }
}

/// Totals accumulated over one streaming run.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub points_inserted: u64,
    pub insert_failures: u64,
    pub deletes_issued: u64,
    pub consolidations: u64,
    pub lock_fail_retries: u64,
    pub seconds: f64,
}

/// Drives insert and delete/consolidate phases over a shared index.
pub struct StreamingController<T: Element> {
    index: Arc<DynamicIndex<T>>,
    params: StreamParams,
    labels: Option<Vec<Vec<u32>>>,
    insert_pool: rayon::ThreadPool,
    delete_params: BuildParams,
}

impl<T: Element> StreamingController<T> {
    pub fn new(index: Arc<DynamicIndex<T>>, params: StreamParams) -> Result<Self> {
        let insert_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.insert_threads)
            .build()
            .map_err(|e| IndexError::InvalidParameter(format!("insert pool: {e}")))?;
        let mut delete_params = index.params().clone();
        delete_params.num_threads = params.consolidate_threads.max(1);
        Ok(Self {
            index,
            params,
            labels: None,
            insert_pool,
            delete_params,
        })
    }

    /// Attach per-point label sets, indexed by stream position. Labeled
    /// streams are insert-only: deletion phases are skipped.
    pub fn with_labels(mut self, labels: Vec<Vec<u32>>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn index(&self) -> &Arc<DynamicIndex<T>> {
        &self.index
    }

    /// Stream the source through the index.
    pub fn run(&self, source: &mut dyn VectorSource<T>) -> Result<StreamStats> {
        if source.dim() != self.index.dim() {
            return Err(IndexError::DimensionMismatch {
                expected: self.index.dim(),
                actual: source.dim(),
            });
        }
        let max_insert = self.params.validate(source.num_points())?;
        if let Some(labels) = &self.labels {
            if labels.len() < max_insert {
                return Err(IndexError::InvalidParameter(format!(
                    "{} label rows for {} points",
                    labels.len(),
                    max_insert
                )));
            }
        }
        let window = self.params.active_window;
        let interval = self.params.consolidate_interval;
        let aligned = self.index.aligned_dim();
        let has_labels = self.labels.is_some();
        if has_labels {
            warn!("deleting points is not supported for labeled data; the window will only grow");
        }

        let started = Instant::now();
        let mut stats = StreamStats::default();
        let mut buffer = vec![T::default(); window.max(interval) * aligned];

        source.load_into(0, window, aligned, &mut buffer[..window * aligned])?;
        stats.insert_failures += self.insert_batch(&buffer, 0, window)?;
        stats.points_inserted += window as u64;

        let mut pending: Option<JoinHandle<Result<TaskStats>>> = None;
        let mut deleted_through = 0usize;

        let mut start = window;
        while start + interval <= max_insert {
            let end = start + interval;
            source.load_into(start, end - start, aligned, &mut buffer[..(end - start) * aligned])?;
            stats.insert_failures += self.insert_batch(&buffer, start, end)?;
            stats.points_inserted += (end - start) as u64;

            if !has_labels && start >= window + interval {
                if let Some(handle) = pending.take() {
                    merge_task(handle, &mut stats)?;
                }
                let del_end = start - window;
                let del_start = del_end - interval;
                deleted_through = del_end;
                pending = Some(self.spawn_delete_task(del_start, del_end));
            }
            start = end;
        }

        // `start` now marks the end of the last inserted interval; a tail of
        // fewer than `interval` points is never streamed.
        let inserted_through = start;

        if !has_labels {
            if let Some(handle) = pending.take() {
                merge_task(handle, &mut stats)?;
            }
            // Trim the tail so exactly the last `active_window` tags stay
            // live.
            let del_end = inserted_through - window;
            if deleted_through < del_end {
                let handle = self.spawn_delete_task(deleted_through, del_end);
                merge_task(handle, &mut stats)?;
            }
        }

        stats.seconds = started.elapsed().as_secs_f64();
        info!(
            inserted = stats.points_inserted,
            deleted = stats.deletes_issued,
            consolidations = stats.consolidations,
            seconds = stats.seconds,
            "stream finished"
        );
        Ok(stats)
    }

    /// Insert stream positions `[start, end)` from `buffer` in parallel.
    /// Duplicate tags are counted and skipped; any other failure aborts.
    fn insert_batch(&self, buffer: &[T], start: usize, end: usize) -> Result<u64> {
        let aligned = self.index.aligned_dim();
        let failed = AtomicUsize::new(0);
        let index = &self.index;
        let labels = self.labels.as_deref();
        let phase = Instant::now();
        self.insert_pool.install(|| {
            (start..end).into_par_iter().try_for_each(|j| {
                let row = &buffer[(j - start) * aligned..(j - start + 1) * aligned];
                let tag = 1 + j as u32;
                let outcome = match labels {
                    Some(rows) => index.insert_point_labeled(row, tag, &rows[j]),
                    None => index.insert_point(row, tag),
                };
                match outcome {
                    Ok(()) => Ok(()),
                    Err(IndexError::DuplicateTag(tag)) => {
                        warn!(tag, "insert skipped: duplicate tag");
                        failed.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                    Err(other) => Err(other),
                }
            })
        })?;
        info!(
            start,
            end,
            seconds = phase.elapsed().as_secs_f64(),
            "batch inserted"
        );
        Ok(failed.into_inner() as u64)
    }

    fn spawn_delete_task(&self, start: usize, end: usize) -> JoinHandle<Result<TaskStats>> {
        let index = Arc::clone(&self.index);
        let params = self.delete_params.clone();
        let backoff = self.params.retry_backoff;
        thread::spawn(move || delete_and_consolidate(&index, &params, start, end, backoff))
    }
}

#[derive(Debug, Default)]
struct TaskStats {
    deletes: u64,
    consolidations: u64,
    lock_fail_retries: u64,
}

fn merge_task(handle: JoinHandle<Result<TaskStats>>, stats: &mut StreamStats) -> Result<()> {
    let task = handle
        .join()
        .map_err(|_| IndexError::Task("delete/consolidate thread panicked".into()))??;
    stats.deletes_issued += task.deletes;
    stats.consolidations += task.consolidations;
    stats.lock_fail_retries += task.lock_fail_retries;
    Ok(())
}

/// Lazy-delete stream positions `[start, end)` and consolidate, retrying
/// while the consolidate lock is contended. An inconsistent pass is fatal.
fn delete_and_consolidate<T: Element>(
    index: &DynamicIndex<T>,
    params: &BuildParams,
    start: usize,
    end: usize,
    backoff: Duration,
) -> Result<TaskStats> {
    info!(start, end, "lazy deleting");
    let mut task = TaskStats::default();
    for j in start..end {
        if index.lazy_delete(1 + j as u32)? {
            task.deletes += 1;
        }
    }
    loop {
        let report = index.consolidate_deletes(params);
        match report.status {
            ConsolidateStatus::Success => {
                info!(
                    active = report.active_points,
                    released = report.slots_released,
                    empty = report.empty_slots,
                    seconds = report.seconds,
                    "consolidated"
                );
                task.consolidations += 1;
                return Ok(task);
            }
            ConsolidateStatus::LockFail => {
                warn!(
                    start,
                    end,
                    backoff_secs = backoff.as_secs_f64(),
                    "consolidate lock contended; retrying"
                );
                task.lock_fail_retries += 1;
                thread::sleep(backoff);
            }
            ConsolidateStatus::InconsistentCount => {
                return Err(IndexError::InconsistentCount);
            }
        }
    }
}

/// Default worker pool size for the command-line driver: half the cores.
pub fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

/// Save path for a finished run:
/// `<prefix>.after-streaming-act<W>-cons<C>-max<M>`.
pub fn streaming_save_path(prefix: &str, params: &StreamParams, max_insert: usize) -> String {
    format!(
        "{prefix}.after-streaming-act{}-cons{}-max{}",
        params.active_window, params.consolidate_interval, max_insert
    )
}
