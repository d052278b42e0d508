//! End-to-end streaming scenarios: sliding-window round trips, capacity
//! exhaustion, consolidate-lock contention, the inner-product transform,
//! labeled streams, and a recall check against brute force over the live
//! window.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use swann::distance::{augment_query, Element};
use swann::io::{self, BinFile, SliceSource, VectorSource};
use swann::{
    BuildParams, ConsolidateStatus, DynamicIndex, IndexError, Metric, StreamParams,
    StreamingController,
};

fn stream_params(window: usize, interval: usize, max_insert: usize) -> StreamParams {
    StreamParams {
        active_window: window,
        consolidate_interval: interval,
        max_points_to_insert: max_insert,
        insert_threads: 4,
        consolidate_threads: 2,
        retry_backoff: Duration::from_millis(50),
    }
}

fn build_index<T: Element>(
    dim: usize,
    window: usize,
    interval: usize,
    max_degree: usize,
    l_build: usize,
) -> Arc<DynamicIndex<T>> {
    let params = BuildParams {
        l_build,
        max_degree,
        alpha: 1.2,
        ..BuildParams::default()
    };
    let capacity = window + 4 * interval;
    let mut index = DynamicIndex::new(Metric::L2, dim, capacity, params).unwrap();
    index.set_start_points_at_random(32.0).unwrap();
    index.enable_delete().unwrap();
    Arc::new(index)
}

#[test]
fn sliding_window_keeps_exactly_the_last_window_live() {
    let (n, dim, window, interval) = (1000usize, 4usize, 200usize, 50usize);
    let mut rng = StdRng::seed_from_u64(42);
    let data: Vec<i8> = (0..n * dim).map(|_| rng.random::<i8>()).collect();
    let mut source = SliceSource::new(data, n, dim).unwrap();

    let index = build_index::<i8>(dim, window, interval, 16, 50);
    let controller =
        StreamingController::new(Arc::clone(&index), stream_params(window, interval, n)).unwrap();
    let stats = controller.run(&mut source).unwrap();

    assert_eq!(stats.points_inserted, n as u64);
    assert_eq!(stats.insert_failures, 0);
    assert_eq!(stats.deletes_issued, (n - window) as u64);

    assert_eq!(index.live_points(), window);
    let mut live = index.live_tags();
    live.sort_unstable();
    let expected: Vec<u32> = ((n - window + 1) as u32..=n as u32).collect();
    assert_eq!(live, expected);

    assert_eq!(index.empty_slots(), index.capacity() - window);
    index.check_integrity().unwrap();
}

#[test]
fn capacity_exhaustion_aborts_the_run() {
    let (n, dim, window, interval) = (1000usize, 4usize, 200usize, 50usize);
    let mut rng = StdRng::seed_from_u64(42);
    let data: Vec<i8> = (0..n * dim).map(|_| rng.random::<i8>()).collect();

    let index = build_index::<i8>(dim, window, interval, 16, 50);
    let controller =
        StreamingController::new(Arc::clone(&index), stream_params(window, interval, n)).unwrap();

    let mut source = SliceSource::new(data.clone(), n, dim).unwrap();
    controller.run(&mut source).unwrap();

    // A second pass re-inserts long-deleted tags until the 200 surviving
    // points plus the fresh ones fill every slot.
    let mut source = SliceSource::new(data, n, dim).unwrap();
    let err = controller.run(&mut source).unwrap_err();
    assert!(matches!(err, IndexError::Capacity(_)), "got {err}");
}

#[test]
fn racing_consolidations_are_serialized_by_the_try_lock() {
    let dim = 4;
    let capacity = 400;
    let params = BuildParams {
        l_build: 32,
        max_degree: 8,
        alpha: 1.2,
        ..BuildParams::default()
    };
    let mut index = DynamicIndex::<f32>::new(Metric::L2, dim, capacity, params).unwrap();
    index.set_start_points_at_random(8.0).unwrap();
    index.enable_delete().unwrap();
    let index = Arc::new(index);

    let mut rng = StdRng::seed_from_u64(5);
    for i in 0..capacity as u32 {
        let v: Vec<f32> = (0..dim).map(|_| rng.random::<f32>()).collect();
        index.insert_point(&v, i + 1).unwrap();
    }
    for tag in 1..=200u32 {
        index.lazy_delete(tag).unwrap();
    }

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let index = Arc::clone(&index);
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            index.consolidate_deletes(index.params()).status
        }));
    }
    let statuses: Vec<ConsolidateStatus> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // The lock admits one pass at a time; a loser reports the contention
    // instead of blocking, and a retry after the winner finishes succeeds.
    assert!(statuses.iter().any(|&s| s == ConsolidateStatus::Success));
    assert!(statuses
        .iter()
        .all(|&s| s == ConsolidateStatus::Success || s == ConsolidateStatus::LockFail));
    let retry = index.consolidate_deletes(index.params());
    assert_eq!(retry.status, ConsolidateStatus::Success);

    assert_eq!(index.live_points(), 200);
    assert_eq!(index.empty_slots(), 200);
    index.check_integrity().unwrap();
}

#[test]
fn inner_product_stream_matches_brute_force() {
    let (n, dim, window, interval) = (300usize, 8usize, 100usize, 50usize);
    let mut rng = StdRng::seed_from_u64(9);
    let base: Vec<Vec<f32>> = (0..n)
        .map(|_| (0..dim).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect())
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("base.bin");
    let rows: Vec<&[f32]> = base.iter().map(|r| r.as_slice()).collect();
    io::write_bin(&raw, dim, &rows).unwrap();

    let transformed = dir.path().join("base.mips.bin");
    let max_norm = io::prepare_inner_product_base(&raw, &transformed).unwrap();
    assert!(max_norm > 0.0);

    let mut source = BinFile::<f32>::open(&transformed).unwrap();
    assert_eq!(source.dim(), dim + 1);
    let index = build_index::<f32>(dim + 1, window, interval, 16, 64);
    let controller =
        StreamingController::new(Arc::clone(&index), stream_params(window, interval, n)).unwrap();
    controller.run(&mut source).unwrap();
    assert_eq!(index.live_points(), window);

    // Brute-force max inner product over the live window, in the original
    // coordinates.
    let queries: Vec<Vec<f32>> = (0..10)
        .map(|_| (0..dim).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect())
        .collect();
    for q in &queries {
        let best_tag = ((n - window)..n)
            .max_by(|&i, &j| {
                let di: f32 = q.iter().zip(&base[i]).map(|(a, b)| a * b).sum();
                let dj: f32 = q.iter().zip(&base[j]).map(|(a, b)| a * b).sum();
                di.total_cmp(&dj)
            })
            .map(|i| i as u32 + 1)
            .unwrap();

        let hits = index.search(&augment_query(q), 3, 64).unwrap();
        let tags: Vec<u32> = hits.iter().map(|h| h.0).collect();
        assert!(
            tags.contains(&best_tag),
            "brute-force winner {best_tag} missing from {tags:?}"
        );
    }
}

#[test]
fn labeled_streams_grow_instead_of_sliding() {
    let (n, dim, window, interval) = (150usize, 4usize, 100usize, 50usize);
    let mut rng = StdRng::seed_from_u64(3);
    let data: Vec<f32> = (0..n * dim).map(|_| rng.random::<f32>()).collect();
    let labels: Vec<Vec<u32>> = (0..n).map(|i| vec![1 + (i % 3) as u32]).collect();

    let params = BuildParams {
        l_build: 24,
        max_degree: 8,
        alpha: 1.2,
        labeled: true,
        filtered_l_build: 16,
        ..BuildParams::default()
    };
    let capacity = window + 4 * interval;
    let mut index = DynamicIndex::<f32>::new(Metric::L2, dim, capacity, params).unwrap();
    index.set_start_points_at_random(4.0).unwrap();
    let index = Arc::new(index);

    let controller =
        StreamingController::new(Arc::clone(&index), stream_params(window, interval, n))
            .unwrap()
            .with_labels(labels.clone());
    let mut source = SliceSource::new(data.clone(), n, dim).unwrap();
    let stats = controller.run(&mut source).unwrap();

    // No deletion for labeled data: everything stays live.
    assert_eq!(stats.deletes_issued, 0);
    assert_eq!(stats.consolidations, 0);
    assert_eq!(index.live_points(), n);

    // Filtered searches only surface matching points.
    let q = &data[..dim];
    for label in 1..=3u32 {
        let hits = index.search_filtered(q, 5, 24, label).unwrap();
        assert!(!hits.is_empty());
        for (tag, _) in hits {
            assert_eq!(labels[tag as usize - 1], vec![label]);
        }
    }
}

#[test]
fn recall_over_the_live_window_meets_the_target() {
    let (n, dim, window, interval) = (1200usize, 16usize, 400usize, 100usize);
    let mut rng = StdRng::seed_from_u64(77);
    let base: Vec<Vec<f32>> = (0..n)
        .map(|_| (0..dim).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect())
        .collect();
    let flat: Vec<f32> = base.iter().flatten().copied().collect();
    let mut source = SliceSource::new(flat, n, dim).unwrap();

    let index = build_index::<f32>(dim, window, interval, 32, 80);
    let controller =
        StreamingController::new(Arc::clone(&index), stream_params(window, interval, n)).unwrap();
    controller.run(&mut source).unwrap();
    assert_eq!(index.live_points(), window);

    let k = 10;
    let mut total_recall = 0.0;
    let queries = 25;
    for qi in 0..queries {
        // Perturb a vector from the live window.
        let pick = n - window + qi * (window / queries);
        let query: Vec<f32> = base[pick]
            .iter()
            .map(|x| x + (rng.random::<f32>() - 0.5) * 0.05)
            .collect();

        let mut truth: Vec<(u32, f32)> = ((n - window)..n)
            .map(|i| {
                let d: f32 = query
                    .iter()
                    .zip(&base[i])
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                (i as u32 + 1, d)
            })
            .collect();
        truth.sort_by(|a, b| a.1.total_cmp(&b.1));
        let truth: HashSet<u32> = truth.iter().take(k).map(|&(t, _)| t).collect();

        let hits = index.search(&query, k, 100).unwrap();
        let found = hits.iter().filter(|&&(tag, _)| truth.contains(&tag)).count();
        total_recall += found as f32 / k as f32;
    }
    let recall = total_recall / queries as f32;
    assert!(recall >= 0.85, "recall@{k} over the live window was {recall}");
}

#[test]
fn saved_files_cover_the_live_window() {
    let (n, dim, window, interval) = (300usize, 4usize, 100usize, 50usize);
    let mut rng = StdRng::seed_from_u64(21);
    let data: Vec<f32> = (0..n * dim).map(|_| rng.random::<f32>()).collect();
    let mut source = SliceSource::new(data, n, dim).unwrap();

    let index = build_index::<f32>(dim, window, interval, 8, 32);
    let params = stream_params(window, interval, n);
    let controller = StreamingController::new(Arc::clone(&index), params.clone()).unwrap();
    controller.run(&mut source).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let prefix = dir
        .path()
        .join("idx")
        .to_str()
        .map(|p| swann::streaming::streaming_save_path(p, &params, n))
        .unwrap();
    index.save(Path::new(&prefix)).unwrap();

    let data_path = format!("{prefix}.data");
    let mut data_file = BinFile::<f32>::open(Path::new(&data_path)).unwrap();
    // Live points plus the frozen start point.
    assert_eq!(data_file.num_points(), window + 1);
    assert_eq!(data_file.dim(), dim);
    let mut first = vec![0f32; dim];
    data_file.load_into(0, 1, dim, &mut first).unwrap();
    // Rows are in tag order: the first row is the oldest live tag.
    let oldest = index.get_vector((n - window + 1) as u32).unwrap();
    assert_eq!(first, oldest);
}
