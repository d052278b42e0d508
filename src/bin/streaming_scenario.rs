//! Maintain a sliding-window ANN index over a vector stream.
//!
//! Loads batches from a binary vector file, inserts them in parallel, and
//! pipelines lazy deletion plus consolidation of the oldest batch in a
//! background task, keeping an active window of the most recent points
//! live. The finished index is saved under
//! `<prefix>.after-streaming-act<W>-cons<C>-max<M>`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use swann::distance::Metric;
use swann::index::{BuildParams, DynamicIndex};
use swann::io::{self, BinElement, BinFile};
use swann::labels;
use swann::streaming::{
    default_worker_threads, streaming_save_path, StreamParams, StreamingController,
};
use swann::{IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DataType {
    Int8,
    Uint8,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DistFn {
    L2,
    Mips,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LabelType {
    /// 32 bits per label.
    Uint,
    /// Accepted for compatibility; labels are stored 32-bit either way.
    Ushort,
}

#[derive(Parser, Debug)]
#[command(
    name = "streaming_scenario",
    about = "Maintain a sliding-window ANN index over a vector stream"
)]
struct Args {
    /// Element type of the vector file.
    #[arg(long = "data_type", value_enum)]
    data_type: DataType,

    /// Distance function; mips rewrites the base via the unit-norm
    /// transform and then searches in L2.
    #[arg(long = "dist_fn", value_enum)]
    dist_fn: DistFn,

    /// Input vector file (u32 npts, u32 dim, row-major elements).
    #[arg(long = "data_path")]
    data_path: PathBuf,

    /// Prefix for saved index files and label side files.
    #[arg(long = "index_path_prefix")]
    index_path_prefix: String,

    /// Maximum graph out-degree.
    #[arg(long = "max_degree", short = 'R', default_value_t = 64)]
    max_degree: usize,

    /// Insertion beam width; higher builds better graphs.
    #[arg(long = "Lbuild", short = 'L', default_value_t = 100)]
    l_build: usize,

    /// Occlusion factor: 1.0 for a sparse graph, 1.2-1.4 for denser graphs
    /// with lower diameter.
    #[arg(long, default_value_t = 1.2)]
    alpha: f32,

    /// Threads for insertion phases.
    #[arg(long = "insert_threads", default_value_t = default_worker_threads())]
    insert_threads: usize,

    /// Threads for consolidation passes.
    #[arg(long = "consolidate_threads", default_value_t = default_worker_threads())]
    consolidate_threads: usize,

    /// Total points to stream from the file; 0 streams all of them.
    #[arg(long = "max_points_to_insert", default_value_t = 0)]
    max_points_to_insert: usize,

    /// Size of the active window that slides through the data.
    #[arg(long = "active_window")]
    active_window: usize,

    /// Points inserted on the right and deleted on the left per iteration.
    #[arg(long = "consolidate_interval")]
    consolidate_interval: usize,

    /// Radius of the sphere the random start points are placed on.
    #[arg(long = "start_point_norm")]
    start_point_norm: f32,

    /// Number of frozen start points used when inserting and searching.
    #[arg(long = "num_start_points", default_value_t = 1)]
    num_start_points: usize,

    /// Text file with comma-separated label tokens, one line per point.
    #[arg(long = "label_file")]
    label_file: Option<PathBuf>,

    /// Label token that matches every filter; only with --label_file.
    #[arg(long = "universal_label")]
    universal_label: Option<String>,

    /// Beam width for wiring in labeled points; 0 falls back to --Lbuild.
    #[arg(long = "FilteredLbuild", default_value_t = 0)]
    filtered_l_build: usize,

    /// Storage width of label ids.
    #[arg(long = "label_type", value_enum, default_value_t = LabelType::Uint)]
    label_type: LabelType,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    if args.start_point_norm == 0.0 {
        return Err(IndexError::InvalidParameter(
            "a nonzero start point norm is required".into(),
        ));
    }

    let mut data_path = args.data_path.clone();
    if args.dist_fn == DistFn::Mips {
        if args.data_type != DataType::Float {
            return Err(IndexError::InvalidParameter(
                "mips requires float data; convert integer bases to float first".into(),
            ));
        }
        let transformed = PathBuf::from(format!("{}.mips.bin", args.index_path_prefix));
        let max_norm = io::prepare_inner_product_base(&args.data_path, &transformed)?;
        info!(max_norm, path = %transformed.display(), "prepared inner-product base");
        data_path = transformed;
    }

    match args.data_type {
        DataType::Float => run_typed::<f32>(&args, &data_path),
        DataType::Int8 => run_typed::<i8>(&args, &data_path),
        DataType::Uint8 => run_typed::<u8>(&args, &data_path),
    }
}

fn run_typed<T: BinElement>(args: &Args, data_path: &Path) -> Result<()> {
    let mut source = BinFile::<T>::open(data_path)?;
    let (num_points, dim) = (source.num_points(), source.dim());
    info!(num_points, dim, path = %data_path.display(), "stream metadata");

    let mut label_rows = None;
    if let Some(label_file) = &args.label_file {
        let formatted = PathBuf::from(format!("{}_label_formatted.txt", args.index_path_prefix));
        let map = PathBuf::from(format!("{}_labels_map.txt", args.index_path_prefix));
        let conv = labels::convert_label_file(
            label_file,
            &formatted,
            &map,
            args.universal_label.as_deref(),
        )?;
        info!(
            labels = conv.mapping.len(),
            label_type = ?args.label_type,
            formatted = %formatted.display(),
            "labels formatted"
        );
        label_rows = Some(conv.labels);
    }

    let params = BuildParams {
        l_build: args.l_build,
        max_degree: args.max_degree,
        alpha: args.alpha,
        num_threads: args.insert_threads,
        num_frozen_points: args.num_start_points,
        labeled: label_rows.is_some(),
        filtered_l_build: args.filtered_l_build,
        ..BuildParams::default()
    };
    let metric = match args.dist_fn {
        DistFn::L2 => Metric::L2,
        DistFn::Mips => Metric::InnerProduct,
    };
    let capacity = args.active_window + 4 * args.consolidate_interval;
    let mut index = DynamicIndex::<T>::new(metric, dim, capacity, params)?;
    index.set_start_points_at_random(args.start_point_norm)?;
    if label_rows.is_some() {
        if args.universal_label.is_some() {
            // The universal token is always assigned label id 0.
            index.set_universal_label(0)?;
        }
    } else {
        index.enable_delete()?;
    }
    let index = Arc::new(index);

    let stream = StreamParams {
        active_window: args.active_window,
        consolidate_interval: args.consolidate_interval,
        max_points_to_insert: args.max_points_to_insert,
        insert_threads: args.insert_threads,
        consolidate_threads: args.consolidate_threads,
        retry_backoff: Duration::from_secs(5),
    };
    let mut controller = StreamingController::new(Arc::clone(&index), stream.clone())?;
    if let Some(rows) = label_rows {
        controller = controller.with_labels(rows);
    }
    let stats = controller.run(&mut source)?;
    info!(
        inserted = stats.points_inserted,
        failures = stats.insert_failures,
        deleted = stats.deletes_issued,
        consolidations = stats.consolidations,
        live = index.live_points(),
        seconds = stats.seconds,
        "streaming complete"
    );

    let max_insert = if args.max_points_to_insert == 0 {
        num_points
    } else {
        args.max_points_to_insert
    };
    let save_path = streaming_save_path(&args.index_path_prefix, &stream, max_insert);
    index.save(Path::new(&save_path))?;
    info!(path = save_path, "index saved");
    Ok(())
}
