//! Error types for swann.

use thiserror::Error;

/// Errors surfaced by index and streaming operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The tag is already mapped to a live slot.
    #[error("tag {0} is already present in the index")]
    DuplicateTag(u32),

    /// No free slot remains; live + tombstoned points fill the capacity.
    #[error("index is full: all {0} slots are in use")]
    Capacity(usize),

    /// Vector length does not match the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Deletion requested on an index that does not support it
    /// (labeled indices, or `enable_delete` was never called).
    #[error("deletes are not enabled on this index")]
    DeletesDisabled,

    /// A vector/truthset file does not match its declared size.
    #[error("file format error: {0}")]
    FileFormat(String),

    /// Invalid configuration or parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A live node still pointed at a released slot after consolidation.
    #[error("inconsistent neighbor state after consolidation")]
    InconsistentCount,

    /// A background delete/consolidate task died.
    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for swann operations.
pub type Result<T> = std::result::Result<T, IndexError>;
