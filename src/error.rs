//! Error types for quadscan operations.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QuadScanError>;

/// Errors produced by the range-query engine and its partition cache.
#[derive(Debug, Error)]
pub enum QuadScanError {
    /// Disk read/write/corruption failure inside the partition cache.
    ///
    /// On the read path this is recoverable: the cache treats the entry as
    /// a miss and refetches from the runtime. Within the index scan's
    /// partition fan-out it is logged and the partition is skipped.
    #[error("cache I/O failure for {dataset}/{quad_key}: {detail}")]
    CacheIo {
        dataset: String,
        quad_key: String,
        detail: String,
    },

    /// The dataset has no precomputed thumbnail.
    #[error("dataset '{0}' has no thumbnail")]
    ThumbnailNotFound(String),

    /// The thumbnail's sampling ratio is too coarse for the request.
    #[error(
        "thumbnail of dataset '{dataset}' is too coarse: ratio {available} cannot satisfy {requested} requested rows"
    )]
    InsufficientThumbnail {
        dataset: String,
        available: f64,
        requested: usize,
    },

    /// A failure from the runtime collaborator, wrapped with scan context.
    /// Never retried by this crate.
    #[error("runtime failure for dataset '{dataset}': {detail}")]
    RuntimeUnavailable { dataset: String, detail: String },

    /// The requested dataset is unknown to the runtime.
    #[error("dataset '{0}' not found")]
    DatasetNotFound(String),

    /// Record batch could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<bincode::Error> for QuadScanError {
    fn from(err: bincode::Error) -> Self {
        QuadScanError::Serialization(err.to_string())
    }
}

impl QuadScanError {
    /// Build a `CacheIo` error for a partition key.
    pub fn cache_io(
        dataset: impl Into<String>,
        quad_key: impl Into<String>,
        detail: impl std::fmt::Display,
    ) -> Self {
        QuadScanError::CacheIo {
            dataset: dataset.into(),
            quad_key: quad_key.into(),
            detail: detail.to_string(),
        }
    }

    /// Build a `RuntimeUnavailable` error carrying the dataset context.
    pub fn runtime(dataset: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        QuadScanError::RuntimeUnavailable {
            dataset: dataset.into(),
            detail: detail.to_string(),
        }
    }

    /// True for thumbnail errors that fallback paths are allowed to catch.
    pub fn is_thumbnail_miss(&self) -> bool {
        matches!(
            self,
            QuadScanError::ThumbnailNotFound(_) | QuadScanError::InsufficientThumbnail { .. }
        )
    }
}
