//! Thumbnail-based approximate scan.

use crate::error::Result;
use crate::runtime::{DatasetHandle, Runtime};
use crate::stream::RecordStream;
use geo::Rect;
use std::sync::Arc;

/// Reads `(range, sample_count)` straight from the dataset's precomputed
/// thumbnail. `ThumbnailNotFound` and `InsufficientThumbnail` propagate
/// unchanged; fallback to another strategy is the caller's decision.
pub struct ThumbnailScan {
    runtime: Arc<dyn Runtime>,
    dataset: DatasetHandle,
    range: Rect<f64>,
    sample_count: usize,
}

impl ThumbnailScan {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        dataset: DatasetHandle,
        range: Rect<f64>,
        sample_count: usize,
    ) -> Self {
        Self {
            runtime,
            dataset,
            range,
            sample_count,
        }
    }

    pub fn run(&self) -> Result<RecordStream> {
        self.runtime
            .read_thumbnail(&self.dataset.id, &self.range, self.sample_count)
    }
}
