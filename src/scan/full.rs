//! Full (possibly range-restricted, possibly sampled) dataset scan.

use crate::error::Result;
use crate::runtime::{DatasetHandle, Runtime};
use crate::stream::RecordStream;
use geo::Rect;
use log::{debug, warn};
use std::sync::Arc;

/// Scans a whole dataset or a rectangle of it.
///
/// When a sample count is requested without an explicit ratio, the ratio is
/// derived from a record-count denominator: the dataset's own count for an
/// unrestricted scan, or the count of a temporary dataset materialized from
/// the range for a restricted one. The temporary dataset is deleted when
/// the returned stream closes.
pub struct FullScan {
    runtime: Arc<dyn Runtime>,
    dataset: DatasetHandle,
    range: Option<Rect<f64>>,
    sample_count: i64,
    sample_ratio: Option<f64>,
}

impl FullScan {
    pub fn new(runtime: Arc<dyn Runtime>, dataset: DatasetHandle) -> Self {
        Self {
            runtime,
            dataset,
            range: None,
            sample_count: 0,
            sample_ratio: None,
        }
    }

    /// Restrict the scan to `range`.
    pub fn with_range(mut self, range: Rect<f64>) -> Self {
        self.range = Some(range);
        self
    }

    /// Bound the result to approximately `count` rows. Zero or negative
    /// disables sampling.
    pub fn with_sample_count(mut self, count: i64) -> Self {
        self.sample_count = count;
        self
    }

    /// Fix the sample ratio explicitly instead of deriving it.
    pub fn with_sample_ratio(mut self, ratio: f64) -> Self {
        self.sample_ratio = Some(ratio);
        self
    }

    pub fn run(self) -> Result<RecordStream> {
        if let Some(ratio) = self.sample_ratio {
            let stream = self.runtime.query(&self.dataset.id, self.range.as_ref())?;
            return Ok(Self::apply_sampling(stream, ratio, self.sample_count));
        }

        if self.sample_count <= 0 {
            // No sampling requested: plain (ranged) scan.
            return self.runtime.query(&self.dataset.id, self.range.as_ref());
        }

        match self.range {
            None => {
                let denominator = self.dataset.record_count;
                let ratio = Self::derive_ratio(self.sample_count, denominator);
                let stream = self.runtime.query(&self.dataset.id, None)?;
                Ok(Self::apply_sampling(stream, ratio, self.sample_count))
            }
            Some(range) => {
                // Materialize exactly the matching records so the ratio
                // denominator reflects the range, then scan the temporary
                // dataset and delete it when the stream closes.
                let temp = self.runtime.materialize(&self.dataset.id, &range)?;
                debug!(
                    "materialized temporary dataset '{}' ({} records) for ranged scan of '{}'",
                    temp.id, temp.record_count, self.dataset.id
                );

                let ratio = Self::derive_ratio(self.sample_count, temp.record_count);
                let stream = match self.runtime.query(&temp.id, None) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = self.runtime.delete_dataset(&temp.id);
                        return Err(e);
                    }
                };

                let runtime = self.runtime.clone();
                let temp_id = temp.id.clone();
                let stream = Self::apply_sampling(stream, ratio, self.sample_count).on_close(
                    move || {
                        if let Err(e) = runtime.delete_dataset(&temp_id) {
                            warn!("failed to delete temporary dataset '{}': {}", temp_id, e);
                        }
                    },
                );
                Ok(stream)
            }
        }
    }

    fn derive_ratio(sample_count: i64, denominator: u64) -> f64 {
        if denominator == 0 {
            return 1.0;
        }
        sample_count as f64 / denominator as f64
    }

    /// Probabilistic sample capped by a hard take: sampling may overshoot,
    /// the cap guarantees the caller never receives more than requested.
    fn apply_sampling(stream: RecordStream, ratio: f64, sample_count: i64) -> RecordStream {
        if ratio >= 1.0 {
            return stream;
        }
        let sampled = stream.sample(ratio);
        if sample_count > 0 {
            sampled.take_records(sample_count as usize)
        } else {
            sampled
        }
    }
}
