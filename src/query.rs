//! Fluent range-query builder and scan dispatch.
//!
//! A [`RangeQuery`] captures the query rectangle plus per-query knobs,
//! then picks a scan strategy when executed:
//!
//! * range covers the whole dataset: nothing spatial to narrow, use the
//!   thumbnail when it can answer the sample, otherwise a full scan
//!   without a range.
//! * dataset not spatially clustered: no partitions to price, thumbnail
//!   or ranged full scan.
//! * clustered: the cost-based [`IndexScan`].

use crate::cache::PartitionCache;
use crate::error::Result;
use crate::runtime::{DatasetHandle, Runtime};
use crate::scan::{FullScan, IndexScan, ThumbnailScan};
use crate::spatial::rect_contains;
use crate::stream::RecordStream;
use crate::types::Config;
use geo::Rect;
use log::debug;
use std::sync::Arc;

pub struct RangeQuery {
    runtime: Arc<dyn Runtime>,
    cache: Arc<PartitionCache>,
    config: Config,
    dataset_id: String,
    range: Rect<f64>,
    sample_count: i64,
    use_prefetch: bool,
    max_local_cache_cost: u64,
}

impl RangeQuery {
    pub(crate) fn new(
        runtime: Arc<dyn Runtime>,
        cache: Arc<PartitionCache>,
        config: &Config,
        dataset_id: impl Into<String>,
        range: Rect<f64>,
    ) -> Self {
        Self {
            runtime,
            cache,
            config: config.clone(),
            dataset_id: dataset_id.into(),
            range,
            sample_count: config.default_sample_count,
            use_prefetch: config.default_use_prefetch,
            max_local_cache_cost: config.default_max_cache_cost,
        }
    }

    /// Limit the result to roughly `count` records. Zero or negative
    /// disables sampling.
    pub fn set_sample_count(mut self, count: i64) -> Self {
        self.sample_count = count;
        self
    }

    /// Warm uncached partitions in the background when the query itself
    /// is answered remotely.
    pub fn set_use_prefetch(mut self, enabled: bool) -> Self {
        self.use_prefetch = enabled;
        self
    }

    /// Cache cost budget above which the index scan answers from the
    /// runtime instead of loading partitions locally.
    pub fn set_max_local_cache_cost(mut self, budget: u64) -> Self {
        self.max_local_cache_cost = budget;
        self
    }

    pub fn run(self) -> Result<RecordStream> {
        let dataset = self.cache.dataset_handle(&self.dataset_id)?;

        if rect_contains(&self.range, &dataset.bounds) {
            debug!(
                "range query on '{}' covers the dataset bounds",
                dataset.id
            );
            if self.thumbnail_usable(&dataset) {
                return ThumbnailScan::new(
                    self.runtime,
                    dataset,
                    self.range,
                    self.sample_count as usize,
                )
                .run();
            }
            return FullScan::new(self.runtime, dataset)
                .with_sample_count(self.sample_count)
                .run();
        }

        if !dataset.clustered {
            debug!("dataset '{}' is not spatially clustered", dataset.id);
            if self.thumbnail_usable(&dataset) {
                return ThumbnailScan::new(
                    self.runtime,
                    dataset,
                    self.range,
                    self.sample_count as usize,
                )
                .run();
            }
            return FullScan::new(self.runtime, dataset)
                .with_range(self.range)
                .with_sample_count(self.sample_count)
                .run();
        }

        IndexScan::new(self.runtime, self.cache, dataset, self.range)
            .with_sample_count(self.sample_count)
            .with_max_cache_cost(self.max_local_cache_cost)
            .with_prefetch(self.use_prefetch)
            .with_load_parallelism(self.config.load_parallelism)
            .with_prefetch_width(self.config.prefetch_width)
            .run()
    }

    fn thumbnail_usable(&self, dataset: &DatasetHandle) -> bool {
        dataset.has_thumbnail() && self.sample_count > 0
    }
}
