//! Top-level store handle tying the runtime, partition cache, and
//! configuration together.

use crate::cache::PartitionCache;
use crate::error::Result;
use crate::query::RangeQuery;
use crate::runtime::{DatasetHandle, Runtime};
use crate::types::{CacheStats, Config};
use geo::Rect;
use std::sync::Arc;

/// Entry point for issuing spatial range queries against datasets served
/// by a [`Runtime`].
///
/// Cloning is cheap; all clones share the same partition cache and
/// handle cache.
#[derive(Clone)]
pub struct GeoDataStore {
    runtime: Arc<dyn Runtime>,
    cache: Arc<PartitionCache>,
    config: Config,
}

impl std::fmt::Debug for GeoDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoDataStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GeoDataStore {
    pub(crate) fn new(
        runtime: Arc<dyn Runtime>,
        cache: Arc<PartitionCache>,
        config: Config,
    ) -> Self {
        Self {
            runtime,
            cache,
            config,
        }
    }

    /// Start building a range query over `dataset_id`. Per-query knobs
    /// default from the store [`Config`].
    pub fn range_query(&self, dataset_id: impl Into<String>, range: Rect<f64>) -> RangeQuery {
        RangeQuery::new(
            self.runtime.clone(),
            self.cache.clone(),
            &self.config,
            dataset_id,
            range,
        )
    }

    /// Metadata for a dataset, fetched through the handle cache.
    pub fn dataset(&self, dataset_id: &str) -> Result<DatasetHandle> {
        self.cache.dataset_handle(dataset_id)
    }

    /// Expire idle dataset handles and cascade their partition eviction.
    /// Call periodically; queries do not sweep on their own beyond the
    /// handles they touch.
    pub fn maintain(&self) {
        self.cache.maintain();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
