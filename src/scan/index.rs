//! Cost-based index scan over spatially clustered datasets.
//!
//! The scan estimates per-partition match counts from cluster metadata,
//! derives a sampling ratio, and then chooses an execution path:
//!
//! 1. Estimated read volume close to the whole dataset (> 70%): partition
//!    access buys nothing, delegate to thumbnail or full scan.
//! 2. Cache-access cost above the budget: answer from the runtime
//!    (thumbnail preferred when fine enough), optionally prefetching
//!    uncached partitions in the background.
//! 3. Otherwise: load the matching partitions through the cache with
//!    bounded parallelism, filter each record against the query rectangle
//!    exactly, and cap each partition's contribution by the sampling
//!    ratio.

use crate::cache::PartitionCache;
use crate::cluster::estimate_matches;
use crate::error::Result;
use crate::runtime::{DatasetHandle, Runtime};
use crate::scan::full::FullScan;
use crate::scan::prefetch::spawn_prefetch;
use crate::scan::thumbnail::ThumbnailScan;
use crate::spatial::record_intersects;
use crate::stream::RecordStream;
use geo::Rect;
use log::{debug, warn};
use std::sync::Arc;

/// Cost of reading one partition that is already cached on local disk.
pub const CACHE_COST: u64 = 1;
/// Cost of reading one partition that must come over the network.
pub const NETWORK_COST: u64 = 2;

/// Estimated read volume above which partitioned access degenerates into
/// a full scan.
const FULL_SCAN_RATIO_THRESHOLD: f64 = 0.7;

pub struct IndexScan {
    runtime: Arc<dyn Runtime>,
    cache: Arc<PartitionCache>,
    dataset: DatasetHandle,
    range: Rect<f64>,
    sample_count: i64,
    max_cache_cost: u64,
    use_prefetch: bool,
    load_parallelism: usize,
    prefetch_width: usize,
}

impl IndexScan {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        cache: Arc<PartitionCache>,
        dataset: DatasetHandle,
        range: Rect<f64>,
    ) -> Self {
        Self {
            runtime,
            cache,
            dataset,
            range,
            sample_count: 0,
            max_cache_cost: 16,
            use_prefetch: false,
            load_parallelism: 3,
            prefetch_width: 5,
        }
    }

    pub fn with_sample_count(mut self, count: i64) -> Self {
        self.sample_count = count;
        self
    }

    pub fn with_max_cache_cost(mut self, budget: u64) -> Self {
        self.max_cache_cost = budget;
        self
    }

    pub fn with_prefetch(mut self, enabled: bool) -> Self {
        self.use_prefetch = enabled;
        self
    }

    pub fn with_load_parallelism(mut self, parallelism: usize) -> Self {
        self.load_parallelism = parallelism.max(1);
        self
    }

    pub fn with_prefetch_width(mut self, width: usize) -> Self {
        self.prefetch_width = width;
        self
    }

    pub fn run(self) -> Result<RecordStream> {
        let clusters = self
            .runtime
            .query_spatial_cluster_info(&self.dataset.id, &self.range)?;
        let matches = estimate_matches(&clusters, &self.range);
        let total = matches.total_match_count;

        let sample_ratio = if self.sample_count <= 0 || total == 0 {
            1.0
        } else {
            (self.sample_count as f64 / total as f64).min(1.0)
        };

        // The full-scan early exit comes before any cache cost work: when
        // the estimated read volume approaches the whole dataset there is
        // nothing for partitioned access to win.
        let full_ratio = if self.dataset.record_count == 0 {
            1.0
        } else {
            (sample_ratio * total as f64) / self.dataset.record_count as f64
        };
        if full_ratio > FULL_SCAN_RATIO_THRESHOLD {
            debug!(
                "index scan of '{}' degenerates to full scan (ratio {:.2})",
                self.dataset.id, full_ratio
            );
            if self.dataset.has_thumbnail() && self.sample_count > 0 {
                return ThumbnailScan::new(
                    self.runtime,
                    self.dataset,
                    self.range,
                    self.sample_count as usize,
                )
                .run();
            }
            return FullScan::new(self.runtime, self.dataset)
                .with_range(self.range)
                .with_sample_count(self.sample_count)
                .with_sample_ratio(sample_ratio)
                .run();
        }

        // Partition the matching quad-keys by cache presence and price
        // the local path.
        let mut cached: Vec<(String, u64)> = Vec::new();
        let mut uncached: Vec<(String, u64)> = Vec::new();
        for (quad_key, estimate) in &matches.per_quad_key {
            if estimate.match_count == 0 {
                continue;
            }
            if self.cache.exists(&self.dataset.id, quad_key) {
                cached.push((quad_key.clone(), estimate.match_count));
            } else {
                uncached.push((quad_key.clone(), estimate.match_count));
            }
        }

        let cost = cached.len() as u64 * CACHE_COST + uncached.len() as u64 * NETWORK_COST;
        debug!(
            "index scan of '{}': {} cached / {} uncached partitions, cost {} (budget {})",
            self.dataset.id,
            cached.len(),
            uncached.len(),
            cost,
            self.max_cache_cost
        );

        if cost > self.max_cache_cost {
            self.run_remote(sample_ratio, uncached)
        } else {
            let mut keys = cached;
            keys.append(&mut uncached);
            self.run_local(sample_ratio, keys)
        }
    }

    /// Serve the query from the runtime. The foreground answer streams
    /// immediately; prefetch, when enabled, runs as a detached background
    /// side effect.
    fn run_remote(self, sample_ratio: f64, uncached: Vec<(String, u64)>) -> Result<RecordStream> {
        if self.use_prefetch && !uncached.is_empty() {
            let keys = uncached.into_iter().map(|(qk, _)| qk).collect();
            let handle = spawn_prefetch(
                self.runtime.clone(),
                self.cache.clone(),
                &self.dataset.id,
                keys,
                self.prefetch_width,
            );
            // Detach: the result must not wait on background work.
            drop(handle);
        }

        // Prefer the thumbnail when it retains at least the fraction of
        // records the query needs.
        if self.dataset.has_thumbnail()
            && self.sample_count > 0
            && self.dataset.thumbnail_ratio.unwrap_or(0.0) >= sample_ratio
        {
            match ThumbnailScan::new(
                self.runtime.clone(),
                self.dataset.clone(),
                self.range,
                self.sample_count as usize,
            )
            .run()
            {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_thumbnail_miss() => {
                    debug!(
                        "thumbnail unusable for '{}' ({}), querying runtime",
                        self.dataset.id, e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let stream = self.runtime.query(&self.dataset.id, Some(&self.range))?;
        let stream = if sample_ratio < 1.0 {
            stream.sample(sample_ratio)
        } else {
            stream
        };
        if self.sample_count > 0 {
            Ok(stream.take_records(self.sample_count as usize))
        } else {
            Ok(stream)
        }
    }

    /// Serve the query from the partition cache with bounded parallelism.
    ///
    /// Per-partition load failures are logged and that partition's
    /// contribution is skipped; availability wins over completeness on
    /// this path.
    fn run_local(self, sample_ratio: f64, keys: Vec<(String, u64)>) -> Result<RecordStream> {
        if keys.is_empty() {
            return Ok(RecordStream::empty());
        }

        let (work_tx, work_rx) = crossbeam_channel::unbounded::<(String, u64)>();
        let (out_tx, out_rx) = crossbeam_channel::unbounded::<Result<crate::types::Record>>();
        for key in keys {
            // Receivers stay alive below, the send cannot fail.
            let _ = work_tx.send(key);
        }
        drop(work_tx);

        let workers: Vec<std::thread::JoinHandle<()>> = (0..self.load_parallelism)
            .map(|_| {
                let work_rx = work_rx.clone();
                let out_tx = out_tx.clone();
                let cache = self.cache.clone();
                let dataset_id = self.dataset.id.clone();
                let range = self.range;

                std::thread::spawn(move || {
                    while let Ok((quad_key, match_count)) = work_rx.recv() {
                        let stream = match cache.get(&dataset_id, &quad_key) {
                            Ok(stream) => stream,
                            Err(e) => {
                                warn!(
                                    "skipping partition {}/{}: {}",
                                    dataset_id, quad_key, e
                                );
                                continue;
                            }
                        };

                        let cap = if sample_ratio < 1.0 {
                            Some(((match_count as f64 * sample_ratio).round() as usize).max(1))
                        } else {
                            None
                        };

                        let mut sent = 0usize;
                        for item in stream {
                            match item {
                                Ok(record) => {
                                    if !record_intersects(&record, &range) {
                                        continue;
                                    }
                                    if out_tx.send(Ok(record)).is_err() {
                                        // Consumer closed the stream.
                                        return;
                                    }
                                    sent += 1;
                                    if let Some(cap) = cap
                                        && sent >= cap
                                    {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!(
                                        "skipping rest of partition {}/{}: {}",
                                        dataset_id, quad_key, e
                                    );
                                    break;
                                }
                            }
                        }
                    }
                })
            })
            .collect();
        drop(out_tx);

        // Closing the stream drops the receiver first, which unblocks any
        // worker mid-send; joining afterwards cannot deadlock.
        let stream = RecordStream::from_iter(Box::new(out_rx.into_iter())).on_close(move || {
            for worker in workers {
                let _ = worker.join();
            }
        });
        Ok(stream)
    }
}
