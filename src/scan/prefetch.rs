//! Opportunistic background population of the partition cache.
//!
//! While a remote answer streams to the caller, the prefetcher pulls the
//! most specific not-yet-cached partitions into the cache so the next
//! query over the same area can be served locally. Prefetch work never
//! blocks or fails the foreground query: each task is independently
//! cancellable through a cooperative flag checked at I/O boundaries, and a
//! failed or cancelled task removes its own cache entry.

use crate::cache::PartitionCache;
use crate::runtime::Runtime;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

/// One background fetch of a single partition.
pub struct PrefetchTask {
    quad_key: String,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PrefetchTask {
    /// Request cooperative cancellation. The task stops at its next
    /// checkpoint; I/O already in flight is allowed to finish and the
    /// task then cleans up after itself.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Wait for the task to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn quad_key(&self) -> &str {
        &self.quad_key
    }
}

/// Handle over one prefetch round. Dropping it detaches the tasks; they
/// finish on their own without affecting the foreground query.
pub struct PrefetchHandle {
    tasks: Vec<PrefetchTask>,
}

impl PrefetchHandle {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn cancel_all(&self) {
        for task in &self.tasks {
            task.cancel();
        }
    }

    pub fn join_all(&mut self) {
        for task in &mut self.tasks {
            task.join();
        }
    }

    pub fn tasks(&self) -> &[PrefetchTask] {
        &self.tasks
    }
}

/// Spawn a prefetch round for up to `width` of the given uncached
/// quad-keys, preferring the longest (most specific, smallest-tile) keys.
pub fn spawn_prefetch(
    runtime: Arc<dyn Runtime>,
    cache: Arc<PartitionCache>,
    dataset_id: &str,
    mut uncached_keys: Vec<String>,
    width: usize,
) -> PrefetchHandle {
    uncached_keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    uncached_keys.truncate(width);

    debug!(
        "prefetching {} partition(s) of dataset '{}'",
        uncached_keys.len(),
        dataset_id
    );

    let tasks = uncached_keys
        .into_iter()
        .map(|quad_key| {
            let cancel = Arc::new(AtomicBool::new(false));
            let handle = spawn_task(
                runtime.clone(),
                cache.clone(),
                dataset_id.to_string(),
                quad_key.clone(),
                cancel.clone(),
            );
            PrefetchTask {
                quad_key,
                cancel,
                handle: Some(handle),
            }
        })
        .collect();

    PrefetchHandle { tasks }
}

fn spawn_task(
    runtime: Arc<dyn Runtime>,
    cache: Arc<PartitionCache>,
    dataset_id: String,
    quad_key: String,
    cancel: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        if cancel.load(Ordering::Relaxed) {
            return;
        }

        let records = match runtime
            .read_spatial_cluster(&dataset_id, &quad_key)
            .and_then(|stream| stream.collect_records())
        {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "prefetch of {}/{} failed while reading from runtime: {}",
                    dataset_id, quad_key, e
                );
                return;
            }
        };

        // Checkpoint between read and write: a cancel request arriving
        // during the read stops the task before it touches the cache.
        if cancel.load(Ordering::Relaxed) {
            return;
        }

        if let Err(e) = cache.put(&dataset_id, &quad_key, records) {
            warn!("prefetch of {}/{} failed to write: {}", dataset_id, quad_key, e);
            let _ = cache.remove(&dataset_id, &quad_key);
            return;
        }

        // Cancelled after the write: undo our own entry so cancellation
        // leaves the cache as it was.
        if cancel.load(Ordering::Relaxed) {
            let _ = cache.remove(&dataset_id, &quad_key);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::SpatialClusterInfo;
    use crate::runtime::MemoryRuntime;
    use crate::types::{Config, Record};
    use geo::Rect;
    use tempfile::TempDir;

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Rect<f64> {
        Rect::new((min_x, min_y), (max_x, max_y))
    }

    fn setup(quad_keys: &[&str]) -> (Arc<MemoryRuntime>, Arc<PartitionCache>, TempDir) {
        let runtime = Arc::new(MemoryRuntime::new());
        let bounds = rect(0.0, 0.0, 100.0, 100.0);
        let partitions = quad_keys
            .iter()
            .map(|qk| {
                let records: Vec<Record> = (0..4)
                    .map(|i| Record::point(format!("{qk}-{i}"), i as f64, i as f64, ""))
                    .collect();
                (SpatialClusterInfo::new(*qk, bounds, bounds, 4), records)
            })
            .collect();
        runtime.register_clustered("d", bounds, partitions);

        let dir = TempDir::new().unwrap();
        let cache = Arc::new(
            PartitionCache::open(dir.path(), runtime.clone(), &Config::default()).unwrap(),
        );
        (runtime, cache, dir)
    }

    #[test]
    fn test_prefetch_populates_cache() {
        let (runtime, cache, _dir) = setup(&["0", "1", "2"]);

        let mut handle = spawn_prefetch(
            runtime,
            cache.clone(),
            "d",
            vec!["0".into(), "1".into(), "2".into()],
            5,
        );
        handle.join_all();

        assert!(cache.exists("d", "0"));
        assert!(cache.exists("d", "1"));
        assert!(cache.exists("d", "2"));
    }

    #[test]
    fn test_prefetch_prefers_longest_keys_and_caps_width() {
        let (runtime, cache, _dir) = setup(&["0", "01", "012", "0123", "01230", "012301"]);

        let keys: Vec<String> = ["0", "01", "012", "0123", "01230", "012301"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut handle = spawn_prefetch(runtime, cache.clone(), "d", keys, 3);
        assert_eq!(handle.task_count(), 3);
        let selected: Vec<&str> = handle.tasks().iter().map(|t| t.quad_key()).collect();
        assert_eq!(selected, ["012301", "01230", "0123"]);
        handle.join_all();

        assert!(cache.exists("d", "012301"));
        assert!(!cache.exists("d", "0"));
    }

    #[test]
    fn test_prefetch_failure_is_local() {
        let (runtime, cache, _dir) = setup(&["0"]);

        // "9" does not exist in the runtime; the task logs and leaves no
        // cache entry behind.
        let mut handle = spawn_prefetch(
            runtime,
            cache.clone(),
            "d",
            vec!["0".into(), "9".into()],
            5,
        );
        handle.join_all();

        assert!(cache.exists("d", "0"));
        assert!(!cache.exists("d", "9"));
    }

    /// Delegating runtime that slows down cluster reads so cancellation
    /// can land mid-task deterministically.
    struct SlowRuntime {
        inner: Arc<MemoryRuntime>,
        delay: std::time::Duration,
    }

    impl Runtime for SlowRuntime {
        fn get_dataset(&self, id: &str) -> crate::error::Result<crate::runtime::DatasetHandle> {
            self.inner.get_dataset(id)
        }

        fn query_spatial_cluster_info(
            &self,
            dataset_id: &str,
            range: &Rect<f64>,
        ) -> crate::error::Result<Vec<SpatialClusterInfo>> {
            self.inner.query_spatial_cluster_info(dataset_id, range)
        }

        fn read_spatial_cluster(
            &self,
            dataset_id: &str,
            quad_key: &str,
        ) -> crate::error::Result<crate::stream::RecordStream> {
            std::thread::sleep(self.delay);
            self.inner.read_spatial_cluster(dataset_id, quad_key)
        }

        fn read_thumbnail(
            &self,
            dataset_id: &str,
            range: &Rect<f64>,
            sample_count: usize,
        ) -> crate::error::Result<crate::stream::RecordStream> {
            self.inner.read_thumbnail(dataset_id, range, sample_count)
        }

        fn query(
            &self,
            dataset_id: &str,
            range: Option<&Rect<f64>>,
        ) -> crate::error::Result<crate::stream::RecordStream> {
            self.inner.query(dataset_id, range)
        }

        fn materialize(
            &self,
            dataset_id: &str,
            range: &Rect<f64>,
        ) -> crate::error::Result<crate::runtime::DatasetHandle> {
            self.inner.materialize(dataset_id, range)
        }

        fn delete_dataset(&self, id: &str) -> crate::error::Result<()> {
            self.inner.delete_dataset(id)
        }
    }

    #[test]
    fn test_cancel_during_read_leaves_no_entry() {
        let (inner, cache, _dir) = setup(&["0", "1"]);
        let runtime = Arc::new(SlowRuntime {
            inner,
            delay: std::time::Duration::from_millis(200),
        });

        let mut handle = spawn_prefetch(
            runtime,
            cache.clone(),
            "d",
            vec!["0".into(), "1".into()],
            5,
        );
        // Tasks are still sleeping inside the runtime read; the flag is
        // seen at the read/write checkpoint.
        handle.cancel_all();
        handle.join_all();

        assert!(!cache.exists("d", "0"));
        assert!(!cache.exists("d", "1"));
    }
}
