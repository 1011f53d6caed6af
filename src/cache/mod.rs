//! Disk-backed cache of compressed spatial partitions.
//!
//! Each cached partition lives at `<root>/<dataset id>/<quad key>` as a
//! bincode batch compressed with lz4. Batches are shuffled before being
//! written so later parallel or sampled consumers see no positional bias
//! from the original cluster layout. Writes go through a temporary file
//! and an atomic rename, so readers never observe a partial file.
//!
//! The cache owns a secondary in-memory [`HandleCache`] of dataset
//! metadata; expiry of a dataset handle cascades into removal of every
//! partition file of that dataset via an [`EvictionListener`].

pub mod handles;

pub use handles::{EvictionListener, HandleCache};

use crate::error::{QuadScanError, Result};
use crate::runtime::{DatasetHandle, Runtime};
use crate::stream::RecordStream;
use crate::types::{CacheStats, Config, Record};
use log::{debug, warn};
use rand::seq::SliceRandom;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Cascade hook: when a dataset handle expires, drop the dataset's whole
/// partition directory.
struct PartitionEvictionListener {
    root: PathBuf,
}

impl EvictionListener for PartitionEvictionListener {
    fn on_evict(&self, dataset_id: &str) {
        let dir = self.root.join(dataset_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => debug!("evicted partition files of dataset '{}'", dataset_id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "failed to evict partition files of dataset '{}': {}",
                dataset_id, e
            ),
        }
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "tmp")
}

/// Temp files left behind by a crash mid-write. Live entries never carry
/// the `.tmp` extension, so removal cannot race an install rename.
fn remove_stray_temps(root: &Path) {
    let Ok(datasets) = fs::read_dir(root) else {
        return;
    };
    for dataset in datasets.flatten() {
        let Ok(files) = fs::read_dir(dataset.path()) else {
            continue;
        };
        for file in files.flatten() {
            let path = file.path();
            if is_temp_file(&path) {
                debug!("removing stray temp file {}", path.display());
                let _ = fs::remove_file(&path);
            }
        }
    }
}

/// Disk-backed cache mapping `(dataset id, quad key)` to a compressed
/// record batch.
pub struct PartitionCache {
    root: PathBuf,
    runtime: Arc<dyn Runtime>,
    handles: Arc<HandleCache>,
    partition_ttl: Option<Duration>,
}

impl PartitionCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, runtime: Arc<dyn Runtime>, config: &Config) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        remove_stray_temps(&root);

        let handles = Arc::new(HandleCache::new(config.handle_expiry()));
        handles.register_listener(Arc::new(PartitionEvictionListener { root: root.clone() }));

        Ok(Self {
            root,
            runtime,
            handles,
            partition_ttl: config.partition_ttl(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Dataset handle lookup through the expiring handle cache. Every call
    /// refreshes the handle's expiry.
    pub fn dataset_handle(&self, dataset_id: &str) -> Result<DatasetHandle> {
        self.handles
            .get_or_load(dataset_id, || self.runtime.get_dataset(dataset_id))
    }

    /// True iff a (fresh) cache file exists for the key. Never fails;
    /// non-existence is not an error.
    pub fn exists(&self, dataset_id: &str, quad_key: &str) -> bool {
        let path = self.entry_path(dataset_id, quad_key);
        if !path.is_file() {
            return false;
        }
        if self.is_stale(&path) {
            debug!("partition {}/{} aged out, dropping", dataset_id, quad_key);
            let _ = fs::remove_file(&path);
            return false;
        }
        true
    }

    /// Fetch a partition's records, reading through to the runtime on a
    /// miss (persisting the result for future hits).
    ///
    /// A corrupt or unreadable cache file is treated as a miss: logged,
    /// removed, and refetched. Only the runtime read path can fail here.
    pub fn get(&self, dataset_id: &str, quad_key: &str) -> Result<RecordStream> {
        // Touching the handle primes the eviction cascade for this dataset
        // and runs an expiry sweep.
        self.dataset_handle(dataset_id)?;

        if self.exists(dataset_id, quad_key) {
            let path = self.entry_path(dataset_id, quad_key);
            match self.read_entry(&path) {
                Ok(records) => return Ok(RecordStream::from_records(records)),
                Err(e) => {
                    warn!(
                        "corrupt cache entry {}/{} ({}), refetching from runtime",
                        dataset_id, quad_key, e
                    );
                    let _ = fs::remove_file(&path);
                }
            }
        }

        let authoritative = self
            .runtime
            .read_spatial_cluster(dataset_id, quad_key)?
            .collect_records()?;
        let written = self.write_entry(dataset_id, quad_key, authoritative)?;
        Ok(RecordStream::from_records(written))
    }

    /// Write a batch for the key, overwriting any prior entry.
    pub fn put(&self, dataset_id: &str, quad_key: &str, records: Vec<Record>) -> Result<()> {
        self.write_entry(dataset_id, quad_key, records)?;
        Ok(())
    }

    /// Delete the cache file if present; absence is not an error.
    pub fn remove(&self, dataset_id: &str, quad_key: &str) -> Result<()> {
        match fs::remove_file(self.entry_path(dataset_id, quad_key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QuadScanError::cache_io(dataset_id, quad_key, e)),
        }
    }

    /// Run an expiry sweep of the handle cache without other traffic.
    pub fn maintain(&self) {
        self.handles.sweep();
    }

    /// Point-in-time cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            handle_entries: self.handles.len(),
            ..Default::default()
        };

        let Ok(datasets) = fs::read_dir(&self.root) else {
            return stats;
        };
        for dataset in datasets.flatten() {
            let Ok(files) = fs::read_dir(dataset.path()) else {
                continue;
            };
            for file in files.flatten() {
                if is_temp_file(&file.path()) {
                    continue;
                }
                if let Ok(meta) = file.metadata()
                    && meta.is_file()
                {
                    stats.partition_files += 1;
                    stats.bytes_on_disk += meta.len();
                }
            }
        }
        stats
    }

    fn entry_path(&self, dataset_id: &str, quad_key: &str) -> PathBuf {
        self.root.join(dataset_id).join(quad_key)
    }

    fn is_stale(&self, path: &Path) -> bool {
        let Some(ttl) = self.partition_ttl else {
            return false;
        };
        let modified = match path.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return true,
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age >= ttl)
            .unwrap_or(false)
    }

    fn read_entry(&self, path: &Path) -> Result<Vec<Record>> {
        let compressed = fs::read(path)?;
        let raw = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| QuadScanError::Serialization(e.to_string()))?;
        let records: Vec<Record> = bincode::deserialize(&raw)?;
        Ok(records)
    }

    /// Shuffle, serialize, compress, and atomically install the batch.
    /// Returns the records in their written (shuffled) order.
    fn write_entry(
        &self,
        dataset_id: &str,
        quad_key: &str,
        mut records: Vec<Record>,
    ) -> Result<Vec<Record>> {
        records.shuffle(&mut rand::thread_rng());

        let raw = bincode::serialize(&records)
            .map_err(|e| QuadScanError::cache_io(dataset_id, quad_key, e))?;
        let compressed = lz4_flex::compress_prepend_size(&raw);

        let path = self.entry_path(dataset_id, quad_key);
        let dir = path
            .parent()
            .ok_or_else(|| QuadScanError::cache_io(dataset_id, quad_key, "no parent directory"))?;
        fs::create_dir_all(dir).map_err(|e| QuadScanError::cache_io(dataset_id, quad_key, e))?;

        // Write-then-rename so concurrent readers never see a torn file.
        // The temp name is unique per write: concurrent writers of the
        // same key must not share a temp file, or one could rename the
        // other's half-written bytes into place.
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, &compressed) {
            let _ = fs::remove_file(&tmp);
            return Err(QuadScanError::cache_io(dataset_id, quad_key, e));
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(QuadScanError::cache_io(dataset_id, quad_key, e));
        }

        Ok(records)
    }
}
