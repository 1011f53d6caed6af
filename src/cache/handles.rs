//! Dataset-handle cache with access-time expiry and cascade eviction.
//!
//! Handles are loaded lazily from the runtime and refreshed on every
//! access. When an entry expires, registered [`EvictionListener`]s are
//! invoked with the dataset id; the partition cache uses that callback to
//! remove every partition file of the dataset. Listener invocation is the
//! only coupling between the two caches.

use crate::error::Result;
use crate::runtime::DatasetHandle;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Observer notified when a dataset handle is evicted.
///
/// Listeners run synchronously on the thread whose cache access triggered
/// the eviction sweep, so they must be cheap and must not call back into
/// the handle cache.
pub trait EvictionListener: Send + Sync {
    fn on_evict(&self, dataset_id: &str);
}

struct Entry {
    handle: DatasetHandle,
    last_access: Instant,
}

/// In-memory cache of [`DatasetHandle`]s with expire-after-access
/// semantics.
pub struct HandleCache {
    entries: Mutex<HashMap<String, Entry>>,
    expiry: Duration,
    listeners: Mutex<Vec<Arc<dyn EvictionListener>>>,
}

impl HandleCache {
    pub fn new(expiry: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            expiry,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn register_listener(&self, listener: Arc<dyn EvictionListener>) {
        self.listeners.lock().push(listener);
    }

    /// Look up a handle, refreshing its expiry; load it through `loader`
    /// on a miss. Expired entries are swept (and their listeners fired)
    /// before the lookup.
    pub fn get_or_load(
        &self,
        dataset_id: &str,
        loader: impl FnOnce() -> Result<DatasetHandle>,
    ) -> Result<DatasetHandle> {
        self.sweep();

        if let Some(entry) = self.entries.lock().get_mut(dataset_id) {
            entry.last_access = Instant::now();
            return Ok(entry.handle.clone());
        }

        let handle = loader()?;
        self.entries.lock().insert(
            dataset_id.to_string(),
            Entry {
                handle: handle.clone(),
                last_access: Instant::now(),
            },
        );
        Ok(handle)
    }

    /// Drop every entry whose last access is older than the expiry and
    /// notify listeners. Listeners run outside the entry lock.
    pub fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut entries = self.entries.lock();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, e)| now.duration_since(e.last_access) >= self.expiry)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                entries.remove(id);
            }
            ids
        };

        for id in expired {
            debug!("dataset handle '{}' expired, cascading eviction", id);
            self.notify(&id);
        }
    }

    /// Explicitly drop one handle, firing listeners as an expiry would.
    pub fn invalidate(&self, dataset_id: &str) {
        let removed = self.entries.lock().remove(dataset_id).is_some();
        if removed {
            self.notify(dataset_id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn notify(&self, dataset_id: &str) {
        let listeners: Vec<Arc<dyn EvictionListener>> = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_evict(dataset_id);
        }
    }
}
