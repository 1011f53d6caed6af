//! Store builder for flexible configuration
//!
//! This module provides a builder pattern for opening a store against a
//! runtime with a cache root and tuning options.

use crate::cache::PartitionCache;
use crate::error::{QuadScanError, Result};
use crate::runtime::Runtime;
use crate::store::GeoDataStore;
use crate::types::Config;
use std::path::PathBuf;
use std::sync::Arc;

/// Builder for a [`GeoDataStore`] with a runtime, cache root, and settings.
pub struct StoreBuilder {
    runtime: Option<Arc<dyn Runtime>>,
    cache_root: Option<PathBuf>,
    config: Config,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            runtime: None,
            cache_root: None,
            config: Config::default(),
        }
    }

    /// Set the runtime serving dataset metadata and records.
    pub fn runtime(mut self, runtime: Arc<dyn Runtime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the directory for the on-disk partition cache. Created if it
    /// does not exist.
    pub fn cache_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_root = Some(path.into());
        self
    }

    /// Set the store configuration (sampling defaults, cache cost budget,
    /// handle expiry, etc.).
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Build the store. Validates the configuration and opens the
    /// partition cache.
    pub fn build(self) -> Result<GeoDataStore> {
        let runtime = self
            .runtime
            .ok_or_else(|| QuadScanError::InvalidConfig("runtime is required".into()))?;
        let cache_root = self
            .cache_root
            .ok_or_else(|| QuadScanError::InvalidConfig("cache_root is required".into()))?;
        self.config.validate().map_err(QuadScanError::InvalidConfig)?;

        let cache = Arc::new(PartitionCache::open(
            cache_root,
            runtime.clone(),
            &self.config,
        )?);
        Ok(GeoDataStore::new(runtime, cache, self.config))
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
