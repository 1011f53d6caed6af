//! Core record and configuration types.
//!
//! Configuration is serde-friendly so it can be loaded from JSON while
//! keeping validation in one place.

use bytes::Bytes;
use geo::{Geometry, Point};
use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single spatial record: an identifier, a geometry, and an opaque payload.
///
/// Records are what range queries return and what the partition cache
/// persists. The payload is not interpreted by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub geometry: Geometry<f64>,
    pub payload: Bytes,
}

impl Record {
    pub fn new(id: impl Into<String>, geometry: Geometry<f64>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            geometry,
            payload: payload.into(),
        }
    }

    /// Convenience constructor for point records.
    pub fn point(id: impl Into<String>, x: f64, y: f64, payload: impl Into<Bytes>) -> Self {
        Self::new(id, Geometry::Point(Point::new(x, y)), payload)
    }
}

/// Engine configuration.
///
/// # Example
///
/// ```rust
/// use quadscan::Config;
///
/// let json = r#"{
///     "handle_expiry_minutes": 10,
///     "default_sample_count": 5000,
///     "default_use_prefetch": true
/// }"#;
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.handle_expiry_minutes, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Access-time expiry of cached dataset handles, in minutes.
    /// Handle eviction cascades to the dataset's partition files.
    #[serde(default = "Config::default_handle_expiry_minutes")]
    pub handle_expiry_minutes: u64,

    /// Optional TTL for partition cache files, in seconds. `None` (the
    /// default) leaves files bounded only by disk space and handle-cache
    /// cascade eviction.
    #[serde(default)]
    pub partition_ttl_seconds: Option<u64>,

    /// Sample count applied to range queries that do not set one.
    /// Zero or negative means "no sampling".
    #[serde(default)]
    pub default_sample_count: i64,

    /// Whether index scans served remotely kick off background prefetch.
    #[serde(default)]
    pub default_use_prefetch: bool,

    /// Cost budget for the index scan's local-cache path.
    #[serde(default = "Config::default_max_cache_cost")]
    pub default_max_cache_cost: u64,

    /// Number of partition loads run in parallel on the local-cache path.
    #[serde(default = "Config::default_load_parallelism")]
    pub load_parallelism: usize,

    /// Maximum number of partitions fetched by one prefetch round.
    #[serde(default = "Config::default_prefetch_width")]
    pub prefetch_width: usize,
}

impl Config {
    const fn default_handle_expiry_minutes() -> u64 {
        30
    }

    const fn default_max_cache_cost() -> u64 {
        16
    }

    const fn default_load_parallelism() -> usize {
        3
    }

    const fn default_prefetch_width() -> usize {
        5
    }

    /// Handle expiry is tracked at minute granularity; sub-minute
    /// durations round up so a short expiry never becomes zero.
    pub fn with_handle_expiry(mut self, expiry: Duration) -> Self {
        self.handle_expiry_minutes = expiry.as_secs().div_ceil(60).max(1);
        self
    }

    pub fn with_partition_ttl(mut self, ttl: Duration) -> Self {
        self.partition_ttl_seconds = Some(ttl.as_secs());
        self
    }

    pub fn with_default_sample_count(mut self, count: i64) -> Self {
        self.default_sample_count = count;
        self
    }

    pub fn with_prefetch(mut self, enabled: bool) -> Self {
        self.default_use_prefetch = enabled;
        self
    }

    pub fn with_max_cache_cost(mut self, budget: u64) -> Self {
        self.default_max_cache_cost = budget;
        self
    }

    /// Access-time expiry of dataset handles as a `Duration`.
    pub fn handle_expiry(&self) -> Duration {
        Duration::from_secs(self.handle_expiry_minutes * 60)
    }

    /// Partition file TTL as a `Duration`, if configured.
    pub fn partition_ttl(&self) -> Option<Duration> {
        self.partition_ttl_seconds.map(Duration::from_secs)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.handle_expiry_minutes == 0 {
            return Err("Handle expiry must be at least one minute".to_string());
        }
        if self.load_parallelism == 0 {
            return Err("Load parallelism must be greater than zero".to_string());
        }
        if self.prefetch_width == 0 {
            return Err("Prefetch width must be greater than zero".to_string());
        }
        if let Some(ttl) = self.partition_ttl_seconds
            && ttl == 0
        {
            return Err("Partition TTL must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handle_expiry_minutes: Self::default_handle_expiry_minutes(),
            partition_ttl_seconds: None,
            default_sample_count: 0,
            default_use_prefetch: false,
            default_max_cache_cost: Self::default_max_cache_cost(),
            load_parallelism: Self::default_load_parallelism(),
            prefetch_width: Self::default_prefetch_width(),
        }
    }
}

/// Point-in-time statistics for a partition cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of partition files currently on disk.
    pub partition_files: usize,
    /// Number of live dataset-handle entries.
    pub handle_entries: usize,
    /// Total size of partition files in bytes.
    pub bytes_on_disk: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.handle_expiry_minutes, 30);
        assert!(config.partition_ttl_seconds.is_none());
        assert_eq!(config.default_sample_count, 0);
        assert!(!config.default_use_prefetch);
        assert_eq!(config.load_parallelism, 3);
        assert_eq!(config.prefetch_width, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = Config::default()
            .with_handle_expiry(Duration::from_secs(600))
            .with_partition_ttl(Duration::from_secs(120))
            .with_default_sample_count(1000)
            .with_prefetch(true)
            .with_max_cache_cost(8);

        assert_eq!(config.handle_expiry(), Duration::from_secs(600));
        assert_eq!(config.partition_ttl(), Some(Duration::from_secs(120)));
        assert_eq!(config.default_sample_count, 1000);
        assert!(config.default_use_prefetch);
        assert_eq!(config.default_max_cache_cost, 8);
    }

    #[test]
    fn test_sub_minute_handle_expiry_rounds_up() {
        let config = Config::default().with_handle_expiry(Duration::from_secs(90));
        assert_eq!(config.handle_expiry_minutes, 2);

        let config = Config::default().with_handle_expiry(Duration::from_secs(30));
        assert_eq!(config.handle_expiry_minutes, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.handle_expiry_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.load_parallelism = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.partition_ttl_seconds = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = Config::default()
            .with_default_sample_count(500)
            .with_prefetch(true);
        let json = config.to_json().unwrap();
        let restored = Config::from_json(&json).unwrap();
        assert_eq!(restored.default_sample_count, 500);
        assert!(restored.default_use_prefetch);
    }

    #[test]
    fn test_config_rejects_invalid_json() {
        let json = r#"{"handle_expiry_minutes": 0}"#;
        assert!(Config::from_json(json).is_err());
    }

    #[test]
    fn test_record_point() {
        let rec = Record::point("a", 1.0, 2.0, &b"payload"[..]);
        assert_eq!(rec.id, "a");
        match rec.geometry {
            Geometry::Point(p) => {
                assert_eq!(p.x(), 1.0);
                assert_eq!(p.y(), 2.0);
            }
            _ => panic!("expected point geometry"),
        }
    }
}
