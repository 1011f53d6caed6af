//! Adaptive spatial range-query execution over quad-key clustered datasets,
//! with a disk-backed compressed partition cache and cost-based scan choice.
//!
//! ```rust
//! use quadscan::{MemoryRuntime, Rect, Record, StoreBuilder};
//! use std::sync::Arc;
//!
//! let runtime = Arc::new(MemoryRuntime::new());
//! runtime.register_dataset(
//!     "cities",
//!     Rect::new((0.0, 0.0), (10.0, 10.0)),
//!     vec![Record::point("nyc", 4.0, 7.0, b"NYC".as_slice())],
//! );
//!
//! let dir = tempfile::tempdir()?;
//! let store = StoreBuilder::new()
//!     .runtime(runtime)
//!     .cache_root(dir.path())
//!     .build()?;
//!
//! let records = store
//!     .range_query("cities", Rect::new((3.0, 6.0), (5.0, 8.0)))
//!     .run()?
//!     .collect_records()?;
//! assert_eq!(records.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod cache;
pub mod cluster;
pub mod error;
pub mod query;
pub mod runtime;
pub mod scan;
pub mod spatial;
pub mod store;
pub mod stream;
pub mod types;

pub use builder::StoreBuilder;
pub use error::{QuadScanError, Result};
pub use store::GeoDataStore;

pub use geo::{Geometry, Point, Polygon, Rect};

pub use cache::{EvictionListener, HandleCache, PartitionCache};

pub use cluster::{MatchEstimate, PartitionKey, RangeMatches, SpatialClusterInfo};

pub use query::RangeQuery;

pub use runtime::{DatasetHandle, MemoryRuntime, Runtime};

pub use scan::{FullScan, IndexScan, PrefetchHandle, ThumbnailScan};

pub use stream::RecordStream;

pub use types::{CacheStats, Config, Record};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{GeoDataStore, QuadScanError, Result, StoreBuilder};

    pub use geo::{Point, Polygon, Rect};

    pub use crate::{Config, Record, RecordStream};

    pub use crate::{DatasetHandle, MemoryRuntime, Runtime};

    pub use std::time::Duration;
}
