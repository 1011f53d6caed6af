//! Range-query execution strategies.
//!
//! Three interchangeable strategies produce a lazy record stream for a
//! dataset: [`FullScan`] reads everything (optionally range-restricted and
//! sampled), [`ThumbnailScan`] reads a precomputed sample, and
//! [`IndexScan`] picks between the partition cache and the runtime with a
//! cost model. The [`crate::query::RangeQuery`] dispatcher chooses which
//! one runs.

pub mod full;
pub mod index;
pub mod prefetch;
pub mod thumbnail;

pub use full::FullScan;
pub use index::{CACHE_COST, IndexScan, NETWORK_COST};
pub use prefetch::{PrefetchHandle, spawn_prefetch};
pub use thumbnail::ThumbnailScan;
