//! The runtime collaborator boundary.
//!
//! Everything this crate does not do itself (authoritative reads, remote
//! query execution, dataset bookkeeping) sits behind the [`Runtime`]
//! trait. [`MemoryRuntime`] is the in-memory reference implementation used
//! by tests and small embedders; production deployments supply their own.

use crate::cluster::SpatialClusterInfo;
use crate::error::{QuadScanError, Result};
use crate::spatial::record_intersects;
use crate::stream::RecordStream;
use crate::types::Record;
use geo::Rect;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::HashMap;

/// Dataset-level metadata, loaded lazily and cached with access expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetHandle {
    pub id: String,
    /// Spatial bounds of the whole dataset.
    pub bounds: Rect<f64>,
    pub record_count: u64,
    /// Whether the dataset has been spatially clustered into quad-key
    /// partitions.
    pub clustered: bool,
    /// Sampling ratio of the precomputed thumbnail, if one exists.
    pub thumbnail_ratio: Option<f64>,
    /// Name of the geometry column in the dataset schema.
    pub geometry_column: String,
}

impl DatasetHandle {
    pub fn has_thumbnail(&self) -> bool {
        self.thumbnail_ratio.is_some()
    }
}

/// Contract offered by the execution runtime.
///
/// Failures from this boundary are never retried here; they surface as
/// [`QuadScanError::RuntimeUnavailable`] wrapped with scan context.
pub trait Runtime: Send + Sync {
    /// Load dataset-level metadata.
    fn get_dataset(&self, id: &str) -> Result<DatasetHandle>;

    /// Candidate clusters whose tile bounds intersect `range`.
    fn query_spatial_cluster_info(
        &self,
        dataset_id: &str,
        range: &Rect<f64>,
    ) -> Result<Vec<SpatialClusterInfo>>;

    /// Authoritative, uncached read of one partition's records.
    fn read_spatial_cluster(&self, dataset_id: &str, quad_key: &str) -> Result<RecordStream>;

    /// Read from the dataset's precomputed thumbnail.
    ///
    /// Fails with `ThumbnailNotFound` when no thumbnail exists and with
    /// `InsufficientThumbnail` when the thumbnail's sampling ratio is too
    /// coarse to produce `sample_count` rows for `range`.
    fn read_thumbnail(
        &self,
        dataset_id: &str,
        range: &Rect<f64>,
        sample_count: usize,
    ) -> Result<RecordStream>;

    /// Remote query for records intersecting `range` (all records when
    /// `range` is `None`).
    fn query(&self, dataset_id: &str, range: Option<&Rect<f64>>) -> Result<RecordStream>;

    /// Materialize the records of `dataset_id` matching `range` into a
    /// temporary dataset and return its handle. The caller owns deletion.
    fn materialize(&self, dataset_id: &str, range: &Rect<f64>) -> Result<DatasetHandle>;

    /// Delete a dataset. Used to clean up temporary ranged datasets.
    fn delete_dataset(&self, id: &str) -> Result<()>;
}

struct StoredDataset {
    bounds: Rect<f64>,
    clustered: bool,
    thumbnail_ratio: Option<f64>,
    geometry_column: String,
    records: Vec<Record>,
    clusters: Vec<SpatialClusterInfo>,
    cluster_records: FxHashMap<String, Vec<Record>>,
}

impl StoredDataset {
    fn handle(&self, id: &str) -> DatasetHandle {
        DatasetHandle {
            id: id.to_string(),
            bounds: self.bounds,
            record_count: self.records.len() as u64,
            clustered: self.clustered,
            thumbnail_ratio: self.thumbnail_ratio,
            geometry_column: self.geometry_column.clone(),
        }
    }
}

/// In-memory [`Runtime`] implementation.
///
/// Datasets are registered up front; temporary datasets created by
/// `materialize` live alongside them until deleted.
#[derive(Default)]
pub struct MemoryRuntime {
    datasets: RwLock<HashMap<String, StoredDataset>>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unclustered dataset.
    pub fn register_dataset(&self, id: impl Into<String>, bounds: Rect<f64>, records: Vec<Record>) {
        self.datasets.write().insert(
            id.into(),
            StoredDataset {
                bounds,
                clustered: false,
                thumbnail_ratio: None,
                geometry_column: "the_geom".to_string(),
                records,
                clusters: Vec::new(),
                cluster_records: FxHashMap::default(),
            },
        );
    }

    /// Register a spatially clustered dataset from its partitions.
    ///
    /// Each partition's metadata must carry the owned record count of the
    /// records supplied with it.
    pub fn register_clustered(
        &self,
        id: impl Into<String>,
        bounds: Rect<f64>,
        partitions: Vec<(SpatialClusterInfo, Vec<Record>)>,
    ) {
        let mut records = Vec::new();
        let mut clusters = Vec::with_capacity(partitions.len());
        let mut cluster_records = FxHashMap::default();

        for (info, part_records) in partitions {
            records.extend(part_records.iter().cloned());
            cluster_records.insert(info.quad_key.clone(), part_records);
            clusters.push(info);
        }

        self.datasets.write().insert(
            id.into(),
            StoredDataset {
                bounds,
                clustered: true,
                thumbnail_ratio: None,
                geometry_column: "the_geom".to_string(),
                records,
                clusters,
                cluster_records,
            },
        );
    }

    /// Attach a thumbnail with the given sampling ratio to a dataset.
    pub fn set_thumbnail(&self, id: &str, ratio: f64) {
        if let Some(dataset) = self.datasets.write().get_mut(id) {
            dataset.thumbnail_ratio = Some(ratio);
        }
    }

    /// Number of datasets currently registered, temporaries included.
    pub fn dataset_count(&self) -> usize {
        self.datasets.read().len()
    }

    fn matching_records(&self, dataset: &StoredDataset, range: &Rect<f64>) -> Vec<Record> {
        dataset
            .records
            .iter()
            .filter(|r| record_intersects(r, range))
            .cloned()
            .collect()
    }
}

impl Runtime for MemoryRuntime {
    fn get_dataset(&self, id: &str) -> Result<DatasetHandle> {
        let datasets = self.datasets.read();
        let dataset = datasets
            .get(id)
            .ok_or_else(|| QuadScanError::DatasetNotFound(id.to_string()))?;
        Ok(dataset.handle(id))
    }

    fn query_spatial_cluster_info(
        &self,
        dataset_id: &str,
        range: &Rect<f64>,
    ) -> Result<Vec<SpatialClusterInfo>> {
        let datasets = self.datasets.read();
        let dataset = datasets
            .get(dataset_id)
            .ok_or_else(|| QuadScanError::DatasetNotFound(dataset_id.to_string()))?;

        Ok(dataset
            .clusters
            .iter()
            .filter(|c| crate::spatial::rect_intersection(&c.tile_bounds, range).is_some())
            .cloned()
            .collect())
    }

    fn read_spatial_cluster(&self, dataset_id: &str, quad_key: &str) -> Result<RecordStream> {
        let datasets = self.datasets.read();
        let dataset = datasets
            .get(dataset_id)
            .ok_or_else(|| QuadScanError::DatasetNotFound(dataset_id.to_string()))?;
        let records = dataset.cluster_records.get(quad_key).ok_or_else(|| {
            QuadScanError::runtime(dataset_id, format!("no spatial cluster '{quad_key}'"))
        })?;
        Ok(RecordStream::from_records(records.clone()))
    }

    fn read_thumbnail(
        &self,
        dataset_id: &str,
        range: &Rect<f64>,
        sample_count: usize,
    ) -> Result<RecordStream> {
        let datasets = self.datasets.read();
        let dataset = datasets
            .get(dataset_id)
            .ok_or_else(|| QuadScanError::DatasetNotFound(dataset_id.to_string()))?;

        let Some(ratio) = dataset.thumbnail_ratio else {
            return Err(QuadScanError::ThumbnailNotFound(dataset_id.to_string()));
        };

        let matching = self.matching_records(dataset, range);
        if sample_count > 0
            && !matching.is_empty()
            && sample_count as f64 / matching.len() as f64 > ratio
        {
            return Err(QuadScanError::InsufficientThumbnail {
                dataset: dataset_id.to_string(),
                available: ratio,
                requested: sample_count,
            });
        }

        let stream = RecordStream::from_records(matching).sample(ratio);
        if sample_count > 0 {
            Ok(stream.take_records(sample_count))
        } else {
            Ok(stream)
        }
    }

    fn query(&self, dataset_id: &str, range: Option<&Rect<f64>>) -> Result<RecordStream> {
        let datasets = self.datasets.read();
        let dataset = datasets
            .get(dataset_id)
            .ok_or_else(|| QuadScanError::DatasetNotFound(dataset_id.to_string()))?;

        let records = match range {
            Some(range) => self.matching_records(dataset, range),
            None => dataset.records.clone(),
        };
        Ok(RecordStream::from_records(records))
    }

    fn materialize(&self, dataset_id: &str, range: &Rect<f64>) -> Result<DatasetHandle> {
        let matching = {
            let datasets = self.datasets.read();
            let dataset = datasets
                .get(dataset_id)
                .ok_or_else(|| QuadScanError::DatasetNotFound(dataset_id.to_string()))?;
            self.matching_records(dataset, range)
        };

        let temp_id = format!("tmp-{}", uuid::Uuid::new_v4());
        self.datasets.write().insert(
            temp_id.clone(),
            StoredDataset {
                bounds: *range,
                clustered: false,
                thumbnail_ratio: None,
                geometry_column: "the_geom".to_string(),
                records: matching,
                clusters: Vec::new(),
                cluster_records: FxHashMap::default(),
            },
        );
        self.get_dataset(&temp_id)
    }

    fn delete_dataset(&self, id: &str) -> Result<()> {
        self.datasets.write().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Rect<f64> {
        Rect::new((min_x, min_y), (max_x, max_y))
    }

    fn grid_records(prefix: &str, n: usize, step: f64) -> Vec<Record> {
        (0..n)
            .map(|i| Record::point(format!("{prefix}{i}"), i as f64 * step, i as f64 * step, ""))
            .collect()
    }

    #[test]
    fn test_get_dataset_handle() {
        let runtime = MemoryRuntime::new();
        runtime.register_dataset("d", rect(0.0, 0.0, 100.0, 100.0), grid_records("r", 10, 1.0));

        let handle = runtime.get_dataset("d").unwrap();
        assert_eq!(handle.record_count, 10);
        assert!(!handle.clustered);
        assert!(!handle.has_thumbnail());
    }

    #[test]
    fn test_unknown_dataset() {
        let runtime = MemoryRuntime::new();
        assert!(matches!(
            runtime.get_dataset("missing"),
            Err(QuadScanError::DatasetNotFound(_))
        ));
    }

    #[test]
    fn test_query_range_filters() {
        let runtime = MemoryRuntime::new();
        runtime.register_dataset("d", rect(0.0, 0.0, 100.0, 100.0), grid_records("r", 10, 1.0));

        let range = rect(0.0, 0.0, 4.5, 4.5);
        let out = runtime
            .query("d", Some(&range))
            .unwrap()
            .collect_records()
            .unwrap();
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn test_clustered_registration_and_read() {
        let runtime = MemoryRuntime::new();
        let bounds = rect(0.0, 0.0, 10.0, 10.0);
        let info = SpatialClusterInfo::new("0", bounds, bounds, 3);
        runtime.register_clustered(
            "d",
            bounds,
            vec![(info, grid_records("r", 3, 1.0))],
        );

        let handle = runtime.get_dataset("d").unwrap();
        assert!(handle.clustered);
        assert_eq!(handle.record_count, 3);

        let part = runtime
            .read_spatial_cluster("d", "0")
            .unwrap()
            .collect_records()
            .unwrap();
        assert_eq!(part.len(), 3);

        let candidates = runtime
            .query_spatial_cluster_info("d", &rect(0.0, 0.0, 1.0, 1.0))
            .unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_thumbnail_missing_and_insufficient() {
        let runtime = MemoryRuntime::new();
        runtime.register_dataset("d", rect(0.0, 0.0, 100.0, 100.0), grid_records("r", 100, 0.5));

        let range = rect(0.0, 0.0, 100.0, 100.0);
        assert!(matches!(
            runtime.read_thumbnail("d", &range, 10),
            Err(QuadScanError::ThumbnailNotFound(_))
        ));

        // 1% thumbnail cannot satisfy a request for half the rows.
        runtime.set_thumbnail("d", 0.01);
        assert!(matches!(
            runtime.read_thumbnail("d", &range, 50),
            Err(QuadScanError::InsufficientThumbnail { .. })
        ));

        // A full-ratio thumbnail satisfies anything.
        runtime.set_thumbnail("d", 1.0);
        let out = runtime
            .read_thumbnail("d", &range, 50)
            .unwrap()
            .collect_records()
            .unwrap();
        assert_eq!(out.len(), 50);
    }

    #[test]
    fn test_materialize_and_delete() {
        let runtime = MemoryRuntime::new();
        runtime.register_dataset("d", rect(0.0, 0.0, 100.0, 100.0), grid_records("r", 10, 1.0));

        let temp = runtime.materialize("d", &rect(0.0, 0.0, 4.5, 4.5)).unwrap();
        assert!(temp.id.starts_with("tmp-"));
        assert_eq!(temp.record_count, 5);
        assert_eq!(runtime.dataset_count(), 2);

        runtime.delete_dataset(&temp.id).unwrap();
        assert_eq!(runtime.dataset_count(), 1);
        assert!(runtime.get_dataset(&temp.id).is_err());
    }
}
