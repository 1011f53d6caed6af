//! Spatial cluster metadata and the match-count estimator.
//!
//! A spatially clustered dataset is split into quad-key partitions, each
//! described by a `SpatialClusterInfo`. The estimator turns that metadata
//! plus a query rectangle into per-partition cardinality estimates using an
//! area-ratio approximation: records are assumed uniformly distributed over
//! a cluster's data bounds, so the fraction of a cluster's domain covered
//! by the range approximates the fraction of its records that match.
//!
//! The estimates feed the index scan's sampling ratio and cache cost model.
//! They are never used as a correctness filter.

use crate::spatial::{rect_area, rect_intersection};
use geo::Rect;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Static per-partition metadata, produced once when a dataset is
/// spatially clustered. Read-only to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialClusterInfo {
    /// Quadtree tile address of this partition.
    pub quad_key: String,
    /// Bounds of the quadtree tile itself.
    pub tile_bounds: Rect<f64>,
    /// Bounds of the data actually owned by the partition.
    pub data_bounds: Rect<f64>,
    /// Number of records owned by the partition.
    pub owned_record_count: u64,
}

impl SpatialClusterInfo {
    pub fn new(
        quad_key: impl Into<String>,
        tile_bounds: Rect<f64>,
        data_bounds: Rect<f64>,
        owned_record_count: u64,
    ) -> Self {
        Self {
            quad_key: quad_key.into(),
            tile_bounds,
            data_bounds,
            owned_record_count,
        }
    }

    /// The effective domain of the cluster: tile bounds clipped to data
    /// bounds. `None` when the two do not overlap at all.
    pub fn domain(&self) -> Option<Rect<f64>> {
        rect_intersection(&self.tile_bounds, &self.data_bounds)
    }
}

/// Addressing key of one cached partition: `(dataset id, quad key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub dataset_id: String,
    pub quad_key: String,
}

impl PartitionKey {
    pub fn new(dataset_id: impl Into<String>, quad_key: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            quad_key: quad_key.into(),
        }
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.dataset_id, self.quad_key)
    }
}

/// Estimated contribution of one cluster to a range query.
#[derive(Debug, Clone)]
pub struct MatchEstimate {
    pub cluster: SpatialClusterInfo,
    /// Fraction of the cluster's domain covered by the range, in `[0, 1]`.
    pub match_ratio: f64,
    /// `round(owned_record_count * match_ratio)`.
    pub match_count: u64,
}

/// Result of estimating a range query against a dataset's cluster metadata.
#[derive(Debug, Clone, Default)]
pub struct RangeMatches {
    /// Sum of per-cluster match counts.
    pub total_match_count: u64,
    /// Per-quad-key estimates for every candidate cluster.
    pub per_quad_key: FxHashMap<String, MatchEstimate>,
}

impl RangeMatches {
    /// Quad-keys whose estimated match count is non-zero.
    pub fn matching_keys(&self) -> Vec<&str> {
        self.per_quad_key
            .iter()
            .filter(|(_, est)| est.match_count > 0)
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

/// Estimate how many records each candidate cluster contributes to `range`.
///
/// `clusters` must be the candidate set whose tile bounds intersect the
/// range (as returned by the runtime's cluster-metadata index); clusters
/// that do not intersect simply contribute zero.
///
/// The per-cluster formula is deliberately the plain area ratio over the
/// cluster domain, not a refinement: downstream sampling and cost decisions
/// are calibrated against it.
pub fn estimate_matches(clusters: &[SpatialClusterInfo], range: &Rect<f64>) -> RangeMatches {
    let mut per_quad_key = FxHashMap::default();
    let mut total: u64 = 0;

    for cluster in clusters {
        let match_ratio = cluster_match_ratio(cluster, range);
        let match_count = (cluster.owned_record_count as f64 * match_ratio).round() as u64;
        debug_assert!(match_count <= cluster.owned_record_count);

        total += match_count;
        per_quad_key.insert(
            cluster.quad_key.clone(),
            MatchEstimate {
                cluster: cluster.clone(),
                match_ratio,
                match_count,
            },
        );
    }

    RangeMatches {
        total_match_count: total,
        per_quad_key,
    }
}

/// `area(range ∩ domain) / area(domain)` clamped to `[0, 1]`.
///
/// A degenerate (zero-area) domain cannot support the division; such
/// clusters count fully when the range touches them and not at all
/// otherwise, so point-like partitions are never silently dropped.
fn cluster_match_ratio(cluster: &SpatialClusterInfo, range: &Rect<f64>) -> f64 {
    let Some(domain) = cluster.domain() else {
        return 0.0;
    };

    let Some(overlap) = rect_intersection(range, &domain) else {
        return 0.0;
    };

    let domain_area = rect_area(&domain);
    if domain_area <= 0.0 {
        return 1.0;
    }

    (rect_area(&overlap) / domain_area).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Rect<f64> {
        Rect::new((min_x, min_y), (max_x, max_y))
    }

    fn cluster(quad_key: &str, bounds: Rect<f64>, count: u64) -> SpatialClusterInfo {
        SpatialClusterInfo::new(quad_key, bounds, bounds, count)
    }

    #[test]
    fn test_full_overlap() {
        let c = cluster("02", rect(0.0, 0.0, 10.0, 10.0), 100);
        let matches = estimate_matches(&[c], &rect(-5.0, -5.0, 15.0, 15.0));
        assert_eq!(matches.total_match_count, 100);
        assert_eq!(matches.per_quad_key["02"].match_ratio, 1.0);
    }

    #[test]
    fn test_partial_overlap_rounds() {
        // Range covers the left half of the domain.
        let c = cluster("02", rect(0.0, 0.0, 10.0, 10.0), 101);
        let matches = estimate_matches(&[c], &rect(0.0, 0.0, 5.0, 10.0));
        // 101 * 0.5 = 50.5 rounds to 51.
        assert_eq!(matches.total_match_count, 51);
    }

    #[test]
    fn test_no_overlap() {
        let c = cluster("02", rect(0.0, 0.0, 10.0, 10.0), 100);
        let matches = estimate_matches(&[c], &rect(20.0, 20.0, 30.0, 30.0));
        assert_eq!(matches.total_match_count, 0);
        assert_eq!(matches.per_quad_key["02"].match_count, 0);
        assert!(matches.matching_keys().is_empty());
    }

    #[test]
    fn test_domain_is_tile_clipped_to_data() {
        // Data occupies only the left half of the tile; a range covering
        // that half matches everything.
        let c = SpatialClusterInfo::new(
            "03",
            rect(0.0, 0.0, 10.0, 10.0),
            rect(0.0, 0.0, 5.0, 10.0),
            80,
        );
        let matches = estimate_matches(&[c], &rect(0.0, 0.0, 5.0, 10.0));
        assert_eq!(matches.total_match_count, 80);
    }

    #[test]
    fn test_degenerate_domain_counts_fully_on_touch() {
        // All data at a single point.
        let c = SpatialClusterInfo::new(
            "0",
            rect(0.0, 0.0, 10.0, 10.0),
            rect(5.0, 5.0, 5.0, 5.0),
            7,
        );
        let hit = estimate_matches(std::slice::from_ref(&c), &rect(0.0, 0.0, 10.0, 10.0));
        assert_eq!(hit.total_match_count, 7);

        let miss = estimate_matches(&[c], &rect(6.0, 6.0, 10.0, 10.0));
        assert_eq!(miss.total_match_count, 0);
    }

    // Match counts never exceed owned counts and the total is additive,
    // across a grid of ranges.
    #[test]
    fn test_bounds_and_additivity() {
        let clusters = vec![
            cluster("00", rect(0.0, 0.0, 50.0, 50.0), 1000),
            cluster("01", rect(50.0, 0.0, 100.0, 50.0), 500),
            cluster("02", rect(0.0, 50.0, 50.0, 100.0), 250),
            cluster("03", rect(50.0, 50.0, 100.0, 100.0), 125),
        ];

        for range in [
            rect(0.0, 0.0, 100.0, 100.0),
            rect(10.0, 10.0, 20.0, 20.0),
            rect(25.0, 25.0, 75.0, 75.0),
            rect(-10.0, -10.0, 0.0, 0.0),
        ] {
            let matches = estimate_matches(&clusters, &range);
            let mut sum = 0;
            for c in &clusters {
                let est = &matches.per_quad_key[&c.quad_key];
                assert!(est.match_count <= c.owned_record_count);
                sum += est.match_count;
            }
            assert_eq!(matches.total_match_count, sum);
        }
    }

    #[test]
    fn test_partition_key_display() {
        let key = PartitionKey::new("roads", "0231");
        assert_eq!(key.to_string(), "roads/0231");
    }
}
