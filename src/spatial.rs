//! Rectangle arithmetic and exact geometry filtering.
//!
//! The estimator works on axis-aligned rectangles only; the exact
//! record-level filter delegates to `geo`'s `Intersects`.

use crate::types::Record;
use geo::{Intersects, Rect};

/// Area of an axis-aligned rectangle.
pub fn rect_area(rect: &Rect<f64>) -> f64 {
    rect.width() * rect.height()
}

/// Intersection of two rectangles, `None` when they do not overlap.
///
/// Degenerate (zero width or height) intersections are still returned;
/// callers decide how to treat zero-area overlaps.
pub fn rect_intersection(a: &Rect<f64>, b: &Rect<f64>) -> Option<Rect<f64>> {
    let min_x = a.min().x.max(b.min().x);
    let min_y = a.min().y.max(b.min().y);
    let max_x = a.max().x.min(b.max().x);
    let max_y = a.max().y.min(b.max().y);

    if min_x > max_x || min_y > max_y {
        return None;
    }
    Some(Rect::new((min_x, min_y), (max_x, max_y)))
}

/// True when `outer` fully contains `inner`.
pub fn rect_contains(outer: &Rect<f64>, inner: &Rect<f64>) -> bool {
    outer.min().x <= inner.min().x
        && outer.min().y <= inner.min().y
        && outer.max().x >= inner.max().x
        && outer.max().y >= inner.max().y
}

/// Exact intersection test between a record's geometry and a query
/// rectangle. This is the correctness filter; area-ratio estimates are
/// never used in its place.
pub fn record_intersects(record: &Record, range: &Rect<f64>) -> bool {
    let polygon = range.to_polygon();
    record.geometry.intersects(&polygon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Record;

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Rect<f64> {
        Rect::new((min_x, min_y), (max_x, max_y))
    }

    #[test]
    fn test_rect_area() {
        assert_eq!(rect_area(&rect(0.0, 0.0, 10.0, 5.0)), 50.0);
        assert_eq!(rect_area(&rect(0.0, 0.0, 0.0, 5.0)), 0.0);
    }

    #[test]
    fn test_rect_intersection_overlap() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(5.0, 5.0, 15.0, 15.0);
        let i = rect_intersection(&a, &b).unwrap();
        assert_eq!(i.min().x, 5.0);
        assert_eq!(i.min().y, 5.0);
        assert_eq!(i.max().x, 10.0);
        assert_eq!(i.max().y, 10.0);
    }

    #[test]
    fn test_rect_intersection_disjoint() {
        let a = rect(0.0, 0.0, 1.0, 1.0);
        let b = rect(2.0, 2.0, 3.0, 3.0);
        assert!(rect_intersection(&a, &b).is_none());
    }

    #[test]
    fn test_rect_intersection_touching_is_degenerate() {
        let a = rect(0.0, 0.0, 1.0, 1.0);
        let b = rect(1.0, 0.0, 2.0, 1.0);
        let i = rect_intersection(&a, &b).unwrap();
        assert_eq!(rect_area(&i), 0.0);
    }

    #[test]
    fn test_rect_contains() {
        let outer = rect(0.0, 0.0, 100.0, 100.0);
        assert!(rect_contains(&outer, &rect(10.0, 10.0, 20.0, 20.0)));
        assert!(rect_contains(&outer, &outer));
        assert!(!rect_contains(&outer, &rect(50.0, 50.0, 120.0, 60.0)));
    }

    #[test]
    fn test_record_intersects() {
        let range = rect(0.0, 0.0, 10.0, 10.0);
        assert!(record_intersects(&Record::point("in", 5.0, 5.0, ""), &range));
        assert!(!record_intersects(
            &Record::point("out", 50.0, 50.0, ""),
            &range
        ));
        // Boundary points count as intersecting.
        assert!(record_intersects(
            &Record::point("edge", 10.0, 5.0, ""),
            &range
        ));
    }
}
