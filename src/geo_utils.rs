//! Geographic utilities shared by the pipeline stages.
//!
//! Distances come in two flavours:
//! - Haversine (great-circle) distance for debouncing, geohash cell
//!   distances and path lengths.
//! - A local planar approximation (each degree ≈ 111,320 m) for the
//!   perpendicular distances used by Douglas-Peucker. Acceptable at the
//!   sub-kilometer scale this pipeline operates at; not valid for
//!   continental-scale paths.

use geo::{Distance, Haversine, Point};

use crate::{Bounds, Fix};

/// Meters per degree of latitude/longitude in the planar approximation.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Great-circle distance between two fixes in meters.
pub fn haversine_distance(a: &Fix, b: &Fix) -> f64 {
    Haversine::distance(Point::new(a.lng, a.lat), Point::new(b.lng, b.lat))
}

/// Great-circle distance between two raw coordinates in meters.
pub fn haversine_distance_coords(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    Haversine::distance(Point::new(lng1, lat1), Point::new(lng2, lat2))
}

/// Total distance along a path in meters.
pub fn polyline_length(points: &[Fix]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Convert meters to degrees under the planar approximation.
pub fn meters_to_degrees(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE
}

/// Planar distance between two fixes in meters.
pub fn planar_distance(a: &Fix, b: &Fix) -> f64 {
    let dx = (b.lng - a.lng) * METERS_PER_DEGREE;
    let dy = (b.lat - a.lat) * METERS_PER_DEGREE;
    (dx * dx + dy * dy).sqrt()
}

/// Perpendicular distance in meters from `point` to the line through
/// `start` and `end`, using the planar approximation.
///
/// Degenerate span (start == end coordinates) degrades to the
/// point-to-point distance.
pub fn perpendicular_distance(point: &Fix, start: &Fix, end: &Fix) -> f64 {
    let x = point.lng * METERS_PER_DEGREE;
    let y = point.lat * METERS_PER_DEGREE;
    let x1 = start.lng * METERS_PER_DEGREE;
    let y1 = start.lat * METERS_PER_DEGREE;
    let x2 = end.lng * METERS_PER_DEGREE;
    let y2 = end.lat * METERS_PER_DEGREE;

    let dx = x2 - x1;
    let dy = y2 - y1;
    let len_sq = dx * dx + dy * dy;

    if len_sq == 0.0 {
        let px = x - x1;
        let py = y - y1;
        return (px * px + py * py).sqrt();
    }

    ((dy * x - dx * y + x2 * y1 - y2 * x1).abs()) / len_sq.sqrt()
}

/// Bounding box of a set of fixes, or None for an empty set.
pub fn compute_bounds(points: &[Fix]) -> Option<Bounds> {
    if points.is_empty() {
        return None;
    }
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.lat);
        max_lat = max_lat.max(p.lat);
        min_lng = min_lng.min(p.lng);
        max_lng = max_lng.max(p.lng);
    }

    Some(Bounds {
        min_lat,
        max_lat,
        min_lng,
        max_lng,
    })
}
