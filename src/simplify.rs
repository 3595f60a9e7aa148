//! Polyline simplification for GPS tracks.
//!
//! Provides a Douglas-Peucker implementation working in planar meters plus
//! `compress_track`, a tolerance-escalation wrapper that targets a point
//! budget for storage-efficient path representations.
//!
//! The tie-break is deterministic: when several points share the maximum
//! perpendicular distance, the lowest index wins.

use log::warn;

use crate::error::{Result, TraceError};
use crate::geo_utils::{perpendicular_distance, polyline_length};
use crate::Fix;

/// Ceiling on the escalated tolerance, guaranteeing termination.
pub const TOLERANCE_CEILING_M: f64 = 100.0;

/// Upper bound for the adaptive starting tolerance.
const ADAPTIVE_TOLERANCE_MAX_M: f64 = 50.0;

/// Escalation factor applied when the simplified track still exceeds the cap.
const TOLERANCE_GROWTH: f64 = 1.5;

/// Options for [`compress_track`].
#[derive(Debug, Clone)]
pub struct CompressOptions {
    /// Target maximum number of points after compression.
    /// Default: 100
    pub max_points: usize,

    /// Starting simplification tolerance in meters. Also the debounce
    /// distance used elsewhere in the pipeline. Default: 10.0
    pub min_distance: f64,

    /// Scale the starting tolerance by total path length
    /// (`clamp(path_m / 1000, min_distance, 50)`). Default: true
    pub adaptive: bool,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            max_points: 100,
            min_distance: 10.0,
            adaptive: true,
        }
    }
}

/// Result of [`compress_track`].
///
/// `cap_exceeded` is set when the tolerance ceiling was reached while the
/// output still holds more than `max_points` points. Callers decide whether
/// to accept the larger payload or truncate; the condition is never
/// silently swallowed.
#[derive(Debug, Clone)]
pub struct CompressOutcome {
    pub points: Vec<Fix>,
    /// Final tolerance in meters that produced `points`.
    pub tolerance_used: f64,
    /// Number of simplification passes performed.
    pub iterations: u32,
    pub cap_exceeded: bool,
}

impl CompressOutcome {
    /// Strict form: fail instead of returning an over-budget track.
    pub fn into_strict(self, max_points: usize) -> Result<Vec<Fix>> {
        if self.cap_exceeded {
            return Err(TraceError::CompressionCapExceeded {
                point_count: self.points.len(),
                max_points,
                tolerance_used: self.tolerance_used,
            });
        }
        Ok(self.points)
    }
}

/// Douglas-Peucker simplification with a tolerance in meters.
///
/// Inputs with two or fewer points are returned unchanged. The first and
/// last fix of the input are always preserved exactly.
pub fn simplify(points: &[Fix], tolerance_m: f64) -> Vec<Fix> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let mut result = Vec::with_capacity(points.len());
    simplify_span(points, tolerance_m, &mut result);
    result.push(*points.last().expect("non-empty by guard above"));
    result
}

/// Recursive worker: appends the kept points of `span` to `out`,
/// excluding the span's final point (the caller owns the closing point,
/// which de-duplicates shared boundaries between sibling spans).
fn simplify_span(span: &[Fix], tolerance_m: f64, out: &mut Vec<Fix>) {
    debug_assert!(span.len() >= 2);
    if span.len() == 2 {
        out.push(span[0]);
        return;
    }

    let first = &span[0];
    let last = &span[span.len() - 1];

    // Strict comparison keeps the lowest index on ties.
    let mut max_dist = -1.0_f64;
    let mut max_idx = 0usize;
    for (i, p) in span.iter().enumerate().take(span.len() - 1).skip(1) {
        let d = perpendicular_distance(p, first, last);
        if d > max_dist {
            max_dist = d;
            max_idx = i;
        }
    }

    if max_dist <= tolerance_m {
        // Collapse the whole span to its endpoints.
        out.push(span[0]);
        return;
    }

    simplify_span(&span[..=max_idx], tolerance_m, out);
    simplify_span(&span[max_idx..], tolerance_m, out);
}

/// Simplify a track down to (at most) a point budget.
///
/// Starts at `min_distance` meters (or an adaptive tolerance scaled by path
/// length) and multiplies the tolerance by 1.5 until the result fits in
/// `max_points` or the 100 m ceiling is reached. If the ceiling is hit
/// first the result may exceed the cap; this is surfaced via
/// [`CompressOutcome::cap_exceeded`].
pub fn compress_track(points: &[Fix], options: &CompressOptions) -> CompressOutcome {
    if points.len() <= 2 {
        return CompressOutcome {
            points: points.to_vec(),
            tolerance_used: 0.0,
            iterations: 0,
            cap_exceeded: false,
        };
    }

    let mut tolerance = if options.adaptive {
        // A min_distance above the adaptive cap wins: f64::clamp panics on
        // an inverted range
        let path_m = polyline_length(points);
        let ceiling = ADAPTIVE_TOLERANCE_MAX_M.max(options.min_distance);
        (path_m / 1000.0).clamp(options.min_distance, ceiling)
    } else {
        options.min_distance
    };

    let mut iterations = 0u32;
    let mut simplified = simplify(points, tolerance);
    iterations += 1;

    while simplified.len() > options.max_points && tolerance < TOLERANCE_CEILING_M {
        tolerance = (tolerance * TOLERANCE_GROWTH).min(TOLERANCE_CEILING_M);
        simplified = simplify(points, tolerance);
        iterations += 1;
    }

    let cap_exceeded = simplified.len() > options.max_points;
    if cap_exceeded {
        warn!(
            "[Simplify] {} points remain above cap {} at tolerance ceiling {:.0}m",
            simplified.len(),
            options.max_points,
            tolerance
        );
    }

    CompressOutcome {
        points: simplified,
        tolerance_used: tolerance,
        iterations,
        cap_exceeded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(lat: f64, lng: f64) -> Fix {
        Fix::new(lat, lng, 0)
    }

    fn collinear_with_offset() -> Vec<Fix> {
        // Three collinear fixes on a meridian with an offset fix inserted
        // between the first two; the offset deviates ~22m from the chord.
        vec![
            fix(0.0, 0.0),
            fix(0.0005, 0.0002),
            fix(0.0005, 0.0),
            fix(0.0010, 0.0),
        ]
    }

    #[test]
    fn test_two_points_unchanged() {
        let points = vec![fix(0.0, 0.0), fix(1.0, 1.0)];
        assert_eq!(simplify(&points, 1000.0), points);
    }

    #[test]
    fn test_collinear_collapses() {
        let points = vec![fix(0.0, 0.0), fix(0.0005, 0.0), fix(0.0010, 0.0)];
        let result = simplify(&points, 10.0);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0], points[0]);
        assert_eq!(result[1], points[2]);
    }

    #[test]
    fn test_offset_retained_below_tolerance() {
        let points = collinear_with_offset();
        let result = simplify(&points, 10.0);
        assert!(result.contains(&fix(0.0005, 0.0002)));
    }

    #[test]
    fn test_offset_dropped_above_tolerance() {
        let points = collinear_with_offset();
        let result = simplify(&points, 30.0);
        assert!(!result.contains(&fix(0.0005, 0.0002)));
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_endpoint_preservation() {
        let points: Vec<Fix> = (0..50)
            .map(|i| fix(i as f64 * 0.0001, (i % 7) as f64 * 0.00005))
            .collect();
        for tol in [1.0, 10.0, 100.0, 10_000.0] {
            let result = simplify(&points, tol);
            assert_eq!(result[0], points[0]);
            assert_eq!(*result.last().unwrap(), *points.last().unwrap());
        }
    }

    #[test]
    fn test_tolerance_monotonicity() {
        let points: Vec<Fix> = (0..100)
            .map(|i| {
                let i = i as f64;
                fix(i * 0.0002, (i * 0.7).sin() * 0.0004)
            })
            .collect();
        let mut prev_len = usize::MAX;
        for tol in [1.0, 5.0, 15.0, 40.0, 100.0] {
            let len = simplify(&points, tol).len();
            assert!(len <= prev_len, "len {} at tol {} grew", len, tol);
            prev_len = len;
        }
    }

    #[test]
    fn test_tie_break_deterministic() {
        // Two symmetric deviations with identical perpendicular distance;
        // repeated runs must pick the same split point.
        let points = vec![
            fix(0.0, 0.0),
            fix(0.00025, 0.0002),
            fix(0.0005, 0.0),
            fix(0.00075, 0.0002),
            fix(0.0010, 0.0),
        ];
        let a = simplify(&points, 10.0);
        let b = simplify(&points, 10.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_compress_track_respects_cap() {
        let points: Vec<Fix> = (0..500)
            .map(|i| {
                let i = i as f64;
                fix(i * 0.0001, (i * 0.3).sin() * 0.0003)
            })
            .collect();
        let outcome = compress_track(
            &points,
            &CompressOptions {
                max_points: 50,
                min_distance: 5.0,
                adaptive: false,
            },
        );
        assert!(!outcome.cap_exceeded);
        assert!(outcome.points.len() <= 50);
        assert_eq!(outcome.points[0], points[0]);
        assert_eq!(*outcome.points.last().unwrap(), *points.last().unwrap());
    }

    #[test]
    fn test_compress_track_short_input_passthrough() {
        let points = vec![fix(0.0, 0.0), fix(0.001, 0.0)];
        let outcome = compress_track(&points, &CompressOptions::default());
        assert_eq!(outcome.points, points);
        assert_eq!(outcome.iterations, 0);
        assert!(!outcome.cap_exceeded);
    }

    #[test]
    fn test_compress_track_cap_violation_flagged() {
        // A very jagged track that cannot be reduced to 3 points even at
        // the 100m ceiling: alternating ~200m lateral deviations.
        let points: Vec<Fix> = (0..40)
            .map(|i| {
                let lng = if i % 2 == 0 { 0.0 } else { 0.002 };
                fix(i as f64 * 0.002, lng)
            })
            .collect();
        let outcome = compress_track(
            &points,
            &CompressOptions {
                max_points: 3,
                min_distance: 10.0,
                adaptive: false,
            },
        );
        assert!(outcome.cap_exceeded);
        assert!(outcome.points.len() > 3);
        assert!((outcome.tolerance_used - TOLERANCE_CEILING_M).abs() < 1e-9);
        assert!(matches!(
            outcome.into_strict(3),
            Err(TraceError::CompressionCapExceeded { max_points: 3, .. })
        ));
    }

    #[test]
    fn test_compress_track_adaptive_with_large_min_distance() {
        // min_distance above the 50m adaptive cap must not invert the
        // clamp range; it becomes the starting tolerance instead
        let points: Vec<Fix> = (0..20).map(|i| fix(i as f64 * 0.0005, 0.0)).collect();
        let outcome = compress_track(
            &points,
            &CompressOptions {
                max_points: 100,
                min_distance: 60.0,
                adaptive: true,
            },
        );
        assert!(outcome.tolerance_used >= 60.0);
        assert_eq!(outcome.points[0], points[0]);
        assert_eq!(*outcome.points.last().unwrap(), *points.last().unwrap());
    }

    #[test]
    fn test_compress_track_terminates() {
        let points: Vec<Fix> = (0..200)
            .map(|i| fix(i as f64 * 0.0001, (i % 2) as f64 * 0.001))
            .collect();
        let outcome = compress_track(
            &points,
            &CompressOptions {
                max_points: 10,
                min_distance: 1.0,
                adaptive: true,
            },
        );
        // Bounded: ceiling is reached in at most log1.5(100) steps.
        assert!(outcome.iterations < 20);
    }
}
