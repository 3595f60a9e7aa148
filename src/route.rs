//! Route state: the raw fix history and its compressed representation.

use serde::{Deserialize, Serialize};

use crate::simplify::{compress_track, CompressOptions};
use crate::Fix;

/// An append-only sequence of fixes plus a derived, shorter sequence that
/// preserves the path shape within a tolerance.
///
/// Invariants: `compressed_points` starts and ends with the same
/// coordinates as `points` (first/last fix preserved exactly), and
/// `compressed_points.len() <= points.len()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Route {
    points: Vec<Fix>,
    compressed_points: Vec<Fix>,
    /// Set when the last recompute hit the tolerance ceiling above the cap.
    cap_exceeded: bool,
}

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a route from persisted state.
    pub fn from_parts(points: Vec<Fix>, compressed_points: Vec<Fix>) -> Self {
        Self {
            points,
            compressed_points,
            cap_exceeded: false,
        }
    }

    pub fn points(&self) -> &[Fix] {
        &self.points
    }

    pub fn compressed_points(&self) -> &[Fix] {
        &self.compressed_points
    }

    pub fn last_point(&self) -> Option<&Fix> {
        self.points.last()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether the last recompute could not get under the point cap.
    pub fn cap_exceeded(&self) -> bool {
        self.cap_exceeded
    }

    /// Append a fix and recompute the compressed representation.
    pub fn append(&mut self, fix: Fix, options: &CompressOptions) {
        self.points.push(fix);
        self.recompress(options);
    }

    /// Recompute `compressed_points` over the full history. Returns whether
    /// the point cap was exceeded at the tolerance ceiling.
    pub fn recompress(&mut self, options: &CompressOptions) -> bool {
        let outcome = compress_track(&self.points, options);
        self.cap_exceeded = outcome.cap_exceeded;
        self.compressed_points = outcome.points;
        self.cap_exceeded
    }
}

/// Metadata for one tracking session. Persisted alongside the route so the
/// pipeline can resume after a process restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSession {
    /// Stable client/session identifier used as the persistence key.
    pub session_id: String,
    pub device_id: Option<String>,
    pub user_id: Option<String>,
    /// Unix milliseconds.
    pub started_at_ms: i64,
    /// Set on explicit stop or teardown.
    pub stopped_at_ms: Option<i64>,
}

impl TrackingSession {
    pub fn new(session_id: impl Into<String>, started_at_ms: i64) -> Self {
        Self {
            session_id: session_id.into(),
            device_id: None,
            user_id: None,
            started_at_ms,
            stopped_at_ms: None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped_at_ms.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(lat: f64, lng: f64) -> Fix {
        Fix::new(lat, lng, 0)
    }

    #[test]
    fn test_append_preserves_endpoints() {
        let mut route = Route::new();
        let options = CompressOptions {
            max_points: 10,
            min_distance: 10.0,
            adaptive: false,
        };
        for i in 0..60 {
            let i = i as f64;
            route.append(fix(i * 0.0002, (i * 0.5).sin() * 0.0003), &options);
        }

        let first = route.points()[0];
        let last = *route.points().last().unwrap();
        let compressed = route.compressed_points();
        assert_eq!(compressed[0].lat, first.lat);
        assert_eq!(compressed[0].lng, first.lng);
        assert_eq!(compressed.last().unwrap().lat, last.lat);
        assert_eq!(compressed.last().unwrap().lng, last.lng);
        assert!(compressed.len() <= route.len());
    }

    #[test]
    fn test_compressed_never_longer_than_raw() {
        let mut route = Route::new();
        let options = CompressOptions::default();
        for i in 0..5 {
            route.append(fix(i as f64 * 0.0001, 0.0), &options);
            assert!(route.compressed_points().len() <= route.len());
        }
    }

    #[test]
    fn test_session_stop_flag() {
        let mut session = TrackingSession::new("session-1", 1_000);
        assert!(!session.is_stopped());
        session.stopped_at_ms = Some(2_000);
        assert!(session.is_stopped());
    }
}
