//! Local cache for backend-supplied visible points, plus the POI-status
//! side-effect interface.
//!
//! Entries are advisory and TTL-bound: rendering and other subsystems read
//! this cache, they never mutate it. Anything past `received_at + ttl` is
//! stale and must be discarded.

use std::collections::HashMap;

use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::{PointOfInterest, VisiblePointSet};

/// A cached point with its expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPoint {
    pub point: PointOfInterest,
    pub received_at_ms: i64,
    pub expires_at_ms: i64,
}

impl CachedPoint {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at_ms
    }
}

/// R-tree entry for viewport queries over cached points.
#[derive(Debug, Clone)]
struct CachedPointEntry {
    key: String,
    lat: f64,
    lng: f64,
}

impl RTreeObject for CachedPointEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lng, self.lat])
    }
}

/// TTL-bound cache of the points returned by trace commits.
#[derive(Debug, Default)]
pub struct VisiblePointCache {
    entries: HashMap<String, CachedPoint>,
    spatial_index: RTree<CachedPointEntry>,
}

impl VisiblePointCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a commit response into the cache.
    ///
    /// Every point in the response (discovered, zone and visible sets) is
    /// cached with `expires_at = received_at + ttl`; entries for
    /// overlapping keys are replaced by the newer response.
    pub fn merge(&mut self, set: &VisiblePointSet, received_at_ms: i64) {
        let expires_at_ms = received_at_ms + set.ttl_ms;
        for point in set
            .discovered_points
            .iter()
            .chain(set.zone_points.iter())
            .chain(set.visible_points.iter())
        {
            self.entries.insert(
                point.key.clone(),
                CachedPoint {
                    point: point.clone(),
                    received_at_ms,
                    expires_at_ms,
                },
            );
        }
        self.rebuild_index();
    }

    /// Get a live (non-expired) entry.
    pub fn get(&self, key: &str, now_ms: i64) -> Option<&CachedPoint> {
        self.entries.get(key).filter(|e| !e.is_expired(now_ms))
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune(&mut self, now_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now_ms));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.rebuild_index();
        }
        removed
    }

    /// Live points inside a viewport, for rendering collaborators.
    pub fn points_in_bbox(
        &self,
        min_lat: f64,
        max_lat: f64,
        min_lng: f64,
        max_lng: f64,
        now_ms: i64,
    ) -> Vec<&CachedPoint> {
        let envelope = AABB::from_corners([min_lng, min_lat], [max_lng, max_lat]);
        self.spatial_index
            .locate_in_envelope(&envelope)
            .filter_map(|entry| self.get(&entry.key, now_ms))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.spatial_index = RTree::new();
    }

    /// Iterate all entries, expired or not (persistence uses this).
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CachedPoint)> {
        self.entries.iter()
    }

    /// Restore an entry from persisted state without reindexing per entry.
    pub fn restore(&mut self, entry: CachedPoint) {
        self.entries.insert(entry.point.key.clone(), entry);
    }

    /// Rebuild the spatial index after a batch of `restore` calls.
    pub fn rebuild_index(&mut self) {
        let entries: Vec<CachedPointEntry> = self
            .entries
            .values()
            .map(|e| CachedPointEntry {
                key: e.point.key.clone(),
                lat: e.point.coordinates.lat,
                lng: e.point.coordinates.lng,
            })
            .collect();
        self.spatial_index = RTree::bulk_load(entries);
    }
}

// ============================================================================
// POI status side effects
// ============================================================================

/// Lifecycle status of a point of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PoiStatus {
    Discovered,
    Researched,
}

/// How a status transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscoveryMethod {
    TraceCommit,
    ExplicitConfirmation,
}

/// Status update pushed to the external POI-status store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoiStatusUpdate {
    pub key: String,
    pub status: PoiStatus,
    pub discovered_at_ms: Option<i64>,
    pub researched_at_ms: Option<i64>,
    pub method: DiscoveryMethod,
}

/// Consumer of POI status updates (the external POI-status store).
pub trait PoiStatusSink {
    fn update(&mut self, update: PoiStatusUpdate);
}

/// In-memory sink, used in tests and as a default collaborator.
#[derive(Debug, Default)]
pub struct InMemoryPoiStatusStore {
    statuses: HashMap<String, PoiStatusUpdate>,
}

impl InMemoryPoiStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&PoiStatusUpdate> {
        self.statuses.get(key)
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }
}

impl PoiStatusSink for InMemoryPoiStatusStore {
    fn update(&mut self, update: PoiStatusUpdate) {
        self.statuses.insert(update.key.clone(), update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Coordinates, PointDetail};

    fn poi(key: &str, lat: f64, lng: f64) -> PointOfInterest {
        PointOfInterest {
            key: key.to_string(),
            title: format!("Point {}", key),
            coordinates: Coordinates { lat, lng },
            detail: PointDetail::Landmark,
        }
    }

    fn response(points: Vec<PointOfInterest>, ttl_ms: i64) -> VisiblePointSet {
        VisiblePointSet {
            discovered_points: points,
            zone_points: Vec::new(),
            visible_points: Vec::new(),
            ttl_ms,
        }
    }

    #[test]
    fn test_merge_and_get() {
        let mut cache = VisiblePointCache::new();
        cache.merge(&response(vec![poi("a", 51.5, -0.1)], 60_000), 1_000);

        assert!(cache.get("a", 30_000).is_some());
        assert!(cache.get("a", 61_001).is_none()); // past received_at + ttl
        assert!(cache.get("missing", 0).is_none());
    }

    #[test]
    fn test_merge_replaces_overlapping_keys() {
        let mut cache = VisiblePointCache::new();
        cache.merge(&response(vec![poi("a", 51.5, -0.1)], 10_000), 1_000);
        cache.merge(&response(vec![poi("a", 51.5, -0.1)], 60_000), 5_000);

        let entry = cache.get("a", 20_000).unwrap();
        assert_eq!(entry.received_at_ms, 5_000);
        assert_eq!(entry.expires_at_ms, 65_000);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_prune_removes_expired() {
        let mut cache = VisiblePointCache::new();
        cache.merge(&response(vec![poi("a", 51.5, -0.1)], 10_000), 0);
        cache.merge(&response(vec![poi("b", 51.6, -0.1)], 100_000), 0);

        assert_eq!(cache.prune(50_000), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("b", 50_000).is_some());
    }

    #[test]
    fn test_bbox_query() {
        let mut cache = VisiblePointCache::new();
        cache.merge(
            &response(
                vec![poi("in", 51.5, -0.1), poi("out", 40.7, -74.0)],
                60_000,
            ),
            0,
        );

        let hits = cache.points_in_bbox(51.0, 52.0, -1.0, 0.0, 1_000);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].point.key, "in");
    }

    #[test]
    fn test_bbox_query_skips_expired() {
        let mut cache = VisiblePointCache::new();
        cache.merge(&response(vec![poi("a", 51.5, -0.1)], 10_000), 0);
        assert!(cache.points_in_bbox(51.0, 52.0, -1.0, 0.0, 20_000).is_empty());
    }

    #[test]
    fn test_poi_status_store() {
        let mut store = InMemoryPoiStatusStore::new();
        store.update(PoiStatusUpdate {
            key: "a".to_string(),
            status: PoiStatus::Discovered,
            discovered_at_ms: Some(1_000),
            researched_at_ms: None,
            method: DiscoveryMethod::TraceCommit,
        });
        store.update(PoiStatusUpdate {
            key: "a".to_string(),
            status: PoiStatus::Researched,
            discovered_at_ms: Some(1_000),
            researched_at_ms: Some(2_000),
            method: DiscoveryMethod::ExplicitConfirmation,
        });

        let status = store.get("a").unwrap();
        assert_eq!(status.status, PoiStatus::Researched);
        assert_eq!(status.researched_at_ms, Some(2_000));
    }
}
