//! # SQLite persistence
//!
//! Stores tracking sessions, route point arrays and the visible-point
//! cache so the pipeline survives process restarts. Keyed by the stable
//! session id. Point arrays are stored as MessagePack blobs; cache entries
//! carry their expiry so stale rows can be dropped on load.

use rusqlite::{params, Connection, OptionalExtension};

use crate::cache::{CachedPoint, PoiStatusSink, PoiStatusUpdate, VisiblePointCache};
use crate::error::{Result, TraceError};
use crate::route::{Route, TrackingSession};
use crate::Fix;

fn db_err(e: rusqlite::Error) -> TraceError {
    TraceError::PersistenceError {
        message: e.to_string(),
    }
}

fn blob_err(e: impl std::fmt::Display) -> TraceError {
    TraceError::PersistenceError {
        message: format!("Blob codec error: {}", e),
    }
}

/// SQLite-backed store for pipeline state.
pub struct TraceStore {
    db: Connection,
}

impl TraceStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let db = Connection::open(path).map_err(db_err)?;
        let store = Self { db };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store (tests, ephemeral sessions).
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().map_err(db_err)?;
        let store = Self { db };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.db
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    session_id TEXT PRIMARY KEY,
                    device_id TEXT,
                    user_id TEXT,
                    started_at_ms INTEGER NOT NULL,
                    stopped_at_ms INTEGER
                );
                CREATE TABLE IF NOT EXISTS routes (
                    session_id TEXT PRIMARY KEY,
                    points BLOB NOT NULL,
                    compressed_points BLOB NOT NULL
                );
                CREATE TABLE IF NOT EXISTS visible_points (
                    key TEXT PRIMARY KEY,
                    entry BLOB NOT NULL,
                    expires_at_ms INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS poi_status (
                    key TEXT PRIMARY KEY,
                    entry BLOB NOT NULL
                );",
            )
            .map_err(db_err)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub fn save_session(&self, session: &TrackingSession) -> Result<()> {
        self.db
            .execute(
                "INSERT OR REPLACE INTO sessions
                 (session_id, device_id, user_id, started_at_ms, stopped_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.session_id,
                    session.device_id,
                    session.user_id,
                    session.started_at_ms,
                    session.stopped_at_ms
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn load_session(&self, session_id: &str) -> Result<Option<TrackingSession>> {
        self.db
            .query_row(
                "SELECT session_id, device_id, user_id, started_at_ms, stopped_at_ms
                 FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(TrackingSession {
                        session_id: row.get(0)?,
                        device_id: row.get(1)?,
                        user_id: row.get(2)?,
                        started_at_ms: row.get(3)?,
                        stopped_at_ms: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    // ========================================================================
    // Routes
    // ========================================================================

    pub fn save_route(&self, session_id: &str, route: &Route) -> Result<()> {
        let points = rmp_serde::to_vec(route.points()).map_err(blob_err)?;
        let compressed = rmp_serde::to_vec(route.compressed_points()).map_err(blob_err)?;
        self.db
            .execute(
                "INSERT OR REPLACE INTO routes (session_id, points, compressed_points)
                 VALUES (?1, ?2, ?3)",
                params![session_id, points, compressed],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn load_route(&self, session_id: &str) -> Result<Option<Route>> {
        let row: Option<(Vec<u8>, Vec<u8>)> = self
            .db
            .query_row(
                "SELECT points, compressed_points FROM routes WHERE session_id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        match row {
            None => Ok(None),
            Some((points, compressed)) => {
                let points: Vec<Fix> = rmp_serde::from_slice(&points).map_err(blob_err)?;
                let compressed: Vec<Fix> = rmp_serde::from_slice(&compressed).map_err(blob_err)?;
                Ok(Some(Route::from_parts(points, compressed)))
            }
        }
    }

    // ========================================================================
    // Visible-point cache
    // ========================================================================

    /// Persist the full cache, expired entries included; expiry filtering
    /// happens on load.
    pub fn save_cache(&mut self, cache: &VisiblePointCache) -> Result<()> {
        let tx = self.db.transaction().map_err(db_err)?;
        tx.execute("DELETE FROM visible_points", [])
            .map_err(db_err)?;
        for (key, entry) in cache.iter() {
            let blob = rmp_serde::to_vec(entry).map_err(blob_err)?;
            tx.execute(
                "INSERT INTO visible_points (key, entry, expires_at_ms) VALUES (?1, ?2, ?3)",
                params![key, blob, entry.expires_at_ms],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    /// Load live cache entries; rows past their TTL are treated as stale
    /// and deleted.
    pub fn load_cache(&self, now_ms: i64) -> Result<VisiblePointCache> {
        self.db
            .execute(
                "DELETE FROM visible_points WHERE expires_at_ms < ?1",
                params![now_ms],
            )
            .map_err(db_err)?;

        let mut stmt = self
            .db
            .prepare("SELECT entry FROM visible_points")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))
            .map_err(db_err)?;

        let mut cache = VisiblePointCache::new();
        for blob in rows {
            let blob = blob.map_err(db_err)?;
            let entry: CachedPoint = rmp_serde::from_slice(&blob).map_err(blob_err)?;
            cache.restore(entry);
        }
        cache.rebuild_index();
        Ok(cache)
    }

    // ========================================================================
    // POI status
    // ========================================================================

    pub fn save_poi_status(&self, update: &PoiStatusUpdate) -> Result<()> {
        let blob = rmp_serde::to_vec(update).map_err(blob_err)?;
        self.db
            .execute(
                "INSERT OR REPLACE INTO poi_status (key, entry) VALUES (?1, ?2)",
                params![update.key, blob],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn load_poi_status(&self, key: &str) -> Result<Option<PoiStatusUpdate>> {
        let blob: Option<Vec<u8>> = self
            .db
            .query_row(
                "SELECT entry FROM poi_status WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        match blob {
            None => Ok(None),
            Some(blob) => Ok(Some(rmp_serde::from_slice(&blob).map_err(blob_err)?)),
        }
    }
}

/// POI status sink that writes through to SQLite.
///
/// Write failures are logged, not propagated: POI status is an advisory
/// side effect and must not corrupt the flush path.
pub struct SqlitePoiStatusSink {
    store: TraceStore,
}

impl SqlitePoiStatusSink {
    pub fn new(store: TraceStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TraceStore {
        &self.store
    }
}

impl PoiStatusSink for SqlitePoiStatusSink {
    fn update(&mut self, update: PoiStatusUpdate) {
        if let Err(e) = self.store.save_poi_status(&update) {
            log::warn!("[Persistence] Failed to save POI status {}: {}", update.key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DiscoveryMethod, PoiStatus};
    use crate::simplify::CompressOptions;
    use crate::{Coordinates, PointDetail, PointOfInterest, VisiblePointSet};

    fn fix(lat: f64, lng: f64, ts: i64) -> Fix {
        Fix::new(lat, lng, ts)
    }

    #[test]
    fn test_session_round_trip() {
        let store = TraceStore::open_in_memory().unwrap();
        let mut session = TrackingSession::new("session-1", 1_000);
        session.device_id = Some("device-7".to_string());

        store.save_session(&session).unwrap();
        let loaded = store.load_session("session-1").unwrap().unwrap();
        assert_eq!(loaded.session_id, "session-1");
        assert_eq!(loaded.device_id.as_deref(), Some("device-7"));
        assert!(loaded.stopped_at_ms.is_none());

        assert!(store.load_session("missing").unwrap().is_none());
    }

    #[test]
    fn test_route_round_trip() {
        let store = TraceStore::open_in_memory().unwrap();
        let mut route = Route::new();
        let options = CompressOptions::default();
        for i in 0..5 {
            route.append(fix(i as f64 * 0.001, 0.0, i), &options);
        }

        store.save_route("session-1", &route).unwrap();
        let loaded = store.load_route("session-1").unwrap().unwrap();
        assert_eq!(loaded.points().len(), 5);
        assert_eq!(loaded.points()[3].lat, route.points()[3].lat);
        assert_eq!(
            loaded.compressed_points().len(),
            route.compressed_points().len()
        );
    }

    #[test]
    fn test_cache_round_trip_drops_expired() {
        let mut store = TraceStore::open_in_memory().unwrap();
        let mut cache = VisiblePointCache::new();
        let point = |key: &str| PointOfInterest {
            key: key.to_string(),
            title: key.to_string(),
            coordinates: Coordinates { lat: 51.5, lng: -0.1 },
            detail: PointDetail::Landmark,
        };
        cache.merge(
            &VisiblePointSet {
                discovered_points: vec![point("live")],
                zone_points: Vec::new(),
                visible_points: Vec::new(),
                ttl_ms: 100_000,
            },
            0,
        );
        cache.merge(
            &VisiblePointSet {
                discovered_points: vec![point("stale")],
                zone_points: Vec::new(),
                visible_points: Vec::new(),
                ttl_ms: 1_000,
            },
            0,
        );

        store.save_cache(&cache).unwrap();
        let loaded = store.load_cache(50_000).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get("live", 50_000).is_some());
        assert!(loaded.get("stale", 50_000).is_none());
    }

    #[test]
    fn test_poi_status_sink_writes_through() {
        let store = TraceStore::open_in_memory().unwrap();
        let mut sink = SqlitePoiStatusSink::new(store);
        sink.update(PoiStatusUpdate {
            key: "poi-1".to_string(),
            status: PoiStatus::Discovered,
            discovered_at_ms: Some(1_000),
            researched_at_ms: None,
            method: DiscoveryMethod::TraceCommit,
        });

        let loaded = sink.store().load_poi_status("poi-1").unwrap().unwrap();
        assert_eq!(loaded.status, PoiStatus::Discovered);
        assert_eq!(loaded.method, DiscoveryMethod::TraceCommit);
    }
}
