//! # Trace Pipeline
//!
//! GPS trace compression and zone discovery pipeline.
//!
//! This library turns a live stream of GPS fixes into a storage-efficient
//! path representation and detects when the client enters a new spatial
//! cell, so a discovery backend can be asked which points of interest are
//! nearby. It provides:
//!
//! - Douglas-Peucker polyline simplification with a point-budget wrapper
//! - A bit-interleaved geohash indexer (encode/decode/neighbors/radius)
//! - Zone-transition detection over truncated geohash cells
//! - A trace accumulator with count/interval/zone-triggered flushing,
//!   bounded retry and a TTL-bound visible-point cache
//!
//! ## Features
//!
//! - **`http`** - reqwest-based client for the discovery commit endpoint
//! - **`persistence`** - SQLite persistence for sessions, routes and caches
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trace_pipeline::{simplify, geohash, Fix};
//!
//! // Simplify a jittery track within a 10m tolerance
//! let track = vec![
//!     Fix::new(51.5074, -0.1278, 0),
//!     Fix::new(51.50741, -0.12781, 1_000),
//!     Fix::new(51.5080, -0.1290, 2_000),
//! ];
//! let simplified = simplify::simplify(&track, 10.0);
//! assert!(simplified.len() <= track.len());
//!
//! // Zone key: a 6-character geohash is a ~1.2km cell
//! let zone = geohash::encode(51.5074, -0.1278, 6);
//! assert_eq!(zone.len(), 6);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TraceError};

// Geographic utilities (haversine, planar perpendicular distance, bounds)
pub mod geo_utils;

// Polyline simplification (Douglas-Peucker + point-budget compression)
pub mod simplify;
pub use simplify::{compress_track, CompressOptions, CompressOutcome};

// Geospatial indexing (base-32 bit-interleaved geohash)
pub mod geohash;
pub use geohash::DecodedCell;

// Zone transition detection
pub mod zones;
pub use zones::{ZoneEvent, ZoneTracker, DEFAULT_ZONE_PRECISION};

// Route state (raw + compressed point history, session metadata)
pub mod route;
pub use route::{Route, TrackingSession};

// Visible-point cache and POI status side effects
pub mod cache;
pub use cache::{
    CachedPoint, DiscoveryMethod, InMemoryPoiStatusStore, PoiStatus, PoiStatusSink,
    PoiStatusUpdate, VisiblePointCache,
};

// Trace accumulator and flush scheduler
pub mod engine;
pub use engine::{CommitBackend, EngineStats, FlushReport, PushOutcome, TraceEngine};

// HTTP client for the discovery commit endpoint
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::DiscoveryClient;

// SQLite persistence for sessions, routes and caches
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::{SqlitePoiStatusSink, TraceStore};

// ============================================================================
// Core Types
// ============================================================================

/// A zone identifier: a geohash truncated to a fixed precision.
pub type ZoneKey = String;

/// One timestamped GPS reading. Immutable once recorded.
///
/// # Example
/// ```
/// use trace_pipeline::Fix;
/// let fix = Fix::new(51.5074, -0.1278, 1_700_000_000_000); // London
/// assert!(fix.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub lat: f64,
    pub lng: f64,
    /// Unix milliseconds.
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

impl Fix {
    /// Create a fix with no optional metadata.
    pub fn new(lat: f64, lng: f64, timestamp_ms: i64) -> Self {
        Self {
            lat,
            lng,
            timestamp_ms,
            accuracy: None,
            speed: None,
            bearing: None,
            altitude: None,
        }
    }

    /// Check if the fix has finite, in-range coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lng >= -180.0
            && self.lng <= 180.0
    }

    /// Copy of this fix with coordinates clamped to valid ranges.
    pub fn clamped(&self) -> Self {
        Self {
            lat: self.lat.clamp(-90.0, 90.0),
            lng: self.lng.clamp(-180.0, 180.0),
            ..*self
        }
    }
}

/// Bounding box for a set of fixes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Get the center point of the bounds.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// A coordinate pair as carried on point-of-interest payloads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Per-type point metadata.
///
/// A tagged variant instead of loosely-typed metadata: consumers never
/// need structural guessing, and `phaseRequirement` only exists where it
/// means something.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PointDetail {
    Landmark,
    Waypoint,
    #[serde(rename_all = "camelCase")]
    Quest { phase_requirement: u32 },
}

/// A point of interest returned by the discovery backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub key: String,
    pub title: String,
    pub coordinates: Coordinates,
    #[serde(flatten)]
    pub detail: PointDetail,
}

/// Backend response to a trace commit: the point sets relevant to the
/// committed trace, valid for `ttl_ms` from receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisiblePointSet {
    pub discovered_points: Vec<PointOfInterest>,
    pub zone_points: Vec<PointOfInterest>,
    pub visible_points: Vec<PointOfInterest>,
    pub ttl_ms: i64,
}

/// Trace body of a commit request: raw fixes, or a pre-aggregated set of
/// geohash cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TracePayload {
    Fixes(Vec<Fix>),
    #[serde(rename_all = "camelCase")]
    GeohashSet { geohash_set: Vec<String> },
}

/// Request body for the commit endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceCommitRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_key: Option<ZoneKey>,
    pub trace: TracePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Bounds>,
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the trace engine.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Geohash precision for zone keys. 6 characters ≈ a ~1.2km cell.
    /// Default: 6
    pub zone_precision: usize,

    /// Fixes closer than this to the last accepted fix are debounced.
    /// Default: 10.0 meters
    pub min_distance_m: f64,

    /// Flush when the pending buffer reaches this size.
    /// Default: 50
    pub flush_count_threshold: usize,

    /// Flush when this much time elapsed since the last flush.
    /// Default: 30_000 ms
    pub flush_interval_ms: i64,

    /// Failed commit attempts before a batch is discarded.
    /// Default: 3
    pub max_commit_retries: u32,

    /// Base delay for exponential retry backoff.
    /// Default: 1_000 ms
    pub retry_backoff_base_ms: i64,

    /// Options for the compressed route representation.
    pub compress: CompressOptions,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            zone_precision: DEFAULT_ZONE_PRECISION,
            min_distance_m: 10.0,
            flush_count_threshold: 50,
            flush_interval_ms: 30_000,
            max_commit_retries: 3,
            retry_backoff_base_ms: 1_000,
            compress: CompressOptions::default(),
        }
    }
}

/// Knobs passed to the external geolocation source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeolocationConfig {
    pub enable_high_accuracy: bool,
    /// Accept cached positions up to this old.
    pub max_age_ms: i64,
    /// Give up waiting for a position after this long.
    pub timeout_ms: i64,
    /// Minimum movement between reported fixes.
    pub min_distance_m: f64,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            max_age_ms: 5_000,
            timeout_ms: 10_000,
            min_distance_m: 10.0,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
