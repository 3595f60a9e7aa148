//! Unified error handling for the trace pipeline.
//!
//! This module provides a consistent error type for all pipeline operations,
//! replacing mixed error handling patterns (fire-and-forget network calls,
//! console-only logging, silent failures).

use std::fmt;

/// Unified error type for trace-pipeline operations.
#[derive(Debug, Clone)]
pub enum TraceError {
    /// A geohash string contains characters outside the base-32 alphabet
    InvalidGeohash { hash: String },
    /// Track has insufficient points for processing
    InsufficientPoints {
        point_count: usize,
        minimum_required: usize,
    },
    /// compress_track hit the tolerance ceiling and still exceeds the cap
    CompressionCapExceeded {
        point_count: usize,
        max_points: usize,
        tolerance_used: f64,
    },
    /// Commit to the discovery backend failed after all retries
    CommitFailed { attempts: u32, message: String },
    /// HTTP/API error from the commit endpoint
    HttpError {
        message: String,
        status_code: Option<u16>,
    },
    /// Geolocation source failure (permission denied, timeout)
    GeolocationError { message: String },
    /// Persistence/storage error
    PersistenceError { message: String },
    /// Session is stopped; the operation was rejected
    SessionStopped,
    /// Configuration error
    ConfigError { message: String },
    /// Generic internal error
    Internal { message: String },
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::InvalidGeohash { hash } => {
                write!(f, "Invalid geohash '{}'", hash)
            }
            TraceError::InsufficientPoints {
                point_count,
                minimum_required,
            } => {
                write!(
                    f,
                    "Track has {} points, minimum {} required",
                    point_count, minimum_required
                )
            }
            TraceError::CompressionCapExceeded {
                point_count,
                max_points,
                tolerance_used,
            } => {
                write!(
                    f,
                    "Compression produced {} points (cap {}) at tolerance ceiling {:.1}m",
                    point_count, max_points, tolerance_used
                )
            }
            TraceError::CommitFailed { attempts, message } => {
                write!(
                    f,
                    "Trace commit failed after {} attempts: {}",
                    attempts, message
                )
            }
            TraceError::HttpError {
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "HTTP error ({}): {}", code, message)
                } else {
                    write!(f, "HTTP error: {}", message)
                }
            }
            TraceError::GeolocationError { message } => {
                write!(f, "Geolocation error: {}", message)
            }
            TraceError::PersistenceError { message } => {
                write!(f, "Persistence error: {}", message)
            }
            TraceError::SessionStopped => {
                write!(f, "Tracking session is stopped")
            }
            TraceError::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            TraceError::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for TraceError {}

/// Result type alias for trace-pipeline operations.
pub type Result<T> = std::result::Result<T, TraceError>;

/// Extension trait for converting Option to TraceError.
pub trait OptionExt<T> {
    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TraceError::Internal {
            message: message.to_string(),
        })
    }
}
