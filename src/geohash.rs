//! Geospatial indexing via geohashes.
//!
//! Encodes coordinates into a base-32 string by interleaving longitude and
//! latitude bits (longitude first), one bit decision per bit position, five
//! bits per output character. Truncating a hash widens the cell, which is
//! what the zone tracker exploits: a 6-character hash is a ~1.2 km cell.
//!
//! Neighbor and radius queries approximate cells by stepping the decoded
//! center by the per-axis interval widths and re-encoding. The axes are
//! stepped independently because the latitude interval is half the
//! longitude interval at even precisions.

use std::collections::BTreeSet;

use crate::error::{Result, TraceError};
use crate::geo_utils::{haversine_distance_coords, METERS_PER_DEGREE};

/// Geohash base-32 alphabet.
pub const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Decoded cell: interval midpoint, per-axis half-widths, and the
/// half-width of the larger axis in degrees.
///
/// The two axes differ at even precisions (the latitude interval is half
/// the longitude interval), so grid walks must step each axis by its own
/// width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedCell {
    pub lat: f64,
    pub lng: f64,
    pub lat_error_deg: f64,
    pub lng_error_deg: f64,
    pub error_radius_deg: f64,
}

fn base32_index(c: u8) -> Option<usize> {
    BASE32.iter().position(|&b| b == c.to_ascii_lowercase())
}

/// Encode a coordinate into a geohash of the given precision.
///
/// Out-of-range inputs are clamped to valid coordinate ranges rather than
/// rejected; GPS noise routinely produces them.
pub fn encode(lat: f64, lng: f64, precision: usize) -> String {
    let lat = lat.clamp(-90.0, 90.0);
    let lng = lng.clamp(-180.0, 180.0);

    let mut lat_lo = -90.0_f64;
    let mut lat_hi = 90.0_f64;
    let mut lng_lo = -180.0_f64;
    let mut lng_hi = 180.0_f64;

    let mut hash = String::with_capacity(precision);
    let mut bits = 0u8;
    let mut ch = 0usize;
    let mut even_bit = true; // longitude first, alternating

    while hash.len() < precision {
        if even_bit {
            let mid = (lng_lo + lng_hi) / 2.0;
            if lng >= mid {
                ch = (ch << 1) | 1;
                lng_lo = mid;
            } else {
                ch <<= 1;
                lng_hi = mid;
            }
        } else {
            let mid = (lat_lo + lat_hi) / 2.0;
            if lat >= mid {
                ch = (ch << 1) | 1;
                lat_lo = mid;
            } else {
                ch <<= 1;
                lat_hi = mid;
            }
        }
        even_bit = !even_bit;

        bits += 1;
        if bits == 5 {
            hash.push(BASE32[ch] as char);
            bits = 0;
            ch = 0;
        }
    }

    hash
}

/// Decode a geohash back to its cell center and error radius.
pub fn decode(hash: &str) -> Result<DecodedCell> {
    if hash.is_empty() {
        return Err(TraceError::InvalidGeohash {
            hash: hash.to_string(),
        });
    }

    let mut lat_lo = -90.0_f64;
    let mut lat_hi = 90.0_f64;
    let mut lng_lo = -180.0_f64;
    let mut lng_hi = 180.0_f64;
    let mut even_bit = true;

    for c in hash.bytes() {
        let idx = base32_index(c).ok_or_else(|| TraceError::InvalidGeohash {
            hash: hash.to_string(),
        })?;

        for bit in (0..5).rev() {
            let is_set = (idx >> bit) & 1 == 1;
            if even_bit {
                let mid = (lng_lo + lng_hi) / 2.0;
                if is_set {
                    lng_lo = mid;
                } else {
                    lng_hi = mid;
                }
            } else {
                let mid = (lat_lo + lat_hi) / 2.0;
                if is_set {
                    lat_lo = mid;
                } else {
                    lat_hi = mid;
                }
            }
            even_bit = !even_bit;
        }
    }

    let lat_err = (lat_hi - lat_lo) / 2.0;
    let lng_err = (lng_hi - lng_lo) / 2.0;

    Ok(DecodedCell {
        lat: (lat_lo + lat_hi) / 2.0,
        lng: (lng_lo + lng_hi) / 2.0,
        lat_error_deg: lat_err,
        lng_error_deg: lng_err,
        error_radius_deg: lat_err.max(lng_err),
    })
}

/// The eight cells surrounding a hash, by center-stepping approximation.
///
/// The hash's own cell is not included. Near the poles or the antimeridian
/// some steps can re-encode to the original cell and are dropped.
pub fn neighbors(hash: &str) -> Result<Vec<String>> {
    let cell = decode(hash)?;
    let lat_step = cell.lat_error_deg * 2.0;
    let lng_step = cell.lng_error_deg * 2.0;
    let precision = hash.len();

    let mut result = Vec::with_capacity(8);
    for di in -1i32..=1 {
        for dj in -1i32..=1 {
            if di == 0 && dj == 0 {
                continue;
            }
            let neighbor = encode(
                cell.lat + di as f64 * lat_step,
                cell.lng + dj as f64 * lng_step,
                precision,
            );
            if neighbor != hash && !result.contains(&neighbor) {
                result.push(neighbor);
            }
        }
    }

    Ok(result)
}

/// All cells (at the hash's precision) whose centers fall within
/// `radius_km` of the hash center, by grid stepping.
pub fn cells_in_radius(hash: &str, radius_km: f64) -> Result<Vec<String>> {
    let cell = decode(hash)?;
    let precision = hash.len();
    let lat_step = cell.lat_error_deg * 2.0;
    let lng_step = cell.lng_error_deg * 2.0;
    let radius_deg = radius_km * 1000.0 / METERS_PER_DEGREE;
    let lat_steps = (radius_deg / lat_step).ceil() as i32;
    let lng_steps = (radius_deg / lng_step).ceil() as i32;

    // BTreeSet keeps the output deterministic for callers that diff sets.
    let mut cells = BTreeSet::new();
    for di in -lat_steps..=lat_steps {
        for dj in -lng_steps..=lng_steps {
            let lat = cell.lat + di as f64 * lat_step;
            let lng = cell.lng + dj as f64 * lng_step;
            if haversine_distance_coords(cell.lat, cell.lng, lat, lng) <= radius_km * 1000.0 {
                cells.insert(encode(lat, lng, precision));
            }
        }
    }

    Ok(cells.into_iter().collect())
}

/// Great-circle distance in meters between two hash cell centers.
pub fn hash_distance(a: &str, b: &str) -> Result<f64> {
    let ca = decode(a)?;
    let cb = decode(b)?;
    Ok(haversine_distance_coords(ca.lat, ca.lng, cb.lat, cb.lng))
}
