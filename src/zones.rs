//! Zone transition detection.
//!
//! Each fix resolves to a zone key (a geohash truncated to a fixed
//! precision). The tracker remembers the current zone and emits an exit
//! event for the old key followed by an enter event for the new key when
//! the fix lands in a different cell. Duplicate or jittering fixes that
//! resolve to the same cell emit nothing.

use serde::{Deserialize, Serialize};

use crate::geohash::encode;
use crate::{Fix, ZoneKey};

/// Default zone precision: 6 characters ≈ a ~1.2 km cell.
pub const DEFAULT_ZONE_PRECISION: usize = 6;

/// A zone boundary crossing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ZoneEvent {
    Exited { zone_key: ZoneKey },
    Entered { zone_key: ZoneKey },
}

/// Stateful zone-transition detector.
#[derive(Debug, Clone)]
pub struct ZoneTracker {
    precision: usize,
    current_zone: Option<ZoneKey>,
}

impl ZoneTracker {
    /// Create a tracker at the given geohash precision.
    pub fn new(precision: usize) -> Self {
        Self {
            precision,
            current_zone: None,
        }
    }

    /// The zone key of the most recent fix, if any fix has been observed.
    pub fn current_zone(&self) -> Option<&ZoneKey> {
        self.current_zone.as_ref()
    }

    /// Compute the zone key for a fix without updating tracker state.
    pub fn zone_key_for(&self, fix: &Fix) -> ZoneKey {
        encode(fix.lat, fix.lng, self.precision)
    }

    /// Observe a fix and return the boundary events it produced.
    ///
    /// Returns an empty vec while the zone is unchanged, and
    /// `[Exited(old), Entered(new)]` on a transition (no `Exited` for the
    /// very first fix).
    pub fn observe(&mut self, fix: &Fix) -> Vec<ZoneEvent> {
        let key = self.zone_key_for(fix);

        if self.current_zone.as_deref() == Some(key.as_str()) {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(2);
        if let Some(old) = self.current_zone.take() {
            events.push(ZoneEvent::Exited { zone_key: old });
        }
        events.push(ZoneEvent::Entered {
            zone_key: key.clone(),
        });
        self.current_zone = Some(key);
        events
    }

    /// Forget the current zone (session teardown).
    pub fn reset(&mut self) {
        self.current_zone = None;
    }
}

impl Default for ZoneTracker {
    fn default() -> Self {
        Self::new(DEFAULT_ZONE_PRECISION)
    }
}
