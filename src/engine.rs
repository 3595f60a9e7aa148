//! # Trace Engine
//!
//! Stateful accumulator and flush scheduler for the discovery pipeline.
//!
//! The engine owns the pending trace batch, the route history, the zone
//! tracker and the visible-point cache. Fixes are pushed in arrival order;
//! the engine debounces jitter, detects zone transitions and decides when
//! to commit the buffered trace to the discovery backend.
//!
//! ## Flush triggers
//!
//! First to fire wins (they can coincide):
//! - pending buffer reaches the count threshold,
//! - the flush interval elapsed since the last flush,
//! - a zone transition (exit + enter pair),
//! - explicit session stop.
//!
//! ## Concurrency
//!
//! Single-threaded and event-driven. `flush` holds `&mut self` across the
//! backend await, so a second flush (or a push) cannot interleave with a
//! commit in flight: fixes pushed after a flush accumulate in the fresh
//! buffer and are never included in, nor lost from, the in-flight commit.
//! A session generation counter discards a commit result that resolves
//! after `reset`.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::cache::{
    DiscoveryMethod, PoiStatus, PoiStatusSink, PoiStatusUpdate, VisiblePointCache,
};
use crate::error::{Result, TraceError};
use crate::geo_utils::{compute_bounds, haversine_distance};
use crate::route::{Route, TrackingSession};
use crate::zones::{ZoneEvent, ZoneTracker};
use crate::{Fix, TraceCommitRequest, TracePayload, TrackerConfig, VisiblePointSet};

/// Asynchronous commit endpoint. The backend is a black box that accepts a
/// trace and returns the point sets discoverable around it, with a TTL.
pub trait CommitBackend {
    fn commit(
        &self,
        request: &TraceCommitRequest,
    ) -> impl std::future::Future<Output = Result<VisiblePointSet>>;
}

/// What a `flush` call did.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushReport {
    /// Nothing buffered, nothing sent.
    NothingToSend,
    /// Retry backoff has not elapsed yet; buffered fixes were parked in
    /// the carryover slot.
    Deferred { until_ms: i64 },
    /// Commit succeeded and the response was merged into the cache.
    Committed {
        sent: usize,
        discovered: usize,
        visible: usize,
        ttl_ms: i64,
    },
    /// Commit failed; the batch was re-queued at the front of the next
    /// outgoing batch.
    Requeued { attempt: u32 },
    /// The session was reset while the commit was in flight; the result
    /// was discarded.
    Discarded,
}

/// What a `push` call did.
#[derive(Debug, Clone, PartialEq)]
pub struct PushOutcome {
    /// False when the fix was debounced below the minimum distance.
    pub accepted: bool,
    /// Zone boundary events produced by this fix.
    pub zone_events: Vec<ZoneEvent>,
    /// Set when the push triggered a flush.
    pub flush: Option<FlushReport>,
}

/// Engine statistics snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub fixes_received: u64,
    pub fixes_accepted: u64,
    pub fixes_debounced: u64,
    pub zone_transitions: u64,
    pub commits_succeeded: u64,
    pub commits_failed: u64,
    pub batches_discarded: u64,
    pub pending_len: usize,
    pub carryover_len: usize,
    pub route_len: usize,
    pub cached_points: usize,
}

/// The trace accumulator and flush scheduler.
///
/// Explicitly constructed and owned; configuration is injected rather than
/// read from ambient global state, and `reset` gives it an explicit
/// lifecycle.
pub struct TraceEngine<B: CommitBackend, S: PoiStatusSink> {
    config: TrackerConfig,
    session: TrackingSession,
    backend: B,
    poi_sink: S,

    route: Route,
    zone_tracker: ZoneTracker,
    cache: VisiblePointCache,

    /// Pending trace batch, swapped out atomically on flush.
    pending: Vec<Fix>,
    /// Failed batch awaiting retry; prepended to the next outgoing batch.
    carryover: Vec<Fix>,
    retry_count: u32,
    next_retry_at_ms: Option<i64>,

    last_flush_at_ms: i64,
    last_accepted: Option<Fix>,

    /// Bumped on reset; in-flight commit results from an older generation
    /// are discarded.
    generation: u64,

    stats: EngineStats,
}

impl<B: CommitBackend, S: PoiStatusSink> TraceEngine<B, S> {
    pub fn new(config: TrackerConfig, session: TrackingSession, backend: B, poi_sink: S) -> Self {
        let zone_tracker = ZoneTracker::new(config.zone_precision);
        let last_flush_at_ms = session.started_at_ms;
        Self {
            config,
            session,
            backend,
            poi_sink,
            route: Route::new(),
            zone_tracker,
            cache: VisiblePointCache::new(),
            pending: Vec::new(),
            carryover: Vec::new(),
            retry_count: 0,
            next_retry_at_ms: None,
            last_flush_at_ms,
            last_accepted: None,
            generation: 0,
            stats: EngineStats::default(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn cache(&self) -> &VisiblePointCache {
        &self.cache
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    pub fn poi_sink(&self) -> &S {
        &self.poi_sink
    }

    pub fn current_zone(&self) -> Option<&String> {
        self.zone_tracker.current_zone()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = self.stats.clone();
        stats.pending_len = self.pending.len();
        stats.carryover_len = self.carryover.len();
        stats.route_len = self.route.len();
        stats.cached_points = self.cache.len();
        stats
    }

    // ========================================================================
    // Push
    // ========================================================================

    /// Process one fix in arrival order.
    ///
    /// Runs zone detection on every fix, then debounces fixes closer than
    /// the configured minimum distance to the last accepted fix; those stay
    /// out of the route and the pending batch but can still trigger a
    /// zone-change flush. Accepted fixes are appended and checked against
    /// the count and interval triggers.
    pub async fn push(&mut self, fix: Fix) -> Result<PushOutcome> {
        if self.session.is_stopped() {
            return Err(TraceError::SessionStopped);
        }

        self.stats.fixes_received += 1;

        // Zone detection sees every fix, debounced or not: a small step can
        // still cross a cell boundary.
        let zone_events = self.zone_tracker.observe(&fix);
        // A transition is an exit/enter pair; the very first enter is
        // session start, not a zone change, and does not force a flush.
        let zone_changed = zone_events.len() == 2;
        if zone_changed {
            self.stats.zone_transitions += 1;
        }

        let debounced = match &self.last_accepted {
            Some(last) => {
                let dist = haversine_distance(last, &fix);
                if dist < self.config.min_distance_m {
                    debug!(
                        "[Engine] Debounced fix {:.1}m from previous (min {:.1}m)",
                        dist, self.config.min_distance_m
                    );
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        let (count_due, interval_due) = if debounced {
            self.stats.fixes_debounced += 1;
            (false, false)
        } else {
            self.stats.fixes_accepted += 1;
            self.route.append(fix, &self.config.compress);
            self.pending.push(fix);
            self.last_accepted = Some(fix);

            (
                self.pending.len() >= self.config.flush_count_threshold,
                fix.timestamp_ms - self.last_flush_at_ms >= self.config.flush_interval_ms,
            )
        };

        let flush = if count_due || interval_due || zone_changed {
            debug!(
                "[Engine] Flush trigger (count={} interval={} zone={})",
                count_due, interval_due, zone_changed
            );
            Some(self.flush(fix.timestamp_ms).await?)
        } else {
            None
        };

        Ok(PushOutcome {
            accepted: !debounced,
            zone_events,
            flush,
        })
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Commit the buffered trace to the backend.
    ///
    /// The pending buffer is swapped out atomically before the send, so it
    /// is empty when this returns regardless of the network outcome. A
    /// failed batch moves to the carryover slot and is retried (with
    /// exponential backoff) at the front of the next outgoing batch, until
    /// the retry budget is exhausted; then it is discarded and the failure
    /// surfaced.
    pub async fn flush(&mut self, now_ms: i64) -> Result<FlushReport> {
        self.flush_inner(now_ms, false).await
    }

    /// Timer hook for the flush-by-interval trigger. Flushes only when the
    /// interval elapsed and something is buffered.
    pub async fn tick(&mut self, now_ms: i64) -> Result<Option<FlushReport>> {
        if self.session.is_stopped() {
            return Ok(None);
        }
        let due = now_ms - self.last_flush_at_ms >= self.config.flush_interval_ms;
        if due && (!self.pending.is_empty() || !self.carryover.is_empty()) {
            return Ok(Some(self.flush_inner(now_ms, false).await?));
        }
        Ok(None)
    }

    async fn flush_inner(&mut self, now_ms: i64, force: bool) -> Result<FlushReport> {
        // Swap-and-clear first: pushes that happen after this flush go to
        // a fresh buffer.
        let fresh = std::mem::take(&mut self.pending);
        self.last_flush_at_ms = now_ms;

        if !force {
            if let Some(until_ms) = self.next_retry_at_ms {
                if now_ms < until_ms {
                    // Park the swapped fixes behind the failed batch.
                    self.carryover.extend(fresh);
                    return Ok(FlushReport::Deferred { until_ms });
                }
            }
        }

        // Failed batch re-queues at the front.
        let mut outgoing = std::mem::take(&mut self.carryover);
        outgoing.extend(fresh);

        if outgoing.is_empty() {
            return Ok(FlushReport::NothingToSend);
        }

        let request = TraceCommitRequest {
            device_id: self.session.device_id.clone(),
            user_id: self.session.user_id.clone(),
            zone_key: self.zone_tracker.current_zone().cloned(),
            trace: TracePayload::Fixes(outgoing.clone()),
            bbox: compute_bounds(&outgoing),
        };

        let generation = self.generation;
        let result = self.backend.commit(&request).await;

        if self.generation != generation {
            info!("[Engine] Discarding commit result from a reset session");
            return Ok(FlushReport::Discarded);
        }

        match result {
            Ok(response) => {
                let sent = outgoing.len();
                self.retry_count = 0;
                self.next_retry_at_ms = None;
                self.stats.commits_succeeded += 1;

                self.apply_response(&response, now_ms);

                // Keep the stored path in sync without re-sending already
                // committed raw points.
                self.route.recompress(&self.config.compress);

                info!(
                    "[Engine] Committed {} fixes: {} discovered, {} visible (ttl {}ms)",
                    sent,
                    response.discovered_points.len(),
                    response.visible_points.len(),
                    response.ttl_ms
                );

                Ok(FlushReport::Committed {
                    sent,
                    discovered: response.discovered_points.len(),
                    visible: response.visible_points.len(),
                    ttl_ms: response.ttl_ms,
                })
            }
            Err(err) => {
                self.stats.commits_failed += 1;
                self.retry_count += 1;

                if self.retry_count >= self.config.max_commit_retries {
                    let attempts = self.retry_count;
                    self.stats.batches_discarded += 1;
                    self.retry_count = 0;
                    self.next_retry_at_ms = None;
                    warn!(
                        "[Engine] Dropping batch of {} fixes after {} failed attempts: {}",
                        outgoing.len(),
                        attempts,
                        err
                    );
                    return Err(TraceError::CommitFailed {
                        attempts,
                        message: err.to_string(),
                    });
                }

                // Exponential backoff: base, 2x, 4x...
                let backoff_ms =
                    self.config.retry_backoff_base_ms * (1_i64 << (self.retry_count - 1).min(4));
                self.next_retry_at_ms = Some(now_ms + backoff_ms);
                self.carryover = outgoing;
                warn!(
                    "[Engine] Commit failed (attempt {}), retrying {} fixes after {}ms: {}",
                    self.retry_count,
                    self.carryover.len(),
                    backoff_ms,
                    err
                );

                Ok(FlushReport::Requeued {
                    attempt: self.retry_count,
                })
            }
        }
    }

    fn apply_response(&mut self, response: &VisiblePointSet, now_ms: i64) {
        self.cache.merge(response, now_ms);

        for point in &response.discovered_points {
            self.poi_sink.update(PoiStatusUpdate {
                key: point.key.clone(),
                status: PoiStatus::Discovered,
                discovered_at_ms: Some(now_ms),
                researched_at_ms: None,
                method: DiscoveryMethod::TraceCommit,
            });
        }
    }

    /// Explicitly confirm a discovered point as researched.
    pub fn confirm_researched(&mut self, key: &str, now_ms: i64) {
        let discovered_at_ms = self
            .cache
            .get(key, now_ms)
            .map(|entry| entry.received_at_ms);
        self.poi_sink.update(PoiStatusUpdate {
            key: key.to_string(),
            status: PoiStatus::Researched,
            discovered_at_ms,
            researched_at_ms: Some(now_ms),
            method: DiscoveryMethod::ExplicitConfirmation,
        });
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Stop the session: force one final flush (bypassing any retry
    /// backoff), then mark the session stopped.
    ///
    /// The flush error, if any, is surfaced after teardown bookkeeping so
    /// no data is silently lost on shutdown.
    pub async fn stop(&mut self, now_ms: i64) -> Result<FlushReport> {
        if self.session.is_stopped() {
            return Err(TraceError::SessionStopped);
        }

        let report = self.flush_inner(now_ms, true).await;
        self.session.stopped_at_ms = Some(now_ms);
        self.zone_tracker.reset();
        info!("[Engine] Session {} stopped", self.session.session_id);
        report
    }

    /// Reset to a fresh session. A commit in flight when this is called
    /// completes but its result is discarded.
    pub fn reset(&mut self, session: TrackingSession) {
        self.generation += 1;
        self.session = session;
        self.route = Route::new();
        self.zone_tracker.reset();
        self.cache.clear();
        self.pending.clear();
        self.carryover.clear();
        self.retry_count = 0;
        self.next_retry_at_ms = None;
        self.last_flush_at_ms = self.session.started_at_ms;
        self.last_accepted = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
