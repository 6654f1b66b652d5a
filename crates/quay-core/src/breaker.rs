//! Circuit breaker.
//!
//! Converts a sustained run of failures into a temporary full stop of dispatch.
//!
//! ```text
//! Closed → Open:   failure_count >= threshold (cooldown armed)
//! Open → Closed:   cooldown elapsed (counter reset to 0, no probe)
//! ```
//!
//! Successes decay the counter by one instead of clearing it, so only an
//! aggregate failure surplus trips the breaker; isolated errors interleaved
//! with successes never do.
//!
//! The breaker holds no timer of its own. It records when it may close again
//! (`reopen_at`) and the owning dispatcher sleeps until then and calls `reset`.

use std::time::Duration;

use tokio::time::Instant;

use crate::domain::BreakerState;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failures: u32,
    threshold: u32,
    cooldown: Duration,
    /// `Some` while open.
    reopen_at: Option<Instant>,
    trips: u64,
}

impl CircuitBreaker {
    /// `threshold` is clamped to at least 1.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            failures: 0,
            threshold: threshold.max(1),
            cooldown,
            reopen_at: None,
            trips: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.failures = self.failures.saturating_sub(1);
    }

    /// Count a failure. Returns `true` if this failure tripped the breaker.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        self.failures = self.failures.saturating_add(1);
        if self.reopen_at.is_none() && self.failures >= self.threshold {
            self.trip(now);
            return true;
        }
        false
    }

    fn trip(&mut self, now: Instant) {
        self.reopen_at = Some(now + self.cooldown);
        self.trips += 1;
    }

    /// Close the breaker and clear the failure counter.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.reopen_at = None;
    }

    pub fn is_open(&self) -> bool {
        self.reopen_at.is_some()
    }

    pub fn state(&self) -> BreakerState {
        if self.is_open() {
            BreakerState::Open
        } else {
            BreakerState::Closed
        }
    }

    /// When the cooldown of the current open period ends.
    pub fn reopen_at(&self) -> Option<Instant> {
        self.reopen_at
    }

    pub fn failure_count(&self) -> u32 {
        self.failures
    }

    /// Number of Closed → Open transitions so far.
    pub fn trips(&self) -> u64 {
        self.trips
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}
