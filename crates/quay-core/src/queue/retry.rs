//! Retry policy: decides whether a failed attempt is tried again.

use crate::error::OperationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reinsert at the front of the queue.
    Retry,
    /// Terminal: deliver the error to the caller.
    GiveUp,
}

/// Bounded retry without backoff.
///
/// Pacing between attempts comes from the queue's inter-dispatch delay, and
/// sustained failure is handled by the circuit breaker, so the policy itself
/// only counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Decide after a failed attempt.
    ///
    /// # Arguments
    /// * `attempt` - 1-based number of the attempt that just failed.
    ///
    /// With `max_retries = 3`: attempts 1..=3 are retried, attempt 4 gives up,
    /// so an always-failing call is invoked 4 times.
    pub fn decide(&self, attempt: u32, error: &OperationError) -> RetryDecision {
        if error.is_retryable() && attempt <= self.max_retries {
            RetryDecision::Retry
        } else {
            RetryDecision::GiveUp
        }
    }
}
