//! Queue state guarded by the queue's mutex.
//!
//! Everything here is synchronous. The dispatcher takes the lock, asks for
//! the next step, releases it, awaits the attempt, and then takes the lock
//! again to settle. ロック跨ぎ await はしない。

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::retry::{RetryDecision, RetryPolicy};
use crate::breaker::CircuitBreaker;
use crate::domain::{Operation, OperationId};
use crate::error::OperationError;
use crate::observability::QueueStats;

/// What the dispatcher should do next.
#[derive(Debug)]
pub(crate) enum Step {
    /// Run this operation's next attempt.
    Dispatch(Operation),
    /// Breaker is open: wait until the cooldown ends.
    Paused(Instant),
    /// Nothing pending.
    Idle,
    /// Queue was shut down.
    Stopped,
}

/// Result of settling a failed attempt.
#[derive(Debug)]
pub(crate) struct FailureSettlement {
    pub(crate) settled: Settled,
    /// This failure opened the breaker.
    pub(crate) tripped: bool,
}

#[derive(Debug)]
pub(crate) enum Settled {
    /// Back at the front of the queue.
    Retrying,
    /// Terminal; the caller delivers the error.
    Exhausted(Operation, OperationError),
}

#[derive(Debug, Default)]
struct Totals {
    succeeded: u64,
    failed: u64,
    retried: u64,
    cancelled: u64,
}

#[derive(Debug)]
pub(crate) struct QueueState {
    pending: VecDeque<Operation>,
    dispatching: Option<OperationId>,
    breaker: CircuitBreaker,
    closed: bool,
    totals: Totals,
    last_trip_at: Option<DateTime<Utc>>,
}

impl QueueState {
    pub(crate) fn new(breaker: CircuitBreaker) -> Self {
        Self {
            pending: VecDeque::new(),
            dispatching: None,
            breaker,
            closed: false,
            totals: Totals::default(),
            last_trip_at: None,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn push_back(&mut self, op: Operation) {
        self.pending.push_back(op);
    }

    /// Remove a pending operation, including one waiting for a retry.
    /// The in-flight operation is not pending and cannot be removed.
    pub(crate) fn remove(&mut self, id: OperationId) -> Option<Operation> {
        let pos = self.pending.iter().position(|op| op.id() == id)?;
        let op = self.pending.remove(pos)?;
        self.totals.cancelled += 1;
        Some(op)
    }

    pub(crate) fn next_step(&mut self) -> Step {
        if self.closed {
            return Step::Stopped;
        }
        if let Some(until) = self.breaker.reopen_at() {
            return Step::Paused(until);
        }
        match self.pending.pop_front() {
            Some(mut op) => {
                op.begin_attempt();
                self.dispatching = Some(op.id());
                Step::Dispatch(op)
            }
            None => Step::Idle,
        }
    }

    /// Record a successful attempt. The operation is handed back so the
    /// success callback can run outside the lock.
    pub(crate) fn settle_success(&mut self, op: Operation) -> Operation {
        self.dispatching = None;
        self.breaker.record_success();
        self.totals.succeeded += 1;
        op
    }

    pub(crate) fn settle_failure(
        &mut self,
        op: Operation,
        error: OperationError,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> FailureSettlement {
        self.dispatching = None;

        let tripped = self.breaker.record_failure(now);
        if tripped {
            self.last_trip_at = Some(wall);
        }

        let settled = match RetryPolicy::new(op.max_retries()).decide(op.attempt(), &error) {
            RetryDecision::Retry => {
                self.totals.retried += 1;
                self.pending.push_front(op);
                Settled::Retrying
            }
            RetryDecision::GiveUp => {
                self.totals.failed += 1;
                Settled::Exhausted(op, error)
            }
        };

        FailureSettlement { settled, tripped }
    }

    /// Cooldown elapsed: close the breaker with a fresh failure count.
    pub(crate) fn close_breaker(&mut self) {
        self.breaker.reset();
    }

    /// Stop accepting work. Pending operations are handed back so they can be
    /// dropped outside the lock; their callbacks never run.
    pub(crate) fn close(&mut self) -> Vec<Operation> {
        self.closed = true;
        self.pending.drain(..).collect()
    }

    pub(crate) fn stats(&self, degraded: bool) -> QueueStats {
        QueueStats {
            pending: self.pending.len(),
            dispatching: self.dispatching,
            failure_count: self.breaker.failure_count(),
            breaker: self.breaker.state(),
            degraded,
            succeeded: self.totals.succeeded,
            failed: self.totals.failed,
            retried: self.totals.retried,
            cancelled: self.totals.cancelled,
            trips: self.breaker.trips(),
            last_trip_at: self.last_trip_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BreakerState, Callbacks, TypedCall};
    use std::time::Duration;
    use ulid::Ulid;

    fn op(max_retries: u32) -> Operation {
        let call = TypedCall::new(
            || async { Ok::<_, String>(()) },
            Callbacks::new(|_: ()| {}, |_: OperationError| {}),
        );
        Operation::new(OperationId::from_ulid(Ulid::new()), max_retries, None, Box::new(call))
    }

    fn state(threshold: u32) -> QueueState {
        QueueState::new(CircuitBreaker::new(threshold, Duration::from_secs(5)))
    }

    fn dispatch(state: &mut QueueState) -> Operation {
        match state.next_step() {
            Step::Dispatch(op) => op,
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    fn transient() -> OperationError {
        OperationError::call("connection reset")
    }

    #[test]
    fn dispatch_is_fifo_and_tracks_in_flight() {
        let mut s = state(5);
        let (a, b) = (op(0), op(0));
        let (a_id, b_id) = (a.id(), b.id());
        s.push_back(a);
        s.push_back(b);

        let first = dispatch(&mut s);
        assert_eq!(first.id(), a_id);
        assert_eq!(first.attempt(), 1);
        assert_eq!(s.stats(false).dispatching, Some(a_id));

        s.settle_success(first);
        assert_eq!(s.stats(false).dispatching, None);
        assert_eq!(dispatch(&mut s).id(), b_id);
    }

    #[test]
    fn retry_goes_to_the_front() {
        let mut s = state(5);
        let (a, b) = (op(1), op(0));
        let (a_id, b_id) = (a.id(), b.id());
        s.push_back(a);
        s.push_back(b);

        let first = dispatch(&mut s);
        let out = s.settle_failure(first, transient(), Instant::now(), Utc::now());
        assert!(matches!(out.settled, Settled::Retrying));
        assert!(!out.tripped);

        let again = dispatch(&mut s);
        assert_eq!(again.id(), a_id);
        assert_eq!(again.attempt(), 2);

        let out = s.settle_failure(again, transient(), Instant::now(), Utc::now());
        assert!(matches!(out.settled, Settled::Exhausted(_, OperationError::Call(_))));
        assert_eq!(dispatch(&mut s).id(), b_id);

        let stats = s.stats(false);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.failure_count, 2);
    }

    #[test]
    fn trip_pauses_dispatch_until_reset() {
        let mut s = state(2);
        for _ in 0..3 {
            s.push_back(op(0));
        }

        let now = Instant::now();
        let first = dispatch(&mut s);
        assert!(!s.settle_failure(first, transient(), now, Utc::now()).tripped);
        let second = dispatch(&mut s);
        let wall = Utc::now();
        assert!(s.settle_failure(second, transient(), now, wall).tripped);

        match s.next_step() {
            Step::Paused(until) => assert_eq!(until, now + Duration::from_secs(5)),
            other => panic!("expected pause, got {other:?}"),
        }
        let stats = s.stats(true);
        assert_eq!(stats.breaker, BreakerState::Open);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.trips, 1);
        assert_eq!(stats.last_trip_at, Some(wall));

        s.close_breaker();
        assert_eq!(s.stats(false).failure_count, 0);
        assert!(matches!(s.next_step(), Step::Dispatch(_)));
    }

    #[test]
    fn success_decrements_failure_count() {
        let mut s = state(5);
        s.push_back(op(1));
        s.push_back(op(0));

        let first = dispatch(&mut s);
        s.settle_failure(first, transient(), Instant::now(), Utc::now());
        assert_eq!(s.stats(false).failure_count, 1);

        let retry = dispatch(&mut s);
        s.settle_success(retry);
        assert_eq!(s.stats(false).failure_count, 0);
        assert_eq!(s.stats(false).succeeded, 1);
    }

    #[test]
    fn remove_finds_pending_only() {
        let mut s = state(5);
        let (a, b) = (op(0), op(0));
        let (a_id, b_id) = (a.id(), b.id());
        s.push_back(a);
        s.push_back(b);

        let in_flight = dispatch(&mut s);
        assert!(s.remove(in_flight.id()).is_none());
        assert_eq!(s.remove(b_id).map(|op| op.id()), Some(b_id));
        assert!(s.remove(b_id).is_none());
        assert_eq!(s.stats(false).cancelled, 1);
        assert_eq!(a_id, in_flight.id());
    }

    #[test]
    fn close_drains_and_stops() {
        let mut s = state(5);
        s.push_back(op(0));
        s.push_back(op(0));

        let drained = s.close();
        assert_eq!(drained.len(), 2);
        assert!(s.is_closed());
        assert!(matches!(s.next_step(), Step::Stopped));
        assert_eq!(s.stats(false).pending, 0);
    }
}
