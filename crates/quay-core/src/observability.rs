//! Status views for UI banners and diagnostics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::domain::{BreakerState, OperationId};

/// Point-in-time snapshot of a queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    /// Operations waiting in the queue (including ones waiting for a retry).
    pub pending: usize,
    /// The operation whose attempt is currently in flight.
    pub dispatching: Option<OperationId>,
    pub failure_count: u32,
    pub breaker: BreakerState,
    pub degraded: bool,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub cancelled: u64,
    pub trips: u64,
    pub last_trip_at: Option<DateTime<Utc>>,
}

/// Read-only "is the system currently degraded" signal.
///
/// Mirrors the breaker's Open state: `true` from the moment it trips until the
/// cooldown reset.
#[derive(Debug, Clone)]
pub struct DegradedSignal {
    rx: watch::Receiver<bool>,
}

impl DegradedSignal {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_degraded(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next transition and return the new value.
    /// Returns `None` once the queue is gone.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Wait until the signal equals `degraded`.
    /// Returns `None` once the queue is gone.
    pub async fn wait_for(&mut self, degraded: bool) -> Option<()> {
        self.rx.wait_for(|v| *v == degraded).await.ok().map(|_| ())
    }
}
