//! Single dispatcher task.
//!
//! ```text
//! loop
//!   ├─ Stopped  → exit
//!   ├─ Paused   → sleep until cooldown end → close breaker, degraded=false
//!   ├─ Idle     → wait for enqueue (or shutdown)
//!   └─ Dispatch → run attempt (no lock held) → settle → callbacks
//!                 → inter-dispatch delay
//! ```
//!
//! At most one attempt is in flight per queue. Shutdown never interrupts it;
//! the loop only observes shutdown between steps.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::Instrument;

use super::state::{QueueState, Settled, Step};
use crate::config::QueueConfig;
use crate::deadline::panic_message;
use crate::domain::Operation;
use crate::ports::{Clock, IdGenerator};

/// State shared between the queue handle and its dispatcher.
pub(crate) struct Shared {
    state: Mutex<QueueState>,
    pub(crate) notify: Notify,
    pub(crate) config: QueueConfig,
    pub(crate) degraded: watch::Sender<bool>,
    pub(crate) ids: Box<dyn IdGenerator>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Shared {
    pub(crate) fn new(
        state: QueueState,
        config: QueueConfig,
        ids: Box<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (degraded, _) = watch::channel(false);
        Self {
            state: Mutex::new(state),
            notify: Notify::new(),
            config,
            degraded,
            ids,
            clock,
        }
    }

    /// Callbacks never run under this lock, so a poisoned mutex still holds
    /// consistent state.
    pub(crate) fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_trip(&self) {
        self.degraded.send_replace(true);
        tracing::warn!(
            threshold = self.config.failure_threshold,
            cooldown = ?self.config.cooldown(),
            "circuit breaker opened, dispatch paused"
        );
    }

    fn on_cooldown_elapsed(&self) {
        self.lock().close_breaker();
        self.degraded.send_replace(false);
        tracing::info!("cooldown elapsed, circuit breaker closed, dispatch resumed");
    }
}

pub(crate) async fn run(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    tracing::debug!("dispatcher started");

    loop {
        let step = shared.lock().next_step();

        match step {
            Step::Stopped => break,
            Step::Idle => {
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = shared.notify.notified() => {}
                }
            }
            Step::Paused(until) => {
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep_until(until) => shared.on_cooldown_elapsed(),
                }
            }
            Step::Dispatch(op) => {
                let span = tracing::debug_span!(
                    "dispatch",
                    op_id = %op.id(),
                    attempt = op.attempt(),
                    max_attempts = op.max_attempts(),
                );
                dispatch(&shared, op).instrument(span).await;

                let delay = shared.config.inter_dispatch_delay();
                if !delay.is_zero() {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    tracing::debug!("dispatcher stopped");
}

async fn dispatch(shared: &Shared, mut op: Operation) {
    match op.run_attempt().await {
        Ok(()) => {
            let op = shared.lock().settle_success(op);
            tracing::debug!("operation succeeded");
            deliver(|| op.succeed());
        }
        Err(error) => {
            tracing::warn!(error = %error, "attempt failed");
            let settlement = shared
                .lock()
                .settle_failure(op, error, Instant::now(), shared.clock.now());

            if settlement.tripped {
                shared.on_trip();
            }

            match settlement.settled {
                Settled::Retrying => tracing::debug!("retry queued at the front"),
                Settled::Exhausted(op, error) => {
                    tracing::error!(error = %error, "operation failed, no retries left");
                    deliver(|| op.fail(error));
                }
            }
        }
    }
}

/// Run a completion callback. A panicking callback is logged and does not
/// take the dispatcher down.
fn deliver(f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(panic = %panic_message(payload), "completion callback panicked");
    }
}
