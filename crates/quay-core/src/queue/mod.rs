//! Operation queue: serial dispatch with bounded retry behind a circuit breaker.
//!
//! # 使用例
//! ```ignore
//! let queue = OperationQueue::builder()
//!     .config(QueueConfig::default())
//!     .spawn()?;
//!
//! queue.enqueue(
//!     move || client.fetch_asset(asset_id),
//!     |asset| cache.insert(asset),
//!     |err| tracing::warn!(%err, "asset unavailable"),
//! )?;
//! ```
//!
//! # 保証
//! - One attempt in flight at a time, in FIFO order
//! - A failed attempt is retried before anything queued behind it
//! - Exactly one of `on_success` / `on_failure` runs per operation, unless the
//!   operation is cancelled or dropped by shutdown (then neither runs)

mod dispatcher;
mod handle;
pub mod retry;
mod state;

pub use handle::OperationHandle;
pub use retry::{RetryDecision, RetryPolicy};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use self::dispatcher::Shared;
use self::state::QueueState;
use crate::breaker::CircuitBreaker;
use crate::config::{ConfigError, QueueConfig};
use crate::domain::{Call, Callbacks, Operation, OperationId, TypedCall};
use crate::error::{BoxError, OperationError, QueueError};
use crate::observability::{DegradedSignal, QueueStats};
use crate::ports::{Clock, SystemClock, UlidGenerator};

/// Per-operation overrides of the queue configuration.
///
/// # Example
/// ```ignore
/// let opts = OperationOptions::new()
///     .max_retries(0)
///     .deadline(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationOptions {
    max_retries: Option<u32>,
    deadline: DeadlineChoice,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum DeadlineChoice {
    #[default]
    FromConfig,
    Fixed(Duration),
    Unbounded,
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Per-attempt deadline. Must be non-zero.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = DeadlineChoice::Fixed(deadline);
        self
    }

    /// Let every attempt run for as long as it takes.
    pub fn without_deadline(mut self) -> Self {
        self.deadline = DeadlineChoice::Unbounded;
        self
    }

    fn resolve(&self, config: &QueueConfig) -> Result<(u32, Option<Duration>), QueueError> {
        let max_retries = self.max_retries.unwrap_or(config.max_retries);
        let deadline = match self.deadline {
            DeadlineChoice::FromConfig => config.default_deadline(),
            DeadlineChoice::Fixed(d) if d.is_zero() => {
                return Err(QueueError::InvalidOptions(
                    "deadline must be greater than zero".to_string(),
                ));
            }
            DeadlineChoice::Fixed(d) => Some(d),
            DeadlineChoice::Unbounded => None,
        };
        Ok((max_retries, deadline))
    }
}

/// Builds and starts an `OperationQueue`.
///
/// # Fail-fast
/// `spawn()` validates the configuration before anything is started.
pub struct QueueBuilder {
    config: QueueConfig,
    clock: Arc<dyn Clock>,
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Wall clock used for operation ids and trip timestamps.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Validate the configuration and start the dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(self) -> Result<OperationQueue, ConfigError> {
        self.config.validate().map_err(ConfigError::Validation)?;

        let breaker = CircuitBreaker::new(self.config.failure_threshold, self.config.cooldown());
        let ids = Box::new(UlidGenerator::new(Arc::clone(&self.clock)));
        let shared = Arc::new(Shared::new(
            QueueState::new(breaker),
            self.config,
            ids,
            self.clock,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(dispatcher::run(Arc::clone(&shared), shutdown_rx));

        tracing::debug!(config = ?shared.config, "operation queue started");

        Ok(OperationQueue {
            shared,
            shutdown_tx,
            join: Some(join),
        })
    }
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running queue. Dropping it shuts the queue down.
pub struct OperationQueue {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl OperationQueue {
    pub fn builder() -> QueueBuilder {
        QueueBuilder::new()
    }

    /// Start a queue with `config` and the system clock.
    pub fn spawn(config: QueueConfig) -> Result<Self, ConfigError> {
        QueueBuilder::new().config(config).spawn()
    }

    /// Append an operation to the back of the queue.
    ///
    /// `invoke` is called once per attempt and must produce a fresh future
    /// each time. Exactly one of the callbacks runs, on the dispatcher task,
    /// after the operation settles for good.
    ///
    /// # Errors
    /// `QueueError::ShutDown` after `shutdown()`.
    pub fn enqueue<F, Fut, T, Err, S, E>(
        &self,
        invoke: F,
        on_success: S,
        on_failure: E,
    ) -> Result<OperationId, QueueError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Err>> + Send + 'static,
        Err: Into<BoxError> + 'static,
        T: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(OperationError) + Send + 'static,
    {
        self.enqueue_with(invoke, on_success, on_failure, OperationOptions::default())
    }

    /// `enqueue` with per-operation overrides.
    ///
    /// # Errors
    /// - `QueueError::InvalidOptions` for a zero deadline
    /// - `QueueError::ShutDown` after `shutdown()`
    pub fn enqueue_with<F, Fut, T, Err, S, E>(
        &self,
        invoke: F,
        on_success: S,
        on_failure: E,
        options: OperationOptions,
    ) -> Result<OperationId, QueueError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Err>> + Send + 'static,
        Err: Into<BoxError> + 'static,
        T: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(OperationError) + Send + 'static,
    {
        let call = TypedCall::new(invoke, Callbacks::new(on_success, on_failure));
        self.push(Box::new(call), options)
    }

    /// Enqueue and get a handle that resolves to the terminal result.
    pub fn submit<F, Fut, T, Err>(&self, invoke: F) -> Result<OperationHandle<T>, QueueError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Err>> + Send + 'static,
        Err: Into<BoxError> + 'static,
        T: Send + 'static,
    {
        self.submit_with(invoke, OperationOptions::default())
    }

    pub fn submit_with<F, Fut, T, Err>(
        &self,
        invoke: F,
        options: OperationOptions,
    ) -> Result<OperationHandle<T>, QueueError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Err>> + Send + 'static,
        Err: Into<BoxError> + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let id = self.push(Box::new(TypedCall::new(invoke, tx)), options)?;
        Ok(OperationHandle::new(id, rx))
    }

    fn push(
        &self,
        call: Box<dyn Call>,
        options: OperationOptions,
    ) -> Result<OperationId, QueueError> {
        let (max_retries, deadline) = options.resolve(&self.shared.config)?;
        let id = self.shared.ids.next_operation_id();
        let op = Operation::new(id, max_retries, deadline, call);

        {
            let mut state = self.shared.lock();
            if state.is_closed() {
                drop(state);
                return Err(QueueError::ShutDown);
            }
            state.push_back(op);
        }
        self.shared.notify.notify_one();

        tracing::debug!(op_id = %id, max_retries, deadline = ?deadline, "operation enqueued");
        Ok(id)
    }

    /// Remove a pending operation (including one waiting for its retry).
    ///
    /// Returns `false` if the id is unknown, already settled, or its attempt
    /// is in flight. A cancelled operation's callbacks never run; its handle
    /// resolves to `OperationError::Cancelled`.
    pub fn cancel(&self, id: OperationId) -> bool {
        let removed = self.shared.lock().remove(id);
        match removed {
            Some(op) => {
                drop(op);
                tracing::debug!(op_id = %id, "operation cancelled");
                true
            }
            None => false,
        }
    }

    pub fn degraded(&self) -> DegradedSignal {
        DegradedSignal::new(self.shared.degraded.subscribe())
    }

    pub fn is_degraded(&self) -> bool {
        *self.shared.degraded.borrow()
    }

    pub fn stats(&self) -> QueueStats {
        let degraded = self.is_degraded();
        self.shared.lock().stats(degraded)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Stop accepting work and stop the dispatcher.
    ///
    /// The in-flight attempt (if any) runs to completion and is settled;
    /// pending operations are dropped without running their callbacks.
    /// Idempotent.
    pub fn shutdown(&self) {
        let dropped = self.shared.lock().close();
        if !dropped.is_empty() {
            tracing::info!(dropped = dropped.len(), "queue shut down with pending operations");
        }
        drop(dropped);
        // ignore send error: the dispatcher may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shut down and wait for the dispatcher to exit.
    pub async fn shutdown_and_join(mut self) {
        self.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for OperationQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}
