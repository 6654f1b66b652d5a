use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by a remote call.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why an operation failed.
///
/// Delivered exactly once through `on_failure` (or an [`OperationHandle`]) after
/// the retry budget is spent. Intermediate failures never reach the caller.
///
/// [`OperationHandle`]: crate::queue::OperationHandle
#[derive(Debug, Error)]
pub enum OperationError {
    /// The remote call settled with an error.
    #[error("remote call failed: {0}")]
    Call(#[source] BoxError),

    /// The remote call did not settle before its deadline.
    #[error("operation timed out after {deadline:?}")]
    Timeout { deadline: Duration },

    /// The remote call panicked. Terminal on first occurrence.
    #[error("remote call panicked: {0}")]
    Panicked(String),

    /// The task driving the call was cancelled by the runtime.
    #[error("remote call was interrupted before it settled")]
    Interrupted,

    /// The operation was cancelled or dropped before it could settle.
    /// Only observable through an `OperationHandle`.
    #[error("operation was cancelled")]
    Cancelled,
}

impl OperationError {
    pub fn call(error: impl Into<BoxError>) -> Self {
        Self::Call(error.into())
    }

    /// "remote too slow" as opposed to "remote refused".
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether another attempt may be scheduled after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Call(_) | Self::Timeout { .. })
    }
}

/// Synchronous misuse of the queue API.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("operation queue has been shut down")]
    ShutDown,

    #[error("invalid operation options: {0}")]
    InvalidOptions(String),
}
