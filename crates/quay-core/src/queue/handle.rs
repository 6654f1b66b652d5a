//! Awaitable result of a submitted operation.

use tokio::sync::oneshot;

use crate::domain::OperationId;
use crate::error::OperationError;

/// Returned by `OperationQueue::submit`.
///
/// Dropping the handle does not cancel the operation; use
/// `OperationQueue::cancel` with `id()` for that.
#[derive(Debug)]
pub struct OperationHandle<T> {
    id: OperationId,
    rx: oneshot::Receiver<Result<T, OperationError>>,
}

impl<T> OperationHandle<T> {
    pub(crate) fn new(id: OperationId, rx: oneshot::Receiver<Result<T, OperationError>>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Wait for the terminal result.
    ///
    /// Resolves to `Err(OperationError::Cancelled)` when the operation was
    /// cancelled or dropped by shutdown before it settled.
    pub async fn outcome(self) -> Result<T, OperationError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(OperationError::Cancelled))
    }
}
