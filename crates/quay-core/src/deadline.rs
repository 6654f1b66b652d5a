//! Deadline guard.
//!
//! Bounds how long a single asynchronous call may take. The call is driven on
//! its own Tokio task, so hitting the deadline does not abort it: the call may
//! still complete in the background, and its late result is dropped.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};

use crate::error::{BoxError, OperationError};

/// Default per-attempt deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// Run `call` and wait at most `deadline` for it to settle.
///
/// # Errors
/// - `Timeout { deadline }` when the deadline elapses first
/// - `Call` when the call settles with an error
/// - `Panicked` when the call panics
///
/// # Example
/// ```ignore
/// let value = guard(|| remote.fetch_asset(id), Duration::from_secs(10)).await?;
/// ```
pub async fn guard<F, Fut, T, E>(call: F, deadline: Duration) -> Result<T, OperationError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + 'static,
{
    guard_future(call(), deadline).await
}

pub(crate) async fn guard_future<Fut, T, E>(
    call: Fut,
    deadline: Duration,
) -> Result<T, OperationError>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + 'static,
{
    let abandoned = Arc::new(AtomicBool::new(false));
    let task = spawn_call(call, Arc::clone(&abandoned));

    match tokio::time::timeout(deadline, task).await {
        Ok(joined) => settle(joined),
        Err(_) => {
            // JoinHandle を drop しても task は止まらない（detach されるだけ）
            abandoned.store(true, Ordering::Release);
            Err(OperationError::Timeout { deadline })
        }
    }
}

/// Run `call` without a deadline. Panics are still contained.
pub(crate) async fn detached<Fut, T, E>(call: Fut) -> Result<T, OperationError>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + 'static,
{
    let task = spawn_call(call, Arc::new(AtomicBool::new(false)));
    settle(task.await)
}

fn spawn_call<Fut, T, E>(call: Fut, abandoned: Arc<AtomicBool>) -> JoinHandle<Result<T, BoxError>>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + 'static,
{
    tokio::spawn(async move {
        let result = call.await.map_err(Into::into);
        if abandoned.load(Ordering::Acquire) {
            tracing::debug!(
                succeeded = result.is_ok(),
                "call settled after its deadline, result discarded"
            );
        }
        result
    })
}

fn settle<T>(joined: Result<Result<T, BoxError>, JoinError>) -> Result<T, OperationError> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(OperationError::Call(error)),
        Err(join_error) if join_error.is_panic() => Err(OperationError::Panicked(
            panic_message(join_error.into_panic()),
        )),
        Err(_) => Err(OperationError::Interrupted),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}
