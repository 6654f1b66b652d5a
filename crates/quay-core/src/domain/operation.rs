//! Operation record: identity + retry bookkeeping + type-erased call.
//!
//! # 二層構造
//! - **Typed**: `TypedCall<F, T, C>` keeps the caller's invoke closure and its
//!   `Completion` (callbacks or a result channel) with the concrete type `T`.
//! - **Dyn**: `Call` is object-safe so heterogeneous operations can share one
//!   `VecDeque<Operation>`.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use tokio::sync::oneshot;

use super::ids::OperationId;
use crate::deadline;
use crate::error::{BoxError, OperationError};

/// Object-safe view of an operation's call and its completion.
pub(crate) trait Call: Send {
    /// Run one attempt. On success the value is kept until `succeed`.
    fn attempt(&mut self, deadline: Option<Duration>) -> BoxFuture<'_, Result<(), OperationError>>;

    /// Deliver the value of the last successful attempt.
    fn succeed(self: Box<Self>);

    /// Deliver the terminal error.
    fn fail(self: Box<Self>, error: OperationError);
}

/// Where the final result of an operation goes. Consumed exactly once.
pub(crate) trait Completion<T>: Send + 'static {
    fn succeed(self, value: T);
    fn fail(self, error: OperationError);
}

/// `on_success` / `on_failure` closures passed at enqueue time.
pub(crate) struct Callbacks<S, E> {
    on_success: S,
    on_failure: E,
}

impl<S, E> Callbacks<S, E> {
    pub(crate) fn new(on_success: S, on_failure: E) -> Self {
        Self {
            on_success,
            on_failure,
        }
    }
}

impl<T, S, E> Completion<T> for Callbacks<S, E>
where
    S: FnOnce(T) + Send + 'static,
    E: FnOnce(OperationError) + Send + 'static,
{
    fn succeed(self, value: T) {
        (self.on_success)(value);
    }

    fn fail(self, error: OperationError) {
        (self.on_failure)(error);
    }
}

/// Result channel behind an `OperationHandle`. A dropped receiver is fine.
impl<T: Send + 'static> Completion<T> for oneshot::Sender<Result<T, OperationError>> {
    fn succeed(self, value: T) {
        let _ = self.send(Ok(value));
    }

    fn fail(self, error: OperationError) {
        let _ = self.send(Err(error));
    }
}

pub(crate) struct TypedCall<F, T, C> {
    invoke: F,
    completion: C,
    value: Option<T>,
}

impl<F, Fut, T, Err, C> TypedCall<F, T, C>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Err>>,
{
    pub(crate) fn new(invoke: F, completion: C) -> Self {
        Self {
            invoke,
            completion,
            value: None,
        }
    }
}

impl<F, Fut, T, Err, C> Call for TypedCall<F, T, C>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, Err>> + Send + 'static,
    Err: Into<BoxError> + 'static,
    T: Send + 'static,
    C: Completion<T>,
{
    fn attempt(&mut self, deadline: Option<Duration>) -> BoxFuture<'_, Result<(), OperationError>> {
        // invoke 自体は dispatcher task 上で同期実行される
        let call = match catch_unwind(AssertUnwindSafe(|| (self.invoke)())) {
            Ok(call) => call,
            Err(payload) => {
                let error = OperationError::Panicked(deadline::panic_message(payload));
                return future::ready(Err(error)).boxed();
            }
        };
        async move {
            let value = match deadline {
                Some(deadline) => deadline::guard_future(call, deadline).await?,
                None => deadline::detached(call).await?,
            };
            self.value = Some(value);
            Ok(())
        }
        .boxed()
    }

    fn succeed(self: Box<Self>) {
        let this = *self;
        if let Some(value) = this.value {
            this.completion.succeed(value);
        }
    }

    fn fail(self: Box<Self>, error: OperationError) {
        self.completion.fail(error);
    }
}

/// A queued operation.
///
/// `attempt` starts at 0 and is incremented when an attempt begins, so while
/// an attempt is running it is the 1-based number of that attempt.
/// Invariant: `attempt <= max_retries + 1`.
pub(crate) struct Operation {
    id: OperationId,
    attempt: u32,
    max_retries: u32,
    deadline: Option<Duration>,
    call: Box<dyn Call>,
}

impl Operation {
    pub(crate) fn new(
        id: OperationId,
        max_retries: u32,
        deadline: Option<Duration>,
        call: Box<dyn Call>,
    ) -> Self {
        Self {
            id,
            attempt: 0,
            max_retries,
            deadline,
            call,
        }
    }

    pub(crate) fn id(&self) -> OperationId {
        self.id
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Mark the start of a new attempt.
    pub(crate) fn begin_attempt(&mut self) {
        debug_assert!(self.attempt < self.max_attempts());
        self.attempt += 1;
    }

    pub(crate) async fn run_attempt(&mut self) -> Result<(), OperationError> {
        self.call.attempt(self.deadline).await
    }

    pub(crate) fn succeed(self) {
        self.call.succeed();
    }

    pub(crate) fn fail(self, error: OperationError) {
        self.call.fail(error);
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("attempt", &self.attempt)
            .field("max_retries", &self.max_retries)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use ulid::Ulid;

    fn op_with<F, Fut, T>(invoke: F, log: Arc<Mutex<Vec<String>>>) -> Operation
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
        T: std::fmt::Debug + Send + 'static,
    {
        let ok_log = Arc::clone(&log);
        let call = TypedCall::new(
            invoke,
            Callbacks::new(
                move |v: T| ok_log.lock().unwrap().push(format!("ok:{v:?}")),
                move |e: OperationError| log.lock().unwrap().push(format!("err:{e}")),
            ),
        );
        Operation::new(OperationId::from_ulid(Ulid::new()), 2, None, Box::new(call))
    }

    #[tokio::test]
    async fn success_value_is_delivered_on_succeed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut op = op_with(|| async { Ok::<_, String>(42) }, Arc::clone(&log));

        op.begin_attempt();
        op.run_attempt().await.unwrap();
        assert_eq!(op.attempt(), 1);
        assert!(log.lock().unwrap().is_empty());

        op.succeed();
        assert_eq!(*log.lock().unwrap(), vec!["ok:42".to_string()]);
    }

    #[tokio::test]
    async fn failure_is_reported_only_through_fail() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut op = op_with(
            || async { Err::<(), _>("refused".to_string()) },
            Arc::clone(&log),
        );

        op.begin_attempt();
        let err = op.run_attempt().await.unwrap_err();
        assert!(matches!(err, OperationError::Call(_)));
        assert!(log.lock().unwrap().is_empty());

        op.fail(err);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["err:remote call failed: refused".to_string()]
        );
    }

    #[tokio::test]
    async fn result_channel_receives_terminal_error() {
        let (tx, rx) = oneshot::channel::<Result<u8, OperationError>>();
        let mut op = Operation::new(
            OperationId::from_ulid(Ulid::new()),
            0,
            None,
            Box::new(TypedCall::new(|| async { Err::<u8, _>("gone") }, tx)),
        );

        op.begin_attempt();
        let err = op.run_attempt().await.unwrap_err();
        op.fail(err);
        assert!(matches!(rx.await.unwrap(), Err(OperationError::Call(_))));
    }

    #[tokio::test]
    async fn panicking_invoke_settles_as_panicked() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut op = op_with(
            || -> std::future::Ready<Result<u8, String>> { panic!("sync boom") },
            Arc::clone(&log),
        );

        op.begin_attempt();
        let err = op.run_attempt().await.unwrap_err();
        assert!(matches!(err, OperationError::Panicked(ref msg) if msg == "sync boom"));
        assert!(!err.is_retryable());

        op.fail(err);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["err:remote call panicked: sync boom".to_string()]
        );
    }

    #[test]
    fn max_attempts_counts_the_first_try() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let op = op_with(|| async { Ok::<_, String>(()) }, log);
        assert_eq!(op.max_retries(), 2);
        assert_eq!(op.max_attempts(), 3);
    }
}
