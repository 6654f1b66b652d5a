//! RemoteCall port - リモート呼び出しの抽象化
//!
//! The queue never knows what an operation does. This trait is the shape of the
//! remote dependency (asset / location / project CRUD endpoints) that callers
//! usually wrap into operations.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::BoxError;

/// A command-style remote endpoint: `command` + JSON args → JSON result.
#[async_trait]
pub trait RemoteCall: Send + Sync {
    async fn call(&self, command: &str, args: Value) -> Result<Value, BoxError>;
}

/// Adapt a `RemoteCall` into an `invoke` closure for the queue.
///
/// Every invocation (including retries) issues the same command with a fresh
/// copy of `args`.
///
/// ```ignore
/// let id = queue.enqueue(
///     invoker(remote, "asset.update".into(), json!({ "id": 7, "status": "checked_out" })),
///     |v| println!("updated: {v}"),
///     |e| eprintln!("gave up: {e}"),
/// )?;
/// ```
pub fn invoker(
    remote: Arc<dyn RemoteCall>,
    command: String,
    args: Value,
) -> impl FnMut() -> BoxFuture<'static, Result<Value, BoxError>> + Send + 'static {
    let command: Arc<str> = Arc::from(command);
    move || {
        let remote = Arc::clone(&remote);
        let command = Arc::clone(&command);
        let args = args.clone();
        async move { remote.call(&command, args).await }.boxed()
    }
}
