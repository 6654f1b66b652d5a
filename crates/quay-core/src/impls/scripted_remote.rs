//! ScriptedRemote - 決まった応答を順番に返す RemoteCall
//!
//! Replies are consumed front to back; once the script is exhausted every call
//! gets the fallback reply.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BoxError;
use crate::ports::RemoteCall;

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok(Value),
    Err(String),
    /// Succeed after a delay.
    Delayed(Duration, Value),
    /// Never settle.
    Hang,
}

#[derive(Debug)]
struct Inner {
    script: VecDeque<Reply>,
    calls: Vec<(String, Value)>,
}

#[derive(Debug)]
pub struct ScriptedRemote {
    inner: Mutex<Inner>,
    fallback: Reply,
}

impl ScriptedRemote {
    pub fn new(script: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                script: script.into_iter().collect(),
                calls: Vec::new(),
            }),
            fallback: Reply::Ok(Value::Null),
        }
    }

    /// Reply used once the script runs out.
    pub fn with_fallback(mut self, fallback: Reply) -> Self {
        self.fallback = fallback;
        self
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteCall for ScriptedRemote {
    async fn call(&self, command: &str, args: Value) -> Result<Value, BoxError> {
        let reply = {
            let mut inner = self.lock();
            inner.calls.push((command.to_string(), args));
            inner
                .script
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        };

        match reply {
            Reply::Ok(value) => Ok(value),
            Reply::Err(message) => Err(message.into()),
            Reply::Delayed(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Reply::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replays_script_then_fallback() {
        let remote = ScriptedRemote::new([Reply::Err("busy".into()), Reply::Ok(json!(1))])
            .with_fallback(Reply::Ok(json!("done")));

        assert!(remote.call("asset.get", json!({"id": 1})).await.is_err());
        assert_eq!(remote.call("asset.get", json!({"id": 1})).await.unwrap(), json!(1));
        assert_eq!(remote.call("asset.list", Value::Null).await.unwrap(), json!("done"));

        let calls = remote.calls();
        assert_eq!(remote.call_count(), 3);
        assert_eq!(calls[0], ("asset.get".to_string(), json!({"id": 1})));
        assert_eq!(calls[2].0, "asset.list");
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_reply_waits() {
        let remote = ScriptedRemote::new([Reply::Delayed(Duration::from_secs(3), json!(true))]);
        let started = tokio::time::Instant::now();
        assert_eq!(remote.call("project.sync", Value::Null).await.unwrap(), json!(true));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
