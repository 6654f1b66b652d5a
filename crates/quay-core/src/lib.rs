//! quay-core
//!
//! Resilient operation queue: executes asynchronous remote calls one at a time,
//! retries failures a bounded number of times and pauses all dispatch behind a
//! circuit breaker when the remote dependency keeps failing.
//!
//! # モジュール構成
//! - **domain**: ids, operation record, breaker state
//! - **ports**: Clock, IdGenerator, RemoteCall
//! - **deadline**: per-attempt deadline guard
//! - **breaker**: two-state circuit breaker
//! - **queue**: OperationQueue (dispatcher, retry policy, handles)
//! - **config**: QueueConfig + TOML loading
//! - **observability**: QueueStats, DegradedSignal
//! - **impls**: in-memory port implementations (ScriptedRemote)

pub mod breaker;
pub mod config;
pub mod deadline;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use breaker::CircuitBreaker;
pub use config::QueueConfig;
pub use domain::{BreakerState, OperationId};
pub use error::{BoxError, OperationError, QueueError};
pub use observability::{DegradedSignal, QueueStats};
pub use queue::{OperationHandle, OperationOptions, OperationQueue, QueueBuilder};
