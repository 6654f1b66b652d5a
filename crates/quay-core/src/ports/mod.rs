//! Ports - 抽象化レイヤー
//!
//! Seams to the outside world. The queue only depends on these traits, so
//! tests can swap in deterministic implementations.

pub mod clock;
pub mod id_generator;
pub mod remote;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::remote::{RemoteCall, invoker};
