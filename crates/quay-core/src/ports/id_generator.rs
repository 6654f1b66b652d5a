//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: monotonic ULID（本番用）

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use ulid::Generator;

use crate::domain::OperationId;
use crate::ports::Clock;

/// IdGenerator mints operation ids.
///
/// Ids must be unique for the lifetime of the process and strictly increasing
/// in generation order.
pub trait IdGenerator: Send + Sync {
    fn next_operation_id(&self) -> OperationId;
}

/// ULID ベースの ID 生成器
///
/// Uses `ulid::Generator`, which increments the random part when two ids are
/// requested within the same millisecond (or the clock goes backwards), so
/// ordering holds even with a `FixedClock`.
pub struct UlidGenerator<C> {
    clock: C,
    generator: Mutex<Generator>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            generator: Mutex::new(Generator::new()),
        }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn next_operation_id(&self) -> OperationId {
        let mut generator = self.generator.lock().unwrap_or_else(PoisonError::into_inner);
        let mut at = SystemTime::from(self.clock.now());
        loop {
            match generator.generate_from_datetime(at) {
                Ok(ulid) => return OperationId::from_ulid(ulid),
                // random part exhausted within this millisecond
                Err(_) => at += Duration::from_millis(1),
            }
        }
    }
}
