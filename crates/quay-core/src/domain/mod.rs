//! Domain model (ids, operation record, breaker state).

pub mod ids;
pub(crate) mod operation;
pub mod state;

pub use ids::{Id, IdMarker, OperationId};
pub use state::BreakerState;

pub(crate) use operation::{Call, Callbacks, Operation, TypedCall};
