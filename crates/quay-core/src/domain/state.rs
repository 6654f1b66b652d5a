//! Breaker state.

use serde::{Deserialize, Serialize};

/// Circuit breaker state.
///
/// State transitions:
/// - Closed -> Open (failure count reaches the threshold)
/// - Open -> Closed (cooldown elapsed; counter reset to 0)
///
/// There is no half-open probe: dispatch resumes at full rate after the cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Dispatch permitted.
    #[default]
    Closed,

    /// Dispatch paused until the cooldown elapses.
    Open,
}
