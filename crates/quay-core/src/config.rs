//! Queue configuration.
//!
//! ```text
//! TOML file / string
//!     → serde (syntactic, every field defaulted)
//!     → validate() (semantic, all violations collected)
//!     → QueueConfig (immutable, owned by the queue)
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::breaker::{DEFAULT_COOLDOWN, DEFAULT_FAILURE_THRESHOLD};
use crate::deadline::DEFAULT_DEADLINE;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INTER_DISPATCH_DELAY: Duration = Duration::from_millis(100);

/// Tuning knobs for one `OperationQueue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Retries after the first failed attempt (total tries = max_retries + 1).
    pub max_retries: u32,

    /// Failure count at which the circuit breaker opens.
    pub failure_threshold: u32,

    /// How long the breaker stays open before dispatch resumes.
    pub cooldown_ms: u64,

    /// Pause after every settled attempt.
    pub inter_dispatch_delay_ms: u64,

    /// Per-attempt deadline. `0` leaves calls unbounded.
    pub default_deadline_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_ms: millis(DEFAULT_COOLDOWN),
            inter_dispatch_delay_ms: millis(DEFAULT_INTER_DISPATCH_DELAY),
            default_deadline_ms: millis(DEFAULT_DEADLINE),
        }
    }
}

impl QueueConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn inter_dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_dispatch_delay_ms)
    }

    pub fn default_deadline(&self) -> Option<Duration> {
        (self.default_deadline_ms > 0).then(|| Duration::from_millis(self.default_deadline_ms))
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = millis(cooldown);
        self
    }

    pub fn with_inter_dispatch_delay(mut self, delay: Duration) -> Self {
        self.inter_dispatch_delay_ms = millis(delay);
        self
    }

    pub fn with_default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.default_deadline_ms = deadline.map_or(0, millis);
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig = toml::from_str(content)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Semantic checks. Returns every violation, not just the first.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.failure_threshold == 0 {
            errors.push(ValidationError::ZeroFailureThreshold);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Duration → whole milliseconds, saturating at `u64::MAX`.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<QueueConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    QueueConfig::from_toml_str(&content)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("failure_threshold must be at least 1")]
    ZeroFailureThreshold,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_match_reference_behaviour() {
        let config = QueueConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown(), Duration::from_millis(5000));
        assert_eq!(config.inter_dispatch_delay(), Duration::from_millis(100));
        assert_eq!(config.default_deadline(), Some(Duration::from_millis(10_000)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = QueueConfig::from_toml_str("max_retries = 1\ncooldown_ms = 250\n").unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.cooldown(), Duration::from_millis(250));
        assert_eq!(config.failure_threshold, 5);
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(QueueConfig::from_toml_str("").unwrap(), QueueConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = QueueConfig::from_toml_str("max_retry = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[rstest]
    #[case("failure_threshold = 0")]
    #[case("failure_threshold = 0\ncooldown_ms = 0")]
    fn zero_threshold_is_rejected(#[case] toml: &str) {
        match QueueConfig::from_toml_str(toml) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors, vec![ValidationError::ZeroFailureThreshold])
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[rstest]
    #[case("inter_dispatch_delay_ms = 100\ncooldown_ms = 50")]
    #[case("inter_dispatch_delay_ms = 600\ncooldown_ms = 0")]
    fn cooldown_may_be_shorter_than_dispatch_delay(#[case] toml: &str) {
        let config = QueueConfig::from_toml_str(toml).unwrap();
        assert!(config.cooldown() < config.inter_dispatch_delay());
    }

    #[test]
    fn huge_durations_saturate() {
        let config = QueueConfig::default()
            .with_cooldown(Duration::MAX)
            .with_inter_dispatch_delay(Duration::MAX)
            .with_default_deadline(Some(Duration::MAX));
        assert_eq!(config.cooldown_ms, u64::MAX);
        assert_eq!(config.inter_dispatch_delay_ms, u64::MAX);
        assert_eq!(config.default_deadline_ms, u64::MAX);
    }

    #[test]
    fn zero_deadline_means_unbounded() {
        let config = QueueConfig::from_toml_str("default_deadline_ms = 0").unwrap();
        assert_eq!(config.default_deadline(), None);
    }

    #[test]
    fn builder_style_setters() {
        let config = QueueConfig::default()
            .with_max_retries(0)
            .with_failure_threshold(2)
            .with_cooldown(Duration::from_secs(1))
            .with_inter_dispatch_delay(Duration::ZERO)
            .with_default_deadline(None);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.cooldown_ms, 1000);
        assert_eq!(config.inter_dispatch_delay_ms, 0);
        assert_eq!(config.default_deadline(), None);
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/quay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
