//! Retry policy for reasoning calls
//!
//! Transient provider failures (HTTP 5xx, rate limits, connection drops) are retried
//! with exponential backoff. Everything else surfaces immediately so the agent loop
//! can count it against its consecutive-failure limit.

use std::time::Duration;

use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor between attempts
    #[serde(default = "default_factor")]
    pub factor: f32,
    /// Whether to add jitter to delays
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_retries() -> usize {
    5
}

fn default_initial_delay_ms() -> u64 {
    8_000
}

fn default_max_delay_ms() -> u64 {
    64_000
}

fn default_factor() -> f32 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// No retries, for callers that handle failure themselves
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Classify an error message as retriable (transient) or not (permanent)
///
/// Retriable errors include:
/// - HTTP 5xx server errors (500, 502, 503, 504)
/// - HTTP 429 rate limiting
/// - Connection timeouts and failures
/// - Provider overload/capacity issues
pub fn is_retriable_error(error_message: &str) -> bool {
    let lower = error_message.to_lowercase();

    let transient_patterns = [
        // HTTP 5xx server errors
        "500",
        "502",
        "503",
        "504",
        "internal server error",
        "bad gateway",
        "service unavailable",
        "gateway timeout",
        // Rate limiting
        "429",
        "rate limit",
        "too many requests",
        "quota exceeded",
        // Connection issues
        "timeout",
        "timed out",
        "connection refused",
        "connection reset",
        "connection failed",
        "network error",
        // Provider-specific overload messages
        "overloaded",
        "capacity",
        "temporarily unavailable",
        "try again",
    ];

    transient_patterns
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Whether a reasoning-call error should be retried by the backoff loop
pub fn should_retry(error: &Error) -> bool {
    match error {
        Error::Provider(message) => is_retriable_error(message),
        Error::Timeout(_) => true,
        _ => false,
    }
}

/// Build an exponential backoff strategy from configuration
pub fn build_backoff(config: &RetryConfig) -> ExponentialBuilder {
    let mut builder = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay())
        .with_max_delay(config.max_delay())
        .with_factor(config.factor)
        .with_max_times(config.max_retries);

    if config.jitter {
        builder = builder.with_jitter();
    }

    builder
}
