// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Retry policies for phase exchanges.
//!
//! An operation spends one unit of its retry budget each time a phase ends
//! with a recoverable error (transport or protocol) or explicitly asks to be
//! repeated. A [`RetryStrategy`] decides whether budget is left and how long
//! the poller pauses before the repeat.
//!
//! # Built-in Strategies
//!
//! - [`NoRetry`]: Fail on the first error
//! - [`FixedDelay`]: Constant pause between retries
//! - [`ExponentialBackoff`]: Exponentially growing pause, capped
//!
//! # Example
//!
//! ```
//! use wayside_core::error::CommError;
//! use wayside_core::retry::{ExponentialBackoff, RetryConfig, RetryDecision, RetryStrategy};
//! use std::time::Duration;
//!
//! let strategy = ExponentialBackoff::new(
//!     RetryConfig::new()
//!         .with_max_retries(2)
//!         .with_initial_delay(Duration::from_millis(50)),
//! );
//! let error = CommError::protocol("CHECKSUM");
//!
//! assert_eq!(strategy.should_retry(&error, 1), RetryDecision::Retry(Duration::from_millis(50)));
//! assert_eq!(strategy.should_retry(&error, 2), RetryDecision::Retry(Duration::from_millis(100)));
//! assert_eq!(strategy.should_retry(&error, 3), RetryDecision::DoNotRetry);
//! ```

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{CommError, ErrorCategory};

// =============================================================================
// Retry Configuration
// =============================================================================

/// Configuration for retry strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (0 = no retries).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause before the first retry.
    #[serde(default = "default_initial_delay", with = "duration_millis")]
    pub initial_delay: Duration,

    /// Upper bound of the pause between retries.
    #[serde(default = "default_max_delay", with = "duration_millis")]
    pub max_delay: Duration,

    /// Growth factor for exponential backoff.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0) to randomize pauses.
    #[serde(default)]
    pub jitter: f64,

    /// Whether transport failures and timeouts are retried.
    #[serde(default = "default_true")]
    pub retry_on_transport: bool,

    /// Whether malformed responses are retried.
    #[serde(default = "default_true")]
    pub retry_on_protocol: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: 0.0,
            retry_on_transport: true,
            retry_on_protocol: true,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter factor.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    fn permits(&self, error: &CommError) -> bool {
        match error.category() {
            ErrorCategory::Transport => self.retry_on_transport,
            ErrorCategory::Protocol => self.retry_on_protocol,
            _ => false,
        }
    }
}

/// Serde helper for durations stored as milliseconds.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serializes a duration as whole milliseconds.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    /// Deserializes a duration from milliseconds.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// =============================================================================
// Retry Decision
// =============================================================================

/// Decision on whether to repeat a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified pause.
    Retry(Duration),
    /// The budget is spent or the error is not retryable.
    DoNotRetry,
}

// =============================================================================
// Retry Strategy Trait
// =============================================================================

/// A strategy deciding when and how a phase is repeated.
pub trait RetryStrategy: Send + Sync + fmt::Debug {
    /// Returns the name of this strategy for logging.
    fn name(&self) -> &str;

    /// Returns the retry budget.
    fn max_retries(&self) -> u32;

    /// Returns the pause before the given retry (1-based).
    fn delay(&self, retry: u32) -> Duration;

    /// Returns `true` if the error kind may be retried at all.
    fn permits(&self, error: &CommError) -> bool {
        error.is_retryable()
    }

    /// Decides whether to perform the given retry (1-based) after `error`.
    fn should_retry(&self, error: &CommError, retry: u32) -> RetryDecision {
        if !self.permits(error) {
            return RetryDecision::DoNotRetry;
        }
        self.should_repeat(retry)
    }

    /// Decides whether a phase that asked to be repeated may run again.
    fn should_repeat(&self, retry: u32) -> RetryDecision {
        if retry == 0 || retry > self.max_retries() {
            RetryDecision::DoNotRetry
        } else {
            RetryDecision::Retry(self.delay(retry))
        }
    }
}

// =============================================================================
// No Retry Strategy
// =============================================================================

/// A strategy that never retries.
#[derive(Debug, Clone, Default)]
pub struct NoRetry;

impl NoRetry {
    /// Creates a new no-retry strategy.
    pub fn new() -> Self {
        Self
    }
}

impl RetryStrategy for NoRetry {
    fn name(&self) -> &str {
        "no_retry"
    }

    fn max_retries(&self) -> u32 {
        0
    }

    fn delay(&self, _retry: u32) -> Duration {
        Duration::ZERO
    }
}

// =============================================================================
// Fixed Delay Strategy
// =============================================================================

/// A strategy that pauses a fixed duration between retries.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    config: RetryConfig,
}

impl FixedDelay {
    /// Creates a new fixed delay strategy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Creates a fixed delay strategy from a budget and a pause.
    pub fn simple(max_retries: u32, delay: Duration) -> Self {
        Self {
            config: RetryConfig {
                max_retries,
                initial_delay: delay,
                ..Default::default()
            },
        }
    }
}

impl RetryStrategy for FixedDelay {
    fn name(&self) -> &str {
        "fixed_delay"
    }

    fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    fn delay(&self, _retry: u32) -> Duration {
        apply_jitter(self.config.initial_delay, self.config.jitter)
    }

    fn permits(&self, error: &CommError) -> bool {
        self.config.permits(error)
    }
}

// =============================================================================
// Exponential Backoff Strategy
// =============================================================================

/// A strategy with exponentially increasing pauses.
///
/// Delay formula: `min(initial_delay * multiplier^(retry-1), max_delay)`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff strategy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Calculates the un-jittered pause for a given retry.
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let base_delay = self.config.initial_delay.as_millis() as f64;
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplied = base_delay * self.config.multiplier.powi(exponent);
        let capped = multiplied.min(self.config.max_delay.as_millis() as f64);

        Duration::from_millis(capped as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn name(&self) -> &str {
        "exponential_backoff"
    }

    fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    fn delay(&self, retry: u32) -> Duration {
        apply_jitter(self.calculate_delay(retry), self.config.jitter)
    }

    fn permits(&self, error: &CommError) -> bool {
        self.config.permits(error)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Applies jitter to a duration.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let millis = duration.as_millis() as f64;
    let jitter_range = millis * jitter_factor;
    let random: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
    let jittered = millis + (random * jitter_range);

    Duration::from_millis(jittered.max(0.0) as u64)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(5));
        assert!(config.retry_on_protocol);
    }

    #[test]
    fn test_retry_config_serde_millis() {
        let json = r#"{"max_retries": 5, "initial_delay": 20, "max_delay": 400}"#;
        let config: RetryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(20));
        assert_eq!(config.max_delay, Duration::from_millis(400));
        assert_eq!(config.multiplier, 2.0);
    }

    #[test]
    fn test_no_retry_strategy() {
        let strategy = NoRetry::new();
        let error = CommError::timeout(Duration::from_secs(1));
        assert_eq!(strategy.should_retry(&error, 1), RetryDecision::DoNotRetry);
        assert_eq!(strategy.should_repeat(1), RetryDecision::DoNotRetry);
    }

    #[test]
    fn test_fixed_delay_budget() {
        let strategy = FixedDelay::simple(2, Duration::from_millis(10));
        let error = CommError::NotConnected;

        assert_eq!(
            strategy.should_retry(&error, 1),
            RetryDecision::Retry(Duration::from_millis(10))
        );
        assert_eq!(
            strategy.should_retry(&error, 2),
            RetryDecision::Retry(Duration::from_millis(10))
        );
        assert_eq!(strategy.should_retry(&error, 3), RetryDecision::DoNotRetry);
    }

    #[test]
    fn test_controller_errors_not_retried() {
        let strategy = FixedDelay::simple(5, Duration::from_millis(10));
        let error = CommError::controller("NO SUCH NAME");
        assert_eq!(strategy.should_retry(&error, 1), RetryDecision::DoNotRetry);
    }

    #[test]
    fn test_protocol_retry_can_be_disabled() {
        let config = RetryConfig {
            retry_on_protocol: false,
            ..Default::default()
        };
        let strategy = ExponentialBackoff::new(config);
        assert_eq!(
            strategy.should_retry(&CommError::protocol("CRC"), 1),
            RetryDecision::DoNotRetry
        );
        assert!(matches!(
            strategy.should_retry(&CommError::NotConnected, 1),
            RetryDecision::Retry(_)
        ));
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let strategy = ExponentialBackoff::new(RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
            ..Default::default()
        });

        assert_eq!(strategy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(strategy.calculate_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_exponential_backoff_caps_at_max() {
        let strategy = ExponentialBackoff::new(RetryConfig {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: 0.0,
            ..Default::default()
        });

        assert_eq!(strategy.calculate_delay(10), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        for _ in 0..100 {
            let d = apply_jitter(Duration::from_millis(100), 0.5);
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(150));
        }
    }
}
