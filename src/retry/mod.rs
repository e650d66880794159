//! Retry policy and adaptive rate limiting.
//!
//! The retry stages own the control flow; whether a failure is retried and
//! how long to back off is decided by a [`RetryPolicy`].

mod token_bucket;

pub use token_bucket::{Acquisition, Clock, ManualClock, RateLimitingTokenBucket, SystemClock};

use crate::error::{ClientError, PipelineError};
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How aggressively a client retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryMode {
    /// Historical defaults, no rate limiting.
    Legacy,
    /// Standardized defaults, no rate limiting.
    #[default]
    Standard,
    /// Standard retries plus client-side rate limiting.
    Adaptive,
}

impl FromStr for RetryMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(RetryMode::Legacy),
            "standard" => Ok(RetryMode::Standard),
            "adaptive" => Ok(RetryMode::Adaptive),
            other => Err(ClientError::InvalidConfiguration {
                field: "retry_mode".to_string(),
                message: format!("Unknown retry mode '{}'", other),
            }),
        }
    }
}

impl fmt::Display for RetryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetryMode::Legacy => "legacy",
            RetryMode::Standard => "standard",
            RetryMode::Adaptive => "adaptive",
        };
        f.write_str(name)
    }
}

/// Decides whether and when to retry.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// The retry mode; only [`RetryMode::Adaptive`] engages the token bucket.
    fn mode(&self) -> RetryMode;

    /// Total attempts allowed per call, including the first.
    fn max_attempts(&self) -> u32;

    /// Whether to try again after `attempts` attempts ended with `error`.
    fn is_retryable(&self, error: &PipelineError, attempts: u32) -> bool;

    /// Delay before the attempt that follows attempt number `attempts`.
    fn backoff(&self, error: &PipelineError, attempts: u32) -> Duration;

    /// Refuse to send instead of waiting when the token bucket runs dry.
    fn fast_fail_rate_limiting(&self) -> bool {
        false
    }
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Initial backoff duration for throttling failures.
    pub throttled_initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Add jitter to backoff.
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::for_mode(RetryMode::Standard)
    }
}

impl RetryConfig {
    /// Defaults for the given mode.
    pub fn for_mode(mode: RetryMode) -> Self {
        let max_retries = match mode {
            RetryMode::Legacy => 3,
            RetryMode::Standard | RetryMode::Adaptive => 2,
        };
        let throttled_initial_backoff = match mode {
            RetryMode::Legacy => Duration::from_millis(500),
            RetryMode::Standard | RetryMode::Adaptive => Duration::from_secs(1),
        };
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            throttled_initial_backoff,
            max_backoff: Duration::from_secs(20),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }

    /// Create a new retry configuration with custom values.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set the initial backoff duration.
    pub fn with_initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff = duration;
        self
    }

    /// Set the initial backoff duration for throttling failures.
    pub fn with_throttled_initial_backoff(mut self, duration: Duration) -> Self {
        self.throttled_initial_backoff = duration;
        self
    }

    /// Set the maximum backoff duration.
    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff = duration;
        self
    }

    /// Set the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Create a no-retry configuration.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Check the configuration for values the policy cannot honour.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.backoff_multiplier < 1.0 {
            return Err(ClientError::InvalidConfiguration {
                field: "backoff_multiplier".to_string(),
                message: "Backoff multiplier must be at least 1.0".to_string(),
            });
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ClientError::InvalidConfiguration {
                field: "initial_backoff".to_string(),
                message: "Initial backoff must not exceed the maximum backoff".to_string(),
            });
        }
        Ok(())
    }
}

/// Exponential backoff with jitter, retrying whatever the error hierarchy
/// classifies as retryable.
#[derive(Debug, Clone)]
pub struct StandardRetryPolicy {
    mode: RetryMode,
    config: RetryConfig,
    fast_fail: bool,
}

impl StandardRetryPolicy {
    /// Create a policy with the given mode and configuration.
    pub fn new(mode: RetryMode, config: RetryConfig) -> Self {
        Self {
            mode,
            config,
            fast_fail: false,
        }
    }

    /// Policy with the mode's default configuration.
    pub fn for_mode(mode: RetryMode) -> Self {
        Self::new(mode, RetryConfig::for_mode(mode))
    }

    /// A policy that never retries.
    pub fn no_retry(mode: RetryMode) -> Self {
        Self::new(mode, RetryConfig::no_retry())
    }

    /// Refuse sends instead of waiting for rate-limit capacity.
    pub fn with_fast_fail(mut self, fast_fail: bool) -> Self {
        self.fast_fail = fast_fail;
        self
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Calculate backoff duration for a given retry number (0-based).
    fn calculate_backoff(&self, base: Duration, retry: u32) -> Duration {
        let base = base.as_millis() as f64;
        let multiplied = base * self.config.backoff_multiplier.powi(retry as i32);
        let capped = multiplied.min(self.config.max_backoff.as_millis() as f64);

        let final_ms = if self.config.use_jitter && capped > 0.0 {
            rand::thread_rng().gen_range(capped * 0.5..=capped)
        } else {
            capped
        };

        Duration::from_millis(final_ms as u64)
    }
}

impl Default for StandardRetryPolicy {
    fn default() -> Self {
        Self::for_mode(RetryMode::Standard)
    }
}

impl RetryPolicy for StandardRetryPolicy {
    fn mode(&self) -> RetryMode {
        self.mode
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_retries.saturating_add(1)
    }

    fn is_retryable(&self, error: &PipelineError, attempts: u32) -> bool {
        attempts < self.max_attempts() && error.is_retryable()
    }

    fn backoff(&self, error: &PipelineError, attempts: u32) -> Duration {
        let retry = attempts.saturating_sub(1);
        if error.is_throttling() {
            if let Some(hint) = error.retry_after() {
                return hint.min(self.config.max_backoff);
            }
            return self.calculate_backoff(self.config.throttled_initial_backoff, retry);
        }
        self.calculate_backoff(self.config.initial_backoff, retry)
    }

    fn fast_fail_rate_limiting(&self) -> bool {
        self.fast_fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NetworkError, ServiceError, TimeoutError};

    #[test]
    fn test_mode_defaults() {
        assert_eq!(StandardRetryPolicy::for_mode(RetryMode::Legacy).max_attempts(), 4);
        assert_eq!(StandardRetryPolicy::for_mode(RetryMode::Standard).max_attempts(), 3);
        assert_eq!(StandardRetryPolicy::for_mode(RetryMode::Adaptive).max_attempts(), 3);
        assert_eq!(StandardRetryPolicy::no_retry(RetryMode::Adaptive).max_attempts(), 1);
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("ADAPTIVE".parse::<RetryMode>().unwrap(), RetryMode::Adaptive);
        assert_eq!(" legacy ".parse::<RetryMode>().unwrap(), RetryMode::Legacy);
        assert!("sometimes".parse::<RetryMode>().is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());
        assert!(RetryConfig::default().with_multiplier(0.5).validate().is_err());
        assert!(RetryConfig::default()
            .with_initial_backoff(Duration::from_secs(60))
            .validate()
            .is_err());
    }

    #[test]
    fn test_retry_predicate_respects_max_attempts() {
        let policy = StandardRetryPolicy::new(RetryMode::Standard, RetryConfig::new(2));
        let error: PipelineError = NetworkError::ConnectionReset.into();

        assert!(policy.is_retryable(&error, 1));
        assert!(policy.is_retryable(&error, 2));
        assert!(!policy.is_retryable(&error, 3));
    }

    #[test]
    fn test_non_retryable_errors() {
        let policy = StandardRetryPolicy::default();
        let call_timeout: PipelineError = TimeoutError::ApiCallTimeout {
            timeout: Duration::from_secs(1),
        }
        .into();
        let token: PipelineError = ClientError::SendTokenUnavailable.into();
        let not_found: PipelineError = ServiceError::new(404).into();

        assert!(!policy.is_retryable(&call_timeout, 1));
        assert!(!policy.is_retryable(&token, 1));
        assert!(!policy.is_retryable(&not_found, 1));
    }

    #[test]
    fn test_backoff_calculation() {
        let config = RetryConfig::new(3)
            .with_initial_backoff(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_jitter(false);
        let policy = StandardRetryPolicy::new(RetryMode::Standard, config);
        let error: PipelineError = NetworkError::ConnectionReset.into();

        assert_eq!(policy.backoff(&error, 1), Duration::from_millis(100));
        assert_eq!(policy.backoff(&error, 2), Duration::from_millis(200));
        assert_eq!(policy.backoff(&error, 3), Duration::from_millis(400));
    }

    #[test]
    fn test_jittered_backoff_stays_in_upper_half() {
        let config = RetryConfig::new(3).with_initial_backoff(Duration::from_millis(400));
        let policy = StandardRetryPolicy::new(RetryMode::Standard, config);
        let error: PipelineError = NetworkError::ConnectionReset.into();

        let delays: Vec<Duration> = (0..50).map(|_| policy.backoff(&error, 1)).collect();

        assert!(delays
            .iter()
            .all(|d| *d >= Duration::from_millis(200) && *d <= Duration::from_millis(400)));
        assert!(delays.iter().any(|d| *d != delays[0]));
    }

    #[test]
    fn test_zero_backoff_with_jitter() {
        let config = RetryConfig::new(3).with_initial_backoff(Duration::ZERO);
        let policy = StandardRetryPolicy::new(RetryMode::Standard, config);
        let error: PipelineError = NetworkError::ConnectionReset.into();

        assert_eq!(policy.backoff(&error, 1), Duration::ZERO);
    }

    #[test]
    fn test_backoff_capped() {
        let config = RetryConfig::new(10)
            .with_initial_backoff(Duration::from_secs(1))
            .with_max_backoff(Duration::from_secs(5))
            .with_multiplier(10.0)
            .with_jitter(false);
        let policy = StandardRetryPolicy::new(RetryMode::Standard, config);
        let error: PipelineError = NetworkError::ConnectionReset.into();

        assert_eq!(policy.backoff(&error, 6), Duration::from_secs(5));
    }

    #[test]
    fn test_throttling_backoff_uses_retry_after() {
        let policy = StandardRetryPolicy::default();
        let mut throttled = ServiceError::new(429);
        throttled.retry_after = Some(Duration::from_secs(3));

        assert_eq!(
            policy.backoff(&PipelineError::Service(throttled), 1),
            Duration::from_secs(3)
        );
    }
}
