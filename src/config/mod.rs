//! Client-wide configuration shared by every call.
//!
//! A [`ClientConfig`] is built once per client and handed to each call's
//! execution context behind an `Arc`. Besides static settings it owns the
//! long-lived collaborators: the timer [`Scheduler`], the adaptive
//! [`RateLimitingTokenBucket`] and the clock-skew offset.

use crate::error::ClientError;
use crate::retry::{RateLimitingTokenBucket, RetryConfig, RetryMode, RetryPolicy, StandardRetryPolicy};
use crate::timeout::Scheduler;
use crate::Result;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Configuration for a client.
pub struct ClientConfig {
    /// Time allowed for a whole call, across all attempts.
    pub api_call_timeout: Option<Duration>,

    /// Time allowed for a single attempt.
    pub api_call_attempt_timeout: Option<Duration>,

    /// Decides whether and when to retry.
    pub retry_policy: Arc<dyn RetryPolicy>,

    /// Timer service shared by all calls.
    pub scheduler: Scheduler,

    /// Send-rate limiter used in adaptive retry mode.
    pub token_bucket: Arc<RateLimitingTokenBucket>,

    time_offset: AtomicI64,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_call_timeout", &self.api_call_timeout)
            .field("api_call_attempt_timeout", &self.api_call_attempt_timeout)
            .field("retry_policy", &self.retry_policy)
            .field("time_offset", &self.time_offset())
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Seconds the local clock runs ahead of the service.
    pub fn time_offset(&self) -> i64 {
        self.time_offset.load(Ordering::Relaxed)
    }

    /// Record a new clock-skew estimate. Later signing picks it up.
    pub fn update_time_offset(&self, seconds: i64) {
        self.time_offset.store(seconds, Ordering::Relaxed);
    }

    /// The retry mode of the configured policy.
    pub fn retry_mode(&self) -> RetryMode {
        self.retry_policy.mode()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    api_call_timeout: Option<Duration>,
    api_call_attempt_timeout: Option<Duration>,
    retry_mode: Option<RetryMode>,
    max_attempts: Option<u32>,
    retry_config: Option<RetryConfig>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    fast_fail_rate_limiting: Option<bool>,
    scheduler: Option<Scheduler>,
    token_bucket: Option<Arc<RateLimitingTokenBucket>>,
    time_offset: Option<i64>,
}

impl ClientConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the call timeout. Zero disables it.
    pub fn api_call_timeout(mut self, timeout: Duration) -> Self {
        self.api_call_timeout = Some(timeout);
        self
    }

    /// Set the attempt timeout. Zero disables it.
    pub fn api_call_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.api_call_attempt_timeout = Some(timeout);
        self
    }

    /// Set the retry mode.
    pub fn retry_mode(mut self, mode: RetryMode) -> Self {
        self.retry_mode = Some(mode);
        self
    }

    /// Set the total number of attempts per call.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the backoff configuration.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = Some(config);
        self
    }

    /// Use a custom retry policy. Overrides mode, attempts and backoff settings.
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Refuse sends instead of waiting when adaptive rate limiting kicks in.
    pub fn fast_fail_rate_limiting(mut self, enabled: bool) -> Self {
        self.fast_fail_rate_limiting = Some(enabled);
        self
    }

    /// Use an existing scheduler.
    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Share a token bucket, e.g. between clients.
    pub fn token_bucket(mut self, bucket: Arc<RateLimitingTokenBucket>) -> Self {
        self.token_bucket = Some(bucket);
        self
    }

    /// Set the initial clock-skew offset in seconds.
    pub fn time_offset(mut self, seconds: i64) -> Self {
        self.time_offset = Some(seconds);
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("AWS_RETRY_MODE") {
            match val.parse() {
                Ok(mode) => self.retry_mode = Some(mode),
                Err(e) => warn!(error = %e, "Ignoring AWS_RETRY_MODE"),
            }
        }
        if let Ok(val) = std::env::var("AWS_MAX_ATTEMPTS") {
            if let Ok(attempts) = val.trim().parse() {
                self.max_attempts = Some(attempts);
            }
        }
        if let Ok(val) = std::env::var("AWS_API_CALL_TIMEOUT_MS") {
            if let Ok(ms) = val.trim().parse() {
                self.api_call_timeout = Some(Duration::from_millis(ms));
            }
        }
        if let Ok(val) = std::env::var("AWS_API_CALL_ATTEMPT_TIMEOUT_MS") {
            if let Ok(ms) = val.trim().parse() {
                self.api_call_attempt_timeout = Some(Duration::from_millis(ms));
            }
        }

        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<ClientConfig> {
        let retry_policy = match self.retry_policy {
            Some(policy) => policy,
            None => {
                let mode = self.retry_mode.unwrap_or_default();
                let mut config = self
                    .retry_config
                    .unwrap_or_else(|| RetryConfig::for_mode(mode));
                if let Some(attempts) = self.max_attempts {
                    if attempts == 0 {
                        return Err(ClientError::InvalidConfiguration {
                            field: "max_attempts".to_string(),
                            message: "At least one attempt is required".to_string(),
                        }
                        .into());
                    }
                    config.max_retries = attempts - 1;
                }
                config.validate()?;
                Arc::new(
                    StandardRetryPolicy::new(mode, config)
                        .with_fast_fail(self.fast_fail_rate_limiting.unwrap_or(false)),
                )
            }
        };

        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Scheduler::new()?,
        };

        Ok(ClientConfig {
            api_call_timeout: self.api_call_timeout.filter(|t| !t.is_zero()),
            api_call_attempt_timeout: self.api_call_attempt_timeout.filter(|t| !t.is_zero()),
            retry_policy,
            scheduler,
            token_bucket: self
                .token_bucket
                .unwrap_or_else(|| Arc::new(RateLimitingTokenBucket::new())),
            time_offset: AtomicI64::new(self.time_offset.unwrap_or(0)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::builder().build().unwrap();
        assert!(config.api_call_timeout.is_none());
        assert!(config.api_call_attempt_timeout.is_none());
        assert_eq!(config.retry_mode(), RetryMode::Standard);
        assert_eq!(config.retry_policy.max_attempts(), 3);
        assert_eq!(config.time_offset(), 0);
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder()
            .retry_mode(RetryMode::Adaptive)
            .max_attempts(5)
            .api_call_attempt_timeout(Duration::from_millis(500))
            .api_call_timeout(Duration::ZERO)
            .time_offset(100)
            .build()
            .unwrap();

        assert_eq!(config.retry_mode(), RetryMode::Adaptive);
        assert_eq!(config.retry_policy.max_attempts(), 5);
        assert_eq!(config.api_call_attempt_timeout, Some(Duration::from_millis(500)));
        assert!(config.api_call_timeout.is_none());
        assert_eq!(config.time_offset(), 100);
    }

    #[test]
    fn test_invalid_max_attempts() {
        assert!(ClientConfig::builder().max_attempts(0).build().is_err());
    }

    #[test]
    fn test_invalid_multiplier() {
        let result = ClientConfig::builder()
            .retry_config(RetryConfig::default().with_multiplier(0.1))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_update_time_offset() {
        let config = ClientConfig::builder().build().unwrap();
        config.update_time_offset(-30);
        assert_eq!(config.time_offset(), -30);
    }

    const ENV_KEYS: &[&str] = &[
        "AWS_RETRY_MODE",
        "AWS_MAX_ATTEMPTS",
        "AWS_API_CALL_TIMEOUT_MS",
        "AWS_API_CALL_ATTEMPT_TIMEOUT_MS",
    ];

    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    /// Run `f` with exactly `vars` set among the keys `from_env` reads,
    /// restoring the previous values afterwards. Serialized across tests.
    fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _lock = ENV_LOCK.lock();
        let originals: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(*k).ok()))
            .collect();

        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
        for (key, value) in vars {
            std::env::set_var(key, value);
        }

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        for (key, original) in originals {
            match original {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }

        match result {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    #[test]
    fn test_from_env() {
        let config = with_env_vars(
            &[
                ("AWS_RETRY_MODE", "legacy"),
                ("AWS_MAX_ATTEMPTS", "2"),
                ("AWS_API_CALL_ATTEMPT_TIMEOUT_MS", "250"),
            ],
            || ClientConfig::builder().from_env().build().unwrap(),
        );

        assert_eq!(config.retry_mode(), RetryMode::Legacy);
        assert_eq!(config.retry_policy.max_attempts(), 2);
        assert_eq!(config.api_call_attempt_timeout, Some(Duration::from_millis(250)));
        assert!(config.api_call_timeout.is_none());
    }

    #[test]
    fn test_from_env_ignores_malformed_values() {
        let config = with_env_vars(
            &[
                ("AWS_RETRY_MODE", "eventually"),
                ("AWS_MAX_ATTEMPTS", "many"),
                ("AWS_API_CALL_TIMEOUT_MS", "-5"),
            ],
            || ClientConfig::builder().from_env().build().unwrap(),
        );

        assert_eq!(config.retry_mode(), RetryMode::Standard);
        assert_eq!(config.retry_policy.max_attempts(), 3);
        assert!(config.api_call_timeout.is_none());
    }
}
