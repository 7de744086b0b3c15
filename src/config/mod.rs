use crate::core::{DbError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coordinator configuration
///
/// Can be built in code or loaded from JSON; missing fields fall back to
/// their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Timeout for forced-new transaction scopes when the policy sets none.
    pub default_transaction_timeout_ms: u64,

    /// Retry behaviour for transient faults
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_transaction_timeout_ms: 60_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default transaction timeout
    pub fn default_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.default_transaction_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set maximum attempts per coordinated read
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    pub fn default_transaction_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.default_transaction_timeout_ms)
    }

    /// Parse from a JSON document
    ///
    /// # Examples
    ///
    /// ```
    /// use nolock::CoordinatorConfig;
    ///
    /// let config = CoordinatorConfig::from_json(
    ///     r#"{ "default_transaction_timeout_ms": 5000, "retry": { "max_attempts": 4 } }"#
    /// ).unwrap();
    /// assert_eq!(config.retry.max_attempts, 4);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DbError::ConfigError(format!("Invalid coordinator config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_transaction_timeout_ms == 0 {
            return Err(DbError::ConfigError(
                "default_transaction_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(DbError::ConfigError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(DbError::ConfigError(format!(
                "retry.max_backoff_ms ({}) is below retry.initial_backoff_ms ({})",
                self.retry.max_backoff_ms, self.retry.initial_backoff_ms
            )));
        }
        Ok(())
    }
}
