use super::{RetryStrategy, TransientClassifier, is_transient};
use crate::core::{CancelSignal, DbError, Result};
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Configuration for retry behavior on transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 5,
            max_backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff before attempt `attempt + 1`, capped at `max_backoff_ms`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let base = self.initial_backoff_ms.max(1);
        let cap = self.max_backoff_ms.max(base);

        let mut backoff = base;
        for _ in 1..attempt {
            backoff = backoff.saturating_mul(2).min(cap);
        }
        backoff
    }
}

/// Retries transient faults with exponential backoff.
#[derive(Debug, Clone)]
pub struct BackoffRetry {
    policy: RetryPolicy,
    classifier: TransientClassifier,
}

impl Default for BackoffRetry {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl BackoffRetry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: is_transient,
        }
    }

    /// Replace the transient-fault classifier.
    pub fn with_classifier(mut self, classifier: TransientClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn should_retry(&self, attempt: u32, err: &DbError) -> bool {
        if err.is_cancelled() {
            return false;
        }
        attempt < self.policy.max_attempts.max(1) && (self.classifier)(err)
    }
}

#[async_trait]
impl RetryStrategy for BackoffRetry {
    async fn execute<T, F, Fut>(&self, mut unit: F, cancel: &CancelSignal) -> Result<T>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let mut attempt = 1u32;
        loop {
            cancel.checkpoint()?;
            let err = match unit().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.should_retry(attempt, &err) {
                return Err(err);
            }

            let backoff_ms = self.policy.backoff_ms(attempt);
            warn!(
                "read unit retry on transient fault (attempt {} of {}): {} (backoff={}ms)",
                attempt,
                self.policy.max_attempts.max(1),
                err,
                backoff_ms
            );
            cancel
                .guard(async {
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    Ok(())
                })
                .await?;
            attempt += 1;
        }
    }

    fn apply_policy(&mut self, policy: &RetryPolicy) {
        self.policy = policy.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 5,
            max_backoff_ms: 30,
        };
        assert_eq!(policy.backoff_ms(1), 5);
        assert_eq!(policy.backoff_ms(2), 10);
        assert_eq!(policy.backoff_ms(3), 20);
        assert_eq!(policy.backoff_ms(4), 30);
        assert_eq!(policy.backoff_ms(9), 30);
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let retry = BackoffRetry::new(fast_policy(3));

        let value = retry
            .execute(
                || {
                    let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if attempt < 3 {
                            Err(DbError::Deadlock(format!("victim #{attempt}")))
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                &CancelSignal::new(),
            )
            .await
            .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let retry = BackoffRetry::new(fast_policy(2));

        let result: Result<()> = retry
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(DbError::Timeout("lock wait".into())) }
                },
                &CancelSignal::new(),
            )
            .await;

        assert_eq!(result, Err(DbError::Timeout("lock wait".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_fault_is_not_retried() {
        let calls = AtomicU32::new(0);
        let retry = BackoffRetry::new(fast_policy(5));

        let result: Result<()> = retry
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(DbError::ExecutionError("bad column".into())) }
                },
                &CancelSignal::new(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let calls = AtomicU32::new(0);
        let retry = BackoffRetry::new(fast_policy(3))
            .with_classifier(|err| matches!(err, DbError::LockError(_)));

        let result: Result<()> = retry
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(DbError::LockError("busy".into())) }
                },
                &CancelSignal::new(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_policy_from_partial_json() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 7}"#).unwrap();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.initial_backoff_ms, 5);
    }
}
