// ============================================================================
// Retry Strategies
// ============================================================================
//
// The coordinator hands a strategy one complete unit of work (begin, execute,
// commit) and lets it decide how often to repeat it. Strategies never resume
// a unit part-way: each call of `unit` must start from scratch.
//
// ============================================================================

pub mod backoff;

use crate::core::{CancelSignal, Result};
use async_trait::async_trait;
use std::future::Future;

pub use backoff::{BackoffRetry, RetryPolicy};

/// Classifies whether an error may be retried.
pub type TransientClassifier = fn(&crate::core::DbError) -> bool;

/// Default classifier: timeouts, deadlock victims and explicit transient faults.
pub fn is_transient(err: &crate::core::DbError) -> bool {
    err.is_transient()
}

#[async_trait]
pub trait RetryStrategy: Send + Sync {
    /// Run `unit` until it succeeds, fails permanently, or `cancel` fires.
    async fn execute<T, F, Fut>(&self, unit: F, cancel: &CancelSignal) -> Result<T>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send;

    /// Adopt `policy` from a coordinator configuration. Strategies without
    /// tunable backoff ignore it.
    fn apply_policy(&mut self, _policy: &RetryPolicy) {}
}

/// Runs every unit of work exactly once.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

#[async_trait]
impl RetryStrategy for NoRetry {
    async fn execute<T, F, Fut>(&self, mut unit: F, cancel: &CancelSignal) -> Result<T>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        cancel.checkpoint()?;
        unit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DbError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_no_retry_runs_once() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = NoRetry
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(DbError::Transient("flaky".into())) }
                },
                &CancelSignal::new(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retry_respects_prior_cancellation() {
        let cancel = CancelSignal::new();
        cancel.cancel();

        let result = NoRetry.execute(|| async { Ok(1) }, &cancel).await;
        assert_eq!(result, Err(DbError::Cancelled));
    }
}
