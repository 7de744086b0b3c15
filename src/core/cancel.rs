// ============================================================================
// Cooperative Cancellation
// ============================================================================
//
// A single signal is shared by every clone. Suspension points either poll
// `checkpoint()` or race their future against `cancelled()` via `guard()`.
//
// ============================================================================

use super::{DbError, Result};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct CancelInner {
    requested: AtomicBool,
    notify: Notify,
}

/// Cancellation signal threaded through a coordinated read.
///
/// Cloning is cheap and all clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every pending waiter.
    pub fn cancel(&self) {
        self.inner.requested.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Check for cancellation at a yield point.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DbError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            let mut notified = std::pin::pin!(notified);
            // Register before re-checking the flag so a concurrent cancel() is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Drive `future` to completion unless the signal fires first.
    ///
    /// A signal that is already set short-circuits without polling `future`.
    pub async fn guard<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.checkpoint()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(DbError::Cancelled),
            result = future => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_shared_across_clones() {
        let first = CancelSignal::new();
        let second = first.clone();
        assert!(!second.is_cancelled());

        first.cancel();
        assert!(second.is_cancelled());
        assert_eq!(second.checkpoint(), Err(DbError::Cancelled));
    }

    #[tokio::test]
    async fn test_guard_passes_through_result() {
        let signal = CancelSignal::new();
        let value = signal.guard(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_guard_interrupts_pending_future() {
        let signal = CancelSignal::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<()> = signal
            .guard(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(DbError::Cancelled));
    }

    #[tokio::test]
    async fn test_guard_skips_future_when_already_cancelled() {
        let signal = CancelSignal::new();
        signal.cancel();

        let mut polled = false;
        let result = signal
            .guard(async {
                polled = true;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(DbError::Cancelled));
        assert!(!polled);
    }
}
