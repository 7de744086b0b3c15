use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Deadlock victim: {0}")]
    Deadlock(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl DbError {
    /// Returns `true` when the error reports an observed cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DbError::Cancelled)
    }

    /// Returns `true` for faults a retry strategy may safely repeat.
    ///
    /// Timeouts and deadlock victims are retryable; cancellation never is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DbError::Transient(_) | DbError::Deadlock(_) | DbError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DbError::Transient("network blip".into()).is_transient());
        assert!(DbError::Deadlock("victim".into()).is_transient());
        assert!(DbError::Timeout("30s".into()).is_transient());
        assert!(!DbError::Cancelled.is_transient());
        assert!(!DbError::ExecutionError("syntax".into()).is_transient());
    }

    #[test]
    fn test_poison_maps_to_lock_error() {
        let lock = std::sync::Arc::new(std::sync::Mutex::new(0));
        let poisoned = std::sync::Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = poisoned.lock().unwrap();
            panic!("poison");
        })
        .join();

        let err: DbError = lock.lock().unwrap_err().into();
        assert!(matches!(err, DbError::LockError(_)));
    }
}
