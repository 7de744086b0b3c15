use super::{ExecutionFault, ExecutionPath, FaultKind, ReadOperation, detect};
use crate::config::CoordinatorConfig;
use crate::context::{ContextTransaction, DataContext, ExecutionContext};
use crate::core::{CancelSignal, DbError, Result};
use crate::policy::IsolationPolicy;
use crate::retry::{BackoffRetry, NoRetry, RetryStrategy};
use crate::transaction::TransactionOptions;
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};

/// Runs deferred reads under READ UNCOMMITTED through a retry strategy.
///
/// The coordinator keeps no state between calls. It borrows the execution
/// context and policy for the duration of one `run` only.
#[derive(Debug, Clone)]
pub struct ExecutionCoordinator<R = NoRetry> {
    retry: R,
    config: CoordinatorConfig,
}

impl Default for ExecutionCoordinator<NoRetry> {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionCoordinator<NoRetry> {
    /// Coordinator that runs every unit of work once.
    pub fn new() -> Self {
        Self::with_retry(NoRetry)
    }
}

impl ExecutionCoordinator<BackoffRetry> {
    /// Coordinator retrying transient faults according to `config.retry`.
    pub fn from_config(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            retry: BackoffRetry::new(config.retry.clone()),
            config,
        })
    }
}

impl<R: RetryStrategy> ExecutionCoordinator<R> {
    pub fn with_retry(retry: R) -> Self {
        Self {
            retry,
            config: CoordinatorConfig::default(),
        }
    }

    /// Replace the configuration; the retry strategy adopts `config.retry`.
    pub fn with_config(mut self, config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        self.retry.apply_policy(&config.retry);
        self.config = config;
        Ok(self)
    }

    pub fn retry_strategy(&self) -> &R {
        &self.retry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The path `run` would take right now for `context` and `policy`.
    pub fn plan<C>(&self, context: &ExecutionContext<'_, C>, policy: &IsolationPolicy) -> ExecutionPath
    where
        C: DataContext + ?Sized,
    {
        ExecutionPath::select(detect(context), policy.behavior())
    }

    /// Execute `operation` once per attempt under the path chosen for the
    /// current ambient state, then settle any fault according to `policy`.
    ///
    /// On success the value produced by the operation is returned. A fault is
    /// reported to the policy callback exactly once and is then either
    /// propagated unchanged or replaced by `T::default()` when the policy
    /// swallows faults.
    pub async fn run<C, Op, T>(
        &self,
        operation: &Op,
        policy: &IsolationPolicy,
        context: &ExecutionContext<'_, C>,
        cancel: &CancelSignal,
    ) -> Result<T>
    where
        C: DataContext + ?Sized,
        Op: ReadOperation<T> + ?Sized,
        T: Default + Send,
    {
        let status = detect(context);
        let path = ExecutionPath::select(status, policy.behavior());
        let span = info_span!(
            "coordinator.run",
            path = %path,
            bound = ?status.bound,
            ambient = ?status.ambient
        );

        async move {
            event!(Level::DEBUG, "coordinated read started");
            let result = self
                .retry
                .execute(|| self.attempt(path, operation, policy, context, cancel), cancel)
                .await;
            self.settle(result, policy, path)
        }
        .instrument(span)
        .await
    }

    /// One complete unit of work for `path`.
    async fn attempt<C, Op, T>(
        &self,
        path: ExecutionPath,
        operation: &Op,
        policy: &IsolationPolicy,
        context: &ExecutionContext<'_, C>,
        cancel: &CancelSignal,
    ) -> Result<T>
    where
        C: DataContext + ?Sized,
        Op: ReadOperation<T> + ?Sized,
        T: Send,
    {
        match path {
            ExecutionPath::Direct => cancel.guard(operation.invoke()).await,
            ExecutionPath::Suppressed => {
                let _suppressed = context.ambient().suppress();
                cancel.guard(operation.invoke()).await
            }
            ExecutionPath::ReadUncommitted => {
                self.in_new_transaction(operation, context.data(), cancel, None)
                    .await
            }
            ExecutionPath::RequiresNew => {
                let limit = policy
                    .timeout()
                    .unwrap_or_else(|| self.config.default_transaction_timeout_duration());
                self.in_new_transaction(operation, context.data(), cancel, Some(limit))
                    .await
            }
        }
    }

    async fn in_new_transaction<C, Op, T>(
        &self,
        operation: &Op,
        data: &C,
        cancel: &CancelSignal,
        limit: Option<Duration>,
    ) -> Result<T>
    where
        C: DataContext + ?Sized,
        Op: ReadOperation<T> + ?Sized,
        T: Send,
    {
        let mut options = TransactionOptions::read_uncommitted();
        if let Some(limit) = limit {
            options = options.timeout(limit);
        }

        let txn = self.begin(data, options, cancel).await?;
        let txn_id = txn.id();
        event!(Level::DEBUG, txn = %txn_id, isolation = %txn.isolation_level(), "read transaction opened");

        let read = cancel.guard(operation.invoke());
        let outcome = match limit {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(result) => result,
                Err(_) => Err(DbError::Timeout(format!(
                    "transaction {} exceeded {}ms",
                    txn_id,
                    limit.as_millis()
                ))),
            },
            None => read.await,
        };
        // A cancel landing after the read finished must still prevent the commit.
        let outcome = outcome.and_then(|value| cancel.checkpoint().map(|_| value));

        match outcome {
            Ok(value) => {
                txn.commit().await?;
                event!(Level::DEBUG, txn = %txn_id, "read transaction committed");
                Ok(value)
            }
            Err(err) => {
                release(txn).await;
                Err(err)
            }
        }
    }

    /// Begin a READ UNCOMMITTED transaction, falling back to an explicit
    /// isolation statement for contexts that cannot set it on begin.
    async fn begin<C>(
        &self,
        data: &C,
        options: TransactionOptions,
        cancel: &CancelSignal,
    ) -> Result<Box<dyn ContextTransaction>>
    where
        C: DataContext + ?Sized,
    {
        let txn = cancel.guard(data.begin_transaction(options)).await?;
        if data.supports_isolation_on_begin() {
            return Ok(txn);
        }

        if let Err(err) = cancel.guard(data.execute_raw(options.isolation.as_sql())).await {
            release(txn).await;
            return Err(err);
        }
        Ok(txn)
    }

    fn settle<T: Default>(
        &self,
        result: Result<T>,
        policy: &IsolationPolicy,
        path: ExecutionPath,
    ) -> Result<T> {
        let err = match result {
            Ok(value) => {
                event!(Level::DEBUG, "coordinated read completed");
                return Ok(value);
            }
            Err(err) => err,
        };

        let fault = ExecutionFault::new(&err, path);
        match fault.kind() {
            FaultKind::Cancelled => event!(Level::INFO, "coordinated read cancelled"),
            FaultKind::Failed => event!(Level::ERROR, error = %err, "coordinated read failed"),
        }
        policy.notify_fault(&fault);

        if policy.swallows_faults() {
            event!(Level::DEBUG, "fault swallowed by policy");
            return Ok(T::default());
        }
        Err(err)
    }
}

async fn release(txn: Box<dyn ContextTransaction>) {
    let txn_id = txn.id();
    match txn.rollback().await {
        Ok(()) => event!(Level::DEBUG, txn = %txn_id, "read transaction rolled back"),
        Err(err) => {
            event!(Level::WARN, txn = %txn_id, error = %err, "read transaction rollback failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDataSource;
    use crate::retry::RetryPolicy;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_without_ambient_commits_once() {
        let source = MemoryDataSource::new();
        source.insert("orders", json!({"id": 1}));
        let data = source.context();
        let context = ExecutionContext::new(&data);
        let coordinator = ExecutionCoordinator::new();

        let rows: Vec<serde_json::Value> = coordinator
            .run(
                &|| data.select("orders"),
                &IsolationPolicy::default(),
                &context,
                &CancelSignal::new(),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        let stats = source.stats();
        assert_eq!(stats.begun, 1);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.rolled_back, 0);
    }

    #[tokio::test]
    async fn test_plan_reflects_ambient_state() {
        let source = MemoryDataSource::new();
        let data = source.context();
        let context = ExecutionContext::new(&data);
        let coordinator = ExecutionCoordinator::new();
        let policy = IsolationPolicy::suppress();

        assert_eq!(coordinator.plan(&context, &policy), ExecutionPath::ReadUncommitted);

        data.bind(TransactionOptions::default()).unwrap();
        assert_eq!(coordinator.plan(&context, &policy), ExecutionPath::Suppressed);
    }

    #[tokio::test]
    async fn test_requires_new_times_out() {
        let source = MemoryDataSource::new();
        let data = source.context();
        data.bind(TransactionOptions::default()).unwrap();
        let context = ExecutionContext::new(&data);
        let coordinator = ExecutionCoordinator::new();
        let policy = IsolationPolicy::requires_new().transaction_timeout(Duration::from_millis(10));

        let result: Result<u64> = coordinator
            .run(
                &|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(1)
                },
                &policy,
                &context,
                &CancelSignal::new(),
            )
            .await;

        assert!(matches!(result, Err(DbError::Timeout(_))));
        assert_eq!(source.stats().rolled_back, 1);
        assert_eq!(source.stats().committed, 0);
    }

    #[tokio::test]
    async fn test_from_config_retries_whole_unit() {
        let source = MemoryDataSource::new();
        source.fail_next_commit(DbError::Deadlock("victim".into()));
        let data = source.context();
        let context = ExecutionContext::new(&data);
        let config = CoordinatorConfig::new().retry(RetryPolicy {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        });
        let coordinator = ExecutionCoordinator::from_config(config).unwrap();

        let count: u64 = coordinator
            .run(
                &|| data.count("orders"),
                &IsolationPolicy::default(),
                &context,
                &CancelSignal::new(),
            )
            .await
            .unwrap();

        assert_eq!(count, 0);
        let stats = source.stats();
        assert_eq!(stats.begun, 2);
        assert_eq!(stats.committed, 1);
    }

    #[test]
    fn test_with_config_rebuilds_retry_policy() {
        let coordinator = ExecutionCoordinator::from_config(CoordinatorConfig::default()).unwrap();
        let config = CoordinatorConfig::new().retry(RetryPolicy {
            max_attempts: 7,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        });

        let coordinator = coordinator.with_config(config).unwrap();

        assert_eq!(coordinator.config().retry.max_attempts, 7);
        assert_eq!(coordinator.retry_strategy().policy().max_attempts, 7);
    }

    #[test]
    fn test_with_config_rejects_zero_timeout() {
        let config = CoordinatorConfig::new().default_transaction_timeout(Duration::ZERO);

        assert!(matches!(
            ExecutionCoordinator::new().with_config(config.clone()),
            Err(DbError::ConfigError(_))
        ));
        assert!(matches!(
            ExecutionCoordinator::from_config(CoordinatorConfig::default())
                .unwrap()
                .with_config(config),
            Err(DbError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_legacy_statement_sees_cancellation() {
        let source = MemoryDataSource::legacy();
        let data = source.context();
        let cancel = CancelSignal::new();
        cancel.cancel();

        let result = ExecutionCoordinator::new()
            .begin(&data, TransactionOptions::read_uncommitted(), &cancel)
            .await;

        assert!(matches!(result, Err(DbError::Cancelled)));
        assert_eq!(source.stats().begun, 0);
        assert!(source.statements().is_empty());
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let config = CoordinatorConfig::new().default_transaction_timeout(Duration::ZERO);
        assert!(matches!(
            ExecutionCoordinator::from_config(config),
            Err(DbError::ConfigError(_))
        ));
    }
}
