//! Materialization helpers over [`ExecutionCoordinator::run`].
//!
//! Each helper shapes the rows produced by a read operation; the zero value
//! used when a policy swallows faults is the `Default` of the shaped type
//! (empty list, `None`, `0`, `false`, empty map).

use crate::context::{DataContext, ExecutionContext};
use crate::coordinator::{ExecutionCoordinator, ReadOperation};
use crate::core::{CancelSignal, DbError, Result};
use crate::policy::IsolationPolicy;
use crate::retry::{NoRetry, RetryStrategy};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// A coordinator, context, policy and cancel signal bundled for repeated reads.
pub struct UncommittedReader<'a, C: DataContext + ?Sized, R = NoRetry> {
    coordinator: &'a ExecutionCoordinator<R>,
    context: ExecutionContext<'a, C>,
    policy: IsolationPolicy,
    cancel: CancelSignal,
}

impl<'a, C, R> UncommittedReader<'a, C, R>
where
    C: DataContext + ?Sized,
    R: RetryStrategy,
{
    pub fn new(coordinator: &'a ExecutionCoordinator<R>, context: ExecutionContext<'a, C>) -> Self {
        Self {
            coordinator,
            context,
            policy: IsolationPolicy::default(),
            cancel: CancelSignal::new(),
        }
    }

    pub fn with_policy(mut self, policy: IsolationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &IsolationPolicy {
        &self.policy
    }

    pub async fn to_list<T, Op>(&self, operation: Op) -> Result<Vec<T>>
    where
        Op: ReadOperation<Vec<T>>,
        T: Send,
    {
        self.run(&operation).await
    }

    pub async fn first<T, Op>(&self, operation: Op) -> Result<Option<T>>
    where
        Op: ReadOperation<Vec<T>>,
        T: Send,
    {
        let shaped = || async { Ok::<_, DbError>(operation.invoke().await?.into_iter().next()) };
        self.run(&shaped).await
    }

    pub async fn count<T, Op>(&self, operation: Op) -> Result<usize>
    where
        Op: ReadOperation<Vec<T>>,
        T: Send,
    {
        let shaped = || async { Ok::<_, DbError>(operation.invoke().await?.len()) };
        self.run(&shaped).await
    }

    pub async fn any<T, Op>(&self, operation: Op) -> Result<bool>
    where
        Op: ReadOperation<Vec<T>>,
        T: Send,
    {
        let shaped = || async { Ok::<_, DbError>(!operation.invoke().await?.is_empty()) };
        self.run(&shaped).await
    }

    /// Key every row with `key`; a duplicate key is an `ExecutionError`.
    pub async fn to_map<T, K, Op, F>(&self, operation: Op, key: F) -> Result<HashMap<K, T>>
    where
        Op: ReadOperation<Vec<T>>,
        T: Send,
        K: Eq + Hash + Debug + Send,
        F: Fn(&T) -> K + Send + Sync,
    {
        let shaped = || async {
            let rows = operation.invoke().await?;
            let mut map = HashMap::with_capacity(rows.len());
            for row in rows {
                let k = key(&row);
                if map.contains_key(&k) {
                    return Err(DbError::ExecutionError(format!(
                        "Duplicate key {:?} while building map",
                        k
                    )));
                }
                map.insert(k, row);
            }
            Ok::<_, DbError>(map)
        };
        self.run(&shaped).await
    }

    async fn run<T, Op>(&self, operation: &Op) -> Result<T>
    where
        Op: ReadOperation<T> + ?Sized,
        T: Default + Send,
    {
        self.coordinator
            .run(operation, &self.policy, &self.context, &self.cancel)
            .await
    }
}
