pub mod ambient;

use crate::core::Result;
use crate::transaction::{IsolationLevel, TransactionId, TransactionOptions};
use async_trait::async_trait;

pub use ambient::{AmbientGuard, AmbientScope, AmbientTransaction};

/// A transaction opened through a [`DataContext`].
///
/// `commit` and `rollback` consume the handle. Implementations must release
/// the underlying resource when a handle is dropped while still active.
#[async_trait]
pub trait ContextTransaction: Send + Sync {
    fn id(&self) -> TransactionId;

    fn isolation_level(&self) -> IsolationLevel;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Transaction primitives of the underlying data-access layer.
///
/// This trait keeps the coordinator agnostic of the database driver: the
/// in-memory source implements it for tests, a real driver wrapper implements
/// it in production. A context is not meant to be shared by concurrent
/// coordinated calls.
#[async_trait]
pub trait DataContext: Send + Sync {
    /// Transaction already bound to this context, if any.
    fn current_transaction(&self) -> Option<TransactionId>;

    /// Begin a transaction independent of any transaction bound to the context.
    async fn begin_transaction(
        &self,
        options: TransactionOptions,
    ) -> Result<Box<dyn ContextTransaction>>;

    /// Execute a raw statement, returning the number of affected rows.
    async fn execute_raw(&self, sql: &str) -> Result<u64>;

    /// Whether `begin_transaction` honours `TransactionOptions::isolation`.
    ///
    /// Contexts returning `false` get the isolation level applied with a
    /// `SET TRANSACTION ISOLATION LEVEL` statement right after begin.
    fn supports_isolation_on_begin(&self) -> bool {
        true
    }
}

/// Everything the coordinator may inspect about the caller's environment.
///
/// The ambient scope is passed explicitly instead of living in thread-local
/// state, so two contexts never observe each other's ambient transactions.
pub struct ExecutionContext<'a, C: DataContext + ?Sized> {
    data: &'a C,
    ambient: AmbientScope,
}

impl<'a, C: DataContext + ?Sized> ExecutionContext<'a, C> {
    /// Context with an empty ambient scope.
    pub fn new(data: &'a C) -> Self {
        Self {
            data,
            ambient: AmbientScope::new(),
        }
    }

    pub fn with_ambient(data: &'a C, ambient: AmbientScope) -> Self {
        Self { data, ambient }
    }

    pub fn data(&self) -> &'a C {
        self.data
    }

    pub fn ambient(&self) -> &AmbientScope {
        &self.ambient
    }
}

impl<C: DataContext + ?Sized> Clone for ExecutionContext<'_, C> {
    fn clone(&self) -> Self {
        Self {
            data: self.data,
            ambient: self.ambient.clone(),
        }
    }
}
