// ============================================================================
// nolock Library
// ============================================================================
//
// Runs read queries under READ UNCOMMITTED without silently weakening a
// transaction the caller already has open.
//
// ============================================================================

pub mod config;
pub mod context;
pub mod coordinator;
pub mod core;
pub mod memory;
pub mod policy;
pub mod prelude;
pub mod query;
pub mod retry;
pub mod transaction;

// Re-export main types for convenience
pub use config::CoordinatorConfig;
pub use context::{
    AmbientGuard, AmbientScope, AmbientTransaction, ContextTransaction, DataContext,
    ExecutionContext,
};
pub use coordinator::{
    AmbientStatus, ExecutionCoordinator, ExecutionFault, ExecutionPath, FaultKind, ReadOperation,
};
pub use core::{CancelSignal, DbError, Result};
pub use policy::{AmbientBehavior, FaultCallback, IsolationPolicy};
pub use query::UncommittedReader;
pub use retry::{BackoffRetry, NoRetry, RetryPolicy, RetryStrategy};
pub use transaction::{IsolationLevel, TransactionId, TransactionOptions, TransactionState};
