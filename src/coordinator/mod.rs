// ============================================================================
// Execution Coordinator
// ============================================================================
//
// Runs a deferred read under READ UNCOMMITTED without weakening a transaction
// the caller already relies on:
//
//   detect ──> select path ──> retry(begin -> read -> commit) ──> settle
//
// ============================================================================

pub mod detector;
pub mod executor;

use crate::core::{DbError, Result};
use crate::policy::AmbientBehavior;
use std::fmt;
use std::future::Future;

pub use detector::{AmbientStatus, detect};
pub use executor::ExecutionCoordinator;

/// A deferred, side-effect-free read.
///
/// Invoked once per attempt; the retry strategy may invoke it again, so every
/// call must build a fresh future.
pub trait ReadOperation<T>: Send + Sync {
    type Future: Future<Output = Result<T>> + Send;

    fn invoke(&self) -> Self::Future;
}

impl<T, F, Fut> ReadOperation<T> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send,
{
    type Future = Fut;

    fn invoke(&self) -> Fut {
        self()
    }
}

/// Strategy selected for one coordinated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// Existing transaction respected; the read runs inside it as-is.
    Direct,
    /// No transaction present; a READ UNCOMMITTED transaction is opened.
    ReadUncommitted,
    /// Ambient transaction hidden for the duration of the read.
    Suppressed,
    /// Independent READ UNCOMMITTED transaction beside the ambient one.
    RequiresNew,
}

impl ExecutionPath {
    pub fn select(status: AmbientStatus, behavior: AmbientBehavior) -> Self {
        if !status.has_ambient_transaction() {
            return ExecutionPath::ReadUncommitted;
        }

        match behavior {
            AmbientBehavior::Respect => ExecutionPath::Direct,
            AmbientBehavior::Suppress => ExecutionPath::Suppressed,
            AmbientBehavior::RequiresNew => ExecutionPath::RequiresNew,
        }
    }

    /// Whether this path opens (and must commit or roll back) its own transaction.
    pub fn opens_transaction(&self) -> bool {
        matches!(
            self,
            ExecutionPath::ReadUncommitted | ExecutionPath::RequiresNew
        )
    }
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Direct => "direct",
            Self::ReadUncommitted => "read_uncommitted",
            Self::Suppressed => "suppressed",
            Self::RequiresNew => "requires_new",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Cancelled,
    Failed,
}

impl FaultKind {
    pub fn of(err: &DbError) -> Self {
        if err.is_cancelled() {
            FaultKind::Cancelled
        } else {
            FaultKind::Failed
        }
    }
}

/// A fault observed by the coordinator, as handed to the policy callback.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionFault<'a> {
    kind: FaultKind,
    error: &'a DbError,
    path: ExecutionPath,
}

impl<'a> ExecutionFault<'a> {
    pub fn new(error: &'a DbError, path: ExecutionPath) -> Self {
        Self {
            kind: FaultKind::of(error),
            error,
            path,
        }
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn error(&self) -> &'a DbError {
        self.error
    }

    pub fn path(&self) -> ExecutionPath {
        self.path
    }
}
