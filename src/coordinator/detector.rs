use crate::context::{DataContext, ExecutionContext};
use crate::transaction::TransactionId;

/// Snapshot of the transactions visible to one coordinated call.
///
/// Recomputed on every call; ambient state can change between calls made by
/// the same unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AmbientStatus {
    /// Transaction already bound to the caller's data context.
    pub bound: Option<TransactionId>,
    /// Process-wide ambient transaction visible through the ambient scope.
    pub ambient: Option<TransactionId>,
}

impl AmbientStatus {
    pub fn has_ambient_transaction(&self) -> bool {
        self.bound.is_some() || self.ambient.is_some()
    }
}

/// Inspect the execution context for an already-open transaction.
///
/// Pure read; a context without transaction machinery simply reports none.
pub fn detect<C: DataContext + ?Sized>(context: &ExecutionContext<'_, C>) -> AmbientStatus {
    AmbientStatus {
        bound: context.data().current_transaction(),
        ambient: context.ambient().current().map(|txn| txn.id()),
    }
}
