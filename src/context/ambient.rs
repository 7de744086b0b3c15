// ============================================================================
// Ambient Transaction Scope
// ============================================================================
//
// Process-wide (possibly distributed) transactions are modelled as a stack of
// frames owned by the calling unit of work. A frame is either an entered
// transaction or a suppression barrier. The top frame decides what is visible.
//
// ============================================================================

use crate::transaction::{IsolationLevel, TransactionId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A transaction active on the calling logical context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientTransaction {
    id: TransactionId,
    isolation: IsolationLevel,
    distributed: bool,
}

impl AmbientTransaction {
    pub fn new(id: TransactionId, isolation: IsolationLevel) -> Self {
        Self {
            id,
            isolation,
            distributed: false,
        }
    }

    /// Mark the transaction as enlisted in a distributed coordinator.
    pub fn distributed(mut self) -> Self {
        self.distributed = true;
        self
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn is_distributed(&self) -> bool {
        self.distributed
    }
}

#[derive(Debug, Default)]
struct Frames {
    // `None` is a suppression barrier.
    stack: Vec<Option<AmbientTransaction>>,
}

/// Handle to the ambient transaction stack of one logical unit of work.
///
/// Clones share the same stack.
#[derive(Debug, Clone, Default)]
pub struct AmbientScope {
    frames: Arc<Mutex<Frames>>,
}

impl AmbientScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// The visible ambient transaction, if any.
    pub fn current(&self) -> Option<AmbientTransaction> {
        self.lock().stack.last().copied().flatten()
    }

    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    /// Returns `true` while a suppression frame is on top of the stack.
    pub fn is_suppressed(&self) -> bool {
        matches!(self.lock().stack.last(), Some(None))
    }

    pub fn depth(&self) -> usize {
        self.lock().stack.len()
    }

    /// Make `transaction` the ambient transaction until the guard drops.
    pub fn enter(&self, transaction: AmbientTransaction) -> AmbientGuard {
        self.push(Some(transaction))
    }

    /// Hide the ambient transaction until the guard drops.
    pub fn suppress(&self) -> AmbientGuard {
        self.push(None)
    }

    fn push(&self, frame: Option<AmbientTransaction>) -> AmbientGuard {
        let mut frames = self.lock();
        let depth = frames.stack.len();
        frames.stack.push(frame);
        AmbientGuard {
            scope: self.clone(),
            depth,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Frames> {
        // Frames hold plain data; a poisoned lock still has a consistent stack.
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Restores the ambient stack to its prior depth on drop.
#[must_use = "the scope is exited as soon as the guard is dropped"]
#[derive(Debug)]
pub struct AmbientGuard {
    scope: AmbientScope,
    depth: usize,
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        self.scope.lock().stack.truncate(self.depth);
    }
}
