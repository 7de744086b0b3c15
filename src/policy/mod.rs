// ============================================================================
// Isolation Policy
// ============================================================================
//
// Immutable per-call configuration: how to treat an already-active
// transaction, how long a forced-new scope may live, and what to do with
// faults. Builder methods consume the value, so a policy handed to the
// coordinator can no longer change.
//
// ============================================================================

use crate::coordinator::ExecutionFault;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How a read behaves when a transaction is already active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AmbientBehavior {
    /// Run inside the existing transaction without touching its isolation level.
    #[default]
    Respect,
    /// Detach from the ambient transaction and run transaction-free.
    Suppress,
    /// Open an independent READ UNCOMMITTED transaction next to the ambient one.
    RequiresNew,
}

impl fmt::Display for AmbientBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Respect => "respect",
            Self::Suppress => "suppress",
            Self::RequiresNew => "requires_new",
        };
        write!(f, "{label}")
    }
}

/// Observer invoked once per fault, before it is re-raised or swallowed.
pub type FaultCallback = Arc<dyn Fn(&ExecutionFault<'_>) + Send + Sync>;

#[derive(Clone, Default)]
pub struct IsolationPolicy {
    ambient_behavior: AmbientBehavior,
    transaction_timeout: Option<Duration>,
    on_fault: Option<FaultCallback>,
    swallow_faults: bool,
}

impl IsolationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy for callers that never want to leave the ambient transaction.
    pub fn respect() -> Self {
        Self::new()
    }

    pub fn suppress() -> Self {
        Self::new().ambient_behavior(AmbientBehavior::Suppress)
    }

    pub fn requires_new() -> Self {
        Self::new().ambient_behavior(AmbientBehavior::RequiresNew)
    }

    pub fn ambient_behavior(mut self, behavior: AmbientBehavior) -> Self {
        self.ambient_behavior = behavior;
        self
    }

    /// Bound for a forced-new transaction scope.
    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }

    pub fn on_fault<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ExecutionFault<'_>) + Send + Sync + 'static,
    {
        self.on_fault = Some(Arc::new(callback));
        self
    }

    /// Return the zero value instead of propagating faults.
    pub fn swallow_faults(mut self, swallow: bool) -> Self {
        self.swallow_faults = swallow;
        self
    }

    pub fn behavior(&self) -> AmbientBehavior {
        self.ambient_behavior
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.transaction_timeout
    }

    pub fn swallows_faults(&self) -> bool {
        self.swallow_faults
    }

    pub fn has_fault_callback(&self) -> bool {
        self.on_fault.is_some()
    }

    pub(crate) fn notify_fault(&self, fault: &ExecutionFault<'_>) {
        if let Some(callback) = &self.on_fault {
            callback(fault);
        }
    }
}

impl fmt::Debug for IsolationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationPolicy")
            .field("ambient_behavior", &self.ambient_behavior)
            .field("transaction_timeout", &self.transaction_timeout)
            .field("on_fault", &self.on_fault.as_ref().map(|_| "<callback>"))
            .field("swallow_faults", &self.swallow_faults)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{ExecutionPath, FaultKind};
    use crate::core::DbError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_default_policy() {
        let policy = IsolationPolicy::default();
        assert_eq!(policy.behavior(), AmbientBehavior::Respect);
        assert_eq!(policy.timeout(), None);
        assert!(!policy.swallows_faults());
        assert!(!policy.has_fault_callback());
    }

    #[test]
    fn test_builder_sets_fields() {
        let policy = IsolationPolicy::requires_new()
            .transaction_timeout(Duration::from_secs(3))
            .swallow_faults(true);

        assert_eq!(policy.behavior(), AmbientBehavior::RequiresNew);
        assert_eq!(policy.timeout(), Some(Duration::from_secs(3)));
        assert!(policy.swallows_faults());
        assert_eq!(IsolationPolicy::suppress().behavior(), AmbientBehavior::Suppress);
    }

    #[test]
    fn test_notify_fault_invokes_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let policy = IsolationPolicy::new().on_fault(move |fault| {
            assert_eq!(fault.kind(), FaultKind::Failed);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let err = DbError::ExecutionError("boom".into());
        policy.notify_fault(&ExecutionFault::new(&err, ExecutionPath::Direct));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_hides_callback() {
        let policy = IsolationPolicy::new().on_fault(|_| {});
        let rendered = format!("{policy:?}");
        assert!(rendered.contains("<callback>"));
    }

    #[test]
    fn test_behavior_deserializes_from_json() {
        let behavior: AmbientBehavior = serde_json::from_str("\"RequiresNew\"").unwrap();
        assert_eq!(behavior, AmbientBehavior::RequiresNew);
        assert_eq!(behavior.to_string(), "requires_new");
    }
}
