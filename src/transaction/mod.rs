// ============================================================================
// Transaction Vocabulary
// ============================================================================
//
// Identity, lifecycle state and isolation options shared by the coordinator
// and every `DataContext` implementation.
//
// ============================================================================

pub mod isolation;
pub mod state;

pub use isolation::{IsolationLevel, TransactionOptions};
pub use state::{TransactionId, TransactionState};
