//! Types needed by almost every caller.
//!
//! `use nolock::prelude::*;` brings in the coordinator, its policy and the
//! context traits. Data-source implementations and retry internals stay on
//! their own modules.

pub use crate::{
    AmbientBehavior, CancelSignal, DataContext, DbError, ExecutionContext, ExecutionCoordinator,
    IsolationPolicy, ReadOperation, Result, UncommittedReader,
};
