// ============================================================================
// In-Memory Data Source
// ============================================================================
//
// A small `DataContext` implementation over in-process tables. It keeps a
// registry of every transaction it opened and a log of raw statements, so the
// coordinator's behaviour can be observed from the outside. Faults can be
// injected into begin, commit and read.
//
// ============================================================================

use crate::context::{AmbientTransaction, ContextTransaction, DataContext};
use crate::core::{DbError, Result};
use crate::transaction::{IsolationLevel, TransactionId, TransactionOptions, TransactionState};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Counters of everything the source was asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub reads: usize,
    pub statements: usize,
}

#[derive(Debug, Clone)]
struct TransactionRecord {
    isolation: IsolationLevel,
    timeout: Option<Duration>,
    state: TransactionState,
}

#[derive(Debug, Default)]
struct SourceState {
    tables: HashMap<String, Vec<Value>>,
    transactions: HashMap<TransactionId, TransactionRecord>,
    statements: Vec<String>,
    stats: SourceStats,
    fail_begin: Option<DbError>,
    fail_commit: Option<DbError>,
    fail_read: Option<DbError>,
    fail_statement: Option<DbError>,
    // Legacy drivers ignore the isolation level passed on begin.
    legacy: bool,
}

/// Shared in-memory database; clones refer to the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataSource {
    state: Arc<Mutex<SourceState>>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source whose transactions cannot be opened with an isolation level.
    pub fn legacy() -> Self {
        let source = Self::new();
        source.with_state(|state| state.legacy = true);
        source
    }

    /// Open a connection-like context on this source.
    pub fn context(&self) -> MemoryContext {
        MemoryContext {
            source: self.clone(),
            bound: Mutex::new(None),
        }
    }

    pub fn insert(&self, table: &str, row: Value) {
        self.with_state(|state| {
            state.tables.entry(table.to_string()).or_default().push(row);
        });
    }

    /// Fail the next `begin_transaction` with `err`.
    pub fn fail_next_begin(&self, err: DbError) {
        self.with_state(|state| state.fail_begin = Some(err));
    }

    /// Fail the next commit with `err`; the transaction is rolled back.
    pub fn fail_next_commit(&self, err: DbError) {
        self.with_state(|state| state.fail_commit = Some(err));
    }

    /// Fail the next table read with `err`.
    pub fn fail_next_read(&self, err: DbError) {
        self.with_state(|state| state.fail_read = Some(err));
    }

    /// Fail the next raw statement with `err`; it is not logged.
    pub fn fail_next_statement(&self, err: DbError) {
        self.with_state(|state| state.fail_statement = Some(err));
    }

    pub fn stats(&self) -> SourceStats {
        self.with_state(|state| state.stats)
    }

    /// Raw statements executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.with_state(|state| state.statements.clone())
    }

    pub fn transaction_state(&self, id: TransactionId) -> Option<TransactionState> {
        self.with_state(|state| state.transactions.get(&id).map(|record| record.state))
    }

    pub fn transaction_isolation(&self, id: TransactionId) -> Option<IsolationLevel> {
        self.with_state(|state| state.transactions.get(&id).map(|record| record.isolation))
    }

    pub fn transaction_timeout(&self, id: TransactionId) -> Option<Duration> {
        self.with_state(|state| state.transactions.get(&id).and_then(|record| record.timeout))
    }

    /// Every transaction opened through this source, oldest first.
    pub fn transactions(&self) -> Vec<TransactionId> {
        self.transactions_where(|_| true)
    }

    /// Transactions opened through this source that are still active.
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        self.transactions_where(|state| state.is_active())
    }

    fn transactions_where(&self, keep: impl Fn(TransactionState) -> bool) -> Vec<TransactionId> {
        self.with_state(|state| {
            let mut ids: Vec<_> = state
                .transactions
                .iter()
                .filter(|(_, record)| keep(record.state))
                .map(|(id, _)| *id)
                .collect();
            ids.sort();
            ids
        })
    }

    /// Begin a new transaction on this source.
    pub fn begin(&self, options: TransactionOptions) -> Result<MemoryTransaction> {
        let mut state = self.state.lock()?;
        if let Some(err) = state.fail_begin.take() {
            return Err(err);
        }

        let id = TransactionId::new();
        let isolation = if state.legacy {
            IsolationLevel::default()
        } else {
            options.isolation
        };
        state.transactions.insert(
            id,
            TransactionRecord {
                isolation,
                timeout: options.timeout,
                state: TransactionState::Active,
            },
        );
        state.stats.begun += 1;

        Ok(MemoryTransaction {
            id,
            isolation,
            source: self.clone(),
            finished: false,
        })
    }

    fn finish(&self, id: TransactionId, target: TransactionState) -> Result<()> {
        let mut state = self.state.lock()?;
        let failure = match target {
            TransactionState::Committed => state.fail_commit.take(),
            _ => None,
        };

        let record = state
            .transactions
            .get_mut(&id)
            .ok_or_else(|| DbError::TransactionError(format!("Transaction {} not found", id)))?;

        if !record.state.is_active() {
            return Err(DbError::TransactionError(format!(
                "Transaction {} is already {}",
                id, record.state
            )));
        }

        if let Some(err) = failure {
            record.state = TransactionState::Aborted;
            state.stats.rolled_back += 1;
            return Err(err);
        }

        record.state = target;
        match target {
            TransactionState::Committed => state.stats.committed += 1,
            TransactionState::Aborted => state.stats.rolled_back += 1,
            TransactionState::Active => {}
        }
        Ok(())
    }

    fn read(&self, table: &str) -> Result<Vec<Value>> {
        let mut state = self.state.lock()?;
        if let Some(err) = state.fail_read.take() {
            return Err(err);
        }
        state.stats.reads += 1;
        Ok(state.tables.get(table).cloned().unwrap_or_default())
    }

    fn record_statement(&self, sql: &str) -> Result<()> {
        let mut state = self.state.lock()?;
        if let Some(err) = state.fail_statement.take() {
            return Err(err);
        }
        state.statements.push(sql.to_string());
        state.stats.statements += 1;
        Ok(())
    }

    fn is_legacy(&self) -> bool {
        self.with_state(|state| state.legacy)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SourceState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

/// Handle to a transaction opened on a [`MemoryDataSource`].
///
/// Dropping an active handle rolls the transaction back.
#[derive(Debug)]
pub struct MemoryTransaction {
    id: TransactionId,
    isolation: IsolationLevel,
    source: MemoryDataSource,
    finished: bool,
}

impl MemoryTransaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Describe this transaction for an [`crate::context::AmbientScope`].
    pub fn as_ambient(&self) -> AmbientTransaction {
        AmbientTransaction::new(self.id, self.isolation)
    }

    pub fn commit_now(mut self) -> Result<()> {
        self.finished = true;
        self.source.finish(self.id, TransactionState::Committed)
    }

    pub fn rollback_now(mut self) -> Result<()> {
        self.finished = true;
        self.source.finish(self.id, TransactionState::Aborted)
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.source.finish(self.id, TransactionState::Aborted);
        }
    }
}

#[async_trait]
impl ContextTransaction for MemoryTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        (*self).commit_now()
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        (*self).rollback_now()
    }
}

/// Connection-like context on a [`MemoryDataSource`].
///
/// A caller may bind one transaction of its own to the context; the
/// coordinator sees it as the context-bound ambient transaction.
#[derive(Debug)]
pub struct MemoryContext {
    source: MemoryDataSource,
    bound: Mutex<Option<MemoryTransaction>>,
}

impl MemoryContext {
    pub fn source(&self) -> &MemoryDataSource {
        &self.source
    }

    /// Begin a transaction and bind it to this context.
    pub fn bind(&self, options: TransactionOptions) -> Result<TransactionId> {
        let mut bound = self.bound.lock()?;
        if bound.is_some() {
            return Err(DbError::TransactionError("Transaction already active".into()));
        }
        let txn = self.source.begin(options)?;
        let id = txn.id();
        *bound = Some(txn);
        Ok(id)
    }

    pub fn commit_bound(&self) -> Result<()> {
        self.take_bound()?.commit_now()
    }

    pub fn rollback_bound(&self) -> Result<()> {
        self.take_bound()?.rollback_now()
    }

    /// Read every row of `table`.
    pub async fn select(&self, table: &str) -> Result<Vec<Value>> {
        tokio::task::yield_now().await;
        self.source.read(table)
    }

    pub async fn count(&self, table: &str) -> Result<u64> {
        Ok(self.select(table).await?.len() as u64)
    }

    fn take_bound(&self) -> Result<MemoryTransaction> {
        self.bound
            .lock()?
            .take()
            .ok_or_else(|| DbError::TransactionError("No active transaction".into()))
    }
}

#[async_trait]
impl DataContext for MemoryContext {
    fn current_transaction(&self) -> Option<TransactionId> {
        self.bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|txn| txn.id())
    }

    async fn begin_transaction(
        &self,
        options: TransactionOptions,
    ) -> Result<Box<dyn ContextTransaction>> {
        let txn: Box<dyn ContextTransaction> = Box::new(self.source.begin(options)?);
        Ok(txn)
    }

    async fn execute_raw(&self, sql: &str) -> Result<u64> {
        self.source.record_statement(sql)?;
        Ok(0)
    }

    fn supports_isolation_on_begin(&self) -> bool {
        !self.source.is_legacy()
    }
}
