use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{
    context::OpContext,
    error::{Error, Result},
    index::{IndexStorage, KeyValue, OrderedIndex},
    txn::{Transaction, TransactionManager},
};

pub type SessionId = u64;

/// Table created at startup. Transactions write to it and nowhere else.
pub const DEFAULT_TABLE: &str = "kv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAction {
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateTable { name: String },
    Insert { table: String, key: Bytes, value: Bytes },
    Select { table: String, key: Bytes },
    /// An empty `end` leaves the scan unbounded above.
    SelectRange { table: String, start: Bytes, end: Bytes },
    Delete { table: String, key: Bytes },
    Tx(TxAction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecResult {
    Ok,
    /// `COMMIT` or `ROLLBACK` without an open transaction.
    NoTransaction,
    Value(Bytes),
    Rows(Vec<KeyValue>),
    Null,
}

impl fmt::Display for ExecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecResult::Ok => write!(f, "OK"),
            ExecResult::NoTransaction => write!(f, "OK NO_TX"),
            ExecResult::Value(value) => write!(f, "{}", String::from_utf8_lossy(value)),
            ExecResult::Rows(rows) => {
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(
                        f,
                        "{}={}",
                        String::from_utf8_lossy(&row.key),
                        String::from_utf8_lossy(&row.value)
                    )?;
                }
                Ok(())
            }
            ExecResult::Null => write!(f, "NULL"),
        }
    }
}

/// Runs statements on behalf of sessions.
///
/// Each session owns at most one open transaction, kept in a map here rather
/// than on the connection. While a session has one open, its writes are
/// buffered by the transaction manager; otherwise they go straight to the
/// table's index without being logged.
pub struct Executor {
    tables: RwLock<HashMap<String, Arc<dyn IndexStorage>>>,
    sessions: DashMap<SessionId, Transaction>,
    tx_manager: Arc<TransactionManager>,
}

impl Executor {
    pub fn new(tx_manager: Arc<TransactionManager>) -> Self {
        let mut tables = HashMap::new();
        tables.insert(DEFAULT_TABLE.to_string(), Arc::clone(tx_manager.index()));

        Self {
            tables: RwLock::new(tables),
            sessions: DashMap::new(),
            tx_manager,
        }
    }

    pub fn tx_manager(&self) -> &Arc<TransactionManager> {
        &self.tx_manager
    }

    pub fn execute(
        &self,
        ctx: &OpContext,
        session: SessionId,
        stmt: Statement,
    ) -> Result<ExecResult> {
        ctx.check()?;

        match stmt {
            Statement::CreateTable { name } => self.create_table(name),
            Statement::Insert { table, key, value } => {
                self.insert(ctx, session, &table, &key, &value)
            }
            Statement::Select { table, key } => self.select(ctx, &table, &key),
            Statement::SelectRange { table, start, end } => {
                self.select_range(ctx, &table, &start, &end)
            }
            Statement::Delete { table, key } => self.delete(ctx, session, &table, &key),
            Statement::Tx(TxAction::Begin) => self.begin(ctx, session),
            Statement::Tx(TxAction::Commit) => self.commit(ctx, session),
            Statement::Tx(TxAction::Rollback) => self.rollback(ctx, session),
        }
    }

    pub fn table(&self, name: &str) -> Result<Arc<dyn IndexStorage>> {
        self.tables
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    pub fn has_open_transaction(&self, session: SessionId) -> bool {
        self.sessions.contains_key(&session)
    }

    /// Number of sessions with an open transaction.
    pub fn open_transactions(&self) -> usize {
        self.sessions.len()
    }

    /// Aborts the session's open transaction, if any. A transaction whose
    /// commit is already logged is committed instead.
    pub fn close_session(&self, session: SessionId) {
        let Some((_, mut tx)) = self.sessions.remove(&session) else {
            return;
        };
        let ctx = OpContext::background();
        // A logged commit can no longer be rolled back, so finish it instead
        if tx.commit_logged() {
            match self.tx_manager.commit(&ctx, &mut tx) {
                Ok(()) => debug!(session, tx_id = tx.id(), "finished commit of closed session"),
                Err(err) => warn!(
                    session,
                    tx_id = tx.id(),
                    error = %err,
                    "failed to finish commit of closed session"
                ),
            }
            return;
        }
        match self.tx_manager.abort(&ctx, &mut tx) {
            Ok(()) => debug!(session, tx_id = tx.id(), "aborted transaction of closed session"),
            Err(err) => warn!(
                session,
                tx_id = tx.id(),
                error = %err,
                "failed to abort transaction of closed session"
            ),
        }
    }

    fn create_table(&self, name: String) -> Result<ExecResult> {
        self.tables
            .write()?
            .entry(name)
            .or_insert_with(|| Arc::new(OrderedIndex::new()) as Arc<dyn IndexStorage>);
        Ok(ExecResult::Ok)
    }

    fn insert(
        &self,
        ctx: &OpContext,
        session: SessionId,
        table: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<ExecResult> {
        let index = self.table(table)?;

        if let Some(mut tx) = self.sessions.get_mut(&session) {
            ensure_transactional(table)?;
            self.tx_manager.put(ctx, &mut tx, key, value)?;
            return Ok(ExecResult::Ok);
        }

        index.insert(ctx, key, value)?;
        Ok(ExecResult::Ok)
    }

    fn delete(
        &self,
        ctx: &OpContext,
        session: SessionId,
        table: &str,
        key: &[u8],
    ) -> Result<ExecResult> {
        let index = self.table(table)?;

        if let Some(mut tx) = self.sessions.get_mut(&session) {
            ensure_transactional(table)?;
            self.tx_manager.delete(ctx, &mut tx, key)?;
            return Ok(ExecResult::Ok);
        }

        match index.delete(ctx, key) {
            Ok(()) => Ok(ExecResult::Ok),
            Err(Error::KeyNotFound) => Ok(ExecResult::Null),
            Err(err) => Err(err),
        }
    }

    fn select(&self, ctx: &OpContext, table: &str, key: &[u8]) -> Result<ExecResult> {
        match self.table(table)?.search(ctx, key) {
            Ok(value) => Ok(ExecResult::Value(value)),
            Err(Error::KeyNotFound) => Ok(ExecResult::Null),
            Err(err) => Err(err),
        }
    }

    fn select_range(
        &self,
        ctx: &OpContext,
        table: &str,
        start: &[u8],
        end: &[u8],
    ) -> Result<ExecResult> {
        let rows: Vec<KeyValue> = self.table(table)?.range_scan(ctx, start, end)?.collect();
        if rows.is_empty() {
            return Ok(ExecResult::Null);
        }
        Ok(ExecResult::Rows(rows))
    }

    fn begin(&self, ctx: &OpContext, session: SessionId) -> Result<ExecResult> {
        if let Some(tx) = self.sessions.get(&session) {
            return Err(Error::InvalidOperation(format!(
                "transaction {} is already open in this session",
                tx.id()
            )));
        }

        let tx = self.tx_manager.begin(ctx)?;
        self.sessions.insert(session, tx);
        Ok(ExecResult::Ok)
    }

    fn commit(&self, ctx: &OpContext, session: SessionId) -> Result<ExecResult> {
        // Taken out of the map so no shard stays locked while commit waits on key locks
        let Some((_, mut tx)) = self.sessions.remove(&session) else {
            return Ok(ExecResult::NoTransaction);
        };

        if let Err(err) = self.tx_manager.commit(ctx, &mut tx) {
            self.sessions.insert(session, tx);
            return Err(err);
        }
        Ok(ExecResult::Ok)
    }

    fn rollback(&self, ctx: &OpContext, session: SessionId) -> Result<ExecResult> {
        let Some((_, mut tx)) = self.sessions.remove(&session) else {
            return Ok(ExecResult::NoTransaction);
        };

        if let Err(err) = self.tx_manager.abort(ctx, &mut tx) {
            self.sessions.insert(session, tx);
            return Err(err);
        }
        Ok(ExecResult::Ok)
    }
}

fn ensure_transactional(table: &str) -> Result<()> {
    if table == DEFAULT_TABLE {
        Ok(())
    } else {
        Err(Error::InvalidOperation(format!(
            "transactions can only write to table {DEFAULT_TABLE}, not {table}"
        )))
    }
}
