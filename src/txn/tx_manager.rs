use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use bytes::Bytes;
use tracing::{debug, info};

use crate::{
    context::OpContext,
    error::{Error, Result},
    index::IndexStorage,
    txn::{
        lock_manager::LockManager,
        transaction::{Transaction, WriteOp, WriteRecord},
    },
    wal::{
        record::{LogRecord, TxId},
        Wal,
    },
};

/// How a commit orders index mutation against WAL durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Per write: lock the key, apply it to the index, log it, unlock. Commit
    /// and flush come last, so a failure part way leaves earlier writes
    /// applied.
    PerKey,
    /// Lock every key, log every write plus the commit record, flush, then
    /// apply. A failure before the flush leaves the index untouched.
    #[default]
    Staged,
}

/// Runs transactions against one index, logging through the WAL.
pub struct TransactionManager {
    next_tx_id: AtomicU64,
    wal: Arc<Wal>,
    index: Arc<dyn IndexStorage>,
    lock_manager: LockManager,
    commit_mode: CommitMode,
}

impl TransactionManager {
    /// Transaction ids resume one past the highest id found in `wal`.
    pub fn new(
        wal: Arc<Wal>,
        index: Arc<dyn IndexStorage>,
        commit_mode: CommitMode,
    ) -> Result<Self> {
        let next_tx_id = wal.last_tx_id()?.map_or(1, |tx_id| tx_id + 1);
        debug!(next_tx_id, ?commit_mode, "transaction manager ready");

        Ok(Self {
            next_tx_id: AtomicU64::new(next_tx_id),
            wal,
            index,
            lock_manager: LockManager::new(),
            commit_mode,
        })
    }

    pub fn commit_mode(&self) -> CommitMode {
        self.commit_mode
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn index(&self) -> &Arc<dyn IndexStorage> {
        &self.index
    }

    pub fn begin(&self, ctx: &OpContext) -> Result<Transaction> {
        ctx.check()?;
        let tx_id = self.next_tx_id.fetch_add(1, Ordering::AcqRel);
        self.wal.append(ctx, LogRecord::begin(tx_id))?;
        debug!(tx_id, "transaction started");
        Ok(Transaction::new(tx_id))
    }

    /// Buffers an insert-or-overwrite of `key`. Nothing is applied or logged
    /// until commit.
    pub fn put(
        &self,
        ctx: &OpContext,
        tx: &mut Transaction,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        tx.ensure_active()?;
        let old_value = self.current_value(ctx, key)?;
        tx.push_write(WriteRecord {
            key: Bytes::copy_from_slice(key),
            old_value,
            new_value: Some(Bytes::copy_from_slice(value)),
            op: WriteOp::Put,
        });
        Ok(())
    }

    /// Buffers a delete of `key`.
    pub fn delete(&self, ctx: &OpContext, tx: &mut Transaction, key: &[u8]) -> Result<()> {
        tx.ensure_active()?;
        let old_value = self.current_value(ctx, key)?;
        tx.push_write(WriteRecord {
            key: Bytes::copy_from_slice(key),
            old_value,
            new_value: None,
            op: WriteOp::Delete,
        });
        Ok(())
    }

    /// Makes the write set durable and visible. On error the transaction stays
    /// active so the caller can retry it. It can also be aborted, unless the
    /// `Commit` record was already logged.
    pub fn commit(&self, ctx: &OpContext, tx: &mut Transaction) -> Result<()> {
        tx.ensure_active()?;
        ctx.check()?;

        match self.commit_mode {
            CommitMode::PerKey => self.commit_per_key(ctx, tx)?,
            CommitMode::Staged => self.commit_staged(ctx, tx)?,
        }

        tx.mark_committed();
        info!(tx_id = tx.id(), writes = tx.write_set().len(), "transaction committed");
        Ok(())
    }

    pub fn abort(&self, ctx: &OpContext, tx: &mut Transaction) -> Result<()> {
        tx.ensure_active()?;
        if tx.commit_logged() {
            return Err(Error::InvalidOperation(format!(
                "transaction {} already logged its commit, retry COMMIT instead",
                tx.id()
            )));
        }
        self.wal.append(ctx, LogRecord::abort(tx.id()))?;
        tx.mark_aborted();
        info!(tx_id = tx.id(), "transaction aborted");
        Ok(())
    }

    fn commit_per_key(&self, ctx: &OpContext, tx: &mut Transaction) -> Result<()> {
        if !tx.commit_logged() {
            for write in tx.write_set() {
                let _guard = self.lock_manager.acquire(ctx, &write.key)?;
                self.apply(ctx, write)?;
                self.wal.append(ctx, write.to_log_record(tx.id()))?;
            }
            self.log_commit(ctx, tx)?;
        }

        self.wal.flush(&OpContext::background())
    }

    fn commit_staged(&self, ctx: &OpContext, tx: &mut Transaction) -> Result<()> {
        // Ascending order keeps concurrent multi-key commits deadlock free
        let mut keys: Vec<&[u8]> = tx.write_set().iter().map(|write| &write.key[..]).collect();
        keys.sort_unstable();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock_manager.acquire(ctx, key)?);
        }

        if !tx.commit_logged() {
            for write in tx.write_set() {
                self.wal.append(ctx, write.to_log_record(tx.id()))?;
            }
            self.log_commit(ctx, tx)?;
        }

        // The outcome is decided once Commit is logged, so cancellation no
        // longer applies
        let durable = OpContext::background();
        self.wal.flush(&durable)?;
        for write in tx.write_set() {
            self.apply(&durable, write)?;
        }

        drop(guards);
        Ok(())
    }

    fn log_commit(&self, ctx: &OpContext, tx: &mut Transaction) -> Result<()> {
        self.wal.append(ctx, LogRecord::commit(tx.id()))?;
        tx.mark_commit_logged();
        Ok(())
    }

    fn apply(&self, ctx: &OpContext, write: &WriteRecord) -> Result<()> {
        match write.op {
            WriteOp::Put => {
                let value = write.new_value.as_deref().unwrap_or_default();
                self.index.insert(ctx, &write.key, value)
            }
            // Deleting an absent key commits as a no-op
            WriteOp::Delete => match self.index.delete(ctx, &write.key) {
                Err(Error::KeyNotFound) => Ok(()),
                other => other,
            },
        }
    }

    fn current_value(&self, ctx: &OpContext, key: &[u8]) -> Result<Option<Bytes>> {
        match self.index.search(ctx, key) {
            Ok(value) => Ok(Some(value)),
            Err(Error::KeyNotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The id the next `begin` will hand out.
    pub fn next_tx_id(&self) -> TxId {
        self.next_tx_id.load(Ordering::Acquire)
    }
}
