use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use tracing::{info, warn};

use crate::{
    context::OpContext,
    error::{Error, Result},
    index::IndexStorage,
    wal::{
        record::{LogRecord, LogType, Lsn, TxId},
        Wal,
    },
};

/// What a replay did to the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub records_read: usize,
    pub inserts_applied: usize,
    pub deletes_applied: usize,
    /// Deletes of keys that were already absent.
    pub delete_misses: usize,
    /// Data records left out because their transaction never committed.
    pub records_skipped: usize,
    /// Transactions with a `Begin` but neither `Commit` nor `Abort` in range.
    pub unfinished_txs: usize,
}

/// Rebuilds index state from the WAL.
pub struct Recovery {
    wal: Arc<Wal>,
    index: Arc<dyn IndexStorage>,
}

impl Recovery {
    pub fn new(wal: Arc<Wal>, index: Arc<dyn IndexStorage>) -> Self {
        Self { wal, index }
    }

    /// Re-applies every `Insert` and `Delete` record with an LSN of at least
    /// `from`, in log order. Running it twice over the same range leaves the
    /// index in the same state.
    pub fn replay(&self, ctx: &OpContext, from: Lsn) -> Result<ReplayStats> {
        let records = self.wal.read_from(ctx, from)?;
        self.apply(ctx, &records, |_| true)
    }

    /// Like [`Recovery::replay`], but only applies data records of transactions
    /// whose `Commit` record is in range. A transaction that also has an
    /// `Abort` record is contradictory and is left out.
    pub fn replay_committed(&self, ctx: &OpContext, from: Lsn) -> Result<ReplayStats> {
        let records = self.wal.read_from(ctx, from)?;
        let mut committed = HashSet::new();
        let mut aborted = HashSet::new();
        for record in &records {
            match record.log_type {
                LogType::Commit => {
                    committed.insert(record.tx_id);
                }
                LogType::Abort => {
                    aborted.insert(record.tx_id);
                }
                _ => {}
            }
        }

        let conflicting: BTreeSet<TxId> = committed.intersection(&aborted).copied().collect();
        if !conflicting.is_empty() {
            warn!(tx_ids = ?conflicting, "transactions with both commit and abort records");
        }
        self.apply(ctx, &records, |tx_id| {
            committed.contains(&tx_id) && !aborted.contains(&tx_id)
        })
    }

    fn apply(
        &self,
        ctx: &OpContext,
        records: &[LogRecord],
        include: impl Fn(TxId) -> bool,
    ) -> Result<ReplayStats> {
        let mut stats = ReplayStats {
            records_read: records.len(),
            ..ReplayStats::default()
        };
        let mut open_txs = BTreeSet::new();

        for record in records {
            ctx.check()?;

            match record.log_type {
                LogType::Begin => {
                    open_txs.insert(record.tx_id);
                }
                LogType::Commit | LogType::Abort => {
                    open_txs.remove(&record.tx_id);
                }
                LogType::Insert | LogType::Delete if !include(record.tx_id) => {
                    stats.records_skipped += 1;
                }
                LogType::Insert => {
                    let key = record_key(record)?;
                    let value = record.new_value.as_deref().unwrap_or_default();
                    self.index.insert(ctx, key, value)?;
                    stats.inserts_applied += 1;
                }
                LogType::Delete => match self.index.delete(ctx, record_key(record)?) {
                    Ok(()) => stats.deletes_applied += 1,
                    Err(Error::KeyNotFound) => stats.delete_misses += 1,
                    Err(err) => return Err(err),
                },
            }
        }

        stats.unfinished_txs = open_txs.len();
        if !open_txs.is_empty() {
            warn!(
                tx_ids = ?open_txs,
                "transactions without a commit or abort record"
            );
        }
        info!(
            records = stats.records_read,
            inserts = stats.inserts_applied,
            deletes = stats.deletes_applied,
            skipped = stats.records_skipped,
            "replayed WAL"
        );
        Ok(stats)
    }
}

fn record_key(record: &LogRecord) -> Result<&[u8]> {
    record.key.as_deref().ok_or_else(|| {
        Error::CorruptedWal(format!(
            "{:?} record at lsn {} has no key",
            record.log_type, record.lsn
        ))
    })
}
