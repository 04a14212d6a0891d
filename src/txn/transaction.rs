use bytes::Bytes;

use crate::{
    error::{Error, Result},
    wal::record::{LogRecord, TxId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Put,
    Delete,
}

/// A mutation buffered until commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub key: Bytes,
    /// Value the key held when the write was buffered.
    pub old_value: Option<Bytes>,
    pub new_value: Option<Bytes>,
    pub op: WriteOp,
}

impl WriteRecord {
    pub fn to_log_record(&self, tx_id: TxId) -> LogRecord {
        let old_value = self.old_value.as_deref();
        match self.op {
            WriteOp::Put => LogRecord::insert(
                tx_id,
                &self.key,
                old_value,
                self.new_value.as_deref().unwrap_or_default(),
            ),
            WriteOp::Delete => LogRecord::delete(tx_id, &self.key, old_value),
        }
    }
}

#[derive(Debug)]
pub struct Transaction {
    id: TxId,
    state: TxState,
    write_set: Vec<WriteRecord>,
    // Set once the Commit record is in the WAL. From then on the outcome is
    // commit, even if making it durable failed.
    commit_logged: bool,
}

impl Transaction {
    pub(crate) fn new(id: TxId) -> Self {
        Self {
            id,
            state: TxState::Active,
            write_set: Vec::new(),
            commit_logged: false,
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    /// Buffered writes in the order they were made.
    pub fn write_set(&self) -> &[WriteRecord] {
        &self.write_set
    }

    /// True once a commit attempt has logged the `Commit` record. Such a
    /// transaction can only be committed again, never aborted.
    pub fn commit_logged(&self) -> bool {
        self.commit_logged
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::NotActive(self.id))
        }
    }

    pub(crate) fn push_write(&mut self, write: WriteRecord) {
        self.write_set.push(write);
    }

    pub(crate) fn mark_commit_logged(&mut self) {
        self.commit_logged = true;
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TxState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = TxState::Aborted;
        self.write_set.clear();
    }
}
