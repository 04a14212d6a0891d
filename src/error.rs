use std::{io, sync::PoisonError};

use crate::{storage::page::PageId, wal::record::TxId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Not found
    #[error("page {0} not found")]
    PageNotFound(PageId),
    #[error("key not found")]
    KeyNotFound,
    #[error("table {0} not found")]
    TableNotFound(String),
    #[error("offset {offset} (len {len}) is outside the page")]
    OffsetNotFound { offset: usize, len: usize },

    // Resource exhaustion
    #[error("no frame available")]
    NoFrameAvailable,

    // State violations
    #[error("transaction {0} is not active")]
    NotActive(TxId),
    #[error("invalid sql: {0}")]
    InvalidSql(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    // I/O and persistence
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupted WAL: {0}")]
    CorruptedWal(String),
    #[error("failed to encode log record: {0}")]
    Serialization(#[from] serde_json::Error),

    // Cancellation
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal lock was poisoned")]
    Poisoned,
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::Poisoned
    }
}

impl Error {
    /// Not-found errors are expected outcomes the caller can report as "no such row".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::PageNotFound(_)
                | Error::KeyNotFound
                | Error::TableNotFound(_)
                | Error::OffsetNotFound { .. }
        )
    }
}
