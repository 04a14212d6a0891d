pub mod iterator;
pub mod ordered;

use bytes::Bytes;

use crate::{context::OpContext, error::Result};

pub use iterator::{KeyValue, RangeIter, StorageIterator};
pub use ordered::OrderedIndex;

/// Storage behind a table's ordered key space.
///
/// The transaction manager, recovery and the executor only see this trait, so
/// a page-backed index can replace the in-memory one without touching them.
/// Keys are ordered byte-wise and unique.
pub trait IndexStorage: Send + Sync {
    /// Adds the key or overwrites its value.
    fn insert(&self, ctx: &OpContext, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes the key, failing with `KeyNotFound` when it is absent.
    fn delete(&self, ctx: &OpContext, key: &[u8]) -> Result<()>;

    /// Point lookup, failing with `KeyNotFound` when the key is absent.
    fn search(&self, ctx: &OpContext, key: &[u8]) -> Result<Bytes>;

    /// Ascending scan over `start <= key`, bounded by `key <= end` unless `end`
    /// is empty.
    fn range_scan(&self, ctx: &OpContext, start: &[u8], end: &[u8]) -> Result<RangeIter>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
