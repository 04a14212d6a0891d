use std::{collections::BTreeMap, ops::Bound, sync::RwLock};

use bytes::Bytes;

use crate::{
    context::OpContext,
    error::{Error, Result},
};

use super::{
    iterator::{KeyValue, RangeIter},
    IndexStorage,
};

/// In-memory ordered index. Point operations are logarithmic; a range scan
/// copies its result under the read lock, so it is linear in the result size
/// and unaffected by later writes.
#[derive(Debug, Default)]
pub struct OrderedIndex {
    store: RwLock<BTreeMap<Bytes, Bytes>>,
}

impl OrderedIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexStorage for OrderedIndex {
    fn insert(&self, ctx: &OpContext, key: &[u8], value: &[u8]) -> Result<()> {
        ctx.check()?;
        self.store
            .write()?
            .insert(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        Ok(())
    }

    fn delete(&self, ctx: &OpContext, key: &[u8]) -> Result<()> {
        ctx.check()?;
        self.store
            .write()?
            .remove(key)
            .map(|_| ())
            .ok_or(Error::KeyNotFound)
    }

    fn search(&self, ctx: &OpContext, key: &[u8]) -> Result<Bytes> {
        ctx.check()?;
        self.store
            .read()?
            .get(key)
            .cloned()
            .ok_or(Error::KeyNotFound)
    }

    fn range_scan(&self, ctx: &OpContext, start: &[u8], end: &[u8]) -> Result<RangeIter> {
        ctx.check()?;

        let upper = if end.is_empty() {
            Bound::Unbounded
        } else if start > end {
            return Ok(RangeIter::empty());
        } else {
            Bound::Included(end)
        };

        let store = self.store.read()?;
        let items = store
            .range::<[u8], _>((Bound::Included(start), upper))
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();

        Ok(RangeIter::new(items))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.store.read()?.len())
    }
}
