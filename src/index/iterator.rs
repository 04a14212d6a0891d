use std::vec;

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
}

pub trait StorageIterator {
    /// Get the current key.
    fn key(&self) -> &[u8];

    /// Get the current value.
    fn value(&self) -> &[u8];

    /// Check if the current iterator is valid.
    fn is_valid(&self) -> bool;

    /// Move to the next position.
    fn advance(&mut self);
}

/// Forward-only, one-shot scan over a snapshot of the index taken when the
/// scan was opened. Later writes to the index are not visible.
///
/// Usable either cursor-style through [`StorageIterator`] or as a plain
/// [`Iterator`] of [`KeyValue`]s.
#[derive(Debug)]
pub struct RangeIter {
    current: Option<KeyValue>,
    rest: vec::IntoIter<KeyValue>,
}

impl RangeIter {
    pub(crate) fn new(items: Vec<KeyValue>) -> Self {
        let mut rest = items.into_iter();
        let current = rest.next();
        Self { current, rest }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Entries not yet consumed, including the current one.
    pub fn remaining(&self) -> usize {
        self.rest.len() + usize::from(self.current.is_some())
    }
}

impl StorageIterator for RangeIter {
    fn key(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |kv| &kv.key[..])
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |kv| &kv.value[..])
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn advance(&mut self) {
        self.current = self.rest.next();
    }
}

impl Iterator for RangeIter {
    type Item = KeyValue;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.current.take();
        self.current = self.rest.next();
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for RangeIter {}
