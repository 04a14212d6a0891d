use std::hash::Hash;

use hashlink::LinkedHashMap;

/// Tracks which entries may be evicted and picks the next victim.
pub trait Replacer<ID: Eq + Hash + Copy> {
    /// Removes and returns the next victim, if any entry is evictable.
    fn victim(&mut self) -> Option<ID>;
    /// Marks an entry as in use, removing it from the candidate set.
    fn pin(&mut self, entry_id: ID);
    /// Marks an entry as evictable.
    fn unpin(&mut self, entry_id: ID);
    fn size(&self) -> usize;
}

/// Strict LRU over the unpinned set.
///
/// Entries are ordered by the time they became unpinned; the front of the map
/// is the least recently unpinned entry. All operations are O(1).
pub struct LruReplacer<ID: Eq + Hash + Copy> {
    node_store: LinkedHashMap<ID, ()>,
}

impl<ID: Eq + Hash + Copy> LruReplacer<ID> {
    pub fn new(capacity: usize) -> Self {
        LruReplacer {
            node_store: LinkedHashMap::with_capacity(capacity),
        }
    }

    pub fn contains(&self, entry_id: ID) -> bool {
        self.node_store.contains_key(&entry_id)
    }

    /// Puts a victim that could not be evicted back at the front, so it stays
    /// the least recently unpinned entry.
    pub fn restore(&mut self, entry_id: ID) {
        self.node_store.insert(entry_id, ());
        self.node_store.to_front(&entry_id);
    }
}

impl<ID: Eq + Hash + Copy> Replacer<ID> for LruReplacer<ID> {
    fn victim(&mut self) -> Option<ID> {
        self.node_store.pop_front().map(|(id, _)| id)
    }

    fn pin(&mut self, entry_id: ID) {
        self.node_store.remove(&entry_id);
    }

    fn unpin(&mut self, entry_id: ID) {
        // An entry that is already a candidate keeps its position
        if !self.node_store.contains_key(&entry_id) {
            self.node_store.insert(entry_id, ());
        }
    }

    fn size(&self) -> usize {
        self.node_store.len()
    }
}
