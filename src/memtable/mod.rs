//! In-memory sorted table holding recent writes before they reach disk.
//!
//! The memtable maps each key to the most recent entry for that key: a `Set`
//! carrying the value, or a `Delete` tombstone that shadows older values in
//! the SSTable tiers. Lookups and in-order traversal are served by a
//! probabilistic skiplist; a readers-writer lock of its own makes the table
//! safe to read while the engine briefly holds its write lock elsewhere.

mod skiplist;

use std::sync::RwLock;

use crate::record::Entry;

use skiplist::SkipList;

pub struct Memtable {
    inner: RwLock<SkipList>,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SkipList::new()),
        }
    }

    /// Inserts or updates the entry for `key`. Replaces a stored tombstone
    /// just like any other entry.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.write().unwrap().put(Entry::set(key, value));
    }

    /// Stores a tombstone for `key`.
    pub fn delete(&self, key: &[u8]) {
        self.inner.write().unwrap().delete(key);
    }

    /// Returns the stored entry for `key`, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.inner.read().unwrap().get(key).cloned()
    }

    /// All stored entries in ascending key order. The flusher consumes this
    /// snapshot exactly once.
    pub fn entries(&self) -> Vec<Entry> {
        self.inner.read().unwrap().entries()
    }

    /// Byte footprint: the sum of `key.len() + value.len()` over stored
    /// entries.
    pub fn size(&self) -> usize {
        self.inner.read().unwrap().size()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }

    /// Empties the table and resets its size accounting.
    pub fn clear(&self) {
        self.inner.write().unwrap().clear();
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}
