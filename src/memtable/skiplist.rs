//! Probabilistic skiplist keyed by raw bytes.
//!
//! Nodes live in an arena and link forward by index, which keeps the
//! structure free of unsafe pointer juggling while preserving the usual
//! O(log n) expected search and insert. Tombstones replace values in place,
//! so nodes are never unlinked; the arena only shrinks on `clear`.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::record::{Entry, EntryKind};

/// Tallest tower a node may have.
const MAX_HEIGHT: usize = 16;
/// Chance of promoting a new node one more level.
const PROMOTION: f64 = 0.5;
/// Sentinel index marking the end of a level.
const NIL: usize = usize::MAX;

struct Node {
    entry: Entry,
    next: Vec<usize>,
}

pub struct SkipList {
    /// `nodes[0]` is the head sentinel; it owns a full-height tower and an
    /// empty entry that is never compared against.
    nodes: Vec<Node>,
    height: usize,
    size: usize,
    rng: SmallRng,
}

impl SkipList {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                entry: Entry::set(Vec::new(), Vec::new()),
                next: vec![NIL; MAX_HEIGHT],
            }],
            height: 1,
            size: 0,
            rng: SmallRng::from_entropy(),
        }
    }

    fn random_height(&mut self) -> usize {
        let mut height = 1;
        while height < MAX_HEIGHT && self.rng.gen::<f64>() < PROMOTION {
            height += 1;
        }
        height
    }

    /// Walks the towers down to level 0, recording the rightmost node with a
    /// key strictly below `key` at every level. Returns the recorded path and
    /// the index of the first node at level 0 whose key is `>= key` (or NIL).
    fn search_path(&self, key: &[u8]) -> ([usize; MAX_HEIGHT], usize) {
        let mut update = [0usize; MAX_HEIGHT];
        let mut current = 0;

        for level in (0..self.height).rev() {
            loop {
                let next = self.nodes[current].next[level];
                if next != NIL && self.nodes[next].entry.key.as_slice() < key {
                    current = next;
                } else {
                    break;
                }
            }
            update[level] = current;
        }

        (update, self.nodes[current].next[0])
    }

    /// Inserts `entry`, replacing any stored entry with the same key
    /// (including its kind). Byte accounting moves by the value-length delta
    /// on replacement and by the full entry footprint on insertion.
    pub fn put(&mut self, entry: Entry) {
        let (update, found) = self.search_path(&entry.key);

        if found != NIL && self.nodes[found].entry.key == entry.key {
            self.size -= self.nodes[found].entry.value.len();
            self.size += entry.value.len();
            self.nodes[found].entry = entry;
            return;
        }

        let height = self.random_height();
        let mut update = update;
        if height > self.height {
            for slot in update.iter_mut().take(height).skip(self.height) {
                *slot = 0;
            }
            self.height = height;
        }

        self.size += entry.key.len() + entry.value.len();

        let index = self.nodes.len();
        self.nodes.push(Node {
            entry,
            next: vec![NIL; height],
        });
        for level in 0..height {
            let prev = update[level];
            let succ = self.nodes[prev].next[level];
            self.nodes[index].next[level] = succ;
            self.nodes[prev].next[level] = index;
        }
    }

    /// Replaces the stored entry with a tombstone. Inserts a fresh tombstone
    /// when the key is absent; deleting an already-deleted key is a no-op.
    pub fn delete(&mut self, key: &[u8]) {
        if let Some(existing) = self.get(key) {
            if existing.kind == EntryKind::Delete {
                return;
            }
        }
        self.put(Entry::delete(key.to_vec()));
    }

    pub fn get(&self, key: &[u8]) -> Option<&Entry> {
        let (_, found) = self.search_path(key);
        if found != NIL && self.nodes[found].entry.key == key {
            return Some(&self.nodes[found].entry);
        }
        None
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// All stored entries in ascending key order.
    pub fn entries(&self) -> Vec<Entry> {
        let mut result = Vec::with_capacity(self.len());
        let mut current = self.nodes[0].next[0];
        while current != NIL {
            result.push(self.nodes[current].entry.clone());
            current = self.nodes[current].next[0];
        }
        result
    }

    /// Running sum of `key.len() + value.len()` across stored entries.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of stored entries, tombstones included.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Empties the list, retaining only the head sentinel.
    pub fn clear(&mut self) {
        self.nodes.truncate(1);
        for slot in self.nodes[0].next.iter_mut() {
            *slot = NIL;
        }
        self.height = 1;
        self.size = 0;
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}
