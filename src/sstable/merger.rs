//! K-way merge of SSTables into a single output table.
//!
//! Sources are registered oldest first; a source's position doubles as its
//! priority, so on duplicate keys the highest-priority (newest) source wins.
//! Tombstones are carried through to the output: dropping them here would
//! resurrect older values still sitting in lower tiers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Error, Result};
use crate::record::Entry;

use super::reader::{Reader, TableIter};
use super::writer::Writer;

struct HeapItem {
    entry: Entry,
    /// Index of the owning source; higher means newer.
    priority: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.entry.key == other.entry.key && self.priority == other.priority
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse the key ordering so the smallest
        // key surfaces first, and break ties so the newest source pops ahead
        // of older ones.
        match self.entry.key.cmp(&other.entry.key) {
            Ordering::Equal => self.priority.cmp(&other.priority),
            order => order.reverse(),
        }
    }
}

pub struct Merger<'a> {
    sources: Vec<&'a Reader>,
    output: Option<&'a mut Writer>,
}

impl<'a> Merger<'a> {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            output: None,
        }
    }

    /// Registers a source table. Call in oldest-to-newest order.
    pub fn add_source(&mut self, reader: &'a Reader) {
        self.sources.push(reader);
    }

    pub fn set_output(&mut self, writer: &'a mut Writer) {
        self.output = Some(writer);
    }

    /// Runs the merge and finishes the output table.
    pub fn merge(&mut self) -> Result<()> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| Error::InvalidInput("merger output not set".to_string()))?;

        let mut iters: Vec<TableIter<'a>> = self.sources.iter().map(|r| r.iter()).collect();
        let mut heap = BinaryHeap::new();

        for (priority, iter) in iters.iter_mut().enumerate() {
            if let Some(entry) = iter.next().transpose()? {
                heap.push(HeapItem { entry, priority });
            }
        }

        let mut last_key: Option<Vec<u8>> = None;
        while let Some(item) = heap.pop() {
            // A key equal to the previous emission lost the tie-break to a
            // newer source; swallow it and keep its iterator moving.
            if last_key.as_deref() == Some(item.entry.key.as_slice()) {
                if let Some(entry) = iters[item.priority].next().transpose()? {
                    heap.push(HeapItem {
                        entry,
                        priority: item.priority,
                    });
                }
                continue;
            }

            if item.entry.is_deleted() {
                output.delete(&item.entry.key)?;
            } else {
                output.put(&item.entry.key, &item.entry.value)?;
            }

            if let Some(entry) = iters[item.priority].next().transpose()? {
                heap.push(HeapItem {
                    entry,
                    priority: item.priority,
                });
            }
            last_key = Some(item.entry.key);
        }

        output.finish()
    }

    /// Clears sources and output so the merger can be reused.
    pub fn reset(&mut self) {
        self.sources.clear();
        self.output = None;
    }
}

impl Default for Merger<'_> {
    fn default() -> Self {
        Self::new()
    }
}
