//! Read side of an SSTable: loads the sparse index at open time and serves
//! point lookups with one binary search plus a bounded block scan.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};

use crate::error::Result;
use crate::record::{Entry, EntryKind};

use super::{IndexEntry, FOOTER_SIZE};

pub struct Reader {
    file: File,
    path: PathBuf,
    index: Vec<IndexEntry>,
    /// File offset where the index section starts; the data section is
    /// exactly `[0, index_base)`.
    index_base: u64,
}

impl Reader {
    /// Opens the table at `path` read-only and loads its sparse index.
    /// Truncated or malformed files fail here, never at lookup time.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;

        let file_size = file.metadata()?.len();
        if file_size < FOOTER_SIZE as u64 {
            return Err(crate::errcorrupt!(
                "table {} is shorter than its footer",
                path.display()
            ));
        }

        let mut footer = [0u8; FOOTER_SIZE];
        file.read_exact_at(&mut footer, file_size - FOOTER_SIZE as u64)?;
        let index_base = BigEndian::read_u64(&footer[..8]);
        let index_size = BigEndian::read_u64(&footer[8..]);

        if index_base + index_size + FOOTER_SIZE as u64 != file_size {
            return Err(crate::errcorrupt!(
                "table {} footer does not match file size",
                path.display()
            ));
        }

        let index = Self::load_index(&file, index_base, index_size)?;

        Ok(Self {
            file,
            path,
            index,
            index_base,
        })
    }

    /// Reads the whole index section in one shot and parses the alternating
    /// `(Index entry, offset)` pairs.
    fn load_index(file: &File, index_base: u64, index_size: u64) -> Result<Vec<IndexEntry>> {
        let mut buf = vec![0u8; index_size as usize];
        file.read_exact_at(&mut buf, index_base)?;

        let mut index = Vec::new();
        let mut pos = 0usize;
        while pos < buf.len() {
            let (entry, consumed) = Entry::decode(&buf[pos..])?;
            if entry.kind != EntryKind::Index {
                return Err(crate::errcorrupt!("non-index entry in index section"));
            }

            pos += consumed;
            if pos + 8 > buf.len() {
                return Err(crate::errcorrupt!("index entry missing data offset"));
            }
            let offset = BigEndian::read_u64(&buf[pos..pos + 8]);
            pos += 8;

            if offset >= index_base {
                return Err(crate::errcorrupt!(
                    "index offset points past the data section"
                ));
            }
            index.push(IndexEntry {
                key: entry.key,
                offset,
            });
        }
        Ok(index)
    }

    /// Point lookup. Returns the stored entry for `key`, tombstones
    /// included; callers decide whether a `Delete` means "stop searching
    /// older tables". `Ok(None)` means this table holds nothing for the key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        // Last index slot whose key is <= the target.
        let pos = self.index.partition_point(|e| e.key.as_slice() <= key);
        if pos == 0 {
            return Ok(None);
        }
        let slot = pos - 1;

        // The scan is bounded by the next indexed entry (or the end of the
        // data section for the final slot).
        let block_end = match self.index.get(slot + 1) {
            Some(next) => next.offset,
            None => self.index_base,
        };

        let mut offset = self.index[slot].offset;
        let mut latest: Option<Entry> = None;
        while offset < block_end {
            let (entry, next) = Entry::read_at(&self.file, offset)?;
            match entry.key.as_slice().cmp(key) {
                std::cmp::Ordering::Less => {}
                // Keep the last match so duplicate keys within a block
                // resolve to the most recently written entry.
                std::cmp::Ordering::Equal => latest = Some(entry),
                std::cmp::Ordering::Greater => break,
            }
            offset = next;
        }
        Ok(latest)
    }

    /// Forward iterator over the data section in file (= key) order.
    pub fn iter(&self) -> TableIter<'_> {
        TableIter {
            reader: self,
            offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Streams a table's data entries front to back. Obtained from
/// [`Reader::iter`]; `rewind` restarts from the first entry.
pub struct TableIter<'a> {
    reader: &'a Reader,
    offset: u64,
}

impl TableIter<'_> {
    pub fn rewind(&mut self) {
        self.offset = 0;
    }
}

impl Iterator for TableIter<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.reader.index_base {
            return None;
        }
        match Entry::read_at(&self.reader.file, self.offset) {
            Ok((entry, next)) => {
                self.offset = next;
                Some(Ok(entry))
            }
            Err(e) => {
                self.offset = self.reader.index_base;
                Some(Err(e))
            }
        }
    }
}
