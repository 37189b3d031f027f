//! Builds an SSTable file: data entries first, then the sparse index and
//! footer on `finish`.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::record::Entry;

use super::{IndexEntry, FOOTER_SIZE};

pub struct Writer {
    file: File,
    path: PathBuf,
    index: Vec<IndexEntry>,
    offset: u64,
    count: usize,
    finished: bool,
    index_interval: usize,
}

impl Writer {
    /// Creates (truncating) the table file at `path`. `index_interval`
    /// controls the sparse index stride and must be positive.
    pub fn create(path: impl Into<PathBuf>, index_interval: usize) -> Result<Self> {
        if index_interval == 0 {
            return Err(Error::InvalidInput(
                "index interval must be positive".to_string(),
            ));
        }

        let path = path.into();
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            file,
            path,
            index: Vec::new(),
            offset: 0,
            count: 0,
            finished: false,
            index_interval,
        })
    }

    /// Appends a key-value entry to the data section. Keys must arrive in
    /// strictly ascending order; the writer does not verify.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_entry(Entry::set(key.to_vec(), value.to_vec()))
    }

    /// Appends a deletion tombstone to the data section.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.write_entry(Entry::delete(key.to_vec()))
    }

    fn write_entry(&mut self, entry: Entry) -> Result<()> {
        if self.finished {
            return Err(Error::InvalidInput(
                "cannot write to a finished table".to_string(),
            ));
        }

        let entry_offset = self.offset;
        self.offset = entry.write_at(&self.file, self.offset)?;

        if self.count % self.index_interval == 0 {
            self.index.push(IndexEntry {
                key: entry.key,
                offset: entry_offset,
            });
        }
        self.count += 1;
        Ok(())
    }

    /// Writes the sparse index section and footer, then fsyncs. Further
    /// writes are rejected.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }

        let index_offset = self.offset;
        for entry in &self.index {
            self.offset = Entry::index(entry.key.clone()).write_at(&self.file, self.offset)?;

            let mut offset_bytes = [0u8; 8];
            BigEndian::write_u64(&mut offset_bytes, entry.offset);
            self.file.write_all_at(&offset_bytes, self.offset)?;
            self.offset += 8;
        }
        let index_size = self.offset - index_offset;

        let mut footer = [0u8; FOOTER_SIZE];
        BigEndian::write_u64(&mut footer[..8], index_offset);
        BigEndian::write_u64(&mut footer[8..], index_size);
        self.file.write_all_at(&footer, self.offset)?;
        self.offset += FOOTER_SIZE as u64;

        self.file.sync_all()?;
        self.finished = true;
        Ok(())
    }

    /// Finishes the table if needed and closes the file.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
