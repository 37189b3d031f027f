//! The length-prefixed entry codec shared by the WAL and the SSTable format.
//!
//! Every persistent structure in the store serializes entries the same way:
//!
//! ```text
//! +---------+-------------+-------------+---------+-----------+
//! | kind:u8 | key_len:u32 | val_len:u32 | key     | value     |
//! +---------+-------------+-------------+---------+-----------+
//! | 1 byte  | 4 bytes BE  | 4 bytes BE  | var len | var len   |
//! +---------+-------------+-------------+---------+-----------+
//! ```
//!
//! `Delete` and `Index` entries carry no value bytes (`val_len = 0`).
//! `Index` entries appear only in an SSTable's sparse index section.

use std::fs::File;
use std::io::Read;
use std::os::unix::fs::FileExt;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Size in bytes of the entry kind marker.
pub const KIND_SIZE: usize = 1;
/// Size in bytes of each length prefix.
pub const LEN_SIZE: usize = 4;
/// Total size of entry metadata (kind + key length + value length).
pub const PREFIX_SIZE: usize = KIND_SIZE + 2 * LEN_SIZE;

/// The kind of operation an entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    /// A key-value insertion.
    Set = 0,
    /// A deletion tombstone; the value is empty.
    Delete = 1,
    /// A sparse index marker inside an SSTable, never visible to callers.
    Index = 2,
}

impl TryFrom<u8> for EntryKind {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(EntryKind::Set),
            1 => Ok(EntryKind::Delete),
            2 => Ok(EntryKind::Index),
            other => Err(Error::Corrupt(format!("unknown entry kind {other:#04x}"))),
        }
    }
}

/// A single tagged key-value entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn set(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            kind: EntryKind::Set,
            key,
            value,
        }
    }

    pub fn delete(key: Vec<u8>) -> Self {
        Self {
            kind: EntryKind::Delete,
            key,
            value: Vec::new(),
        }
    }

    pub fn index(key: Vec<u8>) -> Self {
        Self {
            kind: EntryKind::Index,
            key,
            value: Vec::new(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.kind == EntryKind::Delete
    }

    /// Serialized size of this entry in bytes.
    pub fn encoded_len(&self) -> usize {
        PREFIX_SIZE + self.key.len() + self.value.len()
    }

    /// Serializes the entry to its wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf
    }

    /// Parses one entry from the front of `buf`, returning the entry and the
    /// number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Entry, usize)> {
        if buf.len() < PREFIX_SIZE {
            return Err(Error::Corrupt("entry prefix truncated".to_string()));
        }

        let kind = EntryKind::try_from(buf[0])?;
        let key_len = BigEndian::read_u32(&buf[KIND_SIZE..KIND_SIZE + LEN_SIZE]) as usize;
        let val_len = BigEndian::read_u32(&buf[KIND_SIZE + LEN_SIZE..PREFIX_SIZE]) as usize;
        let total = PREFIX_SIZE + key_len + val_len;

        if buf.len() < total {
            return Err(Error::Corrupt("entry body truncated".to_string()));
        }

        let key = buf[PREFIX_SIZE..PREFIX_SIZE + key_len].to_vec();
        let value = buf[PREFIX_SIZE + key_len..total].to_vec();

        Ok((Entry { kind, key, value }, total))
    }

    /// Writes the entry to `file` at `offset` and returns the offset one past
    /// its last byte.
    pub fn write_at(&self, file: &File, offset: u64) -> Result<u64> {
        let buf = self.encode();
        file.write_all_at(&buf, offset)?;
        Ok(offset + buf.len() as u64)
    }

    /// Reads one entry from `file` at `offset`, returning the entry and the
    /// offset one past it. Fails with an IO error when the file ends
    /// mid-entry.
    pub fn read_at(file: &File, offset: u64) -> Result<(Entry, u64)> {
        let mut prefix = [0u8; PREFIX_SIZE];
        file.read_exact_at(&mut prefix, offset)?;

        let kind = EntryKind::try_from(prefix[0])?;
        let key_len = BigEndian::read_u32(&prefix[KIND_SIZE..KIND_SIZE + LEN_SIZE]) as usize;
        let val_len = BigEndian::read_u32(&prefix[KIND_SIZE + LEN_SIZE..PREFIX_SIZE]) as usize;

        let mut key = vec![0u8; key_len];
        file.read_exact_at(&mut key, offset + PREFIX_SIZE as u64)?;

        let mut value = vec![0u8; val_len];
        file.read_exact_at(&mut value, offset + (PREFIX_SIZE + key_len) as u64)?;

        let next = offset + (PREFIX_SIZE + key_len + val_len) as u64;
        Ok((Entry { kind, key, value }, next))
    }

    /// Streaming read used by WAL replay. Returns `Ok(None)` when the reader
    /// is positioned exactly at end-of-stream, and an error when the stream
    /// ends in the middle of an entry.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Entry>> {
        let mut prefix = [0u8; PREFIX_SIZE];
        let mut filled = 0;
        while filled < PREFIX_SIZE {
            let n = reader.read(&mut prefix[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::Corrupt("stream ended mid-entry".to_string()));
            }
            filled += n;
        }

        let kind = EntryKind::try_from(prefix[0])?;
        let key_len = BigEndian::read_u32(&prefix[KIND_SIZE..KIND_SIZE + LEN_SIZE]) as usize;
        let val_len = BigEndian::read_u32(&prefix[KIND_SIZE + LEN_SIZE..PREFIX_SIZE]) as usize;

        let mut key = vec![0u8; key_len];
        reader
            .read_exact(&mut key)
            .map_err(|e| Error::Corrupt(format!("stream ended reading key: {e}")))?;

        let mut value = vec![0u8; val_len];
        reader
            .read_exact(&mut value)
            .map_err(|e| Error::Corrupt(format!("stream ended reading value: {e}")))?;

        Ok(Some(Entry { kind, key, value }))
    }
}
