//! Sorted string tables: immutable on-disk key-value files optimized for
//! point lookups.
//!
//! # File Layout
//!
//! ```text
//! +----------------------------------------------+
//! | data: entries in strictly ascending key order |
//! +----------------------------------------------+
//! | sparse index: (Index entry, offset:u64)*      |
//! +----------------------------------------------+
//! | footer: index_offset:u64, index_size:u64      |
//! +----------------------------------------------+
//! ```
//!
//! Every `index_interval`-th data entry (starting with the first) gets a
//! sparse index entry pointing at its absolute file offset. A lookup binary
//! searches the in-memory index, then scans at most one inter-index block of
//! the data section. All integers are big-endian.

mod merger;
mod reader;
mod writer;

pub use merger::Merger;
pub use reader::{Reader, TableIter};
pub use writer::Writer;

/// Size in bytes of the trailing footer.
pub const FOOTER_SIZE: usize = 16;

/// One sparse index entry: the key of an indexed data entry and the absolute
/// file offset where that entry begins.
#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    pub key: Vec<u8>,
    pub offset: u64,
}
