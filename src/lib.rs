//! # ShaleDB
//!
//! An embedded, single-node, persistent key-value store organized as a
//! tiered Log-Structured Merge tree:
//! - Write-Ahead Logging with buffered, size- and timer-triggered fsync
//! - Skiplist memtables with frozen-snapshot handoff to background flushes
//! - Sorted on-disk tables with an in-memory sparse index
//! - Tiered compaction that collapses duplicate keys and preserves tombstones
//!
//! ## Architecture Overview
//!
//! ```text
//! set/delete ──► WAL (buffer + fsync) ──► Active Memtable (skiplist)
//!                                               │ freeze at size budget
//!                                               ▼
//!                                        Frozen Memtables
//!                                               │ background flush
//!                                               ▼
//!                                   T0: [sst] [sst] [sst] ...
//!                                               │ tiered compaction
//!                                               ▼
//!                                   T1: [sst]  ──►  T2: [sst] ...
//! ```
//!
//! Reads consult the active memtable, then frozen memtables newest first,
//! then the tiers from T0 upward; the first entry found for a key wins, and
//! a tombstone ends the search.

pub mod config;
pub mod engine;
pub mod error;
pub mod memtable;
pub mod record;
pub mod sstable;
pub mod wal;

#[cfg(test)]
pub(crate) mod tmpfs;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
