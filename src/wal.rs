//! Write-ahead log: the durability backbone for writes that have not yet
//! reached an SSTable.
//!
//! Appends land in an in-memory buffer guarded by a mutex; a background
//! flusher drains the buffer to disk and fsyncs either when the buffer
//! crosses `flush_threshold` or when the flush timer fires. The window
//! between flushes bounds how much acknowledged data a crash can lose, and
//! is the deliberate durability/throughput tunable.
//!
//! The file is a plain concatenation of `Set` and `Delete` entries in the
//! shared codec, replayed front to back on recovery.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::record::Entry;

struct Inner {
    file: File,
    buffer: Vec<u8>,
    closed: bool,
}

pub struct Wal {
    path: PathBuf,
    flush_threshold: usize,
    inner: Arc<Mutex<Inner>>,
    flush_wanted: Arc<Notify>,
    shutdown_tx: broadcast::Sender<()>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal").field("path", &self.path).finish()
    }
}

impl Wal {
    /// Opens (or creates) the log at `path` in append mode and spawns the
    /// background flusher. Must be called from within a tokio runtime.
    pub fn open(
        path: impl Into<PathBuf>,
        flush_threshold: usize,
        flush_interval: Duration,
    ) -> Result<Self> {
        let path = path.into();
        let file = File::options().create(true).append(true).open(&path)?;

        let inner = Arc::new(Mutex::new(Inner {
            file,
            buffer: Vec::with_capacity(flush_threshold),
            closed: false,
        }));
        let flush_wanted = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let flusher = Self::spawn_flusher(
            Arc::clone(&inner),
            Arc::clone(&flush_wanted),
            shutdown_rx,
            flush_interval,
        );

        Ok(Self {
            path,
            flush_threshold,
            inner,
            flush_wanted,
            shutdown_tx,
            flusher: Mutex::new(Some(flusher)),
        })
    }

    fn spawn_flusher(
        inner: Arc<Mutex<Inner>>,
        flush_wanted: Arc<Notify>,
        mut shutdown_rx: broadcast::Receiver<()>,
        flush_interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);

            loop {
                tokio::select! {
                    _ = flush_wanted.notified() => {
                        if let Err(e) = flush_buffer(&inner) {
                            tracing::error!(error = %e, "wal flush failed, will retry");
                        }
                    }

                    _ = ticker.tick() => {
                        if let Err(e) = flush_buffer(&inner) {
                            tracing::error!(error = %e, "wal timer flush failed, will retry");
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffers a `Set` entry for `key`/`value`.
    pub fn append_set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.append(Entry::set(key.to_vec(), value.to_vec()))
    }

    /// Buffers a `Delete` tombstone for `key`.
    pub fn append_delete(&self, key: &[u8]) -> Result<()> {
        self.append(Entry::delete(key.to_vec()))
    }

    fn append(&self, entry: Entry) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(Error::Closed);
        }

        let encoded = entry.encode();
        inner.buffer.extend_from_slice(&encoded);

        // Wake the flusher without blocking the writer.
        if inner.buffer.len() >= self.flush_threshold {
            self.flush_wanted.notify_one();
        }
        Ok(())
    }

    /// Streams the log's on-disk entries from the start through an
    /// independent read handle. Buffered-but-unflushed appends are not
    /// visible; replay runs before any writes on a freshly opened store.
    pub fn replay(&self) -> Result<Replay> {
        Replay::open(&self.path)
    }

    /// Signals the flusher to stop, waits for it, drains the buffer with a
    /// final fsync, and marks the log closed. Idempotent: only the first
    /// call reports errors.
    pub async fn close(&self) -> Result<()> {
        let flusher = self.flusher.lock().unwrap().take();
        let Some(flusher) = flusher else {
            return Ok(());
        };

        let _ = self.shutdown_tx.send(());
        let joined = flusher.await;

        let drained = flush_buffer(&self.inner);
        self.inner.lock().unwrap().closed = true;
        joined?;
        drained
    }
}

/// Drains the buffered bytes to disk and fsyncs. A failed write leaves the
/// buffer in place so the next flush retries it.
fn flush_buffer(inner: &Mutex<Inner>) -> Result<()> {
    let mut inner = inner.lock().unwrap();
    if inner.buffer.is_empty() {
        return Ok(());
    }

    let buffer = std::mem::take(&mut inner.buffer);
    if let Err(e) = inner.file.write_all(&buffer).and_then(|_| inner.file.sync_all()) {
        inner.buffer = buffer;
        return Err(e.into());
    }
    Ok(())
}

/// Iterator over a WAL file's entries, in append order.
pub struct Replay {
    reader: BufReader<File>,
}

impl Replay {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }
}

impl Iterator for Replay {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        match Entry::read_from(&mut self.reader) {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
