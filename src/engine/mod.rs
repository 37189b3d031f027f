//! The storage engine: coordinates the WAL, memtables, SSTable tiers, and
//! background maintenance.
//!
//! # Write Path
//! 1. Append to the WAL (buffered, fsynced by the WAL's flusher)
//! 2. Insert into the active memtable
//! 3. Once the memtable outgrows its budget, freeze it and flush it to a
//!    tier-0 SSTable in the background
//!
//! # Read Path
//! Active memtable, then frozen memtables newest first, then the tiers from
//! T0 upward (newest table first within a tier). The first entry found wins;
//! a tombstone ends the search as not-found.
//!
//! # Background Work
//! Flushes may run concurrently (each owns its frozen memtable and output
//! file); compaction is single-flight. Background tasks take the engine lock
//! only to publish results, never while doing I/O.

mod compaction;
mod flush;
mod tasks;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::memtable::Memtable;
use crate::record::{Entry, EntryKind};
use crate::sstable::Reader;
use crate::wal::Wal;

use tasks::TaskPool;

const WAL_FILE: &str = "wal.log";
const SSTABLE_DIR: &str = "sstables";

/// Mutable engine state guarded by the engine lock.
struct State {
    memtable: Arc<Memtable>,
    /// Frozen memtables awaiting flush, oldest first.
    frozen: VecDeque<Arc<Memtable>>,
    /// `tiers[0]` receives flushes; higher tiers receive compactions.
    /// Within a tier, later entries are newer.
    tiers: Vec<Vec<Arc<Reader>>>,
}

/// Everything background tasks need, shared behind an `Arc`.
pub(crate) struct Shared {
    data_dir: PathBuf,
    config: Config,
    wal: Wal,
    state: RwLock<State>,
    table_counter: AtomicU64,
    tasks: TaskPool,
    /// Serializes compactions; flushes stay concurrent.
    compaction_gate: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl Shared {
    /// Allocates the next SSTable file number. The counter was restored to
    /// the highest number on disk, so allocations continue past it.
    fn next_table_number(&self) -> u64 {
        self.table_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn tier_dir(&self, tier: usize) -> PathBuf {
        self.data_dir.join(SSTABLE_DIR).join(format!("T{tier}"))
    }

    fn table_file_name(number: u64) -> String {
        format!("{number:06}.sst")
    }
}

/// An embedded, persistent key-value store.
///
/// Must be opened and operated from within a tokio runtime: the WAL flusher
/// and flush/compaction work run as background tasks.
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Opens (or creates) a store under `data_dir`. Zero-valued config
    /// fields fall back to their defaults; `None` uses all defaults.
    ///
    /// Recovery order: replay the WAL into a fresh memtable, then load every
    /// readable SSTable from the tier directories. Unreadable tables (for
    /// example a partial file left by a crash mid-compaction) are skipped
    /// with a warning.
    pub fn open(data_dir: impl Into<PathBuf>, config: Option<Config>) -> Result<Self> {
        let data_dir = data_dir.into();
        let config = config.unwrap_or_default().normalized();

        std::fs::create_dir_all(&data_dir)?;

        let wal = Wal::open(
            data_dir.join(WAL_FILE),
            config.wal_flush_threshold,
            config.wal_flush_interval,
        )?;

        let memtable = Memtable::new();
        for entry in wal.replay()? {
            let entry = entry?;
            match entry.kind {
                EntryKind::Set => memtable.put(entry.key, entry.value),
                EntryKind::Delete => memtable.delete(&entry.key),
                EntryKind::Index => {
                    return Err(crate::errcorrupt!("index entry in wal"));
                }
            }
        }

        let (tiers, max_table_number) = load_tiers(&data_dir)?;

        tracing::info!(
            dir = %data_dir.display(),
            recovered_entries = memtable.len(),
            tiers = tiers.len(),
            "opened store"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                data_dir,
                config,
                wal,
                state: RwLock::new(State {
                    memtable: Arc::new(memtable),
                    frozen: VecDeque::new(),
                    tiers,
                }),
                table_counter: AtomicU64::new(max_table_number),
                tasks: TaskPool::new(),
                compaction_gate: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Inserts or updates `key`. The write is acknowledged once it sits in
    /// the WAL buffer and the memtable; durability follows within the WAL's
    /// flush window.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let mut state = self.shared.state.write().unwrap();
        self.shared.wal.append_set(key, value)?;
        state.memtable.put(key.to_vec(), value.to_vec());
        self.maybe_freeze(&mut state);
        Ok(())
    }

    /// Records a tombstone for `key`.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let mut state = self.shared.state.write().unwrap();
        self.shared.wal.append_delete(key)?;
        state.memtable.delete(key);
        self.maybe_freeze(&mut state);
        Ok(())
    }

    /// Freezes the active memtable once it outgrows the configured budget
    /// and hands it to a background flush.
    fn maybe_freeze(&self, state: &mut State) {
        if state.memtable.size() <= self.shared.config.max_memtable_size {
            return;
        }

        let frozen = std::mem::replace(&mut state.memtable, Arc::new(Memtable::new()));
        state.frozen.push_back(Arc::clone(&frozen));

        let shared = Arc::clone(&self.shared);
        self.shared.tasks.spawn("memtable-flush", async move {
            flush::flush_memtable(shared, frozen).await
        });
    }

    /// Looks up `key`, returning `None` when absent or deleted.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let state = self.shared.state.read().unwrap();

        if let Some(entry) = state.memtable.get(key) {
            return Ok(visible_value(entry));
        }

        for memtable in state.frozen.iter().rev() {
            if let Some(entry) = memtable.get(key) {
                return Ok(visible_value(entry));
            }
        }

        for tier in &state.tiers {
            for reader in tier.iter().rev() {
                if let Some(entry) = reader.get(key)? {
                    return Ok(visible_value(entry));
                }
            }
        }

        Ok(None)
    }

    /// Snapshot of the current tier layout (shared readers). Primarily for
    /// inspection and tests.
    pub fn tiers(&self) -> Vec<Vec<Arc<Reader>>> {
        self.shared.state.read().unwrap().tiers.clone()
    }

    /// Flushes all in-memory data, closes the WAL, and waits for background
    /// flushes and compactions to quiesce. Idempotent; only the first call
    /// reports errors. The WAL file is left in place: a later open replays
    /// it harmlessly into a memtable that is already covered by SSTables.
    pub async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut first_err: Option<Error> = None;

        // Freeze the active memtable (if non-empty) and flush every frozen
        // memtable synchronously. These flushes may enqueue compactions;
        // the join below waits those out.
        let pending: Vec<Arc<Memtable>> = {
            let mut state = self.shared.state.write().unwrap();
            if !state.memtable.is_empty() {
                let old = std::mem::replace(&mut state.memtable, Arc::new(Memtable::new()));
                state.frozen.push_back(old);
            }
            state.frozen.iter().cloned().collect()
        };
        for memtable in pending {
            let still_pending = {
                let state = self.shared.state.read().unwrap();
                state.frozen.iter().any(|m| Arc::ptr_eq(m, &memtable))
            };
            if !still_pending {
                continue;
            }
            if let Err(e) = flush::flush_memtable(Arc::clone(&self.shared), memtable).await {
                tracing::error!(error = %e, "failed to flush memtable during close");
                first_err.get_or_insert(e);
            }
        }

        // Release the tier readers. In-flight tasks hold their own handles.
        self.shared.state.write().unwrap().tiers.clear();

        if let Err(e) = self.shared.wal.close().await {
            tracing::error!(error = %e, "failed to close wal");
            first_err.get_or_insert(e);
        }

        if let Err(e) = self.shared.tasks.join_all().await {
            first_err.get_or_insert(e);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn visible_value(entry: Entry) -> Option<Vec<u8>> {
    if entry.is_deleted() {
        None
    } else {
        Some(entry.value)
    }
}

/// Scans `<data_dir>/sstables/T*/` into the tier vector and reports the
/// highest table file number seen (readable or not), so the counter resumes
/// past every file on disk.
fn load_tiers(data_dir: &Path) -> Result<(Vec<Vec<Arc<Reader>>>, u64)> {
    let root = data_dir.join(SSTABLE_DIR);
    let mut tiers: Vec<Vec<Arc<Reader>>> = Vec::new();
    let mut max_number = 0u64;

    let dir_entries = match std::fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((tiers, max_number)),
        Err(e) => return Err(e.into()),
    };

    for dir_entry in dir_entries {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type()?.is_dir() {
            continue;
        }

        let name = dir_entry.file_name().to_string_lossy().into_owned();
        let Some(tier_str) = name.strip_prefix('T') else {
            continue;
        };
        let tier: usize = tier_str
            .parse()
            .map_err(|_| crate::errcorrupt!("invalid tier directory name {name:?}"))?;

        while tiers.len() <= tier {
            tiers.push(Vec::new());
        }

        // File numbers are creation order; sorting restores newest-last.
        let mut table_paths: Vec<PathBuf> = std::fs::read_dir(dir_entry.path())?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|f| f.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "sst"))
            .collect();
        table_paths.sort();

        for path in table_paths {
            if let Some(number) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok())
            {
                max_number = max_number.max(number);
            }

            match Reader::open(&path) {
                Ok(reader) => tiers[tier].push(Arc::new(reader)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable table");
                }
            }
        }
    }

    Ok((tiers, max_number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    fn tiny_memtable_config() -> Config {
        // Freeze on every write so each operation lands in its own SSTable.
        Config::new().max_memtable_size(1)
    }

    async fn quiesce(engine: &Engine) {
        engine.shared.tasks.join_all().await.expect("quiesce");
    }

    #[tokio::test]
    async fn test_basic_set_get_delete() {
        let dir = TempDir::new().expect("temp dir");
        let engine = Engine::open(dir.path(), None).expect("open");

        engine.set(b"foo", b"bar").expect("set");
        engine.set(b"baz", b"qux").expect("set");

        assert_eq!(engine.get(b"foo").expect("get"), Some(b"bar".to_vec()));
        assert_eq!(engine.get(b"baz").expect("get"), Some(b"qux".to_vec()));

        engine.delete(b"foo").expect("delete");
        assert_eq!(engine.get(b"foo").expect("get"), None);
        assert_eq!(engine.get(b"baz").expect("get"), Some(b"qux".to_vec()));

        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_wal_replay_after_reopen() {
        let dir = TempDir::new().expect("temp dir");
        {
            let engine = Engine::open(dir.path(), None).expect("open");
            engine.set(b"a", b"1").expect("set");
            engine.set(b"b", b"2").expect("set");
            engine.delete(b"a").expect("delete");
            engine.close().await.expect("close");
        }

        let engine = Engine::open(dir.path(), None).expect("reopen");
        assert_eq!(engine.get(b"a").expect("get"), None);
        assert_eq!(engine.get(b"b").expect("get"), Some(b"2".to_vec()));
        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_wal_replay_mixed_tombstones() {
        let dir = TempDir::new().expect("temp dir");
        {
            let engine = Engine::open(dir.path(), None).expect("open");
            engine.set(b"a", b"1").expect("set");
            engine.set(b"b", b"2").expect("set");
            engine.delete(b"a").expect("delete");
            engine.set(b"c", b"3").expect("set");
            engine.delete(b"b").expect("delete");
            engine.close().await.expect("close");
        }

        let engine = Engine::open(dir.path(), None).expect("reopen");
        assert_eq!(engine.get(b"a").expect("get"), None);
        assert_eq!(engine.get(b"b").expect("get"), None);
        assert_eq!(engine.get(b"c").expect("get"), Some(b"3".to_vec()));
        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_forced_flush_writes_tombstone_table() {
        let dir = TempDir::new().expect("temp dir");
        let engine = Engine::open(dir.path(), Some(tiny_memtable_config())).expect("open");

        engine.set(b"deleted", b"some").expect("set");
        engine.delete(b"deleted").expect("delete");
        quiesce(&engine).await;

        assert_eq!(engine.get(b"deleted").expect("get"), None);
        assert!(dir
            .path()
            .join("sstables/T0/000001.sst")
            .exists());

        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_get_from_flushed_table() {
        let dir = TempDir::new().expect("temp dir");
        let engine = Engine::open(dir.path(), Some(tiny_memtable_config())).expect("open");

        engine.set(b"flushed_key", b"flushed_value").expect("set");
        quiesce(&engine).await;

        assert_eq!(
            engine.get(b"flushed_key").expect("get"),
            Some(b"flushed_value".to_vec())
        );

        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_counter_restoration() {
        let dir = TempDir::new().expect("temp dir");

        // Pre-seed T0 with gappy placeholder files; they are unreadable and
        // skipped, but their numbers still advance the counter.
        let t0 = dir.path().join("sstables/T0");
        std::fs::create_dir_all(&t0).expect("mkdir");
        for name in ["000001.sst", "000003.sst", "000005.sst"] {
            std::fs::write(t0.join(name), b"placeholder").expect("write");
        }

        let engine = Engine::open(dir.path(), Some(tiny_memtable_config())).expect("open");
        engine.set(b"k", b"v").expect("set");
        quiesce(&engine).await;

        assert!(t0.join("000006.sst").exists());
        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_latest_value_wins_within_tier() {
        let dir = TempDir::new().expect("temp dir");
        let engine = Engine::open(dir.path(), Some(tiny_memtable_config())).expect("open");

        engine.set(b"key0", b"val0").expect("set");
        quiesce(&engine).await;
        engine.set(b"key1", b"val1").expect("set");
        quiesce(&engine).await;
        engine.set(b"key0", b"new").expect("set");
        quiesce(&engine).await;

        assert_eq!(engine.get(b"key0").expect("get"), Some(b"new".to_vec()));
        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_compaction_collapses_duplicates() {
        let dir = TempDir::new().expect("temp dir");
        let config = tiny_memtable_config().max_tables_per_tier(1);
        let engine = Engine::open(dir.path(), Some(config)).expect("open");

        engine.set(b"a", b"old").expect("set");
        quiesce(&engine).await;
        engine.set(b"a", b"new").expect("set");
        quiesce(&engine).await;

        assert_eq!(engine.get(b"a").expect("get"), Some(b"new".to_vec()));

        let tiers = engine.tiers();
        assert!(tiers.len() >= 2, "expected a compacted tier");
        assert_eq!(tiers[1].len(), 1, "expected exactly one table in T1");
        let entry = tiers[1][0]
            .get(b"a")
            .expect("table get")
            .expect("key in compacted table");
        assert_eq!(entry.value, b"new");

        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_compaction_respects_deletes() {
        let dir = TempDir::new().expect("temp dir");
        let config = tiny_memtable_config().max_tables_per_tier(2);
        let engine = Engine::open(dir.path(), Some(config)).expect("open");

        engine.set(b"x", b"1").expect("set");
        quiesce(&engine).await;
        engine.delete(b"x").expect("delete");
        quiesce(&engine).await;
        engine.set(b"y", b"2").expect("set");
        quiesce(&engine).await;

        assert_eq!(engine.get(b"x").expect("get"), None);
        assert_eq!(engine.get(b"y").expect("get"), Some(b"2".to_vec()));

        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_compaction_deletes_input_files() {
        let dir = TempDir::new().expect("temp dir");
        let config = tiny_memtable_config().max_tables_per_tier(1);
        let engine = Engine::open(dir.path(), Some(config)).expect("open");

        engine.set(b"k0", b"v0").expect("set");
        quiesce(&engine).await;
        engine.set(b"k1", b"v1").expect("set");
        quiesce(&engine).await;

        // The two T0 inputs were merged into T1 and removed from disk.
        assert!(!dir.path().join("sstables/T0/000001.sst").exists());
        assert!(!dir.path().join("sstables/T0/000002.sst").exists());
        assert!(dir.path().join("sstables/T1/000003.sst").exists());

        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_multi_tier_promotion() {
        let dir = TempDir::new().expect("temp dir");
        let config = tiny_memtable_config().max_tables_per_tier(1);
        let engine = Engine::open(dir.path(), Some(config)).expect("open");

        for i in 0..5u8 {
            let key = format!("k{i}");
            let value = format!("v{i}");
            engine.set(key.as_bytes(), value.as_bytes()).expect("set");
            quiesce(&engine).await;
        }

        let tiers = engine.tiers();
        assert!(tiers.len() >= 3, "expected promotion to reach T2");
        assert!(!tiers[2].is_empty(), "expected a table in T2");
        for reader in &tiers[2] {
            assert!(reader.path().to_string_lossy().contains("T2"));
        }

        for i in 0..5u8 {
            let key = format!("k{i}");
            let value = format!("v{i}");
            assert_eq!(
                engine.get(key.as_bytes()).expect("get"),
                Some(value.into_bytes())
            );
        }

        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_close_reopen_preserves_tiered_data() {
        let dir = TempDir::new().expect("temp dir");
        {
            let config = tiny_memtable_config().max_tables_per_tier(1);
            let engine = Engine::open(dir.path(), Some(config)).expect("open");
            for i in 0..4u8 {
                engine
                    .set(format!("key{i}").as_bytes(), format!("value{i}").as_bytes())
                    .expect("set");
                quiesce(&engine).await;
            }
            engine.delete(b"key1").expect("delete");
            engine.close().await.expect("close");
        }

        let engine = Engine::open(dir.path(), None).expect("reopen");
        assert_eq!(engine.get(b"key0").expect("get"), Some(b"value0".to_vec()));
        assert_eq!(engine.get(b"key1").expect("get"), None);
        assert_eq!(engine.get(b"key2").expect("get"), Some(b"value2".to_vec()));
        assert_eq!(engine.get(b"key3").expect("get"), Some(b"value3".to_vec()));
        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_empty_value_is_present() {
        let dir = TempDir::new().expect("temp dir");
        let engine = Engine::open(dir.path(), None).expect("open");

        engine.set(b"empty", b"").expect("set");
        assert_eq!(engine.get(b"empty").expect("get"), Some(Vec::new()));

        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_nonexistent_key() {
        let dir = TempDir::new().expect("temp dir");
        let engine = Engine::open(dir.path(), Some(tiny_memtable_config())).expect("open");

        assert_eq!(engine.get(b"nonexistent").expect("get"), None);

        engine.set(b"existing", b"value").expect("set");
        quiesce(&engine).await;

        assert_eq!(engine.get(b"nonexistent").expect("get"), None);
        assert_eq!(
            engine.get(b"existing").expect("get"),
            Some(b"value".to_vec())
        );

        engine.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_operations_after_close_fail() {
        let dir = TempDir::new().expect("temp dir");
        let engine = Engine::open(dir.path(), None).expect("open");
        engine.close().await.expect("close");

        assert_eq!(engine.set(b"k", b"v"), Err(Error::Closed));
        assert_eq!(engine.delete(b"k"), Err(Error::Closed));
        assert_eq!(engine.get(b"k"), Err(Error::Closed));

        // Close stays idempotent.
        engine.close().await.expect("second close");
    }

    #[tokio::test]
    async fn test_large_values_roundtrip() {
        let dir = TempDir::new().expect("temp dir");
        let engine = Engine::open(dir.path(), None).expect("open");

        let key = vec![7u8; 10 * 1024];
        let value = vec![42u8; 100 * 1024];
        engine.set(&key, &value).expect("set");
        engine.close().await.expect("close");

        let engine = Engine::open(dir.path(), None).expect("reopen");
        assert_eq!(engine.get(&key).expect("get"), Some(value));
        engine.close().await.expect("close");
    }
}
