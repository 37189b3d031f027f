use std::time::Duration;

const DEFAULT_MAX_MEMTABLE_SIZE: usize = 4 * 1024 * 1024; // 4MB
const DEFAULT_MAX_TABLES_PER_TIER: usize = 4;
const DEFAULT_INDEX_INTERVAL: usize = 16;
const DEFAULT_WAL_FLUSH_THRESHOLD: usize = 64 * 1024; // 64KB
const DEFAULT_WAL_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Tunable parameters for the store's performance and durability tradeoffs.
///
/// Any field left at zero is replaced by its default when the engine opens,
/// so a partially filled config is always usable.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size in bytes at which the active memtable is frozen and flushed (default: 4MB)
    pub max_memtable_size: usize,

    /// Number of tables a tier may hold before it is compacted into the next
    /// tier; compaction triggers strictly above this count (default: 4)
    pub max_tables_per_tier: usize,

    /// Every Nth data entry of an SSTable gets a sparse index entry (default: 16)
    pub index_interval: usize,

    /// WAL buffer size in bytes above which a flush is forced (default: 64KB)
    pub wal_flush_threshold: usize,

    /// Period of the WAL's timer-driven flush (default: 10ms)
    pub wal_flush_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_memtable_size: DEFAULT_MAX_MEMTABLE_SIZE,
            max_tables_per_tier: DEFAULT_MAX_TABLES_PER_TIER,
            index_interval: DEFAULT_INDEX_INTERVAL,
            wal_flush_threshold: DEFAULT_WAL_FLUSH_THRESHOLD,
            wal_flush_interval: DEFAULT_WAL_FLUSH_INTERVAL,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memtable freeze threshold
    pub fn max_memtable_size(mut self, size: usize) -> Self {
        self.max_memtable_size = size;
        self
    }

    /// Set the per-tier table count threshold
    pub fn max_tables_per_tier(mut self, count: usize) -> Self {
        self.max_tables_per_tier = count;
        self
    }

    /// Set the sparse index stride
    pub fn index_interval(mut self, interval: usize) -> Self {
        self.index_interval = interval;
        self
    }

    /// Set the WAL flush threshold
    pub fn wal_flush_threshold(mut self, threshold: usize) -> Self {
        self.wal_flush_threshold = threshold;
        self
    }

    /// Set the WAL flush timer period
    pub fn wal_flush_interval(mut self, interval: Duration) -> Self {
        self.wal_flush_interval = interval;
        self
    }

    /// Returns a copy with every zero field replaced by its default.
    pub fn normalized(&self) -> Self {
        let def = Self::default();
        Self {
            max_memtable_size: if self.max_memtable_size == 0 {
                def.max_memtable_size
            } else {
                self.max_memtable_size
            },
            max_tables_per_tier: if self.max_tables_per_tier == 0 {
                def.max_tables_per_tier
            } else {
                self.max_tables_per_tier
            },
            index_interval: if self.index_interval == 0 {
                def.index_interval
            } else {
                self.index_interval
            },
            wal_flush_threshold: if self.wal_flush_threshold == 0 {
                def.wal_flush_threshold
            } else {
                self.wal_flush_threshold
            },
            wal_flush_interval: if self.wal_flush_interval.is_zero() {
                def.wal_flush_interval
            } else {
                self.wal_flush_interval
            },
        }
    }
}
