//! Turns a frozen memtable into a tier-0 SSTable.

use std::sync::Arc;

use crate::error::Result;
use crate::memtable::Memtable;
use crate::record::EntryKind;
use crate::sstable::{Reader, Writer};

use super::{compaction, Shared};

/// Writes `memtable` out as a new SSTable in T0, registers a reader for it,
/// and drops the memtable from the frozen queue. All file I/O happens
/// without the engine lock; only the final registration takes it.
pub(crate) async fn flush_memtable(shared: Arc<Shared>, memtable: Arc<Memtable>) -> Result<()> {
    let entries = memtable.entries();
    let entry_count = entries.len();

    let tier_dir = shared.tier_dir(0);
    std::fs::create_dir_all(&tier_dir)?;

    let number = shared.next_table_number();
    let path = tier_dir.join(Shared::table_file_name(number));

    let mut writer = Writer::create(&path, shared.config.index_interval)?;
    for entry in entries {
        match entry.kind {
            EntryKind::Set => writer.put(&entry.key, &entry.value)?,
            EntryKind::Delete => writer.delete(&entry.key)?,
            // The memtable never stores index markers.
            EntryKind::Index => unreachable!("index entry in memtable"),
        }
    }
    writer.close()?;

    let reader = Arc::new(Reader::open(&path)?);

    let compact_needed = {
        let mut state = shared.state.write().unwrap();
        if state.tiers.is_empty() {
            state.tiers.push(Vec::new());
        }
        state.tiers[0].push(reader);

        if let Some(slot) = state
            .frozen
            .iter()
            .position(|m| Arc::ptr_eq(m, &memtable))
        {
            state.frozen.remove(slot);
        }

        state.tiers[0].len() > shared.config.max_tables_per_tier
    };

    tracing::info!(
        table = number,
        entries = entry_count,
        "flushed memtable to tier 0"
    );

    if compact_needed {
        let shared_for_task = Arc::clone(&shared);
        shared.tasks.spawn("compaction", async move {
            compaction::compact_tiers(shared_for_task, 0).await
        });
    }

    Ok(())
}
