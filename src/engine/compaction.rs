//! Tiered compaction: when a tier holds more tables than allowed, all of its
//! tables are merged into a single table in the next tier.
//!
//! Compactions are single-flight (an async mutex serializes them), and all
//! merge I/O runs outside the engine lock. The lock is taken only to
//! snapshot inputs, to extend the tier vector, and for the final swap, so
//! readers observe either the old tier layout or the new one, never a mix.

use std::sync::Arc;

use crate::error::Result;
use crate::sstable::{Merger, Reader, Writer};

use super::Shared;

/// Compacts `tier` and cascades upward: promoting into tier N+1 can push it
/// over the threshold too.
pub(crate) async fn compact_tiers(shared: Arc<Shared>, start: usize) -> Result<()> {
    let _guard = shared.compaction_gate.lock().await;

    let mut tier = start;
    loop {
        let eligible = {
            let state = shared.state.read().unwrap();
            tier < state.tiers.len()
                && state.tiers[tier].len() > shared.config.max_tables_per_tier
        };
        if !eligible {
            return Ok(());
        }

        compact(&shared, tier)?;
        tier += 1;
    }
}

/// Merges every table of `tier` into one new table in `tier + 1`, swaps the
/// tier contents, then deletes the input files. On error the tier layout is
/// left untouched and the partial output is removed.
fn compact(shared: &Arc<Shared>, tier: usize) -> Result<()> {
    let inputs: Vec<Arc<Reader>> = {
        let state = shared.state.read().unwrap();
        match state.tiers.get(tier) {
            Some(tables) => tables.clone(),
            None => return Ok(()),
        }
    };
    if inputs.is_empty() {
        return Ok(());
    }

    {
        let mut state = shared.state.write().unwrap();
        while state.tiers.len() <= tier + 1 {
            state.tiers.push(Vec::new());
        }
    }

    let out_dir = shared.tier_dir(tier + 1);
    std::fs::create_dir_all(&out_dir)?;
    let number = shared.next_table_number();
    let out_path = out_dir.join(Shared::table_file_name(number));

    let result = (|| {
        let mut writer = Writer::create(&out_path, shared.config.index_interval)?;

        let mut merger = Merger::new();
        // Within a tier the vector runs oldest to newest, matching the
        // merger's priority convention.
        for input in &inputs {
            merger.add_source(input);
        }
        merger.set_output(&mut writer);
        merger.merge()?;
        writer.close()?;

        Reader::open(&out_path)
    })();

    let output = match result {
        Ok(reader) => Arc::new(reader),
        Err(e) => {
            if let Err(cleanup) = std::fs::remove_file(&out_path) {
                tracing::warn!(path = %out_path.display(), error = %cleanup, "failed to remove partial compaction output");
            }
            return Err(e);
        }
    };

    {
        let mut state = shared.state.write().unwrap();
        // The store may have dropped its tiers while the merge ran (close
        // clears them); abandon the output rather than registering it.
        if state.tiers.len() <= tier + 1 {
            drop(state);
            let _ = std::fs::remove_file(&out_path);
            return Ok(());
        }
        state.tiers[tier] = Vec::new();
        state.tiers[tier + 1].push(output);
    }

    for input in inputs {
        let path = input.path().to_path_buf();
        drop(input);
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete compacted input");
        }
    }

    tracing::info!(
        source_tier = tier,
        target_tier = tier + 1,
        output_table = number,
        "compacted tier"
    );

    Ok(())
}
