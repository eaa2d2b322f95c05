// Execution-heat model.
//
// Heat is a Q48.16 counter per dictionary entry: +1.0 per execution, decayed
// lazily on touch by `slope * elapsed_ns`, saturating at zero. The slope is
// the single knob the inference engine owns. PINNED entries accumulate but
// never decay; FROZEN entries are immutable. Percentile thresholds are
// recomputed by the heartbeat, never on the hot path.

use crate::config::{DECAY_MIN_INTERVAL_NS, HEAT_UNIT};
use crate::dict::{DictEntry, WordFlags};
use crate::vm::Cell;

/// Heat thresholds over the live dictionary, Q48.16.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeatThresholds {
    pub p25: Cell,
    pub p50: Cell,
    pub p75: Cell,
}

/// Apply pending lazy decay to one entry.
pub fn apply_decay(entry: &mut DictEntry, now_ns: u64, slope_q48: u64) {
    if entry.flags.intersects(WordFlags::FROZEN | WordFlags::PINNED) {
        return;
    }
    if entry.physics.last_decay_ns == 0 {
        entry.physics.last_decay_ns = now_ns;
        return;
    }
    let elapsed = now_ns.saturating_sub(entry.physics.last_decay_ns);
    if elapsed < DECAY_MIN_INTERVAL_NS {
        return;
    }
    let loss = (slope_q48 as u128).saturating_mul(elapsed as u128);
    let loss = if loss > Cell::MAX as u128 {
        Cell::MAX
    } else {
        loss as Cell
    };
    entry.execution_heat = (entry.execution_heat - loss).max(0);
    entry.physics.last_decay_ns = now_ns;
}

/// Record one execution: decay what is owed, then add one unit of heat.
pub fn touch(entry: &mut DictEntry, now_ns: u64, slope_q48: u64) {
    if entry.flags.contains(WordFlags::FROZEN) {
        return;
    }
    apply_decay(entry, now_ns, slope_q48);
    entry.execution_heat = entry.execution_heat.saturating_add(HEAT_UNIT);
    entry.physics.last_active_ns = now_ns;
    if entry.physics.last_decay_ns == 0 {
        entry.physics.last_decay_ns = now_ns;
    }
}

/// Whole heat units (executions outstanding after decay).
pub fn heat_units(entry: &DictEntry) -> Cell {
    entry.execution_heat >> 16
}

fn percentiles_from(mut heats: Vec<Cell>) -> HeatThresholds {
    if heats.is_empty() {
        return HeatThresholds::default();
    }
    heats.sort_unstable();
    let pick = |pct: usize| heats[(heats.len() - 1) * pct / 100];
    HeatThresholds {
        p25: pick(25),
        p50: pick(50),
        p75: pick(75),
    }
}

/// 25th/50th/75th percentile heat over all entries.
pub fn percentiles(entries: &[DictEntry]) -> HeatThresholds {
    percentiles_from(entries.iter().map(|e| e.execution_heat).collect())
}

/// Percentiles over the distinct words a window snapshot observed; the
/// heartbeat prefers this view so cold, never-executed entries do not drag
/// the thresholds to zero.
pub fn window_percentiles(dict: &crate::dict::Dictionary, ids: &[u32]) -> HeatThresholds {
    let mut seen: Vec<u32> = ids.to_vec();
    seen.sort_unstable();
    seen.dedup();
    percentiles_from(
        seen.iter()
            .filter_map(|id| dict.by_word_id(*id))
            .map(|idx| dict.entry(idx).execution_heat)
            .collect(),
    )
}
