// Hot-words cache: a small direct-mapped accelerator in front of the full
// dictionary chain walk.
//
// The cache is advisory. A hit is verified against the live entry by word-id
// and name before it is trusted, so FORGET-recycled ids and stale slots fall
// through to the chain walk instead of corrupting lookups. Any structural
// dictionary mutation invalidates the whole table; the heartbeat rebuilds it
// on its next reorganization pass.

use tracing::{debug, trace};

use crate::dict::Dictionary;
use crate::heat::HeatThresholds;
use crate::vm::Cell;

#[derive(Clone)]
struct HotSlot {
    name: String,
    word_id: u32,
    entry_idx: u32,
}

pub struct HotwordsCache {
    slots: Vec<Option<HotSlot>>,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub rebuilds: u64,
}

fn hash_name(name: &str) -> u64 {
    // FNV-1a over the case-folded bytes.
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in name.bytes() {
        h ^= b.to_ascii_uppercase() as u64;
        h = h.wrapping_mul(0x1_0000_01b3);
    }
    h
}

impl HotwordsCache {
    pub fn new(slot_count: usize) -> HotwordsCache {
        HotwordsCache {
            slots: vec![None; slot_count.max(1)],
            hits: 0,
            misses: 0,
            insertions: 0,
            evictions: 0,
            rebuilds: 0,
        }
    }

    fn slot_of(&self, name: &str) -> usize {
        (hash_name(name) % self.slots.len() as u64) as usize
    }

    /// Verified lookup. Stale slots are evicted on sight.
    pub fn lookup(&mut self, dict: &Dictionary, name: &str) -> Option<usize> {
        let si = self.slot_of(name);
        let slot = match &self.slots[si] {
            Some(s) if s.name.eq_ignore_ascii_case(name) => s.clone(),
            _ => {
                self.misses += 1;
                return None;
            }
        };
        let idx = slot.entry_idx as usize;
        let live = idx < dict.len() && {
            let e = dict.entry(idx);
            e.word_id == slot.word_id && e.is_findable() && e.name.eq_ignore_ascii_case(name)
        };
        if live {
            self.hits += 1;
            trace!(name, idx, "hotwords: hit");
            Some(idx)
        } else {
            self.slots[si] = None;
            self.evictions += 1;
            self.misses += 1;
            None
        }
    }

    /// Consider a freshly looked-up entry for promotion. On a collision the
    /// colder resident loses.
    pub fn consider(&mut self, dict: &Dictionary, idx: usize, promote_threshold: Cell) {
        let e = dict.entry(idx);
        if e.execution_heat < promote_threshold || !e.is_findable() {
            return;
        }
        let si = self.slot_of(&e.name);
        if let Some(resident) = &self.slots[si] {
            if resident.word_id == e.word_id {
                return;
            }
            let ri = resident.entry_idx as usize;
            if ri < dict.len() && dict.entry(ri).execution_heat >= e.execution_heat {
                return;
            }
            self.evictions += 1;
        }
        self.slots[si] = Some(HotSlot {
            name: e.name.clone(),
            word_id: e.word_id,
            entry_idx: idx as u32,
        });
        self.insertions += 1;
        trace!(name = %e.name, "hotwords: promoted");
    }

    /// Wholesale invalidation, called on any dictionary structural mutation.
    pub fn invalidate(&mut self) {
        for s in &mut self.slots {
            *s = None;
        }
    }

    /// Fraction of residents colder than `cutoff`, as (cold, total).
    pub fn cold_residents(&self, dict: &Dictionary, cutoff: Cell) -> (usize, usize) {
        let mut cold = 0;
        let mut total = 0;
        for slot in self.slots.iter().flatten() {
            total += 1;
            let idx = slot.entry_idx as usize;
            if idx >= dict.len() || dict.entry(idx).execution_heat < cutoff {
                cold += 1;
            }
        }
        (cold, total)
    }

    pub fn resident_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Residents as (name, entry index) pairs, for diagnostics.
    pub fn residents(&self) -> Vec<(String, usize)> {
        self.slots
            .iter()
            .flatten()
            .map(|s| (s.name.clone(), s.entry_idx as usize))
            .collect()
    }

    /// Drop and repopulate from scratch: everything at or above the 75th
    /// percentile that also clears the demotion floor.
    pub fn rebuild(&mut self, dict: &Dictionary, thresholds: HeatThresholds, demotion: Cell) {
        self.invalidate();
        let floor = thresholds.p75.max(demotion);
        for idx in 0..dict.len() {
            let e = dict.entry(idx);
            if e.is_findable() && e.execution_heat >= floor {
                self.consider(dict, idx, floor);
            }
        }
        self.rebuilds += 1;
        debug!(residents = self.resident_count(), "hotwords: rebuilt");
    }
}
