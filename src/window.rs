// Rolling window of truth.
//
// A circular buffer of word-ids written by the interpreter on every
// execution, plus two pre-allocated snapshot buffers. The heartbeat copies
// the live buffer into the inactive snapshot slot and publishes it by
// flipping an index; readers only ever see a fully written slot. The buffer
// capacity never changes — adaptive tuning only moves the *effective* size,
// the portion sampled for statistics.

use tracing::trace;

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowMeta {
    pub write_pos: u64,
    pub total_executions: u64,
    pub effective_size: usize,
    pub warm: bool,
}

pub struct RollingWindow {
    history: Vec<u32>,
    write_pos: u64,
    total_executions: u64,
    effective_size: usize,
    min_size: usize,
    warm: bool,
    snapshot_pending: bool,
    snapshots: [Vec<u32>; 2],
    meta: [WindowMeta; 2],
    published: Option<usize>,
}

impl RollingWindow {
    pub fn new(capacity: usize, min_size: usize) -> RollingWindow {
        let capacity = capacity.max(1);
        RollingWindow {
            history: vec![0; capacity],
            write_pos: 0,
            total_executions: 0,
            effective_size: capacity,
            min_size: min_size.clamp(1, capacity),
            warm: false,
            snapshot_pending: false,
            snapshots: [vec![0; capacity], vec![0; capacity]],
            meta: [WindowMeta::default(); 2],
            published: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.history.len()
    }

    pub fn effective_size(&self) -> usize {
        self.effective_size
    }

    /// Clamp and store a new effective size; capacity is never exceeded.
    pub fn set_effective_size(&mut self, size: usize) {
        self.effective_size = size.clamp(self.min_size, self.capacity());
    }

    pub fn is_warm(&self) -> bool {
        self.warm
    }

    pub fn total_executions(&self) -> u64 {
        self.total_executions
    }

    pub fn snapshot_pending(&self) -> bool {
        self.snapshot_pending
    }

    /// Writer path: record one executed word-id. Never blocks, never
    /// allocates.
    #[inline]
    pub fn record(&mut self, word_id: u32) {
        let cap = self.history.len() as u64;
        self.history[(self.write_pos % cap) as usize] = word_id;
        self.write_pos += 1;
        self.total_executions += 1;
        if !self.warm && self.total_executions >= cap {
            self.warm = true;
            trace!(capacity = cap, "rolling window warm");
        }
        self.snapshot_pending = true;
    }

    /// Heartbeat path: copy the live buffer into the inactive slot and
    /// publish it.
    pub fn capture_snapshot(&mut self) -> usize {
        let slot = match self.published {
            Some(0) => 1,
            Some(_) => 0,
            None => 0,
        };
        self.snapshots[slot].copy_from_slice(&self.history);
        self.meta[slot] = WindowMeta {
            write_pos: self.write_pos,
            total_executions: self.total_executions,
            effective_size: self.effective_size,
            warm: self.warm,
        };
        self.published = Some(slot);
        self.snapshot_pending = false;
        slot
    }

    /// The published snapshot, if any.
    pub fn published(&self) -> Option<(&[u32], WindowMeta)> {
        self.published.map(|s| (self.snapshots[s].as_slice(), self.meta[s]))
    }

    /// The most recent `effective_size` ids from the published snapshot, in
    /// execution order.
    pub fn published_sample(&self) -> Vec<u32> {
        let Some((buf, meta)) = self.published() else {
            return Vec::new();
        };
        let cap = buf.len() as u64;
        let filled = meta.write_pos.min(cap);
        let take = (meta.effective_size as u64).min(filled);
        let mut out = Vec::with_capacity(take as usize);
        for i in (0..take).rev() {
            let pos = (meta.write_pos - 1 - i) % cap;
            out.push(buf[pos as usize]);
        }
        out
    }

    /// Distinct word-ids in a sample: the pattern-diversity statistic.
    pub fn pattern_diversity(sample: &[u32]) -> usize {
        let mut seen: Vec<u32> = sample.to_vec();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }
}
