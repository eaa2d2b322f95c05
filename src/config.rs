// Build-time configuration knobs.
//
// Everything here is fixed at `Vm::new` time; the runtime knobs the heartbeat
// mutates (decay slope, effective window, lookup strategy) live on the shared
// heartbeat state and are only *seeded* from these values.

use crate::vm::Cell;

/// Bytes per stack/arena cell.
pub const CELL_SIZE: usize = core::mem::size_of::<Cell>();

/// Longest accepted word name, counted in bytes.
pub const WORD_NAME_MAX: usize = 31;

/// Forth block granularity.
pub const BLOCK_SIZE: usize = 1024;

/// Depth of the compile-time control-flow stack.
pub const CF_STACK_MAX: usize = 64;

/// One execution's worth of heat, Q48.16.
pub const HEAT_UNIT: Cell = 1 << 16;

/// Decay is skipped entirely below this elapsed time.
pub const DECAY_MIN_INTERVAL_NS: u64 = 1_000;

/// Terminal input buffer capacity.
pub const INPUT_BUFFER_SIZE: usize = 256;

/// PAD scratch buffer capacity (WORD's counted-string target).
pub const PAD_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Total arena size in bytes.
    pub memory_size: usize,
    /// Low slice of the arena reserved for system cells, TIB/PAD and
    /// threaded-code bodies; the rest is block space.
    pub dictionary_size: usize,
    /// Depth of the data and return stacks, in cells.
    pub stack_depth: usize,
    /// Rolling-window capacity; also the upper clamp for adaptive sizing.
    pub initial_window: usize,
    /// Lower clamp for adaptive window sizing.
    pub min_window: usize,
    /// Hot-words cache slot count.
    pub hotwords_slots: usize,
    /// Residents below this heat are evicted on rebuild (Q48.16).
    pub demotion_threshold: Cell,
    /// Word executions between `tick()` checks.
    pub heartbeat_check_frequency: u32,
    /// Minimum elapsed time between heartbeat cycles.
    pub heartbeat_tick_ns: u64,
    /// Cycles between inference passes.
    pub inference_every: u64,
    /// Initial decay slope, Q48.16 heat per nanosecond.
    pub decay_slope_q48: u64,
    /// ANOVA relative tolerance band, Q48.16.
    pub anova_tolerance_q48: u64,
    /// Slope fits with confidence below this are discarded, Q48.16.
    pub slope_trust_floor_q48: u64,
}

impl Default for VmConfig {
    fn default() -> VmConfig {
        VmConfig {
            memory_size: 5 * 1024 * 1024,
            dictionary_size: 2 * 1024 * 1024,
            stack_depth: 1024,
            initial_window: 4096,
            min_window: 256,
            hotwords_slots: 256,
            demotion_threshold: 10 * HEAT_UNIT,
            heartbeat_check_frequency: 256,
            heartbeat_tick_ns: 1_000_000,
            inference_every: 4,
            decay_slope_q48: 1,
            anova_tolerance_q48: 0x4000,     // 0.25
            slope_trust_floor_q48: 0x8000,   // 0.5
        }
    }
}

impl VmConfig {
    /// Number of addressable blocks carried by the arena's block region.
    pub fn block_count(&self) -> usize {
        (self.memory_size - self.dictionary_size) / BLOCK_SIZE
    }

    /// Byte offset of the first block buffer.
    pub fn blocks_base(&self) -> usize {
        self.dictionary_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_consistent() {
        let cfg = VmConfig::default();
        assert!(cfg.dictionary_size < cfg.memory_size);
        assert_eq!(cfg.block_count(), 3072);
        assert!(cfg.min_window <= cfg.initial_window);
    }
}
