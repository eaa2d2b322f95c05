// Heartbeat: the time-driven tuning dispatcher.
//
// Two embodiments behind one surface. Synchronous: the interpreter calls
// `tick()` every N word executions and a cycle runs when the tick interval
// has elapsed. Asynchronous: a ticker thread marks cycles due on the shared
// state at a fixed interval and the interpreter drains them at its next
// check point; observers on any thread read published snapshots lock-free.
//
// The heartbeat is the only writer of published snapshots. Publication is a
// release store of the slot index after the inactive slot is fully written;
// readers acquire-load the index and then read that slot. Knobs (decay
// slope, effective window, lookup strategy) are plain atomics read lock-free
// on the hot path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::config::VmConfig;
use crate::error::VmError;
use crate::heat;
use crate::inference::{self, CycleSample, InferenceOutputs, SAMPLE_HISTORY};
use crate::q48::Q48;
use crate::vm::Vm;

pub const LOOKUP_NAIVE: u8 = 0;
pub const LOOKUP_HEAT_AWARE: u8 = 1;
pub const LOOKUP_INFERENCE_REORG: u8 = 2;

const NO_SNAPSHOT: u32 = u32::MAX;

/// Read-only consistent view of heartbeat state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatSnapshot {
    pub published_tick: u64,
    pub published_ns: u64,
    pub window_width: u32,
    pub decay_slope_q48: u64,
    pub hot_word_count: u64,
    pub stale_word_count: u64,
    pub total_heat: u64,
}

#[derive(Default)]
struct SnapshotSlot {
    published_tick: AtomicU64,
    published_ns: AtomicU64,
    window_width: AtomicU64,
    decay_slope_q48: AtomicU64,
    hot_word_count: AtomicU64,
    stale_word_count: AtomicU64,
    total_heat: AtomicU64,
}

impl SnapshotSlot {
    fn store(&self, s: &HeartbeatSnapshot) {
        self.published_tick.store(s.published_tick, Ordering::Relaxed);
        self.published_ns.store(s.published_ns, Ordering::Relaxed);
        self.window_width.store(s.window_width as u64, Ordering::Relaxed);
        self.decay_slope_q48.store(s.decay_slope_q48, Ordering::Relaxed);
        self.hot_word_count.store(s.hot_word_count, Ordering::Relaxed);
        self.stale_word_count.store(s.stale_word_count, Ordering::Relaxed);
        self.total_heat.store(s.total_heat, Ordering::Relaxed);
    }

    fn load(&self) -> HeartbeatSnapshot {
        HeartbeatSnapshot {
            published_tick: self.published_tick.load(Ordering::Relaxed),
            published_ns: self.published_ns.load(Ordering::Relaxed),
            window_width: self.window_width.load(Ordering::Relaxed) as u32,
            decay_slope_q48: self.decay_slope_q48.load(Ordering::Relaxed),
            hot_word_count: self.hot_word_count.load(Ordering::Relaxed),
            stale_word_count: self.stale_word_count.load(Ordering::Relaxed),
            total_heat: self.total_heat.load(Ordering::Relaxed),
        }
    }
}

/// The lock-free plane shared between the interpreter, the ticker worker and
/// any observer threads.
pub struct SharedState {
    slots: [SnapshotSlot; 2],
    published: AtomicU32,
    /// Q48.16 heat per nanosecond; the decay path reads this every touch.
    pub decay_slope_q48: AtomicU64,
    /// Effective rolling-window width, mirrored for observers.
    pub effective_window: AtomicU32,
    /// 0 = naive, 1 = heat-aware, 2 = inference-reorg.
    pub lookup_strategy: AtomicU8,
    /// Set by the ticker worker; consumed by `tick()`.
    pub tick_due: AtomicBool,
    /// Shutdown request observed by the worker at the top of each interval.
    pub stop: AtomicBool,
}

impl SharedState {
    fn new(cfg: &VmConfig) -> SharedState {
        SharedState {
            slots: [SnapshotSlot::default(), SnapshotSlot::default()],
            published: AtomicU32::new(NO_SNAPSHOT),
            decay_slope_q48: AtomicU64::new(cfg.decay_slope_q48),
            effective_window: AtomicU32::new(cfg.initial_window as u32),
            lookup_strategy: AtomicU8::new(LOOKUP_NAIVE),
            tick_due: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        }
    }

    /// Writer side: fill the inactive slot, then flip the index.
    pub fn publish(&self, s: &HeartbeatSnapshot) {
        let cur = self.published.load(Ordering::Acquire);
        let next = if cur == 0 { 1 } else { 0 };
        self.slots[next as usize].store(s);
        self.published.store(next, Ordering::Release);
    }

    /// Reader side; never blocks.
    pub fn read(&self) -> Result<HeartbeatSnapshot, VmError> {
        let idx = self.published.load(Ordering::Acquire);
        if idx == NO_SNAPSHOT {
            return Err(VmError::SnapshotUnavailable);
        }
        Ok(self.slots[idx as usize].load())
    }
}

pub struct Heartbeat {
    pub shared: Arc<SharedState>,
    pub enabled: bool,
    pub tick_count: u64,
    pub last_inference_tick: u64,
    pub tick_target_ns: u64,
    pub inference_every: u64,
    pub last_cycle_ns: u64,
    /// Counter toward the next `tick()` check.
    pub check_counter: u32,

    // Observation counters.
    pub inference_runs: u64,
    pub early_exits: u64,
    pub words_executed: u64,
    pub dictionary_lookups: u64,

    pub history: VecDeque<CycleSample>,
    pub last_outputs: InferenceOutputs,
    worker: Option<thread::JoinHandle<()>>,
}

impl Heartbeat {
    pub fn new(cfg: &VmConfig) -> Heartbeat {
        Heartbeat {
            shared: Arc::new(SharedState::new(cfg)),
            enabled: true,
            tick_count: 0,
            last_inference_tick: 0,
            tick_target_ns: cfg.heartbeat_tick_ns,
            inference_every: cfg.inference_every.max(1),
            last_cycle_ns: 0,
            check_counter: 0,
            inference_runs: 0,
            early_exits: 0,
            words_executed: 0,
            dictionary_lookups: 0,
            history: VecDeque::with_capacity(SAMPLE_HISTORY),
            last_outputs: InferenceOutputs::default(),
            worker: None,
        }
    }

    /// Spawn the interval ticker. Idempotent.
    pub fn start_worker(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let interval = Duration::from_nanos(self.tick_target_ns.max(1));
        self.worker = Some(thread::spawn(move || {
            info!("heartbeat worker started");
            loop {
                thread::sleep(interval);
                if shared.stop.load(Ordering::Acquire) {
                    break;
                }
                shared.tick_due.store(true, Ordering::Release);
            }
            info!("heartbeat worker stopped");
        }));
    }

    pub fn stop_worker(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Vm {
    /// Synchronous heartbeat entry point. Cheap unless a cycle is due.
    pub fn tick(&mut self) {
        if !self.heartbeat.enabled || self.halted {
            return;
        }
        let now = self.now_ns();
        let due = self.heartbeat.shared.tick_due.swap(false, Ordering::AcqRel);
        if !due && now.saturating_sub(self.heartbeat.last_cycle_ns) < self.heartbeat.tick_target_ns
        {
            return;
        }
        self.run_heartbeat_cycle(now);
    }

    /// Called by the inner interpreter after each word execution.
    #[inline]
    pub(crate) fn heartbeat_checkpoint(&mut self) {
        self.heartbeat.check_counter += 1;
        if self.heartbeat.check_counter >= self.cfg.heartbeat_check_frequency {
            self.heartbeat.check_counter = 0;
            self.tick();
        }
    }

    fn run_heartbeat_cycle(&mut self, now: u64) {
        // 1. Snapshot capture and publication.
        self.window.capture_snapshot();
        let sample = self.window.published_sample();
        let variance = inference::window_heat_variance(&sample, &self.dict);

        let hot_floor = self.heat_thresholds.p75.max(self.cfg.demotion_threshold);
        let stale_ceiling = self.heat_thresholds.p25;
        let mut total_heat: u128 = 0;
        let mut hot = 0u64;
        let mut stale = 0u64;
        for e in self.dict.entries() {
            let h = e.execution_heat.max(0) as u128;
            total_heat += h;
            if e.execution_heat >= hot_floor && h > 0 {
                hot += 1;
            } else if e.execution_heat <= stale_ceiling {
                stale += 1;
            }
        }
        let total_heat = total_heat.min(u64::MAX as u128) as u64;

        self.heartbeat.tick_count += 1;
        let snap = HeartbeatSnapshot {
            published_tick: self.heartbeat.tick_count,
            published_ns: now,
            window_width: self.window.effective_size() as u32,
            decay_slope_q48: self
                .heartbeat
                .shared
                .decay_slope_q48
                .load(Ordering::Relaxed),
            hot_word_count: hot,
            stale_word_count: stale,
            total_heat,
        };
        self.heartbeat.shared.publish(&snap);
        self.heartbeat.last_cycle_ns = now;
        trace!(tick = snap.published_tick, total_heat, "heartbeat cycle");

        if self.heartbeat.history.len() == SAMPLE_HISTORY {
            self.heartbeat.history.pop_front();
        }
        self.heartbeat.history.push_back(CycleSample {
            ns: now,
            total_heat_q48: total_heat,
            heat_variance_q48: variance.0,
        });

        if self.heartbeat.tick_count - self.heartbeat.last_inference_tick
            < self.heartbeat.inference_every
        {
            return;
        }
        self.heartbeat.last_inference_tick = self.heartbeat.tick_count;
        self.run_inference();
    }

    fn run_inference(&mut self) {
        self.heartbeat.inference_runs += 1;
        let mut outputs = InferenceOutputs::default();

        // 2. ANOVA early-exit: steady variance means the knobs are fine.
        if inference::variance_stable(&self.heartbeat.history, self.cfg.anova_tolerance_q48) {
            self.heartbeat.early_exits += 1;
            outputs.variance_stable = true;
            self.heartbeat.last_outputs = outputs;
            return;
        }

        // 3. Window-width tuning via prefetch accuracy.
        let suggestion = inference::tune_window(
            &mut self.pipeline,
            self.window.effective_size(),
            self.cfg.min_window,
            self.window.capacity(),
        );
        self.window.set_effective_size(suggestion);
        let effective = self.window.effective_size();
        self.heartbeat
            .shared
            .effective_window
            .store(effective as u32, Ordering::Relaxed);
        outputs.window_suggestion = Some(effective);

        // 4. Decay-slope inference with a trust gate.
        let live = self.dict.len().max(1) as u64;
        let mean_heat = self
            .heartbeat
            .history
            .back()
            .map(|s| s.total_heat_q48 / live)
            .unwrap_or(0);
        if let Some((slope, confidence)) =
            inference::infer_decay_slope(&self.heartbeat.history, mean_heat)
        {
            outputs.fit_confidence_q48 = confidence;
            if confidence.0 >= self.cfg.slope_trust_floor_q48 {
                self.heartbeat
                    .shared
                    .decay_slope_q48
                    .store(slope, Ordering::Relaxed);
                outputs.fitted_slope_q48 = Some(slope);
                debug!(slope, confidence = %confidence, "decay slope retuned");
            } else {
                debug!(confidence = %Q48(confidence.0), "slope fit below trust floor; frozen");
            }
        }

        // 5. Cache reorganization against fresh percentiles, computed from
        // the published window snapshot.
        let sample = self.window.published_sample();
        let thresholds = if sample.is_empty() {
            heat::percentiles(self.dict.entries())
        } else {
            heat::window_percentiles(&self.dict, &sample)
        };
        self.heat_thresholds = thresholds;
        let (cold, total) = self.hotwords.cold_residents(&self.dict, thresholds.p75);
        if total == 0 || cold * 2 >= total {
            outputs.rebuild_cache = true;
            self.hotwords
                .rebuild(&self.dict, thresholds, self.cfg.demotion_threshold);
        }

        // Raise the lookup strategy once the window carries representative
        // data.
        let strategy = if self.window.is_warm() {
            LOOKUP_INFERENCE_REORG
        } else {
            LOOKUP_HEAT_AWARE
        };
        self.heartbeat
            .shared
            .lookup_strategy
            .store(strategy, Ordering::Relaxed);

        self.heartbeat.last_outputs = outputs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_and_read_round_trip() {
        let shared = SharedState::new(&VmConfig::default());
        assert_eq!(shared.read(), Err(VmError::SnapshotUnavailable));
        let snap = HeartbeatSnapshot {
            published_tick: 7,
            published_ns: 1_234,
            window_width: 4096,
            decay_slope_q48: 1,
            hot_word_count: 3,
            stale_word_count: 9,
            total_heat: 1 << 20,
        };
        shared.publish(&snap);
        assert_eq!(shared.read().unwrap(), snap);
    }

    #[test]
    fn publication_alternates_slots() {
        let shared = SharedState::new(&VmConfig::default());
        for tick in 1..=4u64 {
            let snap = HeartbeatSnapshot {
                published_tick: tick,
                ..HeartbeatSnapshot::default()
            };
            shared.publish(&snap);
            assert_eq!(shared.read().unwrap().published_tick, tick);
        }
    }

    #[test]
    fn ticker_worker_marks_due_and_stops() {
        let mut hb = Heartbeat::new(&VmConfig {
            heartbeat_tick_ns: 1_000_000,
            ..VmConfig::default()
        });
        hb.start_worker();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !hb.shared.tick_due.load(Ordering::Acquire) {
            assert!(std::time::Instant::now() < deadline, "worker never ticked");
            thread::sleep(Duration::from_millis(1));
        }
        hb.stop_worker();
    }

    #[test]
    fn snapshot_reads_from_second_thread() {
        let shared = Arc::new(SharedState::new(&VmConfig::default()));
        shared.publish(&HeartbeatSnapshot {
            published_tick: 1,
            ..Default::default()
        });
        let s2 = Arc::clone(&shared);
        let handle = thread::spawn(move || s2.read().map(|s| s.published_tick));
        assert_eq!(handle.join().unwrap(), Ok(1));
    }
}
