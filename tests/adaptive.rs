// Adaptive control-plane properties: heat decay, snapshot publication,
// cache correctness, window tuning.

use std::sync::atomic::Ordering;

use starforth::heartbeat::LOOKUP_INFERENCE_REORG;
use starforth::heat;
use starforth::{Vm, VmConfig, VmError};

fn eager_vm() -> Vm {
    // A config that runs a heartbeat cycle on effectively every execution,
    // so tests do not wait on wall-clock cadence.
    Vm::new(VmConfig {
        heartbeat_check_frequency: 1,
        heartbeat_tick_ns: 0,
        inference_every: 1,
        initial_window: 64,
        min_window: 8,
        ..VmConfig::default()
    })
}

#[test]
fn snapshot_ticks_are_monotonic() {
    let mut vm = eager_vm();
    let mut last = 0;
    for i in 0..50 {
        vm.interpret(&format!("{i} DROP")).unwrap();
        if let Ok(snap) = vm.snapshot_read() {
            assert!(
                snap.published_tick >= last,
                "tick went backwards: {} < {last}",
                snap.published_tick
            );
            last = snap.published_tick;
        }
    }
    assert!(last > 0, "no snapshot was ever published");
}

#[test]
fn snapshot_carries_live_statistics() {
    let mut vm = eager_vm();
    vm.interpret(": BUSY 1 2 + DROP ;").unwrap();
    for _ in 0..64 {
        vm.interpret("BUSY").unwrap();
    }
    let snap = vm.snapshot_read().unwrap();
    assert!(snap.total_heat > 0);
    assert!(snap.window_width >= 8 && snap.window_width <= 64);
    assert!(snap.published_ns > 0);
}

#[test]
fn heat_decays_toward_zero_once_idle() {
    let mut vm = Vm::default();
    vm.interpret(": ONCE ; ONCE").unwrap();
    let idx = vm.find_word("ONCE").unwrap();
    let h0 = vm.dict.entry(idx).execution_heat;
    assert!(h0 > 0);
    let now = vm.now_ns();
    // Property 6 under a positive slope: non-increasing, limit zero.
    heat::apply_decay(vm.dict.entry_mut(idx), now + 1_000_000, 1);
    let h1 = vm.dict.entry(idx).execution_heat;
    assert!(h1 <= h0);
    heat::apply_decay(vm.dict.entry_mut(idx), now + 100_000_000_000, 1);
    assert_eq!(vm.dict.entry(idx).execution_heat, 0);
}

#[test]
fn cache_hit_agrees_with_chain_walk() {
    let mut vm = eager_vm();
    vm.interpret(": TARGET 7 ;").unwrap();
    for _ in 0..128 {
        vm.interpret("TARGET DROP").unwrap();
    }
    // However the lookup is served, it must match the raw chain walk.
    let via_strategy = vm.find_word("TARGET");
    let via_chain = vm.dict.find("TARGET");
    assert_eq!(via_strategy, via_chain);
    assert!(via_strategy.is_some());
}

#[test]
fn forget_never_leaves_a_stale_cache_hit() {
    let mut vm = eager_vm();
    vm.interpret(": VICTIM 1 ;").unwrap();
    for _ in 0..128 {
        vm.interpret("VICTIM DROP").unwrap();
    }
    vm.interpret("FORGET VICTIM").unwrap();
    assert_eq!(vm.find_word("VICTIM"), None);
    // Redefining gets the fresh entry, not a cached ghost.
    vm.interpret(": VICTIM 2 ; VICTIM").unwrap();
    assert_eq!(vm.data_stack(), &[2]);
}

#[test]
fn speculative_prefetch_learns_pairs() {
    let mut vm = eager_vm();
    vm.heartbeat
        .shared
        .lookup_strategy
        .store(LOOKUP_INFERENCE_REORG, Ordering::Relaxed);
    vm.interpret(": AA 1 ; : BB DROP ;").unwrap();
    for _ in 0..32 {
        vm.interpret("AA BB").unwrap();
    }
    assert!(vm.pipeline.prefetch_attempts > 0);
    assert!(
        vm.pipeline.prefetch_hits > 0,
        "AA -> BB should become a predicted transition"
    );
}

#[test]
fn window_width_stays_clamped_under_tuning() {
    let mut vm = eager_vm();
    for i in 0..200 {
        vm.interpret(&format!("{i} DROP")).unwrap();
    }
    let w = vm.window.effective_size();
    assert!((8..=64).contains(&w), "window {w} escaped its clamp");
    let mirrored = vm
        .heartbeat
        .shared
        .effective_window
        .load(Ordering::Relaxed) as usize;
    assert!((8..=64).contains(&mirrored));
}

#[test]
fn inference_engine_is_exercised() {
    let mut vm = eager_vm();
    for _ in 0..300 {
        vm.interpret("1 DROP").unwrap();
    }
    assert!(vm.heartbeat.inference_runs > 0);
}

#[test]
fn async_ticker_drives_cycles() {
    let mut vm = Vm::new(VmConfig {
        heartbeat_check_frequency: 1,
        heartbeat_tick_ns: 1_000_000,
        ..VmConfig::default()
    });
    vm.heartbeat_start();
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        vm.interpret("1 DROP").unwrap();
        if vm.snapshot_read().is_ok() {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "async heartbeat never published"
        );
    }
}

#[test]
fn snapshot_read_is_error_before_any_cycle() {
    let vm = Vm::default();
    assert_eq!(vm.snapshot_read(), Err(VmError::SnapshotUnavailable));
}

#[test]
fn halted_vm_refuses_cycles() {
    let mut vm = eager_vm();
    vm.halted = true;
    vm.tick();
    assert_eq!(vm.snapshot_read(), Err(VmError::SnapshotUnavailable));
}
