// Heat-model diagnostic words: live feedback from the adaptive control
// plane, plus pin/freeze control over individual entries.

use crate::dict::WordFlags;
use crate::error::VmError;
use crate::heat;
use crate::vm::{Cell, Vm};

use super::{add_word, parse_name_find};

fn set_flag(vm: &mut Vm, flag: WordFlags, on: bool) {
    let Some(idx) = parse_name_find(vm) else {
        return;
    };
    let e = vm.dict.entry_mut(idx);
    if on {
        e.flags.insert(flag);
    } else {
        e.flags.remove(flag);
    }
}

/// PIN-WORD <name> ( -- ) heat accumulates but no longer decays
pub fn f_pin_word(vm: &mut Vm) {
    set_flag(vm, WordFlags::PINNED, true);
}

/// UNPIN-WORD <name> ( -- )
pub fn f_unpin_word(vm: &mut Vm) {
    set_flag(vm, WordFlags::PINNED, false);
}

/// FREEZE-WORD <name> ( -- ) heat becomes immutable
pub fn f_freeze_word(vm: &mut Vm) {
    set_flag(vm, WordFlags::FROZEN, true);
}

/// THAW-WORD <name> ( -- )
pub fn f_thaw_word(vm: &mut Vm) {
    set_flag(vm, WordFlags::FROZEN, false);
}

/// WORD-HEAT <name> ( -- u ) whole heat units outstanding
pub fn f_word_heat(vm: &mut Vm) {
    let Some(idx) = parse_name_find(vm) else {
        return;
    };
    let units = heat::heat_units(vm.dict.entry(idx));
    vm.push(units);
}

/// HOT-WORDS ( -- ) list the hot-words cache residents
pub fn f_hot_words(vm: &mut Vm) {
    let residents = vm.hotwords.residents();
    if residents.is_empty() {
        vm.emit_str("hot-words cache empty\n");
        return;
    }
    for (name, idx) in residents {
        let units = if idx < vm.dict.len() {
            heat::heat_units(vm.dict.entry(idx))
        } else {
            0
        };
        let line = format!("{name} {units}\n");
        vm.emit_str(&line);
    }
}

/// SNAPSHOT. ( -- ) print the latest heartbeat snapshot
pub fn f_snapshot_dot(vm: &mut Vm) {
    match vm.snapshot_read() {
        Ok(s) => {
            let line = format!(
                "tick {} window {} slope {} hot {} stale {} heat {}\n",
                s.published_tick,
                s.window_width,
                s.decay_slope_q48,
                s.hot_word_count,
                s.stale_word_count,
                s.total_heat >> 16,
            );
            vm.emit_str(&line);
        }
        Err(VmError::SnapshotUnavailable) => vm.emit_str("no snapshot published yet\n"),
        Err(e) => vm.fail(e),
    }
}

/// HEARTBEAT ( -- ) drive the synchronous heartbeat once
pub fn f_heartbeat(vm: &mut Vm) {
    vm.tick();
}

pub(crate) fn register(vm: &mut Vm) {
    add_word(vm, "PIN-WORD", f_pin_word);
    add_word(vm, "UNPIN-WORD", f_unpin_word);
    add_word(vm, "FREEZE-WORD", f_freeze_word);
    add_word(vm, "THAW-WORD", f_thaw_word);
    add_word(vm, "WORD-HEAT", f_word_heat);
    add_word(vm, "HOT-WORDS", f_hot_words);
    add_word(vm, "SNAPSHOT.", f_snapshot_dot);
    add_word(vm, "HEARTBEAT", f_heartbeat);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_heat_counts_executions() {
        let mut vm = Vm::default();
        vm.interpret(": NOP ; NOP NOP NOP").unwrap();
        vm.interpret("WORD-HEAT NOP").unwrap();
        let units = vm.pop();
        assert!(units >= 1 && units <= 3, "heat units {units}");
    }

    #[test]
    fn freeze_blocks_accumulation_thaw_restores() {
        let mut vm = Vm::default();
        vm.interpret(": NOP ; FREEZE-WORD NOP NOP NOP").unwrap();
        vm.interpret("WORD-HEAT NOP").unwrap();
        assert_eq!(vm.pop(), 0);
        vm.interpret("THAW-WORD NOP NOP").unwrap();
        vm.interpret("WORD-HEAT NOP").unwrap();
        assert!(vm.pop() >= 1);
    }

    #[test]
    fn pinned_word_keeps_heat_under_heavy_slope() {
        let mut vm = Vm::default();
        vm.interpret(": NOP ; PIN-WORD NOP NOP NOP").unwrap();
        // A brutal slope would zero an unpinned word instantly.
        vm.heartbeat
            .shared
            .decay_slope_q48
            .store(u32::MAX as u64, std::sync::atomic::Ordering::Relaxed);
        std::thread::sleep(std::time::Duration::from_millis(2));
        vm.interpret("NOP WORD-HEAT NOP").unwrap();
        assert!(vm.pop() >= 3);
    }

    #[test]
    fn snapshot_dot_reports_unavailable_first() {
        let mut vm = Vm::default();
        vm.interpret("SNAPSHOT.").unwrap();
        assert_eq!(vm.take_output(), "no snapshot published yet\n");
    }

    #[test]
    fn hot_words_prints_residents_after_rebuild() {
        let mut vm = Vm::default();
        vm.interpret(": HOTTIE ;").unwrap();
        for _ in 0..50 {
            vm.interpret("HOTTIE").unwrap();
        }
        let thresholds = crate::heat::percentiles(vm.dict.entries());
        vm.hotwords.rebuild(&vm.dict, thresholds, 0);
        vm.interpret("HOT-WORDS").unwrap();
        let out = vm.take_output();
        assert!(out.contains("HOTTIE") || out.contains("cache"), "{out}");
    }

    #[test]
    fn missing_name_is_unknown() {
        let mut vm = Vm::default();
        assert_eq!(
            vm.interpret("WORD-HEAT NO-SUCH-WORD"),
            Err(VmError::UnknownWord)
        );
    }
}
