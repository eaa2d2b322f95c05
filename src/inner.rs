// Inner interpreter.
//
// Primitive dispatch is a direct function call. Colon bodies are threaded
// cells interpreted with the instruction pointer saved on top of the return
// stack, which is what lets branch and loop markers be ordinary primitives
// that mutate the saved IP. Every dispatch also feeds the adaptive plane:
// heat touch, window record, latency average.

use std::sync::atomic::Ordering;

use tracing::trace;

use crate::config::CELL_SIZE;
use crate::dict::WordBody;
use crate::error::VmError;
use crate::heat;
use crate::vm::{Cell, Vm, VmAddr};

impl Vm {
    /// Execute one dictionary entry by index.
    pub fn execute_entry(&mut self, idx: usize) {
        if self.error.is_some() || self.halted {
            return;
        }
        if idx >= self.dict.len() {
            self.fail(VmError::UnknownWord);
            return;
        }

        let now = self.now_ns();
        let slope = self
            .heartbeat
            .shared
            .decay_slope_q48
            .load(Ordering::Relaxed);
        let (word_id, body) = {
            let e = self.dict.entry_mut(idx);
            heat::touch(e, now, slope);
            (e.word_id, e.body)
        };
        self.window.record(word_id);
        self.heartbeat.words_executed += 1;

        let saved = self.current_entry.replace(idx);
        match body {
            WordBody::Primitive(func) => func(self),
            WordBody::Colon(addr) => self.execute_colon(addr),
            WordBody::Variable(addr) => self.push(addr as Cell),
            WordBody::Constant(v) => self.push(v),
        }
        self.current_entry = saved;

        // Rolling average latency, EWMA with 1/8 weight.
        if idx < self.dict.len() {
            let spent = (self.now_ns().saturating_sub(now)).min(u32::MAX as u64) as u32;
            let e = self.dict.entry_mut(idx);
            let avg = e.physics.avg_latency_ns;
            e.physics.avg_latency_ns = avg - avg / 8 + spent / 8;
        }

        self.heartbeat_checkpoint();
    }

    /// Interpret threaded cells starting at `body`.
    fn execute_colon(&mut self, body: VmAddr) {
        self.rpush(body as Cell);
        if self.error.is_some() {
            return;
        }
        self.colon_depth += 1;
        loop {
            if self.error.is_some()
                || self.halted
                || self.abort_requested
                || self.quit_requested
            {
                break;
            }
            let ip = self.rs_top();
            if ip < 0 {
                self.fail(VmError::AddressOutOfBounds);
                break;
            }
            let cell = self.load_cell(ip as VmAddr);
            if self.error.is_some() {
                break;
            }
            self.set_rs_top(ip + CELL_SIZE as Cell);
            if cell < 0 || cell as usize >= self.dict.len() {
                trace!(cell, ip, "threaded cell does not name an entry");
                self.fail(VmError::AddressOutOfBounds);
                break;
            }
            self.execute_entry(cell as usize);
            if self.exit_colon {
                self.exit_colon = false;
                break;
            }
        }
        self.colon_depth -= 1;
        // Drop the saved IP unless an unwind already cleared the stack.
        if self.rsp >= 0 && !self.abort_requested && !self.quit_requested {
            self.rpop();
        }
    }

    /// EXECUTE's backend: an execution token is a dictionary entry index.
    pub fn execute_token(&mut self, xt: Cell) {
        if xt < 0 || xt as usize >= self.dict.len() {
            self.fail(VmError::UnknownWord);
            return;
        }
        self.execute_entry(xt as usize);
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HEAT_UNIT;
    use crate::dict::WordFlags;

    #[test]
    fn primitive_dispatch_touches_heat() {
        let mut vm = Vm::default();
        let idx = vm.find_word("DUP").unwrap();
        vm.push(1);
        vm.execute_entry(idx);
        assert_eq!(vm.depth(), 2);
        assert!(vm.dict.entry(idx).execution_heat >= HEAT_UNIT / 2);
    }

    #[test]
    fn frozen_word_accumulates_nothing() {
        let mut vm = Vm::default();
        let idx = vm.find_word("DUP").unwrap();
        vm.dict.entry_mut(idx).flags.insert(WordFlags::FROZEN);
        vm.push(1);
        vm.execute_entry(idx);
        assert_eq!(vm.dict.entry(idx).execution_heat, 0);
    }

    #[test]
    fn execution_is_recorded_in_window() {
        let mut vm = Vm::default();
        let idx = vm.find_word("DUP").unwrap();
        let id = vm.dict.entry(idx).word_id;
        let before = vm.window.total_executions();
        vm.push(1);
        vm.execute_entry(idx);
        assert_eq!(vm.window.total_executions(), before + 1);
        vm.window.capture_snapshot();
        assert!(vm.window.published_sample().contains(&id));
    }

    #[test]
    fn execute_token_rejects_bad_indices() {
        let mut vm = Vm::default();
        vm.execute_token(-1);
        assert_eq!(vm.error, Some(VmError::UnknownWord));
        vm.error = None;
        vm.execute_token(vm.dict.len() as Cell);
        assert_eq!(vm.error, Some(VmError::UnknownWord));
    }
}
