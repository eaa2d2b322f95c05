// Compile driver.
//
// Token classification for both modes, literal emission, the compile-time
// control-flow stack, and the anonymous-definition machinery that lets
// control structures run at top level: an opener seen while interpreting
// starts a hidden throwaway colon word, and the closer that drains the
// control-flow stack seals it, runs it once and rewinds HERE.

use tracing::{debug, warn};

use crate::config::{CELL_SIZE, CF_STACK_MAX};
use crate::dict::{WordBody, WordFlags};
use crate::error::VmError;
use crate::vm::{Cell, Mode, Vm, VmAddr};

/// Compile-time control-flow stack items. The payload is the arena offset of
/// an unresolved branch operand, or a back-target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfItem {
    /// Back-target for UNTIL/AGAIN/REPEAT.
    Begin(usize),
    /// IF's unresolved 0BRANCH operand.
    If(usize),
    /// ELSE's unresolved BRANCH operand.
    Else(usize),
    /// WHILE's unresolved 0BRANCH operand (above its BEGIN).
    While(usize),
    /// DO/?DO: loop-body start plus the leave-list watermark.
    Do { body: usize, leave_mark: usize },
}

impl Vm {
    // ----- emission -------------------------------------------------------

    /// Append one cell to the threaded body at HERE; returns its offset.
    /// On a full dictionary the flag is set and the returned offset is out
    /// of range, so a later patch faults instead of corrupting low memory.
    pub(crate) fn emit_cell(&mut self, v: Cell) -> usize {
        self.align_here();
        match self.allot(CELL_SIZE) {
            Ok(addr) => {
                self.store_cell(addr, v);
                addr as usize
            }
            Err(_) => usize::MAX - CELL_SIZE,
        }
    }

    /// Compile a reference to a dictionary entry.
    pub(crate) fn compile_ref(&mut self, idx: usize) {
        self.emit_cell(idx as Cell);
    }

    /// Compile `(LIT) n`.
    pub(crate) fn compile_literal(&mut self, n: Cell) {
        let lit = self.markers.lit;
        self.compile_ref(lit);
        self.emit_cell(n);
    }

    /// Compile an inline counted string: a count cell followed by the bytes,
    /// padded out to a cell boundary.
    pub(crate) fn compile_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        self.emit_cell(bytes.len() as Cell);
        let padded = (bytes.len() + CELL_SIZE - 1) & !(CELL_SIZE - 1);
        if let Ok(addr) = self.allot(padded.max(CELL_SIZE)) {
            if let Some(dst) = self.bytes_mut(addr, bytes.len()) {
                dst.copy_from_slice(bytes);
            }
        }
    }

    /// Read an inline string at `ip` (as compiled above). Returns the text
    /// and the byte length to skip.
    pub(crate) fn read_inline_string(&mut self, ip: VmAddr) -> (String, Cell) {
        let count = self.load_cell(ip).max(0) as usize;
        let padded = ((count + CELL_SIZE - 1) & !(CELL_SIZE - 1)).max(CELL_SIZE);
        let text = self
            .bytes(ip + CELL_SIZE as VmAddr, count)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        (text, (CELL_SIZE + padded) as Cell)
    }

    // ----- control-flow stack --------------------------------------------

    pub(crate) fn cf_push(&mut self, item: CfItem) {
        if self.cf_stack.len() >= CF_STACK_MAX {
            self.fail(VmError::ControlFlowMismatch);
            return;
        }
        self.cf_stack.push(item);
    }

    pub(crate) fn cf_pop(&mut self) -> Option<CfItem> {
        let item = self.cf_stack.pop();
        if item.is_none() {
            self.fail(VmError::ControlFlowMismatch);
        }
        item
    }

    /// Patch a forward-branch operand to land at HERE.
    pub(crate) fn patch_forward(&mut self, operand: usize) {
        let off = self.here() as Cell - operand as Cell;
        self.store_cell(operand as VmAddr, off);
    }

    // ----- interpret-mode control flow -----------------------------------

    /// Called by control-structure openers: make sure there is a body to
    /// compile into, starting an anonymous one if the user is at top level.
    pub(crate) fn ensure_compiling(&mut self) {
        if self.mode == Mode::Compile {
            return;
        }
        self.align_here();
        match self.define_entry("(ANON)", WordBody::Colon(self.here() as VmAddr)) {
            Ok(idx) => {
                self.dict
                    .entry_mut(idx)
                    .flags
                    .insert(WordFlags::HIDDEN | WordFlags::COMPILED);
                self.compiling_word = Some(idx);
                self.temp_compile = true;
                self.mode = Mode::Compile;
                debug!("anonymous compilation started");
            }
            Err(_) => {}
        }
    }

    /// After an immediate word ran in compile mode: if this was an anonymous
    /// body and the control flow just balanced, seal it, run it, discard it.
    pub(crate) fn finish_temp_if_balanced(&mut self) {
        if !self.temp_compile || self.mode != Mode::Compile || !self.cf_stack.is_empty() {
            return;
        }
        if self.error.is_some() {
            return;
        }
        let Some(idx) = self.compiling_word.take() else {
            self.temp_compile = false;
            return;
        };
        let exit = self.markers.exit;
        self.compile_ref(exit);
        self.temp_compile = false;
        self.mode = Mode::Interpret;
        debug!("anonymous compilation sealed; executing");
        self.execute_entry(idx);
        // The body is throwaway: drop the entry and rewind HERE whether or
        // not execution faulted.
        if self.dict.latest() == Some(idx) {
            if let Some(mark) = self.dict.retract_latest() {
                self.rewind_here(mark);
            }
            self.hotwords.invalidate();
        }
    }

    // ----- token classification ------------------------------------------

    /// One token through the compile/interpret state machine.
    pub(crate) fn interpret_token(&mut self, token: &str) {
        match self.mode {
            Mode::Compile => self.compile_token(token),
            Mode::Interpret => {
                if let Some(idx) = self.find_word(token) {
                    self.execute_entry(idx);
                } else if let Some(n) = self.parse_number(token) {
                    self.push(n);
                } else {
                    warn!(token, "unknown word");
                    self.fail(VmError::UnknownWord);
                }
            }
        }
    }

    fn compile_token(&mut self, token: &str) {
        if let Some(idx) = self.find_word(token) {
            if self.dict.entry(idx).flags.contains(WordFlags::IMMEDIATE) {
                self.execute_entry(idx);
                self.finish_temp_if_balanced();
            } else {
                self.compile_ref(idx);
            }
        } else if let Some(n) = self.parse_number(token) {
            self.compile_literal(n);
        } else {
            warn!(token, "unknown word while compiling");
            self.fail(VmError::UnknownWord);
        }
    }
}
