// System and input-source words.

use crossterm::terminal;
use tracing::error;

use crate::error::VmError;
use crate::vm::{Cell, Vm};

use super::{add_immediate, add_word};

/// BYE ( -- ) halt the VM; the REPL exits
pub fn f_bye(vm: &mut Vm) {
    vm.halted = true;
}

/// BASE ( -- addr )
pub fn f_base(vm: &mut Vm) {
    let a = vm.base_addr as Cell;
    vm.push(a);
}

/// DECIMAL ( -- )
pub fn f_decimal(vm: &mut Vm) {
    vm.store_cell(vm.base_addr, 10);
}

/// HEX ( -- )
pub fn f_hex(vm: &mut Vm) {
    vm.store_cell(vm.base_addr, 16);
}

/// STATE ( -- addr ) compile-state cell (diagnostic mirror of the mode)
pub fn f_state(vm: &mut Vm) {
    let compiling = vm.mode == crate::vm::Mode::Compile;
    vm.store_cell(vm.state_addr, if compiling { -1 } else { 0 });
    let a = vm.state_addr as Cell;
    vm.push(a);
}

/// SOURCE ( -- addr n ) the terminal input buffer and its span
pub fn f_source(vm: &mut Vm) {
    let tib = vm.tib_addr as Cell;
    let span = vm.load_cell(vm.span_addr);
    vm.push(tib);
    vm.push(span);
}

/// >IN ( -- addr )
pub fn f_to_in(vm: &mut Vm) {
    let a = vm.in_addr as Cell;
    vm.push(a);
}

/// WORD ( c -- addr ) parse a c-delimited token to a counted string
pub fn f_word(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let delim = vm.pop() as u8;
    vm.parse_token(delim);
    let a = vm.word_addr as Cell;
    vm.push(a);
}

/// ( ( -- ) immediate comment to the closing paren
pub fn f_paren(vm: &mut Vm) {
    vm.parse_string(b')');
}

/// \ ( -- ) immediate comment to end of line
pub fn f_backslash(vm: &mut Vm) {
    let span = vm.load_cell(vm.span_addr);
    vm.store_cell(vm.in_addr, span);
}

/// RAW-MODE-ON ( -- )
pub fn f_raw_mode_on(vm: &mut Vm) {
    if let Err(e) = terminal::enable_raw_mode() {
        error!("raw-mode-on: {e}");
        vm.fail(VmError::AddressOutOfBounds);
    }
}

/// RAW-MODE-OFF ( -- )
pub fn f_raw_mode_off(vm: &mut Vm) {
    if let Err(e) = terminal::disable_raw_mode() {
        error!("raw-mode-off: {e}");
        vm.fail(VmError::AddressOutOfBounds);
    }
}

pub(crate) fn register(vm: &mut Vm) {
    add_word(vm, "BYE", f_bye);
    add_word(vm, "BASE", f_base);
    add_word(vm, "DECIMAL", f_decimal);
    add_word(vm, "HEX", f_hex);
    add_word(vm, "STATE", f_state);
    add_word(vm, "SOURCE", f_source);
    add_word(vm, ">IN", f_to_in);
    add_word(vm, "WORD", f_word);
    add_immediate(vm, "(", f_paren);
    add_immediate(vm, "\\", f_backslash);
    add_word(vm, "RAW-MODE-ON", f_raw_mode_on);
    add_word(vm, "RAW-MODE-OFF", f_raw_mode_off);
}
