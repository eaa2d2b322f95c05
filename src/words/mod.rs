// FORTH-79 word catalog.
//
// One module per word family, each exposing a `register` function; this
// registry stitches them into a fresh VM. Word implementations are free
// functions taking `&mut Vm`, registered under their Forth names.

pub mod arithmetic_words;
pub mod block_words;
pub mod control_words;
pub mod defining_words;
pub mod dictionary_words;
pub mod heat_words;
pub mod io_words;
pub mod logical_words;
pub mod memory_words;
pub mod return_stack_words;
pub mod stack_words;
pub mod system_words;

use crate::dict::{WordFlags, WordFunc};
use crate::error::VmError;
use crate::vm::Vm;

/// Register a single word; on a full dictionary the VM is already flagged.
pub(crate) fn add_word(vm: &mut Vm, name: &str, func: WordFunc) -> usize {
    vm.create_word(name, func).unwrap_or(usize::MAX)
}

pub(crate) fn add_immediate(vm: &mut Vm, name: &str, func: WordFunc) {
    let idx = add_word(vm, name, func);
    if idx != usize::MAX {
        vm.dict.entry_mut(idx).flags.insert(WordFlags::IMMEDIATE);
    }
}

/// Parse a postfix name and resolve it, the shared shape of FORGET, tick and
/// the heat-diagnostic words.
pub(crate) fn parse_name(vm: &mut Vm) -> Option<String> {
    let name = vm.parse_token(b' ');
    if name.is_none() {
        vm.fail(VmError::UnknownWord);
    }
    name
}

pub(crate) fn parse_name_find(vm: &mut Vm) -> Option<usize> {
    let name = parse_name(vm)?;
    let idx = vm.find_word(&name);
    if idx.is_none() {
        vm.fail(VmError::UnknownWord);
    }
    idx
}

/// Install the standard word set.
pub fn register_standard_words(vm: &mut Vm) {
    control_words::register(vm);
    stack_words::register(vm);
    return_stack_words::register(vm);
    arithmetic_words::register(vm);
    logical_words::register(vm);
    memory_words::register(vm);
    io_words::register(vm);
    defining_words::register(vm);
    dictionary_words::register(vm);
    block_words::register(vm);
    system_words::register(vm);
    heat_words::register(vm);
}
