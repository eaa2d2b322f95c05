// Return-stack transfer words.
//
// Inside a colon body the top of the return stack is the saved instruction
// pointer, so >R and R> slide their value in beneath it; at interpret level
// they address the bare stack. Values moved with >R must be taken back with
// R> before the definition (or loop) ends — FORTH-79 leaves balancing to the
// program.

use crate::error::VmError;
use crate::vm::Vm;

use super::add_word;

/// >R ( n -- ) ( R: -- n )
pub fn f_to_r(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let n = vm.pop();
    if vm.colon_depth > 0 {
        let ip = vm.rpop();
        vm.rpush(n);
        vm.rpush(ip);
    } else {
        vm.rpush(n);
    }
}

/// R> ( -- n ) ( R: n -- )
pub fn f_r_from(vm: &mut Vm) {
    let needed = if vm.colon_depth > 0 { 2 } else { 1 };
    if vm.rdepth() < needed {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    if vm.colon_depth > 0 {
        let ip = vm.rpop();
        let n = vm.rpop();
        vm.rpush(ip);
        vm.push(n);
    } else {
        let n = vm.rpop();
        vm.push(n);
    }
}

/// R@ ( -- n ) copy the top return-stack value
pub fn f_r_fetch(vm: &mut Vm) {
    let at = if vm.colon_depth > 0 { 1 } else { 0 };
    if vm.rdepth() < at + 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let n = vm.rs_peek(at);
    vm.push(n);
}

pub(crate) fn register(vm: &mut Vm) {
    add_word(vm, ">R", f_to_r);
    add_word(vm, "R>", f_r_from);
    add_word(vm, "R@", f_r_fetch);
}
