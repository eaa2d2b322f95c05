// Data-stack manipulation words.

use crate::error::VmError;
use crate::vm::{Cell, Vm};

use super::add_word;

/// DUP ( n -- n n )
pub fn f_dup(vm: &mut Vm) {
    let Some(v) = vm.peek(0) else {
        vm.fail(VmError::StackUnderflow);
        return;
    };
    vm.push(v);
}

/// DROP ( n -- )
pub fn f_drop(vm: &mut Vm) {
    vm.pop();
}

/// SWAP ( a b -- b a )
pub fn f_swap(vm: &mut Vm) {
    if vm.depth() < 2 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let b = vm.pop();
    let a = vm.pop();
    vm.push(b);
    vm.push(a);
}

/// OVER ( a b -- a b a )
pub fn f_over(vm: &mut Vm) {
    let Some(a) = vm.peek(1) else {
        vm.fail(VmError::StackUnderflow);
        return;
    };
    vm.push(a);
}

/// ROT ( a b c -- b c a )
pub fn f_rot(vm: &mut Vm) {
    if vm.depth() < 3 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let c = vm.pop();
    let b = vm.pop();
    let a = vm.pop();
    vm.push(b);
    vm.push(c);
    vm.push(a);
}

/// PICK ( ... n -- ... v ) copy the n-th item (0 = top) to the top
pub fn f_pick(vm: &mut Vm) {
    let n = vm.pop();
    if n < 0 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let Some(v) = vm.peek(n as usize) else {
        vm.fail(VmError::StackUnderflow);
        return;
    };
    vm.push(v);
}

/// ROLL ( ... n -- ... ) rotate the n-th item to the top
pub fn f_roll(vm: &mut Vm) {
    let n = vm.pop();
    if n < 0 || vm.depth() < (n + 1) as usize {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let n = n as usize;
    let tmp: Vec<Cell> = (0..=n).map(|_| vm.pop()).collect();
    let target = tmp[n];
    for i in (0..n).rev() {
        vm.push(tmp[i]);
    }
    vm.push(target);
}

/// ?DUP ( n -- n n | 0 )
pub fn f_qdup(vm: &mut Vm) {
    let Some(v) = vm.peek(0) else {
        vm.fail(VmError::StackUnderflow);
        return;
    };
    if v != 0 {
        vm.push(v);
    }
}

/// DEPTH ( -- n )
pub fn f_depth(vm: &mut Vm) {
    let d = vm.depth() as Cell;
    vm.push(d);
}

/// .S ( -- ) print the stack, bottom to top, without disturbing it
pub fn f_dot_s(vm: &mut Vm) {
    let items: Vec<String> = vm.data_stack().iter().map(|c| c.to_string()).collect();
    let line = format!("<{}> {}", items.len(), items.join(" "));
    vm.emit_str(line.trim_end());
    vm.emit_char(' ');
}

pub(crate) fn register(vm: &mut Vm) {
    add_word(vm, "DUP", f_dup);
    add_word(vm, "DROP", f_drop);
    add_word(vm, "SWAP", f_swap);
    add_word(vm, "OVER", f_over);
    add_word(vm, "ROT", f_rot);
    add_word(vm, "PICK", f_pick);
    add_word(vm, "ROLL", f_roll);
    add_word(vm, "?DUP", f_qdup);
    add_word(vm, "DEPTH", f_depth);
    add_word(vm, ".S", f_dot_s);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_swap_is_identity() {
        let mut vm = Vm::default();
        vm.interpret("1 2 SWAP SWAP").unwrap();
        assert_eq!(vm.data_stack(), &[1, 2]);
    }

    #[test]
    fn drop_dup_is_identity_on_nonempty() {
        let mut vm = Vm::default();
        vm.interpret("7 DUP DROP").unwrap();
        assert_eq!(vm.data_stack(), &[7]);
    }

    #[test]
    fn over_preserves_second_item() {
        let mut vm = Vm::default();
        vm.interpret("3 4 OVER").unwrap();
        assert_eq!(vm.data_stack(), &[3, 4, 3]);
    }

    #[test]
    fn rot_and_roll_agree() {
        let mut vm = Vm::default();
        vm.interpret("1 2 3 ROT").unwrap();
        assert_eq!(vm.data_stack(), &[2, 3, 1]);
        let mut vm2 = Vm::default();
        vm2.interpret("1 2 3 2 ROLL").unwrap();
        assert_eq!(vm2.data_stack(), &[2, 3, 1]);
    }

    #[test]
    fn pick_copies_deep_item() {
        let mut vm = Vm::default();
        vm.interpret("10 20 30 2 PICK").unwrap();
        assert_eq!(vm.data_stack(), &[10, 20, 30, 10]);
    }

    #[test]
    fn qdup_only_duplicates_nonzero() {
        let mut vm = Vm::default();
        vm.interpret("0 ?DUP 5 ?DUP").unwrap();
        assert_eq!(vm.data_stack(), &[0, 5, 5]);
    }

    #[test]
    fn underflow_is_reported() {
        let mut vm = Vm::default();
        assert_eq!(vm.interpret("SWAP"), Err(VmError::StackUnderflow));
    }
}
