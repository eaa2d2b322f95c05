// Comparison and bitwise words. Truth is the FORTH convention: -1 / 0.

use crate::error::VmError;
use crate::vm::{Cell, Vm, FALSE, TRUE};

use super::add_word;

fn flag(b: bool) -> Cell {
    if b {
        TRUE
    } else {
        FALSE
    }
}

fn binop(vm: &mut Vm, f: impl Fn(Cell, Cell) -> Cell) {
    if vm.depth() < 2 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let b = vm.pop();
    let a = vm.pop();
    vm.push(f(a, b));
}

fn unop(vm: &mut Vm, f: impl Fn(Cell) -> Cell) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let a = vm.pop();
    vm.push(f(a));
}

/// AND ( a b -- a&b )
pub fn f_and(vm: &mut Vm) {
    binop(vm, |a, b| a & b);
}

/// OR ( a b -- a|b )
pub fn f_or(vm: &mut Vm) {
    binop(vm, |a, b| a | b);
}

/// XOR ( a b -- a^b )
pub fn f_xor(vm: &mut Vm) {
    binop(vm, |a, b| a ^ b);
}

/// NOT ( n -- flag ) FORTH-79 logical not, same as 0=
pub fn f_not(vm: &mut Vm) {
    unop(vm, |a| flag(a == 0));
}

/// = ( a b -- flag )
pub fn f_equal(vm: &mut Vm) {
    binop(vm, |a, b| flag(a == b));
}

/// <> ( a b -- flag )
pub fn f_not_equal(vm: &mut Vm) {
    binop(vm, |a, b| flag(a != b));
}

/// < ( a b -- flag )
pub fn f_less(vm: &mut Vm) {
    binop(vm, |a, b| flag(a < b));
}

/// > ( a b -- flag )
pub fn f_greater(vm: &mut Vm) {
    binop(vm, |a, b| flag(a > b));
}

/// U< ( a b -- flag ) unsigned compare
pub fn f_u_less(vm: &mut Vm) {
    binop(vm, |a, b| flag((a as u64) < (b as u64)));
}

/// 0= ( n -- flag )
pub fn f_zero_equal(vm: &mut Vm) {
    unop(vm, |a| flag(a == 0));
}

/// 0< ( n -- flag )
pub fn f_zero_less(vm: &mut Vm) {
    unop(vm, |a| flag(a < 0));
}

/// 0> ( n -- flag )
pub fn f_zero_greater(vm: &mut Vm) {
    unop(vm, |a| flag(a > 0));
}

/// TRUE ( -- -1 )
pub fn f_true(vm: &mut Vm) {
    vm.push(TRUE);
}

/// FALSE ( -- 0 )
pub fn f_false(vm: &mut Vm) {
    vm.push(FALSE);
}

pub(crate) fn register(vm: &mut Vm) {
    add_word(vm, "AND", f_and);
    add_word(vm, "OR", f_or);
    add_word(vm, "XOR", f_xor);
    add_word(vm, "NOT", f_not);
    add_word(vm, "=", f_equal);
    add_word(vm, "<>", f_not_equal);
    add_word(vm, "<", f_less);
    add_word(vm, ">", f_greater);
    add_word(vm, "U<", f_u_less);
    add_word(vm, "0=", f_zero_equal);
    add_word(vm, "0<", f_zero_less);
    add_word(vm, "0>", f_zero_greater);
    add_word(vm, "TRUE", f_true);
    add_word(vm, "FALSE", f_false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_follow_forth_truth() {
        let mut vm = Vm::default();
        vm.interpret("1 2 < 2 1 < 5 5 =").unwrap();
        assert_eq!(vm.data_stack(), &[TRUE, FALSE, TRUE]);
    }

    #[test]
    fn unsigned_compare_differs_from_signed() {
        let mut vm = Vm::default();
        vm.interpret("-1 1 < -1 1 U<").unwrap();
        assert_eq!(vm.data_stack(), &[TRUE, FALSE]);
    }

    #[test]
    fn zero_tests() {
        let mut vm = Vm::default();
        vm.interpret("0 0= -3 0< 4 0> 7 NOT").unwrap();
        assert_eq!(vm.data_stack(), &[TRUE, TRUE, TRUE, FALSE]);
    }

    #[test]
    fn bitwise_ops() {
        let mut vm = Vm::default();
        vm.interpret("12 10 AND 12 10 OR 12 10 XOR").unwrap();
        assert_eq!(vm.data_stack(), &[8, 14, 6]);
    }
}
