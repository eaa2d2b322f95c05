// Arithmetic words. Single-cell math wraps on overflow; the scaled words
// (*/ and */MOD) run their intermediate product at double width, as
// FORTH-79 requires. Division by zero sets the error flag.

use crate::error::VmError;
use crate::vm::{Cell, Vm};

use super::add_word;

fn need(vm: &mut Vm, n: usize) -> bool {
    if vm.depth() < n {
        vm.fail(VmError::StackUnderflow);
        false
    } else {
        true
    }
}

/// + ( a b -- a+b )
pub fn f_plus(vm: &mut Vm) {
    if need(vm, 2) {
        let b = vm.pop();
        let a = vm.pop();
        vm.push(a.wrapping_add(b));
    }
}

/// - ( a b -- a-b )
pub fn f_minus(vm: &mut Vm) {
    if need(vm, 2) {
        let b = vm.pop();
        let a = vm.pop();
        vm.push(a.wrapping_sub(b));
    }
}

/// * ( a b -- a*b )
pub fn f_star(vm: &mut Vm) {
    if need(vm, 2) {
        let b = vm.pop();
        let a = vm.pop();
        vm.push(a.wrapping_mul(b));
    }
}

/// / ( a b -- a/b )
pub fn f_slash(vm: &mut Vm) {
    if need(vm, 2) {
        let b = vm.pop();
        let a = vm.pop();
        if b == 0 {
            vm.fail(VmError::DivideByZero);
            return;
        }
        vm.push(a.wrapping_div(b));
    }
}

/// MOD ( a b -- a%b )
pub fn f_mod(vm: &mut Vm) {
    if need(vm, 2) {
        let b = vm.pop();
        let a = vm.pop();
        if b == 0 {
            vm.fail(VmError::DivideByZero);
            return;
        }
        vm.push(a.wrapping_rem(b));
    }
}

/// /MOD ( a b -- rem quot )
pub fn f_slash_mod(vm: &mut Vm) {
    if need(vm, 2) {
        let b = vm.pop();
        let a = vm.pop();
        if b == 0 {
            vm.fail(VmError::DivideByZero);
            return;
        }
        vm.push(a.wrapping_rem(b));
        vm.push(a.wrapping_div(b));
    }
}

/// */ ( a b c -- a*b/c ) with a double-width intermediate
pub fn f_star_slash(vm: &mut Vm) {
    if need(vm, 3) {
        let c = vm.pop();
        let b = vm.pop();
        let a = vm.pop();
        if c == 0 {
            vm.fail(VmError::DivideByZero);
            return;
        }
        let prod = a as i128 * b as i128;
        vm.push((prod / c as i128) as Cell);
    }
}

/// */MOD ( a b c -- rem quot ) with a double-width intermediate
pub fn f_star_slash_mod(vm: &mut Vm) {
    if need(vm, 3) {
        let c = vm.pop();
        let b = vm.pop();
        let a = vm.pop();
        if c == 0 {
            vm.fail(VmError::DivideByZero);
            return;
        }
        let prod = a as i128 * b as i128;
        vm.push((prod % c as i128) as Cell);
        vm.push((prod / c as i128) as Cell);
    }
}

/// 1+ ( n -- n+1 )
pub fn f_one_plus(vm: &mut Vm) {
    if need(vm, 1) {
        let n = vm.pop();
        vm.push(n.wrapping_add(1));
    }
}

/// 1- ( n -- n-1 )
pub fn f_one_minus(vm: &mut Vm) {
    if need(vm, 1) {
        let n = vm.pop();
        vm.push(n.wrapping_sub(1));
    }
}

/// 2+ ( n -- n+2 )
pub fn f_two_plus(vm: &mut Vm) {
    if need(vm, 1) {
        let n = vm.pop();
        vm.push(n.wrapping_add(2));
    }
}

/// 2- ( n -- n-2 )
pub fn f_two_minus(vm: &mut Vm) {
    if need(vm, 1) {
        let n = vm.pop();
        vm.push(n.wrapping_sub(2));
    }
}

/// 2* ( n -- n*2 )
pub fn f_two_star(vm: &mut Vm) {
    if need(vm, 1) {
        let n = vm.pop();
        vm.push(n.wrapping_shl(1));
    }
}

/// 2/ ( n -- n/2 ) arithmetic shift
pub fn f_two_slash(vm: &mut Vm) {
    if need(vm, 1) {
        let n = vm.pop();
        vm.push(n >> 1);
    }
}

/// ABS ( n -- |n| )
pub fn f_abs(vm: &mut Vm) {
    if need(vm, 1) {
        let n = vm.pop();
        vm.push(n.wrapping_abs());
    }
}

/// NEGATE ( n -- -n )
pub fn f_negate(vm: &mut Vm) {
    if need(vm, 1) {
        let n = vm.pop();
        vm.push(n.wrapping_neg());
    }
}

/// MIN ( a b -- min )
pub fn f_min(vm: &mut Vm) {
    if need(vm, 2) {
        let b = vm.pop();
        let a = vm.pop();
        vm.push(a.min(b));
    }
}

/// MAX ( a b -- max )
pub fn f_max(vm: &mut Vm) {
    if need(vm, 2) {
        let b = vm.pop();
        let a = vm.pop();
        vm.push(a.max(b));
    }
}

pub(crate) fn register(vm: &mut Vm) {
    add_word(vm, "+", f_plus);
    add_word(vm, "-", f_minus);
    add_word(vm, "*", f_star);
    add_word(vm, "/", f_slash);
    add_word(vm, "MOD", f_mod);
    add_word(vm, "/MOD", f_slash_mod);
    add_word(vm, "*/", f_star_slash);
    add_word(vm, "*/MOD", f_star_slash_mod);
    add_word(vm, "1+", f_one_plus);
    add_word(vm, "1-", f_one_minus);
    add_word(vm, "2+", f_two_plus);
    add_word(vm, "2-", f_two_minus);
    add_word(vm, "2*", f_two_star);
    add_word(vm, "2/", f_two_slash);
    add_word(vm, "ABS", f_abs);
    add_word(vm, "NEGATE", f_negate);
    add_word(vm, "MIN", f_min);
    add_word(vm, "MAX", f_max);
}
