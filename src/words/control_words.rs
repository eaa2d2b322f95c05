// Control-flow words.
//
// Two layers, matching the runtime/compile split of the threaded-code
// design. Runtime markers ((BRANCH), (0BRANCH), (DO), (LOOP), ...) are
// ordinary primitives that operate on the saved instruction pointer at the
// top of the return stack; all their offsets are in bytes, measured from the
// operand cell they follow. Compile-time words are IMMEDIATE: they emit the
// markers, track unresolved forward branches on the control-flow stack and
// patch them at the matching closer. LEAVE sites collect in a per-DO list
// and are patched at LOOP/+LOOP to land past the back-offset, with the
// runtime dropping the loop frame itself.
//
// Loop frames live beneath the saved IP: ..., limit, index, ip. I reads one
// under the IP, J reads the next frame out, UNLOOP slides the IP down.

use tracing::trace;

use crate::compiler::CfItem;
use crate::config::CELL_SIZE;
use crate::error::VmError;
use crate::vm::{Cell, Vm, VmAddr};

use super::{add_immediate, add_word};

// ----- runtime markers ----------------------------------------------------

/// (LIT) push the following cell
pub fn rt_lit(vm: &mut Vm) {
    let ip = vm.rs_top();
    let v = vm.load_cell(ip as VmAddr);
    if vm.error.is_some() {
        return;
    }
    vm.push(v);
    vm.set_rs_top(ip + CELL_SIZE as Cell);
}

/// (BRANCH) unconditional, offset in bytes from the operand cell
pub fn rt_branch(vm: &mut Vm) {
    let ip = vm.rs_top();
    let rel = vm.load_cell(ip as VmAddr);
    if vm.error.is_some() {
        return;
    }
    vm.set_rs_top(ip + rel);
    trace!(rel, "branch");
}

/// (0BRANCH) ( f -- ) branch when the flag is zero
pub fn rt_zbranch(vm: &mut Vm) {
    let ip = vm.rs_top();
    let flag = vm.pop();
    let rel = vm.load_cell(ip as VmAddr);
    if vm.error.is_some() {
        return;
    }
    if flag == 0 {
        vm.set_rs_top(ip + rel);
    } else {
        vm.set_rs_top(ip + CELL_SIZE as Cell);
    }
}

/// (DO) ( limit index -- ) establish a loop frame beneath the IP
pub fn rt_do(vm: &mut Vm) {
    if vm.depth() < 2 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let index = vm.pop();
    let limit = vm.pop();
    let ip = vm.rpop();
    vm.rpush(limit);
    vm.rpush(index);
    vm.rpush(ip);
    trace!(limit, index, "do: enter");
}

/// (?DO) ( limit index -- ) like (DO) but skips an empty loop via its
/// forward operand
pub fn rt_qdo(vm: &mut Vm) {
    if vm.depth() < 2 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let index = vm.pop();
    let limit = vm.pop();
    let ip = vm.rs_top();
    let rel = vm.load_cell(ip as VmAddr);
    if vm.error.is_some() {
        return;
    }
    if index == limit {
        vm.set_rs_top(ip + rel);
        trace!("?do: empty");
        return;
    }
    vm.rpop();
    vm.rpush(limit);
    vm.rpush(index);
    vm.rpush(ip + CELL_SIZE as Cell);
}

/// (LOOP) bump the index; back-branch while the loop is live, else drop the
/// frame
pub fn rt_loop(vm: &mut Vm) {
    if vm.rdepth() < 3 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let ip = vm.rs_top();
    let back = vm.load_cell(ip as VmAddr);
    if vm.error.is_some() {
        return;
    }
    let index = vm.rs_peek(1) + 1;
    vm.set_rs_peek(1, index);
    let limit = vm.rs_peek(2);
    if index < limit {
        vm.set_rs_top(ip + back);
    } else {
        vm.rdrop_n(3);
        vm.rpush(ip + CELL_SIZE as Cell);
        trace!("loop: exit");
    }
}

/// (+LOOP) ( n -- ) signed-increment variant
pub fn rt_plus_loop(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    if vm.rdepth() < 3 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let n = vm.pop();
    let ip = vm.rs_top();
    let back = vm.load_cell(ip as VmAddr);
    if vm.error.is_some() {
        return;
    }
    let index = vm.rs_peek(1).wrapping_add(n);
    vm.set_rs_peek(1, index);
    let limit = vm.rs_peek(2);
    let live = if n >= 0 { index < limit } else { index >= limit };
    if live {
        vm.set_rs_top(ip + back);
    } else {
        vm.rdrop_n(3);
        vm.rpush(ip + CELL_SIZE as Cell);
    }
}

/// (LEAVE) drop the loop frame and branch past the matching LOOP
pub fn rt_leave(vm: &mut Vm) {
    if vm.rdepth() < 3 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let ip = vm.rs_top();
    let rel = vm.load_cell(ip as VmAddr);
    if vm.error.is_some() {
        return;
    }
    vm.rdrop_n(3);
    vm.rpush(ip + rel);
    trace!("leave");
}

/// UNLOOP ( R: limit index ip -- ip )
pub fn f_unloop(vm: &mut Vm) {
    if vm.rdepth() < 3 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let ip = vm.rpop();
    vm.rpop();
    vm.rpop();
    vm.rpush(ip);
}

/// I ( -- index )
pub fn f_i(vm: &mut Vm) {
    if vm.rdepth() < 3 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let v = vm.rs_peek(1);
    vm.push(v);
}

/// J ( -- outer-index )
pub fn f_j(vm: &mut Vm) {
    if vm.rdepth() < 5 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let v = vm.rs_peek(3);
    vm.push(v);
}

/// EXIT ( -- ) return from the current colon definition
pub fn f_exit(vm: &mut Vm) {
    if vm.colon_depth == 0 {
        vm.fail(VmError::CompileOnly);
        return;
    }
    vm.exit_colon = true;
}

// ----- compile-time words -------------------------------------------------

/// IF ( f -- ) compile a conditional forward branch
pub fn f_if(vm: &mut Vm) {
    vm.ensure_compiling();
    let zb = vm.markers.zbranch;
    vm.compile_ref(zb);
    let operand = vm.emit_cell(0);
    vm.cf_push(CfItem::If(operand));
}

/// ELSE resolve IF, open the false arm
pub fn f_else(vm: &mut Vm) {
    let Some(CfItem::If(operand)) = vm.cf_pop() else {
        vm.fail(VmError::ControlFlowMismatch);
        return;
    };
    let br = vm.markers.branch;
    vm.compile_ref(br);
    let new_operand = vm.emit_cell(0);
    vm.patch_forward(operand);
    vm.cf_push(CfItem::Else(new_operand));
}

/// THEN resolve IF or ELSE
pub fn f_then(vm: &mut Vm) {
    match vm.cf_pop() {
        Some(CfItem::If(operand)) | Some(CfItem::Else(operand)) => vm.patch_forward(operand),
        Some(_) | None => vm.fail(VmError::ControlFlowMismatch),
    }
}

/// BEGIN mark a back-target
pub fn f_begin(vm: &mut Vm) {
    vm.ensure_compiling();
    let here = vm.here();
    vm.cf_push(CfItem::Begin(here));
}

/// UNTIL ( f -- ) conditional back-branch to BEGIN
pub fn f_until(vm: &mut Vm) {
    let Some(CfItem::Begin(target)) = vm.cf_pop() else {
        vm.fail(VmError::ControlFlowMismatch);
        return;
    };
    let zb = vm.markers.zbranch;
    vm.compile_ref(zb);
    let operand = vm.emit_cell(0);
    vm.store_cell(operand as VmAddr, target as Cell - operand as Cell);
}

/// AGAIN unconditional back-branch to BEGIN
pub fn f_again(vm: &mut Vm) {
    let Some(CfItem::Begin(target)) = vm.cf_pop() else {
        vm.fail(VmError::ControlFlowMismatch);
        return;
    };
    let br = vm.markers.branch;
    vm.compile_ref(br);
    let operand = vm.emit_cell(0);
    vm.store_cell(operand as VmAddr, target as Cell - operand as Cell);
}

/// WHILE ( f -- ) conditional exit within BEGIN ... REPEAT
pub fn f_while(vm: &mut Vm) {
    match vm.cf_stack.last() {
        Some(CfItem::Begin(_)) => {}
        _ => {
            vm.fail(VmError::ControlFlowMismatch);
            return;
        }
    }
    let zb = vm.markers.zbranch;
    vm.compile_ref(zb);
    let operand = vm.emit_cell(0);
    vm.cf_push(CfItem::While(operand));
}

/// REPEAT close BEGIN ... WHILE ... REPEAT
pub fn f_repeat(vm: &mut Vm) {
    let Some(CfItem::While(while_operand)) = vm.cf_pop() else {
        vm.fail(VmError::ControlFlowMismatch);
        return;
    };
    let Some(CfItem::Begin(target)) = vm.cf_pop() else {
        vm.fail(VmError::ControlFlowMismatch);
        return;
    };
    let br = vm.markers.branch;
    vm.compile_ref(br);
    let operand = vm.emit_cell(0);
    vm.store_cell(operand as VmAddr, target as Cell - operand as Cell);
    vm.patch_forward(while_operand);
}

/// DO ( limit index -- ) open a counted loop
pub fn f_do(vm: &mut Vm) {
    vm.ensure_compiling();
    let d = vm.markers.do_rt;
    vm.compile_ref(d);
    let leave_mark = vm.leave_sites.len();
    let body = vm.here();
    vm.cf_push(CfItem::Do { body, leave_mark });
}

/// ?DO ( limit index -- ) counted loop that may run zero times
pub fn f_qdo(vm: &mut Vm) {
    vm.ensure_compiling();
    let d = vm.markers.qdo_rt;
    vm.compile_ref(d);
    let leave_mark = vm.leave_sites.len();
    let fwd = vm.emit_cell(0);
    let body = vm.here();
    vm.cf_push(CfItem::Do { body, leave_mark });
    vm.leave_sites.push(fwd);
}

/// LEAVE compile an exit branch, patched at LOOP/+LOOP
pub fn f_leave(vm: &mut Vm) {
    let in_do = vm
        .cf_stack
        .iter()
        .any(|i| matches!(i, CfItem::Do { .. }));
    if !in_do {
        vm.fail(VmError::ControlFlowMismatch);
        return;
    }
    let lv = vm.markers.leave_rt;
    vm.compile_ref(lv);
    let site = vm.emit_cell(0);
    vm.leave_sites.push(site);
}

fn close_loop(vm: &mut Vm, runtime: usize) {
    let Some(CfItem::Do { body, leave_mark }) = vm.cf_pop() else {
        vm.fail(VmError::ControlFlowMismatch);
        return;
    };
    vm.compile_ref(runtime);
    let operand = vm.emit_cell(0);
    vm.store_cell(operand as VmAddr, body as Cell - operand as Cell);
    let sites: Vec<usize> = vm.leave_sites.drain(leave_mark..).collect();
    for site in sites {
        vm.patch_forward(site);
    }
}

/// LOOP close DO with a +1 step
pub fn f_loop(vm: &mut Vm) {
    let rt = vm.markers.loop_rt;
    close_loop(vm, rt);
}

/// +LOOP ( n -- ) close DO with a signed step
pub fn f_plus_loop(vm: &mut Vm) {
    let rt = vm.markers.plus_loop_rt;
    close_loop(vm, rt);
}

pub(crate) fn register(vm: &mut Vm) {
    add_word(vm, "(LIT)", rt_lit);
    add_word(vm, "(BRANCH)", rt_branch);
    add_word(vm, "(0BRANCH)", rt_zbranch);
    add_word(vm, "(DO)", rt_do);
    add_word(vm, "(?DO)", rt_qdo);
    add_word(vm, "(LOOP)", rt_loop);
    add_word(vm, "(+LOOP)", rt_plus_loop);
    add_word(vm, "(LEAVE)", rt_leave);
    add_word(vm, "UNLOOP", f_unloop);
    add_word(vm, "I", f_i);
    add_word(vm, "J", f_j);
    add_word(vm, "EXIT", f_exit);

    add_immediate(vm, "IF", f_if);
    add_immediate(vm, "ELSE", f_else);
    add_immediate(vm, "THEN", f_then);
    add_immediate(vm, "BEGIN", f_begin);
    add_immediate(vm, "UNTIL", f_until);
    add_immediate(vm, "AGAIN", f_again);
    add_immediate(vm, "WHILE", f_while);
    add_immediate(vm, "REPEAT", f_repeat);
    add_immediate(vm, "DO", f_do);
    add_immediate(vm, "?DO", f_qdo);
    add_immediate(vm, "LOOP", f_loop);
    add_immediate(vm, "+LOOP", f_plus_loop);
    add_immediate(vm, "LEAVE", f_leave);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_else_then_both_arms() {
        let mut vm = Vm::default();
        vm.interpret(": SIGN 0< IF -1 ELSE 1 THEN ; -5 SIGN 5 SIGN")
            .unwrap();
        assert_eq!(vm.data_stack(), &[-1, 1]);
    }

    #[test]
    fn nested_loops_and_j() {
        let mut vm = Vm::default();
        vm.interpret(": GRID 2 0 DO 2 0 DO J 10 * I + LOOP LOOP ; GRID")
            .unwrap();
        assert_eq!(vm.data_stack(), &[0, 1, 10, 11]);
    }

    #[test]
    fn qdo_skips_empty_range() {
        let mut vm = Vm::default();
        vm.interpret(": N 3 3 ?DO 99 LOOP 7 ; N").unwrap();
        assert_eq!(vm.data_stack(), &[7]);
    }

    #[test]
    fn plus_loop_counts_down() {
        let mut vm = Vm::default();
        vm.interpret(": DOWN 0 5 DO I -1 +LOOP ; DOWN").unwrap();
        assert_eq!(vm.data_stack(), &[5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn begin_until_runs_at_least_once() {
        let mut vm = Vm::default();
        vm.interpret(": CNT 0 BEGIN 1+ DUP 4 = UNTIL ; CNT").unwrap();
        assert_eq!(vm.data_stack(), &[4]);
    }

    #[test]
    fn leave_drops_the_loop_frame() {
        let mut vm = Vm::default();
        vm.interpret(": L 10 0 DO I 2 = IF LEAVE THEN I LOOP 42 ; L")
            .unwrap();
        assert_eq!(vm.data_stack(), &[0, 1, 42]);
        assert_eq!(vm.rdepth(), 0);
    }

    #[test]
    fn unbalanced_then_is_a_mismatch() {
        let mut vm = Vm::default();
        assert_eq!(
            vm.interpret(": BAD 1 2 THEN ;"),
            Err(VmError::ControlFlowMismatch)
        );
    }

    #[test]
    fn missing_then_is_caught_at_semicolon() {
        let mut vm = Vm::default();
        assert_eq!(
            vm.interpret(": BAD 1 IF 2 ;"),
            Err(VmError::ControlFlowMismatch)
        );
    }

    #[test]
    fn exit_returns_early() {
        let mut vm = Vm::default();
        vm.interpret(": E 1 EXIT 2 ; E").unwrap();
        assert_eq!(vm.data_stack(), &[1]);
    }
}
