// Defining and compiling words: colon definitions, data words, mode
// switches, and the ABORT family.
//
// A word under definition is smudged so a reference to its own name inside
// the body resolves to any older definition, per FORTH-79; RECURSIVE lifts
// the smudge for intentional self-reference.

use tracing::debug;

use crate::config::CELL_SIZE;
use crate::dict::{WordBody, WordFlags};
use crate::error::VmError;
use crate::vm::{Mode, Vm, VmAddr};

use super::{add_immediate, add_word, parse_name};

/// : <name> ( -- ) open a colon definition
pub fn f_colon(vm: &mut Vm) {
    if vm.mode == Mode::Compile {
        vm.fail(VmError::InterpretOnly);
        return;
    }
    let Some(name) = parse_name(vm) else {
        return;
    };
    vm.align_here();
    let body = vm.here() as VmAddr;
    match vm.define_entry(&name, WordBody::Colon(body)) {
        Ok(idx) => {
            vm.dict
                .entry_mut(idx)
                .flags
                .insert(WordFlags::SMUDGED | WordFlags::COMPILED);
            vm.compiling_word = Some(idx);
            vm.mode = Mode::Compile;
            debug!(%name, "colon open");
        }
        Err(_) => {}
    }
}

/// ; ( -- ) close the definition: compile EXIT, unsmudge, interpret mode
pub fn f_semicolon(vm: &mut Vm) {
    if vm.mode != Mode::Compile {
        vm.fail(VmError::CompileOnly);
        return;
    }
    if !vm.cf_stack.is_empty() {
        vm.fail(VmError::ControlFlowMismatch);
        return;
    }
    let exit = vm.markers.exit;
    vm.compile_ref(exit);
    if let Some(idx) = vm.compiling_word.take() {
        let here = vm.here();
        let e = vm.dict.entry_mut(idx);
        e.flags.remove(WordFlags::SMUDGED);
        e.physics.mass_bytes = (here - e.dict_mark) as u32 + e.name.len() as u32;
        debug!(name = %e.name, "colon closed");
    }
    vm.temp_compile = false;
    vm.mode = Mode::Interpret;
}

/// RECURSIVE ( -- ) make the word being defined visible to itself
pub fn f_recursive(vm: &mut Vm) {
    if vm.mode != Mode::Compile {
        vm.fail(VmError::CompileOnly);
        return;
    }
    if let Some(idx) = vm.compiling_word {
        vm.dict.entry_mut(idx).flags.remove(WordFlags::SMUDGED);
    }
}

/// IMMEDIATE ( -- ) mark the latest definition immediate
pub fn f_immediate(vm: &mut Vm) {
    if let Some(idx) = vm.dict.latest() {
        vm.dict.entry_mut(idx).flags.insert(WordFlags::IMMEDIATE);
    }
}

/// SMUDGE ( -- ) toggle the smudge bit on the latest definition
pub fn f_smudge(vm: &mut Vm) {
    if let Some(idx) = vm.dict.latest() {
        vm.dict.entry_mut(idx).flags.toggle(WordFlags::SMUDGED);
    }
}

/// VARIABLE <name> ( -- ) one cell, initialized to zero
pub fn f_variable(vm: &mut Vm) {
    let Some(name) = parse_name(vm) else {
        return;
    };
    vm.align_here();
    let Ok(addr) = vm.allot(CELL_SIZE) else {
        return;
    };
    vm.store_cell(addr, 0);
    let _ = vm.define_entry(&name, WordBody::Variable(addr));
}

/// CONSTANT <name> ( n -- )
pub fn f_constant(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let v = vm.pop();
    let Some(name) = parse_name(vm) else {
        return;
    };
    let _ = vm.define_entry(&name, WordBody::Constant(v));
}

/// CREATE <name> ( -- ) name the next free dictionary address
pub fn f_create(vm: &mut Vm) {
    let Some(name) = parse_name(vm) else {
        return;
    };
    vm.align_here();
    let here = vm.here() as VmAddr;
    let _ = vm.define_entry(&name, WordBody::Variable(here));
}

/// [ ( -- ) switch to interpret mode inside a definition
pub fn f_lbracket(vm: &mut Vm) {
    vm.mode = Mode::Interpret;
}

/// ] ( -- ) back to compile mode
pub fn f_rbracket(vm: &mut Vm) {
    vm.mode = Mode::Compile;
}

/// LITERAL ( n -- ) compile the value on the stack as a literal
pub fn f_literal(vm: &mut Vm) {
    if vm.mode != Mode::Compile {
        vm.fail(VmError::CompileOnly);
        return;
    }
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let n = vm.pop();
    vm.compile_literal(n);
}

/// QUIT ( -- ) clear the return stack, back to the outer interpreter
pub fn f_quit(vm: &mut Vm) {
    vm.do_quit();
}

/// ABORT ( ... -- ) clear both stacks, back to the outer interpreter
pub fn f_abort(vm: &mut Vm) {
    vm.do_abort();
}

/// ABORT" ( f -- ) immediate: on a true flag, print the message and abort
pub fn f_abort_quote(vm: &mut Vm) {
    let text = vm.parse_string(b'"');
    if vm.mode == Mode::Compile {
        let aq = vm.markers.abortq;
        vm.compile_ref(aq);
        vm.compile_string(&text);
    } else {
        if vm.depth() < 1 {
            vm.fail(VmError::StackUnderflow);
            return;
        }
        if vm.pop() != 0 {
            vm.emit_str(&text);
            vm.emit_char('\n');
            vm.do_abort();
        }
    }
}

/// (ABORT") runtime: test the flag against the inline message
pub fn rt_abortq(vm: &mut Vm) {
    let ip = vm.rs_top();
    let (text, skip) = vm.read_inline_string(ip as VmAddr);
    vm.set_rs_top(ip + skip);
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    if vm.pop() != 0 {
        vm.emit_str(&text);
        vm.emit_char('\n');
        vm.do_abort();
    }
}

pub(crate) fn register(vm: &mut Vm) {
    add_word(vm, "(ABORT\")", rt_abortq);
    add_word(vm, ":", f_colon);
    add_immediate(vm, ";", f_semicolon);
    add_immediate(vm, "RECURSIVE", f_recursive);
    add_word(vm, "IMMEDIATE", f_immediate);
    add_word(vm, "SMUDGE", f_smudge);
    add_word(vm, "VARIABLE", f_variable);
    add_word(vm, "CONSTANT", f_constant);
    add_word(vm, "CREATE", f_create);
    add_immediate(vm, "[", f_lbracket);
    add_word(vm, "]", f_rbracket);
    add_immediate(vm, "LITERAL", f_literal);
    add_word(vm, "QUIT", f_quit);
    add_word(vm, "ABORT", f_abort);
    add_immediate(vm, "ABORT\"", f_abort_quote);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Cell;

    #[test]
    fn colon_defines_and_runs() {
        let mut vm = Vm::default();
        vm.interpret(": SQ DUP * ; 5 SQ").unwrap();
        assert_eq!(vm.data_stack(), &[25]);
    }

    #[test]
    fn definition_is_smudged_while_open() {
        let mut vm = Vm::default();
        vm.interpret(": W1 1 ;").unwrap();
        // While a second W1 is being compiled, W1 resolves to the first one.
        vm.interpret(": W1 W1 2 + ; W1").unwrap();
        assert_eq!(vm.data_stack(), &[3]);
    }

    #[test]
    fn recursive_enables_self_reference() {
        let mut vm = Vm::default();
        vm.interpret(": F RECURSIVE DUP 1 > IF DUP 1 - F * THEN ; 5 F")
            .unwrap();
        assert_eq!(vm.data_stack(), &[120]);
    }

    #[test]
    fn variable_and_constant() {
        let mut vm = Vm::default();
        vm.interpret("VARIABLE V 13 V ! V @ 21 CONSTANT TWENTYONE TWENTYONE")
            .unwrap();
        assert_eq!(vm.data_stack(), &[13, 21]);
    }

    #[test]
    fn create_names_free_space() {
        let mut vm = Vm::default();
        vm.interpret("CREATE BUF 3 , BUF @").unwrap();
        assert_eq!(vm.data_stack(), &[3]);
    }

    #[test]
    fn bracket_words_compute_at_compile_time() {
        let mut vm = Vm::default();
        vm.interpret(": K [ 2 3 * ] LITERAL ; K").unwrap();
        assert_eq!(vm.data_stack(), &[6]);
    }

    #[test]
    fn abort_clears_both_stacks() {
        let mut vm = Vm::default();
        vm.interpret("1 2 3 ABORT").unwrap();
        assert_eq!(vm.depth(), 0);
        assert_eq!(vm.rdepth(), 0);
        assert!(vm.error.is_none());
    }

    #[test]
    fn abort_quote_fires_only_on_true() {
        let mut vm = Vm::default();
        vm.interpret(": CHK 0= ABORT\" zero!\" ; 5 CHK 7").unwrap();
        assert_eq!(vm.data_stack(), &[7]);
        assert_eq!(vm.take_output(), "");

        let mut vm = Vm::default();
        vm.interpret("1 2 : CHK 0= ABORT\" zero!\" ; 0 CHK 99").unwrap();
        assert_eq!(vm.take_output(), "zero!\n");
        // ABORT cleared the stack; the rest of the buffer was discarded.
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn quit_discards_rest_of_buffer_quietly() {
        let mut vm = Vm::default();
        vm.interpret("5 QUIT 6 7").unwrap();
        assert_eq!(vm.data_stack(), &[5 as Cell]);
    }
}
