// Dictionary inspection and manipulation words.

use tracing::info;

use crate::error::VmError;
use crate::vm::{Cell, Vm, VmAddr, FALSE, TRUE};

use super::{add_word, parse_name, parse_name_find};

/// FORGET <name> ( -- ) unlink the word and everything after it
pub fn f_forget(vm: &mut Vm) {
    let Some(name) = parse_name(vm) else {
        return;
    };
    match vm.dict.forget(&name) {
        Ok(rewind) => {
            vm.rewind_here(rewind);
            vm.hotwords.invalidate();
            info!(%name, "forgotten");
        }
        Err(e) => vm.fail(e),
    }
}

/// WORDS ( -- ) list findable definitions, newest first
pub fn f_words(vm: &mut Vm) {
    let names: Vec<String> = vm
        .dict
        .entries()
        .iter()
        .rev()
        .filter(|e| e.is_findable())
        .map(|e| e.name.clone())
        .collect();
    let count = names.len();
    vm.emit_str(&names.join(" "));
    let tail = format!("\n{count} words\n");
    vm.emit_str(&tail);
}

/// ' <name> ( -- xt ) execution token of a postfix word
pub fn f_tick(vm: &mut Vm) {
    let Some(idx) = parse_name_find(vm) else {
        return;
    };
    vm.push(idx as Cell);
}

/// EXECUTE ( xt -- )
pub fn f_execute(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let xt = vm.pop();
    vm.execute_token(xt);
}

/// FIND ( addr -- xt tf | addr 0 ) look up a counted string
pub fn f_find(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let addr = vm.pop() as VmAddr;
    let Some(name) = vm.counted_string(addr) else {
        return;
    };
    match vm.find_word(&name) {
        Some(idx) => {
            let immediate = vm
                .dict
                .entry(idx)
                .flags
                .contains(crate::dict::WordFlags::IMMEDIATE);
            vm.push(idx as Cell);
            vm.push(if immediate { 1 } else { TRUE });
        }
        None => {
            vm.push(addr as Cell);
            vm.push(FALSE);
        }
    }
}

pub(crate) fn register(vm: &mut Vm) {
    add_word(vm, "FORGET", f_forget);
    add_word(vm, "WORDS", f_words);
    add_word(vm, "'", f_tick);
    add_word(vm, "EXECUTE", f_execute);
    add_word(vm, "FIND", f_find);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forget_removes_word_and_successors() {
        let mut vm = Vm::default();
        vm.interpret(": A 1 ; : B 2 ; : C 3 ;").unwrap();
        vm.interpret("FORGET B").unwrap();
        assert!(vm.find_word("A").is_some());
        assert!(vm.find_word("B").is_none());
        assert!(vm.find_word("C").is_none());
    }

    #[test]
    fn forget_twice_is_unknown() {
        let mut vm = Vm::default();
        vm.interpret(": W 1 ;").unwrap();
        vm.interpret("FORGET W").unwrap();
        assert_eq!(vm.interpret("FORGET W"), Err(VmError::UnknownWord));
    }

    #[test]
    fn forget_core_word_hits_fence() {
        let mut vm = Vm::default();
        assert_eq!(
            vm.interpret("FORGET DUP"),
            Err(VmError::DictionaryFenceViolation)
        );
    }

    #[test]
    fn forget_rewinds_here() {
        let mut vm = Vm::default();
        let h0 = vm.here();
        vm.interpret(": W 1 2 3 4 ;").unwrap();
        assert!(vm.here() > h0);
        vm.interpret("FORGET W").unwrap();
        assert_eq!(vm.here(), h0);
    }

    #[test]
    fn tick_and_execute() {
        let mut vm = Vm::default();
        vm.interpret(": DOUBLE 2 * ; 21 ' DOUBLE EXECUTE").unwrap();
        assert_eq!(vm.data_stack(), &[42]);
    }

    #[test]
    fn find_reports_immediacy() {
        let mut vm = Vm::default();
        // Token "IF" as a counted string at PAD: FIND returns xt and 1.
        vm.interpret("2 PAD C! 73 PAD 1+ C! 70 PAD 2+ C! PAD FIND")
            .unwrap();
        let flag = vm.pop();
        let xt = vm.pop();
        assert_eq!(flag, 1);
        assert_eq!(xt, vm.find_word("IF").unwrap() as Cell);
    }

    #[test]
    fn find_miss_returns_addr_and_zero() {
        let mut vm = Vm::default();
        vm.interpret("2 PAD C! 81 PAD 1+ C! 81 PAD 2+ C! PAD FIND")
            .unwrap();
        assert_eq!(vm.pop(), FALSE);
        let pad = vm.pad_addr as Cell;
        assert_eq!(vm.pop(), pad);
    }

    #[test]
    fn words_lists_definitions() {
        let mut vm = Vm::default();
        vm.interpret(": MYWORD 1 ;").unwrap();
        vm.interpret("WORDS").unwrap();
        let out = vm.take_output();
        assert!(out.contains("MYWORD"));
        assert!(out.contains("DUP"));
    }
}
