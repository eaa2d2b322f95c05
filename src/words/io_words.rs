// Terminal and formatting words. Output goes to the VM's output buffer,
// which the REPL drains after each utterance; KEY polls the terminal
// through crossterm.

use std::time::Duration;

use crossterm::event::{self, Event, KeyCode};

use crate::error::VmError;
use crate::vm::{Cell, Mode, Vm, VmAddr, FALSE};

use super::{add_immediate, add_word};

/// Render a cell in the given radix, lowercase-free, minus sign for
/// negatives.
pub(crate) fn format_cell(n: Cell, base: u32) -> String {
    let base = if (2..=36).contains(&base) { base } else { 10 };
    if n == 0 {
        return "0".to_string();
    }
    let digits = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut mag = (n as i128).unsigned_abs();
    let mut out = Vec::new();
    while mag > 0 {
        out.push(digits[(mag % base as u128) as usize]);
        mag /= base as u128;
    }
    if n < 0 {
        out.push(b'-');
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

fn current_base(vm: &mut Vm) -> u32 {
    let b = vm.load_cell(vm.base_addr);
    if (2..=36).contains(&b) {
        b as u32
    } else {
        10
    }
}

/// . ( n -- ) print and a trailing space
pub fn f_dot(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let n = vm.pop();
    let base = current_base(vm);
    let s = format_cell(n, base);
    vm.emit_str(&s);
    vm.emit_char(' ');
}

/// .R ( n w -- ) right-justified in a field of w
pub fn f_dot_r(vm: &mut Vm) {
    if vm.depth() < 2 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let w = vm.pop().max(0) as usize;
    let n = vm.pop();
    let base = current_base(vm);
    let s = format_cell(n, base);
    let line = format!("{s:>w$}");
    vm.emit_str(&line);
}

/// U. ( u -- ) print unsigned
pub fn f_u_dot(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let n = vm.pop() as u64;
    let base = current_base(vm) as u64;
    let mut mag = n;
    let digits = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut out = Vec::new();
    if mag == 0 {
        out.push(b'0');
    }
    while mag > 0 {
        out.push(digits[(mag % base) as usize]);
        mag /= base;
    }
    out.reverse();
    let s = String::from_utf8_lossy(&out).into_owned();
    vm.emit_str(&s);
    vm.emit_char(' ');
}

/// EMIT ( c -- )
pub fn f_emit(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let c = vm.pop();
    vm.emit_char((c as u8) as char);
}

/// CR ( -- )
pub fn f_cr(vm: &mut Vm) {
    vm.emit_char('\n');
}

/// SPACE ( -- )
pub fn f_space(vm: &mut Vm) {
    vm.emit_char(' ');
}

/// SPACES ( n -- )
pub fn f_spaces(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let n = vm.pop().max(0);
    for _ in 0..n {
        vm.emit_char(' ');
    }
}

/// TYPE ( addr u -- )
pub fn f_type(vm: &mut Vm) {
    if vm.depth() < 2 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let u = vm.pop().max(0) as usize;
    let addr = vm.pop() as VmAddr;
    let text = match vm.bytes(addr, u) {
        Some(b) => String::from_utf8_lossy(b).into_owned(),
        None => return,
    };
    vm.emit_str(&text);
}

/// COUNT ( addr -- addr+1 u ) unpack a counted string
pub fn f_count(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let addr = vm.pop() as VmAddr;
    let len = vm.load_u8(addr);
    if vm.error.is_none() {
        vm.push(addr as Cell + 1);
        vm.push(len as Cell);
    }
}

/// KEY ( -- c | 0 ) one keystroke, 0 when none is available
pub fn f_key(vm: &mut Vm) {
    let code = match event::poll(Duration::from_millis(100)) {
        Ok(true) => match event::read() {
            Ok(Event::Key(k)) => match k.code {
                KeyCode::Char(c) => c as Cell,
                KeyCode::Enter => 13,
                KeyCode::Backspace => 8,
                KeyCode::Esc => 27,
                _ => 0,
            },
            _ => 0,
        },
        _ => FALSE,
    };
    vm.push(code);
}

/// ." ( -- ) immediate: compile (or print) the text up to the closing quote
pub fn f_dot_quote(vm: &mut Vm) {
    let text = vm.parse_string(b'"');
    if vm.mode == Mode::Compile {
        let dq = vm.markers.dotq;
        vm.compile_ref(dq);
        vm.compile_string(&text);
    } else {
        vm.emit_str(&text);
    }
}

/// (.") runtime for ." — print the inline string and skip it
pub fn rt_dotq(vm: &mut Vm) {
    let ip = vm.rs_top();
    let (text, skip) = vm.read_inline_string(ip as VmAddr);
    vm.emit_str(&text);
    vm.set_rs_top(ip + skip);
}

pub(crate) fn register(vm: &mut Vm) {
    add_word(vm, "(.\")", rt_dotq);
    add_word(vm, ".", f_dot);
    add_word(vm, ".R", f_dot_r);
    add_word(vm, "U.", f_u_dot);
    add_word(vm, "EMIT", f_emit);
    add_word(vm, "CR", f_cr);
    add_word(vm, "SPACE", f_space);
    add_word(vm, "SPACES", f_spaces);
    add_word(vm, "TYPE", f_type);
    add_word(vm, "COUNT", f_count);
    add_word(vm, "KEY", f_key);
    add_immediate(vm, ".\"", f_dot_quote);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_prints_with_trailing_space() {
        let mut vm = Vm::default();
        vm.interpret("1 2 + .").unwrap();
        assert_eq!(vm.take_output(), "3 ");
    }

    #[test]
    fn formatting_respects_base() {
        assert_eq!(format_cell(255, 16), "FF");
        assert_eq!(format_cell(-255, 16), "-FF");
        assert_eq!(format_cell(5, 2), "101");
        assert_eq!(format_cell(Cell::MIN, 10), Cell::MIN.to_string());
    }

    #[test]
    fn dot_r_right_justifies() {
        let mut vm = Vm::default();
        vm.interpret("42 5 .R").unwrap();
        assert_eq!(vm.take_output(), "   42");
    }

    #[test]
    fn emit_and_cr() {
        let mut vm = Vm::default();
        vm.interpret("72 EMIT 105 EMIT CR").unwrap();
        assert_eq!(vm.take_output(), "Hi\n");
    }

    #[test]
    fn dot_quote_compiles_and_prints() {
        let mut vm = Vm::default();
        vm.interpret(": GREET .\" hello\" ; GREET GREET").unwrap();
        assert_eq!(vm.take_output(), "hellohello");
    }

    #[test]
    fn dot_quote_interprets_immediately() {
        let mut vm = Vm::default();
        vm.interpret(".\" now\"").unwrap();
        assert_eq!(vm.take_output(), "now");
    }

    #[test]
    fn type_and_count_read_counted_strings() {
        let mut vm = Vm::default();
        // Lay down a counted string by hand at PAD.
        vm.interpret("3 PAD C! 88 PAD 1+ C! 89 PAD 2+ C! 90 PAD 3 + C!")
            .unwrap();
        vm.interpret("PAD COUNT TYPE").unwrap();
        assert_eq!(vm.take_output(), "XYZ");
    }
}
