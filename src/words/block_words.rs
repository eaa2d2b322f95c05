// Block words. The storage backend is whatever is attached to the VM;
// LOAD and THRU interpret block contents as source, with the input state
// saved and restored around the nested interpretation.

use crate::config::{BLOCK_SIZE, INPUT_BUFFER_SIZE};
use crate::error::VmError;
use crate::vm::{Cell, Vm};

use super::add_word;

/// BLOCK ( n -- addr )
pub fn f_block(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let n = vm.pop();
    if n < 0 {
        vm.fail(VmError::AddressOutOfBounds);
        return;
    }
    if let Ok(addr) = vm.blk_get_buffer(n as usize) {
        vm.push(addr as Cell);
        vm.store_cell(vm.scr_addr, n);
    }
}

/// UPDATE ( -- )
pub fn f_update(vm: &mut Vm) {
    vm.blk_update();
}

/// FLUSH ( -- )
pub fn f_flush(vm: &mut Vm) {
    let _ = vm.blk_flush();
}

/// SCR ( -- addr ) the most recently referenced block number
pub fn f_scr(vm: &mut Vm) {
    let a = vm.scr_addr as Cell;
    vm.push(a);
}

fn load_block(vm: &mut Vm, n: usize) {
    let Ok(addr) = vm.blk_get_buffer(n) else {
        return;
    };
    // A block is 16 lines of 64 characters; feed it to the interpreter that
    // way so each line fits the TIB.
    let text = match vm.bytes(addr, BLOCK_SIZE) {
        Some(b) => b
            .chunks(64)
            .map(|line| String::from_utf8_lossy(line).replace('\0', " "))
            .collect::<Vec<_>>()
            .join("\n"),
        None => return,
    };
    vm.store_cell(vm.scr_addr, n as Cell);

    // Save the live input state around the nested interpretation.
    let tib = vm.tib_addr;
    let saved_tib = match vm.bytes(tib, INPUT_BUFFER_SIZE) {
        Some(b) => b.to_vec(),
        None => return,
    };
    let saved_span = vm.load_cell(vm.span_addr);
    let saved_in = vm.load_cell(vm.in_addr);

    if let Err(e) = vm.interpret(&text) {
        vm.fail(e);
    }

    if let Some(dst) = vm.bytes_mut(tib, INPUT_BUFFER_SIZE) {
        dst.copy_from_slice(&saved_tib);
    }
    vm.store_cell(vm.span_addr, saved_span);
    vm.store_cell(vm.in_addr, saved_in);
}

/// LOAD ( n -- ) interpret block n as source
pub fn f_load(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let n = vm.pop();
    if n < 1 {
        vm.fail(VmError::AddressOutOfBounds);
        return;
    }
    load_block(vm, n as usize);
}

/// THRU ( n1 n2 -- ) LOAD a range of blocks
pub fn f_thru(vm: &mut Vm) {
    if vm.depth() < 2 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let n2 = vm.pop();
    let n1 = vm.pop();
    if n1 < 1 || n2 < n1 {
        vm.fail(VmError::AddressOutOfBounds);
        return;
    }
    for n in n1..=n2 {
        if vm.error.is_some() || vm.halted {
            break;
        }
        load_block(vm, n as usize);
    }
}

/// LIST ( n -- ) print a block as 16 lines of 64 characters
pub fn f_list(vm: &mut Vm) {
    if vm.depth() < 1 {
        vm.fail(VmError::StackUnderflow);
        return;
    }
    let n = vm.pop();
    if n < 1 {
        vm.fail(VmError::AddressOutOfBounds);
        return;
    }
    let Ok(addr) = vm.blk_get_buffer(n as usize) else {
        return;
    };
    let text = match vm.bytes(addr, BLOCK_SIZE) {
        Some(b) => b.to_vec(),
        None => return,
    };
    vm.store_cell(vm.scr_addr, n);
    let header = format!("Block {n}\n");
    vm.emit_str(&header);
    for (i, line) in text.chunks(64).enumerate() {
        let printable: String = line
            .iter()
            .map(|b| {
                if b.is_ascii_graphic() || *b == b' ' {
                    *b as char
                } else {
                    ' '
                }
            })
            .collect();
        let row = format!("{i:2}: {}\n", printable.trim_end());
        vm.emit_str(&row);
    }
}

pub(crate) fn register(vm: &mut Vm) {
    add_word(vm, "BLOCK", f_block);
    add_word(vm, "UPDATE", f_update);
    add_word(vm, "FLUSH", f_flush);
    add_word(vm, "SCR", f_scr);
    add_word(vm, "LOAD", f_load);
    add_word(vm, "THRU", f_thru);
    add_word(vm, "LIST", f_list);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poke_text(vm: &mut Vm, block: usize, text: &str) {
        vm.push(block as Cell);
        f_block(vm);
        let addr = vm.pop() as u64;
        for (i, b) in text.bytes().enumerate() {
            vm.store_u8(addr + i as u64, b);
        }
    }

    #[test]
    fn load_interprets_block_text() {
        let mut vm = Vm::default();
        poke_text(&mut vm, 1, " 40 2 + ");
        vm.interpret("1 LOAD").unwrap();
        assert_eq!(vm.data_stack(), &[42]);
    }

    #[test]
    fn load_restores_outer_input() {
        let mut vm = Vm::default();
        poke_text(&mut vm, 2, " 10 ");
        // Tokens after LOAD on the same line must still be seen.
        vm.interpret("2 LOAD 20").unwrap();
        assert_eq!(vm.data_stack(), &[10, 20]);
    }

    #[test]
    fn thru_loads_a_range() {
        let mut vm = Vm::default();
        poke_text(&mut vm, 3, " 1 ");
        poke_text(&mut vm, 4, " 2 ");
        poke_text(&mut vm, 5, " 3 ");
        vm.interpret("3 5 THRU").unwrap();
        assert_eq!(vm.data_stack(), &[1, 2, 3]);
    }

    #[test]
    fn definitions_survive_load() {
        let mut vm = Vm::default();
        poke_text(&mut vm, 6, " : FROMBLOCK 99 ; ");
        vm.interpret("6 LOAD FROMBLOCK").unwrap();
        assert_eq!(vm.data_stack(), &[99]);
    }

    #[test]
    fn list_sets_scr() {
        let mut vm = Vm::default();
        poke_text(&mut vm, 7, "HELLO BLOCK");
        vm.interpret("7 LIST SCR @").unwrap();
        assert_eq!(vm.pop(), 7);
        assert!(vm.take_output().contains("HELLO BLOCK"));
    }
}
