// End-to-end interpreter scenarios: literal inputs against expected printed
// output, decimal BASE throughout.

use starforth::{Vm, VmError};

fn output_of(input: &str) -> String {
    let mut vm = Vm::default();
    vm.interpret(input).expect("scenario should not fault");
    vm.take_output()
}

#[test]
fn addition_prints_sum() {
    assert_eq!(output_of("1 2 + ."), "3 ");
}

#[test]
fn colon_definition_round_trip() {
    assert_eq!(output_of(": SQ DUP * ; 5 SQ ."), "25 ");
}

#[test]
fn interpret_mode_do_loop() {
    assert_eq!(output_of("10 0 DO I . LOOP"), "0 1 2 3 4 5 6 7 8 9 ");
}

#[test]
fn leave_exits_early() {
    assert_eq!(
        output_of(": T 5 0 DO I 3 = IF LEAVE THEN I . LOOP ; T"),
        "0 1 2 "
    );
}

#[test]
fn begin_while_repeat() {
    assert_eq!(
        output_of(": R 0 BEGIN DUP 3 < WHILE DUP . 1 + REPEAT DROP ; R"),
        "0 1 2 "
    );
}

#[test]
fn recursive_factorial() {
    assert_eq!(
        output_of(": F RECURSIVE DUP 1 > IF DUP 1 - F * THEN ; 5 F ."),
        "120 "
    );
}

#[test]
fn compiled_body_matches_inline_execution() {
    // Property 3: a colon word built from closed primitives behaves exactly
    // like its body run inline.
    let program = "3 4 OVER + SWAP -";
    let mut inline_vm = Vm::default();
    inline_vm.interpret(program).unwrap();
    let mut compiled_vm = Vm::default();
    compiled_vm
        .interpret(": BODY OVER + SWAP - ; 3 4 BODY")
        .unwrap();
    assert_eq!(inline_vm.data_stack(), compiled_vm.data_stack());
}

#[test]
fn control_flow_balance_is_enforced() {
    // Well-formed programs compile; removing any one keyword faults.
    let good = [
        ": A 1 IF 2 THEN ;",
        ": B BEGIN 1 UNTIL ;",
        ": C 3 0 DO LOOP ;",
        ": D 0 BEGIN DUP 2 < WHILE 1+ REPEAT DROP ;",
    ];
    for p in good {
        let mut vm = Vm::default();
        assert_eq!(vm.interpret(p), Ok(()), "{p}");
    }
    let broken = [
        ": A 1 IF 2 ;",
        ": A 1 2 THEN ;",
        ": B 1 UNTIL ;",
        ": C 3 0 DO ;",
        ": D 0 BEGIN DUP 2 < 1+ REPEAT DROP ;",
    ];
    for p in broken {
        let mut vm = Vm::default();
        assert_eq!(
            vm.interpret(p),
            Err(VmError::ControlFlowMismatch),
            "{p}"
        );
    }
}

#[test]
fn arithmetic_identities_hold() {
    // Property 2 over a spread of values.
    for (a, b) in [(0i64, 1i64), (17, 5), (-9, 3), (1 << 40, 977), (-1, -1)] {
        let mut vm = Vm::default();
        vm.interpret(&format!("{a} {b} + {b} -")).unwrap();
        assert_eq!(vm.data_stack(), &[a]);
        if b != 0 {
            let mut vm = Vm::default();
            vm.interpret(&format!("{a} {b} * {b} /")).unwrap();
            assert_eq!(vm.data_stack(), &[a]);
        }
    }
}

#[test]
fn stack_laws() {
    // Property 1: LIFO order for arbitrary push/pop sequences.
    let mut vm = Vm::default();
    let values = [3, 1, 4, 1, 5, 9, 2, 6];
    for v in values {
        vm.push(v);
    }
    for v in values.iter().rev() {
        assert_eq!(vm.pop(), *v);
    }
    assert!(vm.error.is_none());
}

#[test]
fn error_resets_leave_the_vm_usable() {
    let mut vm = Vm::default();
    assert_eq!(vm.interpret("GIBBERISH-WORD"), Err(VmError::UnknownWord));
    // After the fault the same VM interprets normally again.
    vm.interpret("1 2 + .").unwrap();
    assert_eq!(vm.take_output(), "3 ");
}

#[test]
fn unknown_word_mid_line_discards_the_rest() {
    let mut vm = Vm::default();
    assert_eq!(
        vm.interpret("1 NOT-A-WORD 2 3"),
        Err(VmError::UnknownWord)
    );
    assert_eq!(vm.data_stack(), &[1]);
}

#[test]
fn deep_nesting_executes() {
    let mut vm = Vm::default();
    vm.interpret(": INNER 1 + ; : MID INNER INNER ; : OUTER MID MID ; 0 OUTER")
        .unwrap();
    assert_eq!(vm.data_stack(), &[4]);
}

#[test]
fn multiline_definitions_compile() {
    let mut vm = Vm::default();
    vm.interpret(": TRIPLE\n  3 *\n;\n7 TRIPLE .").unwrap();
    assert_eq!(vm.take_output(), "21 ");
}
