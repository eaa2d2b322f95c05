// Thin REPL collaborator. Reads lines, feeds the VM, prints word output and
// a status suffix. Script mode suppresses prompts and status so piped input
// stays clean.

use std::io::{self, BufRead, Write};

use tracing::info;

use crate::vm::Vm;

const PROMPT: &str = "\x1b[36mok>\x1b[0m ";

pub fn run(vm: &mut Vm, script_mode: bool) -> io::Result<()> {
    if !script_mode {
        info!("starting REPL");
    }
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut lines = stdin.lock().lines();

    while !vm.halted {
        if !script_mode {
            stdout.write_all(PROMPT.as_bytes())?;
            stdout.flush()?;
        }
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let result = vm.interpret(&line);
        let out = vm.take_output();
        stdout.write_all(out.as_bytes())?;
        if !script_mode {
            match result {
                Ok(()) => stdout.write_all(b" ok\n")?,
                Err(e) => {
                    let msg = format!(" ERROR: {e}\n");
                    stdout.write_all(msg.as_bytes())?;
                }
            }
        }
        stdout.flush()?;
    }
    Ok(())
}
