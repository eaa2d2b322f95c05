use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use argh::FromArgs;
use tracing_subscriber::EnvFilter;

use starforth::blocks::FileBlockStore;
use starforth::{repl, Vm, VmConfig};

/// StarForth: FORTH-79 VM with an adaptive threaded-code runtime.
#[derive(FromArgs)]
struct Args {
    /// source file to interpret before (or instead of) the REPL
    #[argh(option, short = 'f')]
    file: Option<PathBuf>,

    /// script mode: no prompts, no ok/ERROR status
    #[argh(switch, short = 's')]
    script: bool,

    /// stay interactive after running --file
    #[argh(switch, short = 'i')]
    interactive: bool,

    /// arena size in bytes (default 5 MiB)
    #[argh(option)]
    arena: Option<usize>,

    /// file-backed block storage image
    #[argh(option)]
    blocks: Option<PathBuf>,

    /// run the heartbeat on a background ticker instead of inline
    #[argh(switch)]
    async_heartbeat: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Args = argh::from_env();

    let mut cfg = VmConfig::default();
    if let Some(arena) = args.arena {
        cfg.dictionary_size = cfg.dictionary_size.min(arena / 2);
        cfg.memory_size = arena;
    }
    let mut vm = Vm::new(cfg);

    if let Some(path) = &args.blocks {
        let blocks = vm.config().block_count();
        let store = FileBlockStore::open(path, blocks)
            .with_context(|| format!("opening block store {}", path.display()))?;
        vm.blocks.attach(Box::new(store));
    }

    if args.async_heartbeat {
        vm.heartbeat_start();
    }

    if let Some(path) = &args.file {
        let source = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        if let Err(e) = vm.interpret(&source) {
            print!("{}", vm.take_output());
            anyhow::bail!("{}: {e}", path.display());
        }
        print!("{}", vm.take_output());
        if !args.interactive {
            return Ok(());
        }
    }

    repl::run(&mut vm, args.script)?;
    Ok(())
}
