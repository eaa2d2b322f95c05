// VM state container and outer interpreter.
//
// One `Vm` value owns everything: the arena, both stacks, the dictionary and
// its adaptive control plane. Addresses handed to word code are always byte
// offsets into the arena; host pointers never cross that line. Errors follow
// the flag discipline: primitives call `fail` and return, the outer
// interpreter observes the flag, resets to a safe state and surfaces the
// error at the embedding boundary.

use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use crate::blocks::Blocks;
use crate::compiler::CfItem;
use crate::config::{VmConfig, CELL_SIZE, INPUT_BUFFER_SIZE, PAD_SIZE};
use crate::dict::{Dictionary, WordBody, WordFunc};
use crate::error::VmError;
use crate::heartbeat::{Heartbeat, HeartbeatSnapshot, LOOKUP_HEAT_AWARE, LOOKUP_NAIVE};
use crate::heat::HeatThresholds;
use crate::hotwords::HotwordsCache;
use crate::inference::PipelineMetrics;
use crate::window::RollingWindow;
use crate::words;

pub type Cell = i64;
pub type VmAddr = u64;

pub const TRUE: Cell = -1;
pub const FALSE: Cell = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Interpret,
    Compile,
}

/// Entry indices of the threaded-code marker words, resolved once at boot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Markers {
    pub lit: usize,
    pub branch: usize,
    pub zbranch: usize,
    pub do_rt: usize,
    pub qdo_rt: usize,
    pub loop_rt: usize,
    pub plus_loop_rt: usize,
    pub leave_rt: usize,
    pub exit: usize,
    pub dotq: usize,
    pub abortq: usize,
}

impl Markers {
    fn resolve(dict: &Dictionary) -> Option<Markers> {
        Some(Markers {
            lit: dict.find("(LIT)")?,
            branch: dict.find("(BRANCH)")?,
            zbranch: dict.find("(0BRANCH)")?,
            do_rt: dict.find("(DO)")?,
            qdo_rt: dict.find("(?DO)")?,
            loop_rt: dict.find("(LOOP)")?,
            plus_loop_rt: dict.find("(+LOOP)")?,
            leave_rt: dict.find("(LEAVE)")?,
            exit: dict.find("EXIT")?,
            dotq: dict.find("(.\")")?,
            abortq: dict.find("(ABORT\")")?,
        })
    }
}

pub struct Vm {
    pub(crate) cfg: VmConfig,
    memory: Vec<u8>,
    /// Next free byte in the dictionary region.
    pub(crate) here: usize,

    data_stack: Box<[Cell]>,
    pub(crate) dsp: isize,
    return_stack: Box<[Cell]>,
    pub(crate) rsp: isize,

    pub dict: Dictionary,
    pub mode: Mode,
    pub(crate) compiling_word: Option<usize>,
    pub(crate) cf_stack: Vec<CfItem>,
    pub(crate) leave_sites: Vec<usize>,
    pub(crate) temp_compile: bool,

    pub error: Option<VmError>,
    pub halted: bool,
    pub(crate) exit_colon: bool,
    pub(crate) abort_requested: bool,
    pub(crate) quit_requested: bool,

    // Fixed arena offsets, carved before the fence.
    pub state_addr: VmAddr,
    pub base_addr: VmAddr,
    pub in_addr: VmAddr,
    pub span_addr: VmAddr,
    pub scr_addr: VmAddr,
    pub tib_addr: VmAddr,
    pub pad_addr: VmAddr,
    /// WORD's counted-string target; distinct from PAD so user scratch
    /// survives tokenization.
    pub word_addr: VmAddr,

    // Adaptive control plane.
    pub heat_thresholds: HeatThresholds,
    pub hotwords: HotwordsCache,
    pub window: RollingWindow,
    pub pipeline: PipelineMetrics,
    pub heartbeat: Heartbeat,
    pub blocks: Blocks,

    pub(crate) markers: Markers,
    pub(crate) current_entry: Option<usize>,
    pub(crate) prev_lookup_id: Option<u32>,
    /// Nesting depth of colon execution; nonzero means the return-stack top
    /// is a saved IP that >R and friends must not bury.
    pub(crate) colon_depth: usize,

    out: String,
    start: Instant,
}

impl Default for Vm {
    fn default() -> Vm {
        Vm::new(VmConfig::default())
    }
}

impl Vm {
    pub fn new(cfg: VmConfig) -> Vm {
        let mut vm = Vm {
            memory: vec![0; cfg.memory_size],
            here: 0,
            data_stack: vec![0; cfg.stack_depth].into_boxed_slice(),
            dsp: -1,
            return_stack: vec![0; cfg.stack_depth].into_boxed_slice(),
            rsp: -1,
            dict: Dictionary::new(),
            mode: Mode::Interpret,
            compiling_word: None,
            cf_stack: Vec::with_capacity(crate::config::CF_STACK_MAX),
            leave_sites: Vec::new(),
            temp_compile: false,
            error: None,
            halted: false,
            exit_colon: false,
            abort_requested: false,
            quit_requested: false,
            state_addr: 0,
            base_addr: 0,
            in_addr: 0,
            span_addr: 0,
            scr_addr: 0,
            tib_addr: 0,
            pad_addr: 0,
            word_addr: 0,
            heat_thresholds: HeatThresholds::default(),
            hotwords: HotwordsCache::new(cfg.hotwords_slots),
            window: RollingWindow::new(cfg.initial_window, cfg.min_window),
            pipeline: PipelineMetrics::default(),
            heartbeat: Heartbeat::new(&cfg),
            blocks: Blocks::new(),
            markers: Markers::default(),
            current_entry: None,
            prev_lookup_id: None,
            colon_depth: 0,
            out: String::new(),
            start: Instant::now(),
            cfg,
        };
        vm.cold_start();
        vm
    }

    /// Carve the system cells, register the standard word set and establish
    /// the dictionary fence.
    fn cold_start(&mut self) {
        let cell = |vm: &mut Vm| vm.allot(CELL_SIZE).unwrap_or(0);
        self.state_addr = cell(self);
        self.base_addr = cell(self);
        self.in_addr = cell(self);
        self.span_addr = cell(self);
        self.scr_addr = cell(self);
        self.tib_addr = self.allot(INPUT_BUFFER_SIZE).unwrap_or(0);
        self.pad_addr = self.allot(PAD_SIZE).unwrap_or(0);
        self.word_addr = self.allot(PAD_SIZE).unwrap_or(0);
        self.align_here();
        self.store_cell(self.base_addr, 10);

        words::register_standard_words(self);
        match Markers::resolve(&self.dict) {
            Some(m) => self.markers = m,
            None => {
                // Integrity violation at boot: refuse further input.
                error!("marker words missing after registration");
                self.halted = true;
                return;
            }
        }
        self.align_here();
        self.dict.set_fence(self.here);
        self.heartbeat
            .shared
            .lookup_strategy
            .store(LOOKUP_HEAT_AWARE, std::sync::atomic::Ordering::Relaxed);
        info!(
            words = self.dict.len(),
            fence = self.here,
            "cold start complete"
        );
    }

    pub fn config(&self) -> &VmConfig {
        &self.cfg
    }

    /// Monotonic nanoseconds since VM creation; never zero, so zero can mean
    /// "never" in the physics timestamps.
    pub fn now_ns(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64 + 1
    }

    /// Record a fault. Only the first error per utterance is kept.
    pub fn fail(&mut self, e: VmError) {
        if self.error.is_none() {
            error!(tag = e.tag(), "{e}");
            self.error = Some(e);
        }
    }

    // ----- stacks ---------------------------------------------------------

    #[inline]
    pub fn push(&mut self, v: Cell) {
        if self.dsp + 1 >= self.data_stack.len() as isize {
            self.fail(VmError::StackOverflow);
            return;
        }
        self.dsp += 1;
        self.data_stack[self.dsp as usize] = v;
    }

    #[inline]
    pub fn pop(&mut self) -> Cell {
        if self.dsp < 0 {
            self.fail(VmError::StackUnderflow);
            return 0;
        }
        let v = self.data_stack[self.dsp as usize];
        self.dsp -= 1;
        v
    }

    /// n-th item from the top of the data stack (0 = top).
    pub fn peek(&self, n: usize) -> Option<Cell> {
        let i = self.dsp - n as isize;
        if i < 0 {
            None
        } else {
            Some(self.data_stack[i as usize])
        }
    }

    pub fn depth(&self) -> usize {
        (self.dsp + 1) as usize
    }

    pub fn data_stack(&self) -> &[Cell] {
        &self.data_stack[..self.depth()]
    }

    #[inline]
    pub fn rpush(&mut self, v: Cell) {
        if self.rsp + 1 >= self.return_stack.len() as isize {
            self.fail(VmError::StackOverflow);
            return;
        }
        self.rsp += 1;
        self.return_stack[self.rsp as usize] = v;
    }

    #[inline]
    pub fn rpop(&mut self) -> Cell {
        if self.rsp < 0 {
            self.fail(VmError::StackUnderflow);
            return 0;
        }
        let v = self.return_stack[self.rsp as usize];
        self.rsp -= 1;
        v
    }

    /// Saved instruction pointer: top of the return stack during colon
    /// execution. Branch markers mutate it in place.
    #[inline]
    pub(crate) fn rs_top(&mut self) -> Cell {
        if self.rsp < 0 {
            self.fail(VmError::StackUnderflow);
            return 0;
        }
        self.return_stack[self.rsp as usize]
    }

    #[inline]
    pub(crate) fn set_rs_top(&mut self, v: Cell) {
        if self.rsp < 0 {
            self.fail(VmError::StackUnderflow);
            return;
        }
        self.return_stack[self.rsp as usize] = v;
    }

    /// n-th return-stack item from the top (0 = top).
    pub(crate) fn rs_peek(&mut self, n: usize) -> Cell {
        let i = self.rsp - n as isize;
        if i < 0 {
            self.fail(VmError::StackUnderflow);
            return 0;
        }
        self.return_stack[i as usize]
    }

    pub(crate) fn set_rs_peek(&mut self, n: usize, v: Cell) {
        let i = self.rsp - n as isize;
        if i < 0 {
            self.fail(VmError::StackUnderflow);
            return;
        }
        self.return_stack[i as usize] = v;
    }

    pub fn rdepth(&self) -> usize {
        (self.rsp + 1) as usize
    }

    pub(crate) fn rdrop_n(&mut self, n: usize) {
        self.rsp -= n as isize;
        if self.rsp < -1 {
            self.rsp = -1;
            self.fail(VmError::StackUnderflow);
        }
    }

    // ----- arena ----------------------------------------------------------

    pub fn addr_ok(&self, addr: VmAddr, len: usize) -> bool {
        (addr as usize)
            .checked_add(len)
            .map_or(false, |end| end <= self.memory.len())
    }

    pub fn load_cell(&mut self, addr: VmAddr) -> Cell {
        if !self.addr_ok(addr, CELL_SIZE) || addr as usize % CELL_SIZE != 0 {
            self.fail(VmError::AddressOutOfBounds);
            return 0;
        }
        let a = addr as usize;
        let mut b = [0u8; CELL_SIZE];
        b.copy_from_slice(&self.memory[a..a + CELL_SIZE]);
        Cell::from_le_bytes(b)
    }

    pub fn store_cell(&mut self, addr: VmAddr, v: Cell) {
        if !self.addr_ok(addr, CELL_SIZE) || addr as usize % CELL_SIZE != 0 {
            self.fail(VmError::AddressOutOfBounds);
            return;
        }
        let a = addr as usize;
        self.memory[a..a + CELL_SIZE].copy_from_slice(&v.to_le_bytes());
    }

    pub fn load_u8(&mut self, addr: VmAddr) -> u8 {
        if !self.addr_ok(addr, 1) {
            self.fail(VmError::AddressOutOfBounds);
            return 0;
        }
        self.memory[addr as usize]
    }

    pub fn store_u8(&mut self, addr: VmAddr, v: u8) {
        if !self.addr_ok(addr, 1) {
            self.fail(VmError::AddressOutOfBounds);
            return;
        }
        self.memory[addr as usize] = v;
    }

    pub(crate) fn bytes(&mut self, addr: VmAddr, len: usize) -> Option<&[u8]> {
        if !self.addr_ok(addr, len) {
            self.fail(VmError::AddressOutOfBounds);
            return None;
        }
        Some(&self.memory[addr as usize..addr as usize + len])
    }

    pub(crate) fn bytes_mut(&mut self, addr: VmAddr, len: usize) -> Option<&mut [u8]> {
        if !self.addr_ok(addr, len) {
            self.fail(VmError::AddressOutOfBounds);
            return None;
        }
        Some(&mut self.memory[addr as usize..addr as usize + len])
    }

    /// Counted string at a VM address.
    pub(crate) fn counted_string(&mut self, addr: VmAddr) -> Option<String> {
        let len = self.load_u8(addr) as usize;
        let bytes = self.bytes(addr + 1, len)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn here(&self) -> usize {
        self.here
    }

    /// Reserve dictionary-region bytes; HERE advances.
    pub fn allot(&mut self, bytes: usize) -> Result<VmAddr, VmError> {
        if self.here + bytes > self.cfg.dictionary_size {
            self.fail(VmError::DictionaryFull);
            return Err(VmError::DictionaryFull);
        }
        let a = self.here as VmAddr;
        self.here += bytes;
        Ok(a)
    }

    pub(crate) fn rewind_here(&mut self, to: usize) {
        self.here = to;
    }

    pub fn align_here(&mut self) {
        self.here = (self.here + CELL_SIZE - 1) & !(CELL_SIZE - 1);
    }

    // ----- dictionary -----------------------------------------------------

    /// Append an entry at HERE; any structural mutation invalidates the
    /// hot-words cache wholesale.
    pub(crate) fn define_entry(&mut self, name: &str, body: WordBody) -> Result<usize, VmError> {
        self.align_here();
        let mark = self.here;
        match self.dict.define(name, body, mark) {
            Ok(idx) => {
                self.hotwords.invalidate();
                Ok(idx)
            }
            Err(e) => {
                self.fail(e);
                Err(e)
            }
        }
    }

    /// Embedding API: append a primitive-backed entry.
    pub fn create_word(&mut self, name: &str, func: WordFunc) -> Result<usize, VmError> {
        self.define_entry(name, WordBody::Primitive(func))
    }

    /// Lookup through the configured strategy: speculative prefetch, then the
    /// advisory cache, then the full chain. Feeds the pipeline metrics and
    /// the per-entry transition predictions.
    pub fn find_word(&mut self, name: &str) -> Option<usize> {
        self.heartbeat.dictionary_lookups += 1;
        let strategy = self
            .heartbeat
            .shared
            .lookup_strategy
            .load(std::sync::atomic::Ordering::Relaxed);

        let mut found = None;
        if strategy > LOOKUP_HEAT_AWARE {
            found = self.speculative_lookup(name);
        }
        if found.is_none() && strategy > LOOKUP_NAIVE {
            found = self.hotwords.lookup(&self.dict, name);
        }
        if found.is_none() {
            found = self.dict.find(name);
            if let Some(idx) = found {
                let threshold = self
                    .heat_thresholds
                    .p75
                    .max(self.cfg.demotion_threshold);
                self.hotwords.consider(&self.dict, idx, threshold);
            }
        }

        if let Some(idx) = found {
            let fid = self.dict.entry(idx).word_id;
            if let Some(pid) = self.prev_lookup_id {
                if let Some(pidx) = self.dict.by_word_id(pid) {
                    self.dict.entry_mut(pidx).predicted_next = Some(fid);
                }
            }
            self.prev_lookup_id = Some(fid);
        }
        found
    }

    /// Pipelined prediction: does the word that last followed the previous
    /// lookup match this name? Verified before use, like every advisory path.
    fn speculative_lookup(&mut self, name: &str) -> Option<usize> {
        let pidx = self.dict.by_word_id(self.prev_lookup_id?)?;
        let predicted = self.dict.entry(pidx).predicted_next?;
        self.pipeline.prefetch_attempts += 1;
        let cidx = self.dict.by_word_id(predicted)?;
        let e = self.dict.entry(cidx);
        if e.is_findable() && e.name.eq_ignore_ascii_case(name) {
            self.pipeline.prefetch_hits += 1;
            trace!(name, "speculative lookup hit");
            Some(cidx)
        } else {
            None
        }
    }

    // ----- outer interpreter ---------------------------------------------

    /// Feed a buffer of source text. Returns when the buffer is consumed or
    /// the error flag is set.
    pub fn interpret(&mut self, input: &str) -> Result<(), VmError> {
        for line in input.lines() {
            if self.halted {
                break;
            }
            self.feed_line(line)?;
            if self.abort_requested {
                self.abort_requested = false;
                break;
            }
            if self.quit_requested {
                self.quit_requested = false;
                break;
            }
        }
        Ok(())
    }

    fn feed_line(&mut self, line: &str) -> Result<(), VmError> {
        let bytes = line.as_bytes();
        if bytes.len() >= INPUT_BUFFER_SIZE {
            warn!(len = bytes.len(), "input line truncated to TIB capacity");
        }
        let n = bytes.len().min(INPUT_BUFFER_SIZE - 1);
        let tib = self.tib_addr as usize;
        self.memory[tib..tib + n].copy_from_slice(&bytes[..n]);
        self.store_cell(self.span_addr, n as Cell);
        self.store_cell(self.in_addr, 0);

        loop {
            if self.halted || self.abort_requested || self.quit_requested {
                break;
            }
            let Some(token) = self.parse_token(b' ') else {
                break;
            };
            self.interpret_token(&token);
            if let Some(e) = self.error {
                self.reset_after_error();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Parse the next delimiter-separated token out of the TIB. The token is
    /// also laid down as a counted string in the WORD buffer.
    pub(crate) fn parse_token(&mut self, delim: u8) -> Option<String> {
        let span = self.load_cell(self.span_addr).max(0) as usize;
        let mut i = self.load_cell(self.in_addr).max(0) as usize;
        let tib = self.tib_addr as usize;
        let is_delim = |b: u8| {
            if delim == b' ' {
                b.is_ascii_whitespace()
            } else {
                b == delim
            }
        };
        while i < span && is_delim(self.memory[tib + i]) {
            i += 1;
        }
        let start = i;
        while i < span && !is_delim(self.memory[tib + i]) {
            i += 1;
        }
        self.store_cell(self.in_addr, (i + 1) as Cell);
        if start == i {
            return None;
        }
        let token = String::from_utf8_lossy(&self.memory[tib + start..tib + i]).into_owned();
        let wb = self.word_addr as usize;
        let n = token.len().min(PAD_SIZE - 1);
        self.memory[wb] = n as u8;
        self.memory[wb + 1..wb + 1 + n].copy_from_slice(&token.as_bytes()[..n]);
        trace!(%token, "parsed");
        Some(token)
    }

    /// Raw text up to `delim` (or end of line), starting at >IN. Used by
    /// `."`, `ABORT"` and `(`.
    pub(crate) fn parse_string(&mut self, delim: u8) -> String {
        let span = self.load_cell(self.span_addr).max(0) as usize;
        let start = (self.load_cell(self.in_addr).max(0) as usize).min(span);
        let tib = self.tib_addr as usize;
        let mut i = start;
        while i < span && self.memory[tib + i] != delim {
            i += 1;
        }
        let s = String::from_utf8_lossy(&self.memory[tib + start..tib + i]).into_owned();
        self.store_cell(self.in_addr, (i + 1) as Cell);
        s
    }

    /// Number parse in the current BASE, with optional leading sign.
    pub(crate) fn parse_number(&mut self, token: &str) -> Option<Cell> {
        let base = self.load_cell(self.base_addr);
        let base = if (2..=36).contains(&base) { base as u32 } else { 10 };
        let (neg, digits) = match token.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        if digits.is_empty() {
            return None;
        }
        let mut acc: Cell = 0;
        for c in digits.chars() {
            let d = c.to_digit(base)? as Cell;
            acc = acc.wrapping_mul(base as Cell).wrapping_add(d);
        }
        Some(if neg { acc.wrapping_neg() } else { acc })
    }

    /// After a fault: discard the rest of the utterance, return to interpret
    /// mode, clear the return stack, keep the data stack for post-mortem.
    pub(crate) fn reset_after_error(&mut self) {
        debug!("resetting interpreter state after error");
        self.mode = Mode::Interpret;
        self.cf_stack.clear();
        self.leave_sites.clear();
        self.temp_compile = false;
        self.compiling_word = None;
        self.rsp = -1;
        self.exit_colon = false;
        self.abort_requested = false;
        self.quit_requested = false;
        self.error = None;
    }

    /// ABORT: clear both stacks and unwind to the outer interpreter. Not an
    /// error — the flag stays clear.
    pub(crate) fn do_abort(&mut self) {
        self.dsp = -1;
        self.rsp = -1;
        self.exit_colon = false;
        self.abort_requested = true;
    }

    /// QUIT: clear the return stack and unwind silently.
    pub(crate) fn do_quit(&mut self) {
        self.rsp = -1;
        self.exit_colon = false;
        self.quit_requested = true;
    }

    // ----- output ---------------------------------------------------------

    pub fn emit_char(&mut self, c: char) {
        self.out.push(c);
    }

    pub fn emit_str(&mut self, s: &str) {
        self.out.push_str(s);
    }

    /// Drain accumulated word output (the REPL prints this per line).
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.out)
    }

    // ----- observability --------------------------------------------------

    /// Latest published heartbeat snapshot; never blocks.
    pub fn snapshot_read(&self) -> Result<HeartbeatSnapshot, VmError> {
        self.heartbeat.shared.read()
    }

    /// Start the asynchronous heartbeat embodiment.
    pub fn heartbeat_start(&mut self) {
        self.heartbeat.start_worker();
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        self.heartbeat.stop_worker();
    }
}
