// Block subsystem: 1 KiB blocks behind a storage interface.
//
// Block 0 is reserved; blocks 1..N-1 are user-addressable. With no backing
// store attached the block region of the arena is the storage and buffers
// are the blocks themselves. With a store attached, two buffer slots at the
// bottom of the block region are mapped on demand, written back when dirty.
// The core mandates nothing about the bytes beyond "raw 1 KiB".

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, error};

use crate::config::BLOCK_SIZE;
use crate::error::VmError;
use crate::vm::{Vm, VmAddr};

pub trait BlockIo: Send {
    fn read_block(&mut self, n: usize, buf: &mut [u8]) -> std::io::Result<()>;
    fn write_block(&mut self, n: usize, buf: &[u8]) -> std::io::Result<()>;
    fn block_count(&self) -> usize;
}

/// File-backed store: the file is a flat array of blocks.
pub struct FileBlockStore {
    file: File,
    blocks: usize,
}

impl FileBlockStore {
    pub fn open(path: &Path, blocks: usize) -> std::io::Result<FileBlockStore> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len((blocks * BLOCK_SIZE) as u64)?;
        Ok(FileBlockStore { file, blocks })
    }
}

impl BlockIo for FileBlockStore {
    fn read_block(&mut self, n: usize, buf: &mut [u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start((n * BLOCK_SIZE) as u64))?;
        self.file.read_exact(buf)
    }

    fn write_block(&mut self, n: usize, buf: &[u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start((n * BLOCK_SIZE) as u64))?;
        self.file.write_all(buf)
    }

    fn block_count(&self) -> usize {
        self.blocks
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BufferSlot {
    block: Option<usize>,
    dirty: bool,
}

pub struct Blocks {
    io: Option<Box<dyn BlockIo>>,
    slots: [BufferSlot; 2],
    next_victim: usize,
    /// Slot most recently handed out; UPDATE marks it.
    current: Option<usize>,
}

impl Blocks {
    pub fn new() -> Blocks {
        Blocks {
            io: None,
            slots: [BufferSlot::default(); 2],
            next_victim: 0,
            current: None,
        }
    }

    pub fn attach(&mut self, io: Box<dyn BlockIo>) {
        self.io = Some(io);
        self.slots = [BufferSlot::default(); 2];
        self.current = None;
    }

    pub fn has_store(&self) -> bool {
        self.io.is_some()
    }
}

impl Default for Blocks {
    fn default() -> Blocks {
        Blocks::new()
    }
}

impl Vm {
    fn block_bounds_ok(&self, n: usize) -> bool {
        let max = match &self.blocks.io {
            Some(io) => io.block_count().min(self.cfg.block_count()),
            None => self.cfg.block_count(),
        };
        n >= 1 && n < max
    }

    fn slot_addr(&self, slot: usize) -> VmAddr {
        (self.cfg.blocks_base() + slot * BLOCK_SIZE) as VmAddr
    }

    /// Map block `n` and return the VM address of its buffer.
    pub fn blk_get_buffer(&mut self, n: usize) -> Result<VmAddr, VmError> {
        if !self.block_bounds_ok(n) {
            self.fail(VmError::AddressOutOfBounds);
            return Err(VmError::AddressOutOfBounds);
        }
        if self.blocks.io.is_none() {
            // Arena-resident storage: the block *is* its buffer.
            return Ok((self.cfg.blocks_base() + n * BLOCK_SIZE) as VmAddr);
        }
        if let Some(slot) = (0..2).find(|s| self.blocks.slots[*s].block == Some(n)) {
            self.blocks.current = Some(slot);
            return Ok(self.slot_addr(slot));
        }
        let victim = self.blocks.next_victim;
        self.blocks.next_victim = 1 - victim;
        self.writeback_slot(victim)?;
        let addr = self.slot_addr(victim);
        let mut staged = vec![0u8; BLOCK_SIZE];
        if let Some(io) = self.blocks.io.as_mut() {
            if let Err(e) = io.read_block(n, &mut staged) {
                error!(block = n, "block read failed: {e}");
                self.fail(VmError::AddressOutOfBounds);
                return Err(VmError::AddressOutOfBounds);
            }
        }
        if let Some(dst) = self.bytes_mut(addr, BLOCK_SIZE) {
            dst.copy_from_slice(&staged);
        }
        self.blocks.slots[victim] = BufferSlot {
            block: Some(n),
            dirty: false,
        };
        self.blocks.current = Some(victim);
        debug!(block = n, slot = victim, "block mapped");
        Ok(addr)
    }

    /// Mark the most recently referenced block buffer as modified.
    pub fn blk_update(&mut self) {
        if let Some(slot) = self.blocks.current {
            self.blocks.slots[slot].dirty = true;
        }
    }

    /// Write all dirty buffers back and unmap them.
    pub fn blk_flush(&mut self) -> Result<(), VmError> {
        for slot in 0..2 {
            self.writeback_slot(slot)?;
            self.blocks.slots[slot] = BufferSlot::default();
        }
        self.blocks.current = None;
        Ok(())
    }

    fn writeback_slot(&mut self, slot: usize) -> Result<(), VmError> {
        let BufferSlot { block, dirty } = self.blocks.slots[slot];
        let (Some(n), true) = (block, dirty) else {
            return Ok(());
        };
        let addr = self.slot_addr(slot);
        let buf = match self.bytes(addr, BLOCK_SIZE) {
            Some(b) => b.to_vec(),
            None => return Err(VmError::AddressOutOfBounds),
        };
        if let Some(io) = self.blocks.io.as_mut() {
            if let Err(e) = io.write_block(n, &buf) {
                error!(block = n, "block write failed: {e}");
                self.fail(VmError::AddressOutOfBounds);
                return Err(VmError::AddressOutOfBounds);
            }
        }
        self.blocks.slots[slot].dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Cell;

    #[test]
    fn block_zero_is_reserved() {
        let mut vm = Vm::default();
        assert_eq!(vm.blk_get_buffer(0), Err(VmError::AddressOutOfBounds));
        vm.error = None;
        assert!(vm.blk_get_buffer(1).is_ok());
    }

    #[test]
    fn memory_backed_blocks_are_stable() {
        let mut vm = Vm::default();
        let a1 = vm.blk_get_buffer(2).unwrap();
        vm.store_u8(a1, b'X');
        let a2 = vm.blk_get_buffer(2).unwrap();
        assert_eq!(a1, a2);
        assert_eq!(vm.load_u8(a2), b'X');
    }

    #[test]
    fn file_backed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.img");
        {
            let mut vm = Vm::default();
            let store = FileBlockStore::open(&path, 64).unwrap();
            vm.blocks.attach(Box::new(store));
            let addr = vm.blk_get_buffer(3).unwrap();
            vm.store_u8(addr, b'Z');
            vm.blk_update();
            vm.blk_flush().unwrap();
        }
        {
            let mut vm = Vm::default();
            let store = FileBlockStore::open(&path, 64).unwrap();
            vm.blocks.attach(Box::new(store));
            let addr = vm.blk_get_buffer(3).unwrap();
            assert_eq!(vm.load_u8(addr), b'Z');
        }
    }

    #[test]
    fn eviction_writes_back_dirty_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evict.img");
        let mut vm = Vm::default();
        vm.blocks
            .attach(Box::new(FileBlockStore::open(&path, 64).unwrap()));
        let a = vm.blk_get_buffer(1).unwrap();
        vm.store_cell(a, 77 as Cell);
        vm.blk_update();
        // Touch two more blocks so block 1 is evicted.
        vm.blk_get_buffer(2).unwrap();
        vm.blk_get_buffer(3).unwrap();
        let a1 = vm.blk_get_buffer(1).unwrap();
        assert_eq!(vm.load_cell(a1), 77);
    }
}
