// Dictionary: the linked word list, stable word-ids, and the FORGET fence.
//
// Entry headers live in a Vec with strictly append-ordered indices; threaded
// bodies live in the arena at the offset recorded per entry. Because every
// body can only reference entries older than itself, FORGET is a truncation:
// nothing reachable can ever point past `entries.len()`.

use bitflags::bitflags;
use tracing::debug;

use crate::config::WORD_NAME_MAX;
use crate::error::VmError;
use crate::vm::{Cell, Vm, VmAddr};

pub type WordFunc = fn(&mut Vm);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WordFlags: u8 {
        /// Executes even in compile mode.
        const IMMEDIATE = 0x80;
        /// Excluded from dictionary searches.
        const HIDDEN = 0x40;
        /// Being defined; invisible to searches (FORTH-79).
        const SMUDGED = 0x20;
        /// User-compiled colon word.
        const COMPILED = 0x10;
        /// Heat accumulates but never decays.
        const PINNED = 0x08;
        /// Heat neither accumulates nor decays.
        const FROZEN = 0x04;
    }
}

/// Per-entry physics metadata backing the heat model.
#[derive(Debug, Clone, Copy, Default)]
pub struct DictPhysics {
    /// Monotonic timestamp of the last execution.
    pub last_active_ns: u64,
    /// Timestamp of the last decay application.
    pub last_decay_ns: u64,
    /// Rolling average dispatch latency.
    pub avg_latency_ns: u32,
    /// Header + body footprint.
    pub mass_bytes: u32,
    /// Encoded execution traits, mirrored from the flag byte on mutation.
    pub state_flags: u8,
}

#[derive(Clone, Copy)]
pub enum WordBody {
    /// Direct function dispatch.
    Primitive(WordFunc),
    /// Threaded cells starting at this arena offset.
    Colon(VmAddr),
    /// Pushes the stored arena offset.
    Variable(VmAddr),
    /// Pushes the stored value.
    Constant(Cell),
}

pub struct DictEntry {
    pub name: String,
    pub body: WordBody,
    pub flags: WordFlags,
    pub word_id: u32,
    /// Q48.16 decaying execution counter.
    pub execution_heat: Cell,
    pub physics: DictPhysics,
    /// HERE at creation time; the FORGET rewind point.
    pub dict_mark: usize,
    /// Word-id observed to follow this one, for speculative lookup.
    pub predicted_next: Option<u32>,
}

impl DictEntry {
    pub fn is_findable(&self) -> bool {
        !self.flags.intersects(WordFlags::HIDDEN | WordFlags::SMUDGED)
    }
}

pub struct Dictionary {
    entries: Vec<DictEntry>,
    /// word_id -> entry index; `None` for recycled ids.
    id_map: Vec<Option<u32>>,
    recycled_ids: Vec<u32>,
    next_id: u32,
    /// Entries below this index are protected from FORGET.
    fence_len: usize,
    /// HERE recorded when the fence was set.
    fence_here: usize,
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary {
            entries: Vec::new(),
            id_map: Vec::new(),
            recycled_ids: Vec::new(),
            next_id: 0,
            fence_len: 0,
            fence_here: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DictEntry] {
        &self.entries
    }

    pub fn entry(&self, idx: usize) -> &DictEntry {
        &self.entries[idx]
    }

    pub fn entry_mut(&mut self, idx: usize) -> &mut DictEntry {
        &mut self.entries[idx]
    }

    pub fn latest(&self) -> Option<usize> {
        self.entries.len().checked_sub(1)
    }

    /// Append a new entry, becoming `latest`. Ids are recycled before the
    /// counter advances so live ids densely pack.
    pub fn define(
        &mut self,
        name: &str,
        body: WordBody,
        dict_mark: usize,
    ) -> Result<usize, VmError> {
        if name.is_empty() || name.len() > WORD_NAME_MAX {
            return Err(VmError::UnknownWord);
        }
        let word_id = match self.recycled_ids.pop() {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };
        let idx = self.entries.len();
        if word_id as usize >= self.id_map.len() {
            self.id_map.resize(word_id as usize + 1, None);
        }
        self.id_map[word_id as usize] = Some(idx as u32);
        self.entries.push(DictEntry {
            name: name.to_string(),
            body,
            flags: WordFlags::empty(),
            word_id,
            execution_heat: 0,
            physics: DictPhysics {
                mass_bytes: name.len() as u32,
                ..DictPhysics::default()
            },
            dict_mark,
            predicted_next: None,
        });
        debug!(name, word_id, idx, "dictionary: defined");
        Ok(idx)
    }

    /// Search the chain from `latest`, skipping hidden and smudged entries.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .rev()
            .find(|(_, e)| e.is_findable() && e.name.eq_ignore_ascii_case(name))
            .map(|(i, _)| i)
    }

    pub fn by_word_id(&self, id: u32) -> Option<usize> {
        self.id_map.get(id as usize).copied().flatten().map(|i| i as usize)
    }

    /// Record the boot-time boundary FORGET may not cross.
    pub fn set_fence(&mut self, here: usize) {
        self.fence_len = self.entries.len();
        self.fence_here = here;
    }

    pub fn fence(&self) -> (usize, usize) {
        (self.fence_len, self.fence_here)
    }

    /// Remove `name` and everything defined after it. Returns the HERE value
    /// to rewind to.
    pub fn forget(&mut self, name: &str) -> Result<usize, VmError> {
        let idx = self.find(name).ok_or(VmError::UnknownWord)?;
        if idx < self.fence_len {
            return Err(VmError::DictionaryFenceViolation);
        }
        let rewind = self.entries[idx].dict_mark;
        for e in &self.entries[idx..] {
            self.id_map[e.word_id as usize] = None;
            self.recycled_ids.push(e.word_id);
        }
        self.entries.truncate(idx);
        debug!(name, rewind, "dictionary: forgot");
        Ok(rewind)
    }

    /// Drop the most recent entry (used to discard anonymous interpret-mode
    /// bodies). Returns its dict_mark.
    pub fn retract_latest(&mut self) -> Option<usize> {
        let e = self.entries.pop()?;
        self.id_map[e.word_id as usize] = None;
        self.recycled_ids.push(e.word_id);
        Some(e.dict_mark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_vm: &mut Vm) {}

    #[test]
    fn define_and_find() {
        let mut d = Dictionary::new();
        let idx = d.define("DUP", WordBody::Primitive(noop), 0).unwrap();
        assert_eq!(d.find("dup"), Some(idx));
        assert_eq!(d.find("DROP"), None);
    }

    #[test]
    fn smudged_entries_are_invisible() {
        let mut d = Dictionary::new();
        let idx = d.define("W", WordBody::Primitive(noop), 0).unwrap();
        d.entry_mut(idx).flags.insert(WordFlags::SMUDGED);
        assert_eq!(d.find("W"), None);
        d.entry_mut(idx).flags.remove(WordFlags::SMUDGED);
        assert_eq!(d.find("W"), Some(idx));
    }

    #[test]
    fn shadowing_finds_newest() {
        let mut d = Dictionary::new();
        d.define("X", WordBody::Constant(1), 0).unwrap();
        let newer = d.define("X", WordBody::Constant(2), 0).unwrap();
        assert_eq!(d.find("X"), Some(newer));
    }

    #[test]
    fn word_ids_recycle_densely() {
        let mut d = Dictionary::new();
        d.define("A", WordBody::Primitive(noop), 0).unwrap();
        let b = d.define("B", WordBody::Primitive(noop), 8).unwrap();
        let b_id = d.entry(b).word_id;
        d.forget("B").unwrap();
        let c = d.define("C", WordBody::Primitive(noop), 8).unwrap();
        assert_eq!(d.entry(c).word_id, b_id);
        assert_eq!(d.by_word_id(b_id), Some(c));
    }

    #[test]
    fn forget_respects_fence() {
        let mut d = Dictionary::new();
        d.define("CORE", WordBody::Primitive(noop), 0).unwrap();
        d.set_fence(64);
        d.define("USER", WordBody::Primitive(noop), 64).unwrap();
        assert_eq!(d.forget("CORE"), Err(VmError::DictionaryFenceViolation));
        assert_eq!(d.forget("USER"), Ok(64));
        assert_eq!(d.forget("USER"), Err(VmError::UnknownWord));
    }

    #[test]
    fn forget_rewinds_to_dict_mark() {
        let mut d = Dictionary::new();
        d.define("A", WordBody::Primitive(noop), 0).unwrap();
        d.define("B", WordBody::Colon(128), 100).unwrap();
        d.define("C", WordBody::Colon(256), 200).unwrap();
        assert_eq!(d.forget("B"), Ok(100));
        assert_eq!(d.len(), 1);
    }
}
