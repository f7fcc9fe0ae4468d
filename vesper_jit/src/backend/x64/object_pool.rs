//! Per-function object pool.
//!
//! Constants that do not fit in an instruction are loaded from a table
//! addressed through the pool pointer register. Patchable entries may be
//! rewritten after code is installed (lazily linked calls), so each one gets
//! its own slot; non-patchable entries are deduplicated.

use rustc_hash::FxHashMap;

use crate::runtime::ObjectRef;

/// Contents of one pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolEntry {
    /// A tagged heap object.
    TaggedObject(ObjectRef),
    /// A raw word.
    Immediate(u64),
    /// Address of a native function.
    NativeFunction(u64),
}

/// Whether a slot may be rewritten after installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Patchability {
    Patchable,
    NotPatchable,
}

/// Collects pool entries while code is emitted.
#[derive(Debug, Clone, Default)]
pub struct ObjectPoolBuilder {
    entries: Vec<(PoolEntry, Patchability)>,
    shared: FxHashMap<PoolEntry, usize>,
}

impl ObjectPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a fresh slot, never sharing an existing one.
    pub fn add_entry(&mut self, entry: PoolEntry, patchable: Patchability) -> usize {
        let index = self.entries.len();
        self.entries.push((entry, patchable));
        if patchable == Patchability::NotPatchable {
            self.shared.entry(entry).or_insert(index);
        }
        index
    }

    /// Index of `entry`, reusing a non-patchable slot when one exists.
    pub fn find_entry(&mut self, entry: PoolEntry, patchable: Patchability) -> usize {
        if patchable == Patchability::NotPatchable {
            if let Some(&index) = self.shared.get(&entry) {
                return index;
            }
        }
        self.add_entry(entry, patchable)
    }

    pub fn find_object(&mut self, object: ObjectRef, patchable: Patchability) -> usize {
        self.find_entry(PoolEntry::TaggedObject(object), patchable)
    }

    pub fn find_immediate(&mut self, value: u64) -> usize {
        self.find_entry(PoolEntry::Immediate(value), Patchability::NotPatchable)
    }

    pub fn find_native_function(&mut self, address: u64, patchable: Patchability) -> usize {
        self.find_entry(PoolEntry::NativeFunction(address), patchable)
    }

    pub fn entry(&self, index: usize) -> Option<(PoolEntry, Patchability)> {
        self.entries.get(index).copied()
    }

    pub fn finish(self) -> ObjectPool {
        ObjectPool {
            entries: self.entries,
        }
    }
}

/// The finished pool of a compiled function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPool {
    entries: Vec<(PoolEntry, Patchability)>,
}

impl ObjectPool {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<PoolEntry> {
        self.entries.get(index).map(|&(entry, _)| entry)
    }

    pub fn patchability(&self, index: usize) -> Option<Patchability> {
        self.entries.get(index).map(|&(_, p)| p)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(PoolEntry, Patchability)> {
        self.entries.iter()
    }
}
