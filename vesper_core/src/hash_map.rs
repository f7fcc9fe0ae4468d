//! Open-addressing hash map for runtime bookkeeping.
//!
//! `SimpleHashMap` stores entries in a flat power-of-two array and resolves
//! collisions by linear probing. The caller supplies the hash for every
//! operation, and optionally a match function, so the table can index
//! file descriptors, ports or any other word-sized handle without the
//! `std::hash` machinery.
//!
//! # Invariants
//!
//! - The slot array length is a power of two and always has at least one
//!   empty slot, so every search terminates.
//! - The table doubles when `occupancy + occupancy / 4 >= capacity`.
//! - Removal never leaves a tombstone: following entries are shifted back
//!   into the hole when their home slot does not lie between the hole and
//!   their current position.
//! - `K::NULL` is reserved. Looking up or inserting it panics, so callers
//!   bias keys that may legitimately be zero (e.g. `fd + 1`).

use std::fmt;

/// Default table capacity.
pub const DEFAULT_CAPACITY: usize = 8;

// =============================================================================
// Keys
// =============================================================================

/// A word-sized key with a reserved null value.
pub trait MapKey: Copy + Eq + fmt::Debug {
    /// The key value reserved for empty slots.
    const NULL: Self;

    /// Default hash for this key, used when the key is also a value (for
    /// example the priority queue's side index).
    fn key_hash(self) -> u32;
}

macro_rules! impl_map_key {
    ($($ty:ty),* $(,)?) => {
        $(
            impl MapKey for $ty {
                const NULL: Self = 0;

                #[inline]
                fn key_hash(self) -> u32 {
                    hash_word(self as u64)
                }
            }
        )*
    };
}

impl_map_key!(u32, u64, usize, i32, i64, isize);

/// Fold a 64-bit word into a 32-bit hash.
#[inline]
pub const fn hash_word(word: u64) -> u32 {
    (word ^ (word >> 32)) as u32
}

/// Key comparison used while probing.
pub type MatchFn<K> = fn(K, K) -> bool;

fn same_key<K: Eq>(a: K, b: K) -> bool {
    a == b
}

// =============================================================================
// Entry
// =============================================================================

/// A live slot in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K, V> {
    /// The stored key, never `K::NULL`.
    pub key: K,
    /// The associated value.
    pub value: V,
    /// Hash supplied when the key was inserted.
    pub hash: u32,
}

// =============================================================================
// SimpleHashMap
// =============================================================================

/// Linear-probing hash map with caller-supplied hashes.
pub struct SimpleHashMap<K: MapKey, V> {
    slots: Box<[Option<Entry<K, V>>]>,
    occupancy: usize,
    match_fn: MatchFn<K>,
}

impl<K: MapKey, V> SimpleHashMap<K, V> {
    /// Create a map comparing keys with `==`.
    ///
    /// `capacity` is rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        Self::with_match(same_key::<K>, capacity)
    }

    /// Create a map with a custom key match function.
    pub fn with_match(match_fn: MatchFn<K>, capacity: usize) -> Self {
        SimpleHashMap {
            slots: empty_slots(capacity.max(1).next_power_of_two()),
            occupancy: 0,
            match_fn,
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    /// Whether the map has no live entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.occupancy == 0
    }

    /// Current slot count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Find the entry for `key`, if present.
    pub fn lookup(&self, key: K, hash: u32) -> Option<&Entry<K, V>> {
        let index = self.find_slot(key, hash);
        self.slots[index].as_ref()
    }

    /// Find the entry for `key` mutably, if present.
    pub fn lookup_mut(&mut self, key: K, hash: u32) -> Option<&mut Entry<K, V>> {
        let index = self.find_slot(key, hash);
        self.slots[index].as_mut()
    }

    /// Whether `key` is present.
    #[inline]
    pub fn contains(&self, key: K, hash: u32) -> bool {
        self.lookup(key, hash).is_some()
    }

    /// Find the entry for `key`, inserting `make()` when it is absent.
    ///
    /// Insertion may grow the table; the returned reference points into the
    /// resized storage.
    pub fn lookup_or_insert<F>(&mut self, key: K, hash: u32, make: F) -> &mut Entry<K, V>
    where
        F: FnOnce() -> V,
    {
        let mut index = self.find_slot(key, hash);
        if self.slots[index].is_none() {
            self.slots[index] = Some(Entry {
                key,
                value: make(),
                hash,
            });
            self.occupancy += 1;
            if self.occupancy + self.occupancy / 4 >= self.slots.len() {
                self.grow();
                index = self.find_slot(key, hash);
            }
        }
        match &mut self.slots[index] {
            Some(entry) => entry,
            None => unreachable!("search for {key:?} ended on an empty slot after insertion"),
        }
    }

    /// Insert or overwrite the value for `key`, returning the previous value.
    pub fn insert(&mut self, key: K, hash: u32, value: V) -> Option<V> {
        let index = self.find_slot(key, hash);
        if let Some(entry) = &mut self.slots[index] {
            return Some(std::mem::replace(&mut entry.value, value));
        }
        self.lookup_or_insert(key, hash, || value);
        None
    }

    /// Remove `key` and return its value.
    pub fn remove(&mut self, key: K, hash: u32) -> Option<V> {
        let mut hole = self.find_slot(key, hash);
        let removed = self.slots[hole].take()?;
        let mask = self.slots.len() - 1;

        // Walk the cluster following the hole. An entry at `q` may stay
        // only if its home slot lies cyclically in (hole, q]; otherwise a
        // lookup starting at its home would stop at the hole.
        let mut q = hole;
        loop {
            q = (q + 1) & mask;
            let Some(entry) = &self.slots[q] else {
                break;
            };
            let home = entry.hash as usize & mask;
            let must_move = if q > hole {
                home <= hole || home > q
            } else {
                home <= hole && home > q
            };
            if must_move {
                self.slots[hole] = self.slots[q].take();
                hole = q;
            }
        }

        self.occupancy -= 1;
        Some(removed.value)
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.clear_with(drop);
    }

    /// Remove every entry, handing each value to `clear_fn`.
    pub fn clear_with<F: FnMut(V)>(&mut self, mut clear_fn: F) {
        for slot in self.slots.iter_mut() {
            if let Some(entry) = slot.take() {
                clear_fn(entry.value);
            }
        }
        self.occupancy = 0;
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Cursor of the first live entry.
    pub fn start(&self) -> Option<usize> {
        self.next_from(0)
    }

    /// Cursor of the live entry after `cursor`.
    pub fn next(&self, cursor: usize) -> Option<usize> {
        self.next_from(cursor + 1)
    }

    /// Entry at a cursor returned by [`start`](Self::start) or
    /// [`next`](Self::next).
    pub fn entry_at(&self, cursor: usize) -> Option<&Entry<K, V>> {
        self.slots.get(cursor).and_then(Option::as_ref)
    }

    /// Mutable entry at a cursor.
    pub fn entry_at_mut(&mut self, cursor: usize) -> Option<&mut Entry<K, V>> {
        self.slots.get_mut(cursor).and_then(Option::as_mut)
    }

    /// Iterate over live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry<K, V>> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Iterate mutably over live entries in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entry<K, V>> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    fn next_from(&self, from: usize) -> Option<usize> {
        (from..self.slots.len()).find(|&i| self.slots[i].is_some())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Slot holding `key`, or the empty slot where it would be inserted.
    fn find_slot(&self, key: K, hash: u32) -> usize {
        assert!(key != K::NULL, "the null key is reserved for empty slots");
        debug_assert!(self.slots.len().is_power_of_two());
        let mask = self.slots.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            match &self.slots[index] {
                None => return index,
                Some(entry) if entry.hash == hash && (self.match_fn)(key, entry.key) => {
                    return index;
                }
                Some(_) => index = (index + 1) & mask,
            }
        }
    }

    fn grow(&mut self) {
        let new_capacity = self.slots.len() * 2;
        let old = std::mem::replace(&mut self.slots, empty_slots(new_capacity));
        let mask = new_capacity - 1;
        for entry in old.into_vec().into_iter().flatten() {
            let mut index = entry.hash as usize & mask;
            while self.slots[index].is_some() {
                index = (index + 1) & mask;
            }
            self.slots[index] = Some(entry);
        }
    }
}

impl<K: MapKey, V> Default for SimpleHashMap<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<K: MapKey, V: fmt::Debug> fmt::Debug for SimpleHashMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|e| (e.key, &e.value)))
            .finish()
    }
}

fn empty_slots<K, V>(capacity: usize) -> Box<[Option<Entry<K, V>>]> {
    (0..capacity).map(|_| None).collect()
}

// =============================================================================
// Tests
// =============================================================================
