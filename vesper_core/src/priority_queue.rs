//! Indexed binary min-heap.
//!
//! `PriorityQueue<P, V>` keeps `(priority, value)` pairs in a dense array
//! laid out as an implicit binary tree and mirrors every slot move into a
//! [`SimpleHashMap`] from value to slot. The side index makes
//! `contains_value` O(1) and lets entries be removed or re-prioritized by
//! value in O(log n).
//!
//! Values must be unique among live entries. Priorities are only compared
//! with `<` and `>`; ties are broken arbitrarily.

use crate::hash_map::{MapKey, SimpleHashMap};

/// Smallest backing size; the heap never shrinks below it.
pub const MINIMUM_SIZE: usize = 16;

/// A live heap entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry<P, V> {
    pub priority: P,
    pub value: V,
}

/// Min-heap keyed by priority with O(1) lookup by value.
pub struct PriorityQueue<P, V: MapKey> {
    heap: Vec<QueueEntry<P, V>>,
    backing_size: usize,
    index: SimpleHashMap<V, usize>,
}

impl<P: PartialOrd + Copy, V: MapKey> PriorityQueue<P, V> {
    /// Create an empty queue with the minimum backing size.
    pub fn new() -> Self {
        PriorityQueue {
            heap: Vec::with_capacity(MINIMUM_SIZE),
            backing_size: MINIMUM_SIZE,
            index: SimpleHashMap::new(MINIMUM_SIZE),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Size of the backing array under the grow/shrink policy.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.backing_size
    }

    /// Insert a value that is not already present.
    ///
    /// # Panics
    ///
    /// Panics if `value` is already in the queue.
    pub fn insert(&mut self, priority: P, value: V) {
        assert!(
            !self.contains_value(value),
            "value {value:?} is already in the priority queue"
        );
        if self.heap.len() == self.backing_size {
            self.resize(self.backing_size * 2);
        }
        let slot = self.heap.len();
        self.heap.push(QueueEntry { priority, value });
        self.index.insert(value, value.key_hash(), slot);
        self.bubble_up(slot);
    }

    /// The entry with the smallest priority.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub fn minimum(&self) -> &QueueEntry<P, V> {
        assert!(!self.is_empty(), "minimum of an empty priority queue");
        &self.heap[0]
    }

    /// Remove the entry with the smallest priority.
    pub fn remove_minimum(&mut self) -> QueueEntry<P, V> {
        assert!(!self.is_empty(), "remove_minimum on an empty priority queue");
        self.remove_at(0)
    }

    /// Remove `value`; returns whether it was present.
    pub fn remove_by_value(&mut self, value: V) -> bool {
        match self.slot_of(value) {
            Some(slot) => {
                self.remove_at(slot);
                debug_assert_eq!(self.index.occupancy(), self.heap.len());
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn contains_value(&self, value: V) -> bool {
        self.slot_of(value).is_some()
    }

    /// Insert `value`, or move it to `priority` if it is already queued.
    ///
    /// Returns `true` when the value was newly inserted.
    pub fn insert_or_change_priority(&mut self, priority: P, value: V) -> bool {
        let Some(slot) = self.slot_of(value) else {
            self.insert(priority, value);
            return true;
        };

        self.heap[slot].priority = priority;
        if slot == 0 {
            self.bubble_down(slot);
        } else {
            let parent = (slot - 1) / 2;
            let parent_priority = self.heap[parent].priority;
            if priority < parent_priority {
                self.bubble_up(slot);
            } else if priority > parent_priority {
                self.bubble_down(slot);
            }
        }
        false
    }

    /// Iterate over entries in heap order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry<P, V>> {
        self.heap.iter()
    }

    // =========================================================================
    // Heap maintenance
    // =========================================================================

    fn slot_of(&self, value: V) -> Option<usize> {
        self.index.lookup(value, value.key_hash()).map(|e| e.value)
    }

    fn remove_at(&mut self, slot: usize) -> QueueEntry<P, V> {
        let removed = self.heap.swap_remove(slot);
        self.index.remove(removed.value, removed.value.key_hash());
        if slot < self.heap.len() {
            // The former last leaf now sits in `slot`.
            self.set_index(slot);
            self.bubble_down(slot);
            self.bubble_up(slot);
        }

        let len = self.heap.len();
        if len <= self.backing_size >> 2 && MINIMUM_SIZE <= self.backing_size >> 1 {
            self.resize(self.backing_size >> 1);
        }
        removed
    }

    fn bubble_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.heap[parent].priority > self.heap[slot].priority {
                self.swap(parent, slot);
                slot = parent;
            } else {
                return;
            }
        }
    }

    fn bubble_down(&mut self, mut slot: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * slot + 1;
            if left >= len {
                return;
            }
            let mut smallest = slot;
            if self.heap[left].priority < self.heap[smallest].priority {
                smallest = left;
            }
            let right = left + 1;
            if right < len && self.heap[right].priority < self.heap[smallest].priority {
                smallest = right;
            }
            if smallest == slot {
                return;
            }
            self.swap(slot, smallest);
            slot = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.set_index(a);
        self.set_index(b);
    }

    fn set_index(&mut self, slot: usize) {
        let value = self.heap[slot].value;
        self.index.insert(value, value.key_hash(), slot);
    }

    fn resize(&mut self, new_size: usize) {
        debug_assert!(new_size >= self.heap.len());
        if new_size > self.heap.capacity() {
            self.heap.reserve_exact(new_size - self.heap.len());
        } else {
            self.heap.shrink_to(new_size);
        }
        self.backing_size = new_size;
    }
}

impl<P: PartialOrd + Copy, V: MapKey> Default for PriorityQueue<P, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: std::fmt::Debug, V: MapKey> std::fmt::Debug for PriorityQueue<P, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.heap.len())
            .field("capacity", &self.backing_size)
            .field("heap", &self.heap)
            .finish()
    }
}
