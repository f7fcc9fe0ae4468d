//! Growable instruction buffer.
//!
//! `CodeBuffer` tracks its own logical capacity and doubles it explicitly.
//! Every instruction append is preceded by [`CodeBuffer::ensure_capacity`],
//! which guarantees at least [`MINIMUM_GAP`] free bytes, so no instruction
//! can straddle a reallocation. Positions used for fixups are read after the
//! ensure step.

use tracing::trace;

/// Free space guaranteed after every `ensure_capacity`.
pub const MINIMUM_GAP: usize = 32;

/// Default initial capacity.
pub const DEFAULT_CAPACITY: usize = 4 * 1024;

/// Instruction bytes under construction.
#[derive(Debug, Clone)]
pub struct CodeBuffer {
    data: Vec<u8>,
    /// Logical capacity; `data` always has at least this much reserved.
    capacity: usize,
    grow_count: usize,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MINIMUM_GAP * 2);
        CodeBuffer {
            data: Vec::with_capacity(capacity),
            capacity,
            grow_count: 0,
        }
    }

    /// Bytes emitted so far.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many times the buffer has doubled.
    #[inline]
    pub fn grow_count(&self) -> usize {
        self.grow_count
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Make sure at least `MINIMUM_GAP` bytes are free.
    #[inline]
    pub fn ensure_capacity(&mut self) {
        if self.capacity - self.data.len() < MINIMUM_GAP {
            self.extend_capacity();
        }
    }

    fn extend_capacity(&mut self) {
        let new_capacity = (self.capacity * 2).max(self.data.len() + MINIMUM_GAP);
        self.data.reserve_exact(new_capacity - self.data.len());
        trace!(old = self.capacity, new = new_capacity, "code buffer grown");
        self.capacity = new_capacity;
        self.grow_count += 1;
    }

    /// Append bytes that fit in the guaranteed gap.
    #[inline]
    pub fn append(&mut self, bytes: &[u8]) {
        debug_assert!(
            bytes.len() <= self.capacity - self.data.len(),
            "append without ensure_capacity"
        );
        self.data.extend_from_slice(bytes);
    }

    // =========================================================================
    // Patching
    // =========================================================================

    #[inline]
    pub fn load_u8(&self, position: usize) -> u8 {
        self.data[position]
    }

    #[inline]
    pub fn store_u8(&mut self, position: usize, value: u8) {
        self.data[position] = value;
    }

    pub fn load_i32(&self, position: usize) -> i32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[position..position + 4]);
        i32::from_le_bytes(bytes)
    }

    pub fn store_i32(&mut self, position: usize, value: i32) {
        self.data[position..position + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn store_u64(&mut self, position: usize, value: u64) {
        self.data[position..position + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}
