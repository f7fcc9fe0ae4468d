//! The runtime ABI contract generated code is written against.
//!
//! Generated code addresses thread state, code objects, object pools and the
//! class table through fixed offsets. The assembler does not know the Rust
//! layout of those structures; it takes a [`RuntimeOffsets`] table instead.
//! Object header bits and the small-integer representation are fixed here as
//! constants, together with pure models of the checks the emitted code
//! performs (`needs_barrier`, `tag_word_for_new_object`).

use bitflags::bitflags;

use crate::backend::x64::registers::{Gpr, RESERVED_GPRS};

// =============================================================================
// Words and Tagging
// =============================================================================

pub const WORD_SIZE: i32 = 8;

/// Low bit set on every heap object pointer.
pub const HEAP_OBJECT_TAG: i32 = 1;

/// Small integers carry a zero low bit.
pub const SMI_TAG: i64 = 0;
pub const SMI_TAG_MASK: i64 = 1;
pub const SMI_TAG_SHIFT: u32 = 1;

pub const SMI_MIN: i64 = i64::MIN >> SMI_TAG_SHIFT;
pub const SMI_MAX: i64 = i64::MAX >> SMI_TAG_SHIFT;

/// Heap objects are aligned to this many bytes.
pub const OBJECT_ALIGNMENT: usize = 16;

/// Largest instance the inline new-space allocation path handles.
pub const NEW_SPACE_ALLOCATABLE_SIZE: usize = 256 * 1024;

#[inline]
pub const fn is_smi_value(value: i64) -> bool {
    value >= SMI_MIN && value <= SMI_MAX
}

/// The tagged word representing the small integer `value`.
///
/// # Panics
///
/// Panics if `value` is outside the small-integer range.
#[inline]
pub const fn smi_raw(value: i64) -> i64 {
    assert!(is_smi_value(value), "value out of small-integer range");
    value << SMI_TAG_SHIFT
}

#[inline]
pub const fn is_allocatable_in_new_space(size: usize) -> bool {
    size <= NEW_SPACE_ALLOCATABLE_SIZE
}

/// Address of a heap object (tagged).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(pub u64);

impl ObjectRef {
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A value generated code can embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Object {
    Smi(i64),
    Null,
    True,
    False,
    Heap(ObjectRef),
}

impl Object {
    /// The tagged word of a small integer, if this is one.
    pub const fn smi_raw(&self) -> Option<i64> {
        match *self {
            Object::Smi(v) => Some(smi_raw(v)),
            _ => None,
        }
    }
}

// =============================================================================
// Thread State
// =============================================================================

/// Values of `Thread::execution_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExecutionState {
    Unknown = 0,
    Generated = 1,
    Vm = 2,
    Native = 3,
    Blocked = 4,
}

/// Values of `Thread::vm_tag` that generated code stores directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum VmTag {
    Invalid = 0,
    Idle = 1,
    Vm = 2,
    Compiler = 3,
    Dart = 4,
}

bitflags! {
    /// Bits of `Thread::safepoint_state`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SafepointState: u64 {
        const AT_SAFEPOINT = 1 << 0;
        const SAFEPOINT_REQUESTED = 1 << 1;
        const AT_DEOPT_SAFEPOINT = 1 << 2;
        const DEOPT_SAFEPOINT_REQUESTED = 1 << 3;
        const AT_RELOAD_SAFEPOINT = 1 << 4;
        const RELOAD_SAFEPOINT_REQUESTED = 1 << 5;
    }
}

impl SafepointState {
    /// State of a thread parked at every safepoint level.
    pub const FULL_ACQUIRED: SafepointState = SafepointState::AT_SAFEPOINT
        .union(SafepointState::AT_DEOPT_SAFEPOINT)
        .union(SafepointState::AT_RELOAD_SAFEPOINT);

    /// State of a running thread with no pending requests.
    pub const UNACQUIRED: SafepointState = SafepointState::empty();
}

/// Byte offsets into the runtime's thread structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadOffsets {
    pub write_barrier_mask: i32,
    /// New-space bump allocation cursor.
    pub top: i32,
    pub end: i32,
    pub isolate_group: i32,
    pub execution_state: i32,
    pub safepoint_state: i32,
    pub vm_tag: i32,
    pub top_exit_frame_info: i32,
    pub exit_through_ffi: i32,
    pub null_object: i32,
    pub true_object: i32,
    pub false_object: i32,
    /// Code object of the safepoint enter stub.
    pub enter_safepoint_stub: i32,
    pub exit_safepoint_stub: i32,
    pub exit_safepoint_ignore_unwind_in_progress_stub: i32,
    pub call_to_runtime_entry_point: i32,
    pub array_write_barrier_entry_point: i32,
    /// First of 16 per-register write-barrier wrapper entry points.
    pub write_barrier_wrappers: i32,
    /// First runtime entry slot.
    pub runtime_entries: i32,
}

impl ThreadOffsets {
    /// Entry point of the write-barrier wrapper that takes its object in `reg`.
    ///
    /// # Panics
    ///
    /// Panics for reserved registers, which never hold barrier objects.
    pub fn write_barrier_wrapper(&self, reg: Gpr) -> i32 {
        assert!(!RESERVED_GPRS.contains(reg), "no write barrier wrapper for {reg}");
        self.write_barrier_wrappers + reg.encoding() as i32 * WORD_SIZE
    }

    pub fn runtime_entry(&self, index: u32) -> i32 {
        self.runtime_entries + index as i32 * WORD_SIZE
    }

    /// Thread slot caching `object`, for objects every thread keeps at hand.
    pub fn cached_object(&self, object: &Object) -> Option<i32> {
        match object {
            Object::Null => Some(self.null_object),
            Object::True => Some(self.true_object),
            Object::False => Some(self.false_object),
            Object::Smi(_) | Object::Heap(_) => None,
        }
    }
}

impl Default for ThreadOffsets {
    fn default() -> Self {
        ThreadOffsets {
            write_barrier_mask: 0x38,
            top: 0x48,
            end: 0x50,
            isolate_group: 0x58,
            execution_state: 0x60,
            safepoint_state: 0x68,
            vm_tag: 0x70,
            top_exit_frame_info: 0x78,
            exit_through_ffi: 0x80,
            null_object: 0x90,
            true_object: 0x98,
            false_object: 0xa0,
            enter_safepoint_stub: 0xc0,
            exit_safepoint_stub: 0xc8,
            exit_safepoint_ignore_unwind_in_progress_stub: 0xd0,
            call_to_runtime_entry_point: 0xd8,
            array_write_barrier_entry_point: 0xe0,
            write_barrier_wrappers: 0x100,
            runtime_entries: 0x200,
        }
    }
}

// =============================================================================
// Code Objects and Pools
// =============================================================================

/// Which entry point of a code object a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeEntryKind {
    Normal,
    Unchecked,
    Monomorphic,
    MonomorphicUnchecked,
}

/// Field offsets of a code object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLayout {
    pub object_pool: i32,
    entry_points: [i32; 4],
}

impl CodeLayout {
    pub fn entry_point_offset(&self, kind: CodeEntryKind) -> i32 {
        self.entry_points[kind as usize]
    }
}

impl Default for CodeLayout {
    fn default() -> Self {
        CodeLayout {
            object_pool: 0x28,
            entry_points: [0x08, 0x10, 0x18, 0x20],
        }
    }
}

/// Layout of an object pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolLayout {
    pub data: i32,
}

impl PoolLayout {
    /// Untagged offset of pool element `index`.
    pub fn element_offset(&self, index: usize) -> i32 {
        let index = i32::try_from(index).unwrap_or_else(|_| panic!("pool index {index} too large"));
        self.data + index * WORD_SIZE
    }
}

impl Default for PoolLayout {
    fn default() -> Self {
        PoolLayout { data: 0x10 }
    }
}

/// Offsets used to find a class's allocation-tracing flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTableLayout {
    /// Offset of the class table pointer in the isolate group.
    pub isolate_group_class_table: i32,
    /// Offset of the tracing-state byte table in the class table.
    pub allocation_tracing_state_table: i32,
}

impl ClassTableLayout {
    /// One byte per class id.
    pub fn tracing_state_slot(&self, cid: u32) -> i32 {
        i32::try_from(cid).unwrap_or_else(|_| panic!("class id {cid} too large"))
    }
}

impl Default for ClassTableLayout {
    fn default() -> Self {
        ClassTableLayout {
            isolate_group_class_table: 0x30,
            allocation_tracing_state_table: 0x18,
        }
    }
}

/// Every offset table the assembler consults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeOffsets {
    pub thread: ThreadOffsets,
    pub code: CodeLayout,
    pub pool: PoolLayout,
    pub class_table: ClassTableLayout,
}

/// A runtime function callable through the thread's entry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeEntry {
    pub name: &'static str,
    pub index: u32,
    pub argument_count: u32,
}

// =============================================================================
// Object Header
// =============================================================================

/// The header word at offset 0 of every heap object.
pub mod tags {
    pub const TAGS_OFFSET: i32 = 0;

    pub const CARD_REMEMBERED_BIT: u32 = 0;
    pub const CANONICAL_BIT: u32 = 1;
    pub const NOT_MARKED_BIT: u32 = 2;
    pub const NEW_BIT: u32 = 3;
    pub const ALWAYS_SET_BIT: u32 = 4;
    pub const OLD_AND_NOT_REMEMBERED_BIT: u32 = 5;
    pub const IMMUTABLE_BIT: u32 = 6;
    pub const RESERVED_BIT: u32 = 7;

    /// Source bits shifted right by this much line up with target bits.
    pub const BARRIER_OVERLAP_SHIFT: u32 = 2;

    pub const SIZE_TAG_POS: u32 = 8;
    pub const SIZE_TAG_SIZE: u32 = 4;
    pub const CLASS_ID_TAG_POS: u32 = 12;
    pub const CLASS_ID_TAG_SIZE: u32 = 20;

    /// Barrier masks the runtime installs in the thread.
    pub const GENERATIONAL_BARRIER_MASK: u64 = 1 << NEW_BIT;
    pub const INCREMENTAL_BARRIER_MASK: u64 = 1 << NOT_MARKED_BIT;

    const SIZE_TAG_MAX: usize = ((1 << SIZE_TAG_SIZE) - 1) << 4;

    /// Size field: size in 16-byte units, or 0 if the size is too large to
    /// store and must be computed from the class.
    pub const fn size_tag(size: usize) -> u64 {
        if size > SIZE_TAG_MAX {
            0
        } else {
            ((size >> 4) as u64) << SIZE_TAG_POS
        }
    }

    pub const fn class_id_tag(cid: u32) -> u64 {
        assert!(cid < (1 << CLASS_ID_TAG_SIZE), "class id out of range");
        (cid as u64) << CLASS_ID_TAG_POS
    }

    /// Header of a freshly bump-allocated new-space object.
    pub const fn tag_word_for_new_object(cid: u32, size: usize) -> u64 {
        class_id_tag(cid)
            | size_tag(size)
            | (1 << NOT_MARKED_BIT)
            | (1 << NEW_BIT)
            | (1 << ALWAYS_SET_BIT)
    }

    /// The check the inline write barrier performs.
    pub const fn needs_barrier(source_tags: u64, target_tags: u64, barrier_mask: u64) -> bool {
        ((source_tags >> BARRIER_OVERLAP_SHIFT) & barrier_mask & target_tags) != 0
    }

    pub const fn class_id(tags: u64) -> u32 {
        ((tags >> CLASS_ID_TAG_POS) & ((1 << CLASS_ID_TAG_SIZE) - 1)) as u32
    }
}
