//! The `Location` value type and its packed encoding.
//!
//! A location says where an IR value lives: a constant, a register, a stack
//! slot, a pair of locations, or (before allocation) a policy the register
//! allocator has to satisfy.
//!
//! # Packed encoding
//!
//! Locations are plain enums in memory but keep a stable 64-bit encoding
//! for side tables and serialized stack maps:
//!
//! ```text
//!   constant   ..id(28)..|pair_index(1)|01
//!   pair       ..second(31)..|..first(31)..|10
//!   other      ..payload(26)..|kind(5)          kind & 0b11 == 0
//!   stack      payload = biased_index(22) << 4 | base(4)
//! ```
//!
//! Every non-pair location packs into 31 bits so that a pair holds both
//! halves inline.

use std::fmt;

use super::constant::ConstantId;
use super::representation::Representation;
use crate::backend::x64::registers::{Address, Gpr, Xmm, FP};
use crate::runtime::WORD_SIZE;

// =============================================================================
// Encoding Constants
// =============================================================================

const TAG_MASK: u64 = 0b11;
const CONSTANT_TAG: u64 = 0b01;
const PAIR_TAG: u64 = 0b10;

const KIND_BITS: u32 = 5;
const KIND_MASK: u64 = (1 << KIND_BITS) - 1;
const PAYLOAD_BITS: u32 = 26;

const SINGLE_BITS: u32 = 31;
const SINGLE_MASK: u64 = (1 << SINGLE_BITS) - 1;

const STACK_BASE_BITS: u32 = 4;
const STACK_INDEX_BITS: u32 = PAYLOAD_BITS - STACK_BASE_BITS;
const STACK_INDEX_BIAS: i64 = 1 << (STACK_INDEX_BITS - 1);

/// Most negative representable stack index.
pub const MIN_STACK_INDEX: i32 = -(STACK_INDEX_BIAS as i32);
/// Most positive representable stack index.
pub const MAX_STACK_INDEX: i32 = (STACK_INDEX_BIAS - 1) as i32;

/// Constant ids must fit in the constant payload.
pub const MAX_CONSTANT_ID: u32 = 1 << 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Kind {
    Invalid = 0,
    Unallocated = 4,
    StackSlot = 8,
    DoubleStackSlot = 12,
    QuadStackSlot = 16,
    Register = 24,
    FpuRegister = 28,
}

const KINDS: [Kind; 7] = [
    Kind::Invalid,
    Kind::Unallocated,
    Kind::StackSlot,
    Kind::DoubleStackSlot,
    Kind::QuadStackSlot,
    Kind::Register,
    Kind::FpuRegister,
];

// Kind values must never look like a constant or pair tag.
const _: () = {
    let mut i = 0;
    while i < KINDS.len() {
        let kind = KINDS[i] as u64;
        assert!(kind & TAG_MASK == 0);
        assert!(kind & TAG_MASK != CONSTANT_TAG && kind & TAG_MASK != PAIR_TAG);
        assert!(kind <= KIND_MASK);
        i += 1;
    }
    assert!(KIND_BITS + PAYLOAD_BITS == SINGLE_BITS);
    assert!(2 + 1 + 28 == SINGLE_BITS);
    assert!(2 + 2 * SINGLE_BITS <= 64);
};

impl Kind {
    fn from_bits(bits: u64) -> Option<Kind> {
        KINDS.iter().copied().find(|kind| *kind as u64 == bits)
    }
}

// =============================================================================
// Policies and Slots
// =============================================================================

/// Constraint on an unallocated location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Policy {
    Any = 0,
    PrefersRegister = 1,
    RequiresRegister = 2,
    RequiresFpuRegister = 3,
    WritableRegister = 4,
    SameAsFirstInput = 5,
    RequiresStack = 6,
}

impl Policy {
    const ALL: [Policy; 7] = [
        Policy::Any,
        Policy::PrefersRegister,
        Policy::RequiresRegister,
        Policy::RequiresFpuRegister,
        Policy::WritableRegister,
        Policy::SameAsFirstInput,
        Policy::RequiresStack,
    ];

    fn from_bits(bits: u64) -> Option<Policy> {
        Policy::ALL.iter().copied().find(|policy| *policy as u64 == bits)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Policy::Any => "A",
            Policy::PrefersRegister => "P",
            Policy::RequiresRegister => "R",
            Policy::RequiresFpuRegister => "DR",
            Policy::WritableRegister => "WR",
            Policy::SameAsFirstInput => "0",
            Policy::RequiresStack => "RS",
        }
    }
}

/// Width of a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotWidth {
    /// One word.
    Word,
    /// An unboxed double.
    Double,
    /// A 128-bit SIMD value.
    Quad,
}

impl SlotWidth {
    const fn kind(self) -> Kind {
        match self {
            SlotWidth::Word => Kind::StackSlot,
            SlotWidth::Double => Kind::DoubleStackSlot,
            SlotWidth::Quad => Kind::QuadStackSlot,
        }
    }

    const fn prefix(self) -> &'static str {
        match self {
            SlotWidth::Word => "S",
            SlotWidth::Double => "DS",
            SlotWidth::Quad => "QS",
        }
    }
}

/// A reference to a constant, or to one half of a constant pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstantRef {
    pub id: ConstantId,
    pub pair_index: u8,
}

// =============================================================================
// Pair Locations
// =============================================================================

/// Two locations for one value, e.g. a tagged pair. Halves are stored in
/// their packed form and are never pairs themselves.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairLocation {
    halves: [u32; 2],
}

impl PairLocation {
    /// # Panics
    ///
    /// Panics if either half is itself a pair.
    pub fn new(first: Location, second: Location) -> Self {
        PairLocation {
            halves: [first.pack_single(), second.pack_single()],
        }
    }

    /// Half `index` (0 or 1).
    pub fn at(&self, index: usize) -> Location {
        assert!(index < 2, "pair index {index} out of range");
        Location::unpack_single(self.halves[index] as u64).unwrap_or(Location::Invalid)
    }

    pub fn set_at(&mut self, index: usize, location: Location) {
        assert!(index < 2, "pair index {index} out of range");
        self.halves[index] = location.pack_single();
    }

    pub fn first(&self) -> Location {
        self.at(0)
    }

    pub fn second(&self) -> Location {
        self.at(1)
    }
}

impl fmt::Debug for PairLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PairLocation").field(&self.first()).field(&self.second()).finish()
    }
}

// =============================================================================
// Location
// =============================================================================

/// Where a value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Location {
    #[default]
    Invalid,
    Constant(ConstantRef),
    Pair(PairLocation),
    Unallocated(Policy),
    StackSlot {
        index: i32,
        base: Gpr,
        width: SlotWidth,
    },
    Register(Gpr),
    FpuRegister(Xmm),
}

impl Location {
    // -------------------------------------------------------------------------
    // Constructors
    // -------------------------------------------------------------------------

    pub const fn any() -> Self {
        Location::Unallocated(Policy::Any)
    }

    pub const fn prefers_register() -> Self {
        Location::Unallocated(Policy::PrefersRegister)
    }

    pub const fn requires_register() -> Self {
        Location::Unallocated(Policy::RequiresRegister)
    }

    pub const fn requires_fpu_register() -> Self {
        Location::Unallocated(Policy::RequiresFpuRegister)
    }

    pub const fn writable_register() -> Self {
        Location::Unallocated(Policy::WritableRegister)
    }

    /// Output constraint: reuse the register of input 0.
    pub const fn same_as_first_input() -> Self {
        Location::Unallocated(Policy::SameAsFirstInput)
    }

    pub const fn requires_stack() -> Self {
        Location::Unallocated(Policy::RequiresStack)
    }

    pub const fn register(reg: Gpr) -> Self {
        Location::Register(reg)
    }

    pub const fn fpu_register(reg: Xmm) -> Self {
        Location::FpuRegister(reg)
    }

    pub fn stack_slot(index: i32, base: Gpr) -> Self {
        Self::slot(index, base, SlotWidth::Word)
    }

    pub fn double_stack_slot(index: i32, base: Gpr) -> Self {
        Self::slot(index, base, SlotWidth::Double)
    }

    pub fn quad_stack_slot(index: i32, base: Gpr) -> Self {
        Self::slot(index, base, SlotWidth::Quad)
    }

    fn slot(index: i32, base: Gpr, width: SlotWidth) -> Self {
        assert!(
            (MIN_STACK_INDEX..=MAX_STACK_INDEX).contains(&index),
            "stack index {index} out of range"
        );
        Location::StackSlot { index, base, width }
    }

    pub const fn constant(id: ConstantId) -> Self {
        Location::Constant(ConstantRef { id, pair_index: 0 })
    }

    /// A pair whose halves are the two words of the constant `id`.
    pub fn pair_constant(id: ConstantId) -> Self {
        Location::pair(
            Location::Constant(ConstantRef { id, pair_index: 0 }),
            Location::Constant(ConstantRef { id, pair_index: 1 }),
        )
    }

    pub fn pair(first: Location, second: Location) -> Self {
        Location::Pair(PairLocation::new(first, second))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub const fn is_invalid(&self) -> bool {
        matches!(self, Location::Invalid)
    }

    pub const fn is_valid(&self) -> bool {
        !self.is_invalid()
    }

    pub const fn is_constant(&self) -> bool {
        matches!(self, Location::Constant(_))
    }

    pub const fn is_pair(&self) -> bool {
        matches!(self, Location::Pair(_))
    }

    pub const fn is_unallocated(&self) -> bool {
        matches!(self, Location::Unallocated(_))
    }

    pub const fn is_register(&self) -> bool {
        matches!(self, Location::Register(_))
    }

    pub const fn is_fpu_register(&self) -> bool {
        matches!(self, Location::FpuRegister(_))
    }

    pub const fn is_machine_register(&self) -> bool {
        self.is_register() || self.is_fpu_register()
    }

    pub const fn is_stack_slot(&self) -> bool {
        matches!(self, Location::StackSlot { width: SlotWidth::Word, .. })
    }

    pub const fn is_double_stack_slot(&self) -> bool {
        matches!(self, Location::StackSlot { width: SlotWidth::Double, .. })
    }

    pub const fn is_quad_stack_slot(&self) -> bool {
        matches!(self, Location::StackSlot { width: SlotWidth::Quad, .. })
    }

    pub const fn has_stack_index(&self) -> bool {
        matches!(self, Location::StackSlot { .. })
    }

    pub const fn policy(&self) -> Option<Policy> {
        match *self {
            Location::Unallocated(policy) => Some(policy),
            _ => None,
        }
    }

    pub const fn gpr(&self) -> Option<Gpr> {
        match *self {
            Location::Register(reg) => Some(reg),
            _ => None,
        }
    }

    pub const fn xmm(&self) -> Option<Xmm> {
        match *self {
            Location::FpuRegister(reg) => Some(reg),
            _ => None,
        }
    }

    pub const fn stack_index(&self) -> Option<i32> {
        match *self {
            Location::StackSlot { index, .. } => Some(index),
            _ => None,
        }
    }

    pub const fn base_reg(&self) -> Option<Gpr> {
        match *self {
            Location::StackSlot { base, .. } => Some(base),
            _ => None,
        }
    }

    pub const fn constant_ref(&self) -> Option<ConstantRef> {
        match *self {
            Location::Constant(constant) => Some(constant),
            _ => None,
        }
    }

    pub const fn as_pair(&self) -> Option<&PairLocation> {
        match self {
            Location::Pair(pair) => Some(pair),
            _ => None,
        }
    }

    /// Memory operand of a stack location.
    ///
    /// # Panics
    ///
    /// Panics if this is not a stack location.
    pub fn to_stack_slot_address(&self) -> Address {
        match *self {
            Location::StackSlot { index, base, .. } => Address::new(base, index * WORD_SIZE),
            other => panic!("{other} is not a stack slot"),
        }
    }

    // -------------------------------------------------------------------------
    // Packed Encoding
    // -------------------------------------------------------------------------

    /// The packed 64-bit form.
    pub fn raw(&self) -> u64 {
        match *self {
            Location::Pair(pair) => {
                PAIR_TAG
                    | (pair.halves[0] as u64) << 2
                    | (pair.halves[1] as u64) << (2 + SINGLE_BITS)
            }
            _ => self.pack_single() as u64,
        }
    }

    /// Decode a packed location; `None` if the bits are not a valid encoding.
    pub fn from_raw(raw: u64) -> Option<Location> {
        if raw & TAG_MASK == PAIR_TAG {
            let first = (raw >> 2) & SINGLE_MASK;
            let second = raw >> (2 + SINGLE_BITS);
            let first_loc = Location::unpack_single(first)?;
            let second_loc = Location::unpack_single(second)?;
            return Some(Location::pair(first_loc, second_loc));
        }
        if raw > SINGLE_MASK {
            return None;
        }
        Location::unpack_single(raw)
    }

    fn pack_single(&self) -> u32 {
        let packed = match *self {
            Location::Pair(_) => panic!("pair locations cannot be nested"),
            Location::Constant(ConstantRef { id, pair_index }) => {
                assert!(id.0 < MAX_CONSTANT_ID, "constant id {} too large", id.0);
                assert!(pair_index < 2, "constant pair index {pair_index} out of range");
                CONSTANT_TAG | (pair_index as u64) << 2 | (id.0 as u64) << 3
            }
            Location::Invalid => Kind::Invalid as u64,
            Location::Unallocated(policy) => Self::pack_kind(Kind::Unallocated, policy as u64),
            Location::StackSlot { index, base, width } => {
                let biased = (index as i64 + STACK_INDEX_BIAS) as u64;
                Self::pack_kind(width.kind(), base.encoding() as u64 | biased << STACK_BASE_BITS)
            }
            Location::Register(reg) => Self::pack_kind(Kind::Register, reg.encoding() as u64),
            Location::FpuRegister(reg) => Self::pack_kind(Kind::FpuRegister, reg.encoding() as u64),
        };
        debug_assert!(packed <= SINGLE_MASK);
        packed as u32
    }

    const fn pack_kind(kind: Kind, payload: u64) -> u64 {
        kind as u64 | payload << KIND_BITS
    }

    fn unpack_single(bits: u64) -> Option<Location> {
        match bits & TAG_MASK {
            CONSTANT_TAG => {
                let pair_index = ((bits >> 2) & 1) as u8;
                let id = ConstantId((bits >> 3) as u32);
                return Some(Location::Constant(ConstantRef { id, pair_index }));
            }
            0 => {}
            _ => return None,
        }
        let payload = bits >> KIND_BITS;
        let location = match Kind::from_bits(bits & KIND_MASK)? {
            Kind::Invalid if payload == 0 => Location::Invalid,
            Kind::Invalid => return None,
            Kind::Unallocated => Location::Unallocated(Policy::from_bits(payload)?),
            Kind::Register => Location::Register(Gpr::from_encoding(u8::try_from(payload).ok()?)?),
            Kind::FpuRegister => {
                Location::FpuRegister(Xmm::from_encoding(u8::try_from(payload).ok()?)?)
            }
            kind @ (Kind::StackSlot | Kind::DoubleStackSlot | Kind::QuadStackSlot) => {
                let base = Gpr::from_encoding((payload & ((1 << STACK_BASE_BITS) - 1)) as u8)?;
                let index = ((payload >> STACK_BASE_BITS) as i64 - STACK_INDEX_BIAS) as i32;
                let width = match kind {
                    Kind::StackSlot => SlotWidth::Word,
                    Kind::DoubleStackSlot => SlotWidth::Double,
                    _ => SlotWidth::Quad,
                };
                Location::StackSlot { index, base, width }
            }
        };
        Some(location)
    }
}

/// Stack slot wide enough for a value of representation `rep`.
///
/// # Panics
///
/// Panics for representations that do not fit a single slot.
pub fn stack_slot_for_representation(rep: Representation, index: i32, base: Gpr) -> Location {
    match rep {
        Representation::UnboxedDouble | Representation::UnboxedFloat => {
            Location::double_stack_slot(index, base)
        }
        Representation::Float32x4 | Representation::Int32x4 | Representation::Float64x2 => {
            Location::quad_stack_slot(index, base)
        }
        Representation::PairOfTagged | Representation::NoRepresentation => {
            panic!("no single stack slot holds a {rep} value")
        }
        _ => Location::stack_slot(index, base),
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Location::Invalid => f.write_str("?"),
            Location::Constant(_) => f.write_str("C"),
            Location::Pair(pair) => write!(f, "({}, {})", pair.first(), pair.second()),
            Location::Unallocated(policy) => f.write_str(policy.name()),
            Location::StackSlot { index, base, width } => {
                if base == FP {
                    write!(f, "{}{:+}", width.prefix(), index)
                } else {
                    write!(f, "{}({}){:+}", width.prefix(), base, index)
                }
            }
            Location::Register(reg) => write!(f, "{reg}"),
            Location::FpuRegister(reg) => write!(f, "{reg}"),
        }
    }
}
