//! x64 register definitions and the runtime's register conventions.
//!
//! This module provides:
//! - General-purpose (`Gpr`) and SSE (`Xmm`) registers with hardware encodings
//! - Bitfield register sets used by location summaries and frame code
//! - The registers the runtime reserves (thread, pool pointer, scratch)
//! - Memory operands (`Address`) including heap-field addressing

use std::fmt;

use crate::runtime::HEAP_OBJECT_TAG;

// =============================================================================
// General-Purpose Registers (GPR)
// =============================================================================

/// x64 general-purpose register.
///
/// Bits 0-2 of the encoding go into ModR/M or the opcode; bit 3 goes into
/// the REX prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

/// Number of general-purpose registers.
pub const NUM_GPRS: usize = 16;

impl Gpr {
    /// All registers in encoding order.
    pub const ALL: [Gpr; NUM_GPRS] = [
        Gpr::Rax,
        Gpr::Rcx,
        Gpr::Rdx,
        Gpr::Rbx,
        Gpr::Rsp,
        Gpr::Rbp,
        Gpr::Rsi,
        Gpr::Rdi,
        Gpr::R8,
        Gpr::R9,
        Gpr::R10,
        Gpr::R11,
        Gpr::R12,
        Gpr::R13,
        Gpr::R14,
        Gpr::R15,
    ];

    const NAMES: [&'static str; NUM_GPRS] = [
        "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
        "r13", "r14", "r15",
    ];

    #[inline(always)]
    pub const fn encoding(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    pub const fn low_bits(self) -> u8 {
        self.encoding() & 0x7
    }

    #[inline(always)]
    pub const fn high_bit(self) -> bool {
        self.encoding() >= 8
    }

    /// RSP and R12 alias the SIB escape in ModR/M and need a SIB byte as base.
    #[inline(always)]
    pub const fn needs_sib_as_base(self) -> bool {
        self.low_bits() == 4
    }

    /// RBP and R13 alias `[disp32]`/`[rip+disp32]` in mod=00 and need an
    /// explicit displacement.
    #[inline(always)]
    pub const fn needs_displacement(self) -> bool {
        self.low_bits() == 5
    }

    /// SPL, BPL, SIL and DIL are only addressable with a REX prefix; without
    /// one the same encodings name AH, CH, DH and BH.
    #[inline(always)]
    pub const fn byte_needs_rex(self) -> bool {
        let enc = self.encoding();
        enc >= 4 && enc < 8
    }

    #[inline]
    pub const fn from_encoding(enc: u8) -> Option<Gpr> {
        if (enc as usize) < NUM_GPRS {
            Some(Gpr::ALL[enc as usize])
        } else {
            None
        }
    }

    pub const fn name(self) -> &'static str {
        Self::NAMES[self as usize]
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// XMM Registers
// =============================================================================

/// x64 SSE register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
    Xmm8 = 8,
    Xmm9 = 9,
    Xmm10 = 10,
    Xmm11 = 11,
    Xmm12 = 12,
    Xmm13 = 13,
    Xmm14 = 14,
    Xmm15 = 15,
}

/// Number of XMM registers.
pub const NUM_XMMS: usize = 16;

/// Bytes reserved per XMM register when spilled.
pub const FPU_REGISTER_SIZE: i32 = 16;

impl Xmm {
    pub const ALL: [Xmm; NUM_XMMS] = [
        Xmm::Xmm0,
        Xmm::Xmm1,
        Xmm::Xmm2,
        Xmm::Xmm3,
        Xmm::Xmm4,
        Xmm::Xmm5,
        Xmm::Xmm6,
        Xmm::Xmm7,
        Xmm::Xmm8,
        Xmm::Xmm9,
        Xmm::Xmm10,
        Xmm::Xmm11,
        Xmm::Xmm12,
        Xmm::Xmm13,
        Xmm::Xmm14,
        Xmm::Xmm15,
    ];

    #[inline(always)]
    pub const fn encoding(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    pub const fn low_bits(self) -> u8 {
        self.encoding() & 0x7
    }

    #[inline(always)]
    pub const fn high_bit(self) -> bool {
        self.encoding() >= 8
    }

    #[inline]
    pub const fn from_encoding(enc: u8) -> Option<Xmm> {
        if (enc as usize) < NUM_XMMS {
            Some(Xmm::ALL[enc as usize])
        } else {
            None
        }
    }
}

impl fmt::Display for Xmm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xmm{}", self.encoding())
    }
}

// =============================================================================
// Register Sets (Bitfield)
// =============================================================================

/// A set of GPRs as a 16-bit mask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GprSet(u16);

impl GprSet {
    pub const EMPTY: GprSet = GprSet(0);
    pub const ALL: GprSet = GprSet(0xFFFF);

    #[inline(always)]
    pub const fn singleton(reg: Gpr) -> Self {
        GprSet(1 << reg.encoding())
    }

    #[inline(always)]
    pub const fn from_bits(bits: u16) -> Self {
        GprSet(bits)
    }

    /// Build a set from a register list (usable in constants).
    pub const fn of(regs: &[Gpr]) -> Self {
        let mut bits = 0u16;
        let mut i = 0;
        while i < regs.len() {
            bits |= 1 << regs[i].encoding();
            i += 1;
        }
        GprSet(bits)
    }

    #[inline(always)]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[inline(always)]
    pub const fn contains(self, reg: Gpr) -> bool {
        (self.0 & (1 << reg.encoding())) != 0
    }

    #[inline(always)]
    pub const fn insert(self, reg: Gpr) -> Self {
        GprSet(self.0 | (1 << reg.encoding()))
    }

    #[inline(always)]
    pub const fn remove(self, reg: Gpr) -> Self {
        GprSet(self.0 & !(1 << reg.encoding()))
    }

    #[inline(always)]
    pub const fn union(self, other: GprSet) -> Self {
        GprSet(self.0 | other.0)
    }

    #[inline(always)]
    pub const fn intersection(self, other: GprSet) -> Self {
        GprSet(self.0 & other.0)
    }

    #[inline(always)]
    pub const fn difference(self, other: GprSet) -> Self {
        GprSet(self.0 & !other.0)
    }

    #[inline(always)]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    #[inline]
    pub const fn first(self) -> Option<Gpr> {
        if self.0 == 0 {
            None
        } else {
            Gpr::from_encoding(self.0.trailing_zeros() as u8)
        }
    }

    /// Registers in ascending encoding order.
    pub fn iter(self) -> impl DoubleEndedIterator<Item = Gpr> {
        Gpr::ALL.into_iter().filter(move |&r| self.contains(r))
    }
}

impl fmt::Debug for GprSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A set of XMM registers as a 16-bit mask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct XmmSet(u16);

impl XmmSet {
    pub const EMPTY: XmmSet = XmmSet(0);
    pub const ALL: XmmSet = XmmSet(0xFFFF);

    #[inline(always)]
    pub const fn singleton(reg: Xmm) -> Self {
        XmmSet(1 << reg.encoding())
    }

    #[inline(always)]
    pub const fn from_bits(bits: u16) -> Self {
        XmmSet(bits)
    }

    #[inline(always)]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[inline(always)]
    pub const fn contains(self, reg: Xmm) -> bool {
        (self.0 & (1 << reg.encoding())) != 0
    }

    #[inline(always)]
    pub const fn insert(self, reg: Xmm) -> Self {
        XmmSet(self.0 | (1 << reg.encoding()))
    }

    #[inline(always)]
    pub const fn remove(self, reg: Xmm) -> Self {
        XmmSet(self.0 & !(1 << reg.encoding()))
    }

    #[inline(always)]
    pub const fn union(self, other: XmmSet) -> Self {
        XmmSet(self.0 | other.0)
    }

    #[inline(always)]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn iter(self) -> impl DoubleEndedIterator<Item = Xmm> {
        Xmm::ALL.into_iter().filter(move |&r| self.contains(r))
    }
}

impl fmt::Debug for XmmSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

// =============================================================================
// Runtime Register Conventions
// =============================================================================

/// Scratch register; never allocated, clobbered by macro sequences.
pub const TMP: Gpr = Gpr::R11;
/// Object pool pointer.
pub const PP: Gpr = Gpr::R15;
/// Current thread.
pub const THR: Gpr = Gpr::R14;
/// Code object of the executing function.
pub const CODE_REG: Gpr = Gpr::R12;
/// Frame pointer.
pub const FP: Gpr = Gpr::Rbp;
/// Stack pointer.
pub const SPREG: Gpr = Gpr::Rsp;
/// Arguments descriptor for calls.
pub const ARGS_DESC_REG: Gpr = Gpr::R10;
/// Scratch XMM register.
pub const FPU_TMP: Xmm = Xmm::Xmm15;

/// Fixed registers of the shared write-barrier stubs.
pub const WRITE_BARRIER_OBJECT_REG: Gpr = Gpr::Rdx;
pub const WRITE_BARRIER_VALUE_REG: Gpr = Gpr::Rax;
pub const WRITE_BARRIER_SLOT_REG: Gpr = Gpr::R13;

/// Registers the allocator must never hand out.
pub const RESERVED_GPRS: GprSet = GprSet::of(&[SPREG, FP, TMP, PP, THR]);

/// Registers available to the register allocator.
pub const ALLOCATABLE_GPRS: GprSet = GprSet::ALL.difference(RESERVED_GPRS);

/// XMM registers available to the register allocator.
pub const ALLOCATABLE_XMMS: XmmSet = XmmSet::ALL.remove(FPU_TMP);

/// Registers preserved across calls to native code (System V).
pub const CALLEE_SAVED_GPRS: GprSet =
    GprSet::of(&[Gpr::Rbx, Gpr::Rbp, Gpr::R12, Gpr::R13, Gpr::R14, Gpr::R15]);

/// Integer argument registers for native calls (System V).
pub const NATIVE_ARGUMENT_GPRS: [Gpr; 6] =
    [Gpr::Rdi, Gpr::Rsi, Gpr::Rdx, Gpr::Rcx, Gpr::R8, Gpr::R9];

// =============================================================================
// Memory Operands
// =============================================================================

/// Scale factor for SIB addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Scale {
    X1 = 0,
    X2 = 1,
    X4 = 2,
    X8 = 3,
}

impl Scale {
    #[inline(always)]
    pub const fn encoding(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    pub const fn value(self) -> u8 {
        1 << (self as u8)
    }

    pub const fn from_value(val: u8) -> Option<Scale> {
        match val {
            1 => Some(Scale::X1),
            2 => Some(Scale::X2),
            4 => Some(Scale::X4),
            8 => Some(Scale::X8),
            _ => None,
        }
    }
}

/// An x64 memory operand: `[base + index*scale + disp]` or `[rip + disp]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub base: Option<Gpr>,
    /// Index register; RSP cannot be an index.
    pub index: Option<Gpr>,
    pub scale: Scale,
    pub disp: i32,
}

impl Address {
    /// `[base + disp]`
    #[inline]
    pub const fn new(base: Gpr, disp: i32) -> Self {
        Address {
            base: Some(base),
            index: None,
            scale: Scale::X1,
            disp,
        }
    }

    /// `[base + index*scale + disp]`
    #[inline]
    pub const fn indexed(base: Gpr, index: Gpr, scale: Scale, disp: i32) -> Self {
        assert!(!matches!(index, Gpr::Rsp), "rsp cannot be an index register");
        Address {
            base: Some(base),
            index: Some(index),
            scale,
            disp,
        }
    }

    /// `[rip + disp]`, relative to the end of the instruction.
    #[inline]
    pub const fn rip_relative(disp: i32) -> Self {
        Address {
            base: None,
            index: None,
            scale: Scale::X1,
            disp,
        }
    }

    /// A field of a tagged heap object: `[base + disp - HEAP_OBJECT_TAG]`.
    #[inline]
    pub const fn field(base: Gpr, disp: i32) -> Self {
        Address::new(base, disp - HEAP_OBJECT_TAG)
    }

    /// An element of a tagged heap object indexed by a register.
    #[inline]
    pub const fn field_indexed(base: Gpr, index: Gpr, scale: Scale, disp: i32) -> Self {
        Address::indexed(base, index, scale, disp - HEAP_OBJECT_TAG)
    }

    #[inline]
    pub const fn needs_sib(&self) -> bool {
        self.index.is_some() || matches!(self.base, Some(b) if b.needs_sib_as_base())
    }

    #[inline]
    pub const fn disp_fits_i8(&self) -> bool {
        self.disp >= -128 && self.disp <= 127
    }

    /// Whether the operand references `reg` as base or index.
    #[inline]
    pub fn uses(&self, reg: Gpr) -> bool {
        self.base == Some(reg) || self.index == Some(reg)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        match (self.base, self.index) {
            (None, None) => f.write_str("rip")?,
            (Some(base), None) => write!(f, "{base}")?,
            (Some(base), Some(index)) => write!(f, "{base}+{index}*{}", self.scale.value())?,
            (None, Some(index)) => write!(f, "{index}*{}", self.scale.value())?,
        }
        if self.disp != 0 {
            write!(f, "{:+}", self.disp)?;
        }
        f.write_str("]")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpr_encoding_roundtrip() {
        for reg in Gpr::ALL {
            assert_eq!(Gpr::from_encoding(reg.encoding()), Some(reg));
        }
        assert_eq!(Gpr::from_encoding(16), None);
        assert_eq!(Gpr::R13.name(), "r13");
    }

    #[test]
    fn test_byte_register_rex() {
        assert!(!Gpr::Rbx.byte_needs_rex());
        assert!(Gpr::Rsi.byte_needs_rex());
        assert!(Gpr::Rsp.byte_needs_rex());
        assert!(!Gpr::R8.byte_needs_rex());
    }

    #[test]
    fn test_reserved_registers_not_allocatable() {
        for reg in [SPREG, FP, TMP, PP, THR] {
            assert!(!ALLOCATABLE_GPRS.contains(reg));
        }
        assert!(ALLOCATABLE_GPRS.contains(Gpr::Rax));
        assert!(ALLOCATABLE_GPRS.contains(CODE_REG));
        assert_eq!(ALLOCATABLE_GPRS.count(), 11);
        assert!(!ALLOCATABLE_XMMS.contains(FPU_TMP));
    }

    #[test]
    fn test_gpr_set_iteration_order() {
        let set = GprSet::of(&[Gpr::R15, Gpr::Rax, Gpr::Rdx]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Gpr::Rax, Gpr::Rdx, Gpr::R15]);
        assert_eq!(set.iter().rev().next(), Some(Gpr::R15));
        assert_eq!(set.first(), Some(Gpr::Rax));
        assert_eq!(format!("{set:?}"), "{Rax, Rdx, R15}");
    }

    #[test]
    fn test_field_address_untags() {
        let addr = Address::field(Gpr::Rax, 8);
        assert_eq!(addr.disp, 8 - HEAP_OBJECT_TAG);
        assert_eq!(addr.to_string(), "[rax+7]");
        assert_eq!(Address::new(Gpr::Rbp, -16).to_string(), "[rbp-16]");
    }

    #[test]
    #[should_panic(expected = "rsp cannot be an index")]
    fn test_rsp_index_rejected() {
        let _ = Address::indexed(Gpr::Rax, Gpr::Rsp, Scale::X8, 0);
    }

    #[test]
    fn test_scale() {
        assert_eq!(Scale::X8.value(), 8);
        assert_eq!(Scale::from_value(4), Some(Scale::X4));
        assert_eq!(Scale::from_value(3), None);
    }
}
