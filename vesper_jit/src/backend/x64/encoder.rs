//! x64 instruction encoder.
//!
//! Every instruction is encoded into a fixed-size [`EncodedInst`] on the
//! stack and then appended to the code buffer in one step, so an append
//! never leaves a partially written instruction behind.
//!
//! ```text
//! [Prefixes] [REX] [Opcode] [ModR/M] [SIB] [Disp] [Imm]
//! ```
//!
//! The encoders here are operand-generic: `encode_op` takes the opcode bytes,
//! the ModR/M `reg` field (a register or an opcode extension digit) and an
//! [`Rm`] operand, and works out REX, ModR/M, SIB and displacement.

use super::registers::{Address, Gpr, Scale, Xmm};

// =============================================================================
// Immediates
// =============================================================================

/// An immediate operand with the range checks the instruction selectors use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Immediate(pub i64);

impl Immediate {
    #[inline(always)]
    pub const fn value(self) -> i64 {
        self.0
    }

    #[inline(always)]
    pub const fn is_int8(self) -> bool {
        self.0 >= i8::MIN as i64 && self.0 <= i8::MAX as i64
    }

    #[inline(always)]
    pub const fn is_uint8(self) -> bool {
        self.0 >= 0 && self.0 <= u8::MAX as i64
    }

    #[inline(always)]
    pub const fn is_int16(self) -> bool {
        self.0 >= i16::MIN as i64 && self.0 <= i16::MAX as i64
    }

    #[inline(always)]
    pub const fn is_uint16(self) -> bool {
        self.0 >= 0 && self.0 <= u16::MAX as i64
    }

    #[inline(always)]
    pub const fn is_int32(self) -> bool {
        self.0 >= i32::MIN as i64 && self.0 <= i32::MAX as i64
    }

    #[inline(always)]
    pub const fn is_uint32(self) -> bool {
        self.0 >= 0 && self.0 <= u32::MAX as i64
    }
}

impl From<i64> for Immediate {
    fn from(value: i64) -> Self {
        Immediate(value)
    }
}

impl From<i32> for Immediate {
    fn from(value: i32) -> Self {
        Immediate(value as i64)
    }
}

// =============================================================================
// REX Prefix
// =============================================================================

/// REX prefix byte, `0100WRXB`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rex {
    pub w: bool, // 64-bit operand
    pub r: bool, // Extends reg in ModR/M
    pub x: bool, // Extends index in SIB
    pub b: bool, // Extends r/m in ModR/M or base in SIB
}

impl Rex {
    /// REX bits for a `reg` field and an r/m operand.
    #[inline]
    pub const fn for_operands(w: bool, reg: u8, rm: &Rm) -> Self {
        let (x, b) = match rm {
            Rm::Reg(enc) => (false, *enc >= 8),
            Rm::Mem(addr) => (
                match addr.index {
                    Some(idx) => idx.high_bit(),
                    None => false,
                },
                match addr.base {
                    Some(base) => base.high_bit(),
                    None => false,
                },
            ),
        };
        Rex {
            w,
            r: reg >= 8,
            x,
            b,
        }
    }

    #[inline]
    pub const fn is_needed(&self) -> bool {
        self.w || self.r || self.x || self.b
    }

    #[inline]
    pub const fn encode(&self) -> u8 {
        0x40
            | ((self.w as u8) << 3)
            | ((self.r as u8) << 2)
            | ((self.x as u8) << 1)
            | (self.b as u8)
    }
}

// =============================================================================
// ModR/M and SIB
// =============================================================================

/// Mod field values for ModR/M.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mod {
    /// [reg] or [disp32] or [SIB] depending on r/m
    Indirect = 0b00,
    /// [reg + disp8]
    IndirectDisp8 = 0b01,
    /// [reg + disp32]
    IndirectDisp32 = 0b10,
    /// reg (direct)
    Direct = 0b11,
}

#[inline]
pub const fn modrm(mod_: Mod, reg: u8, rm: u8) -> u8 {
    ((mod_ as u8) << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
}

#[inline]
pub const fn sib(scale: Scale, index: u8, base: u8) -> u8 {
    ((scale as u8) << 6) | ((index & 0x7) << 3) | (base & 0x7)
}

/// The r/m operand of an instruction: a register encoding or a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rm {
    Reg(u8),
    Mem(Address),
}

impl Rm {
    #[inline]
    pub const fn gpr(reg: Gpr) -> Self {
        Rm::Reg(reg.encoding())
    }

    #[inline]
    pub const fn xmm(reg: Xmm) -> Self {
        Rm::Reg(reg.encoding())
    }

    #[inline]
    pub const fn mem(addr: Address) -> Self {
        Rm::Mem(addr)
    }
}

impl From<Gpr> for Rm {
    fn from(reg: Gpr) -> Self {
        Rm::gpr(reg)
    }
}

impl From<Address> for Rm {
    fn from(addr: Address) -> Self {
        Rm::Mem(addr)
    }
}

// =============================================================================
// Encoded Instruction
// =============================================================================

/// Maximum encoded instruction length.
pub const MAX_INST_LEN: usize = 15;

/// A fully encoded instruction.
#[derive(Debug, Clone, Copy)]
pub struct EncodedInst {
    bytes: [u8; MAX_INST_LEN],
    len: u8,
}

impl EncodedInst {
    #[inline]
    pub const fn new() -> Self {
        EncodedInst {
            bytes: [0; MAX_INST_LEN],
            len: 0,
        }
    }

    /// An instruction consisting of exactly `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut enc = EncodedInst::new();
        for &b in bytes {
            enc.push(b);
        }
        enc
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn push(&mut self, byte: u8) {
        assert!((self.len as usize) < MAX_INST_LEN, "instruction longer than 15 bytes");
        self.bytes[self.len as usize] = byte;
        self.len += 1;
    }

    #[inline]
    pub fn push_i8(&mut self, val: i8) {
        self.push(val as u8);
    }

    #[inline]
    pub fn push_u16(&mut self, val: u16) {
        for b in val.to_le_bytes() {
            self.push(b);
        }
    }

    #[inline]
    pub fn push_u32(&mut self, val: u32) {
        for b in val.to_le_bytes() {
            self.push(b);
        }
    }

    #[inline]
    pub fn push_i32(&mut self, val: i32) {
        self.push_u32(val as u32);
    }

    #[inline]
    pub fn push_u64(&mut self, val: u64) {
        for b in val.to_le_bytes() {
            self.push(b);
        }
    }
}

impl Default for EncodedInst {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Generic Encoders
// =============================================================================

/// Encode `[prefix] [REX] opcode.. ModR/M [SIB] [disp]`.
///
/// `reg` is the ModR/M reg field: a register encoding (0-15) or an opcode
/// extension digit (0-7). `force_rex` emits an empty REX prefix even when no
/// bit is set, which byte operations on SPL/BPL/SIL/DIL require.
pub fn encode_op(
    prefix: Option<u8>,
    w: bool,
    opcode: &[u8],
    reg: u8,
    rm: &Rm,
    force_rex: bool,
) -> EncodedInst {
    let mut enc = EncodedInst::new();
    if let Some(prefix) = prefix {
        enc.push(prefix);
    }
    let rex = Rex::for_operands(w, reg, rm);
    if rex.is_needed() || force_rex {
        enc.push(rex.encode());
    }
    for &b in opcode {
        enc.push(b);
    }
    match rm {
        Rm::Reg(enc_rm) => enc.push(modrm(Mod::Direct, reg, *enc_rm)),
        Rm::Mem(addr) => encode_modrm_sib_disp(&mut enc, reg, addr),
    }
    enc
}

/// Encode an instruction whose register lives in the low opcode bits
/// (`push r`, `pop r`, `mov r, imm`).
pub fn encode_opcode_reg(w: bool, opcode: u8, reg: Gpr) -> EncodedInst {
    let mut enc = EncodedInst::new();
    let rex = Rex {
        w,
        r: false,
        x: false,
        b: reg.high_bit(),
    };
    if rex.is_needed() {
        enc.push(rex.encode());
    }
    enc.push(opcode + reg.low_bits());
    enc
}

/// Whether a byte-sized register operand needs an empty REX prefix.
#[inline]
pub fn byte_rex(rm: &Rm) -> bool {
    match rm {
        Rm::Reg(enc) => (4..8).contains(enc),
        Rm::Mem(_) => false,
    }
}

/// Encode ModR/M, optional SIB, and displacement for a memory operand.
fn encode_modrm_sib_disp(enc: &mut EncodedInst, reg: u8, mem: &Address) {
    match (mem.base, mem.index) {
        // RIP-relative: [RIP + disp32]
        (None, None) => {
            enc.push(modrm(Mod::Indirect, reg, 0b101));
            enc.push_i32(mem.disp);
        }

        // [index*scale + disp32], no base
        (None, Some(index)) => {
            enc.push(modrm(Mod::Indirect, reg, 0b100));
            enc.push(sib(mem.scale, index.low_bits(), 0b101));
            enc.push_i32(mem.disp);
        }

        // [base] or [base + disp]
        (Some(base), None) => {
            let mod_field = displacement_mod(base, mem);
            if base.needs_sib_as_base() {
                enc.push(modrm(mod_field, reg, 0b100));
                // SIB with no index: scale=00, index=RSP(100), base
                enc.push(sib(Scale::X1, 0b100, base.low_bits()));
            } else {
                enc.push(modrm(mod_field, reg, base.low_bits()));
            }
            push_disp(enc, mod_field, mem.disp);
        }

        // [base + index*scale + disp]
        (Some(base), Some(index)) => {
            debug_assert!(index != Gpr::Rsp, "rsp cannot be an index register");
            let mod_field = displacement_mod(base, mem);
            enc.push(modrm(mod_field, reg, 0b100));
            enc.push(sib(mem.scale, index.low_bits(), base.low_bits()));
            push_disp(enc, mod_field, mem.disp);
        }
    }
}

fn displacement_mod(base: Gpr, mem: &Address) -> Mod {
    // RBP/R13 as base always carry a displacement.
    if mem.disp == 0 && !base.needs_displacement() {
        Mod::Indirect
    } else if mem.disp_fits_i8() {
        Mod::IndirectDisp8
    } else {
        Mod::IndirectDisp32
    }
}

fn push_disp(enc: &mut EncodedInst, mod_field: Mod, disp: i32) {
    match mod_field {
        Mod::IndirectDisp8 => enc.push(disp as i8 as u8),
        Mod::IndirectDisp32 => enc.push_i32(disp),
        _ => {}
    }
}

// =============================================================================
// Condition Codes
// =============================================================================

/// Condition codes for Jcc, SETcc and CMOVcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Condition {
    Overflow = 0x0,
    NoOverflow = 0x1,
    Below = 0x2,
    AboveEqual = 0x3,
    Equal = 0x4,
    NotEqual = 0x5,
    BelowEqual = 0x6,
    Above = 0x7,
    Sign = 0x8,
    NoSign = 0x9,
    Parity = 0xA,
    NoParity = 0xB,
    Less = 0xC,
    GreaterEqual = 0xD,
    LessEqual = 0xE,
    Greater = 0xF,
}

impl Condition {
    pub const ZERO: Condition = Condition::Equal;
    pub const NOT_ZERO: Condition = Condition::NotEqual;
    pub const CARRY: Condition = Condition::Below;
    pub const NO_CARRY: Condition = Condition::AboveEqual;

    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// The condition that holds exactly when `self` does not.
    #[inline]
    pub const fn invert(self) -> Condition {
        match self {
            Condition::Overflow => Condition::NoOverflow,
            Condition::NoOverflow => Condition::Overflow,
            Condition::Below => Condition::AboveEqual,
            Condition::AboveEqual => Condition::Below,
            Condition::Equal => Condition::NotEqual,
            Condition::NotEqual => Condition::Equal,
            Condition::BelowEqual => Condition::Above,
            Condition::Above => Condition::BelowEqual,
            Condition::Sign => Condition::NoSign,
            Condition::NoSign => Condition::Sign,
            Condition::Parity => Condition::NoParity,
            Condition::NoParity => Condition::Parity,
            Condition::Less => Condition::GreaterEqual,
            Condition::GreaterEqual => Condition::Less,
            Condition::LessEqual => Condition::Greater,
            Condition::Greater => Condition::LessEqual,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(enc: EncodedInst) -> Vec<u8> {
        enc.as_slice().to_vec()
    }

    #[test]
    fn test_rex_encoding() {
        let rex = Rex {
            w: true,
            r: false,
            x: false,
            b: true,
        };
        assert_eq!(rex.encode(), 0x49);
        assert!(!Rex::default().is_needed());
    }

    #[test]
    fn test_reg_reg() {
        // mov rax, rcx: REX.W 89 /r with rcx in reg
        let enc = encode_op(None, true, &[0x89], Gpr::Rcx.encoding(), &Rm::gpr(Gpr::Rax), false);
        assert_eq!(bytes(enc), [0x48, 0x89, 0xC8]);
        // mov r8, r9
        let enc = encode_op(None, true, &[0x89], Gpr::R9.encoding(), &Rm::gpr(Gpr::R8), false);
        assert_eq!(bytes(enc), [0x4D, 0x89, 0xC8]);
    }

    #[test]
    fn test_memory_forms() {
        // mov rax, [rbx]
        let enc = encode_op(None, true, &[0x8B], 0, &Rm::mem(Address::new(Gpr::Rbx, 0)), false);
        assert_eq!(bytes(enc), [0x48, 0x8B, 0x03]);
        // mov rax, [rbp] needs disp8 = 0
        let enc = encode_op(None, true, &[0x8B], 0, &Rm::mem(Address::new(Gpr::Rbp, 0)), false);
        assert_eq!(bytes(enc), [0x48, 0x8B, 0x45, 0x00]);
        // mov rax, [rsp + 8] needs SIB
        let enc = encode_op(None, true, &[0x8B], 0, &Rm::mem(Address::new(Gpr::Rsp, 8)), false);
        assert_eq!(bytes(enc), [0x48, 0x8B, 0x44, 0x24, 0x08]);
        // mov rax, [r12 + 0x1000]
        let enc =
            encode_op(None, true, &[0x8B], 0, &Rm::mem(Address::new(Gpr::R12, 0x1000)), false);
        assert_eq!(bytes(enc), [0x49, 0x8B, 0x84, 0x24, 0x00, 0x10, 0x00, 0x00]);
        // mov rax, [r13] needs disp8 = 0
        let enc = encode_op(None, true, &[0x8B], 0, &Rm::mem(Address::new(Gpr::R13, 0)), false);
        assert_eq!(bytes(enc), [0x49, 0x8B, 0x45, 0x00]);
    }

    #[test]
    fn test_indexed_and_rip() {
        // mov rax, [rbx + rcx*8 + 16]
        let addr = Address::indexed(Gpr::Rbx, Gpr::Rcx, Scale::X8, 16);
        let enc = encode_op(None, true, &[0x8B], 0, &Rm::mem(addr), false);
        assert_eq!(bytes(enc), [0x48, 0x8B, 0x44, 0xCB, 0x10]);
        // lea rax, [rip + 0x100]
        let enc = encode_op(None, true, &[0x8D], 0, &Rm::mem(Address::rip_relative(0x100)), false);
        assert_eq!(bytes(enc), [0x48, 0x8D, 0x05, 0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_prefix_precedes_rex() {
        // movsd xmm8, [rax]: F2 REX.R 0F 10 /r
        let enc = encode_op(
            Some(0xF2),
            false,
            &[0x0F, 0x10],
            Xmm::Xmm8.encoding(),
            &Rm::mem(Address::new(Gpr::Rax, 0)),
            false,
        );
        assert_eq!(bytes(enc), [0xF2, 0x44, 0x0F, 0x10, 0x00]);
    }

    #[test]
    fn test_forced_byte_rex() {
        // testb sil, sil needs an empty REX
        let rm = Rm::gpr(Gpr::Rsi);
        let enc = encode_op(None, false, &[0x84], Gpr::Rsi.encoding(), &rm, byte_rex(&rm));
        assert_eq!(bytes(enc), [0x40, 0x84, 0xF6]);
        assert!(!byte_rex(&Rm::gpr(Gpr::Rbx)));
    }

    #[test]
    fn test_opcode_reg() {
        assert_eq!(bytes(encode_opcode_reg(false, 0x50, Gpr::Rbx)), [0x53]);
        assert_eq!(bytes(encode_opcode_reg(false, 0x50, Gpr::R12)), [0x41, 0x54]);
        assert_eq!(bytes(encode_opcode_reg(true, 0xB8, Gpr::Rax)), [0x48, 0xB8]);
    }

    #[test]
    fn test_immediate_ranges() {
        assert!(Immediate(-128).is_int8());
        assert!(!Immediate(128).is_int8());
        assert!(Immediate(255).is_uint8());
        assert!(Immediate(u32::MAX as i64).is_uint32());
        assert!(!Immediate(u32::MAX as i64).is_int32());
        assert!(Immediate(-1).is_int32());
        assert!(!Immediate(-1).is_uint32());
    }

    #[test]
    fn test_condition_invert_and_aliases() {
        for code in 0..16u8 {
            let cond = [
                Condition::Overflow,
                Condition::NoOverflow,
                Condition::Below,
                Condition::AboveEqual,
                Condition::Equal,
                Condition::NotEqual,
                Condition::BelowEqual,
                Condition::Above,
                Condition::Sign,
                Condition::NoSign,
                Condition::Parity,
                Condition::NoParity,
                Condition::Less,
                Condition::GreaterEqual,
                Condition::LessEqual,
                Condition::Greater,
            ][code as usize];
            assert_eq!(cond.code(), code);
            assert_eq!(cond.invert().code(), code ^ 1);
            assert_eq!(cond.invert().invert(), cond);
        }
        assert_eq!(Condition::ZERO, Condition::Equal);
        assert_eq!(Condition::CARRY.invert(), Condition::NO_CARRY);
    }
}
