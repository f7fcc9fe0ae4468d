//! Data movement, integer arithmetic and SSE instructions.
//!
//! Methods are named `<mnemonic>_<operands>`: `r` register, `m` memory,
//! `i` immediate, `x` XMM register, in destination-source order. `q`
//! mnemonics are 64-bit, `l` 32-bit, `w` 16-bit and `b` 8-bit.

use super::assembler::Assembler;
use super::encoder::{encode_op, encode_opcode_reg, Condition, EncodedInst, Immediate, Rm};
use super::registers::{Address, Gpr, Xmm};

/// Group-1 arithmetic operations; the value is the ModR/M extension digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum AluOp {
    Add = 0,
    Or = 1,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

impl Assembler {
    // =========================================================================
    // Moves
    // =========================================================================

    pub fn movq_rr(&mut self, dst: Gpr, src: Gpr) {
        self.emit_op(None, true, &[0x89], src.encoding(), Rm::gpr(dst));
    }

    pub fn movl_rr(&mut self, dst: Gpr, src: Gpr) {
        self.emit_op(None, false, &[0x89], src.encoding(), Rm::gpr(dst));
    }

    pub fn movq_rm(&mut self, dst: Gpr, src: Address) {
        self.emit_op(None, true, &[0x8B], dst.encoding(), Rm::mem(src));
    }

    pub fn movl_rm(&mut self, dst: Gpr, src: Address) {
        self.emit_op(None, false, &[0x8B], dst.encoding(), Rm::mem(src));
    }

    /// Load a byte into the low byte of `dst`, leaving the rest untouched.
    pub fn movb_rm(&mut self, dst: Gpr, src: Address) {
        self.emit(encode_op(
            None,
            false,
            &[0x8A],
            dst.encoding(),
            &Rm::mem(src),
            dst.byte_needs_rex(),
        ));
    }

    pub fn movq_mr(&mut self, dst: Address, src: Gpr) {
        self.emit_op(None, true, &[0x89], src.encoding(), Rm::mem(dst));
    }

    pub fn movl_mr(&mut self, dst: Address, src: Gpr) {
        self.emit_op(None, false, &[0x89], src.encoding(), Rm::mem(dst));
    }

    pub fn movw_mr(&mut self, dst: Address, src: Gpr) {
        self.emit_op(Some(0x66), false, &[0x89], src.encoding(), Rm::mem(dst));
    }

    pub fn movb_mr(&mut self, dst: Address, src: Gpr) {
        self.emit(encode_op(
            None,
            false,
            &[0x88],
            src.encoding(),
            &Rm::mem(dst),
            src.byte_needs_rex(),
        ));
    }

    /// Load a 64-bit immediate using the shortest encoding: zero-extended
    /// 32-bit, then sign-extended 32-bit, then a full 64-bit immediate.
    pub fn movq_ri(&mut self, dst: Gpr, imm: i64) {
        let imm = Immediate(imm);
        if imm.is_uint32() {
            let mut enc = encode_opcode_reg(false, 0xB8, dst);
            enc.push_u32(imm.value() as u32);
            self.emit(enc);
        } else if imm.is_int32() {
            let mut enc = encode_op(None, true, &[0xC7], 0, &Rm::gpr(dst), false);
            enc.push_i32(imm.value() as i32);
            self.emit(enc);
        } else {
            let mut enc = encode_opcode_reg(true, 0xB8, dst);
            enc.push_u64(imm.value() as u64);
            self.emit(enc);
        }
    }

    pub fn movl_ri(&mut self, dst: Gpr, imm: u32) {
        let mut enc = encode_opcode_reg(false, 0xB8, dst);
        enc.push_u32(imm);
        self.emit(enc);
    }

    /// Store a sign-extended 32-bit immediate.
    pub fn movq_mi(&mut self, dst: Address, imm: i64) {
        let imm = Immediate(imm);
        assert!(imm.is_int32(), "movq immediate {} does not fit in 32 bits", imm.value());
        let mut enc = encode_op(None, true, &[0xC7], 0, &Rm::mem(dst), false);
        enc.push_i32(imm.value() as i32);
        self.emit(enc);
    }

    pub fn movl_mi(&mut self, dst: Address, imm: u32) {
        let mut enc = encode_op(None, false, &[0xC7], 0, &Rm::mem(dst), false);
        enc.push_u32(imm);
        self.emit(enc);
    }

    pub fn movw_mi(&mut self, dst: Address, imm: u16) {
        let mut enc = encode_op(Some(0x66), false, &[0xC7], 0, &Rm::mem(dst), false);
        enc.push_u16(imm);
        self.emit(enc);
    }

    pub fn movb_mi(&mut self, dst: Address, imm: u8) {
        let mut enc = encode_op(None, false, &[0xC6], 0, &Rm::mem(dst), false);
        enc.push(imm);
        self.emit(enc);
    }

    pub fn movzxb_rr(&mut self, dst: Gpr, src: Gpr) {
        self.emit(encode_op(
            None,
            false,
            &[0x0F, 0xB6],
            dst.encoding(),
            &Rm::gpr(src),
            src.byte_needs_rex(),
        ));
    }

    pub fn movzxb_rm(&mut self, dst: Gpr, src: Address) {
        self.emit_op(None, false, &[0x0F, 0xB6], dst.encoding(), Rm::mem(src));
    }

    pub fn movsxb_rm(&mut self, dst: Gpr, src: Address) {
        self.emit_op(None, true, &[0x0F, 0xBE], dst.encoding(), Rm::mem(src));
    }

    pub fn movzxw_rm(&mut self, dst: Gpr, src: Address) {
        self.emit_op(None, false, &[0x0F, 0xB7], dst.encoding(), Rm::mem(src));
    }

    pub fn movsxw_rm(&mut self, dst: Gpr, src: Address) {
        self.emit_op(None, true, &[0x0F, 0xBF], dst.encoding(), Rm::mem(src));
    }

    pub fn movsxd_rr(&mut self, dst: Gpr, src: Gpr) {
        self.emit_op(None, true, &[0x63], dst.encoding(), Rm::gpr(src));
    }

    pub fn movsxd_rm(&mut self, dst: Gpr, src: Address) {
        self.emit_op(None, true, &[0x63], dst.encoding(), Rm::mem(src));
    }

    pub fn leaq(&mut self, dst: Gpr, src: Address) {
        self.emit_op(None, true, &[0x8D], dst.encoding(), Rm::mem(src));
    }

    pub fn cmovq(&mut self, cond: Condition, dst: Gpr, src: Gpr) {
        self.emit_op(None, true, &[0x0F, 0x40 + cond.code()], dst.encoding(), Rm::gpr(src));
    }

    /// Set the low byte of `dst` to 1 if `cond` holds, else 0.
    pub fn setcc(&mut self, cond: Condition, dst: Gpr) {
        self.emit(encode_op(
            None,
            false,
            &[0x0F, 0x90 + cond.code()],
            0,
            &Rm::gpr(dst),
            dst.byte_needs_rex(),
        ));
    }

    // =========================================================================
    // Stack
    // =========================================================================

    pub fn pushq_r(&mut self, reg: Gpr) {
        self.emit(encode_opcode_reg(false, 0x50, reg));
    }

    pub fn popq_r(&mut self, reg: Gpr) {
        self.emit(encode_opcode_reg(false, 0x58, reg));
    }

    pub fn pushq_m(&mut self, src: Address) {
        self.emit_op(None, false, &[0xFF], 6, Rm::mem(src));
    }

    pub fn popq_m(&mut self, dst: Address) {
        self.emit_op(None, false, &[0x8F], 0, Rm::mem(dst));
    }

    /// Push a sign-extended immediate.
    pub fn pushq_i(&mut self, imm: i64) {
        let imm = Immediate(imm);
        if imm.is_int8() {
            self.emit(EncodedInst::from_bytes(&[0x6A, imm.value() as i8 as u8]));
        } else {
            assert!(imm.is_int32(), "push immediate {} does not fit in 32 bits", imm.value());
            let mut enc = EncodedInst::from_bytes(&[0x68]);
            enc.push_i32(imm.value() as i32);
            self.emit(enc);
        }
    }

    // =========================================================================
    // Arithmetic
    // =========================================================================

    fn alu_rr(&mut self, op: AluOp, w: bool, dst: Gpr, src: Gpr) {
        self.emit_op(None, w, &[(op as u8) * 8 + 1], src.encoding(), Rm::gpr(dst));
    }

    fn alu_rm(&mut self, op: AluOp, w: bool, dst: Gpr, src: Address) {
        self.emit_op(None, w, &[(op as u8) * 8 + 3], dst.encoding(), Rm::mem(src));
    }

    fn alu_mr(&mut self, op: AluOp, w: bool, dst: Address, src: Gpr) {
        self.emit_op(None, w, &[(op as u8) * 8 + 1], src.encoding(), Rm::mem(dst));
    }

    /// imm8 form, then the short RAX form, then the general imm32 form.
    fn alu_imm(&mut self, op: AluOp, w: bool, dst: Rm, imm: i64) {
        let imm = Immediate(imm);
        let value = if w {
            assert!(imm.is_int32(), "immediate {} does not fit in 32 bits", imm.value());
            imm.value() as i32
        } else {
            assert!(
                imm.is_int32() || imm.is_uint32(),
                "immediate {} does not fit in 32 bits",
                imm.value()
            );
            imm.value() as u32 as i32
        };
        let digit = op as u8;
        if Immediate(value as i64).is_int8() {
            let mut enc = encode_op(None, w, &[0x83], digit, &dst, false);
            enc.push_i8(value as i8);
            self.emit(enc);
        } else if dst == Rm::gpr(Gpr::Rax) {
            let mut enc = EncodedInst::new();
            if w {
                enc.push(0x48);
            }
            enc.push(digit * 8 + 5);
            enc.push_i32(value);
            self.emit(enc);
        } else {
            let mut enc = encode_op(None, w, &[0x81], digit, &dst, false);
            enc.push_i32(value);
            self.emit(enc);
        }
    }

    pub fn incq(&mut self, reg: Gpr) {
        self.emit_op(None, true, &[0xFF], 0, Rm::gpr(reg));
    }

    pub fn decq(&mut self, reg: Gpr) {
        self.emit_op(None, true, &[0xFF], 1, Rm::gpr(reg));
    }

    pub fn negq(&mut self, reg: Gpr) {
        self.emit_op(None, true, &[0xF7], 3, Rm::gpr(reg));
    }

    pub fn notq(&mut self, reg: Gpr) {
        self.emit_op(None, true, &[0xF7], 2, Rm::gpr(reg));
    }

    pub fn imulq_rr(&mut self, dst: Gpr, src: Gpr) {
        self.emit_op(None, true, &[0x0F, 0xAF], dst.encoding(), Rm::gpr(src));
    }

    pub fn imulq_ri(&mut self, dst: Gpr, imm: i64) {
        let imm = Immediate(imm);
        if imm.is_int8() {
            let mut enc = encode_op(None, true, &[0x6B], dst.encoding(), &Rm::gpr(dst), false);
            enc.push_i8(imm.value() as i8);
            self.emit(enc);
        } else {
            assert!(imm.is_int32(), "imul immediate {} does not fit in 32 bits", imm.value());
            let mut enc = encode_op(None, true, &[0x69], dst.encoding(), &Rm::gpr(dst), false);
            enc.push_i32(imm.value() as i32);
            self.emit(enc);
        }
    }

    /// Sign-extend RAX into RDX:RAX.
    pub fn cqo(&mut self) {
        self.emit(EncodedInst::from_bytes(&[0x48, 0x99]));
    }

    /// Signed divide RDX:RAX by `divisor`.
    pub fn idivq(&mut self, divisor: Gpr) {
        self.emit_op(None, true, &[0xF7], 7, Rm::gpr(divisor));
    }

    // =========================================================================
    // Shifts
    // =========================================================================

    fn shift_imm(&mut self, digit: u8, w: bool, reg: Gpr, amount: u8) {
        let limit = if w { 64 } else { 32 };
        assert!(amount < limit, "shift amount {amount} out of range");
        if amount == 1 {
            self.emit_op(None, w, &[0xD1], digit, Rm::gpr(reg));
        } else {
            let mut enc = encode_op(None, w, &[0xC1], digit, &Rm::gpr(reg), false);
            enc.push(amount);
            self.emit(enc);
        }
    }

    pub fn shlq_ri(&mut self, reg: Gpr, amount: u8) {
        self.shift_imm(4, true, reg, amount);
    }

    pub fn shrq_ri(&mut self, reg: Gpr, amount: u8) {
        self.shift_imm(5, true, reg, amount);
    }

    pub fn sarq_ri(&mut self, reg: Gpr, amount: u8) {
        self.shift_imm(7, true, reg, amount);
    }

    pub fn shll_ri(&mut self, reg: Gpr, amount: u8) {
        self.shift_imm(4, false, reg, amount);
    }

    pub fn shrl_ri(&mut self, reg: Gpr, amount: u8) {
        self.shift_imm(5, false, reg, amount);
    }

    pub fn sarl_ri(&mut self, reg: Gpr, amount: u8) {
        self.shift_imm(7, false, reg, amount);
    }

    /// Shift by CL.
    pub fn shlq_cl(&mut self, reg: Gpr) {
        self.emit_op(None, true, &[0xD3], 4, Rm::gpr(reg));
    }

    pub fn shrq_cl(&mut self, reg: Gpr) {
        self.emit_op(None, true, &[0xD3], 5, Rm::gpr(reg));
    }

    pub fn sarq_cl(&mut self, reg: Gpr) {
        self.emit_op(None, true, &[0xD3], 7, Rm::gpr(reg));
    }

    // =========================================================================
    // Tests and Compares
    // =========================================================================

    pub fn testq_rr(&mut self, a: Gpr, b: Gpr) {
        self.emit_op(None, true, &[0x85], b.encoding(), Rm::gpr(a));
    }

    pub fn testl_rr(&mut self, a: Gpr, b: Gpr) {
        self.emit_op(None, false, &[0x85], b.encoding(), Rm::gpr(a));
    }

    /// Test against an immediate: byte form for uint8, 32-bit form for
    /// uint32, else the sign-extended 64-bit form.
    pub fn testq_ri(&mut self, reg: Gpr, imm: i64) {
        let imm = Immediate(imm);
        if imm.is_uint8() {
            if reg == Gpr::Rax {
                self.emit(EncodedInst::from_bytes(&[0xA8, imm.value() as u8]));
            } else {
                let mut enc =
                    encode_op(None, false, &[0xF6], 0, &Rm::gpr(reg), reg.byte_needs_rex());
                enc.push(imm.value() as u8);
                self.emit(enc);
            }
        } else if imm.is_uint32() {
            let mut enc = if reg == Gpr::Rax {
                EncodedInst::from_bytes(&[0xA9])
            } else {
                encode_op(None, false, &[0xF7], 0, &Rm::gpr(reg), false)
            };
            enc.push_u32(imm.value() as u32);
            self.emit(enc);
        } else {
            assert!(imm.is_int32(), "test immediate {} does not fit in 32 bits", imm.value());
            let mut enc = if reg == Gpr::Rax {
                EncodedInst::from_bytes(&[0x48, 0xA9])
            } else {
                encode_op(None, true, &[0xF7], 0, &Rm::gpr(reg), false)
            };
            enc.push_i32(imm.value() as i32);
            self.emit(enc);
        }
    }

    /// Test a byte in memory against the low byte of `reg`.
    pub fn testb_mr(&mut self, addr: Address, reg: Gpr) {
        self.emit(encode_op(
            None,
            false,
            &[0x84],
            reg.encoding(),
            &Rm::mem(addr),
            reg.byte_needs_rex(),
        ));
    }

    pub fn testb_mi(&mut self, addr: Address, imm: u8) {
        let mut enc = encode_op(None, false, &[0xF6], 0, &Rm::mem(addr), false);
        enc.push(imm);
        self.emit(enc);
    }

    pub fn cmpb_mi(&mut self, addr: Address, imm: u8) {
        let mut enc = encode_op(None, false, &[0x80], 7, &Rm::mem(addr), false);
        enc.push(imm);
        self.emit(enc);
    }

    /// `lock cmpxchg [addr], reg`: compare RAX with `[addr]` and store `reg`
    /// on equality; RAX receives the old value.
    pub fn lock_cmpxchgq(&mut self, addr: Address, reg: Gpr) {
        self.emit_op(Some(0xF0), true, &[0x0F, 0xB1], reg.encoding(), Rm::mem(addr));
    }

    // =========================================================================
    // SSE
    // =========================================================================

    pub fn movsd_xm(&mut self, dst: Xmm, src: Address) {
        self.emit_op(Some(0xF2), false, &[0x0F, 0x10], dst.encoding(), Rm::mem(src));
    }

    pub fn movsd_mx(&mut self, dst: Address, src: Xmm) {
        self.emit_op(Some(0xF2), false, &[0x0F, 0x11], src.encoding(), Rm::mem(dst));
    }

    pub fn movsd_xx(&mut self, dst: Xmm, src: Xmm) {
        self.emit_op(Some(0xF2), false, &[0x0F, 0x10], dst.encoding(), Rm::xmm(src));
    }

    pub fn movups_xm(&mut self, dst: Xmm, src: Address) {
        self.emit_op(None, false, &[0x0F, 0x10], dst.encoding(), Rm::mem(src));
    }

    pub fn movups_mx(&mut self, dst: Address, src: Xmm) {
        self.emit_op(None, false, &[0x0F, 0x11], src.encoding(), Rm::mem(dst));
    }

    pub fn movaps_xx(&mut self, dst: Xmm, src: Xmm) {
        self.emit_op(None, false, &[0x0F, 0x28], dst.encoding(), Rm::xmm(src));
    }

    pub fn addsd(&mut self, dst: Xmm, src: Xmm) {
        self.emit_op(Some(0xF2), false, &[0x0F, 0x58], dst.encoding(), Rm::xmm(src));
    }

    pub fn mulsd(&mut self, dst: Xmm, src: Xmm) {
        self.emit_op(Some(0xF2), false, &[0x0F, 0x59], dst.encoding(), Rm::xmm(src));
    }

    pub fn subsd(&mut self, dst: Xmm, src: Xmm) {
        self.emit_op(Some(0xF2), false, &[0x0F, 0x5C], dst.encoding(), Rm::xmm(src));
    }

    pub fn divsd(&mut self, dst: Xmm, src: Xmm) {
        self.emit_op(Some(0xF2), false, &[0x0F, 0x5E], dst.encoding(), Rm::xmm(src));
    }

    pub fn comisd(&mut self, a: Xmm, b: Xmm) {
        self.emit_op(Some(0x66), false, &[0x0F, 0x2F], a.encoding(), Rm::xmm(b));
    }

    pub fn cvtsi2sdq(&mut self, dst: Xmm, src: Gpr) {
        self.emit_op(Some(0xF2), true, &[0x0F, 0x2A], dst.encoding(), Rm::gpr(src));
    }

    pub fn cvttsd2siq(&mut self, dst: Gpr, src: Xmm) {
        self.emit_op(Some(0xF2), true, &[0x0F, 0x2C], dst.encoding(), Rm::xmm(src));
    }

    /// Move the bits of a GPR into the low quadword of an XMM register.
    pub fn movq_xr(&mut self, dst: Xmm, src: Gpr) {
        self.emit_op(Some(0x66), true, &[0x0F, 0x6E], dst.encoding(), Rm::gpr(src));
    }

    /// Move the low quadword of an XMM register into a GPR.
    pub fn movq_rx(&mut self, dst: Gpr, src: Xmm) {
        self.emit_op(Some(0x66), true, &[0x0F, 0x7E], src.encoding(), Rm::gpr(dst));
    }
}

// Register, memory and immediate forms of the group-1 operations.
macro_rules! alu_instructions {
    ($($op:ident, $w:expr => $rr:ident, $rm:ident, $mr:ident, $ri:ident, $mi:ident;)*) => {
        impl Assembler {
            $(
                pub fn $rr(&mut self, dst: Gpr, src: Gpr) {
                    self.alu_rr(AluOp::$op, $w, dst, src);
                }

                pub fn $rm(&mut self, dst: Gpr, src: Address) {
                    self.alu_rm(AluOp::$op, $w, dst, src);
                }

                pub fn $mr(&mut self, dst: Address, src: Gpr) {
                    self.alu_mr(AluOp::$op, $w, dst, src);
                }

                pub fn $ri(&mut self, dst: Gpr, imm: i64) {
                    self.alu_imm(AluOp::$op, $w, Rm::gpr(dst), imm);
                }

                pub fn $mi(&mut self, dst: Address, imm: i64) {
                    self.alu_imm(AluOp::$op, $w, Rm::mem(dst), imm);
                }
            )*
        }
    };
}

alu_instructions! {
    Add, true => addq_rr, addq_rm, addq_mr, addq_ri, addq_mi;
    Add, false => addl_rr, addl_rm, addl_mr, addl_ri, addl_mi;
    Sub, true => subq_rr, subq_rm, subq_mr, subq_ri, subq_mi;
    Sub, false => subl_rr, subl_rm, subl_mr, subl_ri, subl_mi;
    And, true => andq_rr, andq_rm, andq_mr, andq_ri, andq_mi;
    And, false => andl_rr, andl_rm, andl_mr, andl_ri, andl_mi;
    Or, true => orq_rr, orq_rm, orq_mr, orq_ri, orq_mi;
    Or, false => orl_rr, orl_rm, orl_mr, orl_ri, orl_mi;
    Xor, true => xorq_rr, xorq_rm, xorq_mr, xorq_ri, xorq_mi;
    Xor, false => xorl_rr, xorl_rm, xorl_mr, xorl_ri, xorl_mi;
    Cmp, true => cmpq_rr, cmpq_rm, cmpq_mr, cmpq_ri, cmpq_mi;
    Cmp, false => cmpl_rr, cmpl_rm, cmpl_mr, cmpl_ri, cmpl_mi;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssemblerConfig;

    fn encode(f: impl FnOnce(&mut Assembler)) -> Vec<u8> {
        let mut asm = Assembler::new(AssemblerConfig::default());
        f(&mut asm);
        asm.bytes().to_vec()
    }

    #[test]
    fn test_movq_immediate_cascade() {
        // Zero-extended 32-bit: B8+r, with REX.B only for r8-r15.
        assert_eq!(encode(|a| a.movq_ri(Gpr::Rax, 1)), [0xB8, 1, 0, 0, 0]);
        assert_eq!(
            encode(|a| a.movq_ri(Gpr::R9, 0xFFFF_FFFF)),
            [0x41, 0xB9, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        // Sign-extended 32-bit: REX.W C7 /0.
        assert_eq!(
            encode(|a| a.movq_ri(Gpr::Rcx, -1)),
            [0x48, 0xC7, 0xC1, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        // Full 64-bit.
        let bytes = encode(|a| a.movq_ri(Gpr::Rdx, 0x1_0000_0000));
        assert_eq!(bytes.len(), 10);
        assert_eq!(&bytes[..2], &[0x48, 0xBA]);
    }

    #[test]
    fn test_moves() {
        assert_eq!(encode(|a| a.movq_rr(Gpr::Rax, Gpr::Rcx)), [0x48, 0x89, 0xC8]);
        assert_eq!(
            encode(|a| a.movq_rm(Gpr::R11, Address::new(Gpr::R14, 0x68))),
            [0x4D, 0x8B, 0x5E, 0x68]
        );
        assert_eq!(
            encode(|a| a.movq_mi(Address::new(Gpr::R14, 0x78), 0)),
            [0x49, 0xC7, 0x46, 0x78, 0, 0, 0, 0]
        );
        assert_eq!(encode(|a| a.movb_rm(Gpr::Rsi, Address::new(Gpr::Rax, 0))), [0x40, 0x8A, 0x30]);
        assert_eq!(
            encode(|a| a.leaq(Gpr::Rax, Address::new(Gpr::Rsp, 8))),
            [0x48, 0x8D, 0x44, 0x24, 0x08]
        );
    }

    #[test]
    fn test_alu_immediate_cascade() {
        // imm8
        assert_eq!(encode(|a| a.addq_ri(Gpr::Rcx, 8)), [0x48, 0x83, 0xC1, 0x08]);
        // RAX short form
        assert_eq!(encode(|a| a.addq_ri(Gpr::Rax, 0x1000)), [0x48, 0x05, 0x00, 0x10, 0x00, 0x00]);
        assert_eq!(encode(|a| a.cmpl_ri(Gpr::Rax, 0x1000)), [0x3D, 0x00, 0x10, 0x00, 0x00]);
        // imm32
        assert_eq!(
            encode(|a| a.subq_ri(Gpr::R8, 0x1000)),
            [0x49, 0x81, 0xE8, 0x00, 0x10, 0x00, 0x00]
        );
        // memory operand
        assert_eq!(
            encode(|a| a.andl_rm(Gpr::R11, Address::new(Gpr::R14, 0x38))),
            [0x45, 0x23, 0x5E, 0x38]
        );
    }

    #[test]
    #[should_panic(expected = "does not fit in 32 bits")]
    fn test_alu_rejects_wide_immediate() {
        encode(|a| a.addq_ri(Gpr::Rax, 1 << 40));
    }

    #[test]
    fn test_register_forms() {
        assert_eq!(encode(|a| a.xorl_rr(Gpr::Rax, Gpr::Rax)), [0x31, 0xC0]);
        assert_eq!(encode(|a| a.cmpq_rr(Gpr::R11, Gpr::Rax)), [0x49, 0x39, 0xC3]);
        assert_eq!(encode(|a| a.imulq_rr(Gpr::Rax, Gpr::R10)), [0x49, 0x0F, 0xAF, 0xC2]);
        assert_eq!(encode(|a| a.negq(Gpr::Rdx)), [0x48, 0xF7, 0xDA]);
        assert_eq!(encode(|a| a.cqo()), [0x48, 0x99]);
        assert_eq!(encode(|a| a.idivq(Gpr::Rcx)), [0x48, 0xF7, 0xF9]);
    }

    #[test]
    fn test_shifts() {
        assert_eq!(encode(|a| a.sarq_ri(Gpr::Rax, 1)), [0x48, 0xD1, 0xF8]);
        assert_eq!(encode(|a| a.shrl_ri(Gpr::R11, 2)), [0x41, 0xC1, 0xEB, 0x02]);
        assert_eq!(encode(|a| a.shlq_cl(Gpr::Rdx)), [0x48, 0xD3, 0xE2]);
    }

    #[test]
    fn test_testq_cascade() {
        assert_eq!(encode(|a| a.testq_ri(Gpr::Rax, 1)), [0xA8, 0x01]);
        assert_eq!(encode(|a| a.testq_ri(Gpr::Rcx, 1)), [0xF6, 0xC1, 0x01]);
        assert_eq!(encode(|a| a.testq_ri(Gpr::Rdi, 1)), [0x40, 0xF6, 0xC7, 0x01]);
        assert_eq!(encode(|a| a.testq_ri(Gpr::R9, 1)), [0x41, 0xF6, 0xC1, 0x01]);
        assert_eq!(encode(|a| a.testq_ri(Gpr::Rcx, 0x100)), [0xF7, 0xC1, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(
            encode(|a| a.testq_ri(Gpr::Rcx, -2)),
            [0x48, 0xF7, 0xC1, 0xFE, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_byte_memory_ops() {
        assert_eq!(
            encode(|a| a.testb_mr(Address::new(Gpr::Rax, -1), Gpr::R11)),
            [0x44, 0x84, 0x58, 0xFF]
        );
        assert_eq!(
            encode(|a| a.cmpb_mi(Address::new(Gpr::R11, 42), 0)),
            [0x41, 0x80, 0x7B, 0x2A, 0x00]
        );
    }

    #[test]
    fn test_lock_cmpxchg() {
        assert_eq!(
            encode(|a| a.lock_cmpxchgq(Address::new(Gpr::R14, 0x68), Gpr::R11)),
            [0xF0, 0x4D, 0x0F, 0xB1, 0x5E, 0x68]
        );
    }

    #[test]
    fn test_push_pop() {
        assert_eq!(encode(|a| a.pushq_r(Gpr::Rax)), [0x50]);
        assert_eq!(encode(|a| a.popq_r(Gpr::R15)), [0x41, 0x5F]);
        assert_eq!(encode(|a| a.pushq_i(-1)), [0x6A, 0xFF]);
        assert_eq!(encode(|a| a.pushq_i(0x1234)), [0x68, 0x34, 0x12, 0x00, 0x00]);
    }

    #[test]
    fn test_conditional_ops() {
        assert_eq!(encode(|a| a.setcc(Condition::Equal, Gpr::Rsi)), [0x40, 0x0F, 0x94, 0xC6]);
        assert_eq!(encode(|a| a.setcc(Condition::Less, Gpr::Rax)), [0x0F, 0x9C, 0xC0]);
        assert_eq!(
            encode(|a| a.cmovq(Condition::Greater, Gpr::Rax, Gpr::Rbx)),
            [0x48, 0x0F, 0x4F, 0xC3]
        );
    }

    #[test]
    fn test_sse() {
        assert_eq!(encode(|a| a.addsd(Xmm::Xmm0, Xmm::Xmm1)), [0xF2, 0x0F, 0x58, 0xC1]);
        assert_eq!(
            encode(|a| a.movups_mx(Address::new(Gpr::Rsp, 16), Xmm::Xmm9)),
            [0x44, 0x0F, 0x11, 0x4C, 0x24, 0x10]
        );
        assert_eq!(encode(|a| a.movq_xr(Xmm::Xmm0, Gpr::Rax)), [0x66, 0x48, 0x0F, 0x6E, 0xC0]);
        assert_eq!(encode(|a| a.movq_rx(Gpr::Rax, Xmm::Xmm1)), [0x66, 0x48, 0x0F, 0x7E, 0xC8]);
        assert_eq!(encode(|a| a.cvtsi2sdq(Xmm::Xmm2, Gpr::Rcx)), [0xF2, 0x48, 0x0F, 0x2A, 0xD1]);
    }
}
