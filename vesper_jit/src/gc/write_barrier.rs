//! Generational and incremental write barriers.
//!
//! A store of `value` into `object` needs the barrier only when the header
//! bits of the two objects overlap with the thread's current barrier mask:
//!
//! ```text
//!   (object.tags >> BARRIER_OVERLAP_SHIFT) & thread.write_barrier_mask & value.tags
//! ```
//!
//! The check runs inline; the barrier itself lives in per-register wrapper
//! stubs reachable from the thread. A wrapper takes the object in the
//! register it is named after and the value in `WRITE_BARRIER_VALUE_REG`,
//! so the inline sequence shuffles registers only when the value is not
//! already there.

use crate::backend::x64::encoder::Condition;
use crate::backend::x64::label::{JumpDistance, Label};
use crate::backend::x64::registers::{
    Address, Gpr, THR, TMP, WRITE_BARRIER_OBJECT_REG, WRITE_BARRIER_SLOT_REG,
    WRITE_BARRIER_VALUE_REG,
};
use crate::backend::x64::Assembler;
use crate::runtime::tags::{BARRIER_OVERLAP_SHIFT, TAGS_OFFSET};

/// Whether the stored value may be a small integer, which never needs a
/// barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanBeSmi {
    ValueCanBeSmi,
    ValueIsNotSmi,
}

impl Assembler {
    // =========================================================================
    // Object Stores
    // =========================================================================

    /// `[dest] = value` followed by the write barrier for `object`.
    pub fn store_into_object(
        &mut self,
        object: Gpr,
        dest: Address,
        value: Gpr,
        can_be_smi: CanBeSmi,
    ) {
        self.movq_mr(dest, value);
        self.store_barrier(object, value, can_be_smi, TMP);
    }

    /// `[dest] = value` for stores the compiler proved need no barrier.
    pub fn store_into_object_no_barrier(&mut self, dest: Address, value: Gpr) {
        self.movq_mr(dest, value);
    }

    /// `[slot] = value` for an array element, followed by the array barrier.
    pub fn store_into_array(
        &mut self,
        object: Gpr,
        slot: Gpr,
        value: Gpr,
        can_be_smi: CanBeSmi,
        scratch: Gpr,
    ) {
        self.movq_mr(Address::new(slot, 0), value);
        self.array_store_barrier(object, slot, value, can_be_smi, scratch);
    }

    // =========================================================================
    // Barriers
    // =========================================================================

    /// Emit the barrier check for a store of `value` into `object` and call
    /// the wrapper stub when it fires. `scratch` is clobbered.
    ///
    /// # Panics
    ///
    /// Panics if `object`, `value` and `scratch` are not pairwise distinct.
    pub fn store_barrier(&mut self, object: Gpr, value: Gpr, can_be_smi: CanBeSmi, scratch: Gpr) {
        assert!(object != value, "store barrier object and value share {object}");
        assert!(object != scratch, "store barrier object and scratch share {object}");
        assert!(value != scratch, "store barrier value and scratch share {value}");

        let mut done = Label::new();
        self.emit_barrier_test(object, value, can_be_smi, scratch, &mut done);

        let mut object_for_call = object;
        if value != WRITE_BARRIER_VALUE_REG {
            self.pushq_r(WRITE_BARRIER_VALUE_REG);
            if object == WRITE_BARRIER_VALUE_REG {
                object_for_call = if value == Gpr::Rbx { Gpr::Rcx } else { Gpr::Rbx };
                self.pushq_r(object_for_call);
                self.movq_rr(object_for_call, object);
            }
            self.movq_rr(WRITE_BARRIER_VALUE_REG, value);
        }

        let wrapper = self.offsets().thread.write_barrier_wrapper(object_for_call);
        self.call_mem(Address::new(THR, wrapper));

        if value != WRITE_BARRIER_VALUE_REG {
            if object == WRITE_BARRIER_VALUE_REG {
                self.popq_r(object_for_call);
            }
            self.popq_r(WRITE_BARRIER_VALUE_REG);
        }
        self.bind(&mut done);
    }

    /// Barrier for a store through `slot` into the array `object`.
    ///
    /// # Panics
    ///
    /// The array barrier stub has a fixed calling convention; panics unless
    /// `object`, `slot` and `value` are already in `WRITE_BARRIER_OBJECT_REG`,
    /// `WRITE_BARRIER_SLOT_REG` and `WRITE_BARRIER_VALUE_REG`.
    pub fn array_store_barrier(
        &mut self,
        object: Gpr,
        slot: Gpr,
        value: Gpr,
        can_be_smi: CanBeSmi,
        scratch: Gpr,
    ) {
        let mut done = Label::new();
        self.emit_barrier_test(object, value, can_be_smi, scratch, &mut done);

        assert!(
            object == WRITE_BARRIER_OBJECT_REG
                && slot == WRITE_BARRIER_SLOT_REG
                && value == WRITE_BARRIER_VALUE_REG,
            "array store barrier needs the write barrier registers, got {object}/{slot}/{value}"
        );
        let entry = self.offsets().thread.array_write_barrier_entry_point;
        self.call_mem(Address::new(THR, entry));
        self.bind(&mut done);
    }

    /// Jump to `done` unless the header bits require the barrier.
    fn emit_barrier_test(
        &mut self,
        object: Gpr,
        value: Gpr,
        can_be_smi: CanBeSmi,
        scratch: Gpr,
        done: &mut Label,
    ) {
        match can_be_smi {
            CanBeSmi::ValueCanBeSmi => self.branch_if_smi(value, done, JumpDistance::Near),
            CanBeSmi::ValueIsNotSmi => {
                if self.config().verify_smi_values {
                    let mut passed = Label::new();
                    self.branch_if_not_smi(value, &mut passed, JumpDistance::Near);
                    self.breakpoint();
                    self.bind(&mut passed);
                }
            }
        }

        let mask = self.offsets().thread.write_barrier_mask;
        self.movzxb_rm(scratch, Address::field(object, TAGS_OFFSET));
        self.shrl_ri(scratch, BARRIER_OVERLAP_SHIFT as u8);
        self.andl_rm(scratch, Address::new(THR, mask));
        self.testb_mr(Address::field(value, TAGS_OFFSET), scratch);
        self.j(Condition::ZERO, done, JumpDistance::Near);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssemblerConfig;

    fn assembler() -> Assembler {
        Assembler::new(AssemblerConfig::default())
    }

    #[test]
    fn test_barrier_in_convention_registers() {
        let mut a = assembler();
        a.store_barrier(Gpr::Rdx, Gpr::Rax, CanBeSmi::ValueCanBeSmi, TMP);
        let expected: &[u8] = &[
            0xA8, 0x01, // test al, 1
            0x74, 0x1A, // jz done
            0x44, 0x0F, 0xB6, 0x5A, 0xFF, // movzx r11d, byte [rdx - 1]
            0x41, 0xC1, 0xEB, 0x02, // shr r11d, 2
            0x45, 0x23, 0x5E, 0x38, // and r11d, [r14 + 0x38]
            0x44, 0x84, 0x58, 0xFF, // test [rax - 1], r11b
            0x74, 0x07, // jz done
            0x41, 0xFF, 0x96, 0x10, 0x01, 0x00, 0x00, // call [r14 + 0x110]
        ];
        assert_eq!(a.bytes(), expected);
    }

    #[test]
    fn test_barrier_not_smi_skips_smi_check() {
        let mut a = assembler();
        a.store_barrier(Gpr::Rdx, Gpr::Rax, CanBeSmi::ValueIsNotSmi, TMP);
        assert_eq!(a.instruction_count(), 6);
        // The header byte is zero-extended so no stale scratch bits survive
        // the shift into the mask test.
        assert_eq!(&a.bytes()[..5], &[0x44, 0x0F, 0xB6, 0x5A, 0xFF]);
    }

    #[test]
    fn test_barrier_verifies_not_smi() {
        let mut a = Assembler::new(AssemblerConfig {
            verify_smi_values: true,
            ..Default::default()
        });
        a.store_barrier(Gpr::Rdx, Gpr::Rax, CanBeSmi::ValueIsNotSmi, TMP);
        // test al, 1; jnz passed; int3
        assert_eq!(&a.bytes()[..5], &[0xA8, 0x01, 0x75, 0x01, 0xCC]);
    }

    #[test]
    fn test_barrier_shuffles_value_register() {
        let mut a = assembler();
        a.store_barrier(Gpr::Rsi, Gpr::Rcx, CanBeSmi::ValueIsNotSmi, TMP);
        // 5 test instructions + push rax, mov rax rcx, call, pop rax.
        assert_eq!(a.instruction_count(), 9);
        let code = a.bytes();
        let tail: &[u8] = &[0x48, 0x89, 0xC8, 0x41, 0xFF, 0x96, 0x30, 0x01, 0x00, 0x00, 0x58];
        assert!(code.ends_with(tail));
        assert_eq!(code[code.len() - 12], 0x50);
    }

    #[test]
    fn test_barrier_object_in_value_register() {
        let mut a = assembler();
        a.store_barrier(Gpr::Rax, Gpr::Rbx, CanBeSmi::ValueIsNotSmi, TMP);
        let code = a.bytes();
        // push rax; push rcx; mov rcx, rax; mov rax, rbx; call [wrapper(rcx)]; pop rcx; pop rax
        let tail: &[u8] = &[
            0x50, 0x51, 0x48, 0x89, 0xC1, 0x48, 0x89, 0xD8, 0x41, 0xFF, 0x96, 0x08, 0x01, 0x00,
            0x00, 0x59, 0x58,
        ];
        assert!(code.ends_with(tail));
    }

    #[test]
    #[should_panic(expected = "share")]
    fn test_barrier_rejects_aliasing() {
        let mut a = assembler();
        a.store_barrier(Gpr::Rdx, Gpr::Rdx, CanBeSmi::ValueCanBeSmi, TMP);
    }

    #[test]
    fn test_store_into_object() {
        let mut a = assembler();
        a.store_into_object(
            Gpr::Rdx,
            Address::field(Gpr::Rdx, 16),
            Gpr::Rax,
            CanBeSmi::ValueCanBeSmi,
        );
        // mov [rdx + 15], rax
        assert_eq!(&a.bytes()[..4], &[0x48, 0x89, 0x42, 0x0F]);
        assert_eq!(a.instruction_count(), 9);

        let mut plain = assembler();
        plain.store_into_object_no_barrier(Address::field(Gpr::Rdx, 16), Gpr::Rax);
        assert_eq!(plain.bytes(), &[0x48, 0x89, 0x42, 0x0F]);
    }

    #[test]
    fn test_store_into_array() {
        let mut a = assembler();
        a.store_into_array(Gpr::Rdx, Gpr::R13, Gpr::Rax, CanBeSmi::ValueCanBeSmi, TMP);
        let code = a.bytes();
        // mov [r13 + 0], rax
        assert_eq!(&code[..4], &[0x49, 0x89, 0x45, 0x00]);
        // call [r14 + 0xe0]
        assert!(code.ends_with(&[0x41, 0xFF, 0x96, 0xE0, 0x00, 0x00, 0x00]));
    }

    #[test]
    #[should_panic(expected = "array store barrier expects")]
    fn test_array_barrier_requires_fixed_registers() {
        let mut a = assembler();
        a.array_store_barrier(Gpr::Rcx, Gpr::R13, Gpr::Rax, CanBeSmi::ValueCanBeSmi, TMP);
    }
}
