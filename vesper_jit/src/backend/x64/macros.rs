//! Multi-instruction sequences: constants, object pool access, calls into the
//! runtime, frames, small-integer tagging and heap field access.

use super::assembler::{Assembler, OperandSize};
use super::encoder::{Condition, Immediate};
use super::label::{JumpDistance, Label};
use super::object_pool::Patchability;
use super::registers::{
    Address, Gpr, ARGS_DESC_REG, CODE_REG, FPU_REGISTER_SIZE, PP, SPREG, THR, TMP,
};
use crate::locations::RegisterSet;
use crate::runtime::{
    tags, CodeEntryKind, Object, ObjectRef, RuntimeEntry, HEAP_OBJECT_TAG, SMI_TAG_MASK,
    SMI_TAG_SHIFT,
};

/// Required stack alignment at calls into native code.
pub const ACTIVATION_FRAME_ALIGNMENT: i64 = 16;

impl Assembler {
    // =========================================================================
    // Immediates
    // =========================================================================

    /// Materialize `value` in `dst`: `xorl` for zero, a `movq` for values
    /// that fit in 32 bits (or when the pool is unavailable), otherwise a
    /// pool load.
    pub fn load_immediate(&mut self, dst: Gpr, value: i64) {
        if value == 0 {
            self.xorl_rr(dst, dst);
        } else if Immediate(value).is_int32() || !self.constant_pool_allowed() {
            self.movq_ri(dst, value);
        } else {
            let index = self.object_pool_mut().find_immediate(value as u64);
            self.load_word_from_pool_index(dst, index);
        }
    }

    /// Store a 64-bit immediate, going through `TMP` when it does not fit in
    /// a sign-extended 32-bit field.
    pub fn move_immediate(&mut self, dst: Address, value: i64) {
        if Immediate(value).is_int32() {
            self.movq_mi(dst, value);
        } else {
            self.load_immediate(TMP, value);
            self.movq_mr(dst, TMP);
        }
    }

    /// `dst += value`, using `inc`/`dec` for one and `TMP` for wide values.
    pub fn add_immediate(&mut self, dst: Gpr, value: i64) {
        if value == 0 {
            return;
        }
        if value > 0 || value == i64::MIN {
            if value == 1 {
                self.incq(dst);
            } else if Immediate(value).is_int32() {
                self.addq_ri(dst, value);
            } else {
                assert!(dst != TMP, "add_immediate cannot use TMP as destination");
                self.load_immediate(TMP, value);
                self.addq_rr(dst, TMP);
            }
        } else {
            self.sub_immediate(dst, -value);
        }
    }

    /// `dst -= value`.
    pub fn sub_immediate(&mut self, dst: Gpr, value: i64) {
        if value == 0 {
            return;
        }
        if value == 1 {
            self.decq(dst);
        } else if Immediate(value).is_int32() {
            self.subq_ri(dst, value);
        } else {
            assert!(dst != TMP, "sub_immediate cannot use TMP as destination");
            self.load_immediate(TMP, value);
            self.subq_rr(dst, TMP);
        }
    }

    // =========================================================================
    // Object Pool
    // =========================================================================

    /// Load pool element `index` into `dst`.
    pub fn load_word_from_pool_index(&mut self, dst: Gpr, index: usize) {
        assert!(self.constant_pool_allowed(), "object pool is not available");
        assert!(dst != PP, "cannot load into the pool pointer");
        let offset = self.offsets().pool.element_offset(index);
        self.movq_rm(dst, Address::field(PP, offset));
    }

    /// Load the pool pointer from the code object in `CODE_REG`.
    pub fn load_pool_pointer(&mut self, pp: Gpr) {
        let offset = self.offsets().code.object_pool;
        self.movq_rm(pp, Address::field(CODE_REG, offset));
        self.set_constant_pool_allowed(pp == PP);
    }

    fn load_object_helper(&mut self, dst: Gpr, object: Object, patchable: Patchability) {
        if let Some(raw) = object.smi_raw() {
            self.load_immediate(dst, raw);
        } else if let Some(offset) = self.offsets().thread.cached_object(&object) {
            self.movq_rm(dst, Address::new(THR, offset));
        } else if let Object::Heap(heap) = object {
            if self.constant_pool_allowed() {
                let index = self.object_pool_mut().find_object(heap, patchable);
                self.load_word_from_pool_index(dst, index);
            } else {
                self.movq_ri(dst, heap.raw() as i64);
            }
        }
    }

    /// Load `object`; small integers become immediates and thread-cached
    /// objects come from the thread, never from the pool.
    pub fn load_object(&mut self, dst: Gpr, object: Object) {
        self.load_object_helper(dst, object, Patchability::NotPatchable);
    }

    /// Load `object` through its own patchable pool slot.
    pub fn load_unique_object(&mut self, dst: Gpr, object: Object) {
        self.load_object_helper(dst, object, Patchability::Patchable);
    }

    pub fn store_object(&mut self, dst: Address, object: Object) {
        match object.smi_raw() {
            Some(raw) if Immediate(raw).is_int32() => self.movq_mi(dst, raw),
            _ => {
                self.load_object(TMP, object);
                self.movq_mr(dst, TMP);
            }
        }
    }

    pub fn push_object(&mut self, object: Object) {
        match object.smi_raw() {
            Some(raw) if Immediate(raw).is_int32() => self.pushq_i(raw),
            _ => {
                self.load_object(TMP, object);
                self.pushq_r(TMP);
            }
        }
    }

    pub fn compare_object(&mut self, reg: Gpr, object: Object) {
        match object.smi_raw() {
            Some(raw) if Immediate(raw).is_int32() => self.cmpq_ri(reg, raw),
            _ => {
                assert!(reg != TMP, "compare_object cannot compare TMP");
                self.load_object(TMP, object);
                self.cmpq_rr(reg, TMP);
            }
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Call `code` through a patchable pool slot so the target can be
    /// relinked later.
    pub fn call_patchable(&mut self, code: ObjectRef, entry_kind: CodeEntryKind) {
        let index = self.object_pool_mut().find_object(code, Patchability::Patchable);
        self.call_through_pool(index, entry_kind);
    }

    /// Call `code` through a shared pool slot.
    pub fn call_code(&mut self, code: ObjectRef, entry_kind: CodeEntryKind) {
        let index = self.object_pool_mut().find_object(code, Patchability::NotPatchable);
        self.call_through_pool(index, entry_kind);
    }

    fn call_through_pool(&mut self, index: usize, entry_kind: CodeEntryKind) {
        self.load_word_from_pool_index(CODE_REG, index);
        let entry = self.offsets().code.entry_point_offset(entry_kind);
        self.call_mem(Address::field(CODE_REG, entry));
    }

    /// Call the shared call-to-runtime stub through the thread.
    pub fn call_to_runtime(&mut self) {
        let offset = self.offsets().thread.call_to_runtime_entry_point;
        self.call_mem(Address::new(THR, offset));
    }

    /// Call `entry` with `argument_count` arguments already pushed.
    pub fn call_runtime_entry(&mut self, entry: RuntimeEntry, argument_count: u32) {
        assert_eq!(
            entry.argument_count, argument_count,
            "runtime entry {} called with the wrong argument count",
            entry.name
        );
        self.comment(format!("call runtime {}", entry.name));
        let offset = self.offsets().thread.runtime_entry(entry.index);
        self.movq_rm(Gpr::Rbx, Address::new(THR, offset));
        self.load_immediate(ARGS_DESC_REG, argument_count as i64);
        self.call_to_runtime();
    }

    // =========================================================================
    // Frames
    // =========================================================================

    pub fn enter_frame(&mut self, frame_size: i64) {
        self.pushq_r(Gpr::Rbp);
        self.movq_rr(Gpr::Rbp, SPREG);
        if frame_size != 0 {
            self.sub_immediate(SPREG, frame_size);
        }
    }

    pub fn leave_frame(&mut self) {
        self.movq_rr(SPREG, Gpr::Rbp);
        self.popq_r(Gpr::Rbp);
    }

    /// Reserve `frame_space` bytes and align RSP for a native call.
    pub fn reserve_aligned_frame_space(&mut self, frame_space: i64) {
        self.add_immediate(SPREG, -frame_space);
        self.andq_ri(SPREG, !(ACTIVATION_FRAME_ALIGNMENT - 1));
    }

    /// Save the registers of `set`: XMM registers into a block at the
    /// bottom, lowest register at the lowest address, then GPRs pushed
    /// highest register first.
    pub fn push_registers(&mut self, set: &RegisterSet) {
        let xmm_count = set.fpu_register_count() as i64;
        if xmm_count > 0 {
            self.add_immediate(SPREG, -xmm_count * FPU_REGISTER_SIZE as i64);
            let mut offset = 0;
            for xmm in set.fpu_registers().iter() {
                self.movups_mx(Address::new(SPREG, offset), xmm);
                offset += FPU_REGISTER_SIZE;
            }
        }
        for reg in set.cpu_registers().iter().rev() {
            self.pushq_r(reg);
        }
    }

    /// Restore what `push_registers` saved.
    pub fn pop_registers(&mut self, set: &RegisterSet) {
        for reg in set.cpu_registers().iter() {
            self.popq_r(reg);
        }
        let xmm_count = set.fpu_register_count() as i64;
        if xmm_count > 0 {
            let mut offset = 0;
            for xmm in set.fpu_registers().iter() {
                self.movups_xm(xmm, Address::new(SPREG, offset));
                offset += FPU_REGISTER_SIZE;
            }
            self.add_immediate(SPREG, xmm_count * FPU_REGISTER_SIZE as i64);
        }
    }

    // =========================================================================
    // Small Integers
    // =========================================================================

    pub fn smi_tag(&mut self, reg: Gpr) {
        self.addq_rr(reg, reg);
    }

    pub fn smi_untag(&mut self, reg: Gpr) {
        self.sarq_ri(reg, SMI_TAG_SHIFT as u8);
    }

    pub fn branch_if_smi(&mut self, reg: Gpr, label: &mut Label, distance: JumpDistance) {
        self.testq_ri(reg, SMI_TAG_MASK);
        self.j(Condition::ZERO, label, distance);
    }

    pub fn branch_if_not_smi(&mut self, reg: Gpr, label: &mut Label, distance: JumpDistance) {
        self.testq_ri(reg, SMI_TAG_MASK);
        self.j(Condition::NOT_ZERO, label, distance);
    }

    /// Extract the class id from the header of the heap object in `object`.
    pub fn load_class_id(&mut self, result: Gpr, object: Gpr) {
        self.movl_rm(result, Address::field(object, tags::TAGS_OFFSET));
        self.shrl_ri(result, tags::CLASS_ID_TAG_POS as u8);
    }

    // =========================================================================
    // Field Access
    // =========================================================================

    pub fn load_from_offset(&mut self, dst: Gpr, src: Address, size: OperandSize) {
        match size {
            OperandSize::Byte => self.movsxb_rm(dst, src),
            OperandSize::UnsignedByte => self.movzxb_rm(dst, src),
            OperandSize::TwoBytes => self.movsxw_rm(dst, src),
            OperandSize::UnsignedTwoBytes => self.movzxw_rm(dst, src),
            OperandSize::FourBytes => self.movsxd_rm(dst, src),
            OperandSize::UnsignedFourBytes => self.movl_rm(dst, src),
            OperandSize::EightBytes => self.movq_rm(dst, src),
        }
    }

    pub fn store_to_offset(&mut self, src: Gpr, dst: Address, size: OperandSize) {
        match size {
            OperandSize::Byte | OperandSize::UnsignedByte => self.movb_mr(dst, src),
            OperandSize::TwoBytes | OperandSize::UnsignedTwoBytes => self.movw_mr(dst, src),
            OperandSize::FourBytes | OperandSize::UnsignedFourBytes => self.movl_mr(dst, src),
            OperandSize::EightBytes => self.movq_mr(dst, src),
        }
    }

    /// Load a field of the tagged heap object in `object`.
    pub fn load_field_from_offset(
        &mut self,
        dst: Gpr,
        object: Gpr,
        offset: i32,
        size: OperandSize,
    ) {
        self.load_from_offset(dst, Address::field(object, offset), size);
    }

    /// Store into a field of the tagged heap object in `object`.
    pub fn store_field_to_offset(&mut self, src: Gpr, object: Gpr, offset: i32, size: OperandSize) {
        self.store_to_offset(src, Address::field(object, offset), size);
    }
}

/// Untagged displacement of `offset` inside a heap object.
#[inline]
pub const fn field_offset(offset: i32) -> i32 {
    offset - HEAP_OBJECT_TAG
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::x64::object_pool::PoolEntry;
    use crate::backend::x64::registers::Xmm;
    use crate::config::AssemblerConfig;
    use crate::locations::{Location, Representation};

    fn asm() -> Assembler {
        Assembler::new(AssemblerConfig::default())
    }

    #[test]
    fn test_load_immediate_choices() {
        let mut a = asm();
        a.load_immediate(Gpr::Rax, 0);
        assert_eq!(a.bytes(), &[0x31, 0xC0]);

        let mut a = asm();
        a.load_immediate(Gpr::Rax, -5);
        assert_eq!(a.bytes(), &[0x48, 0xC7, 0xC0, 0xFB, 0xFF, 0xFF, 0xFF]);

        // Wide values go to the pool: movq rax, [pp + 0x10 - 1].
        let mut a = asm();
        a.load_immediate(Gpr::Rax, 0x1234_5678_9abc);
        assert_eq!(a.bytes(), &[0x49, 0x8B, 0x47, 0x0F]);
        assert_eq!(
            a.object_pool().entry(0).map(|e| e.0),
            Some(PoolEntry::Immediate(0x1234_5678_9abc))
        );
    }

    #[test]
    fn test_load_immediate_without_pool() {
        let mut a = Assembler::new(AssemblerConfig {
            constant_pool_allowed: false,
            ..Default::default()
        });
        a.load_immediate(Gpr::Rax, 0x1234_5678_9abc);
        assert_eq!(a.code_size(), 10);
        assert!(a.object_pool().is_empty());
    }

    #[test]
    fn test_load_object_sources() {
        let mut a = asm();
        a.load_object(Gpr::Rax, Object::Smi(21));
        a.load_object(Gpr::Rcx, Object::Null);
        a.load_object(Gpr::Rdx, Object::Heap(ObjectRef(0x7001)));
        a.load_object(Gpr::Rdx, Object::Heap(ObjectRef(0x7001)));
        let code = a.bytes();
        assert_eq!(&code[..5], &[0xB8, 42, 0, 0, 0]);
        // movq rcx, [thr + 0x90]
        assert_eq!(&code[5..12], &[0x49, 0x8B, 0x8E, 0x90, 0x00, 0x00, 0x00]);
        assert_eq!(a.object_pool().len(), 1);
    }

    #[test]
    fn test_unique_objects_get_own_slots() {
        let mut a = asm();
        let obj = Object::Heap(ObjectRef(0x9001));
        a.load_unique_object(Gpr::Rax, obj);
        a.load_unique_object(Gpr::Rax, obj);
        a.load_object(Gpr::Rax, obj);
        assert_eq!(a.object_pool().len(), 3);
    }

    #[test]
    fn test_smi_objects_as_immediates() {
        let mut a = asm();
        a.store_object(Address::new(Gpr::Rax, 8), Object::Smi(1));
        a.push_object(Object::Smi(-1));
        a.compare_object(Gpr::Rcx, Object::Smi(3));
        assert!(a.object_pool().is_empty());
        assert_eq!(a.instruction_count(), 3);
    }

    #[test]
    fn test_call_patchable() {
        let mut a = asm();
        a.call_patchable(ObjectRef(0x5001), CodeEntryKind::Normal);
        // movq r12, [pp + 15]; call [r12 + 7]
        assert_eq!(
            a.bytes(),
            &[0x4D, 0x8B, 0x67, 0x0F, 0x41, 0xFF, 0x54, 0x24, 0x07]
        );
        assert_eq!(a.object_pool().entry(0).map(|e| e.1), Some(Patchability::Patchable));
    }

    #[test]
    fn test_call_runtime_entry() {
        let mut a = asm();
        let entry = RuntimeEntry {
            name: "AllocateObject",
            index: 3,
            argument_count: 2,
        };
        a.call_runtime_entry(entry, 2);
        assert_eq!(a.instruction_count(), 3);
    }

    #[test]
    fn test_add_immediate_forms() {
        let mut a = asm();
        a.add_immediate(Gpr::Rax, 0);
        assert_eq!(a.code_size(), 0);
        a.add_immediate(Gpr::Rax, 1);
        assert_eq!(a.bytes(), &[0x48, 0xFF, 0xC0]);

        let mut a = asm();
        a.add_immediate(Gpr::Rcx, -15);
        assert_eq!(a.bytes(), &[0x48, 0x83, 0xE9, 0x0F]);
    }

    #[test]
    fn test_frame() {
        let mut a = asm();
        a.enter_frame(16);
        a.leave_frame();
        assert_eq!(
            a.bytes(),
            &[0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xEC, 0x10, 0x48, 0x89, 0xEC, 0x5D]
        );
    }

    #[test]
    fn test_push_pop_registers_order() {
        let mut set = RegisterSet::new();
        set.add(Location::register(Gpr::Rax), Representation::Tagged);
        set.add(Location::register(Gpr::R12), Representation::Tagged);
        set.add(Location::fpu_register(Xmm::Xmm1), Representation::UnboxedDouble);

        let mut a = asm();
        a.push_registers(&set);
        let code = a.bytes().to_vec();
        // sub rsp, 16; movups [rsp], xmm1; push r12; push rax
        assert_eq!(&code[..4], &[0x48, 0x83, 0xEC, 0x10]);
        assert_eq!(&code[4..8], &[0x0F, 0x11, 0x0C, 0x24]);
        assert_eq!(&code[8..], &[0x41, 0x54, 0x50]);

        let mut b = asm();
        b.pop_registers(&set);
        let code = b.bytes();
        assert_eq!(&code[..3], &[0x58, 0x41, 0x5C]);
        assert_eq!(&code[3..7], &[0x0F, 0x10, 0x0C, 0x24]);
        assert_eq!(&code[7..], &[0x48, 0x83, 0xC4, 0x10]);
    }

    #[test]
    fn test_smi_helpers() {
        let mut a = asm();
        a.smi_tag(Gpr::Rax);
        a.smi_untag(Gpr::Rax);
        a.load_class_id(Gpr::Rcx, Gpr::Rdx);
        assert_eq!(
            a.bytes(),
            &[0x48, 0x01, 0xC0, 0x48, 0xD1, 0xF8, 0x8B, 0x4A, 0xFF, 0xC1, 0xE9, 0x0C]
        );

        let mut a = asm();
        let mut is_smi = Label::new();
        a.branch_if_smi(Gpr::Rax, &mut is_smi, JumpDistance::Near);
        a.bind(&mut is_smi);
        assert_eq!(a.bytes(), &[0xA8, 0x01, 0x74, 0x00]);
    }

    #[test]
    fn test_field_access_sizes() {
        let mut a = asm();
        a.load_field_from_offset(Gpr::Rax, Gpr::Rcx, 8, OperandSize::UnsignedByte);
        a.store_field_to_offset(Gpr::Rax, Gpr::Rcx, 8, OperandSize::FourBytes);
        assert_eq!(a.bytes(), &[0x0F, 0xB6, 0x41, 0x07, 0x89, 0x41, 0x07]);
        assert_eq!(field_offset(8), 7);
    }
}
