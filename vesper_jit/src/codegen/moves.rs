//! Moves between allocated locations.
//!
//! After register allocation every value lives in a register, an FPU
//! register, a stack slot or a constant. `emit_move` emits the instructions
//! for one move between two such locations. Memory-to-memory moves go
//! through `TMP` or `FPU_TMP`.

use crate::backend::x64::registers::{Address, Xmm, FPU_TMP, TMP};
use crate::backend::x64::Assembler;
use crate::locations::{ConstantRef, ConstantTable, ConstantValue, Location, SlotWidth};

/// Emit `dst = src`.
///
/// # Panics
///
/// Panics if either location is unallocated or invalid, if the widths do
/// not match, or if a constant is not in `constants`.
pub fn emit_move(asm: &mut Assembler, dst: Location, src: Location, constants: &ConstantTable) {
    if dst == src {
        return;
    }

    match (dst, src) {
        (Location::Pair(dst_pair), Location::Pair(src_pair)) => {
            assert!(
                dst_pair.first() != src_pair.second(),
                "pair move {src} -> {dst} overwrites its own source"
            );
            emit_move(asm, dst_pair.first(), src_pair.first(), constants);
            emit_move(asm, dst_pair.second(), src_pair.second(), constants);
        }

        // Constants.
        (dst, Location::Constant(constant)) => emit_constant_move(asm, dst, constant, constants),

        // General-purpose registers and word slots.
        (Location::Register(d), Location::Register(s)) => asm.movq_rr(d, s),
        (Location::Register(d), slot @ Location::StackSlot { width: SlotWidth::Word, .. }) => {
            asm.movq_rm(d, slot.to_stack_slot_address());
        }
        (slot @ Location::StackSlot { width: SlotWidth::Word, .. }, Location::Register(s)) => {
            asm.movq_mr(slot.to_stack_slot_address(), s);
        }
        (
            d @ Location::StackSlot { width: SlotWidth::Word, .. },
            s @ Location::StackSlot { width: SlotWidth::Word, .. },
        ) => {
            asm.movq_rm(TMP, s.to_stack_slot_address());
            asm.movq_mr(d.to_stack_slot_address(), TMP);
        }

        // FPU registers and wide slots.
        (Location::FpuRegister(d), Location::FpuRegister(s)) => asm.movaps_xx(d, s),
        (Location::FpuRegister(d), Location::StackSlot { width, .. }) => {
            load_fpu(asm, d, src.to_stack_slot_address(), width);
        }
        (Location::StackSlot { width, .. }, Location::FpuRegister(s)) => {
            store_fpu(asm, dst.to_stack_slot_address(), s, width);
        }
        (Location::StackSlot { width: dst_width, .. }, Location::StackSlot { width: src_width, .. })
            if dst_width == src_width =>
        {
            load_fpu(asm, FPU_TMP, src.to_stack_slot_address(), src_width);
            store_fpu(asm, dst.to_stack_slot_address(), FPU_TMP, dst_width);
        }

        (dst, src) => panic!("unsupported move {src} -> {dst}"),
    }
}

fn load_fpu(asm: &mut Assembler, dst: Xmm, src: Address, width: SlotWidth) {
    match width {
        SlotWidth::Double => asm.movsd_xm(dst, src),
        SlotWidth::Quad => asm.movups_xm(dst, src),
        SlotWidth::Word => panic!("word slot {src} cannot be loaded into {dst}"),
    }
}

fn store_fpu(asm: &mut Assembler, dst: Address, src: Xmm, width: SlotWidth) {
    match width {
        SlotWidth::Double => asm.movsd_mx(dst, src),
        SlotWidth::Quad => asm.movups_mx(dst, src),
        SlotWidth::Word => panic!("{src} cannot be stored into word slot {dst}"),
    }
}

fn emit_constant_move(
    asm: &mut Assembler,
    dst: Location,
    constant: ConstantRef,
    constants: &ConstantTable,
) {
    assert!(constant.pair_index == 0, "constant pair halves have no single value");
    let value = match constants.get(constant.id) {
        Some(c) => c.value,
        None => panic!("unknown constant {:?}", constant.id),
    };

    match (dst, value) {
        (Location::Register(d), ConstantValue::Object(object)) => asm.load_object(d, object),
        (Location::Register(d), ConstantValue::Double(v)) => {
            asm.load_immediate(d, v.to_bits() as i64)
        }
        (Location::FpuRegister(d), ConstantValue::Double(v)) => {
            asm.load_immediate(TMP, v.to_bits() as i64);
            asm.movq_xr(d, TMP);
        }
        (
            slot @ Location::StackSlot { width: SlotWidth::Word, .. },
            ConstantValue::Object(object),
        ) => {
            asm.store_object(slot.to_stack_slot_address(), object);
        }
        (slot @ Location::StackSlot { width: SlotWidth::Double, .. }, ConstantValue::Double(v)) => {
            asm.load_immediate(TMP, v.to_bits() as i64);
            asm.movq_mr(slot.to_stack_slot_address(), TMP);
        }
        (dst, value) => panic!("cannot move constant {value:?} to {dst}"),
    }
}
