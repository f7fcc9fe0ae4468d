//! End-to-end assembler tests through the public API.

use vesper_jit::backend::x64::registers::{Address, FP};
use vesper_jit::backend::x64::Condition;
use vesper_jit::gc::CanBeSmi;
use vesper_jit::runtime::{Object, ObjectRef, RuntimeOffsets};
use vesper_jit::{Assembler, AssemblerConfig, Gpr, JumpDistance, Label};

fn assembler() -> Assembler {
    Assembler::new(AssemblerConfig::default())
}

fn rel8(code: &[u8], slot: usize) -> usize {
    (slot as i64 + 1 + code[slot] as i8 as i64) as usize
}

fn rel32(code: &[u8], slot: usize) -> usize {
    let disp = i32::from_le_bytes([code[slot], code[slot + 1], code[slot + 2], code[slot + 3]]);
    (slot as i64 + 4 + disp as i64) as usize
}

// =============================================================================
// Labels
// =============================================================================

#[test]
fn near_and_far_uses_resolve_to_the_same_target() {
    let mut asm = assembler();
    let mut target = Label::new();

    asm.j(Condition::Equal, &mut target, JumpDistance::Near); // 0..2
    asm.jmp(&mut target, JumpDistance::Far); // 2..7
    asm.j(Condition::Less, &mut target, JumpDistance::Far); // 7..13
    asm.nop(3);
    asm.bind(&mut target);
    asm.ret();

    let code = asm.bytes();
    let bound = 16;
    assert_eq!(code[0], 0x74);
    assert_eq!(rel8(code, 1), bound);
    assert_eq!(code[2], 0xE9);
    assert_eq!(rel32(code, 3), bound);
    assert_eq!(&code[7..9], &[0x0F, 0x8C]);
    assert_eq!(rel32(code, 9), bound);
    assert_eq!(code[bound], 0xC3);
    assert!(target.is_bound());
    assert!(!target.is_linked());
}

#[test]
fn backward_jumps_pick_the_short_form() {
    let mut asm = assembler();
    let mut top = Label::new();
    asm.bind(&mut top);
    asm.nop(4);
    asm.jmp(&mut top, JumpDistance::Far);
    assert_eq!(&asm.bytes()[4..], &[0xEB, 0xFA]);

    let mut far_top = Label::new();
    asm.bind(&mut far_top);
    for _ in 0..20 {
        asm.nop(8);
    }
    asm.j(Condition::NotEqual, &mut far_top, JumpDistance::Near);
    let code = asm.bytes();
    let start = code.len() - 6;
    assert_eq!(&code[start..start + 2], &[0x0F, 0x85]);
    assert_eq!(rel32(code, start + 2), 6);
}

#[test]
#[should_panic(expected = "already bound")]
fn binding_twice_panics() {
    let mut asm = assembler();
    let mut label = Label::new();
    asm.bind(&mut label);
    asm.bind(&mut label);
}

#[test]
#[should_panic(expected = "cannot reach")]
fn near_jump_out_of_range_panics() {
    let mut asm = assembler();
    let mut label = Label::new();
    asm.jmp(&mut label, JumpDistance::Near);
    for _ in 0..20 {
        asm.nop(8);
    }
    asm.bind(&mut label);
}

// =============================================================================
// Immediates and Pool
// =============================================================================

#[test]
fn movq_immediate_cascade_sizes() {
    let cases: [(i64, usize); 4] =
        [(0x7fff_ffff, 5), (0xffff_ffff, 5), (-1, 7), (0x1_0000_0000, 10)];
    for (imm, len) in cases {
        let mut asm = assembler();
        asm.movq_ri(Gpr::Rax, imm);
        assert_eq!(asm.code_size(), len, "movq rax, {imm:#x}");
    }
}

#[test]
fn pool_dedups_non_patchable_objects() {
    let mut asm = assembler();
    let object = Object::Heap(ObjectRef(0x1_2345_6781));
    asm.load_object(Gpr::Rax, object);
    asm.load_object(Gpr::Rcx, object);
    asm.load_unique_object(Gpr::Rdx, object);
    asm.load_object(Gpr::Rbx, Object::Smi(42));
    asm.load_object(Gpr::Rsi, Object::Null);

    let code = asm.finalize();
    assert_eq!(code.object_pool.len(), 2);
    assert_eq!(code.instruction_count, 5);
}

// =============================================================================
// Runtime Sequences
// =============================================================================

#[test]
fn native_call_round_trip_keeps_fast_and_slow_layouts_in_step() {
    let emit = |use_slow_path: bool| {
        let mut asm = Assembler::new(AssemblerConfig {
            use_slow_path,
            ..Default::default()
        });
        asm.enter_frame(0);
        asm.transition_generated_to_native(Gpr::Rax, FP, Gpr::Rcx, true);
        asm.call_reg(Gpr::Rbx);
        asm.transition_native_to_generated(true, false, true);
        asm.leave_frame();
        asm.ret();
        asm.finalize()
    };
    let fast = emit(false);
    let slow = emit(true);
    assert_eq!(fast.instruction_count, slow.instruction_count);
}

#[test]
fn store_and_allocate_sequence() {
    let mut asm = assembler();
    let mut slow = Label::new();
    let mut done = Label::new();

    asm.try_allocate_object(77, 32, &mut slow, JumpDistance::Far, Gpr::Rdx, Gpr::Rcx);
    asm.store_into_object(Gpr::Rdx, Address::field(Gpr::Rdx, 8), Gpr::Rax, CanBeSmi::ValueCanBeSmi);
    asm.jmp(&mut done, JumpDistance::Near);
    asm.bind(&mut slow);
    asm.int3();
    asm.bind(&mut done);
    asm.ret();

    let code = asm.finalize();
    assert_eq!(code.instructions.last(), Some(&0xC3));
    assert!(code.object_pool.is_empty());
}

#[test]
fn custom_offsets_flow_into_sequences() {
    let mut offsets = RuntimeOffsets::default();
    offsets.thread.safepoint_state = 0x400;
    let mut asm = Assembler::with_offsets(AssemblerConfig::default(), offsets);
    asm.enter_full_safepoint();
    // lock cmpxchg [r14 + 0x400], r11 uses a 32-bit displacement.
    assert!(asm.bytes().windows(7).any(|w| w == [0xF0, 0x4D, 0x0F, 0xB1, 0x9E, 0x00, 0x04]));
}
