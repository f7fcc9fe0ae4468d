//! x64 assembler.
//!
//! The `Assembler` owns the code buffer, the object pool builder and the
//! configuration of one compilation. Instruction methods are spread over
//! several `impl Assembler` blocks:
//!
//! - this module: emission plumbing, labels, branches and calls
//! - `instructions`: data movement, arithmetic and SSE
//! - `macros`: constants, pool loads, frames and heap field access
//! - `crate::gc`: safepoint transitions, write barriers, allocation

use tracing::trace;

use super::buffer::CodeBuffer;
use super::encoder::{encode_op, Condition, EncodedInst, Immediate, Rm};
use super::label::{JumpDistance, Label};
use super::object_pool::{ObjectPool, ObjectPoolBuilder};
use super::registers::{Address, Gpr};
use crate::config::AssemblerConfig;
use crate::runtime::RuntimeOffsets;

/// Width of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandSize {
    Byte,
    UnsignedByte,
    TwoBytes,
    UnsignedTwoBytes,
    FourBytes,
    UnsignedFourBytes,
    EightBytes,
}

impl OperandSize {
    pub const fn bytes(self) -> usize {
        match self {
            OperandSize::Byte | OperandSize::UnsignedByte => 1,
            OperandSize::TwoBytes | OperandSize::UnsignedTwoBytes => 2,
            OperandSize::FourBytes | OperandSize::UnsignedFourBytes => 4,
            OperandSize::EightBytes => 8,
        }
    }
}

/// A comment attached to a code offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeComment {
    pub offset: usize,
    pub text: String,
}

/// The result of assembling one function or stub.
#[derive(Debug, Clone)]
pub struct Code {
    pub instructions: Vec<u8>,
    pub object_pool: ObjectPool,
    pub comments: Vec<CodeComment>,
    pub instruction_count: usize,
}

impl Code {
    pub fn size(&self) -> usize {
        self.instructions.len()
    }
}

// Encoded sizes of the branch forms.
const SHORT_JUMP_SIZE: i64 = 2;
const LONG_JMP_SIZE: i64 = 5;
const LONG_JCC_SIZE: i64 = 6;

/// x64 code emitter for one compilation.
pub struct Assembler {
    buffer: CodeBuffer,
    pool: ObjectPoolBuilder,
    config: AssemblerConfig,
    offsets: RuntimeOffsets,
    comments: Vec<CodeComment>,
    instruction_count: usize,
    constant_pool_allowed: bool,
}

impl Assembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self::with_offsets(config, RuntimeOffsets::default())
    }

    pub fn with_offsets(config: AssemblerConfig, offsets: RuntimeOffsets) -> Self {
        Assembler {
            buffer: CodeBuffer::with_capacity(config.initial_buffer_capacity),
            pool: ObjectPoolBuilder::new(),
            constant_pool_allowed: config.constant_pool_allowed,
            config,
            offsets,
            comments: Vec::new(),
            instruction_count: 0,
        }
    }

    #[inline]
    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    #[inline]
    pub fn offsets(&self) -> &RuntimeOffsets {
        &self.offsets
    }

    #[inline]
    pub fn object_pool(&self) -> &ObjectPoolBuilder {
        &self.pool
    }

    #[inline]
    pub(crate) fn object_pool_mut(&mut self) -> &mut ObjectPoolBuilder {
        &mut self.pool
    }

    /// Bytes emitted so far.
    #[inline]
    pub fn code_size(&self) -> usize {
        self.buffer.size()
    }

    /// Instructions emitted so far.
    #[inline]
    pub fn instruction_count(&self) -> usize {
        self.instruction_count
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    #[inline]
    pub fn constant_pool_allowed(&self) -> bool {
        self.constant_pool_allowed
    }

    /// Enable or disable pool loads, e.g. while `PP` is not yet set up.
    pub fn set_constant_pool_allowed(&mut self, allowed: bool) {
        self.constant_pool_allowed = allowed;
    }

    /// Record a comment at the current offset when comments are enabled.
    pub fn comment(&mut self, text: impl Into<String>) {
        if self.config.code_comments {
            self.comments.push(CodeComment {
                offset: self.code_size(),
                text: text.into(),
            });
        }
    }

    /// Finish assembly.
    pub fn finalize(self) -> Code {
        trace!(
            size = self.buffer.size(),
            instructions = self.instruction_count,
            pool_entries = self.pool.len(),
            "code finalized"
        );
        Code {
            instructions: self.buffer.into_vec(),
            object_pool: self.pool.finish(),
            comments: self.comments,
            instruction_count: self.instruction_count,
        }
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Append one instruction and return its start offset.
    #[inline]
    pub(crate) fn emit(&mut self, inst: EncodedInst) -> usize {
        self.buffer.ensure_capacity();
        let start = self.buffer.size();
        self.buffer.append(inst.as_slice());
        self.instruction_count += 1;
        start
    }

    /// Encode and append a ModR/M instruction.
    #[inline]
    pub(crate) fn emit_op(
        &mut self,
        prefix: Option<u8>,
        w: bool,
        opcode: &[u8],
        reg: u8,
        rm: Rm,
    ) -> usize {
        self.emit(encode_op(prefix, w, opcode, reg, &rm, false))
    }

    /// Raw byte outside of any instruction.
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.ensure_capacity();
        self.buffer.append(&[value]);
    }

    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.ensure_capacity();
        self.buffer.append(&value.to_le_bytes());
    }

    pub fn emit_u64(&mut self, value: u64) {
        self.buffer.ensure_capacity();
        self.buffer.append(&value.to_le_bytes());
    }

    // =========================================================================
    // Labels
    // =========================================================================

    /// Bind `label` to the current offset and patch every pending use.
    ///
    /// # Panics
    ///
    /// Panics if the label is already bound or a near use cannot reach the
    /// current offset.
    pub fn bind(&mut self, label: &mut Label) {
        let bound = self.code_size();
        let (far_head, near_links) = label.bind_to(bound);

        let mut next = far_head;
        while let Some(slot) = next {
            let link = self.buffer.load_i32(slot);
            self.buffer.store_i32(slot, relative(bound, slot + 4));
            next = if link == 0 { None } else { Some(link as usize - 1) };
        }

        for slot in near_links {
            let offset = bound as i64 - (slot as i64 + 1);
            assert!(
                Immediate(offset).is_int8(),
                "near jump at {slot} cannot reach {bound} ({offset} bytes)"
            );
            self.buffer.store_u8(slot, offset as i8 as u8);
        }
    }

    /// Unconditional jump.
    pub fn jmp(&mut self, label: &mut Label, distance: JumpDistance) {
        if let Some(target) = label.bound_position() {
            let offset = target as i64 - self.code_size() as i64;
            if Immediate(offset - SHORT_JUMP_SIZE).is_int8() {
                self.emit(EncodedInst::from_bytes(&[0xEB, (offset - SHORT_JUMP_SIZE) as i8 as u8]));
            } else {
                let mut enc = EncodedInst::from_bytes(&[0xE9]);
                enc.push_i32(branch_disp(offset - LONG_JMP_SIZE));
                self.emit(enc);
            }
        } else if distance == JumpDistance::Near {
            let start = self.emit(EncodedInst::from_bytes(&[0xEB, 0x00]));
            label.link_near(start + 1);
        } else {
            let start = self.emit(EncodedInst::from_bytes(&[0xE9, 0, 0, 0, 0]));
            self.link_far(label, start + 1);
        }
    }

    /// Conditional jump.
    pub fn j(&mut self, cond: Condition, label: &mut Label, distance: JumpDistance) {
        if let Some(target) = label.bound_position() {
            let offset = target as i64 - self.code_size() as i64;
            if Immediate(offset - SHORT_JUMP_SIZE).is_int8() {
                self.emit(EncodedInst::from_bytes(&[
                    0x70 + cond.code(),
                    (offset - SHORT_JUMP_SIZE) as i8 as u8,
                ]));
            } else {
                let mut enc = EncodedInst::from_bytes(&[0x0F, 0x80 + cond.code()]);
                enc.push_i32(branch_disp(offset - LONG_JCC_SIZE));
                self.emit(enc);
            }
        } else if distance == JumpDistance::Near {
            let start = self.emit(EncodedInst::from_bytes(&[0x70 + cond.code(), 0x00]));
            label.link_near(start + 1);
        } else {
            let start = self.emit(EncodedInst::from_bytes(&[0x0F, 0x80 + cond.code(), 0, 0, 0, 0]));
            self.link_far(label, start + 2);
        }
    }

    /// `jmp reg`
    pub fn jmp_reg(&mut self, target: Gpr) {
        self.emit_op(None, false, &[0xFF], 4, Rm::gpr(target));
    }

    /// `jmp [mem]`
    pub fn jmp_mem(&mut self, target: Address) {
        self.emit_op(None, false, &[0xFF], 4, Rm::mem(target));
    }

    /// `call rel32` to a label.
    pub fn call_label(&mut self, label: &mut Label) {
        if let Some(target) = label.bound_position() {
            let offset = target as i64 - self.code_size() as i64;
            let mut enc = EncodedInst::from_bytes(&[0xE8]);
            enc.push_i32(branch_disp(offset - LONG_JMP_SIZE));
            self.emit(enc);
        } else {
            let start = self.emit(EncodedInst::from_bytes(&[0xE8, 0, 0, 0, 0]));
            self.link_far(label, start + 1);
        }
    }

    /// `call reg`
    pub fn call_reg(&mut self, target: Gpr) {
        self.emit_op(None, false, &[0xFF], 2, Rm::gpr(target));
    }

    /// `call [mem]`
    pub fn call_mem(&mut self, target: Address) {
        self.emit_op(None, false, &[0xFF], 2, Rm::mem(target));
    }

    pub fn ret(&mut self) {
        self.emit(EncodedInst::from_bytes(&[0xC3]));
    }

    fn link_far(&mut self, label: &mut Label, slot: usize) {
        let link = label.link_far(slot);
        self.buffer.store_i32(slot, link);
    }

    // =========================================================================
    // Padding and Traps
    // =========================================================================

    /// Emit a single nop instruction of `size` bytes (1..=8).
    pub fn nop(&mut self, size: usize) {
        let bytes: &[u8] = match size {
            1 => &[0x90],
            2 => &[0x66, 0x90],
            3 => &[0x0F, 0x1F, 0x00],
            4 => &[0x0F, 0x1F, 0x40, 0x00],
            5 => &[0x0F, 0x1F, 0x44, 0x00, 0x00],
            6 => &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
            7 => &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
            8 => &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
            _ => panic!("no {size}-byte nop"),
        };
        self.emit(EncodedInst::from_bytes(bytes));
    }

    /// Pad with nops until `code_size() + offset` is a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize, offset: usize) {
        assert!(alignment.is_power_of_two(), "alignment must be a power of two");
        let pos = self.code_size() + offset;
        let mut padding = (alignment - (pos & (alignment - 1))) & (alignment - 1);
        while padding > 0 {
            let step = padding.min(8);
            self.nop(step);
            padding -= step;
        }
    }

    pub fn int3(&mut self) {
        self.emit(EncodedInst::from_bytes(&[0xCC]));
    }

    pub fn ud2(&mut self) {
        self.emit(EncodedInst::from_bytes(&[0x0F, 0x0B]));
    }

    /// Trap into an attached debugger.
    pub fn breakpoint(&mut self) {
        self.int3();
    }
}

/// Distance from `from` to `to` as a rel32.
fn relative(to: usize, from: usize) -> i32 {
    branch_disp(to as i64 - from as i64)
}

fn branch_disp(offset: i64) -> i32 {
    i32::try_from(offset).unwrap_or_else(|_| panic!("branch offset {offset} exceeds rel32"))
}

impl std::fmt::Debug for Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembler")
            .field("code_size", &self.code_size())
            .field("instruction_count", &self.instruction_count)
            .field("pool_entries", &self.pool.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
