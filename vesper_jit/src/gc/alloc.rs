//! Inline new-space allocation.
//!
//! Objects are bump-allocated from the thread's new-space window
//! `[top, end)`. The fast path never calls out: on exhaustion, when the
//! size is too large for new space, or when the class has allocation
//! tracing enabled, it branches to a caller-provided label that falls back
//! to the allocation stub.
//!
//! ```text
//!   instance = thread.top
//!   end      = instance + size          ─── overflow / >= thread.end ──▶ failure
//!   thread.top = end
//!   instance += HEAP_OBJECT_TAG
//!   instance.tags = tag_word_for_new_object(cid, size)
//! ```

use crate::backend::x64::encoder::Condition;
use crate::backend::x64::label::{JumpDistance, Label};
use crate::backend::x64::registers::{Address, Gpr, THR};
use crate::backend::x64::Assembler;
use crate::runtime::tags::{tag_word_for_new_object, TAGS_OFFSET};
use crate::runtime::{is_allocatable_in_new_space, HEAP_OBJECT_TAG, OBJECT_ALIGNMENT};

impl Assembler {
    /// Branch to `trace` when allocation tracing is enabled for `cid`.
    /// Clobbers `temp`.
    pub fn maybe_trace_allocation(
        &mut self,
        cid: u32,
        trace: &mut Label,
        temp: Gpr,
        distance: JumpDistance,
    ) {
        assert!(cid > 0, "class id must be positive");
        let isolate_group = self.offsets().thread.isolate_group;
        let class_table = self.offsets().class_table.clone();

        self.movq_rm(temp, Address::new(THR, isolate_group));
        self.movq_rm(temp, Address::new(temp, class_table.isolate_group_class_table));
        self.movq_rm(temp, Address::new(temp, class_table.allocation_tracing_state_table));
        self.cmpb_mi(Address::new(temp, class_table.tracing_state_slot(cid)), 0);
        self.j(Condition::NOT_ZERO, trace, distance);
    }

    /// Allocate a fixed-size instance of class `cid` into `instance`.
    ///
    /// # Panics
    ///
    /// Panics unless `size` is a non-zero multiple of the object alignment.
    pub fn try_allocate_object(
        &mut self,
        cid: u32,
        size: usize,
        failure: &mut Label,
        distance: JumpDistance,
        instance: Gpr,
        temp: Gpr,
    ) {
        assert!(size != 0, "cannot allocate an empty object");
        assert!(size % OBJECT_ALIGNMENT == 0, "object size {size} is not aligned");

        if !self.config().inline_alloc || !is_allocatable_in_new_space(size) {
            self.jmp(failure, JumpDistance::Far);
            return;
        }

        if self.config().allocation_tracing {
            self.maybe_trace_allocation(cid, failure, temp, distance);
        }
        let thread = self.offsets().thread.clone();
        self.movq_rm(instance, Address::new(THR, thread.top));
        self.addq_ri(instance, size as i64);
        // instance: end address of the new object.
        self.cmpq_rm(instance, Address::new(THR, thread.end));
        self.j(Condition::AboveEqual, failure, distance);
        self.movq_mr(Address::new(THR, thread.top), instance);
        self.add_immediate(instance, HEAP_OBJECT_TAG as i64 - size as i64);
        self.move_immediate(
            Address::field(instance, TAGS_OFFSET),
            tag_word_for_new_object(cid, size) as i64,
        );
    }

    /// Allocate a variable-length object of `size` bytes. On success
    /// `instance` holds the tagged object and `end_address` its untagged
    /// end.
    pub fn try_allocate_array(
        &mut self,
        cid: u32,
        size: usize,
        failure: &mut Label,
        distance: JumpDistance,
        instance: Gpr,
        end_address: Gpr,
        temp: Gpr,
    ) {
        if !self.config().inline_alloc {
            self.jmp(failure, JumpDistance::Far);
            return;
        }

        if self.config().allocation_tracing {
            self.maybe_trace_allocation(cid, failure, temp, distance);
        }
        let thread = self.offsets().thread.clone();
        self.movq_rm(instance, Address::new(THR, thread.top));
        self.movq_rr(end_address, instance);
        self.addq_ri(end_address, size as i64);
        self.j(Condition::CARRY, failure, JumpDistance::Far);
        self.cmpq_rm(end_address, Address::new(THR, thread.end));
        self.j(Condition::AboveEqual, failure, distance);
        self.movq_mr(Address::new(THR, thread.top), end_address);
        self.addq_ri(instance, HEAP_OBJECT_TAG as i64);
        self.move_immediate(
            Address::field(instance, TAGS_OFFSET),
            tag_word_for_new_object(cid, size) as i64,
        );
    }
}
