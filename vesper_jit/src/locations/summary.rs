//! Per-instruction location summaries.
//!
//! A `LocationSummary` is created by the instruction when the IR is lowered,
//! rewritten in place by the register allocator and then read by the code
//! generator. It records input, temp and output locations, the stack slots
//! holding tagged values, and the registers live across a slow-path call.

use std::fmt;

use smallvec::SmallVec;

use super::constant::Constant;
use super::location::{Location, Policy};
use super::register_set::RegisterSet;
use super::representation::Representation;
use crate::backend::x64::registers::{Gpr, Xmm, FPU_REGISTER_SIZE};
use crate::runtime::WORD_SIZE;

/// Stack-map words per saved FPU register.
const FPU_REGISTER_SPILL_FACTOR: usize = (FPU_REGISTER_SIZE / WORD_SIZE) as usize;

/// Whether, and how, an instruction calls out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainsCall {
    NoCall,
    /// Always calls; every register not fixed by the summary is clobbered.
    Call,
    /// Always calls a stub that preserves all allocatable registers.
    CallCalleeSafe,
    /// Calls only on a slow path, saving live registers around the call.
    CallOnSlowPath,
    /// Like `CallOnSlowPath`, through a stub shared between call sites.
    CallOnSharedSlowPath,
    /// Calls a native leaf function under the native calling convention.
    NativeLeafCall,
}

pub struct LocationSummary {
    inputs: SmallVec<[Location; 4]>,
    temps: SmallVec<[Location; 2]>,
    output: Location,
    contains_call: ContainsCall,
    stack_bitmap: Vec<bool>,
    live_registers: RegisterSet,
}

impl LocationSummary {
    /// A summary with `input_count` inputs and `temp_count` temps, all
    /// invalid until set.
    pub fn new(input_count: usize, temp_count: usize, contains_call: ContainsCall) -> Self {
        LocationSummary {
            inputs: SmallVec::from_elem(Location::Invalid, input_count),
            temps: SmallVec::from_elem(Location::Invalid, temp_count),
            output: Location::Invalid,
            contains_call,
            stack_bitmap: Vec::new(),
            live_registers: RegisterSet::new(),
        }
    }

    /// The common shape: every input in a register, output `out`.
    pub fn make(input_count: usize, out: Location, contains_call: ContainsCall) -> Self {
        let mut summary = LocationSummary::new(input_count, 0, contains_call);
        for i in 0..input_count {
            summary.set_in(i, Location::requires_register());
        }
        if out.is_valid() {
            summary.set_out(out);
        }
        summary
    }

    // =========================================================================
    // Inputs, Temps and Output
    // =========================================================================

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn input(&self, index: usize) -> Location {
        self.inputs[index]
    }

    pub fn input_mut(&mut self, index: usize) -> &mut Location {
        &mut self.inputs[index]
    }

    /// # Panics
    ///
    /// For always-calling instructions an unallocated input (or pair half)
    /// must use the `Any` policy.
    pub fn set_in(&mut self, index: usize, loc: Location) {
        if self.always_calls() {
            match loc {
                Location::Unallocated(policy) => {
                    assert!(
                        policy == Policy::Any,
                        "input {index} of a call must not require {loc}"
                    );
                }
                Location::Pair(pair) => {
                    for half in [pair.first(), pair.second()] {
                        assert!(
                            half.policy().is_none_or(|policy| policy == Policy::Any),
                            "input {index} of a call must not require {half}"
                        );
                    }
                }
                _ => {}
            }
        }
        self.inputs[index] = loc;
    }

    pub fn temp_count(&self) -> usize {
        self.temps.len()
    }

    pub fn temp(&self, index: usize) -> Location {
        self.temps[index]
    }

    pub fn temp_mut(&mut self, index: usize) -> &mut Location {
        &mut self.temps[index]
    }

    /// # Panics
    ///
    /// Temps of always-calling instructions must be machine registers.
    pub fn set_temp(&mut self, index: usize, loc: Location) {
        assert!(
            !self.always_calls() || loc.is_machine_register(),
            "temp {index} of a call must be a fixed register, got {loc}"
        );
        self.temps[index] = loc;
    }

    pub fn out(&self) -> Location {
        self.output
    }

    pub fn out_mut(&mut self) -> &mut Location {
        &mut self.output
    }

    /// # Panics
    ///
    /// The output of an always-calling instruction must be a machine
    /// register, a pair or invalid.
    pub fn set_out(&mut self, loc: Location) {
        assert!(
            !self.always_calls() || loc.is_machine_register() || loc.is_invalid() || loc.is_pair(),
            "output of a call must be a fixed register, got {loc}"
        );
        self.output = loc;
    }

    // =========================================================================
    // Calls
    // =========================================================================

    pub fn contains_call(&self) -> ContainsCall {
        self.contains_call
    }

    pub fn always_calls(&self) -> bool {
        matches!(
            self.contains_call,
            ContainsCall::Call | ContainsCall::CallCalleeSafe | ContainsCall::NativeLeafCall
        )
    }

    pub fn callee_safe_call(&self) -> bool {
        self.contains_call == ContainsCall::CallCalleeSafe
    }

    pub fn can_call(&self) -> bool {
        self.contains_call != ContainsCall::NoCall
    }

    pub fn has_call_on_slow_path(&self) -> bool {
        self.can_call() && !self.always_calls()
    }

    pub fn call_on_shared_slow_path(&self) -> bool {
        self.contains_call == ContainsCall::CallOnSharedSlowPath
    }

    pub fn native_leaf_call(&self) -> bool {
        self.contains_call == ContainsCall::NativeLeafCall
    }

    // =========================================================================
    // Stack Maps
    // =========================================================================

    /// Mark spill slot `index` as holding a tagged value.
    pub fn set_stack_bit(&mut self, index: usize) {
        if self.stack_bitmap.len() <= index {
            self.stack_bitmap.resize(index + 1, false);
        }
        self.stack_bitmap[index] = true;
    }

    pub fn has_stack_bit(&self, index: usize) -> bool {
        self.stack_bitmap.get(index).copied().unwrap_or(false)
    }

    pub fn stack_bitmap(&self) -> &[bool] {
        &self.stack_bitmap
    }

    pub fn live_registers(&self) -> &RegisterSet {
        &self.live_registers
    }

    pub fn live_registers_mut(&mut self) -> &mut RegisterSet {
        &mut self.live_registers
    }

    /// The GC stack map at a slow-path call: the spill area (padded to
    /// `spill_area_size` slots), then the saved registers in the order
    /// `push_registers` lays them out from the highest address down. Saved
    /// FPU registers are never traced.
    pub fn safepoint_bitmap(&self, spill_area_size: usize) -> Vec<bool> {
        let mut bitmap = self.stack_bitmap.clone();
        if bitmap.len() < spill_area_size {
            bitmap.resize(spill_area_size, false);
        }
        if !self.has_call_on_slow_path() {
            return bitmap;
        }

        let live = &self.live_registers;
        for reg in Xmm::ALL.iter().rev() {
            if live.contains_fpu_register(*reg) {
                bitmap.extend(std::iter::repeat_n(false, FPU_REGISTER_SPILL_FACTOR));
            }
        }
        for reg in Gpr::ALL.iter().rev() {
            if live.contains_register(*reg) {
                bitmap.push(live.is_tagged(*reg));
            }
        }
        bitmap
    }
}

impl fmt::Display for LocationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.inputs.is_empty() {
            f.write_str(" (")?;
            for (i, loc) in self.inputs.iter().enumerate() {
                if i != 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{loc}")?;
            }
            f.write_str(")")?;
        }
        if !self.temps.is_empty() {
            f.write_str(" [")?;
            for (i, loc) in self.temps.iter().enumerate() {
                if i != 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{loc}")?;
            }
            f.write_str("]")?;
        }
        if self.output.is_valid() {
            write!(f, " => {}", self.output)?;
        }
        if self.always_calls() {
            f.write_str(" C")?;
        }
        Ok(())
    }
}

impl fmt::Debug for LocationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocationSummary({self} {:?})", self.contains_call)
    }
}

// =============================================================================
// Instruction Interface
// =============================================================================

/// What the location model needs from an IR instruction.
pub trait Instruction {
    fn input_count(&self) -> usize;

    /// Representation of the instruction's result.
    fn representation(&self) -> Representation {
        Representation::Tagged
    }

    fn required_input_representation(&self, _index: usize) -> Representation {
        Representation::Tagged
    }

    /// The constant input `index` is bound to, if any.
    fn input_constant(&self, _index: usize) -> Option<&Constant> {
        None
    }

    fn make_location_summary(&self, optimizing: bool) -> LocationSummary;

    /// Build the summary and check it against the instruction's shape.
    fn location_summary(&self, optimizing: bool) -> LocationSummary {
        let summary = self.make_location_summary(optimizing);
        assert_eq!(
            summary.input_count(),
            self.input_count(),
            "location summary input count does not match the instruction"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::x64::registers::FP;
    use crate::locations::constant::{ConstantId, ConstantValue};
    use crate::locations::location_register_or_constant;
    use crate::runtime::Object;

    #[test]
    fn test_make() {
        let summary =
            LocationSummary::make(2, Location::same_as_first_input(), ContainsCall::NoCall);
        assert_eq!(summary.input_count(), 2);
        assert_eq!(summary.temp_count(), 0);
        assert_eq!(summary.input(1), Location::requires_register());
        assert_eq!(summary.to_string(), " (R, R) => 0");
    }

    #[test]
    fn test_call_classification() {
        let call = LocationSummary::new(0, 0, ContainsCall::Call);
        assert!(call.always_calls());
        assert!(!call.has_call_on_slow_path());

        let leaf = LocationSummary::new(0, 0, ContainsCall::NativeLeafCall);
        assert!(leaf.always_calls());
        assert!(leaf.native_leaf_call());

        let slow = LocationSummary::new(0, 0, ContainsCall::CallOnSharedSlowPath);
        assert!(!slow.always_calls());
        assert!(slow.has_call_on_slow_path());
        assert!(slow.call_on_shared_slow_path());

        assert!(!LocationSummary::new(0, 0, ContainsCall::NoCall).can_call());
        assert!(LocationSummary::new(0, 0, ContainsCall::CallCalleeSafe).callee_safe_call());
    }

    #[test]
    fn test_call_inputs_must_be_any() {
        let mut summary = LocationSummary::new(2, 1, ContainsCall::Call);
        summary.set_in(0, Location::any());
        summary.set_in(1, Location::register(Gpr::Rdx));
        summary.set_temp(0, Location::register(Gpr::Rbx));
        summary.set_out(Location::register(Gpr::Rax));
        assert_eq!(summary.to_string(), " (A, rdx) [rbx] => rax C");
    }

    #[test]
    #[should_panic(expected = "must not require")]
    fn test_call_rejects_register_policy() {
        let mut summary = LocationSummary::new(1, 0, ContainsCall::Call);
        summary.set_in(0, Location::requires_register());
    }

    #[test]
    #[should_panic(expected = "must not require")]
    fn test_call_rejects_pair_half_policy() {
        let mut summary = LocationSummary::new(1, 0, ContainsCall::CallCalleeSafe);
        summary.set_in(0, Location::pair(Location::any(), Location::writable_register()));
    }

    #[test]
    #[should_panic(expected = "temp 0 of a call")]
    fn test_call_rejects_unallocated_temp() {
        let mut summary = LocationSummary::new(0, 1, ContainsCall::Call);
        summary.set_temp(0, Location::requires_register());
    }

    #[test]
    #[should_panic(expected = "output of a call")]
    fn test_call_rejects_stack_output() {
        let mut summary = LocationSummary::new(0, 0, ContainsCall::Call);
        summary.set_out(Location::stack_slot(0, FP));
    }

    #[test]
    fn test_safepoint_bitmap_layout() {
        let mut summary = LocationSummary::new(0, 0, ContainsCall::CallOnSlowPath);
        summary.set_stack_bit(1);
        let live = summary.live_registers_mut();
        live.add(Location::register(Gpr::Rax), Representation::Tagged);
        live.add(Location::register(Gpr::R8), Representation::UnboxedInt64);
        live.add(Location::fpu_register(Xmm::Xmm1), Representation::UnboxedDouble);

        let bitmap = summary.safepoint_bitmap(3);
        // Spill area, one XMM as two untagged words, then r8 (untagged)
        // and rax (tagged).
        assert_eq!(bitmap, vec![false, true, false, false, false, false, true]);
    }

    #[test]
    fn test_safepoint_bitmap_without_slow_path() {
        let mut summary = LocationSummary::new(0, 0, ContainsCall::NoCall);
        summary.live_registers_mut().add(Location::register(Gpr::Rax), Representation::Tagged);
        summary.set_stack_bit(0);
        assert_eq!(summary.safepoint_bitmap(2), vec![true, false]);
        assert!(summary.has_stack_bit(0));
        assert!(!summary.has_stack_bit(5));
    }

    struct AddSmi {
        right: Option<Constant>,
    }

    impl Instruction for AddSmi {
        fn input_count(&self) -> usize {
            2
        }

        fn input_constant(&self, index: usize) -> Option<&Constant> {
            if index == 1 { self.right.as_ref() } else { None }
        }

        fn make_location_summary(&self, _optimizing: bool) -> LocationSummary {
            let mut summary = LocationSummary::new(2, 0, ContainsCall::NoCall);
            summary.set_in(0, Location::requires_register());
            summary.set_in(1, location_register_or_constant(self.input_constant(1)));
            summary.set_out(Location::same_as_first_input());
            summary
        }
    }

    #[test]
    fn test_instruction_summary() {
        let constant = Constant {
            id: ConstantId(3),
            value: ConstantValue::Object(Object::Smi(7)),
        };
        let instr = AddSmi { right: Some(constant) };
        let summary = instr.location_summary(true);
        assert_eq!(summary.input(1), Location::constant(ConstantId(3)));
        assert_eq!(summary.to_string(), " (R, C) => 0");

        let plain = AddSmi { right: None };
        assert_eq!(plain.location_summary(true).input(1), Location::requires_register());
        assert_eq!(plain.representation(), Representation::Tagged);
    }
}
