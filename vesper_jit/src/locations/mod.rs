//! Register Location Model
//!
//! Connects machine-independent IR to concrete machine resources:
//!
//! - `Location`: where a value lives, or the policy an unallocated value
//!   must satisfy
//! - `RegisterSet`: register sets with untagged tracking for GC stack maps
//! - `LocationSummary`: the per-instruction record the register allocator
//!   fills in and the code generator reads
//!
//! The helpers below pick a constant location when an input is bound to a
//! constant the assembler can use directly, and a register policy
//! otherwise.

pub mod constant;
pub mod location;
pub mod register_set;
pub mod representation;
pub mod summary;

pub use constant::{Constant, ConstantId, ConstantTable, ConstantValue};
pub use location::{
    stack_slot_for_representation, ConstantRef, Location, PairLocation, Policy, SlotWidth,
    MAX_STACK_INDEX, MIN_STACK_INDEX,
};
pub use register_set::RegisterSet;
pub use representation::Representation;
pub use summary::{ContainsCall, Instruction, LocationSummary};

use crate::backend::x64::registers::Gpr;

// =============================================================================
// Constant-or-Register Helpers
// =============================================================================

/// A usable constant, or any register.
pub fn location_register_or_constant(constant: Option<&Constant>) -> Location {
    match constant {
        Some(c) if c.is_safe() => Location::constant(c.id),
        _ => Location::requires_register(),
    }
}

/// A small-integer constant in `min..=max` that fits an immediate, or any
/// register.
pub fn location_register_or_smi_constant(
    constant: Option<&Constant>,
    min: i64,
    max: i64,
) -> Location {
    match constant {
        Some(c) if c.is_safe_smi() && c.smi_value().is_some_and(|v| (min..=max).contains(&v)) => {
            Location::constant(c.id)
        }
        _ => Location::requires_register(),
    }
}

/// A usable constant, or the fixed register `reg`.
pub fn location_fixed_register_or_constant(constant: Option<&Constant>, reg: Gpr) -> Location {
    match constant {
        Some(c) if c.is_safe() => Location::constant(c.id),
        _ => Location::register(reg),
    }
}

/// A usable constant, or anywhere.
pub fn location_any_or_constant(constant: Option<&Constant>) -> Location {
    match constant {
        Some(c) if c.is_safe() => Location::constant(c.id),
        _ => Location::any(),
    }
}

/// A small-integer constant that fits an immediate, or a register the
/// instruction may overwrite.
pub fn location_writable_register_or_smi_constant(constant: Option<&Constant>) -> Location {
    match constant {
        Some(c) if c.is_safe_smi() => Location::constant(c.id),
        _ => Location::writable_register(),
    }
}
