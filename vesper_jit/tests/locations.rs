//! Property tests for the packed location encoding.

use proptest::prelude::*;
use vesper_jit::backend::x64::registers::{Address, Gpr, Xmm};
use vesper_jit::locations::{ConstantId, Location, MAX_STACK_INDEX, MIN_STACK_INDEX};

fn gpr() -> impl Strategy<Value = Gpr> {
    prop::sample::select(Gpr::ALL.to_vec())
}

fn xmm() -> impl Strategy<Value = Xmm> {
    prop::sample::select(Xmm::ALL.to_vec())
}

fn slot() -> impl Strategy<Value = Location> {
    (MIN_STACK_INDEX..=MAX_STACK_INDEX, gpr(), 0u8..3).prop_map(|(index, base, width)| match width {
        0 => Location::stack_slot(index, base),
        1 => Location::double_stack_slot(index, base),
        _ => Location::quad_stack_slot(index, base),
    })
}

fn single() -> impl Strategy<Value = Location> {
    prop_oneof![
        slot(),
        gpr().prop_map(Location::register),
        xmm().prop_map(Location::fpu_register),
        (0u32..1 << 20).prop_map(|id| Location::constant(ConstantId(id))),
        Just(Location::any()),
        Just(Location::requires_register()),
        Just(Location::same_as_first_input()),
    ]
}

// =============================================================================
// Round Trips
// =============================================================================

proptest! {
    #[test]
    fn stack_slots_survive_packing(loc in slot()) {
        let decoded = Location::from_raw(loc.raw());
        prop_assert_eq!(decoded, Some(loc));
        prop_assert_eq!(decoded.and_then(|l| l.stack_index()), loc.stack_index());
        prop_assert_eq!(decoded.and_then(|l| l.base_reg()), loc.base_reg());
    }

    #[test]
    fn singles_and_pairs_survive_packing(first in single(), second in single()) {
        prop_assert_eq!(Location::from_raw(first.raw()), Some(first));
        let pair = Location::pair(first, second);
        prop_assert_eq!(Location::from_raw(pair.raw()), Some(pair));
    }

    #[test]
    fn slot_addresses_scale_by_word(
        index in MIN_STACK_INDEX / 8..=MAX_STACK_INDEX / 8,
        base in gpr(),
    ) {
        let address = Location::stack_slot(index, base).to_stack_slot_address();
        prop_assert_eq!(address, Address::new(base, index * 8));
    }
}

#[test]
fn extreme_indices_round_trip() {
    for index in [MIN_STACK_INDEX, -1, 0, 1, MAX_STACK_INDEX] {
        let loc = Location::stack_slot(index, Gpr::Rbp);
        assert_eq!(Location::from_raw(loc.raw()), Some(loc));
    }
}
