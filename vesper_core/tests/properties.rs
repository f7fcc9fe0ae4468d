//! Property tests for the core collections.

use std::collections::{BTreeMap, HashMap};

use proptest::prelude::*;
use vesper_core::{PriorityQueue, SimpleHashMap, hash_word};

// =============================================================================
// Hash map
// =============================================================================

#[derive(Debug, Clone)]
enum MapOp {
    Insert(u64),
    Remove(u64),
    Lookup(u64),
}

fn map_op() -> impl Strategy<Value = MapOp> {
    prop_oneof![
        (1u64..200).prop_map(MapOp::Insert),
        (1u64..200).prop_map(MapOp::Remove),
        (1u64..200).prop_map(MapOp::Lookup),
    ]
}

/// Hash functions from well spread to fully degenerate.
const HASHES: [fn(u64) -> u32; 4] = [
    |k| hash_word(k.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
    |k| k as u32,
    |k| (k % 3) as u32,
    |_| 7,
];

fn run_map_ops(ops: &[MapOp], hash: fn(u64) -> u32) {
    let mut map: SimpleHashMap<u64, u64> = SimpleHashMap::new(8);
    let mut model: HashMap<u64, u64> = HashMap::new();

    for op in ops {
        match *op {
            MapOp::Insert(k) => {
                let entry = map.lookup_or_insert(k, hash(k), || k * 2);
                assert_eq!(entry.value, k * 2);
                model.insert(k, k * 2);
            }
            MapOp::Remove(k) => {
                assert_eq!(map.remove(k, hash(k)), model.remove(&k));
            }
            MapOp::Lookup(k) => {
                assert_eq!(map.lookup(k, hash(k)).map(|e| e.value), model.get(&k).copied());
            }
        }
        assert_eq!(map.occupancy(), model.len());
    }

    for (&k, &v) in &model {
        assert_eq!(map.lookup(k, hash(k)).map(|e| e.value), Some(v));
    }
    assert_eq!(map.iter().count(), model.len());

    map.clear();
    assert_eq!(map.occupancy(), 0);
    for &k in model.keys() {
        assert!(map.lookup(k, hash(k)).is_none());
    }
}

proptest! {
    #[test]
    fn prop_hash_map_matches_model(ops in prop::collection::vec(map_op(), 0..400)) {
        for hash in HASHES {
            run_map_ops(&ops, hash);
        }
    }
}

// =============================================================================
// Priority queue
// =============================================================================

#[derive(Debug, Clone)]
enum QueueOp {
    Insert(i32, u64),
    RemoveMinimum,
    RemoveByValue(u64),
    Change(i32, u64),
}

fn queue_op() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        (any::<i32>(), 1u64..64).prop_map(|(p, v)| QueueOp::Insert(p, v)),
        Just(QueueOp::RemoveMinimum),
        (1u64..64).prop_map(QueueOp::RemoveByValue),
        (any::<i32>(), 1u64..64).prop_map(|(p, v)| QueueOp::Change(p, v)),
    ]
}

proptest! {
    #[test]
    fn prop_priority_queue_matches_model(ops in prop::collection::vec(queue_op(), 0..300)) {
        let mut queue: PriorityQueue<i32, u64> = PriorityQueue::new();
        let mut model: BTreeMap<u64, i32> = BTreeMap::new();

        for op in ops {
            match op {
                QueueOp::Insert(p, v) => {
                    if !model.contains_key(&v) {
                        queue.insert(p, v);
                        model.insert(v, p);
                    }
                }
                QueueOp::RemoveMinimum => {
                    if let Some(&min) = model.values().min() {
                        let entry = queue.remove_minimum();
                        prop_assert_eq!(entry.priority, min);
                        prop_assert_eq!(model.remove(&entry.value), Some(min));
                    } else {
                        prop_assert!(queue.is_empty());
                    }
                }
                QueueOp::RemoveByValue(v) => {
                    prop_assert_eq!(queue.remove_by_value(v), model.remove(&v).is_some());
                    prop_assert!(!queue.contains_value(v));
                }
                QueueOp::Change(p, v) => {
                    let inserted = queue.insert_or_change_priority(p, v);
                    prop_assert_eq!(inserted, model.insert(v, p).is_none());
                }
            }
            prop_assert_eq!(queue.len(), model.len());
            prop_assert!(queue.capacity() >= 16);
            prop_assert!(queue.capacity() >= queue.len());
        }

        let mut last = i32::MIN;
        while !queue.is_empty() {
            let entry = queue.remove_minimum();
            prop_assert!(entry.priority >= last);
            last = entry.priority;
        }
    }
}
