//! Randomized checks that handles keep resolving to their own items across unrelated inserts and
//! removals.
#![allow(
    missing_docs,
    reason = "No need for API documentation in test code"
)]

use alloc_kit::{Allocator, ArenaAllocator, SystemAllocator};
use handle_arrays::{BucketArray, SlotArray, WeakBucketArray};
use proptest::prelude::*;

#[derive(Clone, Copy, Debug)]
enum Op {
    Insert(u32),

    /// Removes the live item at this position of the model, modulo its length.
    Remove(usize),

    /// Overwrites the live item at this position of the model, modulo its length.
    Update(usize, u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<u32>().prop_map(Op::Insert),
        3 => any::<usize>().prop_map(Op::Remove),
        1 => (any::<usize>(), any::<u32>()).prop_map(|(at, v)| Op::Update(at, v)),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(op_strategy(), 1..600)
}

proptest! {
    #[test]
    fn bucket_array_handles_are_stable(ops in ops_strategy()) {
        let system = SystemAllocator::new();
        let mut array = BucketArray::new(&system);
        let mut model = Vec::new();

        for op in ops {
            match op {
                Op::Insert(value) => model.push((array.insert(value), value)),
                Op::Remove(at) if !model.is_empty() => {
                    let (handle, value) = model.swap_remove(at % model.len());
                    prop_assert_eq!(array.remove(handle), value);
                    prop_assert!(!array.contains(handle));
                }
                Op::Update(at, new_value) if !model.is_empty() => {
                    let index = at % model.len();
                    let entry = &mut model[index];
                    *array.get_mut(entry.0) = new_value;
                    entry.1 = new_value;
                }
                Op::Remove(_) | Op::Update(..) => {}
            }

            prop_assert_eq!(array.len(), model.len());
        }

        array.integrity_check();
        for (handle, value) in &model {
            prop_assert_eq!(array.get(*handle), value);
        }
        prop_assert_eq!(array.iter().count(), model.len());
    }

    #[test]
    fn weak_bucket_array_rejects_stale_handles(ops in ops_strategy()) {
        let system = SystemAllocator::new();
        let mut array = WeakBucketArray::new(&system);
        let mut model = Vec::new();
        let mut stale = Vec::new();

        for op in ops {
            match op {
                Op::Insert(value) => model.push((array.insert(value), value)),
                Op::Remove(at) if !model.is_empty() => {
                    let (handle, value) = model.swap_remove(at % model.len());
                    prop_assert_eq!(array.remove(handle), Some(value));
                    stale.push(handle);
                }
                Op::Update(at, new_value) if !model.is_empty() => {
                    let index = at % model.len();
                    let entry = &mut model[index];
                    *array.get_mut(entry.0).unwrap() = new_value;
                    entry.1 = new_value;
                }
                Op::Remove(_) | Op::Update(..) => {}
            }

            for handle in &stale {
                prop_assert!(array.get(*handle).is_none());
            }
        }

        array.integrity_check();
        for (handle, value) in &model {
            prop_assert_eq!(array.get(*handle), Some(value));
        }
        for handle in stale {
            prop_assert_eq!(array.remove(handle), None);
        }
        prop_assert_eq!(array.len(), model.len());
    }

    #[test]
    fn slot_array_stays_dense(ops in ops_strategy()) {
        let system = SystemAllocator::new();
        let mut array = SlotArray::new(&system);
        let mut model = Vec::new();

        for op in ops {
            match op {
                Op::Insert(value) => model.push((array.insert(value), value)),
                Op::Remove(at) if !model.is_empty() => {
                    let (handle, value) = model.swap_remove(at % model.len());
                    prop_assert_eq!(array.remove(handle), value);
                }
                Op::Update(at, new_value) if !model.is_empty() => {
                    let index = at % model.len();
                    let entry = &mut model[index];
                    *array.get_mut(entry.0) = new_value;
                    entry.1 = new_value;
                }
                Op::Remove(_) | Op::Update(..) => {}
            }

            prop_assert_eq!(array.as_slice().len(), model.len());
        }

        array.integrity_check();

        let mut dense = array.as_slice().to_vec();
        let mut expected: Vec<u32> = model.iter().map(|(_, value)| *value).collect();
        dense.sort_unstable();
        expected.sort_unstable();
        prop_assert_eq!(dense, expected);

        for (handle, value) in &model {
            prop_assert_eq!(array.get(*handle), value);
        }
        for (dense_index, item) in array.as_slice().iter().enumerate() {
            prop_assert_eq!(array.get(array.handle_of(dense_index)), item);
        }
    }
}

#[test]
fn bucket_array_insert_insert_remove() {
    let system = SystemAllocator::new();
    let mut array = BucketArray::new(&system);

    let h0 = array.insert(5);
    let h1 = array.insert(6);

    assert_eq!(array.remove(h0), 5);
    assert_eq!(*array.get(h1), 6);
    assert_eq!(array.len(), 1);
}

#[test]
fn weak_handle_is_stale_after_slot_reuse() {
    let system = SystemAllocator::new();
    let mut array = WeakBucketArray::new(&system);

    let old = array.insert(1);
    array.remove(old);
    let new = array.insert(2);

    assert_eq!(old.index(), new.index());
    assert_eq!(*array.get_or(old, &-1), -1);
    assert_eq!(*array.get_or(new, &-1), 2);
}

#[test]
fn containers_return_all_memory_to_arena() {
    let system = SystemAllocator::new();
    let mut arena = ArenaAllocator::new(&system);

    for round in 0..3_u64 {
        {
            let mut buckets = BucketArray::new(&arena);
            let mut weak = WeakBucketArray::new(&arena);
            let mut slots = SlotArray::new(&arena);

            for i in 0..1000 {
                _ = buckets.insert(i + round);
                _ = weak.insert(i + round);
                _ = slots.insert(i + round);
            }

            assert_eq!(buckets.len(), 1000);
            assert_eq!(weak.len(), 1000);
            assert_eq!(slots.len(), 1000);
        }

        assert_eq!(arena.stats().bytes_allocated, Some(0));
        arena.reset();
    }
}
