//! Basic usage of the `handle_arrays` crate:
//!
//! * Storing items in a bucket array and addressing them by handle.
//! * Detecting stale handles with a weak bucket array.
//! * Keeping items densely packed with a slot array.

use alloc_kit::SystemAllocator;
use handle_arrays::{BucketArray, SlotArray, WeakBucketArray};

fn main() {
    let system = SystemAllocator::new();

    // Items in a bucket array never move, and their handles stay valid until they are removed.
    let mut names = BucketArray::new(&system);
    let alice = names.insert("Alice".to_string());
    let bob = names.insert("Bob".to_string());

    let removed = names.remove(bob);
    println!("Removed {removed}, {} is still there", names.get(alice));

    // A weak bucket array detects handles whose item was removed, even if the slot is reused.
    let mut sessions = WeakBucketArray::new(&system);
    let first = sessions.insert(1001_u64);
    sessions.remove(first);
    let second = sessions.insert(1002_u64);

    println!(
        "Old handle resolves to {:?}, new handle resolves to {:?}",
        sessions.get(first),
        sessions.get(second)
    );

    // A slot array keeps its items in one contiguous slice while handles stay stable.
    let mut scores = SlotArray::new(&system);
    let handles: Vec<_> = (10..=50_u32)
        .step_by(10)
        .map(|score| scores.insert(score))
        .collect();

    if let Some(middle) = handles.get(2) {
        scores.remove(*middle);
    }

    println!("Scores packed densely: {:?}", scores.as_slice());

    if let Some(last) = handles.last() {
        println!("The last score is still reachable: {}", scores.get(*last));
    }
}
