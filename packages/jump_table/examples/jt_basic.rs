//! Basic usage of the `jump_table` crate:
//!
//! * Creating a table on top of an allocator.
//! * Setting, looking up and removing entries.
//! * Bulk removal with `mark_removed()` followed by a rehash.

use alloc_kit::SystemAllocator;
use jump_table::JumpTable;

fn main() {
    let system = SystemAllocator::new();
    let mut ages = JumpTable::new(&system);

    ages.set("Alice", 31_u32);
    ages.set("Bob", 27);
    ages.set("Charlie", 45);

    // Setting an existing key replaces its value and returns the previous one.
    let previous = ages.set("Bob", 28);
    println!("Bob was {previous:?}, now {:?}", ages.get(&"Bob"));

    // Keys and values are stored densely, so they can be viewed as slices.
    println!("{} entries: {:?} => {:?}", ages.len(), ages.keys(), ages.values());

    let removed = ages.remove(&"Alice");
    println!("Removed Alice ({removed:?}), table now has {} entries", ages.len());

    // Marking entries removed is cheaper than removing them. The entries themselves are dropped
    // by the next rehash.
    for i in 0..1000_u32 {
        ages.set(if i & 1 == 0 { "even" } else { "odd" }, i);
    }
    ages.mark_removed(&"even");
    println!(
        "After mark_removed: {} entries, {} gravestones",
        ages.len(),
        ages.gravestones()
    );

    ages.rehash(ages.linker_len(), ages.seed());
    println!(
        "After rehash: {} entries, {} gravestones",
        ages.len(),
        ages.gravestones()
    );
}
