//! Operations for tables that hold several entries under the same key.
//!
//! [`add_another()`] always appends a new entry, even if the key is already present. The entries
//! for one key are then visited with [`find_first()`] followed by repeated [`find_next()`] calls,
//! each of which continues probing after the previous match rather than restarting from the key's
//! home slot.
//!
//! Single-value operations such as [`JumpTable::get()`] and [`JumpTable::remove()`] act on
//! whichever entry for the key probing reaches first.
//!
//! # Example
//!
//! ```
//! use alloc_kit::SystemAllocator;
//! use jump_table::{JumpTable, multi};
//!
//! let system = SystemAllocator::new();
//! let mut table = JumpTable::new(&system);
//!
//! multi::add_another(&mut table, "fruit", "apple");
//! multi::add_another(&mut table, "fruit", "pear");
//! multi::add_another(&mut table, "vegetable", "leek");
//!
//! let mut fruits: Vec<_> = multi::get_all(&table, &"fruit").copied().collect();
//! fruits.sort_unstable();
//! assert_eq!(fruits, ["apple", "pear"]);
//! ```

use std::iter;

use alloc_kit::Result;

use crate::{Found, JumpTable, KeyHasher};

/// Appends an entry for `key` without looking for an existing one.
///
/// # Panics
///
/// Calls the table's out-of-memory handler if the table needs to grow and the allocator cannot
/// provide the memory.
pub fn add_another<K, V, H>(table: &mut JumpTable<'_, K, V, H>, key: K, value: V) -> Found
where
    H: KeyHasher<K>,
{
    match table.try_insert_new(key, value) {
        Ok(found) => found,
        Err(error) => table.out_of_memory(error),
    }
}

/// Appends an entry for `key` without looking for an existing one.
///
/// # Errors
///
/// Returns [`Error::OutOfMemory`][alloc_kit::Error::OutOfMemory] if the table needs to grow and
/// the allocator cannot provide the memory.
pub fn try_add_another<K, V, H>(
    table: &mut JumpTable<'_, K, V, H>,
    key: K,
    value: V,
) -> Result<Found>
where
    H: KeyHasher<K>,
{
    table.try_insert_new(key, value)
}

/// Locates the first entry for `key` in probe order.
#[must_use]
pub fn find_first<K, V, H>(table: &JumpTable<'_, K, V, H>, key: &K) -> Option<Found>
where
    H: KeyHasher<K>,
{
    table.find(key)
}

/// Locates the next entry for `key` after `previous`, which must have come from
/// [`find_first()`] or [`find_next()`] for the same key with no modification in between.
#[must_use]
pub fn find_next<K, V, H>(table: &JumpTable<'_, K, V, H>, key: &K, previous: Found) -> Option<Found>
where
    H: KeyHasher<K>,
{
    // Every slot except the one we already matched.
    let steps = table.linker_len().saturating_sub(1);

    table.probe_from(key, table.next_slot(previous.hash_index()), steps)
}

/// Iterates over every value stored under `key`, in probe order.
pub fn get_all<'t, K, V, H>(
    table: &'t JumpTable<'_, K, V, H>,
    key: &'t K,
) -> impl Iterator<Item = &'t V>
where
    H: KeyHasher<K>,
{
    iter::successors(find_first(table, key), move |previous| {
        find_next(table, key, *previous)
    })
    .map(move |found| {
        table
            .values()
            .get(found.entry_index())
            .expect("found entries are within the dense arrays")
    })
}
