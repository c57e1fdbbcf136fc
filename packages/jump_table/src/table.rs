use std::any::type_name;
use std::hash::Hash;
use std::{fmt, mem, ptr, slice};

use alloc_kit::{Allocator, Error, OutOfMemoryHandler, RawArray, Result};
use tracing::debug;

use crate::{FoldKeyHasher, JumpTableBuilder, KeyHasher};

/// Linker slot that has never referenced an entry. Probing stops here.
pub(crate) const EMPTY: u32 = u32::MAX;

/// Linker slot whose entry was removed. Probing continues past it.
pub(crate) const GRAVESTONE: u32 = u32::MAX - 1;

/// Smallest linker table the table allocates.
const MIN_LINKER_LEN: usize = 16;

/// Seed used by tables that are not given one explicitly.
pub const DEFAULT_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Where a key was found: its slot in the linker table and its position in the dense entries.
///
/// Only valid until the table is next modified.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Found {
    hash_index: usize,
    entry_index: usize,
}

impl Found {
    /// The linker table slot that references the entry.
    #[must_use]
    pub fn hash_index(&self) -> usize {
        self.hash_index
    }

    /// The position of the entry in [`JumpTable::keys()`] and [`JumpTable::values()`].
    #[must_use]
    pub fn entry_index(&self) -> usize {
        self.entry_index
    }
}

/// An open-addressing hash table that keeps keys and values in dense arrays and maps hashes to
/// them through a separate linker ("jump") table of `u32` entry indexes.
///
/// Lookups probe linearly from `hash(key, seed) & (linker_len - 1)`. Removed linker slots become
/// gravestones that probing walks through; they are cleared by the next rehash.
///
/// Two removal operations are available:
///
/// * [`remove()`][Self::remove] keeps the entries dense by moving the last entry into the hole.
/// * [`mark_removed()`][Self::mark_removed] only turns the linker slot into a gravestone and
///   leaves the entry behind until the next rehash compacts it away. After this has been used,
///   [`len()`][Self::len] is an upper bound on the number of live keys rather than an exact count.
///
/// All memory comes from the [`Allocator`] supplied at construction.
///
/// # Example
///
/// ```
/// use alloc_kit::SystemAllocator;
/// use jump_table::JumpTable;
///
/// let system = SystemAllocator::new();
/// let mut table = JumpTable::new(&system);
///
/// table.set(1, 10);
/// table.set(2, 20);
/// table.set(3, 30);
/// assert_eq!(table.get_or(&2, -1), 20);
///
/// assert_eq!(table.remove(&2), Some(20));
/// assert!(!table.contains_key(&2));
/// assert_eq!(table.len(), 2);
/// ```
pub struct JumpTable<'a, K, V, H = FoldKeyHasher> {
    keys: RawArray<'a, K>,
    values: RawArray<'a, V>,

    /// Entry index for each slot, or `EMPTY`/`GRAVESTONE`. Length is zero or a power of two.
    linker: RawArray<'a, u32>,
    linker_len: usize,

    /// Number of initialized entries, including entries orphaned by `mark_removed()`.
    entries_len: usize,

    /// Gravestone linker slots plus orphaned entries. Both make the table look fuller than it is.
    gravestones: usize,

    hash_collisions: usize,
    seed: u64,
    load_ratio: (usize, usize),
    hasher: H,
    out_of_memory_handler: OutOfMemoryHandler,
}

impl<'a, K, V> JumpTable<'a, K, V>
where
    K: Hash + Eq,
{
    /// Creates an empty table with the default seed and load ratio. Nothing is allocated until
    /// the first insertion.
    #[must_use]
    pub fn new(allocator: &'a dyn Allocator) -> Self {
        Self::builder(allocator).build()
    }

    /// Starts building a new [`JumpTable`].
    ///
    /// Use this to customize the seed, load ratio, initial capacity, hasher or out-of-memory
    /// handler.
    pub fn builder(allocator: &'a dyn Allocator) -> JumpTableBuilder<'a, K, V> {
        JumpTableBuilder::new(allocator)
    }
}

impl<'a, K, V, H> JumpTable<'a, K, V, H>
where
    H: KeyHasher<K>,
{
    pub(crate) fn new_inner(
        allocator: &'a dyn Allocator,
        seed: u64,
        load_ratio: (usize, usize),
        hasher: H,
        out_of_memory_handler: OutOfMemoryHandler,
    ) -> Self {
        Self {
            keys: RawArray::new(allocator),
            values: RawArray::new(allocator),
            linker: RawArray::new(allocator),
            linker_len: 0,
            entries_len: 0,
            gravestones: 0,
            hash_collisions: 0,
            seed,
            load_ratio,
            hasher,
            out_of_memory_handler,
        }
    }

    /// Number of entries in the dense arrays.
    ///
    /// Exact as long as [`mark_removed()`][Self::mark_removed] has not been used since the last
    /// rehash. Otherwise it also counts the orphaned entries that are still waiting for a rehash.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries_len
    }

    /// Whether the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries_len == 0
    }

    /// Number of entries the dense arrays can hold before they must grow.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.keys.capacity().min(self.values.capacity())
    }

    /// Number of slots in the linker table.
    #[must_use]
    pub fn linker_len(&self) -> usize {
        self.linker_len
    }

    /// Gravestone linker slots plus orphaned entries, as counted towards the rehash threshold.
    #[must_use]
    pub fn gravestones(&self) -> usize {
        self.gravestones
    }

    /// Number of insertions since the last rehash that did not land in their home slot.
    #[must_use]
    pub fn hash_collisions(&self) -> usize {
        self.hash_collisions
    }

    /// The seed currently mixed into every hash.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Locates `key`.
    #[must_use]
    pub fn find(&self, key: &K) -> Option<Found> {
        if self.linker_len == 0 {
            return None;
        }

        self.probe_from(key, self.home_slot(key), self.linker_len)
    }

    /// Whether `key` is in the table.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.find(key)
            .map(|found| self.value_at(found.entry_index))
    }

    /// Returns a copy of the value stored under `key`, or `fallback` if there is none.
    #[must_use]
    pub fn get_or(&self, key: &K, fallback: V) -> V
    where
        V: Clone,
    {
        self.get(key).cloned().unwrap_or(fallback)
    }

    /// Returns the value stored under `key` for modification.
    #[must_use]
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let found = self.find(key)?;
        Some(self.value_at_mut(found.entry_index))
    }

    /// Stores `value` under `key`, returning the previous value if the key was already present.
    ///
    /// # Panics
    ///
    /// Calls the out-of-memory handler (which by default panics) if the table needs to grow and
    /// the allocator cannot provide the memory.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        match self.try_set(key, value) {
            Ok(previous) => previous,
            Err(error) => self.out_of_memory(error),
        }
    }

    /// Stores `value` under `key`, returning the previous value if the key was already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the table needs to grow and the allocator cannot provide
    /// the memory. The table is unchanged in that case.
    pub fn try_set(&mut self, key: K, value: V) -> Result<Option<V>> {
        if let Some(found) = self.find(&key) {
            return Ok(Some(mem::replace(
                self.value_at_mut(found.entry_index),
                value,
            )));
        }

        self.try_insert_new(key, value)?;
        Ok(None)
    }

    /// Removes `key`, returning its value.
    ///
    /// The last entry in the dense arrays is moved into the vacated position, so entry indexes
    /// obtained earlier are invalidated.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remove_entry(key).map(|(_, value)| value)
    }

    /// Removes `key`, returning the stored key and value.
    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        let found = self.find(key)?;
        let removed_index = found.entry_index;

        self.set_link(found.hash_index, GRAVESTONE);
        self.gravestones = self
            .gravestones
            .checked_add(1)
            .expect("gravestones are bounded by the linker table length");

        // SAFETY: The entry is initialized and we logically move it out here. From this point on,
        // its position is treated as uninitialized until overwritten below or truncated away.
        let removed_key = unsafe { self.keys.slot(removed_index).read() };

        // SAFETY: As above.
        let removed_value = unsafe { self.values.slot(removed_index).read() };

        let last_index = self
            .entries_len
            .checked_sub(1)
            .expect("a found entry means the table is not empty");

        if removed_index != last_index {
            // If the last entry is an orphan left by mark_removed() no slot references it and it
            // simply stays an orphan at its new position.
            if let Some(last_slot) = self.find_found_entry(last_index) {
                self.set_link(last_slot, to_link(removed_index));
            }

            self.move_entry(last_index, removed_index);
        }

        self.entries_len = last_index;

        Some((removed_key, removed_value))
    }

    /// Removes `key` from the linker table only, leaving its entry in the dense arrays until the
    /// next rehash. Returns whether the key was present.
    ///
    /// This is O(1) and never moves entries, which suits bulk deletion. The orphaned entry still
    /// counts towards [`len()`][Self::len] and its value is only dropped by the next rehash.
    pub fn mark_removed(&mut self, key: &K) -> bool {
        let Some(found) = self.find(key) else {
            return false;
        };

        self.set_link(found.hash_index, GRAVESTONE);

        // One for the gravestone slot, one for the orphaned entry.
        self.gravestones = self
            .gravestones
            .checked_add(2)
            .expect("gravestones are bounded by the linker table length plus entry count");

        true
    }

    /// Ensures there is room for `additional` more entries without growing or rehashing.
    ///
    /// # Panics
    ///
    /// Calls the out-of-memory handler if the allocator cannot provide the memory.
    pub fn reserve(&mut self, additional: usize) {
        if let Err(error) = self.try_reserve(additional) {
            self.out_of_memory(error);
        }
    }

    /// Ensures there is room for `additional` more entries without growing or rehashing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the allocator cannot provide the memory.
    pub fn try_reserve(&mut self, additional: usize) -> Result<()> {
        let needed = self
            .entries_len
            .checked_add(additional)
            .ok_or(Error::OutOfMemory {
                size: usize::MAX,
                align: align_of::<K>(),
            })?;

        if self.needs_rehash(needed) {
            let linker_len = self.required_linker_len(needed)?;
            self.try_rehash(linker_len, self.seed)?;
        }

        self.try_grow_entries(needed)
    }

    /// Rebuilds the linker table with at least `linker_len` slots and the given seed, dropping
    /// every orphaned entry and clearing all gravestones.
    ///
    /// The size is rounded up to a power of two large enough to hold the surviving entries at the
    /// configured load ratio.
    ///
    /// # Panics
    ///
    /// Calls the out-of-memory handler if the allocator cannot provide the memory.
    pub fn rehash(&mut self, linker_len: usize, seed: u64) {
        if let Err(error) = self.try_rehash(linker_len, seed) {
            self.out_of_memory(error);
        }
    }

    /// Rebuilds the linker table with at least `linker_len` slots and the given seed, dropping
    /// every orphaned entry and clearing all gravestones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the allocator cannot provide the memory. The table is
    /// unchanged in that case.
    pub fn try_rehash(&mut self, linker_len: usize, seed: u64) -> Result<()> {
        let allocator = self.linker.allocator();

        let mut alive = RawArray::<bool>::try_with_capacity(allocator, self.entries_len)?;
        for index in 0..self.entries_len {
            // SAFETY: Within capacity.
            unsafe {
                alive.slot(index).write(false);
            }
        }

        let mut survivors: usize = 0;
        for slot in 0..self.linker_len {
            if let Some(entry_index) = live_entry(self.link(slot)) {
                // SAFETY: Linker slots only reference initialized entries, which are within the
                // capacity of the alive marks.
                unsafe {
                    alive.slot(entry_index).write(true);
                }
                survivors = survivors
                    .checked_add(1)
                    .expect("bounded by the linker table length");
            }
        }

        let linker_len = linker_len
            .max(self.required_linker_len(survivors)?)
            .checked_next_power_of_two()
            .ok_or(Error::OutOfMemory {
                size: usize::MAX,
                align: align_of::<u32>(),
            })?;

        let mut linker = RawArray::<u32>::try_with_capacity(allocator, linker_len)?;
        for slot in 0..linker_len {
            // SAFETY: Within capacity.
            unsafe {
                linker.slot(slot).write(EMPTY);
            }
        }

        // Nothing can fail from here on.
        let old_linker_len = self.linker_len;
        let old_entries_len = self.entries_len;

        self.compact(&alive);
        debug_assert_eq!(self.entries_len, survivors);

        let old_linker = mem::replace(&mut self.linker, linker);
        self.linker_len = linker_len;
        self.seed = seed;
        self.gravestones = 0;
        self.hash_collisions = 0;

        for entry_index in 0..self.entries_len {
            let home = self.home_slot(self.key_at(entry_index));
            self.link_new_entry(home, entry_index);
        }

        drop(old_linker);

        debug!(
            old_linker_len,
            linker_len,
            old_entries_len,
            entries_len = self.entries_len,
            hash_collisions = self.hash_collisions,
            key_type = type_name::<K>(),
            "jump table rehashed"
        );

        Ok(())
    }

    /// Drops every entry and empties the linker table, keeping the allocated memory.
    pub fn clear(&mut self) {
        self.drop_entries();

        for slot in 0..self.linker_len {
            self.set_link(slot, EMPTY);
        }

        self.gravestones = 0;
        self.hash_collisions = 0;
    }

    /// The keys of all entries in dense order, including entries orphaned by
    /// [`mark_removed()`][Self::mark_removed].
    #[must_use]
    pub fn keys(&self) -> &[K] {
        // SAFETY: The first `entries_len` keys are initialized and the pointer is aligned and
        // non-null even when nothing was allocated.
        unsafe { slice::from_raw_parts(self.keys.as_ptr().as_ptr(), self.entries_len) }
    }

    /// The values of all entries in dense order, including entries orphaned by
    /// [`mark_removed()`][Self::mark_removed].
    #[must_use]
    pub fn values(&self) -> &[V] {
        // SAFETY: See `keys()`.
        unsafe { slice::from_raw_parts(self.values.as_ptr().as_ptr(), self.entries_len) }
    }

    /// The values of all entries in dense order, for modification.
    #[must_use]
    pub fn values_mut(&mut self) -> &mut [V] {
        // SAFETY: See `keys()`. We hold an exclusive borrow of the table.
        unsafe { slice::from_raw_parts_mut(self.values.as_ptr().as_ptr(), self.entries_len) }
    }

    /// Iterates over the live entries in linker table order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        (0..self.linker_len).filter_map(move |slot| {
            live_entry(self.link(slot))
                .map(|entry_index| (self.key_at(entry_index), self.value_at(entry_index)))
        })
    }

    /// Verifies the internal bookkeeping of the table, panicking on any inconsistency.
    #[cfg_attr(test, mutants::skip)] // Mutations only weaken the checks.
    pub fn integrity_check(&self) {
        assert!(
            self.linker_len == 0 || self.linker_len.is_power_of_two(),
            "linker length {} of JumpTable<{}, {}> is not a power of two",
            self.linker_len,
            type_name::<K>(),
            type_name::<V>()
        );

        assert!(
            self.entries_len <= self.capacity(),
            "entries_len {} exceeds capacity {}",
            self.entries_len,
            self.capacity()
        );

        let mut referenced = vec![false; self.entries_len];
        let mut gravestone_slots: usize = 0;
        let mut empty_slots: usize = 0;

        for slot in 0..self.linker_len {
            match self.link(slot) {
                EMPTY => empty_slots = empty_slots.wrapping_add(1),
                GRAVESTONE => gravestone_slots = gravestone_slots.wrapping_add(1),
                link => {
                    let entry_index = from_link(link);
                    let seen = referenced.get_mut(entry_index).unwrap_or_else(|| {
                        panic!(
                            "linker slot {slot} references entry {entry_index} beyond entries_len {}",
                            self.entries_len
                        )
                    });

                    assert!(
                        !*seen,
                        "entry {entry_index} is referenced by more than one linker slot"
                    );
                    *seen = true;

                    assert_eq!(
                        self.find_found_entry(entry_index),
                        Some(slot),
                        "entry {entry_index} is not reachable by probing from its home slot"
                    );
                }
            }
        }

        assert!(
            self.linker_len == 0 || empty_slots > 0,
            "linker table has no empty slot, so probing cannot terminate"
        );

        let orphans = referenced.iter().filter(|seen| !**seen).count();

        assert_eq!(
            gravestone_slots.wrapping_add(orphans),
            self.gravestones,
            "gravestone count does not match {gravestone_slots} gravestone slots plus {orphans} orphaned entries"
        );
    }

    pub(crate) fn out_of_memory(&self, error: Error) -> ! {
        (self.out_of_memory_handler)(error)
    }

    /// Inserts an entry without checking whether the key is already present.
    pub(crate) fn try_insert_new(&mut self, key: K, value: V) -> Result<Found> {
        let needed = self
            .entries_len
            .checked_add(1)
            .filter(|needed| u32::try_from(*needed).is_ok_and(|needed| needed < GRAVESTONE))
            .ok_or(Error::OutOfMemory {
                size: usize::MAX,
                align: align_of::<K>(),
            })?;

        if self.needs_rehash(needed) {
            let linker_len = self.required_linker_len(needed)?;
            self.try_rehash(linker_len, self.seed)?;
        }

        if self.entries_len == self.capacity() {
            let grown = self
                .capacity()
                .checked_add(self.capacity() >> 1)
                .and_then(|capacity| capacity.checked_add(8))
                .ok_or(Error::OutOfMemory {
                    size: usize::MAX,
                    align: align_of::<K>(),
                })?;

            self.try_grow_entries(grown)?;
        }

        let entry_index = self.entries_len;

        // SAFETY: Within capacity, as ensured above, and not initialized.
        unsafe {
            self.keys.slot(entry_index).write(key);
        }

        // SAFETY: As above.
        unsafe {
            self.values.slot(entry_index).write(value);
        }

        // Rehashing may have compacted orphaned entries away, so `needed` can be stale here.
        self.entries_len = entry_index.wrapping_add(1);

        let home = self.home_slot(self.key_at(entry_index));
        let hash_index = self.link_new_entry(home, entry_index);

        Ok(Found {
            hash_index,
            entry_index,
        })
    }

    /// Probes up to `steps` slots starting at `first_slot` for an entry equal to `key`, walking
    /// through gravestones and stopping at the first empty slot.
    pub(crate) fn probe_from(&self, key: &K, first_slot: usize, steps: usize) -> Option<Found> {
        let mut slot = first_slot;

        for _ in 0..steps {
            match self.link(slot) {
                EMPTY => return None,
                GRAVESTONE => {}
                link => {
                    let entry_index = from_link(link);
                    if self.hasher.equals(self.key_at(entry_index), key) {
                        return Some(Found {
                            hash_index: slot,
                            entry_index,
                        });
                    }
                }
            }

            slot = self.next_slot(slot);
        }

        None
    }

    pub(crate) fn next_slot(&self, slot: usize) -> usize {
        slot.wrapping_add(1) & self.linker_len.wrapping_sub(1)
    }

    fn home_slot(&self, key: &K) -> usize {
        let hash = self.hasher.hash(key, self.seed);

        #[expect(
            clippy::cast_possible_truncation,
            reason = "only the low bits select a slot"
        )]
        let truncated = hash as usize;

        truncated & self.linker_len.wrapping_sub(1)
    }

    /// Links `entry_index` into the first empty or gravestone slot at or after `home`.
    /// Returns the slot used.
    fn link_new_entry(&mut self, home: usize, entry_index: usize) -> usize {
        let mut slot = home;

        loop {
            match self.link(slot) {
                EMPTY => break,
                GRAVESTONE => {
                    self.gravestones = self
                        .gravestones
                        .checked_sub(1)
                        .expect("a gravestone slot is always counted");
                    break;
                }
                _ => slot = self.next_slot(slot),
            }
        }

        if slot != home {
            self.hash_collisions = self.hash_collisions.wrapping_add(1);
        }

        self.set_link(slot, to_link(entry_index));
        slot
    }

    /// Finds the linker slot that references `entry_index`, by probing from the home slot of
    /// its key. Returns `None` for orphaned entries.
    fn find_found_entry(&self, entry_index: usize) -> Option<usize> {
        let target = to_link(entry_index);
        let mut slot = self.home_slot(self.key_at(entry_index));

        for _ in 0..self.linker_len {
            match self.link(slot) {
                EMPTY => return None,
                link if link == target => return Some(slot),
                _ => {}
            }

            slot = self.next_slot(slot);
        }

        None
    }

    /// Whether inserting up to `entries` entries requires a rehash first.
    fn needs_rehash(&self, entries: usize) -> bool {
        let (num, den) = self.load_ratio;
        let usable = self.linker_len.saturating_sub(self.gravestones);

        usable.saturating_mul(num) <= entries.saturating_mul(den)
    }

    /// Smallest power-of-two linker length that holds `entries` without triggering a rehash.
    fn required_linker_len(&self, entries: usize) -> Result<usize> {
        let (num, den) = self.load_ratio;

        entries
            .checked_mul(den)
            .and_then(|scaled| scaled.checked_div(num))
            .and_then(|min| min.checked_add(1))
            .and_then(usize::checked_next_power_of_two)
            .map(|len| len.max(MIN_LINKER_LEN))
            .ok_or(Error::OutOfMemory {
                size: usize::MAX,
                align: align_of::<u32>(),
            })
    }

    fn try_grow_entries(&mut self, capacity: usize) -> Result<()> {
        let old_capacity = self.capacity();

        self.keys.try_grow(capacity, self.entries_len)?;
        self.values.try_grow(capacity, self.entries_len)?;

        if self.capacity() != old_capacity {
            debug!(
                old_capacity,
                capacity = self.capacity(),
                key_type = type_name::<K>(),
                "jump table entries grew"
            );
        }

        Ok(())
    }

    /// Drops every entry not marked alive and packs the survivors to the front, moving entries
    /// from the back into holes at the front.
    fn compact(&mut self, alive: &RawArray<'_, bool>) {
        // SAFETY: Marks were initialized for every entry index before calling this.
        let is_alive = |index: usize| unsafe { alive.slot(index).read() };

        let mut front: usize = 0;
        let mut back = self.entries_len;

        while front < back {
            if is_alive(front) {
                front = front.wrapping_add(1);
                continue;
            }

            self.drop_entry(front);
            back = back.wrapping_sub(1);

            while back > front && !is_alive(back) {
                self.drop_entry(back);
                back = back.wrapping_sub(1);
            }

            if back > front {
                self.move_entry(back, front);
                front = front.wrapping_add(1);
            }
        }

        self.entries_len = front;
    }

    fn drop_entries(&mut self) {
        let len = self.entries_len;

        // Truncate first so a panicking destructor cannot cause a double drop.
        self.entries_len = 0;

        for index in 0..len {
            self.drop_entry(index);
        }
    }

    fn drop_entry(&mut self, index: usize) {
        // SAFETY: Callers only pass indexes of initialized entries and treat them as
        // uninitialized afterwards.
        unsafe {
            self.keys.slot(index).drop_in_place();
        }

        // SAFETY: As above.
        unsafe {
            self.values.slot(index).drop_in_place();
        }
    }

    /// Moves the entry at `from` into the uninitialized position `to`.
    fn move_entry(&mut self, from: usize, to: usize) {
        // SAFETY: Callers guarantee `from` is initialized, `to` is not and they are distinct
        // positions within capacity. `from` is treated as uninitialized afterwards.
        unsafe {
            ptr::copy_nonoverlapping(self.keys.slot(from).as_ptr(), self.keys.slot(to).as_ptr(), 1);
        }

        // SAFETY: As above.
        unsafe {
            ptr::copy_nonoverlapping(
                self.values.slot(from).as_ptr(),
                self.values.slot(to).as_ptr(),
                1,
            );
        }
    }

    fn link(&self, slot: usize) -> u32 {
        // SAFETY: Every linker slot is initialized when the linker table is created.
        unsafe { self.linker.slot(slot).read() }
    }

    fn set_link(&mut self, slot: usize, link: u32) {
        // SAFETY: Within capacity, asserted by `slot()`.
        unsafe {
            self.linker.slot(slot).write(link);
        }
    }

    fn key_at(&self, entry_index: usize) -> &K {
        debug_assert!(entry_index < self.entries_len);

        // SAFETY: Entries below `entries_len` are initialized and borrowed for as long as `self`.
        unsafe { self.keys.slot(entry_index).as_ref() }
    }

    fn value_at(&self, entry_index: usize) -> &V {
        debug_assert!(entry_index < self.entries_len);

        // SAFETY: See `key_at()`.
        unsafe { self.values.slot(entry_index).as_ref() }
    }

    fn value_at_mut(&mut self, entry_index: usize) -> &mut V {
        debug_assert!(entry_index < self.entries_len);

        // SAFETY: See `key_at()`. We hold an exclusive borrow of the table.
        unsafe { self.values.slot(entry_index).as_mut() }
    }
}

fn live_entry(link: u32) -> Option<usize> {
    (link < GRAVESTONE).then(|| from_link(link))
}

fn from_link(link: u32) -> usize {
    usize::try_from(link).expect("u32 always fits in usize on supported targets")
}

fn to_link(entry_index: usize) -> u32 {
    u32::try_from(entry_index).expect("entry count is capped below the gravestone marker")
}

impl<K, V, H> fmt::Debug for JumpTable<'_, K, V, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JumpTable")
            .field("key_type", &format_args!("{}", type_name::<K>()))
            .field("value_type", &format_args!("{}", type_name::<V>()))
            .field("entries_len", &self.entries_len)
            .field("linker_len", &self.linker_len)
            .field("gravestones", &self.gravestones)
            .field("hash_collisions", &self.hash_collisions)
            .field("seed", &self.seed)
            .field("load_ratio", &self.load_ratio)
            .finish_non_exhaustive()
    }
}

impl<K, V, H> Drop for JumpTable<'_, K, V, H> {
    fn drop(&mut self) {
        let len = self.entries_len;
        self.entries_len = 0;

        for index in 0..len {
            // SAFETY: Entries below the old `entries_len` are initialized and never touched again.
            unsafe {
                self.keys.slot(index).drop_in_place();
            }

            // SAFETY: As above.
            unsafe {
                self.values.slot(index).drop_in_place();
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::mem::MaybeUninit;
    use std::rc::Rc;

    use alloc_kit::{LinearAllocator, SystemAllocator};
    use static_assertions::assert_not_impl_any;

    use super::*;

    assert_not_impl_any!(JumpTable<'static, u32, u32>: Send, Sync);

    /// Sends every key to the same home slot.
    #[derive(Debug, Default)]
    struct CollidingHasher;

    impl KeyHasher<u32> for CollidingHasher {
        fn hash(&self, _key: &u32, _seed: u64) -> u64 {
            0
        }

        fn equals(&self, a: &u32, b: &u32) -> bool {
            a == b
        }
    }

    fn colliding(allocator: &dyn Allocator) -> JumpTable<'_, u32, u32, CollidingHasher> {
        JumpTable::builder(allocator).hasher(CollidingHasher).build()
    }

    #[test]
    fn set_get_remove_scenario() {
        let system = SystemAllocator::new();
        let mut table = JumpTable::new(&system);

        table.set(1, 10);
        table.set(2, 20);
        table.set(3, 30);

        assert_eq!(table.get_or(&2, -1), 20);
        assert_eq!(table.remove(&2), Some(20));
        assert!(!table.contains_key(&2));
        assert_eq!(table.get_or(&1, -1), 10);
        assert_eq!(table.get_or(&3, -1), 30);
        assert_eq!(table.len(), 2);

        table.integrity_check();
    }

    #[test]
    fn set_overwrites_in_place() {
        let system = SystemAllocator::new();
        let mut table = JumpTable::new(&system);

        assert_eq!(table.set("a", 1), None);
        assert_eq!(table.set("a", 2), Some(1));

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&"a"), Some(&2));
    }

    #[test]
    fn empty_table_does_not_allocate() {
        let system = SystemAllocator::new();
        let table = JumpTable::<u64, u64>::new(&system);

        assert!(table.is_empty());
        assert_eq!(table.get(&1), None);
        assert_eq!(table.linker_len(), 0);
        assert_eq!(system.stats().bytes_allocated, Some(0));
    }

    #[test]
    fn entries_grow_by_half_plus_eight() {
        let system = SystemAllocator::new();
        let mut table = JumpTable::new(&system);

        table.set(0_u32, 0_u32);
        assert_eq!(table.capacity(), 8);

        for i in 1..=8 {
            table.set(i, i);
        }
        assert_eq!(table.capacity(), 20);
    }

    #[test]
    fn linker_stays_within_load_ratio() {
        let system = SystemAllocator::new();
        let mut table = JumpTable::new(&system);

        for i in 0..1000_u32 {
            table.set(i, i);
            assert!(table.linker_len() > table.len() * 4);
        }

        table.integrity_check();
    }

    #[test]
    fn remove_repoints_moved_entry() {
        let system = SystemAllocator::new();
        let mut table = colliding(&system);

        for i in 0..5 {
            table.set(i, i * 10);
        }

        assert_eq!(table.remove(&1), Some(10));

        // The last entry moved into position 1.
        assert_eq!(table.keys(), &[0, 4, 2, 3]);
        assert_eq!(table.get(&4), Some(&40));
        assert_eq!(table.gravestones(), 1);

        table.integrity_check();
    }

    #[test]
    fn probing_walks_through_gravestones() {
        let system = SystemAllocator::new();
        let mut table = colliding(&system);

        for i in 0..4 {
            table.set(i, i);
        }

        table.remove(&0);
        table.remove(&1);

        assert_eq!(table.get(&2), Some(&2));
        assert_eq!(table.get(&3), Some(&3));
        assert_eq!(table.get(&0), None);
    }

    #[test]
    fn insertion_reuses_first_gravestone() {
        let system = SystemAllocator::new();
        let mut table = colliding(&system);

        table.set(1, 1);
        table.set(2, 2);
        let slot_of_1 = table.find(&1).unwrap().hash_index();

        table.remove(&1);
        assert_eq!(table.gravestones(), 1);

        table.set(3, 3);
        assert_eq!(table.find(&3).unwrap().hash_index(), slot_of_1);
        assert_eq!(table.gravestones(), 0);

        table.integrity_check();
    }

    #[test]
    fn mark_removed_leaves_orphan_until_rehash() {
        let system = SystemAllocator::new();
        let mut table = JumpTable::new(&system);

        for i in 0..10_u32 {
            table.set(i, i * 100);
        }

        assert!(table.mark_removed(&3));
        assert!(!table.mark_removed(&3));
        assert!(!table.contains_key(&3));
        assert_eq!(table.len(), 10);
        assert_eq!(table.gravestones(), 2);
        table.integrity_check();

        let linker_len = table.linker_len();
        table.rehash(linker_len, table.seed());

        assert_eq!(table.len(), 9);
        assert_eq!(table.gravestones(), 0);
        for i in (0..10).filter(|i| *i != 3) {
            assert_eq!(table.get(&i), Some(&(i * 100)));
        }
        table.integrity_check();
    }

    #[test]
    fn insert_triggered_rehash_drops_orphan_from_len() {
        let system = SystemAllocator::new();
        let mut table = JumpTable::new(&system);

        for i in 0..13_u32 {
            table.set(i, i);
        }

        assert!(table.mark_removed(&5));

        let linker_len = table.linker_len();
        let mut next = 13_u32;
        while table.linker_len() == linker_len {
            table.set(next, next);
            next += 1;
        }

        // Keys 0..next minus the one marked removed.
        let live = usize::try_from(next).unwrap() - 1;
        assert_eq!(table.len(), live);
        assert_eq!(table.keys().len(), live);
        assert_eq!(table.values().len(), live);
        assert_eq!(table.iter().count(), live);
        assert_eq!(table.gravestones(), 0);
        assert!(!table.contains_key(&5));
        assert_eq!(table.get(&(next - 1)), Some(&(next - 1)));
        table.integrity_check();
    }

    #[test]
    fn remove_after_mark_removed_moves_orphan() {
        let system = SystemAllocator::new();
        let mut table = colliding(&system);

        for i in 0..4 {
            table.set(i, i);
        }

        // The last entry becomes an orphan that hashing can no longer locate.
        assert!(table.mark_removed(&3));
        assert_eq!(table.remove(&0), Some(0));

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(&1), Some(&1));
        assert_eq!(table.get(&2), Some(&2));
        table.integrity_check();

        let linker_len = table.linker_len();
        table.rehash(linker_len, table.seed());
        assert_eq!(table.len(), 2);
        table.integrity_check();
    }

    #[test]
    fn rehash_drops_orphans_exactly_once() {
        #[derive(Debug)]
        struct Tracked(Rc<Cell<usize>>);

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let system = SystemAllocator::new();

        {
            let mut table = JumpTable::new(&system);

            for i in 0..20_u32 {
                table.set(i, Tracked(Rc::clone(&drops)));
            }

            for i in 0..20_u32 {
                if i % 3 == 0 {
                    table.mark_removed(&i);
                }
            }

            let linker_len = table.linker_len();
            table.rehash(linker_len, 12345);
            assert_eq!(drops.get(), 7);
            assert_eq!(table.seed(), 12345);
            table.integrity_check();
        }

        assert_eq!(drops.get(), 20);
        assert_eq!(system.stats().bytes_allocated, Some(0));
    }

    #[test]
    fn rehash_rounds_up_too_small_size() {
        let system = SystemAllocator::new();
        let mut table = JumpTable::new(&system);

        for i in 0..100_u32 {
            table.set(i, i);
        }

        table.rehash(3, DEFAULT_SEED);

        assert!(table.linker_len().is_power_of_two());
        assert!(table.linker_len() > 400);
        table.integrity_check();
    }

    #[test]
    fn clear_keeps_memory() {
        let system = SystemAllocator::new();
        let mut table = JumpTable::new(&system);

        for i in 0..100_u32 {
            table.set(i, i);
        }
        let held = system.stats().bytes_allocated;

        table.clear();

        assert!(table.is_empty());
        assert!(!table.contains_key(&5));
        assert_eq!(system.stats().bytes_allocated, held);
        table.integrity_check();
    }

    #[test]
    fn iter_skips_orphans() {
        let system = SystemAllocator::new();
        let mut table = JumpTable::new(&system);

        for i in 0..10_u32 {
            table.set(i, i);
        }
        table.mark_removed(&4);

        let mut seen: Vec<_> = table.iter().map(|(k, _)| *k).collect();
        seen.sort_unstable();

        assert_eq!(seen, vec![0, 1, 2, 3, 5, 6, 7, 8, 9]);
        assert_eq!(table.keys().len(), 10);
    }

    #[test]
    fn reserve_avoids_later_growth() {
        let system = SystemAllocator::new();
        let mut table = JumpTable::new(&system);

        table.reserve(500);
        let linker_len = table.linker_len();
        let capacity = table.capacity();

        for i in 0..500_u32 {
            table.set(i, i);
        }

        assert_eq!(table.linker_len(), linker_len);
        assert_eq!(table.capacity(), capacity);
    }

    #[test]
    fn try_set_reports_out_of_memory() {
        let mut buffer = [MaybeUninit::<u8>::uninit(); 256];
        let linear = LinearAllocator::new(&mut buffer);
        let mut table = JumpTable::new(&linear);

        let mut result = Ok(None);
        for i in 0..1000_u64 {
            result = table.try_set(i, i);
            if result.is_err() {
                break;
            }
        }

        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
        table.integrity_check();
    }

    #[test]
    fn get_mut_modifies_value() {
        let system = SystemAllocator::new();
        let mut table = JumpTable::new(&system);

        table.set(7_u8, String::from("seven"));
        table.get_mut(&7).unwrap().push('!');

        assert_eq!(table.get(&7).map(String::as_str), Some("seven!"));
    }

    #[test]
    fn custom_load_ratio_controls_linker_len() {
        let system = SystemAllocator::new();
        let mut table = JumpTable::builder(&system).load_ratio(1, 1).build();

        for i in 0..100_u32 {
            table.set(i, ());
        }

        assert_eq!(table.linker_len(), 128);
        table.integrity_check();
    }
}
