use std::any::type_name;
use std::fmt;
use std::slice;

use alloc_kit::{Allocator, Error, OutOfMemoryHandler, RawArray, Result};
use tracing::debug;

use crate::raw_buckets::{LEAST_ITEMS_COUNT, NO_INDEX};
use crate::{DropPolicy, SlotArrayBuilder};

/// One entry of the indirection table.
///
/// The table is indexed two ways. By handle, `item_or_next` is the dense index of the owned
/// item, or the next free slot while the slot is unused. By dense item index, `owner` is the
/// slot that owns that item.
#[derive(Clone, Copy, Debug)]
struct Slot {
    item_or_next: u32,
    owner: u32,
}

/// Identifies an item in a [`SlotArray`].
///
/// The handle keeps resolving to the same item while other items are inserted and removed, even
/// though the item's position in [`SlotArray::as_slice()`] may change.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SlotHandle {
    index: u32,
}

impl SlotHandle {
    /// The slot index of the handle.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// A dense array of items addressed by stable [`SlotHandle`]s.
///
/// Items are kept contiguous so they can be iterated or processed as a slice. Removing an item
/// moves the last item into the gap and repoints the one slot that referred to it, so both
/// operations are O(1).
///
/// # Examples
///
/// ```
/// use alloc_kit::SystemAllocator;
/// use handle_arrays::SlotArray;
///
/// let system = SystemAllocator::new();
/// let mut array = SlotArray::new(&system);
///
/// let a = array.insert('a');
/// let b = array.insert('b');
/// let c = array.insert('c');
///
/// assert_eq!(array.remove(a), 'a');
///
/// // The last item moved into the gap, but handles still find their items.
/// assert_eq!(array.as_slice(), ['c', 'b']);
/// assert_eq!(*array.get(b), 'b');
/// assert_eq!(*array.get(c), 'c');
/// ```
pub struct SlotArray<'a, T> {
    items: RawArray<'a, T>,
    slots: RawArray<'a, Slot>,
    len: usize,
    free_head: u32,

    drop_policy: DropPolicy,
    out_of_memory_handler: OutOfMemoryHandler,
}

impl<'a, T> SlotArray<'a, T> {
    /// Creates an empty array that takes its memory from `allocator`.
    #[must_use]
    pub fn new(allocator: &'a dyn Allocator) -> Self {
        Self::builder(allocator).build()
    }

    /// Starts building a new [`SlotArray`].
    pub fn builder(allocator: &'a dyn Allocator) -> SlotArrayBuilder<'a, T> {
        SlotArrayBuilder::new(allocator)
    }

    pub(crate) fn new_inner(
        allocator: &'a dyn Allocator,
        drop_policy: DropPolicy,
        out_of_memory_handler: OutOfMemoryHandler,
    ) -> Self {
        Self {
            items: RawArray::new(allocator),
            slots: RawArray::new(allocator),
            len: 0,
            free_head: NO_INDEX,
            drop_policy,
            out_of_memory_handler,
        }
    }

    /// The number of items in the array.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the array holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of items the array can hold before it needs to grow.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Appends an item, returning the handle that identifies it.
    ///
    /// # Panics
    ///
    /// Calls the out-of-memory handler if the array needs to grow and cannot.
    pub fn insert(&mut self, value: T) -> SlotHandle {
        match self.try_insert(value) {
            Ok(handle) => handle,
            Err(error) => (self.out_of_memory_handler)(error),
        }
    }

    /// Appends an item, returning the handle that identifies it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the array needs to grow and the allocator cannot provide
    /// the memory. The array is unchanged in that case.
    pub fn try_insert(&mut self, value: T) -> Result<SlotHandle> {
        if self.len == self.capacity() {
            let needed = self.len.checked_add(1).ok_or(Error::OutOfMemory {
                size: usize::MAX,
                align: align_of::<T>(),
            })?;

            self.try_grow(needed)?;
        }

        let handle = self.free_head;
        let item = to_u32(self.len);

        self.free_head = self.slot(handle).item_or_next;
        self.slot_mut(handle).item_or_next = item;
        self.slot_mut(item).owner = handle;

        // SAFETY: `len < capacity`, and the dense slot at `len` is unused.
        unsafe {
            self.items.slot(self.len).write(value);
        }

        self.len = self.len.checked_add(1).expect("bounded by capacity");

        Ok(SlotHandle { index: handle })
    }

    /// Removes the item identified by `handle` and returns it.
    ///
    /// The last item of the dense array moves into the vacated position.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not refer to a live item.
    pub fn remove(&mut self, handle: SlotHandle) -> T {
        let item = self.item_of(handle);
        let last = to_u32(self.len.checked_sub(1).expect("a live item exists"));

        // SAFETY: The item is live, and we take ownership of it here.
        let value = unsafe { self.items.slot(to_usize(item)).read() };

        if item != last {
            let last_owner = self.slot(last).owner;

            // SAFETY: The last item is live and the vacated position was just moved out of. The
            // two positions differ.
            unsafe {
                self.items
                    .slot(to_usize(item))
                    .copy_from_nonoverlapping(self.items.slot(to_usize(last)), 1);
            }

            self.slot_mut(last_owner).item_or_next = item;
            self.slot_mut(item).owner = last_owner;
        }

        self.slot_mut(last).owner = NO_INDEX;
        self.slot_mut(handle.index).item_or_next = self.free_head;
        self.free_head = handle.index;
        self.len = self.len.checked_sub(1).expect("a live item was just removed");

        value
    }

    /// Returns the item identified by `handle`.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not refer to a live item.
    #[must_use]
    pub fn get(&self, handle: SlotHandle) -> &T {
        let item = self.item_of(handle);

        // SAFETY: The item is live and we hold `&self`.
        unsafe { self.items.slot(to_usize(item)).as_ref() }
    }

    /// Returns the item identified by `handle` for modification.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not refer to a live item.
    #[must_use]
    pub fn get_mut(&mut self, handle: SlotHandle) -> &mut T {
        let item = self.item_of(handle);

        // SAFETY: The item is live and we hold `&mut self`.
        unsafe { self.items.slot(to_usize(item)).as_mut() }
    }

    /// Whether `handle` refers to a live item.
    #[must_use]
    pub fn contains(&self, handle: SlotHandle) -> bool {
        self.try_item_of(handle).is_some()
    }

    /// The handle of the item at `dense_index` in [`as_slice()`][Self::as_slice].
    ///
    /// # Panics
    ///
    /// Panics if `dense_index` is not less than [`len()`][Self::len].
    #[must_use]
    pub fn handle_of(&self, dense_index: usize) -> SlotHandle {
        assert!(
            dense_index < self.len,
            "dense index {dense_index} out of bounds of slot array of {} with {} items",
            type_name::<T>(),
            self.len
        );

        SlotHandle {
            index: self.slot(to_u32(dense_index)).owner,
        }
    }

    /// The live items, densely packed in no particular order.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: The first `len` items are initialized and we hold `&self`.
        unsafe { slice::from_raw_parts(self.items.as_ptr().as_ptr(), self.len) }
    }

    /// The live items for modification, densely packed in no particular order.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: The first `len` items are initialized and we hold `&mut self`.
        unsafe { slice::from_raw_parts_mut(self.items.as_ptr().as_ptr(), self.len) }
    }

    /// Iterates over the live items and their handles, in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotHandle, &T)> {
        self.as_slice()
            .iter()
            .enumerate()
            .map(move |(dense_index, item)| (self.handle_of(dense_index), item))
    }

    /// Ensures there is room for `additional` more items without growing.
    ///
    /// # Panics
    ///
    /// Calls the out-of-memory handler if the memory cannot be obtained.
    pub fn reserve(&mut self, additional: usize) {
        if let Err(error) = self.try_reserve(additional) {
            (self.out_of_memory_handler)(error);
        }
    }

    /// Ensures there is room for `additional` more items without growing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the allocator cannot provide the memory.
    pub fn try_reserve(&mut self, additional: usize) -> Result<()> {
        let needed = self.len.checked_add(additional).ok_or(Error::OutOfMemory {
            size: usize::MAX,
            align: align_of::<T>(),
        })?;

        if needed > self.capacity() {
            self.try_grow(needed)?;
        }

        Ok(())
    }

    /// Verifies that the slots and the dense items form a bijection and that the free list only
    /// holds unused slots.
    ///
    /// # Panics
    ///
    /// Panics if the internal bookkeeping is inconsistent.
    #[cfg_attr(test, mutants::skip)] // This is test logic, mutating it is not valuable.
    pub fn integrity_check(&self) {
        assert!(
            self.len <= self.capacity(),
            "len {} exceeds capacity {} in slot array of {}",
            self.len,
            self.capacity(),
            type_name::<T>()
        );

        for dense_index in 0..self.len {
            let item = to_u32(dense_index);
            let owner = self.slot(item).owner;

            assert!(
                to_usize(owner) < self.capacity(),
                "item {item} has out-of-bounds owner {owner} in slot array of {}",
                type_name::<T>()
            );

            assert_eq!(
                self.slot(owner).item_or_next,
                item,
                "owner {owner} of item {item} points elsewhere in slot array of {}",
                type_name::<T>()
            );
        }

        let mut free = 0_usize;
        let mut next = self.free_head;

        while next != NO_INDEX {
            assert!(
                to_usize(next) < self.capacity(),
                "free list index {next} is out of bounds in slot array of {}",
                type_name::<T>()
            );

            assert!(
                self.try_item_of(SlotHandle { index: next }).is_none(),
                "free list index {next} owns a live item in slot array of {}",
                type_name::<T>()
            );

            free = free.checked_add(1).expect("bounded by capacity");
            assert!(
                free <= self.capacity(),
                "free list of slot array of {} contains a cycle",
                type_name::<T>()
            );

            next = self.slot(next).item_or_next;
        }

        assert_eq!(
            free.checked_add(self.len),
            Some(self.capacity()),
            "free slots and live items do not cover the capacity in slot array of {}",
            type_name::<T>()
        );
    }

    /// Grows both arrays to hold at least `needed` items, at least doubling the capacity.
    ///
    /// The new slots are pushed onto the free list, lowest index first.
    fn try_grow(&mut self, needed: usize) -> Result<()> {
        let old_capacity = self.capacity();
        let new_capacity = old_capacity
            .saturating_mul(2)
            .max(LEAST_ITEMS_COUNT)
            .max(needed);

        if !u32::try_from(new_capacity).is_ok_and(|capacity| capacity < NO_INDEX) {
            return Err(Error::OutOfMemory {
                size: usize::MAX,
                align: align_of::<Slot>(),
            });
        }

        self.items.try_grow(new_capacity, self.len)?;
        self.slots.try_grow(new_capacity, old_capacity)?;

        for index in (old_capacity..new_capacity).rev() {
            // SAFETY: Within the new capacity and not yet initialized.
            unsafe {
                self.slots.slot(index).write(Slot {
                    item_or_next: self.free_head,
                    owner: NO_INDEX,
                });
            }

            self.free_head = to_u32(index);
        }

        debug!(
            old_capacity,
            new_capacity,
            item_type = type_name::<T>(),
            "slot array grew"
        );

        Ok(())
    }

    fn try_item_of(&self, handle: SlotHandle) -> Option<u32> {
        if to_usize(handle.index) >= self.capacity() {
            return None;
        }

        let item = self.slot(handle.index).item_or_next;

        (to_usize(item) < self.len && self.slot(item).owner == handle.index).then_some(item)
    }

    fn item_of(&self, handle: SlotHandle) -> u32 {
        self.try_item_of(handle).unwrap_or_else(|| {
            panic!(
                "handle {} does not refer to a live item in slot array of {}",
                handle.index,
                type_name::<T>()
            )
        })
    }

    fn slot(&self, index: u32) -> Slot {
        // SAFETY: Every slot below the capacity is initialized when the array grows.
        unsafe { self.slots.slot(to_usize(index)).read() }
    }

    fn slot_mut(&mut self, index: u32) -> &mut Slot {
        // SAFETY: Every slot below the capacity is initialized and we hold `&mut self`.
        unsafe { self.slots.slot(to_usize(index)).as_mut() }
    }
}

fn to_usize(index: u32) -> usize {
    usize::try_from(index).expect("u32 indexes fit in usize on all supported targets")
}

fn to_u32(index: usize) -> u32 {
    u32::try_from(index).expect("capacity is capped below u32::MAX")
}

impl<T> fmt::Debug for SlotArray<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotArray")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("drop_policy", &self.drop_policy)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for SlotArray<'_, T> {
    fn drop(&mut self) {
        let was_empty = self.is_empty();

        let items: *mut [T] = self.as_mut_slice();
        self.len = 0;

        // SAFETY: The items are initialized and `len` was reset, so nothing observes them again.
        unsafe {
            items.drop_in_place();
        }

        self.drop_policy.enforce::<T>("slot array", was_empty);
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

    assert_not_impl_any!(SlotArray<'static, u32>: Send, Sync);

    #[test]
    fn remove_moves_last_item_into_gap() {
        let system = SystemAllocator::new();
        let mut array = SlotArray::new(&system);

        let a = array.insert(1_u32);
        let b = array.insert(2);
        let c = array.insert(3);

        assert_eq!(array.remove(a), 1);

        assert_eq!(array.as_slice(), [3, 2]);
        assert_eq!(*array.get(b), 2);
        assert_eq!(*array.get(c), 3);
        assert_eq!(array.handle_of(0), c);
        assert!(!array.contains(a));

        array.integrity_check();
    }

    #[test]
    fn remove_last_item_needs_no_move() {
        let system = SystemAllocator::new();
        let mut array = SlotArray::new(&system);

        let a = array.insert(1_u32);
        let b = array.insert(2);

        assert_eq!(array.remove(b), 2);
        assert_eq!(array.as_slice(), [1]);
        assert_eq!(*array.get(a), 1);

        array.integrity_check();
    }

    #[test]
    fn freed_slot_is_reused() {
        let system = SystemAllocator::new();
        let mut array = SlotArray::new(&system);

        _ = array.insert(1_u32);
        let b = array.insert(2);
        array.remove(b);

        let c = array.insert(3);

        assert_eq!(c, b);
        assert_eq!(*array.get(c), 3);
        array.integrity_check();
    }

    #[test]
    fn growth_preserves_items_and_handles() {
        let system = SystemAllocator::new();
        let mut array = SlotArray::new(&system);

        let handles: Vec<(SlotHandle, u64)> = (0..1000_u64).map(|i| (array.insert(i), i)).collect();

        assert!(array.capacity() >= 1000);
        for (handle, value) in handles {
            assert_eq!(*array.get(handle), value);
        }

        array.integrity_check();
    }

    #[test]
    fn first_growth_uses_minimum_capacity() {
        let system = SystemAllocator::new();
        let mut array = SlotArray::new(&system);

        _ = array.insert(1_u8);

        assert_eq!(array.capacity(), LEAST_ITEMS_COUNT);
    }

    #[test]
    fn capacity_doubles() {
        let system = SystemAllocator::new();
        let mut array = SlotArray::new(&system);

        for i in 0..=LEAST_ITEMS_COUNT {
            _ = array.insert(i);
        }

        assert_eq!(array.capacity(), LEAST_ITEMS_COUNT * 2);
    }

    #[test]
    fn get_mut_and_slices_modify_items() {
        let system = SystemAllocator::new();
        let mut array = SlotArray::new(&system);

        let a = array.insert(1_u32);
        let b = array.insert(2);

        *array.get_mut(a) += 10;
        for item in array.as_mut_slice() {
            *item *= 2;
        }

        assert_eq!(*array.get(a), 22);
        assert_eq!(*array.get(b), 4);
    }

    #[test]
    fn iter_pairs_items_with_handles() {
        let system = SystemAllocator::new();
        let mut array = SlotArray::new(&system);

        let a = array.insert('a');
        let b = array.insert('b');
        let c = array.insert('c');
        array.remove(a);

        let items: Vec<(SlotHandle, char)> = array.iter().map(|(h, v)| (h, *v)).collect();

        assert_eq!(items, [(c, 'c'), (b, 'b')]);
    }

    #[test]
    #[should_panic]
    fn get_removed_handle_panics() {
        let system = SystemAllocator::new();
        let mut array = SlotArray::new(&system);

        let a = array.insert(1_u32);
        array.remove(a);

        _ = array.get(a);
    }

    #[test]
    #[should_panic]
    fn handle_of_out_of_bounds_panics() {
        let system = SystemAllocator::new();
        let array = SlotArray::<u32>::new(&system);

        _ = array.handle_of(0);
    }

    #[test]
    fn try_insert_reports_out_of_memory() {
        let mut buffer = [MaybeUninit::<u8>::uninit(); 128];
        let linear = LinearAllocator::new(&mut buffer);
        let mut array = SlotArray::new(&linear);

        assert!(matches!(
            array.try_insert(1_u64),
            Err(Error::OutOfMemory { .. })
        ));
        assert!(array.is_empty());
        assert_eq!(array.capacity(), 0);
    }

    #[test]
    fn zero_sized_items() {
        let system = SystemAllocator::new();
        let mut array = SlotArray::new(&system);

        let a = array.insert(());
        let b = array.insert(());
        array.remove(a);

        assert_eq!(array.len(), 1);
        assert!(array.contains(b));
        array.integrity_check();
    }

    struct Droppable {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for Droppable {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn drop_drops_remaining_items_and_frees_memory() {
        let system = SystemAllocator::new();
        let drops = Rc::new(Cell::new(0));

        {
            let mut array = SlotArray::new(&system);

            for _ in 0..100 {
                _ = array.insert(Droppable {
                    drops: Rc::clone(&drops),
                });
            }
        }

        assert_eq!(drops.get(), 100);
        assert_eq!(system.stats().bytes_allocated, Some(0));
    }

    #[test]
    #[should_panic]
    fn drop_item_with_forbidden_to_drop_policy_panics() {
        let system = SystemAllocator::new();
        let mut array = SlotArray::builder(&system)
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        _ = array.insert(123_u32);
    }
}
