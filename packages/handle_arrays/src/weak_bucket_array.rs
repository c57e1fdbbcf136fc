use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ptr::NonNull;

use alloc_kit::{Allocator, OutOfMemoryHandler, Result};

use crate::raw_buckets::{NO_INDEX, RawBuckets, SlotStorage, flat_index};
use crate::{DropPolicy, WeakBucketArrayBuilder};

/// Set in a slot generation while the slot holds an item.
const ALIVE_BIT: u32 = 1 << 31;

/// The counting part of a slot generation. Wraps around after 2^31 reuses of one slot.
const GENERATION_MASK: u32 = ALIVE_BIT - 1;

struct WeakSlot<T> {
    generation: u32,
    storage: SlotStorage<T>,
}

/// Identifies an item in a [`WeakBucketArray`], together with the generation of its slot.
///
/// Once the item is removed the handle is stale. Stale handles are reported as not found, even
/// after the slot has been reused for another item.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct WeakHandle {
    index: u32,
    generation: u32,
}

impl WeakHandle {
    /// The flat slot index of the item.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The generation the slot had when the item was inserted.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation & GENERATION_MASK
    }
}

/// A bucket array that detects stale handles.
///
/// Every slot carries a generation that changes whenever an item is inserted into it. A
/// [`WeakHandle`] only resolves while the generation it captured is still current, so looking
/// up a removed item is a reported condition rather than a contract violation.
///
/// # Examples
///
/// ```
/// use alloc_kit::SystemAllocator;
/// use handle_arrays::WeakBucketArray;
///
/// let system = SystemAllocator::new();
/// let mut array = WeakBucketArray::new(&system);
///
/// let old = array.insert("old");
/// assert_eq!(array.remove(old), Some("old"));
///
/// // The slot is reused, but the old handle does not see the new item.
/// let new = array.insert("new");
/// assert_eq!(new.index(), old.index());
/// assert_eq!(array.get(old), None);
/// assert_eq!(*array.get_or(old, &"missing"), "missing");
/// assert_eq!(array.get(new), Some(&"new"));
/// ```
pub struct WeakBucketArray<'a, T> {
    buckets: RawBuckets<'a, WeakSlot<T>, ()>,
    len: usize,
    free_head: u32,

    drop_policy: DropPolicy,
    out_of_memory_handler: OutOfMemoryHandler,

    _items: PhantomData<T>,
}

impl<'a, T> WeakBucketArray<'a, T> {
    /// Creates an empty array that takes its memory from `allocator`.
    #[must_use]
    pub fn new(allocator: &'a dyn Allocator) -> Self {
        Self::builder(allocator).build()
    }

    /// Starts building a new [`WeakBucketArray`].
    pub fn builder(allocator: &'a dyn Allocator) -> WeakBucketArrayBuilder<'a, T> {
        WeakBucketArrayBuilder::new(allocator)
    }

    pub(crate) fn new_inner(
        allocator: &'a dyn Allocator,
        drop_policy: DropPolicy,
        out_of_memory_handler: OutOfMemoryHandler,
    ) -> Self {
        Self {
            buckets: RawBuckets::new(allocator),
            len: 0,
            free_head: NO_INDEX,
            drop_policy,
            out_of_memory_handler,
            _items: PhantomData,
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
        self.buckets.capacity()
    }

    /// Inserts an item, returning a handle that captures the slot's new generation.
    ///
    /// # Panics
    ///
    /// Calls the out-of-memory handler if the array needs to grow and cannot.
    pub fn insert(&mut self, value: T) -> WeakHandle {
        match self.try_insert(value) {
            Ok(handle) => handle,
            Err(error) => (self.out_of_memory_handler)(error),
        }
    }

    /// Inserts an item, returning a handle that captures the slot's new generation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`][alloc_kit::Error::OutOfMemory] if the array needs to grow
    /// and the allocator cannot provide the memory. The array is unchanged in that case.
    pub fn try_insert(&mut self, value: T) -> Result<WeakHandle> {
        if self.free_head == NO_INDEX {
            self.try_grow(1)?;
        }

        let index = self.free_head;
        let mut slot = self.buckets.slot(index);

        // SAFETY: Free slots are not referenced by anyone and we hold `&mut self`.
        let slot = unsafe { slot.as_mut() };

        // SAFETY: Dead slots store the link variant.
        self.free_head = unsafe { slot.storage.next_free };

        let generation = (slot.generation.wrapping_add(1) & GENERATION_MASK) | ALIVE_BIT;
        slot.generation = generation;
        slot.storage = SlotStorage {
            item: ManuallyDrop::new(value),
        };

        self.len = self.len.checked_add(1).expect("bounded by capacity");

        Ok(WeakHandle { index, generation })
    }

    /// Removes the item identified by `handle` and returns it, or `None` if the handle is stale.
    pub fn remove(&mut self, handle: WeakHandle) -> Option<T> {
        let mut slot = self.matching_slot(handle)?;

        // SAFETY: The generation matched, so the slot holds an item nobody else references.
        let slot = unsafe { slot.as_mut() };

        slot.generation &= GENERATION_MASK;

        let storage = mem::replace(
            &mut slot.storage,
            SlotStorage {
                next_free: self.free_head,
            },
        );
        self.free_head = handle.index;
        self.len = self.len.checked_sub(1).expect("a live item was just removed");

        // SAFETY: The generation matched, so the storage held the item variant.
        Some(ManuallyDrop::into_inner(unsafe { storage.item }))
    }

    /// Returns the item identified by `handle`, or `None` if the handle is stale.
    #[must_use]
    pub fn get(&self, handle: WeakHandle) -> Option<&T> {
        let slot = self.matching_slot(handle)?;

        // SAFETY: The generation matched, so the slot holds an item and we hold `&self`.
        let slot = unsafe { slot.as_ref() };
        // SAFETY: Alive slots store the item variant.
        let item: &T = unsafe { &slot.storage.item };

        Some(item)
    }

    /// Returns the item identified by `handle` for modification, or `None` if the handle is
    /// stale.
    #[must_use]
    pub fn get_mut(&mut self, handle: WeakHandle) -> Option<&mut T> {
        let mut slot = self.matching_slot(handle)?;

        // SAFETY: The generation matched, so the slot holds an item and we hold `&mut self`.
        let slot = unsafe { slot.as_mut() };
        // SAFETY: Alive slots store the item variant.
        let item: &mut T = unsafe { &mut slot.storage.item };

        Some(item)
    }

    /// Returns the item identified by `handle`, or `fallback` if the handle is stale.
    #[must_use]
    pub fn get_or<'s>(&'s self, handle: WeakHandle, fallback: &'s T) -> &'s T {
        self.get(handle).unwrap_or(fallback)
    }

    /// Whether `handle` still refers to its item.
    #[must_use]
    pub fn contains(&self, handle: WeakHandle) -> bool {
        self.matching_slot(handle).is_some()
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
    /// Returns [`Error::OutOfMemory`][alloc_kit::Error::OutOfMemory] if the allocator cannot
    /// provide the memory.
    pub fn try_reserve(&mut self, additional: usize) -> Result<()> {
        let free = self
            .capacity()
            .checked_sub(self.len)
            .expect("len never exceeds capacity");

        if let Some(missing) = additional.checked_sub(free).filter(|&missing| missing > 0) {
            self.try_grow(missing)?;
        }

        Ok(())
    }

    /// Iterates over the live items and their current handles, in index order.
    pub fn iter(&self) -> impl Iterator<Item = (WeakHandle, &T)> {
        (0..self.buckets.bucket_count()).flat_map(move |bucket| {
            let descriptor = self.buckets.bucket(bucket);

            (0..descriptor.len()).filter_map(move |item| {
                // SAFETY: Slots of existing buckets are initialized and we hold `&self`.
                let slot = unsafe { descriptor.slot(item).as_ref() };

                if slot.generation & ALIVE_BIT == 0 {
                    return None;
                }

                // SAFETY: Alive slots store the item variant.
                let value: &T = unsafe { &slot.storage.item };

                Some((
                    WeakHandle {
                        index: flat_index(bucket, item),
                        generation: slot.generation,
                    },
                    value,
                ))
            })
        })
    }

    /// Verifies that the slot generations, the free list and the item count agree.
    ///
    /// # Panics
    ///
    /// Panics if the internal bookkeeping is inconsistent.
    #[cfg_attr(test, mutants::skip)] // This is test logic, mutating it is not valuable.
    pub fn integrity_check(&self) {
        let alive = (0..self.buckets.bucket_count())
            .flat_map(|bucket| self.buckets.indexes_of(bucket))
            .filter(|&index| self.generation_at(index) & ALIVE_BIT != 0)
            .count();

        assert_eq!(
            alive,
            self.len,
            "alive slot count does not match len in weak bucket array of {}",
            type_name::<T>()
        );

        let mut free = 0_usize;
        let mut next = self.free_head;

        while next != NO_INDEX {
            assert!(
                self.buckets.locate(next).is_some(),
                "free list index {next} is out of bounds in weak bucket array of {}",
                type_name::<T>()
            );

            assert!(
                self.generation_at(next) & ALIVE_BIT == 0,
                "free list index {next} points to a live item in weak bucket array of {}",
                type_name::<T>()
            );

            free = free.checked_add(1).expect("bounded by capacity");
            assert!(
                free <= self.capacity(),
                "free list of weak bucket array of {} contains a cycle",
                type_name::<T>()
            );

            // SAFETY: Slots of existing buckets are initialized and we hold `&self`.
            let slot = unsafe { self.buckets.slot(next).as_ref() };
            // SAFETY: Dead slots store the link variant.
            next = unsafe { slot.storage.next_free };
        }

        assert_eq!(
            free.checked_add(self.len),
            Some(self.capacity()),
            "free slots and live items do not cover the capacity in weak bucket array of {}",
            type_name::<T>()
        );
    }

    fn try_grow(&mut self, min_items: usize) -> Result<()> {
        let added = self.buckets.try_grow(min_items)?;

        for bucket in added.rev() {
            for index in self.buckets.indexes_of(bucket).rev() {
                // SAFETY: The slot was just allocated, so nothing is stored there yet.
                unsafe {
                    self.buckets.slot(index).write(WeakSlot {
                        generation: 0,
                        storage: SlotStorage {
                            next_free: self.free_head,
                        },
                    });
                }

                self.free_head = index;
            }
        }

        Ok(())
    }

    /// The slot of `handle`, if its generation still matches.
    fn matching_slot(&self, handle: WeakHandle) -> Option<NonNull<WeakSlot<T>>> {
        self.buckets.locate(handle.index)?;

        (self.generation_at(handle.index) == handle.generation)
            .then(|| self.buckets.slot(handle.index))
    }

    fn generation_at(&self, index: u32) -> u32 {
        // SAFETY: Slots of existing buckets are initialized and we hold `&self`.
        unsafe { self.buckets.slot(index).as_ref() }.generation
    }
}

impl<T> fmt::Debug for WeakBucketArray<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakBucketArray")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("drop_policy", &self.drop_policy)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for WeakBucketArray<'_, T> {
    fn drop(&mut self) {
        let was_empty = self.is_empty();

        for bucket in (0..self.buckets.bucket_count()).rev() {
            for index in self.buckets.indexes_of(bucket).rev() {
                let mut slot = self.buckets.slot(index);

                // SAFETY: Slots of existing buckets are initialized and nobody references them.
                let slot = unsafe { slot.as_mut() };

                if slot.generation & ALIVE_BIT == 0 {
                    continue;
                }

                slot.generation &= GENERATION_MASK;

                // SAFETY: Alive slots store the item variant.
                let value = unsafe { &mut slot.storage.item };
                // SAFETY: Each alive item is dropped exactly once, here.
                unsafe {
                    ManuallyDrop::drop(value);
                }
            }
        }

        self.drop_policy.enforce::<T>("weak bucket array", was_empty);
    }
}
