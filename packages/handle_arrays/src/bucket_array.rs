use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use alloc_kit::{Allocator, OutOfMemoryHandler, Result};

use crate::raw_buckets::{NO_INDEX, RawBuckets, SlotStorage, flat_index};
use crate::{BucketArrayBuilder, DropPolicy};

/// One bit per slot of a bucket, set while the slot holds an item.
type AliveMask = [u64; 4];

/// Identifies an item in a [`BucketArray`].
///
/// The handle stays valid until the item is removed. Using it after that is a contract violation
/// that the array detects with a panic, though only until the slot is reused by a later insert.
/// Use [`WeakBucketArray`][crate::WeakBucketArray] when stale handles must be detected reliably.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Handle {
    index: u32,
}

impl Handle {
    /// The flat slot index of the item.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// A container of items addressed by [`Handle`], whose items never move in memory.
///
/// Items are stored in buckets of up to [`BUCKET_ITEMS`][crate::BUCKET_ITEMS] slots, carved out
/// of slabs requested from the allocator. Removed slots are reused by later inserts, lowest
/// freed index last.
///
/// # Examples
///
/// ```
/// use alloc_kit::SystemAllocator;
/// use handle_arrays::BucketArray;
///
/// let system = SystemAllocator::new();
/// let mut array = BucketArray::new(&system);
///
/// let first = array.insert(5);
/// let second = array.insert(6);
///
/// assert_eq!(array.remove(first), 5);
/// assert_eq!(*array.get(second), 6);
/// assert_eq!(array.len(), 1);
/// ```
pub struct BucketArray<'a, T> {
    buckets: RawBuckets<'a, SlotStorage<T>, AliveMask>,
    len: usize,

    /// Head of the free list threaded through dead slots, or `NO_INDEX` if every slot is alive.
    free_head: u32,

    drop_policy: DropPolicy,
    out_of_memory_handler: OutOfMemoryHandler,

    _items: PhantomData<T>,
}

impl<'a, T> BucketArray<'a, T> {
    /// Creates an empty array that takes its memory from `allocator`.
    ///
    /// Nothing is allocated until the first insert.
    #[must_use]
    pub fn new(allocator: &'a dyn Allocator) -> Self {
        Self::builder(allocator).build()
    }

    /// Starts building a new [`BucketArray`].
    pub fn builder(allocator: &'a dyn Allocator) -> BucketArrayBuilder<'a, T> {
        BucketArrayBuilder::new(allocator)
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

    /// Inserts an item, returning the handle that identifies it.
    ///
    /// # Panics
    ///
    /// Calls the out-of-memory handler if the array needs to grow and cannot.
    pub fn insert(&mut self, value: T) -> Handle {
        match self.try_insert(value) {
            Ok(handle) => handle,
            Err(error) => (self.out_of_memory_handler)(error),
        }
    }

    /// Inserts an item, returning the handle that identifies it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`][alloc_kit::Error::OutOfMemory] if the array needs to grow
    /// and the allocator cannot provide the memory. The item is dropped and the array is
    /// unchanged in that case.
    pub fn try_insert(&mut self, value: T) -> Result<Handle> {
        if self.free_head == NO_INDEX {
            self.try_grow(1)?;
        }

        let index = self.free_head;
        let slot = self.buckets.slot(index);

        // SAFETY: The slot is on the free list, so it holds a link and nobody references it.
        let storage = unsafe { slot.as_ref() };
        // SAFETY: Dead slots store the link variant.
        self.free_head = unsafe { storage.next_free };

        // SAFETY: The slot is dead, so there is no item to overwrite.
        unsafe {
            slot.write(SlotStorage {
                item: ManuallyDrop::new(value),
            });
        }

        self.set_alive(index, true);
        self.len = self.len.checked_add(1).expect("bounded by capacity");

        Ok(Handle { index })
    }

    /// Removes the item identified by `handle` and returns it.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not refer to a live item.
    pub fn remove(&mut self, handle: Handle) -> T {
        let slot = self.alive_slot(handle);
        self.set_alive(handle.index, false);

        // SAFETY: The slot was alive, so it holds an initialized item, which we move out.
        let storage = unsafe { slot.read() };
        // SAFETY: Alive slots store the item variant.
        let value = ManuallyDrop::into_inner(unsafe { storage.item });

        // SAFETY: The item was moved out above, so the slot is free to reuse as a link.
        unsafe {
            slot.write(SlotStorage {
                next_free: self.free_head,
            });
        }

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
    pub fn get(&self, handle: Handle) -> &T {
        let slot = self.alive_slot(handle);

        // SAFETY: Alive slots hold an initialized item and we hold `&self`.
        let storage = unsafe { slot.as_ref() };
        // SAFETY: Alive slots store the item variant.
        unsafe { &storage.item }
    }

    /// Returns the item identified by `handle` for modification.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not refer to a live item.
    #[must_use]
    pub fn get_mut(&mut self, handle: Handle) -> &mut T {
        let mut slot = self.alive_slot(handle);

        // SAFETY: Alive slots hold an initialized item and we hold `&mut self`.
        let storage = unsafe { slot.as_mut() };
        // SAFETY: Alive slots store the item variant.
        unsafe { &mut storage.item }
    }

    /// Whether `handle` refers to a live item.
    ///
    /// A handle whose item was removed reports `false` until the slot is reused.
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.buckets
            .locate(handle.index)
            .is_some_and(|(bucket, item)| is_alive(&self.buckets.bucket(bucket).meta, item))
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

    /// Iterates over the live items and their handles, in handle index order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        (0..self.buckets.bucket_count()).flat_map(move |bucket| {
            let descriptor = self.buckets.bucket(bucket);

            (0..descriptor.len())
                .filter(move |&item| is_alive(&descriptor.meta, item))
                .map(move |item| {
                    let slot = descriptor.slot(item);

                    // SAFETY: Alive slots hold an initialized item and we hold `&self`.
                    let storage = unsafe { slot.as_ref() };
                    // SAFETY: Alive slots store the item variant.
                    let value: &T = unsafe { &storage.item };

                    (
                        Handle {
                            index: flat_index(bucket, item),
                        },
                        value,
                    )
                })
        })
    }

    /// Verifies that the alive masks, the free list and the item count agree.
    ///
    /// # Panics
    ///
    /// Panics if the internal bookkeeping is inconsistent.
    #[cfg_attr(test, mutants::skip)] // This is test logic, mutating it is not valuable.
    pub fn integrity_check(&self) {
        let alive: usize = (0..self.buckets.bucket_count())
            .flat_map(|bucket| self.buckets.bucket(bucket).meta)
            .map(|word| usize::try_from(word.count_ones()).expect("at most 64"))
            .sum();

        assert_eq!(
            alive,
            self.len,
            "alive mask count does not match len in bucket array of {}",
            type_name::<T>()
        );

        let mut free = 0_usize;
        let mut next = self.free_head;

        while next != NO_INDEX {
            let (bucket, item) = self.buckets.locate(next).unwrap_or_else(|| {
                panic!(
                    "free list index {next} is out of bounds in bucket array of {}",
                    type_name::<T>()
                )
            });

            assert!(
                !is_alive(&self.buckets.bucket(bucket).meta, item),
                "free list index {next} points to a live item in bucket array of {}",
                type_name::<T>()
            );

            free = free.checked_add(1).expect("bounded by capacity");
            assert!(
                free <= self.capacity(),
                "free list of bucket array of {} contains a cycle",
                type_name::<T>()
            );

            // SAFETY: Dead slots hold a link and we hold `&self`.
            let storage = unsafe { self.buckets.slot(next).as_ref() };
            // SAFETY: Dead slots store the link variant.
            next = unsafe { storage.next_free };
        }

        assert_eq!(
            free.checked_add(self.len),
            Some(self.capacity()),
            "free slots and live items do not cover the capacity in bucket array of {}",
            type_name::<T>()
        );
    }

    /// Adds at least `min_items` slots and puts them at the head of the free list, lowest index
    /// first.
    fn try_grow(&mut self, min_items: usize) -> Result<()> {
        let added = self.buckets.try_grow(min_items)?;

        for bucket in added.rev() {
            for index in self.buckets.indexes_of(bucket).rev() {
                // SAFETY: The slot was just allocated, so nothing is stored there yet.
                unsafe {
                    self.buckets.slot(index).write(SlotStorage {
                        next_free: self.free_head,
                    });
                }

                self.free_head = index;
            }
        }

        Ok(())
    }

    fn alive_slot(&self, handle: Handle) -> NonNull<SlotStorage<T>> {
        let (bucket, item) = self
            .buckets
            .locate(handle.index)
            .filter(|&(bucket, item)| is_alive(&self.buckets.bucket(bucket).meta, item))
            .unwrap_or_else(|| {
                panic!(
                    "handle {} does not refer to a live item in bucket array of {}",
                    handle.index,
                    type_name::<T>()
                )
            });

        self.buckets.bucket(bucket).slot(item)
    }

    fn set_alive(&mut self, index: u32, alive: bool) {
        let (bucket, item) = self
            .buckets
            .locate(index)
            .expect("only called with indexes of existing slots");

        let word = self
            .buckets
            .bucket_mut(bucket)
            .meta
            .get_mut(item >> 6)
            .expect("a bucket has no more items than its mask has bits");
        let bit = 1_u64 << (item & 63);

        if alive {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }
}

fn is_alive(mask: &AliveMask, item: usize) -> bool {
    mask.get(item >> 6)
        .is_some_and(|word| word & (1_u64 << (item & 63)) != 0)
}

impl<T> fmt::Debug for BucketArray<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketArray")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("drop_policy", &self.drop_policy)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for BucketArray<'_, T> {
    fn drop(&mut self) {
        let was_empty = self.is_empty();

        for bucket in (0..self.buckets.bucket_count()).rev() {
            let descriptor = self.buckets.bucket(bucket);

            for item in (0..descriptor.len()).rev() {
                if !is_alive(&descriptor.meta, item) {
                    continue;
                }

                let mut slot = descriptor.slot(item);

                // SAFETY: Alive slots hold an initialized item and nobody can reference it now.
                let storage = unsafe { slot.as_mut() };
                // SAFETY: Alive slots store the item variant.
                let value = unsafe { &mut storage.item };
                // SAFETY: Each alive item is dropped exactly once, here.
                unsafe {
                    ManuallyDrop::drop(value);
                }
            }
        }

        // The slabs themselves are released when `buckets` is dropped after us.
        self.drop_policy.enforce::<T>("bucket array", was_empty);
    }
}
