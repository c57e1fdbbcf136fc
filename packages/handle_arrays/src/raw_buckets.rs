use std::alloc::Layout;
use std::any::type_name;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Range;
use std::ptr::NonNull;

use alloc_kit::{Allocator, Error, RawArray, Result, align_up};
use tracing::debug;

/// Number of items in a full bucket. A handle index decomposes into
/// `(index / BUCKET_ITEMS, index % BUCKET_ITEMS)`.
pub const BUCKET_ITEMS: usize = 256;

const BUCKET_SHIFT: u32 = BUCKET_ITEMS.trailing_zeros();
const ITEM_MASK: u32 = 0xFF;

/// Item slabs are requested from the allocator in multiples of this many bytes.
pub const BUCKET_GRANULARITY: usize = 16 * 1024;

/// Every growth adds room for at least this many items.
pub const LEAST_ITEMS_COUNT: usize = 64;

/// Initial number of bucket descriptors. The descriptor array doubles from here.
pub const LEAST_BUCKETS_COUNT: usize = 8;

/// Marks the end of a free list.
pub(crate) const NO_INDEX: u32 = u32::MAX;

/// Storage for one item: the item itself while alive, the next free index while dead.
///
/// Which field is active is tracked outside the slot, in the bucket alive mask or the slot
/// generation. The union is never smaller than a `u32`, so any item type can hold a link.
pub(crate) union SlotStorage<T> {
    pub(crate) item: ManuallyDrop<T>,
    pub(crate) next_free: u32,
}

/// A run of up to `BUCKET_ITEMS` consecutive slots inside a slab.
pub(crate) struct Bucket<S, M> {
    items: NonNull<S>,
    len: usize,

    /// Size of the slab this bucket starts, or zero if the slab is owned by an earlier bucket.
    slab_bytes: usize,

    /// Per-bucket bookkeeping of the container, such as an alive mask.
    pub(crate) meta: M,
}

impl<S, M> Bucket<S, M> {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Pointer to the slot at `item`.
    ///
    /// # Panics
    ///
    /// Panics if `item` is not within the bucket.
    pub(crate) fn slot(&self, item: usize) -> NonNull<S> {
        assert!(
            item < self.len,
            "item {item} out of bounds of bucket with {} items",
            self.len
        );

        // SAFETY: In bounds of the bucket, which lies within one live slab.
        unsafe { self.items.add(item) }
    }
}

/// Pointer-stable slot storage shared by the bucket array family.
///
/// Slots live in slabs that are never moved or freed until the storage is dropped. Each slab is
/// cut into buckets of `BUCKET_ITEMS` slots (the last one possibly shorter), so that a flat
/// `u32` index always maps to the same slot.
///
/// The storage does not know which slots are initialized. The owning container must drop any
/// live items before the storage is dropped.
pub(crate) struct RawBuckets<'a, S, M> {
    allocator: &'a dyn Allocator,
    descriptors: RawArray<'a, Bucket<S, M>>,
    bucket_count: usize,

    /// Total number of slots across all buckets.
    capacity: usize,
}

impl<'a, S, M> RawBuckets<'a, S, M>
where
    M: Default,
{
    pub(crate) fn new(allocator: &'a dyn Allocator) -> Self {
        Self {
            allocator,
            descriptors: RawArray::new(allocator),
            bucket_count: 0,
            capacity: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    pub(crate) fn bucket(&self, bucket: usize) -> &Bucket<S, M> {
        assert!(
            bucket < self.bucket_count,
            "bucket {bucket} out of bounds of {} buckets",
            self.bucket_count
        );

        // SAFETY: Descriptors below `bucket_count` are initialized.
        unsafe { self.descriptors.slot(bucket).as_ref() }
    }

    pub(crate) fn bucket_mut(&mut self, bucket: usize) -> &mut Bucket<S, M> {
        assert!(
            bucket < self.bucket_count,
            "bucket {bucket} out of bounds of {} buckets",
            self.bucket_count
        );

        // SAFETY: Descriptors below `bucket_count` are initialized and we hold `&mut self`.
        unsafe { self.descriptors.slot(bucket).as_mut() }
    }

    /// Decomposes a flat index into `(bucket, item)`, if it lands on an existing slot.
    pub(crate) fn locate(&self, index: u32) -> Option<(usize, usize)> {
        let bucket = usize::try_from(index >> BUCKET_SHIFT).ok()?;
        let item = usize::try_from(index & ITEM_MASK).ok()?;

        (bucket < self.bucket_count && item < self.bucket(bucket).len()).then_some((bucket, item))
    }

    /// Pointer to the slot at a flat index.
    ///
    /// # Panics
    ///
    /// Panics if the index does not land on an existing slot.
    pub(crate) fn slot(&self, index: u32) -> NonNull<S> {
        let (bucket, item) = self.locate(index).unwrap_or_else(|| {
            panic!(
                "index {index} does not refer to a slot of storage for {}",
                type_name::<S>()
            )
        });

        self.bucket(bucket).slot(item)
    }

    /// Flat indexes of every slot in a bucket, in order.
    pub(crate) fn indexes_of(&self, bucket: usize) -> impl DoubleEndedIterator<Item = u32> + use<S, M> {
        let len = self.bucket(bucket).len();

        (0..len).map(move |item| flat_index(bucket, item))
    }

    /// Adds buckets holding at least `min_items` new slots, returning the range of new bucket
    /// indexes. The new slots are uninitialized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the allocator cannot provide the memory, or if the new
    /// slots would not be addressable by a `u32` index. The storage is unchanged in that case.
    pub(crate) fn try_grow(&mut self, min_items: usize) -> Result<Range<usize>> {
        let item_size = size_of::<S>();
        let wanted = min_items.max(LEAST_ITEMS_COUNT);

        let too_large = Error::OutOfMemory {
            size: usize::MAX,
            align: align_of::<S>(),
        };

        let slab_bytes = wanted
            .checked_mul(item_size)
            .and_then(|bytes| align_up(bytes, BUCKET_GRANULARITY))
            .ok_or(too_large)?;
        let items = slab_bytes.checked_div(item_size).ok_or(too_large)?;
        let new_buckets = items.div_ceil(BUCKET_ITEMS);

        let bucket_count = self
            .bucket_count
            .checked_add(new_buckets)
            .filter(|count| {
                count
                    .checked_mul(BUCKET_ITEMS)
                    .and_then(|slots| u32::try_from(slots).ok())
                    .is_some_and(|slots| slots < NO_INDEX)
            })
            .ok_or(too_large)?;

        let layout =
            Layout::from_size_align(slab_bytes, align_of::<S>()).map_err(|_| too_large)?;
        let slab = self.allocator.allocate(layout)?.cast::<S>();

        if bucket_count > self.descriptors.capacity() {
            let grown = self
                .descriptors
                .capacity()
                .saturating_mul(2)
                .max(LEAST_BUCKETS_COUNT)
                .max(bucket_count);

            if let Err(error) = self.descriptors.try_grow(grown, self.bucket_count) {
                // SAFETY: Allocated above with this layout and not handed out to anyone.
                unsafe {
                    self.allocator.deallocate(slab.cast(), layout);
                }

                return Err(error);
            }
        }

        for offset in 0..new_buckets {
            let first_item = offset
                .checked_mul(BUCKET_ITEMS)
                .expect("bounded by the slab item count");

            let descriptor = Bucket {
                // SAFETY: `first_item < items`, so this stays within the slab.
                items: unsafe { slab.add(first_item) },
                len: items.saturating_sub(first_item).min(BUCKET_ITEMS),
                slab_bytes: if offset == 0 { slab_bytes } else { 0 },
                meta: M::default(),
            };

            let bucket = self
                .bucket_count
                .checked_add(offset)
                .expect("bounded by the new bucket count");

            // SAFETY: Within the descriptor capacity ensured above and not yet initialized.
            unsafe {
                self.descriptors.slot(bucket).write(descriptor);
            }
        }

        let new_range = self.bucket_count..bucket_count;

        self.bucket_count = bucket_count;
        self.capacity = self
            .capacity
            .checked_add(items)
            .expect("bounded by the u32 index space");

        debug!(
            slab_bytes,
            items,
            buckets = new_buckets,
            capacity = self.capacity,
            slot_type = type_name::<S>(),
            "bucket storage grew"
        );

        Ok(new_range)
    }
}

/// Combines a bucket and an item within it into a flat index.
pub(crate) fn flat_index(bucket: usize, item: usize) -> u32 {
    bucket
        .checked_mul(BUCKET_ITEMS)
        .and_then(|base| base.checked_add(item))
        .and_then(|index| u32::try_from(index).ok())
        .expect("storage never grows beyond the u32 index space")
}

impl<S, M> fmt::Debug for RawBuckets<'_, S, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBuckets")
            .field("slot_type", &format_args!("{}", type_name::<S>()))
            .field("bucket_count", &self.bucket_count)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<S, M> Drop for RawBuckets<'_, S, M> {
    fn drop(&mut self) {
        // Back to front, so that slabs are returned in the reverse order they were obtained.
        for bucket in (0..self.bucket_count).rev() {
            // SAFETY: Descriptors below `bucket_count` are initialized.
            let descriptor = unsafe { self.descriptors.slot(bucket).as_ref() };

            if descriptor.slab_bytes == 0 {
                continue;
            }

            let layout = Layout::from_size_align(descriptor.slab_bytes, align_of::<S>())
                .expect("layout was valid when the slab was allocated");

            // SAFETY: The first bucket of a slab holds the slab's base pointer and the layout it
            // was allocated with. Items were dropped by the owning container already.
            unsafe {
                self.allocator.deallocate(descriptor.items.cast(), layout);
            }
        }

        self.bucket_count = 0;
        self.capacity = 0;
    }
}
