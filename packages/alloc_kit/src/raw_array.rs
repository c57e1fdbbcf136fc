use std::alloc::Layout;
use std::any::type_name;
use std::fmt;
use std::ptr::NonNull;

use tracing::trace;

use crate::{Allocator, Error, Result};

/// Uninitialized, fixed-capacity storage for `T` values obtained from an [`Allocator`].
///
/// The array does not know which of its slots are initialized. Owners track that themselves and
/// must drop any live values before the array is released. Dropping the array only returns the
/// memory to the allocator.
///
/// Zero-sized types never allocate and report a capacity of `usize::MAX`.
pub struct RawArray<'a, T> {
    ptr: NonNull<T>,
    capacity: usize,
    allocator: &'a dyn Allocator,
}

impl<'a, T> RawArray<'a, T> {
    /// Creates an empty array that will obtain memory from `allocator` when grown.
    #[must_use]
    pub fn new(allocator: &'a dyn Allocator) -> Self {
        Self {
            ptr: NonNull::dangling(),
            capacity: if size_of::<T>() == 0 { usize::MAX } else { 0 },
            allocator,
        }
    }

    /// Creates an array with room for at least `capacity` values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the allocator cannot provide the memory.
    pub fn try_with_capacity(allocator: &'a dyn Allocator, capacity: usize) -> Result<Self> {
        let mut array = Self::new(allocator);
        array.try_grow(capacity, 0)?;
        Ok(array)
    }

    /// The allocator this array obtains memory from.
    #[must_use]
    pub fn allocator(&self) -> &'a dyn Allocator {
        self.allocator
    }

    /// Number of values the array can hold without growing.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pointer to the first slot. Dangling if the capacity is zero.
    #[must_use]
    pub fn as_ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// Pointer to the slot at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not less than the capacity.
    #[must_use]
    pub fn slot(&self, index: usize) -> NonNull<T> {
        assert!(
            index < self.capacity,
            "slot {index} out of bounds of raw array with capacity {}",
            self.capacity
        );

        // SAFETY: The index is within the allocation, as verified above.
        unsafe { self.ptr.add(index) }
    }

    /// Grows the capacity to at least `new_capacity`, preserving the first `preserve` values.
    ///
    /// The allocator is first asked to resize in place. If it cannot, a new block is allocated,
    /// the preserved values are moved over bitwise and the old block is returned.
    ///
    /// Does nothing if the capacity is already sufficient.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the allocator cannot provide the memory. The array is
    /// unchanged in that case.
    ///
    /// # Panics
    ///
    /// Panics if `preserve` exceeds the current capacity.
    pub fn try_grow(&mut self, new_capacity: usize, preserve: usize) -> Result<()> {
        assert!(
            preserve <= self.capacity,
            "cannot preserve {preserve} values of a raw array with capacity {}",
            self.capacity
        );

        if new_capacity <= self.capacity {
            return Ok(());
        }

        let new_layout = Layout::array::<T>(new_capacity)
            .map_err(|_| Error::OutOfMemory {
                size: usize::MAX,
                align: align_of::<T>(),
            })?;

        if let Some(old_layout) = self.layout() {
            // SAFETY: The block was allocated by this allocator with `old_layout` and we stop
            // using the old pointer if the resize succeeds.
            if let Ok(memory) = unsafe {
                self.allocator
                    .resize(self.ptr.cast(), old_layout, new_layout.size())
            } {
                self.ptr = memory.cast();
                self.capacity = new_capacity;
                return Ok(());
            }
        }

        let memory = self.allocator.allocate(new_layout)?.cast::<T>();

        if let Some(old_layout) = self.layout() {
            // SAFETY: Both blocks are valid for `preserve` values and are distinct allocations.
            unsafe {
                memory.copy_from_nonoverlapping(self.ptr, preserve);
            }

            // SAFETY: The old block came from this allocator with this layout and its contents
            // were moved out above.
            unsafe {
                self.allocator.deallocate(self.ptr.cast(), old_layout);
            }
        }

        trace!(
            old_capacity = self.capacity,
            new_capacity,
            "raw array moved to a larger block"
        );

        self.ptr = memory;
        self.capacity = new_capacity;
        Ok(())
    }

    /// Returns the memory to the allocator, leaving an empty array.
    ///
    /// Any values still in the array are forgotten without being dropped.
    pub fn release(&mut self) {
        if let Some(layout) = self.layout() {
            // SAFETY: The block came from this allocator with this layout and the array forgets
            // about it immediately after.
            unsafe {
                self.allocator.deallocate(self.ptr.cast(), layout);
            }
        }

        self.ptr = NonNull::dangling();
        if size_of::<T>() != 0 {
            self.capacity = 0;
        }
    }

    /// The layout of the current allocation, if there is one.
    fn layout(&self) -> Option<Layout> {
        if size_of::<T>() == 0 || self.capacity == 0 {
            return None;
        }

        Some(
            Layout::array::<T>(self.capacity)
                .expect("layout was valid when the block was allocated"),
        )
    }
}

impl<T> fmt::Debug for RawArray<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawArray")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("ptr", &self.ptr)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for RawArray<'_, T> {
    fn drop(&mut self) {
        self.release();
    }
}
