use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use alloc_kit::{Allocator, OutOfMemoryHandler, Result, default_out_of_memory_handler};

use crate::{BucketArray, DropPolicy, SlotArray, WeakBucketArray};

/// Builder for creating an instance of [`BucketArray`].
///
/// # Examples
///
/// ```
/// use alloc_kit::SystemAllocator;
/// use handle_arrays::{BucketArray, DropPolicy};
///
/// let system = SystemAllocator::new();
/// let array = BucketArray::<u64>::builder(&system)
///     .capacity(1000)
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
///
/// assert!(array.capacity() >= 1000);
/// ```
#[must_use]
pub struct BucketArrayBuilder<'a, T> {
    options: Options<'a>,

    _items: PhantomData<T>,
}

/// Builder for creating an instance of [`WeakBucketArray`].
///
/// # Examples
///
/// ```
/// use alloc_kit::SystemAllocator;
/// use handle_arrays::WeakBucketArray;
///
/// let system = SystemAllocator::new();
/// let array = WeakBucketArray::<String>::builder(&system)
///     .capacity(10)
///     .build();
///
/// assert!(array.capacity() >= 10);
/// ```
#[must_use]
pub struct WeakBucketArrayBuilder<'a, T> {
    options: Options<'a>,

    _items: PhantomData<T>,
}

/// Builder for creating an instance of [`SlotArray`].
///
/// # Examples
///
/// ```
/// use alloc_kit::SystemAllocator;
/// use handle_arrays::SlotArray;
///
/// let system = SystemAllocator::new();
/// let array = SlotArray::<u32>::builder(&system).capacity(100).build();
///
/// assert!(array.capacity() >= 100);
/// ```
#[must_use]
pub struct SlotArrayBuilder<'a, T> {
    options: Options<'a>,

    _items: PhantomData<T>,
}

/// Settings shared by all container builders.
struct Options<'a> {
    allocator: &'a dyn Allocator,
    capacity: usize,
    drop_policy: DropPolicy,
    out_of_memory_handler: OutOfMemoryHandler,
}

impl<'a> Options<'a> {
    fn new(allocator: &'a dyn Allocator) -> Self {
        Self {
            allocator,
            capacity: 0,
            drop_policy: DropPolicy::default(),
            out_of_memory_handler: default_out_of_memory_handler,
        }
    }

    fn debug_fields<'f, 'x, 'y>(
        &self,
        builder: &'f mut fmt::DebugStruct<'x, 'y>,
        item_type: &str,
    ) -> &'f mut fmt::DebugStruct<'x, 'y> {
        builder
            .field("item_type", &format_args!("{item_type}"))
            .field("capacity", &self.capacity)
            .field("drop_policy", &self.drop_policy)
    }
}

impl<T> fmt::Debug for BucketArrayBuilder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.options
            .debug_fields(&mut f.debug_struct("BucketArrayBuilder"), type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Debug for WeakBucketArrayBuilder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.options
            .debug_fields(&mut f.debug_struct("WeakBucketArrayBuilder"), type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Debug for SlotArrayBuilder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.options
            .debug_fields(&mut f.debug_struct("SlotArrayBuilder"), type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<'a, T> BucketArrayBuilder<'a, T> {
    pub(crate) fn new(allocator: &'a dyn Allocator) -> Self {
        Self {
            options: Options::new(allocator),
            _items: PhantomData,
        }
    }

    /// Sets the number of items to reserve room for when the array is built.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.options.capacity = capacity;
        self
    }

    /// Defines how to treat items still in the array when it is dropped.
    ///
    /// By default, remaining items are dropped together with the array.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.options.drop_policy = policy;
        self
    }

    /// Sets the handler called when a growth operation without a `try_` prefix runs out of memory.
    pub fn out_of_memory_handler(mut self, handler: OutOfMemoryHandler) -> Self {
        self.options.out_of_memory_handler = handler;
        self
    }

    /// Builds the array with the specified configuration.
    ///
    /// # Panics
    ///
    /// Calls the out-of-memory handler if the initial capacity cannot be allocated.
    #[must_use]
    pub fn build(self) -> BucketArray<'a, T> {
        let handler = self.options.out_of_memory_handler;

        match self.try_build() {
            Ok(array) => array,
            Err(error) => handler(error),
        }
    }

    /// Builds the array with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`][alloc_kit::Error::OutOfMemory] if the initial capacity
    /// cannot be allocated.
    pub fn try_build(self) -> Result<BucketArray<'a, T>> {
        let mut array = BucketArray::new_inner(
            self.options.allocator,
            self.options.drop_policy,
            self.options.out_of_memory_handler,
        );

        if self.options.capacity > 0 {
            array.try_reserve(self.options.capacity)?;
        }

        Ok(array)
    }
}

impl<'a, T> WeakBucketArrayBuilder<'a, T> {
    pub(crate) fn new(allocator: &'a dyn Allocator) -> Self {
        Self {
            options: Options::new(allocator),
            _items: PhantomData,
        }
    }

    /// Sets the number of items to reserve room for when the array is built.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.options.capacity = capacity;
        self
    }

    /// Defines how to treat items still in the array when it is dropped.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.options.drop_policy = policy;
        self
    }

    /// Sets the handler called when a growth operation without a `try_` prefix runs out of memory.
    pub fn out_of_memory_handler(mut self, handler: OutOfMemoryHandler) -> Self {
        self.options.out_of_memory_handler = handler;
        self
    }

    /// Builds the array with the specified configuration.
    ///
    /// # Panics
    ///
    /// Calls the out-of-memory handler if the initial capacity cannot be allocated.
    #[must_use]
    pub fn build(self) -> WeakBucketArray<'a, T> {
        let handler = self.options.out_of_memory_handler;

        match self.try_build() {
            Ok(array) => array,
            Err(error) => handler(error),
        }
    }

    /// Builds the array with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`][alloc_kit::Error::OutOfMemory] if the initial capacity
    /// cannot be allocated.
    pub fn try_build(self) -> Result<WeakBucketArray<'a, T>> {
        let mut array = WeakBucketArray::new_inner(
            self.options.allocator,
            self.options.drop_policy,
            self.options.out_of_memory_handler,
        );

        if self.options.capacity > 0 {
            array.try_reserve(self.options.capacity)?;
        }

        Ok(array)
    }
}

impl<'a, T> SlotArrayBuilder<'a, T> {
    pub(crate) fn new(allocator: &'a dyn Allocator) -> Self {
        Self {
            options: Options::new(allocator),
            _items: PhantomData,
        }
    }

    /// Sets the number of items to reserve room for when the array is built.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.options.capacity = capacity;
        self
    }

    /// Defines how to treat items still in the array when it is dropped.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.options.drop_policy = policy;
        self
    }

    /// Sets the handler called when a growth operation without a `try_` prefix runs out of memory.
    pub fn out_of_memory_handler(mut self, handler: OutOfMemoryHandler) -> Self {
        self.options.out_of_memory_handler = handler;
        self
    }

    /// Builds the array with the specified configuration.
    ///
    /// # Panics
    ///
    /// Calls the out-of-memory handler if the initial capacity cannot be allocated.
    #[must_use]
    pub fn build(self) -> SlotArray<'a, T> {
        let handler = self.options.out_of_memory_handler;

        match self.try_build() {
            Ok(array) => array,
            Err(error) => handler(error),
        }
    }

    /// Builds the array with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`][alloc_kit::Error::OutOfMemory] if the initial capacity
    /// cannot be allocated.
    pub fn try_build(self) -> Result<SlotArray<'a, T>> {
        let mut array = SlotArray::new_inner(
            self.options.allocator,
            self.options.drop_policy,
            self.options.out_of_memory_handler,
        );

        if self.options.capacity > 0 {
            array.try_reserve(self.options.capacity)?;
        }

        Ok(array)
    }
}
