use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use alloc_kit::{Allocator, OutOfMemoryHandler, Result, default_out_of_memory_handler};

use crate::{DEFAULT_SEED, FoldKeyHasher, JumpTable, KeyHasher};

/// Builder for creating an instance of [`JumpTable`].
///
/// You only need to use this builder if you want to customize the table configuration.
/// The default configuration used by [`JumpTable::new()`][1] is sufficient for most use cases.
///
/// # Examples
///
/// ```
/// use alloc_kit::SystemAllocator;
/// use jump_table::JumpTable;
///
/// let system = SystemAllocator::new();
/// let table = JumpTable::<u64, String>::builder(&system)
///     .seed(42)
///     .load_ratio(1, 2)
///     .capacity(100)
///     .build();
///
/// assert!(table.capacity() >= 100);
/// assert_eq!(table.seed(), 42);
/// ```
///
/// [1]: JumpTable::new
#[must_use]
pub struct JumpTableBuilder<'a, K, V, H = FoldKeyHasher> {
    allocator: &'a dyn Allocator,
    seed: u64,
    load_ratio: (usize, usize),
    capacity: usize,
    hasher: H,
    out_of_memory_handler: OutOfMemoryHandler,

    _entries: PhantomData<(K, V)>,
}

impl<K, V, H> fmt::Debug for JumpTableBuilder<'_, K, V, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JumpTableBuilder")
            .field("key_type", &format_args!("{}", type_name::<K>()))
            .field("value_type", &format_args!("{}", type_name::<V>()))
            .field("hasher_type", &format_args!("{}", type_name::<H>()))
            .field("seed", &self.seed)
            .field("load_ratio", &self.load_ratio)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<'a, K, V> JumpTableBuilder<'a, K, V> {
    pub(crate) fn new(allocator: &'a dyn Allocator) -> Self {
        Self {
            allocator,
            seed: DEFAULT_SEED,
            load_ratio: (1, 4),
            capacity: 0,
            hasher: FoldKeyHasher,
            out_of_memory_handler: default_out_of_memory_handler,
            _entries: PhantomData,
        }
    }
}

impl<'a, K, V, H> JumpTableBuilder<'a, K, V, H>
where
    H: KeyHasher<K>,
{
    /// Sets the seed mixed into every hash. Defaults to [`DEFAULT_SEED`].
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the load ratio `num / den` that decides when the linker table is rebuilt.
    ///
    /// The table rehashes before an insertion whenever
    /// `(linker_len - gravestones) * num <= len * den`. The default of 1/4 keeps the linker table
    /// more than four times as long as the entry count.
    ///
    /// # Panics
    ///
    /// Panics if either part of the ratio is zero.
    pub fn load_ratio(mut self, num: usize, den: usize) -> Self {
        assert!(
            num > 0 && den > 0,
            "load ratio {num}/{den} must have non-zero numerator and denominator"
        );

        self.load_ratio = (num, den);
        self
    }

    /// Sets the number of entries to reserve room for when the table is built.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the handler called when a growth operation without a `try_` prefix runs out of memory.
    pub fn out_of_memory_handler(mut self, handler: OutOfMemoryHandler) -> Self {
        self.out_of_memory_handler = handler;
        self
    }

    /// Replaces the key hasher.
    ///
    /// # Examples
    ///
    /// ```
    /// use alloc_kit::SystemAllocator;
    /// use jump_table::{JumpTable, KeyHasher};
    ///
    /// /// Compares keys case-insensitively.
    /// struct CaseInsensitive;
    ///
    /// impl KeyHasher<String> for CaseInsensitive {
    ///     fn hash(&self, key: &String, seed: u64) -> u64 {
    ///         key.bytes()
    ///             .fold(seed, |h, b| h.rotate_left(5) ^ u64::from(b.to_ascii_lowercase()))
    ///     }
    ///
    ///     fn equals(&self, a: &String, b: &String) -> bool {
    ///         a.eq_ignore_ascii_case(b)
    ///     }
    /// }
    ///
    /// let system = SystemAllocator::new();
    /// let mut table = JumpTable::<String, u32>::builder(&system)
    ///     .hasher(CaseInsensitive)
    ///     .build();
    ///
    /// table.set("Hello".to_string(), 1);
    /// assert_eq!(table.get(&"HELLO".to_string()), Some(&1));
    /// ```
    pub fn hasher<H2>(self, hasher: H2) -> JumpTableBuilder<'a, K, V, H2>
    where
        H2: KeyHasher<K>,
    {
        JumpTableBuilder {
            allocator: self.allocator,
            seed: self.seed,
            load_ratio: self.load_ratio,
            capacity: self.capacity,
            hasher,
            out_of_memory_handler: self.out_of_memory_handler,
            _entries: PhantomData,
        }
    }

    /// Builds the table with the specified configuration.
    ///
    /// # Panics
    ///
    /// Calls the out-of-memory handler if the initial capacity cannot be allocated.
    #[must_use]
    pub fn build(self) -> JumpTable<'a, K, V, H> {
        let handler = self.out_of_memory_handler;

        match self.try_build() {
            Ok(table) => table,
            Err(error) => handler(error),
        }
    }

    /// Builds the table with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`][alloc_kit::Error::OutOfMemory] if the initial capacity
    /// cannot be allocated.
    pub fn try_build(self) -> Result<JumpTable<'a, K, V, H>> {
        let mut table = JumpTable::new_inner(
            self.allocator,
            self.seed,
            self.load_ratio,
            self.hasher,
            self.out_of_memory_handler,
        );

        if self.capacity > 0 {
            table.try_reserve(self.capacity)?;
        }

        Ok(table)
    }
}
