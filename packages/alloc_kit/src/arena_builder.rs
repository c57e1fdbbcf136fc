use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::arena::{BLOCK_ALIGN, init_block};
use crate::{Allocator, ArenaAllocator, LeakPolicy, align_up, double_chunk_size};

/// Builder for creating an instance of [`ArenaAllocator`].
///
/// You only need to use this builder if you want to customize the arena configuration.
/// The default configuration used by [`ArenaAllocator::new()`][1] is sufficient for most use
/// cases.
///
/// # Examples
///
/// ```
/// use alloc_kit::{ArenaAllocator, SystemAllocator};
///
/// let system = SystemAllocator::new();
/// let arena = ArenaAllocator::builder(&system)
///     .chunk_size(4096)
///     .growth(|size| size + 4096)
///     .build();
///
/// assert_eq!(arena.chunk_size(), 4096);
/// ```
///
/// [1]: ArenaAllocator::new
#[must_use]
pub struct ArenaAllocatorBuilder<'p> {
    parent: &'p dyn Allocator,
    chunk_size: usize,
    growth: fn(usize) -> usize,
    leak_policy: LeakPolicy,
    external_blocks: Vec<NonNull<()>>,
}

impl fmt::Debug for ArenaAllocatorBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaAllocatorBuilder")
            .field("chunk_size", &self.chunk_size)
            .field("leak_policy", &self.leak_policy)
            .field("external_blocks", &self.external_blocks.len())
            .finish_non_exhaustive()
    }
}

impl<'p> ArenaAllocatorBuilder<'p> {
    pub(crate) fn new(parent: &'p dyn Allocator) -> Self {
        Self {
            parent,
            chunk_size: ArenaAllocator::DEFAULT_CHUNK_SIZE,
            growth: double_chunk_size,
            leak_policy: LeakPolicy::default(),
            external_blocks: Vec::new(),
        }
    }

    /// Sets the size of the first block the arena requests from its parent.
    ///
    /// Requests larger than the chunk size still succeed - they get a block of their own.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the function that calculates the next chunk size every time the arena obtains a new
    /// block from its parent. The result is capped at [`max_chunk_size()`][crate::max_chunk_size].
    ///
    /// Defaults to [`double_chunk_size()`][crate::double_chunk_size].
    pub fn growth(mut self, growth: fn(usize) -> usize) -> Self {
        self.growth = growth;
        self
    }

    /// Sets the [leak policy][LeakPolicy] checked when the arena is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use alloc_kit::{ArenaAllocator, LeakPolicy, SystemAllocator};
    ///
    /// let system = SystemAllocator::new();
    /// let arena = ArenaAllocator::builder(&system)
    ///     .leak_policy(LeakPolicy::MustNotLeak)
    ///     .build();
    /// ```
    pub fn leak_policy(mut self, policy: LeakPolicy) -> Self {
        self.leak_policy = policy;
        self
    }

    /// Supplies a block of caller-owned memory for the arena to allocate from before it asks the
    /// parent for more. The arena never frees such blocks.
    ///
    /// Blocks are used in the order they are added. A buffer too small to hold any data after
    /// alignment is ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::mem::MaybeUninit;
    ///
    /// use alloc_kit::{ArenaAllocator, SystemAllocator};
    ///
    /// let system = SystemAllocator::new();
    /// let mut scratch = [MaybeUninit::<u8>::uninit(); 4096];
    ///
    /// let arena = ArenaAllocator::builder(&system)
    ///     .add_block(&mut scratch)
    ///     .build();
    ///
    /// assert_eq!(arena.block_count(), 1);
    /// ```
    pub fn add_block(mut self, memory: &'p mut [MaybeUninit<u8>]) -> Self {
        let base = memory.as_mut_ptr().cast::<u8>();
        let Some(aligned) = align_up(base.addr(), BLOCK_ALIGN) else {
            return self;
        };

        let padding = aligned.wrapping_sub(base.addr());

        // The header takes 2 words, so anything up to 4 words holds no useful data.
        let Some(size) = memory.len().checked_sub(padding) else {
            return self;
        };
        if size <= size_of::<usize>().wrapping_mul(4) {
            return self;
        }

        // SAFETY: `padding < memory.len()` was verified above.
        let start = unsafe { NonNull::new_unchecked(base.add(padding)) };

        // SAFETY: `start` is aligned to BLOCK_ALIGN and `size` bytes from it are within the
        // borrowed buffer, which stays borrowed for 'p - as long as the arena can exist.
        let block = unsafe { init_block(start, size, false) };

        self.external_blocks.push(block);
        self
    }

    /// Builds the arena with the specified configuration.
    #[must_use]
    pub fn build(self) -> ArenaAllocator<'p> {
        ArenaAllocator::new_inner(
            self.parent,
            self.chunk_size,
            self.growth,
            self.leak_policy,
            self.external_blocks,
        )
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::SystemAllocator;

    #[test]
    fn tiny_external_block_is_ignored() {
        let system = SystemAllocator::new();
        let mut memory = [MaybeUninit::<u8>::uninit(); 8];

        let arena = ArenaAllocator::builder(&system)
            .add_block(&mut memory)
            .build();

        assert_eq!(arena.block_count(), 0);
    }

    #[test]
    fn external_blocks_keep_order() {
        let system = SystemAllocator::new();
        let mut first = [MaybeUninit::<u8>::uninit(); 256];
        let mut second = [MaybeUninit::<u8>::uninit(); 256];

        let arena = ArenaAllocator::builder(&system)
            .add_block(&mut first)
            .add_block(&mut second)
            .build();

        assert_eq!(arena.block_count(), 2);
    }

    #[test]
    fn chunk_size_configures_first_block() {
        let system = SystemAllocator::new();
        let arena = ArenaAllocator::builder(&system).chunk_size(300).build();

        assert_eq!(arena.chunk_size(), 300);
    }
}
