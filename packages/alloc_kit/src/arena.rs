use std::alloc::Layout;
use std::cell::Cell;
use std::fmt;
use std::iter;
use std::ptr::NonNull;

use tracing::debug;

use crate::padding::{PADDING_RECORD_SIZE, PaddingLedger, gap_start};
use crate::{
    Allocator, AllocatorStats, ArenaAllocatorBuilder, Error, LeakPolicy, Result, StatsTracker,
    align_up,
};

/// Alignment of every block the arena requests from its parent.
pub(crate) const BLOCK_ALIGN: usize = 16;

const OWNED_BIT: usize = 1 << (usize::BITS - 1);

/// Header at the start of every arena block. The rest of the block is bump-allocated.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct ArenaBlock {
    next: Option<NonNull<ArenaBlock>>,

    /// Total size of the block including this header. The top bit is set if the block was
    /// obtained from the parent allocator and must be returned to it; externally supplied blocks
    /// are never freed by the arena.
    size_and_owned: usize,
}

const BLOCK_HEADER_SIZE: usize = size_of::<ArenaBlock>();

impl ArenaBlock {
    fn size(&self) -> usize {
        self.size_and_owned & !OWNED_BIT
    }

    fn is_owned(&self) -> bool {
        self.size_and_owned & OWNED_BIT != 0
    }
}

/// Reads the header of a block.
fn header(block: NonNull<ArenaBlock>) -> ArenaBlock {
    // SAFETY: Every block pointer in the chain refers to a header written in `init_block()` and
    // the block stays allocated until the arena frees it, at which point it leaves the chain.
    unsafe { block.read() }
}

fn set_next(block: NonNull<ArenaBlock>, next: Option<NonNull<ArenaBlock>>) {
    let mut updated = header(block);
    updated.next = next;

    // SAFETY: See `header()` - the block header is valid, aligned and owned by the arena.
    unsafe {
        block.write(updated);
    }
}

/// Writes a fresh header at the start of a block of `size` bytes.
///
/// # Safety
///
/// `start` must be aligned to `BLOCK_ALIGN` and valid for writes of `size` bytes, which must be at
/// least `BLOCK_HEADER_SIZE`, for as long as the block is part of the arena.
pub(crate) unsafe fn init_block(start: NonNull<u8>, size: usize, owned: bool) -> NonNull<()> {
    debug_assert!(size >= BLOCK_HEADER_SIZE);
    debug_assert!(start.as_ptr().addr() % BLOCK_ALIGN == 0);

    let block = start.cast::<ArenaBlock>();

    // SAFETY: Forwarding safety requirements to the caller.
    unsafe {
        block.write(ArenaBlock {
            next: None,
            size_and_owned: if owned { size | OWNED_BIT } else { size },
        });
    }

    block.cast()
}

/// Grows the chunk size by doubling. The default growth function of [`ArenaAllocator`].
#[must_use]
pub fn double_chunk_size(chunk_size: usize) -> usize {
    chunk_size.saturating_mul(2)
}

/// Upper bound for the chunk size produced by any growth function: 4 GiB (or the address space,
/// whichever is smaller).
#[must_use]
pub fn max_chunk_size() -> usize {
    usize::try_from(4_u64 << 30).unwrap_or(usize::MAX)
}

/// An allocator that bump-allocates from a chain of blocks obtained from a parent allocator.
///
/// When the current block is exhausted, the arena first looks for an already-owned but unused
/// block further down the chain (left over from before a [`reset()`][Self::reset]) and only
/// requests a new block from the parent if none is large enough. New blocks are at least
/// the current chunk size, which grows (by default, doubles) every time a new block is obtained.
///
/// Only the most recent allocation in the current block can be freed or resized; other frees are
/// accepted and reclaimed wholesale by [`reset()`][Self::reset].
///
/// # Example
///
/// ```rust
/// use std::alloc::Layout;
///
/// use alloc_kit::{Allocator, ArenaAllocator, LeakPolicy, SystemAllocator};
///
/// let system = SystemAllocator::new();
///
/// // Allocations are discarded wholesale instead of being freed one by one.
/// let mut arena = ArenaAllocator::builder(&system)
///     .chunk_size(1024)
///     .leak_policy(LeakPolicy::MayLeak)
///     .build();
///
/// for _ in 0..100 {
///     arena.allocate(Layout::new::<[u64; 8]>()).unwrap();
/// }
/// assert!(arena.block_count() > 1);
///
/// // Rewind without returning memory to the parent.
/// arena.reset();
/// let held = system.stats().bytes_allocated;
/// arena.allocate(Layout::new::<u64>()).unwrap();
/// assert_eq!(system.stats().bytes_allocated, held);
///
/// // Return everything beyond the current block.
/// arena.release_extra_memory();
/// assert_eq!(arena.block_count(), 1);
/// ```
pub struct ArenaAllocator<'p> {
    parent: &'p dyn Allocator,

    first: Cell<Option<NonNull<ArenaBlock>>>,

    /// The block being bump-allocated from. Blocks after it in the chain are unused.
    current: Cell<Option<NonNull<ArenaBlock>>>,

    /// Offset within the current block of the first byte not yet handed out.
    available_from: Cell<usize>,

    /// Alignment gaps in the current block, so LIFO frees rewind over them.
    padding: PaddingLedger,

    chunk_size: Cell<usize>,
    growth: fn(usize) -> usize,

    /// Bytes held in blocks, both owned and externally supplied.
    held_bytes: Cell<usize>,

    stats: StatsTracker,
    leak_policy: LeakPolicy,
}

impl<'p> ArenaAllocator<'p> {
    /// Default size of the first block requested from the parent.
    pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

    /// Creates an arena with the default configuration that obtains blocks from `parent`.
    #[must_use]
    pub fn new(parent: &'p dyn Allocator) -> Self {
        Self::builder(parent).build()
    }

    /// Starts building a new [`ArenaAllocator`].
    ///
    /// Use this when you want to customize the chunk size, its growth or supply blocks of your
    /// own memory.
    pub fn builder(parent: &'p dyn Allocator) -> ArenaAllocatorBuilder<'p> {
        ArenaAllocatorBuilder::new(parent)
    }

    pub(crate) fn new_inner(
        parent: &'p dyn Allocator,
        chunk_size: usize,
        growth: fn(usize) -> usize,
        leak_policy: LeakPolicy,
        external_blocks: impl IntoIterator<Item = NonNull<()>>,
    ) -> Self {
        let arena = Self {
            parent,
            first: Cell::new(None),
            current: Cell::new(None),
            available_from: Cell::new(BLOCK_HEADER_SIZE),
            padding: PaddingLedger::new(),
            chunk_size: Cell::new(chunk_size.clamp(BLOCK_HEADER_SIZE, max_chunk_size())),
            growth,
            held_bytes: Cell::new(0),
            stats: StatsTracker::default(),
            leak_policy,
        };

        let mut last: Option<NonNull<ArenaBlock>> = None;

        for block in external_blocks {
            let block = block.cast::<ArenaBlock>();

            match last {
                Some(last) => set_next(last, Some(block)),
                None => arena.first.set(Some(block)),
            }

            arena.add_held(header(block).size());
            last = Some(block);
        }

        arena.current.set(arena.first.get());
        arena
    }

    /// Number of blocks in the chain, whether in use or not.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks().count()
    }

    /// Minimum size of the next block that will be requested from the parent.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    /// Rewinds the arena to the start of its first block without returning any memory to the
    /// parent. All allocations made so far are logically freed.
    pub fn reset(&mut self) {
        self.current.set(self.first.get());
        self.available_from.set(BLOCK_HEADER_SIZE);
        self.padding.clear();
        self.stats.reset_allocated();
    }

    /// Returns every owned block after the current one to the parent allocator.
    ///
    /// Externally supplied blocks stay in the chain, as the arena cannot free them.
    pub fn release_extra_memory(&mut self) {
        // No current block means the chain is empty.
        let Some(current) = self.current.get() else {
            return;
        };

        let kept = self.release_chain(header(current).next);
        set_next(current, kept);
    }

    /// Frees the owned blocks in a chain, returning the chain of external blocks that remain.
    fn release_chain(&self, chain: Option<NonNull<ArenaBlock>>) -> Option<NonNull<ArenaBlock>> {
        let mut kept_first = None;
        let mut kept_last: Option<NonNull<ArenaBlock>> = None;
        let mut released_blocks: usize = 0;
        let mut released_bytes: usize = 0;

        let mut cursor = chain;
        while let Some(block) = cursor {
            let block_header = header(block);
            cursor = block_header.next;

            if block_header.is_owned() {
                released_blocks = released_blocks.wrapping_add(1);
                released_bytes = released_bytes.wrapping_add(block_header.size());
                self.free_block(block);
                continue;
            }

            set_next(block, None);
            match kept_last {
                Some(last) => set_next(last, Some(block)),
                None => kept_first = Some(block),
            }
            kept_last = Some(block);
        }

        if released_blocks > 0 {
            debug!(
                released_blocks,
                released_bytes, "arena returned unused blocks to its parent"
            );
        }

        kept_first
    }

    fn free_block(&self, block: NonNull<ArenaBlock>) {
        let size = header(block).size();
        let layout = Layout::from_size_align(size, BLOCK_ALIGN)
            .expect("block layout was valid when the block was allocated");

        // SAFETY: Owned blocks were obtained from the parent with exactly this layout and leave
        // the chain as part of being freed, so they are never touched again.
        unsafe {
            self.parent.deallocate(block.cast(), layout);
        }

        self.sub_held(size);
    }

    fn add_held(&self, bytes: usize) {
        let held = self
            .held_bytes
            .get()
            .checked_add(bytes)
            .expect("cannot hold more bytes than fit in virtual memory");
        self.held_bytes.set(held);
        self.stats.set_used(held);
    }

    fn sub_held(&self, bytes: usize) {
        let held = self
            .held_bytes
            .get()
            .checked_sub(bytes)
            .expect("released more bytes than were held");
        self.held_bytes.set(held);
        self.stats.set_used(held);
    }

    fn blocks(&self) -> impl Iterator<Item = NonNull<ArenaBlock>> {
        iter::successors(self.first.get(), |block| header(*block).next)
    }

    /// Where `layout` would go in `block` if bump-allocated from `from`.
    fn place(block: NonNull<ArenaBlock>, from: usize, layout: Layout) -> Option<(usize, usize)> {
        let base = block.as_ptr().addr();
        let start = gap_start(from, |offset| {
            align_up(base.checked_add(offset)?, layout.align())?.checked_sub(base)
        })?;
        let end = start.checked_add(align_up(layout.size(), layout.align())?)?;

        (end <= header(block).size()).then_some((start, end))
    }

    fn bump(
        &self,
        block: NonNull<ArenaBlock>,
        from: usize,
        start: usize,
        end: usize,
        size: usize,
    ) -> NonNull<[u8]> {
        // SAFETY: `place()` chose `start` with `gap_start()` from `from`, which is at or beyond the
        // bump cursor of this block, so the gap is inside the block and not handed out.
        unsafe {
            self.padding.record(block.cast(), from, start);
        }

        self.available_from.set(end);
        self.stats.on_allocate(size);

        // SAFETY: `place()` verified that `start..end` lies within the block.
        let ptr = unsafe { block.cast::<u8>().add(start) };

        NonNull::slice_from_raw_parts(ptr, size)
    }

    /// Finds an unused block after the current one that can hold `layout` and moves it to
    /// directly after the current block.
    fn find_block_to_fit(&self, layout: Layout) -> Option<NonNull<ArenaBlock>> {
        let current = self.current.get()?;

        let mut previous = current;
        let mut candidate = header(current).next;

        while let Some(block) = candidate {
            if Self::place(block, BLOCK_HEADER_SIZE, layout).is_some() {
                if previous != current {
                    // Unlink and reinsert right after the current block.
                    set_next(previous, header(block).next);
                    set_next(block, header(current).next);
                    set_next(current, Some(block));
                }

                return Some(block);
            }

            previous = block;
            candidate = header(block).next;
        }

        None
    }

    fn obtain_block(&self, layout: Layout) -> Result<NonNull<ArenaBlock>> {
        // Alignments beyond the block alignment need a gap after the header, with a padding record.
        let gap = if layout.align() > BLOCK_ALIGN {
            PADDING_RECORD_SIZE
        } else {
            0
        };

        let needed = BLOCK_HEADER_SIZE
            .checked_add(layout.align())
            .and_then(|n| n.checked_add(gap))
            .and_then(|n| n.checked_add(align_up(layout.size(), layout.align())?))
            .ok_or_else(|| Error::out_of_memory(layout))?;

        let block_size = needed.max(self.chunk_size.get());
        let block_layout = Layout::from_size_align(block_size, BLOCK_ALIGN)
            .map_err(|_| Error::out_of_memory(layout))?;

        let memory = self.parent.allocate(block_layout)?;

        // SAFETY: The parent returned `block_size` bytes aligned to BLOCK_ALIGN, which we own
        // until we hand them back in `free_block()`.
        let block = unsafe { init_block(memory.cast(), block_size, true) }.cast::<ArenaBlock>();

        self.chunk_size
            .set((self.growth)(self.chunk_size.get()).min(max_chunk_size()));
        self.add_held(block_size);

        debug!(
            block_size,
            next_chunk_size = self.chunk_size.get(),
            "arena obtained a new block from its parent"
        );

        match self.current.get() {
            Some(current) => {
                set_next(block, header(current).next);
                set_next(current, Some(block));
            }
            None => {
                // Empty chain, or the arena was reset with no blocks: the new block goes first.
                set_next(block, self.first.get());
                self.first.set(Some(block));
            }
        }

        Ok(block)
    }

    /// Whether `ptr..ptr + size` (rounded to `align`) ends exactly at the bump cursor of the
    /// current block. Returns the offset of `ptr` in the current block if so.
    fn top_offset(&self, ptr: NonNull<u8>, layout: Layout) -> Option<usize> {
        let current = self.current.get()?;
        let offset = ptr.as_ptr().addr().checked_sub(current.as_ptr().addr())?;
        let end = offset.checked_add(align_up(layout.size(), layout.align())?)?;

        (end == self.available_from.get()).then_some(offset)
    }
}

impl fmt::Debug for ArenaAllocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaAllocator")
            .field("block_count", &self.block_count())
            .field("available_from", &self.available_from)
            .field("chunk_size", &self.chunk_size)
            .field("held_bytes", &self.held_bytes)
            .field("stats", &self.stats)
            .field("leak_policy", &self.leak_policy)
            .finish_non_exhaustive()
    }
}

impl Allocator for ArenaAllocator<'_> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        if let Some(current) = self.current.get() {
            let from = self.available_from.get();

            if let Some((start, end)) = Self::place(current, from, layout) {
                return Ok(self.bump(current, from, start, end, layout.size()));
            }
        }

        let block = match self.find_block_to_fit(layout) {
            Some(block) => block,
            None => self.obtain_block(layout)?,
        };

        self.current.set(Some(block));
        self.padding.clear();

        let (start, end) = Self::place(block, BLOCK_HEADER_SIZE, layout)
            .expect("block was selected or sized to fit the request");

        Ok(self.bump(block, BLOCK_HEADER_SIZE, start, end, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> bool {
        self.stats.on_deallocate(layout.size());

        if let Some(offset) = self.top_offset(ptr, layout) {
            let current = self
                .current
                .get()
                .expect("top_offset() only succeeds with a current block");

            // SAFETY: The gaps of the current block below its cursor are never handed out.
            let floor = unsafe { self.padding.floor_of(current.cast(), offset) };
            self.available_from.set(floor);
        }

        true
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<NonNull<[u8]>> {
        let offset = self
            .top_offset(ptr, old_layout)
            .ok_or(Error::NotResizable)?;

        let current = self
            .current
            .get()
            .expect("top_offset() only succeeds with a current block");

        let end = align_up(new_size, old_layout.align())
            .and_then(|size| offset.checked_add(size))
            .filter(|end| *end <= header(current).size())
            .ok_or(Error::NotResizable)?;

        self.available_from.set(end);
        self.stats.on_deallocate(old_layout.size());
        self.stats.on_allocate(new_size);

        Ok(NonNull::slice_from_raw_parts(ptr, new_size))
    }

    fn stats(&self) -> AllocatorStats {
        self.stats.snapshot()
    }
}

impl Drop for ArenaAllocator<'_> {
    fn drop(&mut self) {
        _ = self.release_chain(self.first.get());
        self.first.set(None);
        self.current.set(None);

        self.stats.check_leaks(self.leak_policy, "ArenaAllocator");
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::mem::MaybeUninit;

    use super::*;
    use crate::SystemAllocator;

    const SMALL: Layout = Layout::new::<[u64; 4]>();

    /// An arena whose allocations are discarded wholesale rather than freed one by one.
    fn scratch(parent: &SystemAllocator) -> ArenaAllocatorBuilder<'_> {
        ArenaAllocator::builder(parent).leak_policy(LeakPolicy::MayLeak)
    }

    #[test]
    fn first_allocation_obtains_block() {
        let system = SystemAllocator::new();
        let arena = scratch(&system).chunk_size(256).build();

        assert_eq!(arena.block_count(), 0);

        _ = arena.allocate(SMALL).unwrap();

        assert_eq!(arena.block_count(), 1);
        assert_eq!(system.stats().bytes_allocated, Some(256));
        assert_eq!(arena.chunk_size(), 512);
    }

    #[test]
    fn oversized_request_gets_dedicated_block() {
        let system = SystemAllocator::new();
        let arena = scratch(&system).chunk_size(256).build();

        let big = Layout::from_size_align(10_000, 64).unwrap();
        let block = arena.allocate(big).unwrap();

        assert_eq!(block.len(), 10_000);
        assert_eq!(block.cast::<u8>().as_ptr().addr() % 64, 0);
        assert!(system.stats().bytes_allocated.unwrap() >= 10_000);
    }

    #[test]
    fn lifo_deallocation_rewinds() {
        let system = SystemAllocator::new();
        let arena = scratch(&system).build();

        let a = arena.allocate(SMALL).unwrap();
        let b = arena.allocate(SMALL).unwrap();

        // SAFETY: Allocated above, not used afterwards.
        unsafe {
            arena.deallocate(b.cast(), SMALL);
            arena.deallocate(a.cast(), SMALL);
        }

        let again = arena.allocate(SMALL).unwrap();
        assert_eq!(again.cast::<u8>(), a.cast::<u8>());
    }

    #[test]
    fn lifo_deallocation_rewinds_over_alignment_padding() {
        let system = SystemAllocator::new();
        let arena = scratch(&system).build();
        let byte = Layout::new::<u8>();
        let wide = Layout::from_size_align(8, 64).unwrap();

        let x = arena.allocate(byte).unwrap();
        let before = arena.available_from.get();

        let a = arena.allocate(wide).unwrap();
        let b = arena.allocate(wide).unwrap();
        assert_eq!(a.cast::<u8>().as_ptr().addr() % 64, 0);

        // SAFETY: Allocated above, not used afterwards.
        unsafe {
            arena.deallocate(b.cast(), wide);
            arena.deallocate(a.cast(), wide);
        }

        assert_eq!(arena.available_from.get(), before);

        let next = arena.allocate(byte).unwrap();
        assert_eq!(
            next.cast::<u8>().as_ptr().addr(),
            x.cast::<u8>().as_ptr().addr() + 1
        );
    }

    #[test]
    fn non_top_deallocation_is_accepted_noop() {
        let system = SystemAllocator::new();
        let arena = scratch(&system).build();

        let a = arena.allocate(SMALL).unwrap();
        let b = arena.allocate(SMALL).unwrap();

        // SAFETY: Allocated above, not used afterwards.
        assert!(unsafe { arena.deallocate(a.cast(), SMALL) });

        let c = arena.allocate(SMALL).unwrap();
        assert!(c.cast::<u8>().as_ptr().addr() > b.cast::<u8>().as_ptr().addr());
        assert_eq!(arena.stats().bytes_allocated, Some(64));
    }

    #[test]
    fn resize_top_allocation() {
        let system = SystemAllocator::new();
        let arena = scratch(&system).chunk_size(1024).build();

        let a = arena.allocate(SMALL).unwrap();
        let b = arena.allocate(SMALL).unwrap();

        // SAFETY: Allocated above.
        unsafe {
            assert_eq!(arena.resize(a.cast(), SMALL, 64), Err(Error::NotResizable));

            let grown = arena.resize(b.cast(), SMALL, 128).unwrap();
            assert_eq!(grown.cast::<u8>(), b.cast::<u8>());
            assert_eq!(grown.len(), 128);

            assert_eq!(
                arena.resize(grown.cast(), Layout::from_size_align(128, 8).unwrap(), 100_000),
                Err(Error::NotResizable)
            );
        }
    }

    #[test]
    fn reset_reuses_blocks_without_growing_chunk_size() {
        let system = SystemAllocator::new();
        let mut arena = scratch(&system).chunk_size(256).build();

        for _ in 0..40 {
            _ = arena.allocate(SMALL).unwrap();
        }

        let blocks = arena.block_count();
        let chunk_size = arena.chunk_size();
        let held = system.stats().bytes_allocated;

        arena.reset();

        for _ in 0..40 {
            _ = arena.allocate(SMALL).unwrap();
        }

        assert_eq!(arena.block_count(), blocks);
        assert_eq!(arena.chunk_size(), chunk_size);
        assert_eq!(system.stats().bytes_allocated, held);
    }

    #[test]
    fn release_extra_memory_frees_trailing_blocks() {
        let system = SystemAllocator::new();
        let mut arena = scratch(&system).chunk_size(256).build();

        for _ in 0..40 {
            _ = arena.allocate(SMALL).unwrap();
        }
        assert!(arena.block_count() > 1);

        arena.reset();
        _ = arena.allocate(SMALL).unwrap();
        arena.release_extra_memory();

        assert_eq!(arena.block_count(), 1);
        assert_eq!(system.stats().bytes_allocated, Some(256));
        assert_eq!(arena.stats().bytes_used, Some(256));
    }

    #[test]
    fn release_after_reset_without_allocations_frees_everything() {
        let system = SystemAllocator::new();
        let mut arena = scratch(&system).chunk_size(256).build();

        _ = arena.allocate(SMALL).unwrap();
        arena.reset();
        arena.release_extra_memory();

        // The current block (first) is kept.
        assert_eq!(arena.block_count(), 1);
    }

    #[test]
    fn find_block_to_fit_skips_small_blocks() {
        let system = SystemAllocator::new();
        let mut arena = scratch(&system)
            .chunk_size(256)
            .growth(|size| size)
            .build();

        // Three blocks: small, small, big.
        _ = arena.allocate(Layout::from_size_align(200, 8).unwrap()).unwrap();
        _ = arena.allocate(Layout::from_size_align(200, 8).unwrap()).unwrap();
        _ = arena.allocate(Layout::from_size_align(4000, 8).unwrap()).unwrap();
        assert_eq!(arena.block_count(), 3);

        arena.reset();

        // Fill the first block, then ask for something only the big block can hold.
        _ = arena.allocate(Layout::from_size_align(200, 8).unwrap()).unwrap();
        _ = arena.allocate(Layout::from_size_align(4000, 8).unwrap()).unwrap();

        assert_eq!(arena.block_count(), 3);
        assert_eq!(system.stats().bytes_allocated.unwrap(), 256 + 256 + 4000 + 16 + 8);
    }

    #[test]
    fn external_blocks_are_used_but_not_freed() {
        let system = SystemAllocator::new();
        let mut memory = [MaybeUninit::<u8>::uninit(); 1024];

        let mut arena = scratch(&system)
            .add_block(&mut memory)
            .build();

        assert_eq!(arena.block_count(), 1);

        _ = arena.allocate(SMALL).unwrap();
        assert_eq!(system.stats().bytes_allocated, Some(0));

        arena.release_extra_memory();
        assert_eq!(arena.block_count(), 1);
    }

    #[test]
    fn drop_returns_all_blocks() {
        let system = SystemAllocator::new();

        {
            let arena = scratch(&system).chunk_size(256).build();
            for _ in 0..40 {
                _ = arena.allocate(SMALL).unwrap();
            }
        }

        assert_eq!(system.stats().bytes_allocated, Some(0));
    }

    #[test]
    #[should_panic]
    fn leak_with_must_not_leak_panics() {
        let system = SystemAllocator::new();
        let arena = ArenaAllocator::builder(&system)
            .leak_policy(LeakPolicy::MustNotLeak)
            .build();

        _ = arena.allocate(SMALL).unwrap();
    }
}
