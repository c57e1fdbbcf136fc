use std::alloc::Layout;
use std::cell::Cell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use tracing::trace;

use crate::{
    Allocator, AllocatorStats, Error, LeakPolicy, NO_SLOT, Placement, Region, Result, SlotHeader,
    StatsTracker,
};

/// A stack allocator over a fixed caller-supplied buffer.
///
/// Every allocation is preceded by an inline header, which lets any allocation be freed at any
/// time. Memory is reclaimed in last-in-first-out order: freeing the top allocation rewinds the
/// stack past it and past every allocation beneath it that was already freed, in one pass.
/// Freeing an allocation further down only marks it as free until the stack unwinds to it.
///
/// # Example
///
/// ```rust
/// use std::alloc::Layout;
/// use std::mem::MaybeUninit;
///
/// use alloc_kit::{Allocator, StackAllocator};
///
/// let mut buffer = [MaybeUninit::<u8>::uninit(); 512];
/// let stack = StackAllocator::new(&mut buffer);
/// let layout = Layout::new::<[u64; 4]>();
///
/// let a = stack.allocate(layout).unwrap();
/// let b = stack.allocate(layout).unwrap();
///
/// // SAFETY: Allocated above, not used afterwards.
/// unsafe {
///     // Out of order: `a` is only marked free.
///     stack.deallocate(a.cast(), layout);
///     // Freeing `b` unwinds past both.
///     stack.deallocate(b.cast(), layout);
/// }
///
/// assert_eq!(stack.cursor(), 0);
/// ```
pub struct StackAllocator<'b> {
    region: Region<'b>,

    /// Header offset of the most recent live-or-pending allocation, or `NO_SLOT` when empty.
    top: Cell<usize>,

    /// Offset of the first byte after the top allocation.
    cursor: Cell<usize>,

    parent: Option<&'b dyn Allocator>,
    stats: StatsTracker,
    leak_policy: LeakPolicy,
}

impl<'b> StackAllocator<'b> {
    /// Creates a stack allocator that fails once `buffer` is exhausted.
    #[must_use]
    pub fn new(buffer: &'b mut [MaybeUninit<u8>]) -> Self {
        Self::new_inner(buffer, None)
    }

    /// Creates a stack allocator that forwards requests to `parent` once `buffer` is exhausted.
    #[must_use]
    pub fn with_parent(buffer: &'b mut [MaybeUninit<u8>], parent: &'b dyn Allocator) -> Self {
        Self::new_inner(buffer, Some(parent))
    }

    fn new_inner(buffer: &'b mut [MaybeUninit<u8>], parent: Option<&'b dyn Allocator>) -> Self {
        Self {
            region: Region::new(buffer),
            top: Cell::new(NO_SLOT),
            cursor: Cell::new(0),
            parent,
            stats: StatsTracker::default(),
            leak_policy: LeakPolicy::default(),
        }
    }

    /// Sets the [leak policy][LeakPolicy] applied when the allocator is dropped.
    #[must_use]
    pub fn leak_policy(mut self, policy: LeakPolicy) -> Self {
        self.leak_policy = policy;
        self
    }

    /// Offset of the first byte after the top allocation.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor.get()
    }

    /// Rewinds the stack to empty, logically freeing every allocation made from the buffer.
    pub fn reset(&mut self) {
        self.top.set(NO_SLOT);
        self.cursor.set(0);
        self.stats.reset_allocated();
        self.stats.set_used(0);
    }

    fn set_cursor(&self, cursor: usize) {
        self.cursor.set(cursor);
        self.stats.set_used(cursor);
    }

    /// Pops every trailing allocation that has already been freed.
    fn unwind(&self) {
        let mut top = self.top.get();

        while top != NO_SLOT {
            let header = self.region.read_header(top);

            if header.is_used() {
                break;
            }

            top = header.prev();
        }

        self.top.set(top);

        if top == NO_SLOT {
            self.set_cursor(0);
        } else {
            let header = self.region.read_header(top);
            self.region.update_header(top, |h| h.set_next(NO_SLOT));
            self.set_cursor(header.payload_end(top));
        }
    }

    /// Header offset of the live allocation whose payload starts at `offset`.
    fn live_header_at(&self, data_offset: usize) -> usize {
        let header_offset = self.region.header_offset_for(data_offset);

        assert!(
            self.region.read_header(header_offset).is_used(),
            "allocation at offset {data_offset} is not live in this StackAllocator"
        );

        header_offset
    }
}

impl fmt::Debug for StackAllocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackAllocator")
            .field("region", &self.region)
            .field("top", &self.top)
            .field("cursor", &self.cursor)
            .field("has_parent", &self.parent.is_some())
            .field("stats", &self.stats)
            .field("leak_policy", &self.leak_policy)
            .finish()
    }
}

impl Allocator for StackAllocator<'_> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        let placement = Placement::at(&self.region, self.cursor.get(), layout)
            .filter(|p| p.fits(self.region.len(), self.region.len()));

        let Some(placement) = placement else {
            let parent = self.parent.ok_or_else(|| Error::out_of_memory(layout))?;

            trace!(
                size = layout.size(),
                align = layout.align(),
                "stack allocator buffer exhausted, forwarding to parent"
            );

            return parent.allocate(layout);
        };

        let previous = self.top.get();

        self.region
            .write_header(placement.header, SlotHeader::used(previous, layout.size()));

        if previous != NO_SLOT {
            self.region
                .update_header(previous, |h| h.set_next(placement.header));
        }

        self.top.set(placement.header);
        self.set_cursor(placement.end);
        self.stats.on_allocate(layout.size());

        Ok(self.region.slice_at(placement.data, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> bool {
        let Some(offset) = self.region.offset_of(ptr) else {
            return match self.parent {
                // SAFETY: Not ours, so it came from the parent. Forwarding caller guarantees.
                Some(parent) => unsafe { parent.deallocate(ptr, layout) },
                None => false,
            };
        };

        let header_offset = self.live_header_at(offset);

        debug_assert_eq!(
            self.region.read_header(header_offset).size(),
            layout.size(),
            "deallocation layout does not match the allocation"
        );

        self.region.update_header(header_offset, SlotHeader::mark_free);
        self.stats.on_deallocate(layout.size());

        if header_offset == self.top.get() {
            self.unwind();
        }

        true
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<NonNull<[u8]>> {
        let Some(offset) = self.region.offset_of(ptr) else {
            return match self.parent {
                // SAFETY: Not ours, so it came from the parent. Forwarding caller guarantees.
                Some(parent) => unsafe { parent.resize(ptr, old_layout, new_size) },
                None => Err(Error::NotResizable),
            };
        };

        let header_offset = self.live_header_at(offset);

        if header_offset != self.top.get() {
            return Err(Error::NotResizable);
        }

        let new_end = offset
            .checked_add(new_size)
            .filter(|end| *end <= self.region.len())
            .ok_or(Error::NotResizable)?;

        self.region
            .update_header(header_offset, |h| h.set_size(new_size));
        self.set_cursor(new_end);
        self.stats.on_deallocate(old_layout.size());
        self.stats.on_allocate(new_size);

        Ok(self.region.slice_at(offset, new_size))
    }

    fn stats(&self) -> AllocatorStats {
        self.stats.snapshot()
    }
}

impl Drop for StackAllocator<'_> {
    fn drop(&mut self) {
        self.stats.check_leaks(self.leak_policy, "StackAllocator");
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{LinearAllocator, SLOT_HEADER_SIZE, SystemAllocator};

    fn layout(size: usize, align: usize) -> Layout {
        Layout::from_size_align(size, align).unwrap()
    }

    #[test]
    fn lifo_frees_restore_cursor() {
        let mut buffer = [MaybeUninit::<u8>::uninit(); 512];
        let stack = StackAllocator::new(&mut buffer);

        let before = stack.cursor();
        let a = stack.allocate(layout(24, 8)).unwrap();
        let b = stack.allocate(layout(7, 1)).unwrap();

        // SAFETY: Allocated above, not used afterwards.
        unsafe {
            assert!(stack.deallocate(b.cast(), layout(7, 1)));
            assert!(stack.deallocate(a.cast(), layout(24, 8)));
        }

        assert_eq!(stack.cursor(), before);
        assert_eq!(stack.stats().bytes_allocated, Some(0));
    }

    #[test]
    fn freeing_top_reclaims_trailing_garbage() {
        let mut buffer = [MaybeUninit::<u8>::uninit(); 512];
        let stack = StackAllocator::new(&mut buffer);
        let l = layout(16, 8);

        let a = stack.allocate(l).unwrap();
        let cursor_after_a = stack.cursor();
        let b = stack.allocate(l).unwrap();
        let c = stack.allocate(l).unwrap();
        let d = stack.allocate(l).unwrap();

        // SAFETY: Allocated above, not used afterwards.
        unsafe {
            stack.deallocate(b.cast(), l);
            stack.deallocate(c.cast(), l);
        }

        // Still held up by `d`.
        assert!(stack.cursor() > cursor_after_a);

        // SAFETY: Allocated above, not used afterwards.
        unsafe {
            stack.deallocate(d.cast(), l);
        }

        assert_eq!(stack.cursor(), cursor_after_a);

        // SAFETY: Allocated above, not used afterwards.
        unsafe {
            stack.deallocate(a.cast(), l);
        }

        assert_eq!(stack.cursor(), 0);
    }

    #[test]
    fn headers_consume_buffer_space() {
        let mut buffer = [MaybeUninit::<u8>::uninit(); 512];
        let stack = StackAllocator::new(&mut buffer).leak_policy(LeakPolicy::MayLeak);

        _ = stack.allocate(layout(8, 8)).unwrap();

        let used = stack.stats().bytes_used.unwrap();
        assert!(used >= 8 + SLOT_HEADER_SIZE);
        assert_eq!(stack.stats().bytes_allocated, Some(8));
    }

    #[test]
    fn resize_only_top() {
        let mut buffer = [MaybeUninit::<u8>::uninit(); 512];
        let stack = StackAllocator::new(&mut buffer);
        let l = layout(16, 8);

        let a = stack.allocate(l).unwrap();
        let b = stack.allocate(l).unwrap();

        // SAFETY: Allocated above.
        unsafe {
            assert_eq!(stack.resize(a.cast(), l, 8), Err(Error::NotResizable));

            let b = stack.resize(b.cast(), l, 100).unwrap();
            assert_eq!(b.len(), 100);

            assert_eq!(
                stack.resize(b.cast(), layout(100, 8), 10_000),
                Err(Error::NotResizable)
            );

            stack.deallocate(b.cast(), layout(100, 8));
            stack.deallocate(a.cast(), l);
        }

        assert_eq!(stack.cursor(), 0);
    }

    #[test]
    fn forwards_to_parent_when_full() {
        let system = SystemAllocator::new();
        let mut buffer = [MaybeUninit::<u8>::uninit(); 64];
        let stack = StackAllocator::with_parent(&mut buffer, &system);
        let big = layout(128, 8);

        let block = stack.allocate(big).unwrap();
        assert_eq!(system.stats().bytes_allocated, Some(128));

        // SAFETY: Allocated above, not used afterwards.
        assert!(unsafe { stack.deallocate(block.cast(), big) });
        assert_eq!(system.stats().bytes_allocated, Some(0));
    }

    #[test]
    fn parent_memory_right_after_buffer_is_forwarded() {
        let mut memory = vec![MaybeUninit::<u8>::uninit(); 512];
        let (own, rest) = memory.split_at_mut(64);
        let parent = LinearAllocator::new(rest);
        let stack = StackAllocator::with_parent(own, &parent);
        let big = layout(200, 1);

        let block = stack.allocate(big).unwrap();
        assert_eq!(parent.stats().bytes_allocated, Some(200));
        assert_eq!(stack.stats().bytes_allocated, Some(0));

        // SAFETY: Allocated above, not used afterwards.
        assert!(unsafe { stack.deallocate(block.cast(), big) });
        assert_eq!(parent.stats().bytes_allocated, Some(0));
        assert_eq!(parent.cursor(), 0);
    }

    #[test]
    fn exhaustion_without_parent_fails() {
        let mut buffer = [MaybeUninit::<u8>::uninit(); 64];
        let stack = StackAllocator::new(&mut buffer);

        assert_eq!(
            stack.allocate(layout(128, 8)),
            Err(Error::OutOfMemory {
                size: 128,
                align: 8
            })
        );
    }

    #[test]
    #[should_panic]
    fn double_free_panics() {
        let mut buffer = [MaybeUninit::<u8>::uninit(); 256];
        let stack = StackAllocator::new(&mut buffer);
        let l = layout(8, 8);

        let a = stack.allocate(l).unwrap();
        _ = stack.allocate(l).unwrap();

        // SAFETY: Intentionally violating the contract to verify the check.
        unsafe {
            stack.deallocate(a.cast(), l);
            stack.deallocate(a.cast(), l);
        }
    }
}
