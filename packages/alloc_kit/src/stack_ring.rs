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

/// A stack allocator that wraps around to the start of its buffer when it reaches the end.
///
/// Designed for "snake" workloads where allocations are made at the back and freed roughly in
/// the order they were made, such as per-frame scratch buffers that live for a frame or two.
/// Allocations carry the same inline headers as [`StackAllocator`][crate::StackAllocator] and
/// freeing the newest allocation unwinds the back of the ring the same way.
///
/// In addition, when an allocation does not fit before the end of the buffer, the allocator:
///
/// 1. Reclaims freed allocations from the front (the oldest end) of the ring.
/// 2. If that is still not enough, wraps the write cursor back to the start of the buffer and
///    retries once, placing the allocation in front of the oldest live allocation.
///
/// # Example
///
/// ```rust
/// use std::alloc::Layout;
/// use std::mem::MaybeUninit;
///
/// use alloc_kit::{Allocator, StackRingAllocator};
///
/// let mut buffer = [MaybeUninit::<u8>::uninit(); 256];
/// let ring = StackRingAllocator::new(&mut buffer);
/// let layout = Layout::new::<[u8; 64]>();
///
/// let first = ring.allocate(layout).unwrap();
/// let second = ring.allocate(layout).unwrap();
///
/// // Free the oldest allocation, then keep allocating: the ring reuses the freed front.
/// // SAFETY: Allocated above, not used afterwards.
/// unsafe { ring.deallocate(first.cast(), layout) };
///
/// let third = ring.allocate(layout).unwrap();
/// let fourth = ring.allocate(layout).unwrap();
/// # unsafe {
/// #     ring.deallocate(second.cast(), layout);
/// #     ring.deallocate(third.cast(), layout);
/// #     ring.deallocate(fourth.cast(), layout);
/// # }
/// ```
pub struct StackRingAllocator<'b> {
    region: Region<'b>,

    /// Header offset of the oldest allocation not yet reclaimed, or `NO_SLOT` when empty.
    front: Cell<usize>,

    /// Header offset of the newest allocation, or `NO_SLOT` when empty.
    back: Cell<usize>,

    /// Offset of the first byte after the newest allocation.
    cursor: Cell<usize>,

    parent: Option<&'b dyn Allocator>,
    stats: StatsTracker,
    leak_policy: LeakPolicy,
}

impl<'b> StackRingAllocator<'b> {
    /// Creates a stack-ring allocator that fails once `buffer` has no room left.
    #[must_use]
    pub fn new(buffer: &'b mut [MaybeUninit<u8>]) -> Self {
        Self::new_inner(buffer, None)
    }

    /// Creates a stack-ring allocator that forwards requests to `parent` when `buffer` has no
    /// room left.
    #[must_use]
    pub fn with_parent(buffer: &'b mut [MaybeUninit<u8>], parent: &'b dyn Allocator) -> Self {
        Self::new_inner(buffer, Some(parent))
    }

    fn new_inner(buffer: &'b mut [MaybeUninit<u8>], parent: Option<&'b dyn Allocator>) -> Self {
        Self {
            region: Region::new(buffer),
            front: Cell::new(NO_SLOT),
            back: Cell::new(NO_SLOT),
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

    /// Offset of the first byte after the newest allocation.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor.get()
    }

    /// Whether the newest allocations sit in front of the oldest ones, i.e. the write cursor has
    /// wrapped around to the start of the buffer.
    #[must_use]
    pub fn is_wrapped(&self) -> bool {
        let front = self.front.get();
        front != NO_SLOT && self.cursor.get() <= front
    }

    /// Rewinds the ring to empty, logically freeing every allocation made from the buffer.
    pub fn reset(&mut self) {
        self.front.set(NO_SLOT);
        self.back.set(NO_SLOT);
        self.cursor.set(0);
        self.stats.reset_allocated();
        self.stats.set_used(0);
    }

    /// The first offset the next allocation must not cross.
    fn limit(&self) -> usize {
        if self.is_wrapped() {
            self.front.get()
        } else {
            self.region.len()
        }
    }

    fn refresh_used(&self) {
        let front = self.front.get();
        let cursor = self.cursor.get();

        let used = if front == NO_SLOT {
            0
        } else if cursor > front {
            cursor.wrapping_sub(front)
        } else {
            // Wrapped: from the front to the end of the buffer, plus the start up to the cursor.
            self.region
                .len()
                .wrapping_sub(front)
                .wrapping_add(cursor)
        };

        self.stats.set_used(used);
    }

    fn set_empty(&self) {
        self.front.set(NO_SLOT);
        self.back.set(NO_SLOT);
        self.cursor.set(0);
    }

    /// Pops every freed allocation from the back (newest end) of the ring.
    fn unwind_back(&self) {
        let mut back = self.back.get();

        while back != NO_SLOT {
            let header = self.region.read_header(back);

            if header.is_used() {
                break;
            }

            back = header.prev();
        }

        if back == NO_SLOT {
            self.set_empty();
        } else {
            self.region.update_header(back, |h| h.set_next(NO_SLOT));
            self.back.set(back);
            self.cursor
                .set(self.region.read_header(back).payload_end(back));
        }

        self.refresh_used();
    }

    /// Pops every freed allocation from the front (oldest end) of the ring.
    fn reclaim_front(&self) {
        let mut front = self.front.get();

        while front != NO_SLOT {
            let header = self.region.read_header(front);

            if header.is_used() {
                break;
            }

            front = header.next();
        }

        if front == NO_SLOT {
            self.set_empty();
        } else {
            self.region.update_header(front, |h| h.set_prev(NO_SLOT));
            self.front.set(front);
        }

        self.refresh_used();
    }

    fn try_place(&self, layout: Layout) -> Option<Placement> {
        Placement::at(&self.region, self.cursor.get(), layout)
            .filter(|p| p.fits(self.limit(), self.region.len()))
    }

    /// Moves the write cursor to the start of the buffer, covering the abandoned tail with a
    /// free stub header so both ends of the ring walk over it like any freed allocation.
    fn wrap(&self) {
        let stub = Placement::at(&self.region, self.cursor.get(), Layout::new::<()>())
            .filter(|p| p.end <= self.region.len());

        if let Some(stub) = stub {
            let tail = self.region.len().wrapping_sub(stub.data);
            self.link_back(stub.header, SlotHeader::free(self.back.get(), tail));
        }

        trace!(
            abandoned_from = self.cursor.get(),
            buffer_len = self.region.len(),
            "stack-ring allocator wrapped around"
        );

        self.cursor.set(0);
    }

    /// Whether wrapping the cursor to the start of the buffer would make room for `layout`.
    fn can_wrap_for(&self, layout: Layout) -> bool {
        let front = self.front.get();

        front != NO_SLOT
            && !self.is_wrapped()
            && Placement::at(&self.region, 0, layout)
                .is_some_and(|p| p.fits(front, self.region.len()))
    }

    fn link_back(&self, header_offset: usize, header: SlotHeader) {
        let previous = self.back.get();

        self.region.write_header(header_offset, header);

        if previous == NO_SLOT {
            self.front.set(header_offset);
        } else {
            self.region
                .update_header(previous, |h| h.set_next(header_offset));
        }

        self.back.set(header_offset);
    }

    fn allocate_inner(&self, layout: Layout, is_second_try: bool) -> Result<NonNull<[u8]>> {
        let placement = self.try_place(layout).or_else(|| {
            self.reclaim_front();
            self.try_place(layout)
        });

        if let Some(placement) = placement {
            self.link_back(
                placement.header,
                SlotHeader::used(self.back.get(), layout.size()),
            );
            self.cursor.set(placement.end);
            self.refresh_used();
            self.stats.on_allocate(layout.size());

            return Ok(self.region.slice_at(placement.data, layout.size()));
        }

        if !is_second_try && self.can_wrap_for(layout) {
            self.wrap();
            return self.allocate_inner(layout, true);
        }

        let parent = self.parent.ok_or_else(|| Error::out_of_memory(layout))?;

        trace!(
            size = layout.size(),
            align = layout.align(),
            "stack-ring allocator has no room, forwarding to parent"
        );

        parent.allocate(layout)
    }

    fn live_header_at(&self, data_offset: usize) -> usize {
        let header_offset = self.region.header_offset_for(data_offset);

        assert!(
            self.region.read_header(header_offset).is_used(),
            "allocation at offset {data_offset} is not live in this StackRingAllocator"
        );

        header_offset
    }
}

impl fmt::Debug for StackRingAllocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackRingAllocator")
            .field("region", &self.region)
            .field("front", &self.front)
            .field("back", &self.back)
            .field("cursor", &self.cursor)
            .field("has_parent", &self.parent.is_some())
            .field("stats", &self.stats)
            .field("leak_policy", &self.leak_policy)
            .finish()
    }
}

impl Allocator for StackRingAllocator<'_> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        self.allocate_inner(layout, false)
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

        self.region.update_header(header_offset, SlotHeader::mark_free);
        self.stats.on_deallocate(layout.size());

        // The back is either this allocation or a stub left behind by a wrap.
        if !self.region.read_header(self.back.get()).is_used() {
            self.unwind_back();
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

        if header_offset != self.back.get() {
            return Err(Error::NotResizable);
        }

        // The newest allocation may grow up to the end of the buffer, or up to the front of the
        // ring if it sits in the wrapped part.
        let new_end = offset
            .checked_add(new_size)
            .filter(|end| *end <= self.limit())
            .ok_or(Error::NotResizable)?;

        self.region
            .update_header(header_offset, |h| h.set_size(new_size));
        self.cursor.set(new_end);
        self.refresh_used();
        self.stats.on_deallocate(old_layout.size());
        self.stats.on_allocate(new_size);

        Ok(self.region.slice_at(offset, new_size))
    }

    fn stats(&self) -> AllocatorStats {
        self.stats.snapshot()
    }
}

impl Drop for StackRingAllocator<'_> {
    fn drop(&mut self) {
        self.stats.check_leaks(self.leak_policy, "StackRingAllocator");
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::SLOT_HEADER_SIZE;

    const BLOCK: Layout = Layout::new::<[u64; 8]>();

    fn offset_in(buffer_start: usize, block: NonNull<[u8]>) -> usize {
        block.cast::<u8>().as_ptr().addr() - buffer_start
    }

    #[test]
    fn snake_pattern_wraps_and_reuses_front() {
        let mut buffer = [MaybeUninit::<u8>::uninit(); 512];
        let start = buffer.as_ptr().addr();
        let ring = StackRingAllocator::new(&mut buffer);

        let mut live = VecDeque::new();

        // Fill the ring as far as it goes.
        while let Ok(block) = ring.allocate(BLOCK) {
            live.push_back(block);
        }
        assert!(live.len() >= 2);

        let oldest_offset = offset_in(start, *live.front().unwrap());

        // Free the oldest, then allocate again: must land at the start of the buffer.
        let oldest = live.pop_front().unwrap();
        // SAFETY: Allocated above, not used afterwards.
        unsafe { ring.deallocate(oldest.cast(), BLOCK) };

        let reused = ring.allocate(BLOCK).unwrap();
        assert!(ring.is_wrapped());
        assert!(offset_in(start, reused) <= oldest_offset + SLOT_HEADER_SIZE + 64);
        live.push_back(reused);

        // Keep snaking for a while: free oldest, allocate newest.
        for _ in 0..50 {
            let oldest = live.pop_front().unwrap();
            // SAFETY: Allocated above, not used afterwards.
            unsafe { ring.deallocate(oldest.cast(), BLOCK) };

            live.push_back(ring.allocate(BLOCK).unwrap());
        }

        for block in live {
            // SAFETY: Allocated above, not used afterwards.
            unsafe { ring.deallocate(block.cast(), BLOCK) };
        }

        assert_eq!(ring.cursor(), 0);
        assert_eq!(ring.stats().bytes_allocated, Some(0));
        assert_eq!(ring.stats().bytes_used, Some(0));
    }

    #[test]
    fn wrapped_allocations_unwind_back_past_the_wrap() {
        let mut buffer = [MaybeUninit::<u8>::uninit(); 512];
        let ring = StackRingAllocator::new(&mut buffer);

        let mut live = Vec::new();
        while let Ok(block) = ring.allocate(BLOCK) {
            live.push(block);
        }

        // SAFETY: Allocated above, not used afterwards.
        unsafe { ring.deallocate(live.remove(0).cast(), BLOCK) };

        let wrapped = ring.allocate(BLOCK).unwrap();
        assert!(ring.is_wrapped());

        let cursor_before_wrap = {
            // Freeing the wrapped allocation unwinds through the stub at the tail.
            // SAFETY: Allocated above, not used afterwards.
            unsafe { ring.deallocate(wrapped.cast(), BLOCK) };
            ring.cursor()
        };

        assert!(!ring.is_wrapped());
        assert!(cursor_before_wrap > 0);

        for block in live {
            // SAFETY: Allocated above, not used afterwards.
            unsafe { ring.deallocate(block.cast(), BLOCK) };
        }

        assert_eq!(ring.cursor(), 0);
    }

    #[test]
    fn no_room_when_oldest_is_still_live() {
        let mut buffer = [MaybeUninit::<u8>::uninit(); 512];
        let ring = StackRingAllocator::new(&mut buffer);

        let mut live = Vec::new();
        while let Ok(block) = ring.allocate(BLOCK) {
            live.push(block);
        }

        // Free the newest but one: nothing at the front is free, so there is no room.
        let second_newest = live.len() - 2;
        // SAFETY: Allocated above, not used afterwards.
        unsafe { ring.deallocate(live.remove(second_newest).cast(), BLOCK) };

        assert!(ring.allocate(BLOCK).is_err());

        for block in live {
            // SAFETY: Allocated above, not used afterwards.
            unsafe { ring.deallocate(block.cast(), BLOCK) };
        }
    }

    #[test]
    fn resize_back_allocation() {
        let mut buffer = [MaybeUninit::<u8>::uninit(); 256];
        let ring = StackRingAllocator::new(&mut buffer);
        let small = Layout::new::<u64>();

        let a = ring.allocate(small).unwrap();
        let b = ring.allocate(small).unwrap();

        // SAFETY: Allocated above.
        unsafe {
            assert_eq!(ring.resize(a.cast(), small, 16), Err(Error::NotResizable));

            let b = ring.resize(b.cast(), small, 32).unwrap();
            assert_eq!(b.len(), 32);
            assert_eq!(ring.stats().bytes_allocated, Some(40));

            ring.deallocate(a.cast(), small);
            ring.deallocate(b.cast(), Layout::from_size_align(32, 8).unwrap());
        }

        assert_eq!(ring.cursor(), 0);
    }
}
