use std::alloc::Layout;
use std::cell::Cell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use tracing::trace;

use crate::padding::{PaddingLedger, gap_start};
use crate::{Allocator, AllocatorStats, Error, LeakPolicy, Region, Result, StatsTracker, align_up};

/// A bump allocator over a fixed caller-supplied buffer.
///
/// Each allocation advances a cursor by the request size rounded up to the request alignment.
/// Memory is only reclaimed when the allocation at the top of the buffer (the one ending at the
/// cursor) is freed, which rewinds the cursor to where it stood before that allocation, alignment
/// padding included. Freeing anything else is accepted but reclaims nothing until
/// [`reset()`][Self::reset].
///
/// Requests that do not fit are forwarded to the parent allocator, if one was provided.
///
/// # Example
///
/// ```rust
/// use std::alloc::Layout;
/// use std::mem::MaybeUninit;
///
/// use alloc_kit::{Allocator, LinearAllocator};
///
/// let mut buffer = [MaybeUninit::<u8>::uninit(); 256];
/// let linear = LinearAllocator::new(&mut buffer);
///
/// let layout = Layout::new::<u64>();
/// let a = linear.allocate(layout).unwrap();
/// let b = linear.allocate(layout).unwrap();
///
/// // SAFETY: Allocated above, not used afterwards.
/// unsafe {
///     linear.deallocate(b.cast(), layout);
///     linear.deallocate(a.cast(), layout);
/// }
///
/// assert_eq!(linear.stats().bytes_used, Some(0));
/// ```
pub struct LinearAllocator<'b> {
    region: Region<'b>,

    /// Offset of the first byte not yet handed out.
    cursor: Cell<usize>,

    padding: PaddingLedger,

    parent: Option<&'b dyn Allocator>,
    stats: StatsTracker,
    leak_policy: LeakPolicy,
}

impl<'b> LinearAllocator<'b> {
    /// Creates a linear allocator that fails once `buffer` is exhausted.
    #[must_use]
    pub fn new(buffer: &'b mut [MaybeUninit<u8>]) -> Self {
        Self {
            region: Region::new(buffer),
            cursor: Cell::new(0),
            padding: PaddingLedger::new(),
            parent: None,
            stats: StatsTracker::default(),
            leak_policy: LeakPolicy::default(),
        }
    }

    /// Creates a linear allocator that forwards requests to `parent` once `buffer` is exhausted.
    #[must_use]
    pub fn with_parent(buffer: &'b mut [MaybeUninit<u8>], parent: &'b dyn Allocator) -> Self {
        Self {
            region: Region::new(buffer),
            cursor: Cell::new(0),
            padding: PaddingLedger::new(),
            parent: Some(parent),
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

    /// Number of buffer bytes not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.region
            .len()
            .checked_sub(self.cursor.get())
            .expect("cursor never moves beyond the end of the buffer")
    }

    /// Current cursor position, as an offset from the start of the buffer.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor.get()
    }

    /// Rewinds the cursor to the start of the buffer, logically freeing every allocation made
    /// from the buffer. Allocations forwarded to the parent are unaffected.
    ///
    /// Taking `&mut self` guarantees no borrow of the allocator is alive, though raw pointers
    /// handed out earlier are still the caller's responsibility to abandon.
    pub fn reset(&mut self) {
        self.cursor.set(0);
        self.padding.clear();
        self.stats.reset_allocated();
        self.stats.set_used(0);
    }

    fn set_cursor(&self, cursor: usize) {
        self.cursor.set(cursor);
        self.stats.set_used(cursor);
    }

    fn allocate_from_parent(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        let parent = self.parent.ok_or_else(|| Error::out_of_memory(layout))?;

        trace!(
            size = layout.size(),
            align = layout.align(),
            "linear allocator buffer exhausted, forwarding to parent"
        );

        parent.allocate(layout)
    }
}

impl fmt::Debug for LinearAllocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearAllocator")
            .field("region", &self.region)
            .field("cursor", &self.cursor)
            .field("has_parent", &self.parent.is_some())
            .field("stats", &self.stats)
            .field("leak_policy", &self.leak_policy)
            .finish()
    }
}

impl Allocator for LinearAllocator<'_> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        let cursor = self.cursor.get();

        let placement = gap_start(cursor, |offset| {
            self.region.align_offset_up(offset, layout.align())
        })
        .and_then(|start| {
            let end = start.checked_add(align_up(layout.size(), layout.align())?)?;

            // A zero-sized allocation at the very end would be indistinguishable from memory
            // that starts right after the buffer.
            (end <= self.region.len() && start < self.region.len()).then_some((start, end))
        });

        let Some((start, end)) = placement else {
            return self.allocate_from_parent(layout);
        };

        // SAFETY: `start` came from `gap_start()` and the gap lies below `end`, within the
        // buffer and beyond the cursor, so nothing has been handed out there.
        unsafe {
            self.padding.record(self.region.ptr_at(0), cursor, start);
        }

        self.set_cursor(end);
        self.stats.on_allocate(layout.size());

        Ok(self.region.slice_at(start, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> bool {
        let Some(offset) = self.region.offset_of(ptr) else {
            return match self.parent {
                // SAFETY: The pointer is not ours, so it came from the parent (caller guarantees
                // it came from this allocator, which only hands out buffer or parent memory).
                Some(parent) => unsafe { parent.deallocate(ptr, layout) },
                None => false,
            };
        };

        self.stats.on_deallocate(layout.size());

        let end = align_up(layout.size(), layout.align()).and_then(|size| offset.checked_add(size));

        if end == Some(self.cursor.get()) {
            // SAFETY: Same base as when recording. Gaps below the cursor are never handed out.
            let floor = unsafe { self.padding.floor_of(self.region.ptr_at(0), offset) };
            self.set_cursor(floor);
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

        let old_end = align_up(old_layout.size(), old_layout.align())
            .and_then(|size| offset.checked_add(size));

        if old_end != Some(self.cursor.get()) {
            return Err(Error::NotResizable);
        }

        let new_end = align_up(new_size, old_layout.align())
            .and_then(|size| offset.checked_add(size))
            .filter(|end| *end <= self.region.len())
            .ok_or(Error::NotResizable)?;

        self.set_cursor(new_end);
        self.stats.on_deallocate(old_layout.size());
        self.stats.on_allocate(new_size);

        Ok(self.region.slice_at(offset, new_size))
    }

    fn stats(&self) -> AllocatorStats {
        self.stats.snapshot()
    }
}

impl Drop for LinearAllocator<'_> {
    fn drop(&mut self) {
        self.stats.check_leaks(self.leak_policy, "LinearAllocator");
    }
}
