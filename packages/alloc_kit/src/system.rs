use std::alloc::{Layout, alloc, dealloc, realloc};
use std::ptr::{self, NonNull};

use crate::{Allocator, AllocatorStats, Error, LeakPolicy, Result, StatsTracker};

/// A thin [`Allocator`] over the process heap.
///
/// Tracks how many bytes are currently allocated through it but not how much the heap itself
/// consumes, so [`AllocatorStats::bytes_used`] and [`AllocatorStats::max_bytes_used`] are
/// reported as not tracked.
///
/// This is the usual parent of an [`ArenaAllocator`][crate::ArenaAllocator] and the usual backing
/// store of containers that do not need a specialized allocator.
///
/// # Example
///
/// ```rust
/// use std::alloc::Layout;
///
/// use alloc_kit::{Allocator, SystemAllocator};
///
/// let system = SystemAllocator::new();
/// let layout = Layout::array::<u32>(16).unwrap();
///
/// let block = system.allocate(layout).unwrap();
/// assert_eq!(system.stats().bytes_allocated, Some(64));
///
/// // SAFETY: Allocated above with the same layout, not used afterwards.
/// unsafe { system.deallocate(block.cast(), layout) };
/// assert_eq!(system.stats().bytes_allocated, Some(0));
/// ```
#[derive(Debug, Default)]
pub struct SystemAllocator {
    stats: StatsTracker,
    leak_policy: LeakPolicy,
}

impl SystemAllocator {
    /// Creates a new system allocator with the default [leak policy][LeakPolicy].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new system allocator with the specified leak policy.
    #[must_use]
    pub fn with_leak_policy(leak_policy: LeakPolicy) -> Self {
        Self {
            stats: StatsTracker::default(),
            leak_policy,
        }
    }
}

/// A well-aligned non-null pointer for zero-sized allocations, which never touch the heap.
fn dangling(layout: Layout) -> NonNull<[u8]> {
    let ptr = NonNull::new(ptr::without_provenance_mut::<u8>(layout.align()))
        .expect("alignment is never zero");

    NonNull::slice_from_raw_parts(ptr, 0)
}

impl Allocator for SystemAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        if layout.size() == 0 {
            return Ok(dangling(layout));
        }

        // SAFETY: The layout is not zero-sized (checked above).
        let ptr = unsafe { alloc(layout) };

        let ptr = NonNull::new(ptr).ok_or_else(|| Error::out_of_memory(layout))?;
        self.stats.on_allocate(layout.size());

        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> bool {
        if layout.size() == 0 {
            return true;
        }

        // SAFETY: Forwarding safety requirements to the caller - the pointer came from
        // `allocate()` with the same layout, which obtained it from the global heap.
        unsafe {
            dealloc(ptr.as_ptr(), layout);
        }

        self.stats.on_deallocate(layout.size());
        true
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<NonNull<[u8]>> {
        let new_layout = Layout::from_size_align(new_size, old_layout.align())
            .map_err(|_| Error::OutOfMemory {
                size: new_size,
                align: old_layout.align(),
            })?;

        if old_layout.size() == 0 {
            return self.allocate(new_layout);
        }

        if new_size == 0 {
            // SAFETY: Forwarding safety requirements to the caller.
            unsafe {
                self.deallocate(ptr, old_layout);
            }

            return Ok(dangling(new_layout));
        }

        // SAFETY: The pointer came from the global heap with `old_layout` (caller guarantees) and
        // `new_size` is non-zero and forms a valid layout with the old alignment (checked above).
        let new_ptr = unsafe { realloc(ptr.as_ptr(), old_layout, new_size) };

        let new_ptr = NonNull::new(new_ptr).ok_or_else(|| Error::out_of_memory(new_layout))?;

        self.stats.on_deallocate(old_layout.size());
        self.stats.on_allocate(new_size);

        Ok(NonNull::slice_from_raw_parts(new_ptr, new_size))
    }

    fn stats(&self) -> AllocatorStats {
        let tracked = self.stats.snapshot();

        AllocatorStats {
            bytes_used: None,
            max_bytes_used: None,
            ..tracked
        }
    }
}

impl Drop for SystemAllocator {
    fn drop(&mut self) {
        self.stats.check_leaks(self.leak_policy, "SystemAllocator");
    }
}
