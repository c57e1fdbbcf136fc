use std::alloc::Layout;
use std::cell::Cell;
use std::ptr::NonNull;
use std::thread;

use crate::{Error, Result};

/// A source of raw memory with explicit allocate, deallocate and resize operations.
///
/// Every concrete allocator in this crate implements this trait and every container that needs
/// memory takes a `&dyn Allocator`, never assuming a specific implementation.
///
/// Allocators are single-threaded and use interior mutability, so all operations take `&self`.
/// This allows multiple containers (and child allocators) to share one allocator.
///
/// # Example
///
/// ```rust
/// use std::alloc::Layout;
///
/// use alloc_kit::{Allocator, SystemAllocator};
///
/// let allocator = SystemAllocator::new();
/// let layout = Layout::new::<u64>();
///
/// let memory = allocator.allocate(layout).unwrap();
/// assert!(memory.len() >= 8);
///
/// // SAFETY: The memory came from this allocator with this layout and is not used afterwards.
/// let accepted = unsafe { allocator.deallocate(memory.cast(), layout) };
/// assert!(accepted);
/// ```
pub trait Allocator {
    /// Allocates a block of memory satisfying `layout`.
    ///
    /// The returned memory is uninitialized. The length of the returned slice is the actual size
    /// of the block, which may exceed the requested size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if neither this allocator nor its parent can satisfy the
    /// request, or [`Error::UnsupportedAction`] if the allocator cannot allocate at all.
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>>;

    /// Returns a block of memory to the allocator.
    ///
    /// Returns `true` if the deallocation was accepted. Accepted does not imply that the memory
    /// can be reused immediately - a stack allocator accepts out-of-order frees but only reclaims
    /// the memory once everything allocated after it has also been freed.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by this allocator for `layout` (or a layout
    /// produced by a successful [`resize()`][Self::resize]) and has not already been deallocated.
    /// The memory must not be accessed after this call, regardless of the return value.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> bool;

    /// Attempts to grow or shrink an allocation in place to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotResizable`] if this specific allocation cannot be resized right now,
    /// [`Error::UnsupportedAction`] if the allocator never resizes, or [`Error::OutOfMemory`] if
    /// resizing would need more memory than is available.
    ///
    /// # Safety
    ///
    /// The same requirements as [`deallocate()`][Self::deallocate] apply to `ptr` and
    /// `old_layout`. On success, the caller must treat the allocation as having the layout
    /// `(new_size, old_layout.align())` from then on.
    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<NonNull<[u8]>> {
        _ = (ptr, old_layout, new_size);
        Err(Error::UnsupportedAction)
    }

    /// Returns a snapshot of the allocator's bookkeeping counters.
    fn stats(&self) -> AllocatorStats;
}

impl<A: Allocator + ?Sized> Allocator for &A {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        (**self).allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> bool {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { (**self).deallocate(ptr, layout) }
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<NonNull<[u8]>> {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { (**self).resize(ptr, old_layout, new_size) }
    }

    fn stats(&self) -> AllocatorStats {
        (**self).stats()
    }
}

/// Bookkeeping counters reported by an [`Allocator`].
///
/// A value of `None` means the allocator does not track that counter.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct AllocatorStats {
    /// Bytes currently handed out to clients. Decremented on every accepted deallocation, even if
    /// the memory is not yet physically reusable.
    pub bytes_allocated: Option<usize>,

    /// Backing bytes currently consumed, including headers and alignment padding.
    pub bytes_used: Option<usize>,

    /// Highest value `bytes_allocated` has reached.
    pub max_bytes_allocated: Option<usize>,

    /// Highest value `bytes_used` has reached.
    pub max_bytes_used: Option<usize>,
}

/// What an allocator does if it is dropped while clients still hold allocations from it.
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
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum LeakPolicy {
    /// Outstanding allocations are silently abandoned when the allocator is dropped. The default
    /// in release builds, and the opt-out for "allocate freely, discard wholesale" scratch use.
    MayLeak,

    /// The allocator panics if any allocation is still outstanding when it is dropped. The
    /// default in debug builds.
    MustNotLeak,
}

impl Default for LeakPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::MustNotLeak
        } else {
            Self::MayLeak
        }
    }
}

/// Called by containers when a growth path that does not tolerate failure runs out of memory.
///
/// Containers expose `try_` variants of their growth operations for callers that expect
/// allocation to fail; the non-`try_` variants route failures to a handler of this type.
pub type OutOfMemoryHandler = fn(Error) -> !;

/// The default [`OutOfMemoryHandler`]. Logs the failure and panics.
#[cfg_attr(test, mutants::skip)] // Mutating a diverging function leaves nothing to observe.
pub fn default_out_of_memory_handler(error: Error) -> ! {
    tracing::error!(%error, "allocation failed in a growth path that does not tolerate failure");
    panic!("{error}");
}

/// Rounds `value` up to the next multiple of `align`, which must be a power of two.
///
/// Returns `None` on overflow.
#[must_use]
pub fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two(), "alignment {align} is not a power of two");

    let mask = align.wrapping_sub(1);
    value.checked_add(mask).map(|v| v & !mask)
}

/// Running counters behind [`AllocatorStats`], shared by the concrete allocators.
#[derive(Debug, Default)]
pub(crate) struct StatsTracker {
    bytes_allocated: Cell<usize>,
    bytes_used: Cell<usize>,
    max_bytes_allocated: Cell<usize>,
    max_bytes_used: Cell<usize>,
}

impl StatsTracker {
    pub(crate) fn on_allocate(&self, bytes: usize) {
        let allocated = self
            .bytes_allocated
            .get()
            .checked_add(bytes)
            .expect("cannot have more bytes allocated than fit in virtual memory");

        self.bytes_allocated.set(allocated);
        self.max_bytes_allocated
            .set(self.max_bytes_allocated.get().max(allocated));
    }

    pub(crate) fn on_deallocate(&self, bytes: usize) {
        self.bytes_allocated.set(
            self.bytes_allocated
                .get()
                .checked_sub(bytes)
                .expect("deallocated more bytes than were ever allocated"),
        );
    }

    pub(crate) fn set_used(&self, bytes: usize) {
        self.bytes_used.set(bytes);
        self.max_bytes_used.set(self.max_bytes_used.get().max(bytes));
    }

    pub(crate) fn reset_allocated(&self) {
        self.bytes_allocated.set(0);
    }

    pub(crate) fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            bytes_allocated: Some(self.bytes_allocated.get()),
            bytes_used: Some(self.bytes_used.get()),
            max_bytes_allocated: Some(self.max_bytes_allocated.get()),
            max_bytes_used: Some(self.max_bytes_used.get()),
        }
    }

    /// Enforces the leak policy. Called from the owning allocator's `Drop`.
    pub(crate) fn check_leaks(&self, policy: LeakPolicy, allocator_name: &str) {
        if policy == LeakPolicy::MustNotLeak && !thread::panicking() {
            assert!(
                self.bytes_allocated.get() == 0,
                "dropped {allocator_name} with {} bytes still allocated and a policy that forbids leaks",
                self.bytes_allocated.get()
            );
        }
    }
}
