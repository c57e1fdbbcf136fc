#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Single-threaded allocators that all implement one dynamic [`Allocator`] interface, so that
//! containers can be handed any of them as a `&dyn Allocator` without knowing which one it is.
//!
//! * [`SystemAllocator`] - the global heap, usually the parent of everything else.
//! * [`LinearAllocator`] - bump allocation over a fixed buffer; only the newest allocation can
//!   be freed or resized.
//! * [`StackAllocator`] - LIFO allocation over a fixed buffer with an inline header per
//!   allocation, so out-of-order frees are reclaimed once everything above them is freed.
//! * [`StackRingAllocator`] - a stack that wraps around to the start of its buffer, reclaiming
//!   the oldest allocations once they are freed.
//! * [`ArenaAllocator`] - bump allocation over a growing chain of blocks obtained from a parent,
//!   with cheap [`reset()`][ArenaAllocator::reset].
//!
//! The buffer-backed allocators optionally forward requests that do not fit to a parent
//! allocator and route deallocations of the parent's memory back to it.
//!
//! [`RawArray`] is the building block containers use to hold typed storage obtained from an
//! allocator.
//!
//! # Example
//!
//! ```
//! use std::alloc::Layout;
//! use std::mem::MaybeUninit;
//!
//! use alloc_kit::{Allocator, StackAllocator, SystemAllocator};
//!
//! let system = SystemAllocator::new();
//! let mut buffer = [MaybeUninit::<u8>::uninit(); 1024];
//! let stack = StackAllocator::with_parent(&mut buffer, &system);
//!
//! let layout = Layout::new::<[u32; 16]>();
//! let a = stack.allocate(layout).unwrap();
//! let b = stack.allocate(layout).unwrap();
//!
//! // Out of order: `a` is only reclaimed once `b` is also freed.
//! // SAFETY: Allocated above with this layout, never used afterwards.
//! unsafe {
//!     stack.deallocate(a.cast(), layout);
//!     stack.deallocate(b.cast(), layout);
//! }
//!
//! assert_eq!(stack.stats().bytes_used, Some(0));
//! ```

mod allocator;
mod arena;
mod arena_builder;
mod error;
mod linear;
mod padding;
mod raw_array;
mod region;
mod slot_header;
mod stack;
mod stack_ring;
mod system;

pub use allocator::{
    Allocator, AllocatorStats, LeakPolicy, OutOfMemoryHandler, align_up,
    default_out_of_memory_handler,
};
pub(crate) use allocator::StatsTracker;
pub use arena::{ArenaAllocator, double_chunk_size, max_chunk_size};
pub use arena_builder::ArenaAllocatorBuilder;
pub use error::*;
pub use linear::LinearAllocator;
pub use raw_array::RawArray;
pub(crate) use region::Region;
pub use slot_header::SLOT_HEADER_SIZE;
pub(crate) use slot_header::{NO_SLOT, Placement, SlotHeader};
pub use stack::StackAllocator;
pub use stack_ring::StackRingAllocator;
pub use system::SystemAllocator;
