#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Containers that hand out small integer handles instead of references, backed by an
//! [`alloc_kit::Allocator`].
//!
//! * [`BucketArray`] stores items in fixed buckets that never move, so an item stays at the same
//!   address for its whole life. Handles are plain indexes.
//! * [`WeakBucketArray`] adds a generation to every slot, so that a handle to a removed item is
//!   reported as missing instead of silently resolving to whatever reused the slot.
//! * [`SlotArray`] keeps items densely packed for fast iteration and reaches them through an
//!   indirection table, so handles survive the swap-with-last removal.
//!
//! Freed slots are threaded into an intrusive free list and reused by later inserts. Growth that
//! cannot be satisfied calls the out-of-memory handler configured on the builder, while the
//! `try_` variants return the error instead.
//!
//! # Example
//!
//! ```
//! use alloc_kit::SystemAllocator;
//! use handle_arrays::{SlotArray, WeakBucketArray};
//!
//! let system = SystemAllocator::new();
//!
//! let mut particles = SlotArray::new(&system);
//! let spark = particles.insert(1.5_f32);
//! _ = particles.insert(2.5_f32);
//! assert_eq!(particles.as_slice().iter().sum::<f32>(), 4.0);
//! assert_eq!(*particles.get(spark), 1.5);
//!
//! let mut entities = WeakBucketArray::new(&system);
//! let player = entities.insert("player");
//! entities.remove(player);
//! assert!(entities.get(player).is_none());
//! ```

mod bucket_array;
mod builders;
mod drop_policy;
mod raw_buckets;
mod slot_array;
mod weak_bucket_array;

pub use bucket_array::{BucketArray, Handle};
pub use builders::*;
pub use drop_policy::*;
pub use raw_buckets::{BUCKET_GRANULARITY, BUCKET_ITEMS, LEAST_BUCKETS_COUNT, LEAST_ITEMS_COUNT};
pub use slot_array::{SlotArray, SlotHandle};
pub use weak_bucket_array::{WeakBucketArray, WeakHandle};
