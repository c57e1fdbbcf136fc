#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! An open-addressing hash table whose keys and values live in dense arrays, separate from the
//! linker ("jump") table that maps hashes to entry positions.
//!
//! Keeping the entries dense makes iteration over [`JumpTable::keys()`] and
//! [`JumpTable::values()`] a plain slice walk, while the linker table stays small because it
//! only holds `u32` indexes. Probing is linear with a power-of-two mask. Deleted slots become
//! gravestones that are cleared by the next rehash, which also compacts away entries orphaned by
//! the O(1) [`JumpTable::mark_removed()`].
//!
//! All memory comes from an [`alloc_kit::Allocator`] supplied at construction, and hashing is
//! delegated to a [`KeyHasher`] - [`FoldKeyHasher`] by default.
//!
//! Keys with several values are supported through the [`multi`] operations.
//!
//! # Example
//!
//! ```
//! use alloc_kit::SystemAllocator;
//! use jump_table::JumpTable;
//!
//! let system = SystemAllocator::new();
//! let mut scores = JumpTable::new(&system);
//!
//! scores.set("alice", 10);
//! scores.set("bob", 7);
//! *scores.get_mut(&"bob").unwrap() += 1;
//!
//! assert_eq!(scores.get(&"bob"), Some(&8));
//! assert_eq!(scores.values().iter().sum::<i32>(), 18);
//! ```

mod builder;
mod hasher;
pub mod multi;
mod table;

pub use builder::*;
pub use hasher::*;
pub use table::{DEFAULT_SEED, Found, JumpTable};
