use std::alloc::Layout;

use thiserror::Error;

/// Errors reported by an [`Allocator`][crate::Allocator] and by containers built on top of one.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The allocator (and its parent chain, if any) could not provide the requested memory.
    #[error("out of memory: could not allocate {size} bytes aligned to {align}")]
    OutOfMemory {
        /// Number of bytes requested.
        size: usize,

        /// Alignment requested.
        align: usize,
    },

    /// The allocator never supports this operation, regardless of its state.
    ///
    /// The caller needs a fallback path (e.g. allocate + copy + free instead of resize).
    #[error("the operation is not supported by this allocator")]
    UnsupportedAction,

    /// This specific allocation cannot be resized in place right now, even though the allocator
    /// generally supports resizing. For example, it is not the most recent allocation.
    #[error("the allocation cannot be resized in place")]
    NotResizable,
}

impl Error {
    /// Creates an [`Error::OutOfMemory`] describing a failed request for `layout`.
    #[must_use]
    pub fn out_of_memory(layout: Layout) -> Self {
        Self::OutOfMemory {
            size: layout.size(),
            align: layout.align(),
        }
    }
}

/// A specialized `Result` type for allocator operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
