use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::align_up;

/// A caller-supplied byte buffer that a buffer-backed allocator carves allocations out of.
///
/// All positions are byte offsets from the start of the buffer. Alignment is calculated from the
/// real addresses, so a buffer with any starting alignment can serve any alignment request (at
/// the cost of padding).
#[derive(Debug)]
pub(crate) struct Region<'b> {
    start: NonNull<u8>,
    len: usize,

    _buffer: PhantomData<&'b mut [MaybeUninit<u8>]>,
}

impl<'b> Region<'b> {
    pub(crate) fn new(buffer: &'b mut [MaybeUninit<u8>]) -> Self {
        let len = buffer.len();
        let start = NonNull::from(buffer).cast::<u8>();

        Self {
            start,
            len,
            _buffer: PhantomData,
        }
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Returns the offset of `ptr` if it points into the buffer.
    ///
    /// The one-past-the-end position is not inside: memory of a parent allocator may start there.
    /// Allocators never place anything, zero-sized allocations included, at that position.
    #[must_use]
    pub(crate) fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = ptr.as_ptr().addr().checked_sub(self.start.as_ptr().addr())?;

        (offset < self.len).then_some(offset)
    }

    /// Returns a pointer to the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is beyond the end of the buffer.
    #[must_use]
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(
            offset <= self.len,
            "offset {offset} is out of bounds of a buffer of {} bytes",
            self.len
        );

        // SAFETY: Bounds-checked above; the one-past-the-end pointer is also valid to create.
        unsafe { self.start.add(offset) }
    }

    /// Returns the first offset at or after `offset` whose address is a multiple of `align`.
    ///
    /// Returns `None` on arithmetic overflow. The result may lie beyond the end of the buffer.
    #[must_use]
    pub(crate) fn align_offset_up(&self, offset: usize, align: usize) -> Option<usize> {
        let base = self.start.as_ptr().addr();
        let aligned = align_up(base.checked_add(offset)?, align)?;

        aligned.checked_sub(base)
    }

    /// Returns `offset..offset + len` as an allocation pointer.
    #[must_use]
    pub(crate) fn slice_at(&self, offset: usize, len: usize) -> NonNull<[u8]> {
        debug_assert!(offset.checked_add(len).is_some_and(|end| end <= self.len));

        NonNull::slice_from_raw_parts(self.ptr_at(offset), len)
    }
}
