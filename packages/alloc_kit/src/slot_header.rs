use std::alloc::Layout;
use std::ptr::NonNull;

use crate::Region;

/// Marks a header offset that refers to no slot.
pub(crate) const NO_SLOT: usize = usize::MAX;

const USED_BIT: usize = 1 << (usize::BITS - 1);

const HEADER_SIZE: usize = size_of::<SlotHeader>();
const HEADER_ALIGN: usize = align_of::<SlotHeader>();

/// Inline header placed immediately before every allocation made by the stack-like allocators.
///
/// Headers form a doubly linked chain in allocation order, entirely within the backing buffer.
/// An allocation is live only while its header has the used bit set.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SlotHeader {
    /// Offset of the header of the previous (older) allocation, or [`NO_SLOT`].
    prev: usize,

    /// Offset of the header of the next (newer) allocation, or [`NO_SLOT`].
    next: usize,

    /// Payload size, with the top bit set while the allocation is in use.
    size_and_flag: usize,
}

impl SlotHeader {
    pub(crate) fn used(prev: usize, size: usize) -> Self {
        assert!(
            size & USED_BIT == 0,
            "allocation size {size} collides with the in-use flag"
        );

        Self {
            prev,
            next: NO_SLOT,
            size_and_flag: size | USED_BIT,
        }
    }

    pub(crate) fn free(prev: usize, size: usize) -> Self {
        Self {
            size_and_flag: size,
            ..Self::used(prev, size)
        }
    }

    pub(crate) fn prev(&self) -> usize {
        self.prev
    }

    pub(crate) fn next(&self) -> usize {
        self.next
    }

    pub(crate) fn size(&self) -> usize {
        self.size_and_flag & !USED_BIT
    }

    pub(crate) fn is_used(&self) -> bool {
        self.size_and_flag & USED_BIT != 0
    }

    /// Offset one past the payload of the allocation whose header lives at `header_offset`.
    pub(crate) fn payload_end(&self, header_offset: usize) -> usize {
        header_offset
            .checked_add(HEADER_SIZE)
            .and_then(|data| data.checked_add(self.size()))
            .expect("headers only describe allocations that fit in the buffer")
    }
}

/// Where an allocation would go if placed at a given cursor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Placement {
    pub(crate) header: usize,
    pub(crate) data: usize,
    pub(crate) end: usize,
}

impl Placement {
    /// Places a header and a payload for `layout` at or after `cursor`.
    ///
    /// The payload directly follows the header, so the header can always be found from the
    /// payload pointer. Returns `None` on arithmetic overflow; the placement may extend beyond
    /// the end of the buffer, which the caller checks.
    pub(crate) fn at(region: &Region<'_>, cursor: usize, layout: Layout) -> Option<Self> {
        let align = layout.align().max(HEADER_ALIGN);
        let data = region.align_offset_up(cursor.checked_add(HEADER_SIZE)?, align)?;
        let header = data.checked_sub(HEADER_SIZE)?;
        let end = data.checked_add(layout.size())?;

        Some(Self { header, data, end })
    }

    /// Whether the placement ends at or before `limit` with its payload starting inside a buffer
    /// of `buffer_len` bytes. A zero-sized payload at the very end of the buffer would be
    /// indistinguishable from memory that starts right after it.
    pub(crate) fn fits(&self, limit: usize, buffer_len: usize) -> bool {
        self.end <= limit && self.data < buffer_len
    }
}

/// Header access on top of a [`Region`].
impl Region<'_> {
    /// Offset of the header describing the payload at `data_offset`.
    ///
    /// # Panics
    ///
    /// Panics if there is no room for a header before `data_offset`.
    pub(crate) fn header_offset_for(&self, data_offset: usize) -> usize {
        data_offset
            .checked_sub(HEADER_SIZE)
            .expect("pointer does not refer to an allocation made from this buffer")
    }

    pub(crate) fn read_header(&self, header_offset: usize) -> SlotHeader {
        let ptr = self.header_ptr(header_offset);

        // SAFETY: Headers are only read at offsets where a header was previously written, the
        // pointer is in bounds and aligned (checked by `header_ptr()`).
        unsafe { ptr.read() }
    }

    pub(crate) fn write_header(&self, header_offset: usize, header: SlotHeader) {
        let ptr = self.header_ptr(header_offset);

        // SAFETY: The pointer is in bounds and aligned (checked by `header_ptr()`) and header
        // space is never handed out to clients, so no reference to it can exist.
        unsafe {
            ptr.write(header);
        }
    }

    pub(crate) fn update_header(&self, header_offset: usize, f: impl FnOnce(&mut SlotHeader)) {
        let mut header = self.read_header(header_offset);
        f(&mut header);
        self.write_header(header_offset, header);
    }

    fn header_ptr(&self, header_offset: usize) -> NonNull<SlotHeader> {
        let end = header_offset
            .checked_add(HEADER_SIZE)
            .expect("header offset cannot be near usize::MAX");
        assert!(
            end <= self.len(),
            "header at {header_offset} extends beyond a buffer of {} bytes",
            self.len()
        );

        let ptr = self.ptr_at(header_offset);
        assert!(
            ptr.as_ptr().addr() % HEADER_ALIGN == 0,
            "header at {header_offset} is misaligned"
        );

        ptr.cast::<SlotHeader>()
    }
}

impl SlotHeader {
    pub(crate) fn set_prev(&mut self, prev: usize) {
        self.prev = prev;
    }

    pub(crate) fn set_next(&mut self, next: usize) {
        self.next = next;
    }

    pub(crate) fn set_size(&mut self, size: usize) {
        let used = self.size_and_flag & USED_BIT;

        assert!(
            size & USED_BIT == 0,
            "allocation size {size} collides with the in-use flag"
        );

        self.size_and_flag = size | used;
    }

    pub(crate) fn mark_free(&mut self) {
        self.size_and_flag &= !USED_BIT;
    }
}

/// Size of the inline header preceding every stack allocation, in bytes.
pub const SLOT_HEADER_SIZE: usize = HEADER_SIZE;
