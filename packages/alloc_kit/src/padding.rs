use std::cell::Cell;
use std::ptr::NonNull;

/// Bytes at the end of an alignment gap used to remember where the gap started.
pub(crate) const PADDING_RECORD_SIZE: usize = 2 * size_of::<usize>();

const NO_RECORD: usize = usize::MAX;

/// Remembers where the cursor of a bump allocator stood before every allocation that had to skip
/// bytes to reach its alignment, so freeing allocations in LIFO order rewinds the cursor exactly
/// to where it was instead of stranding the skipped bytes.
///
/// The records form a chain kept inside the skipped bytes themselves: the gap in front of a padded
/// allocation ends with `[cursor before the gap, start of the previous padded allocation]`. Gaps
/// too small to hold a record are widened by whole alignment steps, see [`gap_start()`].
///
/// All positions are offsets from a base pointer supplied by the allocator, which must stay the
/// same between recording a gap and reading it back.
#[derive(Debug)]
pub(crate) struct PaddingLedger {
    /// Start offset of the newest padded allocation still on record, or `NO_RECORD`.
    newest: Cell<usize>,
}

/// Start offset for an allocation bumped from `cursor`, given `align_up` mapping an offset to the
/// first suitably aligned offset at or after it.
///
/// Either the cursor itself (no gap) or an aligned offset leaving room for a padding record.
/// Returns `None` on arithmetic overflow.
pub(crate) fn gap_start(cursor: usize, align_up: impl Fn(usize) -> Option<usize>) -> Option<usize> {
    let start = align_up(cursor)?;

    if start == cursor {
        return Some(start);
    }

    align_up(cursor.checked_add(PADDING_RECORD_SIZE)?)
}

impl PaddingLedger {
    pub(crate) const fn new() -> Self {
        Self {
            newest: Cell::new(NO_RECORD),
        }
    }

    /// Records the gap `cursor..start` in front of a new allocation at `start`. Does nothing if
    /// there is no gap.
    ///
    /// # Safety
    ///
    /// `start` must come from [`gap_start()`] for this `cursor`, and the bytes `cursor..start`
    /// after `base` must be valid for writes and not handed out to anyone.
    pub(crate) unsafe fn record(&self, base: NonNull<u8>, cursor: usize, start: usize) {
        if start == cursor {
            return;
        }

        let at = start
            .checked_sub(PADDING_RECORD_SIZE)
            .filter(|at| *at >= cursor)
            .expect("gaps are always widened to fit a padding record");

        // SAFETY: In bounds of the gap, per the safety requirements.
        let slot = unsafe { base.add(at) }.cast::<[usize; 2]>();

        // SAFETY: The gap is writable and nobody else references it. Unaligned, as gaps are.
        unsafe {
            slot.write_unaligned([cursor, self.newest.get()]);
        }

        self.newest.set(start);
    }

    /// Where the cursor stood before the allocation at `start` was made. Forgets the record of
    /// that allocation, so this must only be called when rewinding over it.
    ///
    /// # Safety
    ///
    /// `base` must be the same as when recording, and every recorded gap below the cursor must
    /// still be intact (not handed out since).
    pub(crate) unsafe fn floor_of(&self, base: NonNull<u8>, start: usize) -> usize {
        if self.newest.get() != start {
            return start;
        }

        let at = start
            .checked_sub(PADDING_RECORD_SIZE)
            .expect("a recorded allocation always has a gap in front of it");

        // SAFETY: The record was written at this offset by `record()` and is still intact.
        let [floor, previous] = unsafe { base.add(at).cast::<[usize; 2]>().read_unaligned() };

        self.newest.set(previous);
        floor
    }

    /// Forgets every record, for when the cursor jumps somewhere else.
    pub(crate) fn clear(&self) {
        self.newest.set(NO_RECORD);
    }
}
