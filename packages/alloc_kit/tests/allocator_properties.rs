//! Randomized checks of the invariants every allocator in the crate upholds.
#![allow(
    missing_docs,
    reason = "No need for API documentation in test code"
)]

use std::alloc::Layout;
use std::collections::VecDeque;
use std::mem::MaybeUninit;
use std::ops::Range;
use std::ptr::NonNull;

use alloc_kit::{
    Allocator, ArenaAllocator, LeakPolicy, LinearAllocator, StackAllocator, StackRingAllocator,
    SystemAllocator,
};
use proptest::prelude::*;

fn layout_strategy() -> impl Strategy<Value = Layout> {
    (1_usize..200, 0_u32..5)
        .prop_map(|(size, align_shift)| Layout::from_size_align(size, 1 << align_shift).unwrap())
}

fn range_of(block: NonNull<[u8]>) -> Range<usize> {
    let start = block.cast::<u8>().as_ptr().addr();
    start..start + block.len()
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Allocates everything, then frees in reverse order. Returns how many allocations succeeded.
fn allocate_then_free_lifo(allocator: &dyn Allocator, layouts: &[Layout]) -> usize {
    let blocks: Vec<_> = layouts
        .iter()
        .filter_map(|layout| allocator.allocate(*layout).ok().map(|block| (block, *layout)))
        .collect();

    for (block, layout) in blocks.iter().rev() {
        // SAFETY: Allocated above with this layout, never used afterwards.
        let accepted = unsafe { allocator.deallocate(block.cast(), *layout) };
        assert!(accepted);
    }

    blocks.len()
}

proptest! {
    #[test]
    fn linear_lifo_round_trip_is_net_zero(layouts in proptest::collection::vec(layout_strategy(), 1..40)) {
        let mut buffer = vec![MaybeUninit::<u8>::uninit(); 4096];
        let linear = LinearAllocator::new(&mut buffer);

        allocate_then_free_lifo(&linear, &layouts);

        prop_assert_eq!(linear.stats().bytes_allocated, Some(0));
        prop_assert_eq!(linear.cursor(), 0);
    }

    #[test]
    fn stack_lifo_round_trip_is_net_zero(layouts in proptest::collection::vec(layout_strategy(), 1..40)) {
        let mut buffer = vec![MaybeUninit::<u8>::uninit(); 4096];
        let stack = StackAllocator::new(&mut buffer);

        allocate_then_free_lifo(&stack, &layouts);

        prop_assert_eq!(stack.stats().bytes_allocated, Some(0));
        prop_assert_eq!(stack.stats().bytes_used, Some(0));
    }

    #[test]
    fn stack_any_order_round_trip_is_net_zero(
        layouts in proptest::collection::vec(layout_strategy(), 1..40),
        seed in any::<u64>(),
    ) {
        let mut buffer = vec![MaybeUninit::<u8>::uninit(); 4096];
        let stack = StackAllocator::new(&mut buffer);

        let mut blocks: Vec<_> = layouts
            .iter()
            .filter_map(|layout| stack.allocate(*layout).ok().map(|block| (block, *layout)))
            .collect();

        // Deterministic shuffle driven by the generated seed.
        let mut state = seed | 1;
        for i in (1..blocks.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let j = usize::try_from(state % (u64::try_from(i).unwrap() + 1)).unwrap();
            blocks.swap(i, j);
        }

        for (block, layout) in &blocks {
            // SAFETY: Allocated above with this layout, never used afterwards.
            unsafe {
                stack.deallocate(block.cast(), *layout);
            }
        }

        prop_assert_eq!(stack.stats().bytes_allocated, Some(0));
        prop_assert_eq!(stack.stats().bytes_used, Some(0));
    }

    #[test]
    fn stack_ring_live_allocations_never_overlap(
        ops in proptest::collection::vec((layout_strategy(), any::<bool>()), 1..200),
    ) {
        let mut buffer = vec![MaybeUninit::<u8>::uninit(); 1024];
        let buffer_range = {
            let start = buffer.as_ptr().addr();
            start..start + buffer.len()
        };
        let ring = StackRingAllocator::new(&mut buffer);

        let mut live: VecDeque<(NonNull<[u8]>, Layout)> = VecDeque::new();

        for (layout, free_oldest) in ops {
            if let Ok(block) = ring.allocate(layout) {
                let range = range_of(block);

                prop_assert!(range.start >= buffer_range.start && range.end <= buffer_range.end);
                prop_assert_eq!(range.start % layout.align(), 0);
                for (other, _) in &live {
                    prop_assert!(!overlaps(&range, &range_of(*other)));
                }

                live.push_back((block, layout));
            }

            if free_oldest {
                if let Some((block, layout)) = live.pop_front() {
                    // SAFETY: Allocated above with this layout, never used afterwards.
                    unsafe {
                        ring.deallocate(block.cast(), layout);
                    }
                }
            }
        }

        while let Some((block, layout)) = live.pop_front() {
            // SAFETY: Allocated above with this layout, never used afterwards.
            unsafe {
                ring.deallocate(block.cast(), layout);
            }
        }

        prop_assert_eq!(ring.stats().bytes_allocated, Some(0));
        prop_assert_eq!(ring.stats().bytes_used, Some(0));
    }

    #[test]
    fn arena_lifo_round_trip_is_net_zero(layouts in proptest::collection::vec(layout_strategy(), 1..100)) {
        let system = SystemAllocator::new();
        let arena = ArenaAllocator::builder(&system).chunk_size(512).build();

        let succeeded = allocate_then_free_lifo(&arena, &layouts);

        prop_assert_eq!(succeeded, layouts.len());
        prop_assert_eq!(arena.stats().bytes_allocated, Some(0));
    }

    #[test]
    fn arena_reset_replays_identically(layouts in proptest::collection::vec(layout_strategy(), 1..100)) {
        let system = SystemAllocator::new();
        let mut arena = ArenaAllocator::builder(&system)
            .chunk_size(256)
            .leak_policy(LeakPolicy::MayLeak)
            .build();

        let first: Vec<_> = layouts
            .iter()
            .map(|layout| arena.allocate(*layout).unwrap().cast::<u8>())
            .collect();
        let held = system.stats().bytes_allocated;

        arena.reset();

        let second: Vec<_> = layouts
            .iter()
            .map(|layout| arena.allocate(*layout).unwrap().cast::<u8>())
            .collect();

        prop_assert_eq!(first, second);
        prop_assert_eq!(system.stats().bytes_allocated, held);
    }
}

#[test]
fn buffer_allocators_forward_to_parent_and_back() {
    let system = SystemAllocator::new();
    let mut linear_buffer = [MaybeUninit::<u8>::uninit(); 64];
    let mut stack_buffer = [MaybeUninit::<u8>::uninit(); 64];
    let mut ring_buffer = [MaybeUninit::<u8>::uninit(); 64];

    let linear = LinearAllocator::with_parent(&mut linear_buffer, &system);
    let stack = StackAllocator::with_parent(&mut stack_buffer, &system);
    let ring = StackRingAllocator::with_parent(&mut ring_buffer, &system);

    let big = Layout::from_size_align(1000, 8).unwrap();

    let allocators: [&dyn Allocator; 3] = [&linear, &stack, &ring];

    for allocator in allocators {
        let block = allocator.allocate(big).unwrap();
        assert_eq!(system.stats().bytes_allocated, Some(1000));

        // SAFETY: Allocated above with this layout, never used afterwards.
        let accepted = unsafe { allocator.deallocate(block.cast(), big) };
        assert!(accepted);
        assert_eq!(system.stats().bytes_allocated, Some(0));
    }
}
