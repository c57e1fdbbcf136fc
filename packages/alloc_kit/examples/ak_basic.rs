//! Basic usage of the `alloc_kit` crate:
//!
//! * Carving allocations out of a fixed buffer with a stack allocator.
//! * Falling back to a parent allocator once the buffer is full.
//! * Reusing arena memory across iterations with `reset()`.

use std::alloc::Layout;
use std::mem::MaybeUninit;

use alloc_kit::{Allocator, ArenaAllocator, LeakPolicy, StackAllocator, SystemAllocator};

fn main() {
    let system = SystemAllocator::new();

    let mut buffer = [MaybeUninit::<u8>::uninit(); 256];
    let stack = StackAllocator::with_parent(&mut buffer, &system);

    let small = Layout::new::<[u64; 4]>();
    let large = Layout::new::<[u64; 128]>();

    // The small block fits in the buffer, the large one is forwarded to the system allocator.
    let a = stack.allocate(small).unwrap();
    let b = stack.allocate(large).unwrap();

    println!("Stack allocator: {:?}", stack.stats());
    println!("System allocator: {:?}", system.stats());

    // Frees can happen in any order. The buffer space of `a` is reclaimed once nothing newer
    // than it is still live.
    // SAFETY: Allocated above with these layouts and not used afterwards.
    unsafe {
        stack.deallocate(a.cast(), small);
        stack.deallocate(b.cast(), large);
    }

    println!("After freeing everything: {:?}", stack.stats());

    // An arena hands out memory from blocks it requests from its parent. Individual frees are
    // optional: `reset()` discards everything at once while keeping the blocks for reuse.
    let mut arena = ArenaAllocator::builder(&system)
        .chunk_size(4096)
        .leak_policy(LeakPolicy::MayLeak)
        .build();

    for frame in 0..3 {
        for _ in 0..100 {
            _ = arena.allocate(small).unwrap();
        }

        println!(
            "Frame {frame}: {} blocks, {:?} bytes held from the system allocator",
            arena.block_count(),
            system.stats().bytes_allocated
        );

        arena.reset();
    }
}
