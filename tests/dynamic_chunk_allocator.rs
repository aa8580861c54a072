//! Integration tests for the dynamic chunk allocator.

use bedrock_memory::allocator::{Allocator, DynamicChunkAllocator};
use bedrock_memory::error::AllocError;
use core::ptr::NonNull;

#[test]
fn spawns_tightest_power_of_two_on_demand() {
    let dynamic = DynamicChunkAllocator::new(3);
    assert_eq!(dynamic.chunk_count(), 0);

    unsafe {
        let ptr = dynamic.alloc_aligned(12, 4).expect("allocation failed");
        assert_eq!(dynamic.chunk_count(), 1);
        assert!(dynamic.has_chunk(16));
        assert_eq!(dynamic.owner_block_size(ptr.as_ptr()), Some(16));
    }
}

#[test]
fn routing_and_chunk_lifecycle() {
    // default_count=3: three 12-byte allocations drain the spawned
    // 16-byte chunk, a fourth fails rather than spawning a duplicate.
    let dynamic = DynamicChunkAllocator::new(3);

    unsafe {
        for _ in 0..3 {
            dynamic.alloc_aligned(12, 4).expect("allocation failed");
        }
        let err = dynamic.alloc_aligned(12, 4).unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(dynamic.chunk_count(), 1);

        // A manually added 32-byte chunk serves 20-byte requests.
        dynamic.add_chunk(32, 3).unwrap();
        assert_eq!(dynamic.chunk_count(), 2);
        let ptr = dynamic.alloc_aligned(20, 8).unwrap();
        assert_eq!(dynamic.owner_block_size(ptr.as_ptr()), Some(32));

        // Removing the 16-byte chunk leaves the 32-byte one; the next
        // 12-byte request is outside its waste cap, so a fresh 16-byte
        // chunk is spawned instead of wasting the 32-byte blocks.
        dynamic.free_chunk(16);
        assert_eq!(dynamic.chunk_count(), 1);
        assert!(!dynamic.has_chunk(16));

        let ptr = dynamic.alloc_aligned(12, 4).unwrap();
        assert!(dynamic.has_chunk(16));
        assert_eq!(dynamic.owner_block_size(ptr.as_ptr()), Some(16));
    }
}

#[test]
fn exact_size_request_reuses_existing_chunk() {
    let dynamic = DynamicChunkAllocator::new(4);

    unsafe {
        // Spawns a 16-byte chunk and makes it the hot cursor.
        dynamic.alloc_aligned(16, 8).unwrap();
        assert_eq!(dynamic.chunk_count(), 1);

        // An exact-size request skips the strict hot path but the sorted
        // walk finds the same chunk; nothing new is spawned.
        let ptr = dynamic.alloc_aligned(16, 8).unwrap();
        assert_eq!(dynamic.chunk_count(), 1);
        assert_eq!(dynamic.owner_block_size(ptr.as_ptr()), Some(16));
    }
}

#[test]
fn waste_cap_spawns_tighter_chunks() {
    let dynamic = DynamicChunkAllocator::new(4);

    unsafe {
        let big = dynamic.alloc_aligned(100, 8).unwrap();
        assert_eq!(dynamic.owner_block_size(big.as_ptr()), Some(128));

        // 20 bytes would fit in a 128-byte block, but that wastes more
        // than 2x; a 32-byte chunk is spawned instead.
        let small = dynamic.alloc_aligned(20, 8).unwrap();
        assert_eq!(dynamic.owner_block_size(small.as_ptr()), Some(32));
        assert_eq!(dynamic.chunk_sizes(), vec![32, 128]);
    }
}

#[test]
fn sub_word_requests_are_word_sized() {
    let dynamic = DynamicChunkAllocator::new(4);

    unsafe {
        let ptr = dynamic.alloc_aligned(1, 1).unwrap();
        let word = core::mem::size_of::<*mut u8>();
        assert_eq!(dynamic.owner_block_size(ptr.as_ptr()), Some(word));
    }
}

#[test]
fn dealloc_routes_by_ownership() {
    let dynamic = DynamicChunkAllocator::new(4);

    unsafe {
        let mut ptrs = Vec::new();
        for size in [12usize, 40, 12, 100, 40] {
            ptrs.push(dynamic.alloc_aligned(size, 8).unwrap());
        }

        // Every pointer the allocator handed out finds its way home.
        for ptr in ptrs {
            dynamic.dealloc(ptr).expect("owner not found");
        }
    }
}

#[test]
fn unowned_pointer_is_reported_and_dropped() {
    let dynamic = DynamicChunkAllocator::new(4);

    unsafe {
        dynamic.alloc_aligned(16, 8).unwrap();

        let mut outside = 0u64;
        let foreign = NonNull::from(&mut outside).cast::<u8>();
        assert!(matches!(
            dynamic.dealloc(foreign),
            Err(AllocError::UnownedPointer)
        ));
    }
}

#[test]
fn reset_forwards_to_children() {
    let dynamic = DynamicChunkAllocator::new(2);

    unsafe {
        dynamic.alloc_aligned(12, 4).unwrap();
        dynamic.alloc_aligned(12, 4).unwrap();
        assert!(dynamic.alloc_aligned(12, 4).is_err());

        dynamic.reset();
        assert!(dynamic.alloc_aligned(12, 4).is_ok());
        assert_eq!(dynamic.chunk_count(), 1);
    }
}

#[test]
fn free_is_recoverable() {
    let dynamic = DynamicChunkAllocator::new(4);

    unsafe {
        dynamic.alloc_aligned(12, 4).unwrap();
        dynamic.alloc_aligned(50, 8).unwrap();
        assert_eq!(dynamic.chunk_count(), 2);

        dynamic.free();
        assert_eq!(dynamic.chunk_count(), 0);

        // Unlike the other kinds the allocator keeps working.
        assert!(dynamic.alloc_aligned(12, 4).is_ok());
        assert_eq!(dynamic.chunk_count(), 1);
    }
}

#[test]
fn add_chunk_rejects_sub_word_sizes() {
    let dynamic = DynamicChunkAllocator::new(4);
    assert!(matches!(
        dynamic.add_chunk(2, 4),
        Err(AllocError::InvalidConfig { .. })
    ));

    // Removing a size that was never added warns and does nothing.
    dynamic.free_chunk(64);
    assert_eq!(dynamic.chunk_count(), 0);
}

#[test]
fn can_fit_reflects_spawned_sizes() {
    let dynamic = DynamicChunkAllocator::new(4);
    assert!(!dynamic.can_fit(8));

    unsafe {
        dynamic.alloc_aligned(48, 8).unwrap();
    }
    assert!(dynamic.can_fit(64));
    assert!(dynamic.can_fit(8));
    assert!(!dynamic.can_fit(65));
}

#[test]
fn unsupported_operations() {
    let dynamic = DynamicChunkAllocator::new(4);
    unsafe {
        assert!(matches!(
            dynamic.alloc(),
            Err(AllocError::Unsupported { .. })
        ));
        assert!(matches!(
            dynamic.rewind(),
            Err(AllocError::Unsupported { .. })
        ));
    }
}
