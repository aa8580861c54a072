//! Integration tests for the pool allocator.

use bedrock_memory::allocator::{AllocBox, Allocator, PoolAllocator, TypedAlloc};
use bedrock_memory::error::AllocError;

#[test]
fn basic_alloc_write_dealloc() {
    let pool = PoolAllocator::new(128, 8, 16);
    assert!(!pool.is_inert());

    unsafe {
        let ptr = pool.alloc().expect("allocation failed");
        std::ptr::write_bytes(ptr.as_ptr(), 0x42, 128);
        assert_eq!(*ptr.as_ptr(), 0x42);
        pool.dealloc(ptr).unwrap();
    }
}

#[test]
fn round_trip_full_capacity() {
    // Pool(block_size=16, count=100, align=4): drain it, overflow it,
    // check reuse and reset behavior.
    let pool = PoolAllocator::new(16, 100, 4);

    unsafe {
        let mut ptrs = Vec::new();
        for _ in 0..100 {
            ptrs.push(pool.alloc().expect("pool drained too early"));
        }

        // 101st allocation fails with exhaustion.
        let err = pool.alloc().unwrap_err();
        assert!(err.is_exhausted());

        // Fresh free list hands blocks out in ascending order, stride 16.
        for pair in ptrs.windows(2) {
            let lo = pair[0].as_ptr() as usize;
            let hi = pair[1].as_ptr() as usize;
            assert_eq!(hi - lo, 16);
        }

        // Freeing the 2nd block makes it the next one returned.
        pool.dealloc(ptrs[1]).unwrap();
        let reused = pool.alloc().unwrap();
        assert_eq!(reused.as_ptr(), ptrs[1].as_ptr());

        // Reset rebuilds the ascending free list from the aligned base.
        pool.reset();
        let first = pool.alloc().unwrap();
        assert_eq!(first.as_ptr(), ptrs[0].as_ptr());
        for i in 1..100 {
            let ptr = pool.alloc().unwrap();
            assert_eq!(ptr.as_ptr(), ptrs[i].as_ptr());
        }
    }
}

#[test]
fn reuse_is_lifo() {
    let pool = PoolAllocator::new(64, 8, 8);

    unsafe {
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        pool.dealloc(a).unwrap();
        pool.dealloc(b).unwrap();

        // Most recently freed comes back first.
        assert_eq!(pool.alloc().unwrap().as_ptr(), b.as_ptr());
        assert_eq!(pool.alloc().unwrap().as_ptr(), a.as_ptr());
    }
}

#[test]
fn reset_is_idempotent() {
    let pool = PoolAllocator::new(32, 8, 8);

    unsafe {
        let first = pool.alloc().unwrap();
        for _ in 1..8 {
            pool.alloc().unwrap();
        }

        // Two resets in a row behave like one: the free list matches the
        // just-constructed state.
        pool.reset();
        pool.reset();
        assert_eq!(pool.alloc().unwrap().as_ptr(), first.as_ptr());
        for _ in 1..8 {
            pool.alloc().unwrap();
        }
        assert!(pool.alloc().is_err());
    }
}

#[test]
fn blocks_are_aligned() {
    for align in [4usize, 8, 16, 32] {
        let pool = PoolAllocator::new(64, 8, align);
        unsafe {
            let ptr = pool.alloc().unwrap();
            assert_eq!(ptr.as_ptr() as usize % align, 0, "align {align}");
        }
    }
}

#[test]
fn containment() {
    let pool = PoolAllocator::new(32, 4, 8);
    unsafe {
        for _ in 0..4 {
            let ptr = pool.alloc().unwrap();
            assert!(pool.contains(ptr.as_ptr()));
            assert!(pool.contains(ptr.as_ptr().add(31)));
        }
    }
    let outside = [0u8; 4];
    assert!(!pool.contains(outside.as_ptr()));
}

#[test]
fn invalid_configuration_is_inert() {
    // Block too small to hold the free-list link.
    let pool = PoolAllocator::new(2, 8, 8);
    assert!(pool.is_inert());
    unsafe {
        assert!(pool.alloc().is_err());
    }

    // Alignment must be a power of two.
    let pool = PoolAllocator::new(32, 8, 12);
    assert!(pool.is_inert());

    // At least one block.
    let pool = PoolAllocator::new(32, 0, 8);
    assert!(pool.is_inert());
}

#[test]
fn alloc_aligned_ignores_arguments() {
    let pool = PoolAllocator::new(64, 4, 8);
    unsafe {
        let a = pool.alloc_aligned(3, 1).unwrap();
        let b = pool.alloc_aligned(64, 64).unwrap();
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 64);
    }
}

#[test]
fn rewind_is_unsupported() {
    let pool = PoolAllocator::new(64, 4, 8);
    unsafe {
        assert!(matches!(
            pool.rewind(),
            Err(AllocError::Unsupported { .. })
        ));
    }
}

#[test]
fn free_is_terminal() {
    let pool = PoolAllocator::new(64, 4, 8);
    unsafe {
        pool.free();
        assert!(pool.is_inert());

        // reset after free warns and does nothing.
        pool.reset();
        assert!(pool.alloc().is_err());

        // double free warns and does nothing.
        pool.free();
    }
}

#[test]
fn placement_construction() {
    let pool = PoolAllocator::new(16, 4, 8);

    unsafe {
        let value = pool.emplace(0xDEAD_BEEF_u64).unwrap();
        assert_eq!(*value.as_ref(), 0xDEAD_BEEF);
        pool.destroy(value).unwrap();
    }

    let boxed = AllocBox::new_in([1u32, 2, 3], &pool).unwrap();
    assert_eq!(boxed[1], 2);
    drop(boxed);

    // The box returned its block; the pool is fully free again.
    unsafe {
        for _ in 0..4 {
            pool.alloc().unwrap();
        }
        assert!(pool.alloc().is_err());
    }
}
