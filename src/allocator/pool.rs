//! Pool allocator for fixed-size blocks.
//!
//! # Memory layout
//!
//! ```text
//! [unaligned base ... aligned base][Block0][Block1][Block2]...[BlockN-1]
//!                                     |       |       |
//!                                   [free] -> [free] -> [free] -> null
//! ```
//!
//! The free list is threaded through the blocks themselves: the first
//! pointer-sized bytes of every free block hold the address of the next
//! free block, the tail holds null. Allocation pops the head, deallocation
//! pushes, so reuse is strictly LIFO.
//!
//! ## Invariants
//!
//! - The chain starting at `next_free` contains exactly the free blocks,
//!   without duplicates; freshly constructed or reset it holds all blocks
//!   in ascending address order.
//! - Every block address satisfies the configured block alignment.
//! - After `free()` all three region fields are null and every operation
//!   short-circuits.

use core::cell::Cell;
use core::ptr::{self, NonNull};

use tracing::{debug, error, warn};

use crate::allocator::{
    Allocator, AllocatorKind, Oid, WORD, alloc_region, free_region, read_next, write_next,
};
use crate::error::{AllocError, AllocResult};
use crate::utils::{align_up, is_power_of_two};

/// Fixed block size, fixed block count, intrusive free list.
///
/// Invalid construction parameters or a refused region request leave the
/// allocator *inert*: it exists, but every allocation fails with a
/// diagnostic. This mirrors the registry contract, where construction
/// always yields a slot and failures surface on first use.
pub struct PoolAllocator {
    /// Raw region as returned by the system heap; null once inert or freed.
    unaligned: Cell<*mut u8>,
    /// First block-aligned address inside the region.
    aligned: Cell<*mut u8>,
    /// Head of the intrusive free list.
    next_free: Cell<*mut u8>,
    block_size: usize,
    block_count: usize,
    block_align: usize,
    id: Oid,
}

impl PoolAllocator {
    /// Creates a pool of `block_count` blocks of `block_size` bytes, each
    /// aligned to `block_align` (a power of two; 0 means unaligned).
    ///
    /// `block_size` must be at least one pointer word so a free block can
    /// hold its successor link.
    pub fn new(block_size: usize, block_count: usize, block_align: usize) -> Self {
        Self::with_oid(block_size, block_count, block_align, 0)
    }

    pub(crate) fn with_oid(
        block_size: usize,
        block_count: usize,
        block_align: usize,
        id: Oid,
    ) -> Self {
        let block_align = if block_align == 0 { 1 } else { block_align };
        let pool = Self {
            unaligned: Cell::new(ptr::null_mut()),
            aligned: Cell::new(ptr::null_mut()),
            next_free: Cell::new(ptr::null_mut()),
            block_size,
            block_count,
            block_align,
            id,
        };

        if block_size < WORD {
            error!(
                block_size,
                "pool block size must be at least one pointer word"
            );
            return pool;
        }
        if block_count == 0 {
            error!("pool block count must be at least 1");
            return pool;
        }
        if !is_power_of_two(block_align) {
            error!(block_align, "pool block alignment must be a power of two");
            return pool;
        }

        let Some(total) = block_size
            .checked_mul(block_count)
            .and_then(|bytes| bytes.checked_add(block_align))
        else {
            error!(block_size, block_count, "pool region size overflows");
            return pool;
        };

        let Some(base) = alloc_region(total) else {
            error!(total, "failed to get memory for pool allocator");
            return pool;
        };

        let base_addr = base.as_ptr() as usize;
        let offset = align_up(base_addr, block_align) - base_addr;
        // SAFETY: the region was over-allocated by block_align bytes, so the
        // aligned start plus all blocks stays in bounds.
        let aligned = unsafe { base.as_ptr().add(offset) };

        pool.unaligned.set(base.as_ptr());
        pool.aligned.set(aligned);
        debug!(
            base = base_addr,
            aligned = aligned as usize,
            block_size,
            block_count,
            "created pool allocator"
        );
        // SAFETY: the region is freshly allocated and unshared.
        unsafe { pool.rebuild_free_list() };
        pool
    }

    /// Size of each block in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks in the pool.
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Block alignment the pool guarantees.
    pub fn block_align(&self) -> usize {
        self.block_align
    }

    /// Total user-visible capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.block_size * self.block_count
    }

    /// True once the pool has no backing region (failed construction or a
    /// terminal `free`).
    pub fn is_inert(&self) -> bool {
        self.unaligned.get().is_null()
    }

    /// Checks whether `ptr` lies within the pool's block region.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let aligned = self.aligned.get();
        if aligned.is_null() {
            return false;
        }
        let addr = ptr as usize;
        let start = aligned as usize;
        addr >= start && addr < start + self.capacity()
    }

    fn region_size(&self) -> usize {
        self.block_size * self.block_count + self.block_align
    }

    /// Threads the free list through the blocks in ascending address order.
    ///
    /// # Safety
    /// The region must be live and no block may be in use.
    unsafe fn rebuild_free_list(&self) {
        let aligned = self.aligned.get();
        let mut block = aligned;
        for _ in 1..self.block_count {
            // SAFETY: block and its successor are inside the region.
            let next = unsafe { block.add(self.block_size) };
            unsafe { write_next(block, next) };
            block = next;
        }
        // SAFETY: the last block is inside the region.
        unsafe { write_next(block, ptr::null_mut()) };
        self.next_free.set(aligned);
    }
}

// SAFETY: returned blocks are disjoint sub-ranges of a region owned by the
// pool; the free-list invariant guarantees a block is handed out at most
// once between dealloc calls.
unsafe impl Allocator for PoolAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Pool
    }

    fn oid(&self) -> Oid {
        self.id
    }

    /// Pops the head of the free list. O(1).
    ///
    /// # Safety
    /// See [`Allocator::alloc`].
    unsafe fn alloc(&self) -> AllocResult<NonNull<u8>> {
        let Some(head) = NonNull::new(self.next_free.get()) else {
            let err = AllocError::exhausted(self.block_size, self.block_align);
            warn!(oid = self.id, "no more free blocks in pool allocator");
            return Err(err);
        };
        // SAFETY: head is a free block, so its first word holds the
        // successor written by rebuild_free_list or dealloc.
        self.next_free.set(unsafe { read_next(head.as_ptr()) });
        Ok(head)
    }

    /// Size and alignment are ignored; every block is the same.
    ///
    /// # Safety
    /// See [`Allocator::alloc`].
    unsafe fn alloc_aligned(&self, _size: usize, _align: usize) -> AllocResult<NonNull<u8>> {
        unsafe { self.alloc() }
    }

    /// Pushes the block onto the free list. O(1). The caller has already
    /// run the object's destructor.
    ///
    /// # Safety
    /// See [`Allocator::dealloc`].
    unsafe fn dealloc(&self, ptr: NonNull<u8>) -> AllocResult<()> {
        debug_assert!(self.contains(ptr.as_ptr()));
        // SAFETY: ptr is a block of this pool (caller contract), at least
        // one word large.
        unsafe { write_next(ptr.as_ptr(), self.next_free.get()) };
        self.next_free.set(ptr.as_ptr());
        Ok(())
    }

    /// # Safety
    /// See [`Allocator::reset`].
    unsafe fn reset(&self) {
        if self.unaligned.get().is_null() {
            warn!(oid = self.id, "pool allocator has been freed, cannot reset");
            return;
        }
        // SAFETY: region is live; caller guarantees no block is in use.
        unsafe { self.rebuild_free_list() };
    }

    /// # Safety
    /// See [`Allocator::free`].
    unsafe fn free(&self) {
        let base = self.unaligned.get();
        if base.is_null() {
            warn!(oid = self.id, "pool allocator has already been freed");
            return;
        }
        // SAFETY: base came from alloc_region with this exact size.
        unsafe { free_region(base, self.region_size()) };
        self.unaligned.set(ptr::null_mut());
        self.aligned.set(ptr::null_mut());
        self.next_free.set(ptr::null_mut());
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        let base = self.unaligned.get();
        if !base.is_null() {
            // SAFETY: region is live and owned exclusively by this pool.
            unsafe { free_region(base, self.region_size()) };
        }
    }
}

// SAFETY: the pool owns its region exclusively; the raw cursors are plain
// data that moves with it. Interior mutability through Cell keeps the type
// !Sync, which is the intended single-threaded contract.
unsafe impl Send for PoolAllocator {}
