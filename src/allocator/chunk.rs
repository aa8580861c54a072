//! Chunk allocator: a pool whose blocks are power-of-two sized and shared
//! by objects of different types.
//!
//! Identical to [`PoolAllocator`](crate::allocator::PoolAllocator) except:
//!
//! - `block_size` must be a power of two, and the region is aligned to it,
//!   so a pointer is mapped back to its enclosing block in O(1) with the
//!   `block_size - 1` mask.
//! - `alloc_aligned(size, align)` aligns the returned pointer *within* its
//!   block. The caller guarantees `size` plus the alignment offset fits in
//!   `block_size`.

use core::cell::Cell;
use core::ptr::{self, NonNull};

use tracing::{debug, error, warn};

use crate::allocator::{
    Allocator, AllocatorKind, Oid, WORD, alloc_region, free_region, read_next, write_next,
};
use crate::error::{AllocError, AllocResult};
use crate::utils::{align_up, is_power_of_two};

/// Fixed power-of-two block size with per-allocation sub-alignment.
pub struct ChunkAllocator {
    unaligned: Cell<*mut u8>,
    aligned: Cell<*mut u8>,
    next_free: Cell<*mut u8>,
    block_size: usize,
    block_count: usize,
    id: Oid,
}

impl ChunkAllocator {
    /// Creates `block_count` blocks of `block_size` bytes each, aligned to
    /// `block_size`. `block_size` must be a power of two and at least one
    /// pointer word; violations leave the allocator inert.
    pub fn new(block_size: usize, block_count: usize) -> Self {
        Self::with_oid(block_size, block_count, 0)
    }

    pub(crate) fn with_oid(block_size: usize, block_count: usize, id: Oid) -> Self {
        let chunk = Self {
            unaligned: Cell::new(ptr::null_mut()),
            aligned: Cell::new(ptr::null_mut()),
            next_free: Cell::new(ptr::null_mut()),
            block_size,
            block_count,
            id,
        };

        if block_size < WORD {
            error!(
                block_size,
                "chunk block size must be at least one pointer word"
            );
            return chunk;
        }
        if !is_power_of_two(block_size) {
            error!(block_size, "chunk block size must be a power of two");
            return chunk;
        }
        if block_count == 0 {
            error!("chunk block count must be at least 1");
            return chunk;
        }

        // One extra block of slack pays for aligning the region to the
        // block size.
        let Some(total) = block_size.checked_mul(block_count + 1) else {
            error!(block_size, block_count, "chunk region size overflows");
            return chunk;
        };

        let Some(base) = alloc_region(total) else {
            error!(total, "failed to get memory for chunk allocator");
            return chunk;
        };

        let base_addr = base.as_ptr() as usize;
        let offset = align_up(base_addr, block_size) - base_addr;
        // SAFETY: over-allocated by one block; the aligned start plus all
        // blocks stays in bounds.
        let aligned = unsafe { base.as_ptr().add(offset) };

        chunk.unaligned.set(base.as_ptr());
        chunk.aligned.set(aligned);
        debug!(
            aligned = aligned as usize,
            block_size, block_count, "created chunk allocator"
        );
        // SAFETY: region is freshly allocated and unshared.
        unsafe { chunk.rebuild_free_list() };
        chunk
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn capacity(&self) -> usize {
        self.block_size * self.block_count
    }

    /// True once the allocator has no backing region.
    pub fn is_inert(&self) -> bool {
        self.unaligned.get().is_null()
    }

    /// Ownership test: whether `ptr` lies within this allocator's blocks.
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
        self.block_size * (self.block_count + 1)
    }

    /// # Safety
    /// The region must be live and no block may be in use.
    unsafe fn rebuild_free_list(&self) {
        let aligned = self.aligned.get();
        let mut block = aligned;
        for _ in 1..self.block_count {
            let next = unsafe { block.add(self.block_size) };
            unsafe { write_next(block, next) };
            block = next;
        }
        unsafe { write_next(block, ptr::null_mut()) };
        self.next_free.set(aligned);
    }
}

// SAFETY: blocks are disjoint block_size-aligned sub-ranges of an owned
// region; the free list hands each out at most once.
unsafe impl Allocator for ChunkAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Chunk
    }

    fn oid(&self) -> Oid {
        self.id
    }

    /// Pops a block and aligns the returned pointer inside it.
    ///
    /// The caller contract is `size + (aligned - block start) <=
    /// block_size`; the allocator does not enforce it.
    ///
    /// # Safety
    /// See [`Allocator::alloc_aligned`].
    unsafe fn alloc_aligned(&self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        let Some(head) = NonNull::new(self.next_free.get()) else {
            let err = AllocError::exhausted(size, align);
            warn!(oid = self.id, "no more free blocks in chunk allocator");
            return Err(err);
        };

        let align = if align == 0 { 1 } else { align };
        let head_addr = head.as_ptr() as usize;
        let offset = align_up(head_addr, align) - head_addr;
        // SAFETY: head is a free block holding its successor link.
        self.next_free.set(unsafe { read_next(head.as_ptr()) });
        // SAFETY: caller guarantees the aligned object fits in the block.
        let user = unsafe { head.as_ptr().add(offset) };
        // SAFETY: user is offset from a non-null block start.
        Ok(unsafe { NonNull::new_unchecked(user) })
    }

    /// Masks the pointer back to its enclosing block, then pushes it onto
    /// the free list.
    ///
    /// # Safety
    /// See [`Allocator::dealloc`].
    unsafe fn dealloc(&self, ptr: NonNull<u8>) -> AllocResult<()> {
        debug_assert!(self.contains(ptr.as_ptr()));
        let offset = (ptr.as_ptr() as usize) & (self.block_size - 1);
        // SAFETY: works only because block_size is a power of two and the
        // region is block_size-aligned; the result is the block start.
        let block = unsafe { ptr.as_ptr().sub(offset) };
        unsafe { write_next(block, self.next_free.get()) };
        self.next_free.set(block);
        Ok(())
    }

    /// # Safety
    /// See [`Allocator::reset`].
    unsafe fn reset(&self) {
        if self.unaligned.get().is_null() {
            warn!(
                oid = self.id,
                "chunk allocator has been freed, cannot reset"
            );
            return;
        }
        unsafe { self.rebuild_free_list() };
    }

    /// # Safety
    /// See [`Allocator::free`].
    unsafe fn free(&self) {
        let base = self.unaligned.get();
        if base.is_null() {
            warn!(oid = self.id, "chunk allocator has already been freed");
            return;
        }
        // SAFETY: base came from alloc_region with this exact size.
        unsafe { free_region(base, self.region_size()) };
        self.unaligned.set(ptr::null_mut());
        self.aligned.set(ptr::null_mut());
        self.next_free.set(ptr::null_mut());
    }
}

impl Drop for ChunkAllocator {
    fn drop(&mut self) {
        let base = self.unaligned.get();
        if !base.is_null() {
            // SAFETY: region is live and owned exclusively by this
            // allocator.
            unsafe { free_region(base, self.region_size()) };
        }
    }
}

// SAFETY: same reasoning as PoolAllocator; owned region, !Sync via Cell.
unsafe impl Send for ChunkAllocator {}
