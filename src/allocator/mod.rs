//! Fixed-purpose allocator implementations and their shared contract.
//!
//! Four kinds cover the workloads the crate is tuned for: uniform object
//! pools ([`PoolAllocator`]), scoped stack frames ([`StackAllocator`]),
//! mixed-size chunk pools ([`ChunkAllocator`]) and a multiplexing dynamic
//! chunk allocator ([`DynamicChunkAllocator`]). The [`MemoryManager`]
//! registry owns allocators created through it and hands out identifiers.

mod manager;
mod traits;

pub mod boxed;
pub mod chunk;
pub mod dynamic;
pub mod pool;
pub mod stack;

pub use crate::error::{AllocError, AllocResult};
pub use boxed::AllocBox;
pub use chunk::ChunkAllocator;
pub use dynamic::DynamicChunkAllocator;
pub use manager::{DEFAULT_MAX_ALLOCATORS, MemoryManager};
pub use pool::PoolAllocator;
pub use stack::{StackAllocator, StackScope};
pub use traits::{Allocator, AllocatorKind, Oid, TypedAlloc};

use core::ptr::NonNull;
use std::alloc::Layout;

/// Pointer-word size; the minimum block size for intrusive free lists.
pub(crate) const WORD: usize = core::mem::size_of::<*mut u8>();

/// Requests a raw backing region from the system heap.
///
/// Regions are requested with alignment 1; each allocator over-allocates
/// and computes its own aligned start, so both the unaligned and aligned
/// base addresses stay observable.
pub(crate) fn alloc_region(size: usize) -> Option<NonNull<u8>> {
    let layout = Layout::from_size_align(size, 1).ok()?;
    if layout.size() == 0 {
        return None;
    }
    // SAFETY: layout has non-zero size.
    NonNull::new(unsafe { std::alloc::alloc(layout) })
}

/// Returns a region obtained from [`alloc_region`] to the system heap.
///
/// # Safety
/// `base` must have come from `alloc_region(size)` with the same `size`,
/// and must not be used afterwards.
pub(crate) unsafe fn free_region(base: *mut u8, size: usize) {
    // SAFETY: size was accepted by Layout::from_size_align at allocation
    // time; align 1 is trivially valid.
    let layout = unsafe { Layout::from_size_align_unchecked(size, 1) };
    unsafe { std::alloc::dealloc(base, layout) };
}

/// Writes the free-list successor into the first word of a free block.
///
/// Unaligned: a block's alignment may be smaller than the pointer word.
///
/// # Safety
/// `block` must be valid for writes of at least [`WORD`] bytes.
pub(crate) unsafe fn write_next(block: *mut u8, next: *mut u8) {
    unsafe { block.cast::<*mut u8>().write_unaligned(next) };
}

/// Reads the free-list successor out of the first word of a free block.
///
/// # Safety
/// `block` must be valid for reads of at least [`WORD`] bytes and must
/// currently hold a successor written by [`write_next`].
pub(crate) unsafe fn read_next(block: *mut u8) -> *mut u8 {
    unsafe { block.cast::<*mut u8>().read_unaligned() }
}
