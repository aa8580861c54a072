//! RAII smart pointer for allocator-backed values.

use core::ptr::{self, NonNull};

use crate::allocator::{Allocator, TypedAlloc};
use crate::error::AllocResult;

/// An owned value constructed in place inside an allocator's block.
///
/// `AllocBox` is the two-step placement pattern fused into one handle: the
/// allocator hands out raw storage, the value is written into it, and the
/// drop glue runs the destructor and returns the block. Intended for the
/// kinds that support `dealloc(ptr)` (pool, chunk, dynamic chunk); stack
/// values are scoped with [`StackScope`](crate::allocator::StackScope)
/// instead.
pub struct AllocBox<'a, T> {
    ptr: NonNull<T>,
    allocator: &'a dyn Allocator,
}

impl<'a, T> AllocBox<'a, T> {
    /// Allocates a block from `allocator` and moves `value` into it.
    #[must_use = "allocated value must be used"]
    pub fn new_in(value: T, allocator: &'a dyn Allocator) -> AllocResult<Self> {
        // SAFETY: the block is freshly allocated and exclusively ours; the
        // value is written before any read. The box releases the block in
        // drop, before any reset/free contract can be violated through it.
        let ptr = unsafe { allocator.emplace(value)? };
        Ok(Self { ptr, allocator })
    }

    /// The allocator backing this value.
    pub fn allocator(&self) -> &'a dyn Allocator {
        self.allocator
    }

    /// Consumes the box and returns the value, releasing the block without
    /// running the destructor twice.
    pub fn into_inner(self) -> T {
        // SAFETY: ptr holds a live T; reading moves it out and the block is
        // returned without dropping in place.
        let value = unsafe { ptr::read(self.ptr.as_ptr()) };
        // SAFETY: the block came from this allocator and is released once.
        let _ = unsafe { self.allocator.dealloc_one(self.ptr) };
        core::mem::forget(self);
        value
    }
}

impl<T> core::ops::Deref for AllocBox<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: ptr holds a live, exclusively owned T.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> core::ops::DerefMut for AllocBox<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: ptr holds a live T and the box is borrowed mutably.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for AllocBox<'_, T> {
    fn drop(&mut self) {
        // SAFETY: ptr holds a live T allocated from this allocator; it is
        // dropped and released exactly once.
        let _ = unsafe { self.allocator.destroy(self.ptr) };
    }
}
