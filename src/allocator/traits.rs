//! The polymorphic allocator contract.
//!
//! Every allocator kind implements the same capability set but supports a
//! different subset of it:
//!
//! | Kind         | `alloc` | `alloc_aligned` | `dealloc` | `rewind` | `reset` | `free`      |
//! |--------------|---------|-----------------|-----------|----------|---------|-------------|
//! | Pool         | yes     | ignores args    | yes       | no       | yes     | terminal    |
//! | Stack        | no      | yes             | no        | yes      | yes     | terminal    |
//! | Chunk        | no      | yes             | yes       | no       | yes     | terminal    |
//! | DynamicChunk | no      | yes             | by owner  | no       | yes     | recoverable |
//!
//! An unsupported operation is not a programming error at the type level:
//! the default method bodies report it on the diagnostic channel and return
//! the error sentinel, so a caller holding a `&dyn Allocator` always gets a
//! well-defined answer.

use core::fmt;
use core::mem;
use core::ptr::{self, NonNull};

use tracing::warn;

use crate::error::{AllocError, AllocResult};

/// Identifier naming a registry-owned allocator. Zero means "invalid".
pub type Oid = u32;

/// The four allocator kinds, used in diagnostics and capability errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    Pool,
    Stack,
    Chunk,
    DynamicChunk,
}

impl AllocatorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AllocatorKind::Pool => "pool",
            AllocatorKind::Stack => "stack",
            AllocatorKind::Chunk => "chunk",
            AllocatorKind::DynamicChunk => "dynamic-chunk",
        }
    }
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability set shared by all allocator kinds.
///
/// Methods take `&self`: allocators use interior mutability so that
/// containers can hold a shared reference and still allocate through it.
/// None of the implementations synchronize internally; callers serialize
/// access (the types are deliberately `!Sync`).
///
/// # Safety
///
/// Implementors must ensure that every pointer returned by an allocation
/// method is valid for reads and writes of the requested size until the
/// block is deallocated, the allocator is reset, or the allocator is freed,
/// and that distinct live blocks never overlap.
pub unsafe trait Allocator {
    /// The kind of this allocator.
    fn kind(&self) -> AllocatorKind;

    /// The registry identifier, or 0 if not registry-owned.
    fn oid(&self) -> Oid;

    /// Allocates one fixed-size block.
    ///
    /// Only meaningful for kinds with a fixed block size; the default
    /// body rejects the call.
    ///
    /// # Safety
    /// The returned memory is uninitialized and must not be read before it
    /// is written. The pointer is invalidated by `dealloc` on it, `reset`,
    /// or `free`.
    unsafe fn alloc(&self) -> AllocResult<NonNull<u8>> {
        let err = AllocError::unsupported("alloc()", self.kind());
        warn!(allocator = %self.kind(), "{err}");
        Err(err)
    }

    /// Allocates `size` bytes aligned to `align` (0 means no explicit
    /// alignment).
    ///
    /// # Safety
    /// Same contract as [`Allocator::alloc`]. `align` must be a power of
    /// two or 0.
    unsafe fn alloc_aligned(&self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        let _ = (size, align);
        let err = AllocError::unsupported("alloc(size, align)", self.kind());
        warn!(allocator = %self.kind(), "{err}");
        Err(err)
    }

    /// Returns a previously allocated block to the allocator.
    ///
    /// The allocator never runs destructors; the caller must have dropped
    /// the object in place already.
    ///
    /// # Safety
    /// `ptr` must have been returned by an allocation method of this
    /// allocator and must not have been deallocated since. After this call
    /// the block must not be used.
    unsafe fn dealloc(&self, ptr: NonNull<u8>) -> AllocResult<()> {
        let _ = ptr;
        let err = AllocError::unsupported("dealloc(ptr)", self.kind());
        warn!(allocator = %self.kind(), "{err}");
        Err(err)
    }

    /// Deallocates back to the most recent marker (the no-argument
    /// `dealloc` of the capability set). Stack only.
    ///
    /// # Safety
    /// Every pointer handed out since the most recent marker becomes
    /// invalid.
    unsafe fn rewind(&self) -> AllocResult<()> {
        let err = AllocError::unsupported("dealloc()", self.kind());
        warn!(allocator = %self.kind(), "{err}");
        Err(err)
    }

    /// Restores the allocator to its freshly constructed state.
    ///
    /// Forbidden after a terminal `free` (reported as a warning, no-op).
    ///
    /// # Safety
    /// Every pointer previously handed out becomes invalid.
    unsafe fn reset(&self);

    /// Releases the backing region.
    ///
    /// Terminal for pool, stack and chunk allocators; recoverable for the
    /// dynamic chunk allocator.
    ///
    /// # Safety
    /// Every pointer previously handed out becomes invalid.
    unsafe fn free(&self);
}

/// Typed allocation helpers layered over the raw byte interface.
///
/// This is the placement-construction entry point: `alloc_one` returns
/// typed-but-uninitialized storage, `emplace` fuses allocation with
/// in-place construction, and `destroy` is the matching drop-then-release.
pub trait TypedAlloc: Allocator {
    /// Allocates uninitialized storage for a single `T`.
    ///
    /// # Safety
    /// Same contract as [`Allocator::alloc_aligned`]; the storage must be
    /// written before it is read.
    #[inline]
    unsafe fn alloc_one<T>(&self) -> AllocResult<NonNull<T>> {
        let ptr = unsafe { self.alloc_aligned(mem::size_of::<T>(), mem::align_of::<T>())? };
        Ok(ptr.cast())
    }

    /// Allocates storage for a `T` and constructs `value` in place.
    ///
    /// # Safety
    /// The returned pointer is owned by the caller, who must eventually
    /// [`TypedAlloc::destroy`] it (or drop the value and release the block
    /// by other means) before the allocator is reset or freed.
    #[inline]
    unsafe fn emplace<T>(&self, value: T) -> AllocResult<NonNull<T>> {
        let ptr = unsafe { self.alloc_one::<T>()? };
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Returns typed storage without dropping the value.
    ///
    /// # Safety
    /// Same contract as [`Allocator::dealloc`].
    #[inline]
    unsafe fn dealloc_one<T>(&self, ptr: NonNull<T>) -> AllocResult<()> {
        unsafe { self.dealloc(ptr.cast()) }
    }

    /// Drops the value in place, then returns its storage.
    ///
    /// # Safety
    /// `ptr` must point to a live `T` obtained from this allocator.
    #[inline]
    unsafe fn destroy<T>(&self, ptr: NonNull<T>) -> AllocResult<()> {
        unsafe { ptr::drop_in_place(ptr.as_ptr()) };
        unsafe { self.dealloc(ptr.cast()) }
    }
}

impl<A: Allocator + ?Sized> TypedAlloc for A {}

// Allow `&A` wherever an allocator is expected; containers hold shared
// references to allocators they do not own.
unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    fn kind(&self) -> AllocatorKind {
        (**self).kind()
    }

    fn oid(&self) -> Oid {
        (**self).oid()
    }

    unsafe fn alloc(&self) -> AllocResult<NonNull<u8>> {
        unsafe { (**self).alloc() }
    }

    unsafe fn alloc_aligned(&self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        unsafe { (**self).alloc_aligned(size, align) }
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>) -> AllocResult<()> {
        unsafe { (**self).dealloc(ptr) }
    }

    unsafe fn rewind(&self) -> AllocResult<()> {
        unsafe { (**self).rewind() }
    }

    unsafe fn reset(&self) {
        unsafe { (**self).reset() }
    }

    unsafe fn free(&self) {
        unsafe { (**self).free() }
    }
}
