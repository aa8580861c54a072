//! Stack allocator with LIFO markers threaded through the top of the
//! region.
//!
//! # Memory layout
//!
//! ```text
//! [base ... next)          free           (marker ... top slot]
//!   allocations grow up ->      <- marker words grow down
//! ```
//!
//! One contiguous region, two cursors. `next` bumps upward for user
//! allocations; `marker` walks downward through pointer-sized words, each
//! holding the `next` value recorded by a `mark()` call. The topmost word
//! holds a null sentinel, so an unbalanced rewind falls through to a full
//! rewind. The bump check keeps the two ends from overlapping:
//! `base <= next <= marker` at all times.

use core::cell::Cell;
use core::ptr::{self, NonNull};

use tracing::{debug, error, warn};

use crate::allocator::{
    Allocator, AllocatorKind, Oid, WORD, alloc_region, free_region, read_next, write_next,
};
use crate::error::{AllocError, AllocResult};
use crate::utils::{align_down, align_up};

/// Monotonic bump allocator with a marker stack for scoped rewinds.
pub struct StackAllocator {
    /// Region base; null once inert or freed.
    base: Cell<*mut u8>,
    /// Bump cursor at the low end.
    next: Cell<*mut u8>,
    /// Top of the downward-growing marker stack.
    marker: Cell<*mut u8>,
    stack_size: usize,
    id: Oid,
}

impl StackAllocator {
    /// Creates a stack of `stack_size` bytes.
    ///
    /// The size must leave room for the marker sentinel word; a stack
    /// smaller than two pointer words is rejected and left inert.
    pub fn new(stack_size: usize) -> Self {
        Self::with_oid(stack_size, 0)
    }

    pub(crate) fn with_oid(stack_size: usize, id: Oid) -> Self {
        let stack = Self {
            base: Cell::new(ptr::null_mut()),
            next: Cell::new(ptr::null_mut()),
            marker: Cell::new(ptr::null_mut()),
            stack_size,
            id,
        };

        if stack_size < 2 * WORD {
            error!(
                stack_size,
                "stack size must hold at least the marker sentinel"
            );
            return stack;
        }

        let Some(base) = alloc_region(stack_size) else {
            error!(stack_size, "failed to get memory for stack allocator");
            return stack;
        };

        stack.base.set(base.as_ptr());
        debug!(
            base = base.as_ptr() as usize,
            stack_size, "created stack allocator"
        );
        // SAFETY: region is freshly allocated and unshared.
        unsafe { stack.rewrite_sentinel() };
        stack
    }

    /// Total capacity in bytes (user space plus marker words).
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Bytes consumed by user allocations so far.
    pub fn used(&self) -> usize {
        let base = self.base.get();
        if base.is_null() {
            return 0;
        }
        self.next.get() as usize - base as usize
    }

    /// Bytes left between the bump cursor and the marker stack.
    pub fn remaining(&self) -> usize {
        let base = self.base.get();
        if base.is_null() {
            return 0;
        }
        self.marker.get() as usize - self.next.get() as usize
    }

    /// True once the stack has no backing region.
    pub fn is_inert(&self) -> bool {
        self.base.get().is_null()
    }

    /// Checks whether `ptr` lies within the stack region.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.base.get();
        if base.is_null() {
            return false;
        }
        let addr = ptr as usize;
        addr >= base as usize && addr < base as usize + self.stack_size
    }

    /// Records the current bump position so the next [`rewind`] returns to
    /// it.
    ///
    /// The marker word is reserved immediately below the marker stack top;
    /// if it would overlap the allocation area the call fails with
    /// *exhausted* and records nothing.
    ///
    /// [`rewind`]: Allocator::rewind
    pub fn mark(&self) -> AllocResult<()> {
        if self.base.get().is_null() {
            warn!(oid = self.id, "stack allocator has been freed, cannot mark");
            return Err(AllocError::AlreadyFreed);
        }

        let top = self.marker.get();
        let slot_addr = top as usize - WORD;
        if slot_addr < self.next.get() as usize {
            let err = AllocError::exhausted(WORD, WORD);
            warn!(oid = self.id, "marker would collide with allocations");
            return Err(err);
        }

        // SAFETY: slot is one word below the current marker top, which the
        // check above keeps at or above `next`, hence inside the region.
        let slot = unsafe { top.sub(WORD) };
        unsafe { write_next(slot, self.next.get()) };
        self.marker.set(slot);
        Ok(())
    }

    /// Writes the null sentinel into the topmost marker slot and resets the
    /// marker cursor to it.
    ///
    /// # Safety
    /// The region must be live and no marker may be in use.
    unsafe fn rewrite_sentinel(&self) {
        let base = self.base.get();
        let base_addr = base as usize;
        // The topmost pointer-aligned word wholly inside the region.
        let top_addr = align_down(base_addr + self.stack_size - WORD, WORD);
        // SAFETY: stack_size >= 2 * WORD keeps the slot in bounds for any
        // base alignment.
        let top = unsafe { base.add(top_addr - base_addr) };
        unsafe { write_next(top, ptr::null_mut()) };
        self.marker.set(top);
        self.next.set(base);
    }
}

// SAFETY: user allocations are disjoint ascending sub-ranges below `next`;
// the bump check keeps them clear of the marker words above `marker`.
unsafe impl Allocator for StackAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Stack
    }

    fn oid(&self) -> Oid {
        self.id
    }

    /// Bumps `next` past an aligned slice of `size` bytes.
    ///
    /// # Safety
    /// See [`Allocator::alloc_aligned`].
    unsafe fn alloc_aligned(&self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        if self.base.get().is_null() {
            warn!(oid = self.id, "stack allocator has been freed");
            return Err(AllocError::AlreadyFreed);
        }

        let align = if align == 0 { 1 } else { align };
        let next = self.next.get();
        let next_addr = next as usize;
        let aligned_addr = align_up(next_addr, align);

        let collides = aligned_addr
            .checked_add(size)
            .is_none_or(|end| end > self.marker.get() as usize);
        if collides {
            let err = AllocError::exhausted(size, align);
            warn!(
                oid = self.id,
                size, "allocation collides with top of stack"
            );
            return Err(err);
        }

        // SAFETY: aligned_addr + size fits below the marker cursor, which
        // is inside the region.
        let user = unsafe { next.add(aligned_addr - next_addr) };
        self.next.set(unsafe { user.add(size) });
        // SAFETY: user is derived from the non-null region base.
        Ok(unsafe { NonNull::new_unchecked(user) })
    }

    /// Deallocates back to the most recent marker, or all the way to the
    /// base when no marker is set.
    ///
    /// # Safety
    /// See [`Allocator::rewind`].
    unsafe fn rewind(&self) -> AllocResult<()> {
        let base = self.base.get();
        if base.is_null() {
            warn!(
                oid = self.id,
                "stack allocator has been freed, cannot rewind"
            );
            return Err(AllocError::AlreadyFreed);
        }

        let top = self.marker.get();
        // SAFETY: the marker cursor always points at a live marker word.
        let recorded = unsafe { read_next(top) };
        if recorded.is_null() {
            // Only the sentinel left: full rewind.
            self.next.set(base);
        } else {
            self.next.set(recorded);
            // SAFETY: popping a non-sentinel marker moves the cursor back
            // toward the sentinel, staying in bounds.
            self.marker.set(unsafe { top.add(WORD) });
        }
        Ok(())
    }

    /// # Safety
    /// See [`Allocator::reset`].
    unsafe fn reset(&self) {
        if self.base.get().is_null() {
            warn!(
                oid = self.id,
                "stack allocator has been freed, cannot reset"
            );
            return;
        }
        unsafe { self.rewrite_sentinel() };
    }

    /// # Safety
    /// See [`Allocator::free`].
    unsafe fn free(&self) {
        let base = self.base.get();
        if base.is_null() {
            warn!(oid = self.id, "stack allocator has already been freed");
            return;
        }
        // SAFETY: base came from alloc_region with this exact size.
        unsafe { free_region(base, self.stack_size) };
        self.base.set(ptr::null_mut());
        self.next.set(ptr::null_mut());
        self.marker.set(ptr::null_mut());
    }
}

impl Drop for StackAllocator {
    fn drop(&mut self) {
        let base = self.base.get();
        if !base.is_null() {
            // SAFETY: region is live and owned exclusively by this stack.
            unsafe { free_region(base, self.stack_size) };
        }
    }
}

// SAFETY: the stack owns its region exclusively; Cell keeps the type !Sync.
unsafe impl Send for StackAllocator {}

/// RAII frame over a [`StackAllocator`]: marks on construction, rewinds on
/// drop.
///
/// Every pointer allocated from the stack inside the frame's lifetime
/// becomes invalid when the frame is dropped; the frame borrows the
/// allocator so the allocator itself cannot go away first.
pub struct StackScope<'a> {
    stack: &'a StackAllocator,
}

impl<'a> StackScope<'a> {
    /// Places a marker and returns the frame guarding it.
    pub fn new(stack: &'a StackAllocator) -> AllocResult<Self> {
        stack.mark()?;
        Ok(Self { stack })
    }

    /// The guarded allocator.
    pub fn allocator(&self) -> &'a StackAllocator {
        self.stack
    }
}

impl Drop for StackScope<'_> {
    fn drop(&mut self) {
        // SAFETY: the frame owns the marker it placed; pointers handed out
        // inside the frame are documented to die with it.
        let _ = unsafe { self.stack.rewind() };
    }
}
