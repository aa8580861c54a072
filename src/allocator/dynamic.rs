//! Dynamic chunk allocator: an ordered family of chunk allocators keyed by
//! block size, spawning new sizes on demand.
//!
//! Requests are routed to the smallest chunk size that fits under the
//! *waste cap*: a request is never served from a chunk twice its size or
//! more. When no chunk qualifies, a new one is spawned whose block size is
//! the next power of two at or above the request (never smaller than a
//! pointer word). A hot cursor remembers the most recently spawned chunk
//! for temporal locality.

use core::cell::{Cell, RefCell};
use core::ptr::NonNull;

use tracing::{debug, error, warn};

use crate::allocator::{Allocator, AllocatorKind, ChunkAllocator, Oid, WORD};
use crate::error::{AllocError, AllocResult};
use crate::utils::next_power_of_two;

/// Default number of blocks given to a freshly spawned chunk size.
pub const DEFAULT_CHUNK_COUNT: usize = 32;

/// Multiplexer over [`ChunkAllocator`]s of ascending block sizes.
///
/// Unlike the other kinds, `free()` here is recoverable: it destroys every
/// child chunk but the allocator keeps working and will spawn new sizes on
/// the next request.
pub struct DynamicChunkAllocator {
    /// Children ordered by ascending block size. Duplicate sizes are
    /// allowed; routing picks the first fit.
    chunks: RefCell<Vec<ChunkAllocator>>,
    /// Index of the most recently spawned chunk, if any.
    cursor: Cell<Option<usize>>,
    default_chunk_count: usize,
    id: Oid,
}

impl DynamicChunkAllocator {
    /// Creates an empty allocator; chunk sizes are spawned on demand with
    /// `default_chunk_count` blocks each.
    pub fn new(default_chunk_count: usize) -> Self {
        Self::with_oid(default_chunk_count, 0)
    }

    pub(crate) fn with_oid(default_chunk_count: usize, id: Oid) -> Self {
        Self {
            chunks: RefCell::new(Vec::new()),
            cursor: Cell::new(None),
            default_chunk_count: default_chunk_count.max(1),
            id,
        }
    }

    /// Number of child chunk allocators currently held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.borrow().len()
    }

    /// Blocks given to newly spawned chunk sizes.
    pub fn default_chunk_count(&self) -> usize {
        self.default_chunk_count
    }

    /// The block sizes currently held, in ascending order.
    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.chunks.borrow().iter().map(|c| c.block_size()).collect()
    }

    /// Whether a chunk with block size `next_power_of_two(chunk_size)`
    /// exists.
    pub fn has_chunk(&self, chunk_size: usize) -> bool {
        let rounded = next_power_of_two(chunk_size);
        self.chunks
            .borrow()
            .iter()
            .any(|c| c.block_size() == rounded)
    }

    /// Whether some existing chunk is large enough for `block_size`.
    pub fn can_fit(&self, block_size: usize) -> bool {
        self.chunks
            .borrow()
            .iter()
            .any(|c| c.block_size() >= block_size)
    }

    /// Block size of the chunk owning `ptr`, if any.
    pub fn owner_block_size(&self, ptr: *const u8) -> Option<usize> {
        self.chunks
            .borrow()
            .iter()
            .find(|c| c.contains(ptr))
            .map(|c| c.block_size())
    }

    /// Adds a chunk allocator for `next_power_of_two(chunk_size)` with
    /// `chunk_count` blocks, keeping the family sorted.
    ///
    /// Sizes below one pointer word are rejected: a free block must hold
    /// its successor link.
    pub fn add_chunk(&self, chunk_size: usize, chunk_count: usize) -> AllocResult<()> {
        let mut chunks = self.chunks.borrow_mut();
        self.insert_sorted(&mut chunks, chunk_size, chunk_count)
            .map(|_| ())
    }

    /// Removes the chunk allocator whose block size matches
    /// `next_power_of_two(chunk_size)`, destroying its region. Warns when
    /// no such chunk exists.
    pub fn free_chunk(&self, chunk_size: usize) {
        let rounded = next_power_of_two(chunk_size);
        let mut chunks = self.chunks.borrow_mut();
        let Some(idx) = chunks.iter().position(|c| c.block_size() == rounded) else {
            warn!(
                oid = self.id,
                chunk_size = rounded,
                "no chunk allocator with that block size"
            );
            return;
        };

        chunks.remove(idx);
        // Repoint the cursor: to the new head if it named the removed
        // chunk, shifted down if it sat above it.
        self.cursor.set(match self.cursor.get() {
            _ if chunks.is_empty() => None,
            Some(i) if i == idx => Some(0),
            Some(i) if i > idx => Some(i - 1),
            other => other,
        });
    }

    /// Inserts a chunk in sorted position and fixes the cursor index up.
    fn insert_sorted(
        &self,
        chunks: &mut Vec<ChunkAllocator>,
        chunk_size: usize,
        chunk_count: usize,
    ) -> AllocResult<usize> {
        if chunk_size < WORD {
            let err = AllocError::InvalidConfig {
                reason: "chunk size smaller than a pointer word",
            };
            error!(oid = self.id, chunk_size, "{err}");
            return Err(err);
        }

        let rounded = next_power_of_two(chunk_size);
        let pos = chunks.partition_point(|c| c.block_size() < rounded);
        chunks.insert(pos, ChunkAllocator::new(rounded, chunk_count));
        debug!(
            oid = self.id,
            block_size = rounded,
            chunk_count,
            "spawned chunk allocator"
        );

        match self.cursor.get() {
            None => self.cursor.set(Some(pos)),
            Some(i) if i >= pos => self.cursor.set(Some(i + 1)),
            _ => {}
        }
        Ok(pos)
    }
}

impl Default for DynamicChunkAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_COUNT)
    }
}

// SAFETY: allocation is delegated to child chunk allocators, each of which
// upholds the contract for its own region; routing never hands a block out
// of more than one child.
unsafe impl Allocator for DynamicChunkAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::DynamicChunk
    }

    fn oid(&self) -> Oid {
        self.id
    }

    /// Routes the request to the tightest fitting chunk, spawning one when
    /// nothing satisfies the waste cap.
    ///
    /// The hot path uses a strict lower bound, so a request of exactly the
    /// cursor's block size falls through to the sorted walk, which then
    /// finds the same chunk.
    ///
    /// # Safety
    /// See [`Allocator::alloc_aligned`].
    unsafe fn alloc_aligned(&self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        // Every block must hold a free-list link, so sub-word requests are
        // routed as word-sized ones.
        let routed = size.max(WORD);
        let cap = routed.saturating_mul(2);
        let mut chunks = self.chunks.borrow_mut();

        if chunks.is_empty() {
            let idx = self.insert_sorted(&mut chunks, routed, self.default_chunk_count)?;
            self.cursor.set(Some(idx));
            return unsafe { chunks[idx].alloc_aligned(size, align) };
        }

        // Hot path: the most recently spawned chunk.
        if let Some(hot) = self.cursor.get().and_then(|i| chunks.get(i)) {
            if hot.block_size() > routed && hot.block_size() < cap {
                return unsafe { hot.alloc_aligned(size, align) };
            }
        }

        // Walk in ascending size order; past the first fitting size the
        // list only gets worse.
        for chunk in chunks.iter() {
            if chunk.block_size() >= routed {
                if chunk.block_size() < cap {
                    return unsafe { chunk.alloc_aligned(size, align) };
                }
                break;
            }
        }

        // Nothing under the waste cap: spawn a tighter size.
        let idx = self.insert_sorted(&mut chunks, routed, self.default_chunk_count)?;
        self.cursor.set(Some(idx));
        unsafe { chunks[idx].alloc_aligned(size, align) }
    }

    /// Routes the deallocation to the owning chunk, trying the cursor
    /// first. A pointer no chunk claims is reported and dropped.
    ///
    /// # Safety
    /// See [`Allocator::dealloc`].
    unsafe fn dealloc(&self, ptr: NonNull<u8>) -> AllocResult<()> {
        let chunks = self.chunks.borrow();

        if let Some(hot) = self.cursor.get().and_then(|i| chunks.get(i)) {
            if hot.contains(ptr.as_ptr()) {
                return unsafe { hot.dealloc(ptr) };
            }
        }

        for chunk in chunks.iter() {
            if chunk.contains(ptr.as_ptr()) {
                return unsafe { chunk.dealloc(ptr) };
            }
        }

        let err = AllocError::UnownedPointer;
        warn!(oid = self.id, "no chunk allocator owns the memory block");
        Err(err)
    }

    /// Forwards to every child.
    ///
    /// # Safety
    /// See [`Allocator::reset`].
    unsafe fn reset(&self) {
        for chunk in self.chunks.borrow().iter() {
            unsafe { chunk.reset() };
        }
    }

    /// Destroys every child chunk. Recoverable: the allocator stays usable
    /// and spawns new chunk sizes on the next request.
    ///
    /// # Safety
    /// See [`Allocator::free`].
    unsafe fn free(&self) {
        self.chunks.borrow_mut().clear();
        self.cursor.set(None);
    }
}
