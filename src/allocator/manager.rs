//! Central registry owning a bounded table of allocators.
//!
//! The manager assigns each created allocator a non-zero [`Oid`] (the
//! lowest free slot index) and owns it until `free(oid)` or teardown. A
//! zero identifier always means "invalid": slot 0 of the table is reserved
//! so ids and slot indices coincide.
//!
//! A process-wide singleton instance is provided behind a mutex:
//! `initialize` / `destroy` bracket its lifetime, and [`MemoryManager::instance`]
//! returns `None` outside that bracket, which is part of the contract.

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{error, warn};

use crate::allocator::{
    Allocator, ChunkAllocator, DynamicChunkAllocator, Oid, PoolAllocator, StackAllocator,
};

/// Table size used by [`MemoryManager::initialize_default`].
pub const DEFAULT_MAX_ALLOCATORS: u32 = 32;

static INSTANCE: Mutex<Option<MemoryManager>> = Mutex::new(None);

/// Bounded table of owned allocators indexed by [`Oid`].
pub struct MemoryManager {
    /// `max_allocators + 1` slots; index 0 is reserved and never occupied.
    slots: Vec<Option<Box<dyn Allocator + Send>>>,
    /// Number of occupied slots.
    length: u32,
}

impl MemoryManager {
    /// Creates a standalone manager with room for `max_allocators`
    /// allocators.
    pub fn new(max_allocators: u32) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(max_allocators as usize + 1, || None);
        Self { slots, length: 0 }
    }

    /// Initializes the process-wide singleton.
    ///
    /// Initializing twice is reported as a warning and leaves the existing
    /// instance untouched.
    pub fn initialize(max_allocators: u32) {
        let mut slot = INSTANCE.lock();
        if slot.is_some() {
            warn!("memory manager singleton is already initialized");
            return;
        }
        *slot = Some(Self::new(max_allocators));
    }

    /// Initializes the singleton with [`DEFAULT_MAX_ALLOCATORS`] slots.
    pub fn initialize_default() {
        Self::initialize(DEFAULT_MAX_ALLOCATORS);
    }

    /// Tears down the singleton, destroying every remaining allocator.
    ///
    /// Destroying an already-destroyed singleton is reported as a warning.
    pub fn destroy() {
        let mut slot = INSTANCE.lock();
        if slot.take().is_none() {
            warn!("memory manager singleton has already been destroyed");
        }
    }

    /// The live singleton, or `None` before `initialize` / after
    /// `destroy`.
    ///
    /// The returned guard holds the singleton lock; callers serialize all
    /// registry access through it.
    pub fn instance() -> Option<MappedMutexGuard<'static, MemoryManager>> {
        MutexGuard::try_map(INSTANCE.lock(), Option::as_mut).ok()
    }

    /// Maximum number of allocators this manager can hold.
    pub fn max_allocators(&self) -> u32 {
        (self.slots.len() - 1) as u32
    }

    /// Number of currently active allocators.
    pub fn len(&self) -> u32 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Looks up an allocator by identifier.
    ///
    /// Out-of-bounds identifiers are reported and yield `None`; a vacated
    /// in-bounds slot yields `None` silently.
    pub fn get(&self, oid: Oid) -> Option<&dyn Allocator> {
        if oid == 0 || oid > self.max_allocators() {
            warn!(
                oid,
                max = self.max_allocators(),
                "allocator id out of bounds"
            );
            return None;
        }
        self.slots[oid as usize]
            .as_ref()
            .map(|boxed| &**boxed as &dyn Allocator)
    }

    /// Creates a pool allocator; see
    /// [`PoolAllocator::new`](crate::allocator::PoolAllocator::new).
    /// Returns 0 when the table is full.
    pub fn create_pool_allocator(
        &mut self,
        block_size: usize,
        block_count: usize,
        block_align: usize,
    ) -> Oid {
        self.register(|id| Box::new(PoolAllocator::with_oid(block_size, block_count, block_align, id)))
    }

    /// Creates a stack allocator of `stack_size` bytes. Returns 0 when the
    /// table is full.
    pub fn create_stack_allocator(&mut self, stack_size: usize) -> Oid {
        self.register(|id| Box::new(StackAllocator::with_oid(stack_size, id)))
    }

    /// Creates a chunk allocator; see
    /// [`ChunkAllocator::new`](crate::allocator::ChunkAllocator::new).
    /// Returns 0 when the table is full.
    pub fn create_chunk_allocator(&mut self, chunk_size: usize, chunk_count: usize) -> Oid {
        self.register(|id| Box::new(ChunkAllocator::with_oid(chunk_size, chunk_count, id)))
    }

    /// Creates a dynamic chunk allocator spawning sizes with
    /// `default_chunk_count` blocks. Returns 0 when the table is full.
    pub fn create_dynamic_chunk_allocator(&mut self, default_chunk_count: usize) -> Oid {
        self.register(|id| Box::new(DynamicChunkAllocator::with_oid(default_chunk_count, id)))
    }

    /// Destroys the allocator in slot `oid` and vacates the slot.
    ///
    /// Invalid or already-vacated identifiers are reported and ignored.
    pub fn free(&mut self, oid: Oid) {
        if oid == 0 || oid > self.max_allocators() {
            error!(
                oid,
                max = self.max_allocators(),
                "allocator id out of bounds"
            );
            return;
        }
        match self.slots[oid as usize].take() {
            Some(allocator) => {
                drop(allocator);
                self.length -= 1;
            }
            None => warn!(oid, "allocator has already been freed"),
        }
    }

    /// Destroys an allocator owned by this manager, routing through its
    /// `oid()`.
    ///
    /// Takes a raw pointer because the allocator is destroyed mid-call: a
    /// reference argument would still be live while its referent is
    /// dropped.
    ///
    /// # Safety
    /// `allocator` must point to a live allocator owned by this manager
    /// and must not be used after this call.
    pub unsafe fn free_allocator(&mut self, allocator: *const dyn Allocator) {
        // SAFETY: caller guarantees the allocator is live; the id is read
        // before the slot (and the allocator) is vacated.
        let oid = unsafe { (*allocator).oid() };
        self.free(oid);
    }

    /// Finds the lowest vacant slot index, or 0 when none is free.
    fn next_free_oid(&self) -> Oid {
        for (idx, slot) in self.slots.iter().enumerate().skip(1) {
            if slot.is_none() {
                return idx as Oid;
            }
        }
        0
    }

    fn register(
        &mut self,
        build: impl FnOnce(Oid) -> Box<dyn Allocator + Send>,
    ) -> Oid {
        if self.length >= self.max_allocators() {
            warn!(
                length = self.length,
                "too many allocators, try increasing max_allocators"
            );
            return 0;
        }
        let id = self.next_free_oid();
        if id == 0 {
            error!(
                length = self.length,
                "no free slot despite spare capacity"
            );
            return 0;
        }
        self.slots[id as usize] = Some(build(id));
        self.length += 1;
        id
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ALLOCATORS)
    }
}
