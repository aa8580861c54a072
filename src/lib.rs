//! # bedrock-memory
//!
//! Fixed-purpose memory allocators for workloads where the generic heap is
//! too slow or too unpredictable: uniform object pools, scoped stack
//! frames, mixed-size chunk pools and a multiplexing dynamic chunk
//! allocator, all managed by a central registry that hands out opaque
//! identifiers.
//!
//! The allocators share one polymorphic capability set
//! ([`allocator::Allocator`]) and are deliberately single-threaded: the
//! types are `!Sync` and callers serialize access. Failures never panic;
//! they surface as [`AllocError`] values plus a best-effort diagnostic on
//! the `tracing` channel.
//!
//! ```
//! use bedrock_memory::allocator::{Allocator, PoolAllocator, TypedAlloc};
//!
//! let pool = PoolAllocator::new(64, 16, 8);
//! unsafe {
//!     let value = pool.emplace(42u64).unwrap();
//!     assert_eq!(*value.as_ref(), 42);
//!     pool.destroy(value).unwrap();
//! }
//! ```

pub mod allocator;
pub mod error;
pub mod utils;

pub use allocator::{
    AllocBox, Allocator, AllocatorKind, ChunkAllocator, DynamicChunkAllocator, MemoryManager, Oid,
    PoolAllocator, StackAllocator, StackScope, TypedAlloc,
};
pub use error::{AllocError, AllocResult};
