//! Device memory management

mod allocator;

pub use allocator::{Allocation, MemoryAllocator, DEFAULT_BLOCK_SIZE};
