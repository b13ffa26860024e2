//! Block-based bump allocator for device memory.
//!
//! Memory is bucketed by [`MemoryClass`]. Each class keeps a list of backing blocks and
//! bumps a free offset inside the first block with room, honoring the alignment each
//! resource reports. Every block has one backend memory type, chosen from the class and
//! the resource's allowed type bits, so a resource is only placed in a block it may bind.
//!
//! A linear resource (buffer) never shares a `buffer_image_granularity` page with an
//! optimally tiled one (image): whenever the tiling changes from the previous tail of
//! the block, the next offset is rounded up to the granularity.
//!
//! Freeing the most recent allocation of a block rewinds the bump offset to its start,
//! which keeps short-lived staging buffers from growing the host-visible blocks. A
//! block becomes reusable from its start once every allocation carved from it has been
//! freed. Requests larger than the configured block size get a dedicated block of
//! exactly their size.
//!
//! ```text
//! DeviceLocal (type 0): [ buf A | page pad | img B |    free    ]  [ dedicated 200 MiB ]
//! DeviceLocal (type 2): [ depth |              free             ]
//! HostVisibleCoherent:  [ ubo 0 | ubo 1 | staging -> rewound    ]
//! ```
//!
//! The allocator takes `&mut self` everywhere and is not internally synchronized.

use crate::backend::{
    BackendError, BackendResult, GraphicsBackend, MemoryClass, MemoryHandle, MemoryRequirements, ResourceTiling,
};

/// Default size of one backing memory block (64 MiB)
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// A sub-range of one backing memory block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub memory: MemoryHandle,
    pub offset: u64,
    pub size: u64,
    pub class: MemoryClass,
    /// Tiling of the block's tail before this allocation was carved
    previous_tail: Option<ResourceTiling>,
}

impl Allocation {
    /// One past the last byte of this allocation
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

#[derive(Debug)]
struct MemoryBlock {
    memory: MemoryHandle,
    memory_type: u32,
    size: u64,
    next_offset: u64,
    /// Tiling of the resource ending at `next_offset`, `None` when unknown
    tail_tiling: Option<ResourceTiling>,
    live_allocations: u32,
    dedicated: bool,
}

impl MemoryBlock {
    fn try_bump(
        &mut self,
        class: MemoryClass,
        size: u64,
        alignment: u64,
        tiling: ResourceTiling,
        granularity: u64,
    ) -> Option<Allocation> {
        // Alignments and granularity are powers of two, so the larger one satisfies both.
        let alignment = if self.tail_tiling == Some(tiling) {
            alignment
        } else {
            alignment.max(granularity)
        };
        let offset = align_up(self.next_offset, alignment);
        let end = offset.checked_add(size)?;
        if end > self.size {
            return None;
        }
        let previous_tail = self.tail_tiling.replace(tiling);
        self.next_offset = end;
        self.live_allocations += 1;
        Some(Allocation {
            memory: self.memory,
            offset,
            size,
            class,
            previous_tail,
        })
    }

    fn rewind(&mut self, offset: u64, tail_tiling: Option<ResourceTiling>) {
        self.next_offset = offset;
        self.tail_tiling = tail_tiling;
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    value.div_ceil(alignment) * alignment
}

/// Device memory allocator
#[derive(Debug)]
pub struct MemoryAllocator {
    block_size: u64,
    blocks: [Vec<MemoryBlock>; 2],
    initialized: bool,
}

impl MemoryAllocator {
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size: block_size.max(1),
            blocks: [Vec::new(), Vec::new()],
            initialized: false,
        }
    }

    /// Prepares empty allocation lists for every memory class.
    pub fn initialize(&mut self) {
        debug_assert!(!self.initialized, "MemoryAllocator initialized twice");
        for blocks in &mut self.blocks {
            blocks.clear();
        }
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Returns an aligned allocation of `requirements.size` bytes from `class`.
    ///
    /// Device allocation failures propagate unchanged; nothing is retried.
    pub fn get_allocation(
        &mut self,
        backend: &dyn GraphicsBackend,
        class: MemoryClass,
        requirements: MemoryRequirements,
    ) -> BackendResult<Allocation> {
        debug_assert!(self.initialized, "MemoryAllocator used before initialize");
        debug_assert!(requirements.size > 0, "zero-sized allocation request");
        let size = requirements.size.max(1);
        let alignment = requirements.alignment.max(1);
        let memory_type = backend.memory_type_index(class, requirements.memory_type_bits)?;
        let granularity = backend.capabilities().buffer_image_granularity.max(1);
        let blocks = &mut self.blocks[class.index()];

        if size > self.block_size {
            let memory = backend.allocate_memory(class, memory_type, size)?;
            log::debug!(
                "Allocated dedicated {:?} block of {} bytes (type {})",
                class,
                size,
                memory_type
            );
            blocks.push(MemoryBlock {
                memory,
                memory_type,
                size,
                next_offset: size,
                tail_tiling: Some(requirements.tiling),
                live_allocations: 1,
                dedicated: true,
            });
            return Ok(Allocation {
                memory,
                offset: 0,
                size,
                class,
                previous_tail: None,
            });
        }

        let shared = blocks
            .iter_mut()
            .filter(|block| !block.dedicated && block.memory_type == memory_type);
        for block in shared {
            if let Some(allocation) =
                block.try_bump(class, size, alignment, requirements.tiling, granularity)
            {
                return Ok(allocation);
            }
        }

        let memory = backend.allocate_memory(class, memory_type, self.block_size)?;
        log::debug!(
            "Allocated {:?} block of {} bytes (type {}, {} blocks in class)",
            class,
            self.block_size,
            memory_type,
            blocks.len() + 1
        );
        let mut block = MemoryBlock {
            memory,
            memory_type,
            size: self.block_size,
            next_offset: 0,
            tail_tiling: None,
            live_allocations: 0,
            dedicated: false,
        };
        // A fresh block always fits a request no larger than the block size.
        let Some(allocation) =
            block.try_bump(class, size, alignment, requirements.tiling, granularity)
        else {
            backend.free_memory(memory);
            return Err(BackendError::MemoryAllocationFailed(format!(
                "{} bytes do not fit a fresh block",
                size
            )));
        };
        blocks.push(block);
        Ok(allocation)
    }

    /// Returns an allocation to its block.
    ///
    /// Dedicated blocks are freed immediately. Shared blocks rewind to the freed
    /// allocation when it was the most recent one, and to their start once empty.
    pub fn free(&mut self, backend: &dyn GraphicsBackend, allocation: Allocation) {
        let blocks = &mut self.blocks[allocation.class.index()];
        let Some(position) = blocks
            .iter()
            .position(|block| block.memory == allocation.memory)
        else {
            debug_assert!(false, "freeing an allocation this allocator does not own");
            return;
        };

        let block = &mut blocks[position];
        debug_assert!(block.live_allocations > 0, "allocation freed twice");
        block.live_allocations = block.live_allocations.saturating_sub(1);
        if block.live_allocations > 0 {
            if !block.dedicated && allocation.end() == block.next_offset {
                block.rewind(allocation.offset, allocation.previous_tail);
            }
            return;
        }
        if block.dedicated {
            let block = blocks.swap_remove(position);
            backend.free_memory(block.memory);
        } else {
            block.rewind(0, None);
        }
    }

    /// Frees every backing block.
    pub fn release(&mut self, backend: &dyn GraphicsBackend) {
        debug_assert!(self.initialized, "MemoryAllocator released before initialize");
        for blocks in &mut self.blocks {
            for block in blocks.drain(..) {
                if block.live_allocations > 0 {
                    log::warn!(
                        "Freeing memory block with {} live allocation(s)",
                        block.live_allocations
                    );
                }
                backend.free_memory(block.memory);
            }
        }
        self.initialized = false;
    }

    /// Number of backing blocks in `class`
    pub fn block_count(&self, class: MemoryClass) -> usize {
        self.blocks[class.index()].len()
    }
}

impl Default for MemoryAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl Drop for MemoryAllocator {
    fn drop(&mut self) {
        let leaked: usize = self.blocks.iter().map(Vec::len).sum();
        if leaked > 0 {
            log::warn!("MemoryAllocator dropped with {} unreleased block(s)", leaked);
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn requirements(size: u64, alignment: u64) -> MemoryRequirements {
        MemoryRequirements::linear(size, alignment)
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(17, 0), 17);
    }

    #[test]
    fn test_allocations_do_not_overlap() {
        let backend = DummyBackend::new();
        let mut allocator = MemoryAllocator::new(4096);
        allocator.initialize();

        let sizes = [100u64, 256, 7, 1000, 33, 512, 2048, 90, 1];
        let alignments = [16u64, 256, 4, 64, 1, 512, 256, 16, 1024];
        let mut issued = Vec::new();
        for (size, alignment) in sizes.iter().zip(alignments.iter()) {
            let allocation = allocator
                .get_allocation(&backend, MemoryClass::DeviceLocal, requirements(*size, *alignment))
                .unwrap();
            assert_eq!(allocation.offset % alignment, 0);
            assert!(allocation.end() <= 4096);
            issued.push(allocation);
        }

        for (i, a) in issued.iter().enumerate() {
            for b in issued.iter().skip(i + 1) {
                if a.memory == b.memory {
                    assert!(a.end() <= b.offset || b.end() <= a.offset, "{:?} overlaps {:?}", a, b);
                }
            }
        }
        assert!(allocator.block_count(MemoryClass::DeviceLocal) >= 2);
        allocator.release(&backend);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_classes_use_separate_blocks() {
        let backend = DummyBackend::new();
        let mut allocator = MemoryAllocator::new(1024);
        allocator.initialize();
        let device_local = allocator
            .get_allocation(&backend, MemoryClass::DeviceLocal, requirements(64, 16))
            .unwrap();
        let host = allocator
            .get_allocation(&backend, MemoryClass::HostVisibleCoherent, requirements(64, 16))
            .unwrap();
        assert_ne!(device_local.memory, host.memory);
        assert_eq!(allocator.block_count(MemoryClass::DeviceLocal), 1);
        assert_eq!(allocator.block_count(MemoryClass::HostVisibleCoherent), 1);
        allocator.release(&backend);
    }

    #[test]
    fn test_oversized_request_gets_dedicated_block() {
        let backend = DummyBackend::new();
        let mut allocator = MemoryAllocator::new(1024);
        allocator.initialize();
        let large = allocator
            .get_allocation(&backend, MemoryClass::DeviceLocal, requirements(5000, 256))
            .unwrap();
        assert_eq!(large.offset, 0);
        assert_eq!(backend.allocated_memory(MemoryClass::DeviceLocal), 5000);

        allocator.free(&backend, large);
        assert_eq!(backend.allocated_memory(MemoryClass::DeviceLocal), 0);
        allocator.release(&backend);
    }

    #[test]
    fn test_empty_block_is_reused() {
        let backend = DummyBackend::new();
        let mut allocator = MemoryAllocator::new(1024);
        allocator.initialize();
        let first = allocator
            .get_allocation(&backend, MemoryClass::DeviceLocal, requirements(600, 16))
            .unwrap();
        allocator.free(&backend, first);
        let second = allocator
            .get_allocation(&backend, MemoryClass::DeviceLocal, requirements(600, 16))
            .unwrap();
        assert_eq!(second.memory, first.memory);
        assert_eq!(second.offset, 0);
        assert_eq!(allocator.block_count(MemoryClass::DeviceLocal), 1);
        allocator.release(&backend);
    }

    #[test]
    fn test_tiling_change_starts_a_new_granularity_page() {
        let backend = DummyBackend::new();
        let granularity = backend.capabilities().buffer_image_granularity;
        assert!(granularity > 256);
        let mut allocator = MemoryAllocator::new(16 * granularity);
        allocator.initialize();

        let buffer = allocator
            .get_allocation(&backend, MemoryClass::DeviceLocal, requirements(100, 16))
            .unwrap();
        let image = allocator
            .get_allocation(
                &backend,
                MemoryClass::DeviceLocal,
                MemoryRequirements::optimal(2000, 256),
            )
            .unwrap();
        let next_buffer = allocator
            .get_allocation(&backend, MemoryClass::DeviceLocal, requirements(64, 16))
            .unwrap();
        let same_tiling = allocator
            .get_allocation(&backend, MemoryClass::DeviceLocal, requirements(64, 16))
            .unwrap();

        assert_eq!(buffer.offset, 0);
        assert_eq!(image.memory, buffer.memory);
        assert_eq!(image.offset, granularity);
        assert_eq!(next_buffer.offset, align_up(image.end(), granularity));
        assert_eq!(same_tiling.offset, next_buffer.end());
        allocator.release(&backend);
    }

    #[test]
    fn test_blocks_are_keyed_by_memory_type() {
        let backend = DummyBackend::new();
        let mut allocator = MemoryAllocator::new(64 * 1024);
        allocator.initialize();
        let color_bits = 0b001;
        let depth_bits = 0b100;

        let color = allocator
            .get_allocation(
                &backend,
                MemoryClass::DeviceLocal,
                MemoryRequirements {
                    memory_type_bits: color_bits,
                    ..MemoryRequirements::optimal(4096, 1024)
                },
            )
            .unwrap();
        let depth = allocator
            .get_allocation(
                &backend,
                MemoryClass::DeviceLocal,
                MemoryRequirements {
                    memory_type_bits: depth_bits,
                    ..MemoryRequirements::optimal(4096, 1024)
                },
            )
            .unwrap();
        assert_ne!(color.memory, depth.memory);
        assert_eq!(depth.offset, 0);
        assert_eq!(allocator.block_count(MemoryClass::DeviceLocal), 2);

        // Host-visible memory is type 1 only.
        let unsatisfiable = allocator.get_allocation(
            &backend,
            MemoryClass::HostVisibleCoherent,
            MemoryRequirements {
                memory_type_bits: depth_bits,
                ..requirements(64, 16)
            },
        );
        assert!(matches!(
            unsatisfiable,
            Err(BackendError::MemoryAllocationFailed(_))
        ));
        allocator.release(&backend);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_repeated_staging_reuses_the_block_tail() {
        let backend = DummyBackend::new();
        let mut allocator = MemoryAllocator::new(1024);
        allocator.initialize();
        let uniforms = allocator
            .get_allocation(&backend, MemoryClass::HostVisibleCoherent, requirements(256, 256))
            .unwrap();

        let mut offsets = Vec::new();
        for _ in 0..8 {
            let staging = allocator
                .get_allocation(&backend, MemoryClass::HostVisibleCoherent, requirements(600, 16))
                .unwrap();
            offsets.push(staging.offset);
            allocator.free(&backend, staging);
        }
        assert!(offsets.iter().all(|offset| *offset == uniforms.end()));
        assert_eq!(allocator.block_count(MemoryClass::HostVisibleCoherent), 1);

        // Freeing out of order keeps the later allocation intact.
        let first = allocator
            .get_allocation(&backend, MemoryClass::HostVisibleCoherent, requirements(128, 16))
            .unwrap();
        let second = allocator
            .get_allocation(&backend, MemoryClass::HostVisibleCoherent, requirements(128, 16))
            .unwrap();
        allocator.free(&backend, first);
        let third = allocator
            .get_allocation(&backend, MemoryClass::HostVisibleCoherent, requirements(128, 16))
            .unwrap();
        assert!(third.offset >= second.end());
        allocator.release(&backend);
    }

    #[test]
    fn test_out_of_memory_propagates() {
        let backend = DummyBackend::new().with_memory_budget(MemoryClass::DeviceLocal, 1024);
        let mut allocator = MemoryAllocator::new(1024);
        allocator.initialize();
        allocator
            .get_allocation(&backend, MemoryClass::DeviceLocal, requirements(1024, 1))
            .unwrap();
        let result =
            allocator.get_allocation(&backend, MemoryClass::DeviceLocal, requirements(1, 1));
        assert_eq!(result, Err(BackendError::OutOfDeviceMemory));
        allocator.release(&backend);
    }
}
