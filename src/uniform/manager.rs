//! Per-frame GPU mirrors of CPU-side uniform data.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::{BackendResult, BufferHandle, BufferUsage, MemoryProperty};
use crate::device::Device;
use crate::memory::MemoryAllocator;
use crate::resources::Buffer;

/// CPU-side data mirrored into a uniform buffer every frame.
///
/// The manager holds an `Arc` to the source, so the data stays valid for as long as
/// the registration exists. Producers mutate it through their own handle.
pub trait UniformSource: Send + Sync {
    /// Size in bytes. Must not change after registration.
    fn size(&self) -> u64;

    /// Calls `f` with the current contents.
    fn with_bytes(&self, f: &mut dyn FnMut(&[u8]));
}

impl<T: bytemuck::Pod + Send + Sync> UniformSource for RwLock<T> {
    fn size(&self) -> u64 {
        std::mem::size_of::<T>() as u64
    }

    fn with_bytes(&self, f: &mut dyn FnMut(&[u8])) {
        f(bytemuck::bytes_of(&*self.read()))
    }
}

struct UniformEntry {
    source: Arc<dyn UniformSource>,
    size: u64,
    buffers: Vec<Buffer>,
}

/// Registry of uniform buffers, one physical buffer per frame in flight.
pub struct BufferManager {
    frames_in_flight: usize,
    entries: HashMap<u64, UniformEntry>,
    // Upload order, so render_update is deterministic.
    order: Vec<u64>,
}

impl BufferManager {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Creates one host-visible uniform buffer per frame in flight, sized to `source`.
    pub fn register_uniform_buffer(
        &mut self,
        device: &Device,
        allocator: &mut MemoryAllocator,
        identifier: u64,
        source: Arc<dyn UniformSource>,
    ) -> BackendResult<()> {
        debug_assert!(
            !self.entries.contains_key(&identifier),
            "uniform buffer {:#018x} registered twice",
            identifier
        );
        let size = source.size();
        let mut buffers: Vec<Buffer> = Vec::with_capacity(self.frames_in_flight);
        for _ in 0..self.frames_in_flight {
            let mut buffer = Buffer::new();
            if let Err(e) = buffer.initialize(
                device,
                allocator,
                size,
                BufferUsage::UNIFORM,
                MemoryProperty::HOST_VISIBLE | MemoryProperty::HOST_COHERENT,
            ) {
                for mut created in buffers {
                    created.release(device, allocator);
                }
                return Err(e);
            }
            buffers.push(buffer);
        }

        log::debug!(
            "Registered uniform buffer {:#018x} ({} bytes x {} frames)",
            identifier,
            size,
            self.frames_in_flight
        );
        self.entries.insert(
            identifier,
            UniformEntry {
                source,
                size,
                buffers,
            },
        );
        self.order.push(identifier);
        Ok(())
    }

    /// Copies every registered source into its buffer for `frame_index`.
    pub fn render_update(&self, device: &Device, frame_index: usize) -> BackendResult<()> {
        debug_assert!(frame_index < self.frames_in_flight);
        for identifier in &self.order {
            let Some(entry) = self.entries.get(identifier) else {
                continue;
            };
            let mut result = Ok(());
            entry.source.with_bytes(&mut |bytes| {
                debug_assert_eq!(
                    bytes.len() as u64,
                    entry.size,
                    "uniform source changed size"
                );
                result = entry.buffers[frame_index].write(device, 0, bytes);
            });
            result?;
        }
        Ok(())
    }

    /// The buffer mirroring `identifier` for `frame_index`.
    pub fn get_uniform_buffer(&self, identifier: u64, frame_index: usize) -> Option<BufferHandle> {
        self.entries
            .get(&identifier)
            .and_then(|entry| entry.buffers.get(frame_index))
            .map(Buffer::get)
    }

    /// Registered size of `identifier`
    pub fn uniform_buffer_size(&self, identifier: u64) -> Option<u64> {
        self.entries.get(&identifier).map(|entry| entry.size)
    }

    /// Reads back the mirror of `identifier` for `frame_index`.
    pub fn read_back(
        &self,
        device: &Device,
        identifier: u64,
        frame_index: usize,
    ) -> Option<BackendResult<Vec<u8>>> {
        let entry = self.entries.get(&identifier)?;
        let buffer = entry.buffers.get(frame_index)?;
        Some(buffer.read(device, 0, entry.size))
    }

    pub fn contains(&self, identifier: u64) -> bool {
        self.entries.contains_key(&identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Releases every buffer and forgets every registration.
    pub fn release(&mut self, device: &Device, allocator: &mut MemoryAllocator) {
        for (_, mut entry) in self.entries.drain() {
            for buffer in &mut entry.buffers {
                buffer.release(device, allocator);
            }
        }
        self.order.clear();
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::resources::test_support::dummy_device;
    use crate::uniform::hash_name;

    #[test]
    fn test_render_update_mirrors_source() {
        let (_backend, device, mut allocator) = dummy_device();
        let mut manager = BufferManager::new(2);
        let source = Arc::new(RwLock::new([0u32; 4]));
        let id = hash_name("Test");
        manager
            .register_uniform_buffer(&device, &mut allocator, id, source.clone())
            .unwrap();
        assert_eq!(manager.uniform_buffer_size(id), Some(16));

        *source.write() = [1, 2, 3, 4];
        manager.render_update(&device, 1).unwrap();
        let mirrored = manager.read_back(&device, id, 1).unwrap().unwrap();
        assert_eq!(mirrored, bytemuck::bytes_of(&[1u32, 2, 3, 4]).to_vec());

        // Slot 0 was never updated.
        let untouched = manager.read_back(&device, id, 0).unwrap().unwrap();
        assert_eq!(untouched, vec![0; 16]);

        manager.release(&device, &mut allocator);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_buffers_per_frame_are_distinct() {
        let (_backend, device, mut allocator) = dummy_device();
        let mut manager = BufferManager::new(3);
        let id = hash_name("PerFrame");
        manager
            .register_uniform_buffer(&device, &mut allocator, id, Arc::new(RwLock::new(0u64)))
            .unwrap();
        let handles: Vec<_> = (0..3)
            .map(|frame| manager.get_uniform_buffer(id, frame).unwrap())
            .collect();
        assert_ne!(handles[0], handles[1]);
        assert_ne!(handles[1], handles[2]);
        assert!(manager.get_uniform_buffer(id, 3).is_none());
        assert!(manager.get_uniform_buffer(hash_name("Missing"), 0).is_none());
        manager.release(&device, &mut allocator);
    }
}
