//! Deferred destruction of GPU resources.
//!
//! GPU commands are executed asynchronously: the CPU records frame N+1 while the GPU
//! may still be reading resources of earlier frames. A resource released mid-run is
//! therefore parked here and destroyed only after enough frames have elapsed that no
//! submitted command buffer can still reference it.
//!
//! ```text
//! push(res) at frame 7, frames_to_keep = 4
//!
//! frame:    7    8    9    10   11   12
//!           |    |    |    |    |    |
//!           queued          ...      destroyed (12 - 7 > 4)
//! ```

use crate::backend::{
    AccelerationStructureHandle, BufferHandle, GraphicsBackend, ImageHandle, ImageViewHandle,
    SamplerHandle,
};
use crate::device::Device;
use crate::memory::{Allocation, MemoryAllocator};

/// A native resource pending destruction.
#[derive(Debug)]
pub enum DeferredResource {
    Buffer {
        handle: BufferHandle,
        allocation: Allocation,
    },
    Image {
        image: ImageHandle,
        view: ImageViewHandle,
        allocation: Allocation,
    },
    Sampler(SamplerHandle),
    AccelerationStructure(AccelerationStructureHandle),
}

impl DeferredResource {
    fn destroy(self, backend: &dyn GraphicsBackend, allocator: &mut MemoryAllocator) {
        match self {
            DeferredResource::Buffer { handle, allocation } => {
                backend.destroy_buffer(handle);
                allocator.free(backend, allocation);
            }
            DeferredResource::Image {
                image,
                view,
                allocation,
            } => {
                backend.destroy_image_view(view);
                backend.destroy_image(image);
                allocator.free(backend, allocation);
            }
            DeferredResource::Sampler(sampler) => backend.destroy_sampler(sampler),
            DeferredResource::AccelerationStructure(structure) => {
                backend.destroy_acceleration_structure(structure)
            }
        }
    }
}

/// Frame-counted queue of resources waiting for the GPU to let go of them.
#[derive(Debug)]
pub struct DestructionQueue {
    entries: Vec<(u64, DeferredResource)>,
    current_frame: u64,
    frames_to_keep: u64,
}

impl DestructionQueue {
    /// Resources are destroyed once more than `frames_to_keep` frames have elapsed.
    pub fn new(frames_to_keep: u64) -> Self {
        Self {
            entries: Vec::new(),
            current_frame: 0,
            frames_to_keep,
        }
    }

    pub fn set_frames_to_keep(&mut self, frames_to_keep: u64) {
        self.frames_to_keep = frames_to_keep;
    }

    pub fn push(&mut self, resource: DeferredResource) {
        log::trace!(
            "Queued {:?} for destruction at frame {}",
            resource,
            self.current_frame
        );
        self.entries.push((self.current_frame, resource));
    }

    /// Advances the frame counter and destroys every entry that has aged out.
    pub fn process(&mut self, device: &Device, allocator: &mut MemoryAllocator) {
        self.current_frame += 1;
        let current_frame = self.current_frame;
        let frames_to_keep = self.frames_to_keep;

        let (expired, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|(queued, _)| current_frame - queued > frames_to_keep);
        self.entries = pending;

        if !expired.is_empty() {
            log::trace!(
                "Destroying {} deferred resource(s) at frame {}",
                expired.len(),
                current_frame
            );
        }
        for (_, resource) in expired {
            resource.destroy(device.backend(), allocator);
        }
    }

    /// Destroys everything immediately. The device must be idle.
    pub fn flush(&mut self, device: &Device, allocator: &mut MemoryAllocator) {
        for (_, resource) in self.entries.drain(..) {
            resource.destroy(device.backend(), allocator);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for DestructionQueue {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            log::warn!(
                "DestructionQueue dropped with {} pending resource(s)",
                self.entries.len()
            );
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::{BufferUsage, MemoryProperty, SamplerDescriptor};
    use crate::resources::buffer::Buffer;
    use crate::resources::test_support::dummy_device;

    #[test]
    fn test_destroyed_after_frames_to_keep() {
        let (backend, device, mut allocator) = dummy_device();
        let mut queue = DestructionQueue::new(4);
        let sampler = backend.create_sampler(&SamplerDescriptor::default()).unwrap();
        queue.push(DeferredResource::Sampler(sampler));

        for _ in 0..4 {
            queue.process(&device, &mut allocator);
            assert_eq!(queue.len(), 1);
        }
        queue.process(&device, &mut allocator);
        assert!(queue.is_empty());
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_buffer_release_deferred_frees_allocation() {
        let (backend, device, mut allocator) = dummy_device();
        let mut buffer = Buffer::new();
        buffer
            .initialize(
                &device,
                &mut allocator,
                64,
                BufferUsage::VERTEX,
                MemoryProperty::DEVICE_LOCAL,
            )
            .unwrap();
        let mut queue = DestructionQueue::new(0);
        buffer.release_deferred(&mut queue);
        assert!(!buffer.is_initialized());
        assert_eq!(queue.len(), 1);

        queue.flush(&device, &mut allocator);
        assert!(queue.is_empty());
        allocator.release(device.backend());
        assert_eq!(backend.live_object_count(), 0);
    }
}
