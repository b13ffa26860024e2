//! GPU resource primitives.
//!
//! Each primitive owns exactly one native object (plus its memory allocation for
//! buffers and images) and follows the same explicit lifecycle:
//!
//! | Call         | Precondition          | Effect                                   |
//! |--------------|-----------------------|------------------------------------------|
//! | `initialize` | not initialized       | creates the native object                |
//! | `get`        | initialized           | returns the raw handle, no ownership     |
//! | `release`    | initialized           | destroys the native object immediately   |
//!
//! Violating a precondition is a programmer error caught by `debug_assert!`. Dropping
//! a primitive that is still initialized logs a leak warning; nothing is destroyed
//! implicitly because the device may still be using the object.
//!
//! - [`Buffer`] - memory-backed buffer with host write and staged upload
//! - [`Image`], [`DepthBuffer`], [`RenderTarget`] - device-local images with a view
//! - [`Sampler`], [`CommonSamplers`] - texture samplers
//! - [`ShaderModule`], [`BinaryFile`] - SPIR-V modules and raw resource reading
//! - [`DescriptorSetLayout`], [`DescriptorPool`], [`DescriptorSet`]
//! - [`Fence`], [`Semaphore`], [`CommandPool`], [`CommandBuffer`]
//! - [`RenderTargetRegistry`] - generation-checked render target ownership
//! - [`DestructionQueue`] - frame-delayed destruction

mod buffer;
mod command;
mod deferred;
mod descriptor;
mod image;
mod registry;
mod sampler;
mod shader;
mod sync;

pub use buffer::Buffer;
pub use command::{CommandBuffer, CommandPool};
pub use deferred::{DeferredResource, DestructionQueue};
pub use descriptor::{DescriptorPool, DescriptorSet, DescriptorSetLayout};
pub use image::{DepthBuffer, Image, RenderTarget};
pub use registry::{
    RenderTargetId, RenderTargetRegistry, SharedRenderTarget, SharedRenderTargets,
    SHADOW_MAP_RESOLUTION,
};
pub use sampler::{CommonSampler, CommonSamplers, Sampler};
pub use shader::{spirv_words, BinaryFile, ShaderModule};
pub use sync::{Fence, Semaphore};

#[cfg(all(test, feature = "dummy"))]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::backend::DummyBackend;
    use crate::device::Device;
    use crate::memory::MemoryAllocator;

    /// A device over a fresh dummy backend and an initialized 1 MiB-block allocator.
    pub fn dummy_device() -> (Arc<DummyBackend>, Device, MemoryAllocator) {
        let backend = Arc::new(DummyBackend::new());
        let device = Device::new(backend.clone());
        let mut allocator = MemoryAllocator::new(1024 * 1024);
        allocator.initialize();
        (backend, device, allocator)
    }
}
