//! Borrowed views of the rendering system handed to passes and pipelines.
//!
//! [`RenderContext`] is used while building and tearing down GPU objects (initialize,
//! post-initialize, terminate). [`FrameContext`] is used while recording one frame and
//! exposes only what recording needs.

use crate::backend::{
    BackendCapabilities, CommandBufferHandle, DescriptorSetHandle, ImageHandle, ImageViewHandle,
    TextureFormat,
};
use crate::device::Device;
use crate::memory::MemoryAllocator;
use crate::resolution::{Resolution, SCALED_RESOLUTION_LEVELS};
use crate::resources::{
    CommandPool, CommonSamplers, DescriptorPool, DescriptorSetLayout, RenderTargetId,
    RenderTargetRegistry, SharedRenderTarget, SharedRenderTargets,
};
use crate::uniform::BufferManager;
use crate::RenderingPath;

/// Construction-time access to the rendering system.
pub struct RenderContext<'a> {
    pub device: &'a Device,
    pub allocator: &'a mut MemoryAllocator,
    pub descriptor_pool: &'a DescriptorPool,
    pub command_pool: &'a CommandPool,
    pub registry: &'a mut RenderTargetRegistry,
    pub shared_targets: &'a SharedRenderTargets,
    pub samplers: &'a CommonSamplers,
    pub uniforms: &'a BufferManager,
    /// Layout of descriptor set 0, bound by every pipeline
    pub global_layout: &'a DescriptorSetLayout,
    pub frames_in_flight: usize,
    pub scaled_resolutions: &'a [Resolution; SCALED_RESOLUTION_LEVELS],
    pub swapchain_format: TextureFormat,
    pub swapchain_extent: Resolution,
    pub rendering_path: RenderingPath,
    pub capabilities: BackendCapabilities,
}

impl RenderContext<'_> {
    /// Full render resolution (scaled level 0)
    pub fn resolution(&self) -> Resolution {
        self.scaled_resolutions[0]
    }

    pub fn shared_target(&self, kind: SharedRenderTarget) -> RenderTargetId {
        self.shared_targets.get(kind)
    }
}

/// Per-frame values that decide whether a pass records anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Frame-in-flight slot being recorded
    pub frame_index: usize,
    /// Frames recorded since initialization, including this one
    pub total_frames: u64,
    pub rendering_path: RenderingPath,
}

/// Recording-time access to the rendering system.
pub struct FrameContext<'a> {
    pub device: &'a Device,
    pub command_buffer: CommandBufferHandle,
    pub frame: FrameInfo,
    /// Descriptor set 0 for this frame slot
    pub global_descriptor_set: DescriptorSetHandle,
    pub registry: &'a RenderTargetRegistry,
    pub shared_targets: &'a SharedRenderTargets,
    pub resolution: Resolution,
    pub swapchain_image: ImageHandle,
    pub swapchain_view: ImageViewHandle,
    pub swapchain_format: TextureFormat,
}

impl FrameContext<'_> {
    pub fn frame_index(&self) -> usize {
        self.frame.frame_index
    }
}
