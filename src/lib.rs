//! Render Core - render-pass orchestration over an explicit graphics API abstraction
//!
//! The crate drives an ordered set of render passes over a double or triple
//! buffered swapchain:
//! - **Backends**: Vulkan via ash (native only) and a recording dummy backend for tests
//! - **Resources**: explicit initialize/release primitives over a bucketed memory allocator
//! - **Pipelines**: graphics, compute and ray tracing variants with late-bound descriptor sets
//! - **Render passes**: stage-ordered, enabled per frame, with pre/post record hooks
//! - **Rendering system**: per-frame fences and semaphores, uniform mirroring, deferred destruction
//!
//! The application's main loop only talks to [`RenderingSystem`]:
//!
//! ```ignore
//! let mut system = RenderingSystem::new();
//! system.add_render_pass(Box::new(ScreenPass::new(shaders)));
//! system.initialize_system(backend, RenderingConfig::default())?;
//! while !system.update_system_synchronous(delta_time)? {}
//! system.release_system();
//! ```

pub mod backend;
pub mod device;
pub mod memory;
pub mod passes;
pub mod pipeline;
pub mod render_pass;
pub mod rendering_system;
pub mod resolution;
pub mod resources;
pub mod uniform;

pub use backend::{BackendError, BackendResult, BackendType, GraphicsBackend};
pub use device::{Device, Queue};
pub use pipeline::Pipeline;
pub use render_pass::{RenderPass, RenderPassBase, RenderPassStage};
pub use rendering_system::RenderingSystem;
pub use resolution::Resolution;

#[cfg(feature = "dummy")]
pub use backend::DummyBackend;
#[cfg(all(feature = "vulkan-backend", not(target_arch = "wasm32")))]
pub use backend::VulkanBackend;

/// Which family of passes produces the scene image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderingPath {
    /// Rasterization: shadows, lighting and the rest of the chain
    #[default]
    Default,
    /// Ray traced scene, denoised and accumulated
    PathTracing,
    /// No scene; only passes that run on every path record
    None,
}

/// Maximum number of frames in flight
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Configuration for initializing the rendering system
#[derive(Debug, Clone)]
pub struct RenderingConfig {
    /// Frames the CPU may record ahead of the GPU (1..=3)
    pub frames_in_flight: usize,
    /// Full resolution before scaling
    pub resolution: Resolution,
    /// Factor applied to the full resolution for scaled level 0
    pub resolution_scale: f32,
    /// Enable vsync
    pub vsync: bool,
    pub initial_rendering_path: RenderingPath,
    /// Enable API validation layers where the backend has them
    pub enable_validation: bool,
    /// Size of each device memory block the allocator requests
    pub memory_block_size: u64,
    /// Descriptor sets the shared pool can hand out
    pub descriptor_pool_capacity: u32,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            resolution: Resolution::new(1280, 720),
            resolution_scale: 1.0,
            vsync: true,
            initial_rendering_path: RenderingPath::Default,
            enable_validation: cfg!(debug_assertions),
            memory_block_size: memory::DEFAULT_BLOCK_SIZE,
            descriptor_pool_capacity: 1024,
        }
    }
}

impl RenderingConfig {
    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Resolution::new(width, height);
        self
    }

    pub fn with_resolution_scale(mut self, scale: f32) -> Self {
        self.resolution_scale = scale;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_rendering_path(mut self, path: RenderingPath) -> Self {
        self.initial_rendering_path = path;
        self
    }

    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    pub fn with_memory_block_size(mut self, size: u64) -> Self {
        self.memory_block_size = size;
        self
    }

    pub fn with_descriptor_pool_capacity(mut self, capacity: u32) -> Self {
        self.descriptor_pool_capacity = capacity;
        self
    }

    /// Rejects out-of-range values before anything is created.
    pub fn validate(&self) -> BackendResult<()> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(BackendError::InvalidParameter(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }
        if self.resolution.is_empty() {
            return Err(BackendError::InvalidParameter(format!(
                "resolution must be non-zero, got {}x{}",
                self.resolution.width, self.resolution.height
            )));
        }
        if !(self.resolution_scale > 0.0 && self.resolution_scale <= 4.0) {
            return Err(BackendError::InvalidParameter(format!(
                "resolution_scale must be in (0, 4], got {}",
                self.resolution_scale
            )));
        }
        if self.memory_block_size == 0 {
            return Err(BackendError::InvalidParameter(
                "memory_block_size must be non-zero".into(),
            ));
        }
        if self.descriptor_pool_capacity == 0 {
            return Err(BackendError::InvalidParameter(
                "descriptor_pool_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RenderingConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.resolution, Resolution::new(1280, 720));
        assert_eq!(config.initial_rendering_path, RenderingPath::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(RenderingConfig::default()
            .with_frames_in_flight(0)
            .validate()
            .is_err());
        assert!(RenderingConfig::default()
            .with_frames_in_flight(4)
            .validate()
            .is_err());
        assert!(RenderingConfig::default()
            .with_resolution(0, 720)
            .validate()
            .is_err());
        assert!(RenderingConfig::default()
            .with_resolution_scale(0.0)
            .validate()
            .is_err());
        assert!(RenderingConfig::default()
            .with_frames_in_flight(3)
            .with_resolution_scale(0.5)
            .validate()
            .is_ok());
    }
}
