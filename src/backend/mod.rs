//! Backend abstraction layer
//!
//! Provides the [`GraphicsBackend`] trait and the types that both the Vulkan and the
//! dummy backends implement.

pub mod check;
pub mod traits;
pub mod types;

#[cfg(feature = "dummy")]
pub mod dummy;

// Vulkan backend is only available on native platforms
#[cfg(all(feature = "vulkan-backend", not(target_arch = "wasm32")))]
pub mod vulkan;

pub use check::check_result;
pub use traits::*;
pub use types::*;

#[cfg(feature = "dummy")]
pub use dummy::{DummyBackend, DummyFault, DummyFenceState, DummyObjectKind, RecordedCall};

#[cfg(all(feature = "vulkan-backend", not(target_arch = "wasm32")))]
pub use vulkan::VulkanBackend;

use std::sync::Arc;

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Recording backend without GPU access
    Dummy,
    /// Vulkan 1.3 via ash (native only)
    Vulkan,
}

impl BackendType {
    /// Returns true if this backend was compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            BackendType::Dummy => cfg!(feature = "dummy"),
            BackendType::Vulkan => {
                cfg!(all(feature = "vulkan-backend", not(target_arch = "wasm32")))
            }
        }
    }
}

/// Create a headless dummy backend.
#[cfg(feature = "dummy")]
pub fn create_dummy_backend() -> Arc<dyn GraphicsBackend> {
    log::info!("Using dummy backend");
    Arc::new(DummyBackend::new())
}

/// Create a Vulkan backend rendering into `window`.
///
/// Falls back to the dummy backend when the Vulkan driver cannot be initialized
/// and the `dummy` feature is enabled.
#[cfg(all(feature = "vulkan-backend", not(target_arch = "wasm32")))]
pub fn create_vulkan_backend(
    window: Arc<winit::window::Window>,
    config: &crate::RenderingConfig,
) -> BackendResult<Arc<dyn GraphicsBackend>> {
    match VulkanBackend::new(window, config.vsync, config.enable_validation) {
        Ok(backend) => {
            log::info!("Using Vulkan backend");
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "dummy")]
        Err(e) => {
            log::warn!("Failed to create Vulkan backend: {}, falling back to dummy", e);
            Ok(create_dummy_backend())
        }
        #[cfg(not(feature = "dummy"))]
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_backend_available() {
        assert_eq!(BackendType::Dummy.is_available(), cfg!(feature = "dummy"));
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_create_dummy_backend() {
        let backend = create_dummy_backend();
        assert_eq!(backend.name(), "Dummy Backend");
        assert!(backend.capabilities().ray_tracing);
    }
}
