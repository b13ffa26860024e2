//! Fences and semaphores.

use crate::backend::{check_result, BackendResult, FenceHandle, SemaphoreHandle};
use crate::device::Device;

/// GPU-to-CPU synchronization primitive.
#[derive(Default)]
pub struct Fence {
    handle: Option<FenceHandle>,
}

impl Fence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the fence, optionally in the signaled state so the first wait returns.
    pub fn initialize(&mut self, device: &Device, signaled: bool) -> BackendResult<()> {
        debug_assert!(self.handle.is_none(), "Fence initialized twice without release");
        self.handle = Some(check_result(
            device.backend().create_fence(signaled),
            "create fence",
        )?);
        Ok(())
    }

    pub fn release(&mut self, device: &Device) {
        debug_assert!(self.handle.is_some(), "Fence released before initialize");
        if let Some(handle) = self.handle.take() {
            device.backend().destroy_fence(handle);
        }
    }

    pub fn get(&self) -> FenceHandle {
        debug_assert!(self.handle.is_some(), "Fence used before initialize");
        self.handle.unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    /// Blocks until signaled. There is no timeout.
    pub fn wait(&self, device: &Device) -> BackendResult<()> {
        device.backend().wait_for_fence(self.get())
    }

    pub fn reset(&self, device: &Device) -> BackendResult<()> {
        device.backend().reset_fence(self.get())
    }

    pub fn is_signaled(&self, device: &Device) -> bool {
        device.backend().is_fence_signaled(self.get())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            log::warn!("Fence {:?} dropped without release", handle);
        }
    }
}

/// GPU-to-GPU synchronization primitive.
#[derive(Default)]
pub struct Semaphore {
    handle: Option<SemaphoreHandle>,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self, device: &Device) -> BackendResult<()> {
        debug_assert!(
            self.handle.is_none(),
            "Semaphore initialized twice without release"
        );
        self.handle = Some(check_result(
            device.backend().create_semaphore(),
            "create semaphore",
        )?);
        Ok(())
    }

    pub fn release(&mut self, device: &Device) {
        debug_assert!(self.handle.is_some(), "Semaphore released before initialize");
        if let Some(handle) = self.handle.take() {
            device.backend().destroy_semaphore(handle);
        }
    }

    pub fn get(&self) -> SemaphoreHandle {
        debug_assert!(self.handle.is_some(), "Semaphore used before initialize");
        self.handle.unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            log::warn!("Semaphore {:?} dropped without release", handle);
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::resources::test_support::dummy_device;

    #[test]
    fn test_signaled_fence_wait_returns() {
        let (_backend, device, _allocator) = dummy_device();
        let mut fence = Fence::new();
        fence.initialize(&device, true).unwrap();
        assert!(fence.is_signaled(&device));
        fence.wait(&device).unwrap();
        fence.reset(&device).unwrap();
        assert!(!fence.is_signaled(&device));
        fence.release(&device);
        assert!(!fence.is_initialized());
    }

    #[test]
    fn test_semaphore_release() {
        let (backend, device, _allocator) = dummy_device();
        let mut semaphore = Semaphore::new();
        semaphore.initialize(&device).unwrap();
        assert!(!semaphore.get().is_null());
        semaphore.release(&device);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "released before initialize")]
    fn test_release_without_initialize_is_caught() {
        let (_backend, device, _allocator) = dummy_device();
        let mut fence = Fence::new();
        fence.release(&device);
    }
}
