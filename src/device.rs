//! Logical device and submission queues.
//!
//! The [`Device`] owns the backend and one [`Queue`] per capability. When the backend
//! reports the same native queue for several capabilities the queues are shared, so a
//! single submission lock covers every path into that native queue.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{
    BackendResult, FenceHandle, GraphicsBackend, QueueHandle, QueueInfo, QueueKind,
    SemaphoreHandle, SubmitInfo,
};

/// A submission channel to the device.
pub struct Queue {
    backend: Arc<dyn GraphicsBackend>,
    kind: QueueKind,
    info: QueueInfo,
    submit_lock: Mutex<()>,
}

impl Queue {
    fn new(backend: Arc<dyn GraphicsBackend>, kind: QueueKind) -> Self {
        let info = backend.queue(kind);
        Self {
            backend,
            kind,
            info,
            submit_lock: Mutex::new(()),
        }
    }

    /// The capability this queue was first requested for
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn handle(&self) -> QueueHandle {
        self.info.handle
    }

    pub fn family_index(&self) -> u32 {
        self.info.family_index
    }

    /// Submits recorded work, serialized against every other submission to this queue.
    pub fn submit(&self, submit: &SubmitInfo<'_>, fence: Option<FenceHandle>) -> BackendResult<()> {
        let _guard = self.submit_lock.lock();
        log::trace!(
            "Submitting {} command buffer(s) to {:?} queue",
            submit.command_buffers.len(),
            self.kind
        );
        self.backend.queue_submit(self.info.handle, submit, fence)
    }

    /// Presents a swapchain image once `wait` is signaled.
    pub fn present(&self, image_index: u32, wait: SemaphoreHandle) -> BackendResult<()> {
        let _guard = self.submit_lock.lock();
        self.backend.present(self.info.handle, image_index, wait)
    }

    /// Blocks until all submitted work retires. Shutdown and resize only.
    pub fn wait_idle(&self) -> BackendResult<()> {
        let _guard = self.submit_lock.lock();
        self.backend.queue_wait_idle(self.info.handle)
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("kind", &self.kind)
            .field("handle", &self.info.handle)
            .field("family_index", &self.info.family_index)
            .finish()
    }
}

/// The logical GPU device.
pub struct Device {
    backend: Arc<dyn GraphicsBackend>,
    graphics: Arc<Queue>,
    compute: Arc<Queue>,
    transfer: Arc<Queue>,
}

impl Device {
    pub fn new(backend: Arc<dyn GraphicsBackend>) -> Self {
        let graphics = Arc::new(Queue::new(backend.clone(), QueueKind::Graphics));
        let share_or_create = |kind: QueueKind, existing: &[&Arc<Queue>]| {
            let info = backend.queue(kind);
            existing
                .iter()
                .find(|queue| queue.handle() == info.handle)
                .map(|queue| Arc::clone(*queue))
                .unwrap_or_else(|| Arc::new(Queue::new(backend.clone(), kind)))
        };
        let compute = share_or_create(QueueKind::Compute, &[&graphics]);
        let transfer = share_or_create(QueueKind::Transfer, &[&graphics, &compute]);

        log::info!(
            "Device created on {} (graphics family {}, compute family {}, transfer family {})",
            backend.name(),
            graphics.family_index(),
            compute.family_index(),
            transfer.family_index()
        );

        Self {
            backend,
            graphics,
            compute,
            transfer,
        }
    }

    pub fn backend(&self) -> &dyn GraphicsBackend {
        self.backend.as_ref()
    }

    pub fn backend_arc(&self) -> Arc<dyn GraphicsBackend> {
        self.backend.clone()
    }

    pub fn queue(&self, kind: QueueKind) -> &Arc<Queue> {
        match kind {
            QueueKind::Graphics => &self.graphics,
            QueueKind::Compute => &self.compute,
            QueueKind::Transfer => &self.transfer,
        }
    }

    pub fn graphics_queue(&self) -> &Arc<Queue> {
        &self.graphics
    }

    /// Blocks until the whole device is idle. Shutdown and resize only.
    pub fn wait_idle(&self) -> BackendResult<()> {
        // Hold every distinct queue lock so no submission races the idle wait.
        let _graphics = self.graphics.submit_lock.lock();
        let _compute = (!Arc::ptr_eq(&self.compute, &self.graphics))
            .then(|| self.compute.submit_lock.lock());
        let _transfer = (!Arc::ptr_eq(&self.transfer, &self.graphics)
            && !Arc::ptr_eq(&self.transfer, &self.compute))
        .then(|| self.transfer.submit_lock.lock());
        self.backend.device_wait_idle()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("backend", &self.backend.name())
            .field("graphics", &self.graphics)
            .finish()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCall};

    #[test]
    fn test_queues_shared_for_single_family() {
        let device = Device::new(Arc::new(DummyBackend::new()));
        assert!(Arc::ptr_eq(
            device.queue(QueueKind::Graphics),
            device.queue(QueueKind::Transfer)
        ));
        assert!(Arc::ptr_eq(
            device.queue(QueueKind::Graphics),
            device.queue(QueueKind::Compute)
        ));
    }

    #[test]
    fn test_concurrent_submission() {
        let backend = Arc::new(DummyBackend::new());
        let device = Arc::new(Device::new(backend.clone()));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let device = device.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        device
                            .graphics_queue()
                            .submit(&SubmitInfo::default(), None)
                            .unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let submits = backend
            .calls()
            .iter()
            .filter(|call| matches!(call, RecordedCall::Submit { .. }))
            .count();
        assert_eq!(submits, 100);
    }

    #[test]
    fn test_wait_idle_completes_pending_fences() {
        let backend = Arc::new(DummyBackend::new());
        let device = Device::new(backend.clone());
        let fence = backend.create_fence(false).unwrap();
        device
            .graphics_queue()
            .submit(&SubmitInfo::default(), Some(fence))
            .unwrap();
        device.wait_idle().unwrap();
        assert!(backend.is_fence_signaled(fence));
    }
}
