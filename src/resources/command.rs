//! Command pools and command buffers.

use crate::backend::{
    check_result, BackendResult, CommandBufferHandle, CommandBufferLevel, CommandPoolHandle,
    GraphicsBackend, QueueKind, SubmitInfo,
};
use crate::device::Device;

/// A command pool bound to one queue family.
#[derive(Default)]
pub struct CommandPool {
    handle: Option<(CommandPoolHandle, QueueKind)>,
}

impl CommandPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self, device: &Device, queue: QueueKind) -> BackendResult<()> {
        debug_assert!(
            self.handle.is_none(),
            "CommandPool initialized twice without release"
        );
        let handle = check_result(
            device.backend().create_command_pool(queue),
            "create command pool",
        )?;
        self.handle = Some((handle, queue));
        Ok(())
    }

    pub fn release(&mut self, device: &Device) {
        debug_assert!(self.handle.is_some(), "CommandPool released before initialize");
        if let Some((handle, _)) = self.handle.take() {
            device.backend().destroy_command_pool(handle);
        }
    }

    pub fn get(&self) -> CommandPoolHandle {
        debug_assert!(self.handle.is_some(), "CommandPool used before initialize");
        self.handle.map(|(handle, _)| handle).unwrap_or_default()
    }

    pub fn queue_kind(&self) -> Option<QueueKind> {
        self.handle.map(|(_, kind)| kind)
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        if let Some((handle, _)) = self.handle {
            log::warn!("CommandPool {:?} dropped without release", handle);
        }
    }
}

/// A command buffer allocated from a [`CommandPool`].
#[derive(Default)]
pub struct CommandBuffer {
    handle: Option<(CommandBufferHandle, CommandPoolHandle)>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(
        &mut self,
        device: &Device,
        pool: &CommandPool,
        level: CommandBufferLevel,
    ) -> BackendResult<()> {
        debug_assert!(
            self.handle.is_none(),
            "CommandBuffer initialized twice without release"
        );
        let handle = check_result(
            device.backend().allocate_command_buffer(pool.get(), level),
            "allocate command buffer",
        )?;
        self.handle = Some((handle, pool.get()));
        Ok(())
    }

    pub fn release(&mut self, device: &Device) {
        debug_assert!(self.handle.is_some(), "CommandBuffer released before initialize");
        if let Some((handle, pool)) = self.handle.take() {
            device.backend().free_command_buffer(pool, handle);
        }
    }

    pub fn get(&self) -> CommandBufferHandle {
        debug_assert!(self.handle.is_some(), "CommandBuffer used before initialize");
        self.handle.map(|(handle, _)| handle).unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    /// Resets and begins recording.
    pub fn begin(&self, device: &Device) -> BackendResult<()> {
        let backend = device.backend();
        backend.reset_command_buffer(self.get())?;
        backend.begin_command_buffer(self.get(), true)
    }

    pub fn end(&self, device: &Device) -> BackendResult<()> {
        device.backend().end_command_buffer(self.get())
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if let Some((handle, _)) = self.handle {
            log::warn!("CommandBuffer {:?} dropped without release", handle);
        }
    }
}

/// Records work into a transient command buffer, submits it to the transfer queue and
/// blocks until it retires. Construction-time uploads only.
pub(crate) fn execute_one_time<F>(device: &Device, record: F) -> BackendResult<()>
where
    F: FnOnce(&dyn GraphicsBackend, CommandBufferHandle),
{
    let backend = device.backend();
    let pool = check_result(
        backend.create_command_pool(QueueKind::Transfer),
        "create transient command pool",
    )?;
    let result = record_and_submit(device, pool, record);
    backend.destroy_command_pool(pool);
    result
}

fn record_and_submit<F>(device: &Device, pool: CommandPoolHandle, record: F) -> BackendResult<()>
where
    F: FnOnce(&dyn GraphicsBackend, CommandBufferHandle),
{
    let backend = device.backend();
    let command_buffer = check_result(
        backend.allocate_command_buffer(pool, CommandBufferLevel::Primary),
        "allocate transient command buffer",
    )?;
    let fence = match check_result(backend.create_fence(false), "create transient fence") {
        Ok(fence) => fence,
        Err(e) => {
            backend.free_command_buffer(pool, command_buffer);
            return Err(e);
        }
    };

    let result = backend
        .begin_command_buffer(command_buffer, true)
        .and_then(|_| {
            record(backend, command_buffer);
            backend.end_command_buffer(command_buffer)
        })
        .and_then(|_| {
            let command_buffers = [command_buffer];
            device.queue(QueueKind::Transfer).submit(
                &SubmitInfo {
                    command_buffers: &command_buffers,
                    ..Default::default()
                },
                Some(fence),
            )
        })
        .and_then(|_| backend.wait_for_fence(fence));

    backend.destroy_fence(fence);
    backend.free_command_buffer(pool, command_buffer);
    result
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::RecordedCall;
    use crate::resources::test_support::dummy_device;

    #[test]
    fn test_command_buffer_lifecycle() {
        let (backend, device, _allocator) = dummy_device();
        let mut pool = CommandPool::new();
        pool.initialize(&device, QueueKind::Graphics).unwrap();
        let mut command_buffer = CommandBuffer::new();
        command_buffer
            .initialize(&device, &pool, CommandBufferLevel::Primary)
            .unwrap();
        assert!(!command_buffer.get().is_null());

        command_buffer.begin(&device).unwrap();
        command_buffer.end(&device).unwrap();
        assert_eq!(
            backend.calls(),
            vec![
                RecordedCall::ResetCommandBuffer {
                    command_buffer: command_buffer.get()
                },
                RecordedCall::BeginCommandBuffer {
                    command_buffer: command_buffer.get()
                },
                RecordedCall::EndCommandBuffer {
                    command_buffer: command_buffer.get()
                },
            ]
        );

        command_buffer.release(&device);
        pool.release(&device);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_execute_one_time_waits_and_cleans_up() {
        let (backend, device, _allocator) = dummy_device();
        let mut recorded = None;
        execute_one_time(&device, |_, command_buffer| recorded = Some(command_buffer)).unwrap();

        let calls = backend.calls();
        assert!(matches!(calls.last(), Some(RecordedCall::WaitFence { .. })));
        assert!(calls.iter().any(|call| matches!(
            call,
            RecordedCall::Submit { command_buffers, .. } if command_buffers == &vec![recorded.unwrap()]
        )));
        assert_eq!(backend.live_object_count(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "initialized twice")]
    fn test_double_initialize_is_caught() {
        let (_backend, device, _allocator) = dummy_device();
        let mut pool = CommandPool::new();
        pool.initialize(&device, QueueKind::Graphics).unwrap();
        let _ = pool.initialize(&device, QueueKind::Graphics);
    }
}
