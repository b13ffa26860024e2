//! GPU buffer resource.

use crate::backend::{
    check_result, BackendError, BackendResult, BufferDescriptor, BufferHandle, BufferUsage,
    MemoryClass, MemoryProperty,
};
use crate::device::Device;
use crate::memory::{Allocation, MemoryAllocator};
use crate::resources::command::execute_one_time;
use crate::resources::deferred::{DeferredResource, DestructionQueue};

#[derive(Debug, Clone, Copy)]
struct BufferInner {
    handle: BufferHandle,
    allocation: Allocation,
    size: u64,
    usage: BufferUsage,
}

/// A GPU buffer with its memory allocation.
///
/// Host-visible buffers are written through their persistent mapping with
/// [`Buffer::write`]. Device-local buffers are filled with [`Buffer::upload`], which
/// goes through a transient staging buffer.
///
/// # Example
///
/// ```ignore
/// let mut buffer = Buffer::new();
/// buffer.initialize(&device, &mut allocator, 1024, BufferUsage::UNIFORM, MemoryProperty::HOST_VISIBLE)?;
/// buffer.write(&device, 0, bytemuck::bytes_of(&data))?;
/// buffer.release(&device, &mut allocator);
/// ```
#[derive(Default)]
pub struct Buffer {
    inner: Option<BufferInner>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the buffer, allocates memory of the requested class and binds it.
    pub fn initialize(
        &mut self,
        device: &Device,
        allocator: &mut MemoryAllocator,
        size: u64,
        usage: BufferUsage,
        memory: MemoryProperty,
    ) -> BackendResult<()> {
        debug_assert!(self.inner.is_none(), "Buffer initialized twice without release");
        let backend = device.backend();
        let handle = check_result(
            backend.create_buffer(&Self::create_info(size, usage)),
            "create buffer",
        )?;

        let class = MemoryClass::from_properties(memory);
        let requirements = backend.buffer_memory_requirements(handle);
        let allocation = match check_result(
            allocator.get_allocation(backend, class, requirements),
            "allocate buffer memory",
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                backend.destroy_buffer(handle);
                return Err(e);
            }
        };
        if let Err(e) = check_result(
            backend.bind_buffer_memory(handle, allocation.memory, allocation.offset),
            "bind buffer memory",
        ) {
            allocator.free(backend, allocation);
            backend.destroy_buffer(handle);
            return Err(e);
        }

        log::debug!(
            "Created buffer {:?} ({} bytes, {:?}, {:?})",
            handle,
            size,
            usage,
            class
        );
        self.inner = Some(BufferInner {
            handle,
            allocation,
            size,
            usage,
        });
        Ok(())
    }

    fn create_info(size: u64, usage: BufferUsage) -> BufferDescriptor {
        BufferDescriptor {
            label: None,
            size,
            usage,
        }
    }

    /// Destroys the buffer and frees its allocation immediately.
    pub fn release(&mut self, device: &Device, allocator: &mut MemoryAllocator) {
        debug_assert!(self.inner.is_some(), "Buffer released before initialize");
        if let Some(inner) = self.inner.take() {
            device.backend().destroy_buffer(inner.handle);
            allocator.free(device.backend(), inner.allocation);
        }
    }

    /// Hands the buffer to `queue` so it is destroyed once the GPU is done with it.
    pub fn release_deferred(&mut self, queue: &mut DestructionQueue) {
        debug_assert!(self.inner.is_some(), "Buffer released before initialize");
        if let Some(inner) = self.inner.take() {
            queue.push(DeferredResource::Buffer {
                handle: inner.handle,
                allocation: inner.allocation,
            });
        }
    }

    pub fn get(&self) -> BufferHandle {
        debug_assert!(self.inner.is_some(), "Buffer used before initialize");
        self.inner.map(|inner| inner.handle).unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.is_some()
    }

    /// Size in bytes, zero when uninitialized
    pub fn size(&self) -> u64 {
        self.inner.map(|inner| inner.size).unwrap_or(0)
    }

    pub fn usage(&self) -> BufferUsage {
        self.inner
            .map(|inner| inner.usage)
            .unwrap_or_else(BufferUsage::empty)
    }

    pub fn allocation(&self) -> Option<Allocation> {
        self.inner.map(|inner| inner.allocation)
    }

    pub fn is_host_visible(&self) -> bool {
        self.inner
            .is_some_and(|inner| inner.allocation.class.is_host_visible())
    }

    fn checked_range(&self, offset: u64, size: u64) -> BackendResult<BufferInner> {
        let inner = self
            .inner
            .ok_or_else(|| BackendError::InvalidParameter("buffer is not initialized".into()))?;
        if offset.checked_add(size).map_or(true, |end| end > inner.size) {
            return Err(BackendError::InvalidParameter(format!(
                "range {}..{} exceeds buffer size {}",
                offset,
                offset.saturating_add(size),
                inner.size
            )));
        }
        Ok(inner)
    }

    /// Writes `data` at `offset` through the mapped allocation of a host-visible buffer.
    pub fn write(&self, device: &Device, offset: u64, data: &[u8]) -> BackendResult<()> {
        let inner = self.checked_range(offset, data.len() as u64)?;
        if !inner.allocation.class.is_host_visible() {
            return Err(BackendError::InvalidParameter(
                "write to a device-local buffer; use upload".into(),
            ));
        }
        device
            .backend()
            .write_memory(inner.allocation.memory, inner.allocation.offset + offset, data)
    }

    /// Reads back `size` bytes at `offset` of a host-visible buffer.
    pub fn read(&self, device: &Device, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        let inner = self.checked_range(offset, size)?;
        if !inner.allocation.class.is_host_visible() {
            return Err(BackendError::InvalidParameter(
                "read from a device-local buffer".into(),
            ));
        }
        device
            .backend()
            .read_memory(inner.allocation.memory, inner.allocation.offset + offset, size)
    }

    /// Fills the buffer from offset zero, staging through host memory when the buffer
    /// is device-local. Blocks until the copy has retired.
    pub fn upload(
        &self,
        device: &Device,
        allocator: &mut MemoryAllocator,
        data: &[u8],
    ) -> BackendResult<()> {
        let inner = self.checked_range(0, data.len() as u64)?;
        if inner.allocation.class.is_host_visible() {
            return self.write(device, 0, data);
        }

        let mut staging = Buffer::new();
        staging.initialize(
            device,
            allocator,
            data.len() as u64,
            BufferUsage::TRANSFER_SRC,
            MemoryProperty::HOST_VISIBLE | MemoryProperty::HOST_COHERENT,
        )?;
        let result = staging.write(device, 0, data).and_then(|_| {
            let source = staging.get();
            execute_one_time(device, |backend, command_buffer| {
                backend.cmd_copy_buffer(command_buffer, source, inner.handle, data.len() as u64);
            })
        });
        staging.release(device, allocator);
        result
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.inner.map(|inner| inner.handle))
            .field("size", &self.size())
            .field("usage", &self.usage())
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(inner) = self.inner {
            log::warn!(
                "Buffer {:?} ({} bytes) dropped without release",
                inner.handle,
                inner.size
            );
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::resources::test_support::dummy_device;

    #[test]
    fn test_host_visible_write_and_read() {
        let (_backend, device, mut allocator) = dummy_device();
        let mut buffer = Buffer::new();
        buffer
            .initialize(
                &device,
                &mut allocator,
                64,
                BufferUsage::UNIFORM,
                MemoryProperty::HOST_VISIBLE | MemoryProperty::HOST_COHERENT,
            )
            .unwrap();
        assert!(buffer.is_host_visible());

        buffer.write(&device, 4, &[9, 8, 7]).unwrap();
        assert_eq!(buffer.read(&device, 4, 3).unwrap(), vec![9, 8, 7]);
        assert!(buffer.write(&device, 62, &[0; 4]).is_err());

        buffer.release(&device, &mut allocator);
        assert!(!buffer.is_initialized());
    }

    #[test]
    fn test_device_local_upload_goes_through_staging() {
        let (backend, device, mut allocator) = dummy_device();
        let mut buffer = Buffer::new();
        buffer
            .initialize(
                &device,
                &mut allocator,
                16,
                BufferUsage::VERTEX | BufferUsage::TRANSFER_DST,
                MemoryProperty::DEVICE_LOCAL,
            )
            .unwrap();
        assert!(buffer.write(&device, 0, &[1]).is_err());

        let data: Vec<u8> = (0..16).collect();
        buffer.upload(&device, &mut allocator, &data).unwrap();

        let allocation = buffer.allocation().unwrap();
        assert_eq!(
            backend.peek_memory(allocation.memory, allocation.offset, 16),
            Some(data)
        );
        buffer.release(&device, &mut allocator);
    }

    #[test]
    fn test_get_after_release_is_null() {
        let (_backend, device, mut allocator) = dummy_device();
        let mut buffer = Buffer::new();
        buffer
            .initialize(
                &device,
                &mut allocator,
                32,
                BufferUsage::STORAGE,
                MemoryProperty::DEVICE_LOCAL,
            )
            .unwrap();
        buffer.release(&device, &mut allocator);
        assert_eq!(buffer.size(), 0);
        assert!(buffer.allocation().is_none());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "Buffer initialized twice")]
    fn test_double_initialize_is_caught() {
        let (_backend, device, mut allocator) = dummy_device();
        let mut buffer = Buffer::new();
        for _ in 0..2 {
            let _ = buffer.initialize(
                &device,
                &mut allocator,
                32,
                BufferUsage::STORAGE,
                MemoryProperty::DEVICE_LOCAL,
            );
        }
    }
}
