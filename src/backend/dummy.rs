//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations but provides
//! a valid implementation for testing the rendering core without
//! requiring GPU hardware. Every recorded command and queue operation is
//! appended to an inspectable call log, host-visible memory is backed by
//! plain byte vectors, and fences follow a simple simulation:
//!
//! | Fence state  | Entered by                   | `wait_for_fence`                |
//! |--------------|------------------------------|---------------------------------|
//! | `Unsignaled` | creation, `reset_fence`      | error (the wait would hang)     |
//! | `Pending`    | `queue_submit` with a fence  | completes the work, signals     |
//! | `Signaled`   | completion, `signaled: true` | returns immediately             |

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resolution::Resolution;

/// One call observed by the dummy backend, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    BeginCommandBuffer {
        command_buffer: CommandBufferHandle,
    },
    EndCommandBuffer {
        command_buffer: CommandBufferHandle,
    },
    ResetCommandBuffer {
        command_buffer: CommandBufferHandle,
    },
    BeginRendering {
        command_buffer: CommandBufferHandle,
        color_attachments: Vec<ImageViewHandle>,
        depth_attachment: Option<ImageViewHandle>,
    },
    EndRendering {
        command_buffer: CommandBufferHandle,
    },
    SetViewport {
        command_buffer: CommandBufferHandle,
        extent: Resolution,
    },
    BindPipeline {
        command_buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    },
    BindDescriptorSets {
        command_buffer: CommandBufferHandle,
        first_set: u32,
        sets: Vec<DescriptorSetHandle>,
    },
    PushConstants {
        command_buffer: CommandBufferHandle,
        data: Vec<u8>,
    },
    BindVertexBuffer {
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
    },
    BindIndexBuffer {
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
    },
    Draw {
        command_buffer: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        command_buffer: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
    },
    Dispatch {
        command_buffer: CommandBufferHandle,
        x: u32,
        y: u32,
        z: u32,
    },
    TraceRays {
        command_buffer: CommandBufferHandle,
        width: u32,
        height: u32,
        depth: u32,
    },
    ImageBarrier {
        command_buffer: CommandBufferHandle,
        image: ImageHandle,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    },
    CopyBuffer {
        command_buffer: CommandBufferHandle,
        source: BufferHandle,
        destination: BufferHandle,
        size: u64,
    },
    CopyBufferToImage {
        command_buffer: CommandBufferHandle,
        source: BufferHandle,
        destination: ImageHandle,
    },
    ExecuteCommands {
        command_buffer: CommandBufferHandle,
        secondary: Vec<CommandBufferHandle>,
    },
    Submit {
        queue: QueueHandle,
        command_buffers: Vec<CommandBufferHandle>,
        wait_semaphores: Vec<SemaphoreHandle>,
        signal_semaphores: Vec<SemaphoreHandle>,
        fence: Option<FenceHandle>,
    },
    WaitFence {
        fence: FenceHandle,
    },
    ResetFence {
        fence: FenceHandle,
    },
    AcquireImage {
        image_index: u32,
        semaphore: SemaphoreHandle,
    },
    Present {
        image_index: u32,
        wait: SemaphoreHandle,
    },
    QueueWaitIdle {
        queue: QueueHandle,
    },
    DeviceWaitIdle,
    WriteMemory {
        memory: MemoryHandle,
        offset: u64,
        size: u64,
    },
}

impl RecordedCall {
    /// The command buffer a recorded command was written into, if any.
    pub fn command_buffer(&self) -> Option<CommandBufferHandle> {
        match self {
            RecordedCall::BeginCommandBuffer { command_buffer }
            | RecordedCall::EndCommandBuffer { command_buffer }
            | RecordedCall::ResetCommandBuffer { command_buffer }
            | RecordedCall::BeginRendering { command_buffer, .. }
            | RecordedCall::EndRendering { command_buffer }
            | RecordedCall::SetViewport { command_buffer, .. }
            | RecordedCall::BindPipeline { command_buffer, .. }
            | RecordedCall::BindDescriptorSets { command_buffer, .. }
            | RecordedCall::PushConstants { command_buffer, .. }
            | RecordedCall::BindVertexBuffer { command_buffer, .. }
            | RecordedCall::BindIndexBuffer { command_buffer, .. }
            | RecordedCall::Draw { command_buffer, .. }
            | RecordedCall::DrawIndexed { command_buffer, .. }
            | RecordedCall::Dispatch { command_buffer, .. }
            | RecordedCall::TraceRays { command_buffer, .. }
            | RecordedCall::ImageBarrier { command_buffer, .. }
            | RecordedCall::CopyBuffer { command_buffer, .. }
            | RecordedCall::CopyBufferToImage { command_buffer, .. }
            | RecordedCall::ExecuteCommands { command_buffer, .. } => Some(*command_buffer),
            _ => None,
        }
    }
}

/// Simulated fence state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DummyFenceState {
    Unsignaled,
    Pending,
    Signaled,
}

/// A one-shot failure the dummy backend reports on its next matching call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DummyFault {
    /// `end_command_buffer` fails with `RecordingFailed`
    EndCommandBuffer,
    /// `queue_submit` fails with `SubmitFailed`, leaving the fence untouched
    Submit,
}

/// Kind of a live object, for leak tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DummyObjectKind {
    Memory,
    Buffer,
    Image,
    ImageView,
    Sampler,
    ShaderModule,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    PipelineLayout,
    Pipeline,
    AccelerationStructure,
    Fence,
    Semaphore,
    CommandPool,
    CommandBuffer,
}

/// Memory types of the dummy device. Type 2 is device-local memory that
/// only depth images may use.
const MEMORY_TYPES: [MemoryClass; 3] = [
    MemoryClass::DeviceLocal,
    MemoryClass::HostVisibleCoherent,
    MemoryClass::DeviceLocal,
];

const BUFFER_MEMORY_TYPES: u32 = 0b011;
const COLOR_IMAGE_MEMORY_TYPES: u32 = 0b001;
const DEPTH_IMAGE_MEMORY_TYPES: u32 = 0b100;

#[derive(Debug)]
struct DummyMemory {
    class: MemoryClass,
    memory_type: u32,
    bytes: Vec<u8>,
    bindings: Vec<DummyBinding>,
}

/// A resource bound to `start..end` of a memory block.
#[derive(Debug, Clone, Copy)]
struct DummyBinding {
    resource: u64,
    start: u64,
    end: u64,
    tiling: ResourceTiling,
}

impl DummyBinding {
    /// Whether the two bindings touch a common granularity page.
    fn shares_page(&self, other: &DummyBinding, granularity: u64) -> bool {
        let first_page = |binding: &DummyBinding| binding.start / granularity;
        let last_page = |binding: &DummyBinding| (binding.end.max(binding.start + 1) - 1) / granularity;
        first_page(self) <= last_page(other) && first_page(other) <= last_page(self)
    }
}

#[derive(Debug)]
struct DummyBuffer {
    size: u64,
    usage: BufferUsage,
    binding: Option<(u64, u64)>,
}

#[derive(Debug)]
struct DummyImage {
    descriptor: ImageDescriptor,
}

#[derive(Debug)]
struct DummyPool {
    max_sets: u32,
    allocated: u32,
}

#[derive(Debug)]
struct DummySwapchain {
    images: Vec<(ImageHandle, ImageViewHandle)>,
    next_image: u32,
    extent: Resolution,
    out_of_date: bool,
}

#[derive(Debug)]
struct DummyState {
    next_handle: u64,
    live: HashMap<u64, DummyObjectKind>,
    invalid_destroys: usize,
    memory: HashMap<u64, DummyMemory>,
    memory_in_use: [u64; 2],
    memory_budget: [Option<u64>; 2],
    buffers: HashMap<u64, DummyBuffer>,
    images: HashMap<u64, DummyImage>,
    fences: HashMap<u64, DummyFenceState>,
    pools: HashMap<u64, DummyPool>,
    calls: Vec<RecordedCall>,
    faults: Vec<DummyFault>,
    swapchain: DummySwapchain,
}

impl DummyState {
    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn create(&mut self, kind: DummyObjectKind) -> u64 {
        let handle = self.next_handle();
        self.live.insert(handle, kind);
        handle
    }

    fn destroy(&mut self, handle: u64, kind: DummyObjectKind) {
        match self.live.remove(&handle) {
            Some(found) if found == kind => {}
            other => {
                log::warn!(
                    "DummyBackend: destroying {:?} {} that is not live (found {:?})",
                    kind,
                    handle,
                    other
                );
                self.invalid_destroys += 1;
            }
        }
    }

    fn take_fault(&mut self, fault: DummyFault) -> bool {
        match self.faults.iter().position(|&queued| queued == fault) {
            Some(index) => {
                self.faults.remove(index);
                true
            }
            None => false,
        }
    }

    /// Bind `binding` into `memory` after checking its type, range and page
    /// separation from resources of the other tiling.
    fn bind(
        &mut self,
        memory: MemoryHandle,
        binding: DummyBinding,
        memory_type_bits: u32,
        granularity: u64,
    ) -> BackendResult<()> {
        let block = self
            .memory
            .get_mut(&memory.0)
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown memory {}", memory.0)))?;
        if memory_type_bits & (1 << block.memory_type) == 0 {
            return Err(BackendError::InvalidParameter(format!(
                "memory type {} not allowed by mask {:#b}",
                block.memory_type, memory_type_bits
            )));
        }
        if binding.end > block.bytes.len() as u64 {
            return Err(BackendError::InvalidParameter(
                "binding exceeds memory block".into(),
            ));
        }
        let conflict = block.bindings.iter().any(|bound| {
            bound.tiling != binding.tiling && bound.shares_page(&binding, granularity)
        });
        if conflict {
            return Err(BackendError::InvalidParameter(format!(
                "{:?} resource at {} shares a {}-byte page with a resource of other tiling",
                binding.tiling, binding.start, granularity
            )));
        }
        block.bindings.push(binding);
        Ok(())
    }

    fn unbind(&mut self, resource: u64) {
        for block in self.memory.values_mut() {
            block.bindings.retain(|binding| binding.resource != resource);
        }
    }

    fn swapchain_images(&mut self, count: u32) -> Vec<(ImageHandle, ImageViewHandle)> {
        (0..count)
            .map(|_| {
                let image = self.next_handle();
                let view = self.next_handle();
                (ImageHandle(image), ImageViewHandle(view))
            })
            .collect()
    }
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    state: Mutex<DummyState>,
    capabilities: BackendCapabilities,
}

impl DummyBackend {
    /// Create a new dummy backend with a 1280x720 swapchain of three images.
    pub fn new() -> Self {
        let mut state = DummyState {
            next_handle: 1,
            live: HashMap::new(),
            invalid_destroys: 0,
            memory: HashMap::new(),
            memory_in_use: [0; 2],
            memory_budget: [None; 2],
            buffers: HashMap::new(),
            images: HashMap::new(),
            fences: HashMap::new(),
            pools: HashMap::new(),
            calls: Vec::new(),
            faults: Vec::new(),
            swapchain: DummySwapchain {
                images: Vec::new(),
                next_image: 0,
                extent: Resolution::new(1280, 720),
                out_of_date: false,
            },
        };
        state.swapchain.images = state.swapchain_images(3);

        Self {
            state: Mutex::new(state),
            capabilities: BackendCapabilities {
                ray_tracing: true,
                min_uniform_buffer_alignment: 256,
                buffer_image_granularity: 1024,
            },
        }
    }

    /// Replace the swapchain with `image_count` images of `extent`.
    pub fn with_swapchain(self, extent: Resolution, image_count: u32) -> Self {
        {
            let mut state = self.state.lock();
            state.swapchain.images = state.swapchain_images(image_count);
            state.swapchain.extent = extent;
            state.swapchain.next_image = 0;
        }
        self
    }

    /// Limit the total bytes that may be allocated from `class`.
    pub fn with_memory_budget(self, class: MemoryClass, bytes: u64) -> Self {
        self.state.lock().memory_budget[class.index()] = Some(bytes);
        self
    }

    /// Toggle ray tracing support.
    pub fn with_ray_tracing(mut self, supported: bool) -> Self {
        self.capabilities.ray_tracing = supported;
        self
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of objects created and not yet destroyed.
    pub fn live_object_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of live objects of one kind.
    pub fn live_objects_of(&self, kind: DummyObjectKind) -> usize {
        self.state
            .lock()
            .live
            .values()
            .filter(|&&found| found == kind)
            .count()
    }

    /// Number of destroy calls on handles that were not live.
    pub fn invalid_destroy_count(&self) -> usize {
        self.state.lock().invalid_destroys
    }

    /// Bytes currently allocated from `class`.
    pub fn allocated_memory(&self, class: MemoryClass) -> u64 {
        self.state.lock().memory_in_use[class.index()]
    }

    pub fn fence_state(&self, fence: FenceHandle) -> Option<DummyFenceState> {
        self.state.lock().fences.get(&fence.0).copied()
    }

    /// Completes all submitted work, signaling every pending fence.
    pub fn complete_pending_work(&self) {
        let mut state = self.state.lock();
        for fence in state.fences.values_mut() {
            if *fence == DummyFenceState::Pending {
                *fence = DummyFenceState::Signaled;
            }
        }
    }

    /// Make the next call matching `fault` fail.
    pub fn inject_fault(&self, fault: DummyFault) {
        self.state.lock().faults.push(fault);
    }

    /// Make the next image acquisition report an out-of-date surface.
    pub fn invalidate_swapchain(&self) {
        self.state.lock().swapchain.out_of_date = true;
    }

    /// Reads any memory block, including device-local ones.
    pub fn peek_memory(&self, memory: MemoryHandle, offset: u64, size: u64) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let block = state.memory.get(&memory.0)?;
        let start = offset as usize;
        let end = start.checked_add(size as usize)?;
        block.bytes.get(start..end).map(|bytes| bytes.to_vec())
    }

    fn record(&self, call: RecordedCall) {
        log::trace!("DummyBackend: {:?}", call);
        self.state.lock().calls.push(call);
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn queue(&self, kind: QueueKind) -> QueueInfo {
        // One family serves all capabilities, like most desktop drivers.
        let _ = kind;
        QueueInfo {
            handle: QueueHandle(u64::MAX),
            family_index: 0,
        }
    }

    fn queue_submit(
        &self,
        queue: QueueHandle,
        submit: &SubmitInfo<'_>,
        fence: Option<FenceHandle>,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.take_fault(DummyFault::Submit) {
            return Err(BackendError::SubmitFailed("injected fault".into()));
        }
        if let Some(fence) = fence {
            match state.fences.get_mut(&fence.0) {
                Some(current) => {
                    if *current != DummyFenceState::Unsignaled {
                        return Err(BackendError::SubmitFailed(format!(
                            "fence {} submitted while {:?}",
                            fence.0, current
                        )));
                    }
                    *current = DummyFenceState::Pending;
                }
                None => {
                    return Err(BackendError::InvalidParameter(format!(
                        "unknown fence {}",
                        fence.0
                    )))
                }
            }
        }
        state.calls.push(RecordedCall::Submit {
            queue,
            command_buffers: submit.command_buffers.to_vec(),
            wait_semaphores: submit.wait_semaphores.iter().map(|(s, _)| *s).collect(),
            signal_semaphores: submit.signal_semaphores.to_vec(),
            fence,
        });
        Ok(())
    }

    fn queue_wait_idle(&self, queue: QueueHandle) -> BackendResult<()> {
        self.complete_pending_work();
        self.record(RecordedCall::QueueWaitIdle { queue });
        Ok(())
    }

    fn device_wait_idle(&self) -> BackendResult<()> {
        self.complete_pending_work();
        self.record(RecordedCall::DeviceWaitIdle);
        Ok(())
    }

    fn memory_type_index(&self, class: MemoryClass, memory_type_bits: u32) -> BackendResult<u32> {
        MEMORY_TYPES
            .iter()
            .enumerate()
            .find(|(index, candidate)| memory_type_bits & (1 << *index) != 0 && **candidate == class)
            .map(|(index, _)| index as u32)
            .ok_or_else(|| {
                BackendError::MemoryAllocationFailed(format!(
                    "no {:?} memory type in mask {:#b}",
                    class, memory_type_bits
                ))
            })
    }

    fn allocate_memory(
        &self,
        class: MemoryClass,
        memory_type: u32,
        size: u64,
    ) -> BackendResult<MemoryHandle> {
        if MEMORY_TYPES.get(memory_type as usize) != Some(&class) {
            return Err(BackendError::InvalidParameter(format!(
                "memory type {} is not {:?}",
                memory_type, class
            )));
        }
        let mut state = self.state.lock();
        let in_use = state.memory_in_use[class.index()];
        if let Some(budget) = state.memory_budget[class.index()] {
            if in_use + size > budget {
                return Err(BackendError::OutOfDeviceMemory);
            }
        }
        let handle = state.create(DummyObjectKind::Memory);
        state.memory.insert(
            handle,
            DummyMemory {
                class,
                memory_type,
                bytes: vec![0; size as usize],
                bindings: Vec::new(),
            },
        );
        state.memory_in_use[class.index()] = in_use + size;
        log::trace!("DummyBackend: allocated {} bytes of {:?} memory", size, class);
        Ok(MemoryHandle(handle))
    }

    fn free_memory(&self, memory: MemoryHandle) {
        let mut state = self.state.lock();
        state.destroy(memory.0, DummyObjectKind::Memory);
        if let Some(block) = state.memory.remove(&memory.0) {
            state.memory_in_use[block.class.index()] -= block.bytes.len() as u64;
        }
    }

    fn write_memory(&self, memory: MemoryHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let mut state = self.state.lock();
        let block = state
            .memory
            .get_mut(&memory.0)
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown memory {}", memory.0)))?;
        if !block.class.is_host_visible() {
            return Err(BackendError::InvalidParameter(
                "memory is not host visible".into(),
            ));
        }
        let start = offset as usize;
        let end = start + data.len();
        let target = block
            .bytes
            .get_mut(start..end)
            .ok_or_else(|| BackendError::InvalidParameter("write out of bounds".into()))?;
        target.copy_from_slice(data);
        state.calls.push(RecordedCall::WriteMemory {
            memory,
            offset,
            size: data.len() as u64,
        });
        Ok(())
    }

    fn read_memory(&self, memory: MemoryHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        let state = self.state.lock();
        let block = state
            .memory
            .get(&memory.0)
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown memory {}", memory.0)))?;
        if !block.class.is_host_visible() {
            return Err(BackendError::InvalidParameter(
                "memory is not host visible".into(),
            ));
        }
        let start = offset as usize;
        let end = start + size as usize;
        block
            .bytes
            .get(start..end)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| BackendError::InvalidParameter("read out of bounds".into()))
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed("zero-sized buffer".into()));
        }
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let mut state = self.state.lock();
        let handle = state.create(DummyObjectKind::Buffer);
        state.buffers.insert(
            handle,
            DummyBuffer {
                size: desc.size,
                usage: desc.usage,
                binding: None,
            },
        );
        Ok(BufferHandle(handle))
    }

    fn buffer_memory_requirements(&self, buffer: BufferHandle) -> MemoryRequirements {
        let state = self.state.lock();
        let Some(buffer) = state.buffers.get(&buffer.0) else {
            return MemoryRequirements {
                memory_type_bits: BUFFER_MEMORY_TYPES,
                ..MemoryRequirements::linear(0, 1)
            };
        };
        let alignment = if buffer.usage.contains(BufferUsage::UNIFORM) {
            self.capabilities.min_uniform_buffer_alignment
        } else if buffer.usage.contains(BufferUsage::STORAGE) {
            64
        } else {
            16
        };
        MemoryRequirements {
            memory_type_bits: BUFFER_MEMORY_TYPES,
            ..MemoryRequirements::linear(buffer.size.div_ceil(16) * 16, alignment)
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> BackendResult<()> {
        let requirements = self.buffer_memory_requirements(buffer);
        let mut state = self.state.lock();
        let size = state
            .buffers
            .get(&buffer.0)
            .map(|entry| entry.size)
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown buffer {}", buffer.0)))?;
        let binding = DummyBinding {
            resource: buffer.0,
            start: offset,
            end: offset + size,
            tiling: requirements.tiling,
        };
        state.bind(
            memory,
            binding,
            requirements.memory_type_bits,
            self.capabilities.buffer_image_granularity,
        )?;
        if let Some(entry) = state.buffers.get_mut(&buffer.0) {
            entry.binding = Some((memory.0, offset));
        }
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        state.destroy(buffer.0, DummyObjectKind::Buffer);
        state.buffers.remove(&buffer.0);
        state.unbind(buffer.0);
    }

    fn create_image(&self, desc: &ImageDescriptor) -> BackendResult<ImageHandle> {
        if desc.extent.is_empty() {
            return Err(BackendError::ImageCreationFailed("zero-sized image".into()));
        }
        log::trace!(
            "DummyBackend: creating image {:?} ({}x{})",
            desc.label,
            desc.extent.width,
            desc.extent.height
        );
        let mut state = self.state.lock();
        let handle = state.create(DummyObjectKind::Image);
        state.images.insert(
            handle,
            DummyImage {
                descriptor: desc.clone(),
            },
        );
        Ok(ImageHandle(handle))
    }

    fn image_memory_requirements(&self, image: ImageHandle) -> MemoryRequirements {
        let state = self.state.lock();
        let Some(desc) = state.images.get(&image.0).map(|image| &image.descriptor) else {
            return MemoryRequirements {
                memory_type_bits: COLOR_IMAGE_MEMORY_TYPES,
                ..MemoryRequirements::optimal(0, 1024)
            };
        };
        let base = desc.extent.pixel_count() * desc.format.bytes_per_pixel() as u64;
        // A full mip chain adds at most a third.
        let size = if desc.mip_levels > 1 {
            base + base / 3 + 1
        } else {
            base
        };
        let memory_type_bits = if desc.format.is_depth() {
            DEPTH_IMAGE_MEMORY_TYPES
        } else {
            COLOR_IMAGE_MEMORY_TYPES
        };
        MemoryRequirements {
            memory_type_bits,
            ..MemoryRequirements::optimal(size, 1024)
        }
    }

    fn bind_image_memory(
        &self,
        image: ImageHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> BackendResult<()> {
        let requirements = self.image_memory_requirements(image);
        let mut state = self.state.lock();
        if !state.images.contains_key(&image.0) {
            return Err(BackendError::InvalidParameter(format!("unknown image {}", image.0)));
        }
        let binding = DummyBinding {
            resource: image.0,
            start: offset,
            end: offset + requirements.size,
            tiling: requirements.tiling,
        };
        state.bind(
            memory,
            binding,
            requirements.memory_type_bits,
            self.capabilities.buffer_image_granularity,
        )
    }

    fn destroy_image(&self, image: ImageHandle) {
        let mut state = self.state.lock();
        state.destroy(image.0, DummyObjectKind::Image);
        state.images.remove(&image.0);
        state.unbind(image.0);
    }

    fn create_image_view(
        &self,
        image: ImageHandle,
        _format: TextureFormat,
        _mip_levels: u32,
    ) -> BackendResult<ImageViewHandle> {
        let mut state = self.state.lock();
        let is_swapchain_image = state
            .swapchain
            .images
            .iter()
            .any(|(swapchain_image, _)| *swapchain_image == image);
        if !state.images.contains_key(&image.0) && !is_swapchain_image {
            return Err(BackendError::ImageCreationFailed(format!(
                "unknown image {}",
                image.0
            )));
        }
        Ok(ImageViewHandle(state.create(DummyObjectKind::ImageView)))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        self.state.lock().destroy(view.0, DummyObjectKind::ImageView);
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("DummyBackend: creating sampler {:?}", desc.label);
        Ok(SamplerHandle(self.state.lock().create(DummyObjectKind::Sampler)))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.state.lock().destroy(sampler.0, DummyObjectKind::Sampler);
    }

    fn create_shader_module(&self, code: &[u32]) -> BackendResult<ShaderModuleHandle> {
        if code.is_empty() {
            return Err(BackendError::ShaderCreationFailed("empty SPIR-V".into()));
        }
        Ok(ShaderModuleHandle(
            self.state.lock().create(DummyObjectKind::ShaderModule),
        ))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        self.state
            .lock()
            .destroy(module.0, DummyObjectKind::ShaderModule);
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        Ok(DescriptorSetLayoutHandle(
            self.state.lock().create(DummyObjectKind::DescriptorSetLayout),
        ))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        self.state
            .lock()
            .destroy(layout.0, DummyObjectKind::DescriptorSetLayout);
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _sizes: &[DescriptorPoolSize],
    ) -> BackendResult<DescriptorPoolHandle> {
        let mut state = self.state.lock();
        let handle = state.create(DummyObjectKind::DescriptorPool);
        state.pools.insert(
            handle,
            DummyPool {
                max_sets,
                allocated: 0,
            },
        );
        Ok(DescriptorPoolHandle(handle))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        let mut state = self.state.lock();
        state.destroy(pool.0, DummyObjectKind::DescriptorPool);
        state.pools.remove(&pool.0);
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        _layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let mut state = self.state.lock();
        let entry = state
            .pools
            .get_mut(&pool.0)
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown pool {}", pool.0)))?;
        if entry.allocated >= entry.max_sets {
            return Err(BackendError::DescriptorPoolExhausted);
        }
        entry.allocated += 1;
        Ok(DescriptorSetHandle(
            state.create(DummyObjectKind::DescriptorSet),
        ))
    }

    fn free_descriptor_set(&self, pool: DescriptorPoolHandle, set: DescriptorSetHandle) {
        let mut state = self.state.lock();
        state.destroy(set.0, DummyObjectKind::DescriptorSet);
        if let Some(entry) = state.pools.get_mut(&pool.0) {
            entry.allocated = entry.allocated.saturating_sub(1);
        }
    }

    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        log::trace!(
            "DummyBackend: updating descriptor set {} with {} writes",
            set.0,
            writes.len()
        );
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[DescriptorSetLayoutHandle],
        _push_constants: &[PushConstantRange],
    ) -> BackendResult<PipelineLayoutHandle> {
        Ok(PipelineLayoutHandle(
            self.state.lock().create(DummyObjectKind::PipelineLayout),
        ))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        self.state
            .lock()
            .destroy(layout.0, DummyObjectKind::PipelineLayout);
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor<'_>,
    ) -> BackendResult<PipelineHandle> {
        if desc.layout.is_null() || desc.vertex_shader.is_null() {
            return Err(BackendError::PipelineCreationFailed(
                "missing layout or vertex shader".into(),
            ));
        }
        log::trace!("DummyBackend: creating graphics pipeline {:?}", desc.label);
        Ok(PipelineHandle(self.state.lock().create(DummyObjectKind::Pipeline)))
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor<'_>,
    ) -> BackendResult<PipelineHandle> {
        if desc.layout.is_null() || desc.shader.is_null() {
            return Err(BackendError::PipelineCreationFailed(
                "missing layout or compute shader".into(),
            ));
        }
        log::trace!("DummyBackend: creating compute pipeline {:?}", desc.label);
        Ok(PipelineHandle(self.state.lock().create(DummyObjectKind::Pipeline)))
    }

    fn create_ray_tracing_pipeline(
        &self,
        desc: &RayTracingPipelineDescriptor<'_>,
    ) -> BackendResult<PipelineHandle> {
        if !self.capabilities.ray_tracing {
            return Err(BackendError::Unsupported("ray tracing".into()));
        }
        log::trace!("DummyBackend: creating ray tracing pipeline {:?}", desc.label);
        Ok(PipelineHandle(self.state.lock().create(DummyObjectKind::Pipeline)))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.state
            .lock()
            .destroy(pipeline.0, DummyObjectKind::Pipeline);
    }

    fn create_top_level_acceleration_structure(
        &self,
        instances: &[AccelerationStructureInstance],
    ) -> BackendResult<AccelerationStructureHandle> {
        if !self.capabilities.ray_tracing {
            return Err(BackendError::Unsupported("ray tracing".into()));
        }
        log::trace!(
            "DummyBackend: building top level acceleration structure with {} instances",
            instances.len()
        );
        Ok(AccelerationStructureHandle(
            self.state
                .lock()
                .create(DummyObjectKind::AccelerationStructure),
        ))
    }

    fn destroy_acceleration_structure(&self, structure: AccelerationStructureHandle) {
        self.state
            .lock()
            .destroy(structure.0, DummyObjectKind::AccelerationStructure);
    }

    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle> {
        let mut state = self.state.lock();
        let handle = state.create(DummyObjectKind::Fence);
        let initial = if signaled {
            DummyFenceState::Signaled
        } else {
            DummyFenceState::Unsignaled
        };
        state.fences.insert(handle, initial);
        Ok(FenceHandle(handle))
    }

    fn wait_for_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let current = state
            .fences
            .get_mut(&fence.0)
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown fence {}", fence.0)))?;
        match *current {
            DummyFenceState::Unsignaled => {
                return Err(BackendError::FenceWaitFailed(format!(
                    "fence {} has no pending work, the wait would never return",
                    fence.0
                )))
            }
            DummyFenceState::Pending => *current = DummyFenceState::Signaled,
            DummyFenceState::Signaled => {}
        }
        state.calls.push(RecordedCall::WaitFence { fence });
        Ok(())
    }

    fn reset_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let current = state
            .fences
            .get_mut(&fence.0)
            .ok_or_else(|| BackendError::InvalidParameter(format!("unknown fence {}", fence.0)))?;
        *current = DummyFenceState::Unsignaled;
        state.calls.push(RecordedCall::ResetFence { fence });
        Ok(())
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> bool {
        self.state.lock().fences.get(&fence.0) == Some(&DummyFenceState::Signaled)
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        state.destroy(fence.0, DummyObjectKind::Fence);
        state.fences.remove(&fence.0);
    }

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle> {
        Ok(SemaphoreHandle(
            self.state.lock().create(DummyObjectKind::Semaphore),
        ))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        self.state
            .lock()
            .destroy(semaphore.0, DummyObjectKind::Semaphore);
    }

    fn create_command_pool(&self, _queue: QueueKind) -> BackendResult<CommandPoolHandle> {
        Ok(CommandPoolHandle(
            self.state.lock().create(DummyObjectKind::CommandPool),
        ))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        self.state
            .lock()
            .destroy(pool.0, DummyObjectKind::CommandPool);
    }

    fn allocate_command_buffer(
        &self,
        _pool: CommandPoolHandle,
        _level: CommandBufferLevel,
    ) -> BackendResult<CommandBufferHandle> {
        Ok(CommandBufferHandle(
            self.state.lock().create(DummyObjectKind::CommandBuffer),
        ))
    }

    fn free_command_buffer(&self, _pool: CommandPoolHandle, command_buffer: CommandBufferHandle) {
        self.state
            .lock()
            .destroy(command_buffer.0, DummyObjectKind::CommandBuffer);
    }

    fn begin_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        _one_time_submit: bool,
    ) -> BackendResult<()> {
        self.record(RecordedCall::BeginCommandBuffer { command_buffer });
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        if self.state.lock().take_fault(DummyFault::EndCommandBuffer) {
            return Err(BackendError::RecordingFailed("injected fault".into()));
        }
        self.record(RecordedCall::EndCommandBuffer { command_buffer });
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        self.record(RecordedCall::ResetCommandBuffer { command_buffer });
        Ok(())
    }

    fn cmd_begin_rendering(&self, command_buffer: CommandBufferHandle, info: &RenderingInfo) {
        self.record(RecordedCall::BeginRendering {
            command_buffer,
            color_attachments: info.color_attachments.iter().map(|a| a.view).collect(),
            depth_attachment: info.depth_attachment.map(|a| a.view),
        });
    }

    fn cmd_end_rendering(&self, command_buffer: CommandBufferHandle) {
        self.record(RecordedCall::EndRendering { command_buffer });
    }

    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, extent: Resolution) {
        self.record(RecordedCall::SetViewport {
            command_buffer,
            extent,
        });
    }

    fn cmd_bind_pipeline(
        &self,
        command_buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    ) {
        self.record(RecordedCall::BindPipeline {
            command_buffer,
            bind_point,
            pipeline,
        });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: CommandBufferHandle,
        _bind_point: PipelineBindPoint,
        _layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) {
        self.record(RecordedCall::BindDescriptorSets {
            command_buffer,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        _layout: PipelineLayoutHandle,
        _stages: ShaderStage,
        _offset: u32,
        data: &[u8],
    ) {
        self.record(RecordedCall::PushConstants {
            command_buffer,
            data: data.to_vec(),
        });
    }

    fn cmd_bind_vertex_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        _binding: u32,
        buffer: BufferHandle,
        _offset: u64,
    ) {
        self.record(RecordedCall::BindVertexBuffer {
            command_buffer,
            buffer,
        });
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        _offset: u64,
        _format: IndexFormat,
    ) {
        self.record(RecordedCall::BindIndexBuffer {
            command_buffer,
            buffer,
        });
    }

    fn cmd_draw(&self, command_buffer: CommandBufferHandle, vertex_count: u32, instance_count: u32) {
        self.record(RecordedCall::Draw {
            command_buffer,
            vertex_count,
            instance_count,
        });
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
    ) {
        self.record(RecordedCall::DrawIndexed {
            command_buffer,
            index_count,
            instance_count,
        });
    }

    fn cmd_dispatch(&self, command_buffer: CommandBufferHandle, x: u32, y: u32, z: u32) {
        self.record(RecordedCall::Dispatch {
            command_buffer,
            x,
            y,
            z,
        });
    }

    fn cmd_trace_rays(&self, command_buffer: CommandBufferHandle, width: u32, height: u32, depth: u32) {
        self.record(RecordedCall::TraceRays {
            command_buffer,
            width,
            height,
            depth,
        });
    }

    fn cmd_image_barrier(&self, command_buffer: CommandBufferHandle, barrier: &ImageBarrier) {
        self.record(RecordedCall::ImageBarrier {
            command_buffer,
            image: barrier.image,
            old_layout: barrier.old_layout,
            new_layout: barrier.new_layout,
        });
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        source: BufferHandle,
        destination: BufferHandle,
        size: u64,
    ) {
        {
            // Copies take effect at record time; there is no GPU timeline to defer to.
            let mut state = self.state.lock();
            let from = state.buffers.get(&source.0).and_then(|b| b.binding);
            let to = state.buffers.get(&destination.0).and_then(|b| b.binding);
            if let (Some((src_memory, src_offset)), Some((dst_memory, dst_offset))) = (from, to) {
                let bytes = state.memory.get(&src_memory).and_then(|block| {
                    block
                        .bytes
                        .get(src_offset as usize..(src_offset + size) as usize)
                        .map(|slice| slice.to_vec())
                });
                if let (Some(bytes), Some(block)) = (bytes, state.memory.get_mut(&dst_memory)) {
                    let start = dst_offset as usize;
                    if let Some(target) = block.bytes.get_mut(start..start + bytes.len()) {
                        target.copy_from_slice(&bytes);
                    }
                }
            }
        }
        self.record(RecordedCall::CopyBuffer {
            command_buffer,
            source,
            destination,
            size,
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferHandle,
        source: BufferHandle,
        destination: ImageHandle,
        _extent: Resolution,
    ) {
        self.record(RecordedCall::CopyBufferToImage {
            command_buffer,
            source,
            destination,
        });
    }

    fn cmd_execute_commands(
        &self,
        command_buffer: CommandBufferHandle,
        secondary: &[CommandBufferHandle],
    ) {
        self.record(RecordedCall::ExecuteCommands {
            command_buffer,
            secondary: secondary.to_vec(),
        });
    }

    fn swapchain_info(&self) -> SwapchainInfo {
        let state = self.state.lock();
        SwapchainInfo {
            image_count: state.swapchain.images.len() as u32,
            format: TextureFormat::Bgra8UnormSrgb,
            extent: state.swapchain.extent,
        }
    }

    fn swapchain_image(&self, index: u32) -> (ImageHandle, ImageViewHandle) {
        self.state
            .lock()
            .swapchain
            .images
            .get(index as usize)
            .copied()
            .unwrap_or((ImageHandle::NULL, ImageViewHandle::NULL))
    }

    fn acquire_next_image(&self, signal: SemaphoreHandle) -> BackendResult<u32> {
        let mut state = self.state.lock();
        if state.swapchain.out_of_date {
            return Err(BackendError::SurfaceOutOfDate);
        }
        let image_count = state.swapchain.images.len() as u32;
        let image_index = state.swapchain.next_image;
        state.swapchain.next_image = (image_index + 1) % image_count.max(1);
        state.calls.push(RecordedCall::AcquireImage {
            image_index,
            semaphore: signal,
        });
        Ok(image_index)
    }

    fn present(
        &self,
        _queue: QueueHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> BackendResult<()> {
        self.record(RecordedCall::Present { image_index, wait });
        Ok(())
    }

    fn recreate_swapchain(&self, width: u32, height: u32) -> BackendResult<()> {
        let mut state = self.state.lock();
        let image_count = state.swapchain.images.len() as u32;
        state.swapchain.images = state.swapchain_images(image_count);
        state.swapchain.extent = Resolution::new(width, height);
        state.swapchain.next_image = 0;
        state.swapchain.out_of_date = false;
        log::debug!("DummyBackend: swapchain recreated at {}x{}", width, height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_simulation() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence(false).unwrap();
        assert!(backend.wait_for_fence(fence).is_err());

        let queue = backend.queue(QueueKind::Graphics).handle;
        backend
            .queue_submit(queue, &SubmitInfo::default(), Some(fence))
            .unwrap();
        assert_eq!(backend.fence_state(fence), Some(DummyFenceState::Pending));
        assert!(!backend.is_fence_signaled(fence));

        backend.wait_for_fence(fence).unwrap();
        assert!(backend.is_fence_signaled(fence));
    }

    #[test]
    fn test_submit_with_pending_fence_fails() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence(true).unwrap();
        let queue = backend.queue(QueueKind::Graphics).handle;
        assert!(backend
            .queue_submit(queue, &SubmitInfo::default(), Some(fence))
            .is_err());
    }

    #[test]
    fn test_memory_budget() {
        let backend =
            DummyBackend::new().with_memory_budget(MemoryClass::DeviceLocal, 1024);
        let memory = backend.allocate_memory(MemoryClass::DeviceLocal, 0, 1024).unwrap();
        assert_eq!(
            backend.allocate_memory(MemoryClass::DeviceLocal, 0, 1),
            Err(BackendError::OutOfDeviceMemory)
        );
        backend.free_memory(memory);
        assert_eq!(backend.allocated_memory(MemoryClass::DeviceLocal), 0);
    }

    #[test]
    fn test_host_memory_roundtrip() {
        let backend = DummyBackend::new();
        let memory = backend
            .allocate_memory(MemoryClass::HostVisibleCoherent, 1, 64)
            .unwrap();
        backend.write_memory(memory, 8, &[1, 2, 3]).unwrap();
        assert_eq!(backend.read_memory(memory, 8, 3).unwrap(), vec![1, 2, 3]);
        assert!(backend.write_memory(memory, 62, &[0; 4]).is_err());
    }

    #[test]
    fn test_device_local_memory_not_mappable() {
        let backend = DummyBackend::new();
        let memory = backend.allocate_memory(MemoryClass::DeviceLocal, 0, 64).unwrap();
        assert!(backend.write_memory(memory, 0, &[1]).is_err());
    }

    #[test]
    fn test_bind_checks_memory_type_and_granularity() {
        let backend = DummyBackend::new();
        let granularity = backend.capabilities().buffer_image_granularity;
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 100,
                usage: BufferUsage::VERTEX,
            })
            .unwrap();
        let image_desc = |format| ImageDescriptor {
            label: None,
            extent: Resolution::new(16, 16),
            mip_levels: 1,
            format,
            usage: ImageUsage::SAMPLED,
        };
        let color = backend.create_image(&image_desc(TextureFormat::Rgba8Unorm)).unwrap();
        let depth = backend.create_image(&image_desc(TextureFormat::Depth32Float)).unwrap();
        let memory = backend
            .allocate_memory(MemoryClass::DeviceLocal, 0, 4 * granularity)
            .unwrap();

        backend.bind_buffer_memory(buffer, memory, 0).unwrap();
        assert!(backend.bind_image_memory(color, memory, 256).is_err());
        assert!(backend.bind_image_memory(depth, memory, granularity).is_err());
        backend.bind_image_memory(color, memory, granularity).unwrap();

        // Destroying the buffer frees its page for the image tiling.
        let second_color = backend.create_image(&image_desc(TextureFormat::Rgba8Unorm)).unwrap();
        assert!(backend.bind_image_memory(second_color, memory, 0).is_err());
        backend.destroy_buffer(buffer);
        backend.bind_image_memory(second_color, memory, 0).unwrap();

        let depth_memory = backend
            .allocate_memory(MemoryClass::DeviceLocal, 2, granularity)
            .unwrap();
        backend.bind_image_memory(depth, depth_memory, 0).unwrap();
        assert!(backend
            .allocate_memory(MemoryClass::HostVisibleCoherent, 0, 64)
            .is_err());
    }

    #[test]
    fn test_descriptor_pool_exhaustion() {
        let backend = DummyBackend::new();
        let layout = backend.create_descriptor_set_layout(&[]).unwrap();
        let pool = backend.create_descriptor_pool(1, &[]).unwrap();
        backend.allocate_descriptor_set(pool, layout).unwrap();
        assert_eq!(
            backend.allocate_descriptor_set(pool, layout),
            Err(BackendError::DescriptorPoolExhausted)
        );
    }

    #[test]
    fn test_swapchain_rotation_and_invalidation() {
        let backend = DummyBackend::new().with_swapchain(Resolution::new(64, 64), 2);
        let semaphore = backend.create_semaphore().unwrap();
        assert_eq!(backend.acquire_next_image(semaphore), Ok(0));
        assert_eq!(backend.acquire_next_image(semaphore), Ok(1));
        assert_eq!(backend.acquire_next_image(semaphore), Ok(0));

        backend.invalidate_swapchain();
        assert_eq!(
            backend.acquire_next_image(semaphore),
            Err(BackendError::SurfaceOutOfDate)
        );
        backend.recreate_swapchain(32, 32).unwrap();
        assert_eq!(backend.swapchain_info().extent, Resolution::new(32, 32));
        assert_eq!(backend.acquire_next_image(semaphore), Ok(0));
    }

    #[test]
    fn test_destroy_unknown_handle_counted() {
        let backend = DummyBackend::new();
        let sampler = backend.create_sampler(&SamplerDescriptor::default()).unwrap();
        backend.destroy_sampler(sampler);
        backend.destroy_sampler(sampler);
        assert_eq!(backend.invalid_destroy_count(), 1);
        assert_eq!(backend.live_object_count(), 0);
    }
}
