//! Core backend abstraction traits
//!
//! These traits define the interface that both the Vulkan and the dummy backends implement.
//! Everything above this layer talks to the GPU exclusively through [`GraphicsBackend`]
//! and the opaque handles defined here.

use crate::backend::types::*;
use crate::resolution::Resolution;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to submit: {0}")]
    SubmitFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Failed to allocate memory: {0}")]
    MemoryAllocationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create image: {0}")]
    ImageCreationFailed(String),
    #[error("Failed to create sampler: {0}")]
    SamplerCreationFailed(String),
    #[error("Failed to create shader module: {0}")]
    ShaderCreationFailed(String),
    #[error("Failed to create descriptor object: {0}")]
    DescriptorCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to create synchronization primitive: {0}")]
    SyncCreationFailed(String),
    #[error("Failed to create command object: {0}")]
    CommandCreationFailed(String),
    #[error("Command recording failed: {0}")]
    RecordingFailed(String),
    #[error("Fence wait failed: {0}")]
    FenceWaitFailed(String),
    #[error("Descriptor pool exhausted")]
    DescriptorPoolExhausted,
    #[error("Surface out of date")]
    SurfaceOutOfDate,
    #[error("Out of device memory")]
    OutOfDeviceMemory,
    #[error("Out of host memory")]
    OutOfHostMemory,
    #[error("Device lost")]
    DeviceLost,
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("I/O error: {0}")]
    Io(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// The null handle. Never returned by a successful creation call.
            pub const NULL: Self = Self(0);

            /// Returns the raw backend value of this handle.
            pub fn raw(self) -> u64 {
                self.0
            }

            pub fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::NULL
            }
        }
    };
}

define_handle!(
    /// Handle to a block of device memory
    MemoryHandle
);
define_handle!(
    /// Handle to a GPU buffer
    BufferHandle
);
define_handle!(
    /// Handle to a GPU image
    ImageHandle
);
define_handle!(
    /// Handle to an image view
    ImageViewHandle
);
define_handle!(
    /// Handle to a sampler
    SamplerHandle
);
define_handle!(
    /// Handle to a shader module
    ShaderModuleHandle
);
define_handle!(
    /// Handle to a descriptor set layout
    DescriptorSetLayoutHandle
);
define_handle!(
    /// Handle to a descriptor pool
    DescriptorPoolHandle
);
define_handle!(
    /// Handle to a descriptor set
    DescriptorSetHandle
);
define_handle!(
    /// Handle to a pipeline layout
    PipelineLayoutHandle
);
define_handle!(
    /// Handle to a graphics, compute or ray tracing pipeline
    PipelineHandle
);
define_handle!(
    /// Handle to a fence
    FenceHandle
);
define_handle!(
    /// Handle to a binary semaphore
    SemaphoreHandle
);
define_handle!(
    /// Handle to a command pool
    CommandPoolHandle
);
define_handle!(
    /// Handle to a command buffer
    CommandBufferHandle
);
define_handle!(
    /// Handle to a device queue
    QueueHandle
);
define_handle!(
    /// Handle to an acceleration structure
    AccelerationStructureHandle
);

/// Queue description reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInfo {
    pub handle: QueueHandle,
    pub family_index: u32,
}

/// Static capabilities of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub ray_tracing: bool,
    /// Required alignment of uniform buffer offsets
    pub min_uniform_buffer_alignment: u64,
    /// Page size within which linear and optimal resources must not share memory
    pub buffer_image_granularity: u64,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            ray_tracing: false,
            min_uniform_buffer_alignment: 256,
            buffer_image_granularity: 1,
        }
    }
}

/// Current swapchain state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub image_count: u32,
    pub format: TextureFormat,
    pub extent: Resolution,
}

/// One queue submission
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitInfo<'a> {
    pub command_buffers: &'a [CommandBufferHandle],
    /// Semaphores to wait on, with the stage at which the wait happens
    pub wait_semaphores: &'a [(SemaphoreHandle, PipelineStage)],
    pub signal_semaphores: &'a [SemaphoreHandle],
}

/// Pipeline layout plus fixed-function state of a graphics pipeline
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor<'a> {
    pub label: Option<&'a str>,
    pub layout: PipelineLayoutHandle,
    pub vertex_shader: ShaderModuleHandle,
    pub fragment_shader: Option<ShaderModuleHandle>,
    pub geometry_shader: Option<ShaderModuleHandle>,
    pub vertex_bindings: &'a [VertexInputBinding],
    pub vertex_attributes: &'a [VertexInputAttribute],
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub depth: DepthState,
    pub blend: BlendState,
    pub viewport: Resolution,
    /// Attachment formats the pipeline renders into
    pub color_formats: &'a [TextureFormat],
    pub depth_format: Option<TextureFormat>,
}

/// Compute pipeline descriptor
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor<'a> {
    pub label: Option<&'a str>,
    pub layout: PipelineLayoutHandle,
    pub shader: ShaderModuleHandle,
}

/// Ray tracing pipeline descriptor
#[derive(Debug, Clone)]
pub struct RayTracingPipelineDescriptor<'a> {
    pub label: Option<&'a str>,
    pub layout: PipelineLayoutHandle,
    pub ray_generation: ShaderModuleHandle,
    pub miss: &'a [ShaderModuleHandle],
    pub closest_hit: &'a [ShaderModuleHandle],
    pub max_recursion_depth: u32,
}

/// The native graphics API seam.
///
/// Every method takes `&self`; implementations guard their own mutable state.
/// Queue submission is additionally serialized by [`crate::device::Queue`].
pub trait GraphicsBackend: Send + Sync + 'static {
    /// Backend name, for logging
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> BackendCapabilities;

    // === Queues ===

    fn queue(&self, kind: QueueKind) -> QueueInfo;

    fn queue_submit(
        &self,
        queue: QueueHandle,
        submit: &SubmitInfo<'_>,
        fence: Option<FenceHandle>,
    ) -> BackendResult<()>;

    /// Blocks until all work submitted to `queue` has retired
    fn queue_wait_idle(&self, queue: QueueHandle) -> BackendResult<()>;

    fn device_wait_idle(&self) -> BackendResult<()>;

    // === Memory ===

    /// First memory type of `class` allowed by `memory_type_bits`
    fn memory_type_index(&self, class: MemoryClass, memory_type_bits: u32) -> BackendResult<u32>;
    /// Allocates one backing memory block of `memory_type`, which must belong to `class`
    fn allocate_memory(
        &self,
        class: MemoryClass,
        memory_type: u32,
        size: u64,
    ) -> BackendResult<MemoryHandle>;
    fn free_memory(&self, memory: MemoryHandle);
    /// Writes through the persistent mapping of a host-visible block
    fn write_memory(&self, memory: MemoryHandle, offset: u64, data: &[u8]) -> BackendResult<()>;
    /// Reads through the persistent mapping of a host-visible block
    fn read_memory(&self, memory: MemoryHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>>;

    // === Buffers and images ===

    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;
    fn buffer_memory_requirements(&self, buffer: BufferHandle) -> MemoryRequirements;
    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> BackendResult<()>;
    fn destroy_buffer(&self, buffer: BufferHandle);

    fn create_image(&self, desc: &ImageDescriptor) -> BackendResult<ImageHandle>;
    fn image_memory_requirements(&self, image: ImageHandle) -> MemoryRequirements;
    fn bind_image_memory(
        &self,
        image: ImageHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> BackendResult<()>;
    fn destroy_image(&self, image: ImageHandle);

    fn create_image_view(
        &self,
        image: ImageHandle,
        format: TextureFormat,
        mip_levels: u32,
    ) -> BackendResult<ImageViewHandle>;
    fn destroy_image_view(&self, view: ImageViewHandle);

    fn create_sampler(&self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;
    fn destroy_sampler(&self, sampler: SamplerHandle);

    /// Creates a shader module from SPIR-V words
    fn create_shader_module(&self, code: &[u32]) -> BackendResult<ShaderModuleHandle>;
    fn destroy_shader_module(&self, module: ShaderModuleHandle);

    // === Descriptors ===

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle>;
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[DescriptorPoolSize],
    ) -> BackendResult<DescriptorPoolHandle>;
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);

    /// Fails with [`BackendError::DescriptorPoolExhausted`] when the pool is full
    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle>;
    fn free_descriptor_set(&self, pool: DescriptorPoolHandle, set: DescriptorSetHandle);
    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]);

    // === Pipelines ===

    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constants: &[PushConstantRange],
    ) -> BackendResult<PipelineLayoutHandle>;
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle);

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor<'_>,
    ) -> BackendResult<PipelineHandle>;
    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor<'_>,
    ) -> BackendResult<PipelineHandle>;
    fn create_ray_tracing_pipeline(
        &self,
        desc: &RayTracingPipelineDescriptor<'_>,
    ) -> BackendResult<PipelineHandle>;
    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    fn create_top_level_acceleration_structure(
        &self,
        instances: &[AccelerationStructureInstance],
    ) -> BackendResult<AccelerationStructureHandle>;
    fn destroy_acceleration_structure(&self, structure: AccelerationStructureHandle);

    // === Synchronization ===

    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle>;
    /// Blocks without timeout until the fence is signaled
    fn wait_for_fence(&self, fence: FenceHandle) -> BackendResult<()>;
    fn reset_fence(&self, fence: FenceHandle) -> BackendResult<()>;
    fn is_fence_signaled(&self, fence: FenceHandle) -> bool;
    fn destroy_fence(&self, fence: FenceHandle);

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle>;
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    // === Command pools and buffers ===

    fn create_command_pool(&self, queue: QueueKind) -> BackendResult<CommandPoolHandle>;
    fn destroy_command_pool(&self, pool: CommandPoolHandle);
    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
    ) -> BackendResult<CommandBufferHandle>;
    fn free_command_buffer(&self, pool: CommandPoolHandle, command_buffer: CommandBufferHandle);

    fn begin_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        one_time_submit: bool,
    ) -> BackendResult<()>;
    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> BackendResult<()>;
    fn reset_command_buffer(&self, command_buffer: CommandBufferHandle) -> BackendResult<()>;

    // === Command recording ===

    fn cmd_begin_rendering(&self, command_buffer: CommandBufferHandle, info: &RenderingInfo);
    fn cmd_end_rendering(&self, command_buffer: CommandBufferHandle);
    /// Sets viewport and scissor to cover `extent`
    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, extent: Resolution);
    fn cmd_bind_pipeline(
        &self,
        command_buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    );
    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    );
    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStage,
        offset: u32,
        data: &[u8],
    );
    fn cmd_bind_vertex_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        binding: u32,
        buffer: BufferHandle,
        offset: u64,
    );
    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    );
    fn cmd_draw(&self, command_buffer: CommandBufferHandle, vertex_count: u32, instance_count: u32);
    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
    );
    fn cmd_dispatch(&self, command_buffer: CommandBufferHandle, x: u32, y: u32, z: u32);
    fn cmd_trace_rays(&self, command_buffer: CommandBufferHandle, width: u32, height: u32, depth: u32);
    fn cmd_image_barrier(&self, command_buffer: CommandBufferHandle, barrier: &ImageBarrier);
    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        source: BufferHandle,
        destination: BufferHandle,
        size: u64,
    );
    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferHandle,
        source: BufferHandle,
        destination: ImageHandle,
        extent: Resolution,
    );
    /// Executes recorded secondary command buffers. Must be called outside rendering.
    fn cmd_execute_commands(
        &self,
        command_buffer: CommandBufferHandle,
        secondary: &[CommandBufferHandle],
    );

    // === Swapchain ===

    fn swapchain_info(&self) -> SwapchainInfo;
    /// Image and view of swapchain image `index`
    fn swapchain_image(&self, index: u32) -> (ImageHandle, ImageViewHandle);
    /// Fails with [`BackendError::SurfaceOutOfDate`] when the swapchain must be recreated
    fn acquire_next_image(&self, signal: SemaphoreHandle) -> BackendResult<u32>;
    fn present(
        &self,
        queue: QueueHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> BackendResult<()>;
    fn recreate_swapchain(&self, width: u32, height: u32) -> BackendResult<()>;
}
