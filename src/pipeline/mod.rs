//! Pipelines: one native pipeline object plus everything needed to record it.
//!
//! A [`Pipeline`] is one of three closed variants. All of them share the same
//! lifecycle and the same resource binding model:
//!
//! ```text
//!   Uninitialized --initialize--> (layouts, pipeline, descriptor sets created)
//!                 --post_initialize--> Ready (bindings resolved and written)
//!   Ready --execute (every frame)--> Ready
//!   Ready --terminate--> Terminated
//! ```
//!
//! # Descriptor sets
//!
//! | Set | Owner           | Contents                                       |
//! |-----|-----------------|------------------------------------------------|
//! | 0   | rendering system| general uniform data, Hammersley samples       |
//! | 1   | pipeline        | the pipeline's [`ResourceBinding`]s, in order  |
//!
//! Set 1 exists once per frame in flight. Bindings name render targets by
//! [`RenderTargetId`] and uniforms by identifier; both are resolved in
//! `post_initialize`, after every pipeline of the pass has been initialized, so a
//! pipeline may read a target another pipeline of the same pass creates.

mod compute;
mod graphics;
mod ray_tracing;

pub use compute::{ComputePipeline, ComputePipelineParameters, DispatchSize};
pub use graphics::{
    AttachmentTarget, ColorTarget, DepthTarget, DrawCommand, GraphicsPipeline,
    GraphicsPipelineParameters,
};
pub use ray_tracing::{RayTracingPipeline, RayTracingPipelineParameters};

use crate::backend::{
    check_result, AccelerationStructureHandle, BackendError, BackendResult, BufferHandle,
    DescriptorBinding, DescriptorResource, DescriptorType, DescriptorWrite, ImageViewHandle,
    PipelineBindPoint, PipelineHandle, PipelineLayoutHandle, PushConstantRange, ShaderModuleHandle,
    ShaderStage,
};
use crate::device::Device;
use crate::render_pass::{FrameContext, RenderContext};
use crate::resources::{
    CommonSampler, DescriptorSet, DescriptorSetLayout, RenderTargetId, ShaderModule,
};

/// Lifecycle state of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    /// Native objects exist, bindings not yet written
    Initialized,
    Ready,
    Terminated,
}

/// A resource a pipeline reads or writes, bound at `post_initialize`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResourceBinding {
    /// Uniform buffer registered with the buffer manager, one per frame in flight
    Uniform { identifier: u64 },
    /// Render target sampled through a common sampler
    SampledTarget {
        target: RenderTargetId,
        sampler: CommonSampler,
    },
    /// Render target accessed as a storage image
    StorageTarget { target: RenderTargetId },
    /// Texture view sampled through a common sampler
    SampledTexture {
        view: ImageViewHandle,
        sampler: CommonSampler,
    },
    StorageBuffer { buffer: BufferHandle, size: u64 },
    AccelerationStructure {
        structure: AccelerationStructureHandle,
    },
}

impl ResourceBinding {
    pub fn descriptor_type(&self) -> DescriptorType {
        match self {
            ResourceBinding::Uniform { .. } => DescriptorType::UniformBuffer,
            ResourceBinding::SampledTarget { .. } | ResourceBinding::SampledTexture { .. } => {
                DescriptorType::CombinedImageSampler
            }
            ResourceBinding::StorageTarget { .. } => DescriptorType::StorageImage,
            ResourceBinding::StorageBuffer { .. } => DescriptorType::StorageBuffer,
            ResourceBinding::AccelerationStructure { .. } => DescriptorType::AccelerationStructure,
        }
    }

    fn resolve(&self, ctx: &RenderContext<'_>, frame_index: usize) -> BackendResult<DescriptorResource> {
        let target_view = |target: RenderTargetId| {
            ctx.registry
                .get(target)
                .map(|target| target.view())
                .ok_or_else(|| {
                    BackendError::InvalidParameter(format!("stale render target {:?}", target))
                })
        };

        Ok(match *self {
            ResourceBinding::Uniform { identifier } => {
                let buffer = ctx
                    .uniforms
                    .get_uniform_buffer(identifier, frame_index)
                    .ok_or_else(|| {
                        BackendError::InvalidParameter(format!(
                            "uniform buffer {:#018x} is not registered",
                            identifier
                        ))
                    })?;
                let range = ctx.uniforms.uniform_buffer_size(identifier).unwrap_or(0);
                DescriptorResource::Buffer {
                    buffer,
                    offset: 0,
                    range,
                }
            }
            ResourceBinding::SampledTarget { target, sampler } => {
                DescriptorResource::CombinedImageSampler {
                    view: target_view(target)?,
                    sampler: ctx.samplers.get(sampler),
                }
            }
            ResourceBinding::StorageTarget { target } => {
                DescriptorResource::StorageImage(target_view(target)?)
            }
            ResourceBinding::SampledTexture { view, sampler } => {
                DescriptorResource::CombinedImageSampler {
                    view,
                    sampler: ctx.samplers.get(sampler),
                }
            }
            ResourceBinding::StorageBuffer { buffer, size } => DescriptorResource::StorageBuffer {
                buffer,
                offset: 0,
                range: size,
            },
            ResourceBinding::AccelerationStructure { structure } => {
                DescriptorResource::AccelerationStructure(structure)
            }
        })
    }
}

/// State shared by every pipeline variant.
pub(crate) struct PipelineCore {
    name: String,
    include_in_render: bool,
    state: PipelineState,
    bindings: Vec<ResourceBinding>,
    push_constant_ranges: Vec<PushConstantRange>,
    push_constants: Vec<u8>,
    set_layout: DescriptorSetLayout,
    layout: Option<PipelineLayoutHandle>,
    pipeline: Option<PipelineHandle>,
    descriptor_sets: Vec<DescriptorSet>,
}

impl PipelineCore {
    pub(crate) fn new(
        name: String,
        bindings: Vec<ResourceBinding>,
        push_constant_ranges: Vec<PushConstantRange>,
    ) -> Self {
        let push_size = push_constant_ranges
            .iter()
            .map(|range| range.offset + range.size)
            .max()
            .unwrap_or(0);
        Self {
            name,
            include_in_render: true,
            state: PipelineState::Uninitialized,
            bindings,
            push_constant_ranges,
            push_constants: vec![0; push_size as usize],
            set_layout: DescriptorSetLayout::new(),
            layout: None,
            pipeline: None,
            descriptor_sets: Vec::new(),
        }
    }

    /// Creates the pipeline's own set layout and the pipeline layout over sets 0 and 1.
    pub(crate) fn create_layout(
        &mut self,
        ctx: &RenderContext<'_>,
        stages: ShaderStage,
    ) -> BackendResult<PipelineLayoutHandle> {
        debug_assert_eq!(
            self.state,
            PipelineState::Uninitialized,
            "pipeline '{}' initialized twice",
            self.name
        );
        let bindings: Vec<DescriptorBinding> = self
            .bindings
            .iter()
            .enumerate()
            .map(|(index, binding)| {
                DescriptorBinding::new(index as u32, binding.descriptor_type(), stages)
            })
            .collect();
        self.set_layout.initialize(ctx.device, &bindings)?;

        let layout = check_result(
            ctx.device.backend().create_pipeline_layout(
                &[ctx.global_layout.get(), self.set_layout.get()],
                &self.push_constant_ranges,
            ),
            "create pipeline layout",
        )?;
        self.layout = Some(layout);
        Ok(layout)
    }

    /// Stores the native pipeline and allocates one descriptor set per frame in flight.
    pub(crate) fn finish_initialize(
        &mut self,
        ctx: &RenderContext<'_>,
        pipeline: PipelineHandle,
    ) -> BackendResult<()> {
        self.pipeline = Some(pipeline);
        for _ in 0..ctx.frames_in_flight {
            let mut set = DescriptorSet::new();
            set.initialize(ctx.device, ctx.descriptor_pool, &self.set_layout)?;
            self.descriptor_sets.push(set);
        }
        self.state = PipelineState::Initialized;
        log::debug!("Initialized pipeline '{}'", self.name);
        Ok(())
    }

    /// Resolves every binding and writes the per-frame descriptor sets.
    pub(crate) fn write_descriptor_sets(&mut self, ctx: &RenderContext<'_>) -> BackendResult<()> {
        debug_assert_eq!(
            self.state,
            PipelineState::Initialized,
            "pipeline '{}' post-initialized out of order",
            self.name
        );
        for (frame_index, set) in self.descriptor_sets.iter().enumerate() {
            let writes = self
                .bindings
                .iter()
                .enumerate()
                .map(|(index, binding)| {
                    Ok(DescriptorWrite {
                        binding: index as u32,
                        array_element: 0,
                        resource: binding.resolve(ctx, frame_index)?,
                    })
                })
                .collect::<BackendResult<Vec<_>>>()?;
            set.update(ctx.device, &writes);
        }
        self.state = PipelineState::Ready;
        Ok(())
    }

    /// Binds the pipeline, both descriptor sets and the push constants.
    pub(crate) fn bind(&self, frame: &FrameContext<'_>, bind_point: PipelineBindPoint) {
        debug_assert_eq!(
            self.state,
            PipelineState::Ready,
            "pipeline '{}' executed while not ready",
            self.name
        );
        let backend = frame.device.backend();
        let (Some(pipeline), Some(layout)) = (self.pipeline, self.layout) else {
            return;
        };
        let command_buffer = frame.command_buffer;
        backend.cmd_bind_pipeline(command_buffer, bind_point, pipeline);
        let own_set = self
            .descriptor_sets
            .get(frame.frame_index())
            .map(DescriptorSet::get)
            .unwrap_or_default();
        backend.cmd_bind_descriptor_sets(
            command_buffer,
            bind_point,
            layout,
            0,
            &[frame.global_descriptor_set, own_set],
        );
        for range in &self.push_constant_ranges {
            let start = range.offset as usize;
            let end = start + range.size as usize;
            backend.cmd_push_constants(
                command_buffer,
                layout,
                range.stages,
                range.offset,
                &self.push_constants[start..end],
            );
        }
    }

    /// Releases every native object this pipeline created so far.
    pub(crate) fn release(&mut self, device: &Device) {
        for mut set in self.descriptor_sets.drain(..) {
            set.release(device);
        }
        let backend = device.backend();
        if let Some(pipeline) = self.pipeline.take() {
            backend.destroy_pipeline(pipeline);
        }
        if let Some(layout) = self.layout.take() {
            backend.destroy_pipeline_layout(layout);
        }
        if self.set_layout.is_initialized() {
            self.set_layout.release(device);
        }
    }
}

/// Shader modules that only live until the native pipeline is created.
pub(crate) struct StageModules {
    modules: Vec<ShaderModule>,
}

impl StageModules {
    /// Creates one module per code blob, releasing the created ones on failure.
    pub(crate) fn load(device: &Device, codes: &[&[u32]]) -> BackendResult<Self> {
        let mut modules: Vec<ShaderModule> = Vec::with_capacity(codes.len());
        for code in codes {
            let mut module = ShaderModule::new();
            if let Err(e) = module.initialize(device, code) {
                for mut created in modules {
                    created.release(device);
                }
                return Err(e);
            }
            modules.push(module);
        }
        Ok(Self { modules })
    }

    pub(crate) fn handle(&self, index: usize) -> ShaderModuleHandle {
        self.modules
            .get(index)
            .map(ShaderModule::get)
            .unwrap_or_default()
    }

    pub(crate) fn handles(&self, range: std::ops::Range<usize>) -> Vec<ShaderModuleHandle> {
        range.map(|index| self.handle(index)).collect()
    }

    pub(crate) fn release(mut self, device: &Device) {
        for module in &mut self.modules {
            module.release(device);
        }
    }
}

/// One of the three pipeline kinds.
pub enum Pipeline {
    Graphics(GraphicsPipeline),
    Compute(ComputePipeline),
    RayTracing(RayTracingPipeline),
}

impl Pipeline {
    fn core(&self) -> &PipelineCore {
        match self {
            Pipeline::Graphics(pipeline) => &pipeline.core,
            Pipeline::Compute(pipeline) => &pipeline.core,
            Pipeline::RayTracing(pipeline) => &pipeline.core,
        }
    }

    fn core_mut(&mut self) -> &mut PipelineCore {
        match self {
            Pipeline::Graphics(pipeline) => &mut pipeline.core,
            Pipeline::Compute(pipeline) => &mut pipeline.core,
            Pipeline::RayTracing(pipeline) => &mut pipeline.core,
        }
    }

    pub fn name(&self) -> &str {
        &self.core().name
    }

    pub fn state(&self) -> PipelineState {
        self.core().state
    }

    pub fn bind_point(&self) -> PipelineBindPoint {
        match self {
            Pipeline::Graphics(_) => PipelineBindPoint::Graphics,
            Pipeline::Compute(_) => PipelineBindPoint::Compute,
            Pipeline::RayTracing(_) => PipelineBindPoint::RayTracing,
        }
    }

    /// Native pipeline handle, null before initialize
    pub fn handle(&self) -> PipelineHandle {
        self.core().pipeline.unwrap_or_default()
    }

    /// Whether the owning pass records this pipeline
    pub fn include_in_render(&self) -> bool {
        self.core().include_in_render
    }

    pub fn set_include_in_render(&mut self, include: bool) {
        self.core_mut().include_in_render = include;
    }

    /// Replaces the push constant bytes recorded on every execute.
    pub fn set_push_constants(&mut self, data: &[u8]) {
        let core = self.core_mut();
        debug_assert!(
            data.len() <= core.push_constants.len(),
            "push constants of '{}' exceed declared ranges",
            core.name
        );
        let len = data.len().min(core.push_constants.len());
        core.push_constants[..len].copy_from_slice(&data[..len]);
    }

    /// Creates the native pipeline, its layout and its descriptor sets.
    pub fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        let result = match self {
            Pipeline::Graphics(pipeline) => pipeline.initialize(ctx),
            Pipeline::Compute(pipeline) => pipeline.initialize(ctx),
            Pipeline::RayTracing(pipeline) => pipeline.initialize(ctx),
        };
        if result.is_err() {
            self.core_mut().release(ctx.device);
        }
        result
    }

    /// Resolves late-bound resources. Runs after every pipeline of the pass is initialized.
    pub fn post_initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        if let Pipeline::Graphics(pipeline) = self {
            pipeline.resolve_attachments(ctx)?;
        }
        self.core_mut().write_descriptor_sets(ctx)
    }

    /// Records this pipeline into the frame's command buffer.
    pub fn execute(&self, frame: &FrameContext<'_>) {
        log::trace!(
            "Executing pipeline '{}' in frame slot {}",
            self.name(),
            frame.frame_index()
        );
        match self {
            Pipeline::Graphics(pipeline) => pipeline.execute(frame),
            Pipeline::Compute(pipeline) => pipeline.execute(frame),
            Pipeline::RayTracing(pipeline) => pipeline.execute(frame),
        }
    }

    /// Destroys the native pipeline, its layout and its descriptor sets.
    pub fn terminate(&mut self, device: &Device) {
        let core = self.core_mut();
        debug_assert!(
            core.state != PipelineState::Terminated,
            "pipeline '{}' terminated twice",
            core.name
        );
        core.release(device);
        core.state = PipelineState::Terminated;
        log::debug!("Terminated pipeline '{}'", core.name);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let core = self.core();
        if core.pipeline.is_some() {
            log::warn!("Pipeline '{}' dropped without terminate", core.name);
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name())
            .field("bind_point", &self.bind_point())
            .field("state", &self.state())
            .field("include_in_render", &self.include_in_render())
            .finish()
    }
}

impl From<GraphicsPipeline> for Pipeline {
    fn from(pipeline: GraphicsPipeline) -> Self {
        Pipeline::Graphics(pipeline)
    }
}

impl From<ComputePipeline> for Pipeline {
    fn from(pipeline: ComputePipeline) -> Self {
        Pipeline::Compute(pipeline)
    }
}

impl From<RayTracingPipeline> for Pipeline {
    fn from(pipeline: RayTracingPipeline) -> Self {
        Pipeline::RayTracing(pipeline)
    }
}
