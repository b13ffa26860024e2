//! The rendering system: owner of every GPU object and driver of the frame loop.
//!
//! # Frame loop
//!
//! [`RenderingSystem::update_system_synchronous`] records and submits one frame:
//!
//! 1. Destroy deferred resources that aged out.
//! 2. Acquire a swapchain image, signaling the slot's image-available semaphore.
//!    An out-of-date surface recreates the swapchain and skips the frame.
//! 3. Wait on the slot's fence. This is the CPU/GPU synchronization point: nothing
//!    the slot owns is touched before the GPU retired its previous use.
//! 4. Advance the frame-in-flight index and mirror the uniform sources into the
//!    slot's uniform buffers.
//! 5. Record every render pass in list order into the slot's command buffer.
//! 6. Reset the fence and submit (wait image-available, signal render-finished and
//!    the slot's fence), then present (wait render-finished).
//!
//! A frame that fails between acquire and submit hands its slot back with an empty
//! submission, so the slot's fence signals again and later frames keep running.
//!
//! Render-finished semaphores exist once per swapchain image, everything else once
//! per frame in flight.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::{
    check_result, AccelerationStructureHandle, AccelerationStructureInstance, BackendCapabilities,
    BackendError, BackendResult, BufferHandle, BufferUsage, CommandBufferHandle,
    CommandBufferLevel, DescriptorBinding, DescriptorResource, DescriptorType, DescriptorWrite,
    FenceHandle, GraphicsBackend, ImageHandle, ImageViewHandle, MemoryProperty, PipelineStage,
    QueueKind, SamplerHandle, ShaderStage, SubmitInfo, SwapchainInfo, TextureFormat, Vertex,
};
use crate::device::Device;
use crate::memory::MemoryAllocator;
use crate::render_pass::{
    execute_pass, initialize_pass, terminate_pass, FrameContext, FrameInfo, RenderContext,
    RenderPass, RenderPassStage,
};
use crate::resolution::{scaled_resolutions, Resolution, SCALED_RESOLUTION_LEVELS};
use crate::resources::{
    Buffer, CommandBuffer, CommandPool, CommonSampler, CommonSamplers, DescriptorPool,
    DescriptorSet, DescriptorSetLayout, DestructionQueue, Fence, Image, RenderTargetId,
    RenderTargetRegistry, Semaphore, SharedRenderTarget, SharedRenderTargets,
};
use crate::uniform::{
    hash_name, BufferManager, GeneralUniformData, HammersleyHemisphereSamples, UniformSource,
    GENERAL_UNIFORM_NAME, HAMMERSLEY_UNIFORM_NAME,
};
use crate::{RenderingConfig, RenderingPath};

/// Descriptors of each type one set of the shared pool may hold
const DESCRIPTORS_PER_SET: u32 = 8;

/// Lifecycle state of the rendering system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Uninitialized,
    Running,
    Terminated,
}

/// A sampled texture created through the rendering system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture {
    pub image: ImageHandle,
    pub view: ImageViewHandle,
    pub extent: Resolution,
}

/// Device-local vertex and index buffers of one model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelBuffers {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

/// Everything one frame-in-flight slot owns.
#[derive(Default)]
struct FrameSlot {
    command_buffer: CommandBuffer,
    fence: Fence,
    image_available: Semaphore,
    global_set: DescriptorSet,
}

impl FrameSlot {
    fn initialize(
        &mut self,
        device: &Device,
        command_pool: &CommandPool,
        descriptor_pool: &DescriptorPool,
        global_layout: &DescriptorSetLayout,
    ) -> BackendResult<()> {
        self.command_buffer
            .initialize(device, command_pool, CommandBufferLevel::Primary)?;
        // Signaled so the first wait on this slot returns immediately.
        self.fence.initialize(device, true)?;
        self.image_available.initialize(device)?;
        self.global_set
            .initialize(device, descriptor_pool, global_layout)?;
        Ok(())
    }

    fn release(&mut self, device: &Device) {
        if self.global_set.is_initialized() {
            self.global_set.release(device);
        }
        if self.image_available.is_initialized() {
            self.image_available.release(device);
        }
        if self.fence.is_initialized() {
            self.fence.release(device);
        }
        if self.command_buffer.is_initialized() {
            self.command_buffer.release(device);
        }
    }
}

/// GPU objects owned by a running system.
struct SystemResources {
    device: Device,
    capabilities: BackendCapabilities,
    swapchain: SwapchainInfo,
    allocator: MemoryAllocator,
    command_pool: CommandPool,
    descriptor_pool: DescriptorPool,
    samplers: CommonSamplers,
    registry: RenderTargetRegistry,
    shared_targets: SharedRenderTargets,
    scaled_resolutions: [Resolution; SCALED_RESOLUTION_LEVELS],
    uniforms: BufferManager,
    global_layout: DescriptorSetLayout,
    frames: Vec<FrameSlot>,
    render_finished: Vec<Semaphore>,
    destruction_queue: DestructionQueue,
    textures: HashMap<ImageHandle, Image>,
    buffers: HashMap<BufferHandle, Buffer>,
    acceleration_structures: Vec<AccelerationStructureHandle>,
}

impl SystemResources {
    fn new(backend: Arc<dyn GraphicsBackend>, config: &RenderingConfig) -> Self {
        let device = Device::new(backend);
        let capabilities = device.backend().capabilities();
        let swapchain = device.backend().swapchain_info();
        Self {
            capabilities,
            swapchain,
            allocator: MemoryAllocator::new(config.memory_block_size),
            command_pool: CommandPool::new(),
            descriptor_pool: DescriptorPool::new(),
            samplers: CommonSamplers::default(),
            registry: RenderTargetRegistry::new(),
            shared_targets: SharedRenderTargets::default(),
            scaled_resolutions: scaled_resolutions(config.resolution, config.resolution_scale),
            uniforms: BufferManager::new(config.frames_in_flight),
            global_layout: DescriptorSetLayout::new(),
            frames: (0..config.frames_in_flight)
                .map(|_| FrameSlot::default())
                .collect(),
            render_finished: Vec::new(),
            destruction_queue: DestructionQueue::new(swapchain.image_count as u64 + 1),
            textures: HashMap::new(),
            buffers: HashMap::new(),
            acceleration_structures: Vec::new(),
            device,
        }
    }

    fn create(
        &mut self,
        config: &RenderingConfig,
        general: &Arc<RwLock<GeneralUniformData>>,
        hammersley: &Arc<RwLock<HammersleyHemisphereSamples>>,
    ) -> BackendResult<()> {
        self.allocator.initialize();
        self.command_pool
            .initialize(&self.device, QueueKind::Graphics)?;
        self.descriptor_pool.initialize(
            &self.device,
            config.descriptor_pool_capacity,
            DESCRIPTORS_PER_SET,
        )?;
        self.samplers.initialize(&self.device)?;
        self.create_shared_targets()?;

        let general_source: Arc<dyn UniformSource> = general.clone();
        let hammersley_source: Arc<dyn UniformSource> = hammersley.clone();
        self.uniforms.register_uniform_buffer(
            &self.device,
            &mut self.allocator,
            hash_name(GENERAL_UNIFORM_NAME),
            general_source,
        )?;
        self.uniforms.register_uniform_buffer(
            &self.device,
            &mut self.allocator,
            hash_name(HAMMERSLEY_UNIFORM_NAME),
            hammersley_source,
        )?;

        self.global_layout.initialize(
            &self.device,
            &[
                DescriptorBinding::new(0, DescriptorType::UniformBuffer, ShaderStage::all()),
                DescriptorBinding::new(1, DescriptorType::UniformBuffer, ShaderStage::all()),
            ],
        )?;
        for (index, frame) in self.frames.iter_mut().enumerate() {
            frame.initialize(
                &self.device,
                &self.command_pool,
                &self.descriptor_pool,
                &self.global_layout,
            )?;
            let writes = [GENERAL_UNIFORM_NAME, HAMMERSLEY_UNIFORM_NAME]
                .into_iter()
                .enumerate()
                .map(|(binding, name)| {
                    let identifier = hash_name(name);
                    DescriptorWrite {
                        binding: binding as u32,
                        array_element: 0,
                        resource: DescriptorResource::Buffer {
                            buffer: self
                                .uniforms
                                .get_uniform_buffer(identifier, index)
                                .unwrap_or_default(),
                            offset: 0,
                            range: self.uniforms.uniform_buffer_size(identifier).unwrap_or(0),
                        },
                    }
                })
                .collect::<Vec<_>>();
            frame.global_set.update(&self.device, &writes);
        }
        self.create_render_finished_semaphores()
    }

    fn create_shared_targets(&mut self) -> BackendResult<()> {
        self.shared_targets.create(
            &mut self.registry,
            &self.device,
            &mut self.allocator,
            &self.scaled_resolutions,
        )?;
        self.registry
            .transition_to_general(&self.device, self.shared_targets.ids())
    }

    fn create_render_finished_semaphores(&mut self) -> BackendResult<()> {
        for semaphore in &mut self.render_finished {
            semaphore.release(&self.device);
        }
        self.render_finished.clear();
        for _ in 0..self.swapchain.image_count {
            let mut semaphore = Semaphore::new();
            semaphore.initialize(&self.device)?;
            self.render_finished.push(semaphore);
        }
        Ok(())
    }

    fn render_context(&mut self, rendering_path: RenderingPath) -> RenderContext<'_> {
        RenderContext {
            device: &self.device,
            allocator: &mut self.allocator,
            descriptor_pool: &self.descriptor_pool,
            command_pool: &self.command_pool,
            registry: &mut self.registry,
            shared_targets: &self.shared_targets,
            samplers: &self.samplers,
            uniforms: &self.uniforms,
            global_layout: &self.global_layout,
            frames_in_flight: self.frames.len(),
            scaled_resolutions: &self.scaled_resolutions,
            swapchain_format: self.swapchain.format,
            swapchain_extent: self.swapchain.extent,
            rendering_path,
            capabilities: self.capabilities,
        }
    }

    /// Mirrors the uniforms into slot `frame.frame_index` and records every pass into
    /// the slot's command buffer.
    fn record_frame(
        &self,
        passes: &mut [Box<dyn RenderPass>],
        frame: FrameInfo,
        image_index: u32,
    ) -> BackendResult<()> {
        let device = &self.device;
        let slot = &self.frames[frame.frame_index];
        self.uniforms.render_update(device, frame.frame_index)?;

        slot.command_buffer.begin(device)?;
        let (swapchain_image, swapchain_view) = device.backend().swapchain_image(image_index);
        let frame_context = FrameContext {
            device,
            command_buffer: slot.command_buffer.get(),
            frame,
            global_descriptor_set: slot.global_set.get(),
            registry: &self.registry,
            shared_targets: &self.shared_targets,
            resolution: self.scaled_resolutions[0],
            swapchain_image,
            swapchain_view,
            swapchain_format: self.swapchain.format,
        };
        for pass in passes.iter_mut() {
            execute_pass(pass.as_mut(), &frame_context);
        }
        slot.command_buffer.end(device)
    }

    /// Resets the slot's fence and submits its command buffer. The fence is only
    /// reset once the frame is fully recorded.
    fn submit_frame(&self, slot: usize, image_index: u32) -> BackendResult<()> {
        let frame = &self.frames[slot];
        frame.fence.reset(&self.device)?;
        let command_buffers = [frame.command_buffer.get()];
        let wait_semaphores = [(
            frame.image_available.get(),
            PipelineStage::COLOR_ATTACHMENT_OUTPUT,
        )];
        let signal_semaphores = [self.render_finished[image_index as usize].get()];
        self.device.graphics_queue().submit(
            &SubmitInfo {
                command_buffers: &command_buffers,
                wait_semaphores: &wait_semaphores,
                signal_semaphores: &signal_semaphores,
            },
            Some(frame.fence.get()),
        )
    }

    /// Hands a slot back after a frame that acquired an image but was never
    /// submitted: an empty submission consumes the image-available semaphore and
    /// signals the fence, so the next wait on this slot returns.
    fn recover_slot(&self, slot: usize) {
        let frame = &self.frames[slot];
        let device = &self.device;
        if let Err(e) = frame.fence.reset(device) {
            log::error!("Failed to reset fence of frame slot {}: {}", slot, e);
            return;
        }
        let wait_semaphores = [(
            frame.image_available.get(),
            PipelineStage::COLOR_ATTACHMENT_OUTPUT,
        )];
        let result = device.graphics_queue().submit(
            &SubmitInfo {
                command_buffers: &[],
                wait_semaphores: &wait_semaphores,
                signal_semaphores: &[],
            },
            Some(frame.fence.get()),
        );
        if let Err(e) = result {
            log::error!("Failed to recover frame slot {}: {}", slot, e);
        }
    }

    /// Releases everything that was created, tolerating partial creation.
    /// The device must be idle.
    fn release(&mut self) {
        let device = &self.device;
        for frame in &mut self.frames {
            frame.release(device);
        }
        for semaphore in &mut self.render_finished {
            semaphore.release(device);
        }
        self.render_finished.clear();

        for (_, mut image) in self.textures.drain() {
            image.release(device, &mut self.allocator);
        }
        for (_, mut buffer) in self.buffers.drain() {
            buffer.release(device, &mut self.allocator);
        }
        for structure in self.acceleration_structures.drain(..) {
            device.backend().destroy_acceleration_structure(structure);
        }

        self.uniforms.release(device, &mut self.allocator);
        self.destruction_queue.flush(device, &mut self.allocator);
        self.shared_targets
            .destroy(&mut self.registry, device, &mut self.allocator);
        self.registry.release_all(device, &mut self.allocator);
        self.samplers.release(device);
        if self.global_layout.is_initialized() {
            self.global_layout.release(device);
        }
        if self.descriptor_pool.is_initialized() {
            self.descriptor_pool.release(device);
        }
        if self.command_pool.is_initialized() {
            self.command_pool.release(device);
        }
        self.allocator.release(device.backend());
    }
}

fn initialize_passes(
    passes: &mut [Box<dyn RenderPass>],
    resources: &mut SystemResources,
    rendering_path: RenderingPath,
) -> BackendResult<()> {
    for pass in passes.iter_mut() {
        let mut ctx = resources.render_context(rendering_path);
        initialize_pass(pass.as_mut(), &mut ctx)?;
    }
    Ok(())
}

fn terminate_passes(
    passes: &mut [Box<dyn RenderPass>],
    resources: &mut SystemResources,
    rendering_path: RenderingPath,
) {
    for pass in passes.iter_mut().rev() {
        if pass.base().is_initialized() {
            let mut ctx = resources.render_context(rendering_path);
            terminate_pass(pass.as_mut(), &mut ctx);
        }
    }
}

/// Owner of the render passes and every GPU object they run on.
pub struct RenderingSystem {
    state: SystemState,
    config: RenderingConfig,
    rendering_path: RenderingPath,
    render_passes: Vec<Box<dyn RenderPass>>,
    resources: Option<SystemResources>,
    general: Arc<RwLock<GeneralUniformData>>,
    hammersley: Arc<RwLock<HammersleyHemisphereSamples>>,
    current_frame: usize,
    next_frame: usize,
    total_frames: u64,
    terminate_requested: bool,
}

impl RenderingSystem {
    pub fn new() -> Self {
        Self {
            state: SystemState::Uninitialized,
            config: RenderingConfig::default(),
            rendering_path: RenderingPath::Default,
            render_passes: Vec::new(),
            resources: None,
            general: Arc::new(RwLock::new(GeneralUniformData::default())),
            hammersley: Arc::new(RwLock::new(HammersleyHemisphereSamples::generate())),
            current_frame: 0,
            next_frame: 0,
            total_frames: 0,
            terminate_requested: false,
        }
    }

    // === Lifecycle ===

    /// Creates every GPU object and initializes the registered passes.
    ///
    /// On failure everything created so far is released and the system stays
    /// uninitialized.
    pub fn initialize_system(
        &mut self,
        backend: Arc<dyn GraphicsBackend>,
        config: RenderingConfig,
    ) -> BackendResult<()> {
        debug_assert_eq!(
            self.state,
            SystemState::Uninitialized,
            "rendering system initialized twice"
        );
        config.validate()?;
        log::info!(
            "Initializing rendering system: {} backend, {}x{} x{}, {} frames in flight",
            backend.name(),
            config.resolution.width,
            config.resolution.height,
            config.resolution_scale,
            config.frames_in_flight
        );

        let mut resources = SystemResources::new(backend, &config);
        if let Err(e) = resources.create(&config, &self.general, &self.hammersley) {
            log::error!("Rendering system initialization failed: {}", e);
            resources.release();
            return Err(e);
        }

        let rendering_path = config.initial_rendering_path;
        if let Err(e) = initialize_passes(&mut self.render_passes, &mut resources, rendering_path) {
            terminate_passes(&mut self.render_passes, &mut resources, rendering_path);
            resources.release();
            return Err(e);
        }

        self.rendering_path = rendering_path;
        self.config = config;
        self.current_frame = 0;
        self.next_frame = 0;
        self.total_frames = 0;
        self.terminate_requested = false;
        self.resources = Some(resources);
        self.state = SystemState::Running;
        log::info!(
            "Rendering system running with {} render pass(es)",
            self.render_passes.len()
        );
        Ok(())
    }

    /// Records, submits and presents one frame.
    ///
    /// Returns whether the application should terminate.
    pub fn update_system_synchronous(&mut self, delta_time: f32) -> BackendResult<bool> {
        debug_assert_eq!(
            self.state,
            SystemState::Running,
            "update_system_synchronous on a system that is not running"
        );
        let Some(resources) = self.resources.as_mut() else {
            return Ok(true);
        };

        resources
            .destruction_queue
            .process(&resources.device, &mut resources.allocator);

        let slot = self.next_frame;
        let acquired = resources
            .device
            .backend()
            .acquire_next_image(resources.frames[slot].image_available.get());
        let image_index = match acquired {
            Ok(index) => index,
            Err(BackendError::SurfaceOutOfDate) => {
                log::warn!("Swapchain out of date on acquire, recreating");
                let extent = self.config.resolution;
                self.resize(extent.width, extent.height)?;
                return Ok(self.terminate_requested);
            }
            Err(e) => return Err(e),
        };

        let device = &resources.device;
        resources.frames[slot].fence.wait(device)?;

        self.current_frame = slot;
        self.next_frame = (slot + 1) % resources.frames.len();
        self.total_frames += 1;
        log::trace!(
            "Frame {} in slot {} on swapchain image {}",
            self.total_frames,
            slot,
            image_index
        );

        *self.general.write() = GeneralUniformData::new(
            resources.scaled_resolutions[0],
            resources.scaled_resolutions[1],
            self.total_frames as u32,
            delta_time,
        );
        let frame = FrameInfo {
            frame_index: slot,
            total_frames: self.total_frames,
            rendering_path: self.rendering_path,
        };
        let submitted = resources
            .record_frame(&mut self.render_passes, frame, image_index)
            .and_then(|()| resources.submit_frame(slot, image_index));
        if let Err(e) = submitted {
            log::error!("Frame {} was not submitted: {}", self.total_frames, e);
            resources.recover_slot(slot);
            return Err(e);
        }

        let render_finished = resources.render_finished[image_index as usize].get();
        let queue = resources.device.graphics_queue();
        match queue.present(image_index, render_finished) {
            Ok(()) => {}
            Err(BackendError::SurfaceOutOfDate) => {
                log::warn!("Swapchain out of date on present, recreating");
                let extent = self.config.resolution;
                self.resize(extent.width, extent.height)?;
            }
            Err(e) => return Err(e),
        }
        Ok(self.terminate_requested)
    }

    /// Waits for the GPU, terminates every pass and releases every GPU object.
    pub fn release_system(&mut self) {
        let Some(mut resources) = self.resources.take() else {
            self.state = SystemState::Terminated;
            return;
        };
        log::info!("Releasing rendering system after {} frames", self.total_frames);
        if let Err(e) = resources.device.wait_idle() {
            log::error!("wait_idle failed during release: {}", e);
        }
        terminate_passes(&mut self.render_passes, &mut resources, self.rendering_path);
        resources.release();
        self.state = SystemState::Terminated;
    }

    /// Makes the next `update_system_synchronous` return `true`.
    pub fn request_termination(&mut self) {
        self.terminate_requested = true;
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    // === Render passes ===

    /// Adds `pass` after every pass of an equal or earlier stage. A pass added to a
    /// running system is initialized first.
    pub fn add_render_pass(&mut self, pass: Box<dyn RenderPass>) -> BackendResult<()> {
        let stage = pass.base().stage();
        let index = self
            .render_passes
            .partition_point(|existing| existing.base().stage() <= stage);
        self.insert_render_pass_at(index, pass)
    }

    /// Inserts `pass` before the first pass tagged `stage`, or at the end if there is none.
    pub fn insert_render_pass_before(
        &mut self,
        stage: RenderPassStage,
        pass: Box<dyn RenderPass>,
    ) -> BackendResult<()> {
        let index = self
            .render_passes
            .iter()
            .position(|existing| existing.base().stage() == stage)
            .unwrap_or(self.render_passes.len());
        self.insert_render_pass_at(index, pass)
    }

    fn insert_render_pass_at(&mut self, index: usize, mut pass: Box<dyn RenderPass>) -> BackendResult<()> {
        if let Some(resources) = self.resources.as_mut() {
            let mut ctx = resources.render_context(self.rendering_path);
            initialize_pass(pass.as_mut(), &mut ctx)?;
        }
        log::debug!(
            "Registered render pass '{}' ({}) at position {}",
            pass.base().name(),
            pass.base().stage(),
            index
        );
        self.render_passes.insert(index, pass);
        Ok(())
    }

    pub fn render_passes(&self) -> impl Iterator<Item = &dyn RenderPass> {
        self.render_passes.iter().map(|pass| pass.as_ref())
    }

    /// First registered pass of type `T`
    pub fn render_pass<T: RenderPass + 'static>(&self) -> Option<&T> {
        self.render_passes
            .iter()
            .find_map(|pass| pass.as_any().downcast_ref::<T>())
    }

    pub fn render_pass_mut<T: RenderPass + 'static>(&mut self) -> Option<&mut T> {
        self.render_passes
            .iter_mut()
            .find_map(|pass| pass.as_any_mut().downcast_mut::<T>())
    }

    pub fn rendering_path(&self) -> RenderingPath {
        self.rendering_path
    }

    /// Switches the rendering path, re-initializing every pass. No-op if unchanged.
    pub fn set_rendering_path(&mut self, path: RenderingPath) -> BackendResult<()> {
        if path == self.rendering_path {
            return Ok(());
        }
        log::info!("Rendering path {:?} -> {:?}", self.rendering_path, path);
        let previous = self.rendering_path;
        self.rendering_path = path;
        let Some(resources) = self.resources.as_mut() else {
            return Ok(());
        };
        resources.device.wait_idle()?;
        terminate_passes(&mut self.render_passes, resources, previous);
        initialize_passes(&mut self.render_passes, resources, path)
    }

    /// Recreates the swapchain and every resolution-dependent target, then
    /// re-initializes every pass. A zero extent (minimized window) is ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> BackendResult<()> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return Ok(());
        }
        self.config.resolution = Resolution::new(width, height);
        let Some(resources) = self.resources.as_mut() else {
            return Ok(());
        };

        resources.device.wait_idle()?;
        check_result(
            resources.device.backend().recreate_swapchain(width, height),
            "recreate swapchain",
        )?;
        terminate_passes(&mut self.render_passes, resources, self.rendering_path);

        resources.swapchain = resources.device.backend().swapchain_info();
        resources.scaled_resolutions =
            scaled_resolutions(self.config.resolution, self.config.resolution_scale);
        resources.shared_targets.destroy(
            &mut resources.registry,
            &resources.device,
            &mut resources.allocator,
        );
        resources.create_shared_targets()?;
        resources.create_render_finished_semaphores()?;
        resources
            .destruction_queue
            .set_frames_to_keep(resources.swapchain.image_count as u64 + 1);

        log::info!(
            "Resized to {}x{} ({} swapchain images)",
            width,
            height,
            resources.swapchain.image_count
        );
        initialize_passes(&mut self.render_passes, resources, self.rendering_path)
    }

    // === Frame state ===

    /// Frame-in-flight slot recorded by the last update
    pub fn current_frame_index(&self) -> usize {
        self.current_frame
    }

    /// Frames recorded since initialization
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn frames_in_flight(&self) -> usize {
        self.config.frames_in_flight
    }

    pub fn config(&self) -> &RenderingConfig {
        &self.config
    }

    pub fn device(&self) -> Option<&Device> {
        self.resources.as_ref().map(|resources| &resources.device)
    }

    pub fn swapchain_info(&self) -> Option<SwapchainInfo> {
        self.resources.as_ref().map(|resources| resources.swapchain)
    }

    /// Primary command buffer of frame slot `slot`
    pub fn frame_command_buffer(&self, slot: usize) -> Option<CommandBufferHandle> {
        self.resources
            .as_ref()
            .and_then(|resources| resources.frames.get(slot))
            .map(|frame| frame.command_buffer.get())
    }

    /// Fence signaled when frame slot `slot` retires
    pub fn frame_fence(&self, slot: usize) -> Option<FenceHandle> {
        self.resources
            .as_ref()
            .and_then(|resources| resources.frames.get(slot))
            .map(|frame| frame.fence.get())
    }

    pub fn scaled_resolutions(&self) -> Option<[Resolution; SCALED_RESOLUTION_LEVELS]> {
        self.resources
            .as_ref()
            .map(|resources| resources.scaled_resolutions)
    }

    /// Resources waiting in the deferred destruction queue
    pub fn pending_destruction_count(&self) -> usize {
        self.resources
            .as_ref()
            .map(|resources| resources.destruction_queue.len())
            .unwrap_or(0)
    }

    // === Uniforms ===

    /// Mirrors `source` into a uniform buffer per frame in flight, updated every frame.
    pub fn register_uniform_buffer(
        &mut self,
        identifier: u64,
        source: Arc<dyn UniformSource>,
    ) -> BackendResult<()> {
        let resources = self.running_resources()?;
        resources.uniforms.register_uniform_buffer(
            &resources.device,
            &mut resources.allocator,
            identifier,
            source,
        )
    }

    pub fn get_uniform_buffer(&self, identifier: u64, frame_index: usize) -> Option<BufferHandle> {
        self.resources
            .as_ref()
            .and_then(|resources| resources.uniforms.get_uniform_buffer(identifier, frame_index))
    }

    /// Reads back the GPU mirror of `identifier` in slot `frame_index`.
    pub fn read_uniform_buffer(&self, identifier: u64, frame_index: usize) -> Option<BackendResult<Vec<u8>>> {
        let resources = self.resources.as_ref()?;
        resources
            .uniforms
            .read_back(&resources.device, identifier, frame_index)
    }

    /// The data mirrored into the general uniform buffer
    pub fn general_uniform_data(&self) -> GeneralUniformData {
        *self.general.read()
    }

    // === Render targets and samplers ===

    pub fn get_render_target(&self, kind: SharedRenderTarget) -> RenderTargetId {
        let resources = self.resources.as_ref();
        debug_assert!(resources.is_some(), "render target requested before initialize");
        resources
            .map(|resources| resources.shared_targets.get(kind))
            .unwrap_or_else(|| SharedRenderTargets::default().get(kind))
    }

    /// View of `id`, `None` if the id is stale.
    pub fn render_target_view(&self, id: RenderTargetId) -> Option<ImageViewHandle> {
        self.resources
            .as_ref()
            .and_then(|resources| resources.registry.get(id))
            .map(|target| target.view())
    }

    pub fn get_sampler(&self, kind: CommonSampler) -> SamplerHandle {
        self.resources
            .as_ref()
            .map(|resources| resources.samplers.get(kind))
            .unwrap_or_default()
    }

    // === Outward resource creation ===

    fn running_resources(&mut self) -> BackendResult<&mut SystemResources> {
        self.resources.as_mut().ok_or_else(|| {
            BackendError::InvalidParameter("rendering system is not running".into())
        })
    }

    /// Creates a sampled texture from tightly packed pixels.
    pub fn create_texture_2d(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: &[u8],
    ) -> BackendResult<Texture> {
        let resources = self.running_resources()?;
        let extent = Resolution::new(width, height);
        let mut image = Image::new();
        if let Err(e) = image.initialize_with_data(
            &resources.device,
            &mut resources.allocator,
            extent,
            format,
            pixels,
        ) {
            if image.is_initialized() {
                image.release(&resources.device, &mut resources.allocator);
            }
            return Err(e);
        }
        let texture = Texture {
            image: image.get(),
            view: image.view(),
            extent,
        };
        resources.textures.insert(texture.image, image);
        Ok(texture)
    }

    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryProperty,
    ) -> BackendResult<BufferHandle> {
        let resources = self.running_resources()?;
        let mut buffer = Buffer::new();
        buffer.initialize(&resources.device, &mut resources.allocator, size, usage, memory)?;
        let handle = buffer.get();
        resources.buffers.insert(handle, buffer);
        Ok(handle)
    }

    /// Fills a buffer created by [`RenderingSystem::create_buffer`]. Blocks until done.
    pub fn upload_data_to_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> BackendResult<()> {
        let resources = self.running_resources()?;
        let target = resources.buffers.get(&buffer).ok_or_else(|| {
            BackendError::InvalidParameter(format!("unknown buffer {:?}", buffer))
        })?;
        target.upload(&resources.device, &mut resources.allocator, data)
    }

    /// Host-side contents of a host-visible buffer created by this system.
    pub fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        let resources = self.resources.as_ref().ok_or_else(|| {
            BackendError::InvalidParameter("rendering system is not running".into())
        })?;
        let target = resources.buffers.get(&buffer).ok_or_else(|| {
            BackendError::InvalidParameter(format!("unknown buffer {:?}", buffer))
        })?;
        target.read(&resources.device, offset, size)
    }

    /// Creates device-local vertex and index buffers and uploads the model into them.
    pub fn create_model_buffers(&mut self, vertices: &[Vertex], indices: &[u32]) -> BackendResult<ModelBuffers> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(BackendError::InvalidParameter("model without geometry".into()));
        }
        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let geometry_usage = BufferUsage::TRANSFER_DST | BufferUsage::ACCELERATION_STRUCTURE_INPUT;

        let vertex_buffer = self.create_buffer(
            vertex_bytes.len() as u64,
            BufferUsage::VERTEX | geometry_usage,
            MemoryProperty::DEVICE_LOCAL,
        )?;
        let result = self
            .upload_data_to_buffer(vertex_buffer, vertex_bytes)
            .and_then(|_| {
                self.create_buffer(
                    index_bytes.len() as u64,
                    BufferUsage::INDEX | geometry_usage,
                    MemoryProperty::DEVICE_LOCAL,
                )
            });
        let index_buffer = match result {
            Ok(index_buffer) => index_buffer,
            Err(e) => {
                self.destroy_buffer_immediately(vertex_buffer);
                return Err(e);
            }
        };
        if let Err(e) = self.upload_data_to_buffer(index_buffer, index_bytes) {
            self.destroy_buffer_immediately(vertex_buffer);
            self.destroy_buffer_immediately(index_buffer);
            return Err(e);
        }

        log::debug!(
            "Created model buffers: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );
        Ok(ModelBuffers {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }

    // Only for buffers the GPU never saw.
    fn destroy_buffer_immediately(&mut self, buffer: BufferHandle) {
        if let Some(resources) = self.resources.as_mut() {
            if let Some(mut created) = resources.buffers.remove(&buffer) {
                created.release(&resources.device, &mut resources.allocator);
            }
        }
    }

    /// Builds a top level acceleration structure over `instances`.
    ///
    /// Fails with [`BackendError::Unsupported`] on backends without ray tracing.
    pub fn create_top_level_acceleration_structure(
        &mut self,
        instances: &[AccelerationStructureInstance],
    ) -> BackendResult<AccelerationStructureHandle> {
        let resources = self.running_resources()?;
        if !resources.capabilities.ray_tracing {
            return Err(BackendError::Unsupported(
                "acceleration structures need a ray tracing capable backend".into(),
            ));
        }
        let structure = check_result(
            resources
                .device
                .backend()
                .create_top_level_acceleration_structure(instances),
            "create top level acceleration structure",
        )?;
        resources.acceleration_structures.push(structure);
        Ok(structure)
    }

    // === Deferred destruction ===

    /// Destroys `texture` once no frame in flight can still reference it.
    pub fn destroy_texture_deferred(&mut self, texture: Texture) {
        let Some(resources) = self.resources.as_mut() else {
            return;
        };
        match resources.textures.remove(&texture.image) {
            Some(mut image) => image.release_deferred(&mut resources.destruction_queue),
            None => debug_assert!(false, "destroying unknown texture {:?}", texture.image),
        }
    }

    pub fn destroy_buffer_deferred(&mut self, buffer: BufferHandle) {
        let Some(resources) = self.resources.as_mut() else {
            return;
        };
        match resources.buffers.remove(&buffer) {
            Some(mut created) => created.release_deferred(&mut resources.destruction_queue),
            None => debug_assert!(false, "destroying unknown buffer {:?}", buffer),
        }
    }

    pub fn destroy_model_buffers_deferred(&mut self, model: ModelBuffers) {
        self.destroy_buffer_deferred(model.vertex_buffer);
        self.destroy_buffer_deferred(model.index_buffer);
    }

    pub fn destroy_acceleration_structure_deferred(&mut self, structure: AccelerationStructureHandle) {
        let Some(resources) = self.resources.as_mut() else {
            return;
        };
        let before = resources.acceleration_structures.len();
        resources
            .acceleration_structures
            .retain(|existing| *existing != structure);
        debug_assert!(
            resources.acceleration_structures.len() < before,
            "destroying unknown acceleration structure {:?}",
            structure
        );
        resources
            .destruction_queue
            .push(crate::resources::DeferredResource::AccelerationStructure(structure));
    }

    /// Destroys a render target created by a pass once no frame can reference it.
    pub fn destroy_render_target_deferred(&mut self, id: RenderTargetId) {
        let Some(resources) = self.resources.as_mut() else {
            return;
        };
        resources
            .registry
            .destroy_deferred(id, &mut resources.destruction_queue);
    }
}

impl Default for RenderingSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RenderingSystem {
    fn drop(&mut self) {
        if self.resources.is_some() {
            log::warn!("RenderingSystem dropped without release_system");
        }
    }
}

impl std::fmt::Debug for RenderingSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderingSystem")
            .field("state", &self.state)
            .field("rendering_path", &self.rendering_path)
            .field("render_passes", &self.render_passes.len())
            .field("current_frame", &self.current_frame)
            .field("total_frames", &self.total_frames)
            .finish()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, RecordedCall};

    fn running(frames_in_flight: usize) -> (Arc<DummyBackend>, RenderingSystem) {
        let backend = Arc::new(DummyBackend::new());
        let mut system = RenderingSystem::new();
        system
            .initialize_system(
                backend.clone(),
                RenderingConfig::default().with_frames_in_flight(frames_in_flight),
            )
            .unwrap();
        (backend, system)
    }

    #[test]
    fn test_release_leaves_no_live_objects() {
        let (backend, mut system) = running(2);
        assert_eq!(system.state(), SystemState::Running);
        assert!(backend.live_object_count() > 0);

        system.update_system_synchronous(0.016).unwrap();
        system.release_system();

        assert_eq!(system.state(), SystemState::Terminated);
        assert_eq!(backend.live_object_count(), 0);
        assert_eq!(backend.invalid_destroy_count(), 0);
    }

    #[test]
    fn test_invalid_config_creates_nothing() {
        let backend = Arc::new(DummyBackend::new());
        let mut system = RenderingSystem::new();
        let result = system.initialize_system(
            backend.clone(),
            RenderingConfig::default().with_frames_in_flight(0),
        );
        assert!(matches!(result, Err(BackendError::InvalidParameter(_))));
        assert_eq!(system.state(), SystemState::Uninitialized);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_frame_slots_round_robin() {
        let (backend, mut system) = running(3);
        let fences: Vec<_> = (0..3).map(|slot| system.frame_fence(slot).unwrap()).collect();
        backend.clear_calls();

        for expected in [0, 1, 2, 0, 1] {
            system.update_system_synchronous(0.016).unwrap();
            assert_eq!(system.current_frame_index(), expected);
        }
        assert_eq!(system.total_frames(), 5);

        let waited: Vec<_> = backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::WaitFence { fence } => fences.iter().position(|f| *f == fence),
                _ => None,
            })
            .collect();
        assert_eq!(waited, vec![0, 1, 2, 0, 1]);
        system.release_system();
    }

    #[test]
    fn test_general_uniform_tracks_frames() {
        let (_backend, mut system) = running(2);
        system.update_system_synchronous(0.5).unwrap();
        system.update_system_synchronous(0.25).unwrap();

        let data = system.general_uniform_data();
        assert_eq!(data.frame_index, 2);
        assert_eq!(data.delta_time, 0.25);

        let identifier = hash_name(GENERAL_UNIFORM_NAME);
        let mirrored = system
            .read_uniform_buffer(identifier, system.current_frame_index())
            .unwrap()
            .unwrap();
        assert_eq!(mirrored.as_slice(), bytemuck::bytes_of(&data));
        system.release_system();
    }

    #[test]
    fn test_out_of_date_surface_skips_frame() {
        let (backend, mut system) = running(2);
        system.update_system_synchronous(0.016).unwrap();
        backend.invalidate_swapchain();
        backend.clear_calls();

        let fences: Vec<_> = (0..2).map(|slot| system.frame_fence(slot).unwrap()).collect();
        let command_buffers: Vec<_> = (0..2)
            .map(|slot| system.frame_command_buffer(slot).unwrap())
            .collect();

        let terminate = system.update_system_synchronous(0.016).unwrap();
        assert!(!terminate);
        assert_eq!(system.total_frames(), 1);
        // Recreating the shared targets submits transfer work, but no frame is submitted.
        assert!(!backend.calls().iter().any(|call| match call {
            RecordedCall::Submit {
                command_buffers: submitted,
                fence,
                ..
            } => {
                fence.map_or(false, |fence| fences.contains(&fence))
                    || submitted.iter().any(|cb| command_buffers.contains(cb))
            }
            _ => false,
        }));

        system.update_system_synchronous(0.016).unwrap();
        assert_eq!(system.total_frames(), 2);
        system.release_system();
    }

    /// Hands out more bytes than it declares while `oversized` is set.
    struct UnstableSource {
        oversized: std::sync::atomic::AtomicBool,
    }

    impl UniformSource for UnstableSource {
        fn size(&self) -> u64 {
            16
        }

        fn with_bytes(&self, f: &mut dyn FnMut(&[u8])) {
            if self.oversized.load(std::sync::atomic::Ordering::SeqCst) {
                f(&[0; 32])
            } else {
                f(&[0; 16])
            }
        }
    }

    #[test]
    fn test_failed_uniform_update_keeps_slot_usable() {
        let (backend, mut system) = running(2);
        let source = Arc::new(UnstableSource {
            oversized: std::sync::atomic::AtomicBool::new(false),
        });
        system
            .register_uniform_buffer(hash_name("unstable"), source.clone())
            .unwrap();
        system.update_system_synchronous(0.016).unwrap();

        source.oversized.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(system.update_system_synchronous(0.016).is_err());
        let failed_fence = system.frame_fence(1).unwrap();
        assert!(backend.calls().iter().any(|call| matches!(
            call,
            RecordedCall::Submit { command_buffers, fence: Some(fence), .. }
                if command_buffers.is_empty() && *fence == failed_fence
        )));

        source.oversized.store(false, std::sync::atomic::Ordering::SeqCst);
        for _ in 0..4 {
            system.update_system_synchronous(0.016).unwrap();
        }
        assert_eq!(system.total_frames(), 6);
        system.release_system();
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_request_termination() {
        let (_backend, mut system) = running(2);
        assert!(!system.update_system_synchronous(0.016).unwrap());
        system.request_termination();
        assert!(system.update_system_synchronous(0.016).unwrap());
        system.release_system();
    }

    #[test]
    fn test_resize_ignores_zero_extent() {
        let (_backend, mut system) = running(2);
        system.resize(0, 600).unwrap();
        assert_eq!(system.config().resolution, Resolution::new(1280, 720));

        system.resize(800, 600).unwrap();
        assert_eq!(system.config().resolution, Resolution::new(800, 600));
        assert_eq!(
            system.swapchain_info().unwrap().extent,
            Resolution::new(800, 600)
        );
        assert_eq!(
            system.scaled_resolutions().unwrap()[1],
            Resolution::new(400, 300)
        );
        system.release_system();
    }

    #[test]
    fn test_deferred_buffer_outlives_frames_in_flight() {
        let (backend, mut system) = running(2);
        let buffer = system
            .create_buffer(256, BufferUsage::STORAGE, MemoryProperty::HOST_VISIBLE)
            .unwrap();
        let live = backend.live_object_count();

        system.destroy_buffer_deferred(buffer);
        assert_eq!(system.pending_destruction_count(), 1);

        // Three swapchain images: kept for four processed frames.
        let mut frames = 0;
        while system.pending_destruction_count() > 0 {
            system.update_system_synchronous(0.016).unwrap();
            frames += 1;
            assert!(frames < 10);
        }
        assert!(frames > 3);
        assert_eq!(backend.live_object_count(), live - 1);
        system.release_system();
    }
}
