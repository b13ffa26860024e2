//! Render passes: ordered groups of pipelines sharing one rendering stage.
//!
//! A pass implements [`RenderPass`] and owns its pipelines through a
//! [`RenderPassBase`]. The rendering system never calls the trait's hooks
//! directly; it goes through [`initialize_pass`], [`execute_pass`] and
//! [`terminate_pass`], which bracket the hooks with the pipeline lifecycle:
//!
//! ```text
//! initialize_pass:  pass.initialize -> every pipeline.initialize -> every pipeline.post_initialize
//! execute_pass:     should_render? -> pre_record -> included pipelines.execute -> post_record
//!                   (into the pass's secondary command buffer when it records into one)
//! terminate_pass:   pass.on_terminate -> frame resources released -> pipelines terminated, list cleared
//! ```

mod context;
mod stage;

pub use context::{FrameContext, FrameInfo, RenderContext};
pub use stage::RenderPassStage;

use std::any::Any;

use crate::backend::{BackendResult, CommandBufferHandle, CommandBufferLevel};
use crate::device::Device;
use crate::pipeline::{Pipeline, PipelineState};
use crate::resources::{CommandBuffer, CommandPool};

/// Per-frame command buffers a pass requested on top of the frame's primary buffer.
#[derive(Default)]
pub struct PassFrameResources {
    command_buffers: Vec<(usize, CommandBuffer)>,
}

impl PassFrameResources {
    /// Secondary command buffer of `frame_index`, allocated from `pool` on first request.
    pub fn secondary_command_buffer(
        &mut self,
        device: &Device,
        pool: &CommandPool,
        frame_index: usize,
    ) -> BackendResult<CommandBufferHandle> {
        if let Some((_, buffer)) = self
            .command_buffers
            .iter()
            .find(|(frame, _)| *frame == frame_index)
        {
            return Ok(buffer.get());
        }
        let mut buffer = CommandBuffer::new();
        buffer.initialize(device, pool, CommandBufferLevel::Secondary)?;
        let handle = buffer.get();
        self.command_buffers.push((frame_index, buffer));
        Ok(handle)
    }

    /// Secondary command buffer already allocated for `frame_index`
    pub fn command_buffer(&self, frame_index: usize) -> Option<&CommandBuffer> {
        self.command_buffers
            .iter()
            .find(|(frame, _)| *frame == frame_index)
            .map(|(_, buffer)| buffer)
    }

    pub fn len(&self) -> usize {
        self.command_buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.command_buffers.is_empty()
    }

    pub fn release(&mut self, device: &Device) {
        for (_, mut buffer) in self.command_buffers.drain(..) {
            buffer.release(device);
        }
    }
}

/// State every render pass carries.
pub struct RenderPassBase {
    name: String,
    stage: RenderPassStage,
    pipelines: Vec<Pipeline>,
    enabled: bool,
    initialized: bool,
    frame_resources: PassFrameResources,
}

impl RenderPassBase {
    pub fn new(name: impl Into<String>, stage: RenderPassStage) -> Self {
        Self {
            name: name.into(),
            stage,
            pipelines: Vec::new(),
            enabled: true,
            initialized: false,
            frame_resources: PassFrameResources::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> RenderPassStage {
        self.stage
    }

    /// Clears the pipeline list and reserves room for `count` pipelines.
    pub fn set_number_of_pipelines(&mut self, count: usize) {
        debug_assert!(
            self.pipelines.iter().all(|p| p.state() != PipelineState::Ready),
            "render pass '{}' replaced live pipelines",
            self.name
        );
        self.pipelines.clear();
        self.pipelines.reserve(count);
    }

    /// Appends a pipeline and returns its index. Pipelines execute in insertion order.
    pub fn add_pipeline(&mut self, pipeline: impl Into<Pipeline>) -> usize {
        self.pipelines.push(pipeline.into());
        self.pipelines.len() - 1
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn pipeline(&self, index: usize) -> Option<&Pipeline> {
        self.pipelines.get(index)
    }

    pub fn pipeline_mut(&mut self, index: usize) -> Option<&mut Pipeline> {
        self.pipelines.get_mut(index)
    }

    pub fn pipelines_mut(&mut self) -> &mut [Pipeline] {
        &mut self.pipelines
    }

    /// Whether the last executed frame recorded this pass
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn frame_resources_mut(&mut self) -> &mut PassFrameResources {
        &mut self.frame_resources
    }

    pub fn frame_resources(&self) -> &PassFrameResources {
        &self.frame_resources
    }
}

impl std::fmt::Debug for RenderPassBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPassBase")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("pipelines", &self.pipelines)
            .field("enabled", &self.enabled)
            .field("initialized", &self.initialized)
            .finish()
    }
}

/// A render pass.
///
/// Implementations build their pipelines in [`RenderPass::initialize`] with
/// [`RenderPassBase::set_number_of_pipelines`] and [`RenderPassBase::add_pipeline`];
/// the driver functions initialize and terminate them.
pub trait RenderPass: Send {
    fn base(&self) -> &RenderPassBase;
    fn base_mut(&mut self) -> &mut RenderPassBase;

    /// Creates pass-owned resources and adds the pass's pipelines.
    fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()>;

    /// Re-evaluated every frame. A pass returning `false` records nothing that frame.
    fn should_render(&self, _frame: &FrameInfo) -> bool {
        true
    }

    /// Records pass-specific setup (layout transitions, clears) before the pipelines.
    fn pre_record(&mut self, _frame: &FrameContext<'_>) {}

    fn post_record(&mut self, _frame: &FrameContext<'_>) {}

    /// Whether the pass records into its secondary command buffer of the frame slot,
    /// which the frame's primary buffer then executes. The buffer comes from
    /// [`PassFrameResources::secondary_command_buffer`] during initialize.
    fn records_into_secondary(&self) -> bool {
        false
    }

    /// Blocks until CPU-side work this pass reads (streamed geometry, generated
    /// uniforms) has finished. Called before anything of the pass is recorded.
    fn wait_for_dependencies(&mut self, _frame: &FrameInfo) {}

    /// Releases pass-owned resources. Also called after a failed initialize, so it
    /// must tolerate partially created state.
    fn on_terminate(&mut self, _ctx: &mut RenderContext<'_>) {}

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Runs the pass's initialize, then initialize and post-initialize on every pipeline.
pub fn initialize_pass(pass: &mut dyn RenderPass, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
    debug_assert!(
        !pass.base().initialized,
        "render pass '{}' initialized twice without terminate",
        pass.base().name
    );
    log::debug!(
        "Initializing render pass '{}' ({})",
        pass.base().name,
        pass.base().stage
    );

    if let Err(e) = initialize_pipelines(pass, ctx) {
        log::error!("Render pass '{}' failed to initialize: {}", pass.base().name, e);
        release_pass(pass, ctx);
        return Err(e);
    }
    pass.base_mut().initialized = true;
    Ok(())
}

fn initialize_pipelines(pass: &mut dyn RenderPass, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
    pass.initialize(ctx)?;
    for pipeline in pass.base_mut().pipelines.iter_mut() {
        pipeline.initialize(ctx)?;
    }
    for pipeline in pass.base_mut().pipelines.iter_mut() {
        pipeline.post_initialize(ctx)?;
    }
    Ok(())
}

/// Records one frame of `pass`. Returns whether the pass was enabled.
pub fn execute_pass(pass: &mut dyn RenderPass, frame: &FrameContext<'_>) -> bool {
    debug_assert!(
        pass.base().initialized,
        "render pass '{}' executed before initialize",
        pass.base().name
    );
    let enabled = pass.should_render(&frame.frame);
    pass.base_mut().enabled = enabled;
    if !enabled {
        log::trace!("Render pass '{}' skipped", pass.base().name);
        return false;
    }

    pass.wait_for_dependencies(&frame.frame);
    let secondary = if pass.records_into_secondary() {
        let buffer = pass
            .base()
            .frame_resources
            .command_buffer(frame.frame_index())
            .map(CommandBuffer::get);
        debug_assert!(
            buffer.is_some(),
            "render pass '{}' has no secondary command buffer for frame slot {}",
            pass.base().name,
            frame.frame_index()
        );
        buffer
    } else {
        None
    };
    match secondary {
        Some(secondary) => record_secondary(pass, frame, secondary),
        None => record_pass(pass, frame),
    }
    true
}

fn record_pass(pass: &mut dyn RenderPass, frame: &FrameContext<'_>) {
    pass.pre_record(frame);
    for pipeline in pass.base().pipelines.iter().filter(|p| p.include_in_render()) {
        pipeline.execute(frame);
    }
    pass.post_record(frame);
}

fn record_secondary(
    pass: &mut dyn RenderPass,
    frame: &FrameContext<'_>,
    secondary: CommandBufferHandle,
) {
    let backend = frame.device.backend();
    let begun = backend
        .reset_command_buffer(secondary)
        .and_then(|()| backend.begin_command_buffer(secondary, true));
    if let Err(e) = begun {
        log::error!(
            "Render pass '{}' could not begin its secondary command buffer: {}",
            pass.base().name,
            e
        );
        return;
    }

    let nested = FrameContext {
        command_buffer: secondary,
        ..*frame
    };
    record_pass(pass, &nested);

    if let Err(e) = backend.end_command_buffer(secondary) {
        log::error!(
            "Render pass '{}' could not end its secondary command buffer: {}",
            pass.base().name,
            e
        );
        return;
    }
    backend.cmd_execute_commands(frame.command_buffer, &[secondary]);
}

/// Runs the pass's termination callback, releases its frame resources and
/// terminates its pipelines.
pub fn terminate_pass(pass: &mut dyn RenderPass, ctx: &mut RenderContext<'_>) {
    debug_assert!(
        pass.base().initialized,
        "render pass '{}' terminated before initialize",
        pass.base().name
    );
    log::debug!("Terminating render pass '{}'", pass.base().name);
    release_pass(pass, ctx);
}

fn release_pass(pass: &mut dyn RenderPass, ctx: &mut RenderContext<'_>) {
    pass.on_terminate(ctx);
    let base = pass.base_mut();
    base.frame_resources.release(ctx.device);
    for pipeline in base.pipelines.iter_mut() {
        if matches!(
            pipeline.state(),
            PipelineState::Initialized | PipelineState::Ready
        ) {
            pipeline.terminate(ctx.device);
        }
    }
    base.pipelines.clear();
    base.initialized = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ComputePipeline, ComputePipelineParameters, DispatchSize};

    fn compute(name: &str) -> ComputePipeline {
        ComputePipeline::new(ComputePipelineParameters {
            name: name.to_string(),
            shader: vec![0x0723_0203],
            bindings: Vec::new(),
            push_constant_ranges: Vec::new(),
            dispatch: DispatchSize::Groups { x: 1, y: 1, z: 1 },
        })
    }

    #[test]
    fn test_add_pipeline_keeps_insertion_order() {
        let mut base = RenderPassBase::new("Test", RenderPassStage::Lighting);
        base.set_number_of_pipelines(2);
        assert_eq!(base.add_pipeline(compute("first")), 0);
        assert_eq!(base.add_pipeline(compute("second")), 1);
        let names: Vec<_> = base.pipelines().iter().map(Pipeline::name).collect();
        assert_eq!(names, ["first", "second"]);
        assert!(base.pipeline(0).unwrap().include_in_render());
    }

    #[test]
    fn test_set_number_of_pipelines_clears() {
        let mut base = RenderPassBase::new("Test", RenderPassStage::Bloom);
        base.add_pipeline(compute("old"));
        base.set_number_of_pipelines(1);
        assert!(base.pipelines().is_empty());
        assert_eq!(base.stage(), RenderPassStage::Bloom);
        assert!(!base.is_initialized());
    }
}
