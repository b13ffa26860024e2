//! Common utilities for rendering system integration tests.
//!
//! Every test drives a real [`RenderingSystem`] over the recording dummy backend
//! and inspects what the system asked the backend to do.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use render_core::backend::{
    BackendError, BackendResult, CommandBufferHandle, DummyBackend, RecordedCall,
};
use render_core::pipeline::{ComputePipeline, ComputePipelineParameters, DispatchSize};
use render_core::render_pass::{FrameContext, FrameInfo, RenderContext};
use render_core::{
    RenderPass, RenderPassBase, RenderPassStage, RenderingConfig, RenderingPath, RenderingSystem,
};

/// Smallest valid SPIR-V: the magic number alone.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Backends the integration tests can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Recording backend (no GPU access).
    Dummy,
    /// Vulkan via ash. Needs a window, so never available to headless tests.
    Vulkan,
}

impl Backend {
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            Backend::Vulkan => false,
        }
    }

    #[allow(dead_code)]
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Dummy => "dummy",
            Backend::Vulkan => "vulkan",
        }
    }
}

// ============================================================================
// Marker Pass
// ============================================================================

/// One recorded execution of a [`MarkerPass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassEvent {
    pub pass: &'static str,
    pub frame_index: usize,
    pub total_frames: u64,
}

/// Shared log marker passes append to, in execution order.
pub type PassLog = Arc<Mutex<Vec<PassEvent>>>;

/// A render pass with compute pipelines whose dispatches are tagged by `marker`.
///
/// Pipeline `i` of a marker pass dispatches `(marker, i + 1, 1)` groups, so every dispatch
/// in the backend's call log can be traced back to its pass and pipeline.
pub struct MarkerPass {
    base: RenderPassBase,
    name: &'static str,
    marker: u32,
    pipeline_count: u32,
    per_pixel: bool,
    only_on: Option<RenderingPath>,
    fail_initialize: bool,
    in_secondary: bool,
    waited_frame: Option<u64>,
    dependency_waits: Arc<AtomicUsize>,
    enabled: Arc<AtomicBool>,
    initializations: Arc<AtomicUsize>,
    terminations: Arc<AtomicUsize>,
    log: PassLog,
}

impl MarkerPass {
    pub fn new(name: &'static str, stage: RenderPassStage, marker: u32, log: &PassLog) -> Self {
        Self {
            base: RenderPassBase::new(name, stage),
            name,
            marker,
            pipeline_count: 1,
            per_pixel: false,
            only_on: None,
            fail_initialize: false,
            in_secondary: false,
            waited_frame: None,
            dependency_waits: Arc::new(AtomicUsize::new(0)),
            enabled: Arc::new(AtomicBool::new(true)),
            initializations: Arc::new(AtomicUsize::new(0)),
            terminations: Arc::new(AtomicUsize::new(0)),
            log: log.clone(),
        }
    }

    #[allow(dead_code)]
    pub fn with_pipelines(mut self, count: u32) -> Self {
        self.pipeline_count = count;
        self
    }

    /// Adds a pipeline dispatching one 8x8 group per pixel of the render resolution.
    #[allow(dead_code)]
    pub fn with_per_pixel_pipeline(mut self) -> Self {
        self.per_pixel = true;
        self
    }

    #[allow(dead_code)]
    pub fn only_on(mut self, path: RenderingPath) -> Self {
        self.only_on = Some(path);
        self
    }

    /// Records the pass into its per-slot secondary command buffer.
    #[allow(dead_code)]
    pub fn in_secondary(mut self) -> Self {
        self.in_secondary = true;
        self
    }

    #[allow(dead_code)]
    pub fn failing(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Toggle read by `should_render`.
    #[allow(dead_code)]
    pub fn enabled_flag(&self) -> Arc<AtomicBool> {
        self.enabled.clone()
    }

    #[allow(dead_code)]
    pub fn initialization_counter(&self) -> Arc<AtomicUsize> {
        self.initializations.clone()
    }

    pub fn boxed(self) -> Box<dyn RenderPass> {
        Box::new(self)
    }

    #[allow(dead_code)]
    pub fn termination_counter(&self) -> Arc<AtomicUsize> {
        self.terminations.clone()
    }

    #[allow(dead_code)]
    pub fn dependency_wait_counter(&self) -> Arc<AtomicUsize> {
        self.dependency_waits.clone()
    }
}

impl RenderPass for MarkerPass {
    fn base(&self) -> &RenderPassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RenderPassBase {
        &mut self.base
    }

    fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        self.initializations.fetch_add(1, Ordering::SeqCst);
        if self.in_secondary {
            for frame_index in 0..ctx.frames_in_flight {
                self.base.frame_resources_mut().secondary_command_buffer(
                    ctx.device,
                    ctx.command_pool,
                    frame_index,
                )?;
            }
        }
        let count = self.pipeline_count as usize + usize::from(self.per_pixel);
        self.base.set_number_of_pipelines(count);
        for index in 0..self.pipeline_count {
            self.base.add_pipeline(ComputePipeline::new(ComputePipelineParameters {
                name: format!("{} #{}", self.name, index),
                shader: vec![SPIRV_MAGIC],
                bindings: Vec::new(),
                push_constant_ranges: Vec::new(),
                dispatch: DispatchSize::Groups {
                    x: self.marker,
                    y: index + 1,
                    z: 1,
                },
            }));
        }
        if self.per_pixel {
            self.base.add_pipeline(ComputePipeline::new(ComputePipelineParameters {
                name: format!("{} per-pixel", self.name),
                shader: vec![SPIRV_MAGIC],
                bindings: Vec::new(),
                push_constant_ranges: Vec::new(),
                dispatch: DispatchSize::PerPixel {
                    local_size: (8, 8),
                    extent: None,
                },
            }));
        }
        if self.fail_initialize {
            return Err(BackendError::InvalidParameter(format!(
                "{} refuses to initialize",
                self.name
            )));
        }
        Ok(())
    }

    fn should_render(&self, frame: &FrameInfo) -> bool {
        self.enabled.load(Ordering::SeqCst)
            && self.only_on.map_or(true, |path| path == frame.rendering_path)
    }

    fn records_into_secondary(&self) -> bool {
        self.in_secondary
    }

    fn wait_for_dependencies(&mut self, frame: &FrameInfo) {
        self.dependency_waits.fetch_add(1, Ordering::SeqCst);
        self.waited_frame = Some(frame.total_frames);
    }

    fn pre_record(&mut self, frame: &FrameContext<'_>) {
        assert_eq!(
            self.waited_frame,
            Some(frame.frame.total_frames),
            "{} recorded before waiting on its dependencies",
            self.name
        );
        self.log.lock().push(PassEvent {
            pass: self.name,
            frame_index: frame.frame_index(),
            total_frames: frame.frame.total_frames,
        });
    }

    fn on_terminate(&mut self, _ctx: &mut RenderContext<'_>) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// A running rendering system over a dummy backend.
pub struct TestContext {
    #[allow(dead_code)]
    pub backend: Backend,
    pub dummy: Arc<DummyBackend>,
    pub system: RenderingSystem,
    pub log: PassLog,
}

impl TestContext {
    /// Returns `None` if the backend is not available. Panics if setup fails.
    pub fn new(backend: Backend, frames_in_flight: usize) -> Option<Self> {
        Self::with_passes(backend, frames_in_flight, |_| Vec::new())
    }

    /// Registers the passes built by `passes` before initializing the system.
    pub fn with_passes(
        backend: Backend,
        frames_in_flight: usize,
        passes: impl FnOnce(&PassLog) -> Vec<Box<dyn RenderPass>>,
    ) -> Option<Self> {
        if !backend.is_available() {
            return None;
        }
        let _ = env_logger::builder().is_test(true).try_init();

        let dummy = Arc::new(DummyBackend::new());
        let log = PassLog::default();
        let mut system = RenderingSystem::new();
        for pass in passes(&log) {
            system
                .add_render_pass(pass)
                .expect("failed to register render pass");
        }
        system
            .initialize_system(
                dummy.clone(),
                RenderingConfig::default()
                    .with_frames_in_flight(frames_in_flight)
                    .with_validation(false),
            )
            .expect("failed to initialize rendering system");

        Some(Self {
            backend,
            dummy,
            system,
            log,
        })
    }

    /// Runs `count` frames, panicking on any error or termination request.
    pub fn run_frames(&mut self, count: usize) {
        for _ in 0..count {
            let terminate = self
                .system
                .update_system_synchronous(1.0 / 60.0)
                .expect("frame failed");
            assert!(!terminate, "system requested termination");
        }
    }

    /// Every dispatch recorded since the last `clear_calls`, as `(command buffer, x, y)`.
    #[allow(dead_code)]
    pub fn dispatches(&self) -> Vec<(CommandBufferHandle, u32, u32)> {
        self.dummy
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Dispatch {
                    command_buffer,
                    x,
                    y,
                    ..
                } => Some((command_buffer, x, y)),
                _ => None,
            })
            .collect()
    }

    /// Dispatch markers in recording order.
    #[allow(dead_code)]
    pub fn dispatch_markers(&self) -> Vec<u32> {
        self.dispatches().into_iter().map(|(_, x, _)| x).collect()
    }

    #[allow(dead_code)]
    pub fn events(&self) -> Vec<PassEvent> {
        self.log.lock().clone()
    }

    /// Releases the system and asserts nothing leaked.
    pub fn finish(mut self) {
        self.system.release_system();
        assert_eq!(self.dummy.live_object_count(), 0, "leaked backend objects");
        assert_eq!(self.dummy.invalid_destroy_count(), 0);
    }
}

/// Boxes a marker pass for registration.
pub fn marker_pass(
    name: &'static str,
    stage: RenderPassStage,
    marker: u32,
    log: &PassLog,
) -> Box<dyn RenderPass> {
    Box::new(MarkerPass::new(name, stage, marker, log))
}
