//! Ray tracing pipelines. Only usable when the backend reports ray tracing support.

use crate::backend::{
    check_result, BackendError, BackendResult, PipelineBindPoint, PushConstantRange,
    RayTracingPipelineDescriptor, ShaderStage,
};
use crate::pipeline::{PipelineCore, ResourceBinding, StageModules};
use crate::render_pass::{FrameContext, RenderContext};
use crate::resolution::Resolution;

#[derive(Debug, Clone)]
pub struct RayTracingPipelineParameters {
    pub name: String,
    pub ray_generation: Vec<u32>,
    pub miss: Vec<Vec<u32>>,
    pub closest_hit: Vec<Vec<u32>>,
    pub bindings: Vec<ResourceBinding>,
    pub push_constant_ranges: Vec<PushConstantRange>,
    pub max_recursion_depth: u32,
    /// Ray grid size, the render resolution when `None`
    pub extent: Option<Resolution>,
}

pub struct RayTracingPipeline {
    pub(super) core: PipelineCore,
    params: RayTracingPipelineParameters,
    extent: Resolution,
}

impl RayTracingPipeline {
    pub fn new(mut params: RayTracingPipelineParameters) -> Self {
        let core = PipelineCore::new(
            params.name.clone(),
            std::mem::take(&mut params.bindings),
            std::mem::take(&mut params.push_constant_ranges),
        );
        Self {
            core,
            params,
            extent: Resolution::default(),
        }
    }

    pub fn extent(&self) -> Resolution {
        self.extent
    }

    pub(super) fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        if !ctx.capabilities.ray_tracing {
            return Err(BackendError::Unsupported(format!(
                "ray tracing pipeline '{}' on a backend without ray tracing",
                self.params.name
            )));
        }
        self.extent = self.params.extent.unwrap_or_else(|| ctx.resolution());

        let stages = ShaderStage::RAY_GENERATION | ShaderStage::RAY_MISS | ShaderStage::RAY_CLOSEST_HIT;
        let layout = self.core.create_layout(ctx, stages)?;

        let mut codes: Vec<&[u32]> = vec![&self.params.ray_generation];
        codes.extend(self.params.miss.iter().map(Vec::as_slice));
        codes.extend(self.params.closest_hit.iter().map(Vec::as_slice));
        let modules = StageModules::load(ctx.device, &codes)?;

        let miss_end = 1 + self.params.miss.len();
        let miss = modules.handles(1..miss_end);
        let closest_hit = modules.handles(miss_end..codes.len());
        let result = check_result(
            ctx.device
                .backend()
                .create_ray_tracing_pipeline(&RayTracingPipelineDescriptor {
                    label: Some(&self.params.name),
                    layout,
                    ray_generation: modules.handle(0),
                    miss: &miss,
                    closest_hit: &closest_hit,
                    max_recursion_depth: self.params.max_recursion_depth,
                }),
            "create ray tracing pipeline",
        );
        modules.release(ctx.device);
        self.core.finish_initialize(ctx, result?)
    }

    pub(super) fn execute(&self, frame: &FrameContext<'_>) {
        self.core.bind(frame, PipelineBindPoint::RayTracing);
        frame.device.backend().cmd_trace_rays(
            frame.command_buffer,
            self.extent.width,
            self.extent.height,
            1,
        );
    }
}
