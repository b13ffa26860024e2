//! Compute pipelines.

use crate::backend::{
    check_result, BackendResult, ComputePipelineDescriptor, PipelineBindPoint, PushConstantRange,
    ShaderStage,
};
use crate::pipeline::{PipelineCore, ResourceBinding, StageModules};
use crate::render_pass::{FrameContext, RenderContext};
use crate::resolution::Resolution;

/// How many workgroups a compute pipeline dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchSize {
    Groups { x: u32, y: u32, z: u32 },
    /// Enough `local_size` groups to cover every pixel of `extent`, or of the render
    /// resolution when `extent` is `None`.
    PerPixel {
        local_size: (u32, u32),
        extent: Option<Resolution>,
    },
}

impl DispatchSize {
    fn groups(self, resolution: Resolution) -> [u32; 3] {
        match self {
            DispatchSize::Groups { x, y, z } => [x, y, z],
            DispatchSize::PerPixel { local_size, extent } => {
                let extent = extent.unwrap_or(resolution);
                [
                    extent.width.div_ceil(local_size.0.max(1)),
                    extent.height.div_ceil(local_size.1.max(1)),
                    1,
                ]
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComputePipelineParameters {
    pub name: String,
    pub shader: Vec<u32>,
    pub bindings: Vec<ResourceBinding>,
    pub push_constant_ranges: Vec<PushConstantRange>,
    pub dispatch: DispatchSize,
}

pub struct ComputePipeline {
    pub(super) core: PipelineCore,
    shader: Vec<u32>,
    dispatch: DispatchSize,
    groups: [u32; 3],
}

impl ComputePipeline {
    pub fn new(params: ComputePipelineParameters) -> Self {
        Self {
            core: PipelineCore::new(params.name, params.bindings, params.push_constant_ranges),
            shader: params.shader,
            dispatch: params.dispatch,
            groups: [0; 3],
        }
    }

    /// Workgroup counts resolved at initialize
    pub fn groups(&self) -> [u32; 3] {
        self.groups
    }

    pub(super) fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        self.groups = self.dispatch.groups(ctx.resolution());
        let layout = self.core.create_layout(ctx, ShaderStage::COMPUTE)?;
        let modules = StageModules::load(ctx.device, &[&self.shader])?;
        let result = check_result(
            ctx.device
                .backend()
                .create_compute_pipeline(&ComputePipelineDescriptor {
                    label: Some(&self.core.name),
                    layout,
                    shader: modules.handle(0),
                }),
            "create compute pipeline",
        );
        modules.release(ctx.device);
        self.core.finish_initialize(ctx, result?)
    }

    pub(super) fn execute(&self, frame: &FrameContext<'_>) {
        self.core.bind(frame, PipelineBindPoint::Compute);
        let [x, y, z] = self.groups;
        frame
            .device
            .backend()
            .cmd_dispatch(frame.command_buffer, x, y, z);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_pixel_dispatch_rounds_up() {
        let dispatch = DispatchSize::PerPixel {
            local_size: (8, 8),
            extent: None,
        };
        assert_eq!(dispatch.groups(Resolution::new(1280, 722)), [160, 91, 1]);

        let fixed = DispatchSize::PerPixel {
            local_size: (16, 16),
            extent: Some(Resolution::new(17, 16)),
        };
        assert_eq!(fixed.groups(Resolution::new(1280, 720)), [2, 1, 1]);
    }

    #[test]
    fn test_fixed_groups() {
        let dispatch = DispatchSize::Groups { x: 4, y: 2, z: 1 };
        assert_eq!(dispatch.groups(Resolution::new(1, 1)), [4, 2, 1]);
    }
}
