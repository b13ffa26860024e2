//! Spatial denoising of the path traced scene.

use std::any::Any;

use crate::backend::BackendResult;
use crate::pipeline::{ComputePipeline, ComputePipelineParameters, DispatchSize, ResourceBinding};
use crate::render_pass::{
    FrameContext, FrameInfo, RenderContext, RenderPass, RenderPassBase, RenderPassStage,
};
use crate::resources::{CommonSampler, RenderTargetId, SharedRenderTarget};

use super::{is_path_tracing, read_barriers};

/// Edge-aware filter over the scene target, guided by the feature targets.
///
/// Filters the scene target in place, one 8x8 workgroup per tile.
pub struct DenoisingPass {
    base: RenderPassBase,
    shader: Vec<u32>,
    inputs: Vec<RenderTargetId>,
}

impl DenoisingPass {
    pub fn new(shader: Vec<u32>) -> Self {
        Self {
            base: RenderPassBase::new("Denoising", RenderPassStage::Denoising),
            shader,
            inputs: Vec::new(),
        }
    }
}

impl RenderPass for DenoisingPass {
    fn base(&self) -> &RenderPassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RenderPassBase {
        &mut self.base
    }

    fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        let scene = ctx.shared_target(SharedRenderTarget::Scene);
        let features1 = ctx.shared_target(SharedRenderTarget::SceneFeatures1);
        let features2 = ctx.shared_target(SharedRenderTarget::SceneFeatures2);
        self.inputs = vec![scene, features1, features2];

        self.base.set_number_of_pipelines(1);
        self.base
            .add_pipeline(ComputePipeline::new(ComputePipelineParameters {
                name: "Denoiser".to_string(),
                shader: self.shader.clone(),
                bindings: vec![
                    ResourceBinding::StorageTarget { target: scene },
                    ResourceBinding::SampledTarget {
                        target: features1,
                        sampler: CommonSampler::NearestClampToEdge,
                    },
                    ResourceBinding::SampledTarget {
                        target: features2,
                        sampler: CommonSampler::NearestClampToEdge,
                    },
                ],
                push_constant_ranges: Vec::new(),
                dispatch: DispatchSize::PerPixel {
                    local_size: (8, 8),
                    extent: None,
                },
            }));
        Ok(())
    }

    fn should_render(&self, frame: &FrameInfo) -> bool {
        is_path_tracing(frame)
    }

    fn pre_record(&mut self, frame: &FrameContext<'_>) {
        read_barriers(frame, &self.inputs);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
