//! Deferred lighting of the scene features.

use std::any::Any;

use crate::backend::BackendResult;
use crate::pipeline::{ColorTarget, GraphicsPipeline, GraphicsPipelineParameters, ResourceBinding};
use crate::render_pass::{
    FrameContext, FrameInfo, RenderContext, RenderPass, RenderPassBase, RenderPassStage,
};
use crate::resources::{CommonSampler, RenderTargetId, SharedRenderTarget};

use super::{is_rasterizing, read_barriers, FullscreenShaders};

/// Shades the scene feature targets into the scene target.
///
/// Reads both feature targets, the shadow map and ambient occlusion.
pub struct LightingPass {
    base: RenderPassBase,
    shaders: FullscreenShaders,
    inputs: Vec<RenderTargetId>,
}

impl LightingPass {
    pub fn new(shaders: FullscreenShaders) -> Self {
        Self {
            base: RenderPassBase::new("Lighting", RenderPassStage::Lighting),
            shaders,
            inputs: Vec::new(),
        }
    }
}

impl RenderPass for LightingPass {
    fn base(&self) -> &RenderPassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RenderPassBase {
        &mut self.base
    }

    fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        self.inputs = vec![
            ctx.shared_target(SharedRenderTarget::SceneFeatures1),
            ctx.shared_target(SharedRenderTarget::SceneFeatures2),
            ctx.shared_target(SharedRenderTarget::ShadowMap),
            ctx.shared_target(SharedRenderTarget::AmbientOcclusion),
        ];
        let bindings = self
            .inputs
            .iter()
            .map(|&target| ResourceBinding::SampledTarget {
                target,
                sampler: CommonSampler::LinearClampToEdge,
            })
            .collect();

        let params = GraphicsPipelineParameters::fullscreen(
            "DeferredLighting",
            self.shaders.vertex.clone(),
            self.shaders.fragment.clone(),
        )
        .with_bindings(bindings)
        .with_color_target(ColorTarget::render_target(
            ctx.shared_target(SharedRenderTarget::Scene),
        ));

        self.base.set_number_of_pipelines(1);
        self.base.add_pipeline(GraphicsPipeline::new(params));
        Ok(())
    }

    fn should_render(&self, frame: &FrameInfo) -> bool {
        is_rasterizing(frame)
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
