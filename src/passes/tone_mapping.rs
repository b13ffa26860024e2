//! Tone mapping of the HDR scene into the 8-bit intermediate target.

use std::any::Any;

use bytemuck::{Pod, Zeroable};

use crate::backend::{BackendResult, PushConstantRange, ShaderStage};
use crate::pipeline::{ColorTarget, GraphicsPipeline, GraphicsPipelineParameters, ResourceBinding};
use crate::render_pass::{
    FrameContext, FrameInfo, RenderContext, RenderPass, RenderPassBase, RenderPassStage,
};
use crate::resources::{CommonSampler, RenderTargetId, SharedRenderTarget};

use super::{is_producing_scene, read_barriers, FullscreenShaders};

/// Tone mapping operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TonemapOperator {
    Reinhard,
    #[default]
    Aces,
    Uncharted2,
    None,
}

impl TonemapOperator {
    fn shader_index(self) -> u32 {
        match self {
            TonemapOperator::Reinhard => 0,
            TonemapOperator::Aces => 1,
            TonemapOperator::Uncharted2 => 2,
            TonemapOperator::None => 3,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct TonemapConstants {
    exposure: f32,
    gamma: f32,
    operator: u32,
    _padding: u32,
}

/// Maps the scene target to displayable range.
pub struct ToneMappingPass {
    base: RenderPassBase,
    shaders: FullscreenShaders,
    pub operator: TonemapOperator,
    pub exposure: f32,
    pub gamma: f32,
    input: Option<RenderTargetId>,
}

impl ToneMappingPass {
    pub fn new(shaders: FullscreenShaders) -> Self {
        Self {
            base: RenderPassBase::new("ToneMapping", RenderPassStage::ToneMapping),
            shaders,
            operator: TonemapOperator::Aces,
            exposure: 1.0,
            gamma: 2.2,
            input: None,
        }
    }

    fn constants(&self) -> TonemapConstants {
        TonemapConstants {
            exposure: self.exposure,
            gamma: self.gamma,
            operator: self.operator.shader_index(),
            _padding: 0,
        }
    }
}

impl RenderPass for ToneMappingPass {
    fn base(&self) -> &RenderPassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RenderPassBase {
        &mut self.base
    }

    fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        let scene = ctx.shared_target(SharedRenderTarget::Scene);
        self.input = Some(scene);

        let params = GraphicsPipelineParameters::fullscreen(
            "Tonemapping",
            self.shaders.vertex.clone(),
            self.shaders.fragment.clone(),
        )
        .with_bindings(vec![ResourceBinding::SampledTarget {
            target: scene,
            sampler: CommonSampler::NearestClampToEdge,
        }])
        .with_push_constants(vec![PushConstantRange {
            stages: ShaderStage::FRAGMENT,
            offset: 0,
            size: std::mem::size_of::<TonemapConstants>() as u32,
        }])
        .with_color_target(ColorTarget::render_target(
            ctx.shared_target(SharedRenderTarget::IntermediateRgba8),
        ));

        self.base.set_number_of_pipelines(1);
        self.base.add_pipeline(GraphicsPipeline::new(params));
        Ok(())
    }

    fn should_render(&self, frame: &FrameInfo) -> bool {
        is_producing_scene(frame)
    }

    fn pre_record(&mut self, frame: &FrameContext<'_>) {
        let constants = self.constants();
        if let Some(pipeline) = self.base.pipeline_mut(0) {
            pipeline.set_push_constants(bytemuck::bytes_of(&constants));
        }
        if let Some(input) = self.input {
            read_barriers(frame, &[input]);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tonemap_defaults() {
        let pass = ToneMappingPass::new(FullscreenShaders::default());
        assert_eq!(pass.operator, TonemapOperator::Aces);
        assert_eq!(pass.constants().operator, 1);
        assert_eq!(std::mem::size_of::<TonemapConstants>(), 16);
    }
}
