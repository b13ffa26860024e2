//! Shadow map rendering.

use std::any::Any;

use glam::Mat4;

use crate::backend::{
    BackendResult, BufferHandle, CullMode, DepthState, IndexFormat, PushConstantRange, ShaderStage,
    TextureFormat, Vertex,
};
use crate::pipeline::{
    ColorTarget, DepthTarget, DrawCommand, GraphicsPipeline, GraphicsPipelineParameters, Pipeline,
};
use crate::render_pass::{FrameInfo, RenderContext, RenderPass, RenderPassBase, RenderPassStage};
use crate::resources::{RenderTargetId, SharedRenderTarget, SHADOW_MAP_RESOLUTION};
use crate::resolution::Resolution;

use super::{is_rasterizing, FullscreenShaders};

/// Geometry drawn into the shadow map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowCaster {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

/// Renders light-space depth of the shadow casters into the shared shadow map.
///
/// The pass owns a depth target for depth testing; the shared shadow map receives
/// the fragment shader's output.
pub struct ShadowsPass {
    base: RenderPassBase,
    shaders: FullscreenShaders,
    light_view_projection: Mat4,
    caster: Option<ShadowCaster>,
    depth: Option<RenderTargetId>,
}

impl ShadowsPass {
    pub fn new(shaders: FullscreenShaders) -> Self {
        Self {
            base: RenderPassBase::new("Shadows", RenderPassStage::Shadows),
            shaders,
            light_view_projection: Mat4::IDENTITY,
            caster: None,
            depth: None,
        }
    }

    /// Sets the geometry drawn from the next frame on.
    pub fn set_caster(&mut self, caster: Option<ShadowCaster>) {
        self.caster = caster;
        let draw = match caster {
            Some(caster) => DrawCommand::Indexed {
                vertex_buffer: caster.vertex_buffer,
                index_buffer: caster.index_buffer,
                index_format: IndexFormat::Uint32,
                index_count: caster.index_count,
                instance_count: 1,
            },
            None => DrawCommand::Vertices {
                vertex_count: 0,
                instance_count: 0,
            },
        };
        if let Some(Pipeline::Graphics(pipeline)) = self.base.pipeline_mut(0) {
            pipeline.set_draw(draw);
        }
    }

    pub fn set_light_view_projection(&mut self, matrix: Mat4) {
        self.light_view_projection = matrix;
        if let Some(pipeline) = self.base.pipeline_mut(0) {
            pipeline.set_push_constants(bytemuck::bytes_of(&matrix));
        }
    }
}

impl RenderPass for ShadowsPass {
    fn base(&self) -> &RenderPassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RenderPassBase {
        &mut self.base
    }

    fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        let depth = ctx.registry.create(
            ctx.device,
            ctx.allocator,
            Resolution::new(SHADOW_MAP_RESOLUTION, SHADOW_MAP_RESOLUTION),
            TextureFormat::Depth32Float,
        )?;
        self.depth = Some(depth);
        ctx.registry.transition_to_general(ctx.device, &[depth])?;

        let mut params = GraphicsPipelineParameters::fullscreen(
            "ShadowMap",
            self.shaders.vertex.clone(),
            self.shaders.fragment.clone(),
        )
        .with_push_constants(vec![PushConstantRange {
            stages: ShaderStage::VERTEX,
            offset: 0,
            size: std::mem::size_of::<Mat4>() as u32,
        }])
        .with_color_target(
            ColorTarget::render_target(ctx.shared_target(SharedRenderTarget::ShadowMap))
                .with_clear_color([1.0, 1.0, 1.0, 1.0]),
        )
        .with_depth_target(DepthTarget::new(depth));
        params.vertex_bindings = vec![Vertex::binding()];
        params.vertex_attributes = Vertex::attributes().to_vec();
        params.cull_mode = CullMode::Front;
        params.depth = DepthState::less();

        self.base.set_number_of_pipelines(1);
        self.base.add_pipeline(GraphicsPipeline::new(params));
        let caster = self.caster;
        self.set_caster(caster);
        let matrix = self.light_view_projection;
        self.set_light_view_projection(matrix);
        Ok(())
    }

    fn should_render(&self, frame: &FrameInfo) -> bool {
        is_rasterizing(frame) && self.caster.is_some()
    }

    fn on_terminate(&mut self, ctx: &mut RenderContext<'_>) {
        if let Some(depth) = self.depth.take() {
            ctx.registry.destroy(depth, ctx.device, ctx.allocator);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
