//! Overlay geometry composited over the tone mapped image.

use std::any::Any;

use bytemuck::{Pod, Zeroable};

use crate::backend::{
    BackendResult, BlendState, BufferHandle, CommandBufferHandle, ImageViewHandle, IndexFormat,
    LoadOp, PushConstantRange, ShaderStage, VertexFormat, VertexInputAttribute, VertexInputBinding,
    VertexInputRate,
};
use crate::pipeline::{
    ColorTarget, DrawCommand, GraphicsPipeline, GraphicsPipelineParameters, Pipeline,
    ResourceBinding,
};
use crate::render_pass::{FrameInfo, RenderContext, RenderPass, RenderPassBase, RenderPassStage};
use crate::resources::{CommandBuffer, CommonSampler, SharedRenderTarget};

use super::FullscreenShaders;

/// Vertex layout of overlay meshes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UiVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    /// Packed RGBA8
    pub color: u32,
}

impl UiVertex {
    pub fn binding() -> VertexInputBinding {
        VertexInputBinding {
            binding: 0,
            stride: std::mem::size_of::<UiVertex>() as u32,
            rate: VertexInputRate::Vertex,
        }
    }

    pub fn attributes() -> [VertexInputAttribute; 3] {
        [
            VertexInputAttribute {
                location: 0,
                binding: 0,
                format: VertexFormat::Float32x2,
                offset: 0,
            },
            VertexInputAttribute {
                location: 1,
                binding: 0,
                format: VertexFormat::Float32x2,
                offset: 8,
            },
            VertexInputAttribute {
                location: 2,
                binding: 0,
                format: VertexFormat::Uint32,
                offset: 16,
            },
        ]
    }
}

/// One overlay mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiMesh {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

/// Alpha-blends overlay meshes over the intermediate target.
///
/// The font atlas view is bound at initialize. The overlay is recorded into a
/// secondary command buffer per frame in flight, executed from the frame's
/// primary buffer.
pub struct UserInterfacePass {
    base: RenderPassBase,
    shaders: FullscreenShaders,
    font_atlas: ImageViewHandle,
    mesh: Option<UiMesh>,
}

impl UserInterfacePass {
    pub fn new(shaders: FullscreenShaders, font_atlas: ImageViewHandle) -> Self {
        Self {
            base: RenderPassBase::new("UserInterface", RenderPassStage::UserInterface),
            shaders,
            font_atlas,
            mesh: None,
        }
    }

    /// Sets the mesh drawn from the next frame on. `None` skips the pass.
    pub fn set_mesh(&mut self, mesh: Option<UiMesh>) {
        self.mesh = mesh;
        let Some(mesh) = mesh else {
            return;
        };
        if let Some(Pipeline::Graphics(pipeline)) = self.base.pipeline_mut(0) {
            pipeline.set_draw(DrawCommand::Indexed {
                vertex_buffer: mesh.vertex_buffer,
                index_buffer: mesh.index_buffer,
                index_format: IndexFormat::Uint32,
                index_count: mesh.index_count,
                instance_count: 1,
            });
        }
    }

    /// Secondary command buffer the overlay of frame slot `frame_index` is recorded into
    pub fn secondary_command_buffer(&self, frame_index: usize) -> Option<CommandBufferHandle> {
        self.base
            .frame_resources()
            .command_buffer(frame_index)
            .map(CommandBuffer::get)
    }
}

impl RenderPass for UserInterfacePass {
    fn base(&self) -> &RenderPassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RenderPassBase {
        &mut self.base
    }

    fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        for frame_index in 0..ctx.frames_in_flight {
            self.base.frame_resources_mut().secondary_command_buffer(
                ctx.device,
                ctx.command_pool,
                frame_index,
            )?;
        }

        let mut params = GraphicsPipelineParameters::fullscreen(
            "UserInterface",
            self.shaders.vertex.clone(),
            self.shaders.fragment.clone(),
        )
        .with_bindings(vec![ResourceBinding::SampledTexture {
            view: self.font_atlas,
            sampler: CommonSampler::LinearClampToEdge,
        }])
        .with_push_constants(vec![PushConstantRange {
            stages: ShaderStage::VERTEX,
            offset: 0,
            size: 8,
        }])
        .with_color_target(
            ColorTarget::render_target(ctx.shared_target(SharedRenderTarget::IntermediateRgba8))
                .with_load(LoadOp::Load),
        );
        params.vertex_bindings = vec![UiVertex::binding()];
        params.vertex_attributes = UiVertex::attributes().to_vec();
        params.blend = BlendState::alpha_blending();

        self.base.set_number_of_pipelines(1);
        self.base.add_pipeline(GraphicsPipeline::new(params));

        // Screen size in points, consumed by the vertex shader.
        let screen = ctx.resolution().as_vec2();
        if let Some(pipeline) = self.base.pipeline_mut(0) {
            pipeline.set_push_constants(bytemuck::bytes_of(&screen));
        }
        let mesh = self.mesh;
        self.set_mesh(mesh);
        Ok(())
    }

    fn should_render(&self, _frame: &FrameInfo) -> bool {
        self.mesh.is_some()
    }

    fn records_into_secondary(&self) -> bool {
        true
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
    fn test_ui_vertex_layout() {
        assert_eq!(UiVertex::binding().stride, 20);
        assert_eq!(UiVertex::attributes()[2].offset, 16);
    }
}
