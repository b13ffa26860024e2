//! Final blit to the swapchain image.

use std::any::Any;

use crate::backend::{BackendResult, ImageBarrier, ImageLayout};
use crate::pipeline::{ColorTarget, GraphicsPipeline, GraphicsPipelineParameters, ResourceBinding};
use crate::render_pass::{FrameContext, RenderContext, RenderPass, RenderPassBase, RenderPassStage};
use crate::resources::{CommonSampler, RenderTargetId, SharedRenderTarget};

use super::{read_barriers, FullscreenShaders};

/// Copies the intermediate target to the acquired swapchain image and leaves the
/// image ready to present. Runs on every rendering path.
pub struct ScreenPass {
    base: RenderPassBase,
    shaders: FullscreenShaders,
    input: Option<RenderTargetId>,
}

impl ScreenPass {
    pub fn new(shaders: FullscreenShaders) -> Self {
        Self {
            base: RenderPassBase::new("Screen", RenderPassStage::Screen),
            shaders,
            input: None,
        }
    }

    fn swapchain_barrier(frame: &FrameContext<'_>, old_layout: ImageLayout, new_layout: ImageLayout) {
        frame.device.backend().cmd_image_barrier(
            frame.command_buffer,
            &ImageBarrier {
                image: frame.swapchain_image,
                format: frame.swapchain_format,
                old_layout,
                new_layout,
            },
        );
    }
}

impl RenderPass for ScreenPass {
    fn base(&self) -> &RenderPassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RenderPassBase {
        &mut self.base
    }

    fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        let input = ctx.shared_target(SharedRenderTarget::IntermediateRgba8);
        self.input = Some(input);

        let params = GraphicsPipelineParameters::fullscreen(
            "Screen",
            self.shaders.vertex.clone(),
            self.shaders.fragment.clone(),
        )
        .with_bindings(vec![ResourceBinding::SampledTarget {
            target: input,
            sampler: CommonSampler::LinearClampToEdge,
        }])
        .with_color_target(ColorTarget::swapchain());

        self.base.set_number_of_pipelines(1);
        self.base.add_pipeline(GraphicsPipeline::new(params));
        Ok(())
    }

    fn pre_record(&mut self, frame: &FrameContext<'_>) {
        if let Some(input) = self.input {
            read_barriers(frame, &[input]);
        }
        Self::swapchain_barrier(frame, ImageLayout::Undefined, ImageLayout::General);
    }

    fn post_record(&mut self, frame: &FrameContext<'_>) {
        Self::swapchain_barrier(frame, ImageLayout::General, ImageLayout::PresentSrc);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
