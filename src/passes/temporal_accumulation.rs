//! Temporal accumulation over two ping-ponged history targets.

use std::any::Any;

use crate::backend::BackendResult;
use crate::pipeline::{ComputePipeline, ComputePipelineParameters, DispatchSize, ResourceBinding};
use crate::render_pass::{
    FrameContext, FrameInfo, RenderContext, RenderPass, RenderPassBase, RenderPassStage,
};
use crate::resources::{CommonSampler, RenderTargetId, SharedRenderTarget};

use super::{is_producing_scene, read_barriers};

/// Blends the scene target with the accumulated history.
///
/// Pipeline `i` reads history `i` and writes history `1 - i`. Exactly one of them
/// is included per frame, alternating with the frame counter.
pub struct TemporalAccumulationPass {
    base: RenderPassBase,
    shader: Vec<u32>,
    inputs: Vec<RenderTargetId>,
}

impl TemporalAccumulationPass {
    pub const HISTORY_SLOTS: usize = 2;

    pub fn new(shader: Vec<u32>) -> Self {
        Self {
            base: RenderPassBase::new("TemporalAccumulation", RenderPassStage::TemporalAccumulation),
            shader,
            inputs: Vec::new(),
        }
    }

    /// History slot read in the frame `total_frames`
    pub fn active_slot(total_frames: u64) -> usize {
        (total_frames % Self::HISTORY_SLOTS as u64) as usize
    }
}

impl RenderPass for TemporalAccumulationPass {
    fn base(&self) -> &RenderPassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RenderPassBase {
        &mut self.base
    }

    fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        let scene = ctx.shared_target(SharedRenderTarget::Scene);
        let history = [
            ctx.shared_target(SharedRenderTarget::TemporalHistoryA),
            ctx.shared_target(SharedRenderTarget::TemporalHistoryB),
        ];
        self.inputs = vec![scene, history[0], history[1]];

        self.base.set_number_of_pipelines(Self::HISTORY_SLOTS);
        for slot in 0..Self::HISTORY_SLOTS {
            let read = history[slot];
            let write = history[(slot + 1) % Self::HISTORY_SLOTS];
            self.base
                .add_pipeline(ComputePipeline::new(ComputePipelineParameters {
                    name: format!("TemporalAccumulation{}", slot),
                    shader: self.shader.clone(),
                    bindings: vec![
                        ResourceBinding::StorageTarget { target: scene },
                        ResourceBinding::SampledTarget {
                            target: read,
                            sampler: CommonSampler::LinearClampToEdge,
                        },
                        ResourceBinding::StorageTarget { target: write },
                    ],
                    push_constant_ranges: Vec::new(),
                    dispatch: DispatchSize::PerPixel {
                        local_size: (8, 8),
                        extent: None,
                    },
                }));
        }
        Ok(())
    }

    fn should_render(&self, frame: &FrameInfo) -> bool {
        is_producing_scene(frame)
    }

    fn pre_record(&mut self, frame: &FrameContext<'_>) {
        let active = Self::active_slot(frame.frame.total_frames);
        for (slot, pipeline) in self.base.pipelines_mut().iter_mut().enumerate() {
            pipeline.set_include_in_render(slot == active);
        }
        read_barriers(frame, &self.inputs);
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
    fn test_active_slot_alternates() {
        let slots: Vec<_> = (1..=4).map(TemporalAccumulationPass::active_slot).collect();
        assert_eq!(slots, [1, 0, 1, 0]);
    }
}
