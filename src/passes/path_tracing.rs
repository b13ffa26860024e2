//! Ray traced scene radiance.

use std::any::Any;

use crate::backend::{AccelerationStructureHandle, BackendResult};
use crate::pipeline::{RayTracingPipeline, RayTracingPipelineParameters, ResourceBinding};
use crate::render_pass::{FrameInfo, RenderContext, RenderPass, RenderPassBase, RenderPassStage};
use crate::resources::SharedRenderTarget;

use super::is_path_tracing;

/// SPIR-V of the path tracing pipeline.
#[derive(Debug, Clone, Default)]
pub struct PathTracingShaders {
    pub ray_generation: Vec<u32>,
    pub miss: Vec<Vec<u32>>,
    pub closest_hit: Vec<Vec<u32>>,
}

/// Traces the scene into the scene target and its feature targets.
///
/// On a backend without ray tracing the pass initializes without pipelines and
/// records nothing.
pub struct PathTracingPass {
    base: RenderPassBase,
    shaders: PathTracingShaders,
    scene: AccelerationStructureHandle,
    max_bounces: u32,
}

impl PathTracingPass {
    pub fn new(shaders: PathTracingShaders, scene: AccelerationStructureHandle) -> Self {
        Self {
            base: RenderPassBase::new("PathTracing", RenderPassStage::PathTracing),
            shaders,
            scene,
            max_bounces: 4,
        }
    }

    /// Recursion depth of the pipeline. Takes effect at the next initialize.
    pub fn with_max_bounces(mut self, bounces: u32) -> Self {
        self.max_bounces = bounces;
        self
    }
}

impl RenderPass for PathTracingPass {
    fn base(&self) -> &RenderPassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RenderPassBase {
        &mut self.base
    }

    fn initialize(&mut self, ctx: &mut RenderContext<'_>) -> BackendResult<()> {
        self.base.set_number_of_pipelines(1);
        if !ctx.capabilities.ray_tracing {
            log::warn!("Backend has no ray tracing support, path tracing pass stays empty");
            return Ok(());
        }

        let bindings = vec![
            ResourceBinding::AccelerationStructure {
                structure: self.scene,
            },
            ResourceBinding::StorageTarget {
                target: ctx.shared_target(SharedRenderTarget::Scene),
            },
            ResourceBinding::StorageTarget {
                target: ctx.shared_target(SharedRenderTarget::SceneFeatures1),
            },
            ResourceBinding::StorageTarget {
                target: ctx.shared_target(SharedRenderTarget::SceneFeatures2),
            },
        ];
        self.base
            .add_pipeline(RayTracingPipeline::new(RayTracingPipelineParameters {
                name: "PathTracer".to_string(),
                ray_generation: self.shaders.ray_generation.clone(),
                miss: self.shaders.miss.clone(),
                closest_hit: self.shaders.closest_hit.clone(),
                bindings,
                push_constant_ranges: Vec::new(),
                max_recursion_depth: self.max_bounces,
                extent: None,
            }));
        Ok(())
    }

    fn should_render(&self, frame: &FrameInfo) -> bool {
        is_path_tracing(frame)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
