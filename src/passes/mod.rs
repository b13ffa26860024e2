//! Built-in render passes.
//!
//! Every pass takes its SPIR-V code at construction; nothing here compiles or
//! loads shaders. Render targets rest in the general layout between passes, so a
//! pass only records a memory barrier for the targets it reads before it reads them.
//!
//! | Pass                    | Stage                | Runs on path           |
//! |-------------------------|----------------------|------------------------|
//! | [`ShadowsPass`]         | Shadows              | Default                |
//! | [`LightingPass`]        | Lighting             | Default                |
//! | [`PathTracingPass`]     | PathTracing          | PathTracing            |
//! | [`DenoisingPass`]       | Denoising            | PathTracing            |
//! | [`TemporalAccumulationPass`] | TemporalAccumulation | Default, PathTracing |
//! | [`ToneMappingPass`]     | ToneMapping          | Default, PathTracing   |
//! | [`UserInterfacePass`]   | UserInterface        | any                    |
//! | [`ScreenPass`]          | Screen               | any                    |

mod denoising;
mod lighting;
mod path_tracing;
mod screen;
mod shadows;
mod temporal_accumulation;
mod tone_mapping;
mod user_interface;

pub use denoising::DenoisingPass;
pub use lighting::LightingPass;
pub use path_tracing::{PathTracingPass, PathTracingShaders};
pub use screen::ScreenPass;
pub use shadows::{ShadowCaster, ShadowsPass};
pub use temporal_accumulation::TemporalAccumulationPass;
pub use tone_mapping::{TonemapOperator, ToneMappingPass};
pub use user_interface::{UiMesh, UiVertex, UserInterfacePass};

use crate::backend::{ImageBarrier, ImageLayout};
use crate::render_pass::{FrameContext, FrameInfo};
use crate::resources::RenderTargetId;
use crate::RenderingPath;

/// SPIR-V of a fullscreen graphics pipeline.
#[derive(Debug, Clone, Default)]
pub struct FullscreenShaders {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

pub(crate) fn is_rasterizing(frame: &FrameInfo) -> bool {
    frame.rendering_path == RenderingPath::Default
}

pub(crate) fn is_path_tracing(frame: &FrameInfo) -> bool {
    frame.rendering_path == RenderingPath::PathTracing
}

pub(crate) fn is_producing_scene(frame: &FrameInfo) -> bool {
    frame.rendering_path != RenderingPath::None
}

/// Makes earlier writes to `targets` visible to the reads recorded after it.
pub(crate) fn read_barriers(frame: &FrameContext<'_>, targets: &[RenderTargetId]) {
    let backend = frame.device.backend();
    for id in targets {
        let Some(target) = frame.registry.get(*id) else {
            continue;
        };
        let Some(format) = target.format() else {
            continue;
        };
        backend.cmd_image_barrier(
            frame.command_buffer,
            &ImageBarrier {
                image: target.get(),
                format,
                old_layout: ImageLayout::General,
                new_layout: ImageLayout::General,
            },
        );
    }
}
