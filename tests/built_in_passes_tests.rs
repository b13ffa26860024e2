//! Integration tests for the built-in render passes.
//!
//! The full chain is registered over the dummy backend and driven on both
//! rendering paths and across a resize, then released without leaks.

mod common;

use std::collections::HashSet;

use rstest::rstest;

use common::{Backend, TestContext, SPIRV_MAGIC};
use render_core::backend::{
    BufferUsage, CommandBufferHandle, MemoryProperty, RecordedCall, TextureFormat, Vertex,
};
use render_core::passes::{
    DenoisingPass, FullscreenShaders, LightingPass, PathTracingPass, PathTracingShaders,
    ScreenPass, ShadowCaster, ShadowsPass, TemporalAccumulationPass, ToneMappingPass, UiMesh,
    UserInterfacePass,
};
use render_core::{RenderPass, RenderingPath};

fn fullscreen() -> FullscreenShaders {
    FullscreenShaders {
        vertex: vec![SPIRV_MAGIC],
        fragment: vec![SPIRV_MAGIC],
    }
}

/// Registers every built-in pass, with geometry for the shadow caster and the overlay.
fn built_in_chain(backend: Backend, frames_in_flight: usize) -> Option<TestContext> {
    let mut ctx = TestContext::with_passes(backend, frames_in_flight, |_| {
        let passes: Vec<Box<dyn RenderPass>> = vec![
            Box::new(ShadowsPass::new(fullscreen())),
            Box::new(LightingPass::new(fullscreen())),
            Box::new(DenoisingPass::new(vec![SPIRV_MAGIC])),
            Box::new(TemporalAccumulationPass::new(vec![SPIRV_MAGIC])),
            Box::new(ToneMappingPass::new(fullscreen())),
            Box::new(ScreenPass::new(fullscreen())),
        ];
        passes
    })?;
    let system = &mut ctx.system;

    let vertices = [
        Vertex {
            position: [0.0, 0.0, 0.0],
            normal: [0.0, 0.0, 1.0],
            uv: [0.0, 0.0],
        },
        Vertex {
            position: [1.0, 0.0, 0.0],
            normal: [0.0, 0.0, 1.0],
            uv: [1.0, 0.0],
        },
        Vertex {
            position: [0.0, 1.0, 0.0],
            normal: [0.0, 0.0, 1.0],
            uv: [0.0, 1.0],
        },
    ];
    let model = system.create_model_buffers(&vertices, &[0, 1, 2]).unwrap();
    system
        .render_pass_mut::<ShadowsPass>()
        .unwrap()
        .set_caster(Some(ShadowCaster {
            vertex_buffer: model.vertex_buffer,
            index_buffer: model.index_buffer,
            index_count: model.index_count,
        }));

    let scene = system.create_top_level_acceleration_structure(&[]).unwrap();
    system
        .add_render_pass(Box::new(PathTracingPass::new(
            PathTracingShaders {
                ray_generation: vec![SPIRV_MAGIC],
                miss: vec![vec![SPIRV_MAGIC]],
                closest_hit: vec![vec![SPIRV_MAGIC]],
            },
            scene,
        )))
        .unwrap();

    let atlas = system
        .create_texture_2d(4, 4, TextureFormat::Rgba8Unorm, &[255; 64])
        .unwrap();
    let overlay_vertices = system
        .create_buffer(
            60,
            BufferUsage::VERTEX | BufferUsage::TRANSFER_DST,
            MemoryProperty::DEVICE_LOCAL,
        )
        .unwrap();
    system.upload_data_to_buffer(overlay_vertices, &[0; 60]).unwrap();
    let overlay_indices = system
        .create_buffer(
            12,
            BufferUsage::INDEX | BufferUsage::TRANSFER_DST,
            MemoryProperty::DEVICE_LOCAL,
        )
        .unwrap();
    system
        .upload_data_to_buffer(overlay_indices, bytemuck::cast_slice(&[0u32, 1, 2]))
        .unwrap();
    system
        .add_render_pass(Box::new(UserInterfacePass::new(fullscreen(), atlas.view)))
        .unwrap();
    system
        .render_pass_mut::<UserInterfacePass>()
        .unwrap()
        .set_mesh(Some(UiMesh {
            vertex_buffer: overlay_vertices,
            index_buffer: overlay_indices,
            index_count: 3,
        }));

    Some(ctx)
}

fn overlay_secondaries(ctx: &TestContext, frames_in_flight: usize) -> HashSet<CommandBufferHandle> {
    let overlay = ctx.system.render_pass::<UserInterfacePass>().unwrap();
    (0..frames_in_flight)
        .filter_map(|slot| overlay.secondary_command_buffer(slot))
        .collect()
}

#[derive(Debug, Default)]
struct FrameCalls {
    draws: usize,
    indexed_draws: Vec<CommandBufferHandle>,
    trace_rays: Vec<(u32, u32)>,
    executes: Vec<(CommandBufferHandle, Vec<CommandBufferHandle>)>,
}

fn frame_calls(ctx: &TestContext) -> FrameCalls {
    let mut calls = FrameCalls::default();
    for call in ctx.dummy.calls() {
        match call {
            RecordedCall::Draw { .. } => calls.draws += 1,
            RecordedCall::DrawIndexed { command_buffer, .. } => {
                calls.indexed_draws.push(command_buffer)
            }
            RecordedCall::TraceRays { width, height, .. } => calls.trace_rays.push((width, height)),
            RecordedCall::ExecuteCommands {
                command_buffer,
                secondary,
            } => calls.executes.push((command_buffer, secondary)),
            _ => {}
        }
    }
    calls
}

/// The rasterizing path draws the shadow caster and the overlay and traces nothing.
#[rstest]
#[case::dummy_double(Backend::Dummy, 2)]
#[case::dummy_triple(Backend::Dummy, 3)]
fn test_default_path_rasterizes(#[case] backend: Backend, #[case] frames_in_flight: usize) {
    let Some(mut ctx) = built_in_chain(backend, frames_in_flight) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let secondaries = overlay_secondaries(&ctx, frames_in_flight);
    assert_eq!(secondaries.len(), frames_in_flight);

    ctx.dummy.clear_calls();
    ctx.run_frames(frames_in_flight);
    let calls = frame_calls(&ctx);

    assert!(calls.trace_rays.is_empty());
    // Lighting, tone mapping and screen draw fullscreen triangles every frame.
    assert!(calls.draws >= 3 * frames_in_flight);
    let overlay_draws = calls
        .indexed_draws
        .iter()
        .filter(|command_buffer| secondaries.contains(command_buffer))
        .count();
    assert_eq!(overlay_draws, frames_in_flight);
    assert_eq!(calls.indexed_draws.len(), 2 * frames_in_flight);

    assert_eq!(calls.executes.len(), frames_in_flight);
    for (slot, (primary, executed)) in calls.executes.iter().enumerate() {
        assert_eq!(Some(*primary), ctx.system.frame_command_buffer(slot));
        assert!(executed.iter().all(|buffer| secondaries.contains(buffer)));
    }
    ctx.finish();
}

/// Switching to path tracing traces one ray grid per frame at the render resolution,
/// and a resize re-creates the tracer at the new extent.
#[rstest]
#[case::dummy_double(Backend::Dummy, 2)]
#[case::dummy_triple(Backend::Dummy, 3)]
fn test_path_tracing_survives_resize(#[case] backend: Backend, #[case] frames_in_flight: usize) {
    let Some(mut ctx) = built_in_chain(backend, frames_in_flight) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    ctx.run_frames(1);

    ctx.system.set_rendering_path(RenderingPath::PathTracing).unwrap();
    ctx.dummy.clear_calls();
    ctx.run_frames(3);
    let calls = frame_calls(&ctx);
    assert_eq!(calls.trace_rays.len(), 3);
    // Only the overlay still rasterizes geometry.
    let secondaries = overlay_secondaries(&ctx, frames_in_flight);
    assert!(calls
        .indexed_draws
        .iter()
        .all(|command_buffer| secondaries.contains(command_buffer)));

    ctx.system.resize(640, 360).unwrap();
    ctx.dummy.clear_calls();
    ctx.run_frames(2);
    let calls = frame_calls(&ctx);
    assert_eq!(calls.trace_rays, vec![(640, 360); 2]);
    assert_eq!(calls.executes.len(), 2);

    ctx.system.set_rendering_path(RenderingPath::Default).unwrap();
    ctx.dummy.clear_calls();
    ctx.run_frames(1);
    assert!(frame_calls(&ctx).trace_rays.is_empty());
    ctx.finish();
}
