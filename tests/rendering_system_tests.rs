//! Integration tests for the rendering system's frame loop.
//!
//! Tests are parameterized with `rstest` over the backend and the number of
//! frames in flight. Backends that are not available are skipped.
//!
//! # Test Categories
//!
//! - **Frame slots**: round-robin slot use and fence waits before slot reuse
//! - **Pass ordering**: stage order, insert-before and pipeline insertion order
//! - **Pass control**: per-frame enable predicate and rendering path switches
//! - **Uniforms**: per-slot mirrors of CPU-side data
//! - **Lifetime**: deferred destruction, resize, surface loss and teardown

mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use rstest::rstest;

use common::{marker_pass, Backend, MarkerPass, TestContext};
use render_core::backend::{
    BackendError, DummyBackend, DummyFault, DummyObjectKind, MemoryClass, RecordedCall,
    TextureFormat,
};
use render_core::{RenderPassStage, RenderingConfig, RenderingPath, RenderingSystem};

// ============================================================================
// Frame Slots
// ============================================================================

/// One pass with one pipeline, five frames: the pipeline executes once per frame
/// and the slot index cycles through the frames in flight.
#[rstest]
#[case::dummy_double(Backend::Dummy, 2, vec![0, 1, 0, 1, 0])]
#[case::dummy_triple(Backend::Dummy, 3, vec![0, 1, 2, 0, 1])]
#[case::vulkan_double(Backend::Vulkan, 2, vec![0, 1, 0, 1, 0])]
fn test_pipeline_executes_once_per_frame(
    #[case] backend: Backend,
    #[case] frames_in_flight: usize,
    #[case] expected_slots: Vec<usize>,
) {
    let Some(mut ctx) = TestContext::with_passes(backend, frames_in_flight, |log| {
        vec![marker_pass("Scene", RenderPassStage::Lighting, 7, log)]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    ctx.dummy.clear_calls();

    ctx.run_frames(5);

    let slots: Vec<usize> = ctx.events().iter().map(|e| e.frame_index).collect();
    assert_eq!(slots, expected_slots);
    let totals: Vec<u64> = ctx.events().iter().map(|e| e.total_frames).collect();
    assert_eq!(totals, vec![1, 2, 3, 4, 5]);

    let dispatches = ctx.dispatches();
    assert_eq!(dispatches.len(), 5);
    for ((command_buffer, marker, _), slot) in dispatches.into_iter().zip(expected_slots) {
        assert_eq!(marker, 7);
        assert_eq!(Some(command_buffer), ctx.system.frame_command_buffer(slot));
    }
    ctx.finish();
}

/// A slot's command buffer is never re-recorded while its last submission's
/// fence has not been waited on.
#[rstest]
#[case::dummy_double(Backend::Dummy, 2)]
#[case::dummy_triple(Backend::Dummy, 3)]
fn test_slot_fence_waited_before_reuse(#[case] backend: Backend, #[case] frames_in_flight: usize) {
    let Some(mut ctx) = TestContext::with_passes(backend, frames_in_flight, |log| {
        vec![marker_pass("Scene", RenderPassStage::Lighting, 1, log)]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    ctx.dummy.clear_calls();
    ctx.run_frames(7);

    let slots: Vec<_> = (0..frames_in_flight)
        .map(|slot| {
            (
                ctx.system.frame_command_buffer(slot).unwrap(),
                ctx.system.frame_fence(slot).unwrap(),
            )
        })
        .collect();

    let mut outstanding = HashSet::new();
    let mut recorded = 0;
    for call in ctx.dummy.calls() {
        match call {
            RecordedCall::Submit {
                fence: Some(fence), ..
            } => {
                outstanding.insert(fence);
            }
            RecordedCall::WaitFence { fence } => {
                outstanding.remove(&fence);
            }
            RecordedCall::BeginCommandBuffer { command_buffer } => {
                if let Some((_, fence)) = slots.iter().find(|(cb, _)| *cb == command_buffer) {
                    assert!(
                        !outstanding.contains(fence),
                        "slot command buffer re-recorded while in flight"
                    );
                    recorded += 1;
                }
            }
            _ => {}
        }
    }
    assert_eq!(recorded, 7);
    ctx.finish();
}

/// A frame that fails after acquire hands its slot back: the fence is signaled
/// again by an empty submission and every later frame renders.
#[rstest]
#[case::end_double(Backend::Dummy, 2, DummyFault::EndCommandBuffer)]
#[case::end_triple(Backend::Dummy, 3, DummyFault::EndCommandBuffer)]
#[case::submit_double(Backend::Dummy, 2, DummyFault::Submit)]
#[case::submit_triple(Backend::Dummy, 3, DummyFault::Submit)]
fn test_failed_frame_releases_its_slot(
    #[case] backend: Backend,
    #[case] frames_in_flight: usize,
    #[case] fault: DummyFault,
) {
    let Some(mut ctx) = TestContext::with_passes(backend, frames_in_flight, |log| {
        vec![marker_pass("Scene", RenderPassStage::Lighting, 3, log)]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    ctx.run_frames(1);

    ctx.dummy.clear_calls();
    ctx.dummy.inject_fault(fault);
    assert!(ctx.system.update_system_synchronous(1.0 / 60.0).is_err());

    let failed_slot = 1 % frames_in_flight;
    let fence = ctx.system.frame_fence(failed_slot).unwrap();
    let recovered = ctx.dummy.calls().iter().any(|call| {
        matches!(
            call,
            RecordedCall::Submit { command_buffers, fence: Some(f), wait_semaphores, .. }
                if command_buffers.is_empty() && *f == fence && wait_semaphores.len() == 1
        )
    });
    assert!(recovered, "failed slot was not handed back");

    ctx.dummy.clear_calls();
    ctx.run_frames(2 * frames_in_flight);
    assert_eq!(ctx.dispatch_markers(), vec![3; 2 * frames_in_flight]);
    assert_eq!(ctx.system.total_frames(), 2 + 2 * frames_in_flight as u64);
    ctx.finish();
}

// ============================================================================
// Pass Ordering
// ============================================================================

#[rstest]
#[case::dummy_double(Backend::Dummy, 2)]
#[case::dummy_triple(Backend::Dummy, 3)]
fn test_passes_execute_in_stage_order(#[case] backend: Backend, #[case] frames_in_flight: usize) {
    let Some(mut ctx) = TestContext::with_passes(backend, frames_in_flight, |log| {
        vec![
            marker_pass("Screen", RenderPassStage::Screen, 5, log),
            marker_pass("Shadows", RenderPassStage::Shadows, 1, log),
            marker_pass("ToneMapping", RenderPassStage::ToneMapping, 3, log),
            marker_pass("Lighting", RenderPassStage::Lighting, 2, log),
            marker_pass("UserInterface", RenderPassStage::UserInterface, 4, log),
        ]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let stages: Vec<_> = ctx.system.render_passes().map(|p| p.base().stage()).collect();
    assert!(stages.windows(2).all(|pair| pair[0] <= pair[1]));

    ctx.dummy.clear_calls();
    ctx.run_frames(2);
    assert_eq!(ctx.dispatch_markers(), vec![1, 2, 3, 4, 5, 1, 2, 3, 4, 5]);
    ctx.finish();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_equal_stages_keep_registration_order(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::with_passes(backend, 2, |log| {
        vec![
            marker_pass("First", RenderPassStage::Lighting, 1, log),
            marker_pass("Late", RenderPassStage::Screen, 3, log),
            marker_pass("Second", RenderPassStage::Lighting, 2, log),
        ]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    ctx.dummy.clear_calls();
    ctx.run_frames(1);
    assert_eq!(ctx.dispatch_markers(), vec![1, 2, 3]);
    ctx.finish();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_insert_render_pass_before_stage(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::with_passes(backend, 2, |log| {
        vec![
            marker_pass("Shadows", RenderPassStage::Shadows, 1, log),
            marker_pass("ToneMapping", RenderPassStage::ToneMapping, 3, log),
        ]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let bloom = MarkerPass::new("Bloom", RenderPassStage::Bloom, 2, &ctx.log);
    let initialized = bloom.initialization_counter();
    ctx.system
        .insert_render_pass_before(RenderPassStage::ToneMapping, Box::new(bloom))
        .unwrap();
    // Added to a running system: initialized on insertion
    assert_eq!(initialized.load(Ordering::SeqCst), 1);

    // No pass of this stage yet: appended
    let screen = MarkerPass::new("Screen", RenderPassStage::Screen, 4, &ctx.log);
    ctx.system
        .insert_render_pass_before(RenderPassStage::Screen, Box::new(screen))
        .unwrap();

    let names: Vec<_> = ctx
        .system
        .render_passes()
        .map(|p| p.base().name().to_string())
        .collect();
    assert_eq!(names, ["Shadows", "Bloom", "ToneMapping", "Screen"]);

    ctx.dummy.clear_calls();
    ctx.run_frames(1);
    assert_eq!(ctx.dispatch_markers(), vec![1, 2, 3, 4]);
    ctx.finish();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_pipelines_execute_in_insertion_order(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::with_passes(backend, 2, |log| {
        vec![MarkerPass::new("Multi", RenderPassStage::Lighting, 9, log)
            .with_pipelines(3)
            .boxed()]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    ctx.dummy.clear_calls();
    ctx.run_frames(1);

    let order: Vec<u32> = ctx.dispatches().into_iter().map(|(_, _, y)| y).collect();
    assert_eq!(order, vec![1, 2, 3]);
    ctx.finish();
}

// ============================================================================
// Pass Control
// ============================================================================

/// A pass whose predicate is false records none of its pipelines that frame
/// while the other passes still execute.
#[rstest]
#[case::dummy_double(Backend::Dummy, 2)]
#[case::dummy_triple(Backend::Dummy, 3)]
fn test_disabled_pass_records_nothing(#[case] backend: Backend, #[case] frames_in_flight: usize) {
    let mut flag = None;
    let Some(mut ctx) = TestContext::with_passes(backend, frames_in_flight, |log| {
        let lighting = MarkerPass::new("Lighting", RenderPassStage::Lighting, 1, log).with_pipelines(2);
        flag = Some(lighting.enabled_flag());
        vec![
            lighting.boxed(),
            marker_pass("ToneMapping", RenderPassStage::ToneMapping, 2, log),
        ]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let flag = flag.unwrap();

    flag.store(false, Ordering::SeqCst);
    ctx.dummy.clear_calls();
    ctx.run_frames(1);
    assert_eq!(ctx.dispatch_markers(), vec![2]);
    let lighting = ctx
        .system
        .render_passes()
        .find(|p| p.base().name() == "Lighting")
        .unwrap();
    assert!(!lighting.base().is_enabled());

    flag.store(true, Ordering::SeqCst);
    ctx.dummy.clear_calls();
    ctx.run_frames(1);
    assert_eq!(ctx.dispatch_markers(), vec![1, 1, 2]);
    ctx.finish();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_rendering_path_switch_reinitializes_passes(#[case] backend: Backend) {
    let mut counters = None;
    let Some(mut ctx) = TestContext::with_passes(backend, 2, |log| {
        let scene = MarkerPass::new("Scene", RenderPassStage::Lighting, 1, log)
            .only_on(RenderingPath::Default);
        counters = Some((scene.initialization_counter(), scene.termination_counter()));
        vec![
            scene.boxed(),
            marker_pass("Screen", RenderPassStage::Screen, 2, log),
        ]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let (initialized, terminated) = counters.unwrap();

    ctx.dummy.clear_calls();
    ctx.run_frames(1);
    assert_eq!(ctx.dispatch_markers(), vec![1, 2]);

    ctx.system.set_rendering_path(RenderingPath::None).unwrap();
    assert_eq!(ctx.system.rendering_path(), RenderingPath::None);
    assert_eq!(initialized.load(Ordering::SeqCst), 2);
    assert_eq!(terminated.load(Ordering::SeqCst), 1);

    ctx.dummy.clear_calls();
    ctx.run_frames(1);
    assert_eq!(ctx.dispatch_markers(), vec![2]);

    // Same path again is a no-op
    ctx.system.set_rendering_path(RenderingPath::None).unwrap();
    assert_eq!(initialized.load(Ordering::SeqCst), 2);
    ctx.finish();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_failed_pass_initialization_rolls_back(#[case] backend: Backend) {
    if !backend.is_available() {
        return;
    }
    let dummy = Arc::new(DummyBackend::new());
    let log = common::PassLog::default();
    let healthy = MarkerPass::new("Healthy", RenderPassStage::Shadows, 1, &log);
    let terminated = healthy.termination_counter();

    let mut system = RenderingSystem::new();
    system.add_render_pass(Box::new(healthy)).unwrap();
    system
        .add_render_pass(Box::new(
            MarkerPass::new("Broken", RenderPassStage::Lighting, 2, &log).failing(),
        ))
        .unwrap();

    let result = system.initialize_system(dummy.clone(), RenderingConfig::default());
    assert!(matches!(result, Err(BackendError::InvalidParameter(_))));
    assert_eq!(terminated.load(Ordering::SeqCst), 1);
    assert_eq!(dummy.live_object_count(), 0);
    assert_eq!(dummy.invalid_destroy_count(), 0);
}

/// Passes wait on their CPU-side dependencies before recording, and only on
/// frames they render.
#[rstest]
#[case::dummy_double(Backend::Dummy, 2)]
#[case::dummy_triple(Backend::Dummy, 3)]
fn test_dependencies_waited_before_recording(
    #[case] backend: Backend,
    #[case] frames_in_flight: usize,
) {
    let mut waits = None;
    let mut enabled = None;
    let Some(mut ctx) = TestContext::with_passes(backend, frames_in_flight, |log| {
        let pass = MarkerPass::new("Streamed", RenderPassStage::Lighting, 4, log);
        waits = Some(pass.dependency_wait_counter());
        enabled = Some(pass.enabled_flag());
        vec![pass.boxed()]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let (waits, enabled) = (waits.unwrap(), enabled.unwrap());

    ctx.run_frames(3);
    enabled.store(false, Ordering::SeqCst);
    ctx.run_frames(2);
    enabled.store(true, Ordering::SeqCst);
    ctx.run_frames(1);

    // The pass itself asserts in pre_record that the wait for that frame came first.
    assert_eq!(waits.load(Ordering::SeqCst), 4);
    assert_eq!(ctx.events().len(), 4);
    ctx.finish();
}

/// A pass recording into secondaries fills the slot's secondary buffer, which the
/// slot's primary buffer then executes.
#[rstest]
#[case::dummy_double(Backend::Dummy, 2)]
#[case::dummy_triple(Backend::Dummy, 3)]
fn test_secondary_pass_executed_by_primary(
    #[case] backend: Backend,
    #[case] frames_in_flight: usize,
) {
    let Some(mut ctx) = TestContext::with_passes(backend, frames_in_flight, |log| {
        vec![
            marker_pass("Scene", RenderPassStage::Lighting, 1, log),
            MarkerPass::new("Overlay", RenderPassStage::UserInterface, 2, log)
                .in_secondary()
                .boxed(),
        ]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    ctx.dummy.clear_calls();
    ctx.run_frames(frames_in_flight);

    let executes: Vec<_> = ctx
        .dummy
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RecordedCall::ExecuteCommands {
                command_buffer,
                secondary,
            } => Some((command_buffer, secondary)),
            _ => None,
        })
        .collect();
    assert_eq!(executes.len(), frames_in_flight);

    let mut secondaries = HashSet::new();
    for (slot, (primary, secondary)) in executes.iter().enumerate() {
        assert_eq!(Some(*primary), ctx.system.frame_command_buffer(slot));
        assert_eq!(secondary.len(), 1);
        secondaries.insert(secondary[0]);
    }
    assert_eq!(secondaries.len(), frames_in_flight);

    for (command_buffer, marker, _) in ctx.dispatches() {
        if marker == 2 {
            assert!(secondaries.contains(&command_buffer));
        } else {
            assert!(!secondaries.contains(&command_buffer));
        }
    }
    ctx.finish();
}

// ============================================================================
// Uniforms
// ============================================================================

/// Two consecutive frames mirror the source into their own slots; the slot
/// buffers differ exactly where the source changed in between.
#[rstest]
#[case::dummy_double(Backend::Dummy, 2)]
#[case::dummy_triple(Backend::Dummy, 3)]
fn test_uniform_slots_mirror_source(#[case] backend: Backend, #[case] frames_in_flight: usize) {
    let Some(mut ctx) = TestContext::new(backend, frames_in_flight) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    const IDENTIFIER: u64 = 0x5eed;
    let source = Arc::new(RwLock::new([0u32; 16]));
    ctx.system
        .register_uniform_buffer(IDENTIFIER, source.clone())
        .unwrap();
    assert!(ctx.system.get_uniform_buffer(IDENTIFIER, 0).is_some());

    *source.write() = [0x11; 16];
    ctx.run_frames(1);
    let first_slot = ctx.system.current_frame_index();

    source.write()[3] = 0xdead_beef;
    source.write()[12] = 0x2222_2222;
    ctx.run_frames(1);
    let second_slot = ctx.system.current_frame_index();
    assert_ne!(first_slot, second_slot);

    let first = ctx
        .system
        .read_uniform_buffer(IDENTIFIER, first_slot)
        .unwrap()
        .unwrap();
    let second = ctx
        .system
        .read_uniform_buffer(IDENTIFIER, second_slot)
        .unwrap()
        .unwrap();
    assert_eq!(first.len(), 64);
    assert_eq!(second.as_slice(), bytemuck::bytes_of(&*source.read()));

    let differing: Vec<usize> = (0..64).filter(|&i| first[i] != second[i]).collect();
    let expected: Vec<usize> = (12..16).chain(48..52).collect();
    assert_eq!(differing, expected);
    ctx.finish();
}

// ============================================================================
// Lifetime
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_deferred_texture_destroyed_after_frames_in_flight(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend, 2) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let texture = ctx
        .system
        .create_texture_2d(4, 4, TextureFormat::Rgba8Unorm, &[0xff; 64])
        .unwrap();
    let images = ctx.dummy.live_objects_of(DummyObjectKind::Image);
    let views = ctx.dummy.live_objects_of(DummyObjectKind::ImageView);

    ctx.system.destroy_texture_deferred(texture);
    ctx.run_frames(1);
    assert_eq!(ctx.system.pending_destruction_count(), 1);
    assert_eq!(ctx.dummy.live_objects_of(DummyObjectKind::Image), images);

    ctx.run_frames(5);
    assert_eq!(ctx.system.pending_destruction_count(), 0);
    assert_eq!(ctx.dummy.live_objects_of(DummyObjectKind::Image), images - 1);
    assert_eq!(ctx.dummy.live_objects_of(DummyObjectKind::ImageView), views - 1);
    ctx.finish();
}

/// Resize rebuilds resolution-dependent pipelines with the new extent.
#[rstest]
#[case::dummy_double(Backend::Dummy, 2)]
#[case::dummy_triple(Backend::Dummy, 3)]
fn test_resize_reinitializes_passes(#[case] backend: Backend, #[case] frames_in_flight: usize) {
    let mut counter = None;
    let Some(mut ctx) = TestContext::with_passes(backend, frames_in_flight, |log| {
        let pass = MarkerPass::new("PerPixel", RenderPassStage::Lighting, 0, log)
            .with_pipelines(0)
            .with_per_pixel_pipeline();
        counter = Some(pass.initialization_counter());
        vec![pass.boxed()]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let initialized = counter.unwrap();

    ctx.dummy.clear_calls();
    ctx.run_frames(1);
    let groups: Vec<_> = ctx.dispatches().into_iter().map(|(_, x, y)| (x, y)).collect();
    assert_eq!(groups, vec![(160, 90)]);

    ctx.system.resize(640, 480).unwrap();
    assert_eq!(initialized.load(Ordering::SeqCst), 2);

    ctx.dummy.clear_calls();
    ctx.run_frames(1);
    let groups: Vec<_> = ctx.dispatches().into_iter().map(|(_, x, y)| (x, y)).collect();
    assert_eq!(groups, vec![(80, 60)]);
    ctx.finish();
}

/// An out-of-date surface skips the frame, recreates the swapchain and the
/// next frame renders normally.
#[rstest]
#[case::dummy_double(Backend::Dummy, 2)]
#[case::dummy_triple(Backend::Dummy, 3)]
fn test_surface_loss_skips_one_frame(#[case] backend: Backend, #[case] frames_in_flight: usize) {
    let Some(mut ctx) = TestContext::with_passes(backend, frames_in_flight, |log| {
        vec![marker_pass("Scene", RenderPassStage::Lighting, 1, log)]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    ctx.run_frames(1);

    ctx.dummy.invalidate_swapchain();
    ctx.dummy.clear_calls();
    ctx.run_frames(1);
    assert!(ctx.dispatches().is_empty());
    assert_eq!(ctx.system.total_frames(), 1);

    ctx.run_frames(1);
    assert_eq!(ctx.dispatch_markers(), vec![1]);
    assert_eq!(ctx.system.total_frames(), 2);
    ctx.finish();
}

#[rstest]
#[case::dummy_single(Backend::Dummy, 1)]
#[case::dummy_double(Backend::Dummy, 2)]
#[case::dummy_triple(Backend::Dummy, 3)]
fn test_release_destroys_every_object(#[case] backend: Backend, #[case] frames_in_flight: usize) {
    let Some(mut ctx) = TestContext::with_passes(backend, frames_in_flight, |log| {
        vec![
            marker_pass("Shadows", RenderPassStage::Shadows, 1, log),
            marker_pass("Screen", RenderPassStage::Screen, 2, log),
        ]
    }) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    ctx.run_frames(4);
    ctx.system
        .create_buffer(
            128,
            render_core::backend::BufferUsage::STORAGE,
            render_core::backend::MemoryProperty::DEVICE_LOCAL,
        )
        .unwrap();
    ctx.finish();
}

#[test]
fn test_memory_exhaustion_fails_initialization() {
    let dummy = Arc::new(
        DummyBackend::new().with_memory_budget(MemoryClass::HostVisibleCoherent, 1024),
    );
    let mut system = RenderingSystem::new();
    let result = system.initialize_system(dummy.clone(), RenderingConfig::default());

    assert_eq!(result, Err(BackendError::OutOfDeviceMemory));
    assert_eq!(dummy.live_object_count(), 0);
}
