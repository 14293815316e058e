//! Frame Resource Tests
//!
//! Tests for:
//! - RenderTargetPool: size classes, reuse, release errors, leak reclamation
//! - TemporalHistory: first-frame semantics, invalidation, owned ping-pong pairs
//! - CameraHistory / MotionHistory: cuts and first-frame fallbacks
//! - FrameLifecycle: counter rules and stable noise
//! - Accumulator: convergence and restarts

use glam::{Mat4, Vec3};
use uuid::Uuid;

use lustre::graph::{
    Accumulator, CameraHistory, ConvergenceState, FrameInputs, FrameLifecycle, GpuBackend,
    HeadlessBackend, MotionHistory, RenderTargetPool, TargetDescriptor, TargetSpec,
    TemporalHistory,
};
use lustre::{CameraView, PipelineError};

const FMT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

fn camera(id: u64, eye: Vec3) -> CameraView {
    CameraView::perspective(id, eye, Vec3::ZERO, 0.8, 16.0 / 9.0, 0.1, 100.0)
}

fn inputs() -> FrameInputs {
    FrameInputs {
        view_projection: Mat4::IDENTITY,
        prev_view_projection: Mat4::IDENTITY,
        viewport: (320, 180),
        delta: 1.0 / 60.0,
        near: 0.1,
        far: 100.0,
    }
}

// ============================================================================
// RenderTargetPool
// ============================================================================

#[test]
fn pool_size_classes_do_not_mix() {
    let mut backend = HeadlessBackend::new();
    let mut pool = RenderTargetPool::new((200, 100), 4);

    let half = pool
        .acquire(&mut backend, &TargetDescriptor::relative("a", 0.5, FMT), "bloom")
        .unwrap();
    pool.release(half).unwrap();
    let full = pool
        .acquire(&mut backend, &TargetDescriptor::relative("a", 1.0, FMT), "bloom")
        .unwrap();

    assert_ne!(half, full);
    assert_eq!(backend.target_spec(half).map(|s| (s.width, s.height)), Some((100, 50)));
    assert_eq!(backend.target_spec(full).map(|s| (s.width, s.height)), Some((200, 100)));
}

#[test]
fn pool_label_does_not_split_size_classes() {
    let mut backend = HeadlessBackend::new();
    let mut pool = RenderTargetPool::new((64, 64), 4);

    let a = pool
        .acquire(&mut backend, &TargetDescriptor::fixed("bloom_mip", 32, 32, FMT), "bloom")
        .unwrap();
    pool.release(a).unwrap();
    let b = pool
        .acquire(&mut backend, &TargetDescriptor::fixed("dof_half", 32, 32, FMT), "dof")
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(pool.len(), 1);
}

#[test]
fn tiny_relative_targets_are_at_least_one_pixel() {
    let desc = TargetDescriptor::relative("mip", 0.001, FMT);
    assert_eq!(desc.resolve_size((100, 50)), (1, 1));
}

#[test]
fn releasing_unknown_or_released_targets_fails() {
    let mut backend = HeadlessBackend::new();
    let mut pool = RenderTargetPool::new((64, 64), 4);
    let foreign = backend.create_target(&TargetSpec::new("foreign", 8, 8, FMT));
    assert!(matches!(pool.release(foreign), Err(PipelineError::UnknownTarget(_))));

    let desc = TargetDescriptor::fixed("scratch", 8, 8, FMT);
    let t = pool.acquire(&mut backend, &desc, "ssgi").unwrap();
    pool.ensure_checked_out(t).unwrap();
    pool.release(t).unwrap();
    assert!(matches!(pool.release(t), Err(PipelineError::UseAfterRelease(_))));
    assert!(matches!(
        pool.ensure_checked_out(t),
        Err(PipelineError::UseAfterRelease(_))
    ));
}

#[test]
fn a_reused_target_is_never_handed_out_twice() {
    let mut backend = HeadlessBackend::new();
    let mut pool = RenderTargetPool::new((64, 64), 4);
    let desc = TargetDescriptor::relative("scratch", 1.0, FMT);

    let a = pool.acquire(&mut backend, &desc, "x").unwrap();
    pool.release(a).unwrap();
    let b = pool.acquire(&mut backend, &desc, "x").unwrap();
    let c = pool.acquire(&mut backend, &desc, "x").unwrap();
    assert_eq!(a, b);
    assert_ne!(b, c);
    assert!(pool.is_checked_out(b));
    assert!(pool.is_checked_out(c));
    assert_eq!(pool.free_count(), 0);
}

#[test]
fn leaks_are_reclaimed_at_frame_end() {
    let mut backend = HeadlessBackend::new();
    let mut pool = RenderTargetPool::new((64, 64), 4);
    let desc = TargetDescriptor::fixed("scratch", 8, 8, FMT);

    let t = pool.acquire(&mut backend, &desc, "leaky").unwrap();
    assert_eq!(pool.end_frame(&mut backend), 1);
    assert!(!pool.is_checked_out(t));
    assert_eq!(pool.end_frame(&mut backend), 0);
    assert!(backend.is_live(t));
}

#[test]
fn dispose_all_frees_checked_out_targets_too() {
    let mut backend = HeadlessBackend::new();
    let mut pool = RenderTargetPool::new((64, 64), 4);
    let desc = TargetDescriptor::fixed("scratch", 8, 8, FMT);
    let _held = pool.acquire(&mut backend, &desc, "a").unwrap();
    let free = pool.acquire(&mut backend, &desc, "b").unwrap();
    pool.release(free).unwrap();

    pool.dispose_all(&mut backend);
    assert!(pool.is_empty());
    assert_eq!(backend.live_targets(), 0);
    assert_eq!(backend.invalid_ops(), 0);
}

// ============================================================================
// TemporalHistory
// ============================================================================

#[test]
fn history_has_no_previous_until_committed() {
    let mut backend = HeadlessBackend::new();
    let mut history = TemporalHistory::new();
    let t = backend.create_target(&TargetSpec::new("taa", 8, 8, FMT));

    assert!(history.is_first_frame("taa"));
    history.commit_current("taa", t);
    assert_eq!(history.get_previous("taa"), Some(t));
}

#[test]
fn invalidate_all_resets_every_key() {
    let mut backend = HeadlessBackend::new();
    let mut history = TemporalHistory::new();
    let a = backend.create_target(&TargetSpec::new("a", 8, 8, FMT));
    let b = backend.create_target(&TargetSpec::new("b", 8, 8, FMT));
    history.commit_current("taa", a);
    history.commit_current("ssr", b);

    history.invalidate_all();
    assert!(history.get_previous("taa").is_none());
    assert!(history.get_previous("ssr").is_none());

    history.commit_current("ssr", b);
    assert_eq!(history.get_previous("ssr"), Some(b));
    assert!(history.get_previous("taa").is_none());
}

#[test]
fn owned_pair_alternates_and_recreates_on_spec_change() {
    let mut backend = HeadlessBackend::new();
    let mut history = TemporalHistory::new();
    let spec = TargetSpec::new("progressive", 16, 16, FMT);

    let first = history.ensure_pair(&mut backend, "progressive", &spec);
    assert!(history.get_previous("progressive").is_none());
    history.commit_pair("progressive");
    assert_eq!(history.get_previous("progressive"), Some(first));

    let second = history.ensure_pair(&mut backend, "progressive", &spec);
    assert_ne!(first, second);
    history.commit_pair("progressive");
    assert_eq!(history.get_previous("progressive"), Some(second));

    let bigger = TargetSpec::new("progressive", 32, 32, FMT);
    let fresh = history.ensure_pair(&mut backend, "progressive", &bigger);
    assert!(!backend.is_live(first));
    assert!(!backend.is_live(second));
    assert!(backend.is_live(fresh));
    assert!(history.is_first_frame("progressive"));
}

#[test]
fn history_resize_disposes_pairs() {
    let mut backend = HeadlessBackend::new();
    let mut history = TemporalHistory::new();
    let spec = TargetSpec::new("progressive", 16, 16, FMT);
    history.ensure_pair(&mut backend, "progressive", &spec);
    history.commit_pair("progressive");

    history.resize(&mut backend);
    assert_eq!(backend.live_targets(), 0);
    assert!(history.is_first_frame("progressive"));
}

// ============================================================================
// Camera and Motion History
// ============================================================================

#[test]
fn camera_cut_drops_previous_view_projection() {
    let mut history = CameraHistory::new();
    let a = camera(1, Vec3::new(0.0, 0.0, 5.0));
    let moved = camera(1, Vec3::new(1.0, 0.0, 5.0));
    let other = camera(2, Vec3::new(0.0, 3.0, 5.0));

    assert!(!history.begin_frame(&a));
    assert_eq!(history.previous_view_projection(), a.view_projection());

    assert!(!history.begin_frame(&moved));
    assert_eq!(history.previous_view_projection(), a.view_projection());
    assert_eq!(history.current_view_projection(), moved.view_projection());

    assert!(history.begin_frame(&other));
    assert_eq!(history.previous_view_projection(), other.view_projection());
}

#[test]
fn motion_history_yields_zero_motion_on_first_frame() {
    let mut motion = MotionHistory::new();
    let id = Uuid::new_v4();
    let world = Mat4::from_translation(Vec3::X);
    assert_eq!(motion.previous_world(id, world), world);

    motion.record(id, Mat4::IDENTITY);
    assert_eq!(motion.previous_world(id, world), Mat4::IDENTITY);

    motion.retain(|_| false);
    assert!(motion.is_empty());
}

// ============================================================================
// FrameLifecycle
// ============================================================================

#[test]
fn frame_counts_up_and_resets_on_dirty() {
    let mut frame = FrameLifecycle::new(false);
    assert!(frame.begin_frame(&inputs()));
    assert_eq!(frame.frame(), 0);
    frame.end_frame();

    assert!(!frame.begin_frame(&inputs()));
    assert_eq!(frame.frame(), 1);
    frame.end_frame();
    frame.begin_frame(&inputs());
    assert_eq!(frame.frame(), 2);
    assert_eq!(frame.noise_frame(), 2);
    frame.end_frame();

    frame.set_dirty();
    assert!(frame.begin_frame(&inputs()));
    assert_eq!(frame.frame(), 0);
    assert_eq!(frame.noise_frame(), 0);
    assert_eq!(frame.total_frames(), 3);
}

#[test]
fn stable_noise_survives_restarts() {
    let mut frame = FrameLifecycle::new(true);
    for _ in 0..3 {
        frame.begin_frame(&inputs());
        frame.end_frame();
    }
    let noise = frame.noise_frame();
    frame.set_dirty();
    frame.begin_frame(&inputs());
    assert_eq!(frame.frame(), 0);
    assert!(frame.noise_frame() > noise);
}

#[test]
fn suppressed_advance_keeps_counters() {
    let mut frame = FrameLifecycle::new(false);
    frame.begin_frame(&inputs());
    frame.end_frame();
    frame.suppress_frame_advance();
    frame.begin_frame(&inputs());
    assert_eq!(frame.frame(), 0);
    assert_eq!(frame.uniforms().frame, 0);
    assert_eq!(frame.uniforms().resolution, [320.0, 180.0]);
}

// ============================================================================
// Accumulator
// ============================================================================

#[test]
fn accumulator_converges_after_max_frames() {
    let mut acc = Accumulator::new(3);
    assert_eq!(acc.step(), ConvergenceState::Idle);

    acc.restart();
    assert_eq!(acc.step(), ConvergenceState::Accumulating);
    assert_eq!(acc.step(), ConvergenceState::Accumulating);
    assert_eq!(acc.step(), ConvergenceState::Converged);
    assert_eq!(acc.frame(), 3);
    assert!((acc.progress() - 1.0).abs() < f32::EPSILON);

    assert_eq!(acc.step(), ConvergenceState::Converged);
    assert_eq!(acc.frame(), 3);
}

#[test]
fn raising_the_limit_resumes_accumulation() {
    let mut acc = Accumulator::new(2);
    acc.restart();
    acc.step();
    acc.step();
    assert_eq!(acc.state(), ConvergenceState::Converged);

    acc.set_max_frames(4);
    assert_eq!(acc.state(), ConvergenceState::Accumulating);
    acc.step();
    acc.step();
    assert_eq!(acc.state(), ConvergenceState::Converged);
}
