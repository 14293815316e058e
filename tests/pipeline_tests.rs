//! Pipeline Tests
//!
//! End-to-end frames through the headless backend.
//!
//! Tests for:
//! - Built-in passes and effect placement (bloom between render and screen)
//! - Plugin dependencies, duplicates and removal
//! - TAA pass-through once accumulation settles
//! - Recoverable per-pass errors and structural errors
//! - Temporal invalidation on camera cuts, scene edits and resize
//! - Property edits and JSON export / import
//! - Ground shadow bake notifications and outline selection

use std::any::Any;

use glam::{Mat4, Vec3};
use serde_json::json;
use uuid::Uuid;

use lustre::graph::{
    BlitRecord, Command, GpuBackend, HeadlessBackend, PassRelations, PassState, PostPass,
    RenderContext, TargetId,
};
use lustre::passes::{
    AnisotropyPlugin, BloomPlugin, ContactShadowsPlugin, DepthOfFieldPlugin, GBufferPlugin,
    GroundShadowPass, GroundShadowPlugin, OutlinePass, OutlinePlugin, SsgiPlugin, SsrPlugin,
    TaaPlugin, VelocityPlugin,
};
use lustre::{
    CameraView, Material, MaterialFlags, Notification, Pipeline, PipelineError, PipelineSettings,
    PropertyValue, Result, Scene,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn camera(id: u64, eye: Vec3) -> CameraView {
    CameraView::perspective(id, eye, Vec3::ZERO, 0.8, 16.0 / 9.0, 0.1, 100.0)
}

fn pipeline() -> Pipeline {
    init_logger();
    Pipeline::new(
        Box::new(HeadlessBackend::new()),
        PipelineSettings::default().with_size(320, 180),
    )
    .unwrap()
}

fn scene() -> (Scene, Uuid) {
    let mut scene = Scene::new(camera(1, Vec3::new(0.0, 2.0, 6.0)));
    let material = scene.add_material(Material::physical());
    let cube = scene.add_object("cube", Mat4::IDENTITY, material);
    (scene, cube)
}

fn headless(pipeline: &Pipeline) -> &HeadlessBackend {
    pipeline.core().backend_as::<HeadlessBackend>().unwrap()
}

fn blits_labelled(pipeline: &Pipeline, needle: &str) -> usize {
    headless(pipeline)
        .commands()
        .iter()
        .filter(|c| {
            matches!(
                c,
                Command::Blit { source: BlitRecord::Program { label, .. }, .. }
                    if label.contains(needle)
            )
        })
        .count()
}

fn clear_commands(pipeline: &mut Pipeline) {
    pipeline
        .core_mut()
        .backend_as_mut::<HeadlessBackend>()
        .unwrap()
        .clear_commands();
}

/// Pass reading a shared target nobody publishes.
struct ProbePass {
    relations: PassRelations,
    state: PassState,
}

impl ProbePass {
    fn boxed(relations: PassRelations) -> Box<Self> {
        Box::new(Self {
            relations,
            state: PassState::in_place(),
        })
    }
}

impl PostPass for ProbePass {
    fn name(&self) -> &str {
        "probe"
    }

    fn relations(&self) -> &PassRelations {
        &self.relations
    }

    fn state(&self) -> &PassState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PassState {
        &mut self.state
    }

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        _write: TargetId,
        _read: TargetId,
        _delta: f32,
        _mask_active: bool,
    ) -> Result<()> {
        ctx.require_shared("probe", "never_published")?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Built-in Passes and Ordering
// ============================================================================

#[test]
fn builtin_passes_render_in_order() {
    let mut pipeline = pipeline();
    let (scene, _) = scene();

    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    assert_eq!(report.executed, vec!["render", "progressive", "screen"]);
    assert!(report.skipped.is_empty());
    assert_eq!(report.frame, 0);
    assert_eq!(report.leaked_targets, 0);
    assert_eq!(headless(&pipeline).invalid_ops(), 0);
}

#[test]
fn bloom_runs_between_render_and_screen() {
    let mut pipeline = pipeline();
    let (scene, _) = scene();
    pipeline.add_plugin(BloomPlugin::new()).unwrap();

    assert_eq!(
        pipeline.core().graph.resolve_order().unwrap(),
        vec!["render", "progressive", "bloom", "screen"]
    );

    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    assert_eq!(report.executed, vec!["render", "progressive", "bloom", "screen"]);
    assert_eq!(report.leaked_targets, 0);

    let pool = &pipeline.core().pool;
    assert_eq!(pool.checked_out_count(), 0);
    let pooled = pool.len();
    assert!(pooled >= 2);

    pipeline.render_frame(&scene, 0.016).unwrap();
    assert_eq!(pipeline.core().pool.len(), pooled);
    assert_eq!(headless(&pipeline).invalid_ops(), 0);
}

#[test]
fn disabled_pass_is_reported_as_skipped() {
    let mut pipeline = pipeline();
    let (scene, _) = scene();
    pipeline.add_plugin(BloomPlugin::new()).unwrap();
    pipeline.core_mut().graph.set_enabled("bloom", false).unwrap();

    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    assert_eq!(report.executed, vec!["render", "progressive", "screen"]);
    assert_eq!(report.skipped, vec!["bloom"]);
}

#[test]
fn taa_waits_for_render_behind_gated_effects() {
    let mut pipeline = pipeline();
    let (scene, _) = scene();
    pipeline.add_plugin(GBufferPlugin::new()).unwrap();
    pipeline.add_plugin(TaaPlugin::new()).unwrap();
    pipeline.add_plugin(SsrPlugin::new()).unwrap();

    let order = pipeline.core().graph.resolve_order().unwrap();
    assert_eq!(order, vec!["gbuffer", "ssr", "render", "taa", "progressive", "screen"]);

    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    let at = |name: &str| report.executed.iter().position(|n| n == name).unwrap();
    assert!(at("render") < at("taa"));
    assert!(at("taa") < at("progressive"));
}

#[test]
fn full_stack_renders_cleanly() {
    let mut pipeline = pipeline();
    let (mut scene, _) = scene();
    let ground = scene.add_material(Material::physical().with_flags(MaterialFlags::GROUND));
    scene.add_object("floor", Mat4::from_scale(Vec3::new(10.0, 1.0, 10.0)), ground);

    pipeline.add_plugin(GBufferPlugin::new()).unwrap();
    pipeline.add_plugin(VelocityPlugin::new()).unwrap();
    pipeline.add_plugin(TaaPlugin::new()).unwrap();
    pipeline.add_plugin(BloomPlugin::new()).unwrap();
    pipeline.add_plugin(DepthOfFieldPlugin::new()).unwrap();
    pipeline.add_plugin(SsrPlugin::new()).unwrap();
    pipeline.add_plugin(SsgiPlugin::new()).unwrap();
    pipeline.add_plugin(OutlinePlugin::new()).unwrap();
    pipeline.add_plugin(ContactShadowsPlugin::new()).unwrap();
    pipeline.add_plugin(AnisotropyPlugin::new()).unwrap();
    pipeline.add_plugin(GroundShadowPlugin::new()).unwrap();

    let order = pipeline.core().graph.resolve_order().unwrap();
    let at = |name: &str| order.iter().position(|n| *n == name).unwrap();
    assert!(at("gbuffer") < at("render"));
    assert!(at("render") < at("taa"));
    assert!(at("dof") < at("taa"));
    assert!(at("taa") < at("progressive"));
    assert!(at("render") < at("bloom"));
    assert!(at("bloom") < at("screen"));

    for _ in 0..4 {
        let report = pipeline.render_frame(&scene, 0.016).unwrap();
        assert_eq!(report.leaked_targets, 0);
    }
    assert_eq!(headless(&pipeline).invalid_ops(), 0);
    assert_eq!(pipeline.core().pool.checked_out_count(), 0);
}

// ============================================================================
// Plugins
// ============================================================================

#[test]
fn plugin_dependencies_are_checked_on_add() {
    let mut pipeline = pipeline();
    assert_eq!(
        pipeline.add_plugin(TaaPlugin::new()).unwrap_err(),
        PipelineError::MissingPlugin {
            plugin: "taa".into(),
            dependency: "gbuffer".into(),
        }
    );
    assert!(!pipeline.core().graph.contains("taa"));

    pipeline.add_plugin(GBufferPlugin::new()).unwrap();
    pipeline.add_plugin(TaaPlugin::new()).unwrap();
    assert_eq!(pipeline.plugin_names(), vec!["gbuffer", "taa"]);

    assert_eq!(
        pipeline.add_plugin(GBufferPlugin::new()).unwrap_err(),
        PipelineError::DuplicatePlugin("gbuffer".into())
    );
}

#[test]
fn removing_a_plugin_releases_its_pass_and_targets() {
    let mut pipeline = pipeline();
    let live_before = headless(&pipeline).live_targets();
    pipeline.add_plugin(GBufferPlugin::new()).unwrap();
    assert!(pipeline.core().shared.contains("gbuffer"));
    assert_eq!(headless(&pipeline).live_targets(), live_before + 1);

    let removed = pipeline.remove_plugin("gbuffer").unwrap();
    assert_eq!(removed.name(), "gbuffer");
    assert!(!pipeline.core().graph.contains("gbuffer"));
    assert!(!pipeline.core().shared.contains("gbuffer"));
    assert_eq!(headless(&pipeline).live_targets(), live_before);

    assert!(matches!(
        pipeline.remove_plugin("gbuffer"),
        Err(PipelineError::UnknownPlugin(_))
    ));
}

#[test]
fn taa_binds_velocity_whenever_both_are_present() {
    let mut pipeline = pipeline();
    pipeline.add_plugin(GBufferPlugin::new()).unwrap();
    pipeline.add_plugin(TaaPlugin::new()).unwrap();
    assert!(pipeline.plugin::<TaaPlugin>().unwrap().bound_velocity().is_none());

    pipeline.add_plugin(VelocityPlugin::new()).unwrap();
    let unpack = pipeline.plugin::<VelocityPlugin>().unwrap().unpack_extension();
    assert!(unpack.is_some());
    assert_eq!(pipeline.plugin::<TaaPlugin>().unwrap().bound_velocity(), unpack);

    pipeline.remove_plugin("velocity").unwrap();
    assert!(pipeline.plugin::<TaaPlugin>().unwrap().bound_velocity().is_none());
}

// ============================================================================
// TAA Pass-through
// ============================================================================

#[test]
fn taa_passes_through_once_accumulation_settles() {
    let mut pipeline = pipeline();
    let (scene, _) = scene();
    pipeline.add_plugin(GBufferPlugin::new()).unwrap();
    pipeline.add_plugin(TaaPlugin::new()).unwrap();

    let first = pipeline.render_frame(&scene, 0.016).unwrap();
    assert!(first.executed.iter().any(|n| n == "taa"));
    let second = pipeline.render_frame(&scene, 0.016).unwrap();
    assert_eq!(second.frame, 1);
    assert!(second.executed.iter().any(|n| n == "taa"));

    clear_commands(&mut pipeline);
    let settled = pipeline.render_frame(&scene, 0.016).unwrap();
    assert_eq!(settled.frame, 2);
    assert!(settled.skipped.iter().any(|n| n == "taa"));
    assert!(!pipeline.core().graph.get("taa").unwrap().state().needs_swap);
    assert_eq!(blits_labelled(&pipeline, "taa#"), 0);
}

#[test]
fn camera_motion_reenables_taa() {
    let mut pipeline = pipeline();
    let (mut scene, _) = scene();
    pipeline.add_plugin(GBufferPlugin::new()).unwrap();
    pipeline.add_plugin(TaaPlugin::new()).unwrap();
    for _ in 0..3 {
        pipeline.render_frame(&scene, 0.016).unwrap();
    }

    *scene.main_camera_mut() = camera(1, Vec3::new(1.0, 2.0, 6.0));
    clear_commands(&mut pipeline);
    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    assert_eq!(report.frame, 0);
    assert!(report.executed.iter().any(|n| n == "taa"));
    assert_eq!(blits_labelled(&pipeline, "taa#"), 1);
}

#[test]
fn taa_skips_non_main_cameras() {
    let mut pipeline = pipeline();
    let (mut scene, _) = scene();
    pipeline.add_plugin(GBufferPlugin::new()).unwrap();
    pipeline.add_plugin(TaaPlugin::new()).unwrap();
    scene.set_render_camera(Some(camera(9, Vec3::new(4.0, 4.0, 4.0))));

    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    assert!(report.skipped.iter().any(|n| n == "taa"));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn target_not_ready_skips_only_that_pass() {
    let mut pipeline = pipeline();
    let (scene, _) = scene();
    pipeline
        .core_mut()
        .graph
        .register(ProbePass::boxed(PassRelations::new().after(&["render"])))
        .unwrap();

    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    assert_eq!(report.skipped, vec!["probe"]);
    assert_eq!(report.executed, vec!["render", "progressive", "screen"]);
}

#[test]
fn missing_required_pass_aborts_the_frame() {
    let mut pipeline = pipeline();
    let (scene, _) = scene();
    pipeline
        .core_mut()
        .graph
        .register(ProbePass::boxed(PassRelations::new().required(&["gbuffer"])))
        .unwrap();

    let err = pipeline.render_frame(&scene, 0.016).unwrap_err();
    assert!(err.is_structural());
    assert_eq!(
        err,
        PipelineError::MissingDependency {
            pass: "probe".into(),
            missing: "gbuffer".into(),
        }
    );

    pipeline.add_plugin(GBufferPlugin::new()).unwrap();
    assert!(pipeline.render_frame(&scene, 0.016).is_ok());
}

// ============================================================================
// Temporal Invalidation
// ============================================================================

#[test]
fn camera_cut_restarts_accumulation() {
    let mut pipeline = pipeline();
    let (mut scene, _) = scene();
    for _ in 0..3 {
        pipeline.render_frame(&scene, 0.016).unwrap();
    }
    assert!(pipeline.core().history.get_previous("progressive").is_some());

    scene.set_render_camera(Some(camera(2, Vec3::new(0.0, 8.0, 1.0))));
    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    assert_eq!(report.frame, 0);
}

#[test]
fn scene_edit_restarts_accumulation() {
    let mut pipeline = pipeline();
    let (mut scene, _) = scene();
    for _ in 0..3 {
        pipeline.render_frame(&scene, 0.016).unwrap();
    }
    let material = scene.add_material(Material::physical());
    scene.add_object("sphere", Mat4::from_translation(Vec3::X), material);

    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    assert_eq!(report.frame, 0);
}

#[test]
fn still_frames_keep_accumulating() {
    let mut pipeline = pipeline();
    let (scene, _) = scene();
    let frames: Vec<u32> = (0..4)
        .map(|_| pipeline.render_frame(&scene, 0.016).unwrap().frame)
        .collect();
    assert_eq!(frames, vec![0, 1, 2, 3]);
}

#[test]
fn resize_recreates_persistent_targets() {
    let mut pipeline = pipeline();
    let (scene, _) = scene();
    pipeline.add_plugin(GBufferPlugin::new()).unwrap();
    pipeline.render_frame(&scene, 0.016).unwrap();
    let old = pipeline.core().shared.get("gbuffer").unwrap();

    pipeline.resize(640, 360);
    assert_eq!(pipeline.core().viewport(), (640, 360));
    let new = pipeline.core().shared.get("gbuffer").unwrap();
    assert_ne!(old, new);
    assert!(!headless(&pipeline).is_live(old));
    assert_eq!(
        pipeline.core().backend().target_spec(new).map(|s| (s.width, s.height)),
        Some((640, 360))
    );

    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    assert_eq!(report.frame, 0);
    assert_eq!(headless(&pipeline).invalid_ops(), 0);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn property_edits_validate_and_mark_dirty() {
    let mut pipeline = pipeline();
    let (scene, _) = scene();
    pipeline.add_plugin(BloomPlugin::new()).unwrap();
    pipeline.render_frame(&scene, 0.016).unwrap();
    pipeline.render_frame(&scene, 0.016).unwrap();

    assert!(pipeline.set_property("bloom", "intensity", 1.5).unwrap());
    assert!(!pipeline.set_property("bloom", "intensity", 1.5).unwrap());
    assert!(matches!(
        pipeline.set_property("bloom", "intensity", 9.0),
        Err(PipelineError::PropertyOutOfRange { .. })
    ));
    assert!(matches!(
        pipeline.set_property("bloom", "glow", 1.0),
        Err(PipelineError::UnknownProperty(_))
    ));
    assert!(matches!(
        pipeline.set_property("bloom", "bloomDebug", "yes"),
        Err(PipelineError::PropertyType { .. })
    ));
    assert!(matches!(
        pipeline.set_property("fxaa", "enabled", true),
        Err(PipelineError::UnknownPlugin(_))
    ));

    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    assert_eq!(report.frame, 0);
}

#[test]
fn properties_round_trip_through_json() {
    let mut source = pipeline();
    source.add_plugin(GBufferPlugin::new()).unwrap();
    source.add_plugin(BloomPlugin::new()).unwrap();
    source.add_plugin(ContactShadowsPlugin::new()).unwrap();
    source.set_property("bloom", "intensity", 1.25).unwrap();
    source.set_property("bloom", "bloomIterations", 6_i64).unwrap();
    source.set_property("contact_shadows", "stepCount", 5_i64).unwrap();

    let exported = source.export_properties();
    assert_eq!(exported["bloom"]["intensity"], json!(1.25));
    assert_eq!(exported["bloom"]["bloomIterations"], json!(6));
    assert_eq!(exported["contact_shadows"]["stepCount"], json!(5));
    assert!(exported.get("gbuffer").is_none());

    let mut target = pipeline();
    target.add_plugin(GBufferPlugin::new()).unwrap();
    target.add_plugin(BloomPlugin::new()).unwrap();
    target.add_plugin(ContactShadowsPlugin::new()).unwrap();
    assert_eq!(target.import_properties(&exported).unwrap(), 3);
    assert_eq!(target.import_properties(&exported).unwrap(), 0);

    let bloom = target.properties("bloom").unwrap();
    assert!((bloom.float("intensity") - 1.25).abs() < 1e-6);
    assert_eq!(bloom.int("bloomIterations"), 6);
    assert_eq!(
        target.properties("contact_shadows").unwrap().get("stepCount").unwrap(),
        &PropertyValue::Int(5)
    );
}

#[test]
fn import_rejects_mistyped_values() {
    let mut pipeline = pipeline();
    pipeline.add_plugin(BloomPlugin::new()).unwrap();
    let err = pipeline
        .import_properties(&json!({ "bloom": { "bloomDebug": "loud" } }))
        .unwrap_err();
    assert!(matches!(err, PipelineError::PropertyType { .. }));
}

// ============================================================================
// Ground Shadow and Outline
// ============================================================================

#[test]
fn ground_shadow_bakes_and_notifies() {
    let mut pipeline = pipeline();
    let (mut scene, _) = scene();
    let ground = scene.add_material(Material::physical().with_flags(MaterialFlags::GROUND));
    scene.add_object("floor", Mat4::IDENTITY, ground);
    pipeline.add_plugin(GroundShadowPlugin::new()).unwrap();
    pipeline
        .set_property("ground_shadow", "maxFrameNumber", 3_i64)
        .unwrap();

    for _ in 0..3 {
        let report = pipeline.render_frame(&scene, 0.016).unwrap();
        assert!(report.executed.iter().any(|n| n == "ground_shadow"));
    }
    let notifications = pipeline.drain_notifications();
    assert_eq!(notifications.len(), 3);
    assert!(matches!(
        notifications[0],
        Notification::BakeProgress { plugin: "ground_shadow", .. }
    ));
    assert_eq!(
        notifications[2],
        Notification::Baked {
            plugin: "ground_shadow"
        }
    );

    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    assert!(report.skipped.iter().any(|n| n == "ground_shadow"));
    assert!(pipeline.drain_notifications().is_empty());

    let pass = pipeline
        .core()
        .graph
        .downcast::<GroundShadowPass>(GroundShadowPass::NAME)
        .unwrap();
    assert_eq!(pass.bake_count(), 1);

    // Scene edits re-bake while autoBake is on.
    let material = scene.add_material(Material::physical());
    scene.add_object("crate", Mat4::from_translation(Vec3::Y), material);
    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    assert!(report.executed.iter().any(|n| n == "ground_shadow"));
}

#[test]
fn ground_shadow_idles_without_ground() {
    let mut pipeline = pipeline();
    let (scene, _) = scene();
    pipeline.add_plugin(GroundShadowPlugin::new()).unwrap();

    let report = pipeline.render_frame(&scene, 0.016).unwrap();
    assert!(report.skipped.iter().any(|n| n == "ground_shadow"));
    assert!(pipeline.drain_notifications().is_empty());
}

#[test]
fn outline_draws_only_the_selection() {
    let mut pipeline = pipeline();
    let (mut scene, cube) = scene();
    let material = scene.add_material(Material::physical());
    scene.add_object("other", Mat4::from_translation(Vec3::X * 2.0), material);

    pipeline.add_plugin(GBufferPlugin::new()).unwrap();
    pipeline.add_plugin(OutlinePlugin::new()).unwrap();
    pipeline
        .with_plugin::<OutlinePlugin, _>(|plugin, core| plugin.select(core, &[cube]))
        .unwrap();

    clear_commands(&mut pipeline);
    pipeline.render_frame(&scene, 0.016).unwrap();

    let target = pipeline
        .core()
        .graph
        .downcast::<OutlinePass>(OutlinePass::NAME)
        .and_then(OutlinePass::target)
        .unwrap();
    let draws: Vec<usize> = headless(&pipeline)
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::Draw {
                target: Some(t),
                items,
            } if *t == target => Some(*items),
            _ => None,
        })
        .collect();
    assert_eq!(draws, vec![1]);
}
