//! Render Context
//!
//! [`RenderContext`] is the per-frame view of the pipeline handed to every
//! pass hook. It stores individual references to each subsystem so the
//! borrow checker can split borrows across disjoint fields: a pass can hold
//! `ctx.extensions` immutably while compiling through `ctx.programs` and
//! drawing through `ctx.backend`.
//!
//! [`SharedTargets`] is the non-owning directory of persistent targets that
//! plugins publish for each other (`gbuffer`, `velocity`, `ssgi`, ...).
//! Looking up an absent name yields [`PipelineError::TargetNotReady`], which
//! the frame driver treats as "skip this pass for this frame".

use rustc_hash::FxHashMap;

use super::backend::{DrawItem, GpuBackend, TargetId};
use super::frame::FrameLifecycle;
use super::history::{CameraHistory, MotionHistory, TemporalHistory};
use super::transient_pool::RenderTargetPool;
use crate::errors::{PipelineError, Result};
use crate::pipeline::{ExtensionStore, MaterialExtensionRegistry, ProgramCache, ShaderLibrary};
use crate::resources::{Material, MaterialFlags};
use crate::scene::{CameraView, Scene};

// ─── Shared Targets ───────────────────────────────────────────────────────────

/// Name → persistent target lookup. Entries are owned by whoever
/// published them; the directory never disposes anything.
#[derive(Debug, Default, Clone)]
pub struct SharedTargets {
    map: FxHashMap<String, TargetId>,
}

impl SharedTargets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes (or replaces) `name`.
    pub fn publish(&mut self, name: &str, target: TargetId) {
        self.map.insert(name.to_string(), target);
    }

    /// Removes `name`, returning the target that was published under it.
    pub fn withdraw(&mut self, name: &str) -> Option<TargetId> {
        self.map.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<TargetId> {
        self.map.get(name).copied()
    }

    /// Like [`get`](Self::get), but reports the missing target on behalf of
    /// `pass`.
    pub fn require(&self, pass: &str, name: &str) -> Result<TargetId> {
        self.get(name).ok_or_else(|| PipelineError::TargetNotReady {
            pass: pass.to_string(),
            target: name.to_string(),
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ─── Render Context ───────────────────────────────────────────────────────────

/// Everything a pass may touch during one frame.
pub struct RenderContext<'a> {
    pub backend: &'a mut dyn GpuBackend,
    /// Scratch targets, released within the frame.
    pub pool: &'a mut RenderTargetPool,
    pub history: &'a mut TemporalHistory,
    pub motion: &'a mut MotionHistory,
    pub camera_history: &'a CameraHistory,
    pub shared: &'a mut SharedTargets,
    pub programs: &'a mut ProgramCache,
    pub extensions: &'a ExtensionStore,
    /// Registry applied to scene materials.
    pub materials: &'a MaterialExtensionRegistry,
    pub shaders: &'a ShaderLibrary,
    pub frame: &'a FrameLifecycle,
    pub scene: &'a Scene,
    pub viewport: (u32, u32),
    pub color_format: wgpu::TextureFormat,
    dirty_requested: bool,
}

impl<'a> RenderContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        backend: &'a mut dyn GpuBackend,
        pool: &'a mut RenderTargetPool,
        history: &'a mut TemporalHistory,
        motion: &'a mut MotionHistory,
        camera_history: &'a CameraHistory,
        shared: &'a mut SharedTargets,
        programs: &'a mut ProgramCache,
        extensions: &'a ExtensionStore,
        materials: &'a MaterialExtensionRegistry,
        shaders: &'a ShaderLibrary,
        frame: &'a FrameLifecycle,
        scene: &'a Scene,
        color_format: wgpu::TextureFormat,
    ) -> Self {
        let viewport = pool.viewport();
        Self {
            backend,
            pool,
            history,
            motion,
            camera_history,
            shared,
            programs,
            extensions,
            materials,
            shaders,
            frame,
            scene,
            viewport,
            color_format,
            dirty_requested: false,
        }
    }

    /// Restarts accumulation from the next frame on.
    pub fn request_dirty(&mut self) {
        self.dirty_requested = true;
    }

    #[must_use]
    pub fn dirty_requested(&self) -> bool {
        self.dirty_requested
    }

    /// Shared target `name`, or `TargetNotReady` on behalf of `pass`.
    pub fn require_shared(&self, pass: &str, name: &str) -> Result<TargetId> {
        self.shared.require(pass, name)
    }

    /// Camera the frame renders from.
    #[must_use]
    pub fn camera(&self) -> &'a CameraView {
        self.scene.render_camera()
    }

    /// Draw list for every visible scene object.
    ///
    /// With `override_material`, every object is drawn with that material
    /// and registry (GBuffer, velocity); otherwise each object's own
    /// material goes through the global registry. Objects whose own
    /// material opted out of `exclude` are left out.
    pub fn scene_draw_items(
        &mut self,
        override_material: Option<(&MaterialExtensionRegistry, &Material)>,
        exclude: Option<MaterialFlags>,
    ) -> Vec<DrawItem> {
        let scene = self.scene;
        let mut items = Vec::with_capacity(scene.objects().len());

        for object in scene.objects().iter().filter(|o| o.visible) {
            let Some(own) = scene.material(object.material) else {
                log::warn!("Object '{}' references a missing material", object.name);
                continue;
            };
            if exclude.is_some_and(|flag| own.opted_out(flag)) {
                continue;
            }
            let (registry, material) = override_material.unwrap_or((self.materials, own));
            let program = self.programs.prepare(
                &mut *self.backend,
                registry,
                self.extensions,
                self.shaders,
                material,
            );
            items.push(DrawItem {
                object: object.uuid,
                program,
                world: object.world,
                previous_world: self.motion.previous_world(object.uuid, object.world),
                uniforms: registry.uniforms_for(self.extensions, material),
            });
        }
        items
    }
}
