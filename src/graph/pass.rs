//! Post-Processing Pass Trait
//!
//! Every effect is a named [`PostPass`] with declared ordering relations to
//! other passes. The [`PassGraph`](super::graph::PassGraph) owns the passes
//! and orders them; the frame driver walks that order each frame.
//!
//! # Buffer Handoff
//!
//! The composer keeps two colour buffers, *read* and *write*. Each pass
//! renders with `(write, read)` and declares through
//! [`PassState::needs_swap`] where its logical output ended up:
//!
//! | `needs_swap` | Output is in | Next pass reads |
//! |--------------|--------------|-----------------|
//! | `true`  | `write` | the old `write` (buffers swapped) |
//! | `false` | `read` (in place, or untouched) | the same `read` |
//!
//! A pass may change `needs_swap` from inside `render`, for example when it
//! decides to pass through; the driver reads it after the call.

use std::any::Any;

use super::backend::{BlitSource, GpuBackend, ProgramId, TargetId};
use super::context::RenderContext;
use crate::errors::Result;
use crate::pipeline::MaterialExtensionRegistry;
use crate::resources::properties::{define_table, uniform_table};
use crate::resources::{Material, MaterialKind, PropertySet, UniformTable};

/// Ordering and existence relations of a pass, by pass name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassRelations {
    /// This pass runs before each named pass (edge `self → name`).
    pub before: Vec<String>,
    /// This pass runs after each named pass (edge `name → self`).
    pub after: Vec<String>,
    /// Passes that must be registered for the pipeline to be valid.
    pub required: Vec<String>,
}

impl PassRelations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn before(mut self, names: &[&str]) -> Self {
        self.before.extend(names.iter().map(|s| (*s).to_string()));
        self
    }

    #[must_use]
    pub fn after(mut self, names: &[&str]) -> Self {
        self.after.extend(names.iter().map(|s| (*s).to_string()));
        self
    }

    #[must_use]
    pub fn required(mut self, names: &[&str]) -> Self {
        self.required.extend(names.iter().map(|s| (*s).to_string()));
        self
    }
}

/// Mutable per-pass flags read by the frame driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassState {
    pub enabled: bool,
    /// Output moved to the write buffer; see the module docs.
    pub needs_swap: bool,
    /// Clear the destination before drawing.
    pub clear: bool,
    /// The pass writes the final image to the screen.
    pub render_to_screen: bool,
}

impl Default for PassState {
    fn default() -> Self {
        Self {
            enabled: true,
            needs_swap: true,
            clear: false,
            render_to_screen: false,
        }
    }
}

impl PassState {
    /// State of a pass that works in place on the read buffer.
    #[must_use]
    pub fn in_place() -> Self {
        Self {
            needs_swap: false,
            ..Self::default()
        }
    }
}

/// A post-processing pass.
pub trait PostPass: Any {
    fn name(&self) -> &str;

    fn relations(&self) -> &PassRelations;

    fn state(&self) -> &PassState;

    fn state_mut(&mut self) -> &mut PassState;

    /// Tunable properties, if the pass exposes any.
    fn properties(&self) -> Option<&PropertySet> {
        None
    }

    fn properties_mut(&mut self) -> Option<&mut PropertySet> {
        None
    }

    /// Per-frame opt-out. Returning `false` skips `render` for this frame.
    fn before_render(&mut self, _ctx: &mut RenderContext<'_>) -> bool {
        true
    }

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        write: TargetId,
        read: TargetId,
        delta: f32,
        mask_active: bool,
    ) -> Result<()>;

    fn after_render(&mut self, _ctx: &mut RenderContext<'_>) {}

    /// Viewport resize. Persistent targets owned by the pass are recreated
    /// here.
    fn resize(&mut self, _backend: &mut dyn GpuBackend, _width: u32, _height: u32) {}

    /// Releases persistent targets when the pass leaves the graph.
    fn dispose(&mut self, _backend: &mut dyn GpuBackend) {}

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ─── Pass Material ────────────────────────────────────────────────────────────

/// Full-screen material owned by a pass, with its own extension registry.
#[derive(Debug)]
pub struct PassMaterial {
    pub material: Material,
    pub registry: MaterialExtensionRegistry,
}

impl PassMaterial {
    #[must_use]
    pub fn new(kind: MaterialKind) -> Self {
        Self {
            material: Material::new(kind),
            registry: MaterialExtensionRegistry::new(),
        }
    }

    /// Copies `Define` properties into the material defines and `Uniform`
    /// properties into its uniforms.
    pub fn sync_properties(&mut self, props: &PropertySet) {
        let defines = define_table(props);
        if !defines.is_empty() {
            let current = self.material.defines();
            let changed = defines
                .iter()
                .any(|&(k, v)| !current.iter().any(|&(ck, cv)| ck == k && cv == v));
            if changed {
                self.material.defines_mut().merge(&defines);
            }
        }
        self.material.uniforms.merge(&uniform_table(props));
    }

    /// Program and effective uniforms for the current material state.
    pub fn prepare(&self, ctx: &mut RenderContext<'_>) -> (ProgramId, UniformTable) {
        let program = ctx.programs.prepare(
            &mut *ctx.backend,
            &self.registry,
            ctx.extensions,
            ctx.shaders,
            &self.material,
        );
        let uniforms = self.registry.uniforms_for(ctx.extensions, &self.material);
        (program, uniforms)
    }

    /// Full-screen draw into `dst` (`None` is the screen).
    pub fn blit(&self, ctx: &mut RenderContext<'_>, dst: Option<TargetId>) {
        let (program, uniforms) = self.prepare(ctx);
        ctx.backend.blit(
            dst,
            BlitSource::Program {
                program,
                uniforms: &uniforms,
            },
        );
    }

    /// Sets the `PASS_STEP` define used by multi-step passes.
    pub fn set_step(&mut self, step: u32) {
        let value = step.to_string();
        if self.material.defines().get("PASS_STEP") != Some(value.as_str()) {
            self.material.defines_mut().set("PASS_STEP", &value);
        }
    }
}
