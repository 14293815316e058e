//! Built-in Passes
//!
//! The passes every pipeline has, so effect relations such as
//! `required: ["render"]` resolve:
//!
//! - `render`: draws the scene into the write buffer (swaps)
//! - `progressive`: accumulates the colour into history key `progressive`
//!   and writes the average back in place (never swaps)
//! - `screen`: final output through the screen material, which carries its
//!   own extension registry
//!
//! [`GBufferPlugin`] adds the optional `gbuffer` pass that renders normals
//! and depth into a persistent target published as shared `gbuffer`.

use glam::Vec4;

use super::{any_accessors, dispose_persistent, pass_accessors, resize_persistent};
use crate::errors::{PipelineError, Result};
use crate::graph::{
    BlitSource, GpuBackend, PassMaterial, PassRelations, PassState, PostPass, RenderContext,
    TargetId, TargetSpec,
};
use crate::host::{HostEvent, PipelineCore, Plugin};
use crate::pipeline::MaterialExtensionRegistry;
use crate::resources::{Material, MaterialKind};

// ─── Render ───────────────────────────────────────────────────────────────────

/// Scene draw into the write buffer.
#[derive(Debug)]
pub struct RenderPass {
    relations: PassRelations,
    state: PassState,
    pub background: Vec4,
}

impl RenderPass {
    pub const NAME: &'static str = "render";

    #[must_use]
    pub fn new() -> Self {
        Self {
            relations: PassRelations::new(),
            state: PassState {
                clear: true,
                ..PassState::default()
            },
            background: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }
}

impl Default for RenderPass {
    fn default() -> Self {
        Self::new()
    }
}

impl PostPass for RenderPass {
    pass_accessors!();

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        write: TargetId,
        _read: TargetId,
        _delta: f32,
        _mask_active: bool,
    ) -> Result<()> {
        let items = ctx.scene_draw_items(None, None);
        let camera = ctx.camera();
        ctx.backend.set_render_target(Some(write));
        if self.state.clear {
            ctx.backend.clear(self.background);
        }
        ctx.backend.draw(Some(write), camera, &items);
        Ok(())
    }
}

// ─── Progressive ──────────────────────────────────────────────────────────────

/// Running average of the final colour over accumulation frames.
#[derive(Debug)]
pub struct ProgressivePass {
    relations: PassRelations,
    state: PassState,
    material: PassMaterial,
}

impl ProgressivePass {
    pub const NAME: &'static str = "progressive";
    /// History key holding the accumulated image.
    pub const HISTORY_KEY: &'static str = "progressive";

    #[must_use]
    pub fn new() -> Self {
        Self {
            relations: PassRelations::new().after(&["render"]),
            state: PassState::in_place(),
            material: PassMaterial::new(MaterialKind::Effect("progressive")),
        }
    }
}

impl Default for ProgressivePass {
    fn default() -> Self {
        Self::new()
    }
}

impl PostPass for ProgressivePass {
    pass_accessors!();

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        _write: TargetId,
        read: TargetId,
        _delta: f32,
        _mask_active: bool,
    ) -> Result<()> {
        let spec = ctx
            .backend
            .target_spec(read)
            .ok_or_else(|| PipelineError::TargetNotReady {
                pass: Self::NAME.to_string(),
                target: "read".to_string(),
            })?;
        let spec = TargetSpec::new(Self::HISTORY_KEY, spec.width, spec.height, spec.format);
        let accumulated = ctx.history.ensure_pair(&mut *ctx.backend, Self::HISTORY_KEY, &spec);

        let frame = ctx.frame.frame();
        match ctx.history.get_previous(Self::HISTORY_KEY) {
            Some(last) if frame > 0 => {
                let uniforms = &mut self.material.material.uniforms;
                uniforms.set("tCurrent", read);
                uniforms.set("tLast", last);
                uniforms.set("blendWeight", 1.0 / (frame as f32 + 1.0));
                self.material.blit(ctx, Some(accumulated));
                ctx.backend.blit(Some(read), BlitSource::Target(accumulated));
            }
            _ => ctx.backend.blit(Some(accumulated), BlitSource::Target(read)),
        }
        ctx.history.commit_pair(Self::HISTORY_KEY);
        Ok(())
    }
}

// ─── Screen ───────────────────────────────────────────────────────────────────

/// Final output to the default framebuffer.
#[derive(Debug)]
pub struct ScreenPass {
    relations: PassRelations,
    state: PassState,
    material: PassMaterial,
}

impl ScreenPass {
    pub const NAME: &'static str = "screen";

    #[must_use]
    pub fn new() -> Self {
        Self {
            relations: PassRelations::new().after(&["render", "progressive"]),
            state: PassState {
                render_to_screen: true,
                ..PassState::in_place()
            },
            material: PassMaterial::new(MaterialKind::Screen),
        }
    }

    /// Extensions applied to the screen material (outline, for instance).
    pub fn registry_mut(&mut self) -> &mut MaterialExtensionRegistry {
        &mut self.material.registry
    }

    #[must_use]
    pub fn registry(&self) -> &MaterialExtensionRegistry {
        &self.material.registry
    }

    #[must_use]
    pub fn material(&self) -> &Material {
        &self.material.material
    }
}

impl Default for ScreenPass {
    fn default() -> Self {
        Self::new()
    }
}

impl PostPass for ScreenPass {
    pass_accessors!();

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        _write: TargetId,
        read: TargetId,
        _delta: f32,
        _mask_active: bool,
    ) -> Result<()> {
        self.material.material.uniforms.set("tDiffuse", read);
        let dst = if self.state.render_to_screen {
            None
        } else {
            Some(read)
        };
        ctx.backend.set_render_target(dst);
        self.material.blit(ctx, dst);
        Ok(())
    }
}

// ─── GBuffer ──────────────────────────────────────────────────────────────────

/// Normal + depth pre-pass into a persistent target.
#[derive(Debug)]
pub struct GBufferPass {
    relations: PassRelations,
    state: PassState,
    material: PassMaterial,
    target: Option<TargetId>,
}

impl GBufferPass {
    pub const NAME: &'static str = "gbuffer";
    /// Shared target name.
    pub const TARGET: &'static str = "gbuffer";

    fn new(target: TargetId) -> Self {
        let mut material = PassMaterial::new(MaterialKind::Basic);
        material.material.name = "gbuffer".to_string();
        material.material.defines_mut().set("GBUFFER_OUTPUT", "1");
        Self {
            relations: PassRelations::new().before(&["render"]),
            state: PassState::in_place(),
            material,
            target: Some(target),
        }
    }

    #[must_use]
    pub fn target(&self) -> Option<TargetId> {
        self.target
    }
}

impl PostPass for GBufferPass {
    pass_accessors!();

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        _write: TargetId,
        _read: TargetId,
        _delta: f32,
        _mask_active: bool,
    ) -> Result<()> {
        let target = self.target.ok_or_else(|| PipelineError::TargetNotReady {
            pass: Self::NAME.to_string(),
            target: Self::TARGET.to_string(),
        })?;
        let items = ctx.scene_draw_items(
            Some((&self.material.registry, &self.material.material)),
            None,
        );
        let camera = ctx.camera();
        ctx.backend.set_render_target(Some(target));
        // Up-facing normal, far depth.
        ctx.backend.clear(Vec4::new(0.5, 1.0, 0.5, 1.0));
        ctx.backend.draw(Some(target), camera, &items);
        ctx.shared.publish(Self::TARGET, target);
        Ok(())
    }

    fn resize(&mut self, backend: &mut dyn GpuBackend, width: u32, height: u32) {
        resize_persistent(backend, &mut self.target, width, height, 1.0);
    }

    fn dispose(&mut self, backend: &mut dyn GpuBackend) {
        dispose_persistent(backend, &mut self.target);
    }
}

/// Adds the `gbuffer` pass.
#[derive(Debug, Default)]
pub struct GBufferPlugin;

impl GBufferPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn publish(core: &mut PipelineCore) {
        if let Some(target) = core
            .graph
            .downcast::<GBufferPass>(GBufferPass::NAME)
            .and_then(GBufferPass::target)
        {
            core.shared.publish(GBufferPass::TARGET, target);
        }
    }
}

impl Plugin for GBufferPlugin {
    fn name(&self) -> &'static str {
        "gbuffer"
    }

    fn attach(&mut self, core: &mut PipelineCore) -> Result<()> {
        let (w, h) = core.viewport();
        let spec =
            TargetSpec::new("gbuffer", w, h, wgpu::TextureFormat::Rgba16Float).with_depth(true);
        let target = core.backend_mut().create_target(&spec);
        if let Err(e) = core.graph.register(Box::new(GBufferPass::new(target))) {
            core.backend_mut().dispose_target(target);
            return Err(e);
        }
        Self::publish(core);
        Ok(())
    }

    fn detach(&mut self, core: &mut PipelineCore) {
        core.shared.withdraw(GBufferPass::TARGET);
        if let Err(e) = core.remove_pass(GBufferPass::NAME) {
            log::warn!("{e}");
        }
    }

    fn on_event(&mut self, core: &mut PipelineCore, event: &HostEvent) {
        if let HostEvent::Resize { .. } = event {
            Self::publish(core);
        }
    }

    any_accessors!();
}
