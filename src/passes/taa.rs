//! Temporal Anti-Aliasing
//!
//! Blends the current frame with the previous accumulated frame from the
//! `progressive` history, reprojected with the previous view-projection.
//! TAA only runs while the camera moves (accumulation frames 0 and 1) and
//! only for the main camera; otherwise it passes through without touching
//! either buffer and without swapping.
//!
//! When a [`VelocityPlugin`] is present, its unpack extension is bound to
//! the TAA material so object motion is reprojected too.

use glam::Vec2;

use super::velocity::VelocityPlugin;
use super::{any_accessors, pass_accessors, rebind_extension};
use crate::errors::Result;
use crate::graph::{PassMaterial, PassRelations, PassState, PostPass, RenderContext, TargetId};
use crate::host::{HostEvent, PipelineCore, Plugin, PluginSet};
use crate::pipeline::{ExtensionId, MaterialExtensionRegistry, ShaderSource};
use crate::resources::{MaterialKind, PropertyDescriptor, PropertySet};

/// History key read as the previous frame.
const HISTORY_KEY: &str = "progressive";

const TAA_VERTEX: &str = "#include <fullscreen_vertex>";

const TAA_FRAGMENT: &str = "\
#include <common>
#pragma <effect_pars>
#pragma <velocity_unpack>
void main() {
#pragma <effect_body>
#include <output_fragment>
}";

/// Shader template of the TAA material, with a `velocity_unpack` slot.
#[must_use]
pub fn taa_shader_source() -> ShaderSource {
    ShaderSource::new("taa", TAA_VERTEX, TAA_FRAGMENT)
}

/// The `taa` pass.
#[derive(Debug)]
pub struct TaaPass {
    relations: PassRelations,
    state: PassState,
    props: PropertySet,
    material: PassMaterial,
    taa_enabled: bool,
}

impl TaaPass {
    pub const NAME: &'static str = "taa";

    #[must_use]
    pub fn new() -> Self {
        let props = PropertySet::new(vec![
            PropertyDescriptor::plain("feedbackMin", 0.88)
                .range(0.0, 1.0)
                .step(0.0001),
            PropertyDescriptor::plain("feedbackMax", 0.97)
                .range(0.0, 1.0)
                .step(0.0001),
            PropertyDescriptor::define("debugVelocity", "DEBUG_VELOCITY", false)
                .label("Debug Velocity"),
        ]);
        let mut material = PassMaterial::new(MaterialKind::Effect("taa"));
        let defines = material.material.defines_mut();
        defines.set("QUALITY", "1");
        defines.set("UNJITTER", "0");
        defines.set("BACKGROUND_TAA", "0");
        Self {
            relations: PassRelations::new()
                .before(&["progressive"])
                .after(&["render", "dof"])
                .required(&["render", "progressive"]),
            state: PassState::default(),
            props,
            material,
            taa_enabled: true,
        }
    }

    /// Whether the last `before_render` let the pass run.
    #[must_use]
    pub fn taa_enabled(&self) -> bool {
        self.taa_enabled
    }

    pub fn set_taa_enabled(&mut self, enabled: bool) {
        self.taa_enabled = enabled;
    }

    pub fn registry_mut(&mut self) -> &mut MaterialExtensionRegistry {
        &mut self.material.registry
    }

    #[must_use]
    pub fn registry(&self) -> &MaterialExtensionRegistry {
        &self.material.registry
    }
}

impl Default for TaaPass {
    fn default() -> Self {
        Self::new()
    }
}

impl PostPass for TaaPass {
    pass_accessors!();

    fn properties(&self) -> Option<&PropertySet> {
        Some(&self.props)
    }

    fn properties_mut(&mut self) -> Option<&mut PropertySet> {
        Some(&mut self.props)
    }

    fn before_render(&mut self, ctx: &mut RenderContext<'_>) -> bool {
        self.taa_enabled = ctx.frame.frame() <= 1 && ctx.scene.is_main_camera_active();
        if !self.taa_enabled {
            self.state.needs_swap = false;
        }
        self.taa_enabled
    }

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        write: TargetId,
        read: TargetId,
        _delta: f32,
        _mask_active: bool,
    ) -> Result<()> {
        if !self.taa_enabled || !self.state.enabled {
            self.state.needs_swap = false;
            return Ok(());
        }
        self.state.needs_swap = true;
        self.material.sync_properties(&self.props);

        let camera = ctx.camera();
        // Without history the previous frame is the current one.
        let previous = ctx.history.get_previous(HISTORY_KEY);
        let uniforms = &mut self.material.material.uniforms;
        uniforms.set("currentRT", read);
        uniforms.set("previousRT", previous.unwrap_or(read));
        uniforms.set("firstFrame", previous.is_none());
        uniforms.set(
            "feedBack",
            Vec2::new(self.props.float("feedbackMin"), self.props.float("feedbackMax")),
        );
        uniforms.set("cameraNearFar", Vec2::new(camera.near, camera.far));
        uniforms.set(
            "currentProjectionViewMatrix",
            ctx.camera_history.current_view_projection(),
        );
        uniforms.set(
            "lastProjectionViewMatrix",
            ctx.camera_history.previous_view_projection(),
        );
        uniforms.set("inverseViewMatrix", camera.view.inverse());
        uniforms.set("projection", camera.projection);
        match ctx.shared.get("gbuffer") {
            Some(gbuffer) => uniforms.set("tGBuffer", gbuffer),
            None => {
                uniforms.remove("tGBuffer");
            }
        }

        ctx.backend.set_render_target(Some(write));
        self.material.blit(ctx, Some(write));
        Ok(())
    }
}

/// Adds the `taa` pass.
#[derive(Debug, Default)]
pub struct TaaPlugin {
    velocity: Option<ExtensionId>,
}

impl TaaPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Velocity unpack extension currently bound to the TAA material.
    #[must_use]
    pub fn bound_velocity(&self) -> Option<ExtensionId> {
        self.velocity
    }

    /// Keeps the noise frame counting across accumulation restarts.
    pub fn set_stable_noise(&mut self, core: &mut PipelineCore, stable: bool) {
        core.frame.set_stable_noise(stable);
        core.set_dirty();
    }
}

impl Plugin for TaaPlugin {
    fn name(&self) -> &'static str {
        TaaPass::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["gbuffer"]
    }

    fn attach(&mut self, core: &mut PipelineCore) -> Result<()> {
        core.shaders
            .register(MaterialKind::Effect("taa"), taa_shader_source());
        core.graph.register(Box::new(TaaPass::new()))
    }

    fn detach(&mut self, core: &mut PipelineCore) {
        self.velocity = None;
        if let Err(e) = core.remove_pass(TaaPass::NAME) {
            log::warn!("{e}");
        }
    }

    fn bind(&mut self, core: &mut PipelineCore, others: &PluginSet<'_>) {
        let wanted = others
            .get::<VelocityPlugin>()
            .and_then(VelocityPlugin::unpack_extension);
        let Some(pass) = core.graph.downcast_mut::<TaaPass>(TaaPass::NAME) else {
            return;
        };
        if rebind_extension(pass.registry_mut(), &mut self.velocity, wanted) {
            log::debug!("TAA velocity binding: {:?}", self.velocity);
        }
    }

    fn on_event(&mut self, core: &mut PipelineCore, event: &HostEvent) {
        if let HostEvent::Resize { .. } = event {
            core.history.invalidate(HISTORY_KEY);
        }
    }

    any_accessors!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_exposes_velocity_slot() {
        let source = taa_shader_source();
        assert!(source.fragment.has_slot("velocity_unpack"));
        assert!(source.fragment.has_slot("effect_body"));
    }

    #[test]
    fn feedback_defaults() {
        let pass = TaaPass::new();
        let props = pass.properties().unwrap();
        assert!((props.float("feedbackMin") - 0.88).abs() < 1e-6);
        assert!((props.float("feedbackMax") - 0.97).abs() < 1e-6);
        assert_eq!(
            pass.relations().after,
            vec!["render".to_string(), "dof".to_string()]
        );
        assert_eq!(pass.relations().before, vec!["progressive".to_string()]);
    }
}
