//! Screen-Space Reflections
//!
//! Two modes, fixed at construction:
//!
//! - **Inline** (default): the [`SsrExtension`] traces rays inside the
//!   physical material shader. The pass does nothing and never swaps.
//! - **Separate target**: the pass traces into a plugin-owned persistent
//!   target at a size multiplier, blending with its own previous result,
//!   and the extension samples that target as `tSSReflMap`.
//!
//! The extension lives in the [`ExtensionStore`](crate::pipeline::ExtensionStore),
//! so it cannot borrow the pass. [`SsrPlugin`] copies the pass defines and
//! uniforms into it on every `PreFrame`.

use glam::{Vec2, Vec3, Vec4};

use super::velocity::VelocityPlugin;
use super::{
    any_accessors, dispose_persistent, pass_accessors, rebind_extension, resize_persistent,
};
use crate::errors::{PipelineError, Result};
use crate::graph::{
    BackendInfo, BlitSource, GpuBackend, PassMaterial, PassRelations, PassState, PostPass,
    RenderContext, TargetId,
};
use crate::host::{HostEvent, PipelineCore, Plugin, PluginSet};
use crate::pipeline::{ExtensionId, MaterialExtension, MaterialExtensionRegistry, ShaderBuilder};
use crate::resources::properties::uniform_table;
use crate::resources::{
    Material, MaterialFlags, MaterialKind, PropertyDescriptor, PropertySet, ShaderDefines,
    UniformTable,
};

const SSR_PARS: &str = "\
#if defined(SSREFL_ENABLED) && SSREFL_ENABLED > 0
uniform float ssrPower;
uniform float ssrIntensity;
uniform float ssrMaskFrontFactor;
uniform vec3 ssrBoost;
uniform sampler2D tSSReflMap;
uniform sampler2D tLastFrame;
#endif";

const SSR_PATCH: &str = "\
#if defined(SSREFL_ENABLED) && SSREFL_ENABLED > 0
reflectedLight.indirectSpecular += ssrIntensity * ssrBoost * getSSReflection(vUv);
#endif";

/// Reflection contribution on physical materials.
#[derive(Debug, Default)]
pub struct SsrExtension {
    enabled: bool,
    split: bool,
    defines: ShaderDefines,
    uniforms: UniformTable,
}

impl SsrExtension {
    /// `SSREFL_ENABLED` for `material`: 0 off, 1 on, 2 split-screen.
    #[must_use]
    pub fn level(&self, material: &Material) -> u8 {
        if !self.enabled || material.opted_out(MaterialFlags::SSR_DISABLED) {
            0
        } else if self.split {
            2
        } else {
            1
        }
    }

    fn update(
        &mut self,
        enabled: bool,
        split: bool,
        defines: ShaderDefines,
        uniforms: UniformTable,
    ) {
        self.enabled = enabled;
        self.split = split;
        self.defines = defines;
        self.uniforms = uniforms;
    }
}

impl MaterialExtension for SsrExtension {
    fn name(&self) -> &'static str {
        "ssr"
    }

    fn is_compatible(&self, material: &Material) -> bool {
        material.is_physical()
    }

    fn cache_key(&self, material: &Material) -> String {
        let values: Vec<&str> = self.defines.to_map().into_values().collect();
        format!(
            "{}{}{}",
            u8::from(self.enabled),
            self.level(material),
            values.join(",")
        )
    }

    fn extra_defines(&self, material: &Material, defines: &mut ShaderDefines) {
        defines.merge(&self.defines);
        defines.set_value("SSREFL_ENABLED", self.level(material));
    }

    fn extra_uniforms(&self, material: &Material, uniforms: &mut UniformTable) {
        if self.level(material) > 0 {
            uniforms.merge(&self.uniforms);
        }
    }

    fn extend_shader(
        &self,
        shader: &mut ShaderBuilder<'_>,
        material: &Material,
        _backend: &BackendInfo,
    ) {
        if self.level(material) == 0 {
            return;
        }
        shader.fragment.append("common", SSR_PARS);
        shader.fragment.prepend("lights_fragment_end", SSR_PATCH);
    }

    any_accessors!();
}

/// The `ssr` pass.
#[derive(Debug)]
pub struct SsrPass {
    relations: PassRelations,
    state: PassState,
    props: PropertySet,
    material: PassMaterial,
    inline: bool,
    boost: Vec3,
    target: Option<TargetId>,
    multiplier: f32,
}

impl SsrPass {
    pub const NAME: &'static str = "ssr";
    /// Shared target name in separate-target mode.
    pub const TARGET: &'static str = "ssr";

    #[must_use]
    pub fn new(inline: bool, target: Option<TargetId>, multiplier: f32) -> Self {
        let props = PropertySet::new(vec![
            PropertyDescriptor::uniform("intensity", "intensity", 1.0).range(0.0, 4.0),
            PropertyDescriptor::uniform("objectRadius", "objectRadius", 1.0)
                .range(0.01, 2.0)
                .label("Object Radius"),
            PropertyDescriptor::uniform("autoRadius", "autoRadius", true).label("Auto radius"),
            PropertyDescriptor::uniform("power", "power", 1.1).range(0.0, 3.0),
            PropertyDescriptor::uniform("tolerance", "tolerance", 0.5).range(0.1, 5.0),
            PropertyDescriptor::uniform("roughnessFactor", "ssrRoughnessFactor", 1.0)
                .range(0.1, 1.25)
                .label("Roughness Factor"),
            PropertyDescriptor::define("stepCount", "SSR_STEP_COUNT", 16_i64)
                .range(1.0, 32.0)
                .step(1.0)
                .label("Step count"),
            PropertyDescriptor::define("rayCount", "SSR_RAY_COUNT", 1_i64)
                .range(1.0, 8.0)
                .step(1.0)
                .label("Ray count"),
            PropertyDescriptor::define("rayBlendMax", "SSR_RAY_BLEND_MAX", false)
                .label("Ray Blend MAX"),
            PropertyDescriptor::define("lowQualityFrames", "SSR_LOW_QUALITY_FRAMES", 0_i64)
                .range(0.0, 4.0)
                .step(1.0)
                .label("Low Quality Frames"),
            PropertyDescriptor::define("maskFrontRays", "SSR_MASK_FRONT_RAYS", true)
                .label("Ignore front rays"),
            PropertyDescriptor::uniform("maskFrontFactor", "maskFrontFactor", -0.2)
                .range(-1.0, 1.0)
                .step(0.01),
            PropertyDescriptor::uniform("split", "ssrSplitX", 0.0)
                .range(0.0, 1.0)
                .step(0.01)
                .label("Split"),
        ]);
        let mut material = PassMaterial::new(MaterialKind::Effect("ssr"));
        let defines = material.material.defines_mut();
        defines.set_bool("SSR_INLINE", inline);
        defines.set("PERSPECTIVE_CAMERA", "1");
        material.sync_properties(&props);
        Self {
            relations: PassRelations::new()
                .before(&["render"])
                .after(&["gbuffer", "depth"])
                .required(&["render", "progressive"]),
            state: PassState {
                clear: true,
                ..PassState::in_place()
            },
            props,
            material,
            inline,
            boost: Vec3::ONE,
            target,
            multiplier,
        }
    }

    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.inline
    }

    #[must_use]
    pub fn target(&self) -> Option<TargetId> {
        self.target
    }

    #[must_use]
    pub fn boost(&self) -> Vec3 {
        self.boost
    }

    pub fn set_boost(&mut self, boost: Vec3) {
        self.boost = boost;
    }

    pub fn registry_mut(&mut self) -> &mut MaterialExtensionRegistry {
        &mut self.material.registry
    }

    /// Defines forwarded to scene materials.
    #[must_use]
    pub fn material_defines(&self) -> ShaderDefines {
        let mut defines = ShaderDefines::new();
        for (key, value) in self.material.material.defines().to_map() {
            if key.starts_with("SSR_") || key == "PERSPECTIVE_CAMERA" {
                defines.set(key, value);
            }
        }
        defines
    }

    /// Uniforms forwarded to scene materials, renamed as the material
    /// shader expects them.
    #[must_use]
    pub fn material_uniforms(&self, last_frame: Option<TargetId>) -> UniformTable {
        let mut uniforms = UniformTable::new();
        uniforms.set("ssrPower", self.props.float("power"));
        uniforms.set("ssrIntensity", self.props.float("intensity"));
        uniforms.set("ssrMaskFrontFactor", self.props.float("maskFrontFactor"));
        uniforms.set("ssrBoost", self.boost);
        if let Some(target) = self.target {
            uniforms.set("tSSReflMap", target);
        }
        if let Some(last) = last_frame {
            uniforms.set("tLastFrame", last);
        }
        if self.inline {
            uniforms.merge(&uniform_table(&self.props));
        }
        uniforms
    }
}

impl PostPass for SsrPass {
    pass_accessors!();

    fn properties(&self) -> Option<&PropertySet> {
        Some(&self.props)
    }

    fn properties_mut(&mut self) -> Option<&mut PropertySet> {
        Some(&mut self.props)
    }

    fn before_render(&mut self, _ctx: &mut RenderContext<'_>) -> bool {
        self.material.sync_properties(&self.props);
        true
    }

    fn render(
        &mut self,
        ctx: &mut RenderContext<'_>,
        write: TargetId,
        read: TargetId,
        _delta: f32,
        _mask_active: bool,
    ) -> Result<()> {
        self.state.needs_swap = false;
        if self.inline {
            return Ok(());
        }
        let target = self.target.ok_or_else(|| PipelineError::TargetNotReady {
            pass: Self::NAME.to_string(),
            target: Self::TARGET.to_string(),
        })?;
        let gbuffer = ctx.require_shared(Self::NAME, "gbuffer")?;

        // The write buffer is scratch here; it keeps last frame's reflections.
        ctx.backend.blit(Some(write), BlitSource::Target(target));

        let camera = ctx.camera();
        let last_frame = ctx.history.get_previous("progressive").unwrap_or(read);
        let world = camera.view.inverse();
        let uniforms = &mut self.material.material.uniforms;
        uniforms.set("tDiffuse", read);
        uniforms.set("tLastThis", write);
        uniforms.set("tLastFrame", last_frame);
        uniforms.set("tGBuffer", gbuffer);
        uniforms.set("boost", self.boost);
        uniforms.set("frameCount", ctx.frame.frame() as i32);
        uniforms.set("cameraNearFar", Vec2::new(camera.near, camera.far));
        uniforms.set("cameraPositionWorld", world.w_axis.truncate());
        uniforms.set("projection", camera.projection);
        uniforms.set("inverseViewMatrix", world);
        uniforms.set(
            "currentProjectionViewMatrix",
            ctx.camera_history.current_view_projection(),
        );
        uniforms.set(
            "lastProjectionViewMatrix",
            ctx.camera_history.previous_view_projection(),
        );

        ctx.backend.set_render_target(Some(target));
        if self.state.clear {
            ctx.backend.clear(Vec4::ZERO);
        }
        self.material.blit(ctx, Some(target));
        ctx.shared.publish(Self::TARGET, target);
        Ok(())
    }

    fn resize(&mut self, backend: &mut dyn GpuBackend, width: u32, height: u32) {
        resize_persistent(backend, &mut self.target, width, height, self.multiplier);
    }

    fn dispose(&mut self, backend: &mut dyn GpuBackend) {
        dispose_persistent(backend, &mut self.target);
    }
}

/// Adds the `ssr` pass and its material extension.
#[derive(Debug)]
pub struct SsrPlugin {
    inline: bool,
    multiplier: f32,
    extension: Option<ExtensionId>,
    velocity: Option<ExtensionId>,
}

impl SsrPlugin {
    /// Inline ray tracing in the material shader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inline: true,
            multiplier: 1.0,
            extension: None,
            velocity: None,
        }
    }

    /// Traces into a separate target at `multiplier` × viewport size.
    #[must_use]
    pub fn with_target(multiplier: f32) -> Self {
        Self {
            inline: false,
            multiplier,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn extension(&self) -> Option<ExtensionId> {
        self.extension
    }

    /// Copies the pass state into the extension.
    fn sync(&self, core: &mut PipelineCore) {
        let Some(pass) = core.graph.downcast::<SsrPass>(SsrPass::NAME) else {
            return;
        };
        let enabled = pass.state().enabled;
        let split = pass.properties().is_some_and(|p| p.float("split") > 0.0);
        let defines = pass.material_defines();
        let uniforms = pass.material_uniforms(core.history.get_previous("progressive"));
        if let Some(target) = pass.target() {
            core.shared.publish(SsrPass::TARGET, target);
        }
        if let Some(ext) = self
            .extension
            .and_then(|id| core.extensions.downcast_mut::<SsrExtension>(id))
        {
            ext.update(enabled, split, defines, uniforms);
        }
    }
}

impl Default for SsrPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for SsrPlugin {
    fn name(&self) -> &'static str {
        SsrPass::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["gbuffer"]
    }

    fn attach(&mut self, core: &mut PipelineCore) -> Result<()> {
        let target = (!self.inline).then(|| core.create_persistent_target("ssr", self.multiplier));
        if let Err(e) = core
            .graph
            .register(Box::new(SsrPass::new(self.inline, target, self.multiplier)))
        {
            if let Some(t) = target {
                core.backend_mut().dispose_target(t);
            }
            return Err(e);
        }
        self.extension = Some(core.add_material_extension(Box::new(SsrExtension::default())));
        self.sync(core);
        Ok(())
    }

    fn detach(&mut self, core: &mut PipelineCore) {
        if let Some(id) = self.extension.take() {
            core.remove_material_extension(id);
        }
        self.velocity = None;
        core.shared.withdraw(SsrPass::TARGET);
        if let Err(e) = core.remove_pass(SsrPass::NAME) {
            log::warn!("{e}");
        }
    }

    fn bind(&mut self, core: &mut PipelineCore, others: &PluginSet<'_>) {
        let wanted = others
            .get::<VelocityPlugin>()
            .and_then(VelocityPlugin::unpack_extension);
        if let Some(pass) = core.graph.downcast_mut::<SsrPass>(SsrPass::NAME) {
            rebind_extension(pass.registry_mut(), &mut self.velocity, wanted);
        }
    }

    fn on_event(&mut self, core: &mut PipelineCore, event: &HostEvent) {
        match event {
            HostEvent::PreFrame | HostEvent::Resize { .. } => self.sync(core),
            _ => {}
        }
    }

    any_accessors!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_respects_material_opt_out() {
        let mut ext = SsrExtension::default();
        let plain = Material::physical();
        let opted = Material::physical().with_flags(MaterialFlags::SSR_DISABLED);
        assert_eq!(ext.level(&plain), 0);

        ext.update(true, false, ShaderDefines::new(), UniformTable::new());
        assert_eq!(ext.level(&plain), 1);
        assert_eq!(ext.level(&opted), 0);

        ext.update(true, true, ShaderDefines::new(), UniformTable::new());
        assert_eq!(ext.level(&plain), 2);
    }

    #[test]
    fn key_tracks_step_count() {
        let mut pass = SsrPass::new(true, None, 1.0);
        let mut ext = SsrExtension::default();
        let material = Material::physical();

        pass.material.sync_properties(&pass.props);
        ext.update(true, false, pass.material_defines(), UniformTable::new());
        let before = ext.cache_key(&material);

        pass.properties_mut().unwrap().set("stepCount", 8_i64).unwrap();
        pass.material.sync_properties(&pass.props);
        ext.update(true, false, pass.material_defines(), UniformTable::new());
        assert_ne!(before, ext.cache_key(&material));
    }

    #[test]
    fn only_physical_materials() {
        let ext = SsrExtension::default();
        assert!(ext.is_compatible(&Material::physical()));
        assert!(!ext.is_compatible(&Material::new(MaterialKind::Basic)));
    }
}
