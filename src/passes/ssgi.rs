//! Screen-Space Global Illumination
//!
//! Ray-marched indirect diffuse and occlusion into a plugin-owned
//! persistent target, optionally smoothed with a bilateral step, then
//! applied to physical materials by [`SsgiExtension`]. The extension takes
//! over the `aomap_fragment` slot, so any later edit of that slot is
//! dropped.

use glam::{Vec2, Vec4};

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
use crate::resources::{
    Material, MaterialFlags, MaterialKind, PropertyDescriptor, PropertySet, ShaderDefines,
    UniformTable,
};

const SSGI_PARS: &str = "\
#if defined(SSRTAO_ENABLED) && SSRTAO_ENABLED > 0
uniform float ssaoPower;
uniform float ssgiIntensity;
uniform sampler2D tSSGIMap;
#if SSRTAO_ENABLED == 2
uniform float ssrtaoSplitX;
#endif
#endif";

const SSGI_PATCH: &str = "\
#if defined(SSRTAO_ENABLED) && SSRTAO_ENABLED > 0
vec4 ssgiTexel = texture2D(tSSGIMap, vUv);
float ambientOcclusion = pow(ssgiTexel.a, ssaoPower);
reflectedLight.indirectDiffuse *= ambientOcclusion;
#if defined(SSGI_ENABLED) && SSGI_ENABLED > 0
reflectedLight.indirectDiffuse += ssgiIntensity * ssgiTexel.rgb;
#endif
#endif";

/// Indirect light and occlusion on physical materials.
#[derive(Debug, Default)]
pub struct SsgiExtension {
    active: bool,
    split: bool,
    target: Option<TargetId>,
    defines: ShaderDefines,
    uniforms: UniformTable,
}

impl SsgiExtension {
    /// `SSRTAO_ENABLED` for `material`: 0 off, 1 on, 2 split-screen.
    #[must_use]
    pub fn level(&self, material: &Material) -> u8 {
        if !self.active || material.opted_out(MaterialFlags::SSGI_DISABLED) {
            0
        } else if self.split {
            2
        } else {
            1
        }
    }
}

impl MaterialExtension for SsgiExtension {
    fn name(&self) -> &'static str {
        "ssgi"
    }

    fn is_compatible(&self, material: &Material) -> bool {
        material.is_physical()
    }

    fn cache_key(&self, material: &Material) -> String {
        let values: Vec<&str> = self.defines.to_map().into_values().collect();
        format!(
            "{}{}{}{}",
            u8::from(self.active),
            self.level(material),
            u8::from(self.target.is_some()),
            values.join(",")
        )
    }

    fn extra_defines(&self, material: &Material, defines: &mut ShaderDefines) {
        defines.merge(&self.defines);
        defines.set_value("SSRTAO_ENABLED", self.level(material));
    }

    fn extra_uniforms(&self, material: &Material, uniforms: &mut UniformTable) {
        if self.level(material) == 0 {
            return;
        }
        uniforms.merge(&self.uniforms);
        if let Some(target) = self.target {
            uniforms.set("tSSGIMap", target);
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
        shader.fragment.append("common", SSGI_PARS);
        shader.fragment.prepend("lights_fragment_end", SSGI_PATCH);
        shader.fragment.remove("aomap_fragment");
    }

    any_accessors!();
}

/// The `ssgi` pass.
#[derive(Debug)]
pub struct SsgiPass {
    relations: PassRelations,
    state: PassState,
    props: PropertySet,
    material: PassMaterial,
    bilateral: PassMaterial,
    target: Option<TargetId>,
    multiplier: f32,
}

impl SsgiPass {
    pub const NAME: &'static str = "ssgi";
    /// Shared target name.
    pub const TARGET: &'static str = "ssgi";

    #[must_use]
    pub fn new(target: Option<TargetId>, multiplier: f32) -> Self {
        let props = PropertySet::new(vec![
            PropertyDescriptor::define("giEnabled", "SSGI_ENABLED", true).label("GI Enabled"),
            PropertyDescriptor::uniform("intensity", "intensity", 2.0).range(0.0, 4.0),
            PropertyDescriptor::uniform("power", "power", 1.1).range(0.0, 3.0),
            PropertyDescriptor::uniform("autoRadius", "autoRadius", true).label("Auto radius"),
            PropertyDescriptor::uniform("objectRadius", "objectRadius", 1.0)
                .range(0.01, 10.0)
                .label("Object Radius"),
            PropertyDescriptor::uniform("tolerance", "tolerance", 1.0).range(0.1, 5.0),
            PropertyDescriptor::uniform("bias", "bias", 0.001).range(-0.3, 0.3),
            PropertyDescriptor::uniform("falloff", "falloff", 0.7).range(0.0001, 4.0),
            PropertyDescriptor::uniform("rayCount", "rayCount", 4.0)
                .range(1.0, 5.0)
                .step(1.0)
                .label("Ray Count"),
            PropertyDescriptor::define("stepCount", "RTAO_STEP_COUNT", 8_i64)
                .range(1.0, 16.0)
                .step(1.0)
                .label("Step count"),
            PropertyDescriptor::plain("smoothEnabled", true).label("Smooth Enabled"),
            PropertyDescriptor::plain("renderWithCamera", true).label("Render with Camera"),
            PropertyDescriptor::uniform("split", "ssrtaoSplitX", 0.0)
                .range(0.0, 1.0)
                .step(0.01)
                .label("Split"),
        ]);
        let mut material = PassMaterial::new(MaterialKind::Effect("ssgi"));
        material.material.defines_mut().set("PERSPECTIVE_CAMERA", "1");
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
            bilateral: PassMaterial::new(MaterialKind::Effect("bilateral")),
            target,
            multiplier,
        }
    }

    #[must_use]
    pub fn target(&self) -> Option<TargetId> {
        self.target
    }

    pub fn registry_mut(&mut self) -> &mut MaterialExtensionRegistry {
        &mut self.material.registry
    }

    /// Whether the pass traces on accumulation frame `frame`.
    #[must_use]
    pub fn traces_on(&self, frame: u32) -> bool {
        self.props.flag("renderWithCamera") || frame >= 2
    }

    fn material_defines(&self) -> ShaderDefines {
        let mut defines = ShaderDefines::new();
        for (key, value) in self.material.material.defines().to_map() {
            if key == "SSGI_ENABLED" || key == "RTAO_STEP_COUNT" {
                defines.set(key, value);
            }
        }
        defines
    }

    fn material_uniforms(&self) -> UniformTable {
        let mut uniforms = UniformTable::new();
        uniforms.set("ssaoPower", self.props.float("power"));
        uniforms.set("ssgiIntensity", self.props.float("intensity"));
        uniforms.set("ssrtaoSplitX", self.props.float("split"));
        uniforms
    }
}

impl PostPass for SsgiPass {
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
        if !self.traces_on(ctx.frame.frame()) {
            return Ok(());
        }
        let target = self.target.ok_or_else(|| PipelineError::TargetNotReady {
            pass: Self::NAME.to_string(),
            target: Self::TARGET.to_string(),
        })?;
        let gbuffer = ctx.require_shared(Self::NAME, "gbuffer")?;

        ctx.backend.blit(Some(write), BlitSource::Target(target));

        let camera = ctx.camera();
        let world = camera.view.inverse();
        let last_frame = ctx.history.get_previous("progressive").unwrap_or(read);
        let uniforms = &mut self.material.material.uniforms;
        uniforms.set("tDiffuse", read);
        uniforms.set("tLastThis", write);
        uniforms.set("tLastFrame", last_frame);
        uniforms.set("tGBuffer", gbuffer);
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

        if self.props.flag("smoothEnabled") {
            // Filter through the scratch write buffer and back.
            let uniforms = &mut self.bilateral.material.uniforms;
            uniforms.set("tDiffuse", target);
            uniforms.set("tGBuffer", gbuffer);
            ctx.backend.set_render_target(Some(write));
            self.bilateral.blit(ctx, Some(write));
            ctx.backend.blit(Some(target), BlitSource::Target(write));
        }
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

/// Adds the `ssgi` pass and its material extension.
#[derive(Debug)]
pub struct SsgiPlugin {
    multiplier: f32,
    extension: Option<ExtensionId>,
    velocity: Option<ExtensionId>,
}

impl SsgiPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self::with_size_multiplier(1.0)
    }

    /// Target at `multiplier` × viewport size, fixed at attach time.
    #[must_use]
    pub fn with_size_multiplier(multiplier: f32) -> Self {
        Self {
            multiplier,
            extension: None,
            velocity: None,
        }
    }

    #[must_use]
    pub fn extension(&self) -> Option<ExtensionId> {
        self.extension
    }

    fn sync(&self, core: &mut PipelineCore) {
        let Some(pass) = core.graph.downcast::<SsgiPass>(SsgiPass::NAME) else {
            return;
        };
        let active = pass.state().enabled && pass.traces_on(core.frame.frame());
        let split = pass.props.float("split") > 0.0;
        let target = pass.target();
        let defines = pass.material_defines();
        let uniforms = pass.material_uniforms();
        match target {
            Some(t) => core.shared.publish(SsgiPass::TARGET, t),
            None => {
                core.shared.withdraw(SsgiPass::TARGET);
            }
        }
        if let Some(ext) = self
            .extension
            .and_then(|id| core.extensions.downcast_mut::<SsgiExtension>(id))
        {
            ext.active = active;
            ext.split = split;
            ext.target = target;
            ext.defines = defines;
            ext.uniforms = uniforms;
        }
    }
}

impl Default for SsgiPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for SsgiPlugin {
    fn name(&self) -> &'static str {
        SsgiPass::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["gbuffer"]
    }

    fn attach(&mut self, core: &mut PipelineCore) -> Result<()> {
        let target = core.create_persistent_target("ssgi", self.multiplier);
        if let Err(e) = core
            .graph
            .register(Box::new(SsgiPass::new(Some(target), self.multiplier)))
        {
            core.backend_mut().dispose_target(target);
            return Err(e);
        }
        self.extension = Some(core.add_material_extension(Box::new(SsgiExtension::default())));
        self.sync(core);
        Ok(())
    }

    fn detach(&mut self, core: &mut PipelineCore) {
        if let Some(id) = self.extension.take() {
            core.remove_material_extension(id);
        }
        self.velocity = None;
        core.shared.withdraw(SsgiPass::TARGET);
        if let Err(e) = core.remove_pass(SsgiPass::NAME) {
            log::warn!("{e}");
        }
    }

    fn bind(&mut self, core: &mut PipelineCore, others: &PluginSet<'_>) {
        let wanted = others
            .get::<VelocityPlugin>()
            .and_then(VelocityPlugin::unpack_extension);
        if let Some(pass) = core.graph.downcast_mut::<SsgiPass>(SsgiPass::NAME) {
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
    fn camera_toggle_delays_tracing() {
        let mut pass = SsgiPass::new(None, 1.0);
        assert!(pass.traces_on(0));
        pass.properties_mut()
            .unwrap()
            .set("renderWithCamera", false)
            .unwrap();
        assert!(!pass.traces_on(0));
        assert!(!pass.traces_on(1));
        assert!(pass.traces_on(2));
    }

    #[test]
    fn opted_out_material_gets_level_zero() {
        let ext = SsgiExtension {
            active: true,
            ..SsgiExtension::default()
        };
        assert_eq!(ext.level(&Material::physical()), 1);
        let opted = Material::physical().with_flags(MaterialFlags::PLUGINS_DISABLED);
        assert_eq!(ext.level(&opted), 0);
    }

    #[test]
    fn step_count_define_reaches_material_defines() {
        let mut pass = SsgiPass::new(None, 1.0);
        pass.properties_mut().unwrap().set("stepCount", 12_i64).unwrap();
        pass.material.sync_properties(&pass.props);
        assert_eq!(pass.material_defines().get("RTAO_STEP_COUNT"), Some("12"));
        assert_eq!(pass.material_defines().get("SSGI_ENABLED"), Some("1"));
    }
}
