//! Screen-Space Contact Shadows
//!
//! Extension-only plugin: a short screen-space ray march towards each
//! shadow-casting light, folded into the shadow-map lookup of physical
//! materials. There is no pass; the tunables live on the plugin.

use super::any_accessors;
use crate::errors::Result;
use crate::graph::BackendInfo;
use crate::host::{HostEvent, PipelineCore, Plugin};
use crate::pipeline::{ExtensionId, MaterialExtension, ShaderBuilder};
use crate::resources::properties::uniform_table;
use crate::resources::{
    Material, MaterialFlags, PropertyDescriptor, PropertySet, PropertyValue, ShaderDefines,
    UniformTable,
};

const SSCS_PARS: &str = "\
#if defined(SSCS_ENABLED) && SSCS_ENABLED > 0
uniform float sscsIntensity;
uniform float sscsRadius;
uniform float sscsTolerance;
#include <randomHelpers>
#include <ssrt>
float contactShadow(const in vec3 lightDirection) {
    vec3 origin = -vViewPosition;
    float rnd = interleavedGradientNoise(gl_FragCoord.xy, frameCount + 34.0);
    float radius = mix(cameraNearFar.y + origin.z, -origin.z - cameraNearFar.x, rnd * 0.5 + 0.5) * sscsRadius;
    vec3 state = vec3(1.0, (rnd + 0.5) / float(SSCS_STEP_COUNT), 2.0);
    traceRay(origin, normalize(lightDirection) * radius, sscsTolerance * radius * 2.0, state, SSCS_STEP_COUNT);
    return state.z > 0.99 ? 1.0 : clamp(state.z * state.z * (1.0 - sscsIntensity), 0.0, 1.0);
}
#endif";

const SSCS_SHADOW: &str = "\
#if defined(SSCS_ENABLED) && SSCS_ENABLED > 0
#if SSCS_DEBUG > 0
#define CONTACT_SHADOW(shadow, dir) contactShadow(dir)
#else
#define CONTACT_SHADOW(shadow, dir) min(shadow, contactShadow(dir))
#endif
#else
#define CONTACT_SHADOW(shadow, dir) shadow
#endif";

/// Contact shadows on physical materials.
#[derive(Debug)]
pub struct ContactShadowsExtension {
    enabled: bool,
    step_count: i64,
    debug: bool,
    uniforms: UniformTable,
}

impl ContactShadowsExtension {
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            step_count: 2,
            debug: false,
            uniforms: UniformTable::new(),
        }
    }

    /// `SSCS_ENABLED` for `material`.
    #[must_use]
    pub fn level(&self, material: &Material) -> u8 {
        u8::from(!material.opted_out(MaterialFlags::SSCS_DISABLED))
    }

    fn update(&mut self, props: &PropertySet) {
        self.enabled = props.flag("enabled");
        self.step_count = props.int("stepCount");
        self.debug = props.flag("onlySSCSDebug");
        self.uniforms = uniform_table(props);
    }
}

impl Default for ContactShadowsExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialExtension for ContactShadowsExtension {
    fn name(&self) -> &'static str {
        "sscs"
    }

    fn priority(&self) -> i32 {
        -5
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_compatible(&self, material: &Material) -> bool {
        material.is_physical()
    }

    fn cache_key(&self, material: &Material) -> String {
        format!(
            "{}.{}.{}",
            self.level(material),
            self.step_count,
            u8::from(self.debug)
        )
    }

    fn extra_defines(&self, material: &Material, defines: &mut ShaderDefines) {
        defines.set_value("SSCS_ENABLED", self.level(material));
        defines.set_value("SSCS_STEP_COUNT", self.step_count);
        defines.set_bool("SSCS_DEBUG", self.debug);
        defines.set("PERSPECTIVE_CAMERA", "1");
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
        shader.fragment.prepend("shadowmap_pars_fragment", SSCS_PARS);
        shader.fragment.append("shadowmap_pars_fragment", SSCS_SHADOW);
    }

    any_accessors!();
}

/// Adds [`ContactShadowsExtension`] to scene materials.
#[derive(Debug)]
pub struct ContactShadowsPlugin {
    props: PropertySet,
    extension: Option<ExtensionId>,
}

impl ContactShadowsPlugin {
    pub const NAME: &'static str = "contact_shadows";

    #[must_use]
    pub fn new() -> Self {
        Self {
            props: PropertySet::new(vec![
                PropertyDescriptor::plain("enabled", true).label("Enabled"),
                PropertyDescriptor::uniform("radius", "sscsRadius", 0.015)
                    .range(0.0001, 0.1)
                    .step(0.0001)
                    .label("Radius"),
                PropertyDescriptor::uniform("intensity", "sscsIntensity", 1.0)
                    .range(0.0001, 1.0)
                    .step(0.0001)
                    .label("Intensity"),
                PropertyDescriptor::uniform("tolerance", "sscsTolerance", 1.5)
                    .range(0.1, 5.0)
                    .label("Tolerance"),
                PropertyDescriptor::define("onlySSCSDebug", "SSCS_DEBUG", false)
                    .label("Debug only SSCS"),
                PropertyDescriptor::define("stepCount", "SSCS_STEP_COUNT", 2_i64)
                    .range(1.0, 8.0)
                    .step(1.0)
                    .label("Step count"),
            ]),
            extension: None,
        }
    }

    #[must_use]
    pub fn extension(&self) -> Option<ExtensionId> {
        self.extension
    }

    pub fn set_enabled(&mut self, core: &mut PipelineCore, enabled: bool) {
        if let Ok(true) = self.props.set("enabled", enabled) {
            self.sync(core);
            core.set_dirty();
        }
    }

    fn sync(&self, core: &mut PipelineCore) {
        if let Some(ext) = self
            .extension
            .and_then(|id| core.extensions.downcast_mut::<ContactShadowsExtension>(id))
        {
            ext.update(&self.props);
        }
    }
}

impl Default for ContactShadowsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for ContactShadowsPlugin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["gbuffer"]
    }

    fn attach(&mut self, core: &mut PipelineCore) -> Result<()> {
        self.extension =
            Some(core.add_material_extension(Box::new(ContactShadowsExtension::new())));
        self.sync(core);
        Ok(())
    }

    fn detach(&mut self, core: &mut PipelineCore) {
        if let Some(id) = self.extension.take() {
            core.remove_material_extension(id);
        }
    }

    fn on_event(&mut self, core: &mut PipelineCore, event: &HostEvent) {
        if let HostEvent::PreFrame = event {
            self.sync(core);
        }
    }

    fn properties<'c>(&'c self, _core: &'c PipelineCore) -> Option<&'c PropertySet> {
        Some(&self.props)
    }

    fn set_property(
        &mut self,
        core: &mut PipelineCore,
        name: &str,
        value: PropertyValue,
    ) -> Result<bool> {
        let changed = self.props.set(name, value)?;
        if changed {
            self.sync(core);
        }
        Ok(changed)
    }

    fn properties_mut<'c>(
        &'c mut self,
        _core: &'c mut PipelineCore,
    ) -> Option<&'c mut PropertySet> {
        Some(&mut self.props)
    }

    any_accessors!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ExtensionStore, MaterialExtensionRegistry};

    #[test]
    fn key_tracks_step_count() {
        let mut plugin = ContactShadowsPlugin::new();
        let mut ext = ContactShadowsExtension::new();
        ext.update(&plugin.props);
        let material = Material::physical();
        let before = ext.cache_key(&material);

        plugin.props.set("stepCount", 6_i64).unwrap();
        ext.update(&plugin.props);
        assert_ne!(ext.cache_key(&material), before);
        assert_eq!(ext.cache_key(&material), "1.6.0");
    }

    #[test]
    fn disabled_plugin_contributes_no_key() {
        let mut store = ExtensionStore::new();
        let id = store.insert(Box::new(ContactShadowsExtension::new()));
        let mut registry = MaterialExtensionRegistry::new();
        registry.register(id);
        let material = Material::physical();
        assert!(registry.compute_key(&store, &material).starts_with("sscs:"));

        let mut props = ContactShadowsPlugin::new().props;
        props.set("enabled", false).unwrap();
        store
            .downcast_mut::<ContactShadowsExtension>(id)
            .unwrap()
            .update(&props);
        assert!(!registry.compute_key(&store, &material).contains("sscs:"));
    }

    #[test]
    fn opt_out_zeroes_the_level() {
        let ext = ContactShadowsExtension::new();
        let material = Material::physical().with_flags(MaterialFlags::SSCS_DISABLED);
        assert_eq!(ext.level(&material), 0);
        let mut defines = ShaderDefines::new();
        ext.extra_defines(&material, &mut defines);
        assert_eq!(defines.get("SSCS_ENABLED"), Some("0"));
    }
}
