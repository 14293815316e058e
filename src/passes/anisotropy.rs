//! Anisotropic Specular
//!
//! Extension-only plugin for brushed-metal style highlights on physical
//! materials that carry [`AnisotropySettings`] and the `ANISOTROPIC` flag.
//! The direction comes from a constant, or from a direction map read as a
//! rotation angle or as a tangent-space vector.
//!
//! [`AnisotropySettings`]: crate::resources::AnisotropySettings

use super::any_accessors;
use crate::errors::Result;
use crate::graph::BackendInfo;
use crate::host::{PipelineCore, Plugin};
use crate::pipeline::{ExtensionId, MaterialExtension, ShaderBuilder};
use crate::resources::{
    AnisotropySettings, Material, MaterialFlags, PropertyDescriptor, PropertySet, PropertyValue,
    ShaderDefines, UniformTable,
};

const ANISOTROPY_COMMON: &str = "\
#include <randomHelpers>
uniform float anisotropyFactor;
uniform float anisotropyNoise;
uniform float anisotropyDirection;
#if ANISOTROPY_TEX_MODE > 0
uniform sampler2D anisotropyDirectionMap;
#endif";

const ANISOTROPY_BSDF: &str = "\
vec3 BRDF_GGX_Anisotropy(const in vec3 lightDir, const in vec3 viewDir, const in vec3 normal, const in vec3 specularColor, const in float specularF90, const in float roughness, const in vec3 t, const in vec3 b) {
    vec3 h = normalize(lightDir + viewDir);
    float at = max(roughness * (1.0 + anisotropyFactor), 0.001);
    float ab = max(roughness * (1.0 - anisotropyFactor), 0.001);
    float d = D_GGX_Anisotropic(at, ab, dot(normal, h), dot(t, h), dot(b, h));
    return F_Schlick(specularColor, specularF90, saturate(dot(viewDir, h))) * d;
}
#define ANISOTROPIC_BRDF BRDF_GGX_Anisotropy";

const ANISOTROPY_TBN: &str = "\
vec3 anisotropicDirection = vec3(anisotropyDirection, 0.0, 0.0);
#if ANISOTROPY_TEX_MODE == 1
float angle = texture2D(anisotropyDirectionMap, vAnisotropy2MapUv).r * 6.28318530718;
anisotropicDirection = vec3(cos(angle), sin(angle), 0.0);
#elif ANISOTROPY_TEX_MODE == 2
anisotropicDirection = texture2D(anisotropyDirectionMap, vAnisotropy2MapUv).rgb * 2.0 - 1.0;
#endif
anisotropicDirection.xy += anisotropyNoise * (vec2(random(vUv + frameCount), random(vUv - frameCount)) - 0.5);
vec3 anisotropicT = normalize(tbn * anisotropicDirection);
vec3 anisotropicB = normalize(cross(geometryNormal, anisotropicT));";

const ANISOTROPY_VERTEX_PARS: &str = "\
#if defined(ANISOTROPY_ENABLED) && ANISOTROPY_ENABLED > 0
varying vec2 vAnisotropy2MapUv;
uniform mat3 anisotropy2MapUvTransform;
#endif";

const ANISOTROPY_VERTEX: &str = "\
#if defined(ANISOTROPY_ENABLED) && ANISOTROPY_ENABLED > 0
vAnisotropy2MapUv = (anisotropy2MapUvTransform * vec3(uv, 1)).xy;
#endif";

/// Anisotropic BRDF on physical materials.
#[derive(Debug)]
pub struct AnisotropyExtension {
    enabled: bool,
}

impl AnisotropyExtension {
    #[must_use]
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// Anisotropy settings if `material` asked for anisotropic shading.
    fn settings(material: &Material) -> Option<&AnisotropySettings> {
        material
            .flags()
            .contains(MaterialFlags::ANISOTROPIC)
            .then(|| material.anisotropy())
            .flatten()
    }

    /// `ANISOTROPY_TEX_MODE`: constant without a map, else the mode.
    fn tex_mode(settings: &AnisotropySettings) -> &'static str {
        match settings.direction_map {
            Some(_) => settings.mode.define_value(),
            None => "0",
        }
    }
}

impl Default for AnisotropyExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialExtension for AnisotropyExtension {
    fn name(&self) -> &'static str {
        "anisotropy"
    }

    fn priority(&self) -> i32 {
        -10
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_compatible(&self, material: &Material) -> bool {
        material.is_physical()
    }

    fn cache_key(&self, material: &Material) -> String {
        match Self::settings(material) {
            Some(settings) => format!(
                "{}1{}",
                u8::from(self.enabled),
                Self::tex_mode(settings)
            ),
            None => format!("{}0", u8::from(self.enabled)),
        }
    }

    fn extra_defines(&self, material: &Material, defines: &mut ShaderDefines) {
        let Some(settings) = Self::settings(material) else {
            return;
        };
        defines.set("ANISOTROPY_ENABLED", "1");
        defines.set("ANISOTROPY_TEX_MODE", Self::tex_mode(settings));
        defines.set("USE_ANISOTROPY_BRDF", "");
        defines.set("USE_UV", "");
        defines.set("USE_TANGENT", "");
    }

    fn extra_uniforms(&self, material: &Material, uniforms: &mut UniformTable) {
        let Some(settings) = Self::settings(material) else {
            return;
        };
        uniforms.set("anisotropyFactor", settings.factor);
        uniforms.set("anisotropyNoise", settings.noise);
        uniforms.set("anisotropyDirection", settings.direction);
        if let Some(map) = settings.direction_map {
            uniforms.set("anisotropyDirectionMap", map);
        }
    }

    fn extend_shader(
        &self,
        shader: &mut ShaderBuilder<'_>,
        material: &Material,
        _backend: &BackendInfo,
    ) {
        if Self::settings(material).is_none() {
            return;
        }
        shader.fragment.append("common", ANISOTROPY_COMMON);
        shader.fragment.prepend("lights_physical_pars_fragment", ANISOTROPY_BSDF);
        shader.fragment.prepend("lights_fragment_begin", ANISOTROPY_TBN);
        shader.vertex.append("common", ANISOTROPY_VERTEX_PARS);
        shader.vertex.append("begin_vertex", ANISOTROPY_VERTEX);
    }

    any_accessors!();
}

/// Adds [`AnisotropyExtension`] to scene materials.
#[derive(Debug)]
pub struct AnisotropyPlugin {
    props: PropertySet,
    extension: Option<ExtensionId>,
}

impl AnisotropyPlugin {
    pub const NAME: &'static str = "anisotropy";

    #[must_use]
    pub fn new() -> Self {
        Self {
            props: PropertySet::new(vec![
                PropertyDescriptor::plain("enabled", true).label("Enabled"),
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
            .and_then(|id| core.extensions.downcast_mut::<AnisotropyExtension>(id))
        {
            ext.enabled = self.props.flag("enabled");
        }
    }
}

impl Default for AnisotropyPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for AnisotropyPlugin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn attach(&mut self, core: &mut PipelineCore) -> Result<()> {
        self.extension = Some(core.add_material_extension(Box::new(AnisotropyExtension::new())));
        self.sync(core);
        Ok(())
    }

    fn detach(&mut self, core: &mut PipelineCore) {
        if let Some(id) = self.extension.take() {
            core.remove_material_extension(id);
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
