//! Selection Outline
//!
//! The `outline` pass draws the selected objects with a depth material into
//! a persistent target; the target is cleared to white when nothing is
//! selected. [`OutlineExtension`] then edge-detects that target inside the
//! screen material. It has the highest priority of all extensions so it
//! patches the screen shader last.

use glam::{Vec2, Vec4};
use uuid::Uuid;

use super::builtin::ScreenPass;
use super::{any_accessors, dispose_persistent, pass_accessors, resize_persistent};
use crate::errors::{PipelineError, Result};
use crate::graph::{
    BackendInfo, GpuBackend, PassMaterial, PassRelations, PassState, PostPass, RenderContext,
    TargetId,
};
use crate::host::{HostEvent, PipelineCore, Plugin};
use crate::pipeline::{ExtensionId, MaterialExtension, ShaderBuilder};
use crate::resources::{
    Material, MaterialKind, PropertyDescriptor, PropertySet, ShaderDefines, UniformTable,
    UniformValue,
};

const OUTLINE_PARS: &str = "\
uniform sampler2D outlineBuffer;
uniform vec2 tDiffuseSize;
uniform float outlineIntensity;
uniform float outlineThickness;
uniform float highlightTransparency;
uniform vec3 outlineColor;
uniform bool enableHighlight;
uniform float dpr;
vec4 outline(vec4 color) {
    vec2 texel = outlineThickness * dpr / tDiffuseSize;
    float center = texture2D(outlineBuffer, vUv).r;
    float edge = 0.0;
    edge += abs(center - texture2D(outlineBuffer, vUv + vec2(texel.x, 0.0)).r);
    edge += abs(center - texture2D(outlineBuffer, vUv - vec2(texel.x, 0.0)).r);
    edge += abs(center - texture2D(outlineBuffer, vUv + vec2(0.0, texel.y)).r);
    edge += abs(center - texture2D(outlineBuffer, vUv - vec2(0.0, texel.y)).r);
    edge = clamp(edge * outlineIntensity, 0.0, 1.0);
#if DEBUG_OUTLINE > 0
    return vec4(vec3(center), 1.0);
#endif
    if (enableHighlight && center < 1.0) {
        color.rgb = mix(outlineColor, color.rgb, highlightTransparency);
    }
    return vec4(mix(color.rgb, outlineColor, edge), color.a);
}";

const OUTLINE_PATCH: &str = "diffuseColor = outline(diffuseColor);";

/// Outline compositing on the screen material.
#[derive(Debug)]
pub struct OutlineExtension {
    enabled: bool,
    debug: bool,
    uniforms: UniformTable,
}

impl OutlineExtension {
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            debug: false,
            uniforms: UniformTable::new(),
        }
    }
}

impl Default for OutlineExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialExtension for OutlineExtension {
    fn name(&self) -> &'static str {
        "outline"
    }

    fn priority(&self) -> i32 {
        101
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_compatible(&self, material: &Material) -> bool {
        material.kind() == MaterialKind::Screen
    }

    fn cache_key(&self, _material: &Material) -> String {
        u8::from(self.debug).to_string()
    }

    fn extra_defines(&self, _material: &Material, defines: &mut ShaderDefines) {
        defines.set_bool("DEBUG_OUTLINE", self.debug);
    }

    fn extra_uniforms(&self, _material: &Material, uniforms: &mut UniformTable) {
        uniforms.merge(&self.uniforms);
    }

    fn extend_shader(
        &self,
        shader: &mut ShaderBuilder<'_>,
        _material: &Material,
        _backend: &BackendInfo,
    ) {
        shader.fragment.append("screen_pars", OUTLINE_PARS);
        shader.fragment.append("screen_fragment", OUTLINE_PATCH);
    }

    any_accessors!();
}

/// The `outline` pass.
#[derive(Debug)]
pub struct OutlinePass {
    relations: PassRelations,
    state: PassState,
    props: PropertySet,
    material: PassMaterial,
    target: Option<TargetId>,
    selection: Vec<Uuid>,
}

impl OutlinePass {
    pub const NAME: &'static str = "outline";
    /// Shared target name.
    pub const TARGET: &'static str = "outline";

    fn new(target: TargetId) -> Self {
        let props = PropertySet::new(vec![
            PropertyDescriptor::uniform("intensity", "outlineIntensity", 2.0)
                .range(0.0, 4.0)
                .step(0.001),
            PropertyDescriptor::uniform("thickness", "outlineThickness", 2.0)
                .range(0.0, 10.0)
                .step(0.01),
            PropertyDescriptor::plain("color", 0xe9_8a_65_i64).label("Color"),
            PropertyDescriptor::uniform("enableHighlight", "enableHighlight", false)
                .label("Highlight"),
            PropertyDescriptor::plain("highlightTransparency", 0.84)
                .range(0.0, 1.0)
                .step(0.01)
                .label("Transparency"),
            PropertyDescriptor::define("debugOutline", "DEBUG_OUTLINE", false).label("Debug"),
        ]);
        let mut material = PassMaterial::new(MaterialKind::Basic);
        material.material.name = "outline_depth".to_string();
        material.material.defines_mut().set("OUTLINE_DEPTH", "1");
        Self {
            relations: PassRelations::new()
                .before(&["render"])
                .after(&["gbuffer"])
                .required(&["render", "gbuffer"]),
            state: PassState::in_place(),
            props,
            material,
            target: Some(target),
            selection: Vec::new(),
        }
    }

    #[must_use]
    pub fn target(&self) -> Option<TargetId> {
        self.target
    }

    #[must_use]
    pub fn selection(&self) -> &[Uuid] {
        &self.selection
    }

    pub fn set_selection(&mut self, objects: &[Uuid]) {
        self.selection = objects.to_vec();
    }

    /// Screen-material uniforms for the current properties and selection.
    fn screen_uniforms(&self, viewport: (u32, u32)) -> UniformTable {
        let mut uniforms = UniformTable::new();
        uniforms.set("outlineIntensity", self.props.float("intensity"));
        uniforms.set("outlineThickness", self.props.float("thickness"));
        uniforms.set("enableHighlight", self.props.flag("enableHighlight"));
        uniforms.set(
            "outlineColor",
            UniformValue::color_hex(self.props.int("color") as u32),
        );
        let transparency = if self.selection.is_empty() {
            1.0
        } else {
            self.props.float("highlightTransparency")
        };
        uniforms.set("highlightTransparency", transparency);
        uniforms.set("dpr", 2.0);
        uniforms.set(
            "tDiffuseSize",
            Vec2::new(viewport.0 as f32, viewport.1 as f32),
        );
        if let Some(target) = self.target {
            uniforms.set("outlineBuffer", target);
        }
        uniforms
    }
}

impl PostPass for OutlinePass {
    pass_accessors!();

    fn properties(&self) -> Option<&PropertySet> {
        Some(&self.props)
    }

    fn properties_mut(&mut self) -> Option<&mut PropertySet> {
        Some(&mut self.props)
    }

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
        ctx.backend.set_render_target(Some(target));
        ctx.backend.clear(Vec4::ONE);

        if !self.selection.is_empty() {
            let camera = ctx.camera();
            self.material
                .material
                .uniforms
                .set("cameraNearFar", Vec2::new(camera.near, camera.far));
            let mut items = ctx.scene_draw_items(
                Some((&self.material.registry, &self.material.material)),
                None,
            );
            items.retain(|item| self.selection.contains(&item.object));
            ctx.backend.draw(Some(target), camera, &items);
        }
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

/// Adds the `outline` pass and extends the screen material.
#[derive(Debug, Default)]
pub struct OutlinePlugin {
    extension: Option<ExtensionId>,
}

impl OutlinePlugin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn extension(&self) -> Option<ExtensionId> {
        self.extension
    }

    /// Replaces the outlined objects.
    pub fn select(&mut self, core: &mut PipelineCore, objects: &[Uuid]) {
        if let Some(pass) = core.graph.downcast_mut::<OutlinePass>(OutlinePass::NAME) {
            pass.set_selection(objects);
            core.set_dirty();
        }
    }

    pub fn clear_selection(&mut self, core: &mut PipelineCore) {
        self.select(core, &[]);
    }

    fn sync(&self, core: &mut PipelineCore) {
        let viewport = core.viewport();
        let Some(pass) = core.graph.downcast::<OutlinePass>(OutlinePass::NAME) else {
            return;
        };
        let enabled = pass.state().enabled;
        let debug = pass.props.flag("debugOutline");
        let uniforms = pass.screen_uniforms(viewport);
        let target = pass.target();
        if let Some(t) = target {
            core.shared.publish(OutlinePass::TARGET, t);
        }
        if let Some(ext) = self
            .extension
            .and_then(|id| core.extensions.downcast_mut::<OutlineExtension>(id))
        {
            ext.enabled = enabled;
            ext.debug = debug;
            ext.uniforms = uniforms;
        }
    }
}

impl Plugin for OutlinePlugin {
    fn name(&self) -> &'static str {
        OutlinePass::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["gbuffer"]
    }

    fn attach(&mut self, core: &mut PipelineCore) -> Result<()> {
        let target = core.create_persistent_target("outline", 1.0);
        if let Err(e) = core.graph.register(Box::new(OutlinePass::new(target))) {
            core.backend_mut().dispose_target(target);
            return Err(e);
        }
        let id = core.extensions.insert(Box::new(OutlineExtension::new()));
        match core.graph.downcast_mut::<ScreenPass>(ScreenPass::NAME) {
            Some(screen) => {
                screen.registry_mut().register(id);
            }
            None => log::warn!("No screen pass; outline extension left unapplied"),
        }
        self.extension = Some(id);
        self.sync(core);
        Ok(())
    }

    fn detach(&mut self, core: &mut PipelineCore) {
        if let Some(id) = self.extension.take() {
            if let Some(screen) = core.graph.downcast_mut::<ScreenPass>(ScreenPass::NAME) {
                screen.registry_mut().unregister(id);
            }
            core.extensions.remove(id);
        }
        core.shared.withdraw(OutlinePass::TARGET);
        if let Err(e) = core.remove_pass(OutlinePass::NAME) {
            log::warn!("{e}");
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
    use crate::pipeline::{ExtensionStore, MaterialExtensionRegistry};

    #[test]
    fn applies_to_screen_material_only() {
        let ext = OutlineExtension::new();
        assert!(ext.is_compatible(&Material::new(MaterialKind::Screen)));
        assert!(!ext.is_compatible(&Material::physical()));
    }

    #[test]
    fn patches_after_lower_priorities() {
        let mut store = ExtensionStore::new();
        let outline = store.insert(Box::new(OutlineExtension::new()));
        let mut registry = MaterialExtensionRegistry::new();
        registry.register(outline);
        let key = registry.compute_key(&store, &Material::new(MaterialKind::Screen));
        assert!(key.starts_with("outline:0;"));
        assert!(key.contains("screen#"));
    }

    #[test]
    fn highlight_only_with_selection() {
        let mut targets = slotmap::SlotMap::<TargetId, ()>::with_key();
        let mut pass = OutlinePass::new(targets.insert(()));
        let value = |pass: &OutlinePass| {
            pass.screen_uniforms((64, 64))
                .get("highlightTransparency")
                .and_then(UniformValue::as_f32)
        };
        assert_eq!(value(&pass), Some(1.0));
        pass.set_selection(&[Uuid::new_v4()]);
        assert_eq!(value(&pass), Some(0.84));
    }
}
