//! Velocity Buffer
//!
//! Screen-space motion vectors for temporal reprojection. The pass draws
//! every object that has not opted out with `VELOCITY_DISABLED` into a
//! persistent target, using the per-object previous world matrix from
//! [`MotionHistory`](crate::graph::MotionHistory) and the previous
//! view-projection from the camera history. The target is cleared to 0.5
//! grey, which encodes zero motion.
//!
//! Motion only matters on the first accumulation frame; after that the
//! camera is static and the pass opts out.
//!
//! Consumers read the buffer through [`VelocityUnpackExtension`], which
//! fills the `velocity_unpack` slot of their material.

use glam::Vec4;

use super::{any_accessors, dispose_persistent, pass_accessors, resize_persistent};
use crate::errors::{PipelineError, Result};
use crate::graph::{
    BackendInfo, GpuBackend, PassMaterial, PassRelations, PassState, PostPass, RenderContext,
    TargetId, TargetSpec,
};
use crate::host::{HostEvent, PipelineCore, Plugin};
use crate::pipeline::{ExtensionId, MaterialExtension, ShaderBuilder};
use crate::resources::{Material, MaterialFlags, MaterialKind, ShaderDefines, UniformTable};

const VELOCITY_UNPACK: &str = "\
uniform sampler2D tVelocity;
vec2 getVelocity(const in vec2 uv) {
    return texture2D(tVelocity, uv).xy * 2.0 - 1.0;
}";

/// Exposes the velocity target to a full-screen material.
#[derive(Debug, Default)]
pub struct VelocityUnpackExtension {
    enabled: bool,
    target: Option<TargetId>,
}

impl VelocityUnpackExtension {
    #[must_use]
    pub fn new(target: Option<TargetId>) -> Self {
        Self {
            enabled: true,
            target,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_target(&mut self, target: Option<TargetId>) {
        self.target = target;
    }

    #[must_use]
    pub fn target(&self) -> Option<TargetId> {
        self.target
    }
}

impl MaterialExtension for VelocityUnpackExtension {
    fn name(&self) -> &'static str {
        "velocity_unpack"
    }

    fn priority(&self) -> i32 {
        -100
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_compatible(&self, _material: &Material) -> bool {
        true
    }

    fn cache_key(&self, _material: &Material) -> String {
        if self.target.is_some() { "vb" } else { "" }.to_string()
    }

    fn extra_defines(&self, _material: &Material, defines: &mut ShaderDefines) {
        if self.target.is_some() {
            defines.set("HAS_VELOCITY_BUFFER", "1");
        }
    }

    fn extra_uniforms(&self, _material: &Material, uniforms: &mut UniformTable) {
        if let Some(target) = self.target {
            uniforms.set("tVelocity", target);
        }
    }

    fn extend_shader(
        &self,
        shader: &mut ShaderBuilder<'_>,
        _material: &Material,
        _backend: &BackendInfo,
    ) {
        shader.fragment.replace("velocity_unpack", VELOCITY_UNPACK);
    }

    any_accessors!();
}

/// The `velocity` pass.
#[derive(Debug)]
pub struct VelocityPass {
    relations: PassRelations,
    state: PassState,
    material: PassMaterial,
    target: Option<TargetId>,
}

impl VelocityPass {
    pub const NAME: &'static str = "velocity";
    /// Shared target name.
    pub const TARGET: &'static str = "velocity";

    fn new(target: TargetId) -> Self {
        let mut material = PassMaterial::new(MaterialKind::Basic);
        material.material.name = "velocity".to_string();
        material.material.defines_mut().set("VELOCITY_OUTPUT", "1");
        Self {
            relations: PassRelations::new()
                .before(&["render"])
                .required(&["render"]),
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

impl PostPass for VelocityPass {
    pass_accessors!();

    fn before_render(&mut self, ctx: &mut RenderContext<'_>) -> bool {
        ctx.frame.frame() == 0
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

        let uniforms = &mut self.material.material.uniforms;
        uniforms.set(
            "currentProjectionViewMatrix",
            ctx.camera_history.current_view_projection(),
        );
        uniforms.set(
            "lastProjectionViewMatrix",
            ctx.camera_history.previous_view_projection(),
        );

        let items = ctx.scene_draw_items(
            Some((&self.material.registry, &self.material.material)),
            Some(MaterialFlags::VELOCITY_DISABLED),
        );
        let camera = ctx.camera();
        ctx.backend.set_render_target(Some(target));
        ctx.backend.clear(Vec4::new(0.5, 0.5, 0.5, 1.0));
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

/// Adds the `velocity` pass and owns the unpack extension.
///
/// The extension is stored but not applied to scene materials; consumers
/// such as TAA register [`unpack_extension`](Self::unpack_extension) on
/// their own material when both plugins are present.
#[derive(Debug)]
pub struct VelocityPlugin {
    format: wgpu::TextureFormat,
    unpack: Option<ExtensionId>,
}

impl VelocityPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            format: wgpu::TextureFormat::Rgba8Unorm,
            unpack: None,
        }
    }

    /// Buffer format, fixed at attach time.
    #[must_use]
    pub fn with_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn unpack_extension(&self) -> Option<ExtensionId> {
        self.unpack
    }

    /// Turns the pass and the unpack extension on or off together.
    pub fn set_enabled(&mut self, core: &mut PipelineCore, enabled: bool) {
        if let Err(e) = core.graph.set_enabled(VelocityPass::NAME, enabled) {
            log::warn!("{e}");
        }
        if let Some(ext) = self
            .unpack
            .and_then(|id| core.extensions.downcast_mut::<VelocityUnpackExtension>(id))
        {
            ext.set_enabled(enabled);
        }
        core.set_dirty();
    }

    fn sync_target(&self, core: &mut PipelineCore) {
        let target = core
            .graph
            .downcast::<VelocityPass>(VelocityPass::NAME)
            .and_then(VelocityPass::target);
        match target {
            Some(t) => core.shared.publish(VelocityPass::TARGET, t),
            None => {
                core.shared.withdraw(VelocityPass::TARGET);
            }
        }
        if let Some(ext) = self
            .unpack
            .and_then(|id| core.extensions.downcast_mut::<VelocityUnpackExtension>(id))
        {
            ext.set_target(target);
        }
    }
}

impl Default for VelocityPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for VelocityPlugin {
    fn name(&self) -> &'static str {
        VelocityPass::NAME
    }

    fn attach(&mut self, core: &mut PipelineCore) -> Result<()> {
        let (w, h) = core.viewport();
        let spec = TargetSpec::new("velocity", w, h, self.format).with_depth(true);
        let target = core.backend_mut().create_target(&spec);
        if let Err(e) = core.graph.register(Box::new(VelocityPass::new(target))) {
            core.backend_mut().dispose_target(target);
            return Err(e);
        }
        self.unpack = Some(
            core.extensions
                .insert(Box::new(VelocityUnpackExtension::new(Some(target)))),
        );
        self.sync_target(core);
        Ok(())
    }

    fn detach(&mut self, core: &mut PipelineCore) {
        core.shared.withdraw(VelocityPass::TARGET);
        if let Some(id) = self.unpack.take() {
            core.extensions.remove(id);
        }
        if let Err(e) = core.remove_pass(VelocityPass::NAME) {
            log::warn!("{e}");
        }
    }

    fn on_event(&mut self, core: &mut PipelineCore, event: &HostEvent) {
        if let HostEvent::Resize { .. } = event {
            self.sync_target(core);
        }
    }

    any_accessors!();
}
