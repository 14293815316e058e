//! Baked Ground Shadow
//!
//! Progressive soft-shadow bake onto materials flagged `GROUND`. Each
//! frame a directional light is jittered around a base direction, the
//! ground is drawn with a shadow-receiving material into a fixed 1024²
//! target, and the result is blended with the previous frame at weight
//! `max(1/max_frames, 1/frame)`. After `maxFrameNumber` frames the bake
//! converges and the pass opts out until something restarts it.
//!
//! # State
//!
//! ```text
//! Idle ──restart──► Accumulating ──max frames──► Converged
//!                        ▲                            │
//!                        └── scene change / bake() ───┘
//! ```
//!
//! The bake is applied by [`GroundShadowExtension`] through one of the
//! `aomap_fragment`, `map_fragment` or `alphamap_fragment` slots, chosen by
//! `groundMapMode`.

use glam::{Mat4, Vec2, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use super::{any_accessors, dispose_persistent, pass_accessors};
use crate::errors::{PipelineError, Result};
use crate::graph::{
    Accumulator, BackendInfo, BlitSource, ConvergenceState, GpuBackend, PassMaterial,
    PassRelations, PassState, PostPass, RenderContext, TargetDescriptor, TargetId, TargetSpec,
};
use crate::host::{HostEvent, Notification, PipelineCore, Plugin};
use crate::pipeline::{ExtensionId, MaterialExtension, ShaderBuilder};
use crate::resources::{
    Material, MaterialFlags, MaterialKind, PropertyDescriptor, PropertySet, ShaderDefines,
    UniformTable,
};

/// Edge length of the bake target.
pub const BAKE_SIZE: u32 = 1024;
const BAKE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const SHADOW_NEAR: f32 = 1.5;
const SHADOW_FAR: f32 = 20.0;
const FRUSTUM_SIZE: f32 = 4.0;
const LIGHT_DISTANCE: f32 = 10.0;
const LIGHT_SPREAD: f32 = 0.9;

/// Material slot the baked map is read through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroundMapMode {
    #[default]
    AoMap,
    Map,
    AlphaMap,
}

impl GroundMapMode {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "aoMap" => Some(Self::AoMap),
            "map" => Some(Self::Map),
            "alphaMap" => Some(Self::AlphaMap),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AoMap => "aoMap",
            Self::Map => "map",
            Self::AlphaMap => "alphaMap",
        }
    }

    fn slot(self) -> &'static str {
        match self {
            Self::AoMap => "aomap_fragment",
            Self::Map => "map_fragment",
            Self::AlphaMap => "alphamap_fragment",
        }
    }

    fn chunk(self) -> &'static str {
        match self {
            Self::AoMap => "\
float ambientOcclusion = (mix(1.0, unpackRGBAToDepth(texture2D(aoMap, vAoMapUv)), transitionOpacity) - 1.0) * aoMapIntensity + 1.0;
reflectedLight.indirectDiffuse *= ambientOcclusion;",
            Self::Map => "\
vec4 sampledDiffuseColor = texture2D(map, vMapUv);
float groundShadow = mix(1.0, unpackRGBAToDepth(sampledDiffuseColor), transitionOpacity);
diffuseColor.rgb *= groundShadow;
diffuseColor.a *= max(0.0, 1.0 - groundShadow) * transitionOpacity;",
            Self::AlphaMap => "\
diffuseColor.a *= 1.0 - unpackRGBAToDepth(texture2D(alphaMap, vAlphaMapUv));",
        }
    }
}

/// Vignette axis swizzle: `x`, `y` or `xy`.
fn vignette_axis(axis: &str) -> &'static str {
    match axis {
        "x" => "x",
        "y" => "y",
        _ => "xy",
    }
}

fn vignette_chunk(axis: &str) -> String {
    format!(
        "\
#ifndef OPAQUE
float weight = 2.0 * abs(length(0.5 - vUv.{axis}));
weight = clamp(weight, 0.0, 1.0) - 0.5;
weight = pow(clamp(1.0 - 2.0 * weight, 0.0, 1.0), 1.5);
gl_FragColor.a *= weight;
gl_FragColor = saturate(gl_FragColor);
#endif"
    )
}

/// Light direction for bake frame `frame` (1-based).
///
/// The first frames use the base direction so a usable shadow shows up
/// immediately; later frames jitter within the spread cone, seeded by the
/// frame number.
#[must_use]
pub fn light_direction(frame: u32) -> Vec3 {
    let base = Vec3::new(0.2, 1.0, 0.2).normalize();
    if frame < 3 {
        return base;
    }
    let mut rng = StdRng::seed_from_u64(u64::from(frame));
    let jitter = Vec3::new(
        rng.random_range(-1.0..1.0f32),
        rng.random_range(-1.0..1.0f32),
        rng.random_range(-1.0..1.0f32),
    ) * LIGHT_SPREAD;
    let dir = (base + jitter).normalize_or(base);
    if dir.y > 0.05 { dir } else { base }
}

/// Orthographic shadow camera looking at the origin from `direction`.
#[must_use]
pub fn light_view_projection(direction: Vec3) -> Mat4 {
    let half = FRUSTUM_SIZE * 0.5;
    let eye = direction * LIGHT_DISTANCE;
    let up = if direction.abs_diff_eq(Vec3::Y, 1e-3) {
        Vec3::Z
    } else {
        Vec3::Y
    };
    Mat4::orthographic_rh(-half, half, -half, half, SHADOW_NEAR, SHADOW_FAR)
        * Mat4::look_at_rh(eye, Vec3::ZERO, up)
}

// ─── Extension ────────────────────────────────────────────────────────────────

/// Applies the bake to ground materials.
#[derive(Debug)]
pub struct GroundShadowExtension {
    enabled: bool,
    mode: GroundMapMode,
    vignette: bool,
    axis: &'static str,
    target: Option<TargetId>,
}

impl GroundShadowExtension {
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            mode: GroundMapMode::AoMap,
            vignette: true,
            axis: "xy",
            target: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> GroundMapMode {
        self.mode
    }
}

impl Default for GroundShadowExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialExtension for GroundShadowExtension {
    fn name(&self) -> &'static str {
        "ground_shadow"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_compatible(&self, material: &Material) -> bool {
        material.is_physical() && material.flags().contains(MaterialFlags::GROUND)
    }

    fn cache_key(&self, _material: &Material) -> String {
        format!("{}.{}.{}", self.mode.as_str(), self.vignette, self.axis)
    }

    fn extra_defines(&self, _material: &Material, defines: &mut ShaderDefines) {
        if self.vignette {
            defines.set("USE_UV", "");
        }
        if self.mode == GroundMapMode::AlphaMap {
            defines.set("ALPHATEST", "0.01");
        }
    }

    fn extra_uniforms(&self, _material: &Material, uniforms: &mut UniformTable) {
        uniforms.set("transitionOpacity", 1.0);
        if let Some(target) = self.target {
            uniforms.set(self.mode.as_str(), target);
        }
    }

    fn extend_shader(
        &self,
        shader: &mut ShaderBuilder<'_>,
        _material: &Material,
        _backend: &BackendInfo,
    ) {
        shader.fragment.append("common", "uniform float transitionOpacity;");
        shader.fragment.replace(self.mode.slot(), self.mode.chunk());
        if self.vignette {
            shader
                .fragment
                .prepend("output_fragment", &vignette_chunk(self.axis));
        }
    }

    any_accessors!();
}

// ─── Pass ─────────────────────────────────────────────────────────────────────

/// The `ground_shadow` pass.
#[derive(Debug)]
pub struct GroundShadowPass {
    relations: PassRelations,
    state: PassState,
    props: PropertySet,
    material: PassMaterial,
    blur: PassMaterial,
    accumulator: Accumulator,
    target: Option<TargetId>,
    bake_count: u32,
    /// `(maxFrameNumber, smoothShadow, groundMapMode)` the bake started with.
    signature: (i64, bool, GroundMapMode),
    pending: Vec<Notification>,
}

impl GroundShadowPass {
    pub const NAME: &'static str = "ground_shadow";
    /// Shared target name.
    pub const TARGET: &'static str = "ground_shadow";

    fn new(target: TargetId) -> Self {
        let props = PropertySet::new(vec![
            PropertyDescriptor::plain("maxFrameNumber", 400_i64)
                .range(1.0, 10_000.0)
                .step(1.0)
                .label("Max Frame Number"),
            PropertyDescriptor::plain("maxBakeCount", 0_i64)
                .range(0.0, 1_000_000.0)
                .label("Max Bake Count (0: unlimited)"),
            PropertyDescriptor::plain("smoothShadow", false).label("Smooth Shadow"),
            PropertyDescriptor::plain("groundMapMode", "aoMap").label("Ground Map Mode"),
            PropertyDescriptor::plain("alphaVignette", true).label("Alpha Vignette"),
            PropertyDescriptor::plain("alphaVignetteAxis", "xy").label("Alpha Vignette Axis"),
            PropertyDescriptor::plain("autoBake", true).label("Auto Bake Shadows"),
        ]);
        let mut material = PassMaterial::new(MaterialKind::Basic);
        material.material.name = "ground_shadow_accumulate".to_string();
        material.material.defines_mut().set("SHADOW_ACCUMULATE", "1");
        let mut pass = Self {
            relations: PassRelations::new()
                .before(&["render"])
                .required(&["render"]),
            state: PassState::in_place(),
            props,
            material,
            blur: PassMaterial::new(MaterialKind::Effect("shadow_blur")),
            accumulator: Accumulator::new(400),
            target: Some(target),
            bake_count: 0,
            signature: (400, false, GroundMapMode::AoMap),
            pending: Vec::new(),
        };
        pass.signature = pass.bake_signature();
        pass
    }

    #[must_use]
    pub fn target(&self) -> Option<TargetId> {
        self.target
    }

    #[must_use]
    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    #[must_use]
    pub fn bake_count(&self) -> u32 {
        self.bake_count
    }

    /// Configured map mode, falling back to `aoMap` for unknown names.
    #[must_use]
    pub fn map_mode(&self) -> GroundMapMode {
        let name = self.props.text("groundMapMode");
        GroundMapMode::from_name(name).unwrap_or_else(|| {
            log::warn!("Unknown ground map mode '{name}', using aoMap");
            GroundMapMode::AoMap
        })
    }

    /// Starts the bake over from frame 0.
    pub fn reset(&mut self) {
        self.signature = self.bake_signature();
        self.accumulator
            .set_max_frames(self.props.int("maxFrameNumber").max(1) as u32);
        self.accumulator.restart();
    }

    fn bake_signature(&self) -> (i64, bool, GroundMapMode) {
        (
            self.props.int("maxFrameNumber"),
            self.props.flag("smoothShadow"),
            self.map_mode(),
        )
    }

    fn bake_limit_reached(&self) -> bool {
        let max = self.props.int("maxBakeCount");
        max > 0 && i64::from(self.bake_count) >= max
    }

    fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.pending)
    }

    fn smooth(&mut self, ctx: &mut RenderContext<'_>, target: TargetId, scratch: TargetId) {
        let size = Vec2::splat(BAKE_SIZE as f32);
        for (src, dst, direction) in [(target, scratch, Vec2::X), (scratch, target, Vec2::Y)] {
            let uniforms = &mut self.blur.material.uniforms;
            uniforms.set("colorTexture", src);
            uniforms.set("direction", direction);
            uniforms.set("size", size);
            ctx.backend.set_render_target(Some(dst));
            self.blur.blit(ctx, Some(dst));
        }
    }
}

impl PostPass for GroundShadowPass {
    pass_accessors!();

    fn properties(&self) -> Option<&PropertySet> {
        Some(&self.props)
    }

    fn properties_mut(&mut self) -> Option<&mut PropertySet> {
        Some(&mut self.props)
    }

    fn before_render(&mut self, ctx: &mut RenderContext<'_>) -> bool {
        if self.bake_signature() != self.signature {
            self.reset();
        }
        let scene = ctx.scene;
        let has_ground = scene.objects().iter().any(|o| {
            o.visible
                && scene
                    .material(o.material)
                    .is_some_and(|m| m.flags().contains(MaterialFlags::GROUND))
        });
        has_ground
            && self.accumulator.state() == ConvergenceState::Accumulating
            && !self.bake_limit_reached()
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
        let frame = self.accumulator.frame() + 1;
        let max_frames = self.accumulator.max_frames();
        let direction = light_direction(frame);

        let desc = TargetDescriptor::fixed("ground_shadow_last", BAKE_SIZE, BAKE_SIZE, BAKE_FORMAT);
        let last = ctx.pool.acquire(&mut *ctx.backend, &desc, Self::NAME)?;
        ctx.backend.blit(Some(last), BlitSource::Target(target));

        let uniforms = &mut self.material.material.uniforms;
        uniforms.set("lastFrameTexture", last);
        uniforms.set(
            "opacity",
            (1.0 / max_frames as f32).max(1.0 / frame as f32),
        );
        uniforms.set("lightDirection", direction);
        uniforms.set("lightViewProjection", light_view_projection(direction));

        let scene = ctx.scene;
        let mut items = ctx.scene_draw_items(
            Some((&self.material.registry, &self.material.material)),
            None,
        );
        items.retain(|item| {
            scene
                .object(item.object)
                .and_then(|o| scene.material(o.material))
                .is_some_and(|m| m.flags().contains(MaterialFlags::GROUND))
        });
        let camera = ctx.camera();
        ctx.backend.set_render_target(Some(target));
        if frame == 1 {
            ctx.backend.clear(Vec4::ONE);
        }
        ctx.backend.draw(Some(target), camera, &items);

        if self.props.flag("smoothShadow") {
            self.smooth(ctx, target, last);
        }
        ctx.pool.release(last)?;
        ctx.shared.publish(Self::TARGET, target);

        match self.accumulator.step() {
            ConvergenceState::Converged => {
                self.bake_count += 1;
                log::debug!("Ground shadow baked ({} frames)", max_frames);
                self.pending.push(Notification::Baked { plugin: Self::NAME });
            }
            _ => self.pending.push(Notification::BakeProgress {
                plugin: Self::NAME,
                progress: self.accumulator.progress(),
            }),
        }
        Ok(())
    }

    fn dispose(&mut self, backend: &mut dyn GpuBackend) {
        dispose_persistent(backend, &mut self.target);
    }
}

// ─── Plugin ───────────────────────────────────────────────────────────────────

/// Adds the `ground_shadow` pass and its extension.
#[derive(Debug, Default)]
pub struct GroundShadowPlugin {
    extension: Option<ExtensionId>,
}

impl GroundShadowPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn extension(&self) -> Option<ExtensionId> {
        self.extension
    }

    /// Restarts the bake; used when `autoBake` is off.
    pub fn bake(&mut self, core: &mut PipelineCore) {
        if let Some(pass) = core.graph.downcast_mut::<GroundShadowPass>(GroundShadowPass::NAME) {
            pass.reset();
        }
    }

    fn sync(&self, core: &mut PipelineCore) {
        let Some(pass) = core.graph.downcast::<GroundShadowPass>(GroundShadowPass::NAME) else {
            return;
        };
        let enabled = pass.state().enabled;
        let mode = pass.map_mode();
        let vignette = pass.props.flag("alphaVignette");
        let axis = vignette_axis(pass.props.text("alphaVignetteAxis"));
        let target = pass.target();
        if let Some(ext) = self
            .extension
            .and_then(|id| core.extensions.downcast_mut::<GroundShadowExtension>(id))
        {
            ext.enabled = enabled;
            ext.mode = mode;
            ext.vignette = vignette;
            ext.axis = axis;
            ext.target = target;
        }
    }
}

impl Plugin for GroundShadowPlugin {
    fn name(&self) -> &'static str {
        GroundShadowPass::NAME
    }

    fn attach(&mut self, core: &mut PipelineCore) -> Result<()> {
        let spec = TargetSpec::new("ground_shadow", BAKE_SIZE, BAKE_SIZE, BAKE_FORMAT);
        let target = core.backend_mut().create_target(&spec);
        let mut pass = GroundShadowPass::new(target);
        pass.reset();
        if let Err(e) = core.graph.register(Box::new(pass)) {
            core.backend_mut().dispose_target(target);
            return Err(e);
        }
        core.shared.publish(GroundShadowPass::TARGET, target);
        self.extension = Some(core.add_material_extension(Box::new(GroundShadowExtension::new())));
        self.sync(core);
        Ok(())
    }

    fn detach(&mut self, core: &mut PipelineCore) {
        if let Some(id) = self.extension.take() {
            core.remove_material_extension(id);
        }
        core.shared.withdraw(GroundShadowPass::TARGET);
        if let Err(e) = core.remove_pass(GroundShadowPass::NAME) {
            log::warn!("{e}");
        }
    }

    fn on_event(&mut self, core: &mut PipelineCore, event: &HostEvent) {
        match event {
            HostEvent::PreFrame => self.sync(core),
            HostEvent::SceneChanged => {
                if let Some(pass) =
                    core.graph.downcast_mut::<GroundShadowPass>(GroundShadowPass::NAME)
                    && pass.props.flag("autoBake")
                {
                    pass.reset();
                }
            }
            HostEvent::PostFrame => {
                let pending = core
                    .graph
                    .downcast_mut::<GroundShadowPass>(GroundShadowPass::NAME)
                    .map(GroundShadowPass::take_notifications)
                    .unwrap_or_default();
                for notification in pending {
                    core.notify(notification);
                }
            }
            _ => {}
        }
    }

    any_accessors!();
}
