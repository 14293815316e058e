//! Depth of Field
//!
//! Four steps over two half-resolution pooled targets:
//!
//! 1. circle of confusion from the GBuffer depth into `coc`
//! 2. separable CoC expansion `coc → temp → coc`
//! 3. separable blur of the colour into `blur`
//! 4. combine colour, blur and CoC into the write buffer
//!
//! The focal distance follows a world-space focal point projected onto the
//! camera forward axis each frame.

use glam::{Vec2, Vec3, Vec4};

use super::{any_accessors, pass_accessors};
use crate::errors::Result;
use crate::graph::{
    PassMaterial, PassRelations, PassState, PostPass, RenderContext, TargetDescriptor, TargetId,
};
use crate::host::{PipelineCore, Plugin};
use crate::resources::{MaterialKind, PropertyDescriptor, PropertySet, UniformValue};
use crate::scene::CameraView;

const COMPUTE_COC: u32 = 0;
const EXPAND_COC: u32 = 1;
const BLUR: u32 = 2;
const COMBINE: u32 = 3;

/// Signed distance from the camera to `point` along the view direction.
#[must_use]
pub fn focal_distance(camera: &CameraView, point: Vec3) -> f32 {
    let world = camera.view.inverse();
    let eye = world.w_axis.truncate();
    let forward = -world.z_axis.truncate().normalize_or_zero();
    (point - eye).dot(forward)
}

/// The `dof` pass.
#[derive(Debug)]
pub struct DepthOfFieldPass {
    relations: PassRelations,
    state: PassState,
    props: PropertySet,
    material: PassMaterial,
    focal_point: Vec3,
}

impl DepthOfFieldPass {
    pub const NAME: &'static str = "dof";

    #[must_use]
    pub fn new() -> Self {
        let props = PropertySet::new(vec![
            PropertyDescriptor::plain("focalDistance", 0.5).label("Focal Distance"),
            PropertyDescriptor::plain("depthRange", 1.5)
                .range(0.25, 3.0)
                .label("Depth Range"),
            PropertyDescriptor::plain("nearBlurScale", 0.25)
                .range(0.0, 1.0)
                .label("Near Blur Scale"),
            PropertyDescriptor::plain("farBlurScale", 0.25)
                .range(0.0, 1.0)
                .label("Far Blur Scale"),
            PropertyDescriptor::uniform("crossRadius", "crossRadius", 0.04).range(0.0, 0.2),
            PropertyDescriptor::uniform("crossAlpha", "crossAlpha", 0.0).range(0.0, 1.0),
        ]);
        let mut material = PassMaterial::new(MaterialKind::Effect("dof"));
        material
            .material
            .uniforms
            .set("crossColor", UniformValue::color_hex(0xff9900));
        material.material.uniforms.set("crossCenter", Vec2::splat(0.5));
        Self {
            relations: PassRelations::new()
                .before(&["progressive", "screen"])
                .after(&["render"])
                .required(&["render"]),
            state: PassState::default(),
            props,
            material,
            focal_point: Vec3::ZERO,
        }
    }

    /// World-space point kept in focus.
    #[must_use]
    pub fn focal_point(&self) -> Vec3 {
        self.focal_point
    }

    pub fn set_focal_point(&mut self, point: Vec3) {
        self.focal_point = point;
    }

    fn step(
        &mut self,
        ctx: &mut RenderContext<'_>,
        step: u32,
        inputs: &[(&str, TargetId)],
        direction: Vec2,
        dst: TargetId,
    ) {
        self.material.set_step(step);
        let uniforms = &mut self.material.material.uniforms;
        for &(name, target) in inputs {
            uniforms.set(name, target);
        }
        uniforms.set("direction", direction);
        ctx.backend.set_render_target(Some(dst));
        self.material.blit(ctx, Some(dst));
        for &(name, _) in inputs {
            self.material.material.uniforms.remove(name);
        }
    }
}

impl Default for DepthOfFieldPass {
    fn default() -> Self {
        Self::new()
    }
}

impl PostPass for DepthOfFieldPass {
    pass_accessors!();

    fn properties(&self) -> Option<&PropertySet> {
        Some(&self.props)
    }

    fn properties_mut(&mut self) -> Option<&mut PropertySet> {
        Some(&mut self.props)
    }

    fn before_render(&mut self, ctx: &mut RenderContext<'_>) -> bool {
        let camera = ctx.camera();
        let distance = focal_distance(camera, self.focal_point);
        if (distance - self.props.float("focalDistance")).abs() > 1e-4 {
            if self.props.set("focalDistance", f64::from(distance)).is_ok() {
                ctx.request_dirty();
            }
        }

        let uniforms = &mut self.material.material.uniforms;
        uniforms.set("cameraNearFar", Vec2::new(camera.near, camera.far));
        uniforms.set(
            "focalDepthRange",
            Vec2::new(self.props.float("focalDistance"), self.props.float("depthRange")),
        );
        uniforms.set(
            "nearFarBlurScale",
            Vec2::new(self.props.float("nearBlurScale"), self.props.float("farBlurScale")),
        );
        if self.props.float("crossAlpha") > 0.0 {
            let clip = camera.view_projection() * self.focal_point.extend(1.0);
            if clip.w.abs() > f32::EPSILON {
                let ndc = clip.truncate() / clip.w;
                let center = (Vec2::new(ndc.x, ndc.y) + Vec2::ONE) * 0.5;
                uniforms.set("crossCenter", center);
            }
        }
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
        let gbuffer = ctx.require_shared(Self::NAME, "gbuffer")?;
        self.material.sync_properties(&self.props);
        self.material.material.uniforms.set("tGBuffer", gbuffer);

        let format = ctx.color_format;
        let half = |label| TargetDescriptor::relative(label, 0.5, format);
        let coc = ctx.pool.acquire(&mut *ctx.backend, &half("dof_coc"), Self::NAME)?;
        let blur = ctx.pool.acquire(&mut *ctx.backend, &half("dof_blur"), Self::NAME)?;

        self.step(ctx, COMPUTE_COC, &[("colorTexture", read)], Vec2::ZERO, coc);
        self.step(ctx, EXPAND_COC, &[("colorTexture", coc)], Vec2::X, blur);
        self.step(ctx, EXPAND_COC, &[("colorTexture", blur)], Vec2::Y, coc);

        let temp = ctx.pool.acquire(&mut *ctx.backend, &half("dof_blur"), Self::NAME)?;
        self.step(
            ctx,
            BLUR,
            &[("colorTexture", read), ("cocTexture", coc)],
            Vec2::X,
            temp,
        );
        self.step(
            ctx,
            BLUR,
            &[("colorTexture", temp), ("cocTexture", coc)],
            Vec2::Y,
            blur,
        );
        ctx.pool.release(temp)?;

        if self.state.clear {
            ctx.backend.set_render_target(Some(write));
            ctx.backend.clear(Vec4::ZERO);
        }
        self.step(
            ctx,
            COMBINE,
            &[("colorTexture", read), ("blurTexture", blur), ("cocTexture", coc)],
            Vec2::ZERO,
            write,
        );

        ctx.pool.release(coc)?;
        ctx.pool.release(blur)?;
        self.state.needs_swap = true;
        Ok(())
    }
}

/// Adds the `dof` pass. Depends on the `gbuffer` plugin for depth.
#[derive(Debug, Default)]
pub struct DepthOfFieldPlugin;

impl DepthOfFieldPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Moves the focal point and restarts accumulation.
    pub fn set_focal_point(&mut self, core: &mut PipelineCore, point: Vec3) {
        if let Some(pass) = core.graph.downcast_mut::<DepthOfFieldPass>(DepthOfFieldPass::NAME) {
            pass.set_focal_point(point);
            core.set_dirty();
        }
    }
}

impl Plugin for DepthOfFieldPlugin {
    fn name(&self) -> &'static str {
        DepthOfFieldPass::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["gbuffer"]
    }

    fn attach(&mut self, core: &mut PipelineCore) -> Result<()> {
        core.graph.register(Box::new(DepthOfFieldPass::new()))
    }

    fn detach(&mut self, core: &mut PipelineCore) {
        if let Err(e) = core.remove_pass(DepthOfFieldPass::NAME) {
            log::warn!("{e}");
        }
    }

    any_accessors!();
}
