//! Bloom
//!
//! HDR bloom over a pooled mip chain:
//!
//! ```text
//! read ─prefilter(0)─► t0 ─down(1)─► t1 ─down(1)─► … ─► tn
//!                      t0 ◄─up(2)─── t1 ◄─up(2)─── … ◄─ tn   (additive)
//! read + t0 ─composite(3) or debug(4)─► write
//! ```
//!
//! The step runs as a `PASS_STEP` define on one material. The chain length
//! is `bloomIterations`, cut short when a level would drop below 2 px.
//! Per-level blend weights follow [`bloom_weights`]; each downsample uses
//! the ratio to the previous weight so the upsample sum reproduces the
//! absolute weights.

use glam::Vec4;

use super::{any_accessors, pass_accessors};
use crate::errors::Result;
use crate::graph::{
    PassMaterial, PassRelations, PassState, PostPass, RenderContext, TargetDescriptor, TargetId,
};
use crate::host::{PipelineCore, Plugin};
use crate::resources::{MaterialKind, PropertyDescriptor, PropertySet};

/// Blend weight of each mip level.
///
/// For `i` in `0..max(2, iterations)`, with `r = clamp(radius, 0, 1)`:
/// `f = i / (n - 1) + 0.1`, `w = (1.2 - f)^power * (1 - r) + f^power * r`.
#[must_use]
pub fn bloom_weights(iterations: u32, radius: f32, power: f32) -> Vec<f32> {
    let n = iterations.max(2);
    let radius = radius.clamp(0.0, 1.0);
    let delta = 1.0 / (n - 1) as f32;
    (0..n)
        .map(|i| {
            let f = i as f32 * delta + 0.1;
            let one_minus_f = (1.2 - f).powf(power);
            one_minus_f * (1.0 - radius) + f.powf(power) * radius
        })
        .collect()
}

/// Weight used by the downsample into level `i` (`i >= 1`).
#[must_use]
pub fn modified_weight(weights: &[f32], i: usize) -> f32 {
    let w = weights.get(i).copied().unwrap_or(1.0);
    match i.checked_sub(1).and_then(|p| weights.get(p)) {
        Some(&prev) if prev != 0.0 => w / prev,
        _ => w,
    }
}

/// `(threshold, soft, 2·threshold·soft, 0.125 / (2·threshold·soft + ε))`.
#[must_use]
pub fn prefilter_vector(threshold: f32, soft_threshold: f32) -> Vec4 {
    let knee = 2.0 * threshold * soft_threshold;
    Vec4::new(threshold, soft_threshold, knee, 0.125 / (knee + 0.00001))
}

/// Mip levels that fit in a `width × height` source for `iterations`
/// requested levels, counting the full-resolution prefilter level.
#[must_use]
pub fn effective_iterations(width: u32, height: u32, iterations: u32) -> u32 {
    let (mut w, mut h) = (width as f32 * 0.5, height as f32 * 0.5);
    let mut levels = 1;
    for _ in 1..iterations.max(2) {
        w /= 2.0;
        h /= 2.0;
        if w < 2.0 || h < 2.0 {
            break;
        }
        levels += 1;
    }
    levels
}

const PREFILTER: u32 = 0;
const DOWNSAMPLE: u32 = 1;
const UPSAMPLE: u32 = 2;
const COMPOSITE: u32 = 3;
const DEBUG: u32 = 4;

/// The `bloom` pass.
#[derive(Debug)]
pub struct BloomPass {
    relations: PassRelations,
    state: PassState,
    props: PropertySet,
    material: PassMaterial,
    weights: Vec<f32>,
}

impl BloomPass {
    pub const NAME: &'static str = "bloom";

    #[must_use]
    pub fn new(max_intensity: f32) -> Self {
        let props = PropertySet::new(vec![
            PropertyDescriptor::plain("threshold", 2.0).range(0.0, 2.0),
            PropertyDescriptor::plain("softThreshold", 0.5).range(0.0, 1.0),
            PropertyDescriptor::uniform("intensity", "intensity", 0.2).range(0.0, 3.0),
            PropertyDescriptor::define("backgroundBloom", "BACKGROUND_BLOOM", false)
                .label("Background Bloom"),
            PropertyDescriptor::plain("bloomIterations", 4_i64)
                .range(2.0, 7.0)
                .step(1.0)
                .label("Iterations"),
            PropertyDescriptor::plain("radius", 0.6).range(0.0, 1.0).step(0.01),
            PropertyDescriptor::plain("power", 1.0).range(0.2, 10.0).step(0.01),
            PropertyDescriptor::plain("bloomDebug", false).label("Debug"),
        ]);
        let mut material = PassMaterial::new(MaterialKind::Effect("bloom"));
        material
            .material
            .defines_mut()
            .set_value("MAX_INTENSITY", max_intensity.min(16.0));
        Self {
            relations: PassRelations::new()
                .before(&["screen"])
                .after(&["render", "progressive"])
                .required(&["render"]),
            state: PassState {
                clear: true,
                ..PassState::default()
            },
            props,
            material,
            weights: Vec::new(),
        }
    }

    /// Weights used by the last rendered frame.
    #[must_use]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Renders one step from `source` into `dst`.
    fn step(
        &mut self,
        ctx: &mut RenderContext<'_>,
        step: u32,
        source: TargetId,
        dst: TargetId,
        weight: f32,
    ) {
        self.material.set_step(step);
        let uniforms = &mut self.material.material.uniforms;
        uniforms.set("tDiffuse", source);
        uniforms.set("weight", weight);
        ctx.backend.set_render_target(Some(dst));
        if step != UPSAMPLE && self.state.clear {
            ctx.backend.clear(Vec4::ZERO);
        }
        self.material.blit(ctx, Some(dst));
    }
}

impl PostPass for BloomPass {
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
        write: TargetId,
        read: TargetId,
        _delta: f32,
        _mask_active: bool,
    ) -> Result<()> {
        self.material.sync_properties(&self.props);
        self.material.material.uniforms.set(
            "prefilter",
            prefilter_vector(self.props.float("threshold"), self.props.float("softThreshold")),
        );
        if let Some(gbuffer) = ctx.shared.get("gbuffer") {
            self.material.material.uniforms.set("tGBuffer", gbuffer);
        }

        let (width, height) = ctx.viewport;
        let requested = self.props.int("bloomIterations").clamp(2, 7) as u32;
        let levels = effective_iterations(width, height, requested);
        self.weights = bloom_weights(levels, self.props.float("radius"), self.props.float("power"));

        let format = ctx.color_format;
        let mut chain = Vec::with_capacity(levels as usize);

        let first = ctx.pool.acquire(
            &mut *ctx.backend,
            &TargetDescriptor::relative("bloom_mip", 1.0, format),
            Self::NAME,
        )?;
        self.step(ctx, PREFILTER, read, first, self.weights[0]);
        chain.push(first);

        let mut multiplier = 0.5;
        for i in 1..levels as usize {
            multiplier *= 0.5;
            let dst = ctx.pool.acquire(
                &mut *ctx.backend,
                &TargetDescriptor::relative("bloom_mip", multiplier, format),
                Self::NAME,
            )?;
            let weight = modified_weight(&self.weights, i);
            self.step(ctx, DOWNSAMPLE, chain[i - 1], dst, weight);
            chain.push(dst);
        }

        // Additive upsample back to level 0, releasing as we go.
        let mut current = chain.pop().unwrap_or(first);
        while let Some(dst) = chain.pop() {
            self.step(ctx, UPSAMPLE, current, dst, 1.0);
            ctx.pool.release(current)?;
            current = dst;
        }

        if self.props.flag("bloomDebug") {
            self.material.material.uniforms.remove("tSource");
            self.step(ctx, DEBUG, current, write, 1.0);
        } else {
            self.material.material.uniforms.set("tSource", read);
            self.step(ctx, COMPOSITE, current, write, 1.0);
            self.material.material.uniforms.remove("tSource");
        }
        ctx.pool.release(current)?;
        self.state.needs_swap = true;
        Ok(())
    }
}

/// Adds the `bloom` pass.
#[derive(Debug)]
pub struct BloomPlugin {
    max_intensity: f32,
}

impl BloomPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self { max_intensity: 8.0 }
    }

    /// Upper bound of HDR values fed to the prefilter (capped at 16).
    #[must_use]
    pub fn with_max_intensity(mut self, max_intensity: f32) -> Self {
        self.max_intensity = max_intensity;
        self
    }
}

impl Default for BloomPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for BloomPlugin {
    fn name(&self) -> &'static str {
        BloomPass::NAME
    }

    fn attach(&mut self, core: &mut PipelineCore) -> Result<()> {
        core.graph.register(Box::new(BloomPass::new(self.max_intensity)))
    }

    fn detach(&mut self, core: &mut PipelineCore) {
        if let Err(e) = core.remove_pass(BloomPass::NAME) {
            log::warn!("{e}");
        }
    }

    any_accessors!();
}
