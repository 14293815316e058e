//! Frame Lifecycle
//!
//! Per-frame state shared by every pass:
//!
//! - [`FrameCounter`]: accumulation frame, noise frame and total frames
//! - [`FrameUniforms`]: the one frame uniform block, owned here and
//!   borrowed read-only by passes
//! - the dirty flag that restarts progressive effects
//!
//! # Counter Rules
//!
//! | Event | `frame` | `noise_frame` |
//! |-------|---------|---------------|
//! | `begin_frame` after `set_dirty` | reset to 0 | reset to 0 unless stable noise |
//! | `begin_frame` after a rendered frame | +1 | +1 |
//! | `begin_frame` with advance suppressed | unchanged | unchanged |
//!
//! [`Accumulator`] is the small convergence state machine used by effects
//! that accumulate over a bounded number of frames (ground shadow baking).

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Frame numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounter {
    /// Frames since the last reset; drives accumulation.
    pub frame: u32,
    /// Frames since the last noise reset; seeds dithering.
    pub noise_frame: u32,
    /// Frames rendered over the lifetime of the pipeline.
    pub total_frames: u64,
}

/// GPU layout of the per-frame uniform block (160 bytes, no padding).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view_projection: [[f32; 4]; 4],
    pub prev_view_projection: [[f32; 4]; 4],
    pub resolution: [f32; 2],
    pub delta: f32,
    pub time: f32,
    pub frame: u32,
    pub noise_frame: u32,
    pub near: f32,
    pub far: f32,
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            view_projection: Mat4::IDENTITY.to_cols_array_2d(),
            prev_view_projection: Mat4::IDENTITY.to_cols_array_2d(),
            resolution: [1.0, 1.0],
            delta: 0.0,
            time: 0.0,
            frame: 0,
            noise_frame: 0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

/// Inputs to [`FrameLifecycle::begin_frame`].
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs {
    pub view_projection: Mat4,
    pub prev_view_projection: Mat4,
    pub viewport: (u32, u32),
    pub delta: f32,
    pub near: f32,
    pub far: f32,
}

/// Frame counters, dirty flag and frame uniforms.
#[derive(Debug, Clone)]
pub struct FrameLifecycle {
    counter: FrameCounter,
    uniforms: FrameUniforms,
    stable_noise: bool,
    dirty: bool,
    suppress_advance: bool,
    /// A frame finished since the last `begin_frame`.
    pending_advance: bool,
    time: f32,
}

impl FrameLifecycle {
    #[must_use]
    pub fn new(stable_noise: bool) -> Self {
        Self {
            counter: FrameCounter::default(),
            uniforms: FrameUniforms::default(),
            stable_noise,
            dirty: true,
            suppress_advance: false,
            pending_advance: false,
            time: 0.0,
        }
    }

    /// Restarts accumulation at the next `begin_frame`.
    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_stable_noise(&mut self, stable_noise: bool) {
        self.stable_noise = stable_noise;
    }

    #[must_use]
    pub fn stable_noise(&self) -> bool {
        self.stable_noise
    }

    /// Keeps the counters where they are for the next `begin_frame`.
    pub fn suppress_frame_advance(&mut self) {
        self.suppress_advance = true;
    }

    /// Advances or resets the counters and refreshes the uniform block.
    /// Returns `true` when accumulation was restarted.
    pub fn begin_frame(&mut self, inputs: &FrameInputs) -> bool {
        let restarted = self.dirty;
        if self.dirty {
            self.counter.frame = 0;
            if !self.stable_noise {
                self.counter.noise_frame = 0;
            }
            self.dirty = false;
        } else if self.pending_advance && !self.suppress_advance {
            self.counter.frame += 1;
            self.counter.noise_frame = self.counter.noise_frame.wrapping_add(1);
        }
        if restarted && self.stable_noise && self.pending_advance {
            self.counter.noise_frame = self.counter.noise_frame.wrapping_add(1);
        }
        self.suppress_advance = false;
        self.pending_advance = false;

        self.time += inputs.delta;
        self.uniforms = FrameUniforms {
            view_projection: inputs.view_projection.to_cols_array_2d(),
            prev_view_projection: inputs.prev_view_projection.to_cols_array_2d(),
            resolution: [inputs.viewport.0 as f32, inputs.viewport.1 as f32],
            delta: inputs.delta,
            time: self.time,
            frame: self.counter.frame,
            noise_frame: self.counter.noise_frame,
            near: inputs.near,
            far: inputs.far,
        };
        restarted
    }

    /// Marks the frame as rendered.
    pub fn end_frame(&mut self) {
        self.pending_advance = true;
        self.counter.total_frames += 1;
    }

    #[must_use]
    pub fn frame(&self) -> u32 {
        self.counter.frame
    }

    #[must_use]
    pub fn noise_frame(&self) -> u32 {
        self.counter.noise_frame
    }

    #[must_use]
    pub fn total_frames(&self) -> u64 {
        self.counter.total_frames
    }

    #[must_use]
    pub fn counter(&self) -> FrameCounter {
        self.counter
    }

    #[must_use]
    pub fn uniforms(&self) -> &FrameUniforms {
        &self.uniforms
    }

    /// Raw bytes of the uniform block for upload.
    #[must_use]
    pub fn uniform_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.uniforms)
    }
}

impl Default for FrameLifecycle {
    fn default() -> Self {
        Self::new(true)
    }
}

// ─── Accumulator ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvergenceState {
    #[default]
    Idle,
    Accumulating,
    Converged,
}

/// Bounded accumulation over `max_frames` frames.
#[derive(Debug, Clone)]
pub struct Accumulator {
    max_frames: u32,
    frame: u32,
    state: ConvergenceState,
}

impl Accumulator {
    #[must_use]
    pub fn new(max_frames: u32) -> Self {
        Self {
            max_frames: max_frames.max(1),
            frame: 0,
            state: ConvergenceState::Idle,
        }
    }

    /// Starts over from frame 0.
    pub fn restart(&mut self) {
        self.frame = 0;
        self.state = ConvergenceState::Accumulating;
    }

    pub fn stop(&mut self) {
        self.state = ConvergenceState::Idle;
    }

    /// Counts one accumulated frame. Returns the state after the step.
    pub fn step(&mut self) -> ConvergenceState {
        if self.state == ConvergenceState::Accumulating {
            self.frame += 1;
            if self.frame >= self.max_frames {
                self.state = ConvergenceState::Converged;
            }
        }
        self.state
    }

    pub fn set_max_frames(&mut self, max_frames: u32) {
        self.max_frames = max_frames.max(1);
        if self.state == ConvergenceState::Converged && self.frame < self.max_frames {
            self.state = ConvergenceState::Accumulating;
        }
    }

    #[must_use]
    pub fn state(&self) -> ConvergenceState {
        self.state
    }

    #[must_use]
    pub fn frame(&self) -> u32 {
        self.frame
    }

    #[must_use]
    pub fn max_frames(&self) -> u32 {
        self.max_frames
    }

    /// Fraction of `max_frames` accumulated so far.
    #[must_use]
    pub fn progress(&self) -> f32 {
        (self.frame as f32 / self.max_frames as f32).min(1.0)
    }
}
