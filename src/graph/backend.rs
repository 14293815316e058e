//! GPU Backend Abstraction
//!
//! The pipeline never talks to a graphics API directly. Every buffer
//! operation goes through [`GpuBackend`]: target creation and disposal,
//! render target binding, clears, blits (target copy or full-screen
//! program) and scene draws.
//!
//! [`HeadlessBackend`] is a recording implementation. It tracks live
//! targets and compiled programs, counts writes per target, and keeps the
//! full command log so tests can assert on buffer handoff without a GPU.
//!
//! ```text
//! Pass ──► RenderContext.backend ──► GpuBackend
//!                                      ├── wgpu / WebGL implementation (host)
//!                                      └── HeadlessBackend (tests, tools)
//! ```

use std::any::Any;

use glam::{Mat4, Vec4};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use uuid::Uuid;

use crate::pipeline::shader_source::ComposedShader;
use crate::resources::UniformTable;
use crate::scene::CameraView;

new_key_type! {
    /// Handle to a backend render target.
    pub struct TargetId;
    /// Handle to a compiled backend program.
    pub struct ProgramId;
}

/// Physical description of a render target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetSpec {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub depth: bool,
    pub samples: u32,
}

impl TargetSpec {
    #[must_use]
    pub fn new(label: &str, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            label: label.to_string(),
            width: width.max(1),
            height: height.max(1),
            format,
            depth: false,
            samples: 1,
        }
    }

    #[must_use]
    pub fn with_depth(mut self, depth: bool) -> Self {
        self.depth = depth;
        self
    }

    #[must_use]
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }
}

/// Capabilities reported by the backend, passed to shader extenders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendInfo {
    pub name: &'static str,
    pub max_samples: u32,
    /// Float colour targets are renderable.
    pub float_targets: bool,
}

/// Input of a blit.
#[derive(Debug, Clone, Copy)]
pub enum BlitSource<'a> {
    /// Plain copy of another target.
    Target(TargetId),
    /// Full-screen draw of a program with its uniforms.
    Program {
        program: ProgramId,
        uniforms: &'a UniformTable,
    },
}

/// One object draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    pub object: Uuid,
    pub program: ProgramId,
    pub world: Mat4,
    /// Previous-frame world matrix, for velocity output.
    pub previous_world: Mat4,
    pub uniforms: UniformTable,
}

/// Operations the pipeline needs from a graphics backend.
///
/// `None` as a target means the default framebuffer (screen).
pub trait GpuBackend: Any {
    fn info(&self) -> BackendInfo;

    fn create_target(&mut self, spec: &TargetSpec) -> TargetId;

    fn dispose_target(&mut self, target: TargetId);

    fn target_spec(&self, target: TargetId) -> Option<TargetSpec>;

    fn set_render_target(&mut self, target: Option<TargetId>);

    /// Clears the currently bound target.
    fn clear(&mut self, color: Vec4);

    fn blit(&mut self, dst: Option<TargetId>, source: BlitSource<'_>);

    fn draw(&mut self, target: Option<TargetId>, camera: &CameraView, items: &[DrawItem]);

    fn compile_program(&mut self, label: &str, shader: &ComposedShader) -> ProgramId;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ─── Headless Backend ─────────────────────────────────────────────────────────

/// Recorded backend command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateTarget(TargetId),
    DisposeTarget(TargetId),
    SetRenderTarget(Option<TargetId>),
    Clear {
        target: Option<TargetId>,
        color: Vec4,
    },
    Blit {
        dst: Option<TargetId>,
        source: BlitRecord,
    },
    Draw {
        target: Option<TargetId>,
        items: usize,
    },
    Compile {
        program: ProgramId,
        label: String,
    },
}

/// Recorded blit input.
#[derive(Debug, Clone, PartialEq)]
pub enum BlitRecord {
    Target(TargetId),
    Program {
        program: ProgramId,
        label: String,
        /// Targets sampled through the uniform table.
        inputs: Vec<TargetId>,
    },
}

/// A compiled program as seen by the headless backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRecord {
    pub label: String,
    pub source_hash: u64,
}

/// Recording backend without a GPU.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    targets: SlotMap<TargetId, TargetSpec>,
    programs: SlotMap<ProgramId, ProgramRecord>,
    writes: SecondaryMap<TargetId, u64>,
    bound: Option<TargetId>,
    commands: Vec<Command>,
    invalid_ops: usize,
}

impl HeadlessBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    #[must_use]
    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_live(&self, target: TargetId) -> bool {
        self.targets.contains_key(target)
    }

    /// Number of clears, blits and draws that wrote into `target`.
    #[must_use]
    pub fn write_count(&self, target: TargetId) -> u64 {
        self.writes.get(target).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn program(&self, program: ProgramId) -> Option<&ProgramRecord> {
        self.programs.get(program)
    }

    /// Operations that referenced a disposed or unknown target.
    #[must_use]
    pub fn invalid_ops(&self) -> usize {
        self.invalid_ops
    }

    fn check(&mut self, target: TargetId, op: &str) {
        if !self.targets.contains_key(target) {
            log::error!("Headless backend: {op} on dead target {target:?}");
            self.invalid_ops += 1;
        }
    }

    fn record_write(&mut self, target: Option<TargetId>, op: &str) {
        if let Some(t) = target {
            self.check(t, op);
            if let Some(count) = self.writes.get_mut(t) {
                *count += 1;
            }
        }
    }
}

impl GpuBackend for HeadlessBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "headless",
            max_samples: 4,
            float_targets: true,
        }
    }

    fn create_target(&mut self, spec: &TargetSpec) -> TargetId {
        let id = self.targets.insert(spec.clone());
        self.writes.insert(id, 0);
        self.commands.push(Command::CreateTarget(id));
        id
    }

    fn dispose_target(&mut self, target: TargetId) {
        if self.targets.remove(target).is_none() {
            log::error!("Headless backend: double dispose of {target:?}");
            self.invalid_ops += 1;
        }
        self.writes.remove(target);
        if self.bound == Some(target) {
            self.bound = None;
        }
        self.commands.push(Command::DisposeTarget(target));
    }

    fn target_spec(&self, target: TargetId) -> Option<TargetSpec> {
        self.targets.get(target).cloned()
    }

    fn set_render_target(&mut self, target: Option<TargetId>) {
        if let Some(t) = target {
            self.check(t, "bind");
        }
        self.bound = target;
        self.commands.push(Command::SetRenderTarget(target));
    }

    fn clear(&mut self, color: Vec4) {
        let target = self.bound;
        self.record_write(target, "clear");
        self.commands.push(Command::Clear { target, color });
    }

    fn blit(&mut self, dst: Option<TargetId>, source: BlitSource<'_>) {
        let record = match source {
            BlitSource::Target(src) => {
                self.check(src, "blit read");
                BlitRecord::Target(src)
            }
            BlitSource::Program { program, uniforms } => {
                let inputs: Vec<TargetId> = uniforms.textures().collect();
                for &input in &inputs {
                    self.check(input, "sample");
                }
                let label = self
                    .programs
                    .get(program)
                    .map(|p| p.label.clone())
                    .unwrap_or_default();
                BlitRecord::Program {
                    program,
                    label,
                    inputs,
                }
            }
        };
        self.record_write(dst, "blit");
        self.commands.push(Command::Blit {
            dst,
            source: record,
        });
    }

    fn draw(&mut self, target: Option<TargetId>, _camera: &CameraView, items: &[DrawItem]) {
        self.record_write(target, "draw");
        self.commands.push(Command::Draw {
            target,
            items: items.len(),
        });
    }

    fn compile_program(&mut self, label: &str, shader: &ComposedShader) -> ProgramId {
        let program = self.programs.insert(ProgramRecord {
            label: label.to_string(),
            source_hash: shader.source_hash(),
        });
        self.commands.push(Command::Compile {
            program,
            label: label.to_string(),
        });
        program
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_tracks_writes_per_target() {
        let mut backend = HeadlessBackend::new();
        let spec = TargetSpec::new("a", 64, 64, wgpu::TextureFormat::Rgba16Float);
        let a = backend.create_target(&spec);
        let b = backend.create_target(&spec);

        backend.set_render_target(Some(a));
        backend.clear(Vec4::ZERO);
        backend.blit(Some(b), BlitSource::Target(a));

        assert_eq!(backend.write_count(a), 1);
        assert_eq!(backend.write_count(b), 1);
        assert_eq!(backend.invalid_ops(), 0);
    }

    #[test]
    fn headless_flags_dead_target_use() {
        let mut backend = HeadlessBackend::new();
        let spec = TargetSpec::new("a", 8, 8, wgpu::TextureFormat::Rgba8Unorm);
        let a = backend.create_target(&spec);
        backend.dispose_target(a);
        backend.blit(None, BlitSource::Target(a));
        assert_eq!(backend.invalid_ops(), 1);
        assert_eq!(backend.live_targets(), 0);
    }
}
