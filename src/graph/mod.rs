//! Pass Graph and Frame Resources
//!
//! ```text
//! PassGraph ── ordered passes ──► frame driver (host)
//!                                     │ RenderContext
//!        ┌───────────────┬────────────┼──────────────┬──────────────┐
//!        ▼               ▼            ▼              ▼              ▼
//!   GpuBackend   RenderTargetPool  TemporalHistory  SharedTargets  FrameLifecycle
//! ```

pub mod backend;
pub mod context;
pub mod frame;
#[allow(clippy::module_inception)]
pub mod graph;
pub mod history;
pub mod pass;
pub mod transient_pool;

pub use backend::{
    BackendInfo, BlitRecord, BlitSource, Command, DrawItem, GpuBackend, HeadlessBackend, ProgramId,
    ProgramRecord, TargetId, TargetSpec,
};
pub use context::{RenderContext, SharedTargets};
pub use frame::{
    Accumulator, ConvergenceState, FrameCounter, FrameInputs, FrameLifecycle, FrameUniforms,
};
pub use graph::PassGraph;
pub use history::{CameraHistory, MotionHistory, TemporalHistory};
pub use pass::{PassMaterial, PassRelations, PassState, PostPass};
pub use transient_pool::{RenderTargetPool, TargetDescriptor, TargetSize};
