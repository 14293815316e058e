#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod errors;
pub mod graph;
pub mod host;
pub mod passes;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod settings;
pub mod utils;

pub use errors::{PipelineError, Result};
pub use graph::{GpuBackend, HeadlessBackend, PassGraph, PostPass, RenderContext, TargetId};
pub use host::{FrameReport, HostEvent, Notification, Pipeline, PipelineCore, Plugin};
pub use pipeline::{MaterialExtension, MaterialExtensionRegistry};
pub use resources::{
    Material, MaterialFlags, MaterialKind, PropertySet, PropertyValue, ShaderDefines,
};
pub use scene::{CameraView, Scene};
pub use settings::PipelineSettings;
pub use utils::interner;
