//! Shader Composition Pipeline
//!
//! How a material becomes a compiled program:
//!
//! ```text
//! Material ──► MaterialExtensionRegistry ──► cache key ──► ProgramCache
//!                     │                                      │ miss
//!                     ▼                                      ▼
//!          ExtensionStore (priority order)     ShaderLibrary template
//!                     │                                      │
//!                     └──── defines / uniforms / slot edits ─┘
//!                                        ▼
//!                                 ComposedShader ──► GpuBackend::compile_program
//! ```

pub mod extension;
pub mod program_cache;
pub mod registry;
pub mod shader_lib;
pub mod shader_source;

pub use extension::{ExtensionId, ExtensionStore, MaterialExtension};
pub use program_cache::{CacheStats, ProgramCache};
pub use registry::{AppliedMaterial, MaterialExtensionRegistry};
pub use shader_lib::ShaderLibrary;
pub use shader_source::{ComposedShader, ShaderBuilder, ShaderSource, ShaderTemplate, StageBuilder};
