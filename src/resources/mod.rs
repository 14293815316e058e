//! Core Resource Definitions
//!
//! CPU-side data the pipeline composes and uploads, independent of any GPU
//! implementation:
//! - [`Material`]: base material with kind, flags, defines and uniforms
//! - [`ShaderDefines`]: ordered preprocessor define table
//! - [`UniformTable`]: name → value uniform table
//! - [`PropertySet`]: declarative pass properties and their adapters

pub mod material;
pub mod properties;
pub mod shader_defines;
pub mod uniforms;
pub mod version_tracker;

pub use material::{
    AnisotropyMode, AnisotropySettings, Material, MaterialFlags, MaterialKind, MaterialMaps,
};
pub use properties::{
    PropertyDescriptor, PropertyKind, PropertyRange, PropertySet, PropertyValue, UiControl,
    UiWidget,
};
pub use shader_defines::ShaderDefines;
pub use uniforms::{UniformTable, UniformValue};
pub use version_tracker::ChangeTracker;
