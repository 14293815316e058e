//! Material Extensions
//!
//! A [`MaterialExtension`] is a composable unit of shader edits plus the
//! defines and uniforms those edits need. Extensions are stored once in an
//! [`ExtensionStore`] and referenced by [`ExtensionId`] from any number of
//! [`MaterialExtensionRegistry`]s (the global one applied to scene
//! materials, and per-pass ones for full-screen materials).
//!
//! # Contract
//!
//! - `cache_key` must cover every piece of state that changes the text
//!   written by `extend_shader` or the defines written by `extra_defines`.
//!   Uniform-only state must stay out of it, or programs recompile needlessly.
//! - `extend_shader` edits slots only; it must not assume another
//!   extension's edits are present except through priority order.
//! - Lower `priority` runs earlier. Equal priorities run in registration
//!   order.
//!
//! [`MaterialExtensionRegistry`]: super::registry::MaterialExtensionRegistry

use std::any::Any;

use slotmap::{SlotMap, new_key_type};
use uuid::Uuid;

use super::shader_source::ShaderBuilder;
use crate::graph::backend::BackendInfo;
use crate::resources::{Material, ShaderDefines, UniformTable};

new_key_type! {
    /// Handle to an extension in an [`ExtensionStore`].
    pub struct ExtensionId;
}

/// Shader patch plus its defines and uniforms.
pub trait MaterialExtension: Any {
    /// Stable name used in cache keys and diagnostics.
    fn name(&self) -> &'static str;

    /// Application order; lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// Globally disabled extensions contribute nothing, not even a key.
    fn is_enabled(&self) -> bool {
        true
    }

    fn is_compatible(&self, material: &Material) -> bool;

    /// Key fragment covering every text-affecting input.
    fn cache_key(&self, material: &Material) -> String;

    fn extra_defines(&self, _material: &Material, _defines: &mut ShaderDefines) {}

    fn extra_uniforms(&self, _material: &Material, _uniforms: &mut UniformTable) {}

    fn extend_shader(
        &self,
        _shader: &mut ShaderBuilder<'_>,
        _material: &Material,
        _backend: &BackendInfo,
    ) {
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct StoredExtension {
    uuid: Uuid,
    extension: Box<dyn MaterialExtension>,
}

/// Owner of every extension instance.
#[derive(Default)]
pub struct ExtensionStore {
    extensions: SlotMap<ExtensionId, StoredExtension>,
}

impl ExtensionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, extension: Box<dyn MaterialExtension>) -> ExtensionId {
        self.extensions.insert(StoredExtension {
            uuid: Uuid::new_v4(),
            extension,
        })
    }

    pub fn remove(&mut self, id: ExtensionId) -> Option<Box<dyn MaterialExtension>> {
        self.extensions.remove(id).map(|s| s.extension)
    }

    #[must_use]
    pub fn get(&self, id: ExtensionId) -> Option<&dyn MaterialExtension> {
        self.extensions.get(id).map(|s| s.extension.as_ref())
    }

    pub fn get_mut(&mut self, id: ExtensionId) -> Option<&mut dyn MaterialExtension> {
        match self.extensions.get_mut(id) {
            Some(s) => Some(s.extension.as_mut()),
            None => None,
        }
    }

    /// Typed access to an extension's state.
    #[must_use]
    pub fn downcast<T: MaterialExtension>(&self, id: ExtensionId) -> Option<&T> {
        self.get(id)?.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: MaterialExtension>(&mut self, id: ExtensionId) -> Option<&mut T> {
        self.get_mut(id)?.as_any_mut().downcast_mut::<T>()
    }

    #[must_use]
    pub fn uuid(&self, id: ExtensionId) -> Option<Uuid> {
        self.extensions.get(id).map(|s| s.uuid)
    }

    #[must_use]
    pub fn contains(&self, id: ExtensionId) -> bool {
        self.extensions.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

impl std::fmt::Debug for ExtensionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.extensions.values().map(|s| s.extension.name()))
            .finish()
    }
}
