//! Material Extension Registry
//!
//! Ordered set of extensions applied to the materials a registry serves.
//! The registry holds [`ExtensionId`]s only; the extensions themselves live
//! in the [`ExtensionStore`].
//!
//! # Ordering
//!
//! For a given material, the *active* extensions are those that are
//! enabled and compatible with it, sorted by ascending priority with ties
//! broken by registration sequence. Both [`apply_to`] and [`compute_key`]
//! walk this exact sequence.
//!
//! # Cache Key
//!
//! ```text
//! key = "<name>:<ext key>;" for each active extension, in order
//!     + "<material kind>#<material define hash>"
//! ```
//!
//! Any change to an extension's key fragment, to the active set or to its
//! order changes the string, which invalidates the compiled program.
//!
//! [`apply_to`]: MaterialExtensionRegistry::apply_to
//! [`compute_key`]: MaterialExtensionRegistry::compute_key

use std::fmt::Write;

use smallvec::SmallVec;

use super::extension::{ExtensionId, ExtensionStore, MaterialExtension};
use super::shader_source::{ComposedShader, ShaderBuilder, ShaderSource};
use crate::graph::backend::BackendInfo;
use crate::resources::{ChangeTracker, Material, ShaderDefines, UniformTable};

#[derive(Debug, Clone, Copy)]
struct Registration {
    id: ExtensionId,
    seq: u64,
}

/// Everything a compile needs for one material.
#[derive(Debug, Clone)]
pub struct AppliedMaterial {
    pub cache_key: String,
    pub defines: ShaderDefines,
    pub uniforms: UniformTable,
    pub shader: ComposedShader,
}

type Active<'s> = SmallVec<[&'s dyn MaterialExtension; 8]>;

/// Ordered, non-owning list of extensions.
#[derive(Debug, Default)]
pub struct MaterialExtensionRegistry {
    registrations: Vec<Registration>,
    next_seq: u64,
    version: ChangeTracker,
}

impl MaterialExtensionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id`. Returns `false` if it was already registered.
    pub fn register(&mut self, id: ExtensionId) -> bool {
        if self.contains(id) {
            return false;
        }
        self.registrations.push(Registration {
            id,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        self.version.changed();
        true
    }

    /// Unregisters `id`. Returns `false` if it was not registered.
    pub fn unregister(&mut self, id: ExtensionId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        let removed = self.registrations.len() != before;
        if removed {
            self.version.changed();
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, id: ExtensionId) -> bool {
        self.registrations.iter().any(|r| r.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Bumped on every register / unregister.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.version()
    }

    /// Enabled, compatible extensions for `material`, in application order.
    fn active<'s>(&self, store: &'s ExtensionStore, material: &Material) -> Active<'s> {
        let mut active: SmallVec<[(i32, u64, &'s dyn MaterialExtension); 8]> = self
            .registrations
            .iter()
            .filter_map(|r| store.get(r.id).map(|ext| (ext.priority(), r.seq, ext)))
            .filter(|(_, _, ext)| ext.is_enabled() && ext.is_compatible(material))
            .collect();
        active.sort_by_key(|&(priority, seq, _)| (priority, seq));
        active.into_iter().map(|(_, _, ext)| ext).collect()
    }

    /// Names of the active extensions for `material`, in application order.
    #[must_use]
    pub fn active_names(&self, store: &ExtensionStore, material: &Material) -> Vec<&'static str> {
        self.active(store, material)
            .iter()
            .map(|ext| ext.name())
            .collect()
    }

    /// Authoritative program cache key for `material`.
    #[must_use]
    pub fn compute_key(&self, store: &ExtensionStore, material: &Material) -> String {
        Self::key_for(&self.active(store, material), material)
    }

    fn key_for(active: &[&dyn MaterialExtension], material: &Material) -> String {
        let mut key = String::new();
        for ext in active {
            // Writing to a String cannot fail.
            let _ = write!(key, "{}:{};", ext.name(), ext.cache_key(material));
        }
        let _ = write!(
            key,
            "{}#{:016x}",
            material.kind().identifier(),
            material.defines().compute_hash()
        );
        key
    }

    /// Effective uniforms for `material`: its own table overlaid by every
    /// active extension in order (last writer wins).
    #[must_use]
    pub fn uniforms_for(&self, store: &ExtensionStore, material: &Material) -> UniformTable {
        let mut uniforms = material.uniforms.clone();
        for ext in self.active(store, material) {
            ext.extra_uniforms(material, &mut uniforms);
        }
        uniforms
    }

    /// Merges defines and uniforms and runs every active shader extender
    /// against `source`.
    #[must_use]
    pub fn apply_to(
        &self,
        store: &ExtensionStore,
        material: &Material,
        source: &ShaderSource,
        backend: &BackendInfo,
    ) -> AppliedMaterial {
        let active = self.active(store, material);

        let mut defines = material.defines().clone();
        let mut uniforms = material.uniforms.clone();
        let mut shader = ShaderBuilder::new(source);

        for ext in &active {
            ext.extra_defines(material, &mut defines);
            ext.extra_uniforms(material, &mut uniforms);
            shader.begin_extension(ext.name());
            ext.extend_shader(&mut shader, material, backend);
        }

        AppliedMaterial {
            cache_key: Self::key_for(&active, material),
            shader: shader.compose(&defines),
            defines,
            uniforms,
        }
    }
}
