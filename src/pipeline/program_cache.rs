//! Program Cache
//!
//! Maps the registry's cache key to a compiled backend program. A program
//! is composed and compiled only on a key miss, so the key is the sole
//! thing standing between a material edit and a stale shader variant.
//!
//! # Validation Mode
//!
//! With validation on, every cache hit re-composes the shader and compares
//! its xxh3 source hash to the one recorded at compile time. A mismatch
//! means some extension changed shader text without changing its key: the
//! hit is logged as an error, counted in [`CacheStats::stale`], and the
//! program is recompiled so the frame still renders correctly.

use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_64;

use super::extension::ExtensionStore;
use super::registry::MaterialExtensionRegistry;
use super::shader_lib::ShaderLibrary;
use crate::graph::backend::{GpuBackend, ProgramId};
use crate::resources::Material;

#[derive(Debug, Clone)]
struct CachedProgram {
    key: String,
    program: ProgramId,
    source_hash: u64,
}

/// Hit / miss / stale counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Hits whose re-composed source differed from the cached program.
    pub stale: u64,
}

/// Cache key → compiled program.
#[derive(Debug)]
pub struct ProgramCache {
    programs: FxHashMap<u64, CachedProgram>,
    validate: bool,
    stats: CacheStats,
}

impl ProgramCache {
    #[must_use]
    pub fn new(validate: bool) -> Self {
        Self {
            programs: FxHashMap::default(),
            validate,
            stats: CacheStats::default(),
        }
    }

    pub fn set_validation(&mut self, validate: bool) {
        self.validate = validate;
    }

    /// Returns the program for `material` under `registry`, compiling it on
    /// a key miss.
    pub fn prepare(
        &mut self,
        backend: &mut dyn GpuBackend,
        registry: &MaterialExtensionRegistry,
        store: &ExtensionStore,
        shaders: &ShaderLibrary,
        material: &Material,
    ) -> ProgramId {
        let key = registry.compute_key(store, material);
        let hashed = xxh3_64(key.as_bytes());

        if let Some(cached) = self.programs.get(&hashed)
            && cached.key == key
        {
            self.stats.hits += 1;
            if !self.validate {
                return cached.program;
            }
            let cached_hash = cached.source_hash;
            let cached_program = cached.program;

            let source = shaders.source_for(material.kind());
            let applied = registry.apply_to(store, material, source, &backend.info());
            if applied.shader.source_hash() == cached_hash {
                return cached_program;
            }
            self.stats.stale += 1;
            log::error!(
                "Stale program cache key '{key}': shader text changed without a key change"
            );
            let program = backend.compile_program(&key, &applied.shader);
            self.programs.insert(
                hashed,
                CachedProgram {
                    key,
                    program,
                    source_hash: applied.shader.source_hash(),
                },
            );
            return program;
        }

        self.stats.misses += 1;
        let source = shaders.source_for(material.kind());
        let applied = registry.apply_to(store, material, source, &backend.info());
        log::debug!("Compiling program '{key}'");
        let program = backend.compile_program(&key, &applied.shader);
        self.programs.insert(
            hashed,
            CachedProgram {
                key,
                program,
                source_hash: applied.shader.source_hash(),
            },
        );
        program
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Drops every cached program. Backends keep compiled programs alive on
    /// their own; this only forces recomposition.
    pub fn clear(&mut self) {
        self.programs.clear();
    }
}
