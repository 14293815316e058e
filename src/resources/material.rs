//! Materials
//!
//! A [`Material`] is the base a [`MaterialExtensionRegistry`] composes
//! against: a [`MaterialKind`] selecting the base shader template, the
//! material's own define and uniform tables, and a small set of per-material
//! switches that extensions consult in `is_compatible` / `cache_key`.
//!
//! Only state that changes shader text goes through [`Material::defines_mut`]
//! or [`Material::set_flag`]; both bump the material version so hosts can
//! tell text-affecting edits from uniform edits.
//!
//! [`MaterialExtensionRegistry`]: crate::pipeline::MaterialExtensionRegistry

use bitflags::bitflags;
use uuid::Uuid;

use super::shader_defines::ShaderDefines;
use super::uniforms::UniformTable;
use super::version_tracker::ChangeTracker;
use crate::graph::backend::TargetId;

/// Base material type. Selects the base shader template and forms the
/// static part of every program cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialKind {
    /// Lit PBR surface material.
    Physical,
    /// Unlit surface material.
    Basic,
    /// Final output material of the `screen` pass.
    Screen,
    /// Full-screen material owned by an effect pass.
    Effect(&'static str),
}

impl MaterialKind {
    /// Static identifier appended to cache keys and used for template lookup.
    #[must_use]
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::Physical => "physical",
            Self::Basic => "basic",
            Self::Screen => "screen",
            Self::Effect(name) => *name,
        }
    }
}

bitflags! {
    /// Per-material switches read by extensions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MaterialFlags: u32 {
        /// Opts the material out of every plugin extension.
        const PLUGINS_DISABLED  = 1 << 0;
        const SSR_DISABLED      = 1 << 1;
        const SSGI_DISABLED     = 1 << 2;
        const SSCS_DISABLED     = 1 << 3;
        const BLOOM_DISABLED    = 1 << 4;
        const VELOCITY_DISABLED = 1 << 5;
        /// Anisotropic shading requested (see [`AnisotropySettings`]).
        const ANISOTROPIC       = 1 << 6;
        /// The material belongs to the baked ground plane.
        const GROUND            = 1 << 7;
        const TRANSPARENT       = 1 << 8;
    }
}

/// How the anisotropy direction is sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AnisotropyMode {
    /// Uniform direction for the whole surface.
    Constant,
    /// Direction map stores a rotation angle.
    Rotation,
    /// Direction map stores a tangent-space direction.
    #[default]
    Direction,
}

impl AnisotropyMode {
    /// Value of the `ANISOTROPY_TEX_MODE` define.
    #[must_use]
    pub fn define_value(self) -> &'static str {
        match self {
            Self::Constant => "0",
            Self::Rotation => "1",
            Self::Direction => "2",
        }
    }
}

/// Per-material anisotropy parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnisotropySettings {
    pub factor: f32,
    pub noise: f32,
    /// Direction used when no map is bound.
    pub direction: f32,
    pub mode: AnisotropyMode,
    pub direction_map: Option<TargetId>,
}

impl Default for AnisotropySettings {
    fn default() -> Self {
        Self {
            factor: 1.0,
            noise: 0.0,
            direction: 1.0,
            mode: AnisotropyMode::Direction,
            direction_map: None,
        }
    }
}

/// Texture slots consulted by extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaterialMaps {
    pub map: Option<TargetId>,
    pub ao_map: Option<TargetId>,
    pub alpha_map: Option<TargetId>,
}

/// A material instance.
#[derive(Debug, Clone)]
pub struct Material {
    pub uuid: Uuid,
    pub name: String,
    kind: MaterialKind,
    flags: MaterialFlags,
    defines: ShaderDefines,
    pub uniforms: UniformTable,
    pub maps: MaterialMaps,
    anisotropy: Option<AnisotropySettings>,
    version: ChangeTracker,
}

impl Material {
    #[must_use]
    pub fn new(kind: MaterialKind) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: String::new(),
            kind,
            flags: MaterialFlags::empty(),
            defines: ShaderDefines::new(),
            uniforms: UniformTable::new(),
            maps: MaterialMaps::default(),
            anisotropy: None,
            version: ChangeTracker::new(),
        }
    }

    #[must_use]
    pub fn physical() -> Self {
        Self::new(MaterialKind::Physical)
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: MaterialFlags) -> Self {
        self.flags |= flags;
        self
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> MaterialKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn is_physical(&self) -> bool {
        self.kind == MaterialKind::Physical
    }

    #[inline]
    #[must_use]
    pub fn flags(&self) -> MaterialFlags {
        self.flags
    }

    /// Returns `true` if `flag` or [`MaterialFlags::PLUGINS_DISABLED`] is set.
    #[inline]
    #[must_use]
    pub fn opted_out(&self, flag: MaterialFlags) -> bool {
        self.flags.intersects(flag | MaterialFlags::PLUGINS_DISABLED)
    }

    pub fn set_flag(&mut self, flag: MaterialFlags, on: bool) {
        if self.flags.contains(flag) != on {
            self.flags.set(flag, on);
            self.version.changed();
        }
    }

    #[inline]
    #[must_use]
    pub fn defines(&self) -> &ShaderDefines {
        &self.defines
    }

    /// Mutable define access; marks the material changed.
    pub fn defines_mut(&mut self) -> &mut ShaderDefines {
        self.version.changed();
        &mut self.defines
    }

    #[inline]
    #[must_use]
    pub fn anisotropy(&self) -> Option<&AnisotropySettings> {
        self.anisotropy.as_ref()
    }

    /// Enables anisotropic shading with `settings`.
    pub fn enable_anisotropy(&mut self, settings: AnisotropySettings) {
        self.anisotropy = Some(settings);
        self.set_flag(MaterialFlags::ANISOTROPIC, true);
        self.version.changed();
    }

    pub fn disable_anisotropy(&mut self) {
        self.set_flag(MaterialFlags::ANISOTROPIC, false);
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugins_disabled_opts_out_of_everything() {
        let material = Material::physical().with_flags(MaterialFlags::PLUGINS_DISABLED);
        assert!(material.opted_out(MaterialFlags::SSR_DISABLED));
        assert!(material.opted_out(MaterialFlags::BLOOM_DISABLED));
    }

    #[test]
    fn set_flag_bumps_version_only_on_change() {
        let mut material = Material::physical();
        let v0 = material.version();
        material.set_flag(MaterialFlags::SSGI_DISABLED, false);
        assert_eq!(material.version(), v0);
        material.set_flag(MaterialFlags::SSGI_DISABLED, true);
        assert!(material.version() > v0);
    }

    #[test]
    fn enabling_anisotropy_sets_flag() {
        let mut material = Material::physical();
        material.enable_anisotropy(AnisotropySettings::default());
        assert!(material.flags().contains(MaterialFlags::ANISOTROPIC));
        assert_eq!(material.anisotropy().map(|a| a.mode), Some(AnisotropyMode::Direction));
    }
}
