//! Uniform Values
//!
//! [`UniformTable`] is the name → value table a material, a pass material
//! or an extension fills before a draw. It follows the same sorted-symbol
//! layout as [`ShaderDefines`](super::ShaderDefines), and merging is
//! last-writer-wins.
//!
//! The per-frame uniform block shared by every pass lives in
//! [`FrameUniforms`](crate::graph::frame::FrameUniforms); tables here only
//! carry material and pass parameters.

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::graph::backend::TargetId;
use crate::utils::interner::{self, Symbol};

/// A single uniform value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    /// Linear RGB colour.
    Color(Vec3),
    /// Sampled render target; `None` binds the backend's dummy texture.
    Texture(Option<TargetId>),
}

impl UniformValue {
    /// Builds a colour from a packed `0xRRGGBB` value.
    #[must_use]
    pub fn color_hex(hex: u32) -> Self {
        Self::Color(hex_to_rgb(hex))
    }

    #[must_use]
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Self::Float(v) => Some(v),
            Self::Int(v) => Some(v as f32),
            Self::Bool(v) => Some(if v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_texture(&self) -> Option<TargetId> {
        match *self {
            Self::Texture(t) => t,
            _ => None,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        Self::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        Self::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        Self::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        Self::Mat4(v)
    }
}

impl From<TargetId> for UniformValue {
    fn from(v: TargetId) -> Self {
        Self::Texture(Some(v))
    }
}

/// Converts a packed `0xRRGGBB` colour to normalized RGB.
#[must_use]
pub fn hex_to_rgb(hex: u32) -> Vec3 {
    Vec3::new(
        ((hex >> 16) & 0xff) as f32 / 255.0,
        ((hex >> 8) & 0xff) as f32 / 255.0,
        (hex & 0xff) as f32 / 255.0,
    )
}

/// Name → value uniform table, sorted by interned name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformTable {
    entries: Vec<(Symbol, UniformValue)>,
}

impl UniformTable {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) {
        let key = interner::intern(name);
        let value = value.into();
        match self.entries.binary_search_by_key(&key, |&(k, _)| k) {
            Ok(idx) => self.entries[idx].1 = value,
            Err(idx) => self.entries.insert(idx, (key, value)),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        let key = interner::get(name)?;
        self.entries
            .binary_search_by_key(&key, |&(k, _)| k)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    pub fn remove(&mut self, name: &str) -> Option<UniformValue> {
        let key = interner::get(name)?;
        let idx = self.entries.binary_search_by_key(&key, |&(k, _)| k).ok()?;
        Some(self.entries.remove(idx).1)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Merges `other` into `self`; values from `other` win.
    pub fn merge(&mut self, other: &UniformTable) {
        for &(key, value) in &other.entries {
            match self.entries.binary_search_by_key(&key, |&(k, _)| k) {
                Ok(idx) => self.entries[idx].1 = value,
                Err(idx) => self.entries.insert(idx, (key, value)),
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &UniformValue)> {
        self.entries
            .iter()
            .map(|(k, v)| (interner::resolve(*k), v))
    }

    /// Every render target sampled by this table.
    pub fn textures(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.entries.iter().filter_map(|(_, v)| v.as_texture())
    }
}
