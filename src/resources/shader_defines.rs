//! Shader Define Table
//!
//! Ordered preprocessor define table shared by materials, passes and
//! material extensions. Keys and values are interned [`Symbol`]s so that
//! merge and hash are integer operations.
//!
//! # Merge Semantics
//!
//! Extensions write into the same table in priority order. A later
//! [`ShaderDefines::set`] for an existing name overwrites the earlier value
//! (last writer wins), which lets an extension override a default.
//!
//! # Usage
//!
//! ```rust,ignore
//! use lustre::resources::ShaderDefines;
//!
//! let mut defines = ShaderDefines::new();
//! defines.set("SSR_STEP_COUNT", "16");
//! defines.set_bool("SSR_INLINE", true);
//!
//! let hash = defines.compute_hash();
//! let preamble = defines.to_preamble();
//! ```

use std::collections::BTreeMap;
use std::fmt::Display;
use std::hash::{Hash, Hasher};

use crate::utils::interner::{self, Symbol};

/// A collection of shader define entries.
///
/// Entries are kept sorted by key symbol so equal sets hash equally
/// regardless of insertion order.
#[derive(Debug, Clone, Default)]
pub struct ShaderDefines {
    defines: Vec<(Symbol, Symbol)>,
}

impl ShaderDefines {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            defines: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            defines: Vec::with_capacity(capacity),
        }
    }

    /// Sets `key` to `value`, overwriting any previous value.
    pub fn set(&mut self, key: &str, value: &str) {
        self.set_symbol(interner::intern(key), interner::intern(value));
    }

    /// Sets `key` to the display form of `value`.
    pub fn set_value(&mut self, key: &str, value: impl Display) {
        self.set(key, &value.to_string());
    }

    /// Sets `key` to `"1"` or `"0"`.
    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.set(key, if value { "1" } else { "0" });
    }

    #[inline]
    pub fn set_symbol(&mut self, key: Symbol, value: Symbol) {
        match self.defines.binary_search_by_key(&key, |&(k, _)| k) {
            Ok(idx) => self.defines[idx].1 = value,
            Err(idx) => self.defines.insert(idx, (key, value)),
        }
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(key_sym) = interner::get(key) else {
            return false;
        };
        match self.defines.binary_search_by_key(&key_sym, |&(k, _)| k) {
            Ok(idx) => {
                self.defines.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        interner::get(key).is_some_and(|sym| {
            self.defines
                .binary_search_by_key(&sym, |&(k, _)| k)
                .is_ok()
        })
    }

    /// Returns the value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&'static str> {
        let sym = interner::get(key)?;
        self.defines
            .binary_search_by_key(&sym, |&(k, _)| k)
            .ok()
            .map(|idx| interner::resolve(self.defines[idx].1))
    }

    /// Returns `true` when `key` is present with a value other than `"0"`.
    #[must_use]
    pub fn is_enabled(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v != "0" && v != "false")
    }

    #[inline]
    pub fn clear(&mut self) {
        self.defines.clear();
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.defines.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &(Symbol, Symbol)> {
        self.defines.iter()
    }

    /// Entries as `name -> value`, ordered by name.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<&'static str, &'static str> {
        self.defines
            .iter()
            .map(|&(k, v)| (interner::resolve(k), interner::resolve(v)))
            .collect()
    }

    /// `#define` preamble, one line per entry, ordered by name.
    #[must_use]
    pub fn to_preamble(&self) -> String {
        let mut out = String::new();
        for (k, v) in self.to_map() {
            out.push_str("#define ");
            out.push_str(k);
            out.push(' ');
            out.push_str(v);
            out.push('\n');
        }
        out
    }

    /// Merges `other` into `self`; values from `other` win.
    pub fn merge(&mut self, other: &ShaderDefines) {
        for &(key, value) in &other.defines {
            self.set_symbol(key, value);
        }
    }

    /// Content hash used in program cache keys.
    #[must_use]
    pub fn compute_hash(&self) -> u64 {
        use std::hash::BuildHasher;

        rustc_hash::FxBuildHasher.hash_one(self)
    }
}

impl Hash for ShaderDefines {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.defines.hash(state);
    }
}

impl PartialEq for ShaderDefines {
    fn eq(&self, other: &Self) -> bool {
        self.defines == other.defines
    }
}

impl Eq for ShaderDefines {}

impl From<&[(&str, &str)]> for ShaderDefines {
    fn from(defines: &[(&str, &str)]) -> Self {
        let mut result = Self::with_capacity(defines.len());
        for (k, v) in defines {
            result.set(k, v);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_set_wins() {
        let mut defines = ShaderDefines::new();
        defines.set("PASS_STEP", "0");
        defines.set("PASS_STEP", "3");
        assert_eq!(defines.get("PASS_STEP"), Some("3"));
        assert_eq!(defines.len(), 1);
    }

    #[test]
    fn hash_ignores_insertion_order() {
        let mut a = ShaderDefines::new();
        a.set("A_DEF", "1");
        a.set("B_DEF", "2");

        let mut b = ShaderDefines::new();
        b.set("B_DEF", "2");
        b.set("A_DEF", "1");

        assert_eq!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn preamble_is_name_ordered() {
        let mut defines = ShaderDefines::new();
        defines.set("ZED", "1");
        defines.set_bool("ALPHA", false);
        assert_eq!(defines.to_preamble(), "#define ALPHA 0\n#define ZED 1\n");
    }

    #[test]
    fn is_enabled_treats_zero_as_off() {
        let mut defines = ShaderDefines::new();
        defines.set_bool("ON_FLAG", true);
        defines.set_bool("OFF_FLAG", false);
        assert!(defines.is_enabled("ON_FLAG"));
        assert!(!defines.is_enabled("OFF_FLAG"));
        assert!(!defines.is_enabled("MISSING_FLAG"));
    }

    #[test]
    fn remove_reports_presence() {
        let mut defines = ShaderDefines::new();
        defines.set("REMOVABLE", "1");
        assert!(defines.remove("REMOVABLE"));
        assert!(!defines.remove("REMOVABLE"));
    }
}
