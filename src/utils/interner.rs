//! Global String Interner
//!
//! Shader define names and uniform names are compared and hashed on every
//! material preparation. Interning turns them into integer [`Symbol`]s so
//! those comparisons are O(1).

use std::sync::LazyLock;

use lasso::{Spur, ThreadedRodeo};

static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::new);

/// Compact integer identifier for an interned string.
pub type Symbol = Spur;

/// Interns `s`, returning the existing symbol if it was seen before.
#[inline]
pub fn intern(s: &str) -> Symbol {
    INTERNER.get_or_intern(s)
}

/// Looks up `s` without interning it.
#[inline]
pub fn get(s: &str) -> Option<Symbol> {
    INTERNER.get(s)
}

/// Resolves a symbol back to its string.
#[inline]
pub fn resolve(sym: Symbol) -> &'static str {
    INTERNER.resolve(&sym)
}

/// Pre-interns the define names every pipeline touches.
pub fn preload_common_defines() {
    for name in [
        "PASS_STEP",
        "HAS_GBUFFER",
        "HAS_VELOCITY_BUFFER",
        "SSR_STEP_COUNT",
        "SSR_RAY_COUNT",
        "SSGI_ENABLED",
        "SSCS_ENABLED",
        "ANISOTROPY_ENABLED",
        "DEBUG_OUTLINE",
    ] {
        intern(name);
    }
}
