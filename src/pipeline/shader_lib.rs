//! Base Shader Library
//!
//! Base program templates per [`MaterialKind`]. Bodies are opaque; what
//! matters to composition is the set of named slots each template exposes.
//!
//! | Kind | Notable slots |
//! |------|---------------|
//! | `Physical` | `common`, `shadowmap_pars_fragment`, `lights_physical_pars_fragment`, `normal_fragment_begin`, `lights_fragment_begin`, `lights_fragment_end`, `aomap_fragment`, `map_fragment`, `alphamap_fragment`, `velocity_unpack`, `output_fragment` |
//! | `Basic` | `common`, `map_fragment`, `alphamap_fragment`, `output_fragment` |
//! | `Screen` | `common`, `screen_pars`, `screen_fragment`, `output_fragment` |
//! | `Effect(_)` | `common`, `effect_pars`, `effect_body`, `output_fragment` |
//!
//! Passes may register a dedicated template for their effect kind;
//! unregistered effects fall back to the generic full-screen template.

use rustc_hash::FxHashMap;

use super::shader_source::ShaderSource;
use crate::resources::MaterialKind;

const SURFACE_VERTEX: &str = "\
#include <common>
#pragma <velocity_pars_vertex>
void main() {
#include <begin_vertex>
#include <project_vertex>
#pragma <velocity_vertex>
}";

const PHYSICAL_FRAGMENT: &str = "\
#include <common>
#include <lights_physical_pars_fragment>
#include <shadowmap_pars_fragment>
#pragma <velocity_unpack>
void main() {
#include <map_fragment>
#include <alphamap_fragment>
#include <normal_fragment_begin>
#include <aomap_fragment>
#include <lights_fragment_begin>
#include <lights_fragment_end>
#include <output_fragment>
}";

const BASIC_FRAGMENT: &str = "\
#include <common>
void main() {
#include <map_fragment>
#include <alphamap_fragment>
#include <output_fragment>
}";

const FULLSCREEN_VERTEX: &str = "\
#include <fullscreen_vertex>";

const SCREEN_FRAGMENT: &str = "\
#include <common>
#pragma <screen_pars>
void main() {
#pragma <screen_fragment>
#include <output_fragment>
}";

const EFFECT_FRAGMENT: &str = "\
#include <common>
#pragma <effect_pars>
void main() {
#pragma <effect_body>
#include <output_fragment>
}";

/// Base templates keyed by material kind.
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    sources: FxHashMap<MaterialKind, ShaderSource>,
    fallback: ShaderSource,
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl ShaderLibrary {
    /// Library with the physical, basic and screen templates.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut sources = FxHashMap::default();
        sources.insert(
            MaterialKind::Physical,
            ShaderSource::new("physical", SURFACE_VERTEX, PHYSICAL_FRAGMENT),
        );
        sources.insert(
            MaterialKind::Basic,
            ShaderSource::new("basic", SURFACE_VERTEX, BASIC_FRAGMENT),
        );
        sources.insert(
            MaterialKind::Screen,
            ShaderSource::new("screen", FULLSCREEN_VERTEX, SCREEN_FRAGMENT),
        );
        Self {
            sources,
            fallback: ShaderSource::new("effect", FULLSCREEN_VERTEX, EFFECT_FRAGMENT),
        }
    }

    /// Registers (or replaces) the template for `kind`.
    pub fn register(&mut self, kind: MaterialKind, source: ShaderSource) {
        self.sources.insert(kind, source);
    }

    /// Template for `kind`, or the generic full-screen template.
    #[must_use]
    pub fn source_for(&self, kind: MaterialKind) -> &ShaderSource {
        self.sources.get(&kind).unwrap_or(&self.fallback)
    }
}
