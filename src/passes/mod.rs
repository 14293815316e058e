//! Built-in Passes and Effect Plugins
//!
//! | Plugin | Pass | Kind |
//! |--------|------|------|
//! | (host) | `render`, `progressive`, `screen` | built-in |
//! | [`GBufferPlugin`] | `gbuffer` | persistent target |
//! | [`VelocityPlugin`] | `velocity` | persistent target + unpack extension |
//! | [`BloomPlugin`] | `bloom` | pooled mip chain |
//! | [`DepthOfFieldPlugin`] | `dof` | pooled half-res targets |
//! | [`SsrPlugin`] | `ssr` | extension + optional persistent target |
//! | [`SsgiPlugin`] | `ssgi` | persistent target + extension |
//! | [`TaaPlugin`] | `taa` | history read |
//! | [`OutlinePlugin`] | `outline` | persistent target + screen extension |
//! | [`ContactShadowsPlugin`] | (none) | extension only |
//! | [`AnisotropyPlugin`] | (none) | extension only |
//! | [`GroundShadowPlugin`] | `ground_shadow` | persistent target + accumulation |

pub mod anisotropy;
pub mod bloom;
pub mod builtin;
pub mod contact_shadows;
pub mod depth_of_field;
pub mod ground_shadow;
pub mod outline;
pub mod ssgi;
pub mod ssr;
pub mod taa;
pub mod velocity;

pub use anisotropy::{AnisotropyExtension, AnisotropyPlugin};
pub use bloom::{BloomPass, BloomPlugin};
pub use builtin::{GBufferPass, GBufferPlugin, ProgressivePass, RenderPass, ScreenPass};
pub use contact_shadows::{ContactShadowsExtension, ContactShadowsPlugin};
pub use depth_of_field::{DepthOfFieldPass, DepthOfFieldPlugin};
pub use ground_shadow::{GroundShadowExtension, GroundShadowPass, GroundShadowPlugin};
pub use outline::{OutlineExtension, OutlinePass, OutlinePlugin};
pub use ssgi::{SsgiExtension, SsgiPass, SsgiPlugin};
pub use ssr::{SsrExtension, SsrPass, SsrPlugin};
pub use taa::{TaaPass, TaaPlugin};
pub use velocity::{VelocityPass, VelocityPlugin, VelocityUnpackExtension};

use crate::graph::{GpuBackend, TargetId, TargetSpec};
use crate::pipeline::{ExtensionId, MaterialExtensionRegistry};

/// Implements the accessor part of [`PostPass`](crate::graph::PostPass)
/// for a struct with `name`, `relations` and `state` fields.
macro_rules! pass_accessors {
    () => {
        fn name(&self) -> &str {
            Self::NAME
        }

        fn relations(&self) -> &$crate::graph::PassRelations {
            &self.relations
        }

        fn state(&self) -> &$crate::graph::PassState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut $crate::graph::PassState {
            &mut self.state
        }

        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
            self
        }
    };
}

/// `as_any` / `as_any_mut` for plugins and extensions.
macro_rules! any_accessors {
    () => {
        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
            self
        }
    };
}

pub(crate) use any_accessors;
pub(crate) use pass_accessors;

/// Scales a viewport dimension, never below one pixel.
#[inline]
pub(crate) fn scaled(size: u32, multiplier: f32) -> u32 {
    ((size as f32 * multiplier).floor() as u32).max(1)
}

/// Recreates `target` at `width × height × multiplier`, keeping its label
/// and format. A dead target is dropped.
pub(crate) fn resize_persistent(
    backend: &mut dyn GpuBackend,
    target: &mut Option<TargetId>,
    width: u32,
    height: u32,
    multiplier: f32,
) {
    let Some(old) = target.take() else {
        return;
    };
    let spec = backend.target_spec(old);
    backend.dispose_target(old);
    *target = spec.map(|spec| {
        backend.create_target(&TargetSpec {
            width: scaled(width, multiplier),
            height: scaled(height, multiplier),
            ..spec
        })
    });
}

/// Disposes `target` if set.
pub(crate) fn dispose_persistent(backend: &mut dyn GpuBackend, target: &mut Option<TargetId>) {
    if let Some(t) = target.take() {
        backend.dispose_target(t);
    }
}

/// Swaps the optional extension bound to a pass registry from `bound` to
/// `wanted`. Returns `true` if anything changed.
pub(crate) fn rebind_extension(
    registry: &mut MaterialExtensionRegistry,
    bound: &mut Option<ExtensionId>,
    wanted: Option<ExtensionId>,
) -> bool {
    if *bound == wanted {
        return false;
    }
    if let Some(old) = bound.take() {
        registry.unregister(old);
    }
    if let Some(id) = wanted {
        registry.register(id);
    }
    *bound = wanted;
    true
}
