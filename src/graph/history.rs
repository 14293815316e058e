//! Temporal History
//!
//! Last-frame data for temporal passes:
//!
//! - [`TemporalHistory`]: keyed previous-frame render targets, either
//!   committed by the pass (`commit_current`) or owned here as a ping-pong
//!   pair (`ensure_pair` / `commit_pair`).
//! - [`MotionHistory`]: previous world matrix per object, for velocity.
//! - [`CameraHistory`]: previous view-projection and camera identity.
//!
//! # First Frame
//!
//! After [`TemporalHistory::invalidate`] a key is in its *first frame*:
//! [`TemporalHistory::get_previous`] returns `None` until the next commit,
//! so blending treats previous as equal to current for exactly one frame
//! and never samples pre-invalidation data.
//!
//! Invalidation triggers are applied by the frame driver: viewport resize,
//! camera switch away from the main camera, and scene structural change.

use glam::Mat4;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use super::backend::{GpuBackend, TargetId, TargetSpec};
use crate::scene::CameraView;

// ─── Temporal History ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct PingPong {
    targets: [TargetId; 2],
    /// Index written this frame.
    write: usize,
}

#[derive(Debug, Default)]
struct HistorySlot {
    previous: Option<TargetId>,
    first_frame: bool,
    pair: Option<PingPong>,
    pair_spec: Option<TargetSpec>,
}

/// Keyed previous-frame targets.
#[derive(Debug, Default)]
pub struct TemporalHistory {
    slots: FxHashMap<String, HistorySlot>,
}

impl TemporalHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Previous-frame target for `key`, or `None` on the first frame after
    /// creation or invalidation.
    #[must_use]
    pub fn get_previous(&self, key: &str) -> Option<TargetId> {
        let slot = self.slots.get(key)?;
        if slot.first_frame {
            return None;
        }
        slot.previous
    }

    /// Returns `true` while `key` has no valid previous frame.
    #[must_use]
    pub fn is_first_frame(&self, key: &str) -> bool {
        self.get_previous(key).is_none()
    }

    /// Records `target` as the frame to read back next frame.
    pub fn commit_current(&mut self, key: &str, target: TargetId) {
        let slot = self.slots.entry(key.to_string()).or_default();
        slot.previous = Some(target);
        slot.first_frame = false;
    }

    /// Drops the previous frame of `key`.
    pub fn invalidate(&mut self, key: &str) {
        if let Some(slot) = self.slots.get_mut(key) {
            log::debug!("History '{key}' invalidated");
            slot.previous = None;
            slot.first_frame = true;
        }
    }

    pub fn invalidate_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.previous = None;
            slot.first_frame = true;
        }
    }

    /// Target to write this frame's data for an owned ping-pong `key`,
    /// (re)creating the pair when `spec` changed.
    pub fn ensure_pair(
        &mut self,
        backend: &mut dyn GpuBackend,
        key: &str,
        spec: &TargetSpec,
    ) -> TargetId {
        let slot = self.slots.entry(key.to_string()).or_default();
        let pair = match slot.pair {
            Some(pair) if slot.pair_spec.as_ref() == Some(spec) => pair,
            old => {
                if let Some(old) = old {
                    for t in old.targets {
                        backend.dispose_target(t);
                    }
                }
                let pair = PingPong {
                    targets: [backend.create_target(spec), backend.create_target(spec)],
                    write: 0,
                };
                slot.pair = Some(pair);
                slot.pair_spec = Some(spec.clone());
                slot.previous = None;
                slot.first_frame = true;
                pair
            }
        };
        pair.targets[pair.write]
    }

    /// Promotes this frame's write target of `key` to previous and flips
    /// the pair.
    pub fn commit_pair(&mut self, key: &str) {
        let Some(slot) = self.slots.get_mut(key) else {
            return;
        };
        if let Some(pair) = slot.pair.as_mut() {
            slot.previous = Some(pair.targets[pair.write]);
            slot.first_frame = false;
            pair.write = 1 - pair.write;
        }
    }

    /// Disposes every owned pair and invalidates all keys.
    pub fn resize(&mut self, backend: &mut dyn GpuBackend) {
        for slot in self.slots.values_mut() {
            if let Some(pair) = slot.pair.take() {
                for t in pair.targets {
                    backend.dispose_target(t);
                }
            }
            slot.pair_spec = None;
        }
        self.invalidate_all();
    }

    /// Removes `key`, disposing its owned pair.
    pub fn remove(&mut self, backend: &mut dyn GpuBackend, key: &str) {
        if let Some(slot) = self.slots.remove(key)
            && let Some(pair) = slot.pair
        {
            for t in pair.targets {
                backend.dispose_target(t);
            }
        }
    }

    pub fn dispose(&mut self, backend: &mut dyn GpuBackend) {
        let keys: Vec<String> = self.slots.keys().cloned().collect();
        for key in keys {
            self.remove(backend, &key);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ─── Motion History ───────────────────────────────────────────────────────────

/// Previous world matrix per object identity.
#[derive(Debug, Default)]
pub struct MotionHistory {
    previous: FxHashMap<Uuid, Mat4>,
}

impl MotionHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Previous world matrix of `object`, or `current` if none was recorded,
    /// which yields zero motion on an object's first frame.
    #[must_use]
    pub fn previous_world(&self, object: Uuid, current: Mat4) -> Mat4 {
        self.previous.get(&object).copied().unwrap_or(current)
    }

    pub fn record(&mut self, object: Uuid, world: Mat4) {
        self.previous.insert(object, world);
    }

    /// Drops entries for objects no longer present.
    pub fn retain(&mut self, mut alive: impl FnMut(&Uuid) -> bool) {
        self.previous.retain(|id, _| alive(id));
    }

    pub fn clear(&mut self) {
        self.previous.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.previous.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}

// ─── Camera History ───────────────────────────────────────────────────────────

/// Previous view-projection of the render camera.
#[derive(Debug, Default, Clone, Copy)]
pub struct CameraHistory {
    camera_id: Option<u64>,
    previous_view_projection: Option<Mat4>,
    current_view_projection: Mat4,
}

impl CameraHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a frame with `camera`. Returns `true` on a camera cut (the
    /// camera identity changed since the last frame).
    pub fn begin_frame(&mut self, camera: &CameraView) -> bool {
        let cut = self.camera_id.is_some_and(|id| id != camera.id);
        if cut {
            self.previous_view_projection = None;
        } else if self.camera_id.is_some() {
            self.previous_view_projection = Some(self.current_view_projection);
        }
        self.camera_id = Some(camera.id);
        self.current_view_projection = camera.view_projection();
        cut
    }

    #[must_use]
    pub fn current_view_projection(&self) -> Mat4 {
        self.current_view_projection
    }

    /// Previous view-projection, falling back to the current one on the
    /// first frame.
    #[must_use]
    pub fn previous_view_projection(&self) -> Mat4 {
        self.previous_view_projection
            .unwrap_or(self.current_view_projection)
    }

    pub fn invalidate(&mut self) {
        self.previous_view_projection = None;
    }
}
