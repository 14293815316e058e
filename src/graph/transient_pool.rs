//! Render Target Pool
//!
//! Scratch render targets borrowed by passes for the duration of a frame.
//! Passes never own pooled GPU memory; they [`acquire`] a target matching a
//! [`TargetDescriptor`] and [`release`] it when done.
//!
//! # Design
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  RenderTargetPool                         │
//! │                                                          │
//! │  targets: TargetId → { key, checked_out, idle_frames }   │
//! │  free:    PoolKey  → [TargetId]                          │
//! │                                                          │
//! │  acquire(desc)  pop matching free target or allocate     │
//! │  release(id)    push back onto its key's free list       │
//! │  end_frame()    reclaim leaks, age + trim idle targets   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Checkout Invariant
//!
//! Each physical target carries a `checked_out` flag. A target is checked
//! out to at most one borrower: acquiring pops it from the free list,
//! releasing a target that is not checked out is [`UseAfterRelease`], and a
//! free-list entry that is somehow still checked out is [`DoubleAcquire`].
//! Both are logged as errors and returned, never ignored.
//!
//! Descriptors are matched after resolving their size against the current
//! viewport, so two requests with different multipliers that land on the
//! same pixel size share targets.
//!
//! Persistent buffers (GBuffer, history, baked shadow maps) bypass the pool
//! and are created directly on the backend by their owner.
//!
//! [`acquire`]: RenderTargetPool::acquire
//! [`release`]: RenderTargetPool::release
//! [`UseAfterRelease`]: crate::errors::PipelineError::UseAfterRelease
//! [`DoubleAcquire`]: crate::errors::PipelineError::DoubleAcquire

use rustc_hash::FxHashMap;

use super::backend::{GpuBackend, TargetId, TargetSpec};
use crate::errors::{PipelineError, Result};

// ─── Public Types ─────────────────────────────────────────────────────────────

/// Size class of a pooled target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetSize {
    /// Multiplier of the main framebuffer size.
    Relative(f32),
    /// Absolute pixel size.
    Fixed(u32, u32),
}

/// Request for a pooled target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetDescriptor {
    pub label: &'static str,
    pub format: wgpu::TextureFormat,
    pub size: TargetSize,
    pub depth: bool,
    pub samples: u32,
}

impl TargetDescriptor {
    /// Colour target at `multiplier` × viewport size.
    #[must_use]
    pub fn relative(label: &'static str, multiplier: f32, format: wgpu::TextureFormat) -> Self {
        Self {
            label,
            format,
            size: TargetSize::Relative(multiplier),
            depth: false,
            samples: 1,
        }
    }

    #[must_use]
    pub fn fixed(
        label: &'static str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        Self {
            label,
            format,
            size: TargetSize::Fixed(width, height),
            depth: false,
            samples: 1,
        }
    }

    #[must_use]
    pub fn with_depth(mut self, depth: bool) -> Self {
        self.depth = depth;
        self
    }

    #[must_use]
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }

    /// Pixel size for a given viewport, at least 1×1.
    #[must_use]
    pub fn resolve_size(&self, viewport: (u32, u32)) -> (u32, u32) {
        match self.size {
            TargetSize::Relative(m) => (
                ((viewport.0 as f32 * m).floor() as u32).max(1),
                ((viewport.1 as f32 * m).floor() as u32).max(1),
            ),
            TargetSize::Fixed(w, h) => (w.max(1), h.max(1)),
        }
    }

    /// Physical spec for a given viewport.
    #[must_use]
    pub fn to_spec(&self, viewport: (u32, u32)) -> TargetSpec {
        let (w, h) = self.resolve_size(viewport);
        TargetSpec::new(self.label, w, h, self.format)
            .with_depth(self.depth)
            .with_samples(self.samples)
    }
}

// ─── Internal Types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    depth: bool,
    samples: u32,
}

impl PoolKey {
    fn resolve(desc: &TargetDescriptor, viewport: (u32, u32)) -> Self {
        let (width, height) = desc.resolve_size(viewport);
        Self {
            width,
            height,
            format: desc.format,
            depth: desc.depth,
            samples: desc.samples.max(1),
        }
    }
}

#[derive(Debug)]
struct PooledTarget {
    key: PoolKey,
    checked_out: bool,
    owner: String,
    /// Frames spent in the free list without being reused.
    idle_frames: u32,
}

// ─── Pool Implementation ──────────────────────────────────────────────────────

/// Recycling allocator for per-frame scratch targets.
#[derive(Debug)]
pub struct RenderTargetPool {
    targets: FxHashMap<TargetId, PooledTarget>,
    free: FxHashMap<PoolKey, Vec<TargetId>>,
    viewport: (u32, u32),
    max_idle_frames: u32,
}

impl RenderTargetPool {
    #[must_use]
    pub fn new(viewport: (u32, u32), max_idle_frames: u32) -> Self {
        Self {
            targets: FxHashMap::default(),
            free: FxHashMap::default(),
            viewport,
            max_idle_frames,
        }
    }

    #[inline]
    #[must_use]
    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// Checks out a target matching `desc`, allocating one if none is free.
    pub fn acquire(
        &mut self,
        backend: &mut dyn GpuBackend,
        desc: &TargetDescriptor,
        owner: &str,
    ) -> Result<TargetId> {
        let key = PoolKey::resolve(desc, self.viewport);

        if let Some(id) = self.free.get_mut(&key).and_then(Vec::pop) {
            let Some(entry) = self.targets.get_mut(&id) else {
                log::error!("Pool free list references unknown target {id:?}");
                return Err(PipelineError::UnknownTarget(format!("{id:?}")));
            };
            if entry.checked_out {
                log::error!(
                    "Pool handed out {id:?} to '{owner}' while checked out by '{}'",
                    entry.owner
                );
                return Err(PipelineError::DoubleAcquire(format!("{id:?}")));
            }
            entry.checked_out = true;
            entry.idle_frames = 0;
            owner.clone_into(&mut entry.owner);
            return Ok(id);
        }

        let id = backend.create_target(&desc.to_spec(self.viewport));
        log::debug!(
            "Pool allocated {id:?} ({}x{} {:?}) for '{owner}'",
            key.width,
            key.height,
            key.format
        );
        self.targets.insert(
            id,
            PooledTarget {
                key,
                checked_out: true,
                owner: owner.to_string(),
                idle_frames: 0,
            },
        );
        Ok(id)
    }

    /// Returns `target` to the free list. The caller must not use it again.
    pub fn release(&mut self, target: TargetId) -> Result<()> {
        let Some(entry) = self.targets.get_mut(&target) else {
            log::error!("Release of {target:?}, which the pool does not own");
            return Err(PipelineError::UnknownTarget(format!("{target:?}")));
        };
        if !entry.checked_out {
            log::error!("Release of {target:?}, which is already back in the pool");
            return Err(PipelineError::UseAfterRelease(format!("{target:?}")));
        }
        entry.checked_out = false;
        entry.idle_frames = 0;
        self.free.entry(entry.key).or_default().push(target);
        Ok(())
    }

    /// Asserts that `target` is currently checked out.
    pub fn ensure_checked_out(&self, target: TargetId) -> Result<()> {
        match self.targets.get(&target) {
            Some(entry) if entry.checked_out => Ok(()),
            Some(_) => {
                log::error!("Use of {target:?} after it was released");
                Err(PipelineError::UseAfterRelease(format!("{target:?}")))
            }
            None => Err(PipelineError::UnknownTarget(format!("{target:?}"))),
        }
    }

    #[must_use]
    pub fn is_checked_out(&self, target: TargetId) -> bool {
        self.targets.get(&target).is_some_and(|e| e.checked_out)
    }

    #[must_use]
    pub fn owns(&self, target: TargetId) -> bool {
        self.targets.contains_key(&target)
    }

    /// Frame-end bookkeeping: reclaims leaked checkouts, ages free targets
    /// and disposes the ones idle for too long. Returns the number of leaks.
    pub fn end_frame(&mut self, backend: &mut dyn GpuBackend) -> usize {
        let leaked: Vec<TargetId> = self
            .targets
            .iter()
            .filter(|(_, e)| e.checked_out)
            .map(|(&id, _)| id)
            .collect();
        for &id in &leaked {
            if let Some(entry) = self.targets.get(&id) {
                log::warn!("Pooled target {id:?} leaked by '{}', reclaiming", entry.owner);
            }
            // Cannot fail: the target is known and checked out.
            let _ = self.release(id);
        }

        for entry in self.targets.values_mut() {
            if !entry.checked_out {
                entry.idle_frames = entry.idle_frames.saturating_add(1);
            }
        }
        self.trim(backend, self.max_idle_frames);
        leaked.len()
    }

    /// Disposes free targets idle for more than `max_idle` frames.
    pub fn trim(&mut self, backend: &mut dyn GpuBackend, max_idle: u32) -> usize {
        let stale: Vec<TargetId> = self
            .targets
            .iter()
            .filter(|(_, e)| !e.checked_out && e.idle_frames > max_idle)
            .map(|(&id, _)| id)
            .collect();
        for &id in &stale {
            self.forget(id);
            backend.dispose_target(id);
        }
        stale.len()
    }

    /// Updates the reference viewport and drops every free target.
    pub fn resize(&mut self, backend: &mut dyn GpuBackend, width: u32, height: u32) {
        self.viewport = (width.max(1), height.max(1));
        let free: Vec<TargetId> = self
            .targets
            .iter()
            .filter(|(_, e)| !e.checked_out)
            .map(|(&id, _)| id)
            .collect();
        for id in free {
            self.forget(id);
            backend.dispose_target(id);
        }
    }

    /// Disposes every target, checked out or not.
    pub fn dispose_all(&mut self, backend: &mut dyn GpuBackend) {
        for (id, _) in self.targets.drain() {
            backend.dispose_target(id);
        }
        self.free.clear();
    }

    fn forget(&mut self, id: TargetId) {
        if let Some(entry) = self.targets.remove(&id)
            && let Some(list) = self.free.get_mut(&entry.key)
        {
            list.retain(|&t| t != id);
        }
    }

    /// Total targets owned by the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[must_use]
    pub fn checked_out_count(&self) -> usize {
        self.targets.values().filter(|e| e.checked_out).count()
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }
}
