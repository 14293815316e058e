//! Plugin Host and Frame Driver
//!
//! [`Pipeline`] owns the plugins and a [`PipelineCore`] holding every
//! shared subsystem. Plugins receive `&mut PipelineCore` in their hooks,
//! so they can register passes and extensions without touching each other.
//!
//! # Plugin Lifecycle
//!
//! ```text
//! add_plugin ──► dependency check ──► attach ──► PluginAdded ──► bind (all)
//! remove_plugin ──► detach ──► PluginRemoved ──► bind (all)
//! ```
//!
//! Optional collaborations (TAA using the velocity buffer, for instance)
//! are resolved in [`Plugin::bind`], which runs for every plugin after each
//! add or remove. Hard dependencies are declared by
//! [`Plugin::dependencies`] and checked at add time.
//!
//! # Frame
//!
//! [`Pipeline::render_frame`] validates the pass order, dispatches
//! `PreFrame`, applies camera-cut and scene-change invalidation, advances
//! the frame lifecycle, then walks the ordered passes with the read/write
//! colour buffers. Passes failing with a recoverable error are skipped for
//! the frame; structural errors abort the frame.

use std::any::Any;

use serde_json::{Map, Value};

use crate::errors::{PipelineError, Result};
use crate::graph::{
    CameraHistory, FrameInputs, FrameLifecycle, GpuBackend, MotionHistory, PassGraph,
    RenderContext, RenderTargetPool, SharedTargets, TargetId, TargetSpec, TemporalHistory,
};
use crate::passes::builtin::{ProgressivePass, RenderPass, ScreenPass};
use crate::pipeline::{
    ExtensionId, ExtensionStore, MaterialExtension, MaterialExtensionRegistry, ProgramCache,
    ShaderLibrary,
};
use crate::resources::properties::{load_json, to_json};
use crate::resources::{PropertySet, PropertyValue};
use crate::scene::Scene;
use crate::settings::PipelineSettings;
use crate::utils::interner;

// ─── Events ───────────────────────────────────────────────────────────────────

/// Lifecycle events dispatched to every plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Resize { width: u32, height: u32 },
    PreFrame,
    PostFrame,
    /// Structural scene edit (objects added or removed).
    SceneChanged,
    PluginAdded(&'static str),
    PluginRemoved(&'static str),
}

/// Messages plugins post for the host application.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    BakeProgress { plugin: &'static str, progress: f32 },
    Baked { plugin: &'static str },
}

// ─── Core ─────────────────────────────────────────────────────────────────────

/// Shared pipeline state handed to plugin hooks.
pub struct PipelineCore {
    pub graph: PassGraph,
    pub extensions: ExtensionStore,
    /// Registry applied to scene materials.
    pub materials: MaterialExtensionRegistry,
    pub shaders: ShaderLibrary,
    pub programs: ProgramCache,
    pub pool: RenderTargetPool,
    pub history: TemporalHistory,
    pub motion: MotionHistory,
    pub camera_history: CameraHistory,
    pub shared: SharedTargets,
    pub frame: FrameLifecycle,
    settings: PipelineSettings,
    backend: Box<dyn GpuBackend>,
    /// Composer colour buffers, `[read, write]`.
    buffers: [TargetId; 2],
    scene_version: Option<u64>,
    notifications: Vec<Notification>,
}

impl PipelineCore {
    fn new(mut backend: Box<dyn GpuBackend>, settings: PipelineSettings) -> Self {
        let (width, height) = settings.initial_size;
        let buffers = create_buffers(backend.as_mut(), &settings, width, height);
        Self {
            graph: PassGraph::new(),
            extensions: ExtensionStore::new(),
            materials: MaterialExtensionRegistry::new(),
            shaders: ShaderLibrary::with_builtin(),
            programs: ProgramCache::new(settings.validate_program_cache),
            pool: RenderTargetPool::new(settings.initial_size, settings.pool_max_idle_frames),
            history: TemporalHistory::new(),
            motion: MotionHistory::new(),
            camera_history: CameraHistory::new(),
            shared: SharedTargets::new(),
            frame: FrameLifecycle::new(settings.stable_noise),
            settings,
            backend,
            buffers,
            scene_version: None,
            notifications: Vec::new(),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &dyn GpuBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn GpuBackend {
        self.backend.as_mut()
    }

    /// Typed access to the backend (tests inspect the headless recorder).
    #[must_use]
    pub fn backend_as<B: GpuBackend>(&self) -> Option<&B> {
        self.backend.as_any().downcast_ref::<B>()
    }

    pub fn backend_as_mut<B: GpuBackend>(&mut self) -> Option<&mut B> {
        self.backend.as_any_mut().downcast_mut::<B>()
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[must_use]
    pub fn viewport(&self) -> (u32, u32) {
        self.pool.viewport()
    }

    /// Composer `[read, write]` buffers.
    #[must_use]
    pub fn buffers(&self) -> [TargetId; 2] {
        self.buffers
    }

    pub fn set_dirty(&mut self) {
        self.frame.set_dirty();
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    /// Stores `extension` and applies it to scene materials.
    pub fn add_material_extension(&mut self, extension: Box<dyn MaterialExtension>) -> ExtensionId {
        let id = self.extensions.insert(extension);
        self.materials.register(id);
        id
    }

    /// Reverse of [`add_material_extension`](Self::add_material_extension).
    pub fn remove_material_extension(&mut self, id: ExtensionId) {
        self.materials.unregister(id);
        self.extensions.remove(id);
    }

    /// Unregisters the pass `name` and releases its persistent targets.
    pub fn remove_pass(&mut self, name: &str) -> Result<()> {
        let mut pass = self.graph.unregister(name)?;
        pass.dispose(self.backend.as_mut());
        Ok(())
    }

    /// Persistent target at the current viewport size times `multiplier`.
    pub fn create_persistent_target(&mut self, label: &str, multiplier: f32) -> TargetId {
        let (w, h) = self.viewport();
        let spec = TargetSpec::new(
            label,
            ((w as f32 * multiplier).floor() as u32).max(1),
            ((h as f32 * multiplier).floor() as u32).max(1),
            self.settings.color_format,
        );
        self.backend.create_target(&spec)
    }

    fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        for t in self.buffers {
            self.backend.dispose_target(t);
        }
        self.buffers = create_buffers(self.backend.as_mut(), &self.settings, width, height);
        self.pool.resize(self.backend.as_mut(), width, height);
        self.history.resize(self.backend.as_mut());
        self.camera_history.invalidate();
        for pass in self.graph.iter_mut() {
            pass.resize(self.backend.as_mut(), width, height);
        }
        self.frame.set_dirty();
    }

    fn scene_changed(&mut self) {
        self.history.invalidate_all();
        self.frame.set_dirty();
    }

    /// Runs every enabled pass in order.
    fn execute(&mut self, scene: &Scene, delta: f32) -> Result<FrameReport> {
        let order = self.graph.ordered_indices()?;
        let [mut read, mut write] = self.buffers;
        let mut report = FrameReport::default();
        let mut dirty = false;

        let Self {
            graph,
            extensions,
            materials,
            shaders,
            programs,
            pool,
            history,
            motion,
            camera_history,
            shared,
            frame,
            settings,
            backend,
            ..
        } = self;

        for idx in order {
            let Some(pass) = graph.pass_at_mut(idx) else {
                continue;
            };
            let name = pass.name().to_string();
            if !pass.state().enabled {
                report.skipped.push(name);
                continue;
            }

            let mut ctx = RenderContext::new(
                backend.as_mut(),
                pool,
                history,
                motion,
                camera_history,
                shared,
                programs,
                extensions,
                materials,
                shaders,
                frame,
                scene,
                settings.color_format,
            );

            if !pass.before_render(&mut ctx) {
                dirty |= ctx.dirty_requested();
                report.skipped.push(name);
                continue;
            }

            match pass.render(&mut ctx, write, read, delta, false) {
                Ok(()) => {
                    if pass.state().needs_swap {
                        std::mem::swap(&mut read, &mut write);
                    }
                    pass.after_render(&mut ctx);
                    report.executed.push(name);
                }
                Err(e) if e.is_recoverable() => {
                    log::warn!("{e}");
                    report.skipped.push(name);
                }
                Err(e) => return Err(e),
            }
            dirty |= ctx.dirty_requested();
        }

        self.buffers = [read, write];
        report.output = read;
        report.dirty_requested = dirty;
        Ok(report)
    }
}

fn create_buffers(
    backend: &mut dyn GpuBackend,
    settings: &PipelineSettings,
    width: u32,
    height: u32,
) -> [TargetId; 2] {
    let spec = |label: &str| {
        TargetSpec::new(label, width, height, settings.color_format).with_depth(true)
    };
    [
        backend.create_target(&spec("composer_read")),
        backend.create_target(&spec("composer_write")),
    ]
}

impl std::fmt::Debug for PipelineCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCore")
            .field("graph", &self.graph)
            .field("extensions", &self.extensions)
            .field("viewport", &self.viewport())
            .finish_non_exhaustive()
    }
}

// ─── Plugins ──────────────────────────────────────────────────────────────────

/// A unit of pipeline functionality (passes, extensions, persistent targets).
pub trait Plugin: Any {
    /// Unique plugin name.
    fn name(&self) -> &'static str;

    /// Plugins that must be added first.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    fn attach(&mut self, core: &mut PipelineCore) -> Result<()>;

    fn detach(&mut self, core: &mut PipelineCore);

    /// Resolves optional collaborations; re-run after every add / remove.
    fn bind(&mut self, _core: &mut PipelineCore, _others: &PluginSet<'_>) {}

    fn on_event(&mut self, _core: &mut PipelineCore, _event: &HostEvent) {}

    /// Tunables, by default those of the pass named like the plugin.
    fn properties<'c>(&'c self, core: &'c PipelineCore) -> Option<&'c PropertySet> {
        core.graph.get(self.name())?.properties()
    }

    fn set_property(
        &mut self,
        core: &mut PipelineCore,
        name: &str,
        value: PropertyValue,
    ) -> Result<bool> {
        let props = core
            .graph
            .get_mut(self.name())
            .and_then(|p| p.properties_mut())
            .ok_or_else(|| PipelineError::UnknownProperty(name.to_string()))?;
        props.set(name, value)
    }

    /// Mutable tunables, for bulk loading.
    fn properties_mut<'c>(&'c mut self, core: &'c mut PipelineCore) -> Option<&'c mut PropertySet> {
        core.graph.get_mut(self.name())?.properties_mut()
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// The other plugins, as seen from [`Plugin::bind`].
pub struct PluginSet<'a> {
    head: &'a [Box<dyn Plugin>],
    tail: &'a [Box<dyn Plugin>],
}

impl PluginSet<'_> {
    fn iter(&self) -> impl Iterator<Item = &(dyn Plugin + 'static)> {
        self.head.iter().chain(self.tail).map(AsRef::as_ref)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.iter().any(|p| p.name() == name)
    }

    #[must_use]
    pub fn get<T: Plugin>(&self) -> Option<&T> {
        self.iter().find_map(|p| p.as_any().downcast_ref::<T>())
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(Plugin::name).collect()
    }
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────

/// Outcome of one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    /// Passes whose render step ran, in order.
    pub executed: Vec<String>,
    /// Disabled, opted-out or not-ready passes.
    pub skipped: Vec<String>,
    /// Buffer holding the final composited image.
    pub output: TargetId,
    /// Accumulation frame the report belongs to.
    pub frame: u32,
    /// Pool checkouts reclaimed at frame end.
    pub leaked_targets: usize,
    dirty_requested: bool,
}

/// Plugin host and frame driver.
pub struct Pipeline {
    core: PipelineCore,
    plugins: Vec<Box<dyn Plugin>>,
}

impl Pipeline {
    /// Creates a pipeline with the built-in `render`, `progressive` and
    /// `screen` passes.
    pub fn new(backend: Box<dyn GpuBackend>, settings: PipelineSettings) -> Result<Self> {
        interner::preload_common_defines();
        let mut core = PipelineCore::new(backend, settings);
        core.graph.register(Box::new(RenderPass::new()))?;
        core.graph.register(Box::new(ProgressivePass::new()))?;
        core.graph.register(Box::new(ScreenPass::new()))?;
        Ok(Self {
            core,
            plugins: Vec::new(),
        })
    }

    #[must_use]
    pub fn core(&self) -> &PipelineCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut PipelineCore {
        &mut self.core
    }

    /// Adds `plugin` after checking its dependencies.
    pub fn add_plugin<P: Plugin>(&mut self, plugin: P) -> Result<()> {
        self.add_boxed_plugin(Box::new(plugin))
    }

    pub fn add_boxed_plugin(&mut self, mut plugin: Box<dyn Plugin>) -> Result<()> {
        let name = plugin.name();
        if self.has_plugin(name) {
            return Err(PipelineError::DuplicatePlugin(name.to_string()));
        }
        if let Some(missing) = plugin
            .dependencies()
            .iter()
            .find(|dep| !self.has_plugin(dep))
        {
            return Err(PipelineError::MissingPlugin {
                plugin: name.to_string(),
                dependency: (*missing).to_string(),
            });
        }

        plugin.attach(&mut self.core)?;
        log::debug!("Plugin '{name}' attached");
        self.plugins.push(plugin);
        self.dispatch(&HostEvent::PluginAdded(name));
        self.rebind();
        self.core.set_dirty();
        Ok(())
    }

    /// Detaches and returns the plugin `name`.
    pub fn remove_plugin(&mut self, name: &str) -> Result<Box<dyn Plugin>> {
        let idx = self
            .plugins
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| PipelineError::UnknownPlugin(name.to_string()))?;
        if let Some(dependent) = self
            .plugins
            .iter()
            .find(|p| p.dependencies().contains(&name))
        {
            log::warn!(
                "Removing plugin '{name}' while '{}' depends on it",
                dependent.name()
            );
        }
        let mut plugin = self.plugins.remove(idx);
        plugin.detach(&mut self.core);
        log::debug!("Plugin '{name}' detached");
        self.dispatch(&HostEvent::PluginRemoved(plugin.name()));
        self.rebind();
        self.core.set_dirty();
        Ok(plugin)
    }

    #[must_use]
    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| p.name() == name)
    }

    #[must_use]
    pub fn plugin<T: Plugin>(&self) -> Option<&T> {
        self.plugins
            .iter()
            .find_map(|p| p.as_any().downcast_ref::<T>())
    }

    pub fn plugin_mut<T: Plugin>(&mut self) -> Option<&mut T> {
        self.plugins
            .iter_mut()
            .find_map(|p| p.as_any_mut().downcast_mut::<T>())
    }

    /// Runs `f` with the plugin of type `T` and the core.
    pub fn with_plugin<T: Plugin, R>(
        &mut self,
        f: impl FnOnce(&mut T, &mut PipelineCore) -> R,
    ) -> Option<R> {
        let plugin = self
            .plugins
            .iter_mut()
            .find_map(|p| p.as_any_mut().downcast_mut::<T>())?;
        Some(f(plugin, &mut self.core))
    }

    #[must_use]
    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    fn dispatch(&mut self, event: &HostEvent) {
        for plugin in &mut self.plugins {
            plugin.on_event(&mut self.core, event);
        }
    }

    fn rebind(&mut self) {
        for i in 0..self.plugins.len() {
            let (head, rest) = self.plugins.split_at_mut(i);
            let Some((me, tail)) = rest.split_first_mut() else {
                continue;
            };
            let others = PluginSet { head, tail };
            me.bind(&mut self.core, &others);
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.core.resize(width, height);
        self.dispatch(&HostEvent::Resize {
            width: width.max(1),
            height: height.max(1),
        });
    }

    /// Restarts accumulation on the next frame.
    pub fn set_dirty(&mut self) {
        self.core.set_dirty();
    }

    /// Invalidates temporal history after a structural scene edit.
    pub fn scene_changed(&mut self) {
        self.core.scene_changed();
        self.dispatch(&HostEvent::SceneChanged);
    }

    // ─── Properties ───────────────────────────────────────────────────────

    /// Sets a plugin property; marks the frame dirty on change.
    pub fn set_property(
        &mut self,
        plugin: &str,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<bool> {
        let p = self
            .plugins
            .iter_mut()
            .find(|p| p.name() == plugin)
            .ok_or_else(|| PipelineError::UnknownPlugin(plugin.to_string()))?;
        let changed = p.set_property(&mut self.core, name, value.into())?;
        if changed {
            self.core.set_dirty();
        }
        Ok(changed)
    }

    #[must_use]
    pub fn properties(&self, plugin: &str) -> Option<&PropertySet> {
        let p = self.plugins.iter().find(|p| p.name() == plugin)?;
        p.properties(&self.core)
    }

    /// `{ plugin: { property: value } }` for every plugin with properties.
    #[must_use]
    pub fn export_properties(&self) -> Value {
        let map: Map<String, Value> = self
            .plugins
            .iter()
            .filter_map(|p| Some((p.name().to_string(), to_json(p.properties(&self.core)?))))
            .collect();
        Value::Object(map)
    }

    /// Loads values written by [`export_properties`](Self::export_properties).
    /// Returns the number of values that changed.
    pub fn import_properties(&mut self, json: &Value) -> Result<usize> {
        let mut changed = 0;
        for plugin in &mut self.plugins {
            let Some(values) = json.get(plugin.name()) else {
                continue;
            };
            if let Some(props) = plugin.properties_mut(&mut self.core) {
                changed += load_json(props, values)?;
            }
        }
        if changed > 0 {
            self.core.set_dirty();
        }
        Ok(changed)
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.core.notifications)
    }

    // ─── Frame ────────────────────────────────────────────────────────────

    /// Renders one frame of `scene`.
    pub fn render_frame(&mut self, scene: &Scene, delta: f32) -> Result<FrameReport> {
        self.core.graph.resolve_order()?;

        if self.core.scene_version.is_some_and(|v| v != scene.version()) {
            self.scene_changed();
        }
        self.core.scene_version = Some(scene.version());

        self.dispatch(&HostEvent::PreFrame);

        let camera = scene.render_camera();
        if self.core.camera_history.begin_frame(camera) {
            log::debug!("Camera cut to camera {}", camera.id);
            self.core.history.invalidate_all();
            self.core.set_dirty();
        } else if self.core.camera_history.previous_view_projection()
            != self.core.camera_history.current_view_projection()
        {
            self.core.set_dirty();
        }

        let inputs = FrameInputs {
            view_projection: self.core.camera_history.current_view_projection(),
            prev_view_projection: self.core.camera_history.previous_view_projection(),
            viewport: self.core.viewport(),
            delta,
            near: camera.near,
            far: camera.far,
        };
        self.core.frame.begin_frame(&inputs);

        let mut report = self.core.execute(scene, delta)?;
        report.frame = self.core.frame.frame();

        let core = &mut self.core;
        report.leaked_targets = core.pool.end_frame(core.backend.as_mut());
        core.frame.end_frame();
        if report.dirty_requested {
            core.set_dirty();
        }
        for object in scene.objects() {
            core.motion.record(object.uuid, object.world);
        }
        core.motion.retain(|uuid| scene.object(*uuid).is_some());

        self.dispatch(&HostEvent::PostFrame);
        Ok(report)
    }

    /// Detaches every plugin and releases every target.
    pub fn dispose(mut self) {
        while let Some(plugin) = self.plugins.last() {
            let name = plugin.name();
            if self.remove_plugin(name).is_err() {
                break;
            }
        }
        let core = &mut self.core;
        let names: Vec<String> = core.graph.names().iter().map(ToString::to_string).collect();
        for name in names {
            if let Err(e) = core.remove_pass(&name) {
                log::warn!("{e}");
            }
        }
        core.pool.dispose_all(core.backend.as_mut());
        core.history.dispose(core.backend.as_mut());
        for t in core.buffers {
            core.backend.dispose_target(t);
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("plugins", &self.plugin_names())
            .field("core", &self.core)
            .finish()
    }
}
