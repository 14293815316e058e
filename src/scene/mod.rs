//! Scene Provider
//!
//! The minimal scene interface the pipeline consumes: a main camera, an
//! optional render camera override, a flat list of objects with world
//! matrices, and the materials they reference.
//!
//! Scene graphs, hierarchy and asset loading live outside this crate; hosts
//! mirror what a frame needs into a [`Scene`] and the pipeline reads it.
//! Structural edits (adding or removing objects or materials) bump
//! [`Scene::version`], which the pipeline treats as a history-invalidating
//! scene change.

use glam::{Mat4, Vec3};
use slotmap::{SlotMap, new_key_type};
use uuid::Uuid;

use crate::resources::{ChangeTracker, Material};

new_key_type! {
    /// Handle to a material stored in a [`Scene`].
    pub struct MaterialId;
}

// ─── Camera ───────────────────────────────────────────────────────────────────

/// Camera matrices for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraView {
    /// Stable camera identity; a change counts as a camera switch.
    pub id: u64,
    /// World → view transform.
    pub view: Mat4,
    pub projection: Mat4,
    pub near: f32,
    pub far: f32,
}

impl CameraView {
    #[must_use]
    pub fn new(id: u64, view: Mat4, projection: Mat4, near: f32, far: f32) -> Self {
        Self {
            id,
            view,
            projection,
            near,
            far,
        }
    }

    /// Right-handed perspective camera looking from `eye` at `target`.
    #[must_use]
    pub fn perspective(
        id: u64,
        eye: Vec3,
        target: Vec3,
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        Self {
            id,
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection: Mat4::perspective_rh(fov_y, aspect, near, far),
            near,
            far,
        }
    }

    #[inline]
    #[must_use]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

// ─── Objects ──────────────────────────────────────────────────────────────────

/// A drawable object.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub uuid: Uuid,
    pub name: String,
    pub world: Mat4,
    pub material: MaterialId,
    pub visible: bool,
    pub casts_shadow: bool,
}

// ─── Scene ────────────────────────────────────────────────────────────────────

/// Frame input for the pipeline.
#[derive(Debug, Clone)]
pub struct Scene {
    materials: SlotMap<MaterialId, Material>,
    objects: Vec<SceneObject>,
    main_camera: CameraView,
    render_camera: Option<CameraView>,
    version: ChangeTracker,
}

impl Scene {
    #[must_use]
    pub fn new(main_camera: CameraView) -> Self {
        Self {
            materials: SlotMap::with_key(),
            objects: Vec::new(),
            main_camera,
            render_camera: None,
            version: ChangeTracker::new(),
        }
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.version.changed();
        self.materials.insert(material)
    }

    #[must_use]
    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id)
    }

    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(id)
    }

    pub fn materials(&self) -> impl Iterator<Item = (MaterialId, &Material)> {
        self.materials.iter()
    }

    /// Adds a visible, shadow-casting object and returns its identity.
    pub fn add_object(&mut self, name: &str, world: Mat4, material: MaterialId) -> Uuid {
        let uuid = Uuid::new_v4();
        self.objects.push(SceneObject {
            uuid,
            name: name.to_string(),
            world,
            material,
            visible: true,
            casts_shadow: true,
        });
        self.version.changed();
        uuid
    }

    pub fn remove_object(&mut self, uuid: Uuid) -> Option<SceneObject> {
        let idx = self.objects.iter().position(|o| o.uuid == uuid)?;
        self.version.changed();
        Some(self.objects.remove(idx))
    }

    #[must_use]
    pub fn object(&self, uuid: Uuid) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.uuid == uuid)
    }

    /// Mutable object access. Transform edits are not structural and do not
    /// bump the scene version.
    pub fn object_mut(&mut self, uuid: Uuid) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find(|o| o.uuid == uuid)
    }

    #[inline]
    #[must_use]
    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    #[inline]
    #[must_use]
    pub fn main_camera(&self) -> &CameraView {
        &self.main_camera
    }

    pub fn main_camera_mut(&mut self) -> &mut CameraView {
        &mut self.main_camera
    }

    /// Overrides the camera used for rendering; `None` renders with the
    /// main camera.
    pub fn set_render_camera(&mut self, camera: Option<CameraView>) {
        self.render_camera = camera;
    }

    #[inline]
    #[must_use]
    pub fn render_camera(&self) -> &CameraView {
        self.render_camera.as_ref().unwrap_or(&self.main_camera)
    }

    /// Returns `true` when the render camera is the main camera.
    #[must_use]
    pub fn is_main_camera_active(&self) -> bool {
        self.render_camera().id == self.main_camera.id
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.version()
    }
}
