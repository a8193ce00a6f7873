use super::page::page_extent;
use super::types::TerrainIndex;
use crate::utils::math::AxisBox;
use glam::{Vec2, Vec3};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
}

impl Camera {
    pub fn new(position: Vec3) -> Self {
        Self { position }
    }

    /// Position projected onto the terrain ground plane
    pub fn ground_position(&self) -> Vec2 {
        self.position.truncate()
    }
}

pub type TerrainShownCallback = Box<dyn Fn(AxisBox)>;

/// The rendering side of the terrain.
///
/// Calls arrive on the main thread, from the manager's event subscriptions
/// and configuration handling.
pub trait TerrainAdapter {
    fn page_size(&self) -> u32;

    fn set_page_size(&mut self, page_size: u32);

    fn set_load_radius(&mut self, radius: f32);

    fn set_camera(&mut self, camera: &Camera);

    /// Create the scene once the terrain extent is known
    fn load_scene(&mut self);

    /// Release everything the adapter holds for the current terrain
    fn reset(&mut self);

    fn reload_page(&mut self, index: TerrainIndex);

    fn reload_page_material(&mut self, index: TerrainIndex);

    fn supports_foliage(&self) -> bool {
        true
    }

    /// Called with the area of terrain that became visible
    fn bind_terrain_shown(&mut self, _callback: TerrainShownCallback) {}
}

/// Adapter without a renderer. Logs what it is asked to do and reports a
/// reloaded page as shown.
pub struct HeadlessTerrainAdapter {
    page_size: u32,
    load_radius: f32,
    camera: Option<Camera>,
    scene_loaded: bool,
    page_reloads: usize,
    material_reloads: usize,
    terrain_shown: Option<TerrainShownCallback>,
}

impl HeadlessTerrainAdapter {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            load_radius: 0.0,
            camera: None,
            scene_loaded: false,
            page_reloads: 0,
            material_reloads: 0,
            terrain_shown: None,
        }
    }

    pub fn load_radius(&self) -> f32 {
        self.load_radius
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    pub fn is_scene_loaded(&self) -> bool {
        self.scene_loaded
    }

    pub fn page_reloads(&self) -> usize {
        self.page_reloads
    }

    pub fn material_reloads(&self) -> usize {
        self.material_reloads
    }
}

impl TerrainAdapter for HeadlessTerrainAdapter {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn set_page_size(&mut self, page_size: u32) {
        debug!("Headless adapter page size set to {}", page_size);
        self.page_size = page_size;
    }

    fn set_load_radius(&mut self, radius: f32) {
        debug!("Headless adapter load radius set to {}", radius);
        self.load_radius = radius;
    }

    fn set_camera(&mut self, camera: &Camera) {
        self.camera = Some(*camera);
    }

    fn load_scene(&mut self) {
        info!("Headless adapter scene loaded");
        self.scene_loaded = true;
    }

    fn reset(&mut self) {
        info!(
            "Headless adapter reset after {} page and {} material reloads",
            self.page_reloads, self.material_reloads
        );
        self.scene_loaded = false;
        self.camera = None;
    }

    fn reload_page(&mut self, index: TerrainIndex) {
        debug!("Headless adapter reloading page {}", index);
        self.page_reloads += 1;
        if let Some(shown) = &self.terrain_shown {
            shown(page_extent(index, self.page_size));
        }
    }

    fn reload_page_material(&mut self, index: TerrainIndex) {
        debug!("Headless adapter reloading material of page {}", index);
        self.material_reloads += 1;
    }

    fn bind_terrain_shown(&mut self, callback: TerrainShownCallback) {
        self.terrain_shown = Some(callback);
    }
}
