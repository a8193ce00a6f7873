use glam::{Vec2, Vec3};
use slv_terrain::world::terrain::{
    Camera, PlantAreaQuery, TerrainAdapter, TerrainIndex, TerrainLayerDefinition, TerrainMod, TerrainShownCallback,
    TerrainTechnique,
};
use slv_terrain::world::TerrainManagerEvent;
use slv_terrain::{AxisBox, ConfigService, FrameLoop, TerrainManager, ThreadPoolConfig};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    SetPageSize(u32),
    SetLoadRadius(f32),
    SetCamera,
    LoadScene,
    Reset,
    ReloadPage(TerrainIndex),
    ReloadMaterial(TerrainIndex),
    Dropped,
}

type CallLog = Rc<RefCell<Vec<Call>>>;

struct RecordingAdapter {
    page_size: u32,
    foliage: bool,
    calls: CallLog,
    shown: Option<TerrainShownCallback>,
}

impl RecordingAdapter {
    fn new(page_size: u32, foliage: bool) -> (Self, CallLog) {
        let calls = CallLog::default();
        let adapter = Self {
            page_size,
            foliage,
            calls: Rc::clone(&calls),
            shown: None,
        };
        (adapter, calls)
    }
}

impl TerrainAdapter for RecordingAdapter {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn set_page_size(&mut self, page_size: u32) {
        self.page_size = page_size;
        self.calls.borrow_mut().push(Call::SetPageSize(page_size));
    }

    fn set_load_radius(&mut self, radius: f32) {
        self.calls.borrow_mut().push(Call::SetLoadRadius(radius));
    }

    fn set_camera(&mut self, _camera: &Camera) {
        self.calls.borrow_mut().push(Call::SetCamera);
    }

    fn load_scene(&mut self) {
        self.calls.borrow_mut().push(Call::LoadScene);
    }

    fn reset(&mut self) {
        self.calls.borrow_mut().push(Call::Reset);
    }

    fn reload_page(&mut self, index: TerrainIndex) {
        self.calls.borrow_mut().push(Call::ReloadPage(index));
        if let Some(shown) = &self.shown {
            shown(AxisBox::new(Vec2::ZERO, Vec2::ONE));
        }
    }

    fn reload_page_material(&mut self, index: TerrainIndex) {
        self.calls.borrow_mut().push(Call::ReloadMaterial(index));
    }

    fn supports_foliage(&self) -> bool {
        self.foliage
    }

    fn bind_terrain_shown(&mut self, callback: TerrainShownCallback) {
        self.shown = Some(callback);
    }
}

impl Drop for RecordingAdapter {
    fn drop(&mut self) {
        self.calls.borrow_mut().push(Call::Dropped);
    }
}

fn workers() -> ThreadPoolConfig {
    ThreadPoolConfig::with_workers(2)
}

fn manager_with(config: &Rc<ConfigService>, foliage: bool) -> (TerrainManager, CallLog) {
    let (adapter, calls) = RecordingAdapter::new(17, foliage);
    let manager = TerrainManager::new(Box::new(adapter), config, &workers()).unwrap();
    (manager, calls)
}

/// 2x2 segments of flat terrain
fn set_flat_terrain(manager: &mut TerrainManager) {
    let points = (0..=2).flat_map(|y| (0..=2).map(move |x| ((x, y), 5.0)));
    manager.handler_mut().set_base_points(points);
}

fn count(calls: &CallLog, predicate: impl Fn(&Call) -> bool) -> usize {
    calls.borrow().iter().filter(|c| predicate(c)).count()
}

#[test]
fn test_initial_config_is_applied() {
    let config = Rc::new(ConfigService::new());
    config.set("terrain", "pagesize", 32i64);
    config.set("terrain", "loadradius", 200i64);
    config.set("terrain", "preferredtechnique", "Simple");
    config.set("graphics", "foliage", true);

    let (manager, calls) = manager_with(&config, true);

    assert_eq!(manager.handler().page_size(), 33);
    assert_eq!(manager.handler().technique(), TerrainTechnique::Simple);
    assert!(manager.is_foliage_shown());
    let calls = calls.borrow();
    assert!(calls.contains(&Call::SetPageSize(33)));
    assert!(calls.contains(&Call::SetLoadRadius(200.0)));
}

#[test]
fn test_invalid_config_values_are_ignored() {
    let config = Rc::new(ConfigService::new());
    let (mut manager, calls) = manager_with(&config, true);
    config.set("graphics", "foliage", true);
    config.set("terrain", "pagesize", 64i64);
    manager.apply_pending_config();

    config.set("terrain", "pagesize", "huge");
    config.set("terrain", "loadradius", 1.5);
    config.set("terrain", "preferredtechnique", "raytraced");
    config.set("graphics", "foliage", 1i64);
    manager.apply_pending_config();

    assert_eq!(manager.handler().page_size(), 65);
    assert_eq!(manager.handler().technique(), TerrainTechnique::ShaderNormalMapped);
    assert!(manager.is_foliage_shown());
    assert_eq!(count(&calls, |c| matches!(c, Call::SetLoadRadius(_))), 0);
    assert_eq!(count(&calls, |c| matches!(c, Call::SetPageSize(_))), 1);
}

#[test]
fn test_out_of_range_page_size_keeps_previous() {
    let config = Rc::new(ConfigService::new());
    config.set("terrain", "pagesize", 16i64);
    let (mut manager, calls) = manager_with(&config, true);
    assert_eq!(manager.handler().page_size(), 17);

    for size in [i64::MAX, i64::from(u32::MAX), i64::from(u32::MAX) + 1, 0, -5] {
        config.set("terrain", "pagesize", size);
        manager.update();
        assert_eq!(manager.handler().page_size(), 17, "page size after {}", size);
    }
    assert_eq!(count(&calls, |c| matches!(c, Call::SetPageSize(_))), 1);
}

#[test]
fn test_foliage_requires_adapter_support() {
    let config = Rc::new(ConfigService::new());
    config.set("graphics", "foliage", true);
    let (manager, _calls) = manager_with(&config, false);
    assert!(!manager.is_foliage_shown());
}

#[test]
fn test_scene_loaded_once_when_world_size_known() {
    let config = Rc::new(ConfigService::new());
    let (mut manager, calls) = manager_with(&config, true);
    assert!(!manager.is_initialized());

    set_flat_terrain(&mut manager);
    manager.handler_mut().set_base_point(3, 0, 5.0);
    manager.handler_mut().set_base_point(3, 1, 5.0);

    assert!(manager.is_initialized());
    assert_eq!(count(&calls, |c| *c == Call::LoadScene), 1);
}

#[test]
fn test_shader_foliage_creates_populators() {
    let config = Rc::new(ConfigService::new());
    let (mut manager, _calls) = manager_with(&config, true);
    manager
        .handler_mut()
        .register_shader(TerrainLayerDefinition::new(1, "meadow", "meadow.png").with_foliage("grass", 1.0));
    assert!(manager.has_populator("grass"));

    set_flat_terrain(&mut manager);
    let plants = Rc::new(RefCell::new(None));
    {
        let plants = Rc::clone(&plants);
        let query = PlantAreaQuery::new("grass", AxisBox::new(Vec2::ZERO, Vec2::new(10.0, 10.0)));
        let queued = manager
            .get_plants_for_area(query, move |result| *plants.borrow_mut() = Some(result.plants.len()))
            .unwrap();
        assert!(queued.is_some());
    }
    let missing = manager
        .get_plants_for_area(PlantAreaQuery::new("fern", AxisBox::new(Vec2::ZERO, Vec2::ONE)), |_| {})
        .unwrap();
    assert!(missing.is_none());

    manager.handler_mut().drain();
    assert_eq!(*plants.borrow(), Some(4));
}

#[test]
fn test_terrain_updates_reload_pages_and_materials() {
    let config = Rc::new(ConfigService::new());
    config.set("terrain", "loadradius", 100i64);
    let (mut manager, calls) = manager_with(&config, true);
    let geometry_updates = Rc::new(RefCell::new(Vec::new()));
    let shown = Rc::new(RefCell::new(0));
    {
        let geometry_updates = Rc::clone(&geometry_updates);
        let shown = Rc::clone(&shown);
        manager.events().subscribe(move |event| match event {
            TerrainManagerEvent::PageGeometryUpdated { page } => geometry_updates.borrow_mut().push(*page),
            TerrainManagerEvent::TerrainShown { .. } => *shown.borrow_mut() += 1,
        });
    }

    set_flat_terrain(&mut manager);
    manager.start_paging(Camera::new(Vec3::new(64.0, 64.0, 20.0)));
    manager.update();
    let loaded = manager.handler().page_count();
    assert_eq!(loaded, 4);
    assert_eq!(count(&calls, |c| matches!(c, Call::ReloadPage(_))), loaded);
    assert_eq!(count(&calls, |c| matches!(c, Call::ReloadMaterial(_))), loaded);
    assert_eq!(geometry_updates.borrow().len(), loaded);
    assert_eq!(*shown.borrow(), loaded);

    calls.borrow_mut().clear();
    geometry_updates.borrow_mut().clear();
    manager
        .handler_mut()
        .add_mod("rock1", TerrainMod::crater(Vec2::new(8.0, 8.0), 2.0, 1.0))
        .unwrap();
    while !manager.handler().is_idle() {
        manager.handler_mut().wait_for_background();
        manager.update();
    }

    assert_eq!(*geometry_updates.borrow(), vec![TerrainIndex::new(0, 0)]);
    assert_eq!(
        *calls.borrow(),
        vec![
            Call::ReloadPage(TerrainIndex::new(0, 0)),
            Call::ReloadMaterial(TerrainIndex::new(0, 0))
        ]
    );
}

#[test]
fn test_update_shadows_command_recompiles_materials() {
    let config = Rc::new(ConfigService::new());
    config.set("terrain", "loadradius", 10i64);
    let (mut manager, calls) = manager_with(&config, true);
    set_flat_terrain(&mut manager);
    manager.start_paging(Camera::new(Vec3::new(8.0, 8.0, 20.0)));
    manager.update();
    calls.borrow_mut().clear();

    assert!(manager.run_command("update_shadows", ""));
    manager.update();

    let reloaded = count(&calls, |c| matches!(c, Call::ReloadMaterial(_)));
    assert_eq!(reloaded, manager.handler().page_count());
    assert_eq!(count(&calls, |c| matches!(c, Call::ReloadPage(_))), 0);
}

#[test]
fn test_teardown_drains_then_resets_then_drops_adapter() {
    let config = Rc::new(ConfigService::new());
    let (mut manager, calls) = manager_with(&config, true);
    set_flat_terrain(&mut manager);
    manager
        .handler_mut()
        .add_mod("rock1", TerrainMod::crater(Vec2::new(8.0, 8.0), 2.0, 1.0))
        .unwrap();
    manager.update();
    calls.borrow_mut().clear();

    drop(manager);

    assert_eq!(*calls.borrow(), vec![Call::Reset, Call::Dropped]);
    config.set("terrain", "pagesize", 8i64);
}

#[test]
fn test_frame_loop_drives_manager() {
    let config = Rc::new(ConfigService::new());
    let (manager, calls) = manager_with(&config, true);
    let manager = Rc::new(RefCell::new(manager));
    let mut frames = FrameLoop::new();
    frames.add_listener(&manager);

    config.set("terrain", "pagesize", 8i64);
    assert!(frames.run_frame(0.016));
    assert_eq!(manager.borrow().handler().page_size(), 9);
    assert!(calls.borrow().contains(&Call::SetPageSize(9)));

    drop(manager);
    assert!(!frames.run_frame(0.016));
    assert_eq!(calls.borrow().last(), Some(&Call::Dropped));
}
