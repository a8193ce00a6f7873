//! Terrain manager
//!
//! Glue between the terrain handler, the rendering adapter, foliage and the
//! runtime configuration. Owns all three and tears them down in order.

use super::adapter::{Camera, TerrainAdapter};
use super::commands::TerrainCommand;
use super::executor::TaskId;
use super::foliage::{PlantAreaQuery, PlantAreaQueryResult, Vegetation};
use super::handler::{TerrainHandler, TickReport};
use super::shader::TerrainTechnique;
use super::TerrainResult;
use crate::app::{FrameEvent, FrameListener};
use crate::config::concurrency::ThreadPoolConfig;
use crate::config::service::{ConfigChanged, ConfigService, ConfigValue};
use crate::world::events::{EventBus, SubscriptionId, TerrainEvent, TerrainManagerEvent};
use glam::Vec2;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};
use tracing::{debug, info, trace, warn};

const WATCHED_SETTINGS: [(&str, &str); 4] = [
    ("graphics", "foliage"),
    ("terrain", "preferredtechnique"),
    ("terrain", "pagesize"),
    ("terrain", "loadradius"),
];

/// State reached from handler event callbacks
struct ManagerState {
    adapter: Box<dyn TerrainAdapter>,
    vegetation: Vegetation,
    foliage_shown: bool,
    initialized: bool,
    load_radius: f32,
    camera: Option<Camera>,
}

pub struct TerrainManager {
    // Dropped first; its worker pool is already shut down by then
    handler: TerrainHandler,
    state: Rc<RefCell<ManagerState>>,
    events: Rc<EventBus<TerrainManagerEvent>>,
    config_changes: Rc<RefCell<VecDeque<ConfigChanged>>>,
    config: Weak<ConfigService>,
    config_subscription: SubscriptionId,
    handler_subscription: SubscriptionId,
}

impl TerrainManager {
    pub fn new(
        adapter: Box<dyn TerrainAdapter>,
        config: &Rc<ConfigService>,
        workers: &ThreadPoolConfig,
    ) -> TerrainResult<Self> {
        let handler = TerrainHandler::new(adapter.page_size(), workers)?;
        let events: Rc<EventBus<TerrainManagerEvent>> = Rc::new(EventBus::new());
        let state = Rc::new(RefCell::new(ManagerState {
            adapter,
            vegetation: Vegetation::new(),
            foliage_shown: false,
            initialized: false,
            load_radius: 0.0,
            camera: None,
        }));

        {
            let events = Rc::downgrade(&events);
            state.borrow_mut().adapter.bind_terrain_shown(Box::new(move |area| {
                if let Some(events) = events.upgrade() {
                    events.emit(&TerrainManagerEvent::TerrainShown { areas: vec![area] });
                }
            }));
        }

        let handler_subscription = {
            let state = Rc::downgrade(&state);
            let events = Rc::downgrade(&events);
            handler.events().subscribe(move |event| {
                if let (Some(state), Some(events)) = (state.upgrade(), events.upgrade()) {
                    on_terrain_event(&state, &events, event);
                }
            })
        };

        let config_changes = Rc::new(RefCell::new(VecDeque::new()));
        let config_subscription = {
            let queue = Rc::downgrade(&config_changes);
            config.subscribe(move |change: &ConfigChanged| {
                if !WATCHED_SETTINGS.iter().any(|(section, key)| change.is(section, key)) {
                    return;
                }
                if let Some(queue) = queue.upgrade() {
                    queue.borrow_mut().push_back(change.clone());
                }
            })
        };

        let mut manager = Self {
            handler,
            state,
            events,
            config_changes,
            config: Rc::downgrade(config),
            config_subscription,
            handler_subscription,
        };

        for (section, key) in WATCHED_SETTINGS {
            if let Some(value) = config.get(section, key) {
                manager.apply_config(&ConfigChanged {
                    section: section.to_string(),
                    key: key.to_string(),
                    value,
                });
            }
        }
        info!("Terrain manager created");
        Ok(manager)
    }

    pub fn events(&self) -> &Rc<EventBus<TerrainManagerEvent>> {
        &self.events
    }

    pub fn handler(&self) -> &TerrainHandler {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut TerrainHandler {
        &mut self.handler
    }

    /// Setting the camera starts paging around it
    pub fn start_paging(&mut self, camera: Camera) {
        let mut state = self.state.borrow_mut();
        state.adapter.set_camera(&camera);
        state.camera = Some(camera);
    }

    pub fn get_height(&self, position: Vec2) -> Option<f32> {
        self.handler.get_height(position)
    }

    pub fn blit_heights(&self, x_min: i32, x_max: i32, y_min: i32, y_max: i32) -> Vec<f32> {
        self.handler.blit_heights(x_min, x_max, y_min, y_max)
    }

    pub fn get_base_points(
        &mut self,
        callback: impl FnOnce(&BTreeMap<(i32, i32), f32>) + 'static,
    ) -> TerrainResult<TaskId> {
        self.handler.get_base_points(callback)
    }

    /// Query plants of `query.plant_type`. Nothing is queued when no
    /// populator exists for that type.
    pub fn get_plants_for_area(
        &mut self,
        query: PlantAreaQuery,
        callback: impl FnOnce(PlantAreaQueryResult) + 'static,
    ) -> TerrainResult<Option<TaskId>> {
        let populator = self
            .state
            .borrow()
            .vegetation
            .get_populator(&query.plant_type)
            .cloned();
        match populator {
            Some(populator) => self.handler.get_plants_for_area(&populator, query, callback).map(Some),
            None => {
                debug!("No populator for plant type '{}'", query.plant_type);
                Ok(None)
            }
        }
    }

    pub fn is_foliage_shown(&self) -> bool {
        self.state.borrow().foliage_shown
    }

    pub fn is_initialized(&self) -> bool {
        self.state.borrow().initialized
    }

    pub fn populator_count(&self) -> usize {
        self.state.borrow().vegetation.len()
    }

    pub fn has_populator(&self, plant_type: &str) -> bool {
        self.state.borrow().vegetation.get_populator(plant_type).is_some()
    }

    /// Run a console command by name. Returns false for unknown commands.
    pub fn run_command(&mut self, command: &str, _args: &str) -> bool {
        match command.parse::<TerrainCommand>() {
            Ok(TerrainCommand::UpdateShadows) => {
                self.handler.update_shadows();
                true
            }
            Err(_) => false,
        }
    }

    pub fn on_shader_level_changed(&mut self) {
        self.handler.update_all_pages();
    }

    /// Apply configuration changes received since the last call
    pub fn apply_pending_config(&mut self) {
        loop {
            let next = self.config_changes.borrow_mut().pop_front();
            let Some(change) = next else { break };
            self.apply_config(&change);
        }
    }

    fn apply_config(&mut self, change: &ConfigChanged) {
        match (change.section.as_str(), change.key.as_str()) {
            ("graphics", "foliage") => self.config_foliage(&change.value),
            ("terrain", "preferredtechnique") => self.config_technique(&change.value),
            ("terrain", "pagesize") => self.config_page_size(&change.value),
            ("terrain", "loadradius") => self.config_load_radius(&change.value),
            _ => {}
        }
    }

    fn config_foliage(&mut self, value: &ConfigValue) {
        let Some(enabled) = value.as_bool() else {
            warn!("Ignoring non-boolean graphics.foliage value {}", value);
            return;
        };
        let mut state = self.state.borrow_mut();
        state.foliage_shown = enabled && state.adapter.supports_foliage();
        debug!("Foliage shown: {}", state.foliage_shown);
    }

    fn config_technique(&mut self, value: &ConfigValue) {
        let technique = value.as_str().and_then(|s| s.parse::<TerrainTechnique>().ok());
        let Some(technique) = technique else {
            warn!("Ignoring terrain.preferredtechnique value {}", value);
            return;
        };
        self.handler.set_technique(technique);
        self.handler.update_all_pages();
    }

    fn config_page_size(&mut self, value: &ConfigValue) {
        let size = value
            .as_int()
            .filter(|size| *size >= 1)
            .and_then(|size| u32::try_from(size).ok())
            .and_then(|size| size.checked_add(1));
        let Some(size) = size else {
            warn!("Ignoring terrain.pagesize value {}", value);
            return;
        };
        self.state.borrow_mut().adapter.set_page_size(size);
        self.handler.set_page_size(size);
        self.handler.update_all_pages();
    }

    fn config_load_radius(&mut self, value: &ConfigValue) {
        let Some(radius) = value.as_int().filter(|radius| *radius >= 0) else {
            warn!("Ignoring terrain.loadradius value {}", value);
            return;
        };
        let mut state = self.state.borrow_mut();
        state.load_radius = radius as f32;
        state.adapter.set_load_radius(radius as f32);
    }

    /// Apply config, page around the camera and pump the handler once
    pub fn update(&mut self) -> TickReport {
        self.apply_pending_config();
        let paging = {
            let state = self.state.borrow();
            state.camera.map(|camera| (camera.ground_position(), state.load_radius))
        };
        if let Some((center, radius)) = paging {
            self.handler.update_paging(center, radius);
        }
        self.handler.tick()
    }
}

fn on_terrain_event(state: &RefCell<ManagerState>, events: &EventBus<TerrainManagerEvent>, event: &TerrainEvent) {
    match event {
        TerrainEvent::AfterTerrainUpdate { pages, .. } => {
            {
                let mut state = state.borrow_mut();
                for page in pages {
                    trace!("Updating terrain page {}", page);
                    state.adapter.reload_page(*page);
                }
            }
            for page in pages {
                events.emit(&TerrainManagerEvent::PageGeometryUpdated { page: *page });
            }
        }
        TerrainEvent::ShaderCreated { shader_index, layer } => {
            let mut state = state.borrow_mut();
            for foliage in &layer.foliages {
                state.vegetation.create_populator(foliage, *shader_index);
            }
        }
        TerrainEvent::WorldSizeChanged { .. } => {
            let mut state = state.borrow_mut();
            if !state.initialized {
                state.initialized = true;
                state.adapter.load_scene();
            }
        }
        TerrainEvent::MaterialRecompiled { page } => {
            state.borrow_mut().adapter.reload_page_material(*page);
        }
    }
}

impl FrameListener for TerrainManager {
    fn frame_started(&mut self, _event: &FrameEvent) {
        let report = self.update();
        if report != TickReport::default() {
            trace!("Terrain tick: {:?}", report);
        }
    }
}

impl Drop for TerrainManager {
    fn drop(&mut self) {
        if let Some(config) = self.config.upgrade() {
            config.unsubscribe(self.config_subscription);
        }
        self.handler.events().unsubscribe(self.handler_subscription);

        // Background work must be gone before the adapter is reset
        self.handler.shutdown();
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.adapter.reset();
        }
        info!("Terrain manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::terrain::adapter::HeadlessTerrainAdapter;
    use crate::world::terrain::shader::TerrainLayerDefinition;

    fn manager(config: &Rc<ConfigService>) -> TerrainManager {
        TerrainManager::new(
            Box::new(HeadlessTerrainAdapter::new(65)),
            config,
            &ThreadPoolConfig::with_workers(1),
        )
        .unwrap()
    }

    #[test]
    fn test_config_applied_on_next_update() {
        let config = Rc::new(ConfigService::new());
        let mut manager = manager(&config);
        assert_eq!(manager.handler().page_size(), 65);

        config.set("terrain", "pagesize", 32i64);
        assert_eq!(manager.handler().page_size(), 65);

        manager.update();
        assert_eq!(manager.handler().page_size(), 33);
    }

    #[test]
    fn test_populators_created_for_layer_foliage() {
        let config = Rc::new(ConfigService::new());
        let mut manager = manager(&config);
        manager.handler_mut().register_shader(
            TerrainLayerDefinition::new(1, "meadow", "meadow.png")
                .with_foliage("grass", 2.0)
                .with_foliage("flowers", 0.5),
        );
        assert_eq!(manager.populator_count(), 2);
        assert!(manager.has_populator("flowers"));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let config = Rc::new(ConfigService::new());
        let mut manager = manager(&config);
        assert!(manager.run_command("update_shadows", ""));
        assert_eq!(manager.handler().shadow_revision(), 1);
        assert!(!manager.run_command("reload_everything", ""));
    }
}
