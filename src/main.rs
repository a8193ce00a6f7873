use glam::{Vec2, Vec3};
use slv_terrain::config::{default_settings_path, load_terrain_settings};
use slv_terrain::utils::logging::{init_logging, log_system_info};
use slv_terrain::world::terrain::{
    Camera, HeadlessTerrainAdapter, ModShape, PlantAreaQuery, TerrainLayerDefinition, TerrainMod,
};
use slv_terrain::world::TerrainManagerEvent;
use slv_terrain::{AxisBox, ConfigService, FrameLoop, TerrainManager, APP_NAME, VERSION};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::info;

const FRAME_TIME: f32 = 1.0 / 60.0;

fn main() -> anyhow::Result<()> {
    let log_file = std::env::args().nth(1).map(PathBuf::from);
    init_logging(log_file.as_deref())?;
    log_system_info();
    info!("Starting {} {}", APP_NAME, VERSION);

    let settings_path = default_settings_path();
    let settings = load_terrain_settings(settings_path.as_deref())?;
    let config = Rc::new(ConfigService::new());
    settings.apply_to(&config);

    let adapter = HeadlessTerrainAdapter::new(settings.terrain.page_size as u32 + 1);
    let manager = Rc::new(RefCell::new(TerrainManager::new(
        Box::new(adapter),
        &config,
        &settings.workers,
    )?));
    let mut frames = FrameLoop::new();
    frames.add_listener(&manager);

    manager.borrow().events().subscribe(|event| match event {
        TerrainManagerEvent::PageGeometryUpdated { page } => info!("Page {} geometry updated", page),
        TerrainManagerEvent::TerrainShown { areas } => info!("Terrain shown: {:?}", areas),
    });

    {
        let mut manager = manager.borrow_mut();
        let handler = manager.handler_mut();
        handler.register_shader(TerrainLayerDefinition::new(1, "sand", "sand.png").with_height_range(-10.0, 2.0));
        handler.register_shader(
            TerrainLayerDefinition::new(2, "grass", "grass.png")
                .with_height_range(2.0, 40.0)
                .with_foliage("grass", 4.0),
        );
        for y in 0..=4 {
            for x in 0..=4 {
                handler.set_base_point(x, y, 5.0 + (x + y) as f32);
            }
        }
        manager.start_paging(Camera::new(Vec3::new(128.0, 128.0, 50.0)));
    }
    frames.run_frame(FRAME_TIME);

    {
        let mut manager = manager.borrow_mut();
        let handler = manager.handler_mut();
        handler.add_mod("rock1", TerrainMod::crater(Vec2::new(100.0, 100.0), 12.0, 6.0))?;
        handler.change_mod(
            "rock1",
            TerrainMod::level(
                ModShape::Rect {
                    area: AxisBox::new(Vec2::new(90.0, 90.0), Vec2::new(110.0, 110.0)),
                },
                3.0,
            ),
        )?;
        manager.get_plants_for_area(
            PlantAreaQuery::new("grass", AxisBox::new(Vec2::new(0.0, 0.0), Vec2::new(40.0, 40.0))),
            |result| info!("{} grass plants in {}", result.plants.len(), result.query.area),
        )?;
    }

    while !manager.borrow().handler().is_idle() {
        manager.borrow_mut().handler_mut().wait_for_background();
        frames.run_frame(FRAME_TIME);
    }

    let manager = manager.borrow();
    for position in [Vec2::new(100.0, 100.0), Vec2::new(115.0, 100.0), Vec2::new(200.0, 200.0)] {
        match manager.get_height(position) {
            Some(height) => info!("Height at {}: {:.2}", position, height),
            None => info!("No terrain at {}", position),
        }
    }
    info!("Terrain demo finished");
    Ok(())
}
