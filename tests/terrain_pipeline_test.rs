use glam::Vec2;
use slv_terrain::world::terrain::{
    EntityId, ModShape, TerrainHandler, TerrainIndex, TerrainLayerDefinition, TerrainMod,
};
use slv_terrain::world::TerrainEvent;
use slv_terrain::{AxisBox, ThreadPoolConfig};
use std::cell::RefCell;
use std::rc::Rc;

const PAGE_SIZE: u32 = 17;
const SEGMENT_RESOLUTION: u32 = 16;
const BASE_HEIGHT: f32 = 5.0;

/// 4x4 segments of flat terrain covering (0,0)..(64,64)
fn flat_handler() -> TerrainHandler {
    let mut handler =
        TerrainHandler::with_segment_resolution(PAGE_SIZE, SEGMENT_RESOLUTION, &ThreadPoolConfig::with_workers(2))
            .unwrap();
    let points = (0..=4).flat_map(|y| (0..=4).map(move |x| ((x, y), BASE_HEIGHT)));
    handler.set_base_points(points);
    handler
}

fn paged_handler() -> TerrainHandler {
    let mut handler = flat_handler();
    handler.register_shader(TerrainLayerDefinition::new(1, "dirt", "dirt.png"));
    handler.register_shader(TerrainLayerDefinition::new(2, "rock", "rock.png").with_height_range(0.0, 4.0));
    handler.update_paging(Vec2::new(32.0, 32.0), 100.0);
    handler.drain();
    handler
}

fn record_events(handler: &TerrainHandler) -> Rc<RefCell<Vec<TerrainEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    handler.events().subscribe(move |event| sink.borrow_mut().push(event.clone()));
    events
}

fn terrain_updates(events: &RefCell<Vec<TerrainEvent>>) -> usize {
    events
        .borrow()
        .iter()
        .filter(|e| matches!(e, TerrainEvent::AfterTerrainUpdate { .. }))
        .count()
}

#[test]
fn test_add_then_change_keeps_only_latest_mod() {
    let mut handler = flat_handler();
    let events = record_events(&handler);
    let rock = EntityId::from("rock1");
    let crater = TerrainMod::crater(Vec2::new(24.0, 24.0), 4.0, 2.0);
    let ramp = TerrainMod::ramp(
        AxisBox::new(Vec2::new(36.0, 36.0), Vec2::new(44.0, 44.0)),
        BASE_HEIGHT,
        BASE_HEIGHT + 4.0,
    );

    handler.add_mod(rock.clone(), crater.clone()).unwrap();
    handler.change_mod(rock.clone(), ramp.clone()).unwrap();
    let report = handler.drain();

    assert_eq!(report.applied, 2);
    assert_eq!(report.degraded, 0);
    assert_eq!(handler.registry().len(), 1);
    assert_eq!(handler.applied_mod(&rock).unwrap().modifier, ramp);
    assert_eq!(handler.heightfield().mod_count(), 1);
    assert_eq!(handler.get_height(Vec2::new(24.0, 24.0)), Some(BASE_HEIGHT));
    assert_eq!(handler.get_height(Vec2::new(44.0, 40.0)), Some(BASE_HEIGHT + 4.0));

    let updated: Vec<AxisBox> = events
        .borrow()
        .iter()
        .filter_map(|e| match e {
            TerrainEvent::AfterTerrainUpdate { areas, .. } => Some(areas.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    assert!(!updated.is_empty());
    for shape in [crater.bbox(), ramp.bbox()] {
        assert!(
            updated.iter().any(|area| area.contains_box(&shape)),
            "no terrain update covered {}",
            shape
        );
    }
}

#[test]
fn test_remove_unknown_entity_is_silent_noop() {
    let mut handler = paged_handler();
    let events = record_events(&handler);

    handler.remove_mod("ghost").unwrap();
    let report = handler.drain();

    assert_eq!(report.no_ops, 1);
    assert_eq!(report.applied, 0);
    assert_eq!(terrain_updates(&events), 0);
    assert!(handler.registry().is_empty());
}

#[test]
fn test_registry_follows_submission_sequence() {
    let mut handler = flat_handler();
    let crater = |x: f32, depth: f32| TerrainMod::crater(Vec2::new(x, 20.0), 3.0, depth);

    handler.add_mod("a", crater(8.0, 1.0)).unwrap();
    handler.add_mod("b", crater(20.0, 1.0)).unwrap();
    handler.change_mod("a", crater(32.0, 2.0)).unwrap();
    handler.remove_mod("b").unwrap();
    handler.add_mod("c", crater(44.0, 1.0)).unwrap();
    handler.remove_mod("a").unwrap();
    handler.add_mod("a", crater(56.0, 3.0)).unwrap();
    handler.change_mod("c", crater(8.0, 4.0)).unwrap();

    let report = handler.drain();
    assert_eq!(report.finalized(), 8);
    assert_eq!(report.degraded, 0);

    let registry = handler.registry();
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.get(&EntityId::from("a")).unwrap().modifier, crater(56.0, 3.0));
    assert_eq!(registry.get(&EntityId::from("c")).unwrap().modifier, crater(8.0, 4.0));
    assert!(registry.get(&EntityId::from("b")).is_none());
    assert_eq!(handler.heightfield().mod_count(), 2);
    assert_eq!(handler.get_height(Vec2::new(20.0, 20.0)), Some(BASE_HEIGHT));
    assert_eq!(handler.get_height(Vec2::new(32.0, 20.0)), Some(BASE_HEIGHT));
}

#[test]
fn test_change_never_exposes_removed_state() {
    let mut handler = flat_handler();
    let rock = EntityId::from("rock1");
    let center = Vec2::new(24.0, 24.0);
    handler
        .add_mod(rock.clone(), TerrainMod::crater(center, 6.0, 2.0))
        .unwrap();
    handler.drain();

    let level = TerrainMod::level(
        ModShape::Rect {
            area: AxisBox::new(Vec2::new(20.0, 20.0), Vec2::new(28.0, 28.0)),
        },
        1.0,
    );
    handler.change_mod(rock.clone(), level).unwrap();

    while !handler.is_idle() {
        handler.wait_for_background();
        handler.tick();
        assert!(handler.applied_mod(&rock).is_some());
        assert_eq!(handler.heightfield().mod_count(), 1);
        let height = handler.get_height(center).unwrap();
        assert!(height == BASE_HEIGHT - 2.0 || height == 1.0, "unexpected height {}", height);
    }
    assert_eq!(handler.get_height(center), Some(1.0));
}

#[test]
fn test_change_of_aborted_add_degrades_to_add() {
    let mut handler = flat_handler();
    let rock = EntityId::from("rock1");
    let replacement = TerrainMod::crater(Vec2::new(40.0, 24.0), 4.0, 2.0);

    let add = handler
        .add_mod(rock.clone(), TerrainMod::crater(Vec2::new(24.0, 24.0), 4.0, 2.0))
        .unwrap();
    handler.change_mod(rock.clone(), replacement.clone()).unwrap();
    assert!(handler.abort(add));

    let report = handler.drain();
    assert_eq!(report.degraded, 1);
    assert_eq!(report.applied, 0);
    assert_eq!(handler.applied_mod(&rock).unwrap().modifier, replacement);
    assert_eq!(handler.get_height(Vec2::new(24.0, 24.0)), Some(BASE_HEIGHT));
    assert_eq!(handler.get_height(Vec2::new(40.0, 24.0)), Some(BASE_HEIGHT - 2.0));
}

#[test]
fn test_abort_tasks_for_entity_leaves_others() {
    let mut handler = flat_handler();
    handler
        .add_mod("rock1", TerrainMod::crater(Vec2::new(10.0, 10.0), 2.0, 1.0))
        .unwrap();
    handler
        .add_mod("rock2", TerrainMod::crater(Vec2::new(50.0, 50.0), 2.0, 1.0))
        .unwrap();

    let aborted = handler.abort_tasks_for(&EntityId::from("rock1"));
    assert_eq!(aborted.len(), 1);

    let report = handler.drain();
    assert_eq!(report.applied, 1);
    assert!(handler.applied_mod(&EntityId::from("rock1")).is_none());
    assert!(handler.applied_mod(&EntityId::from("rock2")).is_some());
}

#[test]
fn test_reset_terrain_drops_in_flight_tasks() {
    let mut handler = flat_handler();
    handler
        .add_mod("rock1", TerrainMod::crater(Vec2::new(24.0, 24.0), 4.0, 2.0))
        .unwrap();
    let report = handler.tick();
    assert_eq!(report.dispatched, 1);

    handler.reset_terrain();
    let report = handler.drain();

    assert_eq!(report.dropped, 1);
    assert_eq!(report.applied, 0);
    assert!(handler.registry().is_empty());
    assert_eq!(handler.heightfield().segment_count(), 0);
    assert_eq!(handler.get_height(Vec2::new(24.0, 24.0)), None);
}

#[test]
fn test_mods_from_torn_down_terrain_do_not_leak_into_new_submissions() {
    let mut handler = flat_handler();
    let events = record_events(&handler);
    handler
        .add_mod("rock1", TerrainMod::crater(Vec2::new(24.0, 24.0), 4.0, 2.0))
        .unwrap();
    assert_eq!(handler.tick().dispatched, 1);

    handler.reset_terrain();
    let points = (0..=4).flat_map(|y| (0..=4).map(move |x| ((x, y), BASE_HEIGHT)));
    handler.set_base_points(points);

    let rock2 = handler
        .add_mod("rock2", TerrainMod::crater(Vec2::new(50.0, 50.0), 2.0, 1.0))
        .unwrap();
    assert!(handler.abort(rock2));
    let replacement = TerrainMod::crater(Vec2::new(40.0, 40.0), 4.0, 3.0);
    handler.add_mod("rock1", replacement.clone()).unwrap();

    let report = handler.drain();
    assert_eq!(report.dropped, 1);
    assert_eq!(report.degraded, 0);
    assert_eq!(report.applied, 1);
    assert_eq!(handler.applied_mod(&EntityId::from("rock1")).unwrap().modifier, replacement);
    assert!(handler.applied_mod(&EntityId::from("rock2")).is_none());
    assert_eq!(handler.get_height(Vec2::new(24.0, 24.0)), Some(BASE_HEIGHT));
    assert!(events
        .borrow()
        .iter()
        .any(|e| matches!(e, TerrainEvent::AfterTerrainUpdate { areas, .. } if areas.contains(&replacement.bbox()))));
}

#[test]
fn test_world_size_announced_again_after_reset() {
    let mut handler = flat_handler();
    let events = record_events(&handler);
    handler.reset_terrain();
    handler.set_base_points([((0, 0), 1.0), ((1, 0), 1.0), ((0, 1), 1.0), ((1, 1), 1.0)]);

    let announced = events
        .borrow()
        .iter()
        .filter(|e| matches!(e, TerrainEvent::WorldSizeChanged { .. }))
        .count();
    assert_eq!(announced, 1);
}

#[test]
fn test_one_terrain_update_per_tick_with_exact_areas() {
    let mut handler = paged_handler();
    let events = record_events(&handler);
    let west = TerrainMod::crater(Vec2::new(8.0, 8.0), 2.0, 1.0);
    let east = TerrainMod::crater(Vec2::new(56.0, 56.0), 2.0, 1.0);

    handler.add_mod("west", west.clone()).unwrap();
    handler.add_mod("east", east.clone()).unwrap();
    handler.tick();
    handler.wait_for_background();
    handler.tick();

    let events = events.borrow();
    let updates: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TerrainEvent::AfterTerrainUpdate { areas, pages } => Some((areas, pages)),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 1);
    let (areas, pages) = updates[0];
    assert_eq!(*areas, vec![west.bbox(), east.bbox()]);
    assert_eq!(
        pages.iter().copied().collect::<Vec<_>>(),
        vec![TerrainIndex::new(0, 0), TerrainIndex::new(3, 3)]
    );
}

#[test]
fn test_update_all_pages_matches_fresh_handler() {
    let crater = TerrainMod::crater(Vec2::new(30.0, 30.0), 10.0, 3.0);

    let mut edited = paged_handler();
    edited.add_mod("rock1", crater.clone()).unwrap();
    edited.drain();
    edited.update_all_pages();
    let report = edited.tick();
    assert_eq!(report.pages_regenerated, edited.page_count());
    assert_eq!(report.materials_recompiled, edited.page_count());

    let mut fresh = flat_handler();
    fresh.add_mod("rock1", crater).unwrap();
    fresh.drain();
    fresh.register_shader(TerrainLayerDefinition::new(1, "dirt", "dirt.png"));
    fresh.register_shader(TerrainLayerDefinition::new(2, "rock", "rock.png").with_height_range(0.0, 4.0));
    fresh.update_paging(Vec2::new(32.0, 32.0), 100.0);
    fresh.drain();

    assert_eq!(edited.page_count(), fresh.page_count());
    for page in fresh.pages() {
        let other = edited.page(page.index()).unwrap();
        assert_eq!(other.heights(), page.heights(), "heights of page {}", page.index());
        assert_eq!(other.blend_map(), page.blend_map(), "blend map of page {}", page.index());
        assert_eq!(other.material(), page.material());
    }
}

#[test]
fn test_blit_heights_reflects_finalized_mods() {
    let mut handler = flat_handler();
    handler
        .add_mod(
            "pad",
            TerrainMod::level(
                ModShape::Rect {
                    area: AxisBox::new(Vec2::new(10.0, 10.0), Vec2::new(12.0, 12.0)),
                },
                9.0,
            ),
        )
        .unwrap();
    assert_eq!(handler.blit_heights(10, 12, 10, 10), vec![BASE_HEIGHT; 3]);

    handler.drain();
    assert_eq!(handler.blit_heights(9, 13, 11, 11), vec![BASE_HEIGHT, 9.0, 9.0, 9.0, BASE_HEIGHT]);
}
