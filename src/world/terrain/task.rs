//! Two-phase terrain modification tasks
//!
//! The background phase recomputes height tiles from a private snapshot; the
//! main-thread phase commits them together with the mod-level change, so the
//! authoritative terrain only ever moves from one complete state to the next.

use super::foliage::{PlantAreaQuery, PlantInstance, PlantPopulator, PlantQueryCallback};
use super::heightfield::{Heightfield, HeightfieldSnapshot, TileUpdate};
use super::modifier::TerrainMod;
use super::types::{EntityId, ModHandle};
use crate::utils::math::{union_all, AxisBox};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

pub type BasePointsCallback = Box<dyn FnOnce(&BTreeMap<(i32, i32), f32>)>;

/// Work queued on the execution context. Callbacks stay on the main thread.
pub enum TerrainTask {
    Mod(TerrainModTask),
    PlantQuery {
        populator: PlantPopulator,
        query: PlantAreaQuery,
        callback: PlantQueryCallback,
    },
    BasePoints {
        callback: BasePointsCallback,
    },
}

impl TerrainTask {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mod(task) => task.kind(),
            Self::PlantQuery { .. } => "plant query",
            Self::BasePoints { .. } => "base points",
        }
    }

    pub fn as_mod(&self) -> Option<&TerrainModTask> {
        match self {
            Self::Mod(task) => Some(task),
            _ => None,
        }
    }

    /// Area read or written by the task
    pub fn area(&self) -> Option<AxisBox> {
        match self {
            Self::Mod(task) => task.affected_area(),
            Self::PlantQuery { query, .. } => Some(query.area),
            Self::BasePoints { .. } => None,
        }
    }
}

impl fmt::Debug for TerrainTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mod(task) => f.debug_tuple("Mod").field(task).finish(),
            Self::PlantQuery { query, .. } => f.debug_struct("PlantQuery").field("query", query).finish(),
            Self::BasePoints { .. } => f.write_str("BasePoints"),
        }
    }
}

/// Owned input of a background phase, built on the main thread at dispatch
#[derive(Debug)]
pub(crate) enum BackgroundJob {
    Mod {
        remove: Option<ModHandle>,
        insert: Option<(ModHandle, TerrainMod)>,
        snapshot: HeightfieldSnapshot,
    },
    Plants {
        populator: PlantPopulator,
        area: AxisBox,
        snapshot: HeightfieldSnapshot,
    },
    BasePoints {
        points: BTreeMap<(i32, i32), f32>,
    },
}

#[derive(Debug)]
pub(crate) enum BackgroundResult {
    Mod(ModDelta),
    Plants(Vec<PlantInstance>),
    BasePoints(BTreeMap<(i32, i32), f32>),
}

impl BackgroundJob {
    pub(crate) fn run(self) -> BackgroundResult {
        match self {
            Self::Mod {
                remove,
                insert,
                snapshot,
            } => BackgroundResult::Mod(TerrainModTask::execute_in_background_thread(remove, insert, snapshot)),
            Self::Plants {
                populator,
                area,
                snapshot,
            } => BackgroundResult::Plants(populator.populate(&area, |p| snapshot.get_height(p))),
            Self::BasePoints { points } => BackgroundResult::BasePoints(points),
        }
    }
}

/// A mod as it was inserted into the terrain
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMod {
    pub handle: ModHandle,
    pub modifier: TerrainMod,
}

/// Entity → currently applied mod. Mutated only by task finalization.
#[derive(Debug, Default)]
pub struct ModRegistry {
    applied: HashMap<EntityId, AppliedMod>,
    next_handle: u64,
}

impl ModRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: &EntityId) -> Option<&AppliedMod> {
        self.applied.get(entity)
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &AppliedMod)> {
        self.applied.iter()
    }

    pub(crate) fn allocate_handle(&mut self) -> ModHandle {
        self.next_handle += 1;
        ModHandle::new(self.next_handle)
    }

    pub(crate) fn clear(&mut self) {
        self.applied.clear();
    }

    fn insert(&mut self, entity: EntityId, applied: AppliedMod) {
        self.applied.insert(entity, applied);
    }

    fn remove(&mut self, entity: &EntityId) -> Option<AppliedMod> {
        self.applied.remove(entity)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerrainModTask {
    Add {
        entity: EntityId,
        applied: AppliedMod,
    },
    Change {
        entity: EntityId,
        applied: AppliedMod,
        /// What the entity's mod was when the change was submitted
        existing: AppliedMod,
    },
    Remove {
        entity: EntityId,
        existing: Option<AppliedMod>,
    },
}

/// Tiles computed by the background phase
#[derive(Debug, Clone, Default)]
pub struct ModDelta {
    pub tiles: Vec<TileUpdate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModOutcome {
    Applied { areas: Vec<AxisBox> },
    /// The recorded existing mod was stale; only the new mod was inserted
    Degraded { areas: Vec<AxisBox> },
    NoOp,
}

impl TerrainModTask {
    pub fn entity(&self) -> &EntityId {
        match self {
            Self::Add { entity, .. } | Self::Change { entity, .. } | Self::Remove { entity, .. } => entity,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Change { .. } => "change",
            Self::Remove { .. } => "remove",
        }
    }

    /// The mod the entity has once this task is finalized
    pub fn resulting_mod(&self) -> Option<&AppliedMod> {
        match self {
            Self::Add { applied, .. } | Self::Change { applied, .. } => Some(applied),
            Self::Remove { .. } => None,
        }
    }

    /// Areas whose heights this task may change
    pub fn affected_areas(&self) -> Vec<AxisBox> {
        match self {
            Self::Add { applied, .. } => vec![applied.modifier.bbox()],
            Self::Change { applied, existing, .. } => {
                vec![existing.modifier.bbox(), applied.modifier.bbox()]
            }
            Self::Remove { existing, .. } => existing.iter().map(|e| e.modifier.bbox()).collect(),
        }
    }

    pub fn affected_area(&self) -> Option<AxisBox> {
        union_all(self.affected_areas().iter())
    }

    /// The mod removed and the mod inserted when the task goes as planned
    pub(crate) fn planned_change(&self) -> (Option<ModHandle>, Option<(ModHandle, TerrainMod)>) {
        match self {
            Self::Add { applied, .. } => (None, Some((applied.handle, applied.modifier.clone()))),
            Self::Change { applied, existing, .. } => (
                Some(existing.handle),
                Some((applied.handle, applied.modifier.clone())),
            ),
            Self::Remove { existing, .. } => (existing.as_ref().map(|e| e.handle), None),
        }
    }

    /// Background phase: both halves of a change are applied to the snapshot
    /// before any tile is computed.
    pub fn execute_in_background_thread(
        remove: Option<ModHandle>,
        insert: Option<(ModHandle, TerrainMod)>,
        mut snapshot: HeightfieldSnapshot,
    ) -> ModDelta {
        if remove.is_none() && insert.is_none() {
            return ModDelta::default();
        }
        snapshot.apply_change(remove, insert);
        ModDelta {
            tiles: snapshot.recompute(),
        }
    }

    /// Main-thread phase: commit the delta into the authoritative terrain
    pub fn execute_in_main_thread(
        self,
        delta: ModDelta,
        heightfield: &mut Heightfield,
        registry: &mut ModRegistry,
    ) -> ModOutcome {
        let planned_areas = self.affected_areas();
        match self {
            Self::Add { entity, applied } => {
                let (areas, exact) = insert_superseding(entity, applied, planned_areas, heightfield, registry);
                commit_tiles(heightfield, delta.tiles, &areas, exact);
                ModOutcome::Applied { areas }
            }
            Self::Change {
                entity,
                applied,
                existing,
            } => {
                let current = registry.get(&entity).map(|a| a.handle);
                if current == Some(existing.handle) {
                    heightfield.remove_mod(existing.handle);
                    let (areas, exact) =
                        insert_superseding(entity, applied, planned_areas, heightfield, registry);
                    commit_tiles(heightfield, delta.tiles, &areas, exact);
                    ModOutcome::Applied { areas }
                } else {
                    warn!(
                        "Terrain mod change for entity {} refers to {} which is no longer applied; adding the new mod only",
                        entity, existing.handle
                    );
                    let (areas, _) = insert_superseding(entity, applied, planned_areas, heightfield, registry);
                    commit_tiles(heightfield, delta.tiles, &areas, false);
                    ModOutcome::Degraded { areas }
                }
            }
            Self::Remove { entity, existing } => {
                let Some(existing) = existing else {
                    debug!("Entity {} has no terrain mod to remove", entity);
                    return ModOutcome::NoOp;
                };
                if registry.get(&entity).map(|a| a.handle) != Some(existing.handle) {
                    warn!(
                        "Terrain mod removal for entity {} refers to {} which is no longer applied; ignoring",
                        entity, existing.handle
                    );
                    return ModOutcome::NoOp;
                }
                registry.remove(&entity);
                heightfield.remove_mod(existing.handle);
                commit_tiles(heightfield, delta.tiles, &planned_areas, true);
                ModOutcome::Applied { areas: planned_areas }
            }
        }
    }
}

/// Insert `applied` for `entity`, removing any other applied copy first.
///
/// Returns the areas touched and whether they match what the background
/// phase planned for.
fn insert_superseding(
    entity: EntityId,
    applied: AppliedMod,
    mut areas: Vec<AxisBox>,
    heightfield: &mut Heightfield,
    registry: &mut ModRegistry,
) -> (Vec<AxisBox>, bool) {
    let mut exact = true;
    if let Some(prior) = registry.remove(&entity) {
        if heightfield.remove_mod(prior.handle).is_some() {
            warn!(
                "Entity {} still had {} applied; superseding it with {}",
                entity, prior.handle, applied.handle
            );
            areas.push(prior.modifier.bbox());
            exact = false;
        }
    }
    heightfield.insert_mod(applied.handle, applied.modifier.clone());
    registry.insert(entity, applied);
    (areas, exact)
}

fn commit_tiles(heightfield: &mut Heightfield, tiles: Vec<TileUpdate>, areas: &[AxisBox], exact: bool) {
    if !exact {
        for area in areas {
            heightfield.regenerate(area);
        }
        return;
    }

    let mut covered = HashSet::new();
    for update in tiles {
        let index = update.index;
        if !heightfield.commit_tile(update) {
            debug!("Segment ({}, {}) changed since its snapshot", index.x, index.y);
            heightfield.regenerate_segment(index);
        }
        covered.insert(index);
    }
    // Segments that appeared after the snapshot was taken
    for area in areas {
        for index in heightfield.segments_intersecting(area) {
            if covered.insert(index) {
                heightfield.regenerate_segment(index);
            }
        }
    }
}
