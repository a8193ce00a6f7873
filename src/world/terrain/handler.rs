use super::executor::{ExecutorStats, FinalizableTask, TaskExecutionContext, TaskId, TaskRegion, TaskState};
use super::foliage::{PlantAreaQuery, PlantAreaQueryResult, PlantPopulator};
use super::heightfield::{Heightfield, DEFAULT_SEGMENT_RESOLUTION};
use super::page::{page_extent, pages_covering, PageDirty, TerrainPage};
use super::shader::{TerrainLayerDefinition, TerrainShader, TerrainTechnique};
use super::task::{AppliedMod, BackgroundJob, BackgroundResult, ModOutcome, ModRegistry, TerrainModTask, TerrainTask};
use super::types::{EntityId, TerrainIndex};
use super::{TerrainError, TerrainResult};
use super::modifier::TerrainMod;
use crate::config::concurrency::ThreadPoolConfig;
use crate::utils::math::AxisBox;
use crate::world::events::{EventBus, TerrainEvent};
use glam::Vec2;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::AddAssign;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// What one [`TerrainHandler::tick`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub applied: usize,
    pub degraded: usize,
    pub no_ops: usize,
    /// Tasks that finished after their terrain was torn down
    pub dropped: usize,
    pub queries: usize,
    pub pages_regenerated: usize,
    pub materials_recompiled: usize,
    pub dispatched: usize,
}

impl TickReport {
    /// Modification tasks whose main-thread phase ran
    pub fn finalized(&self) -> usize {
        self.applied + self.degraded + self.no_ops
    }
}

impl AddAssign for TickReport {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.degraded += other.degraded;
        self.no_ops += other.no_ops;
        self.dropped += other.dropped;
        self.queries += other.queries;
        self.pages_regenerated += other.pages_regenerated;
        self.materials_recompiled += other.materials_recompiled;
        self.dispatched += other.dispatched;
    }
}

/// Owns the authoritative terrain and everything derived from it.
///
/// All mutation happens through `&mut self` on the thread that owns the
/// handler; worker threads only ever see snapshots.
pub struct TerrainHandler {
    heightfield: Heightfield,
    registry: ModRegistry,
    /// Latest submitted mod per entity, ahead of the registry while tasks are queued
    submitted: HashMap<EntityId, AppliedMod>,
    pages: BTreeMap<TerrainIndex, TerrainPage>,
    shaders: Vec<TerrainShader>,
    executor: TaskExecutionContext,
    events: Rc<EventBus<TerrainEvent>>,
    page_size: u32,
    technique: TerrainTechnique,
    shadow_revision: u64,
    epoch: u64,
    world_size_known: bool,
    paging: Option<(Vec2, f32)>,
    pending_areas: Vec<AxisBox>,
}

impl TerrainHandler {
    pub fn new(page_size: u32, workers: &ThreadPoolConfig) -> TerrainResult<Self> {
        Self::with_segment_resolution(page_size, DEFAULT_SEGMENT_RESOLUTION, workers)
    }

    pub fn with_segment_resolution(
        page_size: u32,
        segment_resolution: u32,
        workers: &ThreadPoolConfig,
    ) -> TerrainResult<Self> {
        let executor = TaskExecutionContext::new(workers)?;
        info!(
            "Terrain handler created (page size {}, segment resolution {})",
            page_size, segment_resolution
        );
        Ok(Self {
            heightfield: Heightfield::new(segment_resolution),
            registry: ModRegistry::new(),
            submitted: HashMap::new(),
            pages: BTreeMap::new(),
            shaders: Vec::new(),
            executor,
            events: Rc::new(EventBus::new()),
            page_size: page_size.max(2),
            technique: TerrainTechnique::default(),
            shadow_revision: 0,
            epoch: 0,
            world_size_known: false,
            paging: None,
            pending_areas: Vec::new(),
        })
    }

    pub fn events(&self) -> &Rc<EventBus<TerrainEvent>> {
        &self.events
    }

    // --- Modifications ---

    /// Apply `modifier` for `entity`, replacing whatever the entity had
    pub fn add_mod(&mut self, entity: impl Into<EntityId>, modifier: TerrainMod) -> TerrainResult<TaskId> {
        self.submit_mod(entity.into(), modifier)
    }

    pub fn change_mod(&mut self, entity: impl Into<EntityId>, modifier: TerrainMod) -> TerrainResult<TaskId> {
        self.submit_mod(entity.into(), modifier)
    }

    pub fn remove_mod(&mut self, entity: impl Into<EntityId>) -> TerrainResult<TaskId> {
        self.ensure_running()?;
        let entity = entity.into();
        let existing = self.submitted.get(&entity).cloned();
        let id = self.enqueue(TerrainTask::Mod(TerrainModTask::Remove {
            entity: entity.clone(),
            existing,
        }))?;
        self.submitted.remove(&entity);
        Ok(id)
    }

    fn submit_mod(&mut self, entity: EntityId, modifier: TerrainMod) -> TerrainResult<TaskId> {
        self.ensure_running()?;
        let applied = AppliedMod {
            handle: self.registry.allocate_handle(),
            modifier,
        };
        let task = match self.submitted.get(&entity) {
            Some(existing) => TerrainModTask::Change {
                entity: entity.clone(),
                applied: applied.clone(),
                existing: existing.clone(),
            },
            None => TerrainModTask::Add {
                entity: entity.clone(),
                applied: applied.clone(),
            },
        };
        let id = self.enqueue(TerrainTask::Mod(task))?;
        self.submitted.insert(entity, applied);
        Ok(id)
    }

    /// Abort a queued task; one already computing finishes and is discarded
    pub fn abort(&mut self, id: TaskId) -> bool {
        let aborted = self.executor.abort(id);
        if aborted {
            self.rebuild_submitted();
        }
        aborted
    }

    /// Abort every unfinished modification task of `entity`
    pub fn abort_tasks_for(&mut self, entity: &EntityId) -> Vec<TaskId> {
        let aborted = self
            .executor
            .abort_where(|_, task| task.as_mod().is_some_and(|m| m.entity() == entity));
        if !aborted.is_empty() {
            debug!("Aborted {} tasks for entity {}", aborted.len(), entity);
            self.rebuild_submitted();
        }
        aborted
    }

    fn rebuild_submitted(&mut self) {
        let mut view: HashMap<EntityId, AppliedMod> = self
            .registry
            .iter()
            .map(|(entity, applied)| (entity.clone(), applied.clone()))
            .collect();
        // Tasks from a torn-down terrain finalize as dropped and change nothing
        let current = self.executor.tasks().filter(|(_, _, epoch, _)| *epoch == self.epoch);
        for (_, _, _, task) in current {
            let Some(task) = task.as_mod() else { continue };
            match task.resulting_mod() {
                Some(applied) => view.insert(task.entity().clone(), applied.clone()),
                None => view.remove(task.entity()),
            };
        }
        self.submitted = view;
    }

    pub fn applied_mod(&self, entity: &EntityId) -> Option<&AppliedMod> {
        self.registry.get(entity)
    }

    pub fn registry(&self) -> &ModRegistry {
        &self.registry
    }

    // --- Queries ---

    pub fn heightfield(&self) -> &Heightfield {
        &self.heightfield
    }

    pub fn get_height(&self, position: Vec2) -> Option<f32> {
        self.heightfield.get_height(position)
    }

    pub fn blit_heights(&self, x_min: i32, x_max: i32, y_min: i32, y_max: i32) -> Vec<f32> {
        self.heightfield.blit_heights(x_min, x_max, y_min, y_max)
    }

    /// Deliver the base-point grid to `callback` during a later tick
    pub fn get_base_points(
        &mut self,
        callback: impl FnOnce(&BTreeMap<(i32, i32), f32>) + 'static,
    ) -> TerrainResult<TaskId> {
        self.enqueue(TerrainTask::BasePoints {
            callback: Box::new(callback),
        })
    }

    /// Populate `query.area` with `populator` off-thread and hand the plants
    /// to `callback` during a later tick
    pub fn get_plants_for_area(
        &mut self,
        populator: &PlantPopulator,
        query: PlantAreaQuery,
        callback: impl FnOnce(PlantAreaQueryResult) + 'static,
    ) -> TerrainResult<TaskId> {
        self.enqueue(TerrainTask::PlantQuery {
            populator: populator.clone(),
            query,
            callback: Box::new(callback),
        })
    }

    // --- Base points ---

    pub fn set_base_point(&mut self, x: i32, y: i32, height: f32) {
        let areas = self.heightfield.set_base_point(x, y, height);
        self.pending_areas.extend(areas);
        self.announce_world_size();
    }

    pub fn set_base_points(&mut self, points: impl IntoIterator<Item = ((i32, i32), f32)>) {
        for ((x, y), height) in points {
            let areas = self.heightfield.set_base_point(x, y, height);
            self.pending_areas.extend(areas);
        }
        self.announce_world_size();
    }

    fn announce_world_size(&mut self) {
        if self.world_size_known {
            return;
        }
        if let Some(bounds) = self.heightfield.bounds() {
            self.world_size_known = true;
            info!("Terrain extent known: {}", bounds);
            self.events.emit(&TerrainEvent::WorldSizeChanged { bounds });
        }
    }

    // --- Pages ---

    /// Keep the pages within `radius` of `center` loaded
    pub fn update_paging(&mut self, center: Vec2, radius: f32) {
        self.paging = Some((center, radius.max(0.0)));
        self.refresh_pages();
    }

    fn refresh_pages(&mut self) {
        let Some((center, radius)) = self.paging else {
            return;
        };
        let Some(bounds) = self.heightfield.bounds() else {
            return;
        };

        let page_size = self.page_size;
        let Some(reach) = AxisBox::from_center(center, radius).intersection(&bounds) else {
            self.pages.clear();
            return;
        };
        let wanted: BTreeSet<TerrainIndex> = pages_covering(&reach, page_size)
            .filter(|index| {
                let extent = page_extent(*index, page_size);
                extent.distance_to(center) <= radius
                    && extent.min.x < bounds.max.x
                    && extent.max.x > bounds.min.x
                    && extent.min.y < bounds.max.y
                    && extent.max.y > bounds.min.y
            })
            .collect();

        self.pages.retain(|index, _| {
            let keep = wanted.contains(index);
            if !keep {
                debug!("Paged out {}", index);
            }
            keep
        });
        for index in wanted {
            self.pages.entry(index).or_insert_with(|| {
                debug!("Paged in {}", index);
                TerrainPage::new(index, page_size)
            });
        }
    }

    pub fn page(&self, index: TerrainIndex) -> Option<&TerrainPage> {
        self.pages.get(&index)
    }

    pub fn pages(&self) -> impl Iterator<Item = &TerrainPage> {
        self.pages.values()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Change the page size. Loaded pages are rebuilt on the new grid.
    pub fn set_page_size(&mut self, page_size: u32) {
        let page_size = page_size.max(2);
        if page_size == self.page_size {
            return;
        }
        info!("Terrain page size {} -> {}", self.page_size, page_size);
        self.page_size = page_size;
        self.pages.clear();
        self.refresh_pages();
    }

    /// Mark every loaded page for a full rebuild on the next tick
    pub fn update_all_pages(&mut self) {
        for page in self.pages.values_mut() {
            page.mark_dirty(PageDirty::all());
        }
        debug!("Marked {} pages for rebuild", self.pages.len());
    }

    // --- Materials ---

    /// Register a material layer, returning its shader index. Registering a
    /// layer id twice returns the existing index.
    pub fn register_shader(&mut self, layer: TerrainLayerDefinition) -> usize {
        if let Some(existing) = self.shaders.iter().find(|s| s.layer().id == layer.id) {
            return existing.index();
        }
        let index = self.shaders.len();
        self.shaders.push(TerrainShader::new(layer.clone(), index));
        self.mark_materials_dirty();
        debug!("Registered terrain shader {} ('{}')", index, layer.name);
        self.events.emit(&TerrainEvent::ShaderCreated {
            shader_index: index,
            layer,
        });
        index
    }

    pub fn shaders(&self) -> &[TerrainShader] {
        &self.shaders
    }

    pub fn technique(&self) -> TerrainTechnique {
        self.technique
    }

    pub fn set_technique(&mut self, technique: TerrainTechnique) {
        if self.technique != technique {
            info!("Terrain technique {} -> {}", self.technique, technique);
            self.technique = technique;
            self.mark_materials_dirty();
        }
    }

    /// Recompile every page material against the current shadow state
    pub fn update_shadows(&mut self) {
        self.shadow_revision += 1;
        self.mark_materials_dirty();
    }

    pub fn shadow_revision(&self) -> u64 {
        self.shadow_revision
    }

    fn mark_materials_dirty(&mut self) {
        for page in self.pages.values_mut() {
            page.mark_dirty(PageDirty::MATERIAL);
        }
    }

    // --- Per-frame pump ---

    /// Finalize completed tasks, rebuild dirty pages, emit the resulting
    /// events and dispatch whatever can start now.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        self.executor.collect_completed();
        let mut areas = std::mem::take(&mut self.pending_areas);
        for finished in self.executor.take_finalizable() {
            self.finalize(finished, &mut areas, &mut report);
        }

        self.refresh_pages();
        for area in &areas {
            for index in pages_covering(area, self.page_size) {
                if let Some(page) = self.pages.get_mut(&index) {
                    page.mark_dirty(PageDirty::all());
                }
            }
        }

        let mut regenerated = BTreeSet::new();
        for page in self.pages.values_mut() {
            if page.dirty().contains(PageDirty::GEOMETRY) {
                page.regenerate_geometry(&self.heightfield);
                regenerated.insert(page.index());
            }
        }
        report.pages_regenerated = regenerated.len();

        if !areas.is_empty() || !regenerated.is_empty() {
            debug!(
                "Terrain updated: {} areas, {} pages",
                areas.len(),
                regenerated.len()
            );
            self.events.emit(&TerrainEvent::AfterTerrainUpdate {
                areas,
                pages: regenerated,
            });
        }

        let mut recompiled = Vec::new();
        for page in self.pages.values_mut() {
            if page.dirty().contains(PageDirty::MATERIAL) {
                page.recompile_material(self.technique, &self.shaders, self.shadow_revision, &self.heightfield);
                recompiled.push(page.index());
            }
        }
        report.materials_recompiled = recompiled.len();
        for page in recompiled {
            self.events.emit(&TerrainEvent::MaterialRecompiled { page });
        }

        let heightfield = &self.heightfield;
        report.dispatched = self.executor.dispatch_ready(|task| build_job(heightfield, task));
        report
    }

    fn finalize(&mut self, finished: FinalizableTask, areas: &mut Vec<AxisBox>, report: &mut TickReport) {
        let FinalizableTask {
            id,
            epoch,
            task,
            result,
        } = finished;

        if epoch != self.epoch {
            debug!("Dropping {} ({}): its terrain was torn down", id, task.kind());
            report.dropped += 1;
            return;
        }

        match (task, result) {
            (TerrainTask::Mod(task), BackgroundResult::Mod(delta)) => {
                debug!("Finalizing {} ({} for {})", id, task.kind(), task.entity());
                match task.execute_in_main_thread(delta, &mut self.heightfield, &mut self.registry) {
                    ModOutcome::Applied { areas: changed } => {
                        report.applied += 1;
                        areas.extend(changed);
                    }
                    ModOutcome::Degraded { areas: changed } => {
                        report.degraded += 1;
                        areas.extend(changed);
                    }
                    ModOutcome::NoOp => report.no_ops += 1,
                }
            }
            (TerrainTask::PlantQuery { query, callback, .. }, BackgroundResult::Plants(plants)) => {
                report.queries += 1;
                callback(PlantAreaQueryResult { query, plants });
            }
            (TerrainTask::BasePoints { callback }, BackgroundResult::BasePoints(points)) => {
                report.queries += 1;
                callback(&points);
            }
            (task, _) => warn!("{} ({}) produced a result of another kind", id, task.kind()),
        }
    }

    fn enqueue(&mut self, task: TerrainTask) -> TerrainResult<TaskId> {
        let region = match task.area() {
            Some(area) => {
                // Edge-sharing segments see the change in their border samples
                let grown = AxisBox::new(area.min - Vec2::ONE, area.max + Vec2::ONE);
                TaskRegion::new(
                    self.heightfield.segments_covering(&grown),
                    pages_covering(&area, self.page_size),
                )
            }
            None => TaskRegion::default(),
        };
        let region = match task.as_mod() {
            Some(task) => region.with_entity(task.entity().clone()),
            None => region,
        };
        let id = self.executor.enqueue(task, region, self.epoch)?;
        Ok(id)
    }

    fn ensure_running(&self) -> TerrainResult<()> {
        if self.executor.is_shut_down() {
            return Err(TerrainError::ShutDown);
        }
        Ok(())
    }

    // --- Lifecycle ---

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.executor.task_state(id)
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    pub fn is_idle(&self) -> bool {
        self.executor.is_idle()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Block until every dispatched background phase has returned
    pub fn wait_for_background(&mut self) {
        self.executor.wait_for_in_flight();
    }

    /// Tick until every queued task has been finalized
    pub fn drain(&mut self) -> TickReport {
        let mut total = self.tick();
        while !self.executor.is_idle() && !self.executor.is_shut_down() {
            self.executor.wait_for_in_flight();
            total += self.tick();
        }
        total
    }

    /// Tear down the terrain. Queued tasks are aborted and tasks already
    /// computing finalize as no-ops.
    pub fn reset_terrain(&mut self) {
        let aborted = self.executor.abort_where(|state, _| state == TaskState::Created);
        self.epoch += 1;
        self.heightfield = Heightfield::new(self.heightfield.resolution());
        self.registry.clear();
        self.submitted.clear();
        self.pages.clear();
        self.pending_areas.clear();
        self.world_size_known = false;
        info!(
            "Terrain reset (epoch {}, {} queued tasks aborted)",
            self.epoch,
            aborted.len()
        );
    }

    /// Abort pending work and wait for the worker pool. Further submissions fail.
    pub fn shutdown(&mut self) {
        self.executor.shutdown();
    }
}

fn build_job(heightfield: &Heightfield, task: &TerrainTask) -> BackgroundJob {
    match task {
        TerrainTask::Mod(task) => {
            let (remove, insert) = task.planned_change();
            let snapshot = match task.affected_area() {
                Some(area) => heightfield.snapshot(&area),
                None => heightfield.empty_snapshot(),
            };
            BackgroundJob::Mod {
                remove,
                insert,
                snapshot,
            }
        }
        TerrainTask::PlantQuery { populator, query, .. } => BackgroundJob::Plants {
            populator: populator.clone(),
            area: query.area,
            snapshot: heightfield.snapshot(&query.area),
        },
        TerrainTask::BasePoints { .. } => BackgroundJob::BasePoints {
            points: heightfield.base_points(),
        },
    }
}

impl std::fmt::Debug for TerrainHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerrainHandler")
            .field("epoch", &self.epoch)
            .field("page_size", &self.page_size)
            .field("pages", &self.pages.len())
            .field("mods", &self.registry.len())
            .field("executor", &self.executor)
            .finish()
    }
}
