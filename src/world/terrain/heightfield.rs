//! Authoritative heightfield and the snapshots handed to worker threads
//!
//! Heights are defined by a grid of base points spaced `resolution` world
//! units apart. Every square of four base points forms a segment whose height
//! samples are cached in a [`HeightTile`]; mods are applied on top of the
//! interpolated base heights in handle order.

use super::modifier::TerrainMod;
use super::types::ModHandle;
use crate::utils::math::{cell_range, AxisBox};
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

pub const DEFAULT_SEGMENT_RESOLUTION: u32 = 64;

// Upfront allocation cap for blit_heights; larger rectangles grow as they fill
const MAX_BLIT_RESERVE: usize = 1 << 20;

/// Index of a heightfield segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentIndex {
    pub x: i32,
    pub y: i32,
}

impl SegmentIndex {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Cached height samples of one segment, `(resolution + 1)²` values row-major
#[derive(Debug, Clone, PartialEq)]
pub struct HeightTile {
    resolution: u32,
    samples: Vec<f32>,
}

impl HeightTile {
    fn compute(resolution: u32, origin: Vec2, corners: [f32; 4], mods: &[&TerrainMod]) -> Self {
        let n = resolution + 1;
        let res = resolution as f32;
        let mut samples = Vec::with_capacity((n * n) as usize);
        for j in 0..n {
            for i in 0..n {
                let u = i as f32 / res;
                let v = j as f32 / res;
                let base = corners[0] * (1.0 - u) * (1.0 - v)
                    + corners[1] * u * (1.0 - v)
                    + corners[2] * (1.0 - u) * v
                    + corners[3] * u * v;
                let point = origin + Vec2::new(i as f32, j as f32);
                samples.push(mods.iter().fold(base, |h, m| m.apply(point, h)));
            }
        }
        Self { resolution, samples }
    }

    fn sample(&self, i: u32, j: u32) -> f32 {
        self.samples[(j * (self.resolution + 1) + i) as usize]
    }

    /// Bilinear height at `local`, in segment-local world units
    fn interpolate(&self, local: Vec2) -> f32 {
        let res = self.resolution as f32;
        let fx = local.x.clamp(0.0, res);
        let fy = local.y.clamp(0.0, res);
        let ix = (fx.floor() as u32).min(self.resolution - 1);
        let iy = (fy.floor() as u32).min(self.resolution - 1);
        let tx = fx - ix as f32;
        let ty = fy - iy as f32;

        let h00 = self.sample(ix, iy);
        let h10 = self.sample(ix + 1, iy);
        let h01 = self.sample(ix, iy + 1);
        let h11 = self.sample(ix + 1, iy + 1);
        let bottom = h00 + (h10 - h00) * tx;
        let top = h01 + (h11 - h01) * tx;
        bottom + (top - bottom) * ty
    }
}

#[derive(Debug, Clone)]
struct Segment {
    corners: [f32; 4],
    tile: Arc<HeightTile>,
    generation: u64,
}

/// Recomputed tile for one segment, tagged with the generation it was based on
#[derive(Debug, Clone)]
pub struct TileUpdate {
    pub index: SegmentIndex,
    pub generation: u64,
    pub tile: HeightTile,
}

#[derive(Debug)]
pub struct Heightfield {
    resolution: u32,
    base_points: HashMap<(i32, i32), f32>,
    segments: HashMap<SegmentIndex, Segment>,
    mods: BTreeMap<ModHandle, TerrainMod>,
    bounds: Option<AxisBox>,
}

impl Heightfield {
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution: resolution.max(1),
            base_points: HashMap::new(),
            segments: HashMap::new(),
            mods: BTreeMap::new(),
            bounds: None,
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Extent of all segments, `None` until the first segment exists
    pub fn bounds(&self) -> Option<AxisBox> {
        self.bounds
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment_area(&self, index: SegmentIndex) -> AxisBox {
        let res = self.resolution as f32;
        let min = Vec2::new(index.x as f32 * res, index.y as f32 * res);
        AxisBox::new(min, min + Vec2::splat(res))
    }

    /// Segment indices whose extent touches `area`, whether or not they exist
    pub fn segments_covering(&self, area: &AxisBox) -> impl Iterator<Item = SegmentIndex> {
        let res = self.resolution as f32;
        let xs = cell_range(area.min.x, area.max.x, res);
        let ys = cell_range(area.min.y, area.max.y, res);
        ys.flat_map(move |y| xs.clone().map(move |x| SegmentIndex::new(x, y)))
    }

    /// Existing segments touched by `area`.
    ///
    /// Segments sharing only an edge with `area` are included since their
    /// border samples lie inside it.
    pub fn segments_intersecting(&self, area: &AxisBox) -> Vec<SegmentIndex> {
        let res = self.resolution as f32;
        let grown = AxisBox::new(area.min - Vec2::splat(res), area.max);
        self.segments_covering(&grown)
            .filter(|index| self.segments.contains_key(index))
            .filter(|index| self.segment_area(*index).intersects(area))
            .collect()
    }

    /// Set the base point at grid coordinate (x, y).
    ///
    /// Returns the areas of every segment that was created or regenerated.
    pub fn set_base_point(&mut self, x: i32, y: i32, height: f32) -> Vec<AxisBox> {
        self.base_points.insert((x, y), height);

        let (left, below) = (x.checked_sub(1), y.checked_sub(1));
        let candidates = [(left, below), (Some(x), below), (left, Some(y)), (Some(x), Some(y))];

        let mut areas = Vec::new();
        for (sx, sy) in candidates {
            let (Some(sx), Some(sy)) = (sx, sy) else {
                continue;
            };
            let index = SegmentIndex::new(sx, sy);
            let Some(corners) = self.corners_of(index) else {
                continue;
            };
            let tile = self.compute_tile(index, corners, &self.mods);
            let generation = self.segments.get(&index).map_or(0, |s| s.generation + 1);
            self.segments.insert(
                index,
                Segment {
                    corners,
                    tile: Arc::new(tile),
                    generation,
                },
            );
            let area = self.segment_area(index);
            self.bounds = Some(match self.bounds {
                Some(bounds) => bounds.union(&area),
                None => area,
            });
            areas.push(area);
        }
        areas
    }

    pub fn base_point(&self, x: i32, y: i32) -> Option<f32> {
        self.base_points.get(&(x, y)).copied()
    }

    pub fn base_points(&self) -> BTreeMap<(i32, i32), f32> {
        self.base_points.iter().map(|(k, v)| (*k, *v)).collect()
    }

    fn corners_of(&self, index: SegmentIndex) -> Option<[f32; 4]> {
        let (x, y) = (index.x, index.y);
        let (right, above) = (x.checked_add(1)?, y.checked_add(1)?);
        Some([
            self.base_point(x, y)?,
            self.base_point(right, y)?,
            self.base_point(x, above)?,
            self.base_point(right, above)?,
        ])
    }

    fn compute_tile(
        &self,
        index: SegmentIndex,
        corners: [f32; 4],
        mods: &BTreeMap<ModHandle, TerrainMod>,
    ) -> HeightTile {
        let area = self.segment_area(index);
        let touching: Vec<&TerrainMod> = mods.values().filter(|m| m.bbox().intersects(&area)).collect();
        HeightTile::compute(self.resolution, area.min, corners, &touching)
    }

    /// Height at `position`, `None` outside every known segment
    pub fn get_height(&self, position: Vec2) -> Option<f32> {
        height_in(self.resolution, position, |index| {
            self.segments.get(&index).map(|s| s.tile.as_ref())
        })
    }

    /// Heights at every integer coordinate in the inclusive rectangle,
    /// row-major by y. Unknown positions read as zero.
    pub fn blit_heights(&self, x_min: i32, x_max: i32, y_min: i32, y_max: i32) -> Vec<f32> {
        if x_max < x_min || y_max < y_min {
            return Vec::new();
        }
        // i64 spans cannot overflow for any pair of i32 bounds
        let width = (i64::from(x_max) - i64::from(x_min) + 1) as u64;
        let height = (i64::from(y_max) - i64::from(y_min) + 1) as u64;
        let capacity = width
            .checked_mul(height)
            .and_then(|count| usize::try_from(count).ok())
            .unwrap_or(0)
            .min(MAX_BLIT_RESERVE);
        let mut heights = Vec::with_capacity(capacity);
        for y in y_min..=y_max {
            for x in x_min..=x_max {
                heights.push(self.get_height(Vec2::new(x as f32, y as f32)).unwrap_or(0.0));
            }
        }
        heights
    }

    pub fn contains_mod(&self, handle: ModHandle) -> bool {
        self.mods.contains_key(&handle)
    }

    pub fn mod_count(&self) -> usize {
        self.mods.len()
    }

    /// Record `modifier` without touching any tile; callers commit tiles after
    pub(crate) fn insert_mod(&mut self, handle: ModHandle, modifier: TerrainMod) {
        self.mods.insert(handle, modifier);
    }

    pub(crate) fn remove_mod(&mut self, handle: ModHandle) -> Option<TerrainMod> {
        self.mods.remove(&handle)
    }

    /// Install a tile computed off-thread.
    ///
    /// Fails when the segment changed since the snapshot the tile was based
    /// on, in which case the caller must regenerate it.
    pub(crate) fn commit_tile(&mut self, update: TileUpdate) -> bool {
        match self.segments.get_mut(&update.index) {
            Some(segment) if segment.generation == update.generation => {
                segment.tile = Arc::new(update.tile);
                segment.generation += 1;
                true
            }
            _ => false,
        }
    }

    /// Recompute one segment from the authoritative base points and mods
    pub(crate) fn regenerate_segment(&mut self, index: SegmentIndex) {
        let Some(corners) = self.segments.get(&index).map(|s| s.corners) else {
            return;
        };
        let tile = self.compute_tile(index, corners, &self.mods);
        if let Some(segment) = self.segments.get_mut(&index) {
            segment.tile = Arc::new(tile);
            segment.generation += 1;
        }
        trace!("Regenerated segment ({}, {}) on the main thread", index.x, index.y);
    }

    pub(crate) fn regenerate(&mut self, area: &AxisBox) {
        for index in self.segments_intersecting(area) {
            self.regenerate_segment(index);
        }
    }

    /// Snapshot with no segments, for tasks that touch nothing
    pub(crate) fn empty_snapshot(&self) -> HeightfieldSnapshot {
        HeightfieldSnapshot {
            resolution: self.resolution,
            segments: Vec::new(),
            mods: BTreeMap::new(),
        }
    }

    /// Copy out everything needed to recompute the segments touching `area`
    pub(crate) fn snapshot(&self, area: &AxisBox) -> HeightfieldSnapshot {
        let segments: Vec<SegmentSnapshot> = self
            .segments_intersecting(area)
            .into_iter()
            .filter_map(|index| {
                self.segments.get(&index).map(|s| SegmentSnapshot {
                    index,
                    corners: s.corners,
                    generation: s.generation,
                    tile: Arc::clone(&s.tile),
                })
            })
            .collect();

        let extents: Vec<AxisBox> = segments.iter().map(|s| self.segment_area(s.index)).collect();
        let mods = self
            .mods
            .iter()
            .filter(|(_, m)| {
                let bbox = m.bbox();
                extents.iter().any(|e| bbox.intersects(e))
            })
            .map(|(h, m)| (*h, m.clone()))
            .collect();

        HeightfieldSnapshot {
            resolution: self.resolution,
            segments,
            mods,
        }
    }
}

fn height_in<'a>(
    resolution: u32,
    position: Vec2,
    lookup: impl Fn(SegmentIndex) -> Option<&'a HeightTile>,
) -> Option<f32> {
    let res = resolution as f32;
    let sx = (position.x / res).floor() as i32;
    let sy = (position.y / res).floor() as i32;
    // Points on a segment's lower edge also belong to the neighbour below
    let (left, below) = (sx.saturating_sub(1), sy.saturating_sub(1));
    for (x, y) in [(sx, sy), (left, sy), (sx, below), (left, below)] {
        let origin = Vec2::new(x as f32 * res, y as f32 * res);
        let local = position - origin;
        if local.x < 0.0 || local.y < 0.0 || local.x > res || local.y > res {
            continue;
        }
        if let Some(tile) = lookup(SegmentIndex::new(x, y)) {
            return Some(tile.interpolate(local));
        }
    }
    None
}

#[derive(Debug, Clone)]
struct SegmentSnapshot {
    index: SegmentIndex,
    corners: [f32; 4],
    generation: u64,
    tile: Arc<HeightTile>,
}

/// Private, immutable copy of part of the heightfield for a worker thread
#[derive(Debug, Clone)]
pub struct HeightfieldSnapshot {
    resolution: u32,
    segments: Vec<SegmentSnapshot>,
    mods: BTreeMap<ModHandle, TerrainMod>,
}

impl HeightfieldSnapshot {
    /// Swap `remove` for `insert` in the snapshot's mod list
    pub fn apply_change(&mut self, remove: Option<ModHandle>, insert: Option<(ModHandle, TerrainMod)>) {
        if let Some(handle) = remove {
            self.mods.remove(&handle);
        }
        if let Some((handle, modifier)) = insert {
            self.mods.insert(handle, modifier);
        }
    }

    /// Recompute the tiles of every segment in the snapshot
    pub fn recompute(&self) -> Vec<TileUpdate> {
        let res = self.resolution as f32;
        self.segments
            .iter()
            .map(|segment| {
                let min = Vec2::new(segment.index.x as f32 * res, segment.index.y as f32 * res);
                let area = AxisBox::new(min, min + Vec2::splat(res));
                let touching: Vec<&TerrainMod> =
                    self.mods.values().filter(|m| m.bbox().intersects(&area)).collect();
                TileUpdate {
                    index: segment.index,
                    generation: segment.generation,
                    tile: HeightTile::compute(self.resolution, min, segment.corners, &touching),
                }
            })
            .collect()
    }

    /// Height as of the moment the snapshot was taken
    pub fn get_height(&self, position: Vec2) -> Option<f32> {
        height_in(self.resolution, position, |index| {
            self.segments
                .iter()
                .find(|s| s.index == index)
                .map(|s| s.tile.as_ref())
        })
    }

    pub fn segment_indices(&self) -> HashSet<SegmentIndex> {
        self.segments.iter().map(|s| s.index).collect()
    }
}
