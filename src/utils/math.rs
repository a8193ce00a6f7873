use glam::Vec2;
use std::fmt;

/// Axis-aligned rectangle on the terrain ground plane (world units)
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AxisBox {
    pub min: Vec2,
    pub max: Vec2,
}

impl AxisBox {
    /// Build a box from two opposite corners, in any order
    pub fn new(a: Vec2, b: Vec2) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn from_center(center: Vec2, half_extent: f32) -> Self {
        let half = Vec2::splat(half_extent.abs());
        Self::new(center - half, center + half)
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    /// Inclusive on all edges
    pub fn contains(&self, point: Vec2) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn contains_box(&self, other: &AxisBox) -> bool {
        self.contains(other.min) && self.contains(other.max)
    }

    /// Boxes that only share an edge count as intersecting
    pub fn intersects(&self, other: &AxisBox) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    /// Overlap of both boxes, `None` when they do not touch
    pub fn intersection(&self, other: &AxisBox) -> Option<AxisBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(AxisBox {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        })
    }

    pub fn union(&self, other: &AxisBox) -> AxisBox {
        AxisBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Distance from `point` to the closest point of the box, zero inside
    pub fn distance_to(&self, point: Vec2) -> f32 {
        point.clamp(self.min, self.max).distance(point)
    }
}

impl fmt::Display for AxisBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]-[{}, {}]",
            self.min.x, self.min.y, self.max.x, self.max.y
        )
    }
}

/// Smallest box covering every box in `boxes`
pub fn union_all<'a>(boxes: impl IntoIterator<Item = &'a AxisBox>) -> Option<AxisBox> {
    boxes
        .into_iter()
        .fold(None, |acc: Option<AxisBox>, b| match acc {
            Some(acc) => Some(acc.union(b)),
            None => Some(*b),
        })
}

/// Inclusive range of grid cells of size `cell` touched by `[min, max]`
pub fn cell_range(min: f32, max: f32, cell: f32) -> std::ops::RangeInclusive<i32> {
    let first = (min / cell).floor() as i32;
    let last = (max / cell).floor() as i32;
    first..=last
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
