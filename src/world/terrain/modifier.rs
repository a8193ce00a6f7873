//! Localized terrain modifiers (craters, ramps, levelled areas)

use crate::utils::math::{lerp, AxisBox};
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Footprint of a mod on the ground plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModShape {
    Disc { center: Vec2, radius: f32 },
    Rect { area: AxisBox },
}

impl ModShape {
    pub fn bbox(&self) -> AxisBox {
        match self {
            ModShape::Disc { center, radius } => AxisBox::from_center(*center, *radius),
            ModShape::Rect { area } => *area,
        }
    }

    pub fn contains(&self, point: Vec2) -> bool {
        match self {
            ModShape::Disc { center, radius } => *radius > 0.0 && center.distance(point) <= *radius,
            ModShape::Rect { area } => area.contains(point),
        }
    }
}

/// What a mod does to the heights inside its shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModEffect {
    /// Bowl-shaped depression, deepest at the shape's center
    Crater { depth: f32 },
    /// Replace the height with a constant
    Level { height: f32 },
    /// Raise or lower by a constant
    Adjust { offset: f32 },
    /// Linear slope along +x across the shape's bounding box
    Ramp { start_height: f32, end_height: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainMod {
    pub shape: ModShape,
    pub effect: ModEffect,
}

impl TerrainMod {
    pub fn new(shape: ModShape, effect: ModEffect) -> Self {
        Self { shape, effect }
    }

    pub fn crater(center: Vec2, radius: f32, depth: f32) -> Self {
        Self::new(ModShape::Disc { center, radius }, ModEffect::Crater { depth })
    }

    pub fn ramp(area: AxisBox, start_height: f32, end_height: f32) -> Self {
        Self::new(
            ModShape::Rect { area },
            ModEffect::Ramp {
                start_height,
                end_height,
            },
        )
    }

    pub fn level(shape: ModShape, height: f32) -> Self {
        Self::new(shape, ModEffect::Level { height })
    }

    pub fn adjust(shape: ModShape, offset: f32) -> Self {
        Self::new(shape, ModEffect::Adjust { offset })
    }

    /// World-space area whose heights this mod can change
    pub fn bbox(&self) -> AxisBox {
        self.shape.bbox()
    }

    /// Height at `point` after this mod is applied on top of `height`
    pub fn apply(&self, point: Vec2, height: f32) -> f32 {
        if !self.shape.contains(point) {
            return height;
        }
        match &self.effect {
            ModEffect::Crater { depth } => {
                let falloff = match &self.shape {
                    ModShape::Disc { center, radius } => {
                        let d = center.distance(point) / radius;
                        1.0 - d * d
                    }
                    ModShape::Rect { .. } => 1.0,
                };
                height - depth * falloff
            }
            ModEffect::Level { height } => *height,
            ModEffect::Adjust { offset } => height + offset,
            ModEffect::Ramp {
                start_height,
                end_height,
            } => {
                let bbox = self.bbox();
                let t = if bbox.width() > 0.0 {
                    ((point.x - bbox.min.x) / bbox.width()).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                lerp(*start_height, *end_height, t)
            }
        }
    }
}
