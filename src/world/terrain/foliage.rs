//! Foliage trigger points: populators created per layer and plant queries
//! answered from heightfield snapshots

use super::shader::FoliageDefinition;
use crate::utils::math::AxisBox;
use glam::{Vec2, Vec3};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct PlantInstance {
    /// x/y on the ground plane, z is the terrain height
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlantAreaQuery {
    pub plant_type: String,
    pub area: AxisBox,
}

impl PlantAreaQuery {
    pub fn new(plant_type: impl Into<String>, area: AxisBox) -> Self {
        Self {
            plant_type: plant_type.into(),
            area,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlantAreaQueryResult {
    pub query: PlantAreaQuery,
    pub plants: Vec<PlantInstance>,
}

pub type PlantQueryCallback = Box<dyn FnOnce(PlantAreaQueryResult)>;

/// Places one plant type on a regular grid derived from its density
#[derive(Debug, Clone, PartialEq)]
pub struct PlantPopulator {
    plant_type: String,
    shader_index: usize,
    spacing: f32,
}

impl PlantPopulator {
    pub fn new(definition: &FoliageDefinition, shader_index: usize) -> Self {
        let density = definition.density.max(0.0001);
        Self {
            plant_type: definition.plant_type.clone(),
            shader_index,
            spacing: 10.0 / density.sqrt(),
        }
    }

    pub fn plant_type(&self) -> &str {
        &self.plant_type
    }

    pub fn shader_index(&self) -> usize {
        self.shader_index
    }

    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    /// Plants inside `area`, skipping positions without a known height
    pub fn populate(&self, area: &AxisBox, height_at: impl Fn(Vec2) -> Option<f32>) -> Vec<PlantInstance> {
        let mut plants = Vec::new();
        let mut y = (area.min.y / self.spacing).ceil() * self.spacing;
        while y <= area.max.y {
            let mut x = (area.min.x / self.spacing).ceil() * self.spacing;
            while x <= area.max.x {
                if let Some(height) = height_at(Vec2::new(x, y)) {
                    plants.push(PlantInstance {
                        position: Vec3::new(x, y, height),
                    });
                }
                x += self.spacing;
            }
            y += self.spacing;
        }
        plants
    }
}

/// Registry of populators keyed by plant type
#[derive(Debug, Default)]
pub struct Vegetation {
    populators: HashMap<String, PlantPopulator>,
}

impl Vegetation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_populator(&mut self, definition: &FoliageDefinition, shader_index: usize) -> &PlantPopulator {
        debug!(
            "Creating populator for '{}' on shader {}",
            definition.plant_type, shader_index
        );
        let populator = PlantPopulator::new(definition, shader_index);
        self.populators.insert(definition.plant_type.clone(), populator);
        &self.populators[&definition.plant_type]
    }

    pub fn get_populator(&self, plant_type: &str) -> Option<&PlantPopulator> {
        self.populators.get(plant_type)
    }

    pub fn len(&self) -> usize {
        self.populators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.populators.is_empty()
    }
}
