use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vegetation attached to a terrain layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoliageDefinition {
    pub plant_type: String,
    /// Plants per 100 square world units
    pub density: f32,
}

/// A material layer of the terrain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainLayerDefinition {
    pub id: u32,
    pub name: String,
    pub diffuse_texture: String,
    /// Heights the layer covers; `None` covers everything
    pub height_range: Option<(f32, f32)>,
    pub foliages: Vec<FoliageDefinition>,
}

impl TerrainLayerDefinition {
    pub fn new(id: u32, name: impl Into<String>, diffuse_texture: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            diffuse_texture: diffuse_texture.into(),
            height_range: None,
            foliages: Vec::new(),
        }
    }

    pub fn with_height_range(mut self, min: f32, max: f32) -> Self {
        self.height_range = Some((min.min(max), min.max(max)));
        self
    }

    pub fn with_foliage(mut self, plant_type: impl Into<String>, density: f32) -> Self {
        self.foliages.push(FoliageDefinition {
            plant_type: plant_type.into(),
            density,
        });
        self
    }

    /// Blend weight of this layer at `height`
    pub fn coverage(&self, height: f32) -> u8 {
        match self.height_range {
            Some((min, max)) if height < min || height > max => 0,
            _ => u8::MAX,
        }
    }
}

/// A registered layer and its position in the handler's shader list
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainShader {
    layer: TerrainLayerDefinition,
    index: usize,
}

impl TerrainShader {
    pub(crate) fn new(layer: TerrainLayerDefinition, index: usize) -> Self {
        Self { layer, index }
    }

    pub fn layer(&self) -> &TerrainLayerDefinition {
        &self.layer
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// How page materials are compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TerrainTechnique {
    Simple,
    #[default]
    ShaderNormalMapped,
}

impl FromStr for TerrainTechnique {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" | "base" => Ok(Self::Simple),
            "shadernormalmapped" | "shader" => Ok(Self::ShaderNormalMapped),
            _ => Err(format!("Unknown terrain technique: {}", s)),
        }
    }
}

impl fmt::Display for TerrainTechnique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => f.write_str("Simple"),
            Self::ShaderNormalMapped => f.write_str("ShaderNormalMapped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coverage_respects_height_range() {
        let sand = TerrainLayerDefinition::new(1, "sand", "sand.png").with_height_range(5.0, -1.0);
        assert_eq!(sand.height_range, Some((-1.0, 5.0)));
        assert_eq!(sand.coverage(0.0), 255);
        assert_eq!(sand.coverage(6.0), 0);

        let rock = TerrainLayerDefinition::new(2, "rock", "rock.png");
        assert_eq!(rock.coverage(-1000.0), 255);
    }

    #[test]
    fn test_technique_parsing() {
        assert_eq!("Simple".parse::<TerrainTechnique>(), Ok(TerrainTechnique::Simple));
        assert_eq!(
            "shadernormalmapped".parse::<TerrainTechnique>(),
            Ok(TerrainTechnique::ShaderNormalMapped)
        );
        assert!("raytraced".parse::<TerrainTechnique>().is_err());
    }
}
