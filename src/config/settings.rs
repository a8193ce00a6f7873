use super::concurrency::ThreadPoolConfig;
use super::service::ConfigService;
use crate::world::terrain::{TerrainError, TerrainResult};
use ::config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "terrain.toml";
const ENV_PREFIX: &str = "SLV_TERRAIN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsSettings {
    pub foliage: bool,
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        Self { foliage: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainSection {
    pub preferred_technique: String,
    /// Page size in world units; pages hold one more vertex per side
    pub page_size: i64,
    pub load_radius: i64,
}

impl Default for TerrainSection {
    fn default() -> Self {
        Self {
            preferred_technique: "ShaderNormalMapped".to_string(),
            page_size: 64,
            load_radius: 300,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainSettings {
    pub graphics: GraphicsSettings,
    pub terrain: TerrainSection,
    pub workers: ThreadPoolConfig,
}

impl TerrainSettings {
    /// Seed the runtime config service with these settings
    pub fn apply_to(&self, service: &ConfigService) {
        service.set("graphics", "foliage", self.graphics.foliage);
        service.set(
            "terrain",
            "preferredtechnique",
            self.terrain.preferred_technique.as_str(),
        );
        service.set("terrain", "pagesize", self.terrain.page_size);
        service.set("terrain", "loadradius", self.terrain.load_radius);
    }
}

// Terrain configuration file management
pub fn default_settings_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "slv", "slv-terrain").map(|proj| proj.config_dir().join(SETTINGS_FILE))
}

/// Load settings from `path` (optional) with `SLV_TERRAIN__SECTION__KEY`
/// environment overrides on top
pub fn load_terrain_settings(path: Option<&Path>) -> TerrainResult<TerrainSettings> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
    }
    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<TerrainSettings>()?;

    tracing::debug!("Loaded terrain settings: {:?}", settings);
    Ok(settings)
}

pub fn save_terrain_settings(settings: &TerrainSettings, path: &Path) -> TerrainResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let toml = toml::to_string_pretty(settings).map_err(|e| TerrainError::Serialize {
        reason: e.to_string(),
    })?;
    fs::write(path, toml)?;
    Ok(())
}
