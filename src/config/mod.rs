pub mod concurrency;
pub mod service;
pub mod settings;

// Re-export commonly used types
pub use concurrency::ThreadPoolConfig;
pub use service::{ConfigChanged, ConfigService, ConfigValue};
pub use settings::{
    default_settings_path, load_terrain_settings, save_terrain_settings, GraphicsSettings, TerrainSection,
    TerrainSettings,
};
