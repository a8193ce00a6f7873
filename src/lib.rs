// SLV-Terrain: asynchronous terrain modification pipeline for the viewer

pub mod app;
pub mod config;
pub mod utils;
pub mod world;

// Re-export commonly used types for convenience
pub use app::{FrameEvent, FrameListener, FrameLoop};
pub use crate::config::{ConfigService, ConfigValue, TerrainSettings, ThreadPoolConfig};
pub use utils::math::AxisBox;
pub use world::terrain::{TerrainError, TerrainHandler, TerrainManager, TerrainResult};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
