//! Terrain modification pipeline
//!
//! Terrain edits are computed on worker threads against private snapshots of
//! the heightfield and committed on the main thread, after which the handler
//! broadcasts exactly which areas and pages changed so the rendering adapter
//! and the foliage system can react without reloading the whole world.

pub mod adapter;
pub mod buffer;
pub mod commands;
pub mod executor;
pub mod foliage;
pub mod handler;
pub mod heightfield;
pub mod manager;
pub mod modifier;
pub mod page;
pub mod shader;
pub mod task;
pub mod types;

// Re-export main types for convenience
pub use adapter::{Camera, HeadlessTerrainAdapter, TerrainAdapter, TerrainShownCallback};
pub use buffer::TerrainBuffer;
pub use commands::TerrainCommand;
pub use executor::{ExecutorStats, TaskExecutionContext, TaskId, TaskRegion, TaskState};
pub use foliage::{PlantAreaQuery, PlantAreaQueryResult, PlantInstance, PlantPopulator, PlantQueryCallback, Vegetation};
pub use handler::{TerrainHandler, TickReport};
pub use heightfield::{Heightfield, SegmentIndex};
pub use manager::TerrainManager;
pub use modifier::{ModEffect, ModShape, TerrainMod};
pub use page::{PageDirty, PageMaterial, TerrainPage};
pub use shader::{FoliageDefinition, TerrainLayerDefinition, TerrainShader, TerrainTechnique};
pub use task::{AppliedMod, ModOutcome, ModRegistry, TerrainModTask, TerrainTask};
pub use types::{EntityId, ModHandle, TerrainIndex, TerrainPosition};

// Error types
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("Worker pool creation failed: {reason}")]
    WorkerPool { reason: String },

    #[error("Terrain buffer needs {expected} bytes but {actual} were supplied")]
    BufferLength { expected: usize, actual: usize },

    #[error("Terrain handler has been shut down")]
    ShutDown,

    #[error("Settings could not be loaded: {0}")]
    Settings(#[from] ::config::ConfigError),

    #[error("Settings could not be serialized: {reason}")]
    Serialize { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TerrainResult<T> = Result<T, TerrainError>;
