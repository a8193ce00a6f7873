use crate::world::terrain::{TerrainError, TerrainResult};
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

/// Worker pool used for the background phase of terrain tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    pub worker_threads: usize,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            // Leave half the cores to the render thread and the rest of the client
            worker_threads: (num_cpus::get() / 2).max(1),
            stack_size: Some(2 * 1024 * 1024), // 2MB stack size
            thread_name_prefix: "slv-terrain".to_string(),
        }
    }
}

impl ThreadPoolConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            worker_threads: workers.max(1),
            ..Self::default()
        }
    }

    pub fn build_pool(&self) -> TerrainResult<rayon::ThreadPool> {
        tracing::info!("Building terrain worker pool with config: {:?}", self);

        let prefix = self.thread_name_prefix.clone();
        let mut builder = ThreadPoolBuilder::new()
            .num_threads(self.worker_threads.max(1))
            .thread_name(move |index| format!("{}-{}", prefix, index));

        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        builder.build().map_err(|e| TerrainError::WorkerPool {
            reason: e.to_string(),
        })
    }
}
