// src/config/worker.rs
// Worker pool sizing and per-task limits

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub max_tasks_per_child: u32,
    pub task_timeout_secs: u64,
    pub memory_limit_mb: usize,
    pub max_pending_tasks: usize,
    pub allow_private_urls: bool,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self {
            pool_size: super::helpers::env_usize("TABLECHAT_WORKER_POOL_SIZE", 4),
            max_tasks_per_child: super::helpers::env_usize("TABLECHAT_WORKER_MAX_TASKS_PER_CHILD", 50) as u32,
            task_timeout_secs: super::helpers::env_usize("TABLECHAT_WORKER_TASK_TIMEOUT_SECS", 300) as u64,
            memory_limit_mb: super::helpers::env_usize("TABLECHAT_WORKER_MEMORY_LIMIT_MB", 512),
            max_pending_tasks: super::helpers::env_usize("TABLECHAT_WORKER_MAX_PENDING_TASKS", 10),
            allow_private_urls: super::helpers::env_or("TABLECHAT_ALLOW_PRIVATE_URLS", "false") == "true",
        }
    }
}
