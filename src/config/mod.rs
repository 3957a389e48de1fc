// src/config/mod.rs
// Central configuration for the chat-over-datasets core

pub mod cache;
pub mod helpers;
pub mod rate_limit;
pub mod server;
pub mod worker;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

lazy_static! {
    pub static ref CONFIG: AppConfig = AppConfig::from_env();
}

/// Main configuration structure - composes all domain configs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: server::ServerConfig,
    pub database: server::DatabaseConfig,
    pub logging: server::LoggingConfig,
    pub session: server::SessionConfig,
    pub worker: worker::WorkerConfig,
    pub file_cache: cache::FileCacheConfig,
    pub query_cache: cache::QueryCacheConfig,
    pub rate_limit: rate_limit::RateLimitConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        // Load .env file; don't panic if absent (production reads real env vars)
        dotenv::dotenv().ok();

        Self {
            server: server::ServerConfig::from_env(),
            database: server::DatabaseConfig::from_env(),
            logging: server::LoggingConfig::from_env(),
            session: server::SessionConfig::from_env(),
            worker: worker::WorkerConfig::from_env(),
            file_cache: cache::FileCacheConfig::from_env(),
            query_cache: cache::QueryCacheConfig::from_env(),
            rate_limit: rate_limit::RateLimitConfig::from_env(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker.pool_size == 0 {
            anyhow::bail!("TABLECHAT_WORKER_POOL_SIZE must be at least 1");
        }
        if self.rate_limit.token_limit <= 0 {
            anyhow::bail!("TABLECHAT_TOKEN_LIMIT must be positive");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        self.server.bind_address()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
