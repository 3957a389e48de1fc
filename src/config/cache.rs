// src/config/cache.rs
// File cache and query result cache configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCacheConfig {
    pub cache_dir: String,
    pub max_file_bytes: u64,
    pub max_cache_bytes: u64,
    pub download_timeout_secs: u64,
    pub stale_temp_file_age_secs: u64,
}

impl FileCacheConfig {
    pub fn from_env() -> Self {
        Self {
            cache_dir: super::helpers::env_or("TABLECHAT_CACHE_DIR", "/tmp/tablechat_cache"),
            max_file_bytes: super::helpers::env_usize("TABLECHAT_MAX_FILE_BYTES", 500 * 1024 * 1024) as u64,
            max_cache_bytes: super::helpers::env_usize("TABLECHAT_MAX_CACHE_BYTES", 1024 * 1024 * 1024) as u64,
            download_timeout_secs: super::helpers::env_usize("TABLECHAT_DOWNLOAD_TIMEOUT_SECS", 300) as u64,
            stale_temp_file_age_secs: super::helpers::env_usize("TABLECHAT_STALE_TEMP_FILE_AGE_SECS", 3600) as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCacheConfig {
    pub memory_capacity: u64,
    pub memory_ttl_secs: u64,
    pub durable_max_entries: i64,
    pub durable_ttl_secs: i64,
    pub cleanup_interval_secs: u64,
}

impl QueryCacheConfig {
    pub fn from_env() -> Self {
        Self {
            memory_capacity: super::helpers::env_usize("TABLECHAT_QUERY_CACHE_MEMORY_CAPACITY", 1000) as u64,
            memory_ttl_secs: super::helpers::env_usize("TABLECHAT_QUERY_CACHE_MEMORY_TTL_SECS", 300) as u64,
            durable_max_entries: super::helpers::env_usize("TABLECHAT_QUERY_CACHE_DURABLE_MAX_ENTRIES", 500) as i64,
            durable_ttl_secs: super::helpers::env_usize("TABLECHAT_QUERY_CACHE_DURABLE_TTL_SECS", 3600) as i64,
            cleanup_interval_secs: super::helpers::env_usize("TABLECHAT_QUERY_CACHE_CLEANUP_INTERVAL_SECS", 1800) as u64,
        }
    }
}
