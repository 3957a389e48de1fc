// src/config/rate_limit.rs
// Rolling-window token accounting limits

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub token_limit: i64,
    pub warning_threshold_percent: f64,
    pub status_cache_ttl_secs: u64,
    pub window_secs: i64,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        Self {
            token_limit: super::helpers::env_usize("TABLECHAT_TOKEN_LIMIT", 5_000_000) as i64,
            warning_threshold_percent: super::helpers::env_or("TABLECHAT_RATE_LIMIT_WARNING_PERCENT", "80")
                .parse()
                .unwrap_or(80.0),
            status_cache_ttl_secs: super::helpers::env_usize("TABLECHAT_RATE_LIMIT_STATUS_CACHE_TTL_SECS", 60) as u64,
            window_secs: super::helpers::env_usize("TABLECHAT_RATE_LIMIT_WINDOW_SECS", 86_400) as i64,
        }
    }
}
