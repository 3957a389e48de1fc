// src/config/server.rs
// Server, database, and logging configuration

use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: super::helpers::env_or("TABLECHAT_HOST", "0.0.0.0"),
            port: super::helpers::env_usize("TABLECHAT_PORT", 8080) as u16,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout: u64,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: super::helpers::env_or("DATABASE_URL", "sqlite://tablechat.db"),
            max_connections: super::helpers::env_usize("TABLECHAT_SQLITE_MAX_CONNECTIONS", 10) as u32,
            timeout: super::helpers::env_usize("DATABASE_TIMEOUT", 30) as u64,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub trace_sql: bool,
    pub debug_logging: bool,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            level: super::helpers::env_or("TABLECHAT_LOG_LEVEL", "info"),
            trace_sql: super::helpers::env_or("TABLECHAT_TRACE_SQL", "false") == "true",
            debug_logging: super::helpers::env_or("TABLECHAT_DEBUG_LOGGING", "false") == "true",
        }
    }
}

/// Session configuration (principal sessions, sliding-window expiry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_duration_days: i64,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self {
            session_duration_days: super::helpers::env_usize("TABLECHAT_SESSION_DURATION_DAYS", 7) as i64,
        }
    }
}
