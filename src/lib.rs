// src/lib.rs

pub mod api;
pub mod auth;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod error_translator;
pub mod file_cache;
pub mod orchestrator;
pub mod push;
pub mod query_cache;
pub mod rate_limit;
pub mod schema;
pub mod state;
pub mod worker;

pub use config::CONFIG;
pub use state::AppState;
