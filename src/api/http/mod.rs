// src/api/http/mod.rs

pub mod health;

pub use health::{health_check, liveness_check, readiness_check};
