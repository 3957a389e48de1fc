// src/domain/mod.rs

pub mod error;
pub mod models;

pub use error::{DomainError, DomainResult};
pub use models::*;
