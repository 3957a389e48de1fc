// src/worker/error.rs
// Structured errors crossing the worker boundary. Never thrown as
// exceptions across that boundary — always returned as a value.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Timeout,
    Network,
    Validation,
    Sql,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerError {
    pub error_type: ErrorType,
    pub message: String,
    pub details: Option<String>,
}

impl WorkerError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Timeout,
            message: message.into(),
            details: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Network,
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Validation,
            message: message.into(),
            details: None,
        }
    }

    pub fn sql(message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Sql,
            message: message.into(),
            details: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Internal,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkerError {}
