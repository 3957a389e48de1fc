// src/domain/models.rs
// Core data model: principals, sessions, conversations, messages, dataset bindings,
// token usage records, and referral keys.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Principal {
    pub id: String,
    pub external_id: String,
    pub email: Option<String>,
    pub name: String,
    pub avatar_url: Option<String>,
    pub created_at: i64,
    pub last_login_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl Session {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub is_pinned: bool,
    pub share_token: Option<String>,
    pub shared_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// One executed SQL statement and its (possibly truncated) result, attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlExecution {
    pub query: String,
    pub columns: Vec<String>,
    /// Rows trimmed to the wire cap (<= 100), used for the push event payload.
    pub rows: Vec<serde_json::Value>,
    /// Rows trimmed to the storage cap (<= 1000), persisted with the message.
    pub full_rows: Vec<serde_json::Value>,
    pub total_rows: u64,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub sql_query: Option<String>,
    pub reasoning: Option<String>,
    pub token_count: i64,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub tool_call_trace: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Loading,
    Ready,
    Error,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetStatus::Loading => "loading",
            DatasetStatus::Ready => "ready",
            DatasetStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStats {
    pub min: Option<serde_json::Value>,
    pub max: Option<serde_json::Value>,
    pub unique_count: Option<u64>,
    pub null_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub stats: ColumnStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DatasetBinding {
    pub id: String,
    pub conversation_id: String,
    pub url: String,
    pub name: String,
    pub row_count: i64,
    pub column_count: i64,
    pub schema_json: String,
    pub status: String,
    pub error_message: Option<String>,
    pub loaded_at: i64,
    pub file_size_bytes: Option<i64>,
    pub column_descriptions: Option<String>,
}

impl DatasetBinding {
    pub fn schema(&self) -> Vec<ColumnSchema> {
        serde_json::from_str(&self.schema_json).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TokenUsageRecord {
    pub id: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub model_name: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReferralKey {
    pub key: String,
    pub created_by: Option<String>,
    pub used_by: Option<String>,
    pub created_at: i64,
    pub used_at: Option<i64>,
}

impl ReferralKey {
    pub fn is_consumed(&self) -> bool {
        self.used_by.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSettings {
    pub user_id: String,
    pub dev_mode: bool,
    pub selected_model: Option<String>,
}
