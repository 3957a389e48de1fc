// src/push/message.rs
// Wire protocol for the duplex push channel. Every event carries a `type`
// discriminator; consumers on the wire are untyped JSON, internal code
// should prefer this sum type.

use serde::{Deserialize, Serialize};

use crate::domain::SqlExecution;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PushEvent {
    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "chat_token")]
    ChatToken { token: String, message_id: String },

    #[serde(rename = "chat_complete")]
    ChatComplete {
        message_id: String,
        sql_query: Option<String>,
        token_count: i64,
        sql_executions: Vec<SqlExecution>,
        reasoning: Option<String>,
        input_tokens: i64,
        output_tokens: i64,
        tool_call_trace: Option<String>,
    },

    #[serde(rename = "chat_error")]
    ChatError {
        error: String,
        details: Option<String>,
    },

    #[serde(rename = "query_status")]
    QueryStatus { phase: QueryPhase },

    #[serde(rename = "query_progress")]
    QueryProgress { n: u32 },

    #[serde(rename = "chart_spec")]
    ChartSpec {
        ei: u32,
        sp: serde_json::Value,
    },

    #[serde(rename = "followup_suggestions")]
    FollowupSuggestions { sg: Vec<String> },

    #[serde(rename = "rate_limit_warning")]
    RateLimitWarning {
        usage_percent: f64,
        remaining_tokens: i64,
    },

    #[serde(rename = "rate_limit_exceeded")]
    RateLimitExceeded { resets_in_seconds: i64 },

    #[serde(rename = "dataset_loading")]
    DatasetLoading { dataset_id: String, url: String },

    #[serde(rename = "dataset_loaded")]
    DatasetLoaded {
        dataset_id: String,
        name: String,
        row_count: i64,
        column_count: i64,
    },

    #[serde(rename = "dataset_error")]
    DatasetError { dataset_id: String, error: String },

    #[serde(rename = "conversation_title_updated")]
    ConversationTitleUpdated { conversation_id: String, title: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPhase {
    Queued,
    Generating,
    Executing,
    Formatting,
}

/// Close code used when peer authentication fails at connect time, before
/// the peer is ever registered.
pub const AUTH_FAILED_CLOSE_CODE: u16 = 4001;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_serializes_with_bare_tag() {
        let json = serde_json::to_value(PushEvent::Ping).unwrap();
        assert_eq!(json, serde_json::json!({"type": "ping"}));
    }

    #[test]
    fn chat_token_carries_fields() {
        let json = serde_json::to_value(PushEvent::ChatToken {
            token: "hi".into(),
            message_id: "m1".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "chat_token");
        assert_eq!(json["token"], "hi");
        assert_eq!(json["message_id"], "m1");
    }

    #[test]
    fn query_status_phase_is_snake_case() {
        let json = serde_json::to_value(PushEvent::QueryStatus {
            phase: QueryPhase::Generating,
        })
        .unwrap();
        assert_eq!(json["phase"], "generating");
    }
}
