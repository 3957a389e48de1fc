// src/orchestrator/model.rs
// The upstream model is out of scope for this core; it is represented only
// as a trait so the orchestrator can be exercised without a live dependency.

use async_trait::async_trait;

use crate::domain::{ColumnSchema, Message, SqlExecution};

#[derive(Debug, Clone)]
pub struct DatasetSchemaRef {
    pub table_name: String,
    pub row_count: i64,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    pub datasets: Vec<DatasetSchemaRef>,
    pub selected_model: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelStreamOutcome {
    pub content: String,
    pub reasoning: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub tool_call_trace: Option<String>,
}

/// Raised by a `ModelClient` implementation. `is_rate_limit` marks an
/// upstream-quota condition, which the orchestrator translates into a clean
/// `chat_error` instead of exposing exception details.
#[derive(Debug, Clone)]
pub struct ModelError {
    pub message: String,
    pub kind: &'static str,
    pub is_rate_limit: bool,
}

impl ModelError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: "model_rate_limit",
            is_rate_limit: true,
        }
    }

    pub fn other(message: impl Into<String>, kind: &'static str) -> Self {
        Self {
            message: message.into(),
            kind,
            is_rate_limit: false,
        }
    }
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ModelError {}

/// Receives tokens as the model produces them.
#[async_trait]
pub trait TokenSink: Send + Sync {
    async fn token(&self, text: &str);
}

/// Executes a tool call on the orchestrator's behalf, recording the
/// resulting `SqlExecution` so the caller can attach it to the assistant
/// message once streaming completes.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute_sql(&self, sql: &str) -> SqlExecution;
}

/// A capability returning an async token stream with tool-call semantics.
/// Implementations decide when to call back into `sink`/`tools`; the
/// orchestrator only supplies them and a cancellation check.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream(
        &self,
        request: &ModelRequest,
        sink: &dyn TokenSink,
        tools: &dyn ToolExecutor,
        is_cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<ModelStreamOutcome, ModelError>;
}

/// Placeholder `ModelClient` for a process wired without a configured
/// upstream provider. The upstream model is out of scope for this core;
/// routers that need a working integration must supply their own
/// `ModelClient` when constructing the orchestrator.
pub struct UnconfiguredModelClient;

#[async_trait]
impl ModelClient for UnconfiguredModelClient {
    async fn stream(
        &self,
        _request: &ModelRequest,
        _sink: &dyn TokenSink,
        _tools: &dyn ToolExecutor,
        _is_cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<ModelStreamOutcome, ModelError> {
        Err(ModelError::other(
            "no model client is configured for this process",
            "model_not_configured",
        ))
    }
}

/// A scripted implementation for tests: emits a fixed token sequence, then
/// optionally runs one tool call, then finishes.
pub struct ScriptedModelClient {
    pub tokens: Vec<String>,
    pub tool_call_sql: Option<String>,
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn stream(
        &self,
        _request: &ModelRequest,
        sink: &dyn TokenSink,
        tools: &dyn ToolExecutor,
        is_cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<ModelStreamOutcome, ModelError> {
        let mut content = String::new();
        for token in &self.tokens {
            if is_cancelled() {
                break;
            }
            sink.token(token).await;
            content.push_str(token);
        }

        if let Some(sql) = &self.tool_call_sql {
            if !is_cancelled() {
                let _execution = tools.execute_sql(sql).await;
            }
        }

        Ok(ModelStreamOutcome {
            content,
            reasoning: None,
            input_tokens: 10,
            output_tokens: content.len() as i64 / 4,
            tool_call_trace: self.tool_call_sql.clone(),
        })
    }
}
