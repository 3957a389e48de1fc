// src/orchestrator/mod.rs
// Per-conversation state machine coordinating the rate limiter, dataset
// bindings, worker pool / query cache, and the push channel around one
// model streaming turn.

pub mod model;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use sqlx::{Row, SqlitePool};
use tokio::sync::{watch, Mutex};
use tracing::{error, warn};
use uuid::Uuid;

use crate::domain::{Conversation, DatasetBinding, DomainError, DomainResult, Message, SqlExecution};
use crate::push::{PushEvent, PushRegistry, QueryPhase};
use crate::query_cache::{self, QueryCache};
use crate::rate_limit::RateLimiter;
use crate::worker::{QueryDataset, WorkerPool};

use model::{DatasetSchemaRef, ModelClient, ModelRequest, ModelStreamOutcome, TokenSink, ToolExecutor};

const MAX_CONTEXT_MESSAGES: usize = 50;
const CONTEXT_TOKEN_BUDGET: usize = 32_000;
const CHARS_PER_TOKEN: usize = 4;
const TITLE_MAX_CHARS: usize = 50;
const WIRE_ROW_CAP: usize = 100;
const STORAGE_ROW_CAP: usize = 1000;

/// Tracks which conversations currently have a generation in flight.
/// Presence of an entry means ACTIVE; absence means IDLE.
#[derive(Default)]
struct ActiveConversationLock {
    entries: DashMap<String, watch::Sender<bool>>,
}

impl ActiveConversationLock {
    fn try_start(&self, conversation_id: &str) -> Result<watch::Receiver<bool>, DomainError> {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(conversation_id.to_string()) {
            Entry::Occupied(_) => Err(DomainError::Conflict),
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(false);
                slot.insert(tx);
                Ok(rx)
            }
        }
    }

    fn cancel(&self, conversation_id: &str) {
        if let Some(tx) = self.entries.get(conversation_id) {
            let _ = tx.send(true);
        }
    }

    fn finish(&self, conversation_id: &str) {
        self.entries.remove(conversation_id);
    }
}

pub struct ProcessMessageOutcome {
    pub assistant_message_id: String,
    pub content: String,
    pub sql_executions: Vec<SqlExecution>,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

pub struct ChatOrchestrator {
    db: SqlitePool,
    rate_limiter: Arc<RateLimiter>,
    query_cache: Arc<QueryCache>,
    worker_pool: Arc<WorkerPool>,
    push_registry: Arc<PushRegistry>,
    model_client: Arc<dyn ModelClient>,
    locks: ActiveConversationLock,
}

impl ChatOrchestrator {
    pub fn new(
        db: SqlitePool,
        rate_limiter: Arc<RateLimiter>,
        query_cache: Arc<QueryCache>,
        worker_pool: Arc<WorkerPool>,
        push_registry: Arc<PushRegistry>,
        model_client: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            db,
            rate_limiter,
            query_cache,
            worker_pool,
            push_registry,
            model_client,
            locks: ActiveConversationLock::default(),
        }
    }

    pub fn stop_generation(&self, conversation_id: &str) {
        self.locks.cancel(conversation_id);
    }

    pub async fn process_message(
        &self,
        conversation_id: &str,
        principal_id: &str,
        content: &str,
    ) -> DomainResult<ProcessMessageOutcome> {
        // Step 1: check-and-set lock.
        let mut cancel_rx = self.locks.try_start(conversation_id)?;
        let result = self.run_turn(conversation_id, principal_id, content, &mut cancel_rx).await;
        // Step 13 (always): release the lock regardless of outcome.
        self.locks.finish(conversation_id);
        result
    }

    async fn run_turn(
        &self,
        conversation_id: &str,
        principal_id: &str,
        content: &str,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> DomainResult<ProcessMessageOutcome> {
        // Step 2: persist the user message, auto-title if needed.
        self.persist_message(conversation_id, "user", content, None, None, None, None, None)
            .await?;
        self.maybe_autotitle(conversation_id, principal_id, content).await?;

        // Step 3: rate limit check (pre).
        let status = self
            .rate_limiter
            .check(principal_id)
            .await
            .map_err(|e| DomainError::internal(e, "rate_limiter_check"))?;
        if status.warning {
            self.push_registry
                .send_to_principal(
                    principal_id,
                    PushEvent::RateLimitWarning {
                        usage_percent: status.percent_used,
                        remaining_tokens: (status.token_limit - status.tokens_used).max(0),
                    },
                )
                .await;
        }
        if status.over_limit {
            self.push_registry
                .send_to_principal(
                    principal_id,
                    PushEvent::RateLimitExceeded {
                        resets_in_seconds: status.resets_in_seconds,
                    },
                )
                .await;
            return Err(DomainError::RateLimit {
                resets_in_seconds: status.resets_in_seconds,
            });
        }

        // Step 4: load + prune message history.
        let history = self.load_messages(conversation_id).await?;
        let pruned = prune_messages(history, MAX_CONTEXT_MESSAGES, CONTEXT_TOKEN_BUDGET);

        // Step 5: load dataset bindings.
        let bindings = self.load_dataset_bindings(conversation_id).await?;
        let datasets: Vec<DatasetSchemaRef> = bindings
            .iter()
            .map(|b| DatasetSchemaRef {
                table_name: b.name.clone(),
                row_count: b.row_count,
                columns: b.schema(),
            })
            .collect();

        // Step 6: selected model (optional).
        let selected_model = self.load_selected_model(principal_id).await?;

        // Step 7: announce generation start.
        self.push_registry
            .send_to_principal(principal_id, PushEvent::QueryStatus { phase: QueryPhase::Generating })
            .await;

        // Step 8: invoke the model.
        let request = ModelRequest {
            conversation_id: conversation_id.to_string(),
            messages: pruned,
            datasets,
            selected_model,
        };

        let sink = PushTokenSink {
            registry: self.push_registry.clone(),
            principal_id: principal_id.to_string(),
            message_id: Uuid::new_v4().to_string(),
        };
        let message_id = sink.message_id.clone();

        let executions = Arc::new(Mutex::new(Vec::new()));
        let tools = OrchestratorToolExecutor {
            query_cache: self.query_cache.clone(),
            worker_pool: self.worker_pool.clone(),
            bindings: bindings.clone(),
            executions: executions.clone(),
        };

        let cancel_rx_clone = cancel_rx.clone();
        let is_cancelled = move || *cancel_rx_clone.borrow();

        let stream_result = self
            .model_client
            .stream(&request, &sink, &tools, &is_cancelled)
            .await;

        let outcome = match stream_result {
            Ok(outcome) => outcome,
            Err(model_error) if model_error.is_rate_limit => {
                self.push_registry
                    .send_to_principal(
                        principal_id,
                        PushEvent::ChatError {
                            error: "The model is temporarily rate-limited. Please try again shortly.".to_string(),
                            details: None,
                        },
                    )
                    .await;
                return Err(DomainError::Internal {
                    message: model_error.message,
                    details: Some(model_error.kind.to_string()),
                });
            }
            Err(model_error) => {
                error!(error = %model_error, kind = model_error.kind, "model stream failed");
                self.push_registry
                    .send_to_principal(
                        principal_id,
                        PushEvent::ChatError {
                            error: model_error.message.clone(),
                            details: Some(model_error.kind.to_string()),
                        },
                    )
                    .await;
                return Err(DomainError::Internal {
                    message: model_error.message,
                    details: Some(model_error.kind.to_string()),
                });
            }
        };

        let sql_executions = Arc::try_unwrap(executions)
            .map(|m| m.into_inner())
            .unwrap_or_default();

        // Step 9: persist the assistant message.
        let storage_executions_json = serde_json::to_string(
            &sql_executions
                .iter()
                .map(|e| clamp_execution(e, STORAGE_ROW_CAP))
                .collect::<Vec<_>>(),
        )
        .unwrap_or_default();

        self.persist_message(
            conversation_id,
            "assistant",
            &outcome.content,
            Some(&storage_executions_json),
            outcome.reasoning.as_deref(),
            Some(outcome.input_tokens),
            Some(outcome.output_tokens),
            outcome.tool_call_trace.as_deref(),
        )
        .await?;

        // Step 10: record token usage.
        self.rate_limiter
            .record(
                principal_id,
                Some(conversation_id),
                request.selected_model.as_deref().unwrap_or("default"),
                outcome.input_tokens,
                outcome.output_tokens,
                0.0,
            )
            .await
            .map_err(|e| DomainError::internal(e, "rate_limiter_record"))?;

        // Step 11: chat_complete.
        let wire_executions: Vec<SqlExecution> = sql_executions
            .iter()
            .map(|e| clamp_execution(e, WIRE_ROW_CAP))
            .collect();

        self.push_registry
            .send_to_principal(
                principal_id,
                PushEvent::ChatComplete {
                    message_id: message_id.clone(),
                    sql_query: sql_executions.first().map(|e| e.query.clone()),
                    token_count: outcome.input_tokens + outcome.output_tokens,
                    sql_executions: wire_executions,
                    reasoning: outcome.reasoning.clone(),
                    input_tokens: outcome.input_tokens,
                    output_tokens: outcome.output_tokens,
                    tool_call_trace: outcome.tool_call_trace.clone(),
                },
            )
            .await;

        // Step 12: post-usage rate limit check.
        let post_status = self
            .rate_limiter
            .check(principal_id)
            .await
            .map_err(|e| DomainError::internal(e, "rate_limiter_check"))?;
        if post_status.warning {
            self.push_registry
                .send_to_principal(
                    principal_id,
                    PushEvent::RateLimitWarning {
                        usage_percent: post_status.percent_used,
                        remaining_tokens: (post_status.token_limit - post_status.tokens_used).max(0),
                    },
                )
                .await;
        }

        Ok(ProcessMessageOutcome {
            assistant_message_id: message_id,
            content: outcome.content,
            sql_executions,
            input_tokens: outcome.input_tokens,
            output_tokens: outcome.output_tokens,
        })
    }

    async fn persist_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
        sql_executions_json: Option<&str>,
        reasoning: Option<&str>,
        input_tokens: Option<i64>,
        output_tokens: Option<i64>,
        tool_call_trace: Option<&str>,
    ) -> DomainResult<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let token_count = input_tokens.unwrap_or(0) + output_tokens.unwrap_or(0);

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, conversation_id, role, content, sql_query, reasoning,
                token_count, input_tokens, output_tokens, tool_call_trace, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(role)
        .bind(content)
        .bind(sql_executions_json)
        .bind(reasoning)
        .bind(token_count)
        .bind(input_tokens)
        .bind(output_tokens)
        .bind(tool_call_trace)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| DomainError::internal(e, "persist_message"))?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(conversation_id)
            .execute(&self.db)
            .await
            .map_err(|e| DomainError::internal(e, "touch_conversation"))?;

        Ok(id)
    }

    async fn maybe_autotitle(&self, conversation_id: &str, principal_id: &str, content: &str) -> DomainResult<()> {
        let row = sqlx::query("SELECT title FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| DomainError::internal(e, "load_conversation_title"))?;

        let Some(row) = row else {
            return Ok(());
        };
        let title: String = row.get("title");
        if !title.is_empty() {
            return Ok(());
        }

        let new_title = truncate_title(content);
        sqlx::query("UPDATE conversations SET title = ? WHERE id = ?")
            .bind(&new_title)
            .bind(conversation_id)
            .execute(&self.db)
            .await
            .map_err(|e| DomainError::internal(e, "autotitle"))?;

        self.push_registry
            .send_to_principal(
                principal_id,
                PushEvent::ConversationTitleUpdated {
                    conversation_id: conversation_id.to_string(),
                    title: new_title,
                },
            )
            .await;

        Ok(())
    }

    async fn load_messages(&self, conversation_id: &str) -> DomainResult<Vec<Message>> {
        sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| DomainError::internal(e, "load_messages"))
    }

    async fn load_dataset_bindings(&self, conversation_id: &str) -> DomainResult<Vec<DatasetBinding>> {
        sqlx::query_as::<_, DatasetBinding>(
            "SELECT * FROM datasets WHERE conversation_id = ? ORDER BY loaded_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| DomainError::internal(e, "load_dataset_bindings"))
    }

    async fn load_selected_model(&self, principal_id: &str) -> DomainResult<Option<String>> {
        let row = sqlx::query("SELECT selected_model FROM user_settings WHERE user_id = ?")
            .bind(principal_id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| DomainError::internal(e, "load_selected_model"))?;

        Ok(row.and_then(|r| r.get::<Option<String>, _>("selected_model")))
    }
}

fn truncate_title(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    }
}

fn clamp_execution(execution: &SqlExecution, cap: usize) -> SqlExecution {
    SqlExecution {
        query: execution.query.clone(),
        columns: execution.columns.clone(),
        rows: execution.rows.iter().take(cap).cloned().collect(),
        full_rows: execution.full_rows.iter().take(cap).cloned().collect(),
        total_rows: execution.total_rows,
        error: execution.error.clone(),
        elapsed_ms: execution.elapsed_ms,
    }
}

/// Keeps at most `max_count` non-system messages (newest first), then evicts
/// oldest non-system messages until the estimated token budget is met.
/// System messages (none exist in this schema today, but the rule is kept
/// generic) are never evicted by either pass.
fn prune_messages(messages: Vec<Message>, max_count: usize, token_budget: usize) -> Vec<Message> {
    let is_system = |m: &Message| m.role == "system";

    let mut system: Vec<Message> = messages.iter().filter(|m| is_system(m)).cloned().collect();
    let mut non_system: Vec<Message> = messages.into_iter().filter(|m| !is_system(m)).collect();

    if non_system.len() > max_count {
        let drop = non_system.len() - max_count;
        non_system.drain(0..drop);
    }

    let estimate = |msgs: &[Message]| -> usize {
        msgs.iter().map(|m| m.content.len() / CHARS_PER_TOKEN).sum()
    };

    while !non_system.is_empty() && estimate(&system) + estimate(&non_system) > token_budget {
        non_system.remove(0);
    }

    system.append(&mut non_system);
    system.sort_by_key(|m| m.created_at);
    system
}

struct PushTokenSink {
    registry: Arc<PushRegistry>,
    principal_id: String,
    message_id: String,
}

#[async_trait::async_trait]
impl TokenSink for PushTokenSink {
    async fn token(&self, text: &str) {
        self.registry
            .send_to_principal(
                &self.principal_id,
                PushEvent::ChatToken {
                    token: text.to_string(),
                    message_id: self.message_id.clone(),
                },
            )
            .await;
    }
}

struct OrchestratorToolExecutor {
    query_cache: Arc<QueryCache>,
    worker_pool: Arc<WorkerPool>,
    bindings: Vec<DatasetBinding>,
    executions: Arc<Mutex<Vec<SqlExecution>>>,
}

#[async_trait::async_trait]
impl ToolExecutor for OrchestratorToolExecutor {
    async fn execute_sql(&self, sql: &str) -> SqlExecution {
        let urls: Vec<String> = self.bindings.iter().map(|b| b.url.clone()).collect();
        let key = query_cache::cache_key(sql, &urls);

        if let Some(cached) = self.query_cache.get(&key).await {
            let full_rows: Vec<serde_json::Value> =
                cached.rows.into_iter().map(serde_json::Value::Array).collect();
            let execution = SqlExecution {
                query: sql.to_string(),
                columns: cached.columns,
                rows: full_rows.iter().take(WIRE_ROW_CAP).cloned().collect(),
                full_rows,
                total_rows: cached.total_rows,
                error: None,
                elapsed_ms: 0,
            };
            self.executions.lock().await.push(execution.clone());
            return execution;
        }

        let datasets: Vec<QueryDataset> = self
            .bindings
            .iter()
            .map(|b| QueryDataset {
                url: b.url.clone(),
                table_name: b.name.clone(),
            })
            .collect();

        let result = self.worker_pool.run_query(sql, &datasets).await;

        if result.error.is_none() {
            self.query_cache
                .put(
                    &key,
                    &query_cache::CachedQueryResult {
                        columns: result.columns.clone(),
                        rows: result.rows.clone(),
                        total_rows: result.total_rows,
                    },
                )
                .await;
        } else {
            warn!(sql, error = ?result.error, "not caching sql execution with an error");
        }

        let full_rows: Vec<serde_json::Value> =
            result.rows.into_iter().map(serde_json::Value::Array).collect();
        let execution = SqlExecution {
            query: sql.to_string(),
            columns: result.columns,
            rows: full_rows.iter().take(WIRE_ROW_CAP).cloned().collect(),
            full_rows,
            total_rows: result.total_rows,
            error: result.error,
            elapsed_ms: result.elapsed_ms,
        };
        self.executions.lock().await.push(execution.clone());
        execution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, role: &str, content: &str, created_at: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            role: role.to_string(),
            content: content.to_string(),
            sql_query: None,
            reasoning: None,
            token_count: 0,
            input_tokens: None,
            output_tokens: None,
            tool_call_trace: None,
            created_at,
        }
    }

    #[test]
    fn title_is_not_truncated_when_short() {
        assert_eq!(truncate_title("hello"), "hello");
    }

    #[test]
    fn title_is_truncated_with_ellipsis_when_long() {
        let long = "a".repeat(80);
        let title = truncate_title(&long);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
    }

    #[test]
    fn prune_caps_message_count() {
        let messages: Vec<Message> = (0..60)
            .map(|i| msg(&i.to_string(), "user", "hi", i as i64))
            .collect();
        let pruned = prune_messages(messages, 50, 1_000_000);
        assert_eq!(pruned.len(), 50);
        assert_eq!(pruned.first().unwrap().id, "10");
    }

    #[test]
    fn prune_respects_token_budget_oldest_first() {
        let messages = vec![
            msg("1", "user", &"a".repeat(400), 1),
            msg("2", "user", &"a".repeat(400), 2),
            msg("3", "user", &"a".repeat(400), 3),
        ];
        // budget for ~200 tokens total (400 chars / 4 = 100 tokens per message)
        let pruned = prune_messages(messages, 50, 150);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].id, "3");
    }
}
