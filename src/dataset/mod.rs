// src/dataset/mod.rs
// Binds remote tabular files to a conversation: validates the URL, fetches
// its schema through the worker pool, and persists the binding so the
// orchestrator can reference it by name in generated SQL.

use std::sync::Arc;

use chrono::Utc;
use serde_json;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{DatasetBinding, DatasetStatus, DomainError, DomainResult};
use crate::worker::WorkerPool;

const MAX_BINDINGS_PER_CONVERSATION: i64 = 50;

fn is_well_formed_url(url: &str) -> bool {
    if url.chars().any(|c| c.is_whitespace()) {
        return false;
    }
    url.starts_with("http://") || url.starts_with("https://")
}

pub struct DatasetService {
    db: SqlitePool,
    worker_pool: Arc<WorkerPool>,
}

impl DatasetService {
    pub fn new(db: SqlitePool, worker_pool: Arc<WorkerPool>) -> Self {
        Self { db, worker_pool }
    }

    pub fn validate_url(&self, url: &str) -> DomainResult<()> {
        if is_well_formed_url(url) {
            Ok(())
        } else {
            Err(DomainError::Validation("Invalid URL format".to_string()))
        }
    }

    pub async fn add_dataset(
        &self,
        conversation_id: &str,
        url: &str,
        name: Option<&str>,
    ) -> DomainResult<DatasetBinding> {
        self.validate_url(url)?;

        let existing: i64 = sqlx::query(
            "SELECT COUNT(*) as count FROM datasets WHERE conversation_id = ? AND url = ?",
        )
        .bind(conversation_id)
        .bind(url)
        .fetch_one(&self.db)
        .await
        .map_err(|e| DomainError::Internal { message: "failed to check existing datasets".into(), details: Some(e.to_string()) })?
        .get("count");
        if existing > 0 {
            return Err(DomainError::Conflict);
        }

        let count: i64 = sqlx::query("SELECT COUNT(*) as count FROM datasets WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_one(&self.db)
            .await
            .map_err(|e| DomainError::Internal { message: "failed to count datasets".into(), details: Some(e.to_string()) })?
            .get("count");
        if count >= MAX_BINDINGS_PER_CONVERSATION {
            return Err(DomainError::Validation(format!(
                "this conversation already has the maximum of {} datasets",
                MAX_BINDINGS_PER_CONVERSATION
            )));
        }

        let validation = self.worker_pool.validate_url(url).await;
        if !validation.valid {
            return Err(DomainError::Validation(
                validation.error.unwrap_or_else(|| "dataset validation failed".into()),
            ));
        }

        let schema_result = self.worker_pool.get_schema(url).await;
        if let Some(error) = schema_result.error {
            return Err(DomainError::Validation(error));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let default_name = format!("table{}", count + 1);
        let name = name.unwrap_or(&default_name);
        let schema_json = serde_json::to_string(&schema_result.columns).unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO datasets (
                id, conversation_id, url, name, row_count, column_count,
                schema_json, status, error_message, loaded_at, file_size_bytes, column_descriptions
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, NULL)
            "#,
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(url)
        .bind(name)
        .bind(schema_result.row_count as i64)
        .bind(schema_result.columns.len() as i64)
        .bind(&schema_json)
        .bind(DatasetStatus::Ready.as_str())
        .bind(now)
        .bind(validation.file_size_bytes.map(|v| v as i64))
        .execute(&self.db)
        .await
        .map_err(|e| DomainError::Internal { message: "failed to persist dataset binding".into(), details: Some(e.to_string()) })?;

        info!(conversation_id, url, name, "dataset added");

        Ok(DatasetBinding {
            id,
            conversation_id: conversation_id.to_string(),
            url: url.to_string(),
            name: name.to_string(),
            row_count: schema_result.row_count as i64,
            column_count: schema_result.columns.len() as i64,
            schema_json,
            status: DatasetStatus::Ready.as_str().to_string(),
            error_message: None,
            loaded_at: now,
            file_size_bytes: validation.file_size_bytes.map(|v| v as i64),
            column_descriptions: None,
        })
    }

    pub async fn remove_dataset(&self, dataset_id: &str) -> DomainResult<()> {
        sqlx::query("DELETE FROM datasets WHERE id = ?")
            .bind(dataset_id)
            .execute(&self.db)
            .await
            .map_err(|e| DomainError::Internal { message: "failed to remove dataset".into(), details: Some(e.to_string()) })?;
        Ok(())
    }

    /// Re-runs validation and schema extraction against the stored URL. A
    /// failure leaves the existing row untouched rather than marking it
    /// errored, so a transient network blip never destroys a working binding.
    pub async fn refresh_schema(&self, dataset_id: &str) -> DomainResult<DatasetBinding> {
        let row = sqlx::query_as::<_, DatasetBinding>("SELECT * FROM datasets WHERE id = ?")
            .bind(dataset_id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| DomainError::Internal { message: "failed to load dataset".into(), details: Some(e.to_string()) })?
            .ok_or_else(|| DomainError::NotFound("dataset not found".into()))?;

        let validation = self.worker_pool.validate_url(&row.url).await;
        if !validation.valid {
            warn!(dataset_id, error = ?validation.error, "schema refresh validation failed, leaving binding unchanged");
            return Ok(row);
        }

        let schema_result = self.worker_pool.get_schema(&row.url).await;
        if schema_result.error.is_some() {
            warn!(dataset_id, error = ?schema_result.error, "schema refresh failed, leaving binding unchanged");
            return Ok(row);
        }

        let now = Utc::now().timestamp();
        let schema_json = serde_json::to_string(&schema_result.columns).unwrap_or_default();

        sqlx::query(
            r#"
            UPDATE datasets
            SET row_count = ?, column_count = ?, schema_json = ?, loaded_at = ?, file_size_bytes = ?
            WHERE id = ?
            "#,
        )
        .bind(schema_result.row_count as i64)
        .bind(schema_result.columns.len() as i64)
        .bind(&schema_json)
        .bind(now)
        .bind(validation.file_size_bytes.map(|v| v as i64))
        .bind(dataset_id)
        .execute(&self.db)
        .await
        .map_err(|e| DomainError::Internal { message: "failed to update dataset".into(), details: Some(e.to_string()) })?;

        Ok(DatasetBinding {
            row_count: schema_result.row_count as i64,
            column_count: schema_result.columns.len() as i64,
            schema_json,
            loaded_at: now,
            file_size_bytes: validation.file_size_bytes.map(|v| v as i64),
            ..row
        })
    }

    pub async fn list_datasets(&self, conversation_id: &str) -> DomainResult<Vec<DatasetBinding>> {
        sqlx::query_as::<_, DatasetBinding>(
            "SELECT * FROM datasets WHERE conversation_id = ? ORDER BY loaded_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| DomainError::Internal { message: "failed to list datasets".into(), details: Some(e.to_string()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_scheme_and_whitespace() {
        assert!(is_well_formed_url("https://example.com/data.csv"));
        assert!(is_well_formed_url("http://example.com/data.csv"));
        assert!(!is_well_formed_url("ftp://example.com/data.csv"));
        assert!(!is_well_formed_url("https://example.com/data with spaces.csv"));
    }
}
