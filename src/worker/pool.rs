// src/worker/pool.rs
// Bounded-concurrency pool of isolated SQL/dataset tasks. Each capability
// wraps a blocking-thread invocation with a hard timeout; callers never see
// a thrown exception, only a structured WorkerError.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::worker::WorkerConfig;
use crate::domain::ColumnSchema;
use crate::file_cache::FileCache;

use super::engine::{self, DatasetRef};
use super::error::WorkerError;
use super::ssrf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateUrlResult {
    pub valid: bool,
    pub file_size_bytes: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaResult {
    pub columns: Vec<ColumnSchema>,
    pub row_count: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDataset {
    pub url: String,
    pub table_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub total_rows: u64,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

const MAX_WIRE_ROWS: usize = 1000;
const MAX_FILE_SIZE_BYTES: u64 = 500 * 1024 * 1024;

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    config: WorkerConfig,
    file_cache: Arc<FileCache>,
    http: reqwest::Client,
    tasks_completed: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig, file_cache: Arc<FileCache>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.pool_size)),
            config,
            file_cache,
            http: reqwest::Client::new(),
            tasks_completed: AtomicU64::new(0),
        }
    }

    fn note_task_completed(&self) {
        let n = self.tasks_completed.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.config.max_tasks_per_child as u64 == 0 {
            debug!(tasks_completed = n, "worker recycle boundary reached");
        }
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, WorkerError>
    where
        F: std::future::Future<Output = Result<T, WorkerError>>,
    {
        match tokio::time::timeout(Duration::from_secs(self.config.task_timeout_secs), fut).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::timeout(format!(
                "worker task exceeded the {}s limit",
                self.config.task_timeout_secs
            ))),
        }
    }

    pub async fn validate_url(&self, url: &str) -> ValidateUrlResult {
        match self.validate_url_inner(url).await {
            Ok(result) => result,
            Err(e) => ValidateUrlResult {
                valid: false,
                file_size_bytes: None,
                error: Some(e.message),
            },
        }
    }

    async fn validate_url_inner(&self, url: &str) -> Result<ValidateUrlResult, WorkerError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| WorkerError::internal("worker pool closed"))?;

        self.with_timeout(async {
            let parsed = Url::parse(url).map_err(|_| WorkerError::validation("Invalid URL format"))?;
            ssrf::check_scheme(&parsed)?;
            ssrf::check_host_safety(&parsed, self.config.allow_private_urls).await?;

            if parsed.scheme() == "file" {
                self.note_task_completed();
                return Ok(ValidateUrlResult {
                    valid: true,
                    file_size_bytes: None,
                    error: None,
                });
            }

            let head = self
                .http
                .head(url)
                .send()
                .await
                .map_err(|e| WorkerError::network(format!("HEAD request failed: {}", e)))?;

            let size = head
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());

            if let Some(size) = size {
                if size > MAX_FILE_SIZE_BYTES {
                    return Err(WorkerError::validation(format!(
                        "dataset is {} bytes, exceeding the {} byte limit",
                        size, MAX_FILE_SIZE_BYTES
                    )));
                }
            }

            // Small GET to confirm the server actually serves bytes; full
            // validation of magic bytes happens implicitly when the SQL
            // engine opens the file during get_schema/run_query.
            let probe = self
                .http
                .get(url)
                .header(reqwest::header::RANGE, "bytes=0-255")
                .send()
                .await
                .map_err(|e| WorkerError::network(format!("GET probe failed: {}", e)))?;

            if !probe.status().is_success() && probe.status() != reqwest::StatusCode::PARTIAL_CONTENT {
                return Err(WorkerError::network(format!(
                    "GET probe returned status {}",
                    probe.status()
                )));
            }

            self.note_task_completed();
            Ok(ValidateUrlResult {
                valid: true,
                file_size_bytes: size,
                error: None,
            })
        })
        .await
    }

    pub async fn get_schema(&self, url: &str) -> SchemaResult {
        match self.get_schema_inner(url).await {
            Ok(result) => result,
            Err(e) => SchemaResult {
                columns: Vec::new(),
                row_count: 0,
                error: Some(e.message),
            },
        }
    }

    async fn get_schema_inner(&self, url: &str) -> Result<SchemaResult, WorkerError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| WorkerError::internal("worker pool closed"))?;

        let path = self.file_cache.download(url).await?;

        self.with_timeout(run_blocking(move || {
            let conn = duckdb::Connection::open_in_memory()
                .map_err(|e| WorkerError::internal(format!("failed to open SQL engine: {}", e)))?;
            let dataset = DatasetRef {
                path: &path,
                table_name: "dataset",
            };
            engine::register_dataset(&conn, &dataset)?;
            let (columns, row_count) = engine::describe_dataset(&conn, "dataset")?;
            Ok((columns, row_count))
        }))
        .await
        .map(|(columns, row_count)| {
            self.note_task_completed();
            SchemaResult {
                columns,
                row_count,
                error: None,
            }
        })
    }

    pub async fn run_query(&self, sql: &str, datasets: &[QueryDataset]) -> QueryResult {
        let started = std::time::Instant::now();
        match self.run_query_inner(sql, datasets).await {
            Ok(mut result) => {
                result.elapsed_ms = started.elapsed().as_millis() as u64;
                result
            }
            Err(e) => QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                total_rows: 0,
                elapsed_ms: started.elapsed().as_millis() as u64,
                error: Some(translate_engine_error(&e)),
            },
        }
    }

    async fn run_query_inner(&self, sql: &str, datasets: &[QueryDataset]) -> Result<QueryResult, WorkerError> {
        super::sql_safety::reject_non_select(sql)?;
        let sql = super::sql_safety::ensure_row_limit(sql);

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| WorkerError::internal("worker pool closed"))?;

        let mut local_paths: Vec<(PathBuf, String)> = Vec::with_capacity(datasets.len());
        for d in datasets {
            let path = self.file_cache.download(&d.url).await?;
            local_paths.push((path, d.table_name.clone()));
        }

        let result = self
            .with_timeout(run_blocking(move || {
                let conn = duckdb::Connection::open_in_memory()
                    .map_err(|e| WorkerError::internal(format!("failed to open SQL engine: {}", e)))?;
                for (path, table_name) in &local_paths {
                    engine::register_dataset(
                        &conn,
                        &DatasetRef {
                            path,
                            table_name,
                        },
                    )?;
                }
                let (columns, rows) = engine::run_select(&conn, &sql).map_err(|e| {
                    let table_names: Vec<&str> =
                        local_paths.iter().map(|(_, name)| name.as_str()).collect();
                    let available = engine::available_columns(&conn, &table_names);
                    if available.is_empty() {
                        e
                    } else {
                        e.with_details(available.join(", "))
                    }
                })?;
                Ok((columns, rows))
            }))
            .await;

        self.note_task_completed();

        let (columns, rows) = result?;
        let total_rows = rows.len() as u64;
        let clamped: Vec<Vec<serde_json::Value>> = rows.into_iter().take(MAX_WIRE_ROWS).collect();

        Ok(QueryResult {
            columns,
            rows: clamped,
            total_rows,
            elapsed_ms: 0,
            error: None,
        })
    }

    pub async fn terminate(&self) {
        info!("worker pool shutting down");
        // The semaphore has no outstanding acquire calls blocked forever:
        // in-flight tasks are bounded by their own per-task timeout, so a
        // plain drop of the pool is sufficient to let them drain.
        warn!("in-flight worker tasks will be abandoned at their own timeout");
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, WorkerError>
where
    F: FnOnce() -> Result<T, WorkerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WorkerError::internal(format!("worker task panicked: {}", e)))?
}

fn translate_engine_error(e: &WorkerError) -> String {
    crate::error_translator::translate(&e.message, e.details.as_deref())
}
