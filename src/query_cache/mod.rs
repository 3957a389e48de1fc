// src/query_cache/mod.rs
// Two-layer cache for SQL query results: an in-memory TTL/LRU layer (fast,
// process-local) backed by a durable SQLite layer (survives restarts,
// shared across workers). Reads check Layer A first, fall through to
// Layer B on miss, and repopulate Layer A; writes go to both layers.

use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedQueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub total_rows: u64,
}

#[derive(Debug, Clone, Default)]
pub struct QueryCacheStats {
    pub memory_entries: u64,
    pub durable_entries: i64,
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub durable_hits: u64,
}

/// Builds the cache key from the SQL text plus the bound dataset URLs, so
/// the cache is principal- and conversation-agnostic: the same query
/// against the same datasets always lands on the same entry, wherever it
/// was first computed. Dataset order doesn't matter (the URLs are sorted
/// before hashing); surrounding whitespace on the SQL is stripped.
pub fn cache_key(sql: &str, urls: &[String]) -> String {
    let mut sorted_urls: Vec<&str> = urls.iter().map(String::as_str).collect();
    sorted_urls.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(sql.trim().as_bytes());
    hasher.update(b"\0");
    hasher.update(sorted_urls.join("\0").as_bytes());
    hex::encode(hasher.finalize())
}

pub struct QueryCache {
    db: SqlitePool,
    memory: Cache<String, CachedQueryResult>,
    durable_ttl_secs: i64,
    durable_max_entries: i64,
    memory_hits: std::sync::atomic::AtomicU64,
    memory_misses: std::sync::atomic::AtomicU64,
    durable_hits: std::sync::atomic::AtomicU64,
}

impl QueryCache {
    pub fn new(
        db: SqlitePool,
        memory_capacity: u64,
        memory_ttl_secs: u64,
        durable_max_entries: i64,
        durable_ttl_secs: i64,
    ) -> Self {
        let memory = Cache::builder()
            .max_capacity(memory_capacity)
            .time_to_live(Duration::from_secs(memory_ttl_secs))
            .build();

        Self {
            db,
            memory,
            durable_ttl_secs,
            durable_max_entries,
            memory_hits: std::sync::atomic::AtomicU64::new(0),
            memory_misses: std::sync::atomic::AtomicU64::new(0),
            durable_hits: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &str) -> Option<CachedQueryResult> {
        if let Some(hit) = self.memory.get(key).await {
            self.memory_hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            debug!(key = &key[..8.min(key.len())], "query cache layer A hit");
            return Some(hit);
        }
        self.memory_misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        match self.get_durable(key).await {
            Ok(Some(result)) => {
                self.durable_hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                debug!(key = &key[..8.min(key.len())], "query cache layer B hit");
                self.memory.insert(key.to_string(), result.clone()).await;
                Some(result)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "query cache durable lookup failed, treating as miss");
                None
            }
        }
    }

    async fn get_durable(&self, key: &str) -> sqlx::Result<Option<CachedQueryResult>> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(
            "SELECT result_json FROM query_results_cache WHERE cache_key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.and_then(|r| {
            let json: String = r.get("result_json");
            serde_json::from_str(&json).ok()
        }))
    }

    /// Writes through to both layers. Durable-layer failures are logged and
    /// swallowed: a cache write must never fail the query that produced it.
    pub async fn put(&self, key: &str, result: &CachedQueryResult) {
        self.memory.insert(key.to_string(), result.clone()).await;

        let Ok(json) = serde_json::to_string(result) else {
            warn!("failed to serialize query result for durable cache");
            return;
        };
        let now = Utc::now().timestamp();
        let expires_at = now + self.durable_ttl_secs;

        let outcome = sqlx::query(
            r#"
            INSERT INTO query_results_cache (cache_key, result_json, created_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                result_json = excluded.result_json,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(&json)
        .bind(now)
        .bind(expires_at)
        .execute(&self.db)
        .await;

        if let Err(e) = outcome {
            warn!(error = %e, "failed to write durable query cache entry");
        }
    }

    pub async fn cleanup_expired(&self) -> sqlx::Result<i64> {
        let now = Utc::now().timestamp();
        let result = sqlx::query("DELETE FROM query_results_cache WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.db)
            .await?;
        let deleted = result.rows_affected() as i64;
        if deleted > 0 {
            info!(deleted, "cleaned up expired query cache entries");
        }
        Ok(deleted)
    }

    pub async fn cleanup_lru(&self) -> sqlx::Result<i64> {
        let count_row = sqlx::query("SELECT COUNT(*) as count FROM query_results_cache")
            .fetch_one(&self.db)
            .await?;
        let count: i64 = count_row.get("count");
        if count <= self.durable_max_entries {
            return Ok(0);
        }
        let to_delete = count - self.durable_max_entries;
        let result = sqlx::query(
            r#"
            DELETE FROM query_results_cache
            WHERE cache_key IN (
                SELECT cache_key FROM query_results_cache ORDER BY created_at ASC LIMIT ?
            )
            "#,
        )
        .bind(to_delete)
        .execute(&self.db)
        .await?;
        let deleted = result.rows_affected() as i64;
        if deleted > 0 {
            info!(deleted, limit = self.durable_max_entries, "trimmed query cache to its entry cap");
        }
        Ok(deleted)
    }

    pub async fn clear_all(&self) -> sqlx::Result<i64> {
        self.memory.invalidate_all();
        let result = sqlx::query("DELETE FROM query_results_cache").execute(&self.db).await?;
        let deleted = result.rows_affected() as i64;
        warn!(deleted, "cleared all query cache entries");
        Ok(deleted)
    }

    pub async fn stats(&self) -> QueryCacheStats {
        self.memory.run_pending_tasks().await;
        let durable_entries = sqlx::query("SELECT COUNT(*) as count FROM query_results_cache")
            .fetch_one(&self.db)
            .await
            .map(|r| r.get::<i64, _>("count"))
            .unwrap_or(0);

        QueryCacheStats {
            memory_entries: self.memory.entry_count(),
            durable_entries,
            memory_hits: self.memory_hits.load(std::sync::atomic::Ordering::Relaxed),
            memory_misses: self.memory_misses.load(std::sync::atomic::Ordering::Relaxed),
            durable_hits: self.durable_hits.load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE query_results_cache (cache_key TEXT PRIMARY KEY, result_json TEXT, created_at INTEGER, expires_at INTEGER)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    fn sample() -> CachedQueryResult {
        CachedQueryResult {
            columns: vec!["a".into()],
            rows: vec![vec![serde_json::json!(1)]],
            total_rows: 1,
        }
    }

    #[test]
    fn cache_key_is_stable_per_sql_and_dataset_set() {
        let urls = vec!["https://example.com/a.csv".to_string()];
        let other_urls = vec!["https://example.com/b.csv".to_string()];
        let a = cache_key("SELECT 1", &urls);
        let b = cache_key("SELECT 1", &urls);
        let c = cache_key("SELECT 1", &other_urls);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn cache_key_ignores_dataset_order_and_sql_whitespace() {
        let ordered = vec!["a".to_string(), "b".to_string()];
        let reordered = vec!["b".to_string(), "a".to_string()];
        assert_eq!(cache_key("SELECT 1", &ordered), cache_key("SELECT 1", &reordered));
        assert_eq!(cache_key("  SELECT 1  ", &ordered), cache_key("SELECT 1", &ordered));
    }

    #[test]
    fn cache_key_is_conversation_agnostic() {
        // Same sql + datasets must hash identically regardless of which
        // conversation computed it first.
        let urls = vec!["https://example.com/a.csv".to_string()];
        assert_eq!(cache_key("SELECT 1", &urls), cache_key("SELECT 1", &urls));
    }

    #[tokio::test]
    async fn put_then_get_hits_memory_layer() {
        let db = memory_db().await;
        let cache = QueryCache::new(db, 100, 300, 500, 3600);
        let key = cache_key("SELECT 1", &[]);
        cache.put(&key, &sample()).await;
        let hit = cache.get(&key).await;
        assert!(hit.is_some());
        let stats = cache.stats().await;
        assert_eq!(stats.memory_hits, 1);
    }

    #[tokio::test]
    async fn durable_layer_survives_memory_eviction() {
        let db = memory_db().await;
        let cache = QueryCache::new(db, 100, 300, 500, 3600);
        let key = cache_key("SELECT 1", &[]);
        cache.put(&key, &sample()).await;
        cache.memory.invalidate_all();
        cache.memory.run_pending_tasks().await;
        let hit = cache.get(&key).await;
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn clear_all_empties_both_layers() {
        let db = memory_db().await;
        let cache = QueryCache::new(db, 100, 300, 500, 3600);
        let key = cache_key("SELECT 1", &[]);
        cache.put(&key, &sample()).await;
        cache.clear_all().await.unwrap();
        assert!(cache.get(&key).await.is_none());
    }
}
