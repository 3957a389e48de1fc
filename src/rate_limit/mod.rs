// src/rate_limit/mod.rs
// Rolling 24-hour token budget per principal, backed by the token_usage
// table. A short-TTL in-memory cache absorbs repeated status checks within
// a single conversation turn without re-scanning the usage table each time.

use std::time::Duration;

use chrono::Utc;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub tokens_used: i64,
    pub token_limit: i64,
    pub percent_used: f64,
    pub over_limit: bool,
    pub warning: bool,
    /// Seconds until the oldest in-window record ages out. Only meaningful
    /// while `over_limit`; 0 otherwise.
    pub resets_in_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_cost: f64,
    pub request_count: i64,
}

pub struct RateLimiter {
    db: SqlitePool,
    token_limit: i64,
    warning_threshold_percent: f64,
    window_secs: i64,
    status_cache: Cache<String, RateLimitStatus>,
}

impl RateLimiter {
    pub fn new(
        db: SqlitePool,
        token_limit: i64,
        warning_threshold_percent: f64,
        status_cache_ttl_secs: u64,
        window_secs: i64,
    ) -> Self {
        let status_cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(status_cache_ttl_secs))
            .build();

        Self {
            db,
            token_limit,
            warning_threshold_percent,
            window_secs,
            status_cache,
        }
    }

    /// Returns the current rolling-window status, using the short-TTL cache
    /// when present. A cached `over_limit` answer can be briefly stale; the
    /// tradeoff favors fewer usage-table scans under burst traffic.
    pub async fn check(&self, user_id: &str) -> sqlx::Result<RateLimitStatus> {
        if let Some(status) = self.status_cache.get(user_id) {
            return Ok(status);
        }

        let status = self.compute_status(user_id).await?;
        self.status_cache.insert(user_id.to_string(), status.clone());
        Ok(status)
    }

    async fn compute_status(&self, user_id: &str) -> sqlx::Result<RateLimitStatus> {
        let now = Utc::now().timestamp();
        let since = now - self.window_secs;
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(input_tokens + output_tokens), 0) as used,
                MIN(timestamp) as oldest
            FROM token_usage
            WHERE user_id = ? AND timestamp >= ?
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.db)
        .await?;

        let tokens_used: i64 = row.get("used");
        let oldest: Option<i64> = row.get("oldest");
        let percent_used = if self.token_limit > 0 {
            (tokens_used as f64 / self.token_limit as f64) * 100.0
        } else {
            0.0
        };
        let over_limit = tokens_used >= self.token_limit;

        // Defined only while over the limit: the moment the oldest in-window
        // record ages out of the window and the usage sum drops below it.
        let resets_in_seconds = if over_limit {
            oldest.map(|t| (t + self.window_secs - now).max(0)).unwrap_or(0)
        } else {
            0
        };

        Ok(RateLimitStatus {
            tokens_used,
            token_limit: self.token_limit,
            percent_used,
            over_limit,
            warning: percent_used >= self.warning_threshold_percent,
            resets_in_seconds,
        })
    }

    /// Records token usage for a completed request and invalidates the
    /// cached status so the next check reflects it.
    pub async fn record(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        model_name: &str,
        input_tokens: i64,
        output_tokens: i64,
        cost: f64,
    ) -> sqlx::Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO token_usage (
                id, user_id, conversation_id, model_name,
                input_tokens, output_tokens, cost, timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(conversation_id)
        .bind(model_name)
        .bind(input_tokens)
        .bind(output_tokens)
        .bind(cost)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.status_cache.invalidate(user_id);
        debug!(user_id, input_tokens, output_tokens, "recorded token usage");
        Ok(())
    }

    pub async fn usage_since(&self, user_id: &str, since: i64) -> sqlx::Result<UsageReport> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(input_tokens), 0) as input_tokens,
                COALESCE(SUM(output_tokens), 0) as output_tokens,
                COALESCE(SUM(cost), 0.0) as cost,
                COUNT(*) as requests
            FROM token_usage
            WHERE user_id = ? AND timestamp >= ?
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.db)
        .await?;

        Ok(UsageReport {
            total_input_tokens: row.get("input_tokens"),
            total_output_tokens: row.get("output_tokens"),
            total_cost: row.get("cost"),
            request_count: row.get("requests"),
        })
    }

    pub async fn usage_in_range(&self, user_id: &str, start: i64, end: i64) -> sqlx::Result<UsageReport> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(input_tokens), 0) as input_tokens,
                COALESCE(SUM(output_tokens), 0) as output_tokens,
                COALESCE(SUM(cost), 0.0) as cost,
                COUNT(*) as requests
            FROM token_usage
            WHERE user_id = ? AND timestamp >= ? AND timestamp < ?
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.db)
        .await?;

        Ok(UsageReport {
            total_input_tokens: row.get("input_tokens"),
            total_output_tokens: row.get("output_tokens"),
            total_cost: row.get("cost"),
            request_count: row.get("requests"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE token_usage (
                id TEXT PRIMARY KEY, user_id TEXT, conversation_id TEXT, model_name TEXT,
                input_tokens INTEGER, output_tokens INTEGER, cost REAL, timestamp INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn fresh_user_is_under_limit() {
        let db = memory_db().await;
        let limiter = RateLimiter::new(db, 1000, 80.0, 60, 86_400);
        let status = limiter.check("u1").await.unwrap();
        assert!(!status.over_limit);
        assert_eq!(status.tokens_used, 0);
    }

    #[tokio::test]
    async fn recording_usage_pushes_status_over_limit() {
        let db = memory_db().await;
        let limiter = RateLimiter::new(db, 100, 80.0, 60, 86_400);
        limiter.record("u1", None, "gpt-5.1", 60, 50, 0.01).await.unwrap();
        let status = limiter.check("u1").await.unwrap();
        assert!(status.over_limit);
    }

    #[tokio::test]
    async fn warning_threshold_trips_before_hard_limit() {
        let db = memory_db().await;
        let limiter = RateLimiter::new(db, 100, 50.0, 60, 86_400);
        limiter.record("u1", None, "gpt-5.1", 40, 20, 0.01).await.unwrap();
        let status = limiter.check("u1").await.unwrap();
        assert!(status.warning);
        assert!(!status.over_limit);
    }

    #[tokio::test]
    async fn old_usage_outside_window_does_not_count() {
        let db = memory_db().await;
        sqlx::query(
            "INSERT INTO token_usage (id, user_id, conversation_id, model_name, input_tokens, output_tokens, cost, timestamp) VALUES (?, ?, NULL, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind("u1")
        .bind("gpt-5.1")
        .bind(1000)
        .bind(1000)
        .bind(0.5)
        .bind(Utc::now().timestamp() - 90_000)
        .execute(&db)
        .await
        .unwrap();
        let limiter = RateLimiter::new(db, 100, 80.0, 60, 86_400);
        let status = limiter.check("u1").await.unwrap();
        assert_eq!(status.tokens_used, 0);
    }

    #[tokio::test]
    async fn resets_in_seconds_is_zero_when_under_limit() {
        let db = memory_db().await;
        let limiter = RateLimiter::new(db, 1000, 80.0, 60, 86_400);
        limiter.record("u1", None, "gpt-5.1", 10, 10, 0.01).await.unwrap();
        let status = limiter.check("u1").await.unwrap();
        assert!(!status.over_limit);
        assert_eq!(status.resets_in_seconds, 0);
    }

    #[tokio::test]
    async fn resets_in_seconds_tracks_oldest_record_aging_out() {
        let db = memory_db().await;
        let window_secs = 86_400;
        let age = 1_000;
        sqlx::query(
            "INSERT INTO token_usage (id, user_id, conversation_id, model_name, input_tokens, output_tokens, cost, timestamp) VALUES (?, ?, NULL, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind("u1")
        .bind("gpt-5.1")
        .bind(200)
        .bind(0)
        .bind(0.0)
        .bind(Utc::now().timestamp() - age)
        .execute(&db)
        .await
        .unwrap();
        let limiter = RateLimiter::new(db, 100, 80.0, 60, window_secs);
        let status = limiter.check("u1").await.unwrap();
        assert!(status.over_limit);
        // Oldest record ages out at `age` seconds before now plus the
        // window, so resets_in_seconds should be close to window - age.
        let expected = window_secs - age;
        assert!((status.resets_in_seconds - expected).abs() <= 2);
    }

    #[tokio::test]
    async fn resets_in_seconds_uses_configurable_window_not_a_fixed_constant() {
        let db = memory_db().await;
        let window_secs = 3_600;
        sqlx::query(
            "INSERT INTO token_usage (id, user_id, conversation_id, model_name, input_tokens, output_tokens, cost, timestamp) VALUES (?, ?, NULL, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind("u1")
        .bind("gpt-5.1")
        .bind(200)
        .bind(0)
        .bind(0.0)
        .bind(Utc::now().timestamp())
        .execute(&db)
        .await
        .unwrap();
        let limiter = RateLimiter::new(db, 100, 80.0, 60, window_secs);
        let status = limiter.check("u1").await.unwrap();
        assert!(status.over_limit);
        assert!(status.resets_in_seconds <= window_secs);
    }
}
