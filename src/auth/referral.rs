// src/auth/referral.rs
// One-shot referral keys gating first-time principal creation.

use anyhow::{anyhow, Result};
use sqlx::SqlitePool;

pub struct ReferralKeyService {
    db: SqlitePool,
}

impl ReferralKeyService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Consumes a referral key, failing if it is missing, unknown, or
    /// already used. An empty key is treated as missing.
    pub async fn consume(&self, key: &str, used_by: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(anyhow!("referral key is required"));
        }

        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE referral_keys SET used_by = ?, used_at = ? WHERE key = ? AND used_by IS NULL",
        )
        .bind(used_by)
        .bind(now)
        .bind(key)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("referral key is invalid or already used"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE referral_keys (key TEXT PRIMARY KEY, created_by TEXT, used_by TEXT, created_at INTEGER, used_at INTEGER)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO referral_keys (key, created_at) VALUES (?, ?)")
            .bind("abc123")
            .bind(chrono::Utc::now().timestamp())
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn consumes_once() {
        let pool = setup().await;
        let svc = ReferralKeyService::new(pool);
        svc.consume("abc123", "p1").await.unwrap();
        assert!(svc.consume("abc123", "p2").await.is_err());
    }

    #[tokio::test]
    async fn empty_key_is_missing() {
        let pool = setup().await;
        let svc = ReferralKeyService::new(pool);
        assert!(svc.consume("", "p1").await.is_err());
        assert!(svc.consume("   ", "p1").await.is_err());
    }

    #[tokio::test]
    async fn unknown_key_rejected() {
        let pool = setup().await;
        let svc = ReferralKeyService::new(pool);
        assert!(svc.consume("does-not-exist", "p1").await.is_err());
    }
}
