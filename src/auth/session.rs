// src/auth/session.rs
// Sliding-window session store. Sessions are created on login, extended on
// every successful validation, and destroyed on logout or expiry.

use anyhow::{anyhow, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::CONFIG;
use crate::domain::Session;

use super::jwt::{create_token, verify_token, Claims};

pub struct SessionService {
    db: SqlitePool,
}

impl SessionService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Creates a new session row and returns a bearer token bound to it.
    pub async fn create_session(&self, principal_id: &str) -> Result<(Session, String)> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let expires_at = now + CONFIG.session.session_duration_days * 86_400;

        sqlx::query("INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(principal_id)
            .bind(now)
            .bind(expires_at)
            .execute(&self.db)
            .await?;

        let token = create_token(principal_id, &id, expires_at)?;
        let session = Session {
            id,
            user_id: principal_id.to_string(),
            created_at: now,
            expires_at,
        };

        Ok((session, token))
    }

    /// Validates a bearer token against the session store and slides the
    /// expiry window forward. Fails if the session is missing or expired.
    pub async fn validate(&self, token: &str) -> Result<(Claims, Session)> {
        let claims = verify_token(token)?;

        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
            .bind(&claims.sid)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| anyhow!("session not found"))?;

        let now = chrono::Utc::now().timestamp();
        if session.is_expired(now) {
            sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(&session.id)
                .execute(&self.db)
                .await
                .ok();
            return Err(anyhow!("session expired"));
        }

        let new_expiry = now + CONFIG.session.session_duration_days * 86_400;
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE id = ?")
            .bind(new_expiry)
            .bind(&session.id)
            .execute(&self.db)
            .await?;

        Ok((
            claims,
            Session {
                expires_at: new_expiry,
                ..session
            },
        ))
    }

    pub async fn destroy(&self, token: &str) -> Result<()> {
        let claims = verify_token(token)?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(&claims.sid)
            .execute(&self.db)
            .await?;
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
            "CREATE TABLE sessions (id TEXT PRIMARY KEY, user_id TEXT, created_at INTEGER, expires_at INTEGER)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn create_then_validate_extends_window() {
        let pool = setup().await;
        let svc = SessionService::new(pool);
        let (session, token) = svc.create_session("p1").await.unwrap();
        assert_eq!(session.user_id, "p1");

        let (claims, validated) = svc.validate(&token).await.unwrap();
        assert_eq!(claims.sub, "p1");
        assert!(validated.expires_at >= session.expires_at);
    }

    #[tokio::test]
    async fn expired_session_fails_validation() {
        let pool = setup().await;
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
            .bind("sess-expired")
            .bind("p1")
            .bind(now - 10)
            .bind(now - 1)
            .execute(&pool)
            .await
            .unwrap();

        let token = create_token("p1", "sess-expired", now - 1).unwrap();
        let svc = SessionService::new(pool);
        assert!(svc.validate(&token).await.is_err());
    }

    #[tokio::test]
    async fn destroy_removes_session() {
        let pool = setup().await;
        let svc = SessionService::new(pool);
        let (_, token) = svc.create_session("p1").await.unwrap();
        svc.destroy(&token).await.unwrap();
        assert!(svc.validate(&token).await.is_err());
    }
}
