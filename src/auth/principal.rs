// src/auth/principal.rs
// Principal lookup and first-time creation, gated by a referral key.

use anyhow::{anyhow, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::Principal;

use super::referral::ReferralKeyService;

pub struct PrincipalService {
    db: SqlitePool,
    referral_keys: ReferralKeyService,
}

impl PrincipalService {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            referral_keys: ReferralKeyService::new(db.clone()),
            db,
        }
    }

    pub async fn get(&self, principal_id: &str) -> Result<Principal> {
        sqlx::query_as::<_, Principal>("SELECT * FROM users WHERE id = ?")
            .bind(principal_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| anyhow!("principal not found"))
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Principal>> {
        let principal = sqlx::query_as::<_, Principal>("SELECT * FROM users WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(principal)
    }

    /// Returns the existing principal for `external_id`, or creates one if
    /// absent. Creation requires a valid, unconsumed referral key.
    pub async fn get_or_create(
        &self,
        external_id: &str,
        email: Option<&str>,
        name: &str,
        avatar_url: Option<&str>,
        referral_key: Option<&str>,
    ) -> Result<Principal> {
        if let Some(existing) = self.find_by_external_id(external_id).await? {
            self.touch_last_login(&existing.id).await?;
            return self.get(&existing.id).await;
        }

        let key = referral_key.unwrap_or("");
        let id = Uuid::new_v4().to_string();
        self.referral_keys.consume(key, &id).await?;

        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO users (id, external_id, email, name, avatar_url, created_at, last_login_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(external_id)
        .bind(email)
        .bind(name)
        .bind(avatar_url)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.get(&id).await
    }

    async fn touch_last_login(&self, principal_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
            .bind(now)
            .bind(principal_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
