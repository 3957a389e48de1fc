// src/auth/jwt.rs

use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id.
    pub sub: String,
    /// Session row id in the `sessions` table. The signature alone is not
    /// authoritative — the session store is, since a session can be revoked
    /// or have its sliding-window expiry extended independently of `exp`.
    pub sid: String,
    pub exp: i64,
    pub iat: i64,
}

fn get_jwt_secret() -> String {
    env::var("TABLECHAT_JWT_SECRET").unwrap_or_else(|_| "dev-insecure-secret-change-me".to_string())
}

pub fn create_token(principal_id: &str, session_id: &str, expires_at: i64) -> Result<String> {
    let claims = Claims {
        sub: principal_id.to_string(),
        sid: session_id.to_string(),
        exp: expires_at,
        iat: chrono::Utc::now().timestamp(),
    };

    let header = Header::default();
    let key = EncodingKey::from_secret(get_jwt_secret().as_bytes());

    encode(&header, &claims, &key).map_err(|e| anyhow!("failed to sign session token: {}", e))
}

pub fn verify_token(token: &str) -> Result<Claims> {
    let key = DecodingKey::from_secret(get_jwt_secret().as_bytes());
    let validation = Validation::default();

    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| anyhow!("invalid session token: {}", e))
}
