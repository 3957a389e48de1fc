// src/schema.rs
// Runtime schema bootstrap for the SQLite-backed persistent state. Idempotent:
// safe to run on every process start.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            email TEXT,
            name TEXT NOT NULL,
            avatar_url TEXT,
            created_at INTEGER NOT NULL,
            last_login_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            title TEXT NOT NULL DEFAULT '',
            is_pinned BOOLEAN NOT NULL DEFAULT FALSE,
            share_token TEXT UNIQUE,
            shared_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            sql_query TEXT,
            reasoning TEXT,
            token_count INTEGER NOT NULL DEFAULT 0,
            input_tokens INTEGER,
            output_tokens INTEGER,
            tool_call_trace TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS datasets (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            url TEXT NOT NULL,
            name TEXT NOT NULL,
            row_count INTEGER NOT NULL DEFAULT 0,
            column_count INTEGER NOT NULL DEFAULT 0,
            schema_json TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL,
            error_message TEXT,
            loaded_at INTEGER NOT NULL,
            file_size_bytes INTEGER,
            column_descriptions TEXT
        );

        CREATE TABLE IF NOT EXISTS token_usage (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            conversation_id TEXT REFERENCES conversations(id) ON DELETE SET NULL,
            model_name TEXT NOT NULL,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            cost REAL NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS referral_keys (
            key TEXT PRIMARY KEY,
            created_by TEXT,
            used_by TEXT,
            created_at INTEGER NOT NULL,
            used_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS user_settings (
            user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
            dev_mode BOOLEAN NOT NULL DEFAULT FALSE,
            selected_model TEXT
        );

        CREATE TABLE IF NOT EXISTS query_results_cache (
            cache_key TEXT PRIMARY KEY,
            sql_query TEXT,
            dataset_urls TEXT,
            result_json TEXT NOT NULL,
            row_count INTEGER,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_user_id ON conversations(user_id);
        CREATE INDEX IF NOT EXISTS idx_datasets_conversation_id ON datasets(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_messages_conversation_id ON messages(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_token_usage_user_timestamp ON token_usage(user_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_query_results_cache_expires_at ON query_results_cache(expires_at);
        "#,
    )
    .execute(pool)
    .await
    .context("failed to initialize database schema")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstraps_all_tables() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();

        for table in [
            "users",
            "sessions",
            "conversations",
            "messages",
            "datasets",
            "token_usage",
            "referral_keys",
            "user_settings",
            "query_results_cache",
        ] {
            sqlx::query(&format!("SELECT * FROM {} LIMIT 0", table))
                .fetch_all(&pool)
                .await
                .unwrap_or_else(|e| panic!("table {} missing: {}", table, e));
        }
    }

    #[tokio::test]
    async fn is_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();
    }
}
