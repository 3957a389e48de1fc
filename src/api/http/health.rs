// src/api/http/health.rs
// Health check and readiness endpoints for load balancers and process
// supervisors. Carry no domain semantics.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    db: &'static str,
    file_cache: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    schema: &'static str,
}

/// `GET /health` - 200 if the SQLite pool answers and the file cache
/// directory is writable, else 503.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.sqlite_pool).await.is_ok();
    let cache_ok = state.file_cache.is_writable();

    let response = HealthResponse {
        status: if db_ok && cache_ok { "healthy" } else { "unhealthy" },
        db: if db_ok { "ok" } else { "error" },
        file_cache: if cache_ok { "ok" } else { "error" },
    };

    if db_ok && cache_ok {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// `GET /ready` - 200 once the schema has created the `users` table.
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let schema_ok = sqlx::query("SELECT 1 FROM users LIMIT 1")
        .fetch_optional(&state.sqlite_pool)
        .await
        .is_ok();

    let response = ReadyResponse {
        status: if schema_ok { "ready" } else { "not_ready" },
        schema: if schema_ok { "applied" } else { "pending" },
    };

    if schema_ok {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// `GET /live` - unconditional 200.
pub async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "alive"})))
}
