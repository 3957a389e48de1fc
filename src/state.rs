// src/state.rs
// Application state: wires the chat-over-datasets core into one shared,
// cloneable handle passed to every HTTP/WS handler.

use std::sync::Arc;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::auth::{PrincipalService, ReferralKeyService, SessionService};
use crate::config::CONFIG;
use crate::dataset::DatasetService;
use crate::file_cache::FileCache;
use crate::orchestrator::model::UnconfiguredModelClient;
use crate::orchestrator::ChatOrchestrator;
use crate::push::PushRegistry;
use crate::query_cache::QueryCache;
use crate::rate_limit::RateLimiter;
use crate::schema;
use crate::worker::WorkerPool;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub sqlite_pool: SqlitePool,
    pub principal_service: Arc<PrincipalService>,
    pub session_service: Arc<SessionService>,
    pub referral_key_service: Arc<ReferralKeyService>,
    pub file_cache: Arc<FileCache>,
    pub worker_pool: Arc<WorkerPool>,
    pub query_cache: Arc<QueryCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub push_registry: Arc<PushRegistry>,
    pub dataset_service: Arc<DatasetService>,
    pub orchestrator: Arc<ChatOrchestrator>,
}

impl AppState {
    pub async fn new() -> anyhow::Result<Self> {
        CONFIG.validate()?;

        info!(url = %CONFIG.database.url, "connecting to database");
        let pool = SqlitePoolOptions::new()
            .max_connections(CONFIG.database.max_connections)
            .connect(&CONFIG.database.url)
            .await?;

        info!("initializing database schema");
        schema::init_schema(&pool).await?;

        info!("initializing auth services");
        let principal_service = Arc::new(PrincipalService::new(pool.clone()));
        let session_service = Arc::new(SessionService::new(pool.clone()));
        let referral_key_service = Arc::new(ReferralKeyService::new(pool.clone()));

        info!(dir = %CONFIG.file_cache.cache_dir, "initializing file cache");
        let file_cache = Arc::new(FileCache::new(
            CONFIG.file_cache.cache_dir.clone(),
            CONFIG.file_cache.max_file_bytes,
            CONFIG.file_cache.max_cache_bytes,
            CONFIG.file_cache.download_timeout_secs,
        )?);

        info!(pool_size = CONFIG.worker.pool_size, "initializing worker pool");
        let worker_pool = Arc::new(WorkerPool::new(CONFIG.worker.clone(), file_cache.clone()));

        info!("initializing query cache");
        let query_cache = Arc::new(QueryCache::new(
            pool.clone(),
            CONFIG.query_cache.memory_capacity,
            CONFIG.query_cache.memory_ttl_secs,
            CONFIG.query_cache.durable_max_entries,
            CONFIG.query_cache.durable_ttl_secs,
        ));

        info!("initializing rate limiter");
        let rate_limiter = Arc::new(RateLimiter::new(
            pool.clone(),
            CONFIG.rate_limit.token_limit,
            CONFIG.rate_limit.warning_threshold_percent,
            CONFIG.rate_limit.status_cache_ttl_secs,
            CONFIG.rate_limit.window_secs,
        ));

        info!("initializing push registry");
        let push_registry = Arc::new(PushRegistry::new());

        info!("initializing dataset service");
        let dataset_service = Arc::new(DatasetService::new(pool.clone(), worker_pool.clone()));

        info!("initializing chat orchestrator");
        let orchestrator = Arc::new(ChatOrchestrator::new(
            pool.clone(),
            rate_limiter.clone(),
            query_cache.clone(),
            worker_pool.clone(),
            push_registry.clone(),
            Arc::new(UnconfiguredModelClient),
        ));

        info!("application state initialized");

        Ok(Self {
            sqlite_pool: pool,
            principal_service,
            session_service,
            referral_key_service,
            file_cache,
            worker_pool,
            query_cache,
            rate_limiter,
            push_registry,
            dataset_service,
            orchestrator,
        })
    }
}
