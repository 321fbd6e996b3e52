use std::sync::Arc;

use gatekeep_application::{
    RateLimitCleanupJob, RateLimitPolicies, RateLimitRepository, RateLimitService,
};
use gatekeep_core::{AppError, AppResult};
use gatekeep_infrastructure::{
    InMemoryRateLimitRepository, PostgresRateLimitRepository, RedisRateLimitRepository,
};
use sqlx::PgPool;
use tracing::info;

use crate::api_config::{ApiConfig, RateLimitStoreConfig};
use crate::state::AppState;

use super::redis::build_redis_client;

/// Everything the API process runs.
pub struct ApiServices {
    pub app_state: AppState,
    /// Set only when records live in this process.
    pub cleanup_job: Option<RateLimitCleanupJob>,
}

pub fn build_app_state(config: &ApiConfig, postgres_pool: Option<PgPool>) -> AppResult<ApiServices> {
    let redis_client = config
        .redis_url
        .as_deref()
        .map(build_redis_client)
        .transpose()?;

    let policies = match config.policy_file.as_deref() {
        Some(path) => RateLimitPolicies::from_json_file(path)?,
        None => RateLimitPolicies::builtin()?,
    };

    let repository: Arc<dyn RateLimitRepository> = match config.rate_limit_store {
        RateLimitStoreConfig::Postgres => {
            let pool = postgres_pool.clone().ok_or_else(|| {
                AppError::Validation(
                    "DATABASE_URL is required when RATE_LIMIT_STORE=postgres".to_owned(),
                )
            })?;
            Arc::new(PostgresRateLimitRepository::new(pool))
        }
        RateLimitStoreConfig::Redis => {
            let redis_client = redis_client.clone().ok_or_else(|| {
                AppError::Validation("REDIS_URL is required when RATE_LIMIT_STORE=redis".to_owned())
            })?;
            Arc::new(
                RedisRateLimitRepository::new(redis_client, config.redis_key_prefix.as_str())
                    .with_retention_hours(config.retention_hours),
            )
        }
        RateLimitStoreConfig::InMemory => Arc::new(InMemoryRateLimitRepository::new()),
    };

    let cleanup_job = match config.rate_limit_store {
        RateLimitStoreConfig::InMemory => Some(RateLimitCleanupJob::new(
            repository.clone(),
            config.retention_hours,
            config.cleanup_interval,
        )?),
        RateLimitStoreConfig::Postgres | RateLimitStoreConfig::Redis => None,
    };

    info!(
        store = config.rate_limit_store.as_str(),
        policy_file = config.policy_file.as_deref().unwrap_or("builtin"),
        actions = ?policies.action_names(),
        store_timeout = ?config.store_timeout,
        "rate limit service configured"
    );

    Ok(ApiServices {
        app_state: AppState {
            rate_limit_service: RateLimitService::new(repository, policies)
                .with_store_timeout(config.store_timeout),
            rate_limit_store: config.rate_limit_store,
            postgres_pool,
            redis_client,
        },
        cleanup_job,
    })
}
