use gatekeep_application::RateLimitService;
use sqlx::PgPool;

use crate::api_config::RateLimitStoreConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub rate_limit_service: RateLimitService,
    pub rate_limit_store: RateLimitStoreConfig,
    pub postgres_pool: Option<PgPool>,
    pub redis_client: Option<redis::Client>,
}
