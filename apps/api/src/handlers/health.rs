mod checks;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::api_config::RateLimitStoreConfig;
use crate::dto::{HealthResponse, StoreHealthStatus};
use crate::state::AppState;

use self::checks::{check_postgres, check_redis};

pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = match state.rate_limit_store {
        RateLimitStoreConfig::Postgres => check_postgres(state.postgres_pool.as_ref()).await,
        RateLimitStoreConfig::Redis => check_redis(state.redis_client.as_ref()).await,
        RateLimitStoreConfig::InMemory => StoreHealthStatus {
            backend: RateLimitStoreConfig::InMemory.as_str(),
            status: "ok",
            detail: None,
        },
    };

    let ready = store.status == "ok";
    let status = if ready { "ok" } else { "degraded" };
    let http_status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(HealthResponse {
            status,
            ready,
            store,
        }),
    )
}
