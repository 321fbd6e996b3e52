use redis::AsyncCommands;
use sqlx::PgPool;

use crate::api_config::RateLimitStoreConfig;
use crate::dto::StoreHealthStatus;

fn store_error(backend: RateLimitStoreConfig, detail: String) -> StoreHealthStatus {
    StoreHealthStatus {
        backend: backend.as_str(),
        status: "error",
        detail: Some(detail),
    }
}

pub(super) async fn check_postgres(pool: Option<&PgPool>) -> StoreHealthStatus {
    let backend = RateLimitStoreConfig::Postgres;
    let Some(pool) = pool else {
        return store_error(backend, "postgres pool is not configured".to_owned());
    };

    let check = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await;

    match check {
        Ok(_) => StoreHealthStatus {
            backend: backend.as_str(),
            status: "ok",
            detail: None,
        },
        Err(error) => store_error(backend, format!("postgres check failed: {error}")),
    }
}

pub(super) async fn check_redis(redis_client: Option<&redis::Client>) -> StoreHealthStatus {
    let backend = RateLimitStoreConfig::Redis;
    let Some(redis_client) = redis_client else {
        return store_error(backend, "redis client is not configured".to_owned());
    };

    let mut connection = match redis_client.get_multiplexed_async_connection().await {
        Ok(connection) => connection,
        Err(error) => return store_error(backend, format!("redis connection failed: {error}")),
    };

    match connection.ping::<String>().await {
        Ok(value) if value.eq_ignore_ascii_case("pong") => StoreHealthStatus {
            backend: backend.as_str(),
            status: "ok",
            detail: None,
        },
        Ok(value) => store_error(backend, format!("unexpected redis ping response: {value}")),
        Err(error) => store_error(backend, format!("redis ping failed: {error}")),
    }
}
