//! Gatekeep rate limit API composition root.

#![forbid(unsafe_code)]

mod api_config;
mod api_router;
mod api_services;
mod dto;
mod error;
mod handlers;
mod state;

use gatekeep_core::AppError;
use tracing::{info, warn};

use crate::api_config::{ApiConfig, RateLimitStoreConfig, init_tracing};
use crate::api_router::build_router;
use crate::api_services::{ApiServices, build_app_state, connect_and_migrate};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ApiConfig::load()?;

    let needs_database =
        config.migrate_only || config.rate_limit_store == RateLimitStoreConfig::Postgres;
    let postgres_pool = match config.database_url.as_deref() {
        Some(database_url) if needs_database => Some(connect_and_migrate(database_url).await?),
        _ => None,
    };

    if config.migrate_only {
        info!("database migrations applied successfully");
        return Ok(());
    }

    let ApiServices {
        app_state,
        cleanup_job,
    } = build_app_state(&config, postgres_pool)?;

    let cleanup_task = cleanup_job.map(|job| tokio::spawn(job.run_until(shutdown_signal())));

    let address = config.socket_address()?;
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(%address, store = config.rate_limit_store.as_str(), "gatekeep-api listening");

    axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| AppError::Internal(format!("api server error: {error}")))?;

    if let Some(cleanup_task) = cleanup_task {
        cleanup_task.await.map_err(|error| {
            AppError::Internal(format!("rate limit cleanup task failed: {error}"))
        })?;
    }

    info!("gatekeep-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
