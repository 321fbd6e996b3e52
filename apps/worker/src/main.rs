//! Gatekeep rate limit cleanup worker.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use gatekeep_application::{
    DEFAULT_CLEANUP_INTERVAL_SECONDS, DEFAULT_RETENTION_HOURS, RateLimitCleanupJob,
    RateLimitRepository,
};
use gatekeep_core::{AppError, AppResult};
use gatekeep_infrastructure::PostgresRateLimitRepository;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
enum WorkerStore {
    Postgres { database_url: String },
    /// Redis records expire by TTL, so there is nothing to clean up.
    Redis,
}

impl WorkerStore {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres { .. } => "postgres",
            Self::Redis => "redis",
        }
    }
}

#[derive(Debug, Clone)]
struct WorkerConfig {
    store: WorkerStore,
    retention_hours: u32,
    cleanup_interval_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let WorkerStore::Postgres { database_url } = &config.store else {
        info!(
            store = config.store.as_str(),
            "rate limit records expire by TTL, gatekeep-worker has nothing to clean up"
        );
        return Ok(());
    };

    let pool = connect_pool(database_url.as_str()).await?;
    let repository: Arc<dyn RateLimitRepository> = Arc::new(PostgresRateLimitRepository::new(pool));
    let job = RateLimitCleanupJob::new(
        repository,
        config.retention_hours,
        Duration::from_secs(config.cleanup_interval_seconds),
    )?;

    info!(
        store = config.store.as_str(),
        retention_hours = config.retention_hours,
        cleanup_interval_seconds = config.cleanup_interval_seconds,
        "gatekeep-worker started"
    );

    job.run_until(shutdown_signal()).await;

    info!("gatekeep-worker stopped");
    Ok(())
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Store(format!("failed to connect to database: {error}")))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let store = match lookup("RATE_LIMIT_STORE")
            .unwrap_or_else(|| "postgres".to_owned())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "postgres" => WorkerStore::Postgres {
                database_url: lookup("DATABASE_URL").ok_or_else(|| {
                    AppError::Validation("DATABASE_URL is required".to_owned())
                })?,
            },
            "redis" => WorkerStore::Redis,
            "memory" => {
                return Err(AppError::Validation(
                    "RATE_LIMIT_STORE=memory keeps records inside the API process; the worker needs 'postgres' or 'redis'"
                        .to_owned(),
                ));
            }
            other => {
                return Err(AppError::Validation(format!(
                    "RATE_LIMIT_STORE must be one of 'postgres', 'redis' or 'memory', got '{other}'"
                )));
            }
        };

        let retention_hours = parse_value(
            "RATE_LIMIT_RETENTION_HOURS",
            lookup("RATE_LIMIT_RETENTION_HOURS"),
            DEFAULT_RETENTION_HOURS,
        )?;
        let cleanup_interval_seconds = parse_value(
            "RATE_LIMIT_CLEANUP_INTERVAL_SECONDS",
            lookup("RATE_LIMIT_CLEANUP_INTERVAL_SECONDS"),
            DEFAULT_CLEANUP_INTERVAL_SECONDS,
        )?;

        if retention_hours == 0 {
            return Err(AppError::Validation(
                "RATE_LIMIT_RETENTION_HOURS must be greater than zero".to_owned(),
            ));
        }

        if cleanup_interval_seconds == 0 {
            return Err(AppError::Validation(
                "RATE_LIMIT_CLEANUP_INTERVAL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            store,
            retention_hours,
            cleanup_interval_seconds,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn parse_value<T>(name: &str, value: Option<String>, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(value) => value.trim().parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use gatekeep_core::AppError;

    use super::{WorkerConfig, WorkerStore};

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, AppError> {
        let vars = vars
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect::<HashMap<_, _>>();
        WorkerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn postgres_store_requires_database_url() {
        assert!(matches!(load(&[]), Err(AppError::Validation(_))));

        let Ok(config) = load(&[("DATABASE_URL", "postgres://localhost/gatekeep")]) else {
            panic!("config should load");
        };
        assert!(matches!(config.store, WorkerStore::Postgres { .. }));
        assert_eq!(config.retention_hours, 24);
        assert_eq!(config.cleanup_interval_seconds, 300);
    }

    #[test]
    fn redis_store_needs_no_connection_settings() {
        let Ok(config) = load(&[("RATE_LIMIT_STORE", "Redis")]) else {
            panic!("config should load");
        };
        assert!(matches!(config.store, WorkerStore::Redis));
    }

    #[test]
    fn memory_and_unknown_stores_are_rejected() {
        assert!(matches!(
            load(&[("RATE_LIMIT_STORE", "memory")]),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            load(&[("RATE_LIMIT_STORE", "sqlite")]),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn zero_retention_is_rejected() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/gatekeep"),
            ("RATE_LIMIT_RETENTION_HOURS", "0"),
        ]);
        assert!(matches!(config, Err(AppError::Validation(_))));
    }
}
