use std::env;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use gatekeep_application::{DEFAULT_CLEANUP_INTERVAL_SECONDS, DEFAULT_RETENTION_HOURS};
use gatekeep_core::{AppError, AppResult};
use tracing_subscriber::EnvFilter;

const DEFAULT_REDIS_KEY_PREFIX: &str = "gatekeep:rate_limit";
const DEFAULT_STORE_TIMEOUT_MS: u64 = 500;

/// Backing store for rate limit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitStoreConfig {
    Postgres,
    Redis,
    InMemory,
}

impl RateLimitStoreConfig {
    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::InMemory),
            other => Err(AppError::Validation(format!(
                "RATE_LIMIT_STORE must be one of 'postgres', 'redis' or 'memory', got '{other}'"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Redis => "redis",
            Self::InMemory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub migrate_only: bool,
    pub rate_limit_store: RateLimitStoreConfig,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub redis_key_prefix: String,
    pub policy_file: Option<String>,
    pub store_timeout: Duration,
    pub retention_hours: u32,
    pub cleanup_interval: Duration,
    pub api_host: String,
    pub api_port: u16,
}

impl ApiConfig {
    pub fn load() -> AppResult<Self> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");
        Self::from_lookup(migrate_only, |name| env::var(name).ok())
    }

    fn from_lookup(
        migrate_only: bool,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> AppResult<Self> {
        let optional = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let rate_limit_store = optional("RATE_LIMIT_STORE")
            .map(|value| RateLimitStoreConfig::parse(value.as_str()))
            .transpose()?
            .unwrap_or(RateLimitStoreConfig::Postgres);

        let database_url = optional("DATABASE_URL");
        if database_url.is_none() && migrate_only {
            return Err(AppError::Validation(
                "DATABASE_URL is required to apply migrations".to_owned(),
            ));
        }
        if database_url.is_none() && rate_limit_store == RateLimitStoreConfig::Postgres {
            return Err(AppError::Validation(
                "DATABASE_URL is required when RATE_LIMIT_STORE=postgres".to_owned(),
            ));
        }

        let redis_url = optional("REDIS_URL");
        if redis_url.is_none() && rate_limit_store == RateLimitStoreConfig::Redis {
            return Err(AppError::Validation(
                "REDIS_URL is required when RATE_LIMIT_STORE=redis".to_owned(),
            ));
        }

        let store_timeout_ms = parse_value(
            "RATE_LIMIT_STORE_TIMEOUT_MS",
            optional("RATE_LIMIT_STORE_TIMEOUT_MS"),
            DEFAULT_STORE_TIMEOUT_MS,
        )?;
        let retention_hours = parse_value(
            "RATE_LIMIT_RETENTION_HOURS",
            optional("RATE_LIMIT_RETENTION_HOURS"),
            DEFAULT_RETENTION_HOURS,
        )?;
        let cleanup_interval_seconds = parse_value(
            "RATE_LIMIT_CLEANUP_INTERVAL_SECONDS",
            optional("RATE_LIMIT_CLEANUP_INTERVAL_SECONDS"),
            DEFAULT_CLEANUP_INTERVAL_SECONDS,
        )?;

        if store_timeout_ms == 0 {
            return Err(AppError::Validation(
                "RATE_LIMIT_STORE_TIMEOUT_MS must be greater than zero".to_owned(),
            ));
        }

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
            migrate_only,
            rate_limit_store,
            database_url,
            redis_url,
            redis_key_prefix: optional("RATE_LIMIT_REDIS_KEY_PREFIX")
                .unwrap_or_else(|| DEFAULT_REDIS_KEY_PREFIX.to_owned()),
            policy_file: optional("RATE_LIMIT_POLICY_FILE"),
            store_timeout: Duration::from_millis(store_timeout_ms),
            retention_hours,
            cleanup_interval: Duration::from_secs(cleanup_interval_seconds),
            api_host: optional("API_HOST").unwrap_or_else(|| "127.0.0.1".to_owned()),
            api_port: parse_value("API_PORT", optional("API_PORT"), 3001)?,
        })
    }

    pub fn socket_address(&self) -> AppResult<SocketAddr> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::Validation(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn parse_value<T>(name: &str, value: Option<String>, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    match value {
        Some(value) => value.parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}
