use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gatekeep_core::{AppError, AppResult};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::ports::{Clock, RateLimitRepository, SystemClock};

/// Hours a record is retained after its last write.
pub const DEFAULT_RETENTION_HOURS: u32 = 24;

/// Seconds between two cleanup passes.
pub const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 300;

/// Periodic deletion of stale rate limit records.
///
/// Only bounds storage growth. A failed pass is logged and retried on the next
/// tick.
#[derive(Clone)]
pub struct RateLimitCleanupJob {
    repository: Arc<dyn RateLimitRepository>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
    interval: Duration,
}

impl RateLimitCleanupJob {
    /// Creates a cleanup job.
    pub fn new(
        repository: Arc<dyn RateLimitRepository>,
        retention_hours: u32,
        interval: Duration,
    ) -> AppResult<Self> {
        if retention_hours == 0 {
            return Err(AppError::Validation(
                "rate limit retention must be at least one hour".to_owned(),
            ));
        }

        if interval.is_zero() {
            return Err(AppError::Validation(
                "rate limit cleanup interval must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            repository,
            clock: Arc::new(SystemClock),
            retention: chrono::Duration::hours(i64::from(retention_hours)),
            interval,
        })
    }

    /// Replaces the clock used to compute the retention cutoff.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs a single cleanup pass and returns the number of removed records.
    pub async fn run_once(&self) -> AppResult<u64> {
        let cutoff = self.clock.now() - self.retention;
        self.repository.delete_older_than(cutoff).await
    }

    /// Runs cleanup passes on a fixed interval until `shutdown` resolves.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            retention_hours = self.retention.num_hours(),
            interval_seconds = self.interval.as_secs(),
            "rate limit cleanup job started"
        );

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => match self.run_once().await {
                    Ok(0) => debug!("rate limit cleanup found nothing to remove"),
                    Ok(removed) => info!(removed, "removed stale rate limit records"),
                    Err(error) => warn!(error = %error, "rate limit cleanup failed, retrying next tick"),
                },
            }
        }

        info!("rate limit cleanup job stopped");
    }
}
