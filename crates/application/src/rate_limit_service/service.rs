use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gatekeep_core::{AppError, AppResult};
use gatekeep_domain::{RateLimitCheck, RateLimitDecision, RateLimitKey};
use tracing::{info, warn};

use super::config::RateLimitPolicies;
use super::ports::{Clock, RateLimitRepository, SystemClock};

/// Application service for progressive rate limiting.
///
/// Holds no counter state of its own; every decision is read from and written
/// to the repository. Store failures fail open.
#[derive(Clone)]
pub struct RateLimitService {
    repository: Arc<dyn RateLimitRepository>,
    policies: Arc<RateLimitPolicies>,
    clock: Arc<dyn Clock>,
    store_timeout: Option<Duration>,
}

impl RateLimitService {
    /// Creates a new rate limit service using the system clock.
    #[must_use]
    pub fn new(repository: Arc<dyn RateLimitRepository>, policies: RateLimitPolicies) -> Self {
        Self {
            repository,
            policies: Arc::new(policies),
            clock: Arc::new(SystemClock),
            store_timeout: None,
        }
    }

    /// Replaces the clock used to timestamp checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bounds every repository call; an elapsed bound counts as a store failure.
    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    /// Returns the policy table used by this service.
    #[must_use]
    pub fn policies(&self) -> &RateLimitPolicies {
        self.policies.as_ref()
    }

    /// Counts one attempt for `(identifier, action)` and decides whether it may
    /// proceed.
    ///
    /// Returns `Err(AppError::Validation)` for blank input and
    /// `Err(AppError::Configuration)` for unusable policy state. Every other
    /// failure yields a permissive decision.
    pub async fn check(&self, identifier: &str, action: &str) -> AppResult<RateLimitDecision> {
        let key = RateLimitKey::new(identifier, action)?;
        let config = self.policies.resolve(key.action()).clone();
        let check = RateLimitCheck::new(key, config, self.clock.now());

        match self
            .within_store_timeout(self.repository.apply_check(&check))
            .await
        {
            Ok(decision) => {
                if decision.blocked {
                    info!(
                        identifier_kind = %check.key().identifier_kind(),
                        action = %check.key().action(),
                        retry_after_seconds = decision.retry_after_seconds,
                        escalation_level = decision.escalation_level,
                        "rate limit block in force"
                    );
                }
                Ok(decision)
            }
            Err(error) => self.fail_open(&check, error, "check"),
        }
    }

    /// Projects the decision the next check would receive without counting an
    /// attempt.
    pub async fn status(&self, identifier: &str, action: &str) -> AppResult<RateLimitDecision> {
        let key = RateLimitKey::new(identifier, action)?;
        let config = self.policies.resolve(key.action()).clone();
        let check = RateLimitCheck::new(key, config, self.clock.now());

        match self
            .within_store_timeout(self.repository.find(check.key()))
            .await
        {
            Ok(record) => Ok(check.project(record.as_ref())),
            Err(error) => self.fail_open(&check, error, "status"),
        }
    }

    /// Forgets everything recorded for `(identifier, action)`, including the
    /// lifetime violation count.
    pub async fn reset(&self, identifier: &str, action: &str) -> AppResult<()> {
        let key = RateLimitKey::new(identifier, action)?;

        self.within_store_timeout(self.repository.delete(&key)).await?;

        info!(
            identifier_kind = %key.identifier_kind(),
            action = %key.action(),
            "rate limit record reset"
        );

        Ok(())
    }

    fn fail_open(
        &self,
        check: &RateLimitCheck,
        error: AppError,
        operation: &'static str,
    ) -> AppResult<RateLimitDecision> {
        if let AppError::Configuration(_) = error {
            return Err(error);
        }

        warn!(
            identifier_kind = %check.key().identifier_kind(),
            action = %check.key().action(),
            operation,
            error = %error,
            degraded = true,
            "rate limit store unavailable, allowing request"
        );

        Ok(RateLimitDecision::fail_open(check.config(), check.now()))
    }

    async fn within_store_timeout<T>(
        &self,
        operation: impl Future<Output = AppResult<T>>,
    ) -> AppResult<T> {
        let Some(limit) = self.store_timeout else {
            return operation.await;
        };

        tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| {
                AppError::Store(format!(
                    "rate limit store did not respond within {} ms",
                    limit.as_millis()
                ))
            })?
    }
}
