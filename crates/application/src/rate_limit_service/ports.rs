use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gatekeep_core::AppResult;
use gatekeep_domain::{RateLimitCheck, RateLimitDecision, RateLimitKey, RateLimitRecord};

/// Repository port for rate limit record persistence.
///
/// Implementations are shared by every caller and every process instance, so
/// all authoritative counter state lives behind this trait.
#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    /// Returns the single record stored for the key, if any.
    ///
    /// The record may describe an expired window; callers classify it against
    /// their own window start.
    async fn find(&self, key: &RateLimitKey) -> AppResult<Option<RateLimitRecord>>;

    /// Loads the record for `check.key()`, evaluates the check against it and
    /// persists the resulting record.
    ///
    /// The load, evaluation and write must be indivisible per key: two
    /// concurrent calls for the same key must observe each other's writes.
    async fn apply_check(&self, check: &RateLimitCheck) -> AppResult<RateLimitDecision>;

    /// Removes the record for the key unconditionally.
    async fn delete(&self, key: &RateLimitKey) -> AppResult<()>;

    /// Removes records last written before `cutoff` whose blocks have also
    /// ended before `cutoff`. Returns the number of removed records.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
