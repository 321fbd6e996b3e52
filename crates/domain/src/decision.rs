//! Rate limit decisions returned to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::RateLimitConfig;

/// Outcome of a rate limit check or status projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// Whether the caller may proceed.
    pub allowed: bool,
    /// Whether the actor is currently serving a block.
    pub blocked: bool,
    /// Checks left in the current window.
    pub remaining: u32,
    /// When the window or block ends.
    pub reset_time: DateTime<Utc>,
    /// Seconds the caller should wait before retrying; zero when allowed.
    pub retry_after_seconds: u64,
    /// Escalation tiers the actor has reached.
    pub escalation_level: u32,
}

impl RateLimitDecision {
    /// Builds an allowed decision.
    #[must_use]
    pub fn allowed(remaining: u32, reset_time: DateTime<Utc>, escalation_level: u32) -> Self {
        Self {
            allowed: true,
            blocked: false,
            remaining,
            reset_time,
            retry_after_seconds: 0,
            escalation_level,
        }
    }

    /// Builds a blocked decision.
    #[must_use]
    pub fn blocked(
        blocked_until: DateTime<Utc>,
        retry_after_seconds: u64,
        escalation_level: u32,
    ) -> Self {
        Self {
            allowed: false,
            blocked: true,
            remaining: 0,
            reset_time: blocked_until,
            retry_after_seconds,
            escalation_level,
        }
    }

    /// Builds the permissive decision returned while the record store is unusable.
    #[must_use]
    pub fn fail_open(config: &RateLimitConfig, now: DateTime<Utc>) -> Self {
        Self::allowed(
            config.max_attempts().saturating_sub(1),
            now + config.window(),
            0,
        )
    }
}

/// Whole seconds from `now` until `until`, rounded up.
#[must_use]
pub fn seconds_until(now: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }

    u64::try_from(millis).map_or(u64::MAX, |millis| millis.div_ceil(1000))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{RateLimitDecision, seconds_until};
    use crate::RateLimitConfig;

    #[test]
    fn seconds_until_rounds_partial_seconds_up() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_default();

        assert_eq!(seconds_until(now, now + Duration::milliseconds(1)), 1);
        assert_eq!(seconds_until(now, now + Duration::milliseconds(1_500)), 2);
        assert_eq!(seconds_until(now, now + Duration::seconds(900)), 900);
        assert_eq!(seconds_until(now, now - Duration::seconds(5)), 0);
    }

    #[test]
    fn fail_open_leaves_one_attempt_spent() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_default();
        let Ok(config) = RateLimitConfig::new(5, 60, 15) else {
            panic!("test config should be valid");
        };

        let decision = RateLimitDecision::fail_open(&config, now);
        assert!(decision.allowed);
        assert!(!decision.blocked);
        assert_eq!(decision.remaining, 4);
        assert_eq!(decision.retry_after_seconds, 0);
        assert_eq!(decision.reset_time, now + Duration::minutes(60));
    }
}
