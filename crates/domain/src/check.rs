//! Pure decision step shared by every record store adapter.
//!
//! Adapters load the current record, hand it to [`RateLimitCheck::evaluate`]
//! and persist whatever it returns, all inside one atomic section per key.

use chrono::{DateTime, Utc};

use crate::decision::seconds_until;
use crate::escalation::{compute_effective_policy, escalation_level};
use crate::{RateLimitConfig, RateLimitDecision, RateLimitKey, RateLimitRecord};

/// One check of one key against one policy at one instant.
#[derive(Debug, Clone)]
pub struct RateLimitCheck {
    key: RateLimitKey,
    config: RateLimitConfig,
    now: DateTime<Utc>,
}

/// Decision plus the record state to persist, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Decision returned to the caller.
    pub decision: RateLimitDecision,
    /// New record state; `None` means the store must not be written.
    pub record: Option<RateLimitRecord>,
}

impl RateLimitCheck {
    /// Creates a check.
    #[must_use]
    pub fn new(key: RateLimitKey, config: RateLimitConfig, now: DateTime<Utc>) -> Self {
        Self { key, config, now }
    }

    /// Returns the checked key.
    #[must_use]
    pub fn key(&self) -> &RateLimitKey {
        &self.key
    }

    /// Returns the policy applied by this check.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Returns the instant this check is evaluated at.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Start of the oldest window still counting at `now`.
    #[must_use]
    pub fn window_start_cutoff(&self) -> DateTime<Utc> {
        self.now - self.config.window()
    }

    /// Counts one attempt against `existing` and decides whether it may proceed.
    #[must_use]
    pub fn evaluate(&self, existing: Option<&RateLimitRecord>) -> CheckOutcome {
        let now = self.now;

        if let Some(record) = existing.filter(|record| record.is_blocked_at(now)) {
            return CheckOutcome {
                decision: self.blocked_decision(record),
                record: None,
            };
        }

        let open_window = existing.filter(|record| self.counts_towards_window(record));
        let new_attempts = open_window
            .map(|record| record.attempts.saturating_add(1))
            .unwrap_or(1);
        let window_start = open_window
            .map(|record| record.window_start)
            .unwrap_or(now);

        let total_violations = existing
            .map(|record| record.total_violations)
            .unwrap_or(0);
        let carried_level = existing
            .map(|record| record.escalation_level)
            .unwrap_or(0);
        let policy = compute_effective_policy(&self.config, total_violations);

        let mut record = RateLimitRecord {
            identifier: self.key.identifier().to_owned(),
            action: self.key.action().to_owned(),
            attempts: new_attempts,
            window_start,
            window_end: window_start + self.config.window(),
            blocked_until: open_window.and_then(|record| record.blocked_until),
            escalation_level: carried_level,
            total_violations,
            updated_at: now,
        };

        if new_attempts > policy.max_attempts {
            let blocked_until = now + policy.block_duration();
            let total_violations = total_violations.saturating_add(1);

            record.blocked_until = Some(
                existing
                    .and_then(|previous_record| previous_record.blocked_until)
                    .map_or(blocked_until, |previous| previous.max(blocked_until)),
            );
            record.total_violations = total_violations;
            record.escalation_level =
                carried_level.max(escalation_level(&self.config, total_violations));

            let decision = RateLimitDecision::blocked(
                blocked_until,
                u64::from(policy.block_duration_minutes) * 60,
                record.escalation_level,
            );

            return CheckOutcome {
                decision,
                record: Some(record),
            };
        }

        CheckOutcome {
            decision: RateLimitDecision::allowed(
                policy.max_attempts - new_attempts,
                window_start + policy.window(),
                carried_level,
            ),
            record: Some(record),
        }
    }

    /// Describes what the next check would see without counting an attempt.
    #[must_use]
    pub fn project(&self, existing: Option<&RateLimitRecord>) -> RateLimitDecision {
        if let Some(record) = existing.filter(|record| record.is_blocked_at(self.now)) {
            return self.blocked_decision(record);
        }

        let open_window = existing.filter(|record| self.counts_towards_window(record));
        let total_violations = existing
            .map(|record| record.total_violations)
            .unwrap_or(0);
        let escalation_level = existing
            .map(|record| record.escalation_level)
            .unwrap_or(0);
        let policy = compute_effective_policy(&self.config, total_violations);

        let (used, reset_time) = open_window.map_or_else(
            || (0, self.now + policy.window()),
            |record| (record.attempts, record.window_start + policy.window()),
        );
        let remaining = policy.max_attempts.saturating_sub(used);

        RateLimitDecision {
            allowed: remaining > 0,
            blocked: false,
            remaining,
            reset_time,
            retry_after_seconds: 0,
            escalation_level,
        }
    }

    fn counts_towards_window(&self, record: &RateLimitRecord) -> bool {
        record.is_window_open(self.window_start_cutoff(), self.now)
    }

    fn blocked_decision(&self, record: &RateLimitRecord) -> RateLimitDecision {
        let blocked_until = record.blocked_until.unwrap_or(self.now);
        RateLimitDecision::blocked(
            blocked_until,
            seconds_until(self.now, blocked_until),
            record.escalation_level,
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::RateLimitCheck;
    use crate::{EscalationTier, RateLimitConfig, RateLimitKey, RateLimitRecord};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .unwrap_or_default()
    }

    fn config() -> RateLimitConfig {
        match RateLimitConfig::new(5, 60, 15) {
            Ok(config) => config,
            Err(error) => panic!("test config should be valid: {error}"),
        }
    }

    fn key() -> RateLimitKey {
        match RateLimitKey::new("a@b.com", "signin") {
            Ok(key) => key,
            Err(error) => panic!("test key should be valid: {error}"),
        }
    }

    fn run(
        config: &RateLimitConfig,
        record: &mut Option<RateLimitRecord>,
        now: DateTime<Utc>,
    ) -> crate::RateLimitDecision {
        let check = RateLimitCheck::new(key(), config.clone(), now);
        let outcome = check.evaluate(record.as_ref());
        if let Some(next) = outcome.record {
            *record = Some(next);
        }
        outcome.decision
    }

    #[test]
    fn first_check_creates_a_fresh_window() {
        let now = start();
        let outcome = RateLimitCheck::new(key(), config(), now).evaluate(None);

        assert!(outcome.decision.allowed);
        assert_eq!(outcome.decision.remaining, 4);
        assert_eq!(outcome.decision.reset_time, now + Duration::minutes(60));

        let Some(record) = outcome.record else {
            panic!("first check must persist a record");
        };
        assert_eq!(record.attempts, 1);
        assert_eq!(record.window_start, now);
        assert_eq!(record.window_end, now + Duration::minutes(60));
        assert_eq!(record.blocked_until, None);
    }

    #[test]
    fn sixth_check_trips_the_block() {
        let config = config();
        let mut record = None;
        let mut remaining = Vec::new();

        for minute in 0..5 {
            let decision = run(&config, &mut record, start() + Duration::minutes(minute));
            assert!(decision.allowed);
            remaining.push(decision.remaining);
        }
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let now = start() + Duration::minutes(5);
        let decision = run(&config, &mut record, now);
        assert!(!decision.allowed);
        assert!(decision.blocked);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_seconds, 900);
        assert_eq!(decision.reset_time, now + Duration::minutes(15));
        assert_eq!(record.as_ref().map(|record| record.total_violations), Some(1));
    }

    #[test]
    fn checks_while_blocked_do_not_write() {
        let config = config();
        let mut record = None;
        for _ in 0..6 {
            run(&config, &mut record, start());
        }

        let later = start() + Duration::minutes(10);
        let outcome = RateLimitCheck::new(key(), config, later).evaluate(record.as_ref());
        assert!(outcome.decision.blocked);
        assert_eq!(outcome.decision.retry_after_seconds, 300);
        assert!(outcome.record.is_none());
    }

    #[test]
    fn elapsed_block_starts_a_fresh_window_but_keeps_violations() {
        let config = config();
        let mut record = None;
        for _ in 0..6 {
            run(&config, &mut record, start());
        }

        let after_block = start() + Duration::minutes(16);
        let decision = run(&config, &mut record, after_block);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);

        let Some(record) = record else {
            panic!("record should exist after checks");
        };
        assert_eq!(record.attempts, 1);
        assert_eq!(record.window_start, after_block);
        assert_eq!(record.blocked_until, None);
        assert_eq!(record.total_violations, 1);
    }

    #[test]
    fn expired_window_without_block_restarts_the_count() {
        let config = config();
        let mut record = None;
        for _ in 0..3 {
            run(&config, &mut record, start());
        }

        let decision = run(&config, &mut record, start() + Duration::minutes(61));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn tenth_violation_uses_the_escalated_block() {
        let Ok(config) = config().with_escalation_tiers(vec![EscalationTier::new(10, 60)]) else {
            panic!("escalated test config should be valid");
        };

        let mut record = None;
        let mut now = start();
        let mut retry_after = Vec::new();

        for _ in 0..10 {
            let mut last = None;
            for _ in 0..6 {
                last = Some(run(&config, &mut record, now));
            }
            let Some(decision) = last else {
                panic!("each cycle must produce a decision");
            };
            assert!(decision.blocked);
            retry_after.push(decision.retry_after_seconds);
            now += Duration::seconds(i64::try_from(decision.retry_after_seconds).unwrap_or(0) + 1);
        }

        assert!(retry_after[..9].iter().all(|seconds| *seconds == 900));
        assert_eq!(retry_after[9], 3600);
        assert_eq!(record.map(|record| record.escalation_level), Some(1));
    }

    #[test]
    fn project_reports_remaining_without_counting() {
        let config = config();
        let mut record = None;
        run(&config, &mut record, start());
        run(&config, &mut record, start());

        let check = RateLimitCheck::new(key(), config, start() + Duration::minutes(1));
        let status = check.project(record.as_ref());
        assert!(status.allowed);
        assert_eq!(status.remaining, 3);
        assert_eq!(status.reset_time, start() + Duration::minutes(60));

        let fresh = check.project(None);
        assert_eq!(fresh.remaining, 5);
    }

    #[test]
    fn project_reports_exhausted_window_as_not_allowed() {
        let config = config();
        let mut record = None;
        for _ in 0..5 {
            run(&config, &mut record, start());
        }

        let status = RateLimitCheck::new(key(), config, start()).project(record.as_ref());
        assert!(!status.allowed);
        assert!(!status.blocked);
        assert_eq!(status.remaining, 0);
    }
}
