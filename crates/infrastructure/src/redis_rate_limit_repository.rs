//! Redis-backed rate limit repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeep_application::{DEFAULT_RETENTION_HOURS, RateLimitRepository};
use gatekeep_core::{AppError, AppResult};
use gatekeep_domain::{
    RateLimitCheck, RateLimitDecision, RateLimitKey, RateLimitRecord, seconds_until,
};
use redis::{AsyncCommands, Script};
use tracing::debug;

const COMPARE_AND_SET_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false then
  current = ''
end

if current ~= ARGV[1] then
  return 0
end

redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
return 1
"#;

const MAX_COMPARE_AND_SET_ATTEMPTS: usize = 16;

/// Redis implementation of the rate limit repository port.
///
/// Records are stored as JSON and expire on their own, so cleanup passes have
/// nothing to remove.
#[derive(Clone)]
pub struct RedisRateLimitRepository {
    client: redis::Client,
    key_prefix: String,
    retention_seconds: u64,
}

impl RedisRateLimitRepository {
    /// Creates a repository with a configured Redis client and key prefix.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            retention_seconds: u64::from(DEFAULT_RETENTION_HOURS) * 3600,
        }
    }

    /// Sets how long a record outlives its last write.
    #[must_use]
    pub fn with_retention_hours(mut self, retention_hours: u32) -> Self {
        self.retention_seconds = u64::from(retention_hours.max(1)) * 3600;
        self
    }

    fn key_for(&self, key: &RateLimitKey) -> String {
        format!("{}:{}:{}", self.key_prefix, key.action(), key.identifier())
    }

    fn ttl_seconds(&self, record: &RateLimitRecord, now: DateTime<Utc>) -> u64 {
        let remaining_block = record
            .blocked_until
            .map_or(0, |blocked_until| seconds_until(now, blocked_until));
        let remaining_window = seconds_until(now, record.window_end);
        self.retention_seconds.saturating_add(remaining_block.max(remaining_window))
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Store(format!("failed to connect to redis: {error}")))
    }
}

fn decode_record(value: &str) -> AppResult<RateLimitRecord> {
    serde_json::from_str(value).map_err(|error| {
        AppError::Store(format!("failed to decode redis rate limit record: {error}"))
    })
}

#[async_trait]
impl RateLimitRepository for RedisRateLimitRepository {
    async fn find(&self, key: &RateLimitKey) -> AppResult<Option<RateLimitRecord>> {
        let mut connection = self.connection().await?;

        let stored: Option<String> = connection
            .get(self.key_for(key).as_str())
            .await
            .map_err(|error| {
                AppError::Store(format!("failed to load redis rate limit record: {error}"))
            })?;

        stored.as_deref().map(decode_record).transpose()
    }

    async fn apply_check(&self, check: &RateLimitCheck) -> AppResult<RateLimitDecision> {
        let redis_key = self.key_for(check.key());
        let script = Script::new(COMPARE_AND_SET_SCRIPT);
        let mut connection = self.connection().await?;

        for attempt in 1..=MAX_COMPARE_AND_SET_ATTEMPTS {
            let stored: Option<String> =
                connection
                    .get(redis_key.as_str())
                    .await
                    .map_err(|error| {
                        AppError::Store(format!(
                            "failed to load redis rate limit record: {error}"
                        ))
                    })?;

            let existing = stored.as_deref().map(decode_record).transpose()?;
            let outcome = check.evaluate(existing.as_ref());
            let Some(record) = outcome.record else {
                return Ok(outcome.decision);
            };

            let encoded = serde_json::to_string(&record).map_err(|error| {
                AppError::Store(format!("failed to encode redis rate limit record: {error}"))
            })?;

            let swapped: i32 = script
                .key(redis_key.as_str())
                .arg(stored.as_deref().unwrap_or_default())
                .arg(encoded)
                .arg(self.ttl_seconds(&record, check.now()))
                .invoke_async(&mut connection)
                .await
                .map_err(|error| {
                    AppError::Store(format!("failed to store redis rate limit record: {error}"))
                })?;

            if swapped == 1 {
                return Ok(outcome.decision);
            }

            debug!(
                attempt,
                action = %check.key().action(),
                "redis rate limit record changed concurrently, retrying"
            );
        }

        Err(AppError::Store(format!(
            "redis rate limit record for action '{}' kept changing after {MAX_COMPARE_AND_SET_ATTEMPTS} attempts",
            check.key().action()
        )))
    }

    async fn delete(&self, key: &RateLimitKey) -> AppResult<()> {
        let mut connection = self.connection().await?;

        connection
            .del::<_, ()>(self.key_for(key).as_str())
            .await
            .map_err(|error| {
                AppError::Store(format!("failed to reset redis rate limit record: {error}"))
            })
    }

    async fn delete_older_than(&self, _cutoff: DateTime<Utc>) -> AppResult<u64> {
        // Keys expire via TTL.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use gatekeep_application::RateLimitRepository;
    use gatekeep_domain::{RateLimitCheck, RateLimitConfig, RateLimitKey, RateLimitRecord};

    use super::RedisRateLimitRepository;

    fn repository() -> RedisRateLimitRepository {
        let Ok(client) = redis::Client::open("redis://127.0.0.1:6379") else {
            panic!("redis url should parse");
        };
        RedisRateLimitRepository::new(client, "gatekeep:rate_limit").with_retention_hours(24)
    }

    #[test]
    fn keys_are_scoped_by_prefix_action_and_identifier() {
        let Ok(key) = RateLimitKey::new("A@B.com", "signin") else {
            panic!("key should be valid");
        };

        assert_eq!(
            repository().key_for(&key),
            "gatekeep:rate_limit:signin:a@b.com"
        );
    }

    #[test]
    fn ttl_covers_retention_and_the_longer_of_block_and_window() {
        let now = Utc
            .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .unwrap_or_default();
        let mut record = RateLimitRecord {
            identifier: "a@b.com".to_owned(),
            action: "signin".to_owned(),
            attempts: 6,
            window_start: now,
            window_end: now + Duration::minutes(60),
            blocked_until: None,
            escalation_level: 0,
            total_violations: 1,
            updated_at: now,
        };

        assert_eq!(repository().ttl_seconds(&record, now), 86_400 + 3_600);

        record.blocked_until = Some(now + Duration::minutes(15));
        assert_eq!(repository().ttl_seconds(&record, now), 86_400 + 3_600);

        record.blocked_until = Some(now + Duration::minutes(120));
        assert_eq!(repository().ttl_seconds(&record, now), 86_400 + 7_200);

        record.blocked_until = None;
        record.window_end = now + Duration::minutes(60 * 48);
        assert_eq!(repository().ttl_seconds(&record, now), 86_400 + 172_800);
    }

    fn live_repository() -> Option<RedisRateLimitRepository> {
        let Ok(redis_url) = std::env::var("REDIS_URL") else {
            return None;
        };

        let client = match redis::Client::open(redis_url.as_str()) {
            Ok(client) => client,
            Err(error) => panic!("failed to open REDIS_URL in test: {error}"),
        };
        let suffix = Utc::now().timestamp_nanos_opt().unwrap_or_default();

        Some(RedisRateLimitRepository::new(client, format!("gatekeep:test:{suffix}")))
    }

    fn live_key(action: &str) -> RateLimitKey {
        match RateLimitKey::new("redis@example.com", action) {
            Ok(key) => key,
            Err(error) => panic!("test key should be valid: {error}"),
        }
    }

    fn config(max_attempts: u32) -> RateLimitConfig {
        match RateLimitConfig::new(max_attempts, 60, 15) {
            Ok(config) => config,
            Err(error) => panic!("test config should be valid: {error}"),
        }
    }

    #[tokio::test]
    async fn apply_check_counts_until_blocked_and_leaves_the_block_untouched() {
        let Some(repository) = live_repository() else {
            return;
        };
        let key = live_key("signin");
        let now = Utc::now();

        let mut remaining = Vec::new();
        for _ in 0..3 {
            let check = RateLimitCheck::new(key.clone(), config(3), now);
            let Ok(decision) = repository.apply_check(&check).await else {
                panic!("apply_check should succeed");
            };
            assert!(decision.allowed);
            remaining.push(decision.remaining);
        }
        assert_eq!(remaining, vec![2, 1, 0]);

        let check = RateLimitCheck::new(key.clone(), config(3), now);
        let blocked = repository.apply_check(&check).await;
        assert!(matches!(blocked, Ok(decision) if decision.blocked && decision.retry_after_seconds == 900));

        let Ok(Some(after_violation)) = repository.find(&key).await else {
            panic!("record should be stored");
        };
        assert_eq!(after_violation.total_violations, 1);

        let later = now + Duration::minutes(5);
        let check = RateLimitCheck::new(key.clone(), config(3), later);
        let still_blocked = repository.apply_check(&check).await;
        assert!(matches!(still_blocked, Ok(decision) if decision.blocked && decision.retry_after_seconds == 600));
        assert!(matches!(repository.find(&key).await, Ok(Some(record)) if record == after_violation));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_on_one_key_never_exceed_the_limit() {
        let Some(repository) = live_repository() else {
            return;
        };
        let key = live_key("otp_verify");
        let now = Utc::now();

        let handles = (0..12)
            .map(|_| {
                let repository = repository.clone();
                let check = RateLimitCheck::new(key.clone(), config(5), now);
                tokio::spawn(async move { repository.apply_check(&check).await })
            })
            .collect::<Vec<_>>();

        let mut allowed = 0;
        for handle in handles {
            match handle.await {
                Ok(Ok(decision)) if decision.allowed => allowed += 1,
                Ok(Ok(_)) => {}
                Ok(Err(error)) => panic!("apply_check failed: {error}"),
                Err(error) => panic!("check task failed: {error}"),
            }
        }

        assert_eq!(allowed, 5);
    }

    #[tokio::test]
    async fn delete_clears_the_key() {
        let Some(repository) = live_repository() else {
            return;
        };
        let key = live_key("password_reset");
        let now = Utc::now();

        for _ in 0..3 {
            let check = RateLimitCheck::new(key.clone(), config(1), now);
            assert!(repository.apply_check(&check).await.is_ok());
        }

        assert!(repository.delete(&key).await.is_ok());
        assert!(matches!(repository.find(&key).await, Ok(None)));

        let check = RateLimitCheck::new(key.clone(), config(1), now);
        let fresh = repository.apply_check(&check).await;
        assert!(matches!(fresh, Ok(decision) if decision.allowed && decision.escalation_level == 0));
    }
}
