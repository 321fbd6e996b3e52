use chrono::{Duration, Utc};
use gatekeep_application::RateLimitRepository;
use gatekeep_domain::{RateLimitCheck, RateLimitConfig, RateLimitKey};
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use super::PostgresRateLimitRepository;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres rate limit tests: {error}");
    }

    Some(pool)
}

fn unique_key(action: &str) -> RateLimitKey {
    let suffix = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    match RateLimitKey::new(format!("pg-{suffix}@example.com"), action) {
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
async fn apply_check_counts_until_blocked_and_persists_violation() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresRateLimitRepository::new(pool);
    let key = unique_key("signin");
    let now = Utc::now();

    let mut remaining = Vec::new();
    for _ in 0..3 {
        let check = RateLimitCheck::new(key.clone(), config(3), now);
        let decision = repository.apply_check(&check).await;
        let Ok(decision) = decision else {
            panic!("apply_check should succeed");
        };
        assert!(decision.allowed);
        remaining.push(decision.remaining);
    }
    assert_eq!(remaining, vec![2, 1, 0]);

    let check = RateLimitCheck::new(key.clone(), config(3), now);
    let blocked = repository.apply_check(&check).await;
    assert!(matches!(blocked, Ok(decision) if decision.blocked && decision.retry_after_seconds == 900));

    let stored = repository.find(&key).await;
    let Ok(Some(stored)) = stored else {
        panic!("record should be stored");
    };
    assert_eq!(stored.attempts, 4);
    assert_eq!(stored.total_violations, 1);
    assert!(stored.is_blocked_at(now));
}

#[tokio::test]
async fn concurrent_checks_on_one_key_never_exceed_the_limit() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresRateLimitRepository::new(pool);
    let key = unique_key("otp_verify");
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
async fn delete_removes_record_including_violations() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresRateLimitRepository::new(pool);
    let key = unique_key("password_reset");
    let now = Utc::now();

    for _ in 0..3 {
        let check = RateLimitCheck::new(key.clone(), config(1), now);
        assert!(repository.apply_check(&check).await.is_ok());
    }

    assert!(repository.delete(&key).await.is_ok());
    assert!(matches!(repository.find(&key).await, Ok(None)));
}

#[tokio::test]
async fn delete_older_than_keeps_records_with_active_blocks() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresRateLimitRepository::new(pool);
    let stale_key = unique_key("file_upload");
    let blocked_key = unique_key("signup");
    let long_ago = Utc::now() - Duration::hours(48);

    let stale = RateLimitCheck::new(stale_key.clone(), config(5), long_ago);
    assert!(repository.apply_check(&stale).await.is_ok());

    let Ok(long_block) = RateLimitConfig::new(1, 60, 60 * 24 * 7) else {
        panic!("long block config should be valid");
    };
    for _ in 0..2 {
        let check = RateLimitCheck::new(blocked_key.clone(), long_block.clone(), long_ago);
        assert!(repository.apply_check(&check).await.is_ok());
    }

    let removed = repository
        .delete_older_than(Utc::now() - Duration::hours(24))
        .await;
    assert!(matches!(removed, Ok(count) if count >= 1));
    assert!(matches!(repository.find(&stale_key).await, Ok(None)));
    assert!(matches!(repository.find(&blocked_key).await, Ok(Some(_))));
}

#[tokio::test]
async fn delete_older_than_keeps_windows_longer_than_retention() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresRateLimitRepository::new(pool);
    let key = unique_key("signin");
    let start = Utc::now() - Duration::minutes(90);
    let Ok(long_window) = RateLimitConfig::new(5, 180, 15) else {
        panic!("long window config should be valid");
    };

    for _ in 0..5 {
        let check = RateLimitCheck::new(key.clone(), long_window.clone(), start);
        assert!(matches!(repository.apply_check(&check).await, Ok(decision) if decision.allowed));
    }

    let now = Utc::now();
    assert!(repository.delete_older_than(now - Duration::hours(1)).await.is_ok());
    assert!(matches!(repository.find(&key).await, Ok(Some(record)) if record.attempts == 5));

    let check = RateLimitCheck::new(key, long_window, now);
    let decision = repository.apply_check(&check).await;
    assert!(matches!(decision, Ok(decision) if decision.blocked && !decision.allowed));
}
