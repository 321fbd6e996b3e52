use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeep_application::RateLimitRepository;
use gatekeep_core::AppResult;
use gatekeep_domain::{RateLimitCheck, RateLimitDecision, RateLimitKey, RateLimitRecord};
use tokio::sync::RwLock;

/// In-memory rate limit repository for single-process deployments and tests.
#[derive(Default)]
pub struct InMemoryRateLimitRepository {
    records: RwLock<HashMap<RateLimitKey, RateLimitRecord>>,
}

impl InMemoryRateLimitRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns `true` when no record is stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RateLimitRepository for InMemoryRateLimitRepository {
    async fn find(&self, key: &RateLimitKey) -> AppResult<Option<RateLimitRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn apply_check(&self, check: &RateLimitCheck) -> AppResult<RateLimitDecision> {
        let mut records = self.records.write().await;
        let outcome = check.evaluate(records.get(check.key()));

        if let Some(record) = outcome.record {
            records.insert(check.key().clone(), record);
        }

        Ok(outcome.decision)
    }

    async fn delete(&self, key: &RateLimitKey) -> AppResult<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();

        records.retain(|_, record| !record.is_expired_before(cutoff));

        Ok(u64::try_from(before - records.len()).unwrap_or(u64::MAX))
    }
}
