use chrono::{DateTime, Utc};
use gatekeep_domain::RateLimitDecision;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Incoming payload naming one actor and one action.
///
/// Missing fields deserialize as empty and are rejected by validation.
#[derive(Debug, Deserialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/rate-limit-request.ts"
)]
pub struct RateLimitRequest {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub action: String,
}

/// Rate limit decision returned by check and status.
#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/rate-limit-decision-response.ts"
)]
pub struct RateLimitDecisionResponse {
    pub allowed: bool,
    pub blocked: bool,
    pub remaining: u32,
    #[ts(type = "string")]
    pub reset_time: DateTime<Utc>,
    #[ts(type = "number")]
    pub retry_after_seconds: u64,
    pub escalation_level: u32,
}

impl From<RateLimitDecision> for RateLimitDecisionResponse {
    fn from(value: RateLimitDecision) -> Self {
        Self {
            allowed: value.allowed,
            blocked: value.blocked,
            remaining: value.remaining,
            reset_time: value.reset_time,
            retry_after_seconds: value.retry_after_seconds,
            escalation_level: value.escalation_level,
        }
    }
}

/// Health response payload.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/health-response.ts"
)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ready: bool,
    pub store: StoreHealthStatus,
}

/// Reachability of the configured rate limit store.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/store-health-status.ts"
)]
pub struct StoreHealthStatus {
    pub backend: &'static str,
    pub status: &'static str,
    pub detail: Option<String>,
}
