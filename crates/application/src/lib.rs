//! Application services and ports.

#![forbid(unsafe_code)]

mod rate_limit_service;

pub use rate_limit_service::{
    Clock, DEFAULT_CLEANUP_INTERVAL_SECONDS, DEFAULT_POLICY_NAME, DEFAULT_RETENTION_HOURS,
    RateLimitCleanupJob, RateLimitPolicies, RateLimitRepository, RateLimitService, SystemClock,
};
