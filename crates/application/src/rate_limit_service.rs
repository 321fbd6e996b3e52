//! Rate limiting ports and application services.
//!
//! Implements progressive rate limiting for the onboarding flows: attempts are
//! counted per (identifier, action) inside a window, a block is imposed once the
//! window's allowance is exceeded, and repeat offenders receive longer blocks.

mod cleanup;
mod config;
mod ports;
mod service;


pub use cleanup::{DEFAULT_CLEANUP_INTERVAL_SECONDS, DEFAULT_RETENTION_HOURS, RateLimitCleanupJob};
pub use config::{DEFAULT_POLICY_NAME, RateLimitPolicies};
pub use ports::{Clock, RateLimitRepository, SystemClock};
pub use service::RateLimitService;
