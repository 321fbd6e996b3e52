//! Domain model for progressive rate limiting.

#![forbid(unsafe_code)]

mod check;
mod decision;
mod escalation;
mod policy;
mod record;

pub use check::{CheckOutcome, RateLimitCheck};
pub use decision::{RateLimitDecision, seconds_until};
pub use escalation::{EffectivePolicy, compute_effective_policy, escalation_level};
pub use policy::{EscalationTier, RateLimitConfig};
pub use record::{IdentifierKind, RateLimitKey, RateLimitRecord};
