//! Per-action rate limit policies.

use chrono::Duration;
use gatekeep_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// One step of progressive punishment.
///
/// Applies once an actor is about to commit violation number
/// `attempts_threshold` (counted over the actor's lifetime for one action).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationTier {
    /// Lifetime violation count at which this tier takes effect.
    pub attempts_threshold: u32,
    /// Block duration imposed while this tier is the strictest applicable one.
    pub block_duration_minutes: u32,
}

impl EscalationTier {
    /// Creates an escalation tier.
    #[must_use]
    pub fn new(attempts_threshold: u32, block_duration_minutes: u32) -> Self {
        Self {
            attempts_threshold,
            block_duration_minutes,
        }
    }
}

/// Immutable rate limit policy for one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    max_attempts: u32,
    window_minutes: u32,
    block_duration_minutes: u32,
    escalation_tiers: Vec<EscalationTier>,
}

impl RateLimitConfig {
    /// Creates a policy without escalation tiers.
    pub fn new(
        max_attempts: u32,
        window_minutes: u32,
        block_duration_minutes: u32,
    ) -> AppResult<Self> {
        if max_attempts == 0 {
            return Err(AppError::Configuration(
                "max_attempts must be greater than zero".to_owned(),
            ));
        }

        if window_minutes == 0 {
            return Err(AppError::Configuration(
                "window_minutes must be greater than zero".to_owned(),
            ));
        }

        if block_duration_minutes == 0 {
            return Err(AppError::Configuration(
                "block_duration_minutes must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            max_attempts,
            window_minutes,
            block_duration_minutes,
            escalation_tiers: Vec::new(),
        })
    }

    /// Replaces the escalation tiers of this policy.
    ///
    /// Tiers are stored sorted by threshold, then by duration. Block
    /// durations must never shrink as thresholds grow and must never undercut
    /// the base block duration.
    pub fn with_escalation_tiers(mut self, tiers: Vec<EscalationTier>) -> AppResult<Self> {
        let mut tiers = tiers;
        tiers.sort_by_key(|tier| (tier.attempts_threshold, tier.block_duration_minutes));

        let mut floor = self.block_duration_minutes;
        for tier in &tiers {
            if tier.attempts_threshold == 0 {
                return Err(AppError::Configuration(
                    "escalation tier attempts_threshold must be greater than zero".to_owned(),
                ));
            }

            if tier.block_duration_minutes < floor {
                return Err(AppError::Configuration(format!(
                    "escalation tier at threshold {} blocks for {} minutes, \
                     which is shorter than a preceding tier or the base block of {} minutes",
                    tier.attempts_threshold, tier.block_duration_minutes, floor
                )));
            }

            floor = tier.block_duration_minutes;
        }

        self.escalation_tiers = tiers;
        Ok(self)
    }

    /// Returns the number of checks allowed inside one window.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the window length in minutes.
    #[must_use]
    pub fn window_minutes(&self) -> u32 {
        self.window_minutes
    }

    /// Returns the base block duration in minutes.
    #[must_use]
    pub fn block_duration_minutes(&self) -> u32 {
        self.block_duration_minutes
    }

    /// Returns escalation tiers in ascending threshold order.
    #[must_use]
    pub fn escalation_tiers(&self) -> &[EscalationTier] {
        self.escalation_tiers.as_slice()
    }

    /// Returns the window length as a duration.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::minutes(i64::from(self.window_minutes))
    }
}
