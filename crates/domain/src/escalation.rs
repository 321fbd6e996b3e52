//! Progressive escalation of block durations.

use chrono::Duration;

use crate::RateLimitConfig;

/// Policy in force for the next attempt of one actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectivePolicy {
    /// Checks allowed inside one window.
    pub max_attempts: u32,
    /// Window length in minutes.
    pub window_minutes: u32,
    /// Block imposed if the next attempt trips the limit.
    pub block_duration_minutes: u32,
}

impl EffectivePolicy {
    /// Returns the window length as a duration.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::minutes(i64::from(self.window_minutes))
    }

    /// Returns the block length as a duration.
    #[must_use]
    pub fn block_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.block_duration_minutes))
    }
}

/// Derives the policy for the next attempt from the actor's violation history.
///
/// The last tier whose threshold is `<= total_violations + 1` decides the block
/// duration. Tiers are kept sorted by threshold and then by duration, so equal
/// thresholds resolve to the longer block. The result never undercuts the base
/// policy.
#[must_use]
pub fn compute_effective_policy(base: &RateLimitConfig, total_violations: u32) -> EffectivePolicy {
    let next_violation = total_violations.saturating_add(1);
    let tier_block = base
        .escalation_tiers()
        .iter()
        .take_while(|tier| tier.attempts_threshold <= next_violation)
        .last()
        .map(|tier| tier.block_duration_minutes);

    let block_duration_minutes = tier_block
        .map(|minutes| minutes.max(base.block_duration_minutes()))
        .unwrap_or(base.block_duration_minutes());

    EffectivePolicy {
        max_attempts: base.max_attempts(),
        window_minutes: base.window_minutes(),
        block_duration_minutes,
    }
}

/// Number of escalation tiers already reached after `total_violations`.
#[must_use]
pub fn escalation_level(base: &RateLimitConfig, total_violations: u32) -> u32 {
    let reached = base
        .escalation_tiers()
        .iter()
        .take_while(|tier| tier.attempts_threshold <= total_violations)
        .count();

    u32::try_from(reached).unwrap_or(u32::MAX)
}
