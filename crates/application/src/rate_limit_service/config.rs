use std::collections::HashMap;
use std::path::Path;

use gatekeep_core::{AppError, AppResult};
use gatekeep_domain::{EscalationTier, RateLimitConfig};
use serde::Deserialize;

/// Name of the mandatory fallback policy.
pub const DEFAULT_POLICY_NAME: &str = "default";

/// Static table from action name to rate limit policy.
///
/// A table always carries a default policy, so resolving never fails.
#[derive(Debug, Clone)]
pub struct RateLimitPolicies {
    default: RateLimitConfig,
    actions: HashMap<String, RateLimitConfig>,
}

impl RateLimitPolicies {
    /// Creates a table containing only the default policy.
    #[must_use]
    pub fn new(default: RateLimitConfig) -> Self {
        Self {
            default,
            actions: HashMap::new(),
        }
    }

    /// Adds or replaces the policy for one action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>, config: RateLimitConfig) -> Self {
        let action = action.into().trim().to_owned();
        if action == DEFAULT_POLICY_NAME {
            self.default = config;
        } else {
            self.actions.insert(action, config);
        }
        self
    }

    /// Built-in policies for the onboarding flows.
    pub fn builtin() -> AppResult<Self> {
        Ok(Self::new(RateLimitConfig::new(10, 15, 15)?)
            .with_action(
                "signup",
                RateLimitConfig::new(3, 60, 60)?.with_escalation_tiers(vec![
                    EscalationTier::new(3, 180),
                    EscalationTier::new(5, 1440),
                ])?,
            )
            .with_action(
                "signin",
                RateLimitConfig::new(5, 15, 15)?.with_escalation_tiers(vec![
                    EscalationTier::new(3, 60),
                    EscalationTier::new(5, 240),
                    EscalationTier::new(10, 1440),
                ])?,
            )
            .with_action(
                "otp_verify",
                RateLimitConfig::new(5, 10, 15)?.with_escalation_tiers(vec![
                    EscalationTier::new(3, 60),
                    EscalationTier::new(5, 240),
                ])?,
            )
            .with_action(
                "otp_resend",
                RateLimitConfig::new(3, 15, 30)?
                    .with_escalation_tiers(vec![EscalationTier::new(3, 120)])?,
            )
            .with_action(
                "password_reset",
                RateLimitConfig::new(3, 60, 60)?
                    .with_escalation_tiers(vec![EscalationTier::new(3, 240)])?,
            )
            .with_action("profile_update", RateLimitConfig::new(20, 60, 15)?)
            .with_action(
                "file_upload",
                RateLimitConfig::new(10, 60, 30)?
                    .with_escalation_tiers(vec![EscalationTier::new(5, 120)])?,
            ))
    }

    /// Parses a JSON policy document.
    ///
    /// The document must define `default`; per-action entries live under
    /// `actions`.
    pub fn from_json_str(document: &str) -> AppResult<Self> {
        let file: PolicyFile = serde_json::from_str(document).map_err(|error| {
            AppError::Configuration(format!("invalid rate limit policy document: {error}"))
        })?;

        let default = file.default.ok_or_else(|| {
            AppError::Configuration(format!(
                "rate limit policy document must define a '{DEFAULT_POLICY_NAME}' policy"
            ))
        })?;

        let mut policies = Self::new(default.into_config(DEFAULT_POLICY_NAME)?);
        for (action, entry) in file.actions {
            let config = entry.into_config(action.as_str())?;
            policies = policies.with_action(action, config);
        }

        Ok(policies)
    }

    /// Reads and parses a JSON policy file.
    pub fn from_json_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|error| {
            AppError::Configuration(format!(
                "failed to read rate limit policy file '{}': {error}",
                path.display()
            ))
        })?;

        Self::from_json_str(document.as_str())
    }

    /// Returns the policy for `action`, or the default policy when unknown.
    #[must_use]
    pub fn resolve(&self, action: &str) -> &RateLimitConfig {
        self.actions.get(action).unwrap_or(&self.default)
    }

    /// Returns the default policy.
    #[must_use]
    pub fn default_policy(&self) -> &RateLimitConfig {
        &self.default
    }

    /// Returns the names of explicitly configured actions, sorted.
    #[must_use]
    pub fn action_names(&self) -> Vec<&str> {
        let mut names = self.actions.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    default: Option<PolicyEntry>,
    #[serde(default)]
    actions: HashMap<String, PolicyEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PolicyEntry {
    max_attempts: u32,
    window_minutes: u32,
    block_duration_minutes: u32,
    #[serde(default)]
    escalation_tiers: Vec<EscalationTier>,
}

impl PolicyEntry {
    fn into_config(self, action: &str) -> AppResult<RateLimitConfig> {
        RateLimitConfig::new(
            self.max_attempts,
            self.window_minutes,
            self.block_duration_minutes,
        )
        .and_then(|config| config.with_escalation_tiers(self.escalation_tiers))
        .map_err(|error| {
            AppError::Configuration(format!("invalid policy for action '{action}': {error}"))
        })
    }
}
