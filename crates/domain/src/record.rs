//! Rate limit keys and persisted counter records.

use chrono::{DateTime, Utc};
use gatekeep_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Validated (identifier, action) pair a rate limit is tracked under.
///
/// Identifiers are trimmed and lowercased so `A@B.com` and `a@b.com ` share
/// one counter. Actions are trimmed only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitKey {
    identifier: String,
    action: String,
}

impl RateLimitKey {
    /// Creates a normalized rate limit key.
    pub fn new(identifier: impl Into<String>, action: impl Into<String>) -> AppResult<Self> {
        let identifier = NonEmptyString::new(identifier).map_err(|_| {
            AppError::Validation("rate limit identifier must not be empty".to_owned())
        })?;
        let action = NonEmptyString::new(action)
            .map_err(|_| AppError::Validation("rate limit action must not be empty".to_owned()))?;

        Ok(Self {
            identifier: identifier.as_str().to_lowercase(),
            action: action.into(),
        })
    }

    /// Returns the normalized identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.identifier.as_str()
    }

    /// Returns the action name.
    #[must_use]
    pub fn action(&self) -> &str {
        self.action.as_str()
    }

    /// Returns the coarse kind of identifier, safe to log.
    #[must_use]
    pub fn identifier_kind(&self) -> IdentifierKind {
        IdentifierKind::of(self.identifier.as_str())
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}:{}", self.action, self.identifier)
    }
}

/// Coarse classification of identifiers for logs that must not carry PII.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// Identifier looks like an email address.
    Email,
    /// Any other opaque identifier, typically a user id.
    UserId,
}

impl IdentifierKind {
    /// Classifies a raw identifier.
    #[must_use]
    pub fn of(identifier: &str) -> Self {
        if identifier.contains('@') {
            Self::Email
        } else {
            Self::UserId
        }
    }

    /// Returns a stable label for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::UserId => "user_id",
        }
    }
}

impl std::fmt::Display for IdentifierKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Persisted counter state for one (identifier, action) pair.
///
/// `total_violations` and `escalation_level` carry across windows; `attempts`
/// and the window bounds describe the current window only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    /// Normalized actor identifier.
    pub identifier: String,
    /// Action name.
    pub action: String,
    /// Checks counted in the current window.
    pub attempts: u32,
    /// Start of the current window.
    pub window_start: DateTime<Utc>,
    /// End of the current window.
    pub window_end: DateTime<Utc>,
    /// Instant before which every check is blocked.
    pub blocked_until: Option<DateTime<Utc>>,
    /// Number of escalation tiers reached.
    pub escalation_level: u32,
    /// Lifetime number of violations.
    pub total_violations: u32,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl RateLimitRecord {
    /// Returns the key this record belongs to.
    pub fn key(&self) -> AppResult<RateLimitKey> {
        RateLimitKey::new(self.identifier.as_str(), self.action.as_str())
    }

    /// Returns `true` when the block on this record is still in force at `now`.
    #[must_use]
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until
            .is_some_and(|blocked_until| blocked_until > now)
    }

    /// Returns `true` when this record's window still counts attempts at `now`.
    ///
    /// `window_start_cutoff` is `now - window`. An elapsed block also closes
    /// the window so the actor restarts from a fresh count.
    #[must_use]
    pub fn is_window_open(&self, window_start_cutoff: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self
            .blocked_until
            .is_some_and(|blocked_until| blocked_until <= now)
        {
            return false;
        }

        self.window_start > window_start_cutoff
    }

    /// Returns `true` when cleanup may drop this record at `cutoff`.
    ///
    /// The last write, the window and any block must all end before `cutoff`.
    #[must_use]
    pub fn is_expired_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.updated_at < cutoff
            && self.window_end < cutoff
            && self
                .blocked_until
                .is_none_or(|blocked_until| blocked_until < cutoff)
    }
}
