//! Canonical progress schema
//!
//! `ProgressRecord` is the single internal representation of a user's
//! gamification state. The local cache stores it verbatim (camelCase JSON);
//! the remote store speaks snake_case rows, mapped in [`crate::remote::row`].

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Daily review cap applied to new records.
pub const DEFAULT_REVIEWS_LIMIT: u32 = 10;

/// Reward-wheel uses granted per reset.
pub const DEFAULT_WHEELS: u32 = 3;

/// UI theme preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    System,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        }
    }
}

impl FromStr for Theme {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "system" => Ok(Theme::System),
            _ => Err(SyncError::Validation(format!("Unknown theme: {}", s))),
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Per-user persisted progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Identity issued by the auth provider; immutable
    pub user_id: String,

    /// Points total, never negative
    pub balance: f64,

    pub reviews_completed: u32,
    pub like_reviews_completed: u32,
    pub inspector_reviews_completed: u32,

    /// Informational daily cap; not enforced here
    pub reviews_limit: u32,

    pub wheels_remaining: u32,

    #[serde(default)]
    pub theme: Theme,

    /// Conflict key for reconciliation. Records persisted without one
    /// compare as the epoch.
    #[serde(default = "epoch")]
    pub last_updated: DateTime<Utc>,

    #[serde(default)]
    pub last_review_reset: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Default record for a user seen for the first time.
    pub fn new_default(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            balance: 0.0,
            reviews_completed: 0,
            like_reviews_completed: 0,
            inspector_reviews_completed: 0,
            reviews_limit: DEFAULT_REVIEWS_LIMIT,
            wheels_remaining: DEFAULT_WHEELS,
            theme: Theme::Light,
            last_updated: now,
            last_review_reset: None,
            created_at: now,
        }
    }

    /// Field-wise overwrite of `update` onto this record, stamped with `stamp`.
    pub fn apply(&self, update: &ProgressUpdate, stamp: DateTime<Utc>) -> Self {
        let mut merged = self.clone();
        if let Some(balance) = update.balance {
            merged.balance = balance;
        }
        if let Some(v) = update.reviews_completed {
            merged.reviews_completed = v;
        }
        if let Some(v) = update.like_reviews_completed {
            merged.like_reviews_completed = v;
        }
        if let Some(v) = update.inspector_reviews_completed {
            merged.inspector_reviews_completed = v;
        }
        if let Some(v) = update.reviews_limit {
            merged.reviews_limit = v;
        }
        if let Some(v) = update.wheels_remaining {
            merged.wheels_remaining = v;
        }
        if let Some(theme) = update.theme {
            merged.theme = theme;
        }
        if let Some(at) = update.last_review_reset {
            merged.last_review_reset = Some(at);
        }
        merged.last_updated = stamp;
        merged
    }

    /// Check record-level invariants.
    pub fn validate(&self) -> SyncResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(SyncError::Validation("user_id must not be empty".to_string()));
        }
        validate_balance(self.balance)
    }

    /// Balance after adding `delta`, rejected if it would go negative.
    pub fn points_after(&self, delta: f64) -> SyncResult<f64> {
        let next = self.balance + delta;
        validate_balance(next).map(|()| next)
    }

    /// Wheel uses left after consuming one.
    pub fn wheels_after_use(&self) -> SyncResult<u32> {
        self.wheels_remaining
            .checked_sub(1)
            .ok_or_else(|| SyncError::Validation("No reward wheel uses remaining".to_string()))
    }

    /// Whether the daily counters were last reset on an earlier UTC day than `now`.
    pub fn daily_reset_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_review_reset {
            None => true,
            Some(at) => at.date_naive() < now.date_naive(),
        }
    }
}

fn validate_balance(balance: f64) -> SyncResult<()> {
    if !balance.is_finite() {
        return Err(SyncError::Validation(format!("balance must be finite, got {}", balance)));
    }
    if balance < 0.0 {
        return Err(SyncError::Validation(format!("balance must not be negative, got {}", balance)));
    }
    Ok(())
}

/// Partial update of the mutable progress fields.
///
/// Identity and creation fields are not representable, and `lastUpdated` is
/// always stamped by the updater. Unknown keys are rejected on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProgressUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviews_completed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_reviews_completed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspector_reviews_completed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviews_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wheels_remaining: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_reset: Option<DateTime<Utc>>,
}

impl ProgressUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(mut self, balance: f64) -> Self {
        self.balance = Some(balance);
        self
    }

    pub fn with_wheels_remaining(mut self, wheels: u32) -> Self {
        self.wheels_remaining = Some(wheels);
        self
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = Some(theme);
        self
    }

    pub fn with_reviews(mut self, total: u32, like: u32, inspector: u32) -> Self {
        self.reviews_completed = Some(total);
        self.like_reviews_completed = Some(like);
        self.inspector_reviews_completed = Some(inspector);
        self
    }

    pub fn with_last_review_reset(mut self, at: DateTime<Utc>) -> Self {
        self.last_review_reset = Some(at);
        self
    }

    /// Parse an untyped payload, rejecting unknown keys and ill-typed values.
    pub fn from_json(value: serde_json::Value) -> SyncResult<Self> {
        let update: Self = serde_json::from_value(value)
            .map_err(|e| SyncError::Validation(format!("Invalid progress update: {}", e)))?;
        update.validate()?;
        Ok(update)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Reject updates that carry nothing or would break record invariants.
    pub fn validate(&self) -> SyncResult<()> {
        if self.is_empty() {
            return Err(SyncError::Validation("Progress update has no fields".to_string()));
        }
        if let Some(balance) = self.balance {
            validate_balance(balance)?;
        }
        Ok(())
    }
}
