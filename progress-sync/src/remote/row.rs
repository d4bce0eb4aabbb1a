//! Wire shapes of the remote `user_progress` table
//!
//! The backend exposes snake_case columns. These types are the only place
//! that naming leaks; everything else uses [`ProgressRecord`].

use crate::error::{SyncError, SyncResult};
use crate::model::{ProgressRecord, ProgressUpdate, Theme, DEFAULT_REVIEWS_LIMIT, DEFAULT_WHEELS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Full row as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRow {
    pub user_id: String,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub reviews_completed: i64,
    #[serde(default)]
    pub like_reviews_completed: i64,
    #[serde(default)]
    pub inspector_reviews_completed: i64,
    #[serde(default = "default_reviews_limit")]
    pub reviews_limit: i64,
    #[serde(default = "default_wheels")]
    pub wheels_remaining: i64,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_review_reset: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn default_reviews_limit() -> i64 {
    i64::from(DEFAULT_REVIEWS_LIMIT)
}

fn default_wheels() -> i64 {
    i64::from(DEFAULT_WHEELS)
}

fn counter(column: &str, value: i64) -> SyncResult<u32> {
    u32::try_from(value).map_err(|_| {
        SyncError::Serialization(format!("column {} out of range: {}", column, value))
    })
}

impl TryFrom<ProgressRow> for ProgressRecord {
    type Error = SyncError;

    fn try_from(row: ProgressRow) -> SyncResult<Self> {
        let theme = match row.theme.as_deref() {
            None | Some("") => Theme::default(),
            Some(raw) => raw.parse()?,
        };

        let record = ProgressRecord {
            reviews_completed: counter("reviews_completed", row.reviews_completed)?,
            like_reviews_completed: counter("like_reviews_completed", row.like_reviews_completed)?,
            inspector_reviews_completed: counter(
                "inspector_reviews_completed",
                row.inspector_reviews_completed,
            )?,
            reviews_limit: counter("reviews_limit", row.reviews_limit)?,
            wheels_remaining: counter("wheels_remaining", row.wheels_remaining)?,
            theme,
            // A row never stamped compares as the oldest possible write
            last_updated: row.last_updated.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            last_review_reset: row.last_review_reset,
            created_at: row.created_at,
            balance: row.balance,
            user_id: row.user_id,
        };

        record
            .validate()
            .map_err(|e| SyncError::Serialization(format!("remote row rejected: {}", e)))?;
        Ok(record)
    }
}

impl From<&ProgressRecord> for ProgressRow {
    fn from(record: &ProgressRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            balance: record.balance,
            reviews_completed: i64::from(record.reviews_completed),
            like_reviews_completed: i64::from(record.like_reviews_completed),
            inspector_reviews_completed: i64::from(record.inspector_reviews_completed),
            reviews_limit: i64::from(record.reviews_limit),
            wheels_remaining: i64::from(record.wheels_remaining),
            theme: Some(record.theme.as_str().to_string()),
            last_updated: Some(record.last_updated),
            last_review_reset: record.last_review_reset,
            created_at: record.created_at,
        }
    }
}

/// Partial row for upsert/update; absent columns are left untouched remotely.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressPatch {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviews_completed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like_reviews_completed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspector_reviews_completed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviews_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wheels_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// `Some(None)` writes an explicit null
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_review_reset: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ProgressPatch {
    /// `{user_id, ...update, last_updated: stamp}`
    pub fn from_update(user_id: &str, update: &ProgressUpdate, stamp: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            balance: update.balance,
            reviews_completed: update.reviews_completed,
            like_reviews_completed: update.like_reviews_completed,
            inspector_reviews_completed: update.inspector_reviews_completed,
            reviews_limit: update.reviews_limit,
            wheels_remaining: update.wheels_remaining,
            theme: update.theme,
            last_updated: Some(stamp),
            last_review_reset: update.last_review_reset.map(Some),
            created_at: None,
        }
    }

    /// Whole-record patch carrying every column, restamped with `stamp`.
    pub fn from_record(record: &ProgressRecord, stamp: DateTime<Utc>) -> Self {
        Self {
            user_id: record.user_id.clone(),
            balance: Some(record.balance),
            reviews_completed: Some(record.reviews_completed),
            like_reviews_completed: Some(record.like_reviews_completed),
            inspector_reviews_completed: Some(record.inspector_reviews_completed),
            reviews_limit: Some(record.reviews_limit),
            wheels_remaining: Some(record.wheels_remaining),
            theme: Some(record.theme),
            last_updated: Some(stamp),
            last_review_reset: Some(record.last_review_reset),
            created_at: Some(record.created_at),
        }
    }

    /// Overwrite the columns present in this patch onto `record`.
    pub fn apply_to(&self, record: &mut ProgressRecord) {
        if let Some(v) = self.balance {
            record.balance = v;
        }
        if let Some(v) = self.reviews_completed {
            record.reviews_completed = v;
        }
        if let Some(v) = self.like_reviews_completed {
            record.like_reviews_completed = v;
        }
        if let Some(v) = self.inspector_reviews_completed {
            record.inspector_reviews_completed = v;
        }
        if let Some(v) = self.reviews_limit {
            record.reviews_limit = v;
        }
        if let Some(v) = self.wheels_remaining {
            record.wheels_remaining = v;
        }
        if let Some(v) = self.theme {
            record.theme = v;
        }
        if let Some(v) = self.last_updated {
            record.last_updated = v;
        }
        if let Some(v) = self.last_review_reset {
            record.last_review_reset = v;
        }
        if let Some(v) = self.created_at {
            record.created_at = v;
        }
    }

    /// Row the table would hold after inserting this patch, with column
    /// defaults filling whatever the patch omits.
    pub fn to_new_record(&self, now: DateTime<Utc>) -> ProgressRecord {
        let mut record = ProgressRecord::new_default(self.user_id.clone(), now);
        self.apply_to(&mut record);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_row_json_is_snake_case() {
        let record = ProgressRecord::new_default("user-a", t(0));
        let json = serde_json::to_value(ProgressRow::from(&record)).unwrap();
        assert_eq!(json["user_id"], "user-a");
        assert_eq!(json["wheels_remaining"], 3);
        assert_eq!(json["reviews_limit"], 10);
        assert_eq!(json["theme"], "light");
        assert!(json["last_review_reset"].is_null());
        assert!(json.get("userId").is_none());
    }

    #[test]
    fn test_row_maps_back_to_record() {
        let mut record = ProgressRecord::new_default("user-a", t(0));
        record.balance = 12.5;
        record.theme = Theme::Dark;
        record.last_review_reset = Some(t(30));

        let row = ProgressRow::from(&record);
        assert_eq!(ProgressRecord::try_from(row).unwrap(), record);
    }

    #[test]
    fn test_backend_row_with_nulls() {
        let json = serde_json::json!({
            "user_id": "user-b",
            "balance": 7,
            "theme": null,
            "last_updated": null,
            "created_at": "2024-03-01T08:00:00+00:00"
        });
        let row: ProgressRow = serde_json::from_value(json).unwrap();
        let record = ProgressRecord::try_from(row).unwrap();

        assert_eq!(record.balance, 7.0);
        assert_eq!(record.theme, Theme::Light);
        assert_eq!(record.wheels_remaining, 3);
        assert_eq!(record.last_updated, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_negative_columns_rejected() {
        let mut row = ProgressRow::from(&ProgressRecord::new_default("user-c", t(0)));
        row.wheels_remaining = -1;
        assert!(matches!(ProgressRecord::try_from(row), Err(SyncError::Serialization(_))));

        let mut row = ProgressRow::from(&ProgressRecord::new_default("user-c", t(0)));
        row.balance = -3.0;
        assert!(matches!(ProgressRecord::try_from(row), Err(SyncError::Serialization(_))));
    }

    #[test]
    fn test_patch_from_update_omits_absent_columns() {
        let update = ProgressUpdate::new().with_balance(110.0);
        let patch = ProgressPatch::from_update("user-a", &update, t(5));
        let json = serde_json::to_value(&patch).unwrap();

        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(json["user_id"], "user-a");
        assert_eq!(json["balance"], 110.0);
        assert_eq!(json["last_updated"], serde_json::to_value(t(5)).unwrap());
    }

    #[test]
    fn test_full_patch_writes_explicit_null_reset() {
        let record = ProgressRecord::new_default("user-a", t(0));
        let json = serde_json::to_value(ProgressPatch::from_record(&record, t(9))).unwrap();
        assert!(json.get("last_review_reset").unwrap().is_null());
        assert_eq!(json["created_at"], serde_json::to_value(t(0)).unwrap());
    }

    #[test]
    fn test_patch_to_new_record_uses_column_defaults() {
        let update = ProgressUpdate::new().with_theme(Theme::System);
        let record = ProgressPatch::from_update("user-d", &update, t(3)).to_new_record(t(3));
        assert_eq!(record.theme, Theme::System);
        assert_eq!(record.wheels_remaining, 3);
        assert_eq!(record.created_at, t(3));
        assert_eq!(record.last_updated, t(3));
    }
}
