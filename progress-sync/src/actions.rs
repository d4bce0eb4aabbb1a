//! Progress actions used by the UI flows
//!
//! Each action reads the current record, derives the new values and goes
//! through the updater, so it inherits the optimistic write and rollback.

use crate::context::{validate_user_id, SyncContext};
use crate::error::SyncResult;
use crate::fetcher::ProgressFetcher;
use crate::model::{ProgressRecord, ProgressUpdate, Theme, DEFAULT_WHEELS};
use crate::updater::ProgressUpdater;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    Like,
    Inspector,
}

#[derive(Clone)]
pub struct ProgressActions {
    ctx: SyncContext,
    fetcher: ProgressFetcher,
    updater: ProgressUpdater,
}

impl ProgressActions {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            fetcher: ProgressFetcher::new(ctx.clone()),
            updater: ProgressUpdater::new(ctx.clone()),
            ctx,
        }
    }

    /// Local cache entry, or a fetch when nothing is cached yet.
    async fn current(&self, user_id: &str) -> SyncResult<ProgressRecord> {
        validate_user_id(user_id)?;
        if let Some(record) = self.ctx.local.get(user_id).await? {
            return Ok(record);
        }
        Ok(self.fetcher.fetch(user_id).await?.record)
    }

    /// Add `delta` points (negative to spend).
    ///
    /// # Errors
    ///
    /// `Validation` if the balance would drop below zero.
    pub async fn add_points(&self, user_id: &str, delta: f64) -> SyncResult<ProgressRecord> {
        let current = self.current(user_id).await?;
        let balance = current.points_after(delta)?;
        self.updater
            .update(user_id, &ProgressUpdate::new().with_balance(balance))
            .await
    }

    /// # Errors
    ///
    /// `Validation` when no wheel uses are left.
    pub async fn consume_wheel(&self, user_id: &str) -> SyncResult<ProgressRecord> {
        let current = self.current(user_id).await?;
        let wheels = current.wheels_after_use()?;
        self.updater
            .update(user_id, &ProgressUpdate::new().with_wheels_remaining(wheels))
            .await
    }

    /// Count one completed review. The daily limit is informational only.
    pub async fn record_review(
        &self,
        user_id: &str,
        kind: ReviewKind,
    ) -> SyncResult<ProgressRecord> {
        let current = self.current(user_id).await?;
        let (like, inspector) = match kind {
            ReviewKind::Like => (
                current.like_reviews_completed.saturating_add(1),
                current.inspector_reviews_completed,
            ),
            ReviewKind::Inspector => (
                current.like_reviews_completed,
                current.inspector_reviews_completed.saturating_add(1),
            ),
        };
        let update = ProgressUpdate::new().with_reviews(
            current.reviews_completed.saturating_add(1),
            like,
            inspector,
        );
        self.updater.update(user_id, &update).await
    }

    pub async fn set_theme(&self, user_id: &str, theme: Theme) -> SyncResult<ProgressRecord> {
        self.updater
            .update(user_id, &ProgressUpdate::new().with_theme(theme))
            .await
    }

    /// Zero the review counters and restore wheel uses once per UTC day.
    /// Returns whether a reset was applied.
    pub async fn reset_daily_if_due(&self, user_id: &str) -> SyncResult<bool> {
        let current = self.current(user_id).await?;
        let now = self.ctx.now();
        if !current.daily_reset_due(now) {
            return Ok(false);
        }

        let update = ProgressUpdate::new()
            .with_reviews(0, 0, 0)
            .with_wheels_remaining(DEFAULT_WHEELS)
            .with_last_review_reset(now);
        self.updater.update(user_id, &update).await?;

        tracing::info!(user_id = user_id, "Daily progress counters reset");
        Ok(true)
    }
}
