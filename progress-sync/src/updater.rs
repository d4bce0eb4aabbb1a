//! Progress updater
//!
//! Local write first (optimistic), then the remote upsert. A rejected remote
//! write restores the previous local value, so at rest the cache only holds
//! confirmed-or-previous state. A confirmed write caches the row the remote
//! returned, not the optimistic value.
//!
//! Concurrent updates for the same user are last-write-wins at whole-record
//! granularity; there is no field-level merge.

use crate::context::{validate_user_id, SyncContext};
use crate::error::SyncResult;
use crate::model::{ProgressRecord, ProgressUpdate};
use crate::remote::ProgressPatch;

#[derive(Clone)]
pub struct ProgressUpdater {
    ctx: SyncContext,
}

impl ProgressUpdater {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Apply `update` for `user_id` and return the resulting record.
    ///
    /// # Errors
    ///
    /// Validation errors before anything is written; otherwise the remote
    /// error after the local cache has been rolled back.
    pub async fn update(
        &self,
        user_id: &str,
        update: &ProgressUpdate,
    ) -> SyncResult<ProgressRecord> {
        validate_user_id(user_id)?;
        update.validate()?;

        let previous = self.ctx.local.get(user_id).await?;
        let now = self.ctx.now();
        // The cache never sees its own stamp move backwards
        let stamp = previous.as_ref().map_or(now, |p| p.last_updated.max(now));

        let merged = match &previous {
            Some(prev) => prev.apply(update, stamp),
            None => ProgressRecord::new_default(user_id, now).apply(update, stamp),
        };
        merged.validate()?;

        self.ctx.local.set(user_id, &merged).await?;

        let patch = ProgressPatch::from_update(user_id, update, stamp);
        match self.ctx.remote_call(self.ctx.remote.upsert_row(&patch)).await {
            Ok(stored) => {
                // The patch carries only the changed columns; the stored row is
                // the whole record as confirmed under this stamp.
                self.ctx.cache_confirmed(user_id, &stored).await;
                tracing::debug!(user_id = user_id, "Progress update confirmed by remote store");
                Ok(stored)
            }
            Err(e) => {
                tracing::warn!(
                    user_id = user_id,
                    error = %e,
                    "Remote progress write failed, rolling back local cache"
                );
                self.rollback(user_id, previous.as_ref()).await;
                Err(e)
            }
        }
    }

    async fn rollback(&self, user_id: &str, previous: Option<&ProgressRecord>) {
        let restored = match previous {
            Some(prev) => self.ctx.local.set(user_id, prev).await,
            None => self.ctx.local.remove(user_id).await,
        };
        if let Err(e) = restored {
            tracing::error!(
                user_id = user_id,
                error = %e,
                "Failed to roll back local progress cache"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::error::SyncError;
    use crate::local_cache::{InMemoryLocalCache, LocalCache};
    use crate::model::Theme;
    use crate::remote::{InMemoryRemoteStore, MockRemoteProgressStore, RemoteProgressStore};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()))
    }

    fn updater_with(
        remote: Arc<dyn RemoteProgressStore>,
        local: Arc<InMemoryLocalCache>,
        clock: Arc<ManualClock>,
    ) -> ProgressUpdater {
        ProgressUpdater::new(SyncContext::new(remote, local, clock, Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_update_writes_both_stores() {
        let clock = clock();
        let remote = Arc::new(InMemoryRemoteStore::with_clock(clock.clone()));
        let local = Arc::new(InMemoryLocalCache::new());
        let initial = ProgressRecord::new_default("user-a", clock.now());
        remote.put_row(initial.clone());
        local.set("user-a", &initial).await.unwrap();

        clock.advance(ChronoDuration::seconds(30));
        let updater = updater_with(remote.clone(), local.clone(), clock.clone());
        let record = updater
            .update(
                "user-a",
                &ProgressUpdate::new().with_balance(10.0).with_theme(Theme::Dark),
            )
            .await
            .unwrap();

        assert_eq!(record.balance, 10.0);
        assert_eq!(record.last_updated, clock.now());
        assert_eq!(local.get("user-a").await.unwrap(), Some(record.clone()));

        let stored = remote.row("user-a").unwrap();
        assert_eq!(stored.balance, 10.0);
        assert_eq!(stored.theme, Theme::Dark);
        assert_eq!(stored.last_updated, clock.now());
    }

    #[tokio::test]
    async fn test_rejected_write_rolls_back() {
        let clock = clock();
        let local = Arc::new(InMemoryLocalCache::new());
        let mut previous = ProgressRecord::new_default("user-a", clock.now());
        previous.balance = 100.0;
        local.set("user-a", &previous).await.unwrap();

        let mut remote = MockRemoteProgressStore::new();
        remote
            .expect_upsert_row()
            .times(1)
            .returning(|_| Err(SyncError::Transport("offline".into())));

        clock.advance(ChronoDuration::seconds(5));
        let err = updater_with(Arc::new(remote), local.clone(), clock)
            .update("user-a", &ProgressUpdate::new().with_balance(110.0))
            .await
            .unwrap_err();

        assert!(err.is_transport());
        assert_eq!(local.get("user-a").await.unwrap(), Some(previous));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_write_is_visible_before_remote_confirms() {
        let clock = clock();
        let remote = Arc::new(InMemoryRemoteStore::with_clock(clock.clone()));
        remote.set_latency(Some(Duration::from_millis(200)));
        let local = Arc::new(InMemoryLocalCache::new());
        let initial = ProgressRecord::new_default("user-a", clock.now());
        local.set("user-a", &initial).await.unwrap();

        let updater = updater_with(remote.clone(), local.clone(), clock);
        let pending = tokio::spawn(async move {
            updater.update("user-a", &ProgressUpdate::new().with_balance(55.0)).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(local.get("user-a").await.unwrap().unwrap().balance, 55.0);
        assert_eq!(remote.row("user-a"), None);

        pending.await.unwrap().unwrap();
        assert_eq!(remote.row("user-a").unwrap().balance, 55.0);
    }

    #[tokio::test]
    async fn test_stale_cache_converges_on_stored_row() {
        let clock = clock();
        let remote = Arc::new(InMemoryRemoteStore::with_clock(clock.clone()));
        let local = Arc::new(InMemoryLocalCache::new());
        let mut cached = ProgressRecord::new_default("user-a", clock.now());
        cached.balance = 10.0;
        local.set("user-a", &cached).await.unwrap();

        // Written by another device after this cache was last reconciled
        clock.advance(ChronoDuration::minutes(1));
        let mut elsewhere = cached.clone();
        elsewhere.balance = 5.0;
        elsewhere.last_updated = clock.now();
        remote.put_row(elsewhere);

        clock.advance(ChronoDuration::minutes(1));
        let record = updater_with(remote.clone(), local.clone(), clock.clone())
            .update("user-a", &ProgressUpdate::new().with_theme(Theme::Dark))
            .await
            .unwrap();

        let stored = remote.row("user-a").unwrap();
        assert_eq!(record, stored);
        assert_eq!(record.balance, 5.0);
        assert_eq!(record.theme, Theme::Dark);
        assert_eq!(record.last_updated, clock.now());
        assert_eq!(local.get("user-a").await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_without_previous_caches_remote_row() {
        let clock = clock();
        let remote = Arc::new(InMemoryRemoteStore::with_clock(clock.clone()));
        let mut existing = ProgressRecord::new_default("user-a", clock.now());
        existing.balance = 500.0;
        existing.wheels_remaining = 1;
        remote.put_row(existing);
        let local = Arc::new(InMemoryLocalCache::new());

        let record = updater_with(remote, local.clone(), clock)
            .update("user-a", &ProgressUpdate::new().with_theme(Theme::System))
            .await
            .unwrap();

        assert_eq!(record.balance, 500.0);
        assert_eq!(record.wheels_remaining, 1);
        assert_eq!(record.theme, Theme::System);
        assert_eq!(local.get("user-a").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_without_previous_rollback_removes_entry() {
        let clock = clock();
        let remote = Arc::new(InMemoryRemoteStore::with_clock(clock.clone()));
        remote.set_offline(true);
        let local = Arc::new(InMemoryLocalCache::new());

        let result = updater_with(remote, local.clone(), clock)
            .update("user-a", &ProgressUpdate::new().with_balance(1.0))
            .await;

        assert!(result.is_err());
        assert_eq!(local.get("user-a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_update_touches_nothing() {
        let clock = clock();
        let mut remote = MockRemoteProgressStore::new();
        remote.expect_upsert_row().never();
        let local = Arc::new(InMemoryLocalCache::new());
        let updater = updater_with(Arc::new(remote), local.clone(), clock);

        let err = updater
            .update("user-a", &ProgressUpdate::new().with_balance(-1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let err = updater
            .update("user-a", &ProgressUpdate::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(local.get("user-a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stamp_never_moves_backwards() {
        let clock = clock();
        let remote = Arc::new(InMemoryRemoteStore::with_clock(clock.clone()));
        let local = Arc::new(InMemoryLocalCache::new());
        let mut ahead = ProgressRecord::new_default("user-a", clock.now());
        ahead.last_updated = clock.now() + ChronoDuration::hours(1);
        local.set("user-a", &ahead).await.unwrap();

        let record = updater_with(remote, local, clock)
            .update("user-a", &ProgressUpdate::new().with_balance(3.0))
            .await
            .unwrap();
        assert_eq!(record.last_updated, ahead.last_updated);
    }
}
