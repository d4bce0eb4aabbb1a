//! Sync reconciler
//!
//! Last-write-wins on `last_updated` between the local cache and the remote
//! store. Wall-clock stamps from different devices are compared as-is; no
//! skew compensation is attempted.
//!
//! Failures never reach the caller as errors: they are logged and reported
//! as [`ReconcileOutcome::Failed`], and the next trigger retries.

use crate::context::{validate_user_id, SyncContext};
use crate::error::SyncResult;
use crate::local_cache::SyncMarker;
use crate::model::ProgressRecord;
use crate::remote::ProgressPatch;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Nothing cached locally
    NoLocal,
    /// Remote row was missing and has been created from the local record
    PushedMissing,
    /// Local record was newer and has been written remotely
    PushedLocal,
    /// Remote record was newer and replaced the local cache
    PulledRemote,
    InSync,
    /// Another pass for the same user was already running
    Skipped,
    Failed(String),
}

impl ReconcileOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ReconcileOutcome::Failed(_))
    }
}

#[derive(Clone)]
pub struct ProgressReconciler {
    ctx: SyncContext,
}

impl ProgressReconciler {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Run one reconciliation pass for `user_id`.
    ///
    /// This does not guard against overlapping passes; callers go through
    /// the coordinator for that.
    pub async fn reconcile(&self, user_id: &str) -> ReconcileOutcome {
        match self.try_reconcile(user_id).await {
            Ok(outcome) => {
                if outcome != ReconcileOutcome::NoLocal {
                    if let Err(e) = self
                        .ctx
                        .local
                        .mark_synced(user_id, SyncMarker::Reconcile, self.ctx.now())
                        .await
                    {
                        tracing::warn!(
                            user_id = user_id,
                            error = %e,
                            "Failed to record reconciliation time"
                        );
                    }
                }
                tracing::debug!(user_id = user_id, outcome = ?outcome, "Reconciliation finished");
                outcome
            }
            Err(e) => {
                tracing::error!(
                    user_id = user_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Reconciliation failed"
                );
                ReconcileOutcome::Failed(e.to_string())
            }
        }
    }

    async fn try_reconcile(&self, user_id: &str) -> SyncResult<ReconcileOutcome> {
        validate_user_id(user_id)?;

        let Some(local) = self.ctx.local.get(user_id).await? else {
            return Ok(ReconcileOutcome::NoLocal);
        };

        match self.ctx.remote_call(self.ctx.remote.read_row(user_id)).await {
            Ok(remote) => self.resolve(user_id, &local, remote).await,
            Err(e) if e.is_not_found() => self.push_missing(user_id, &local).await,
            Err(e) => Err(e),
        }
    }

    async fn push_missing(
        &self,
        user_id: &str,
        local: &ProgressRecord,
    ) -> SyncResult<ReconcileOutcome> {
        let mut fresh = local.clone();
        fresh.last_updated = self.ctx.now().max(local.last_updated);

        match self.ctx.remote_call(self.ctx.remote.insert_row(&fresh)).await {
            Ok(stored) => {
                tracing::info!(
                    user_id = user_id,
                    "Remote progress row missing, pushed local record"
                );
                self.mirror_if_unchanged(user_id, local, &stored).await?;
                Ok(ReconcileOutcome::PushedMissing)
            }
            Err(e) if e.is_duplicate_key() => {
                // Another device created the row between our read and insert
                let remote = self.ctx.remote_call(self.ctx.remote.read_row(user_id)).await?;
                self.resolve(user_id, local, remote).await
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve(
        &self,
        user_id: &str,
        local: &ProgressRecord,
        remote: ProgressRecord,
    ) -> SyncResult<ReconcileOutcome> {
        match local.last_updated.cmp(&remote.last_updated) {
            Ordering::Greater => {
                let stamp = self.ctx.now().max(local.last_updated);
                let patch = ProgressPatch::from_record(local, stamp);
                let stored = self.ctx.remote_call(self.ctx.remote.upsert_row(&patch)).await?;
                tracing::info!(
                    user_id = user_id,
                    local = %local.last_updated,
                    remote = %remote.last_updated,
                    "Local progress newer, pushed to remote store"
                );
                self.mirror_if_unchanged(user_id, local, &stored).await?;
                Ok(ReconcileOutcome::PushedLocal)
            }
            Ordering::Less => {
                tracing::info!(
                    user_id = user_id,
                    local = %local.last_updated,
                    remote = %remote.last_updated,
                    "Remote progress newer, replacing local cache"
                );
                self.mirror_if_unchanged(user_id, local, &remote).await?;
                Ok(ReconcileOutcome::PulledRemote)
            }
            Ordering::Equal => Ok(ReconcileOutcome::InSync),
        }
    }

    /// Write `record` locally unless the cache moved on since `seen` was read.
    /// A local write made while the pass was in flight is left for the next pass.
    async fn mirror_if_unchanged(
        &self,
        user_id: &str,
        seen: &ProgressRecord,
        record: &ProgressRecord,
    ) -> SyncResult<bool> {
        let current = self.ctx.local.get(user_id).await?;
        if current.as_ref().map(|c| c.last_updated) != Some(seen.last_updated) {
            tracing::debug!(
                user_id = user_id,
                "Local progress changed during reconciliation, keeping it"
            );
            return Ok(false);
        }
        self.ctx.local.set(user_id, record).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::error::SyncError;
    use crate::local_cache::{InMemoryLocalCache, LocalCache};
    use crate::remote::{InMemoryRemoteStore, MockRemoteProgressStore, RemoteProgressStore};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()))
    }

    fn reconciler_with(
        remote: Arc<dyn RemoteProgressStore>,
        local: Arc<InMemoryLocalCache>,
        clock: Arc<ManualClock>,
    ) -> ProgressReconciler {
        ProgressReconciler::new(SyncContext::new(remote, local, clock, Duration::from_secs(1)))
    }

    fn record_at(clock: &ManualClock, offset_secs: i64, balance: f64) -> ProgressRecord {
        let mut record =
            ProgressRecord::new_default("user-a", clock.now() - ChronoDuration::hours(1));
        record.last_updated = clock.now() + ChronoDuration::seconds(offset_secs);
        record.balance = balance;
        record
    }

    #[tokio::test]
    async fn test_no_local_is_a_no_op() {
        let clock = clock();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let local = Arc::new(InMemoryLocalCache::new());

        let outcome = reconciler_with(remote.clone(), local.clone(), clock)

            .reconcile("user-a")

            .await;

        assert_eq!(outcome, ReconcileOutcome::NoLocal);
        assert_eq!(remote.row_count(), 0);
        assert_eq!(local.last_synced("user-a", SyncMarker::Reconcile).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remote_newer_replaces_local() {
        let clock = clock();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let local = Arc::new(InMemoryLocalCache::new());
        local.set("user-a", &record_at(&clock, -120, 100.0)).await.unwrap();
        let newer = record_at(&clock, -60, 150.0);
        remote.put_row(newer.clone());

        let outcome = reconciler_with(remote.clone(), local.clone(), clock.clone())

            .reconcile("user-a")

            .await;

        assert_eq!(outcome, ReconcileOutcome::PulledRemote);
        assert_eq!(local.get("user-a").await.unwrap(), Some(newer));
        assert_eq!(remote.write_count(), 0);
        assert_eq!(
            local.last_synced("user-a", SyncMarker::Reconcile).await.unwrap(),
            Some(clock.now())
        );
    }

    #[tokio::test]
    async fn test_local_newer_is_pushed_with_fresh_stamp() {
        let clock = clock();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let local = Arc::new(InMemoryLocalCache::new());
        remote.put_row(record_at(&clock, -120, 150.0));
        local.set("user-a", &record_at(&clock, -60, 200.0)).await.unwrap();

        let outcome = reconciler_with(remote.clone(), local.clone(), clock.clone())

            .reconcile("user-a")

            .await;

        assert_eq!(outcome, ReconcileOutcome::PushedLocal);
        let stored = remote.row("user-a").unwrap();
        assert_eq!(stored.balance, 200.0);
        assert_eq!(stored.last_updated, clock.now());
        assert_eq!(local.get("user-a").await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_equal_stamps_are_in_sync() {
        let clock = clock();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let local = Arc::new(InMemoryLocalCache::new());
        let record = record_at(&clock, -30, 42.0);
        remote.put_row(record.clone());
        local.set("user-a", &record).await.unwrap();

        let outcome = reconciler_with(remote.clone(), local, clock).reconcile("user-a").await;
        assert_eq!(outcome, ReconcileOutcome::InSync);
        assert_eq!(remote.write_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_remote_row_is_created() {
        let clock = clock();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let local = Arc::new(InMemoryLocalCache::new());
        local.set("user-a", &record_at(&clock, -600, 80.0)).await.unwrap();

        let outcome = reconciler_with(remote.clone(), local.clone(), clock.clone())

            .reconcile("user-a")

            .await;

        assert_eq!(outcome, ReconcileOutcome::PushedMissing);
        let stored = remote.row("user-a").unwrap();
        assert_eq!(stored.balance, 80.0);
        assert_eq!(stored.last_updated, clock.now());
        assert_eq!(local.get("user-a").await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_insert_race_compares_against_winner() {
        let clock = clock();
        let local = Arc::new(InMemoryLocalCache::new());
        local.set("user-a", &record_at(&clock, -600, 80.0)).await.unwrap();
        let winner = record_at(&clock, -10, 90.0);
        let read_back = winner.clone();

        let mut remote = MockRemoteProgressStore::new();
        let mut seq = mockall::Sequence::new();
        remote
            .expect_read_row()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|id| Err(SyncError::NotFound(id.to_string())));
        remote
            .expect_insert_row()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(SyncError::DuplicateKey("user_progress_user_id_key".into())));
        remote
            .expect_read_row()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(read_back.clone()));
        remote.expect_upsert_row().never();

        let outcome = reconciler_with(Arc::new(remote), local.clone(), clock)

            .reconcile("user-a")

            .await;

        assert_eq!(outcome, ReconcileOutcome::PulledRemote);
        assert_eq!(local.get("user-a").await.unwrap(), Some(winner));
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_raised() {
        let clock = clock();
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.set_offline(true);
        let local = Arc::new(InMemoryLocalCache::new());
        let cached = record_at(&clock, 0, 5.0);
        local.set("user-a", &cached).await.unwrap();

        let outcome = reconciler_with(remote, local.clone(), clock).reconcile("user-a").await;

        assert!(outcome.is_failure());
        assert_eq!(local.get("user-a").await.unwrap(), Some(cached));
        assert_eq!(local.last_synced("user-a", SyncMarker::Reconcile).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_write_during_pass_is_kept() {
        let clock = clock();
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.put_row(record_at(&clock, -60, 150.0));
        remote.set_latency(Some(Duration::from_millis(200)));
        let local = Arc::new(InMemoryLocalCache::new());
        local.set("user-a", &record_at(&clock, -120, 100.0)).await.unwrap();

        let reconciler = reconciler_with(remote, local.clone(), clock.clone());
        let pass = tokio::spawn(async move { reconciler.reconcile("user-a").await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let edited = record_at(&clock, 0, 120.0);
        local.set("user-a", &edited).await.unwrap();

        assert_eq!(pass.await.unwrap(), ReconcileOutcome::PulledRemote);
        assert_eq!(local.get("user-a").await.unwrap(), Some(edited));
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_value(ReconcileOutcome::Failed("offline".into())).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["reason"], "offline");
        let json = serde_json::to_value(ReconcileOutcome::PulledRemote).unwrap();
        assert_eq!(json["outcome"], "pulled_remote");
    }
}
