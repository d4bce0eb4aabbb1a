//! In-process remote store
//!
//! Behaves like the hosted table (unique `user_id`, column defaults on
//! insert, server-side stamps left as given) and can be switched offline or
//! slowed down to exercise fallback paths.

use super::row::ProgressPatch;
use super::RemoteProgressStore;
use crate::clock::{Clock, SystemClock};
use crate::error::{SyncError, SyncResult};
use crate::model::ProgressRecord;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct InMemoryRemoteStore {
    rows: Arc<DashMap<String, ProgressRecord>>,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
    writes: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// The clock fills `created_at` for rows first created through an upsert.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
            offline: AtomicBool::new(false),
            latency: Mutex::new(None),
            writes: AtomicU64::new(0),
            clock,
        }
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay applied before each call completes.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = latency;
        }
    }

    /// Write a row directly, as another device would.
    pub fn put_row(&self, record: ProgressRecord) {
        self.rows.insert(record.user_id.clone(), record);
    }

    pub fn row(&self, user_id: &str) -> Option<ProgressRecord> {
        self.rows.get(user_id).map(|entry| entry.value().clone())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of successful insert/upsert/update calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    async fn round_trip(&self) -> SyncResult<()> {
        let latency = self.latency.lock().ok().and_then(|guard| *guard);
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("remote store unreachable".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteProgressStore for InMemoryRemoteStore {
    async fn read_row(&self, user_id: &str) -> SyncResult<ProgressRecord> {
        self.round_trip().await?;
        self.row(user_id)
            .ok_or_else(|| SyncError::NotFound(format!("user_progress/{}", user_id)))
    }

    async fn insert_row(&self, record: &ProgressRecord) -> SyncResult<ProgressRecord> {
        self.round_trip().await?;
        match self.rows.entry(record.user_id.clone()) {
            Entry::Occupied(_) => Err(SyncError::DuplicateKey(format!(
                "user_progress_user_id_key ({})",
                record.user_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(record.clone())
            }
        }
    }

    async fn upsert_row(&self, patch: &ProgressPatch) -> SyncResult<ProgressRecord> {
        self.round_trip().await?;
        let stored = match self.rows.entry(patch.user_id.clone()) {
            Entry::Occupied(mut existing) => {
                patch.apply_to(existing.get_mut());
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                let record = patch.to_new_record(self.clock.now());
                slot.insert(record.clone());
                record
            }
        };
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn update_row(&self, user_id: &str, patch: &ProgressPatch) -> SyncResult<()> {
        self.round_trip().await?;
        match self.rows.get_mut(user_id) {
            Some(mut existing) => {
                patch.apply_to(existing.value_mut());
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(SyncError::NotFound(format!("user_progress/{}", user_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProgressUpdate;
    use chrono::Utc;

    #[tokio::test]
    async fn test_read_missing_row_is_not_found() {
        let store = InMemoryRemoteStore::new();
        let err = store.read_row("nobody").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_insert_is_unique_per_user() {
        let store = InMemoryRemoteStore::new();
        let record = ProgressRecord::new_default("user-a", Utc::now());

        store.insert_row(&record).await.unwrap();
        let err = store.insert_row(&record).await.unwrap_err();

        assert!(err.is_duplicate_key());
        assert_eq!(store.row_count(), 1);
    }

    #[tokio::test]
    async fn test_upsert_merges_into_existing_row() {
        let store = InMemoryRemoteStore::new();
        let now = Utc::now();
        store.put_row(ProgressRecord::new_default("user-a", now));

        let update = ProgressUpdate::new().with_balance(25.0);
        let patch = ProgressPatch::from_update("user-a", &update, now);
        let stored = store.upsert_row(&patch).await.unwrap();

        assert_eq!(stored.balance, 25.0);
        assert_eq!(stored.wheels_remaining, 3);
        assert_eq!(store.row_count(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_existing_row() {
        let store = InMemoryRemoteStore::new();
        let update = ProgressUpdate::new().with_balance(1.0);
        let patch = ProgressPatch::from_update("ghost", &update, Utc::now());
        assert!(store.update_row("ghost", &patch).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let store = InMemoryRemoteStore::new();
        store.put_row(ProgressRecord::new_default("user-a", Utc::now()));
        store.set_offline(true);

        assert!(store.read_row("user-a").await.unwrap_err().is_transport());

        store.set_offline(false);
        assert!(store.read_row("user-a").await.is_ok());
    }
}
