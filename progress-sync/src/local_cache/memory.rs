//! Process-local cache, used in tests and ephemeral sessions

use super::{LocalCache, SyncMarker};
use crate::error::SyncResult;
use crate::model::ProgressRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryLocalCache {
    records: DashMap<String, ProgressRecord>,
    markers: DashMap<String, DateTime<Utc>>,
}

impl InMemoryLocalCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalCache for InMemoryLocalCache {
    async fn get(&self, user_id: &str) -> SyncResult<Option<ProgressRecord>> {
        Ok(self.records.get(user_id).map(|entry| entry.value().clone()))
    }

    async fn set(&self, user_id: &str, record: &ProgressRecord) -> SyncResult<()> {
        self.records.insert(user_id.to_string(), record.clone());
        Ok(())
    }

    async fn remove(&self, user_id: &str) -> SyncResult<()> {
        self.records.remove(user_id);
        Ok(())
    }

    async fn mark_synced(
        &self,
        user_id: &str,
        marker: SyncMarker,
        at: DateTime<Utc>,
    ) -> SyncResult<()> {
        self.markers.insert(marker.key(user_id), at);
        Ok(())
    }

    async fn last_synced(
        &self,
        user_id: &str,
        marker: SyncMarker,
    ) -> SyncResult<Option<DateTime<Utc>>> {
        Ok(self.markers.get(&marker.key(user_id)).map(|entry| *entry.value()))
    }

    async fn clear_user(&self, user_id: &str) -> SyncResult<()> {
        self.records.remove(user_id);
        for marker in [SyncMarker::Fetch, SyncMarker::Reconcile] {
            self.markers.remove(&marker.key(user_id));
        }
        Ok(())
    }
}
