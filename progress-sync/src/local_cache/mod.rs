//! On-device cache of the last known progress record
//!
//! One entry per user identity. The cache has a single writer (the current
//! session), so no cross-process coordination happens here.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryLocalCache;
pub use sqlite::SqliteLocalCache;

use crate::error::SyncResult;
use crate::model::ProgressRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Bookkeeping timestamps kept next to the cached record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMarker {
    /// Last time a fetch was served by the remote store
    Fetch,
    /// Last successful reconciliation pass
    Reconcile,
}

impl SyncMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMarker::Fetch => "last_fetch_sync",
            SyncMarker::Reconcile => "last_reconcile",
        }
    }

    pub(crate) fn key(&self, user_id: &str) -> String {
        format!("{}:{}", self.as_str(), user_id)
    }
}

#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn get(&self, user_id: &str) -> SyncResult<Option<ProgressRecord>>;

    async fn set(&self, user_id: &str, record: &ProgressRecord) -> SyncResult<()>;

    async fn remove(&self, user_id: &str) -> SyncResult<()>;

    async fn mark_synced(
        &self,
        user_id: &str,
        marker: SyncMarker,
        at: DateTime<Utc>,
    ) -> SyncResult<()>;

    async fn last_synced(
        &self,
        user_id: &str,
        marker: SyncMarker,
    ) -> SyncResult<Option<DateTime<Utc>>>;

    /// Drop the record and all markers for a user (sign-out).
    async fn clear_user(&self, user_id: &str) -> SyncResult<()>;
}
