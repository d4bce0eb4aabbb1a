//! Remote progress store
//!
//! The hosted backend is a keyed-row service with its own consistency
//! guarantees; `user_id` is unique. Implementations report a missing row as
//! [`SyncError::NotFound`] and a uniqueness violation as
//! [`SyncError::DuplicateKey`] so callers can branch on them.

pub mod memory;
pub mod postgrest;
pub mod row;

pub use memory::InMemoryRemoteStore;
pub use postgrest::PostgrestProgressStore;
pub use row::{ProgressPatch, ProgressRow};

use crate::error::{SyncError, SyncResult};
use crate::model::ProgressRecord;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteProgressStore: Send + Sync {
    /// Fetch the row for `user_id`.
    async fn read_row(&self, user_id: &str) -> SyncResult<ProgressRecord>;

    /// Insert a brand new row; fails with `DuplicateKey` if one exists.
    async fn insert_row(&self, record: &ProgressRecord) -> SyncResult<ProgressRecord>;

    /// Insert-or-update keyed by `user_id`, returning the stored row.
    async fn upsert_row(&self, patch: &ProgressPatch) -> SyncResult<ProgressRecord>;

    /// Update columns of an existing row.
    async fn update_row(&self, user_id: &str, patch: &ProgressPatch) -> SyncResult<()>;
}

/// Run a remote call with an upper bound; expiry counts as a transport failure.
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(limit)),
    }
}
