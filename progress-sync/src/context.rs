//! Shared handles passed to every sync component

use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};
use crate::local_cache::LocalCache;
use crate::model::ProgressRecord;
use crate::remote::{bounded, RemoteProgressStore};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct SyncContext {
    pub remote: Arc<dyn RemoteProgressStore>,
    pub local: Arc<dyn LocalCache>,
    pub clock: Arc<dyn Clock>,
    pub remote_timeout: Duration,
}

impl SyncContext {
    pub fn new(
        remote: Arc<dyn RemoteProgressStore>,
        local: Arc<dyn LocalCache>,
        clock: Arc<dyn Clock>,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            remote,
            local,
            clock,
            remote_timeout,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Remote call bounded by the configured timeout.
    pub(crate) async fn remote_call<T, F>(&self, call: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        bounded(self.remote_timeout, call).await
    }

    /// Mirror a remote-confirmed record locally. The remote write already
    /// succeeded, so a cache failure is logged rather than returned.
    pub(crate) async fn cache_confirmed(&self, user_id: &str, record: &ProgressRecord) {
        if let Err(e) = self.local.set(user_id, record).await {
            tracing::warn!(
                user_id = user_id,
                error = %e,
                "Failed to mirror remote progress into local cache"
            );
        }
    }
}

pub(crate) fn validate_user_id(user_id: &str) -> SyncResult<()> {
    if user_id.trim().is_empty() {
        return Err(SyncError::Validation("user_id must not be empty".to_string()));
    }
    Ok(())
}
