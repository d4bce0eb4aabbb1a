//! Progress fetcher
//!
//! Remote first; on any remote failure the cached record is served and
//! tagged as unsynced so the UI keeps working in degraded mode.

use crate::context::{validate_user_id, SyncContext};
use crate::error::SyncResult;
use crate::local_cache::SyncMarker;
use crate::model::ProgressRecord;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    Remote,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchOutcome {
    pub record: ProgressRecord,
    pub source: FetchSource,
    /// False when the record may lag behind the remote store
    pub synced: bool,
}

#[derive(Clone)]
pub struct ProgressFetcher {
    ctx: SyncContext,
}

impl ProgressFetcher {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// # Errors
    ///
    /// Returns the remote error when the remote read fails and nothing is
    /// cached for the user.
    pub async fn fetch(&self, user_id: &str) -> SyncResult<FetchOutcome> {
        validate_user_id(user_id)?;

        let remote_err = match self.ctx.remote_call(self.ctx.remote.read_row(user_id)).await {
            Ok(record) => {
                self.ctx.cache_confirmed(user_id, &record).await;
                if let Err(e) = self
                    .ctx
                    .local
                    .mark_synced(user_id, SyncMarker::Fetch, self.ctx.now())
                    .await
                {
                    tracing::warn!(
                        user_id = user_id,
                        error = %e,
                        "Failed to record fetch sync time"
                    );
                }

                tracing::debug!(user_id = user_id, "Fetched progress from remote store");
                return Ok(FetchOutcome {
                    record,
                    source: FetchSource::Remote,
                    synced: true,
                });
            }
            Err(e) => e,
        };

        tracing::warn!(
            user_id = user_id,
            error = %remote_err,
            "Remote progress read failed, falling back to local cache"
        );

        match self.ctx.local.get(user_id).await {
            Ok(Some(record)) => Ok(FetchOutcome {
                record,
                source: FetchSource::Cache,
                synced: false,
            }),
            Ok(None) => Err(remote_err),
            Err(cache_err) => {
                tracing::warn!(user_id = user_id, error = %cache_err, "Local cache read failed");
                Err(remote_err)
            }
        }
    }
}
