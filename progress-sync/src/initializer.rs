//! Progress initializer
//!
//! Guarantees a progress row exists for a user. Creation relies on the
//! remote uniqueness constraint on `user_id`: losing an insert race is
//! answered by reading the row the winner created.

use crate::context::{validate_user_id, SyncContext};
use crate::error::SyncResult;
use crate::model::ProgressRecord;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitSource {
    /// Already cached on this device
    Local,
    /// Existing remote row, now cached
    Remote,
    /// Freshly created remotely and cached
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitOutcome {
    pub record: ProgressRecord,
    pub source: InitSource,
}

#[derive(Clone)]
pub struct ProgressInitializer {
    ctx: SyncContext,
}

impl ProgressInitializer {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// # Errors
    ///
    /// Any remote failure other than "row not found" on the initial read, or
    /// any insert failure other than a duplicate key.
    pub async fn initialize(&self, user_id: &str) -> SyncResult<InitOutcome> {
        validate_user_id(user_id)?;

        match self.ctx.local.get(user_id).await {
            Ok(Some(record)) => {
                return Ok(InitOutcome {
                    record,
                    source: InitSource::Local,
                })
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    user_id = user_id,
                    error = %e,
                    "Local cache unreadable, checking remote store"
                );
            }
        }

        match self.ctx.remote_call(self.ctx.remote.read_row(user_id)).await {
            Ok(record) => return Ok(self.adopt_remote(user_id, record).await),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let fresh = ProgressRecord::new_default(user_id, self.ctx.now());
        match self.ctx.remote_call(self.ctx.remote.insert_row(&fresh)).await {
            Ok(stored) => {
                self.ctx.cache_confirmed(user_id, &stored).await;
                tracing::info!(user_id = user_id, "Created progress record");
                Ok(InitOutcome {
                    record: stored,
                    source: InitSource::Both,
                })
            }
            Err(e) if e.is_duplicate_key() => {
                tracing::info!(
                    user_id = user_id,
                    "Progress row created concurrently, reading it back"
                );
                let record = self.ctx.remote_call(self.ctx.remote.read_row(user_id)).await?;
                Ok(self.adopt_remote(user_id, record).await)
            }
            Err(e) => Err(e),
        }
    }

    async fn adopt_remote(&self, user_id: &str, record: ProgressRecord) -> InitOutcome {
        self.ctx.cache_confirmed(user_id, &record).await;
        InitOutcome {
            record,
            source: InitSource::Remote,
        }
    }
}
