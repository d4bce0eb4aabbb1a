//! Offline-first synchronization of user progress
//!
//! Provides:
//! - Local SQLite cache of the last known progress record
//! - Remote-first fetch with cache fallback
//! - Idempotent initialization against a unique `user_id` constraint
//! - Optimistic updates with rollback on remote rejection
//! - Last-write-wins reconciliation, periodic and on reconnect

pub mod actions;
pub mod clock;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod initializer;
pub mod local_cache;
pub mod model;
pub mod network;
pub mod reconciler;
pub mod remote;
pub mod updater;

pub use actions::{ProgressActions, ReviewKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use context::SyncContext;
pub use coordinator::{ReconcileGuard, ReconcilePermit, SessionHandle, SyncCoordinator};
pub use error::{SyncError, SyncResult};
pub use fetcher::{FetchOutcome, FetchSource, ProgressFetcher};
pub use initializer::{InitOutcome, InitSource, ProgressInitializer};
pub use local_cache::sqlite::LocalCacheConfig;
pub use local_cache::{InMemoryLocalCache, LocalCache, SqliteLocalCache, SyncMarker};
pub use model::{ProgressRecord, ProgressUpdate, Theme};
pub use network::{NetworkMonitor, NetworkStatus};
pub use reconciler::{ProgressReconciler, ReconcileOutcome};
pub use remote::{InMemoryRemoteStore, PostgrestProgressStore, RemoteProgressStore};
pub use updater::ProgressUpdater;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Progress sync engine handed to the UI layer
pub struct ProgressSync {
    config: SyncConfig,
    ctx: SyncContext,
    fetcher: ProgressFetcher,
    initializer: ProgressInitializer,
    updater: ProgressUpdater,
    actions: ProgressActions,
    coordinator: Arc<SyncCoordinator>,
    postgrest: Option<Arc<PostgrestProgressStore>>,
}

impl ProgressSync {
    /// Open the SQLite cache and talk to the hosted table over PostgREST.
    ///
    /// # Errors
    ///
    /// Invalid configuration, or a cache database that cannot be opened.
    pub async fn connect(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let remote = Arc::new(PostgrestProgressStore::new(&config)?);
        let mut sync = Self::open(config, remote.clone()).await?;
        sync.postgrest = Some(remote);
        Ok(sync)
    }

    /// Open the SQLite cache with a caller-supplied remote store.
    ///
    /// # Errors
    ///
    /// Invalid configuration, or a cache database that cannot be opened.
    pub async fn open(
        config: SyncConfig,
        remote: Arc<dyn RemoteProgressStore>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let local = SqliteLocalCache::new(LocalCacheConfig::from(&config)).await?;
        Ok(Self::with_stores(config, remote, Arc::new(local), Arc::new(SystemClock)))
    }

    pub fn with_stores(
        config: SyncConfig,
        remote: Arc<dyn RemoteProgressStore>,
        local: Arc<dyn LocalCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ctx = SyncContext::new(remote, local, clock, config.remote_timeout);
        let coordinator =
            SyncCoordinator::new(ctx.clone(), NetworkMonitor::new(), config.sync_interval);

        Self {
            fetcher: ProgressFetcher::new(ctx.clone()),
            initializer: ProgressInitializer::new(ctx.clone()),
            updater: ProgressUpdater::new(ctx.clone()),
            actions: ProgressActions::new(ctx.clone()),
            coordinator: Arc::new(coordinator),
            postgrest: None,
            config,
            ctx,
        }
    }

    /// Hand the signed-in user's session token to the hosted store; `None`
    /// falls back to the project key.
    ///
    /// Returns `false` when the engine was built around another remote store,
    /// which then owns its own credentials.
    pub fn set_access_token(&self, token: Option<String>) -> bool {
        match &self.postgrest {
            Some(store) => {
                store.set_access_token(token);
                true
            }
            None => false,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn network(&self) -> &NetworkMonitor {
        self.coordinator.network()
    }

    pub async fn fetch_progress(&self, user_id: &str) -> SyncResult<FetchOutcome> {
        self.fetcher.fetch(user_id).await
    }

    pub async fn initialize_progress(&self, user_id: &str) -> SyncResult<InitOutcome> {
        self.initializer.initialize(user_id).await
    }

    pub async fn update_progress(
        &self,
        user_id: &str,
        update: &ProgressUpdate,
    ) -> SyncResult<ProgressRecord> {
        self.updater.update(user_id, update).await
    }

    /// Fire-and-forget; the result shows up in the next fetch. The handle
    /// may be dropped.
    pub fn reconcile(&self, user_id: &str) -> JoinHandle<ReconcileOutcome> {
        self.coordinator.trigger_reconcile(user_id)
    }

    pub async fn reconcile_now(&self, user_id: &str) -> ReconcileOutcome {
        self.coordinator.reconcile_now(user_id).await
    }

    pub async fn add_points(&self, user_id: &str, delta: f64) -> SyncResult<ProgressRecord> {
        self.actions.add_points(user_id, delta).await
    }

    pub async fn consume_wheel(&self, user_id: &str) -> SyncResult<ProgressRecord> {
        self.actions.consume_wheel(user_id).await
    }

    pub async fn record_review(
        &self,
        user_id: &str,
        kind: ReviewKind,
    ) -> SyncResult<ProgressRecord> {
        self.actions.record_review(user_id, kind).await
    }

    pub async fn set_theme(&self, user_id: &str, theme: Theme) -> SyncResult<ProgressRecord> {
        self.actions.set_theme(user_id, theme).await
    }

    pub async fn reset_daily_if_due(&self, user_id: &str) -> SyncResult<bool> {
        self.actions.reset_daily_if_due(user_id).await
    }

    pub async fn last_synced(
        &self,
        user_id: &str,
        marker: SyncMarker,
    ) -> SyncResult<Option<DateTime<Utc>>> {
        self.ctx.local.last_synced(user_id, marker).await
    }

    /// Sign-in: initialize and start the periodic sync task.
    pub async fn start_session(&self, user_id: &str) -> SyncResult<InitOutcome> {
        self.coordinator.start_session(user_id).await
    }

    /// Sign-out or user switch.
    pub async fn end_session(&self, user_id: &str, clear_local: bool) -> SyncResult<()> {
        self.coordinator.stop_session(user_id, clear_local).await
    }

    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }
}
