//! Sync coordinator
//!
//! Owns the per-user reconciliation guard and the periodic session tasks.
//! A session task reconciles on every interval tick and whenever the host
//! reports the network coming back, until its shutdown channel fires.

use crate::actions::ProgressActions;
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::initializer::{InitOutcome, InitSource, ProgressInitializer};
use crate::network::{NetworkMonitor, NetworkStatus};
use crate::reconciler::{ProgressReconciler, ReconcileOutcome};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// At most one in-flight reconciliation per user
#[derive(Clone, Default)]
pub struct ReconcileGuard {
    in_flight: Arc<DashSet<String>>,
}

impl ReconcileGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another pass for `user_id` holds the permit.
    pub fn try_acquire(&self, user_id: &str) -> Option<ReconcilePermit> {
        if !self.in_flight.insert(user_id.to_string()) {
            return None;
        }
        Some(ReconcilePermit {
            in_flight: Arc::clone(&self.in_flight),
            user_id: user_id.to_string(),
        })
    }

    pub fn is_running(&self, user_id: &str) -> bool {
        self.in_flight.contains(user_id)
    }
}

/// Released on drop
pub struct ReconcilePermit {
    in_flight: Arc<DashSet<String>>,
    user_id: String,
}

impl Drop for ReconcilePermit {
    fn drop(&mut self) {
        self.in_flight.remove(&self.user_id);
    }
}

#[derive(Clone)]
struct ReconcileRunner {
    reconciler: ProgressReconciler,
    guard: ReconcileGuard,
}

impl ReconcileRunner {
    async fn run(&self, user_id: &str) -> ReconcileOutcome {
        let Some(_permit) = self.guard.try_acquire(user_id) else {
            tracing::debug!(
                user_id = user_id,
                "Reconciliation already in flight, dropping trigger"
            );
            return ReconcileOutcome::Skipped;
        };
        self.reconciler.reconcile(user_id).await
    }
}

/// Cancellation handle for a running session task
pub struct SessionHandle {
    user_id: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Signal the task and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(
                user_id = %self.user_id,
                error = %e,
                "Session task ended abnormally"
            );
        }
    }
}

pub struct SyncCoordinator {
    runner: ReconcileRunner,
    initializer: ProgressInitializer,
    actions: ProgressActions,
    ctx: SyncContext,
    network: NetworkMonitor,
    interval: Duration,
    sessions: DashMap<String, SessionHandle>,
}

impl SyncCoordinator {
    pub fn new(ctx: SyncContext, network: NetworkMonitor, interval: Duration) -> Self {
        Self {
            runner: ReconcileRunner {
                reconciler: ProgressReconciler::new(ctx.clone()),
                guard: ReconcileGuard::new(),
            },
            initializer: ProgressInitializer::new(ctx.clone()),
            actions: ProgressActions::new(ctx.clone()),
            ctx,
            network,
            interval,
            sessions: DashMap::new(),
        }
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn guard(&self) -> &ReconcileGuard {
        &self.runner.guard
    }

    /// Reconcile now, or `Skipped` if a pass for this user is in flight.
    pub async fn reconcile_now(&self, user_id: &str) -> ReconcileOutcome {
        self.runner.run(user_id).await
    }

    /// Fire-and-forget reconciliation.
    pub fn trigger_reconcile(&self, user_id: &str) -> JoinHandle<ReconcileOutcome> {
        let runner = self.runner.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move { runner.run(&user_id).await })
    }

    /// Initialize progress for `user_id` and start its periodic sync task.
    ///
    /// One user is signed in at a time: sessions of other users are stopped
    /// first, and a session already running for the same user is replaced.
    /// Local records of the previous user are kept; use
    /// [`SyncCoordinator::stop_session`] with `clear_local` for sign-out.
    ///
    /// # Errors
    ///
    /// Fails only if initialization fails; a failed daily reset is logged.
    pub async fn start_session(&self, user_id: &str) -> SyncResult<InitOutcome> {
        let others: Vec<String> = self
            .active_sessions()
            .into_iter()
            .filter(|other| other != user_id)
            .collect();
        for other in others {
            if let Some((_, handle)) = self.sessions.remove(&other) {
                tracing::info!(
                    user_id = %other,
                    next_user_id = user_id,
                    "Stopping session on user switch"
                );
                handle.stop().await;
            }
        }

        let mut outcome = self.initializer.initialize(user_id).await?;

        if outcome.source == InitSource::Local {
            // The cached record may predate writes made on another device
            let reconciled = self.runner.run(user_id).await;
            tracing::debug!(
                user_id = user_id,
                outcome = ?reconciled,
                "Startup reconciliation"
            );
        }

        if let Err(e) = self.actions.reset_daily_if_due(user_id).await {
            tracing::warn!(user_id = user_id, error = %e, "Daily reset deferred");
        }

        match self.ctx.local.get(user_id).await {
            Ok(Some(record)) => outcome.record = record,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    user_id = user_id,
                    error = %e,
                    "Failed to re-read progress after session start"
                );
            }
        }

        let handle = self.spawn_session(user_id);
        if let Some(previous) = self.sessions.insert(user_id.to_string(), handle) {
            tracing::debug!(user_id = user_id, "Replacing existing sync session");
            previous.stop().await;
        }

        tracing::info!(
            user_id = user_id,
            source = ?outcome.source,
            interval_secs = self.interval.as_secs(),
            "Sync session started"
        );
        Ok(outcome)
    }

    /// Stop the session task for `user_id`; with `clear_local` also drop the
    /// cached record and sync markers (sign-out).
    ///
    /// # Errors
    ///
    /// Returns the local cache error if clearing fails.
    pub async fn stop_session(&self, user_id: &str, clear_local: bool) -> SyncResult<()> {
        if let Some((_, handle)) = self.sessions.remove(user_id) {
            handle.stop().await;
            tracing::info!(user_id = user_id, "Sync session stopped");
        }
        if clear_local {
            self.ctx.local.clear_user(user_id).await?;
        }
        Ok(())
    }

    pub fn has_session(&self, user_id: &str) -> bool {
        self.sessions.contains_key(user_id)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Stop every session task.
    pub async fn shutdown(&self) {
        let users = self.active_sessions();
        for user_id in users {
            if let Some((_, handle)) = self.sessions.remove(&user_id) {
                handle.stop().await;
            }
        }
        tracing::info!("Sync coordinator shut down");
    }

    fn spawn_session(&self, user_id: &str) -> SessionHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_session(
            user_id.to_string(),
            self.runner.clone(),
            self.network.subscribe(),
            shutdown_rx,
            self.interval,
        ));
        SessionHandle {
            user_id: user_id.to_string(),
            shutdown,
            task,
        }
    }
}

async fn run_session(
    user_id: String,
    runner: ReconcileRunner,
    mut network: watch::Receiver<NetworkStatus>,
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut status = *network.borrow_and_update();
    let mut network_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if status == NetworkStatus::Offline {
                    tracing::debug!(
                        user_id = %user_id,
                        "Offline, skipping scheduled reconciliation"
                    );
                    continue;
                }
                let outcome = runner.run(&user_id).await;
                tracing::debug!(
                    user_id = %user_id,
                    outcome = ?outcome,
                    "Scheduled reconciliation"
                );
            }
            changed = network.changed(), if network_open => {
                if changed.is_err() {
                    network_open = false;
                    continue;
                }
                let next = *network.borrow_and_update();
                let previous = std::mem::replace(&mut status, next);
                if next == NetworkStatus::Online && previous != NetworkStatus::Online {
                    tracing::info!(user_id = %user_id, "Back online, reconciling");
                    let outcome = runner.run(&user_id).await;
                    tracing::debug!(
                        user_id = %user_id,
                        outcome = ?outcome,
                        "Reconnect reconciliation"
                    );
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    tracing::debug!(user_id = %user_id, "Sync session task exited");
}
