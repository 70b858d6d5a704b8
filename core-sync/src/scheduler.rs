//! # Sync Scheduler
//!
//! Periodically triggers full sync passes for watched containers. Each
//! watched container gets its own long-lived task; pausing a container
//! cancels that task (and any in-flight pass, cooperatively) without
//! touching the other containers, and resuming spawns a fresh one.
//!
//! The scheduler owns no sync logic: it only decides *when* to call the
//! orchestrator, which keeps its own single-flight guard. A tick that lands
//! while a manually-triggered pass is still running is simply skipped.

use crate::orchestrator::SyncOrchestrator;
use crate::SyncError;
use core_content::ContainerId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between automatic passes per container
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300, // 5 minutes
        }
    }
}

struct WatchedContainer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic sync driver over a set of watched containers
pub struct SyncScheduler {
    orchestrator: SyncOrchestrator,
    config: SchedulerConfig,
    watched: Mutex<HashMap<ContainerId, WatchedContainer>>,
}

impl SyncScheduler {
    pub fn new(orchestrator: SyncOrchestrator, config: SchedulerConfig) -> Self {
        Self {
            orchestrator,
            config,
            watched: Mutex::new(HashMap::new()),
        }
    }

    /// Start periodic syncing for a container. The first pass runs
    /// immediately, then every `interval_secs`. Returns `false` when the
    /// container is already being watched.
    #[instrument(skip(self), fields(container_id = %container_id))]
    pub async fn watch(&self, container_id: ContainerId) -> bool {
        let mut watched = self.watched.lock().await;
        if let Some(existing) = watched.get(&container_id) {
            if !existing.token.is_cancelled() {
                return false;
            }
        }

        info!(interval_secs = self.config.interval_secs, "Watching container");
        watched.insert(container_id, self.spawn_loop(container_id));
        true
    }

    /// Stop periodic syncing for a container entirely. Returns `false` when
    /// the container was not being watched.
    #[instrument(skip(self), fields(container_id = %container_id))]
    pub async fn unwatch(&self, container_id: ContainerId) -> bool {
        let mut watched = self.watched.lock().await;
        match watched.remove(&container_id) {
            Some(entry) => {
                entry.token.cancel();
                info!("Unwatched container");
                true
            }
            None => false,
        }
    }

    /// Pause a watched container: stops its tick loop and cooperatively
    /// cancels any in-flight pass. The container stays in the watched set
    /// so `resume` can pick it back up.
    #[instrument(skip(self), fields(container_id = %container_id))]
    pub async fn pause(&self, container_id: ContainerId) -> bool {
        let watched = self.watched.lock().await;
        let Some(entry) = watched.get(&container_id) else {
            return false;
        };
        if entry.token.is_cancelled() {
            return false;
        }

        entry.token.cancel();
        drop(watched);

        // Also interrupt the pass the loop may have in flight.
        self.orchestrator.pause(container_id).await;
        info!("Paused container");
        true
    }

    /// Resume a paused container with a fresh tick loop. Returns `false`
    /// when the container is not watched or not paused.
    #[instrument(skip(self), fields(container_id = %container_id))]
    pub async fn resume(&self, container_id: ContainerId) -> bool {
        let mut watched = self.watched.lock().await;
        match watched.get(&container_id) {
            Some(entry) if entry.token.is_cancelled() => {
                info!("Resuming container");
                watched.insert(container_id, self.spawn_loop(container_id));
                true
            }
            _ => false,
        }
    }

    /// Whether a container is watched and not paused.
    pub async fn is_running(&self, container_id: ContainerId) -> bool {
        self.watched
            .lock()
            .await
            .get(&container_id)
            .map_or(false, |entry| !entry.token.is_cancelled())
    }

    /// Stop all tick loops. Idempotent.
    pub async fn shutdown(&self) {
        let mut watched = self.watched.lock().await;
        for (container_id, entry) in watched.drain() {
            entry.token.cancel();
            debug!(%container_id, "Stopped sync loop");
        }
        info!("Scheduler shut down");
    }

    fn spawn_loop(&self, container_id: ContainerId) -> WatchedContainer {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let orchestrator = self.orchestrator.clone();
        let interval = Duration::from_secs(self.config.interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        debug!(%container_id, "Sync loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        match orchestrator.full_sync(container_id).await {
                            Ok(report) => {
                                debug!(
                                    %container_id,
                                    transferred = report.transferred(),
                                    failed = report.failed,
                                    "Scheduled pass complete"
                                );
                            }
                            // A manual pass beat us to the slot; try again
                            // next tick.
                            Err(SyncError::SyncInProgress { .. }) => {
                                debug!(%container_id, "Pass already running, skipping tick");
                            }
                            Err(e) => {
                                error!(%container_id, error = %e, "Scheduled pass failed");
                            }
                        }
                    }
                }
            }
        });

        WatchedContainer { token, handle }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        // Tick loops hold clones of the tokens; cancelling here lets them
        // wind down even if shutdown() was never called.
        if let Ok(watched) = self.watched.try_lock() {
            for entry in watched.values() {
                entry.token.cancel();
                entry.handle.abort();
            }
        }
    }
}
