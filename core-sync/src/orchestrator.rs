//! # Sync Orchestrator
//!
//! Drives reconciliation passes between the local content store and the
//! remote file store, one container at a time.
//!
//! ## Workflow
//!
//! 1. Acquire the container's single-flight slot (reject if a pass is
//!    already running)
//! 2. Ensure the container has a remote folder mapping, creating the folder
//!    on first sync (failure here aborts the pass)
//! 3. Enumerate local nodes, remote files, and metadata rows, and join them
//!    into one per-node view
//! 4. Classify every node (`diff::classify`), gate the action by the pass
//!    direction, and apply it: upload, download, remote delete, or nothing
//! 5. Resolve conflicts via the configured strategy, recording the
//!    `Conflict` status before resolution so an interrupted pass leaves an
//!    auditable trail
//! 6. Record per-node outcomes in the metadata store and aggregate them
//!    into a [`SyncReport`]
//!
//! Per-node transfers run concurrently up to `max_concurrent_transfers`;
//! each node's metadata is written only by its own transfer task. A failure
//! on one node never aborts its siblings: it is recorded as `Failed` on the
//! node's metadata row and surfaced in the report.
//!
//! ## Cancellation and timeout
//!
//! Every pass owns a `CancellationToken`. `pause` cancels it; the token is
//! honored between node transfers, never mid-transfer, so an in-flight
//! upload or download completes (or fails) naturally. A pass-level timeout
//! works the same way: nodes not yet dispatched when the deadline passes are
//! marked `Failed` with a timeout message, and the report still covers
//! everything processed before it.

use crate::{
    diff::{classify, SyncAction, TOLERANCE_SECS},
    metadata::{
        ContainerMapping, ContainerSyncStatus, MetadataRepository, SyncMetadata, SyncStatus,
    },
    resolver::{resolve, ConflictStrategy, ConflictWinner},
    Result, SyncError,
};
use bridge_traits::{RemoteErrorKind, RemoteFile, RemoteFileStore};
use bytes::Bytes;
use core_content::{Container, ContainerId, ContentNode, NodeId, NodeRepository};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum concurrent per-node transfers within one pass
    pub max_concurrent_transfers: usize,

    /// Total attempts per remote operation (first try included); only
    /// transient errors are retried
    pub retry_attempts: u32,

    /// Base backoff delay, doubled on each retry
    pub retry_base_delay_ms: u64,

    /// Wall-clock budget for one pass; nodes not dispatched in time fail
    /// with a timeout error
    pub sync_timeout_secs: u64,

    /// Timestamp delta treated as "the same moment" by the diff detector
    pub tolerance_secs: i64,

    /// Strategy applied to conflicts during a full (bidirectional) pass
    pub conflict_strategy: ConflictStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 4,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            sync_timeout_secs: 3600, // 1 hour
            tolerance_secs: TOLERANCE_SECS,
            conflict_strategy: ConflictStrategy::LastWriteWins,
        }
    }
}

// ============================================================================
// Pass Results
// ============================================================================

/// Transfer direction of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Push local changes only
    Up,
    /// Pull remote changes only
    Down,
    /// Reconcile both directions
    Full,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Up => "up",
            SyncDirection::Down => "down",
            SyncDirection::Full => "full",
        }
    }
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One node that could not be reconciled, with the recorded cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub node_id: NodeId,
    pub message: String,
}

/// Aggregated outcome of one sync pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub container_id: ContainerId,
    pub direction: SyncDirection,
    /// Nodes enumerated for the pass (tombstoned included)
    pub total_items: u64,
    pub pushed: u64,
    pub pulled: u64,
    pub deleted: u64,
    pub idle: u64,
    pub conflicts_resolved: u64,
    pub failed: u64,
    pub failures: Vec<ItemFailure>,
    /// Unix seconds at pass start
    pub started_at: i64,
    pub duration_ms: u64,
}

impl SyncReport {
    fn new(container_id: ContainerId, direction: SyncDirection, started_at: i64) -> Self {
        Self {
            container_id,
            direction,
            total_items: 0,
            pushed: 0,
            pulled: 0,
            deleted: 0,
            idle: 0,
            conflicts_resolved: 0,
            failed: 0,
            failures: Vec::new(),
            started_at,
            duration_ms: 0,
        }
    }

    /// Nodes whose content actually moved in either direction
    pub fn transferred(&self) -> u64 {
        self.pushed + self.pulled + self.deleted + self.conflicts_resolved
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Per-node result inside a pass
#[derive(Debug, Clone)]
enum ItemOutcome {
    Pushed,
    Pulled,
    Deleted,
    Idle,
    ConflictResolved,
    Failed(String),
}

/// Joined per-node view: the local node (required), its metadata row and the
/// matching remote descriptor (both optional)
#[derive(Debug, Clone)]
struct ItemPlan {
    node: ContentNode,
    meta: Option<SyncMetadata>,
    remote: Option<RemoteFile>,
}

/// In-flight pass bookkeeping for single-flight enforcement and pause
struct ActiveSync {
    direction: SyncDirection,
    token: CancellationToken,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Orchestrates sync passes over containers.
///
/// The orchestrator is the sole writer of the metadata store. At most one
/// pass runs per container at a time; a second call for the same container
/// is rejected with [`SyncError::SyncInProgress`]. Passes for different
/// containers run fully concurrently.
pub struct SyncOrchestrator {
    config: SyncConfig,
    remote: Arc<dyn RemoteFileStore>,
    nodes: Arc<dyn NodeRepository>,
    metadata: Arc<dyn MetadataRepository>,
    active: Arc<Mutex<HashMap<ContainerId, ActiveSync>>>,
}

impl Clone for SyncOrchestrator {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            remote: Arc::clone(&self.remote),
            nodes: Arc::clone(&self.nodes),
            metadata: Arc::clone(&self.metadata),
            active: Arc::clone(&self.active),
        }
    }
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        remote: Arc<dyn RemoteFileStore>,
        nodes: Arc<dyn NodeRepository>,
        metadata: Arc<dyn MetadataRepository>,
    ) -> Self {
        Self {
            config,
            remote,
            nodes,
            metadata,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reconcile both directions for a container.
    #[instrument(skip(self), fields(container_id = %container_id))]
    pub async fn full_sync(&self, container_id: ContainerId) -> Result<SyncReport> {
        self.run_pass(container_id, SyncDirection::Full).await
    }

    /// Push local changes only; never downloads remote content.
    #[instrument(skip(self), fields(container_id = %container_id))]
    pub async fn sync_up(&self, container_id: ContainerId) -> Result<SyncReport> {
        self.run_pass(container_id, SyncDirection::Up).await
    }

    /// Pull remote changes only; never uploads local content.
    #[instrument(skip(self), fields(container_id = %container_id))]
    pub async fn sync_down(&self, container_id: ContainerId) -> Result<SyncReport> {
        self.run_pass(container_id, SyncDirection::Down).await
    }

    /// Aggregate per-node sync state for a container, computed from the
    /// metadata store alone. Performs no remote I/O, and because every
    /// metadata mutation is a single statement the counts always reflect a
    /// node's pre- or post-sync state, never a torn intermediate.
    pub async fn get_status(&self, container_id: ContainerId) -> Result<ContainerSyncStatus> {
        self.nodes
            .find_container(container_id)
            .await?
            .ok_or_else(|| SyncError::ContainerNotFound {
                container_id: container_id.to_string(),
            })?;

        let counts = self.metadata.status_counts(container_id).await?;
        let total_items = self.nodes.count_live(container_id).await?;
        let mapping = self.metadata.find_mapping(container_id).await?;

        Ok(ContainerSyncStatus {
            container_id,
            total_items,
            synced: counts.synced,
            pending: counts.pending,
            conflicts: counts.conflicts,
            failed: counts.failed,
            last_sync_at: mapping.and_then(|m| m.last_sync_at),
        })
    }

    /// Cooperatively cancel the in-flight pass for a container, if any.
    /// Takes effect between node transfers; the current transfer completes
    /// naturally. Returns `false` when no pass is running.
    pub async fn pause(&self, container_id: ContainerId) -> bool {
        let active = self.active.lock().await;
        match active.get(&container_id) {
            Some(sync) => {
                info!(%container_id, direction = %sync.direction, "Pausing sync pass");
                sync.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a pass is currently running for a container.
    pub async fn is_sync_active(&self, container_id: ContainerId) -> bool {
        self.active.lock().await.contains_key(&container_id)
    }

    // ------------------------------------------------------------------
    // Pass execution
    // ------------------------------------------------------------------

    async fn run_pass(
        &self,
        container_id: ContainerId,
        direction: SyncDirection,
    ) -> Result<SyncReport> {
        let token = CancellationToken::new();

        // Single-flight: claim the container or reject.
        {
            let mut active = self.active.lock().await;
            if active.contains_key(&container_id) {
                return Err(SyncError::SyncInProgress {
                    container_id: container_id.to_string(),
                });
            }
            active.insert(
                container_id,
                ActiveSync {
                    direction,
                    token: token.clone(),
                },
            );
        }

        let result = self.execute_pass(container_id, direction, token).await;

        self.active.lock().await.remove(&container_id);

        result
    }

    async fn execute_pass(
        &self,
        container_id: ContainerId,
        direction: SyncDirection,
        token: CancellationToken,
    ) -> Result<SyncReport> {
        let started = Instant::now();
        let started_at = chrono::Utc::now().timestamp();

        let container = self
            .nodes
            .find_container(container_id)
            .await?
            .ok_or_else(|| SyncError::ContainerNotFound {
                container_id: container_id.to_string(),
            })?;

        // Bootstrap: the mapping must exist before any per-node work. A
        // failure here is fatal for the pass and leaves metadata untouched.
        let mapping = self.ensure_mapping(&container).await?;

        let local_nodes = self.nodes.list_by_container(container_id).await?;
        let remote_files = {
            let remote = Arc::clone(&self.remote);
            let folder_id = mapping.remote_folder_id.clone();
            self.with_retry("list", move || {
                let remote = Arc::clone(&remote);
                let folder_id = folder_id.clone();
                async move { remote.list(&folder_id).await }
            })
            .await
            .map_err(SyncError::Remote)?
        };
        let metadata_rows = self.metadata.list_by_container(container_id).await?;

        info!(
            %container_id,
            %direction,
            local = local_nodes.len(),
            remote = remote_files.len(),
            tracked = metadata_rows.len(),
            "Starting sync pass"
        );

        let plans = build_plans(local_nodes, metadata_rows, remote_files);

        let mut report = SyncReport::new(container_id, direction, started_at);
        report.total_items = plans.len() as u64;

        let deadline = started + Duration::from_secs(self.config.sync_timeout_secs);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers.max(1)));
        let strategy = self.strategy_for(direction);

        let mut join_set: JoinSet<(NodeId, ItemOutcome)> = JoinSet::new();
        for plan in plans {
            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let token = token.clone();
            let folder_id = mapping.remote_folder_id.clone();
            join_set.spawn(async move {
                let node_id = plan.node.id;
                let permit = semaphore.acquire_owned().await;
                if permit.is_err() {
                    return (node_id, ItemOutcome::Failed("worker pool closed".to_string()));
                }
                this.process_item(plan, &folder_id, direction, strategy, &token, deadline)
                    .await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((node_id, outcome)) => match outcome {
                    ItemOutcome::Pushed => report.pushed += 1,
                    ItemOutcome::Pulled => report.pulled += 1,
                    ItemOutcome::Deleted => report.deleted += 1,
                    ItemOutcome::Idle => report.idle += 1,
                    ItemOutcome::ConflictResolved => report.conflicts_resolved += 1,
                    ItemOutcome::Failed(message) => {
                        report.failed += 1;
                        report.failures.push(ItemFailure { node_id, message });
                    }
                },
                Err(e) => {
                    error!(error = %e, "Transfer task failed to complete");
                    report.failed += 1;
                }
            }
        }

        self.metadata
            .touch_mapping(container_id, chrono::Utc::now().timestamp())
            .await?;

        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            %container_id,
            %direction,
            pushed = report.pushed,
            pulled = report.pulled,
            deleted = report.deleted,
            idle = report.idle,
            conflicts_resolved = report.conflicts_resolved,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "Sync pass complete"
        );

        Ok(report)
    }

    /// Conflicts encountered during a directional pass always resolve toward
    /// that direction; full passes use the configured strategy.
    fn strategy_for(&self, direction: SyncDirection) -> ConflictStrategy {
        match direction {
            SyncDirection::Up => ConflictStrategy::LocalWins,
            SyncDirection::Down => ConflictStrategy::RemoteWins,
            SyncDirection::Full => self.config.conflict_strategy,
        }
    }

    async fn ensure_mapping(&self, container: &Container) -> Result<ContainerMapping> {
        if let Some(mapping) = self.metadata.find_mapping(container.id).await? {
            return Ok(mapping);
        }

        let folder_id = {
            let remote = Arc::clone(&self.remote);
            let name = container.title.clone();
            self.with_retry("create_folder", move || {
                let remote = Arc::clone(&remote);
                let name = name.clone();
                async move { remote.create_folder(&name, None).await }
            })
            .await
            .map_err(|e| SyncError::Bootstrap {
                container_id: container.id.to_string(),
                message: e.to_string(),
            })?
        };

        let mapping = ContainerMapping::new(container.id, folder_id);
        self.metadata.insert_mapping(&mapping).await?;

        info!(
            container_id = %container.id,
            remote_folder_id = %mapping.remote_folder_id,
            "Created remote folder for container"
        );

        Ok(mapping)
    }

    // ------------------------------------------------------------------
    // Per-node processing
    // ------------------------------------------------------------------

    async fn process_item(
        &self,
        plan: ItemPlan,
        folder_id: &str,
        direction: SyncDirection,
        strategy: ConflictStrategy,
        token: &CancellationToken,
        deadline: Instant,
    ) -> (NodeId, ItemOutcome) {
        let node_id = plan.node.id;

        // Cancellation and timeout take effect here, between transfers.
        let skipped = if token.is_cancelled() {
            Some(SyncError::Cancelled)
        } else if Instant::now() >= deadline {
            Some(SyncError::Timeout(self.config.sync_timeout_secs))
        } else {
            None
        };
        if let Some(e) = skipped {
            let message = e.to_string();
            self.record_failure(&plan.node, plan.meta, &message).await;
            return (node_id, ItemOutcome::Failed(message));
        }

        let action = classify(
            &plan.node,
            plan.meta.as_ref(),
            plan.remote.as_ref(),
            self.config.tolerance_secs,
        );
        let action = gate_for_direction(action, direction);

        debug!(%node_id, action = ?action, %direction, "Classified node");

        let result = match action {
            SyncAction::Idle => Ok(ItemOutcome::Idle),
            SyncAction::Push => self
                .apply_push(&plan.node, plan.meta.as_ref(), plan.remote.as_ref(), folder_id)
                .await
                .map(|()| ItemOutcome::Pushed),
            SyncAction::Pull => match plan.remote.as_ref() {
                Some(remote) => self
                    .apply_pull(&plan.node, plan.meta.as_ref(), remote)
                    .await
                    .map(|()| ItemOutcome::Pulled),
                None => Ok(ItemOutcome::Idle),
            },
            SyncAction::Delete => self
                .apply_delete(&plan.node, plan.meta.as_ref())
                .await
                .map(|()| ItemOutcome::Deleted),
            SyncAction::Conflict => {
                self.apply_conflict(&plan, folder_id, strategy)
                    .await
                    .map(|()| ItemOutcome::ConflictResolved)
            }
        };

        match result {
            Ok(outcome) => (node_id, outcome),
            Err(e) => {
                warn!(%node_id, error = %e, "Node transfer failed");
                let message = e.to_string();
                self.record_failure(&plan.node, plan.meta, &message).await;
                (node_id, ItemOutcome::Failed(message))
            }
        }
    }

    async fn apply_push(
        &self,
        node: &ContentNode,
        meta: Option<&SyncMetadata>,
        remote: Option<&RemoteFile>,
        folder_id: &str,
    ) -> Result<()> {
        let payload = encode_payload(&node.title, &node.body);

        // An untracked remote file matched by name still counts as the
        // existing copy: overwrite it, never upload a duplicate beside it.
        let known_file_id = meta
            .and_then(|m| m.remote_file_id.clone())
            .or_else(|| remote.map(|r| r.id.clone()));

        let (file_id, remote_modified) = match known_file_id {
            Some(file_id) => {
                let update = {
                    let remote = Arc::clone(&self.remote);
                    let file_id = file_id.clone();
                    let payload = payload.clone();
                    self.with_retry("update", move || {
                        let remote = Arc::clone(&remote);
                        let file_id = file_id.clone();
                        let payload = payload.clone();
                        async move { remote.update(&file_id, payload).await }
                    })
                    .await
                };
                match update {
                    Ok(modified_at) => (file_id, modified_at),
                    Err(e) if e.kind == RemoteErrorKind::NotFound => {
                        // The remote file vanished out from under the
                        // mapping; re-create it rather than failing the node.
                        warn!(node_id = %node.id, "Remote file missing on update, re-uploading");
                        self.upload_fresh(node, folder_id, payload).await?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => self.upload_fresh(node, folder_id, payload).await?,
        };

        let now = chrono::Utc::now().timestamp();
        // A completed reconciliation covers both observed timestamps, even
        // when one side's clock runs ahead of ours; otherwise the next pass
        // would re-classify this very write as a fresh change.
        let sync_time = now.max(remote_modified).max(node.modified_at);
        self.metadata
            .upsert(&SyncMetadata {
                node_id: node.id,
                remote_file_id: Some(file_id),
                remote_folder_id: Some(folder_id.to_string()),
                last_local_modified: node.modified_at,
                last_remote_modified: Some(remote_modified),
                last_sync_time: Some(sync_time),
                status: SyncStatus::Synced,
                error_message: None,
                updated_at: now,
            })
            .await?;

        Ok(())
    }

    /// Upload a new remote file for a node, returning its id and observed
    /// remote modification time.
    async fn upload_fresh(
        &self,
        node: &ContentNode,
        folder_id: &str,
        payload: Bytes,
    ) -> Result<(String, i64)> {
        let name = remote_file_name(node.id);

        let file_id = {
            let remote = Arc::clone(&self.remote);
            let folder_id = folder_id.to_string();
            let name = name.clone();
            self.with_retry("upload", move || {
                let remote = Arc::clone(&remote);
                let folder_id = folder_id.clone();
                let name = name.clone();
                let payload = payload.clone();
                async move { remote.upload(&folder_id, &name, payload).await }
            })
            .await?
        };

        let remote_modified = {
            let remote = Arc::clone(&self.remote);
            let file_id = file_id.clone();
            let observed = self
                .with_retry("get_metadata", move || {
                    let remote = Arc::clone(&remote);
                    let file_id = file_id.clone();
                    async move { remote.get_metadata(&file_id).await }
                })
                .await;
            match observed {
                Ok(desc) => desc.modified_at,
                Err(e) => {
                    // The upload itself succeeded; fall back to our own
                    // clock and let the tolerance window absorb the skew.
                    warn!(node_id = %node.id, error = %e, "Could not read back remote timestamp");
                    chrono::Utc::now().timestamp()
                }
            }
        };

        Ok((file_id, remote_modified))
    }

    async fn apply_pull(
        &self,
        node: &ContentNode,
        meta: Option<&SyncMetadata>,
        remote_desc: &RemoteFile,
    ) -> Result<()> {
        let content = {
            let remote = Arc::clone(&self.remote);
            let file_id = remote_desc.id.clone();
            self.with_retry("download", move || {
                let remote = Arc::clone(&remote);
                let file_id = file_id.clone();
                async move { remote.download(&file_id).await }
            })
            .await?
        };

        let (title, body) = decode_payload(&content);
        let title = title.unwrap_or_else(|| node.title.clone());
        self.nodes.overwrite_content(node.id, &title, &body).await?;

        // The store stamped `modified_at` during the write; read it back so
        // the metadata row mirrors what is actually persisted.
        let refreshed = self
            .nodes
            .find_by_id(node.id)
            .await?
            .ok_or_else(|| SyncError::Content(core_content::ContentError::NotFound {
                entity_type: "ContentNode".to_string(),
                id: node.id.to_string(),
            }))?;

        let now = chrono::Utc::now().timestamp();
        // Cover both observed timestamps; a remote clock running ahead of
        // ours must not leave this row looking changed-since-sync.
        let sync_time = now.max(remote_desc.modified_at).max(refreshed.modified_at);
        self.metadata
            .upsert(&SyncMetadata {
                node_id: node.id,
                remote_file_id: Some(remote_desc.id.clone()),
                remote_folder_id: meta.and_then(|m| m.remote_folder_id.clone()),
                last_local_modified: refreshed.modified_at,
                last_remote_modified: Some(remote_desc.modified_at),
                last_sync_time: Some(sync_time),
                status: SyncStatus::Synced,
                error_message: None,
                updated_at: now,
            })
            .await?;

        Ok(())
    }

    async fn apply_delete(&self, node: &ContentNode, meta: Option<&SyncMetadata>) -> Result<()> {
        let Some(file_id) = meta.and_then(|m| m.remote_file_id.clone()) else {
            // classify() only returns Delete when a remote file id is known
            return Ok(());
        };

        let deleted = {
            let remote = Arc::clone(&self.remote);
            let file_id = file_id.clone();
            self.with_retry("delete", move || {
                let remote = Arc::clone(&remote);
                let file_id = file_id.clone();
                async move { remote.delete(&file_id).await }
            })
            .await
        };

        match deleted {
            Ok(()) => {}
            // Already gone remotely; the tombstone is settled either way.
            Err(e) if e.kind == RemoteErrorKind::NotFound => {
                debug!(node_id = %node.id, "Remote file already deleted");
            }
            Err(e) => return Err(e.into()),
        }

        // Purge the tombstoned row; its metadata goes with it via cascade.
        self.nodes.purge(node.id).await?;

        Ok(())
    }

    async fn apply_conflict(
        &self,
        plan: &ItemPlan,
        folder_id: &str,
        strategy: ConflictStrategy,
    ) -> Result<()> {
        // Record the conflict before resolving it, so a crash between
        // detection and resolution leaves an auditable trail.
        let mut row = plan
            .meta
            .clone()
            .unwrap_or_else(|| SyncMetadata::pending(plan.node.id, plan.node.modified_at));
        row.status = SyncStatus::Conflict;
        row.error_message = None;
        row.updated_at = chrono::Utc::now().timestamp();
        self.metadata.upsert(&row).await?;

        let Some(remote_desc) = plan.remote.as_ref() else {
            // Conflicts without a remote side (interrupted first sync):
            // local content is the only candidate.
            return self.apply_push(&plan.node, Some(&row), None, folder_id).await;
        };

        let winner = resolve(strategy, plan.node.modified_at, remote_desc.modified_at);
        debug!(node_id = %plan.node.id, winner = ?winner, strategy = strategy.as_str(), "Resolved conflict");

        match winner {
            ConflictWinner::Local => {
                self.apply_push(&plan.node, Some(&row), Some(remote_desc), folder_id)
                    .await
            }
            ConflictWinner::Remote => self.apply_pull(&plan.node, Some(&row), remote_desc).await,
        }
    }

    /// Record a per-node failure on its metadata row. Failures here are
    /// logged rather than propagated: the outcome is already `Failed` and a
    /// bookkeeping error must not abort sibling transfers.
    async fn record_failure(
        &self,
        node: &ContentNode,
        meta: Option<SyncMetadata>,
        message: &str,
    ) {
        let mut row = meta.unwrap_or_else(|| SyncMetadata::pending(node.id, node.modified_at));
        row.status = SyncStatus::Failed;
        row.error_message = Some(message.to_string());
        row.updated_at = chrono::Utc::now().timestamp();

        if let Err(e) = self.metadata.upsert(&row).await {
            error!(node_id = %node.id, error = %e, "Failed to record node failure");
        }
    }

    // ------------------------------------------------------------------
    // Retry
    // ------------------------------------------------------------------

    /// Run a remote operation with retries on transient failures, doubling
    /// the backoff delay after each attempt. Non-transient errors are
    /// returned immediately.
    async fn with_retry<T, F, Fut>(&self, op: &str, mut f: F) -> bridge_traits::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bridge_traits::Result<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.retry_attempts.max(1) => {
                    let delay = Duration::from_millis(
                        self.config.retry_base_delay_ms << (attempt - 1),
                    );
                    warn!(
                        op,
                        attempt,
                        max_attempts = self.config.retry_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient remote error, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// Free helpers
// ============================================================================

/// Restrict an action to what a pass direction is allowed to do. Anything
/// outside the direction is left untouched for a later pass.
fn gate_for_direction(action: SyncAction, direction: SyncDirection) -> SyncAction {
    match direction {
        SyncDirection::Full => action,
        SyncDirection::Up => match action {
            SyncAction::Push | SyncAction::Delete | SyncAction::Conflict => action,
            SyncAction::Pull | SyncAction::Idle => SyncAction::Idle,
        },
        SyncDirection::Down => match action {
            SyncAction::Pull | SyncAction::Conflict => action,
            SyncAction::Push | SyncAction::Delete | SyncAction::Idle => SyncAction::Idle,
        },
    }
}

/// Stable remote file name for a node. Derived from the id, not the title,
/// so renames never orphan the remote file.
fn remote_file_name(node_id: NodeId) -> String {
    format!("{}.md", node_id)
}

/// Serialize a node's title and body into the pushed file layout.
fn encode_payload(title: &str, body: &str) -> Bytes {
    Bytes::from(format!("# {}\n\n{}", title, body))
}

/// Split a pulled file back into title and body. Files not produced by
/// `encode_payload` keep their full text as the body and leave the title
/// untouched.
fn decode_payload(content: &[u8]) -> (Option<String>, String) {
    let text = String::from_utf8_lossy(content);
    match text.strip_prefix("# ") {
        Some(rest) => match rest.split_once("\n\n") {
            Some((title, body)) => (Some(title.trim_end().to_string()), body.to_string()),
            None => (Some(rest.trim_end().to_string()), String::new()),
        },
        None => (None, text.into_owned()),
    }
}

/// Join local nodes, metadata rows, and remote files into per-node plans.
///
/// Remote files are matched by the recorded `remote_file_id` when a metadata
/// row exists, and by the deterministic file name otherwise (which is how a
/// file uploaded by another device, or before a metadata wipe, is detected
/// as a provenance conflict).
fn build_plans(
    local_nodes: Vec<ContentNode>,
    metadata_rows: Vec<SyncMetadata>,
    remote_files: Vec<RemoteFile>,
) -> Vec<ItemPlan> {
    let mut meta_by_node: HashMap<NodeId, SyncMetadata> = metadata_rows
        .into_iter()
        .map(|m| (m.node_id, m))
        .collect();

    let mut id_by_name: HashMap<String, String> = remote_files
        .iter()
        .map(|f| (f.name.clone(), f.id.clone()))
        .collect();
    let mut remote_by_id: HashMap<String, RemoteFile> =
        remote_files.into_iter().map(|f| (f.id.clone(), f)).collect();

    local_nodes
        .into_iter()
        .map(|node| {
            let meta = meta_by_node.remove(&node.id);
            let remote = match meta.as_ref().and_then(|m| m.remote_file_id.as_deref()) {
                Some(file_id) => remote_by_id.remove(file_id),
                None => id_by_name
                    .remove(&remote_file_name(node.id))
                    .and_then(|file_id| remote_by_id.remove(&file_id)),
            };
            ItemPlan { node, meta, remote }
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trip() {
        let payload = encode_payload("Photosynthesis", "Light reactions:\n- PSII\n- PSI");
        let (title, body) = decode_payload(&payload);

        assert_eq!(title.as_deref(), Some("Photosynthesis"));
        assert_eq!(body, "Light reactions:\n- PSII\n- PSI");
    }

    #[test]
    fn test_decode_payload_without_header() {
        let (title, body) = decode_payload(b"plain text, no header");
        assert!(title.is_none());
        assert_eq!(body, "plain text, no header");
    }

    #[test]
    fn test_decode_payload_title_only() {
        let (title, body) = decode_payload(b"# Just a title");
        assert_eq!(title.as_deref(), Some("Just a title"));
        assert_eq!(body, "");
    }

    #[test]
    fn test_gate_up_never_pulls() {
        assert_eq!(
            gate_for_direction(SyncAction::Pull, SyncDirection::Up),
            SyncAction::Idle
        );
        assert_eq!(
            gate_for_direction(SyncAction::Push, SyncDirection::Up),
            SyncAction::Push
        );
        assert_eq!(
            gate_for_direction(SyncAction::Delete, SyncDirection::Up),
            SyncAction::Delete
        );
    }

    #[test]
    fn test_gate_down_never_pushes() {
        assert_eq!(
            gate_for_direction(SyncAction::Push, SyncDirection::Down),
            SyncAction::Idle
        );
        assert_eq!(
            gate_for_direction(SyncAction::Delete, SyncDirection::Down),
            SyncAction::Idle
        );
        assert_eq!(
            gate_for_direction(SyncAction::Pull, SyncDirection::Down),
            SyncAction::Pull
        );
    }

    #[test]
    fn test_gate_full_passes_through() {
        for action in [
            SyncAction::Push,
            SyncAction::Pull,
            SyncAction::Idle,
            SyncAction::Conflict,
            SyncAction::Delete,
        ] {
            assert_eq!(gate_for_direction(action, SyncDirection::Full), action);
        }
    }

    #[test]
    fn test_build_plans_matches_by_file_id_then_name() {
        let container_id = ContainerId::new();
        let tracked = ContentNode::new(container_id, "Tracked", "");
        let untracked = ContentNode::new(container_id, "Untracked", "");

        let mut meta = SyncMetadata::pending(tracked.id, tracked.modified_at);
        meta.remote_file_id = Some("file-a".to_string());

        let remote_files = vec![
            RemoteFile {
                id: "file-a".to_string(),
                name: "renamed-by-hand.md".to_string(),
                modified_at: 1,
                size: None,
            },
            RemoteFile {
                id: "file-b".to_string(),
                name: remote_file_name(untracked.id),
                modified_at: 2,
                size: None,
            },
        ];

        let plans = build_plans(vec![tracked.clone(), untracked.clone()], vec![meta], remote_files);

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].node.id, tracked.id);
        assert_eq!(plans[0].remote.as_ref().map(|r| r.id.as_str()), Some("file-a"));
        assert_eq!(plans[1].node.id, untracked.id);
        assert_eq!(plans[1].remote.as_ref().map(|r| r.id.as_str()), Some("file-b"));
    }

    #[test]
    fn test_report_accounting() {
        let mut report = SyncReport::new(ContainerId::new(), SyncDirection::Full, 0);
        report.pushed = 2;
        report.pulled = 1;
        report.deleted = 1;
        report.conflicts_resolved = 1;
        report.idle = 3;

        assert_eq!(report.transferred(), 5);
        assert!(report.is_clean());

        report.failed = 1;
        assert!(!report.is_clean());
    }
}
