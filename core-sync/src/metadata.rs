//! # Sync Metadata Store
//!
//! Per-node sync bookkeeping and the container-to-remote-folder mapping.
//!
//! ## Overview
//!
//! One `SyncMetadata` row exists per node that has ever entered a sync pass;
//! it records the last observed local and remote timestamps, the time of the
//! last successful reconciliation, and the current [`SyncStatus`]. One
//! `ContainerMapping` row exists per container once its remote folder has
//! been created; the folder id is immutable from then on.
//!
//! Both tables are written exclusively by the orchestrator. Every mutation is
//! a single statement, so status reads never observe a torn intermediate
//! state.

use crate::{Result, SyncError};
use async_trait::async_trait;
use core_content::{ContainerId, NodeId};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;

// ============================================================================
// Status
// ============================================================================

/// Sync outcome recorded on a node's metadata row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Row created but the node has not been successfully reconciled yet
    Pending,
    /// Last reconciliation completed
    Synced,
    /// Both sides changed since the last sync; resolution in progress or
    /// interrupted (the row is set to this before the resolver runs)
    Conflict,
    /// Last transfer attempt failed; `error_message` carries the cause
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "conflict" => Ok(SyncStatus::Conflict),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Per-node sync state. Unique on `node_id`; created lazily on the node's
/// first sync attempt and deleted only when the node itself is purged
/// (foreign-key cascade).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub node_id: NodeId,
    /// Opaque remote file id once the node has been uploaded
    pub remote_file_id: Option<String>,
    /// Folder the file lives in remotely
    pub remote_folder_id: Option<String>,
    /// Node's `modified_at` at the time of the last observation
    pub last_local_modified: i64,
    /// Remote `modified_at` at the time of the last observation
    pub last_remote_modified: Option<i64>,
    /// When this node was last successfully reconciled
    pub last_sync_time: Option<i64>,
    pub status: SyncStatus,
    pub error_message: Option<String>,
    pub updated_at: i64,
}

impl SyncMetadata {
    /// Fresh pending row for a node entering its first sync pass.
    pub fn pending(node_id: NodeId, last_local_modified: i64) -> Self {
        Self {
            node_id,
            remote_file_id: None,
            remote_folder_id: None,
            last_local_modified,
            last_remote_modified: None,
            last_sync_time: None,
            status: SyncStatus::Pending,
            error_message: None,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Convenience flag mirroring `status == Synced`.
    pub fn is_synced(&self) -> bool {
        self.status == SyncStatus::Synced
    }
}

/// Container-to-remote-folder mapping. `remote_folder_id` is immutable once
/// written; the folder is never recreated for a mapped container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMapping {
    pub container_id: ContainerId,
    pub remote_folder_id: String,
    pub last_sync_at: Option<i64>,
    pub created_at: i64,
}

impl ContainerMapping {
    pub fn new(container_id: ContainerId, remote_folder_id: impl Into<String>) -> Self {
        Self {
            container_id,
            remote_folder_id: remote_folder_id.into(),
            last_sync_at: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Aggregate view over a container's metadata rows, served by `get_status`
/// without touching the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSyncStatus {
    pub container_id: ContainerId,
    /// Live (non-tombstoned) nodes in the container
    pub total_items: i64,
    pub synced: i64,
    pub pending: i64,
    pub conflicts: i64,
    pub failed: i64,
    /// When the container last completed a pass, if ever
    pub last_sync_at: Option<i64>,
}

impl ContainerSyncStatus {
    /// Nodes that have no metadata row yet (never entered a sync pass).
    pub fn never_synced(&self) -> i64 {
        (self.total_items - self.synced - self.pending - self.conflicts - self.failed).max(0)
    }

    pub fn fully_synced(&self) -> bool {
        self.total_items > 0 && self.synced == self.total_items
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Persistence for sync metadata and container mappings
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    /// Insert or replace the metadata row for a node
    async fn upsert(&self, metadata: &SyncMetadata) -> Result<()>;

    /// Find the metadata row for a node
    async fn find_by_node(&self, node_id: NodeId) -> Result<Option<SyncMetadata>>;

    /// All metadata rows for nodes belonging to a container
    async fn list_by_container(&self, container_id: ContainerId) -> Result<Vec<SyncMetadata>>;

    /// Find a container's remote folder mapping
    async fn find_mapping(&self, container_id: ContainerId) -> Result<Option<ContainerMapping>>;

    /// Persist a new mapping. Fails if the container is already mapped; the
    /// folder id is never overwritten.
    async fn insert_mapping(&self, mapping: &ContainerMapping) -> Result<()>;

    /// Stamp the mapping's `last_sync_at`
    async fn touch_mapping(&self, container_id: ContainerId, last_sync_at: i64) -> Result<()>;

    /// Per-status counts for a container's metadata rows
    async fn status_counts(&self, container_id: ContainerId) -> Result<StatusCounts>;
}

/// Raw per-status row counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub synced: i64,
    pub pending: i64,
    pub conflicts: i64,
    pub failed: i64,
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`MetadataRepository`]
pub struct SqliteMetadataRepository {
    pool: SqlitePool,
}

impl SqliteMetadataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct MetadataRow {
    node_id: String,
    remote_file_id: Option<String>,
    remote_folder_id: Option<String>,
    last_local_modified: i64,
    last_remote_modified: Option<i64>,
    last_sync_time: Option<i64>,
    status: String,
    error_message: Option<String>,
    updated_at: i64,
}

impl TryFrom<MetadataRow> for SyncMetadata {
    type Error = SyncError;

    fn try_from(row: MetadataRow) -> Result<Self> {
        let node_id = NodeId::from_string(&row.node_id)
            .map_err(|e| SyncError::Database(format!("Invalid node_id: {}", e)))?;
        let status: SyncStatus = row.status.parse()?;

        Ok(SyncMetadata {
            node_id,
            remote_file_id: row.remote_file_id,
            remote_folder_id: row.remote_folder_id,
            last_local_modified: row.last_local_modified,
            last_remote_modified: row.last_remote_modified,
            last_sync_time: row.last_sync_time,
            status,
            error_message: row.error_message,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MappingRow {
    container_id: String,
    remote_folder_id: String,
    last_sync_at: Option<i64>,
    created_at: i64,
}

impl TryFrom<MappingRow> for ContainerMapping {
    type Error = SyncError;

    fn try_from(row: MappingRow) -> Result<Self> {
        let container_id = ContainerId::from_string(&row.container_id)
            .map_err(|e| SyncError::Database(format!("Invalid container_id: {}", e)))?;

        Ok(ContainerMapping {
            container_id,
            remote_folder_id: row.remote_folder_id,
            last_sync_at: row.last_sync_at,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl MetadataRepository for SqliteMetadataRepository {
    async fn upsert(&self, metadata: &SyncMetadata) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (
                node_id, remote_file_id, remote_folder_id,
                last_local_modified, last_remote_modified, last_sync_time,
                status, error_message, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (node_id) DO UPDATE SET
                remote_file_id = excluded.remote_file_id,
                remote_folder_id = excluded.remote_folder_id,
                last_local_modified = excluded.last_local_modified,
                last_remote_modified = excluded.last_remote_modified,
                last_sync_time = excluded.last_sync_time,
                status = excluded.status,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(metadata.node_id.as_str())
        .bind(&metadata.remote_file_id)
        .bind(&metadata.remote_folder_id)
        .bind(metadata.last_local_modified)
        .bind(metadata.last_remote_modified)
        .bind(metadata.last_sync_time)
        .bind(metadata.status.as_str())
        .bind(&metadata.error_message)
        .bind(metadata.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn find_by_node(&self, node_id: NodeId) -> Result<Option<SyncMetadata>> {
        let row = sqlx::query_as::<_, MetadataRow>(
            r#"
            SELECT node_id, remote_file_id, remote_folder_id,
                   last_local_modified, last_remote_modified, last_sync_time,
                   status, error_message, updated_at
            FROM sync_metadata
            WHERE node_id = ?
            "#,
        )
        .bind(node_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(SyncMetadata::try_from).transpose()
    }

    async fn list_by_container(&self, container_id: ContainerId) -> Result<Vec<SyncMetadata>> {
        let rows = sqlx::query_as::<_, MetadataRow>(
            r#"
            SELECT m.node_id, m.remote_file_id, m.remote_folder_id,
                   m.last_local_modified, m.last_remote_modified, m.last_sync_time,
                   m.status, m.error_message, m.updated_at
            FROM sync_metadata m
            JOIN content_nodes n ON n.id = m.node_id
            WHERE n.container_id = ?
            "#,
        )
        .bind(container_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter()
            .map(SyncMetadata::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn find_mapping(&self, container_id: ContainerId) -> Result<Option<ContainerMapping>> {
        let row = sqlx::query_as::<_, MappingRow>(
            r#"
            SELECT container_id, remote_folder_id, last_sync_at, created_at
            FROM container_mappings
            WHERE container_id = ?
            "#,
        )
        .bind(container_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(ContainerMapping::try_from).transpose()
    }

    async fn insert_mapping(&self, mapping: &ContainerMapping) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO container_mappings (container_id, remote_folder_id, last_sync_at, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(mapping.container_id.as_str())
        .bind(&mapping.remote_folder_id)
        .bind(mapping.last_sync_at)
        .bind(mapping.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn touch_mapping(&self, container_id: ContainerId, last_sync_at: i64) -> Result<()> {
        let result =
            sqlx::query("UPDATE container_mappings SET last_sync_at = ? WHERE container_id = ?")
                .bind(last_sync_at)
                .bind(container_id.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::Database(format!(
                "No mapping for container {}",
                container_id
            )));
        }

        Ok(())
    }

    async fn status_counts(&self, container_id: ContainerId) -> Result<StatusCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT m.status, COUNT(*)
            FROM sync_metadata m
            JOIN content_nodes n ON n.id = m.node_id
            WHERE n.container_id = ?
            GROUP BY m.status
            "#,
        )
        .bind(container_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status.parse::<SyncStatus>()? {
                SyncStatus::Synced => counts.synced = count,
                SyncStatus::Pending => counts.pending = count,
                SyncStatus::Conflict => counts.conflicts = count,
                SyncStatus::Failed => counts.failed = count,
            }
        }

        Ok(counts)
    }
}

// ============================================================================
// Tests
// ============================================================================
