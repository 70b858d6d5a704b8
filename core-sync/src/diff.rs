//! # Diff Detector
//!
//! Classifies one node into the action a sync pass must take for it, from
//! already-fetched timestamps only. Pure function; never performs I/O.
//!
//! ## Classification
//!
//! | metadata | remote file | local vs remote change | action |
//! |----------|-------------|------------------------|--------|
//! | none     | none        | -                      | `Push` (first upload) |
//! | none     | present     | -                      | `Conflict` (ambiguous provenance) |
//! | present  | -           | neither changed        | `Idle` |
//! | present  | -           | only local             | `Push` |
//! | present  | -           | only remote            | `Pull` |
//! | present  | -           | both                   | `Conflict` |
//!
//! A tombstoned node short-circuits to `Delete` when a remote file is known
//! to exist, `Idle` otherwise.
//!
//! ## Tolerance window
//!
//! When both a local and a remote timestamp are available and they lie
//! strictly within [`TOLERANCE_SECS`] of each other, the node is forced to
//! `Idle` regardless of which side is later. The two timestamps come from
//! independent clocks, and a sync pass itself touches both sides within one
//! operation; without the window every pass would re-classify its own writes
//! as fresh changes.

use bridge_traits::RemoteFile;
use core_content::ContentNode;

use crate::metadata::SyncMetadata;

/// Timestamp delta below which two independently-observed modification times
/// are treated as the same moment.
pub const TOLERANCE_SECS: i64 = 30;

/// Action a sync pass must take for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Local content is authoritative; upload it
    Push,
    /// Remote content is authoritative; download it
    Pull,
    /// Nothing to do
    Idle,
    /// Both sides changed since the last sync; a strategy must pick a winner
    Conflict,
    /// The node is tombstoned locally; remove the remote file
    Delete,
}

/// Classify one node given its metadata row (if any) and the matching remote
/// descriptor (if any).
///
/// `tolerance_secs` is configurable for callers but deployments are expected
/// to pass [`TOLERANCE_SECS`].
pub fn classify(
    node: &ContentNode,
    metadata: Option<&SyncMetadata>,
    remote: Option<&RemoteFile>,
    tolerance_secs: i64,
) -> SyncAction {
    if node.is_deleted() {
        // Deletion propagates only when something remote exists to remove.
        let has_remote = metadata.map_or(false, |m| m.remote_file_id.is_some());
        return if has_remote {
            SyncAction::Delete
        } else {
            SyncAction::Idle
        };
    }

    // A row without a completed sync behaves like no row at all: the last
    // pass never finished, so provenance is as ambiguous as on first contact.
    let last_sync_time = metadata.and_then(|m| m.last_sync_time);

    let Some(last_sync_time) = last_sync_time else {
        return match remote {
            Some(_) => SyncAction::Conflict,
            None => SyncAction::Push,
        };
    };

    if let Some(remote) = remote {
        if (node.modified_at - remote.modified_at).abs() < tolerance_secs {
            return SyncAction::Idle;
        }
    }

    let local_changed = node.modified_at > last_sync_time;
    let remote_changed = remote.map_or(false, |r| r.modified_at > last_sync_time);

    match (local_changed, remote_changed) {
        (false, false) => SyncAction::Idle,
        (true, false) => SyncAction::Push,
        (false, true) => SyncAction::Pull,
        (true, true) => SyncAction::Conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SyncStatus;
    use core_content::{ContainerId, NodeId};

    const T0: i64 = 1_700_000_000;

    fn node_modified_at(modified_at: i64) -> ContentNode {
        let mut node = ContentNode::new(ContainerId::new(), "Node", "body");
        node.modified_at = modified_at;
        node
    }

    fn tombstoned(modified_at: i64) -> ContentNode {
        let mut node = node_modified_at(modified_at);
        node.deleted_at = Some(modified_at);
        node
    }

    fn synced_meta(node_id: NodeId, last_sync_time: i64) -> SyncMetadata {
        let mut meta = SyncMetadata::pending(node_id, last_sync_time);
        meta.remote_file_id = Some("remote-file".to_string());
        meta.last_remote_modified = Some(last_sync_time);
        meta.last_sync_time = Some(last_sync_time);
        meta.status = SyncStatus::Synced;
        meta
    }

    fn remote_modified_at(modified_at: i64) -> RemoteFile {
        RemoteFile {
            id: "remote-file".to_string(),
            name: "node.md".to_string(),
            modified_at,
            size: Some(64),
        }
    }

    #[test]
    fn test_no_metadata_no_remote_is_first_push() {
        let node = node_modified_at(T0);
        assert_eq!(classify(&node, None, None, TOLERANCE_SECS), SyncAction::Push);
    }

    #[test]
    fn test_no_metadata_with_remote_is_conflict() {
        let node = node_modified_at(T0);
        let remote = remote_modified_at(T0 + 500);
        assert_eq!(
            classify(&node, None, Some(&remote), TOLERANCE_SECS),
            SyncAction::Conflict
        );
    }

    #[test]
    fn test_metadata_without_last_sync_behaves_like_first_contact() {
        let node = node_modified_at(T0);
        let meta = SyncMetadata::pending(node.id, T0);

        assert_eq!(
            classify(&node, Some(&meta), None, TOLERANCE_SECS),
            SyncAction::Push
        );

        let remote = remote_modified_at(T0 + 500);
        assert_eq!(
            classify(&node, Some(&meta), Some(&remote), TOLERANCE_SECS),
            SyncAction::Conflict
        );
    }

    #[test]
    fn test_neither_side_changed_is_idle() {
        let node = node_modified_at(T0);
        let meta = synced_meta(node.id, T0 + 100);
        let remote = remote_modified_at(T0 + 3600);

        // Remote is way ahead of local, outside tolerance, but not ahead of
        // the last sync time.
        let meta2 = synced_meta(node.id, T0 + 7200);
        assert_eq!(
            classify(&node, Some(&meta2), Some(&remote), TOLERANCE_SECS),
            SyncAction::Idle
        );

        // No remote file observed and local unchanged.
        assert_eq!(
            classify(&node, Some(&meta), None, TOLERANCE_SECS),
            SyncAction::Idle
        );
    }

    #[test]
    fn test_only_local_changed_is_push() {
        let node = node_modified_at(T0 + 500);
        let meta = synced_meta(node.id, T0);
        let remote = remote_modified_at(T0 - 300);

        assert_eq!(
            classify(&node, Some(&meta), Some(&remote), TOLERANCE_SECS),
            SyncAction::Push
        );
    }

    #[test]
    fn test_only_remote_changed_is_pull() {
        let node = node_modified_at(T0 - 300);
        let meta = synced_meta(node.id, T0);
        let remote = remote_modified_at(T0 + 500);

        assert_eq!(
            classify(&node, Some(&meta), Some(&remote), TOLERANCE_SECS),
            SyncAction::Pull
        );
    }

    #[test]
    fn test_both_changed_is_conflict() {
        let node = node_modified_at(T0 + 120);
        let meta = synced_meta(node.id, T0);
        let remote = remote_modified_at(T0 + 400);

        assert_eq!(
            classify(&node, Some(&meta), Some(&remote), TOLERANCE_SECS),
            SyncAction::Conflict
        );
    }

    #[test]
    fn test_tolerance_boundary_29s_is_idle() {
        // Both sides changed since last sync, but their timestamps are 29s
        // apart: forced Idle.
        let node = node_modified_at(T0 + 100);
        let meta = synced_meta(node.id, T0);
        let remote = remote_modified_at(T0 + 129);

        assert_eq!(
            classify(&node, Some(&meta), Some(&remote), TOLERANCE_SECS),
            SyncAction::Idle
        );
    }

    #[test]
    fn test_tolerance_boundary_31s_is_not_forced_idle() {
        let node = node_modified_at(T0 + 100);
        let meta = synced_meta(node.id, T0);
        let remote = remote_modified_at(T0 + 131);

        assert_eq!(
            classify(&node, Some(&meta), Some(&remote), TOLERANCE_SECS),
            SyncAction::Conflict
        );
    }

    #[test]
    fn test_tolerance_is_strict_at_exactly_30s() {
        let node = node_modified_at(T0 + 100);
        let meta = synced_meta(node.id, T0);
        let remote = remote_modified_at(T0 + 130);

        // Exactly 30s is outside the strict `< 30` window.
        assert_eq!(
            classify(&node, Some(&meta), Some(&remote), TOLERANCE_SECS),
            SyncAction::Conflict
        );
    }

    #[test]
    fn test_tolerance_applies_regardless_of_direction() {
        // Remote 29s behind local instead of ahead.
        let node = node_modified_at(T0 + 129);
        let meta = synced_meta(node.id, T0);
        let remote = remote_modified_at(T0 + 100);

        assert_eq!(
            classify(&node, Some(&meta), Some(&remote), TOLERANCE_SECS),
            SyncAction::Idle
        );
    }

    #[test]
    fn test_tombstone_with_remote_file_is_delete() {
        let node = tombstoned(T0);
        let meta = synced_meta(node.id, T0 - 100);

        assert_eq!(
            classify(&node, Some(&meta), None, TOLERANCE_SECS),
            SyncAction::Delete
        );
    }

    #[test]
    fn test_tombstone_never_uploaded_is_idle() {
        let node = tombstoned(T0);

        assert_eq!(classify(&node, None, None, TOLERANCE_SECS), SyncAction::Idle);

        let meta = SyncMetadata::pending(node.id, T0);
        assert_eq!(
            classify(&node, Some(&meta), None, TOLERANCE_SECS),
            SyncAction::Idle
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let node = node_modified_at(T0 + 120);
        let meta = synced_meta(node.id, T0);
        let remote = remote_modified_at(T0 + 400);

        let first = classify(&node, Some(&meta), Some(&remote), TOLERANCE_SECS);
        for _ in 0..10 {
            assert_eq!(
                classify(&node, Some(&meta), Some(&remote), TOLERANCE_SECS),
                first
            );
        }
    }
}
