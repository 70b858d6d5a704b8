//! Remote File Store Contract
//!
//! The cloud drive holding the remote replica of synced content. Implemented
//! by per-deployment SDK wrappers; the engine only ever sees this trait.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Descriptor for one remote file as returned by listing or metadata calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Opaque identifier assigned by the remote store
    pub id: String,
    /// File name within its folder
    pub name: String,
    /// Last modification time, unix seconds, as observed by the remote store
    pub modified_at: i64,
    /// Size in bytes, when the store reports one
    pub size: Option<u64>,
}

/// Folder/file operations against the remote hierarchical store.
///
/// All identifiers are opaque strings owned by the remote store. Every call
/// is a network round-trip and may fail with any
/// [`RemoteErrorKind`](crate::error::RemoteErrorKind).
#[async_trait]
pub trait RemoteFileStore: Send + Sync {
    /// Create a folder, optionally under a parent folder, returning its id.
    async fn create_folder(&self, name: &str, parent_folder_id: Option<&str>) -> Result<String>;

    /// Upload a new file into a folder, returning the new file id.
    async fn upload(&self, folder_id: &str, name: &str, content: Bytes) -> Result<String>;

    /// Replace the content of an existing file, returning the new remote
    /// modification time (unix seconds).
    async fn update(&self, file_id: &str, content: Bytes) -> Result<i64>;

    /// Download the full content of a file.
    async fn download(&self, file_id: &str) -> Result<Bytes>;

    /// Permanently delete a file.
    async fn delete(&self, file_id: &str) -> Result<()>;

    /// List the files directly inside a folder.
    async fn list(&self, folder_id: &str) -> Result<Vec<RemoteFile>>;

    /// Fetch the descriptor for a single file.
    async fn get_metadata(&self, file_id: &str) -> Result<RemoteFile>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_file_round_trips_through_serde() {
        let file = RemoteFile {
            id: "f-1".to_string(),
            name: "intro.md".to_string(),
            modified_at: 1_700_000_000,
            size: Some(512),
        };

        let json = serde_json::to_string(&file).unwrap();
        let back: RemoteFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, file);
    }
}
