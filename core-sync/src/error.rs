use bridge_traits::RemoteError;
use core_content::ContentError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync already in progress for container {container_id}")]
    SyncInProgress { container_id: String },

    #[error("Container {container_id} not found")]
    ContainerNotFound { container_id: String },

    #[error("Bootstrap failed for container {container_id}: {message}")]
    Bootstrap {
        container_id: String,
        message: String,
    },

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Content store error: {0}")]
    Content(#[from] ContentError),

    #[error("Sync timeout after {0} seconds")]
    Timeout(u64),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Database error: {0}")]
    Database(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
