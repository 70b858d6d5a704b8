//! Domain models for the local content store.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a container (curriculum-level grouping)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(Uuid);

impl ContainerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a content node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Entities
// =============================================================================

/// A top-level grouping of content nodes. Maps 1:1 to a remote folder once
/// synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub title: String,
    pub description: Option<String>,
    /// Unix seconds
    pub created_at: i64,
    /// Unix seconds
    pub updated_at: i64,
}

impl Container {
    pub fn new(title: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: ContainerId::new(),
            title: title.into(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One synchronizable unit of content: a title, a body, and a modification
/// timestamp. Tree structure via `parent_id` is irrelevant to sync beyond
/// flat enumeration per container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentNode {
    pub id: NodeId,
    pub container_id: ContainerId,
    pub parent_id: Option<NodeId>,
    pub title: String,
    pub body: String,
    /// Sibling ordering within the parent
    pub position: i64,
    /// Unix seconds; maintained by the store on every write
    pub modified_at: i64,
    /// Tombstone timestamp (unix seconds); set instead of row deletion so
    /// the deletion can be propagated remotely first
    pub deleted_at: Option<i64>,
}

impl ContentNode {
    pub fn new(
        container_id: ContainerId,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            container_id,
            parent_id: None,
            title: title.into(),
            body: body.into(),
            position: 0,
            modified_at: chrono::Utc::now().timestamp(),
            deleted_at: None,
        }
    }

    pub fn with_parent(mut self, parent_id: NodeId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
