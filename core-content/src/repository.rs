//! # Node Repository
//!
//! Persistence for containers and content nodes.
//!
//! The repository is the only component that writes `modified_at`: content
//! writes stamp the node with the current time as a side effect, so callers
//! (the sync engine included) never set local timestamps directly.

use crate::error::{ContentError, Result};
use crate::models::{Container, ContainerId, ContentNode, NodeId};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository for containers and their content nodes
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// Insert a new container
    async fn insert_container(&self, container: &Container) -> Result<()>;

    /// Find a container by ID
    async fn find_container(&self, id: ContainerId) -> Result<Option<Container>>;

    /// Insert a new content node
    async fn insert(&self, node: &ContentNode) -> Result<()>;

    /// Find a content node by ID
    async fn find_by_id(&self, id: NodeId) -> Result<Option<ContentNode>>;

    /// Flat enumeration of every node in a container, tombstoned nodes
    /// included, ordered by position then id
    async fn list_by_container(&self, container_id: ContainerId) -> Result<Vec<ContentNode>>;

    /// Overwrite a node's title and body, stamping `modified_at` with the
    /// current time. This is the write path used when pulling remote content.
    async fn overwrite_content(&self, id: NodeId, title: &str, body: &str) -> Result<()>;

    /// Soft-delete a node by setting its tombstone timestamp
    async fn tombstone(&self, id: NodeId) -> Result<()>;

    /// Physically remove a node (and, via cascade, its sync metadata).
    /// Returns `false` if no row existed.
    async fn purge(&self, id: NodeId) -> Result<bool>;

    /// Number of live (non-tombstoned) nodes in a container
    async fn count_live(&self, container_id: ContainerId) -> Result<i64>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`NodeRepository`]
pub struct SqliteNodeRepository {
    pool: SqlitePool,
}

impl SqliteNodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ContainerRow {
    id: String,
    title: String,
    description: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ContainerRow> for Container {
    type Error = ContentError;

    fn try_from(row: ContainerRow) -> Result<Self> {
        let id = ContainerId::from_string(&row.id).map_err(|e| ContentError::InvalidInput {
            field: "container.id".to_string(),
            message: e.to_string(),
        })?;

        Ok(Container {
            id,
            title: row.title,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct NodeRow {
    id: String,
    container_id: String,
    parent_id: Option<String>,
    title: String,
    body: String,
    position: i64,
    modified_at: i64,
    deleted_at: Option<i64>,
}

impl TryFrom<NodeRow> for ContentNode {
    type Error = ContentError;

    fn try_from(row: NodeRow) -> Result<Self> {
        let invalid = |field: &str, e: uuid::Error| ContentError::InvalidInput {
            field: field.to_string(),
            message: e.to_string(),
        };

        let id = NodeId::from_string(&row.id).map_err(|e| invalid("node.id", e))?;
        let container_id = ContainerId::from_string(&row.container_id)
            .map_err(|e| invalid("node.container_id", e))?;
        let parent_id = row
            .parent_id
            .as_deref()
            .map(NodeId::from_string)
            .transpose()
            .map_err(|e| invalid("node.parent_id", e))?;

        Ok(ContentNode {
            id,
            container_id,
            parent_id,
            title: row.title,
            body: row.body,
            position: row.position,
            modified_at: row.modified_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[async_trait]
impl NodeRepository for SqliteNodeRepository {
    async fn insert_container(&self, container: &Container) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO containers (id, title, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(container.id.as_str())
        .bind(&container.title)
        .bind(&container.description)
        .bind(container.created_at)
        .bind(container.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_container(&self, id: ContainerId) -> Result<Option<Container>> {
        let row = sqlx::query_as::<_, ContainerRow>(
            "SELECT id, title, description, created_at, updated_at FROM containers WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Container::try_from).transpose()
    }

    async fn insert(&self, node: &ContentNode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_nodes (
                id, container_id, parent_id, title, body,
                position, modified_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(node.id.as_str())
        .bind(node.container_id.as_str())
        .bind(node.parent_id.map(|p| p.as_str()))
        .bind(&node.title)
        .bind(&node.body)
        .bind(node.position)
        .bind(node.modified_at)
        .bind(node.deleted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: NodeId) -> Result<Option<ContentNode>> {
        let row = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT id, container_id, parent_id, title, body,
                   position, modified_at, deleted_at
            FROM content_nodes
            WHERE id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ContentNode::try_from).transpose()
    }

    async fn list_by_container(&self, container_id: ContainerId) -> Result<Vec<ContentNode>> {
        let rows = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT id, container_id, parent_id, title, body,
                   position, modified_at, deleted_at
            FROM content_nodes
            WHERE container_id = ?
            ORDER BY position ASC, id ASC
            "#,
        )
        .bind(container_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(ContentNode::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn overwrite_content(&self, id: NodeId, title: &str, body: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE content_nodes SET title = ?, body = ?, modified_at = ? WHERE id = ?",
        )
        .bind(title)
        .bind(body)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ContentError::NotFound {
                entity_type: "ContentNode".to_string(),
                id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn tombstone(&self, id: NodeId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE content_nodes SET deleted_at = ?, modified_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ContentError::NotFound {
                entity_type: "ContentNode".to_string(),
                id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn purge(&self, id: NodeId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM content_nodes WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_live(&self, container_id: ContainerId) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM content_nodes WHERE container_id = ? AND deleted_at IS NULL",
        )
        .bind(container_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    async fn setup() -> (SqliteNodeRepository, Container) {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteNodeRepository::new(pool);
        let container = Container::new("Biology 101");
        repo.insert_container(&container).await.unwrap();
        (repo, container)
    }

    #[tokio::test]
    async fn test_insert_and_find_node() {
        let (repo, container) = setup().await;

        let node = ContentNode::new(container.id, "Cells", "All living things...");
        repo.insert(&node).await.unwrap();

        let found = repo.find_by_id(node.id).await.unwrap().unwrap();
        assert_eq!(found, node);
    }

    #[tokio::test]
    async fn test_find_container() {
        let (repo, container) = setup().await;

        let found = repo.find_container(container.id).await.unwrap().unwrap();
        assert_eq!(found, container);

        let missing = repo.find_container(ContainerId::new()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_list_by_container_orders_by_position() {
        let (repo, container) = setup().await;

        let second = ContentNode::new(container.id, "B", "").with_position(2);
        let first = ContentNode::new(container.id, "A", "").with_position(1);
        repo.insert(&second).await.unwrap();
        repo.insert(&first).await.unwrap();

        let nodes = repo.list_by_container(container.id).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, first.id);
        assert_eq!(nodes[1].id, second.id);
    }

    #[tokio::test]
    async fn test_overwrite_content_bumps_modified_at() {
        let (repo, container) = setup().await;

        let mut node = ContentNode::new(container.id, "Old title", "old body");
        node.modified_at = 1000; // stale timestamp
        repo.insert(&node).await.unwrap();

        repo.overwrite_content(node.id, "New title", "new body")
            .await
            .unwrap();

        let found = repo.find_by_id(node.id).await.unwrap().unwrap();
        assert_eq!(found.title, "New title");
        assert_eq!(found.body, "new body");
        assert!(found.modified_at > 1000);
    }

    #[tokio::test]
    async fn test_overwrite_missing_node_is_not_found() {
        let (repo, _) = setup().await;

        let result = repo.overwrite_content(NodeId::new(), "t", "b").await;
        assert!(matches!(result, Err(ContentError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_tombstone_and_count_live() {
        let (repo, container) = setup().await;

        let keep = ContentNode::new(container.id, "Keep", "");
        let drop = ContentNode::new(container.id, "Drop", "");
        repo.insert(&keep).await.unwrap();
        repo.insert(&drop).await.unwrap();

        assert_eq!(repo.count_live(container.id).await.unwrap(), 2);

        repo.tombstone(drop.id).await.unwrap();

        assert_eq!(repo.count_live(container.id).await.unwrap(), 1);
        let found = repo.find_by_id(drop.id).await.unwrap().unwrap();
        assert!(found.is_deleted());

        // Tombstoned rows still enumerate (sync needs to see them)
        assert_eq!(repo.list_by_container(container.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_tombstone_is_idempotent_rejected() {
        let (repo, container) = setup().await;

        let node = ContentNode::new(container.id, "Once", "");
        repo.insert(&node).await.unwrap();

        repo.tombstone(node.id).await.unwrap();
        let second = repo.tombstone(node.id).await;
        assert!(matches!(second, Err(ContentError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_purge_removes_row() {
        let (repo, container) = setup().await;

        let node = ContentNode::new(container.id, "Gone", "");
        repo.insert(&node).await.unwrap();

        assert!(repo.purge(node.id).await.unwrap());
        assert!(repo.find_by_id(node.id).await.unwrap().is_none());
        assert!(!repo.purge(node.id).await.unwrap());
    }
}
