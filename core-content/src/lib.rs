//! # Local Content Store
//!
//! Relational store of curricula and their hierarchical content nodes.
//!
//! ## Overview
//!
//! This crate owns the local replica that the sync engine reconciles against
//! the remote file store:
//!
//! - **Models** (`models`): `Container` (a curriculum-level grouping) and
//!   `ContentNode` (one synchronizable unit of content with a tombstone for
//!   soft deletion)
//! - **Database** (`db`): pooled SQLite with WAL mode, embedded migrations,
//!   and an in-memory pool helper for tests
//! - **Repository** (`repository`): `NodeRepository` trait plus the SQLite
//!   implementation
//!
//! The store is the single writer of `modified_at`: every content write
//! stamps the node, so collaborators (the sync engine included) never set
//! timestamps themselves.

pub mod db;
pub mod error;
pub mod models;
pub mod repository;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{ContentError, Result};
pub use models::{Container, ContainerId, ContentNode, NodeId};
pub use repository::{NodeRepository, SqliteNodeRepository};
