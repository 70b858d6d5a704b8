//! # Sync Engine
//!
//! Bidirectional reconciliation between the local content store
//! (`core-content`) and a remote file store (`bridge-traits`).
//!
//! ## Architecture
//!
//! - **Diff Detector** (`diff`): pure classification of one node into
//!   push / pull / idle / conflict / delete from already-fetched timestamps
//! - **Conflict Resolver** (`resolver`): deterministic winner selection for
//!   nodes both sides of which changed
//! - **Metadata Store** (`metadata`): per-node sync bookkeeping and the
//!   container-to-remote-folder mapping, SQLite-backed
//! - **Orchestrator** (`orchestrator`): runs whole passes (enumerate,
//!   classify, transfer concurrently, record outcomes) with single-flight
//!   per container, retries on transient remote errors, and cooperative
//!   pause
//! - **Scheduler** (`scheduler`): periodic pass triggering per watched
//!   container
//!
//! Content moves whole-item: a node's title and body are serialized into one
//! remote file, and resolution replaces the losing side in full. Timestamps
//! from the two stores are compared under a tolerance window so clock skew
//! and the engine's own writes never masquerade as fresh edits.

pub mod diff;
pub mod error;
pub mod metadata;
pub mod orchestrator;
pub mod resolver;
pub mod scheduler;

pub use diff::{classify, SyncAction, TOLERANCE_SECS};
pub use error::{Result, SyncError};
pub use metadata::{
    ContainerMapping, ContainerSyncStatus, MetadataRepository, SqliteMetadataRepository,
    StatusCounts, SyncMetadata, SyncStatus,
};
pub use orchestrator::{
    ItemFailure, SyncConfig, SyncDirection, SyncOrchestrator, SyncReport,
};
pub use resolver::{resolve, ConflictStrategy, ConflictWinner};
pub use scheduler::{SchedulerConfig, SyncScheduler};
