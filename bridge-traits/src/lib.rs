//! # External Collaborator Traits
//!
//! Contracts between the sync engine and the systems it talks to but does
//! not implement.
//!
//! ## Overview
//!
//! The engine consumes one remote collaborator: a hierarchical cloud file
//! store (folders and files keyed by opaque string identifiers). This crate
//! defines that contract so that deployments can plug in a concrete SDK
//! wrapper and tests can substitute in-memory fakes.
//!
//! ## Traits
//!
//! - [`RemoteFileStore`](remote::RemoteFileStore) - folder/file CRUD, listing,
//!   and metadata retrieval against the cloud drive
//!
//! ## Error Handling
//!
//! All operations fail with [`RemoteError`](error::RemoteError), which carries
//! one of five distinguishable kinds. Callers branch on
//! [`RemoteError::is_transient`](error::RemoteError::is_transient) to decide
//! whether a retry is worthwhile; everything else about the failure is opaque
//! message text.
//!
//! ## Thread Safety
//!
//! The trait requires `Send + Sync` so a single client can be shared across
//! concurrent per-item transfer tasks.

pub mod error;
pub mod remote;

pub use error::{RemoteError, RemoteErrorKind, Result};
pub use remote::{RemoteFile, RemoteFileStore};
