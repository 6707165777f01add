//! Core type definitions for the semilattice admin client.
//!
//! This crate defines the small, dependency-free vocabulary shared by the
//! model and the reconciliation engine:
//! - Entity identifiers (canonical 36-character UUIDs)
//! - Entity kinds and their snapshot collection names
//! - Node addresses for the per-node HTTP admin endpoints

mod ids;

pub use ids::{is_uuid, EntityKind, EntityUuid, NodeAddress, UUID_STRING_LEN};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("invalid node address: {0:?}")]
    InvalidAddress(String),
}
