//! Model error types.

use semilattice_types::EntityKind;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while parsing, validating or editing entities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// An identifier did not have the canonical UUID shape.
    #[error(transparent)]
    Identifier(#[from] semilattice_types::Error),

    /// The wire shard intervals do not tile the key space.
    #[error("malformed shard map: {0}")]
    MalformedShardMap(String),

    /// A snapshot record is missing a field or has one of the wrong type.
    #[error("malformed {kind} snapshot for {id}: {reason}")]
    MalformedSnapshot {
        kind: EntityKind,
        id: String,
        reason: String,
    },

    /// The split point is already present on the table.
    #[error("split point {0:?} already exists")]
    DuplicateSplit(String),

    /// The split point is not present on the table.
    #[error("split point {0:?} does not exist")]
    UnknownSplit(String),

    /// The field is not one the client manages for this entity kind.
    #[error("{kind} has no field {field:?}")]
    UnknownField { kind: EntityKind, field: String },
}

impl ModelError {
    pub(crate) fn malformed(kind: EntityKind, id: &str, reason: impl ToString) -> Self {
        ModelError::MalformedSnapshot {
            kind,
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }
}
