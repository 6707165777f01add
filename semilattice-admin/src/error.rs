//! Error types for the admin client.

use crate::diagnostics::Issue;
use semilattice_model::ModelError;
use semilattice_types::{EntityKind, EntityUuid};
use serde_json::Value;
use thiserror::Error;

/// Result type for admin operations.
pub type AdminResult<T> = Result<T, AdminError>;

/// Errors that can occur while mirroring or administering a cluster.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Entity parsing, shard map or split point error.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A caller-supplied identifier is not a canonical UUID.
    #[error(transparent)]
    InvalidIdentifier(#[from] semilattice_types::Error),

    /// Nodes never agreed on a snapshot within the retry budget.
    #[error(
        "cluster is inconsistent between nodes after {attempts} attempts\nexpected: {expected}\nactual: {actual}"
    )]
    ClusterDivergence {
        expected: Box<Value>,
        actual: Box<Value>,
        attempts: u32,
    },

    /// The local mirror holds entities the agreed snapshot does not report.
    #[error("cluster reports {reported} {kind}s but the mirror holds {local}")]
    MergeInconsistency {
        kind: EntityKind,
        reported: usize,
        local: usize,
    },

    /// A mirrored entity disagrees with the agreed snapshot outside of any value conflict.
    #[error("inconsistent cluster data for {kind} {id}: {local} != {remote}")]
    IntegrityViolation {
        kind: EntityKind,
        id: EntityUuid,
        local: Box<Value>,
        remote: Box<Value>,
    },

    /// Several entities share the requested name.
    #[error("multiple {kind}s named {name:?}")]
    AmbiguousReference {
        kind: EntityKind,
        name: String,
        matches: usize,
    },

    /// No entity matches the reference.
    #[error("no {kind} matching {reference:?}")]
    UnknownReference { kind: EntityKind, reference: String },

    /// An entity handle was passed where another kind was expected.
    #[error("can't interpret a {found} as a {expected}")]
    TypeMismatch {
        expected: EntityKind,
        found: EntityKind,
    },

    /// The resolution value is not one of the conflict's candidates.
    #[error("{value} is not a candidate value for field {field:?}")]
    InvalidResolution { field: String, value: Value },

    /// The conflict is not (or no longer) registered.
    #[error("no value conflict on field {field:?} of {kind} {id}")]
    UnknownConflict {
        kind: EntityKind,
        id: EntityUuid,
        field: String,
    },

    /// A node answered with a non-2xx status.
    #[error("server returned error code: {status} {reason}")]
    RemoteError { status: u16, reason: String },

    /// The cluster reports outstanding issues.
    #[error("cluster has issues:\n{}", render_issues(.0))]
    ClusterHasIssues(Vec<Issue>),

    /// A table's blueprint was not satisfied in time.
    #[error(
        "blueprint of table {table} still not satisfied after {timeout_secs} seconds\ncontents of /ajax = {ajax}\ncontents of /ajax/progress = {progress}"
    )]
    BlueprintTimeout {
        table: EntityUuid,
        timeout_secs: u64,
        ajax: Box<Value>,
        progress: Box<Value>,
    },

    /// A name the cluster would reject.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// The mirror was constructed without any node to talk to.
    #[error("no cluster nodes configured")]
    NoNodes,

    /// Connection-level failure talking to a node.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AdminError {
    /// Returns true if a node rejected the request.
    pub fn is_remote(&self) -> bool {
        matches!(self, AdminError::RemoteError { .. })
    }

    /// The node's HTTP status, if a node rejected the request.
    pub fn status(&self) -> Option<u16> {
        match self {
            AdminError::RemoteError { status, .. } => Some(*status),
            AdminError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn render_issues(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(|i| i.description.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
