//! Cluster snapshots as returned by the semilattice endpoint.

use crate::error::AdminResult;
use semilattice_model::ModelError;
use semilattice_types::{EntityKind, EntityUuid};
use serde_json::{Map, Value};

/// Per-node identity marker; differs between nodes by construction.
pub const IDENTITY_FIELD: &str = "me";

/// Removes the per-node identity marker so snapshots can be compared.
pub fn strip_identity(snapshot: &mut Value) {
    if let Some(map) = snapshot.as_object_mut() {
        map.remove(IDENTITY_FIELD);
    }
}

/// A snapshot every node agreed on.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSnapshot {
    raw: Value,
}

impl ClusterSnapshot {
    /// Wraps an agreed snapshot, checking every entity collection is present.
    ///
    /// Record ids are validated when the mirror merges them.
    pub fn new(raw: Value) -> AdminResult<Self> {
        for kind in EntityKind::ALL {
            if !raw.get(kind.collection()).is_some_and(Value::is_object) {
                return Err(ModelError::MalformedSnapshot {
                    kind,
                    id: kind.collection().to_string(),
                    reason: "collection missing from snapshot".to_string(),
                }
                .into());
            }
        }
        Ok(Self { raw })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn into_raw(self) -> Value {
        self.raw
    }

    fn collection(&self, kind: EntityKind) -> Option<&Map<String, Value>> {
        self.raw.get(kind.collection()).and_then(Value::as_object)
    }

    /// Live records of a collection, as `(id, fields)`.
    pub fn records(&self, kind: EntityKind) -> impl Iterator<Item = (&str, &Value)> {
        self.collection(kind)
            .into_iter()
            .flatten()
            .filter(|(_, fields)| !fields.is_null())
            .map(|(id, fields)| (id.as_str(), fields))
    }

    /// Ids the cluster reports as deleted (records set to `null`).
    pub fn tombstones(&self, kind: EntityKind) -> impl Iterator<Item = &str> {
        self.collection(kind)
            .into_iter()
            .flatten()
            .filter(|(_, fields)| fields.is_null())
            .map(|(id, _)| id.as_str())
    }

    /// The live record for one entity.
    pub fn record(&self, kind: EntityKind, id: EntityUuid) -> Option<&Value> {
        self.collection(kind)?
            .get(&id.to_string())
            .filter(|fields| !fields.is_null())
    }

    /// Number of live records in a collection.
    pub fn len(&self, kind: EntityKind) -> usize {
        self.records(kind).count()
    }
}
