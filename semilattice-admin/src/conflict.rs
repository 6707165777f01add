//! Value conflicts and their registry.
//!
//! When nodes accept concurrent writes to the same field, the cluster keeps
//! every written value and reports the field as [`VALUE_IN_CONFLICT`] until
//! someone picks one. The mirror turns each such field into a [`Conflict`]
//! that records the candidate values in the order the server listed them.

use crate::error::{AdminError, AdminResult};
use semilattice_model::ModelError;
use semilattice_types::{EntityKind, EntityUuid};
use serde_json::Value;
use std::fmt;

/// Marker the cluster puts in place of a field value that is in conflict.
pub const VALUE_IN_CONFLICT: &str = "VALUE_IN_CONFLICT";

/// Returns true if a snapshot field holds the conflict marker.
pub fn is_conflict_marker(value: &Value) -> bool {
    value.as_str() == Some(VALUE_IN_CONFLICT)
}

/// Identifies one conflicted field of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConflictKey {
    pub kind: EntityKind,
    pub id: EntityUuid,
    pub field: String,
}

impl ConflictKey {
    pub fn new(kind: EntityKind, id: EntityUuid, field: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            field: field.into(),
        }
    }
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.kind, self.id, self.field)
    }
}

/// One value a conflict can be resolved to, and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub source: Value,
    pub value: Value,
}

/// A registered value conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    key: ConflictKey,
    candidates: Vec<Candidate>,
}

impl Conflict {
    pub fn new(key: ConflictKey, candidates: Vec<Candidate>) -> Self {
        Self { key, candidates }
    }

    /// Builds a conflict from the resolve endpoint's `[[source, value], ...]` list.
    pub fn from_resolve_data(key: ConflictKey, data: &Value) -> AdminResult<Self> {
        let malformed = |reason: String| {
            AdminError::Model(ModelError::MalformedSnapshot {
                kind: key.kind,
                id: key.id.to_string(),
                reason,
            })
        };
        let entries = data
            .as_array()
            .ok_or_else(|| malformed(format!("candidates for {:?} are not a list", key.field)))?;

        let mut candidates = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.as_array().map(Vec::as_slice) {
                Some([source, value]) => candidates.push(Candidate {
                    source: source.clone(),
                    value: value.clone(),
                }),
                _ => return Err(malformed(format!("candidate {entry} is not a pair"))),
            }
        }
        Ok(Self::new(key, candidates))
    }

    pub fn key(&self) -> &ConflictKey {
        &self.key
    }

    pub fn kind(&self) -> EntityKind {
        self.key.kind
    }

    pub fn id(&self) -> EntityUuid {
        self.key.id
    }

    pub fn field(&self) -> &str {
        &self.key.field
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Candidate values, in server order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.candidates.iter().map(|c| &c.value)
    }

    /// Returns true if `value` is one of the candidates.
    pub fn accepts(&self, value: &Value) -> bool {
        self.values().any(|v| v == value)
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Value conflict on field {} with possible values",
            self.key.field
        )?;
        for (i, value) in self.values().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{value}")?;
        }
        Ok(())
    }
}

/// The conflicts the mirror currently knows about, at most one per key.
#[derive(Debug, Clone, Default)]
pub struct ConflictRegistry {
    conflicts: Vec<Conflict>,
}

impl ConflictRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &ConflictKey) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &ConflictKey) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| &c.key == key)
    }

    /// Registers a conflict. Returns false if its key was already registered.
    pub fn register(&mut self, conflict: Conflict) -> bool {
        if self.contains(&conflict.key) {
            return false;
        }
        self.conflicts.push(conflict);
        true
    }

    pub fn remove(&mut self, key: &ConflictKey) -> Option<Conflict> {
        let pos = self.conflicts.iter().position(|c| &c.key == key)?;
        Some(self.conflicts.remove(pos))
    }

    /// Drops every conflict on the given entity.
    pub fn remove_entity(&mut self, kind: EntityKind, id: EntityUuid) {
        self.conflicts
            .retain(|c| !(c.key.kind == kind && c.key.id == id));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter()
    }

    pub fn as_slice(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }
}
