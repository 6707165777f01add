//! Resolving caller references to mirrored entities.
//!
//! Operations accept an [`EntityRef`]: an identifier string, a name, or a
//! handle taken from an entity the caller already holds. Conversions from
//! `&str` pick between the first two by shape, so `"orders"` looks up by
//! name and `"67e55044-10b1-..."` by identifier.

use crate::error::{AdminError, AdminResult};
use semilattice_model::{ClusterEntity, Database, Datacenter, Server, Table};
use semilattice_types::{is_uuid, EntityKind, EntityUuid};
use std::collections::HashMap;

/// Typed pointer to an entity, as handed out by the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    pub kind: EntityKind,
    pub id: EntityUuid,
}

/// How a caller names an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    /// Canonical identifier string; validated before lookup.
    Id(String),
    /// Entity name; must match exactly one entity.
    Name(String),
    /// Handle of an entity previously returned by the mirror.
    Handle(EntityHandle),
}

impl EntityRef {
    pub fn id(id: impl Into<String>) -> Self {
        EntityRef::Id(id.into())
    }

    pub fn name(name: impl Into<String>) -> Self {
        EntityRef::Name(name.into())
    }

    fn describe(&self) -> String {
        match self {
            EntityRef::Id(id) | EntityRef::Name(id) => id.clone(),
            EntityRef::Handle(handle) => handle.id.to_string(),
        }
    }
}

impl From<&str> for EntityRef {
    fn from(s: &str) -> Self {
        if is_uuid(s) {
            EntityRef::Id(s.to_string())
        } else {
            EntityRef::Name(s.to_string())
        }
    }
}

impl From<String> for EntityRef {
    fn from(s: String) -> Self {
        EntityRef::from(s.as_str())
    }
}

impl From<&String> for EntityRef {
    fn from(s: &String) -> Self {
        EntityRef::from(s.as_str())
    }
}

impl From<EntityUuid> for EntityRef {
    fn from(id: EntityUuid) -> Self {
        EntityRef::Id(id.to_string())
    }
}

impl From<EntityHandle> for EntityRef {
    fn from(handle: EntityHandle) -> Self {
        EntityRef::Handle(handle)
    }
}

impl From<&EntityRef> for EntityRef {
    fn from(r: &EntityRef) -> Self {
        r.clone()
    }
}

macro_rules! entity_refs {
    ($($ty:ty),*) => {
        $(
            impl From<&$ty> for EntityRef {
                fn from(entity: &$ty) -> Self {
                    EntityRef::Handle(EntityHandle {
                        kind: <$ty as ClusterEntity>::KIND,
                        id: entity.id(),
                    })
                }
            }
        )*
    };
}

entity_refs!(Server, Datacenter, Database, Table);

/// Finds the entity `reference` denotes among `entities`.
pub fn resolve<'a, E: ClusterEntity>(
    reference: &EntityRef,
    entities: &'a HashMap<EntityUuid, E>,
) -> AdminResult<&'a E> {
    let unknown = || AdminError::UnknownReference {
        kind: E::KIND,
        reference: reference.describe(),
    };
    match reference {
        EntityRef::Id(id) => {
            let id = EntityUuid::parse(id)?;
            entities.get(&id).ok_or_else(unknown)
        }
        EntityRef::Name(name) => {
            let mut hits = entities.values().filter(|e| e.name() == name);
            match (hits.next(), hits.count()) {
                (None, _) => Err(unknown()),
                (Some(entity), 0) => Ok(entity),
                (Some(_), rest) => Err(AdminError::AmbiguousReference {
                    kind: E::KIND,
                    name: name.clone(),
                    matches: rest + 1,
                }),
            }
        }
        EntityRef::Handle(handle) => {
            if handle.kind != E::KIND {
                return Err(AdminError::TypeMismatch {
                    expected: E::KIND,
                    found: handle.kind,
                });
            }
            entities.get(&handle.id).ok_or_else(unknown)
        }
    }
}
