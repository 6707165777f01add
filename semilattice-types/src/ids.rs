//! Identifier types used throughout the admin client.
//!
//! Every entity the cluster knows about is addressed by a 36-character
//! canonical UUID string. Anything a caller hands us is validated against
//! that exact shape before it is used to address the cluster.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of the canonical hyphenated UUID form.
pub const UUID_STRING_LEN: usize = 36;

/// Identifier of a server, datacenter, database or table.
///
/// Serializes as the canonical hyphenated string and refuses to deserialize
/// from anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityUuid(Uuid);

impl EntityUuid {
    /// The reserved all-zero id the cluster uses for "unset".
    pub const NIL: Self = Self(Uuid::nil());

    /// Creates a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identifier from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns true for the reserved all-zero id.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Parses an identifier, accepting only the lowercase 36-character
    /// hyphenated form the cluster reports.
    pub fn parse(s: &str) -> Result<Self, Error> {
        if s.len() != UUID_STRING_LEN
            || s.matches('-').count() != 4
            || s.bytes().any(|b| b.is_ascii_uppercase())
        {
            return Err(Error::InvalidIdentifier(s.to_string()));
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::InvalidIdentifier(s.to_string()))
    }
}

impl Default for EntityUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for EntityUuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityUuid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EntityUuid> for String {
    fn from(id: EntityUuid) -> Self {
        id.to_string()
    }
}

/// Returns true if `s` has the exact shape of an entity identifier.
pub fn is_uuid(s: &str) -> bool {
    EntityUuid::parse(s).is_ok()
}

/// The entity collections reported in a cluster snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Server,
    Datacenter,
    Database,
    Table,
}

impl EntityKind {
    /// All kinds, in the order the mirror merges them.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Server,
        EntityKind::Datacenter,
        EntityKind::Database,
        EntityKind::Table,
    ];

    /// The snapshot key and endpoint segment for this collection.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            EntityKind::Server => "machines",
            EntityKind::Datacenter => "datacenters",
            EntityKind::Database => "databases",
            EntityKind::Table => "rdb_namespaces",
        }
    }

    /// Looks a kind up by its snapshot collection key.
    #[must_use]
    pub fn from_collection(collection: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.collection() == collection)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Server => "server",
            EntityKind::Datacenter => "datacenter",
            EntityKind::Database => "database",
            EntityKind::Table => "table",
        };
        f.write_str(name)
    }
}

/// Address of one cluster node's HTTP admin endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    /// Creates a new node address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL for requests against this node.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;
        if host.is_empty() {
            return Err(Error::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::InvalidAddress(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}
