use crate::blueprint::Blueprint;
use crate::error::{ModelError, ModelResult};
use crate::shards::{self, ShardInterval};
use semilattice_types::{EntityKind, EntityUuid};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Behaviour shared by every entity the cluster mirror tracks.
///
/// An entity is built from one record of a cluster snapshot, can check
/// itself against a freshly fetched record, and can serialize itself back
/// into the wire shape it was parsed from.
pub trait ClusterEntity: Clone + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// The snapshot collection this entity lives in.
    const KIND: EntityKind;

    /// The entity's identifier.
    fn id(&self) -> EntityUuid;

    /// The entity's human-readable name.
    fn name(&self) -> &str;

    /// Replaces the entity's name.
    fn set_name(&mut self, name: String);

    /// Parses a snapshot record. Fails on missing or wrongly typed fields.
    fn from_snapshot(id: &str, fields: &Value) -> ModelResult<Self>;

    /// Canonical wire form of every field the client manages.
    fn to_wire(&self) -> Value;

    /// Field-by-field equality of the managed state.
    fn same_state(&self, other: &Self) -> bool;

    /// Neutral wire value parsed in place of a field the cluster reports as
    /// contested. `None` means the reported value parses as it is.
    fn conflict_placeholder(field: &str) -> Option<Value> {
        let _ = field;
        None
    }

    /// Checks this entity against a freshly fetched snapshot record.
    fn matches(&self, fields: &Value) -> bool {
        Self::from_snapshot(&self.id().to_string(), fields)
            .is_ok_and(|remote| self.same_state(&remote))
    }

    /// Overwrites one field with a wire value, re-validating the result.
    fn set_field(&mut self, field: &str, value: &Value) -> ModelResult<()> {
        let mut wire = self.to_wire();
        let slot = wire
            .as_object_mut()
            .and_then(|map| map.get_mut(field))
            .ok_or_else(|| ModelError::UnknownField {
                kind: Self::KIND,
                field: field.to_string(),
            })?;
        *slot = value.clone();
        *self = Self::from_snapshot(&self.id().to_string(), &wire)?;
        Ok(())
    }
}

fn parse_record<T: DeserializeOwned>(
    kind: EntityKind,
    id: &str,
    fields: &Value,
) -> ModelResult<(EntityUuid, T)> {
    let uuid = EntityUuid::parse(id)?;
    let record = T::deserialize(fields).map_err(|e| ModelError::malformed(kind, id, e))?;
    Ok((uuid, record))
}

fn display_uuid(id: Option<EntityUuid>) -> String {
    id.map_or_else(|| "none".to_string(), |u| u.to_string())
}

// ── Server ───────────────────────────────────────────────────────

/// A cluster node, as seen through the `machines` collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub id: EntityUuid,
    pub name: String,
    /// Owning datacenter. Only transiently unset.
    pub datacenter_uuid: Option<EntityUuid>,
}

#[derive(Deserialize)]
struct ServerRecord {
    name: String,
    #[serde(deserialize_with = "Option::deserialize")]
    datacenter_uuid: Option<EntityUuid>,
}

impl ClusterEntity for Server {
    const KIND: EntityKind = EntityKind::Server;

    fn id(&self) -> EntityUuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn from_snapshot(id: &str, fields: &Value) -> ModelResult<Self> {
        let (id, record) = parse_record::<ServerRecord>(Self::KIND, id, fields)?;
        Ok(Self {
            id,
            name: record.name,
            datacenter_uuid: record.datacenter_uuid,
        })
    }

    fn to_wire(&self) -> Value {
        json!({
            "name": self.name,
            "datacenter_uuid": self.datacenter_uuid,
        })
    }

    fn same_state(&self, other: &Self) -> bool {
        self.name == other.name && self.datacenter_uuid == other.datacenter_uuid
    }

    fn conflict_placeholder(field: &str) -> Option<Value> {
        (field == "datacenter_uuid").then_some(Value::Null)
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Server(uuid:{}, name:{}, datacenter:{})",
            self.id,
            self.name,
            display_uuid(self.datacenter_uuid)
        )
    }
}

// ── Datacenter & Database ────────────────────────────────────────

#[derive(Deserialize)]
struct NamedRecord {
    name: String,
}

/// A named group of servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datacenter {
    pub id: EntityUuid,
    pub name: String,
}

impl ClusterEntity for Datacenter {
    const KIND: EntityKind = EntityKind::Datacenter;

    fn id(&self) -> EntityUuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn from_snapshot(id: &str, fields: &Value) -> ModelResult<Self> {
        let (id, record) = parse_record::<NamedRecord>(Self::KIND, id, fields)?;
        Ok(Self {
            id,
            name: record.name,
        })
    }

    fn to_wire(&self) -> Value {
        json!({ "name": self.name })
    }

    fn same_state(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Display for Datacenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Datacenter(name:{})", self.name)
    }
}

/// A namespace for tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    pub id: EntityUuid,
    pub name: String,
}

impl ClusterEntity for Database {
    const KIND: EntityKind = EntityKind::Database;

    fn id(&self) -> EntityUuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn from_snapshot(id: &str, fields: &Value) -> ModelResult<Self> {
        let (id, record) = parse_record::<NamedRecord>(Self::KIND, id, fields)?;
        Ok(Self {
            id,
            name: record.name,
        })
    }

    fn to_wire(&self) -> Value {
        json!({ "name": self.name })
    }

    fn same_state(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Database(name:{})", self.name)
    }
}

// ── Table ────────────────────────────────────────────────────────

/// Per-datacenter write acknowledgement requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckExpectation {
    pub expectation: u64,
    #[serde(default = "default_hard_durability")]
    pub hard_durability: bool,
}

impl AckExpectation {
    /// An expectation with hard durability, the cluster's default.
    pub fn new(expectation: u64) -> Self {
        Self {
            expectation,
            hard_durability: true,
        }
    }
}

fn default_hard_durability() -> bool {
    true
}

/// A table and its replication configuration.
///
/// `splits` always holds strictly ascending split points; the wire interval
/// records are derived from it on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub id: EntityUuid,
    pub name: String,
    pub database_uuid: Option<EntityUuid>,
    /// Primary datacenter. [`EntityUuid::NIL`] means no primary was chosen.
    pub primary_uuid: Option<EntityUuid>,
    pub replica_affinities: BTreeMap<EntityUuid, u64>,
    pub ack_expectations: BTreeMap<EntityUuid, AckExpectation>,
    pub primary_pinnings: Value,
    pub secondary_pinnings: Value,
    pub primary_key: Option<String>,
    pub blueprint: Blueprint,
    splits: Vec<String>,
}

#[derive(Deserialize)]
struct TableRecord {
    name: String,
    #[serde(deserialize_with = "Option::deserialize")]
    database: Option<EntityUuid>,
    #[serde(deserialize_with = "Option::deserialize")]
    primary_uuid: Option<EntityUuid>,
    replica_affinities: BTreeMap<EntityUuid, u64>,
    ack_expectations: BTreeMap<EntityUuid, AckExpectation>,
    primary_pinnings: Value,
    secondary_pinnings: Value,
    #[serde(default)]
    primary_key: Option<String>,
    shards: Vec<String>,
    blueprint: Blueprint,
}

impl Table {
    /// The table's split points, ascending.
    pub fn splits(&self) -> &[String] {
        &self.splits
    }

    /// The intervals the split points delimit.
    pub fn shard_intervals(&self) -> Vec<ShardInterval> {
        shards::intervals(&self.splits)
    }

    /// The wire interval records for the current split points.
    pub fn shards_to_wire(&self) -> Vec<String> {
        shards::encode(&self.splits)
    }

    /// Inserts a split point, keeping the list sorted.
    ///
    /// The empty key is the implicit leading boundary and is always present.
    pub fn add_split(&mut self, point: impl Into<String>) -> ModelResult<()> {
        let point = point.into();
        if point.is_empty() {
            return Err(ModelError::DuplicateSplit(point));
        }
        match self.splits.binary_search(&point) {
            Ok(_) => Err(ModelError::DuplicateSplit(point)),
            Err(pos) => {
                self.splits.insert(pos, point);
                Ok(())
            }
        }
    }

    /// Removes an existing split point.
    pub fn remove_split(&mut self, point: &str) -> ModelResult<()> {
        match self.splits.binary_search_by(|s| s.as_str().cmp(point)) {
            Ok(pos) => {
                self.splits.remove(pos);
                Ok(())
            }
            Err(_) => Err(ModelError::UnknownSplit(point.to_string())),
        }
    }

    /// Returns true if the table has no primary datacenter.
    pub fn primary_unset(&self) -> bool {
        self.primary_uuid.is_none_or(|p| p.is_nil())
    }
}

impl ClusterEntity for Table {
    const KIND: EntityKind = EntityKind::Table;

    fn id(&self) -> EntityUuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn from_snapshot(id: &str, fields: &Value) -> ModelResult<Self> {
        let (uuid, record) = parse_record::<TableRecord>(Self::KIND, id, fields)?;
        let splits = shards::decode(&record.shards)?;
        Ok(Self {
            id: uuid,
            name: record.name,
            database_uuid: record.database,
            primary_uuid: record.primary_uuid,
            replica_affinities: record.replica_affinities,
            ack_expectations: record.ack_expectations,
            primary_pinnings: record.primary_pinnings,
            secondary_pinnings: record.secondary_pinnings,
            primary_key: record.primary_key,
            blueprint: record.blueprint,
            splits,
        })
    }

    fn to_wire(&self) -> Value {
        let mut wire = json!({
            "blueprint": self.blueprint,
            "name": self.name,
            "primary_uuid": self.primary_uuid,
            "replica_affinities": self.replica_affinities,
            "ack_expectations": self.ack_expectations,
            "shards": self.shards_to_wire(),
            "primary_pinnings": self.primary_pinnings,
            "secondary_pinnings": self.secondary_pinnings,
            "database": self.database_uuid,
        });
        if let (Some(key), Some(map)) = (&self.primary_key, wire.as_object_mut()) {
            map.insert("primary_key".to_string(), Value::String(key.clone()));
        }
        wire
    }

    // Shards compare in decoded form; blueprints are server-owned.
    fn same_state(&self, other: &Self) -> bool {
        self.name == other.name
            && self.primary_uuid == other.primary_uuid
            && self.replica_affinities == other.replica_affinities
            && self.ack_expectations == other.ack_expectations
            && self.splits == other.splits
            && self.primary_pinnings == other.primary_pinnings
            && self.secondary_pinnings == other.secondary_pinnings
            && self.database_uuid == other.database_uuid
    }

    fn conflict_placeholder(field: &str) -> Option<Value> {
        match field {
            "database" | "primary_uuid" => Some(Value::Null),
            "replica_affinities" | "ack_expectations" => Some(json!({})),
            "shards" => Some(json!(shards::encode(&[]))),
            "blueprint" => Some(json!(Blueprint::default())),
            _ => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let affinities = if self.replica_affinities.is_empty() {
            "None".to_string()
        } else {
            self.replica_affinities
                .iter()
                .map(|(dc, count)| format!("{dc}={count}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "Table(name:{}, primary:{}, affinities:{}, primary pinnings:{}, secondary pinnings:{}, shard boundaries:{:?}, database:{})",
            self.name,
            display_uuid(self.primary_uuid),
            affinities,
            self.primary_pinnings,
            self.secondary_pinnings,
            self.splits,
            display_uuid(self.database_uuid)
        )
    }
}
