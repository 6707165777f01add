//! Admin operations.
//!
//! Every mutation resolves its arguments against the mirror, applies the
//! change locally, sends it to a randomly chosen node and then runs a sync
//! cycle with the mutation budget. If the request fails the error is
//! returned as is; the next sync cycle reports any local change the cluster
//! never saw as an integrity violation.

use crate::conflict::ConflictKey;
use crate::error::{AdminError, AdminResult};
use crate::events::MirrorEvent;
use crate::mirror::{ClusterMirror, MirroredEntity};
use crate::resolver::EntityRef;
use crate::routes;
use crate::transport::NodeRequest;
use rand::Rng;
use semilattice_model::{
    AckExpectation, ClusterEntity, Database, Datacenter, ModelError, Server, Table,
};
use semilattice_types::{EntityKind, EntityUuid};
use serde_json::{json, Map, Value};
use tracing::info;

/// Parameters for [`ClusterMirror::create_table`].
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    /// Random numeric name when unset.
    pub name: Option<String>,
    /// Primary datacenter; none when unset.
    pub primary: Option<EntityRef>,
    pub affinities: Vec<(EntityRef, u64)>,
    pub ack_expectations: Vec<(EntityRef, u64)>,
    /// Falls back to [`MirrorConfig::default_primary_key`](crate::MirrorConfig).
    pub primary_key: Option<String>,
    /// Falls back to [`MirrorConfig::default_database`](crate::MirrorConfig).
    pub database: Option<EntityRef>,
    /// Wait until the table answers distribution queries before returning.
    pub wait_until_ready: bool,
}

impl TableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_primary(mut self, datacenter: impl Into<EntityRef>) -> Self {
        self.primary = Some(datacenter.into());
        self
    }

    pub fn with_affinity(mut self, datacenter: impl Into<EntityRef>, replicas: u64) -> Self {
        self.affinities.push((datacenter.into(), replicas));
        self
    }

    pub fn with_ack_expectation(mut self, datacenter: impl Into<EntityRef>, acks: u64) -> Self {
        self.ack_expectations.push((datacenter.into(), acks));
        self
    }

    pub fn with_primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = Some(key.into());
        self
    }

    pub fn in_database(mut self, database: impl Into<EntityRef>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn wait_until_ready(mut self) -> Self {
        self.wait_until_ready = true;
        self
    }
}

/// Splits a create response into its single `(id, fields)` entry.
fn single_record(kind: EntityKind, response: Value) -> AdminResult<(String, Value)> {
    let malformed = |reason: &str| {
        AdminError::Model(ModelError::MalformedSnapshot {
            kind,
            id: "new".to_string(),
            reason: reason.to_string(),
        })
    };
    match response {
        Value::Object(map) if map.len() == 1 => map
            .into_iter()
            .next()
            .ok_or_else(|| malformed("empty create response")),
        Value::Object(_) => Err(malformed("create response must hold exactly one record")),
        _ => Err(malformed("create response is not an object")),
    }
}

impl ClusterMirror {
    // ── Creation ─────────────────────────────────────────────────

    async fn create_entity<E: MirroredEntity>(&mut self, body: Value) -> AdminResult<E> {
        let response = self.query(NodeRequest::post(routes::create(E::KIND), &body)).await?;
        let (id, fields) = single_record(E::KIND, response)?;
        let entity = E::from_snapshot(&id, &fields)?;
        info!("Created {}", entity);
        E::collection_mut(self).insert(entity.id(), entity.clone());
        self.sync_after_mutation().await?;
        Ok(entity)
    }

    /// Creates a datacenter, named with a random number when `name` is `None`.
    pub async fn create_datacenter(&mut self, name: Option<&str>) -> AdminResult<Datacenter> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.random_name(""),
        };
        self.create_entity(json!({ "name": name })).await
    }

    /// Creates a database, named `test_<n>` when `name` is `None`.
    ///
    /// Database names may not contain `-`.
    pub async fn create_database(&mut self, name: Option<&str>) -> AdminResult<Database> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.random_name("test_"),
        };
        if name.contains('-') {
            return Err(AdminError::InvalidName(name));
        }
        self.create_entity(json!({ "name": name })).await
    }

    /// Creates a table.
    pub async fn create_table(&mut self, options: TableOptions) -> AdminResult<Table> {
        let name = match options.name {
            Some(name) => name,
            None => self.random_name(""),
        };
        let primary = match &options.primary {
            Some(dc) => self.resolve_id::<Datacenter>(dc)?,
            None => EntityUuid::NIL,
        };
        let affinities = self.datacenter_counts(&options.affinities)?;
        let mut ack_expectations = Map::new();
        for (dc, acks) in &options.ack_expectations {
            let id = self.resolve_id::<Datacenter>(dc)?;
            ack_expectations.insert(id.to_string(), json!({ "expectation": acks }));
        }
        let database = match &options.database {
            Some(db) => self.resolve_id::<Database>(db)?,
            None => self.resolve_id::<Database>(EntityRef::name(self.config.default_database.clone()))?,
        };
        let primary_key = options
            .primary_key
            .unwrap_or_else(|| self.config.default_primary_key.clone());

        let table: Table = self
            .create_entity(json!({
                "name": name,
                "primary_uuid": primary,
                "replica_affinities": affinities,
                "ack_expectations": ack_expectations,
                "database": database,
                "primary_key": primary_key,
            }))
            .await?;

        if options.wait_until_ready {
            self.wait_for_table(table.id()).await?;
            info!("Table {} available", table.name);
        }
        Ok(table)
    }

    fn datacenter_counts(&self, counts: &[(EntityRef, u64)]) -> AdminResult<Map<String, Value>> {
        let mut resolved = Map::new();
        for (dc, count) in counts {
            let id = self.resolve_id::<Datacenter>(dc)?;
            resolved.insert(id.to_string(), json!(count));
        }
        Ok(resolved)
    }

    // ── Deletion ─────────────────────────────────────────────────

    async fn delete_entity<E: MirroredEntity>(&mut self, reference: impl Into<EntityRef>) -> AdminResult<()> {
        let id = self.resolve_id::<E>(reference)?;
        E::collection_mut(self).remove(&id);
        self.conflicts.remove_entity(E::KIND, id);
        self.query_text(NodeRequest::delete(routes::entity(E::KIND, id))).await?;
        info!("Deleted {} {}", E::KIND, id);
        self.sync_after_mutation().await?;
        Ok(())
    }

    /// Declares a server dead and removes it from the cluster.
    pub async fn delete_server(&mut self, server: impl Into<EntityRef>) -> AdminResult<()> {
        self.delete_entity::<Server>(server).await
    }

    pub async fn delete_datacenter(&mut self, datacenter: impl Into<EntityRef>) -> AdminResult<()> {
        self.delete_entity::<Datacenter>(datacenter).await
    }

    pub async fn delete_database(&mut self, database: impl Into<EntityRef>) -> AdminResult<()> {
        self.delete_entity::<Database>(database).await
    }

    pub async fn delete_table(&mut self, table: impl Into<EntityRef>) -> AdminResult<()> {
        self.delete_entity::<Table>(table).await
    }

    // ── Field updates ────────────────────────────────────────────

    async fn post_field(
        &mut self,
        kind: EntityKind,
        id: EntityUuid,
        field: &str,
        value: &Value,
    ) -> AdminResult<()> {
        self.query_text(NodeRequest::post(routes::field(kind, id, field), value))
            .await?;
        self.sync_after_mutation().await?;
        Ok(())
    }

    /// Renames any mirrored entity.
    pub async fn rename<E: MirroredEntity>(
        &mut self,
        target: impl Into<EntityRef>,
        name: &str,
    ) -> AdminResult<()> {
        let id = self.resolve_id::<E>(target)?;
        self.entity_mut::<E>(id)?.set_name(name.to_string());
        self.post_field(E::KIND, id, "name", &json!(name)).await
    }

    pub async fn move_server_to_datacenter(
        &mut self,
        server: impl Into<EntityRef>,
        datacenter: impl Into<EntityRef>,
    ) -> AdminResult<()> {
        let server = self.resolve_id::<Server>(server)?;
        let datacenter = self.resolve_id::<Datacenter>(datacenter)?;
        self.entity_mut::<Server>(server)?.datacenter_uuid = Some(datacenter);
        self.post_field(EntityKind::Server, server, "datacenter_uuid", &json!(datacenter))
            .await
    }

    /// Sets a table's primary datacenter; `None` unsets it.
    pub async fn move_table_primary(
        &mut self,
        table: impl Into<EntityRef>,
        primary: Option<EntityRef>,
    ) -> AdminResult<()> {
        let table = self.resolve_id::<Table>(table)?;
        let primary = match primary {
            Some(dc) => self.resolve_id::<Datacenter>(dc)?,
            None => EntityUuid::NIL,
        };
        self.entity_mut::<Table>(table)?.primary_uuid = Some(primary);
        self.post_field(EntityKind::Table, table, "primary_uuid", &json!(primary))
            .await
    }

    /// Sets replica counts for the given datacenters. Datacenters not listed
    /// keep their current affinity.
    pub async fn set_table_affinities(
        &mut self,
        table: impl Into<EntityRef>,
        affinities: &[(EntityRef, u64)],
    ) -> AdminResult<()> {
        let table = self.resolve_id::<Table>(table)?;
        let update = self.datacenter_counts(affinities)?;
        let local = self.entity_mut::<Table>(table)?;
        for (dc, count) in &update {
            if let (Ok(dc), Some(count)) = (EntityUuid::parse(dc), count.as_u64()) {
                local.replica_affinities.insert(dc, count);
            }
        }
        self.post_field(EntityKind::Table, table, "replica_affinities", &Value::Object(update))
            .await
    }

    /// Sets acknowledgement counts for the given datacenters. New entries
    /// default to hard durability; existing entries keep their durability.
    pub async fn set_table_ack_expectations(
        &mut self,
        table: impl Into<EntityRef>,
        expectations: &[(EntityRef, u64)],
    ) -> AdminResult<()> {
        let table = self.resolve_id::<Table>(table)?;
        let mut resolved = Vec::with_capacity(expectations.len());
        for (dc, acks) in expectations {
            resolved.push((self.resolve_id::<Datacenter>(dc)?, *acks));
        }

        let local = self.entity_mut::<Table>(table)?;
        let mut update = Map::new();
        for (dc, acks) in resolved {
            local
                .ack_expectations
                .entry(dc)
                .and_modify(|e| e.expectation = acks)
                .or_insert_with(|| AckExpectation::new(acks));
            update.insert(dc.to_string(), json!({ "expectation": acks }));
        }
        self.post_field(EntityKind::Table, table, "ack_expectations", &Value::Object(update))
            .await
    }

    // ── Sharding ─────────────────────────────────────────────────

    /// Adds split points and removes others in one request. Nothing changes
    /// locally unless every edit applies.
    pub async fn change_table_shards(
        &mut self,
        table: impl Into<EntityRef>,
        adds: &[&str],
        removes: &[&str],
    ) -> AdminResult<()> {
        let id = self.resolve_id::<Table>(table)?;
        let mut edited = self.entity_mut::<Table>(id)?.clone();
        for point in adds {
            edited.add_split(*point)?;
        }
        for point in removes {
            edited.remove_split(point)?;
        }
        let shards = json!(edited.shards_to_wire());
        *self.entity_mut::<Table>(id)? = edited;
        self.post_field(EntityKind::Table, id, "shards", &shards).await
    }

    pub async fn add_table_shard(&mut self, table: impl Into<EntityRef>, split: &str) -> AdminResult<()> {
        self.change_table_shards(table, &[split], &[]).await
    }

    pub async fn remove_table_shard(
        &mut self,
        table: impl Into<EntityRef>,
        split: &str,
    ) -> AdminResult<()> {
        self.change_table_shards(table, &[], &[split]).await
    }

    // ── Conflicts ────────────────────────────────────────────────

    /// Resolves a registered conflict with one of its candidate values.
    pub async fn resolve_conflict(&mut self, key: &ConflictKey, value: &Value) -> AdminResult<()> {
        let conflict = self.conflicts.get(key).ok_or_else(|| AdminError::UnknownConflict {
            kind: key.kind,
            id: key.id,
            field: key.field.clone(),
        })?;
        if !conflict.accepts(value) {
            return Err(AdminError::InvalidResolution {
                field: key.field.clone(),
                value: value.clone(),
            });
        }

        match key.kind {
            EntityKind::Server => self.apply_resolution::<Server>(key, value).await,
            EntityKind::Datacenter => self.apply_resolution::<Datacenter>(key, value).await,
            EntityKind::Database => self.apply_resolution::<Database>(key, value).await,
            EntityKind::Table => self.apply_resolution::<Table>(key, value).await,
        }
    }

    /// Sends a vetted resolution. The chosen value is applied to a copy of
    /// the entity first so a value the model rejects never reaches the cluster.
    async fn apply_resolution<E: MirroredEntity>(
        &mut self,
        key: &ConflictKey,
        value: &Value,
    ) -> AdminResult<()> {
        let mut resolved = self.entity_mut::<E>(key.id)?.clone();
        resolved.set_field(&key.field, value)?;

        self.query_text(NodeRequest::post(routes::resolve(key.kind, key.id, &key.field), value))
            .await?;
        self.conflicts.remove(key);
        *self.entity_mut::<E>(key.id)? = resolved;
        info!("Resolved value conflict on {} to {}", key, value);
        self.emit(MirrorEvent::ConflictResolved {
            key: key.clone(),
            value: value.clone(),
        });
        self.sync_after_mutation().await?;
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────

    /// The table's primary datacenter when `primary_only`, otherwise a random
    /// pick among the primary and the replica-affinity datacenters.
    pub fn datacenter_in_table(
        &mut self,
        table: impl Into<EntityRef>,
        primary_only: bool,
    ) -> AdminResult<&Datacenter> {
        let table = self.find::<Table>(table)?;
        let mut candidates = Vec::new();
        if !table.primary_unset() {
            candidates.extend(table.primary_uuid);
        }
        if !primary_only {
            candidates.extend(table.replica_affinities.keys().copied());
        }
        let table_id = table.id;
        if candidates.is_empty() {
            return Err(AdminError::UnknownReference {
                kind: EntityKind::Datacenter,
                reference: format!("datacenter of table {table_id}"),
            });
        }
        let pick = candidates[self.rng.gen_range(0..candidates.len())];
        self.find::<Datacenter>(pick)
    }
}
