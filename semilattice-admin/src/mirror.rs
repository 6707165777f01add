//! Cluster mirror: the reconciliation engine.
//!
//! The mirror keeps a local copy of every server, datacenter, database and
//! table the cluster reports. A sync cycle polls every node, requires all of
//! them to report the same snapshot (retrying at a fixed interval within a
//! budget), merges entities it has not seen yet, and then checks every
//! mirrored entity against the agreed snapshot. Fields the cluster marks as
//! in conflict become registered [`Conflict`]s; any other disagreement is a
//! bug and fails the cycle.

use crate::config::MirrorConfig;
use crate::conflict::{is_conflict_marker, Conflict, ConflictKey, ConflictRegistry};
use crate::error::{AdminError, AdminResult};
use crate::events::{MirrorEvent, MirrorObserver};
use crate::resolver::{self, EntityRef};
use crate::routes;
use crate::snapshot::{strip_identity, ClusterSnapshot};
use crate::transport::{NodeRequest, NodeTransport};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use semilattice_model::{ClusterEntity, Database, Datacenter, Server, Table};
use semilattice_types::{EntityUuid, NodeAddress};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the most recent sync cycle got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No cycle has run yet.
    Idle,
    Polling,
    Comparing,
    Merging,
    Verifying,
    Done,
    Failed,
}

/// Outcome of a successful sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Polling rounds needed before the nodes agreed.
    pub attempts: u32,
    /// Entities added to the mirror.
    pub merged: usize,
    /// Tombstoned entities dropped from the mirror.
    pub removed: usize,
    /// Conflicts registered by this cycle.
    pub new_conflicts: usize,
}

/// Entity types the mirror keeps a collection of.
pub trait MirroredEntity: ClusterEntity {
    fn collection(mirror: &ClusterMirror) -> &HashMap<EntityUuid, Self>;
    fn collection_mut(mirror: &mut ClusterMirror) -> &mut HashMap<EntityUuid, Self>;
}

macro_rules! mirrored {
    ($ty:ty, $field:ident) => {
        impl MirroredEntity for $ty {
            fn collection(mirror: &ClusterMirror) -> &HashMap<EntityUuid, Self> {
                &mirror.$field
            }

            fn collection_mut(mirror: &mut ClusterMirror) -> &mut HashMap<EntityUuid, Self> {
                &mut mirror.$field
            }
        }
    };
}

mirrored!(Server, servers);
mirrored!(Datacenter, datacenters);
mirrored!(Database, databases);
mirrored!(Table, tables);

/// Local, authoritative-after-sync copy of a cluster's configuration.
///
/// All mutation goes through `&mut self`, so one mirror serves one caller at
/// a time.
pub struct ClusterMirror {
    nodes: Vec<NodeAddress>,
    transport: Arc<dyn NodeTransport>,
    pub(crate) config: MirrorConfig,
    pub(crate) rng: StdRng,
    observer: Option<Arc<dyn MirrorObserver>>,
    phase: SyncPhase,
    pub(crate) servers: HashMap<EntityUuid, Server>,
    pub(crate) datacenters: HashMap<EntityUuid, Datacenter>,
    pub(crate) databases: HashMap<EntityUuid, Database>,
    pub(crate) tables: HashMap<EntityUuid, Table>,
    pub(crate) conflicts: ConflictRegistry,
}

impl ClusterMirror {
    /// Creates an empty mirror. Call [`bootstrap`](Self::bootstrap) to populate it.
    pub fn new(
        nodes: Vec<NodeAddress>,
        transport: Arc<dyn NodeTransport>,
        config: MirrorConfig,
    ) -> AdminResult<Self> {
        if nodes.is_empty() {
            return Err(AdminError::NoNodes);
        }
        Ok(Self {
            nodes,
            transport,
            config,
            rng: StdRng::from_entropy(),
            observer: None,
            phase: SyncPhase::Idle,
            servers: HashMap::new(),
            datacenters: HashMap::new(),
            databases: HashMap::new(),
            tables: HashMap::new(),
            conflicts: ConflictRegistry::new(),
        })
    }

    /// Creates a mirror and runs the initial sync with the bootstrap budget.
    pub async fn connect(
        nodes: Vec<NodeAddress>,
        transport: Arc<dyn NodeTransport>,
        config: MirrorConfig,
    ) -> AdminResult<Self> {
        let mut mirror = Self::new(nodes, transport, config)?;
        mirror.bootstrap().await?;
        Ok(mirror)
    }

    /// Replaces the random source used for node selection and default names.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Seeds the random source, for reproducible runs.
    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(StdRng::seed_from_u64(seed))
    }

    /// Sets the observer that receives [`MirrorEvent`]s.
    pub fn set_observer(&mut self, observer: Arc<dyn MirrorObserver>) {
        self.observer = Some(observer);
    }

    /// Runs the initial sync with the bootstrap budget.
    pub async fn bootstrap(&mut self) -> AdminResult<SyncReport> {
        let budget = self.config.bootstrap_timeout();
        self.sync(budget).await
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn nodes(&self) -> &[NodeAddress] {
        &self.nodes
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Phase the most recent sync cycle ended in (or is in).
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn servers(&self) -> &HashMap<EntityUuid, Server> {
        &self.servers
    }

    pub fn datacenters(&self) -> &HashMap<EntityUuid, Datacenter> {
        &self.datacenters
    }

    pub fn databases(&self) -> &HashMap<EntityUuid, Database> {
        &self.databases
    }

    pub fn tables(&self) -> &HashMap<EntityUuid, Table> {
        &self.tables
    }

    /// Registered value conflicts.
    pub fn conflicts(&self) -> &[Conflict] {
        self.conflicts.as_slice()
    }

    /// Looks up an entity of type `E` by id, name or handle.
    pub fn find<E: MirroredEntity>(&self, reference: impl Into<EntityRef>) -> AdminResult<&E> {
        resolver::resolve(&reference.into(), E::collection(self))
    }

    pub fn server(&self, reference: impl Into<EntityRef>) -> AdminResult<&Server> {
        self.find(reference)
    }

    pub fn datacenter(&self, reference: impl Into<EntityRef>) -> AdminResult<&Datacenter> {
        self.find(reference)
    }

    pub fn database(&self, reference: impl Into<EntityRef>) -> AdminResult<&Database> {
        self.find(reference)
    }

    pub fn table(&self, reference: impl Into<EntityRef>) -> AdminResult<&Table> {
        self.find(reference)
    }

    /// Total number of mirrored entities across all collections.
    pub fn entity_count(&self) -> usize {
        self.servers.len() + self.datacenters.len() + self.databases.len() + self.tables.len()
    }

    // ── Requests ─────────────────────────────────────────────────

    pub(crate) fn emit(&self, event: MirrorEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }

    /// Sends a request to a specific node and returns the body text.
    pub(crate) async fn query_node_text(
        &self,
        node: &NodeAddress,
        request: NodeRequest,
    ) -> AdminResult<String> {
        self.transport.send(node, request).await?.into_body()
    }

    /// Sends a request to a specific node and parses the JSON body.
    pub(crate) async fn query_node(
        &self,
        node: &NodeAddress,
        request: NodeRequest,
    ) -> AdminResult<Value> {
        let text = self.query_node_text(node, request).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub(crate) fn pick_node(&mut self) -> NodeAddress {
        let index = self.rng.gen_range(0..self.nodes.len());
        self.nodes[index].clone()
    }

    /// Sends a request to a randomly chosen node and returns the body text.
    pub(crate) async fn query_text(&mut self, request: NodeRequest) -> AdminResult<String> {
        let node = self.pick_node();
        self.query_node_text(&node, request).await
    }

    /// Sends a request to a randomly chosen node and parses the JSON body.
    pub(crate) async fn query(&mut self, request: NodeRequest) -> AdminResult<Value> {
        let node = self.pick_node();
        self.query_node(&node, request).await
    }

    // ── Sync cycle ───────────────────────────────────────────────

    /// Runs the sync cycle with the post-mutation budget.
    pub async fn sync_after_mutation(&mut self) -> AdminResult<SyncReport> {
        let budget = self.config.mutation_timeout();
        self.sync(budget).await
    }

    /// Polls every node until they agree (within `budget`), then merges and
    /// verifies the agreed snapshot.
    pub async fn sync(&mut self, budget: Duration) -> AdminResult<SyncReport> {
        let result = self.run_cycle(budget).await;
        self.phase = match &result {
            Ok(_) => SyncPhase::Done,
            Err(e) => {
                warn!("Sync cycle failed: {}", e);
                SyncPhase::Failed
            }
        };
        result
    }

    async fn run_cycle(&mut self, budget: Duration) -> AdminResult<SyncReport> {
        let (snapshot, attempts) = self.poll_until_consistent(budget).await?;
        let snapshot = ClusterSnapshot::new(snapshot)?;

        self.phase = SyncPhase::Merging;
        let (merged, removed) = self.merge(&snapshot)?;

        self.phase = SyncPhase::Verifying;
        let new_conflicts = self.verify(&snapshot).await?;

        debug!(
            "Sync done after {} attempt(s): {} merged, {} removed, {} new conflicts",
            attempts, merged, removed, new_conflicts
        );
        Ok(SyncReport {
            attempts,
            merged,
            removed,
            new_conflicts,
        })
    }

    async fn fetch_snapshot(&self, node: &NodeAddress) -> AdminResult<Value> {
        let mut snapshot = self
            .query_node(node, NodeRequest::get(routes::SEMILATTICE))
            .await?;
        strip_identity(&mut snapshot);
        Ok(snapshot)
    }

    /// Polls all nodes at a fixed interval until every one of them reports
    /// the same snapshot. Returns the snapshot and the attempt it agreed on.
    async fn poll_until_consistent(&mut self, budget: Duration) -> AdminResult<(Value, u32)> {
        let attempts = self.config.attempts_for(budget);
        let interval = self.config.retry_interval();
        let mut last = (Value::Null, Value::Null);

        for attempt in 1..=attempts {
            tokio::time::sleep(interval).await;

            self.phase = SyncPhase::Polling;
            let polls = self.nodes.iter().map(|node| self.fetch_snapshot(node));
            let results = join_all(polls).await;

            self.phase = SyncPhase::Comparing;
            match agree(&self.nodes, results) {
                Ok(snapshot) => return Ok((snapshot, attempt)),
                Err((expected, actual)) => {
                    debug!(
                        "Nodes disagree (attempt {}/{}), retrying",
                        attempt, attempts
                    );
                    self.emit(MirrorEvent::DivergenceRetry { attempt, attempts });
                    last = (expected, actual);
                }
            }
        }

        Err(AdminError::ClusterDivergence {
            expected: Box::new(last.0),
            actual: Box::new(last.1),
            attempts,
        })
    }

    fn merge(&mut self, snapshot: &ClusterSnapshot) -> AdminResult<(usize, usize)> {
        let mut merged = 0;
        let mut removed = 0;
        for (m, r) in [
            self.merge_collection::<Server>(snapshot)?,
            self.merge_collection::<Datacenter>(snapshot)?,
            self.merge_collection::<Database>(snapshot)?,
            self.merge_collection::<Table>(snapshot)?,
        ] {
            merged += m;
            removed += r;
        }
        Ok((merged, removed))
    }

    fn merge_collection<E: MirroredEntity>(
        &mut self,
        snapshot: &ClusterSnapshot,
    ) -> AdminResult<(usize, usize)> {
        let kind = E::KIND;
        let mut events = Vec::new();

        let tombstones = snapshot
            .tombstones(kind)
            .map(EntityUuid::parse)
            .collect::<Result<Vec<_>, _>>()?;
        for id in tombstones {
            if E::collection_mut(self).remove(&id).is_some() {
                self.conflicts.remove_entity(kind, id);
                info!("Removed deleted {} {} from mirror", kind, id);
                events.push(MirrorEvent::EntityRemoved { kind, id });
            }
        }
        let removed = events.len();

        let mut reported = 0;
        let local = E::collection_mut(self);
        for (raw_id, fields) in snapshot.records(kind) {
            let id = EntityUuid::parse(raw_id)?;
            reported += 1;
            if !local.contains_key(&id) {
                local.insert(id, parse_new_record::<E>(raw_id, fields)?);
                debug!("Merged new {} {}", kind, id);
                events.push(MirrorEvent::EntityMerged { kind, id });
            }
        }
        let held = local.len();
        let merged = events.len() - removed;

        for event in events {
            self.emit(event);
        }

        if reported != held {
            return Err(AdminError::MergeInconsistency {
                kind,
                reported,
                local: held,
            });
        }
        Ok((merged, removed))
    }

    /// Checks every mirrored entity against the snapshot and registers
    /// conflicts for newly conflicted fields. Returns the number registered.
    async fn verify(&mut self, snapshot: &ClusterSnapshot) -> AdminResult<usize> {
        let mut fresh = Vec::new();
        fresh.extend(self.inspect_collection::<Server>(snapshot)?);
        fresh.extend(self.inspect_collection::<Datacenter>(snapshot)?);
        fresh.extend(self.inspect_collection::<Database>(snapshot)?);
        fresh.extend(self.inspect_collection::<Table>(snapshot)?);

        let mut registered = 0;
        for key in fresh {
            let data = self
                .query(NodeRequest::get(routes::resolve(key.kind, key.id, &key.field)))
                .await?;
            let conflict = Conflict::from_resolve_data(key.clone(), &data)?;
            let values: Vec<Value> = conflict.values().cloned().collect();
            warn!("{} on {} {}", conflict, key.kind, key.id);
            if self.conflicts.register(conflict) {
                registered += 1;
                self.emit(MirrorEvent::ConflictDetected { key, values });
            }
        }
        Ok(registered)
    }

    /// Compares one collection against the snapshot. Conflicted fields are
    /// skipped; the keys of those not yet registered are returned.
    fn inspect_collection<E: MirroredEntity>(
        &self,
        snapshot: &ClusterSnapshot,
    ) -> AdminResult<Vec<ConflictKey>> {
        let kind = E::KIND;
        let mut fresh = Vec::new();

        for (id, entity) in E::collection(self) {
            let Some(remote) = snapshot.record(kind, *id) else {
                return Err(AdminError::IntegrityViolation {
                    kind,
                    id: *id,
                    local: Box::new(entity.to_wire()),
                    remote: Box::new(Value::Null),
                });
            };

            let mut expected = remote.clone();
            if let Some(fields) = remote.as_object() {
                let local_wire = entity.to_wire();
                for (field, value) in fields.iter().filter(|(_, v)| is_conflict_marker(v)) {
                    let key = ConflictKey::new(kind, *id, field.as_str());
                    if self.conflicts.contains(&key) {
                        debug!("Value conflict on {} still pending", key);
                        self.emit(MirrorEvent::ConflictPending { key });
                    } else {
                        fresh.push(key);
                    }
                    // Judge the rest of the record against our own value for this field.
                    expected[field.as_str()] =
                        local_wire.get(field).cloned().unwrap_or_else(|| value.clone());
                }
            }

            if !entity.matches(&expected) {
                return Err(AdminError::IntegrityViolation {
                    kind,
                    id: *id,
                    local: Box::new(entity.to_wire()),
                    remote: Box::new(remote.clone()),
                });
            }
        }
        Ok(fresh)
    }

    // ── Helpers for operations ───────────────────────────────────

    /// Resolves a reference and returns the entity's id.
    pub(crate) fn resolve_id<E: MirroredEntity>(
        &self,
        reference: impl Into<EntityRef>,
    ) -> AdminResult<EntityUuid> {
        Ok(self.find::<E>(reference)?.id())
    }

    /// Mutable access to a mirrored entity by id.
    pub(crate) fn entity_mut<E: MirroredEntity>(&mut self, id: EntityUuid) -> AdminResult<&mut E> {
        E::collection_mut(self)
            .get_mut(&id)
            .ok_or_else(|| AdminError::UnknownReference {
                kind: E::KIND,
                reference: id.to_string(),
            })
    }

    pub(crate) fn random_name(&mut self, prefix: &str) -> String {
        format!("{prefix}{}", self.rng.gen_range(0..1_000_000u32))
    }
}

/// Parses a record seen for the first time. Contested fields the entity
/// cannot parse take a neutral value until the conflict is resolved; the
/// verify pass registers the conflict itself.
fn parse_new_record<E: ClusterEntity>(raw_id: &str, fields: &Value) -> AdminResult<E> {
    let mut fields = fields.clone();
    if let Some(map) = fields.as_object_mut() {
        for (field, value) in map.iter_mut() {
            if is_conflict_marker(value) {
                if let Some(placeholder) = E::conflict_placeholder(field) {
                    *value = placeholder;
                }
            }
        }
    }
    Ok(E::from_snapshot(raw_id, &fields)?)
}

/// Compares per-node results. The first successful snapshot is the
/// reference; any failure or difference yields `(expected, actual)`.
fn agree(
    nodes: &[NodeAddress],
    results: Vec<AdminResult<Value>>,
) -> Result<Value, (Value, Value)> {
    let mut expected: Option<Value> = None;
    let mut mismatch: Option<Value> = None;

    for (node, result) in nodes.iter().zip(results) {
        let actual = match result {
            Ok(snapshot) => match &expected {
                None => {
                    expected = Some(snapshot);
                    continue;
                }
                Some(reference) if *reference == snapshot => continue,
                Some(_) => snapshot,
            },
            Err(e) => {
                debug!("Polling {} failed: {}", node, e);
                json!({ "node": node.to_string(), "error": e.to_string() })
            }
        };
        mismatch.get_or_insert(actual);
    }

    match (expected, mismatch) {
        (Some(snapshot), None) => Ok(snapshot),
        (expected, actual) => Err((
            expected.unwrap_or(Value::Null),
            actual.unwrap_or(Value::Null),
        )),
    }
}
