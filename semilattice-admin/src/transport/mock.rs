//! An in-process cluster for tests.
//!
//! [`SimulatedCluster`] answers the same admin API a real cluster does, from
//! one shared semilattice. Individual nodes can be taken down or made to
//! report a divergent snapshot, and value conflicts, issues, logs and
//! directory contents can be injected.

use super::{Method, NodeRequest, NodeResponse, NodeTransport};
use crate::conflict::VALUE_IN_CONFLICT;
use crate::error::{AdminError, AdminResult};
use crate::routes;
use crate::snapshot::IDENTITY_FIELD;
use async_trait::async_trait;
use semilattice_types::{EntityKind, EntityUuid, NodeAddress};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// First port handed out to simulated nodes.
pub const BASE_PORT: u16 = 8080;

const LOG_PREFIX: &str = "/ajax/log/";

type ConflictSlot = (EntityKind, EntityUuid, String);

struct SimNode {
    address: NodeAddress,
    machine: EntityUuid,
    down: bool,
    snapshot_override: Option<Value>,
}

struct InjectedFailure {
    method: Method,
    path: String,
    status: u16,
    reason: String,
}

struct State {
    nodes: Vec<SimNode>,
    semilattice: Value,
    candidates: HashMap<ConflictSlot, Value>,
    directory: Value,
    issues: Value,
    progress: Value,
    stats: Value,
    logs: HashMap<EntityUuid, Value>,
    distribution_failures: u32,
    failures: VecDeque<InjectedFailure>,
    requests: Vec<(NodeAddress, NodeRequest)>,
}

/// A cluster of `n` nodes sharing one semilattice, served in-process.
pub struct SimulatedCluster {
    state: Mutex<State>,
}

impl SimulatedCluster {
    /// Creates a cluster of `node_count` nodes on `localhost:8080..`.
    ///
    /// Each node has a machine record named `node{i}` without a datacenter.
    /// A database named `test` exists, as on a freshly started cluster.
    pub fn new(node_count: usize) -> Self {
        let mut machines = Map::new();
        let mut directory = Map::new();
        let nodes = (0..node_count)
            .map(|i| {
                let machine = EntityUuid::new();
                machines.insert(
                    machine.to_string(),
                    json!({ "name": format!("node{i}"), "datacenter_uuid": null }),
                );
                directory.insert(
                    machine.to_string(),
                    json!({ "rdb_namespaces": { "reactor_bcards": {} } }),
                );
                SimNode {
                    address: NodeAddress::new("localhost", BASE_PORT + i as u16),
                    machine,
                    down: false,
                    snapshot_override: None,
                }
            })
            .collect();

        let semilattice = json!({
            "machines": machines,
            "datacenters": {},
            "databases": { (EntityUuid::new().to_string()): { "name": "test" } },
            "rdb_namespaces": {},
        });

        Self {
            state: Mutex::new(State {
                nodes,
                semilattice,
                candidates: HashMap::new(),
                directory: Value::Object(directory),
                issues: json!([]),
                progress: json!({}),
                stats: json!({}),
                logs: HashMap::new(),
                distribution_failures: 0,
                failures: VecDeque::new(),
                requests: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Addresses of every node, in creation order.
    pub fn nodes(&self) -> Vec<NodeAddress> {
        self.state().nodes.iter().map(|n| n.address.clone()).collect()
    }

    /// Machine id of the node at `index`.
    pub fn machine_id(&self, index: usize) -> Option<EntityUuid> {
        self.state().nodes.get(index).map(|n| n.machine)
    }

    /// The shared semilattice, without any node identity.
    pub fn snapshot(&self) -> Value {
        self.state().semilattice.clone()
    }

    /// Edits the shared semilattice directly, bypassing the API.
    pub fn update(&self, f: impl FnOnce(&mut Value)) {
        f(&mut self.state().semilattice);
    }

    /// Makes the node at `index` report `snapshot` instead of the shared one.
    pub fn set_node_override(&self, index: usize, snapshot: Value) {
        if let Some(node) = self.state().nodes.get_mut(index) {
            node.snapshot_override = Some(snapshot);
        }
    }

    pub fn clear_node_override(&self, index: usize) {
        if let Some(node) = self.state().nodes.get_mut(index) {
            node.snapshot_override = None;
        }
    }

    /// Makes requests to the node at `index` fail at the connection level.
    pub fn set_node_down(&self, index: usize, down: bool) {
        if let Some(node) = self.state().nodes.get_mut(index) {
            node.down = down;
        }
    }

    /// Puts `field` of an entity in conflict between `(source, value)` candidates.
    pub fn inject_conflict(
        &self,
        kind: EntityKind,
        id: EntityUuid,
        field: &str,
        candidates: Vec<(Value, Value)>,
    ) {
        let mut state = self.state();
        if let Some(record) = state.record_mut(kind, id) {
            record.insert(field.to_string(), json!(VALUE_IN_CONFLICT));
        }
        let list = candidates
            .into_iter()
            .map(|(source, value)| json!([source, value]))
            .collect();
        state
            .candidates
            .insert((kind, id, field.to_string()), Value::Array(list));
    }

    pub fn set_directory(&self, directory: Value) {
        self.state().directory = directory;
    }

    pub fn set_issues(&self, issues: Value) {
        self.state().issues = issues;
    }

    pub fn set_progress(&self, progress: Value) {
        self.state().progress = progress;
    }

    pub fn set_stats(&self, stats: Value) {
        self.state().stats = stats;
    }

    /// Sets what the log endpoint returns for `server`.
    pub fn set_log(&self, server: EntityUuid, log: Value) {
        self.state().logs.insert(server, log);
    }

    /// Makes the next `count` distribution queries fail with a 500.
    pub fn set_distribution_failures(&self, count: u32) {
        self.state().distribution_failures = count;
    }

    /// Makes the next `method` request to exactly `path` fail with `status`.
    pub fn fail_next(&self, method: Method, path: impl Into<String>, status: u16, reason: &str) {
        self.state().failures.push_back(InjectedFailure {
            method,
            path: path.into(),
            status,
            reason: reason.to_string(),
        });
    }

    /// Every request received so far, with the node it was sent to.
    pub fn requests(&self) -> Vec<(NodeAddress, NodeRequest)> {
        self.state().requests.clone()
    }

    /// Number of received requests with the given method and path.
    pub fn count_requests(&self, method: Method, path: &str) -> usize {
        self.state()
            .requests
            .iter()
            .filter(|(_, r)| r.method == method && r.path == path)
            .count()
    }

    /// Number of snapshot polls received, across all nodes.
    pub fn snapshot_requests(&self) -> usize {
        self.count_requests(Method::Get, routes::SEMILATTICE)
    }
}

#[async_trait]
impl NodeTransport for SimulatedCluster {
    async fn send(&self, node: &NodeAddress, request: NodeRequest) -> AdminResult<NodeResponse> {
        let mut state = self.state();
        state.requests.push((node.clone(), request.clone()));

        let index = state
            .nodes
            .iter()
            .position(|n| &n.address == node)
            .ok_or_else(|| AdminError::Transport(format!("{node}: unknown host")))?;
        if state.nodes[index].down {
            return Err(AdminError::Transport(format!("{node}: connection refused")));
        }

        if let Some(pos) = state
            .failures
            .iter()
            .position(|f| f.method == request.method && f.path == request.path)
        {
            if let Some(failure) = state.failures.remove(pos) {
                debug!("Injected failure for {} {}", request.method, request.path);
                return Ok(NodeResponse::error(failure.status, failure.reason));
            }
        }

        Ok(state.handle(index, &request))
    }
}

fn not_found() -> NodeResponse {
    NodeResponse::error(404, "Not Found")
}

fn bad_request() -> NodeResponse {
    NodeResponse::error(400, "Bad Request")
}

fn json_response(value: &Value) -> NodeResponse {
    NodeResponse::ok(value.to_string())
}

impl State {
    fn snapshot_for(&self, index: usize) -> Value {
        let node = &self.nodes[index];
        let mut snapshot = node
            .snapshot_override
            .clone()
            .unwrap_or_else(|| self.semilattice.clone());
        if let Some(map) = snapshot.as_object_mut() {
            map.insert(IDENTITY_FIELD.to_string(), json!(node.machine));
        }
        snapshot
    }

    fn collection_mut(&mut self, kind: EntityKind) -> Option<&mut Map<String, Value>> {
        self.semilattice
            .get_mut(kind.collection())
            .and_then(Value::as_object_mut)
    }

    fn record(&self, kind: EntityKind, id: EntityUuid) -> Option<&Value> {
        self.semilattice
            .get(kind.collection())?
            .get(id.to_string())
            .filter(|r| !r.is_null())
    }

    fn record_mut(&mut self, kind: EntityKind, id: EntityUuid) -> Option<&mut Map<String, Value>> {
        self.collection_mut(kind)?
            .get_mut(&id.to_string())
            .and_then(Value::as_object_mut)
    }

    fn handle(&mut self, index: usize, request: &NodeRequest) -> NodeResponse {
        let (path, query) = match request.path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (request.path.as_str(), None),
        };
        let body = match request.body.as_deref().map(serde_json::from_str::<Value>) {
            None => None,
            Some(Ok(value)) => Some(value),
            Some(Err(_)) => return bad_request(),
        };

        match (request.method, path) {
            (Method::Get, routes::SEMILATTICE) => json_response(&self.snapshot_for(index)),
            (Method::Get, routes::AJAX) => json_response(&json!({
                "semilattice": self.snapshot_for(index),
                "directory": self.directory,
                "issues": self.issues,
                "progress": self.progress,
            })),
            (Method::Get, routes::DIRECTORY | routes::DIRECTORY_ALL) => {
                json_response(&self.directory)
            }
            (Method::Get, routes::ISSUES) => json_response(&self.issues),
            (Method::Get, routes::PROGRESS) => json_response(&self.progress),
            (Method::Get, "/ajax/stat") => json_response(&self.stats),
            (Method::Get, "/ajax/distribution") => self.distribution(query.unwrap_or_default()),
            (Method::Get, p) if p.starts_with(LOG_PREFIX) => self.log(&p[LOG_PREFIX.len()..]),
            (method, p) => {
                match p.strip_prefix(routes::SEMILATTICE).and_then(|p| p.strip_prefix('/')) {
                    Some(rest) => self.semilattice_route(method, rest, body),
                    None => not_found(),
                }
            }
        }
    }

    fn distribution(&mut self, query: &str) -> NodeResponse {
        let table = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "namespace")
            .and_then(|(_, value)| EntityUuid::parse(value).ok());
        if self.distribution_failures > 0 {
            self.distribution_failures -= 1;
            return NodeResponse::error(500, "Internal Server Error");
        }
        match table {
            Some(id) if self.record(EntityKind::Table, id).is_some() => {
                json_response(&json!({ "": 0 }))
            }
            _ => not_found(),
        }
    }

    fn log(&self, server: &str) -> NodeResponse {
        let Ok(id) = EntityUuid::parse(server) else {
            return not_found();
        };
        match self.logs.get(&id) {
            Some(log) => json_response(&json!({ (server): log })),
            None => not_found(),
        }
    }

    fn semilattice_route(&mut self, method: Method, rest: &str, body: Option<Value>) -> NodeResponse {
        let segments: Vec<&str> = rest.split('/').collect();
        let Some(kind) = segments.first().copied().and_then(EntityKind::from_collection) else {
            return not_found();
        };
        if segments.get(1) == Some(&"new") {
            return match (method, segments.len(), body) {
                (Method::Post, 2, Some(Value::Object(fields))) => self.create(kind, fields),
                (Method::Post, 2, _) => bad_request(),
                _ => not_found(),
            };
        }
        let Some(id) = segments.get(1).and_then(|s| EntityUuid::parse(s).ok()) else {
            return not_found();
        };
        if self.record(kind, id).is_none() {
            return not_found();
        }

        match (method, &segments[2..], body) {
            (Method::Get, [], _) => self.record(kind, id).map_or_else(not_found, json_response),
            (Method::Delete, [], _) => self.delete(kind, id),
            (Method::Get, [field], _) => self
                .record(kind, id)
                .and_then(|r| r.get(*field))
                .map_or_else(not_found, json_response),
            (Method::Post, [field], Some(value)) => self.set_field(kind, id, field, value),
            (Method::Get, [field, "resolve"], _) => self
                .candidates
                .get(&(kind, id, field.to_string()))
                .map_or_else(not_found, json_response),
            (Method::Post, [field, "resolve"], Some(value)) => self.resolve(kind, id, field, value),
            (Method::Post, _, None) => bad_request(),
            _ => not_found(),
        }
    }

    fn create(&mut self, kind: EntityKind, fields: Map<String, Value>) -> NodeResponse {
        let mut record = match kind {
            EntityKind::Server => return NodeResponse::error(405, "Method Not Allowed"),
            EntityKind::Datacenter | EntityKind::Database => Map::new(),
            EntityKind::Table => match json!({
                "primary_uuid": EntityUuid::NIL,
                "replica_affinities": {},
                "ack_expectations": {},
                "shards": ["[\"\",null]"],
                "primary_pinnings": {},
                "secondary_pinnings": {},
                "blueprint": { "peers_roles": {} },
            }) {
                Value::Object(defaults) => defaults,
                _ => Map::new(),
            },
        };
        if !fields.get("name").is_some_and(Value::is_string) {
            return bad_request();
        }
        for (field, value) in fields {
            if field == "ack_expectations" {
                let mut merged = Value::Object(Map::new());
                merge_ack_expectations(&mut merged, value);
                record.insert(field, merged);
            } else {
                record.insert(field, value);
            }
        }

        let id = EntityUuid::new();
        let record = Value::Object(record);
        if let Some(collection) = self.collection_mut(kind) {
            collection.insert(id.to_string(), record.clone());
        }
        debug!("Created {} {}", kind, id);
        json_response(&json!({ (id.to_string()): record }))
    }

    fn delete(&mut self, kind: EntityKind, id: EntityUuid) -> NodeResponse {
        if let Some(collection) = self.collection_mut(kind) {
            collection.insert(id.to_string(), Value::Null);
        }
        self.candidates.retain(|(k, i, _), _| !(*k == kind && *i == id));
        json_response(&json!({}))
    }

    fn set_field(&mut self, kind: EntityKind, id: EntityUuid, field: &str, value: Value) -> NodeResponse {
        let Some(record) = self.record_mut(kind, id) else {
            return not_found();
        };
        let Some(slot) = record.get_mut(field) else {
            return not_found();
        };
        match field {
            "replica_affinities" => match (slot.as_object_mut(), value) {
                (Some(current), Value::Object(update)) => current.extend(update),
                _ => return bad_request(),
            },
            "ack_expectations" => {
                if !slot.is_object() || !value.is_object() {
                    return bad_request();
                }
                merge_ack_expectations(slot, value);
            }
            _ => *slot = value,
        }
        let updated = slot.clone();
        self.candidates.remove(&(kind, id, field.to_string()));
        json_response(&updated)
    }

    fn resolve(&mut self, kind: EntityKind, id: EntityUuid, field: &str, value: Value) -> NodeResponse {
        let slot = (kind, id, field.to_string());
        let accepted = self
            .candidates
            .get(&slot)
            .and_then(Value::as_array)
            .is_some_and(|list| list.iter().any(|pair| pair.get(1) == Some(&value)));
        if !accepted {
            return bad_request();
        }
        self.candidates.remove(&slot);
        if let Some(record) = self.record_mut(kind, id) {
            record.insert(field.to_string(), value.clone());
        }
        json_response(&value)
    }
}

/// Merges `{dc: {expectation, ...}}` into `target`, defaulting new entries
/// to hard durability.
fn merge_ack_expectations(target: &mut Value, update: Value) {
    let (Some(current), Value::Object(update)) = (target.as_object_mut(), update) else {
        return;
    };
    for (dc, entry) in update {
        let slot = current
            .entry(dc)
            .or_insert_with(|| json!({ "hard_durability": true }));
        match (slot.as_object_mut(), entry) {
            (Some(slot), Value::Object(entry)) => slot.extend(entry),
            (_, entry) => *slot = entry,
        }
    }
}
