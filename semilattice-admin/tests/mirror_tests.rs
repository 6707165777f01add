mod common;

use pretty_assertions::assert_eq;
use semilattice_admin::transport::mock::SimulatedCluster;
use semilattice_admin::{
    AdminError, ClusterMirror, ClusterSnapshot, ConflictKey, EntityKind, MirrorConfig, MirrorEvent,
    ModelError, NodeAddress, SyncPhase, VALUE_IN_CONFLICT,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ── Construction ────────────────────────────────────────────────

#[test]
fn new_without_nodes_fails() {
    let cluster = Arc::new(SimulatedCluster::new(1));
    let result = ClusterMirror::new(Vec::new(), cluster, MirrorConfig::default());
    assert!(matches!(result, Err(AdminError::NoNodes)));
}

#[test]
fn new_mirror_is_idle_and_empty() {
    let cluster = Arc::new(SimulatedCluster::new(2));
    let mirror = common::mirror(&cluster);
    assert_eq!(mirror.phase(), SyncPhase::Idle);
    assert_eq!(mirror.entity_count(), 0);
    assert_eq!(mirror.nodes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn connect_runs_the_bootstrap_sync() {
    let cluster = Arc::new(SimulatedCluster::new(3));
    let mirror = ClusterMirror::connect(cluster.nodes(), cluster.clone(), MirrorConfig::default())
        .await
        .unwrap();
    assert_eq!(mirror.phase(), SyncPhase::Done);
    assert_eq!(mirror.servers().len(), 3);
    assert_eq!(cluster.snapshot_requests(), 3);
}

// ── Agreement ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn identical_snapshots_reach_done() {
    let cluster = Arc::new(SimulatedCluster::new(2));
    let mut mirror = common::mirror(&cluster);

    let report = mirror.bootstrap().await.unwrap();

    assert_eq!(mirror.phase(), SyncPhase::Done);
    assert!(mirror.conflicts().is_empty());
    assert_eq!(report.attempts, 1);
    assert_eq!(report.new_conflicts, 0);

    let snapshot = ClusterSnapshot::new(cluster.snapshot()).unwrap();
    let reported: usize = EntityKind::ALL.iter().map(|k| snapshot.len(*k)).sum();
    assert_eq!(mirror.entity_count(), reported);
    assert_eq!(report.merged, reported);
    assert_eq!(mirror.database("test").unwrap().name, "test");
}

#[tokio::test(start_paused = true)]
async fn second_sync_merges_nothing_new() {
    let (_cluster, mut mirror, observer) = common::connected(2).await;
    let before = observer.count(|e| matches!(e, MirrorEvent::EntityMerged { .. }));

    let report = mirror.sync(Duration::from_secs(5)).await.unwrap();

    assert_eq!(report.merged, 0);
    assert_eq!(report.removed, 0);
    assert_eq!(
        observer.count(|e| matches!(e, MirrorEvent::EntityMerged { .. })),
        before
    );
}

#[tokio::test(start_paused = true)]
async fn entities_created_out_of_band_are_merged() {
    let (cluster, mut mirror, _) = common::connected(2).await;
    let id = semilattice_admin::EntityUuid::new();
    cluster.update(|s| s["datacenters"][id.to_string()] = json!({ "name": "east" }));

    let report = mirror.sync(Duration::from_secs(5)).await.unwrap();

    assert_eq!(report.merged, 1);
    assert_eq!(mirror.datacenter("east").unwrap().id, id);
}

// ── Divergence ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn nodes_that_never_agree_fail_with_divergence() {
    let (cluster, mut mirror, observer) = common::connected(2).await;
    let mut divergent = cluster.snapshot();
    divergent["databases"]
        .as_object_mut()
        .unwrap()
        .values_mut()
        .for_each(|db| db["name"] = json!("other"));
    cluster.set_node_override(1, divergent.clone());
    let polls_before = cluster.snapshot_requests();

    let err = mirror.sync(Duration::from_secs(3)).await.unwrap_err();

    match err {
        AdminError::ClusterDivergence {
            expected,
            actual,
            attempts,
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(*expected, cluster.snapshot());
            assert_eq!(*actual, divergent);
        }
        other => panic!("expected divergence, got {other:?}"),
    }
    assert_eq!(cluster.snapshot_requests() - polls_before, 6);
    assert_eq!(mirror.phase(), SyncPhase::Failed);
    assert_eq!(
        observer.count(|e| matches!(e, MirrorEvent::DivergenceRetry { .. })),
        3
    );
}

#[tokio::test(start_paused = true)]
async fn disagreement_that_clears_within_budget_succeeds() {
    let (cluster, mut mirror, _) = common::connected(2).await;
    let mut divergent = cluster.snapshot();
    divergent["datacenters"] = json!({ "not-a-real-id": null });
    cluster.set_node_override(0, divergent);

    let heal = async {
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        cluster.clear_node_override(0);
    };
    let (report, ()) = tokio::join!(mirror.sync(Duration::from_secs(10)), heal);

    assert_eq!(report.unwrap().attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn unreachable_node_is_retried() {
    let (cluster, mut mirror, _) = common::connected(2).await;
    cluster.set_node_down(1, true);

    let recover = async {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        cluster.set_node_down(1, false);
    };
    let (report, ()) = tokio::join!(mirror.sync(Duration::from_secs(10)), recover);

    assert_eq!(report.unwrap().attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn unreachable_node_reports_its_failure() {
    let (cluster, mut mirror, _) = common::connected(2).await;
    cluster.set_node_down(1, true);

    let err = mirror.sync(Duration::from_secs(1)).await.unwrap_err();

    let AdminError::ClusterDivergence { actual, attempts, .. } = err else {
        panic!("expected divergence");
    };
    assert_eq!(attempts, 1);
    assert_eq!(actual["node"], json!(NodeAddress::new("localhost", 8081).to_string()));
    assert!(actual["error"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test(start_paused = true)]
async fn zero_budget_still_polls_once() {
    let (cluster, mut mirror, _) = common::connected(1).await;
    let before = cluster.snapshot_requests();

    mirror.sync(Duration::ZERO).await.unwrap();

    assert_eq!(cluster.snapshot_requests() - before, 1);
}

// ── Merge ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn tombstoned_entities_are_removed() {
    let (cluster, mut mirror, observer) = common::connected(2).await;
    let dc = mirror.create_datacenter(Some("east")).await.unwrap();
    cluster.update(|s| s["datacenters"][dc.id.to_string()] = json!(null));

    let report = mirror.sync(Duration::from_secs(5)).await.unwrap();

    assert_eq!(report.removed, 1);
    assert!(mirror.datacenters().is_empty());
    assert_eq!(
        observer.count(|e| *e
            == MirrorEvent::EntityRemoved {
                kind: EntityKind::Datacenter,
                id: dc.id
            }),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn entity_missing_without_tombstone_is_a_merge_inconsistency() {
    let (cluster, mut mirror, _) = common::connected(2).await;
    let dc = mirror.create_datacenter(Some("east")).await.unwrap();
    cluster.update(|s| {
        s["datacenters"].as_object_mut().unwrap().remove(&dc.id.to_string());
    });

    let err = mirror.sync(Duration::from_secs(5)).await.unwrap_err();

    assert!(matches!(
        err,
        AdminError::MergeInconsistency {
            kind: EntityKind::Datacenter,
            reported: 0,
            local: 1,
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn invalid_record_id_is_rejected() {
    let (cluster, mut mirror, _) = common::connected(1).await;
    cluster.update(|s| s["datacenters"]["not-an-id"] = json!({ "name": "x" }));

    let err = mirror.sync(Duration::from_secs(1)).await.unwrap_err();

    assert!(matches!(err, AdminError::InvalidIdentifier(_)));
}

#[tokio::test(start_paused = true)]
async fn missing_collection_is_a_malformed_snapshot() {
    let (cluster, mut mirror, _) = common::connected(1).await;
    cluster.update(|s| {
        s.as_object_mut().unwrap().remove("rdb_namespaces");
    });

    let err = mirror.sync(Duration::from_secs(1)).await.unwrap_err();

    assert!(matches!(
        err,
        AdminError::Model(ModelError::MalformedSnapshot {
            kind: EntityKind::Table,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn wrongly_typed_record_is_a_malformed_snapshot() {
    let (cluster, mut mirror, _) = common::connected(1).await;
    let id = semilattice_admin::EntityUuid::new();
    cluster.update(|s| s["datacenters"][id.to_string()] = json!({ "name": 5 }));

    let err = mirror.sync(Duration::from_secs(1)).await.unwrap_err();

    assert!(matches!(err, AdminError::Model(ModelError::MalformedSnapshot { .. })));
}

// ── Verification ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn out_of_band_change_is_an_integrity_violation() {
    let (cluster, mut mirror, _) = common::connected(2).await;
    let dc = mirror.create_datacenter(Some("east")).await.unwrap();
    cluster.update(|s| s["datacenters"][dc.id.to_string()]["name"] = json!("west"));

    let err = mirror.sync(Duration::from_secs(5)).await.unwrap_err();

    match err {
        AdminError::IntegrityViolation {
            kind,
            id,
            local,
            remote,
        } => {
            assert_eq!(kind, EntityKind::Datacenter);
            assert_eq!(id, dc.id);
            assert_eq!(local["name"], json!("east"));
            assert_eq!(remote["name"], json!("west"));
        }
        other => panic!("expected integrity violation, got {other:?}"),
    }
    assert_eq!(mirror.phase(), SyncPhase::Failed);
}

#[tokio::test(start_paused = true)]
async fn conflict_is_registered_once() {
    let (cluster, mut mirror, observer) = common::connected(2).await;
    let dc = mirror.create_datacenter(Some("east")).await.unwrap();
    cluster.inject_conflict(
        EntityKind::Datacenter,
        dc.id,
        "name",
        vec![(json!("node-a"), json!("east")), (json!("node-b"), json!("west"))],
    );

    let first = mirror.sync(Duration::from_secs(5)).await.unwrap();
    let second = mirror.sync(Duration::from_secs(5)).await.unwrap();

    assert_eq!(first.new_conflicts, 1);
    assert_eq!(second.new_conflicts, 0);
    assert_eq!(mirror.conflicts().len(), 1);

    let conflict = &mirror.conflicts()[0];
    assert_eq!(conflict.key(), &ConflictKey::new(EntityKind::Datacenter, dc.id, "name"));
    assert_eq!(
        conflict.values().cloned().collect::<Vec<_>>(),
        vec![json!("east"), json!("west")]
    );
    assert_eq!(
        observer.count(|e| matches!(e, MirrorEvent::ConflictDetected { .. })),
        1
    );
    assert_eq!(
        observer.count(|e| matches!(e, MirrorEvent::ConflictPending { .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn conflicted_field_does_not_mask_other_changes() {
    let (cluster, mut mirror, _) = common::connected(1).await;
    let node0 = cluster.machine_id(0).unwrap();
    let dc = mirror.create_datacenter(Some("east")).await.unwrap();
    cluster.inject_conflict(
        EntityKind::Server,
        node0,
        "datacenter_uuid",
        vec![(json!("a"), json!(dc.id)), (json!("b"), json!(null))],
    );
    mirror.sync(Duration::from_secs(1)).await.unwrap();

    cluster.update(|s| s["machines"][node0.to_string()]["name"] = json!("renamed"));
    let err = mirror.sync(Duration::from_secs(1)).await.unwrap_err();

    assert!(matches!(
        err,
        AdminError::IntegrityViolation {
            kind: EntityKind::Server,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn new_entity_with_conflicted_name_is_merged_and_registered() {
    let (cluster, mut mirror, _) = common::connected(1).await;
    let id = semilattice_admin::EntityUuid::new();
    cluster.update(|s| s["datacenters"][id.to_string()] = json!({ "name": "east" }));
    cluster.inject_conflict(
        EntityKind::Datacenter,
        id,
        "name",
        vec![(json!("a"), json!("east")), (json!("b"), json!("west"))],
    );

    let report = mirror.sync(Duration::from_secs(1)).await.unwrap();

    assert_eq!(report.merged, 1);
    assert_eq!(report.new_conflicts, 1);
    assert_eq!(mirror.datacenters()[&id].name, VALUE_IN_CONFLICT);
}

#[tokio::test(start_paused = true)]
async fn bootstrap_with_a_contested_server_datacenter() {
    let cluster = Arc::new(SimulatedCluster::new(2));
    let node0 = cluster.machine_id(0).unwrap();
    let dc = semilattice_admin::EntityUuid::new();
    cluster.update(|s| s["datacenters"][dc.to_string()] = json!({ "name": "east" }));
    cluster.inject_conflict(
        EntityKind::Server,
        node0,
        "datacenter_uuid",
        vec![(json!("a"), json!(dc)), (json!("b"), json!(null))],
    );
    let mut mirror = common::mirror(&cluster);

    let report = mirror.bootstrap().await.unwrap();

    assert_eq!(report.new_conflicts, 1);
    assert_eq!(mirror.phase(), SyncPhase::Done);
    assert_eq!(mirror.servers()[&node0].datacenter_uuid, None);
    let key = ConflictKey::new(EntityKind::Server, node0, "datacenter_uuid");
    assert_eq!(mirror.conflicts()[0].key(), &key);

    mirror.resolve_conflict(&key, &json!(dc)).await.unwrap();

    assert!(mirror.conflicts().is_empty());
    assert_eq!(mirror.servers()[&node0].datacenter_uuid, Some(dc));
}

#[tokio::test(start_paused = true)]
async fn new_table_with_contested_typed_fields_is_merged() {
    let (cluster, mut mirror, _) = common::connected(2).await;
    let id = semilattice_admin::EntityUuid::new();
    let dc = mirror.create_datacenter(Some("east")).await.unwrap();
    cluster.update(|s| {
        s["rdb_namespaces"][id.to_string()] = json!({
            "name": "orders",
            "database": null,
            "primary_uuid": dc.id,
            "replica_affinities": {},
            "ack_expectations": {},
            "primary_pinnings": {},
            "secondary_pinnings": {},
            "primary_key": "id",
            "shards": ["[\"\",null]"],
            "blueprint": { "peers_roles": {} }
        });
    });
    for field in ["primary_uuid", "shards", "replica_affinities"] {
        cluster.inject_conflict(
            EntityKind::Table,
            id,
            field,
            vec![(json!("a"), json!(1)), (json!("b"), json!(2))],
        );
    }

    let report = mirror.sync(Duration::from_secs(1)).await.unwrap();

    assert_eq!(report.merged, 1);
    assert_eq!(report.new_conflicts, 3);
    let table = &mirror.tables()[&id];
    assert_eq!(table.primary_uuid, None);
    assert!(table.splits().is_empty());
    assert!(table.replica_affinities.is_empty());

    let again = mirror.sync(Duration::from_secs(1)).await.unwrap();
    assert_eq!(again.new_conflicts, 0);
}

#[tokio::test(start_paused = true)]
async fn unreadable_candidate_list_fails_the_cycle() {
    let (cluster, mut mirror, _) = common::connected(1).await;
    let dc = mirror.create_datacenter(Some("east")).await.unwrap();
    cluster.update(|s| s["datacenters"][dc.id.to_string()]["name"] = json!(VALUE_IN_CONFLICT));

    let err = mirror.sync(Duration::from_secs(1)).await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert!(mirror.conflicts().is_empty());
}
