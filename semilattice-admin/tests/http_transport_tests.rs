mod common;

use pretty_assertions::assert_eq;
use semilattice_admin::{
    AdminError, ClusterMirror, EntityKind, EntityUuid, HttpTransport, MirrorConfig, NodeAddress,
    NodeRequest, NodeResponse, NodeTransport, SyncPhase,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn address(server: &MockServer) -> NodeAddress {
    let addr = server.address();
    NodeAddress::new(addr.ip().to_string(), addr.port())
}

fn fast_config() -> MirrorConfig {
    MirrorConfig {
        retry_interval_ms: 10,
        bootstrap_timeout_secs: 1,
        mutation_timeout_secs: 1,
        request_timeout_secs: 5,
        ..MirrorConfig::default()
    }
}

fn transport() -> Arc<HttpTransport> {
    Arc::new(HttpTransport::new(Duration::from_secs(5)).unwrap())
}

fn cluster_snapshot(server: EntityUuid, datacenter: EntityUuid) -> Value {
    json!({
        "machines": { (server.to_string()): { "name": "alpha", "datacenter_uuid": datacenter } },
        "datacenters": { (datacenter.to_string()): { "name": "east" } },
        "databases": {},
        "rdb_namespaces": {}
    })
}

async fn serve_snapshot(server: &MockServer, snapshot: &Value) {
    let mut body = snapshot.clone();
    body["me"] = json!(EntityUuid::new());
    Mock::given(method("GET"))
        .and(path("/ajax/semilattice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

// ── HttpTransport ───────────────────────────────────────────────

#[tokio::test]
async fn send_returns_status_reason_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ajax/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let response = transport()
        .send(&address(&server), NodeRequest::get("/ajax/issues"))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.reason, "OK");
    assert_eq!(response.body, "[]");
}

#[tokio::test]
async fn non_success_status_is_surfaced_verbatim() {
    let server = MockServer::start().await;

    let response = transport()
        .send(&address(&server), NodeRequest::get("/ajax/unknown"))
        .await
        .unwrap();

    assert!(!response.is_success());
    assert!(matches!(
        response.into_body(),
        Err(AdminError::RemoteError { status: 404, ref reason }) if reason == "Not Found"
    ));
}

#[tokio::test]
async fn post_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ajax/semilattice/datacenters/new"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({ "name": "east" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let request = NodeRequest::post(
        semilattice_admin::routes::create(EntityKind::Datacenter),
        &json!({ "name": "east" }),
    );
    let response = transport().send(&address(&server), request).await.unwrap();

    assert!(response.is_success());
}

#[tokio::test]
async fn delete_method_is_used() {
    let server = MockServer::start().await;
    let id = EntityUuid::new();
    Mock::given(method("DELETE"))
        .and(path(format!("/ajax/semilattice/machines/{id}")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let request = NodeRequest::delete(semilattice_admin::routes::entity(EntityKind::Server, id));
    transport().send(&address(&server), request).await.unwrap();
}

#[tokio::test]
async fn connection_failure_is_a_transport_error() {
    let unused = NodeAddress::new("127.0.0.1", 9);
    let err = transport()
        .send(&unused, NodeRequest::get("/ajax"))
        .await
        .unwrap_err();
    assert!(matches!(err, AdminError::Transport(ref msg) if msg.starts_with("127.0.0.1:9")));
}

#[test]
fn node_response_helpers() {
    assert!(NodeResponse::ok("{}").is_success());
    let err = NodeResponse::error(503, "Service Unavailable").into_body().unwrap_err();
    assert!(err.is_remote());
    assert_eq!(err.status(), Some(503));
}

// ── Mirror over HTTP ────────────────────────────────────────────

#[tokio::test]
async fn two_nodes_with_identical_snapshots_agree() {
    common::init_tracing();
    let (a, b) = (MockServer::start().await, MockServer::start().await);
    let snapshot = cluster_snapshot(EntityUuid::new(), EntityUuid::new());
    serve_snapshot(&a, &snapshot).await;
    serve_snapshot(&b, &snapshot).await;

    let mirror = ClusterMirror::connect(vec![address(&a), address(&b)], transport(), fast_config())
        .await
        .unwrap();

    assert_eq!(mirror.phase(), SyncPhase::Done);
    assert!(mirror.conflicts().is_empty());
    assert_eq!(mirror.entity_count(), 2);
    assert_eq!(mirror.server("alpha").unwrap().datacenter_uuid, Some(mirror.datacenter("east").unwrap().id));
}

#[tokio::test]
async fn nodes_that_disagree_over_http_diverge() {
    let (a, b) = (MockServer::start().await, MockServer::start().await);
    let dc = EntityUuid::new();
    serve_snapshot(&a, &cluster_snapshot(EntityUuid::new(), dc)).await;
    serve_snapshot(&b, &cluster_snapshot(EntityUuid::new(), dc)).await;

    let config = MirrorConfig {
        bootstrap_timeout_secs: 0,
        ..fast_config()
    };
    let result = ClusterMirror::connect(vec![address(&a), address(&b)], transport(), config).await;

    assert!(matches!(result, Err(AdminError::ClusterDivergence { attempts: 1, .. })));
}

#[tokio::test]
async fn conflict_candidates_are_fetched_from_a_node() {
    let server = MockServer::start().await;
    let dc = EntityUuid::new();
    let mut snapshot = cluster_snapshot(EntityUuid::new(), dc);
    snapshot["datacenters"][dc.to_string()]["name"] = json!(semilattice_admin::VALUE_IN_CONFLICT);
    serve_snapshot(&server, &snapshot).await;
    Mock::given(method("GET"))
        .and(path(format!("/ajax/semilattice/datacenters/{dc}/name/resolve")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([["a", "east"], ["b", "west"]])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mirror = ClusterMirror::connect(vec![address(&server)], transport(), fast_config())
        .await
        .unwrap();

    assert_eq!(mirror.conflicts().len(), 1);
    assert_eq!(mirror.conflicts()[0].field(), "name");
}

#[tokio::test]
async fn remote_error_from_a_query_keeps_status() {
    let server = MockServer::start().await;
    serve_snapshot(&server, &cluster_snapshot(EntityUuid::new(), EntityUuid::new())).await;
    Mock::given(method("GET"))
        .and(path("/ajax/stat"))
        .and(query_param("machine_whitelist", "x"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut mirror = ClusterMirror::connect(vec![address(&server)], transport(), fast_config())
        .await
        .unwrap();
    let err = mirror.stat("machine_whitelist=x").await.unwrap_err();

    assert!(matches!(
        err,
        AdminError::RemoteError { status: 500, ref reason } if reason == "Internal Server Error"
    ));
}
