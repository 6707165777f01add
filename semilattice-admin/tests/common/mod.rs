#![allow(dead_code)]

use semilattice_admin::transport::mock::SimulatedCluster;
use semilattice_admin::{ClusterMirror, MirrorConfig, RecordingObserver};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Routes `tracing` output to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A mirror over `cluster` that has not synced yet.
pub fn mirror(cluster: &Arc<SimulatedCluster>) -> ClusterMirror {
    mirror_with(cluster, MirrorConfig::default())
}

pub fn mirror_with(cluster: &Arc<SimulatedCluster>, config: MirrorConfig) -> ClusterMirror {
    init_tracing();
    ClusterMirror::new(cluster.nodes(), cluster.clone(), config)
        .unwrap()
        .with_seed(7)
}

/// A cluster of `nodes` nodes and a bootstrapped mirror with an event recorder.
pub async fn connected(nodes: usize) -> (Arc<SimulatedCluster>, ClusterMirror, Arc<RecordingObserver>) {
    let cluster = Arc::new(SimulatedCluster::new(nodes));
    let mut mirror = mirror(&cluster);
    let observer = Arc::new(RecordingObserver::new());
    mirror.set_observer(observer.clone());
    mirror.bootstrap().await.unwrap();
    (cluster, mirror, observer)
}
