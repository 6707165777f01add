//! Client-side mirror and admin operations for a cluster's semilattice API.
//!
//! A [`ClusterMirror`] keeps a local copy of the servers, datacenters,
//! databases and tables a cluster reports, and keeps it honest: after every
//! change it polls all nodes, waits for them to agree, and checks its copy
//! against theirs.
//!
//! # Architecture
//!
//! - **Transport**: [`NodeTransport`] sends one request to one node;
//!   [`HttpTransport`] over HTTP, [`transport::mock::SimulatedCluster`]
//!   in-process
//! - **Mirror**: the sync cycle (poll, compare, merge, verify) and the
//!   entity collections
//! - **Conflicts**: fields the cluster reports as in conflict, kept in a
//!   [`ConflictRegistry`] until resolved
//! - **Operations**: create, delete, rename, move, reshard, replication
//!   settings and conflict resolution
//! - **Diagnostics**: issues, logs, directory, progress, stats and blueprint
//!   satisfaction
//!
//! ## Sync cycle
//!
//! 1. **Polling**: fetch every node's snapshot, in parallel
//! 2. **Comparing**: drop each node's identity marker and require equality,
//!    retrying at a fixed interval within a budget
//! 3. **Merging**: add entities seen for the first time, drop tombstoned ones
//! 4. **Verifying**: check every entity against the agreed snapshot,
//!    registering value conflicts
//!
//! # Example
//!
//! ```no_run
//! use semilattice_admin::{ClusterMirror, HttpTransport, MirrorConfig, NodeAddress, TableOptions};
//! use std::sync::Arc;
//!
//! # async fn run() -> semilattice_admin::AdminResult<()> {
//! let config = MirrorConfig::default();
//! let transport = Arc::new(HttpTransport::from_config(&config)?);
//! let nodes = vec![NodeAddress::new("localhost", 8080)];
//!
//! let mut mirror = ClusterMirror::connect(nodes, transport, config).await?;
//! let database = mirror.create_database(Some("test_1")).await?;
//! let table = mirror
//!     .create_table(TableOptions::named("orders").in_database(&database))
//!     .await?;
//! mirror.add_table_shard(&table, "m").await?;
//! # Ok(())
//! # }
//! ```

mod admin;
mod blueprint;
mod config;
mod conflict;
mod diagnostics;
mod error;
pub mod events;
mod mirror;
pub mod resolver;
pub mod routes;
mod snapshot;
pub mod transport;

pub use admin::TableOptions;
pub use blueprint::blueprint_satisfied;
pub use config::MirrorConfig;
pub use conflict::{
    is_conflict_marker, Candidate, Conflict, ConflictKey, ConflictRegistry, VALUE_IN_CONFLICT,
};
pub use diagnostics::{Issue, DEFAULT_LOG_LENGTH};
pub use error::{AdminError, AdminResult};
pub use events::{MirrorEvent, MirrorObserver, RecordingObserver};
pub use mirror::{ClusterMirror, MirroredEntity, SyncPhase, SyncReport};
pub use resolver::{EntityHandle, EntityRef};
pub use snapshot::{strip_identity, ClusterSnapshot, IDENTITY_FIELD};
pub use transport::{HttpTransport, Method, NodeRequest, NodeResponse, NodeTransport};

pub use semilattice_model::{
    AckExpectation, Blueprint, ClusterEntity, Database, Datacenter, ModelError, Server,
    ShardInterval, ShardRole, Table,
};
pub use semilattice_types::{EntityKind, EntityUuid, NodeAddress};
