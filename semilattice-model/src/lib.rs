//! Entity model for the semilattice admin client.
//!
//! Defines the typed view of a cluster snapshot:
//! - [`Server`], [`Datacenter`], [`Database`] and [`Table`]: the entities
//!   the cluster reports, each implementing [`ClusterEntity`]
//! - [`Blueprint`]: the server-owned per-shard role assignment of a table
//! - [`shards`]: the codec between split points and the wire's interval
//!   records
//!
//! Every entity parses from one snapshot record, checks itself against a
//! fresh record, and serializes back to the same wire shape, so that
//! `from_snapshot(id, e.to_wire()).matches(e.to_wire())` always holds.

mod blueprint;
mod entity;
mod error;
pub mod shards;

pub use blueprint::{Blueprint, ShardRole};
pub use entity::{AckExpectation, ClusterEntity, Database, Datacenter, Server, Table};
pub use error::{ModelError, ModelResult};
pub use shards::ShardInterval;
