//! Checking a table's blueprint against what the cluster directory reports.

use crate::error::{AdminError, AdminResult};
use crate::events::MirrorEvent;
use crate::mirror::ClusterMirror;
use crate::resolver::EntityRef;
use crate::routes;
use crate::transport::NodeRequest;
use semilattice_model::{Blueprint, ShardRole, Table};
use semilattice_types::EntityUuid;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Returns true if the activity a peer reports for a range fulfils `role`.
fn activity_fulfils(role: ShardRole, activity: &Value) -> bool {
    let kind = activity.get("type").and_then(Value::as_str);
    match role {
        ShardRole::Primary => {
            kind == Some("primary") && activity.get("replier_present") == Some(&Value::Bool(true))
        }
        ShardRole::Secondary => kind == Some("secondary_up_to_date"),
        ShardRole::Nothing => kind == Some("nothing"),
    }
}

/// Returns true if every peer in `blueprint` reports an activity matching
/// its role on every range it is assigned.
///
/// `directory` is the per-peer directory map. A missing peer, a missing
/// reactor entry for the table, or an unknown role tag means the blueprint
/// is not (yet) satisfied.
pub fn blueprint_satisfied(blueprint: &Blueprint, table: EntityUuid, directory: &Value) -> bool {
    let table = table.to_string();
    blueprint.peers_roles.iter().all(|(peer, shards)| {
        let Some(activities) = directory
            .get(peer)
            .and_then(|d| d.get("rdb_namespaces"))
            .and_then(|n| n.get("reactor_bcards"))
            .and_then(|r| r.get(&table))
            .and_then(|bcard| bcard.get("activity_map"))
            .and_then(Value::as_object)
        else {
            return false;
        };
        shards.iter().all(|(range, role)| {
            let Some(role) = ShardRole::parse(role) else {
                return false;
            };
            activities
                .values()
                .any(|entry| match entry.as_array().map(Vec::as_slice) {
                    Some([act_range, info]) => {
                        act_range.as_str() == Some(range.as_str()) && activity_fulfils(role, info)
                    }
                    _ => false,
                })
        })
    })
}

impl ClusterMirror {
    /// Fetches the table's current blueprint and the directory, and checks
    /// whether the blueprint is satisfied.
    pub async fn is_blueprint_satisfied(&mut self, table: impl Into<EntityRef>) -> AdminResult<bool> {
        let id = self.resolve_id::<Table>(table)?;
        let directory = self.query(NodeRequest::get(routes::DIRECTORY_ALL)).await?;
        let blueprint: Blueprint =
            serde_json::from_value(self.query(NodeRequest::get(routes::blueprint(id))).await?)?;
        Ok(blueprint_satisfied(&blueprint, id, &directory))
    }

    /// Polls until the table's blueprint is satisfied and returns how long
    /// that took.
    ///
    /// Uses the configured blueprint timeout when `timeout` is `None`. On
    /// timeout the error carries the `/ajax` and `/ajax/progress` contents.
    pub async fn wait_until_blueprint_satisfied(
        &mut self,
        table: impl Into<EntityRef>,
        timeout: Option<Duration>,
    ) -> AdminResult<Duration> {
        let id = self.resolve_id::<Table>(table)?;
        let timeout = timeout.unwrap_or_else(|| self.config.blueprint_timeout());
        let interval = self.config.retry_interval();
        let start = Instant::now();

        while !self.is_blueprint_satisfied(id).await? {
            tokio::time::sleep(interval).await;
            if start.elapsed() > timeout {
                let ajax = self.cluster_state().await?;
                let progress = self.progress().await?;
                return Err(AdminError::BlueprintTimeout {
                    table: id,
                    timeout_secs: timeout.as_secs(),
                    ajax: Box::new(ajax),
                    progress: Box::new(progress),
                });
            }
            debug!("Blueprint of table {} not satisfied yet", id);
        }

        let elapsed = start.elapsed();
        info!("Blueprint satisfied after {} seconds", elapsed.as_secs());
        self.emit(MirrorEvent::BlueprintSatisfied {
            table: id,
            elapsed,
        });
        Ok(elapsed)
    }
}
