//! Read-only diagnostic queries: issues, logs, directory, progress, stats
//! and shard distribution.

use crate::error::{AdminError, AdminResult};
use crate::mirror::ClusterMirror;
use crate::resolver::EntityRef;
use crate::routes;
use crate::transport::NodeRequest;
use semilattice_model::{Server, Table};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, warn};

/// Default number of log entries requested from a server.
pub const DEFAULT_LOG_LENGTH: usize = 100;

/// One outstanding cluster issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub critical: bool,
    /// Issue-specific fields.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "[{kind}] {}", self.description),
            None => f.write_str(&self.description),
        }
    }
}

impl ClusterMirror {
    /// Outstanding cluster issues.
    pub async fn issues(&mut self) -> AdminResult<Vec<Issue>> {
        let issues = self.query(NodeRequest::get(routes::ISSUES)).await?;
        Ok(serde_json::from_value(issues)?)
    }

    /// Fails with [`AdminError::ClusterHasIssues`] if any issue is outstanding.
    pub async fn check_no_issues(&mut self) -> AdminResult<()> {
        let issues = self.issues().await?;
        if issues.is_empty() {
            return Ok(());
        }
        for issue in &issues {
            warn!("Cluster issue: {}", issue);
        }
        Err(AdminError::ClusterHasIssues(issues))
    }

    /// Last `max_length` log entries of a server.
    ///
    /// A server that cannot produce its log answers with a message string in
    /// place of the entry list; that is reported as a [`AdminError::RemoteError`].
    pub async fn log(
        &mut self,
        server: impl Into<EntityRef>,
        max_length: usize,
    ) -> AdminResult<Vec<Value>> {
        let id = self.resolve_id::<Server>(server)?;
        let mut response = self.query(NodeRequest::get(routes::log(id, max_length))).await?;
        match response.get_mut(id.to_string()).map(Value::take) {
            Some(Value::Array(entries)) => Ok(entries),
            Some(Value::String(message)) => Err(AdminError::RemoteError {
                status: 200,
                reason: message,
            }),
            other => Err(AdminError::RemoteError {
                status: 200,
                reason: format!("unexpected log response for {id}: {}", other.unwrap_or_default()),
            }),
        }
    }

    /// The cluster directory.
    pub async fn directory(&mut self) -> AdminResult<Value> {
        self.query(NodeRequest::get(routes::DIRECTORY)).await
    }

    /// Backfill progress.
    pub async fn progress(&mut self) -> AdminResult<Value> {
        self.query(NodeRequest::get(routes::PROGRESS)).await
    }

    /// Runs a stat query; `query` is the raw query string.
    pub async fn stat(&mut self, query: &str) -> AdminResult<Value> {
        self.query(NodeRequest::get(routes::stat(query))).await
    }

    /// Everything a node reports about itself and the cluster.
    pub async fn cluster_state(&mut self) -> AdminResult<Value> {
        self.query(NodeRequest::get(routes::AJAX)).await
    }

    /// Key distribution of a table.
    pub async fn distribution(
        &mut self,
        table: impl Into<EntityRef>,
        depth: u32,
    ) -> AdminResult<Value> {
        let id = self.resolve_id::<Table>(table)?;
        self.query(NodeRequest::get(routes::distribution(id, depth))).await
    }

    /// Polls the distribution endpoint until the table answers.
    ///
    /// Remote errors are retried at the configured interval until the
    /// table-ready budget runs out; the last one is then returned.
    pub async fn wait_for_table(&mut self, table: impl Into<EntityRef>) -> AdminResult<()> {
        let table = EntityRef::from(self.resolve_id::<Table>(table)?);
        let attempts = self.config.attempts_for(self.config.table_ready_timeout());
        let interval = self.config.retry_interval();

        let mut attempt = 1;
        loop {
            match self.distribution(&table, 1).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_remote() && attempt < attempts => {
                    debug!("Table not ready ({}), retrying", e);
                    attempt += 1;
                    tokio::time::sleep(interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
