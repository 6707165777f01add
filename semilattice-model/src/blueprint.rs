//! Table blueprints: which peer plays which role for each shard range.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The role a peer is assigned for one shard range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardRole {
    Primary,
    Secondary,
    Nothing,
}

impl ShardRole {
    /// Parses the cluster's role tag (`role_primary`, ...).
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "role_primary" => Some(ShardRole::Primary),
            "role_secondary" => Some(ShardRole::Secondary),
            "role_nothing" => Some(ShardRole::Nothing),
            _ => None,
        }
    }

    /// The cluster's role tag.
    pub fn as_tag(self) -> &'static str {
        match self {
            ShardRole::Primary => "role_primary",
            ShardRole::Secondary => "role_secondary",
            ShardRole::Nothing => "role_nothing",
        }
    }
}

/// Per-table role assignment, as reported by the cluster.
///
/// The client never edits blueprints; it keeps the peer and range keys as
/// the opaque strings the server sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    pub peers_roles: BTreeMap<String, BTreeMap<String, String>>,
}

impl Blueprint {
    /// Iterates over `(peer, shard range, role tag)` assignments.
    pub fn assignments(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.peers_roles.iter().flat_map(|(peer, shards)| {
            shards
                .iter()
                .map(move |(range, role)| (peer.as_str(), range.as_str(), role.as_str()))
        })
    }

    /// Returns true if no peer has any assignment.
    pub fn is_empty(&self) -> bool {
        self.peers_roles.values().all(BTreeMap::is_empty)
    }
}
