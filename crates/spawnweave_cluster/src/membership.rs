//! Cluster membership.
//!
//! The membership service tells every node who joined, left or crashed, and
//! which cluster each member sits in. `Membership` is a small tracker of that
//! view; `MembershipEvent` is what a node consumes.

use crate::channel::MessageChannel;
use serde::{Deserialize, Serialize};
use spawnweave_core::{ClusterName, NodeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Member state in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberState {
    /// Member is active
    Active,
    /// Member left voluntarily
    Left,
    /// Member crashed
    Crashed,
}

/// Cluster member information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member node ID
    pub node_id: NodeId,
    /// Locality group
    pub cluster: ClusterName,
    /// Member state
    pub state: MemberState,
    /// Order of joining; the first member is the master
    pub rank: usize,
}

impl Member {
    /// Check if member is active
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, MemberState::Active)
    }
}

/// Membership change delivered to a node
#[derive(Clone)]
pub enum MembershipEvent {
    /// A peer joined; `channel` reaches it
    Joined {
        /// Peer node ID
        node_id: NodeId,
        /// Peer cluster
        cluster: ClusterName,
        /// Outbound channel to the peer
        channel: Arc<dyn MessageChannel>,
    },
    /// A peer left voluntarily
    Left {
        /// Peer node ID
        node_id: NodeId,
    },
    /// A peer crashed
    Crashed {
        /// Peer node ID
        node_id: NodeId,
    },
}

impl MembershipEvent {
    /// Node the event is about
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::Joined { node_id, .. } | Self::Left { node_id } | Self::Crashed { node_id } => {
                *node_id
            }
        }
    }
}

impl std::fmt::Debug for MembershipEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Joined { node_id, cluster, .. } => f
                .debug_struct("Joined")
                .field("node_id", node_id)
                .field("cluster", cluster)
                .finish(),
            Self::Left { node_id } => f.debug_struct("Left").field("node_id", node_id).finish(),
            Self::Crashed { node_id } => {
                f.debug_struct("Crashed").field("node_id", node_id).finish()
            }
        }
    }
}

/// Membership view
#[derive(Debug, Default)]
pub struct Membership {
    members: Arc<RwLock<HashMap<NodeId, Member>>>,
}

impl Membership {
    /// Create an empty membership view
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a join. Returns false if the node was already a member.
    pub async fn join(&self, node_id: NodeId, cluster: ClusterName) -> bool {
        let mut members = self.members.write().await;
        if members.contains_key(&node_id) {
            return false;
        }
        let rank = members.len();
        members.insert(
            node_id,
            Member {
                node_id,
                cluster,
                state: MemberState::Active,
                rank,
            },
        );
        true
    }

    /// Record a state change. Returns false if the member is unknown or not active.
    pub async fn update_state(&self, node_id: NodeId, state: MemberState) -> bool {
        let mut members = self.members.write().await;
        match members.get_mut(&node_id) {
            Some(member) if member.is_active() => {
                member.state = state;
                true
            }
            _ => false,
        }
    }

    /// Get a member by ID
    pub async fn get_member(&self, node_id: NodeId) -> Option<Member> {
        self.members.read().await.get(&node_id).cloned()
    }

    /// Active members in join order
    pub async fn active_members(&self) -> Vec<Member> {
        let mut active: Vec<Member> = self
            .members
            .read()
            .await
            .values()
            .filter(|m| m.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|m| m.rank);
        active
    }

    /// The master: the earliest-joined member still active
    pub async fn master(&self) -> Option<NodeId> {
        self.active_members().await.first().map(|m| m.node_id)
    }

    /// Number of members ever joined
    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }
}
