//! Victim table: the peers this node may steal from.
//!
//! Each victim is tagged with its cluster so steals can prefer cheap
//! intra-cluster links and traffic can be accounted per locality. Dead
//! victims stay in the table, flagged, so late messages from them can be
//! recognised and dropped.

use crate::channel::MessageChannel;
use crate::config::StealStrategy;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use spawnweave_core::{ClusterName, NodeId};
use std::sync::Arc;

/// Locality of a peer relative to this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locality {
    /// Same cluster
    IntraCluster,
    /// Different cluster, or unknown peer
    InterCluster,
}

/// Handle to one known peer
#[derive(Clone)]
pub struct Victim {
    /// Peer node ID
    pub node_id: NodeId,
    /// Peer cluster
    pub cluster: ClusterName,
    /// Outbound channel
    pub channel: Arc<dyn MessageChannel>,
    /// Cleared on a crash notification
    pub alive: bool,
}

impl Victim {
    /// Create a live victim
    #[must_use]
    pub fn new(node_id: NodeId, cluster: ClusterName, channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            node_id,
            cluster,
            channel,
            alive: true,
        }
    }
}

impl std::fmt::Debug for Victim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Victim")
            .field("node_id", &self.node_id)
            .field("cluster", &self.cluster)
            .field("alive", &self.alive)
            .finish()
    }
}

/// Peers of one node
#[derive(Debug)]
pub struct VictimTable {
    own_cluster: ClusterName,
    victims: Vec<Victim>,
    rng: ChaCha8Rng,
}

impl VictimTable {
    /// Create an empty table for a node in `own_cluster`
    #[must_use]
    pub fn new(own_cluster: ClusterName, seed: u64) -> Self {
        Self {
            own_cluster,
            victims: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Add a victim. A known node is replaced and revived.
    ///
    /// Returns false if the node was already known.
    pub fn add(&mut self, victim: Victim) -> bool {
        match self.victims.iter_mut().find(|v| v.node_id == victim.node_id) {
            Some(existing) => {
                *existing = victim;
                false
            }
            None => {
                self.victims.push(victim);
                true
            }
        }
    }

    /// Mark a victim dead. Returns true only on the first call for a live victim.
    pub fn mark_dead(&mut self, node_id: NodeId) -> bool {
        match self.victims.iter_mut().find(|v| v.node_id == node_id) {
            Some(victim) if victim.alive => {
                victim.alive = false;
                true
            }
            _ => false,
        }
    }

    /// Look up a victim
    #[must_use]
    pub fn get(&self, node_id: NodeId) -> Option<&Victim> {
        self.victims.iter().find(|v| v.node_id == node_id)
    }

    /// True if the node is known and alive
    #[must_use]
    pub fn is_alive(&self, node_id: NodeId) -> bool {
        self.get(node_id).is_some_and(|v| v.alive)
    }

    /// True if the node is known and was marked dead
    #[must_use]
    pub fn is_dead(&self, node_id: NodeId) -> bool {
        self.get(node_id).is_some_and(|v| !v.alive)
    }

    /// Channel to a live victim
    #[must_use]
    pub fn channel(&self, node_id: NodeId) -> Option<Arc<dyn MessageChannel>> {
        self.get(node_id)
            .filter(|v| v.alive)
            .map(|v| Arc::clone(&v.channel))
    }

    /// Live victims
    pub fn live(&self) -> impl Iterator<Item = &Victim> {
        self.victims.iter().filter(|v| v.alive)
    }

    /// Number of live victims
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live().count()
    }

    /// Number of known victims, dead or alive
    #[must_use]
    pub fn len(&self) -> usize {
        self.victims.len()
    }

    /// True if no victim is known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.victims.is_empty()
    }

    /// Locality of a peer
    #[must_use]
    pub fn classify(&self, node_id: NodeId) -> Locality {
        match self.get(node_id) {
            Some(victim) if victim.cluster == self.own_cluster => Locality::IntraCluster,
            _ => Locality::InterCluster,
        }
    }

    /// Choose a steal target, or `None` if no victim is alive
    pub fn select(&mut self, strategy: StealStrategy) -> Option<NodeId> {
        let live: Vec<NodeId> = self.live().map(|v| v.node_id).collect();
        if live.is_empty() {
            return None;
        }
        if let StealStrategy::ClusterAware { local_bias } = strategy {
            let local: Vec<NodeId> = self
                .live()
                .filter(|v| v.cluster == self.own_cluster)
                .map(|v| v.node_id)
                .collect();
            if !local.is_empty() && self.rng.gen_bool(local_bias.clamp(0.0, 1.0)) {
                return local.choose(&mut self.rng).copied();
            }
        }
        live.choose(&mut self.rng).copied()
    }

    /// Choose a live victim in the own cluster
    pub fn select_local(&mut self) -> Option<NodeId> {
        let local: Vec<NodeId> = self
            .live()
            .filter(|v| v.cluster == self.own_cluster)
            .map(|v| v.node_id)
            .collect();
        local.choose(&mut self.rng).copied()
    }
}
