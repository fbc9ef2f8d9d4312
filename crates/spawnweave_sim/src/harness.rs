//! Simulation harness: wires nodes over a `SimNetwork` and runs a root job.
//!
//! The first node is the master. It spawns the root job and never crashes;
//! every other node runs a worker loop that steals from its peers. When the
//! root job is done the master sends `Exit` over the network and the workers
//! stop on their own.

use crate::failure::{CrashInjector, FailureSchedule};
use crate::network::{NetworkCondition, SimNetwork};
use crate::seed::SimSeed;
use serde::{Deserialize, Serialize};
use spawnweave_cluster::{
    JobHandler, JobOutcome, MemberState, Membership, MembershipEvent, Node, NodeConfig,
    NodeError, NodeStats, StealStrategy,
};
use spawnweave_core::{ClusterName, NodeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long the master waits for exit acknowledgements
const EXIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Harness errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    /// No node specs were given
    #[error("Simulation needs at least one node")]
    NoNodes,

    /// Two specs share a name
    #[error("Duplicate node name: {0}")]
    DuplicateNode(String),

    /// No node with this name
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// The master spawns the root job and cannot be crashed
    #[error("Cannot crash the master node: {0}")]
    CannotCrashMaster(String),

    /// `run` was already called on this cluster
    #[error("Simulation already ran")]
    AlreadyRun,

    /// Root job did not finish in time
    #[error("Root job timed out after {0}ms")]
    Timeout(u64),

    /// Node error
    #[error("Node error: {0}")]
    Node(#[from] NodeError),
}

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Seed for reproducibility
    pub seed: SimSeed,
    /// Latency inside a cluster
    pub intra: NetworkCondition,
    /// Latency between clusters
    pub inter: NetworkCondition,
    /// Victim selection strategy for every node
    pub strategy: StealStrategy,
    /// First steal backoff delay
    pub initial_backoff_ms: u64,
    /// Backoff cap
    pub max_backoff_ms: u64,
    /// Wait for a steal reply before giving up on it
    pub steal_reply_timeout_ms: u64,
    /// Limit on the whole run
    pub run_timeout_ms: u64,
}

impl SimConfig {
    /// Create a new simulation config
    #[must_use]
    pub fn new(seed: SimSeed) -> Self {
        Self {
            seed,
            intra: NetworkCondition::Normal,
            inter: NetworkCondition::Normal,
            strategy: StealStrategy::default(),
            initial_backoff_ms: 1,
            max_backoff_ms: 64,
            steal_reply_timeout_ms: 500,
            run_timeout_ms: 60_000,
        }
    }

    /// Set link conditions
    #[must_use]
    pub fn with_network(mut self, intra: NetworkCondition, inter: NetworkCondition) -> Self {
        self.intra = intra;
        self.inter = inter;
        self
    }

    /// Set victim selection strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: StealStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set steal backoff bounds
    #[must_use]
    pub fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.initial_backoff_ms = initial_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    /// Set run timeout
    #[must_use]
    pub fn with_run_timeout(mut self, timeout_ms: u64) -> Self {
        self.run_timeout_ms = timeout_ms;
        self
    }

    fn node_config(&self, spec: &SimNodeSpec) -> NodeConfig {
        NodeConfig::new(NodeId::from_name(&spec.name), ClusterName::new(&spec.cluster))
            .with_strategy(self.strategy)
            .with_backoff(self.initial_backoff_ms, self.max_backoff_ms)
            .with_steal_reply_timeout(self.steal_reply_timeout_ms)
            .with_rng_seed(self.seed.derive(&spec.name).value())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(SimSeed::default())
    }
}

/// Name and cluster of one simulated node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimNodeSpec {
    /// Node name, also the source of its ID
    pub name: String,
    /// Cluster name
    pub cluster: String,
}

impl SimNodeSpec {
    /// Create a spec
    #[must_use]
    pub fn new(name: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
        }
    }

    /// `nodes` nodes dealt round-robin over `clusters` clusters
    #[must_use]
    pub fn uniform(nodes: usize, clusters: usize) -> Vec<Self> {
        let clusters = clusters.max(1);
        (0..nodes)
            .map(|i| Self::new(format!("node-{i}"), format!("cluster-{}", i % clusters)))
            .collect()
    }
}

/// Result of one simulated run
#[derive(Debug, Clone, PartialEq)]
pub struct SimRun {
    /// Outcome of the root job
    pub outcome: JobOutcome,
    /// Wall time of the run
    pub elapsed: Duration,
    /// Per-node statistics, in spec order
    pub stats: Vec<(String, NodeStats)>,
    /// Sum over all nodes
    pub total: NodeStats,
    /// Nodes crashed during the run
    pub crashed: Vec<String>,
    /// Workers that acknowledged the master's exit request
    pub exited: Vec<String>,
}

struct SimMember {
    name: String,
    node: Node,
}

/// A simulated cluster of nodes
pub struct SimCluster {
    config: SimConfig,
    network: Arc<SimNetwork>,
    membership: Membership,
    members: Vec<SimMember>,
    workers: Mutex<HashMap<NodeId, JoinHandle<()>>>,
    crashed: Mutex<Vec<String>>,
    ran: AtomicBool,
}

impl SimCluster {
    /// Create nodes for `specs`, all running `handler`, and connect every pair
    ///
    /// # Errors
    ///
    /// Returns `SimError::NoNodes`, `SimError::DuplicateNode`, or
    /// `SimError::Node` if a node configuration is invalid
    pub async fn new(
        config: SimConfig,
        specs: &[SimNodeSpec],
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self, SimError> {
        if specs.is_empty() {
            return Err(SimError::NoNodes);
        }
        let mut names = HashSet::new();
        for spec in specs {
            if !names.insert(spec.name.as_str()) {
                return Err(SimError::DuplicateNode(spec.name.clone()));
            }
        }

        let network = Arc::new(SimNetwork::new(
            &config.seed,
            config.intra.clone(),
            config.inter.clone(),
            Arc::new(CrashInjector::new()),
        ));
        let membership = Membership::new();
        let mut members = Vec::with_capacity(specs.len());
        for spec in specs {
            let node = Node::new(config.node_config(spec), Arc::clone(&handler))?;
            network.register(node.clone()).await;
            membership
                .join(node.node_id(), node.cluster().clone())
                .await;
            members.push(SimMember {
                name: spec.name.clone(),
                node,
            });
        }

        for member in &members {
            for peer in &members {
                if member.node.node_id() == peer.node.node_id() {
                    continue;
                }
                let Some(channel) = network
                    .channel(member.node.node_id(), peer.node.node_id())
                    .await
                else {
                    continue;
                };
                member
                    .node
                    .on_membership(MembershipEvent::Joined {
                        node_id: peer.node.node_id(),
                        cluster: peer.node.cluster().clone(),
                        channel,
                    })
                    .await;
            }
        }
        info!(target: "spawnweave::comm", nodes = members.len(), seed = config.seed.value(), "simulated cluster wired");

        Ok(Self {
            config,
            network,
            membership,
            members,
            workers: Mutex::new(HashMap::new()),
            crashed: Mutex::new(Vec::new()),
            ran: AtomicBool::new(false),
        })
    }

    /// Master node, the one that runs the root job
    #[must_use]
    pub fn master(&self) -> &Node {
        &self.members[0].node
    }

    /// Look up a node by name
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.members
            .iter()
            .find(|m| m.name == name)
            .map(|m| &m.node)
    }

    /// All nodes with their names
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.members.iter().map(|m| (m.name.as_str(), &m.node))
    }

    /// Membership view of the cluster
    #[must_use]
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Network the nodes talk over
    #[must_use]
    pub fn network(&self) -> &Arc<SimNetwork> {
        &self.network
    }

    /// Crash a node: stop its worker, cut its links, and notify the survivors.
    /// Returns false if it was already down.
    ///
    /// # Errors
    ///
    /// Returns `SimError::UnknownNode` or `SimError::CannotCrashMaster`
    pub async fn crash(&self, name: &str) -> Result<bool, SimError> {
        let node = self
            .node(name)
            .ok_or_else(|| SimError::UnknownNode(name.to_string()))?;
        if node.node_id() == self.master().node_id() {
            return Err(SimError::CannotCrashMaster(name.to_string()));
        }
        let node_id = node.node_id();
        if !self.network.injector().crash(node_id).await {
            return Ok(false);
        }
        if let Some(worker) = self.workers.lock().await.remove(&node_id) {
            worker.abort();
        }
        node.shutdown();
        self.membership
            .update_state(node_id, MemberState::Crashed)
            .await;
        self.crashed.lock().await.push(name.to_string());
        info!(target: "spawnweave::ft", node = %node_id, name, "node crashed");

        for member in &self.members {
            if member.node.node_id() == node_id
                || self.network.injector().is_crashed(member.node.node_id()).await
            {
                continue;
            }
            member
                .node
                .on_membership(MembershipEvent::Crashed { node_id })
                .await;
        }
        Ok(true)
    }

    /// Start workers, run the root job on the master, and apply `schedule`
    /// while it runs. A cluster can run once.
    ///
    /// # Errors
    ///
    /// Returns `SimError::AlreadyRun`, `SimError::UnknownNode` or
    /// `SimError::CannotCrashMaster` for a bad schedule, `SimError::Timeout`,
    /// or `SimError::Node` if the master fails
    pub async fn run(&self, args: Vec<u8>, schedule: &FailureSchedule) -> Result<SimRun, SimError> {
        for crash in schedule.crashes() {
            let node = self
                .node(&crash.node)
                .ok_or_else(|| SimError::UnknownNode(crash.node.clone()))?;
            if node.node_id() == self.master().node_id() {
                return Err(SimError::CannotCrashMaster(crash.node.clone()));
            }
        }
        if self.ran.swap(true, Ordering::SeqCst) {
            return Err(SimError::AlreadyRun);
        }

        {
            let mut workers = self.workers.lock().await;
            for member in self.members.iter().skip(1) {
                let node = member.node.clone();
                workers.insert(
                    node.node_id(),
                    tokio::spawn(async move { node.run_worker().await }),
                );
            }
        }

        let start = Instant::now();
        let limit = Duration::from_millis(self.config.run_timeout_ms);
        let root = self.master().run_root(args);
        let failures = self.inject(schedule, start);
        tokio::pin!(root, failures);
        let mut failures_done = schedule.is_empty();

        let result = tokio::time::timeout(limit, async {
            loop {
                tokio::select! {
                    outcome = &mut root => break outcome,
                    () = &mut failures, if !failures_done => failures_done = true,
                }
            }
        })
        .await;
        let elapsed = start.elapsed();

        let exited = self.stop().await;
        let outcome = result.map_err(|_| SimError::Timeout(self.config.run_timeout_ms))??;

        let mut stats = Vec::with_capacity(self.members.len());
        for member in &self.members {
            stats.push((member.name.clone(), member.node.stats().await));
        }
        let total = NodeStats::total(stats.iter().map(|(_, s)| s));
        let crashed = self.crashed.lock().await.clone();
        info!(
            target: "spawnweave::steal",
            elapsed_ms = elapsed.as_millis() as u64,
            steals = total.steal_successes,
            crashed = crashed.len(),
            "simulation finished"
        );

        Ok(SimRun {
            outcome,
            elapsed,
            stats,
            total,
            crashed,
            exited,
        })
    }

    async fn inject(&self, schedule: &FailureSchedule, start: Instant) {
        for planned in schedule.crashes() {
            tokio::time::sleep_until(start + planned.after()).await;
            if let Err(err) = self.crash(&planned.node).await {
                warn!(target: "spawnweave::ft", node = %planned.node, error = %err, "scheduled crash skipped");
            }
        }
        debug!(target: "spawnweave::ft", "failure schedule exhausted");
    }

    /// Stop every node through the master's exit request, join the workers
    /// and drain the network. Returns the names of the workers that
    /// acknowledged.
    async fn stop(&self) -> Vec<String> {
        let report = self.master().exit(EXIT_TIMEOUT).await;
        for node_id in &report.missing {
            warn!(target: "spawnweave::comm", node = %node_id, "no exit acknowledgement, stopping directly");
            if let Some(member) = self.members.iter().find(|m| m.node.node_id() == *node_id) {
                member.node.shutdown();
            }
        }
        let workers: Vec<_> = self.workers.lock().await.drain().collect();
        for (node_id, worker) in workers {
            if let Err(err) = worker.await {
                debug!(target: "spawnweave::steal", node = %node_id, error = %err, "worker ended abnormally");
            }
        }
        if !self.network.settle(Duration::from_secs(1)).await {
            warn!(target: "spawnweave::comm", in_flight = self.network.in_flight(), "network did not settle");
        }
        self.network.close().await;

        self.members
            .iter()
            .filter(|m| report.acknowledged.iter().any(|(id, _)| *id == m.node.node_id()))
            .map(|m| m.name.clone())
            .collect()
    }
}

impl std::fmt::Debug for SimCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimCluster")
            .field("nodes", &self.members.len())
            .field("config", &self.config)
            .finish()
    }
}
