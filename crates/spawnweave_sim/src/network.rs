//! In-process network for simulated clusters.
//!
//! Every ordered pair of nodes gets its own link: a queue drained by one task,
//! so messages on a link arrive in send order. Messages are encoded on send and
//! decoded on delivery, so byte counts match a real wire. A message is lost if
//! either end has crashed by the time it is delivered.

use crate::failure::CrashInjector;
use crate::seed::SimSeed;
use async_trait::async_trait;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use spawnweave_cluster::{Message, MessageChannel, Node, TransportError};
use spawnweave_core::{NodeId, decode, encode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Delay model for one class of links
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkCondition {
    /// Delivered as soon as the link task runs
    #[default]
    Normal,
    /// Fixed latency (milliseconds)
    Latency(u64),
    /// Uniform latency between `min_ms` and `max_ms`
    Jitter {
        /// Lower bound (milliseconds)
        min_ms: u64,
        /// Upper bound (milliseconds)
        max_ms: u64,
    },
}

impl NetworkCondition {
    /// Get latency for one message
    #[must_use]
    pub fn latency(&self, rng: &mut ChaCha8Rng) -> Duration {
        let ms = match self {
            NetworkCondition::Normal => 0,
            NetworkCondition::Latency(ms) => *ms,
            NetworkCondition::Jitter { min_ms, max_ms } if min_ms <= max_ms => {
                rng.gen_range(*min_ms..=*max_ms)
            }
            NetworkCondition::Jitter { min_ms, .. } => *min_ms,
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Default)]
struct LinkCounters {
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl LinkCounters {
    fn in_flight(&self) -> u64 {
        let done = self.delivered.load(Ordering::SeqCst) + self.dropped.load(Ordering::SeqCst);
        self.sent.load(Ordering::SeqCst).saturating_sub(done)
    }
}

/// Simulated network connecting registered nodes
pub struct SimNetwork {
    /// Latency inside a cluster
    intra: NetworkCondition,
    /// Latency between clusters
    inter: NetworkCondition,
    nodes: RwLock<HashMap<NodeId, Node>>,
    injector: Arc<CrashInjector>,
    rng: Arc<std::sync::Mutex<ChaCha8Rng>>,
    links: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<LinkCounters>,
}

impl SimNetwork {
    /// Create a network with separate intra- and inter-cluster conditions
    #[must_use]
    pub fn new(
        seed: &SimSeed,
        intra: NetworkCondition,
        inter: NetworkCondition,
        injector: Arc<CrashInjector>,
    ) -> Self {
        Self {
            intra,
            inter,
            nodes: RwLock::new(HashMap::new()),
            injector,
            rng: Arc::new(std::sync::Mutex::new(seed.derive("network").into_rng())),
            links: Mutex::new(Vec::new()),
            counters: Arc::new(LinkCounters::default()),
        }
    }

    /// Crash injector consulted on every send and delivery
    #[must_use]
    pub fn injector(&self) -> &Arc<CrashInjector> {
        &self.injector
    }

    /// Register a node so links can be opened to it
    pub async fn register(&self, node: Node) {
        self.nodes.write().await.insert(node.node_id(), node);
    }

    /// Open the link `from -> to`. Returns `None` unless both ends are registered.
    pub async fn channel(&self, from: NodeId, to: NodeId) -> Option<Arc<SimChannel>> {
        let (target, condition) = {
            let nodes = self.nodes.read().await;
            let source = nodes.get(&from)?;
            let target = nodes.get(&to)?.clone();
            let condition = if source.cluster() == target.cluster() {
                self.intra.clone()
            } else {
                self.inter.clone()
            };
            (target, condition)
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(
            from,
            target,
            rx,
            Arc::clone(&self.injector),
            Arc::clone(&self.counters),
        ));
        self.links.lock().await.push(task);

        Some(Arc::new(SimChannel {
            from,
            to,
            condition,
            tx,
            injector: Arc::clone(&self.injector),
            rng: Arc::clone(&self.rng),
            counters: Arc::clone(&self.counters),
        }))
    }

    /// Messages accepted by a link and not yet delivered or dropped
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.counters.in_flight()
    }

    /// Messages handed to their target node
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::SeqCst)
    }

    /// Messages lost to crashes or decode failures
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::SeqCst)
    }

    /// Wait until every link is drained or `limit` elapses.
    /// Returns true if the network went quiet.
    pub async fn settle(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        true
    }

    /// Stop all link tasks
    pub async fn close(&self) {
        for task in self.links.lock().await.drain(..) {
            task.abort();
        }
        self.nodes.write().await.clear();
    }
}

impl std::fmt::Debug for SimNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimNetwork")
            .field("intra", &self.intra)
            .field("inter", &self.inter)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

async fn run_link(
    from: NodeId,
    target: Node,
    mut rx: mpsc::UnboundedReceiver<(Instant, Vec<u8>)>,
    injector: Arc<CrashInjector>,
    counters: Arc<LinkCounters>,
) {
    let to = target.node_id();
    while let Some((deliver_at, bytes)) = rx.recv().await {
        tokio::time::sleep_until(deliver_at).await;
        if injector.is_crashed(from).await || injector.is_crashed(to).await {
            trace!(target: "spawnweave::comm", from = %from, to = %to, "message lost to crash");
            counters.dropped.fetch_add(1, Ordering::SeqCst);
            continue;
        }
        match decode::<Message>(&bytes) {
            Ok(message) => {
                target.deliver(from, message).await;
                counters.delivered.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                warn!(target: "spawnweave::comm", from = %from, to = %to, error = %err, "undecodable message dropped");
                counters.dropped.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
    debug!(target: "spawnweave::comm", from = %from, to = %to, "link closed");
}

/// One direction of a simulated link
pub struct SimChannel {
    from: NodeId,
    to: NodeId,
    condition: NetworkCondition,
    tx: mpsc::UnboundedSender<(Instant, Vec<u8>)>,
    injector: Arc<CrashInjector>,
    rng: Arc<std::sync::Mutex<ChaCha8Rng>>,
    counters: Arc<LinkCounters>,
}

impl SimChannel {
    /// Sending node
    #[must_use]
    pub fn source(&self) -> NodeId {
        self.from
    }
}

#[async_trait]
impl MessageChannel for SimChannel {
    fn target(&self) -> NodeId {
        self.to
    }

    async fn send(&self, message: &Message) -> Result<u64, TransportError> {
        if self.injector.is_crashed(self.to).await {
            return Err(TransportError::NodeUnavailable(self.to));
        }
        let bytes = encode(message).map_err(|e| TransportError::Encoding(e.to_string()))?;
        let len = bytes.len() as u64;
        let delay = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.condition.latency(&mut rng)
        };
        self.counters.sent.fetch_add(1, Ordering::SeqCst);
        if self.tx.send((Instant::now() + delay, bytes)).is_err() {
            self.counters.sent.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::ConnectionFailed(format!(
                "link {} -> {} closed",
                self.from, self.to
            )));
        }
        Ok(len)
    }
}

impl std::fmt::Debug for SimChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimChannel")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("condition", &self.condition)
            .finish()
    }
}
