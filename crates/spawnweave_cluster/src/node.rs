//! One participant in a distributed divide-and-conquer computation.
//!
//! A node has one owner context, the task that calls `run_root` or
//! `run_worker`. It executes jobs inline, popping local work depth-first and
//! stealing when it runs dry. Inbound messages arrive on other tasks through
//! the `on_*` upcalls. Both sides mutate `SchedState` under a single lock,
//! held only for the critical section and never across a send or an await on
//! application code. Upcalls wake the owner context through a `Notify`.

use crate::abort::AbortDecision;
use crate::balancer::Step;
use crate::channel::MessageChannel;
use crate::config::NodeConfig;
use crate::context::{JobContext, JobHandler};
use crate::fault::CrashReport;
use crate::membership::MembershipEvent;
use crate::protocol::Message;
use crate::record::{InvocationRecord, JobOutcome, JobState};
use crate::state::{Envelope, SchedState};
use crate::stats::NodeStats;
use crate::tuple::{Tuple, TupleHandler, TupleValue};
use crate::victim::Victim;
use futures::future::{BoxFuture, FutureExt, join_all};
use spawnweave_core::{ClusterName, CoreError, NodeId, Stamp};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, trace, warn};

/// Node errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// Stamp was never spawned here or was already synced
    #[error("Unknown job: {0}")]
    UnknownJob(Stamp),

    /// `sync_next` called with nothing to wait for
    #[error("No pending jobs to wait for")]
    NothingPending,

    /// Node is shutting down
    #[error("Node shutting down")]
    ShuttingDown,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] CoreError),
}

/// Outcome of `Node::exit`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitReport {
    /// Peers that acknowledged, with the counters they reported
    pub acknowledged: Vec<(NodeId, NodeStats)>,
    /// Live peers that did not answer in time
    pub missing: Vec<NodeId>,
}

struct NodeInner {
    config: NodeConfig,
    state: Mutex<SchedState>,
    wake: Notify,
    handler: Arc<dyn JobHandler>,
    shutdown: AtomicBool,
}

/// A node. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a node running `handler` for every job
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Config` if the configuration is invalid
    pub fn new(config: NodeConfig, handler: Arc<dyn JobHandler>) -> Result<Self, NodeError> {
        config.validate()?;
        let state = SchedState::new(&config);
        Ok(Self {
            inner: Arc::new(NodeInner {
                config,
                state: Mutex::new(state),
                wake: Notify::new(),
                handler,
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Node ID
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.inner.config.node_id
    }

    /// Cluster this node belongs to
    #[must_use]
    pub fn cluster(&self) -> &ClusterName {
        &self.inner.config.cluster
    }

    /// Node configuration
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Add a peer to the victim table. Returns false if it was already known.
    pub async fn add_victim(
        &self,
        node_id: NodeId,
        cluster: ClusterName,
        channel: Arc<dyn MessageChannel>,
    ) -> bool {
        if node_id == self.node_id() {
            return false;
        }
        let added = {
            let mut state = self.inner.state.lock().await;
            state.victims.add(Victim::new(node_id, cluster.clone(), channel))
        };
        debug!(target: "spawnweave::comm", node = %self.node_id(), peer = %node_id, cluster = %cluster, "victim added");
        self.inner.wake.notify_one();
        added
    }

    /// Register a tuple handler under `name`
    pub async fn register_tuple_handler(&self, name: &str, handler: Arc<dyn TupleHandler>) {
        self.inner.state.lock().await.tuples.register(name, handler);
    }

    /// Hand an inbound message to the matching upcall
    pub async fn deliver(&self, from: NodeId, message: Message) {
        {
            let mut state = self.inner.state.lock().await;
            if state.victims.is_dead(from) {
                state.stats.stale_messages += 1;
                debug!(target: "spawnweave::comm", from = %from, kind = message.kind(), "message from dead node dropped");
                return;
            }
        }
        trace!(target: "spawnweave::comm", node = %self.node_id(), from = %from, kind = message.kind(), "received");
        match message {
            Message::StealRequest => self.on_steal_request(from).await,
            Message::StealReply { job } => self.on_steal_reply(from, job).await,
            Message::JobResult { stamp, outcome } => self.on_result(from, stamp, outcome).await,
            Message::Abort { stamp } => self.on_abort(from, stamp).await,
            Message::TupleAdd { key, tuple } => self.on_tuple_update(&key, tuple).await,
            Message::TupleRemove { key } => self.on_tuple_remove(&key).await,
            Message::Exit => self.on_exit(from).await,
            Message::ExitReply { stats } => self.on_exit_reply(from, stats).await,
        }
    }

    /// A peer asks for work
    pub async fn on_steal_request(&self, from: NodeId) {
        let reply = self.inner.state.lock().await.serve_steal(from);
        self.dispatch(reply.into_iter().collect()).await;
    }

    /// A peer answered our steal request
    pub async fn on_steal_reply(&self, from: NodeId, job: Option<InvocationRecord>) {
        self.inner
            .state
            .lock()
            .await
            .accept_steal_reply(from, job, Instant::now());
        self.inner.wake.notify_one();
    }

    /// A job was shipped to us outside a steal reply
    pub async fn on_job_transfer(&self, from: NodeId, record: InvocationRecord) {
        let accepted = self.inner.state.lock().await.accept_job(from, record);
        if accepted {
            self.inner.wake.notify_one();
        }
    }

    /// A thief returned the result of one of our jobs
    pub async fn on_result(&self, from: NodeId, stamp: Stamp, outcome: JobOutcome) {
        let installed = self.inner.state.lock().await.accept_result(from, &stamp, outcome);
        if installed {
            self.inner.wake.notify_one();
        }
    }

    /// A peer aborted a sub-tree
    pub async fn on_abort(&self, from: NodeId, stamp: Stamp) {
        let out = {
            let mut state = self.inner.state.lock().await;
            state.stats.aborts_received += 1;
            state.apply_abort(&stamp).1
        };
        debug!(target: "spawnweave::abort", node = %self.node_id(), from = %from, stamp = %stamp, forwards = out.len(), "abort received");
        self.dispatch(out).await;
        self.inner.wake.notify_one();
    }

    /// A tuple update arrived
    pub async fn on_tuple_update(&self, key: &str, tuple: Tuple) {
        self.inner.state.lock().await.apply_tuple(key, &tuple);
    }

    /// A tuple removal arrived
    pub async fn on_tuple_remove(&self, key: &str) {
        let mut state = self.inner.state.lock().await;
        state.tuples.remove(key);
        state.stats.tuple_updates += 1;
    }

    /// The master finished the root job: acknowledge and stop
    pub async fn on_exit(&self, from: NodeId) {
        let reply = {
            let state = self.inner.state.lock().await;
            let stats = state.stats.clone();
            state.envelope(from, Message::ExitReply { stats })
        };
        info!(target: "spawnweave::comm", node = %self.node_id(), from = %from, "exit requested");
        self.shutdown();
        self.dispatch(reply.into_iter().collect()).await;
    }

    /// A peer acknowledged our exit request
    pub async fn on_exit_reply(&self, from: NodeId, stats: NodeStats) {
        {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            match state.exit_replies.as_mut() {
                Some(replies) => {
                    replies.insert(from, stats);
                }
                None => {
                    debug!(target: "spawnweave::comm", from = %from, "exit reply while not exiting dropped");
                    state.stats.stale_messages += 1;
                    return;
                }
            }
        }
        self.inner.wake.notify_one();
    }

    /// A peer joined
    pub async fn on_member_joined(
        &self,
        node_id: NodeId,
        cluster: ClusterName,
        channel: Arc<dyn MessageChannel>,
    ) {
        self.add_victim(node_id, cluster, channel).await;
    }

    /// A peer crashed or left; its stolen work is re-queued here
    pub async fn on_member_crashed(&self, node_id: NodeId) -> CrashReport {
        let report = self.inner.state.lock().await.handle_crash(node_id);
        self.inner.wake.notify_one();
        report
    }

    /// Apply a membership event
    pub async fn on_membership(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::Joined {
                node_id,
                cluster,
                channel,
            } => self.on_member_joined(node_id, cluster, channel).await,
            MembershipEvent::Left { node_id } | MembershipEvent::Crashed { node_id } => {
                self.on_member_crashed(node_id).await;
            }
        }
    }

    /// Spawn a job under `parent`
    pub(crate) async fn spawn(&self, parent: Option<&Stamp>, args: Vec<u8>) -> Stamp {
        self.inner.state.lock().await.spawn(parent, args)
    }

    /// Wait for all `children`, executing or stealing other work meanwhile
    pub(crate) async fn sync(&self, children: &[Stamp]) -> Result<Vec<JobOutcome>, NodeError> {
        loop {
            {
                let mut state = self.inner.state.lock().await;
                let mut ready = true;
                for stamp in children {
                    match state.registry.lookup(stamp) {
                        None => return Err(NodeError::UnknownJob(stamp.clone())),
                        Some(record) if !record.is_terminal() => {
                            ready = false;
                            break;
                        }
                        Some(_) => {}
                    }
                }
                if ready {
                    return Ok(children
                        .iter()
                        .filter_map(|stamp| state.registry.remove(stamp))
                        .filter_map(|record| record.outcome())
                        .collect());
                }
            }
            if self.is_shut_down() {
                return Err(NodeError::ShuttingDown);
            }
            self.step().await;
        }
    }

    /// Wait for the first of `pending` to finish and take it out of the list
    pub(crate) async fn sync_next(
        &self,
        pending: &mut Vec<Stamp>,
    ) -> Result<(Stamp, JobOutcome), NodeError> {
        if pending.is_empty() {
            return Err(NodeError::NothingPending);
        }
        loop {
            {
                let mut state = self.inner.state.lock().await;
                let found = pending
                    .iter()
                    .enumerate()
                    .find_map(|(index, stamp)| match state.registry.lookup(stamp) {
                        None => Some(Err(NodeError::UnknownJob(stamp.clone()))),
                        Some(record) if record.is_terminal() => Some(Ok(index)),
                        Some(_) => None,
                    });
                if let Some(found) = found {
                    let stamp = pending.remove(found?);
                    let outcome = state
                        .registry
                        .remove(&stamp)
                        .and_then(|record| record.outcome())
                        .unwrap_or(JobOutcome::Aborted);
                    return Ok((stamp, outcome));
                }
            }
            if self.is_shut_down() {
                return Err(NodeError::ShuttingDown);
            }
            self.step().await;
        }
    }

    /// Abort the sub-tree rooted at `stamp`
    pub async fn abort(&self, stamp: &Stamp) -> AbortDecision {
        let (decision, out) = self.inner.state.lock().await.apply_abort(stamp);
        debug!(target: "spawnweave::abort", node = %self.node_id(), stamp = %stamp, ?decision, "abort issued");
        self.dispatch(out).await;
        decision
    }

    /// True if `stamp` was aborted on this node
    pub async fn is_aborted(&self, stamp: &Stamp) -> bool {
        let state = self.inner.state.lock().await;
        state.aborts.covers(stamp)
            || state
                .registry
                .lookup(stamp)
                .is_some_and(|r| r.state == JobState::Aborted)
    }

    /// Apply a tuple locally and broadcast it to all live victims
    pub async fn add_tuple(&self, key: &str, tuple: Tuple) {
        let out = self.inner.state.lock().await.publish_tuple(key, tuple);
        self.dispatch(out).await;
    }

    /// Remove a tuple locally and broadcast the removal
    pub async fn remove_tuple(&self, key: &str) {
        let out = self.inner.state.lock().await.withdraw_tuple(key);
        self.dispatch(out).await;
    }

    /// Read a tuple from the local copy
    pub async fn tuple(&self, key: &str) -> Option<TupleValue> {
        self.inner.state.lock().await.tuples.get(key).cloned()
    }

    /// Spawn a root job and run until it completes
    ///
    /// # Errors
    ///
    /// Returns `NodeError::ShuttingDown` if the node is shut down first
    pub async fn run_root(&self, args: Vec<u8>) -> Result<JobOutcome, NodeError> {
        let root = self.spawn(None, args).await;
        info!(target: "spawnweave::spawn", node = %self.node_id(), stamp = %root, "root job spawned");
        let mut outcomes = self.sync(std::slice::from_ref(&root)).await?;
        let outcome = outcomes.pop().ok_or(NodeError::UnknownJob(root))?;
        info!(target: "spawnweave::spawn", node = %self.node_id(), "root job finished");
        Ok(outcome)
    }

    /// Tell every live peer the computation is over, wait up to `timeout`
    /// for their acknowledgements, then shut this node down.
    ///
    /// Peers that crash meanwhile are no longer waited for.
    pub async fn exit(&self, timeout: Duration) -> ExitReport {
        let out = {
            let mut state = self.inner.state.lock().await;
            state.exit_replies = Some(HashMap::new());
            let peers: Vec<NodeId> = state.victims.live().map(|v| v.node_id).collect();
            peers
                .into_iter()
                .filter_map(|peer| state.envelope(peer, Message::Exit))
                .collect::<Vec<_>>()
        };
        info!(target: "spawnweave::comm", node = %self.node_id(), peers = out.len(), "exit broadcast");
        self.dispatch(out).await;

        let deadline = Instant::now() + timeout;
        let report = loop {
            {
                let mut state = self.inner.state.lock().await;
                let replied = state.exit_replies.as_ref().map(HashMap::len).unwrap_or(0);
                let missing: Vec<NodeId> = state
                    .victims
                    .live()
                    .map(|v| v.node_id)
                    .filter(|id| {
                        !state
                            .exit_replies
                            .as_ref()
                            .is_some_and(|replies| replies.contains_key(id))
                    })
                    .collect();
                if missing.is_empty() || Instant::now() >= deadline {
                    trace!(target: "spawnweave::comm", replied, missing = missing.len(), "exit wait over");
                    let mut acknowledged: Vec<(NodeId, NodeStats)> = state
                        .exit_replies
                        .take()
                        .unwrap_or_default()
                        .into_iter()
                        .collect();
                    acknowledged.sort_by_key(|(id, _)| *id);
                    break ExitReport {
                        acknowledged,
                        missing,
                    };
                }
            }
            self.wait(deadline.saturating_duration_since(Instant::now()))
                .await;
        };
        if !report.missing.is_empty() {
            warn!(target: "spawnweave::comm", node = %self.node_id(), missing = report.missing.len(), "peers did not acknowledge exit");
        }
        self.shutdown();
        report
    }

    /// Execute and steal work until `shutdown` is called
    pub async fn run_worker(&self) {
        info!(target: "spawnweave::steal", node = %self.node_id(), cluster = %self.cluster(), "worker started");
        while !self.is_shut_down() {
            self.step().await;
        }
        info!(target: "spawnweave::steal", node = %self.node_id(), "worker stopped");
    }

    /// Stop the owner context at its next scheduling point
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();
    }

    /// True once `shutdown` was called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Snapshot of this node's counters
    pub async fn stats(&self) -> NodeStats {
        self.inner.state.lock().await.stats.clone()
    }

    /// Number of records in the job registry
    pub async fn tracked_jobs(&self) -> usize {
        self.inner.state.lock().await.registry.len()
    }

    /// One scheduling action of the owner context
    fn step(&self) -> BoxFuture<'_, ()> {
        async move {
            let step = self.inner.state.lock().await.next_step(Instant::now());
            match step {
                Step::Run(stamp) => self.execute(stamp).await,
                Step::Steal(envelope) => {
                    self.dispatch(vec![envelope]).await;
                    self.wait(self.inner.config.steal_reply_timeout()).await;
                }
                Step::StealWideArea(envelope) => self.dispatch(vec![envelope]).await,
                Step::Wait(delay) => self.wait(delay).await,
                Step::Idle => {
                    self.wait(Duration::from_millis(self.inner.config.max_backoff_ms))
                        .await;
                }
            }
        }
        .boxed()
    }

    /// Run one job that is already marked running
    fn execute(&self, stamp: Stamp) -> BoxFuture<'_, ()> {
        async move {
            let args = {
                let state = self.inner.state.lock().await;
                if state.aborts.covers(&stamp) {
                    None
                } else {
                    state.registry.lookup(&stamp).map(|r| r.args.clone())
                }
            };
            let outcome = match args {
                Some(args) => {
                    trace!(target: "spawnweave::spawn", node = %self.node_id(), stamp = %stamp, "executing");
                    let ctx = JobContext::new(self.clone(), stamp.clone());
                    self.inner.handler.run(&ctx, args).await
                }
                None => JobOutcome::Aborted,
            };
            let out = self.inner.state.lock().await.finish_job(&stamp, outcome);
            self.dispatch(out).await;
        }
        .boxed()
    }

    async fn wait(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.inner.wake.notified()).await;
    }

    /// Send messages concurrently, then account them
    async fn dispatch(&self, envelopes: Vec<Envelope>) {
        if envelopes.is_empty() {
            return;
        }
        let results = join_all(envelopes.iter().map(|e| e.channel.send(&e.message))).await;

        let mut state = self.inner.state.lock().await;
        for (envelope, result) in envelopes.iter().zip(results) {
            match result {
                Ok(bytes) => {
                    state.stats.record_message(envelope.locality, bytes);
                    if matches!(envelope.message, Message::Abort { .. }) {
                        state.stats.aborts_sent += 1;
                    }
                }
                Err(err) => {
                    warn!(
                        target: "spawnweave::comm",
                        node = %self.node_id(),
                        target_node = %envelope.target,
                        kind = envelope.message.kind(),
                        error = %err,
                        "send failed"
                    );
                    if matches!(envelope.message, Message::StealRequest) {
                        state.steal_send_failed(envelope.target);
                        self.inner.wake.notify_one();
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.node_id())
            .field("cluster", self.cluster())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::RecordingChannel;
    use crate::tuple::TupleStore;
    use async_trait::async_trait;
    use spawnweave_core::{StampAllocator, decode, encode};

    struct Fib;

    #[async_trait]
    impl JobHandler for Fib {
        async fn run(&self, ctx: &JobContext, args: Vec<u8>) -> JobOutcome {
            let Ok(n) = decode::<u64>(&args) else {
                return JobOutcome::Failed("bad args".into());
            };
            if n < 2 {
                return JobOutcome::Value(encode(&n).unwrap_or_default());
            }
            let left = ctx.spawn(encode(&(n - 1)).unwrap_or_default()).await;
            let right = ctx.spawn(encode(&(n - 2)).unwrap_or_default()).await;
            let Ok(outcomes) = ctx.sync(&[left, right]).await else {
                return JobOutcome::Failed("sync failed".into());
            };
            let mut sum = 0u64;
            for outcome in outcomes {
                match outcome.value().map(|bytes| decode::<u64>(bytes)) {
                    Some(Ok(v)) => sum += v,
                    _ => return JobOutcome::Failed("child failed".into()),
                }
            }
            JobOutcome::Value(encode(&sum).unwrap_or_default())
        }
    }

    struct Failing;

    #[async_trait]
    impl JobHandler for Failing {
        async fn run(&self, _ctx: &JobContext, _args: Vec<u8>) -> JobOutcome {
            JobOutcome::Failed("boom".into())
        }
    }

    /// Keeps the longest text seen
    struct Longest;

    impl TupleHandler for Longest {
        fn apply(&self, key: &str, value: &TupleValue, store: &mut TupleStore) -> bool {
            let TupleValue::Text(incoming) = value else {
                return false;
            };
            let longer = match store.get(key) {
                Some(TupleValue::Text(current)) => incoming.len() > current.len(),
                _ => true,
            };
            if longer {
                store.insert(key, value.clone());
            }
            longer
        }
    }

    fn node(name: &str, handler: Arc<dyn JobHandler>) -> Node {
        let config = NodeConfig::new(NodeId::from_name(name), ClusterName::from("x"));
        Node::new(config, handler).unwrap()
    }

    #[tokio::test]
    async fn test_local_fib() {
        let node = node("a", Arc::new(Fib));
        let outcome = node.run_root(encode(&15u64).unwrap()).await.unwrap();
        let value: u64 = decode(outcome.value().unwrap()).unwrap();
        assert_eq!(value, 610);

        let stats = node.stats().await;
        assert_eq!(stats.jobs_spawned, stats.jobs_executed);
        assert_eq!(stats.steal_attempts, 0);
        assert_eq!(node.tracked_jobs().await, 0);
    }

    #[tokio::test]
    async fn test_failure_is_returned_to_spawner() {
        let node = node("a", Arc::new(Failing));
        let outcome = node.run_root(vec![]).await.unwrap();
        assert_eq!(outcome, JobOutcome::Failed("boom".into()));
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let config = NodeConfig::default().with_backoff(0, 1);
        assert!(matches!(
            Node::new(config, Arc::new(Failing)),
            Err(NodeError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_serves_steal_requests() {
        let victim = node("a", Arc::new(Fib));
        let thief = NodeId::from_name("b");
        let channel = Arc::new(RecordingChannel::new(thief));
        victim.add_victim(thief, ClusterName::from("x"), channel.clone()).await;
        let stamp = victim.spawn(None, encode(&3u64).unwrap()).await;

        victim.deliver(thief, Message::StealRequest).await;
        let sent = channel.take();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Message::StealReply { job: Some(record) } => assert_eq!(record.stamp, stamp),
            other => panic!("unexpected {:?}", other),
        }
        let stats = victim.stats().await;
        assert_eq!(stats.intra_cluster_messages, 1);
        assert_eq!(stats.intra_cluster_bytes, sent[0].encoded_len());
        assert_eq!(stats.inter_cluster_bytes, 0);

        victim
            .deliver(thief, Message::JobResult { stamp: stamp.clone(), outcome: JobOutcome::Value(encode(&2u64).unwrap()) })
            .await;
        let outcomes = victim.sync(&[stamp]).await.unwrap();
        assert_eq!(outcomes, vec![JobOutcome::Value(encode(&2u64).unwrap())]);
    }

    #[tokio::test]
    async fn test_messages_from_dead_nodes_dropped() {
        let victim = node("a", Arc::new(Fib));
        let thief = NodeId::from_name("b");
        let channel = Arc::new(RecordingChannel::new(thief));
        victim.add_victim(thief, ClusterName::from("y"), channel.clone()).await;
        victim.spawn(None, vec![]).await;

        let report = victim.on_member_crashed(thief).await;
        assert!(report.newly_dead);
        victim.deliver(thief, Message::StealRequest).await;
        assert!(channel.take().is_empty());
        assert_eq!(victim.stats().await.stale_messages, 1);
    }

    #[tokio::test]
    async fn test_abort_forwarded_to_stealer() {
        let owner = node("a", Arc::new(Fib));
        let thief = NodeId::from_name("b");
        let channel = Arc::new(RecordingChannel::new(thief));
        owner.add_victim(thief, ClusterName::from("y"), channel.clone()).await;
        let stamp = owner.spawn(None, vec![]).await;
        owner.on_steal_request(thief).await;
        channel.take();

        let decision = owner.abort(&stamp).await;
        assert!(matches!(decision, AbortDecision::Applied { .. }));
        assert_eq!(channel.take(), vec![Message::Abort { stamp: stamp.clone() }]);
        let stats = owner.stats().await;
        assert_eq!(stats.aborts_sent, 1);
        assert!(stats.inter_cluster_bytes > 0);
        assert!(owner.is_aborted(&stamp).await);

        owner
            .on_result(thief, stamp.clone(), JobOutcome::Value(vec![1]))
            .await;
        assert_eq!(owner.sync(&[stamp]).await.unwrap(), vec![JobOutcome::Aborted]);
    }

    #[tokio::test]
    async fn test_failed_send_is_not_fatal() {
        let owner = node("a", Arc::new(Fib));
        let peer = NodeId::from_name("b");
        let channel = Arc::new(RecordingChannel::new(peer));
        channel.fail();
        owner.add_victim(peer, ClusterName::from("x"), channel).await;
        owner
            .add_tuple("bound", Tuple::Passive(TupleValue::Int(3)))
            .await;
        assert_eq!(owner.tuple("bound").await, Some(TupleValue::Int(3)));
        assert_eq!(owner.stats().await.intra_cluster_messages, 0);
    }

    #[tokio::test]
    async fn test_sync_unknown_stamp() {
        let owner = node("a", Arc::new(Fib));
        let stamp = owner.spawn(None, encode(&1u64).unwrap()).await;
        owner.sync(std::slice::from_ref(&stamp)).await.unwrap();
        assert_eq!(
            owner.sync(std::slice::from_ref(&stamp)).await,
            Err(NodeError::UnknownJob(stamp))
        );
        assert_eq!(owner.sync_next(&mut Vec::new()).await, Err(NodeError::NothingPending));
    }

    #[tokio::test]
    async fn test_membership_events() {
        let owner = node("a", Arc::new(Fib));
        let peer = NodeId::from_name("b");
        owner
            .on_membership(MembershipEvent::Joined {
                node_id: peer,
                cluster: ClusterName::from("x"),
                channel: Arc::new(RecordingChannel::new(peer)),
            })
            .await;
        assert!(owner.inner.state.lock().await.victims.is_alive(peer));
        owner.on_membership(MembershipEvent::Left { node_id: peer }).await;
        assert!(owner.inner.state.lock().await.victims.is_dead(peer));
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let worker = node("a", Arc::new(Fib));
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run_worker().await }
        });
        worker.shutdown();
        handle.await.unwrap();
        assert!(worker.is_shut_down());
    }

    #[tokio::test]
    async fn test_custom_tuple_handler_between_nodes() {
        let a = node("a", Arc::new(Fib));
        let b = node("b", Arc::new(Fib));
        for n in [&a, &b] {
            n.register_tuple_handler("longest", Arc::new(Longest)).await;
        }
        let to_b = Arc::new(RecordingChannel::new(b.node_id()));
        a.add_victim(b.node_id(), ClusterName::from("x"), to_b.clone()).await;
        let longest = |text: &str| Tuple::Active {
            handler: "longest".into(),
            value: TupleValue::Text(text.into()),
        };

        b.add_tuple("name", longest("spawnweave")).await;
        a.add_tuple("name", longest("weave")).await;
        for message in to_b.take() {
            b.deliver(a.node_id(), message).await;
        }
        assert_eq!(a.tuple("name").await, Some(TupleValue::Text("weave".into())));
        assert_eq!(b.tuple("name").await, Some(TupleValue::Text("spawnweave".into())));

        a.add_tuple("name", longest("spawnweaves")).await;
        for message in to_b.take() {
            b.deliver(a.node_id(), message).await;
        }
        assert_eq!(b.tuple("name").await, Some(TupleValue::Text("spawnweaves".into())));
    }

    #[tokio::test]
    async fn test_job_transfer_runs_and_returns_result() {
        let thief = node("b", Arc::new(Fib));
        let owner = NodeId::from_name("a");
        let channel = Arc::new(RecordingChannel::new(owner));
        thief.add_victim(owner, ClusterName::from("x"), channel.clone()).await;
        let stamp = StampAllocator::new(owner).next(None);
        let record = InvocationRecord::new(stamp.clone(), owner, encode(&10u64).unwrap())
            .for_transfer(thief.node_id());

        thief.on_job_transfer(owner, record.clone()).await;
        thief.on_job_transfer(owner, record).await;
        let worker = tokio::spawn({
            let thief = thief.clone();
            async move { thief.run_worker().await }
        });

        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let sent = channel.take();
                if let Some(message) = sent
                    .into_iter()
                    .find(|m| matches!(m, Message::JobResult { .. }))
                {
                    break message;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(
            result,
            Message::JobResult {
                stamp,
                outcome: JobOutcome::Value(encode(&55u64).unwrap()),
            }
        );
        let stats = thief.stats().await;
        assert_eq!(stats.steal_successes, 1);
        assert_eq!(stats.stale_messages, 1);
        assert_eq!(stats.results_sent, 1);

        thief.shutdown();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_stops_worker_and_acknowledges() {
        let worker = node("b", Arc::new(Fib));
        let master = NodeId::from_name("a");
        let channel = Arc::new(RecordingChannel::new(master));
        worker.add_victim(master, ClusterName::from("x"), channel.clone()).await;
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run_worker().await }
        });

        worker.deliver(master, Message::Exit).await;
        handle.await.unwrap();
        assert!(worker.is_shut_down());
        let replies = channel
            .take()
            .into_iter()
            .filter(|m| matches!(m, Message::ExitReply { .. }))
            .count();
        assert_eq!(replies, 1);
    }

    #[tokio::test]
    async fn test_exit_waits_for_live_peers() {
        let master = node("a", Arc::new(Fib));
        let b = NodeId::from_name("b");
        let c = NodeId::from_name("c");
        let to_b = Arc::new(RecordingChannel::new(b));
        let to_c = Arc::new(RecordingChannel::new(c));
        master.add_victim(b, ClusterName::from("x"), to_b.clone()).await;
        master.add_victim(c, ClusterName::from("y"), to_c.clone()).await;

        let stray = NodeStats::default();
        master.deliver(b, Message::ExitReply { stats: stray }).await;
        assert_eq!(master.stats().await.stale_messages, 1);

        let exiting = tokio::spawn({
            let master = master.clone();
            async move { master.exit(Duration::from_secs(5)).await }
        });
        while master.inner.state.lock().await.exit_replies.is_none() {
            tokio::task::yield_now().await;
        }
        let stats = NodeStats {
            jobs_executed: 4,
            ..NodeStats::default()
        };
        master.deliver(b, Message::ExitReply { stats: stats.clone() }).await;
        master.on_member_crashed(c).await;

        let report = exiting.await.unwrap();
        assert_eq!(report.acknowledged, vec![(b, stats)]);
        assert!(report.missing.is_empty());
        assert!(master.is_shut_down());
        assert_eq!(to_b.take(), vec![Message::Exit]);
        assert_eq!(to_c.take(), vec![Message::Exit]);
    }

    #[tokio::test]
    async fn test_exit_gives_up_on_silent_peer() {
        let master = node("a", Arc::new(Fib));
        let b = NodeId::from_name("b");
        master
            .add_victim(b, ClusterName::from("x"), Arc::new(RecordingChannel::new(b)))
            .await;
        let report = master.exit(Duration::from_millis(20)).await;
        assert!(report.acknowledged.is_empty());
        assert_eq!(report.missing, vec![b]);
    }
}
