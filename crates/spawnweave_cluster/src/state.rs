//! Scheduling state of one node.
//!
//! Everything the protocol mutates lives here, behind the node's single
//! scheduling lock. Handlers never send while holding the lock: they return
//! `Envelope`s, which the node sends after unlocking.

use crate::abort::AbortSet;
use crate::balancer::StealState;
use crate::channel::MessageChannel;
use crate::config::{NodeConfig, StealStrategy};
use crate::deque::ReadyDeque;
use crate::protocol::Message;
use crate::record::JobOutcome;
use crate::registry::{Completion, JobRegistry};
use crate::stats::NodeStats;
use crate::tuple::TupleSpace;
use crate::victim::{Locality, VictimTable};
use spawnweave_core::{NodeId, Stamp};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Message addressed to a live peer, resolved under the lock
pub(crate) struct Envelope {
    pub(crate) target: NodeId,
    pub(crate) locality: Locality,
    pub(crate) channel: Arc<dyn MessageChannel>,
    pub(crate) message: Message,
}

pub(crate) struct SchedState {
    pub(crate) node_id: NodeId,
    pub(crate) strategy: StealStrategy,
    pub(crate) registry: JobRegistry,
    pub(crate) deque: ReadyDeque,
    pub(crate) victims: VictimTable,
    pub(crate) aborts: AbortSet,
    pub(crate) tuples: TupleSpace,
    pub(crate) steal: StealState,
    pub(crate) stats: NodeStats,
    /// Exit acknowledgements, collected only while this node is exiting
    pub(crate) exit_replies: Option<HashMap<NodeId, NodeStats>>,
}

impl SchedState {
    pub(crate) fn new(config: &NodeConfig) -> Self {
        Self {
            node_id: config.node_id,
            strategy: config.strategy,
            registry: JobRegistry::new(config.node_id),
            deque: ReadyDeque::new(),
            victims: VictimTable::new(config.cluster.clone(), config.rng_seed),
            aborts: AbortSet::new(config.abort_memory),
            tuples: TupleSpace::new(),
            steal: StealState::new(config),
            stats: NodeStats::default(),
            exit_replies: None,
        }
    }

    /// Address a message to `target`, or `None` if it is not a live victim
    pub(crate) fn envelope(&self, target: NodeId, message: Message) -> Option<Envelope> {
        let channel = self.victims.channel(target)?;
        Some(Envelope {
            target,
            locality: self.victims.classify(target),
            channel,
            message,
        })
    }

    /// Create a job under `parent` and queue it at the head of the deque.
    ///
    /// A job spawned under an aborted parent is created already aborted.
    pub(crate) fn spawn(&mut self, parent: Option<&Stamp>, args: Vec<u8>) -> Stamp {
        let doomed = parent.is_some_and(|p| self.aborts.covers(p));
        let stamp = self.registry.create(parent, args).stamp.clone();
        self.stats.jobs_spawned += 1;
        if doomed {
            self.registry.mark_aborted(&stamp);
            self.stats.jobs_aborted += 1;
        } else {
            self.deque.push_head(stamp.clone());
        }
        trace!(target: "spawnweave::spawn", stamp = %stamp, doomed, "spawned");
        stamp
    }

    /// Install the outcome of a job owned by this node
    pub(crate) fn complete(&mut self, stamp: &Stamp, outcome: JobOutcome) -> Completion {
        self.registry.complete(stamp, outcome, &self.aborts)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel::testing::RecordingChannel;
    use crate::record::JobState;
    use crate::victim::Victim;
    use spawnweave_core::ClusterName;

    pub(crate) fn state_for(name: &str, cluster: &str) -> (SchedState, NodeId) {
        let id = NodeId::from_name(name);
        let config = NodeConfig::new(id, ClusterName::from(cluster)).with_rng_seed(7);
        (SchedState::new(&config), id)
    }

    pub(crate) fn peer(
        state: &mut SchedState,
        name: &str,
        cluster: &str,
    ) -> (NodeId, Arc<RecordingChannel>) {
        let id = NodeId::from_name(name);
        let channel = Arc::new(RecordingChannel::new(id));
        state
            .victims
            .add(Victim::new(id, ClusterName::from(cluster), channel.clone()));
        (id, channel)
    }

    #[test]
    fn test_spawn_queues_at_head() {
        let (mut state, _) = state_for("a", "x");
        let first = state.spawn(None, vec![]);
        let second = state.spawn(Some(&first), vec![]);
        assert_eq!(state.deque.pop_head(), Some(second));
        assert_eq!(state.stats.jobs_spawned, 2);
    }

    #[test]
    fn test_spawn_under_aborted_parent() {
        let (mut state, _) = state_for("a", "x");
        let parent = state.spawn(None, vec![]);
        state.aborts.insert(parent.clone());
        let child = state.spawn(Some(&parent), vec![]);
        assert!(!state.deque.contains(&child));
        assert_eq!(state.registry.lookup(&child).map(|r| r.state), Some(JobState::Aborted));
    }

    #[test]
    fn test_envelope_locality() {
        let (mut state, _) = state_for("a", "x");
        let (b, _) = peer(&mut state, "b", "x");
        let (c, _) = peer(&mut state, "c", "y");
        let to_b = state.envelope(b, Message::StealRequest).unwrap();
        let to_c = state.envelope(c, Message::StealRequest).unwrap();
        assert_eq!(to_b.locality, Locality::IntraCluster);
        assert_eq!(to_c.locality, Locality::InterCluster);
        assert!(state.envelope(NodeId::from_name("nobody"), Message::StealRequest).is_none());
    }
}
