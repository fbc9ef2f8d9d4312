//! Failure injection for testing fault tolerance.
//!
//! Only crash-stop failures are modelled: a crashed node never comes back and
//! every message to or from it is lost.

use crate::seed::SimSeed;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use spawnweave_core::NodeId;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Crash injector shared by the network and the harness
#[derive(Debug, Default)]
pub struct CrashInjector {
    /// Nodes that are crashed
    crashed: Arc<RwLock<HashSet<NodeId>>>,
    /// Failure count
    failures_injected: Arc<RwLock<usize>>,
}

impl CrashInjector {
    /// Create a new crash injector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a node is crashed
    pub async fn is_crashed(&self, node_id: NodeId) -> bool {
        self.crashed.read().await.contains(&node_id)
    }

    /// Crash a specific node. Returns false if it was already down.
    pub async fn crash(&self, node_id: NodeId) -> bool {
        let inserted = self.crashed.write().await.insert(node_id);
        if inserted {
            *self.failures_injected.write().await += 1;
        }
        inserted
    }

    /// Get list of crashed nodes
    pub async fn crashed_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self.crashed.read().await.iter().copied().collect();
        nodes.sort();
        nodes
    }

    /// Get failure count
    pub async fn failure_count(&self) -> usize {
        *self.failures_injected.read().await
    }
}

/// A crash planned for some time after the root job starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCrash {
    /// Node to crash, by its name in the harness
    pub node: String,
    /// Delay after the start of the run
    pub after_ms: u64,
}

impl ScheduledCrash {
    /// Delay as a `Duration`
    #[must_use]
    pub fn after(&self) -> Duration {
        Duration::from_millis(self.after_ms)
    }
}

/// Failure schedule for planned crashes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSchedule {
    crashes: Vec<ScheduledCrash>,
}

impl FailureSchedule {
    /// Create a new empty schedule
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Crash `node` once `after_ms` have elapsed
    #[must_use]
    pub fn crash_after(mut self, node: impl Into<String>, after_ms: u64) -> Self {
        self.crashes.push(ScheduledCrash {
            node: node.into(),
            after_ms,
        });
        self.crashes.sort_by_key(|c| c.after_ms);
        self
    }

    /// Pick `count` distinct nodes from `candidates` and crash each at a
    /// seeded random time inside `window_ms`
    #[must_use]
    pub fn random(seed: &SimSeed, candidates: &[String], count: usize, window_ms: u64) -> Self {
        let mut rng = seed.derive("failures").into_rng();
        let mut picked: Vec<&String> = candidates.iter().collect();
        picked.shuffle(&mut rng);
        picked
            .into_iter()
            .take(count)
            .fold(Self::new(), |schedule, node| {
                let after_ms = rng.gen_range(0..=window_ms);
                schedule.crash_after(node.clone(), after_ms)
            })
    }

    /// Planned crashes ordered by time
    #[must_use]
    pub fn crashes(&self) -> &[ScheduledCrash] {
        &self.crashes
    }

    /// True if nothing is scheduled
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.crashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crash_injector_new() {
        let injector = CrashInjector::new();
        assert!(injector.crashed_nodes().await.is_empty());
        assert_eq!(injector.failure_count().await, 0);
    }

    #[tokio::test]
    async fn test_crash_injector_crash() {
        let injector = CrashInjector::new();
        let node_id = NodeId::new();

        assert!(injector.crash(node_id).await);
        assert!(!injector.crash(node_id).await);
        assert!(injector.is_crashed(node_id).await);
        assert_eq!(injector.crashed_nodes().await, vec![node_id]);
        assert_eq!(injector.failure_count().await, 1);
    }

    #[test]
    fn test_schedule_sorted_by_time() {
        let schedule = FailureSchedule::new()
            .crash_after("c", 30)
            .crash_after("b", 10);
        let names: Vec<_> = schedule.crashes().iter().map(|c| c.node.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(schedule.crashes()[0].after(), Duration::from_millis(10));
        assert!(FailureSchedule::default().is_empty());
    }

    #[test]
    fn test_random_schedule_reproducible() {
        let candidates: Vec<String> = (1..6).map(|i| format!("node-{i}")).collect();
        let seed = SimSeed::from_literal(9);
        let a = FailureSchedule::random(&seed, &candidates, 2, 100);
        let b = FailureSchedule::random(&seed, &candidates, 2, 100);
        assert_eq!(a, b);
        assert_eq!(a.crashes().len(), 2);
        assert_ne!(a.crashes()[0].node, a.crashes()[1].node);
        assert!(a.crashes().iter().all(|c| c.after_ms <= 100));

        let capped = FailureSchedule::random(&seed, &candidates, 10, 100);
        assert_eq!(capped.crashes().len(), 5);
    }
}
