//! Per-node statistics.

use crate::victim::Locality;
use serde::{Deserialize, Serialize};

/// Counters kept by one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Messages sent to same-cluster peers
    pub intra_cluster_messages: u64,
    /// Bytes sent to same-cluster peers
    pub intra_cluster_bytes: u64,
    /// Messages sent to other-cluster peers
    pub inter_cluster_messages: u64,
    /// Bytes sent to other-cluster peers
    pub inter_cluster_bytes: u64,
    /// Steal requests sent
    pub steal_attempts: u64,
    /// Steal replies that carried a job
    pub steal_successes: u64,
    /// Steal requests received
    pub steal_requests_served: u64,
    /// Jobs shipped to thieves
    pub jobs_stolen_from_me: u64,
    /// Abort messages sent
    pub aborts_sent: u64,
    /// Abort messages received
    pub aborts_received: u64,
    /// Jobs spawned
    pub jobs_spawned: u64,
    /// Jobs executed to completion
    pub jobs_executed: u64,
    /// Jobs killed or whose result was discarded by an abort
    pub jobs_aborted: u64,
    /// Results returned to owners
    pub results_sent: u64,
    /// Results received for stolen jobs
    pub results_received: u64,
    /// Messages dropped as stale or duplicate
    pub stale_messages: u64,
    /// Jobs re-queued after their stealer crashed
    pub orphans_requeued: u64,
    /// Tuple updates applied locally
    pub tuple_updates: u64,
}

impl NodeStats {
    /// Account one sent message
    pub fn record_message(&mut self, locality: Locality, bytes: u64) {
        match locality {
            Locality::IntraCluster => {
                self.intra_cluster_messages += 1;
                self.intra_cluster_bytes += bytes;
            }
            Locality::InterCluster => {
                self.inter_cluster_messages += 1;
                self.inter_cluster_bytes += bytes;
            }
        }
    }

    /// Add another node's counters to these
    pub fn merge(&mut self, other: &NodeStats) {
        self.intra_cluster_messages += other.intra_cluster_messages;
        self.intra_cluster_bytes += other.intra_cluster_bytes;
        self.inter_cluster_messages += other.inter_cluster_messages;
        self.inter_cluster_bytes += other.inter_cluster_bytes;
        self.steal_attempts += other.steal_attempts;
        self.steal_successes += other.steal_successes;
        self.steal_requests_served += other.steal_requests_served;
        self.jobs_stolen_from_me += other.jobs_stolen_from_me;
        self.aborts_sent += other.aborts_sent;
        self.aborts_received += other.aborts_received;
        self.jobs_spawned += other.jobs_spawned;
        self.jobs_executed += other.jobs_executed;
        self.jobs_aborted += other.jobs_aborted;
        self.results_sent += other.results_sent;
        self.results_received += other.results_received;
        self.stale_messages += other.stale_messages;
        self.orphans_requeued += other.orphans_requeued;
        self.tuple_updates += other.tuple_updates;
    }

    /// Sum of many nodes' counters
    #[must_use]
    pub fn total<'a>(all: impl IntoIterator<Item = &'a NodeStats>) -> NodeStats {
        let mut total = NodeStats::default();
        for stats in all {
            total.merge(stats);
        }
        total
    }

    /// Fraction of steal attempts that returned a job
    #[must_use]
    pub fn steal_success_rate(&self) -> f64 {
        if self.steal_attempts == 0 {
            return 0.0;
        }
        self.steal_successes as f64 / self.steal_attempts as f64
    }
}

impl std::fmt::Display for NodeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "jobs: {} spawned, {} executed, {} aborted, {} re-queued",
            self.jobs_spawned, self.jobs_executed, self.jobs_aborted, self.orphans_requeued
        )?;
        writeln!(
            f,
            "steals: {} attempts, {} successes ({:.1}%), {} served, {} given away",
            self.steal_attempts,
            self.steal_successes,
            self.steal_success_rate() * 100.0,
            self.steal_requests_served,
            self.jobs_stolen_from_me
        )?;
        writeln!(
            f,
            "results: {} sent, {} received; aborts: {} sent, {} received; stale: {}",
            self.results_sent,
            self.results_received,
            self.aborts_sent,
            self.aborts_received,
            self.stale_messages
        )?;
        write!(
            f,
            "traffic: intra {} msgs / {} bytes, inter {} msgs / {} bytes; tuple updates: {}",
            self.intra_cluster_messages,
            self.intra_cluster_bytes,
            self.inter_cluster_messages,
            self.inter_cluster_bytes,
            self.tuple_updates
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_message_by_locality() {
        let mut stats = NodeStats::default();
        stats.record_message(Locality::IntraCluster, 40);
        assert_eq!(stats.intra_cluster_messages, 1);
        assert_eq!(stats.intra_cluster_bytes, 40);
        assert_eq!(stats.inter_cluster_bytes, 0);

        stats.record_message(Locality::InterCluster, 12);
        assert_eq!(stats.intra_cluster_bytes, 40);
        assert_eq!(stats.inter_cluster_messages, 1);
        assert_eq!(stats.inter_cluster_bytes, 12);
    }

    #[test]
    fn test_total() {
        let a = NodeStats {
            steal_attempts: 4,
            steal_successes: 1,
            ..NodeStats::default()
        };
        let b = NodeStats {
            steal_attempts: 6,
            steal_successes: 4,
            jobs_executed: 3,
            ..NodeStats::default()
        };
        let total = NodeStats::total([&a, &b]);
        assert_eq!(total.steal_attempts, 10);
        assert_eq!(total.jobs_executed, 3);
        assert!((total.steal_success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_display_mentions_traffic() {
        let text = NodeStats::default().to_string();
        assert!(text.contains("steals: 0 attempts"));
        assert!(text.contains("intra 0 msgs"));
        assert_eq!(NodeStats::default().steal_success_rate(), 0.0);
    }
}
