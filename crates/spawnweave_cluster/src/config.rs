//! Node configuration.

use serde::{Deserialize, Serialize};
use spawnweave_core::{ClusterName, CoreError, CoreResult, NodeId};
use std::time::Duration;

/// How a thief picks the victim of its next steal request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StealStrategy {
    /// Uniformly random over all live victims
    Random,
    /// Prefer same-cluster victims with probability `local_bias`
    ClusterAware {
        /// Probability of restricting a draw to same-cluster victims
        local_bias: f64,
    },
}

impl Default for StealStrategy {
    fn default() -> Self {
        Self::ClusterAware { local_bias: 0.8 }
    }
}

/// Node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node ID
    pub node_id: NodeId,
    /// Locality group of this node
    pub cluster: ClusterName,
    /// Victim selection policy
    pub strategy: StealStrategy,
    /// Re-poll delay after the first empty steal reply
    pub initial_backoff_ms: u64,
    /// Upper bound on the re-poll delay
    pub max_backoff_ms: u64,
    /// How long a thief waits for a steal reply before reselecting
    pub steal_reply_timeout_ms: u64,
    /// Seed for victim selection
    pub rng_seed: u64,
    /// Abort roots kept for late-arriving messages; roots covering live work are kept beyond it
    pub abort_memory: usize,
}

impl NodeConfig {
    /// Create a new node config
    #[must_use]
    pub fn new(node_id: NodeId, cluster: ClusterName) -> Self {
        Self {
            node_id,
            cluster,
            strategy: StealStrategy::default(),
            initial_backoff_ms: 1,
            max_backoff_ms: 64,
            steal_reply_timeout_ms: 500,
            rng_seed: 0,
            abort_memory: 1024,
        }
    }

    /// Set the steal strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: StealStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set backoff bounds
    #[must_use]
    pub fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.initial_backoff_ms = initial_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    /// Set steal reply timeout
    #[must_use]
    pub fn with_steal_reply_timeout(mut self, timeout_ms: u64) -> Self {
        self.steal_reply_timeout_ms = timeout_ms;
        self
    }

    /// Set the victim selection seed
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Set how many abort roots are remembered
    #[must_use]
    pub fn with_abort_memory(mut self, roots: usize) -> Self {
        self.abort_memory = roots;
        self
    }

    /// Steal reply timeout as a duration
    #[must_use]
    pub fn steal_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.steal_reply_timeout_ms)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for an out-of-range bias or backoff
    pub fn validate(&self) -> CoreResult<()> {
        if let StealStrategy::ClusterAware { local_bias } = self.strategy {
            if !(0.0..=1.0).contains(&local_bias) {
                return Err(CoreError::Validation {
                    field: "local_bias".to_string(),
                    reason: format!("{} is not within 0..=1", local_bias),
                });
            }
        }
        if self.initial_backoff_ms == 0 || self.initial_backoff_ms > self.max_backoff_ms {
            return Err(CoreError::Validation {
                field: "initial_backoff_ms".to_string(),
                reason: "must be positive and at most max_backoff_ms".to_string(),
            });
        }
        if self.abort_memory == 0 {
            return Err(CoreError::Validation {
                field: "abort_memory".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new(NodeId::new(), ClusterName::default())
    }
}
