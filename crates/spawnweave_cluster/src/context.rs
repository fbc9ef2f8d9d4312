//! Application-facing execution context.

use crate::abort::AbortDecision;
use crate::node::{Node, NodeError};
use crate::record::JobOutcome;
use crate::tuple::{Tuple, TupleValue};
use async_trait::async_trait;
use spawnweave_core::{NodeId, Stamp};

/// Application code run for every job.
///
/// One handler is installed per node. Arguments and results are opaque bytes.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run one job. Sub-jobs are spawned and awaited through `ctx`.
    async fn run(&self, ctx: &JobContext, args: Vec<u8>) -> JobOutcome;
}

/// Handle given to a running job
pub struct JobContext {
    node: Node,
    stamp: Stamp,
}

impl JobContext {
    pub(crate) fn new(node: Node, stamp: Stamp) -> Self {
        Self { node, stamp }
    }

    /// Stamp of the running job
    #[must_use]
    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    /// Node the job runs on
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node.node_id()
    }

    /// Spawn a child job. It may run here or be stolen by a peer.
    pub async fn spawn(&self, args: Vec<u8>) -> Stamp {
        self.node.spawn(Some(&self.stamp), args).await
    }

    /// Wait for all `children`, running other work meanwhile.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::UnknownJob` if a stamp was already synced or never
    /// spawned, and `NodeError::ShuttingDown` if the node stops first
    pub async fn sync(&self, children: &[Stamp]) -> Result<Vec<JobOutcome>, NodeError> {
        self.node.sync(children).await
    }

    /// Wait for whichever of `pending` finishes first and remove it from the list.
    ///
    /// # Errors
    ///
    /// As for `sync`, plus `NodeError::NothingPending` for an empty list
    pub async fn sync_next(&self, pending: &mut Vec<Stamp>) -> Result<(Stamp, JobOutcome), NodeError> {
        self.node.sync_next(pending).await
    }

    /// Abort a spawned child and everything below it
    pub async fn abort(&self, child: &Stamp) -> AbortDecision {
        self.node.abort(child).await
    }

    /// True once this job has been aborted. Long-running jobs should poll this.
    pub async fn is_aborted(&self) -> bool {
        self.node.is_aborted(&self.stamp).await
    }

    /// Read a tuple
    pub async fn tuple(&self, key: &str) -> Option<TupleValue> {
        self.node.tuple(key).await
    }

    /// Broadcast a passive tuple
    pub async fn add_tuple(&self, key: &str, value: TupleValue) {
        self.node.add_tuple(key, Tuple::Passive(value)).await;
    }

    /// Broadcast an active tuple merged by `handler` on every node
    pub async fn add_active_tuple(&self, key: &str, handler: &str, value: TupleValue) {
        let tuple = Tuple::Active {
            handler: handler.to_string(),
            value,
        };
        self.node.add_tuple(key, tuple).await;
    }

    /// Broadcast removal of a tuple
    pub async fn remove_tuple(&self, key: &str) {
        self.node.remove_tuple(key).await;
    }
}
