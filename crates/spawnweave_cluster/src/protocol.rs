//! Messages exchanged between nodes.

use crate::record::{InvocationRecord, JobOutcome};
use crate::stats::NodeStats;
use crate::tuple::Tuple;
use serde::{Deserialize, Serialize};
use spawnweave_core::Stamp;

/// Protocol message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Ask the receiver for a job
    StealRequest,
    /// Answer to a steal request; `None` if the victim had nothing queued
    StealReply {
        /// Shipped job
        job: Option<InvocationRecord>,
    },
    /// Result of a stolen job, sent to its owner
    JobResult {
        /// Stamp of the finished job
        stamp: Stamp,
        /// What the job produced
        outcome: JobOutcome,
    },
    /// Abort the sub-tree rooted at `stamp`
    Abort {
        /// Root of the aborted sub-tree
        stamp: Stamp,
    },
    /// Tuple space insertion
    TupleAdd {
        /// Tuple key
        key: String,
        /// Passive value or active update
        tuple: Tuple,
    },
    /// Tuple space removal
    TupleRemove {
        /// Tuple key
        key: String,
    },
    /// The root job finished; stop and acknowledge
    Exit,
    /// Acknowledgement of `Exit` with the sender's counters
    ExitReply {
        /// Counters of the acknowledging node
        stats: NodeStats,
    },
}

impl Message {
    /// Short name for log lines
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StealRequest => "steal_request",
            Self::StealReply { job: Some(_) } => "steal_reply",
            Self::StealReply { job: None } => "steal_reply_empty",
            Self::JobResult { .. } => "job_result",
            Self::Abort { .. } => "abort",
            Self::TupleAdd { .. } => "tuple_add",
            Self::TupleRemove { .. } => "tuple_remove",
            Self::Exit => "exit",
            Self::ExitReply { .. } => "exit_reply",
        }
    }

    /// Size of the canonical encoding in bytes
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        spawnweave_core::encoded_len(self)
    }
}
