//! SPAWNWEAVE Cluster
//!
//! Distributed divide-and-conquer execution: spawned jobs are spread over a
//! cluster by cluster-aware work stealing, speculative sub-trees are aborted
//! along the stealer chain, orphaned work is re-queued when a thief crashes,
//! and a broadcast tuple space carries global search bounds.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod abort;
pub mod balancer;
pub mod channel;
pub mod config;
pub mod context;
pub mod deque;
pub mod fault;
pub mod membership;
pub mod node;
pub mod protocol;
pub mod record;
pub mod registry;
pub mod stats;
pub mod tuple;
pub mod victim;

mod state;

pub use abort::{AbortDecision, AbortSet};
pub use balancer::StealBackoff;
pub use channel::{MessageChannel, TransportError};
pub use config::{NodeConfig, StealStrategy};
pub use context::{JobContext, JobHandler};
pub use deque::ReadyDeque;
pub use fault::CrashReport;
pub use membership::{Member, MemberState, Membership, MembershipEvent};
pub use node::{ExitReport, Node, NodeError};
pub use protocol::Message;
pub use record::{InvocationRecord, JobOutcome, JobState};
pub use registry::{Completion, JobRegistry};
pub use stats::NodeStats;
pub use tuple::{
    Bound, BoundHandler, MAX_BOUND, MIN_BOUND, Tuple, TupleHandler, TupleSpace, TupleStore,
    TupleValue,
};
pub use victim::{Locality, Victim, VictimTable};
