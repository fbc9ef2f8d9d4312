//! Invocation records: one spawned sub-computation and its lifecycle.

use serde::{Deserialize, Serialize};
use spawnweave_core::{NodeId, Stamp};

/// Lifecycle state of an invocation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Spawned and waiting in the owner's ready deque
    Queued,
    /// Shipped to a thief
    Stolen,
    /// Executing on this node
    Running,
    /// Result installed
    Finished,
    /// Cancelled; any result is discarded
    Aborted,
}

impl JobState {
    /// True for `Finished` and `Aborted`
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Stolen => "stolen",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Result of one invocation as seen by its spawner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// Serialized return value
    Value(Vec<u8>),
    /// The job failed with an application error
    Failed(String),
    /// The job was aborted before producing a result
    Aborted,
}

impl JobOutcome {
    /// Return value bytes, if the job produced one
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Value(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// True if the job was aborted
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// One spawned sub-computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRecord {
    /// Job identity; carries the parent chain
    pub stamp: Stamp,
    /// Node that spawned the job and receives its result
    pub owner: NodeId,
    /// Node currently executing the job, if shipped
    pub stealer: Option<NodeId>,
    /// Serialized arguments
    pub args: Vec<u8>,
    /// Result slot
    pub result: Option<JobOutcome>,
    /// Lifecycle state
    pub state: JobState,
}

impl InvocationRecord {
    /// Create a queued record
    #[must_use]
    pub fn new(stamp: Stamp, owner: NodeId, args: Vec<u8>) -> Self {
        Self {
            stamp,
            owner,
            stealer: None,
            args,
            result: None,
            state: JobState::Queued,
        }
    }

    /// Stamp of the spawning job
    #[must_use]
    pub fn parent(&self) -> Option<&Stamp> {
        self.stamp.parent()
    }

    /// True once the record holds a result or was aborted
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Outcome visible to the spawner, if terminal
    #[must_use]
    pub fn outcome(&self) -> Option<JobOutcome> {
        match self.state {
            JobState::Finished => self.result.clone(),
            JobState::Aborted => Some(JobOutcome::Aborted),
            _ => None,
        }
    }

    /// Copy suitable for shipping to a thief
    #[must_use]
    pub fn for_transfer(&self, thief: NodeId) -> Self {
        Self {
            stamp: self.stamp.clone(),
            owner: self.owner,
            stealer: Some(thief),
            args: self.args.clone(),
            result: None,
            state: JobState::Stolen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spawnweave_core::StampAllocator;

    fn record() -> InvocationRecord {
        let owner = NodeId::from_name("owner");
        let mut stamps = StampAllocator::new(owner);
        let root = stamps.next(None);
        InvocationRecord::new(stamps.next(Some(&root)), owner, vec![1, 2])
    }

    #[test]
    fn test_new_record_is_queued() {
        let rec = record();
        assert_eq!(rec.state, JobState::Queued);
        assert!(rec.stealer.is_none());
        assert!(rec.parent().is_some());
        assert!(rec.outcome().is_none());
    }

    #[test]
    fn test_outcome_by_state() {
        let mut rec = record();
        rec.state = JobState::Finished;
        rec.result = Some(JobOutcome::Value(vec![7]));
        assert_eq!(rec.outcome(), Some(JobOutcome::Value(vec![7])));

        rec.state = JobState::Aborted;
        assert_eq!(rec.outcome(), Some(JobOutcome::Aborted));
    }

    #[test]
    fn test_for_transfer() {
        let rec = record();
        let thief = NodeId::from_name("thief");
        let shipped = rec.for_transfer(thief);
        assert_eq!(shipped.stamp, rec.stamp);
        assert_eq!(shipped.stealer, Some(thief));
        assert_eq!(shipped.state, JobState::Stolen);
        assert_eq!(shipped.args, rec.args);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Finished.is_terminal());
        assert!(JobState::Aborted.is_terminal());
        assert!(!JobState::Stolen.is_terminal());
        assert_eq!(JobState::Running.to_string(), "running");
    }

    #[test]
    fn test_outcome_accessors() {
        assert_eq!(JobOutcome::Value(vec![3]).value(), Some(&[3u8][..]));
        assert!(JobOutcome::Aborted.is_aborted());
        assert!(JobOutcome::Failed("x".into()).value().is_none());
    }
}
