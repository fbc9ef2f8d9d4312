//! Job registry: every invocation record known to one node, keyed by stamp.
//!
//! The registry is the only place a record lives. Parent/child and
//! owner/stealer relations are expressed through stamps and node ids, never
//! through references between records.

use crate::abort::AbortSet;
use crate::record::{InvocationRecord, JobOutcome, JobState};
use spawnweave_core::{NodeId, Stamp, StampAllocator};
use std::collections::HashMap;

/// How a `complete` call was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The result was written to the record
    Installed,
    /// The record is covered by an abort; it is now `Aborted`
    Discarded,
    /// The record already held a result or was aborted
    Duplicate,
    /// No record for the stamp
    Unknown,
}

/// Records known to one node
#[derive(Debug, Clone)]
pub struct JobRegistry {
    node_id: NodeId,
    stamps: StampAllocator,
    records: HashMap<Stamp, InvocationRecord>,
}

impl JobRegistry {
    /// Create an empty registry for a node
    #[must_use]
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            stamps: StampAllocator::new(node_id),
            records: HashMap::new(),
        }
    }

    /// Allocate a stamp under `parent` and record a queued job owned by this node
    pub fn create(&mut self, parent: Option<&Stamp>, args: Vec<u8>) -> &InvocationRecord {
        let stamp = self.stamps.next(parent);
        let record = InvocationRecord::new(stamp.clone(), self.node_id, args);
        self.records.entry(stamp).or_insert(record)
    }

    /// Install a record shipped from another node as `Running`.
    ///
    /// Returns false if a record for the stamp already exists; the first
    /// delivery wins.
    pub fn install(&mut self, mut record: InvocationRecord) -> bool {
        if self.records.contains_key(&record.stamp) {
            return false;
        }
        record.stealer = Some(self.node_id);
        record.state = JobState::Running;
        record.result = None;
        self.records.insert(record.stamp.clone(), record);
        true
    }

    /// Look up a record
    #[must_use]
    pub fn lookup(&self, stamp: &Stamp) -> Option<&InvocationRecord> {
        self.records.get(stamp)
    }

    /// Mark a queued record as shipped to `thief`
    pub fn mark_stolen(&mut self, stamp: &Stamp, thief: NodeId) -> bool {
        match self.records.get_mut(stamp) {
            Some(record) if record.state == JobState::Queued => {
                record.state = JobState::Stolen;
                record.stealer = Some(thief);
                true
            }
            _ => false,
        }
    }

    /// Mark a queued record as executing locally
    pub fn mark_running(&mut self, stamp: &Stamp) -> bool {
        match self.records.get_mut(stamp) {
            Some(record) if record.state == JobState::Queued => {
                record.state = JobState::Running;
                true
            }
            _ => false,
        }
    }

    /// Mark a non-terminal record as aborted
    pub fn mark_aborted(&mut self, stamp: &Stamp) -> bool {
        match self.records.get_mut(stamp) {
            Some(record) if !record.is_terminal() => {
                record.state = JobState::Aborted;
                record.result = None;
                true
            }
            _ => false,
        }
    }

    /// Return a stolen record to the queue, clearing its stealer
    pub fn requeue(&mut self, stamp: &Stamp) -> bool {
        match self.records.get_mut(stamp) {
            Some(record) if record.state == JobState::Stolen => {
                record.state = JobState::Queued;
                record.stealer = None;
                true
            }
            _ => false,
        }
    }

    /// Write a result, unless the stamp is covered by `aborts`
    pub fn complete(&mut self, stamp: &Stamp, outcome: JobOutcome, aborts: &AbortSet) -> Completion {
        let Some(record) = self.records.get_mut(stamp) else {
            return Completion::Unknown;
        };
        if record.is_terminal() {
            return Completion::Duplicate;
        }
        if outcome.is_aborted() || aborts.covers(stamp) {
            record.state = JobState::Aborted;
            record.result = None;
            return Completion::Discarded;
        }
        record.state = JobState::Finished;
        record.result = Some(outcome);
        Completion::Installed
    }

    /// Remove a record
    pub fn remove(&mut self, stamp: &Stamp) -> Option<InvocationRecord> {
        self.records.remove(stamp)
    }

    /// Stamps of all records equal to or descending from `root`
    #[must_use]
    pub fn stamps_within(&self, root: &Stamp) -> Vec<Stamp> {
        self.records
            .keys()
            .filter(|stamp| stamp.is_within(root))
            .cloned()
            .collect()
    }

    /// True if a non-terminal record equals or descends from `root`
    #[must_use]
    pub fn has_live_within(&self, root: &Stamp) -> bool {
        self.records
            .values()
            .any(|r| !r.is_terminal() && r.stamp.is_within(root))
    }

    /// Stamps of records spawned directly by `parent`
    #[must_use]
    pub fn children_of(&self, parent: &Stamp) -> Vec<Stamp> {
        self.records
            .keys()
            .filter(|stamp| stamp.parent() == Some(parent))
            .cloned()
            .collect()
    }

    /// Stamps of stolen records whose stealer is `node`
    #[must_use]
    pub fn stolen_by(&self, node: NodeId) -> Vec<Stamp> {
        self.records
            .values()
            .filter(|r| r.state == JobState::Stolen && r.stealer == Some(node))
            .map(|r| r.stamp.clone())
            .collect()
    }

    /// Stamps of running records owned by `owner`
    #[must_use]
    pub fn running_for(&self, owner: NodeId) -> Vec<Stamp> {
        self.records
            .values()
            .filter(|r| r.state == JobState::Running && r.owner == owner)
            .map(|r| r.stamp.clone())
            .collect()
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if there are no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of stamps allocated by this node
    #[must_use]
    pub fn spawned(&self) -> u64 {
        self.stamps.allocated()
    }
}
