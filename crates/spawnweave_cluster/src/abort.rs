//! Abort coordination: cancelling speculative sub-trees across nodes.
//!
//! An abort names a root stamp. On every node it reaches, queued work within
//! the root is killed, running work within the root observes the abort at its
//! next poll and has its result discarded, and the abort is forwarded to every
//! live node that stole work within the root from this node. Forwarding stops
//! at nodes with nothing stolen, so the message follows the stealer chain.

use crate::protocol::Message;
use crate::record::JobState;
use crate::state::{Envelope, SchedState};
use spawnweave_core::{NodeId, Stamp};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, trace};

/// Roots of aborted sub-trees known to this node.
///
/// Bounded by `capacity`, except that a root still covering live local work
/// is never forgotten: its running records only learn of the abort through
/// this set. Past the bound, the oldest settled roots go first. Forgetting a
/// settled root only risks wasted work on a thief that receives a job within
/// it later.
#[derive(Debug, Clone)]
pub struct AbortSet {
    order: VecDeque<Stamp>,
    roots: HashSet<Stamp>,
    capacity: usize,
}

impl AbortSet {
    /// Create an abort set aiming to hold at most `capacity` roots
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            roots: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record an aborted root. Returns false if it was already known.
    pub fn insert(&mut self, root: Stamp) -> bool {
        if !self.roots.insert(root.clone()) {
            return false;
        }
        self.order.push_back(root);
        true
    }

    /// Forget the oldest roots beyond the capacity for which `settled`
    /// holds. Returns how many were forgotten.
    pub fn evict(&mut self, mut settled: impl FnMut(&Stamp) -> bool) -> usize {
        let mut excess = self.order.len().saturating_sub(self.capacity);
        if excess == 0 {
            return 0;
        }
        let mut kept = VecDeque::with_capacity(self.order.len());
        let mut evicted = 0;
        while let Some(root) = self.order.pop_front() {
            if excess > 0 && settled(&root) {
                self.roots.remove(&root);
                excess -= 1;
                evicted += 1;
            } else {
                kept.push_back(root);
            }
        }
        self.order = kept;
        evicted
    }

    /// True if `root` itself was recorded
    #[must_use]
    pub fn contains(&self, root: &Stamp) -> bool {
        self.roots.contains(root)
    }

    /// True if `stamp` equals or descends from any recorded root
    #[must_use]
    pub fn covers(&self, stamp: &Stamp) -> bool {
        if self.roots.is_empty() {
            return false;
        }
        std::iter::once(stamp)
            .chain(stamp.ancestors())
            .any(|s| self.roots.contains(s))
    }

    /// Number of recorded roots
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// True if nothing was aborted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl Default for AbortSet {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// What an abort did on this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortDecision {
    /// The root had already finished here; the abort was a no-op
    AlreadyFinished,
    /// The abort was applied
    Applied {
        /// Queued records killed locally
        killed: usize,
        /// Running records flagged for cancellation
        flagged: usize,
        /// Nodes the abort was forwarded to
        forwarded: Vec<NodeId>,
    },
}

impl SchedState {
    /// Record an aborted root, then forget old roots that no longer cover
    /// any live record here
    pub(crate) fn remember_abort(&mut self, root: Stamp) -> bool {
        let inserted = self.aborts.insert(root);
        let registry = &self.registry;
        let evicted = self.aborts.evict(|root| !registry.has_live_within(root));
        if evicted > 0 {
            trace!(target: "spawnweave::abort", evicted, held = self.aborts.len(), "settled abort roots forgotten");
        }
        inserted
    }

    /// Apply an abort of the sub-tree rooted at `root`.
    ///
    /// Returns the decision and one abort message per live stealer holding
    /// work within the root. Sends are the caller's job, after unlocking.
    pub(crate) fn apply_abort(&mut self, root: &Stamp) -> (AbortDecision, Vec<Envelope>) {
        if let Some(record) = self.registry.lookup(root) {
            if record.state == JobState::Finished {
                debug!(target: "spawnweave::abort", stamp = %root, "abort after completion ignored");
                return (AbortDecision::AlreadyFinished, Vec::new());
            }
        }

        self.remember_abort(root.clone());

        let mut killed = 0;
        for stamp in self.deque.drain_within(root) {
            if self.registry.mark_aborted(&stamp) {
                killed += 1;
            }
        }

        let mut flagged = 0;
        let mut stealers: Vec<NodeId> = Vec::new();
        for stamp in self.registry.stamps_within(root) {
            let Some((state, stealer)) = self.registry.lookup(&stamp).map(|r| (r.state, r.stealer))
            else {
                continue;
            };
            match state {
                JobState::Stolen => {
                    if let Some(stealer) = stealer {
                        if !stealers.contains(&stealer) {
                            stealers.push(stealer);
                        }
                    }
                    self.registry.mark_aborted(&stamp);
                    killed += 1;
                }
                JobState::Running => flagged += 1,
                // Queued records were drained above.
                JobState::Queued | JobState::Finished | JobState::Aborted => {}
            }
        }
        self.stats.jobs_aborted += killed as u64;

        let mut forwarded = Vec::new();
        let mut out = Vec::new();
        for stealer in stealers {
            match self.envelope(stealer, Message::Abort { stamp: root.clone() }) {
                Some(envelope) => {
                    forwarded.push(stealer);
                    out.push(envelope);
                }
                None => {
                    debug!(
                        target: "spawnweave::abort",
                        stamp = %root,
                        stealer = %stealer,
                        "abort obligation to dead stealer dropped"
                    );
                }
            }
        }

        trace!(
            target: "spawnweave::abort",
            stamp = %root,
            killed,
            flagged,
            forwarded = forwarded.len(),
            "abort applied"
        );
        (
            AbortDecision::Applied {
                killed,
                flagged,
                forwarded,
            },
            out,
        )
    }
}
