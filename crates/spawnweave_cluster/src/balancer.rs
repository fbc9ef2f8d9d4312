//! Load balancing by work stealing.
//!
//! An idle node becomes a thief: it picks a victim and sends a steal request,
//! waiting for the reply before sending another. Under the cluster-aware
//! strategy a request to another cluster is sent asynchronously instead:
//! one such wide-area request may be in flight while the thief keeps
//! stealing synchronously inside its own cluster. The victim answers from the tail of
//! its deque, marking the shipped record stolen. The thief runs the job and
//! sends the result straight to the job's owner, the only node a job is ever
//! stolen from. Empty replies push the thief onto a geometric backoff, and
//! every new request goes through victim selection again.

use crate::config::{NodeConfig, StealStrategy};
use crate::protocol::Message;
use crate::record::{InvocationRecord, JobOutcome, JobState};
use crate::registry::Completion;
use crate::state::{Envelope, SchedState};
use crate::victim::Locality;
use spawnweave_core::{NodeId, Stamp};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Geometric re-poll delay after empty steal replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StealBackoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl StealBackoff {
    /// Create a backoff between `initial` and `max`
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
        }
    }

    /// Record an empty reply and return the delay before the next request
    pub fn grow(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial,
            Some(current) => (current * 2).min(self.max),
        };
        self.current = Some(next);
        next
    }

    /// Record a successful steal
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// Delay currently in force, if any
    #[must_use]
    pub fn current(&self) -> Option<Duration> {
        self.current
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Outstanding {
    pub(crate) victim: NodeId,
    pub(crate) sent_at: Instant,
}

/// Thief-side state
#[derive(Debug)]
pub(crate) struct StealState {
    /// Synchronous request the owner context is waiting on
    pub(crate) outstanding: Option<Outstanding>,
    /// Asynchronous request to another cluster
    pub(crate) wide_area: Option<Outstanding>,
    pub(crate) backoff: StealBackoff,
    pub(crate) not_before: Option<Instant>,
    pub(crate) reply_timeout: Duration,
    /// Stolen jobs installed but not yet started
    pub(crate) inbox: VecDeque<Stamp>,
}

impl StealState {
    pub(crate) fn new(config: &NodeConfig) -> Self {
        Self {
            outstanding: None,
            wide_area: None,
            backoff: StealBackoff::new(
                Duration::from_millis(config.initial_backoff_ms),
                Duration::from_millis(config.max_backoff_ms),
            ),
            not_before: None,
            reply_timeout: config.steal_reply_timeout(),
            inbox: VecDeque::new(),
        }
    }
}

/// Next thing the owner context should do
pub(crate) enum Step {
    /// Execute a job that is already marked running
    Run(Stamp),
    /// Send a steal request, then wait for the reply
    Steal(Envelope),
    /// Send a wide-area steal request and carry on
    StealWideArea(Envelope),
    /// Nothing to do for at most this long
    Wait(Duration),
    /// No live victims and no local work
    Idle,
}

impl SchedState {
    /// Decide the owner context's next action
    pub(crate) fn next_step(&mut self, now: Instant) -> Step {
        if let Some(stamp) = self.steal.inbox.pop_front() {
            return Step::Run(stamp);
        }
        while let Some(stamp) = self.deque.pop_head() {
            if self.registry.mark_running(&stamp) {
                return Step::Run(stamp);
            }
        }

        if let Some(out) = self.steal.wide_area {
            if now.saturating_duration_since(out.sent_at) >= self.steal.reply_timeout {
                debug!(target: "spawnweave::steal", victim = %out.victim, "wide-area steal reply timed out");
                self.steal.wide_area = None;
            }
        }

        if let Some(out) = self.steal.outstanding {
            let waited = now.saturating_duration_since(out.sent_at);
            if waited < self.steal.reply_timeout {
                return Step::Wait(self.steal.reply_timeout - waited);
            }
            debug!(target: "spawnweave::steal", victim = %out.victim, "steal reply timed out");
            self.steal.outstanding = None;
            let delay = self.steal.backoff.grow();
            self.steal.not_before = Some(now + delay);
        }

        if let Some(not_before) = self.steal.not_before {
            if now < not_before {
                return Step::Wait(not_before - now);
            }
            self.steal.not_before = None;
        }

        let Some((victim, wide_area)) = self.pick_victim() else {
            return match self.steal.wide_area {
                Some(out) => Step::Wait(
                    self.steal
                        .reply_timeout
                        .saturating_sub(now.saturating_duration_since(out.sent_at)),
                ),
                None => Step::Idle,
            };
        };
        let Some(envelope) = self.envelope(victim, Message::StealRequest) else {
            return Step::Idle;
        };
        let pending = Some(Outstanding { victim, sent_at: now });
        self.stats.steal_attempts += 1;
        if wide_area {
            self.steal.wide_area = pending;
            trace!(target: "spawnweave::steal", victim = %victim, "sending wide-area steal request");
            Step::StealWideArea(envelope)
        } else {
            self.steal.outstanding = pending;
            trace!(target: "spawnweave::steal", victim = %victim, "sending steal request");
            Step::Steal(envelope)
        }
    }

    /// Choose the next victim and whether the request goes out asynchronously.
    ///
    /// A cluster-aware draw that lands on another cluster while the
    /// wide-area request is still pending falls back to the own cluster.
    fn pick_victim(&mut self) -> Option<(NodeId, bool)> {
        let victim = self.victims.select(self.strategy)?;
        let cluster_aware = matches!(self.strategy, StealStrategy::ClusterAware { .. });
        if !cluster_aware || self.victims.classify(victim) == Locality::IntraCluster {
            return Some((victim, false));
        }
        if self.steal.wide_area.is_none() {
            return Some((victim, true));
        }
        self.victims.select_local().map(|local| (local, false))
    }

    /// Forget the pending request to `victim`, if any. Returns true if one was pending.
    pub(crate) fn clear_steal(&mut self, victim: NodeId) -> bool {
        if self.steal.outstanding.is_some_and(|o| o.victim == victim) {
            self.steal.outstanding = None;
            true
        } else if self.steal.wide_area.is_some_and(|o| o.victim == victim) {
            self.steal.wide_area = None;
            true
        } else {
            false
        }
    }

    /// A steal request could not be sent; the next step reselects
    pub(crate) fn steal_send_failed(&mut self, victim: NodeId) {
        self.clear_steal(victim);
    }

    /// Serve a steal request from `thief`
    pub(crate) fn serve_steal(&mut self, thief: NodeId) -> Option<Envelope> {
        self.stats.steal_requests_served += 1;
        if !self.victims.is_alive(thief) {
            debug!(target: "spawnweave::steal", thief = %thief, "steal request from unknown or dead node dropped");
            self.stats.stale_messages += 1;
            return None;
        }

        let mut job = None;
        while let Some(stamp) = self.deque.pop_tail() {
            if self.registry.mark_stolen(&stamp, thief) {
                job = self.registry.lookup(&stamp).map(|r| r.for_transfer(thief));
                break;
            }
        }
        match &job {
            Some(record) => {
                self.stats.jobs_stolen_from_me += 1;
                debug!(target: "spawnweave::steal", thief = %thief, stamp = %record.stamp, "job stolen");
            }
            None => trace!(target: "spawnweave::steal", thief = %thief, "nothing to steal"),
        }
        self.envelope(thief, Message::StealReply { job })
    }

    /// Handle a steal reply
    pub(crate) fn accept_steal_reply(
        &mut self,
        from: NodeId,
        job: Option<InvocationRecord>,
        now: Instant,
    ) -> bool {
        let expected = self.clear_steal(from);
        match job {
            Some(record) => self.accept_job(from, record),
            None => {
                if expected {
                    let delay = self.steal.backoff.grow();
                    self.steal.not_before = Some(now + delay);
                    trace!(target: "spawnweave::steal", victim = %from, ?delay, "empty steal reply");
                } else {
                    self.stats.stale_messages += 1;
                }
                false
            }
        }
    }

    /// Install a job shipped by `from`. Returns true if it will run here.
    pub(crate) fn accept_job(&mut self, from: NodeId, record: InvocationRecord) -> bool {
        let stamp = record.stamp.clone();
        if record.owner != from {
            warn!(target: "spawnweave::steal", stamp = %stamp, from = %from, owner = %record.owner, "job shipped by a node that does not own it");
        }
        if self.aborts.covers(&stamp) {
            debug!(target: "spawnweave::abort", stamp = %stamp, "stolen job already aborted, discarded");
            self.stats.jobs_aborted += 1;
            return false;
        }
        if !self.registry.install(record) {
            debug!(target: "spawnweave::steal", stamp = %stamp, "duplicate job transfer dropped");
            self.stats.stale_messages += 1;
            return false;
        }
        self.steal.inbox.push_back(stamp);
        self.steal.backoff.reset();
        self.steal.not_before = None;
        self.stats.steal_successes += 1;
        true
    }

    /// Handle the result of a job this node owns and shipped to `from`
    pub(crate) fn accept_result(&mut self, from: NodeId, stamp: &Stamp, outcome: JobOutcome) -> bool {
        let Some(record) = self.registry.lookup(stamp) else {
            debug!(target: "spawnweave::comm", stamp = %stamp, from = %from, "result for unknown stamp dropped");
            self.stats.stale_messages += 1;
            return false;
        };
        if record.owner != self.node_id {
            warn!(target: "spawnweave::comm", stamp = %stamp, from = %from, "result for a job owned elsewhere");
            self.stats.stale_messages += 1;
            return false;
        }
        if record.state == JobState::Stolen && record.stealer != Some(from) {
            warn!(target: "spawnweave::comm", stamp = %stamp, from = %from, "result from a node that did not steal the job");
        }
        match self.complete(stamp, outcome) {
            Completion::Installed => {
                self.stats.results_received += 1;
                debug!(target: "spawnweave::comm", stamp = %stamp, from = %from, "result installed");
                true
            }
            Completion::Discarded => {
                self.stats.jobs_aborted += 1;
                debug!(target: "spawnweave::abort", stamp = %stamp, "late result of aborted job discarded");
                false
            }
            Completion::Duplicate | Completion::Unknown => {
                self.stats.stale_messages += 1;
                false
            }
        }
    }

    /// Record the outcome of a job executed here.
    ///
    /// Owned jobs complete in place. Stolen jobs are released and their
    /// result addressed to the owner, unless aborted.
    pub(crate) fn finish_job(&mut self, stamp: &Stamp, outcome: JobOutcome) -> Vec<Envelope> {
        let mut out = self.reap_children(stamp);
        self.stats.jobs_executed += 1;

        let Some(owner) = self.registry.lookup(stamp).map(|r| r.owner) else {
            return out;
        };
        if owner == self.node_id {
            if self.complete(stamp, outcome) == Completion::Discarded {
                self.stats.jobs_aborted += 1;
            }
            return out;
        }

        self.registry.remove(stamp);
        if outcome.is_aborted() || self.aborts.covers(stamp) {
            debug!(target: "spawnweave::abort", stamp = %stamp, "result of aborted stolen job discarded");
            self.stats.jobs_aborted += 1;
            return out;
        }
        let message = Message::JobResult {
            stamp: stamp.clone(),
            outcome,
        };
        match self.envelope(owner, message) {
            Some(envelope) => {
                self.stats.results_sent += 1;
                out.push(envelope);
            }
            None => {
                debug!(target: "spawnweave::ft", stamp = %stamp, owner = %owner, "owner unreachable, result dropped");
            }
        }
        out
    }

    /// Release children a finished job spawned but never synced.
    ///
    /// Queued children are dropped, stolen ones aborted at their stealer.
    fn reap_children(&mut self, parent: &Stamp) -> Vec<Envelope> {
        let mut out = Vec::new();
        for child in self.registry.children_of(parent) {
            let Some(record) = self.registry.lookup(&child) else {
                continue;
            };
            match (record.state, record.stealer) {
                (JobState::Running, _) => continue,
                (JobState::Stolen, Some(stealer)) => {
                    self.remember_abort(child.clone());
                    if let Some(envelope) = self.envelope(stealer, Message::Abort { stamp: child.clone() }) {
                        out.push(envelope);
                    }
                }
                (JobState::Queued, _) => {
                    self.deque.remove(&child);
                }
                _ => {}
            }
            self.registry.remove(&child);
            trace!(target: "spawnweave::spawn", stamp = %child, "unsynced child released");
        }
        out
    }
}
