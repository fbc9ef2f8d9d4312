//! Crash handling.
//!
//! Recovery is restart-based: jobs a crashed node stole from us are put back
//! in our deque and run again from scratch. Nothing of the crashed node's
//! partial progress is kept.

use crate::state::SchedState;
use spawnweave_core::{NodeId, Stamp};
use tracing::{debug, info};

/// What a crash notification changed on this node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrashReport {
    /// False if the node was already known dead or never known
    pub newly_dead: bool,
    /// Orphans put back in the deque
    pub requeued: Vec<Stamp>,
    /// Jobs running here for the crashed owner, now flagged aborted
    pub orphaned_running: usize,
    /// True if an outstanding steal request to the node was cancelled
    pub steal_cancelled: bool,
}

impl SchedState {
    /// React to the crash of `dead`
    pub(crate) fn handle_crash(&mut self, dead: NodeId) -> CrashReport {
        let newly_dead = self.victims.mark_dead(dead);

        let requeued = self.registry.stolen_by(dead);
        for stamp in &requeued {
            if self.registry.requeue(stamp) {
                self.deque.push_head(stamp.clone());
            }
        }
        self.stats.orphans_requeued += requeued.len() as u64;

        // Jobs we run for the dead owner have nowhere to report to.
        let running = self.registry.running_for(dead);
        for stamp in &running {
            self.remember_abort(stamp.clone());
        }

        let steal_cancelled = self.clear_steal(dead);
        if steal_cancelled {
            self.steal.not_before = None;
        }

        if newly_dead || !requeued.is_empty() {
            info!(
                target: "spawnweave::ft",
                node = %dead,
                orphans = requeued.len(),
                orphaned_running = running.len(),
                steal_cancelled,
                "peer crashed"
            );
        } else {
            debug!(target: "spawnweave::ft", node = %dead, "repeated crash notification");
        }

        CrashReport {
            newly_dead,
            requeued,
            orphaned_running: running.len(),
            steal_cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::balancer::Step;
    use crate::protocol::Message;
    use crate::record::{JobOutcome, JobState};
    use crate::state::tests::{peer, state_for};
    use std::time::Instant;

    #[test]
    fn test_orphans_requeued_exactly_once() {
        let (mut state, _) = state_for("a", "x");
        let (d, _) = peer(&mut state, "d", "x");
        let (e, _) = peer(&mut state, "e", "x");
        let mut orphans = Vec::new();
        for _ in 0..3 {
            let stamp = state.spawn(None, vec![]);
            state.deque.remove(&stamp);
            state.registry.mark_stolen(&stamp, d);
            orphans.push(stamp);
        }
        let safe = state.spawn(None, vec![]);
        state.deque.remove(&safe);
        state.registry.mark_stolen(&safe, e);

        let report = state.handle_crash(d);
        assert!(report.newly_dead);
        assert_eq!(report.requeued.len(), 3);
        assert_eq!(state.deque.len(), 3);
        for stamp in &orphans {
            let rec = state.registry.lookup(stamp).unwrap();
            assert_eq!(rec.state, JobState::Queued);
            assert!(rec.stealer.is_none());
        }
        assert_eq!(state.registry.lookup(&safe).map(|r| r.state), Some(JobState::Stolen));

        let again = state.handle_crash(d);
        assert!(!again.newly_dead);
        assert!(again.requeued.is_empty());
        assert_eq!(state.deque.len(), 3);
        assert_eq!(state.stats.orphans_requeued, 3);
    }

    #[test]
    fn test_late_result_from_dead_stealer_is_ignored_after_requeue() {
        let (mut state, _) = state_for("a", "x");
        let (d, _) = peer(&mut state, "d", "x");
        let stamp = state.spawn(None, vec![]);
        state.deque.remove(&stamp);
        state.registry.mark_stolen(&stamp, d);
        state.handle_crash(d);

        // The requeued job runs locally and completes exactly once.
        match state.next_step(Instant::now()) {
            Step::Run(s) => assert_eq!(s, stamp),
            _ => panic!("expected the orphan"),
        }
        state.finish_job(&stamp, JobOutcome::Value(vec![1]));
        assert!(!state.accept_result(d, &stamp, JobOutcome::Value(vec![2])));
        assert_eq!(
            state.registry.lookup(&stamp).and_then(|r| r.outcome()),
            Some(JobOutcome::Value(vec![1]))
        );
    }

    #[test]
    fn test_crash_of_owner_aborts_running_work() {
        let (mut owner, owner_id) = state_for("a", "x");
        let (mut thief, thief_id) = state_for("b", "x");
        peer(&mut owner, "b", "x");
        peer(&mut thief, "a", "x");
        let stamp = owner.spawn(None, vec![]);
        let Some(Message::StealReply { job: Some(record) }) =
            owner.serve_steal(thief_id).map(|e| e.message)
        else {
            panic!("expected a job");
        };
        thief.accept_job(owner_id, record);

        let report = thief.handle_crash(owner_id);
        assert_eq!(report.orphaned_running, 1);
        assert!(thief.aborts.covers(&stamp));
        assert!(thief.finish_job(&stamp, JobOutcome::Value(vec![])).is_empty());
    }

    #[test]
    fn test_crash_cancels_outstanding_steal() {
        let (mut state, _) = state_for("a", "x");
        let (d, _) = peer(&mut state, "d", "x");
        assert!(matches!(state.next_step(Instant::now()), Step::Steal(_)));
        let report = state.handle_crash(d);
        assert!(report.steal_cancelled);
        assert!(matches!(state.next_step(Instant::now()), Step::Idle));
    }
}
