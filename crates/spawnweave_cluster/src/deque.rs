//! Ready deque of queued jobs.
//!
//! The owner pushes and pops at the head (depth-first). Thieves take from the
//! tail, which holds the oldest and usually largest-grain jobs.

use spawnweave_core::Stamp;
use std::collections::VecDeque;

/// Queued jobs of one node, by stamp
#[derive(Debug, Clone, Default)]
pub struct ReadyDeque {
    jobs: VecDeque<Stamp>,
}

impl ReadyDeque {
    /// Create an empty deque
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push at the owner's end
    pub fn push_head(&mut self, stamp: Stamp) {
        self.jobs.push_front(stamp);
    }

    /// Pop from the owner's end
    pub fn pop_head(&mut self) -> Option<Stamp> {
        self.jobs.pop_front()
    }

    /// Pop from the thief's end
    pub fn pop_tail(&mut self) -> Option<Stamp> {
        self.jobs.pop_back()
    }

    /// Remove a specific stamp
    pub fn remove(&mut self, stamp: &Stamp) -> bool {
        match self.jobs.iter().position(|s| s == stamp) {
            Some(index) => {
                self.jobs.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove and return every stamp equal to or descending from `root`
    pub fn drain_within(&mut self, root: &Stamp) -> Vec<Stamp> {
        let mut killed = Vec::new();
        self.jobs.retain(|stamp| {
            if stamp.is_within(root) {
                killed.push(stamp.clone());
                false
            } else {
                true
            }
        });
        killed
    }

    /// True if the stamp is queued
    #[must_use]
    pub fn contains(&self, stamp: &Stamp) -> bool {
        self.jobs.contains(stamp)
    }

    /// Number of queued jobs
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True if nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
