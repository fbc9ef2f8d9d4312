//! Job stamps: globally unique, hierarchically comparable job identifiers.
//!
//! A stamp names one spawned invocation. It is unique because it pairs the
//! spawning node with that node's private sequence counter, and it carries its
//! parent's stamp so any node can decide ancestry without consulting the
//! spawner. Two stamps are equal iff `(origin, seq)` are equal; the parent
//! chain is payload, not identity.

use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identifier of one spawned invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stamp {
    /// Node that spawned the invocation
    origin: NodeId,
    /// Per-node sequence number
    seq: u64,
    /// Stamp of the spawning invocation, `None` for a top-level spawn
    parent: Option<Arc<Stamp>>,
}

impl Stamp {
    /// Node that spawned this invocation
    #[must_use]
    pub fn origin(&self) -> NodeId {
        self.origin
    }

    /// Sequence number on the origin node
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Parent stamp, if any
    #[must_use]
    pub fn parent(&self) -> Option<&Stamp> {
        self.parent.as_deref()
    }

    /// Number of ancestors
    #[must_use]
    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }

    /// Iterate over ancestors, nearest first
    pub fn ancestors(&self) -> impl Iterator<Item = &Stamp> {
        std::iter::successors(self.parent(), |s| s.parent())
    }

    /// True if `ancestor` appears in this stamp's parent chain
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &Stamp) -> bool {
        self.ancestors().any(|s| s == ancestor)
    }

    /// True if this stamp equals `root` or descends from it
    #[must_use]
    pub fn is_within(&self, root: &Stamp) -> bool {
        self == root || self.is_descendant_of(root)
    }
}

impl PartialEq for Stamp {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin && self.seq == other.seq
    }
}

impl Eq for Stamp {}

impl Hash for Stamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.origin.hash(state);
        self.seq.hash(state);
    }
}

impl std::fmt::Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.origin.short(), self.seq)
    }
}

/// Per-node stamp allocator.
///
/// Lives inside the node's scheduling state, so allocation is a plain counter
/// increment under the node's lock.
#[derive(Debug, Clone)]
pub struct StampAllocator {
    node_id: NodeId,
    next_seq: u64,
}

impl StampAllocator {
    /// Create an allocator for a node
    #[must_use]
    pub fn new(node_id: NodeId) -> Self {
        Self { node_id, next_seq: 0 }
    }

    /// Allocate a fresh stamp under `parent`
    pub fn next(&mut self, parent: Option<&Stamp>) -> Stamp {
        let seq = self.next_seq;
        self.next_seq += 1;
        Stamp {
            origin: self.node_id,
            seq,
            parent: parent.map(|p| Arc::new(p.clone())),
        }
    }

    /// Number of stamps handed out so far
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_allocator_is_monotonic() {
        let mut alloc = StampAllocator::new(NodeId::from_name("a"));
        let s0 = alloc.next(None);
        let s1 = alloc.next(None);
        assert_eq!(s0.seq(), 0);
        assert_eq!(s1.seq(), 1);
        assert_ne!(s0, s1);
        assert_eq!(alloc.allocated(), 2);
    }

    #[test]
    fn test_equality_ignores_parent() {
        let mut alloc = StampAllocator::new(NodeId::from_name("a"));
        let root = alloc.next(None);
        let child = alloc.next(Some(&root));
        let detached = Stamp {
            origin: child.origin(),
            seq: child.seq(),
            parent: None,
        };
        assert_eq!(child, detached);

        let mut set = HashSet::new();
        set.insert(child.clone());
        assert!(set.contains(&detached));
    }

    #[test]
    fn test_stamps_from_different_nodes_differ() {
        let mut a = StampAllocator::new(NodeId::from_name("a"));
        let mut b = StampAllocator::new(NodeId::from_name("b"));
        assert_ne!(a.next(None), b.next(None));
    }

    #[test]
    fn test_ancestry_across_nodes() {
        let mut a = StampAllocator::new(NodeId::from_name("a"));
        let mut b = StampAllocator::new(NodeId::from_name("b"));
        let s1 = a.next(None);
        let s2 = a.next(Some(&s1));
        let s3 = b.next(Some(&s2));

        assert!(s3.is_descendant_of(&s1));
        assert!(s3.is_descendant_of(&s2));
        assert!(s2.is_descendant_of(&s1));
        assert!(!s1.is_descendant_of(&s2));
        assert!(!s1.is_descendant_of(&s1));
        assert!(s1.is_within(&s1));
        assert_eq!(s3.depth(), 2);
    }

    #[test]
    fn test_siblings_are_not_related() {
        let mut a = StampAllocator::new(NodeId::from_name("a"));
        let root = a.next(None);
        let left = a.next(Some(&root));
        let right = a.next(Some(&root));
        assert!(!left.is_within(&right));
        assert!(!right.is_within(&left));
    }

    #[test]
    fn test_stamp_survives_encoding() {
        let mut a = StampAllocator::new(NodeId::from_name("a"));
        let root = a.next(None);
        let child = a.next(Some(&root));
        let bytes = crate::encode(&child).unwrap();
        let back: Stamp = crate::decode(&bytes).unwrap();
        assert_eq!(back, child);
        assert!(back.is_descendant_of(&root));
    }

    proptest! {
        #[test]
        fn prop_chain_ancestry(depth in 1usize..40, pick in 0usize..40) {
            let mut alloc = StampAllocator::new(NodeId::from_name("p"));
            let mut chain = vec![alloc.next(None)];
            for _ in 0..depth {
                let next = alloc.next(chain.last());
                chain.push(next);
            }
            let leaf = chain.last().unwrap();
            let pick = pick % chain.len();
            prop_assert!(leaf.is_within(&chain[pick]));
            prop_assert_eq!(leaf.depth(), depth);
            if pick < chain.len() - 1 {
                prop_assert!(!chain[pick].is_descendant_of(leaf));
            }
        }
    }
}
