//! Tuple space: a best-effort broadcast key/value store.
//!
//! Every node holds its own copy. Updates are broadcast to all live victims
//! and applied locally; there is no total order across nodes. Active tuples
//! name a handler registered on every node, which merges the incoming value
//! into the local store. Handlers must tolerate duplicates and any arrival
//! order; `BoundHandler` does so by only ever moving a bound one way.

use crate::protocol::Message;
use crate::state::{Envelope, SchedState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the built-in handler that keeps the smallest integer
pub const MIN_BOUND: &str = "min-bound";
/// Name of the built-in handler that keeps the largest integer
pub const MAX_BOUND: &str = "max-bound";

/// Value held in the tuple space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TupleValue {
    /// Integer, e.g. a search bound
    Int(i64),
    /// Text
    Text(String),
    /// Opaque bytes
    Bytes(Vec<u8>),
}

impl TupleValue {
    /// Integer payload, if any
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// Tuple as broadcast between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tuple {
    /// Stored as-is, replacing any previous value
    Passive(TupleValue),
    /// Merged by the named handler on every node
    Active {
        /// Registered handler name
        handler: String,
        /// Argument passed to the handler
        value: TupleValue,
    },
}

/// Local copy of the tuple space
#[derive(Debug, Clone, Default)]
pub struct TupleStore {
    entries: HashMap<String, TupleValue>,
}

impl TupleStore {
    /// Get a value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&TupleValue> {
        self.entries.get(key)
    }

    /// Insert a value, returning the previous one
    pub fn insert(&mut self, key: &str, value: TupleValue) -> Option<TupleValue> {
        self.entries.insert(key.to_string(), value)
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) -> Option<TupleValue> {
        self.entries.remove(key)
    }

    /// Number of keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merge function run on every node for an active tuple
pub trait TupleHandler: Send + Sync {
    /// Merge `value` into `store` under `key`. Returns true if the store changed.
    fn apply(&self, key: &str, value: &TupleValue, store: &mut TupleStore) -> bool;
}

/// Direction a bound may move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Keep the smallest value seen
    Min,
    /// Keep the largest value seen
    Max,
}

/// Monotonic integer bound
#[derive(Debug, Clone, Copy)]
pub struct BoundHandler {
    bound: Bound,
}

impl BoundHandler {
    /// Create a bound handler
    #[must_use]
    pub fn new(bound: Bound) -> Self {
        Self { bound }
    }
}

impl TupleHandler for BoundHandler {
    fn apply(&self, key: &str, value: &TupleValue, store: &mut TupleStore) -> bool {
        let Some(incoming) = value.as_int() else {
            debug!(target: "spawnweave::tuple", key, "non-integer bound update ignored");
            return false;
        };
        let improves = match store.get(key).and_then(TupleValue::as_int) {
            None => true,
            Some(current) => match self.bound {
                Bound::Min => incoming < current,
                Bound::Max => incoming > current,
            },
        };
        if improves {
            store.insert(key, TupleValue::Int(incoming));
        }
        improves
    }
}

/// Tuple store plus the handlers registered on this node
pub struct TupleSpace {
    store: TupleStore,
    handlers: HashMap<String, Arc<dyn TupleHandler>>,
}

impl TupleSpace {
    /// Create a tuple space with the built-in bound handlers registered
    #[must_use]
    pub fn new() -> Self {
        let mut space = Self {
            store: TupleStore::default(),
            handlers: HashMap::new(),
        };
        space.register(MIN_BOUND, Arc::new(BoundHandler::new(Bound::Min)));
        space.register(MAX_BOUND, Arc::new(BoundHandler::new(Bound::Max)));
        space
    }

    /// Register a handler under `name`, replacing any previous one
    pub fn register(&mut self, name: &str, handler: Arc<dyn TupleHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// True if a handler is registered under `name`
    #[must_use]
    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Apply a tuple locally. Returns true if the store changed.
    pub fn apply(&mut self, key: &str, tuple: &Tuple) -> bool {
        match tuple {
            Tuple::Passive(value) => self.store.insert(key, value.clone()).as_ref() != Some(value),
            Tuple::Active { handler, value } => match self.handlers.get(handler) {
                Some(h) => h.apply(key, value, &mut self.store),
                None => {
                    warn!(target: "spawnweave::tuple", key, handler = %handler, "no handler registered");
                    false
                }
            },
        }
    }

    /// Remove a key locally
    pub fn remove(&mut self, key: &str) -> Option<TupleValue> {
        self.store.remove(key)
    }

    /// Current value of a key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&TupleValue> {
        self.store.get(key)
    }

    /// Read-only view of the store
    #[must_use]
    pub fn store(&self) -> &TupleStore {
        &self.store
    }
}

impl Default for TupleSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TupleSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut handlers: Vec<&String> = self.handlers.keys().collect();
        handlers.sort();
        f.debug_struct("TupleSpace")
            .field("store", &self.store)
            .field("handlers", &handlers)
            .finish()
    }
}

impl SchedState {
    /// Apply an update locally and address it to every live victim
    pub(crate) fn publish_tuple(&mut self, key: &str, tuple: Tuple) -> Vec<Envelope> {
        self.apply_tuple(key, &tuple);
        self.broadcast(Message::TupleAdd {
            key: key.to_string(),
            tuple,
        })
    }

    /// Remove a key locally and address the removal to every live victim
    pub(crate) fn withdraw_tuple(&mut self, key: &str) -> Vec<Envelope> {
        self.tuples.remove(key);
        self.stats.tuple_updates += 1;
        self.broadcast(Message::TupleRemove {
            key: key.to_string(),
        })
    }

    /// Apply an update that arrived from a peer or was published here
    pub(crate) fn apply_tuple(&mut self, key: &str, tuple: &Tuple) -> bool {
        self.stats.tuple_updates += 1;
        let changed = self.tuples.apply(key, tuple);
        debug!(target: "spawnweave::tuple", key, changed, "tuple update applied");
        changed
    }

    fn broadcast(&self, message: Message) -> Vec<Envelope> {
        let targets: Vec<_> = self.victims.live().map(|v| v.node_id).collect();
        targets
            .into_iter()
            .filter_map(|target| self.envelope(target, message.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{peer, state_for};
    use proptest::prelude::*;

    fn bound(value: i64) -> Tuple {
        Tuple::Active {
            handler: MIN_BOUND.to_string(),
            value: TupleValue::Int(value),
        }
    }

    #[test]
    fn test_passive_last_write() {
        let mut space = TupleSpace::new();
        assert!(space.apply("k", &Tuple::Passive(TupleValue::Text("a".into()))));
        assert!(space.apply("k", &Tuple::Passive(TupleValue::Text("b".into()))));
        assert!(!space.apply("k", &Tuple::Passive(TupleValue::Text("b".into()))));
        assert_eq!(space.get("k"), Some(&TupleValue::Text("b".into())));
        assert_eq!(space.remove("k"), Some(TupleValue::Text("b".into())));
        assert!(space.store().is_empty());
    }

    #[test]
    fn test_min_bound_only_tightens() {
        let mut space = TupleSpace::new();
        assert!(space.apply("cutoff", &bound(10)));
        assert!(!space.apply("cutoff", &bound(12)));
        assert!(space.apply("cutoff", &bound(7)));
        assert_eq!(space.get("cutoff"), Some(&TupleValue::Int(7)));
    }

    #[test]
    fn test_max_bound() {
        let mut space = TupleSpace::new();
        let best = |v| Tuple::Active {
            handler: MAX_BOUND.to_string(),
            value: TupleValue::Int(v),
        };
        space.apply("best", &best(3));
        space.apply("best", &best(1));
        space.apply("best", &best(5));
        assert_eq!(space.get("best").and_then(TupleValue::as_int), Some(5));
    }

    #[test]
    fn test_unknown_handler_is_ignored() {
        let mut space = TupleSpace::new();
        let tuple = Tuple::Active {
            handler: "nope".into(),
            value: TupleValue::Int(1),
        };
        assert!(!space.apply("k", &tuple));
        assert!(space.get("k").is_none());
        assert!(!space.has_handler("nope"));
    }

    #[test]
    fn test_custom_handler() {
        struct Append;
        impl TupleHandler for Append {
            fn apply(&self, key: &str, value: &TupleValue, store: &mut TupleStore) -> bool {
                let TupleValue::Bytes(extra) = value else { return false };
                let mut bytes = match store.get(key) {
                    Some(TupleValue::Bytes(b)) => b.clone(),
                    _ => Vec::new(),
                };
                bytes.extend_from_slice(extra);
                store.insert(key, TupleValue::Bytes(bytes));
                true
            }
        }
        let mut space = TupleSpace::new();
        space.register("append", Arc::new(Append));
        let tuple = Tuple::Active {
            handler: "append".into(),
            value: TupleValue::Bytes(vec![1]),
        };
        space.apply("log", &tuple);
        space.apply("log", &tuple);
        assert_eq!(space.get("log"), Some(&TupleValue::Bytes(vec![1, 1])));
    }

    #[test]
    fn test_publish_reaches_live_victims_only() {
        let (mut state, _) = state_for("a", "x");
        let (b, _) = peer(&mut state, "b", "x");
        let (c, _) = peer(&mut state, "c", "y");
        state.victims.mark_dead(c);

        let out = state.publish_tuple("cutoff", bound(4));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target, b);
        assert_eq!(state.tuples.get("cutoff"), Some(&TupleValue::Int(4)));
        assert_eq!(state.stats.tuple_updates, 1);

        let out = state.withdraw_tuple("cutoff");
        assert_eq!(out[0].message, Message::TupleRemove { key: "cutoff".into() });
        assert!(state.tuples.get("cutoff").is_none());
    }

    proptest! {
        #[test]
        fn prop_bound_idempotent_and_order_free(values in proptest::collection::vec(-1000i64..1000, 1..20)) {
            let mut forward = TupleSpace::new();
            let mut twice = TupleSpace::new();
            let mut backward = TupleSpace::new();
            for v in &values {
                forward.apply("b", &bound(*v));
                twice.apply("b", &bound(*v));
                twice.apply("b", &bound(*v));
            }
            for v in values.iter().rev() {
                backward.apply("b", &bound(*v));
            }
            let min = values.iter().copied().min();
            prop_assert_eq!(forward.get("b").and_then(TupleValue::as_int), min);
            prop_assert_eq!(twice.get("b"), forward.get("b"));
            prop_assert_eq!(backward.get("b"), forward.get("b"));
        }
    }
}
