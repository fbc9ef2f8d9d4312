//! Identifiers for SPAWNWEAVE nodes and clusters.
//!
//! Node identities are UUIDs; named nodes use name-based (v5) UUIDs so that
//! the same name always maps to the same identity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Node identifier - identifies one process taking part in a computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Create a new random NodeId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from UUID bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Create from name (for named nodes)
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes()))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short form used in log lines
    #[must_use]
    pub fn short(&self) -> String {
        let simple = self.0.simple().to_string();
        simple[..8].to_string()
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node_{}", self.short())
    }
}

/// Cluster name - the locality group a node belongs to.
///
/// Two nodes are intra-cluster peers iff their cluster names are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterName(String);

impl ClusterName {
    /// Create a cluster name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClusterName {
    fn default() -> Self {
        Self::new("default")
    }
}

impl From<&str> for ClusterName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl std::fmt::Display for ClusterName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_creation() {
        let node_id = NodeId::new();
        assert_ne!(node_id, NodeId::new());
    }

    #[test]
    fn test_id_from_bytes() {
        let bytes = [1u8; 16];
        let id = NodeId::from_bytes(bytes);
        assert_eq!(id.as_bytes(), &bytes);
    }

    #[test]
    fn test_id_display() {
        let id = NodeId::new();
        let s = format!("{}", id);
        assert!(s.starts_with("node_"));
        assert_eq!(s.len(), "node_".len() + 8);
    }

    #[test]
    fn test_node_id_from_name() {
        let id1 = NodeId::from_name("test_node");
        let id2 = NodeId::from_name("test_node");
        assert_eq!(id1, id2);

        let id3 = NodeId::from_name("other_node");
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_cluster_name() {
        let x = ClusterName::from("x");
        assert_eq!(x.as_str(), "x");
        assert_eq!(x, ClusterName::new("x".to_string()));
        assert_ne!(x, ClusterName::from("y"));
        assert_eq!(ClusterName::default().as_str(), "default");
    }
}
