//! Outbound message channels.
//!
//! A channel is the transport's handle to one peer. Delivery is reliable and
//! ordered per channel; a failed send surfaces as a `TransportError`.

use crate::protocol::Message;
use async_trait::async_trait;
use spawnweave_core::NodeId;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Message could not be encoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Node unavailable
    #[error("Node unavailable: {0}")]
    NodeUnavailable(NodeId),
}

/// Outbound channel to one peer
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Peer this channel delivers to
    fn target(&self) -> NodeId;

    /// Send one message and return the number of bytes written
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the peer is unreachable
    async fn send(&self, message: &Message) -> Result<u64, TransportError>;
}
