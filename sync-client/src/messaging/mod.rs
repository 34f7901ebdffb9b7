//! Point-to-point messaging between paired nodes.
//!
//! The messaging channel carries opaque payloads under a topic string. The
//! directory listing protocol in [`crate::listing`] is the only user.

mod loopback;

pub use loopback::{LoopbackMessenger, LoopbackNetwork};

use async_trait::async_trait;
use tandem_sync_types::NodeId;
use thiserror::Error;
use tokio::sync::broadcast;

/// Messaging errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagingError {
    /// The target node is not known to the network.
    #[error("unknown peer: {0}")]
    UnknownPeer(NodeId),

    /// The target node is known but not reachable.
    #[error("peer not connected: {0}")]
    NotConnected(NodeId),

    /// The local endpoint has been shut down.
    #[error("messaging channel closed")]
    Closed,
}

/// A message received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sending node.
    pub from: NodeId,
    /// Topic the payload was sent under.
    pub topic: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

/// Sends and receives point-to-point messages.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send `payload` under `topic` to node `to`.
    async fn send(&self, to: &NodeId, topic: &str, payload: Vec<u8>) -> Result<(), MessagingError>;

    /// Stream of messages addressed to this node.
    fn subscribe(&self) -> broadcast::Receiver<InboundMessage>;
}
