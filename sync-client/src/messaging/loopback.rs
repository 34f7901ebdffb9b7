//! In-process messaging network.
//!
//! Every endpoint created from one [`LoopbackNetwork`] can reach every other
//! endpoint that is currently connected. Used by tests and by single-process
//! setups that run both nodes side by side.

use super::{InboundMessage, MessagingError, Messenger};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tandem_sync_types::NodeId;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of each endpoint's inbox.
const INBOX_CAPACITY: usize = 256;

struct Endpoint {
    inbox: broadcast::Sender<InboundMessage>,
    connected: bool,
}

/// Shared in-process network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    endpoints: Arc<DashMap<NodeId, Endpoint>>,
}

impl LoopbackNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node and return its messenger.
    ///
    /// Attaching an already-known node reconnects it and shares its inbox.
    pub fn endpoint(&self, node: NodeId) -> LoopbackMessenger {
        let mut entry = self.endpoints.entry(node.clone()).or_insert_with(|| {
            let (inbox, _) = broadcast::channel(INBOX_CAPACITY);
            Endpoint {
                inbox,
                connected: true,
            }
        });
        entry.connected = true;
        drop(entry);
        LoopbackMessenger {
            node,
            network: self.clone(),
        }
    }

    /// Make `node` unreachable until it is attached again.
    pub fn disconnect(&self, node: &NodeId) {
        if let Some(mut endpoint) = self.endpoints.get_mut(node) {
            endpoint.connected = false;
        }
    }

    /// Whether `node` is attached and connected.
    pub fn is_connected(&self, node: &NodeId) -> bool {
        self.endpoints.get(node).is_some_and(|e| e.connected)
    }

    fn deliver(&self, message: InboundMessage, to: &NodeId) -> Result<(), MessagingError> {
        let endpoint = self
            .endpoints
            .get(to)
            .ok_or_else(|| MessagingError::UnknownPeer(to.clone()))?;
        if !endpoint.connected {
            return Err(MessagingError::NotConnected(to.clone()));
        }
        // An endpoint nobody listens on drops the message, like a real peer
        // with no handler registered for the topic.
        let _ = endpoint.inbox.send(message);
        Ok(())
    }
}

/// One node's handle on a [`LoopbackNetwork`].
#[derive(Clone)]
pub struct LoopbackMessenger {
    node: NodeId,
    network: LoopbackNetwork,
}

impl LoopbackMessenger {
    /// The node this messenger sends from.
    pub fn node(&self) -> &NodeId {
        &self.node
    }
}

#[async_trait]
impl Messenger for LoopbackMessenger {
    async fn send(&self, to: &NodeId, topic: &str, payload: Vec<u8>) -> Result<(), MessagingError> {
        if !self.network.is_connected(&self.node) {
            return Err(MessagingError::Closed);
        }
        debug!(from = %self.node, to = %to, topic, bytes = payload.len(), "loopback send");
        self.network.deliver(
            InboundMessage {
                from: self.node.clone(),
                topic: topic.to_string(),
                payload,
            },
            to,
        )
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        match self.network.endpoints.get(&self.node) {
            Some(endpoint) => endpoint.inbox.subscribe(),
            None => {
                // Endpoint was never attached: hand out a receiver that closes
                // immediately.
                let (_, rx) = broadcast::channel(1);
                rx
            }
        }
    }
}
