//! Peer resolution and selection.
//!
//! The engine needs two facts about the network: which node it is, and which
//! paired nodes are reachable right now. When several are reachable, a
//! [`PeerSelection`] picks the one that receives auto-sync and default
//! transfers.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use tandem_sync_types::NodeId;
use thiserror::Error;

/// Peer resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    /// The peer list could not be obtained.
    #[error("peer list unavailable: {0}")]
    Unavailable(String),
}

/// Resolves the local node and currently connected peers.
#[async_trait]
pub trait PeerResolver: Send + Sync {
    /// This node's id.
    fn local_node(&self) -> NodeId;

    /// Ids of the paired nodes reachable right now, in connection order.
    async fn connected_peers(&self) -> Result<Vec<NodeId>, PeerError>;
}

/// A fixed (but mutable) peer list.
#[derive(Debug, Clone)]
pub struct StaticPeers {
    local: NodeId,
    peers: Arc<RwLock<Vec<NodeId>>>,
}

impl StaticPeers {
    /// Create a resolver for `local` with an initial peer list.
    pub fn new(local: NodeId, peers: Vec<NodeId>) -> Self {
        Self {
            local,
            peers: Arc::new(RwLock::new(peers)),
        }
    }

    /// Replace the connected peer list.
    pub fn set_peers(&self, peers: Vec<NodeId>) {
        // A poisoned lock still holds a whole list; keep serving it.
        *self.peers.write().unwrap_or_else(|e| e.into_inner()) = peers;
    }
}

#[async_trait]
impl PeerResolver for StaticPeers {
    fn local_node(&self) -> NodeId {
        self.local.clone()
    }

    async fn connected_peers(&self) -> Result<Vec<NodeId>, PeerError> {
        Ok(self.peers.read().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

/// Which connected peer to pick when there is more than one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStrategy {
    /// The first peer in connection order.
    #[default]
    First,
    /// The most recently connected peer.
    Last,
}

/// Peer selection policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSelection {
    /// Fallback strategy.
    pub strategy: PeerStrategy,
    /// Peer to use whenever it is connected.
    pub preferred: Option<NodeId>,
}

impl PeerSelection {
    /// Selection by strategy alone.
    pub fn new(strategy: PeerStrategy) -> Self {
        Self {
            strategy,
            preferred: None,
        }
    }

    /// Prefer `node` whenever it is connected.
    pub fn with_preferred(mut self, node: NodeId) -> Self {
        self.preferred = Some(node);
        self
    }

    /// Pick one of `peers`, or `None` if the list is empty.
    pub fn select(&self, peers: &[NodeId]) -> Option<NodeId> {
        if let Some(preferred) = &self.preferred {
            if peers.contains(preferred) {
                return Some(preferred.clone());
            }
        }
        match self.strategy {
            PeerStrategy::First => peers.first().cloned(),
            PeerStrategy::Last => peers.last().cloned(),
        }
    }
}
