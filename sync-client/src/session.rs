//! The owning session.
//!
//! A [`Session`] wires one node's collaborators together: it owns the
//! [`Dispatcher`] (and its observer registry), answers listing requests from
//! the paired node, and creates directory views. Dropping the session stops
//! its background tasks.

use crate::blob::BlobStore;
use crate::config::{Config, ConfigError};
use crate::dispatcher::{DispatchError, Dispatcher, ObserverId, RecordObserver};
use crate::listing::{ListingClient, ListingResponder};
use crate::messaging::Messenger;
use crate::peers::{PeerError, PeerResolver};
use crate::store::RecordStore;
use crate::view::{DirectoryView, ViewContext, ViewError, ViewOptions};
use crate::watch::{NotifyWatchSource, WatchSource};
use std::sync::Arc;
use tandem_sync_core::TransferRecord;
use tandem_sync_types::{NodeId, TransactionId};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

/// Errors surfaced by the session API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Record dispatch failed.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// A view could not be created.
    #[error("view error: {0}")]
    View(#[from] ViewError),

    /// Peers could not be resolved.
    #[error("peer error: {0}")]
    Peers(#[from] PeerError),

    /// No paired node is connected.
    #[error("no connected peer")]
    NoPeer,
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    peers: Arc<dyn PeerResolver>,
    store: Arc<dyn RecordStore>,
    messenger: Arc<dyn Messenger>,
    blobs: Arc<dyn BlobStore>,
    watch_source: Arc<dyn WatchSource>,
    config: Config,
}

impl SessionBuilder {
    /// Use `config` instead of the defaults.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Watch directories with `source` instead of the platform watcher.
    pub fn with_watch_source(mut self, source: Arc<dyn WatchSource>) -> Self {
        self.watch_source = source;
        self
    }

    /// Start the session's background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<Session, ClientError> {
        let aliases = self.config.aliases()?;
        let local_node = self.peers.local_node();
        let dispatcher = Arc::new(Dispatcher::new(
            local_node.clone(),
            Arc::clone(&self.store),
            self.blobs,
            aliases.clone(),
        ));

        let changes = self.store.subscribe();
        let dispatch_task = tokio::spawn(Arc::clone(&dispatcher).run(changes));
        let listing = Arc::new(ListingClient::start(
            Arc::clone(&self.messenger),
            self.config.listing_timeout(),
        ));
        let responder = ListingResponder::start(self.messenger, aliases);

        info!(node = %local_node, "session started");
        Ok(Session {
            views: ViewContext {
                dispatcher: Arc::clone(&dispatcher),
                listing,
                peers: self.peers,
                selection: self.config.peer_selection(),
                watch_source: self.watch_source,
            },
            dispatcher,
            _responder: responder,
            dispatch_task,
        })
    }
}

/// One node's sync engine.
pub struct Session {
    dispatcher: Arc<Dispatcher>,
    views: ViewContext,
    _responder: ListingResponder,
    dispatch_task: JoinHandle<()>,
}

impl Session {
    /// Start building a session from its collaborators.
    pub fn builder(
        peers: Arc<dyn PeerResolver>,
        store: Arc<dyn RecordStore>,
        messenger: Arc<dyn Messenger>,
        blobs: Arc<dyn BlobStore>,
    ) -> SessionBuilder {
        SessionBuilder {
            peers,
            store,
            messenger,
            blobs,
            watch_source: Arc::new(NotifyWatchSource::new()),
            config: Config::default(),
        }
    }

    /// This node's id.
    pub fn local_node(&self) -> &NodeId {
        self.dispatcher.local_node()
    }

    /// The session's dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Observe the logical `directory`.
    pub async fn observe(
        &self,
        directory: &str,
        options: ViewOptions,
    ) -> Result<DirectoryView, ClientError> {
        Ok(DirectoryView::observe(&self.views, directory, options).await?)
    }

    /// Copy (or move) `items` from `source_node` to `destination_directory`
    /// on `destination_node`.
    pub async fn request_transfer(
        &self,
        items: Vec<String>,
        source_node: NodeId,
        destination_directory: &str,
        destination_node: NodeId,
        delete_source: bool,
    ) -> Result<TransferRecord, ClientError> {
        Ok(self
            .dispatcher
            .request_transfer(
                items,
                source_node,
                destination_directory,
                destination_node,
                delete_source,
            )
            .await?)
    }

    /// Send local `items` to the selected connected peer.
    pub async fn transfer_to_peer(
        &self,
        items: Vec<String>,
        destination_directory: &str,
        delete_source: bool,
    ) -> Result<TransferRecord, ClientError> {
        let peers = self.views.peers.connected_peers().await?;
        let peer = self
            .views
            .selection
            .select(&peers)
            .ok_or(ClientError::NoPeer)?;
        self.request_transfer(
            items,
            self.local_node().clone(),
            destination_directory,
            peer,
            delete_source,
        )
        .await
    }

    /// Delete `items` on `source_node`; the observer at
    /// `destination_directory` on `destination_node` is told when each is gone.
    pub async fn request_delete(
        &self,
        items: Vec<String>,
        source_node: NodeId,
        destination_directory: &str,
        destination_node: NodeId,
    ) -> Result<TransferRecord, ClientError> {
        Ok(self
            .dispatcher
            .request_delete(items, source_node, destination_directory, destination_node)
            .await?)
    }

    /// Cancel an in-progress transfer.
    pub async fn cancel_transfer(&self, id: TransactionId) -> Result<TransferRecord, ClientError> {
        Ok(self.dispatcher.cancel(id).await?)
    }

    /// Subscribe `observer` to records touching the logical `target` on `node`.
    pub fn register_listener(
        &self,
        observer: Arc<dyn RecordObserver>,
        target: &str,
        node: NodeId,
    ) -> ObserverId {
        self.dispatcher.register(observer, target, node)
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unregister_listener(&self, id: ObserverId) -> bool {
        self.dispatcher.unregister(id)
    }

    /// Re-dispatch stored records after a peer (re)connects.
    pub async fn on_peer_connected(&self) -> Result<usize, ClientError> {
        Ok(self.dispatcher.replay_all().await?)
    }

    /// Stop background tasks.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispatch_task.abort();
        info!(node = %self.dispatcher.local_node(), "session stopped");
    }
}
