//! Remote directory listing protocol.
//!
//! A directory view reconciles against the paired node by asking it for the
//! contents of the view's logical directory. Requests and responses travel
//! over the [`Messenger`]; responses are matched to waiting requests by
//! `(peer, directory)`, since the response echoes the requested directory.
//!
//! ```text
//! view ──ListFilesRequest{dir}──▶ peer responder
//!      ◀─ListFilesResponse{dir, outcome, files}──
//! ```

use crate::messaging::{InboundMessage, Messenger, MessagingError};
use crate::probe;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_sync_core::PathAliases;
use tandem_sync_types::{
    ListFilesRequest, ListFilesResponse, Message, NodeId, RemoteFile, TypesError,
    TOPIC_LIST_FILES_REQUEST, TOPIC_LIST_FILES_RESPONSE,
};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Listing errors. All of them mean "reconcile with local data only".
#[derive(Debug, Error)]
pub enum ListingError {
    /// No paired node is connected.
    #[error("no connected peer")]
    NoPeer,

    /// The peer does not have the directory.
    #[error("directory not found on peer: {0:?}")]
    DirectoryNotFound(Option<String>),

    /// The request could not be sent.
    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// A message could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] TypesError),

    /// No response within the configured timeout.
    #[error("listing request timed out")]
    Timeout,

    /// The client shut down while waiting.
    #[error("listing client closed")]
    Closed,
}

type Waiters = DashMap<(NodeId, Option<String>), Vec<(u64, oneshot::Sender<ListFilesResponse>)>>;

/// Sends listing requests and routes responses back to their callers.
pub struct ListingClient {
    messenger: Arc<dyn Messenger>,
    waiters: Arc<Waiters>,
    next_id: AtomicU64,
    timeout: Option<Duration>,
    task: JoinHandle<()>,
}

impl ListingClient {
    /// Start a client. `timeout` of `None` waits for a response indefinitely.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(messenger: Arc<dyn Messenger>, timeout: Option<Duration>) -> Self {
        let waiters: Arc<Waiters> = Arc::new(DashMap::new());
        let inbox = messenger.subscribe();
        let task = tokio::spawn(route_responses(inbox, Arc::clone(&waiters)));
        Self {
            messenger,
            waiters,
            next_id: AtomicU64::new(0),
            timeout,
            task,
        }
    }

    /// Ask `peer` for the contents of the logical `directory`.
    pub async fn request(
        &self,
        peer: &NodeId,
        directory: Option<String>,
    ) -> Result<Vec<RemoteFile>, ListingError> {
        let key = (peer.clone(), directory.clone());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(key.clone()).or_default().push((id, tx));

        let result = self.send_and_wait(peer, directory, rx).await;
        if result.is_err() {
            self.forget(&key, id);
        }
        let response = result?;
        if response.is_success() {
            Ok(response.files)
        } else {
            Err(ListingError::DirectoryNotFound(response.directory))
        }
    }

    async fn send_and_wait(
        &self,
        peer: &NodeId,
        directory: Option<String>,
        rx: oneshot::Receiver<ListFilesResponse>,
    ) -> Result<ListFilesResponse, ListingError> {
        let request = Message::ListFilesRequest(ListFilesRequest { directory });
        self.messenger
            .send(peer, request.topic(), request.to_bytes()?)
            .await?;

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(response) => response.map_err(|_| ListingError::Closed),
                Err(_) => Err(ListingError::Timeout),
            },
            None => rx.await.map_err(|_| ListingError::Closed),
        }
    }

    fn forget(&self, key: &(NodeId, Option<String>), id: u64) {
        if let Some(mut waiting) = self.waiters.get_mut(key) {
            waiting.retain(|(other, _)| *other != id);
        }
    }
}

impl Drop for ListingClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn route_responses(mut inbox: broadcast::Receiver<InboundMessage>, waiters: Arc<Waiters>) {
    loop {
        let message = match inbox.recv().await {
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "listing client lagged behind inbox");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if message.topic != TOPIC_LIST_FILES_RESPONSE {
            continue;
        }
        let response = match Message::from_bytes(&message.payload) {
            Ok(Message::ListFilesResponse(response)) => response,
            Ok(other) => {
                warn!(topic = %message.topic, ?other, "unexpected message on response topic");
                continue;
            }
            Err(e) => {
                warn!(from = %message.from, error = %e, "undecodable listing response");
                continue;
            }
        };
        let key = (message.from, response.directory.clone());
        let Some((_, waiting)) = waiters.remove(&key) else {
            debug!(peer = %key.0, directory = ?key.1, "listing response with no waiter");
            continue;
        };
        for (_, tx) in waiting {
            let _ = tx.send(response.clone());
        }
    }
}

/// Answers listing requests from paired nodes with local directory contents.
pub struct ListingResponder {
    task: JoinHandle<()>,
}

impl ListingResponder {
    /// Start answering requests arriving on `messenger`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(messenger: Arc<dyn Messenger>, aliases: PathAliases) -> Self {
        let inbox = messenger.subscribe();
        let task = tokio::spawn(serve(inbox, messenger, aliases));
        Self { task }
    }
}

impl Drop for ListingResponder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut inbox: broadcast::Receiver<InboundMessage>,
    messenger: Arc<dyn Messenger>,
    aliases: PathAliases,
) {
    loop {
        let message = match inbox.recv().await {
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "listing responder lagged behind inbox");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if message.topic != TOPIC_LIST_FILES_REQUEST {
            continue;
        }
        let request = match Message::from_bytes(&message.payload) {
            Ok(Message::ListFilesRequest(request)) => request,
            Ok(_) | Err(_) => {
                warn!(from = %message.from, "malformed listing request");
                continue;
            }
        };

        let response = Message::ListFilesResponse(list_local(&aliases, request.directory).await);
        let payload = match response.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode listing response");
                continue;
            }
        };
        if let Err(e) = messenger.send(&message.from, response.topic(), payload).await {
            warn!(to = %message.from, error = %e, "failed to send listing response");
        }
    }
}

/// Build the response for a request on the logical `directory`.
pub async fn list_local(aliases: &PathAliases, directory: Option<String>) -> ListFilesResponse {
    let Some(path) = aliases.expand_or_default(directory.as_deref()) else {
        return ListFilesResponse::not_found(directory);
    };
    if !probe::is_directory(&path).await {
        return ListFilesResponse::not_found(directory);
    }
    match probe::scan(&path).await {
        Ok(entries) => {
            let files = entries
                .into_iter()
                .filter_map(|meta| {
                    let name = meta.name()?.to_string();
                    Some(RemoteFile {
                        name,
                        is_directory: meta.is_directory,
                    })
                })
                .collect();
            ListFilesResponse::success(directory, files)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to list directory");
            ListFilesResponse::not_found(directory)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::LoopbackNetwork;

    fn node(id: &str) -> NodeId {
        NodeId::new(id)
    }

    #[tokio::test]
    async fn lists_remote_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("Sub")).unwrap();

        let net = LoopbackNetwork::new();
        let client = ListingClient::start(Arc::new(net.endpoint(node("phone"))), None);
        let _responder = ListingResponder::start(
            Arc::new(net.endpoint(node("watch"))),
            PathAliases::default(),
        );

        let logical = dir.path().to_string_lossy().into_owned();
        let mut files = client.request(&node("watch"), Some(logical)).await.unwrap();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            files,
            vec![
                RemoteFile {
                    name: "Sub".into(),
                    is_directory: true
                },
                RemoteFile {
                    name: "a.txt".into(),
                    is_directory: false
                },
            ]
        );
    }

    #[tokio::test]
    async fn missing_directory_is_not_found() {
        let net = LoopbackNetwork::new();
        let client = ListingClient::start(Arc::new(net.endpoint(node("phone"))), None);
        let _responder = ListingResponder::start(
            Arc::new(net.endpoint(node("watch"))),
            PathAliases::default(),
        );

        let result = client
            .request(&node("watch"), Some("/definitely/not/here".into()))
            .await;
        assert!(matches!(result, Err(ListingError::DirectoryNotFound(_))));
    }

    #[tokio::test]
    async fn unset_default_directory_is_not_found() {
        let response = list_local(&PathAliases::default(), None).await;
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn unreachable_peer_fails_fast() {
        let net = LoopbackNetwork::new();
        let client = ListingClient::start(Arc::new(net.endpoint(node("phone"))), None);
        let result = client.request(&node("watch"), None).await;
        assert!(matches!(result, Err(ListingError::Messaging(_))));
        assert!(client.waiters.iter().all(|w| w.value().is_empty()));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let net = LoopbackNetwork::new();
        let client = ListingClient::start(
            Arc::new(net.endpoint(node("phone"))),
            Some(Duration::from_millis(20)),
        );
        // Attached but nobody answers.
        let _silent = net.endpoint(node("watch"));
        let result = client.request(&node("watch"), None).await;
        assert!(matches!(result, Err(ListingError::Timeout)));
    }
}
