//! Record dispatcher.
//!
//! The dispatcher is the single place where record mutations are acted on.
//! For every record version that arrives from the store it:
//! 1. routes status changes to registered observers
//! 2. executes the pending action if this node owns it
//! 3. republishes the mutated record (delete, then put)
//!
//! The republished version comes back through the store subscription and
//! drives the next action, so a batch advances one step per round trip.
//! Replaying a version whose effect is already applied is harmless: the
//! executor recognizes the effect on disk and only advances the record.

mod actions;

pub use actions::ActionExecutor;

use crate::blob::BlobStore;
use crate::store::{RecordChange, RecordStore, StoreError};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tandem_sync_core::{route, PathAliases, RecordError, RouteEvent, Subscription, TransferRecord};
use tandem_sync_types::{NodeId, TransactionId};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Dispatcher errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The record store failed.
    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    /// A record rejected a transition: a contract violation, never a
    /// runtime condition.
    #[error("invalid transition: {0}")]
    InvalidTransition(RecordError),

    /// A new record could not be built from the request.
    #[error("invalid request: {0}")]
    InvalidRequest(RecordError),

    /// No record with this id is stored.
    #[error("record not found: {0}")]
    NotFound(TransactionId),
}

/// Receives status changes of records it subscribed to.
///
/// Callbacks run on the dispatcher's task and must not block.
pub trait RecordObserver: Send + Sync {
    /// A source item under the subscribed path changed status.
    fn on_source_file_status_changed(&self, _record: &Arc<TransferRecord>, _index: usize) {}

    /// A destination item under the subscribed path changed status.
    fn on_destination_file_status_changed(&self, _record: &Arc<TransferRecord>, _index: usize) {}

    /// A delete-only item requested by the subscriber is gone.
    fn on_delete_transaction_success(&self, _record: &Arc<TransferRecord>, _index: usize) {}
}

/// Handle returned by [`Dispatcher::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

struct Registration {
    subscription: Subscription,
    observer: Arc<dyn RecordObserver>,
}

/// Executes locally-owned record actions and routes record changes.
pub struct Dispatcher {
    local_node: NodeId,
    store: Arc<dyn RecordStore>,
    executor: ActionExecutor,
    aliases: PathAliases,
    observers: DashMap<ObserverId, Registration>,
    next_id: AtomicU64,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("local_node", &self.local_node)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher for `local_node`.
    pub fn new(
        local_node: NodeId,
        store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        aliases: PathAliases,
    ) -> Self {
        Self {
            local_node,
            store,
            executor: ActionExecutor::new(blobs, aliases.clone()),
            aliases,
            observers: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// This node's id.
    pub fn local_node(&self) -> &NodeId {
        &self.local_node
    }

    /// The record store this dispatcher publishes to.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Path aliases used to resolve record paths.
    pub fn aliases(&self) -> &PathAliases {
        &self.aliases
    }

    // ===========================================
    // Observer registry
    // ===========================================

    /// Subscribe `observer` to record changes touching the logical `target`
    /// (file or directory) on `node`.
    pub fn register(
        &self,
        observer: Arc<dyn RecordObserver>,
        target: &str,
        node: NodeId,
    ) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Subscription::new(self.aliases.expand(target), node);
        debug!(
            ?id,
            target = %subscription.target.display(),
            node = %subscription.node,
            "observer registered"
        );
        self.observers.insert(
            id,
            Registration {
                subscription,
                observer,
            },
        );
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let removed = self.observers.remove(&id).is_some();
        if removed {
            debug!(?id, "observer unregistered");
        }
        removed
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Route `record` to every matching observer, in registration order.
    pub fn notify_observers(&self, record: &Arc<TransferRecord>) {
        let mut targets: Vec<_> = self
            .observers
            .iter()
            .map(|entry| {
                (
                    *entry.key(),
                    entry.subscription.clone(),
                    Arc::clone(&entry.observer),
                )
            })
            .collect();
        targets.sort_by_key(|(id, _, _)| *id);

        // Callbacks run without holding the registry, so observers may
        // unregister themselves.
        for (id, subscription, observer) in targets {
            for event in route(record, &subscription, &self.aliases) {
                debug!(?id, record = %record.id(), ?event, "routing record change");
                match event {
                    RouteEvent::SourceStatusChanged { index } => {
                        observer.on_source_file_status_changed(record, index)
                    }
                    RouteEvent::DestinationStatusChanged { index } => {
                        observer.on_destination_file_status_changed(record, index)
                    }
                    RouteEvent::DeleteTransactionSuccess { index } => {
                        observer.on_delete_transaction_success(record, index)
                    }
                }
            }
        }
    }

    // ===========================================
    // Record handling
    // ===========================================

    /// Handle one record version: notify, execute, republish.
    pub async fn handle_record(&self, record: Arc<TransferRecord>) -> Result<(), DispatchError> {
        self.notify_observers(&record);

        let Some(action) = record.pending_action() else {
            return Ok(());
        };
        if *record.action_owner(action) != self.local_node {
            return Ok(());
        }

        let mut next = (*record).clone();
        debug!(id = %next.id(), index = next.actionable_index(), ?action, "executing action");
        if let Err(e) = self.executor.execute(action, &mut next).await {
            error!(id = %next.id(), error = %e, "record rejected its own pending action");
            return Err(DispatchError::InvalidTransition(e));
        }
        self.publish(&next).await
    }

    /// Replace the stored value of `record`.
    pub async fn publish(&self, record: &TransferRecord) -> Result<(), DispatchError> {
        self.store.replace(record).await.map_err(|e| {
            warn!(id = %record.id(), error = %e, "failed to publish record");
            DispatchError::from(e)
        })
    }

    /// Re-dispatch every stored in-progress record.
    ///
    /// Used after reconnecting so actions missed meanwhile run now. Returns
    /// the number of records dispatched.
    pub async fn replay_all(&self) -> Result<usize, DispatchError> {
        let records = self.store.list().await?;
        let mut dispatched = 0;
        for record in records.into_iter().filter(TransferRecord::is_in_progress) {
            if let Err(e) = self.handle_record(Arc::new(record)).await {
                warn!(error = %e, "replay of record failed");
            }
            dispatched += 1;
        }
        info!(dispatched, "replayed stored records");
        Ok(dispatched)
    }

    /// Process store mutations until the subscription closes.
    pub async fn run(self: Arc<Self>, mut changes: broadcast::Receiver<RecordChange>) {
        loop {
            match changes.recv().await {
                Ok(RecordChange::Put(record)) => {
                    if let Err(e) = self.handle_record(record).await {
                        warn!(error = %e, "record dispatch failed");
                    }
                }
                Ok(RecordChange::Deleted(_)) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "dispatcher lagged behind record store, replaying");
                    if let Err(e) = self.replay_all().await {
                        warn!(error = %e, "replay after lag failed");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("record subscription closed");
    }

    // ===========================================
    // Requests
    // ===========================================

    /// Store a new copy (or move, with `delete_source`) record.
    pub async fn request_transfer(
        &self,
        items: Vec<String>,
        source_node: NodeId,
        destination_directory: &str,
        destination_node: NodeId,
        delete_source: bool,
    ) -> Result<TransferRecord, DispatchError> {
        let record = TransferRecord::transfer(
            items,
            source_node,
            destination_directory,
            destination_node,
            delete_source,
        )
        .map_err(DispatchError::InvalidRequest)?;
        self.store.put(&record).await?;
        info!(id = %record.id(), items = record.item_count(), delete_source, "transfer requested");
        Ok(record)
    }

    /// Store a new delete-only record. The destination names the observer
    /// that will be told when each item is gone.
    pub async fn request_delete(
        &self,
        items: Vec<String>,
        source_node: NodeId,
        destination_directory: &str,
        destination_node: NodeId,
    ) -> Result<TransferRecord, DispatchError> {
        let record =
            TransferRecord::delete(items, source_node, destination_directory, destination_node)
                .map_err(DispatchError::InvalidRequest)?;
        self.store.put(&record).await?;
        info!(id = %record.id(), items = record.item_count(), "delete requested");
        Ok(record)
    }

    /// Cancel an in-progress record.
    pub async fn cancel(&self, id: TransactionId) -> Result<TransferRecord, DispatchError> {
        let mut record = self
            .store
            .list()
            .await?
            .into_iter()
            .find(|r| r.id() == id)
            .ok_or(DispatchError::NotFound(id))?;
        record.cancel().map_err(|e| {
            error!(%id, error = %e, "cannot cancel record");
            DispatchError::InvalidTransition(e)
        })?;
        self.publish(&record).await?;
        info!(%id, "transfer canceled");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::store::MemoryRecordStore;
    use std::sync::Mutex;
    use std::time::Duration;
    use tandem_sync_types::TransferStatus;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(&'static str, usize, TransferStatus)>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<(&'static str, usize, TransferStatus)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl RecordObserver for Recorder {
        fn on_source_file_status_changed(&self, record: &Arc<TransferRecord>, index: usize) {
            self.events
                .lock()
                .unwrap()
                .push(("source", index, record.status()));
        }

        fn on_destination_file_status_changed(&self, record: &Arc<TransferRecord>, index: usize) {
            self.events
                .lock()
                .unwrap()
                .push(("destination", index, record.status()));
        }

        fn on_delete_transaction_success(&self, record: &Arc<TransferRecord>, index: usize) {
            self.events
                .lock()
                .unwrap()
                .push(("deleted", index, record.status()));
        }
    }

    fn node(id: &str) -> NodeId {
        NodeId::new(id)
    }

    fn dispatcher(
        local: &str,
        store: &MemoryRecordStore,
        blobs: &MemoryBlobStore,
    ) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            node(local),
            Arc::new(store.clone()),
            Arc::new(blobs.clone()),
            PathAliases::default(),
        ))
    }

    fn start(
        dispatcher: &Arc<Dispatcher>,
        store: &MemoryRecordStore,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Arc::clone(dispatcher).run(store.subscribe()))
    }

    async fn wait_for_status(
        store: &MemoryRecordStore,
        id: TransactionId,
        status: TransferStatus,
    ) -> TransferRecord {
        for _ in 0..200 {
            if let Some(record) = store.get(&id) {
                if record.status() == status {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("record {id} never reached {status:?}");
    }

    #[tokio::test]
    async fn two_nodes_complete_a_copy() {
        let store = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let file = src_dir.path().join("a.txt");
        std::fs::write(&file, b"payload").unwrap();

        let phone = dispatcher("phone", &store, &blobs);
        let watch = dispatcher("watch", &store, &blobs);
        let _p = start(&phone, &store);
        let _w = start(&watch, &store);

        let record = phone
            .request_transfer(
                vec![file.to_string_lossy().into_owned()],
                node("phone"),
                &dest_dir.path().to_string_lossy(),
                node("watch"),
                false,
            )
            .await
            .unwrap();

        let done = wait_for_status(&store, record.id(), TransferStatus::Complete).await;
        assert_eq!(done.actionable_index(), 1);
        assert_eq!(std::fs::read(dest_dir.path().join("a.txt")).unwrap(), b"payload");
        assert!(file.exists());
    }

    #[tokio::test]
    async fn move_removes_source_and_notifies_both_sides() {
        let store = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let file = src_dir.path().join("a.txt");
        std::fs::write(&file, b"payload").unwrap();

        let phone = dispatcher("phone", &store, &blobs);
        let watch = dispatcher("watch", &store, &blobs);
        let source_side = Arc::new(Recorder::default());
        let dest_side = Arc::new(Recorder::default());
        phone.register(source_side.clone(), &src_dir.path().to_string_lossy(), node("phone"));
        watch.register(dest_side.clone(), &dest_dir.path().to_string_lossy(), node("watch"));
        let _p = start(&phone, &store);
        let _w = start(&watch, &store);

        let record = phone
            .request_transfer(
                vec![file.to_string_lossy().into_owned()],
                node("phone"),
                &dest_dir.path().to_string_lossy(),
                node("watch"),
                true,
            )
            .await
            .unwrap();
        wait_for_status(&store, record.id(), TransferStatus::Complete).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!file.exists());
        assert!(dest_dir.path().join("a.txt").exists());

        let source_events = source_side.events();
        assert!(source_events.iter().all(|(side, index, _)| *side == "source" && *index == 0));
        assert_eq!(source_events.last().map(|e| e.2), Some(TransferStatus::Complete));

        let dest_events = dest_side.events();
        assert!(dest_events.iter().all(|(side, _, _)| *side == "destination"));
        assert_eq!(dest_events.last().map(|e| e.2), Some(TransferStatus::Complete));
    }

    #[tokio::test]
    async fn missing_source_fails_record() {
        let store = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let phone = dispatcher("phone", &store, &blobs);
        let _p = start(&phone, &store);

        let record = phone
            .request_transfer(
                vec!["/nonexistent/tandem/a.txt".into()],
                node("phone"),
                "/nonexistent/dest",
                node("watch"),
                false,
            )
            .await
            .unwrap();
        wait_for_status(&store, record.id(), TransferStatus::FailedFileNotFound).await;
    }

    #[tokio::test]
    async fn actions_owned_elsewhere_are_left_alone() {
        let store = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let tablet = dispatcher("tablet", &store, &blobs);

        let record = TransferRecord::transfer(
            vec!["/p/a.txt".into()],
            node("phone"),
            "/w",
            node("watch"),
            false,
        )
        .unwrap();
        tablet.handle_record(Arc::new(record.clone())).await.unwrap();
        assert!(store.is_empty());
        assert!(blobs.is_empty());
    }

    #[tokio::test]
    async fn delete_only_reports_success_to_observer() {
        let store = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("old.txt");
        std::fs::write(&file, b"x").unwrap();

        let watch = dispatcher("watch", &store, &blobs);
        let phone = dispatcher("phone", &store, &blobs);
        let recorder = Arc::new(Recorder::default());
        phone.register(recorder.clone(), "/phone/list", node("phone"));
        let _w = start(&watch, &store);
        let _p = start(&phone, &store);

        let record = phone
            .request_delete(
                vec![file.to_string_lossy().into_owned()],
                node("watch"),
                "/phone/list",
                node("phone"),
            )
            .await
            .unwrap();
        wait_for_status(&store, record.id(), TransferStatus::Complete).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!file.exists());
        let events = recorder.events();
        assert_eq!(events.first().map(|e| e.0), Some("destination"));
        assert_eq!(events.last().map(|e| e.0), Some("deleted"));
    }

    #[tokio::test]
    async fn unregistered_observer_hears_nothing() {
        let store = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let watch = dispatcher("watch", &store, &blobs);
        let recorder = Arc::new(Recorder::default());
        let id = watch.register(recorder.clone(), "/w", node("watch"));
        assert_eq!(watch.observer_count(), 1);
        assert!(watch.unregister(id));
        assert!(!watch.unregister(id));

        let record =
            TransferRecord::transfer(vec!["/p/a".into()], node("phone"), "/w", node("watch"), false)
                .unwrap();
        watch.notify_observers(&Arc::new(record));
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn cancel_republishes_canceled_record() {
        let store = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let phone = dispatcher("phone", &store, &blobs);
        let record = phone
            .request_transfer(vec!["/p/a".into()], node("watch"), "/d", node("tablet"), false)
            .await
            .unwrap();

        let canceled = phone.cancel(record.id()).await.unwrap();
        assert_eq!(canceled.status(), TransferStatus::Canceled);
        assert_eq!(store.get(&record.id()).unwrap().status(), TransferStatus::Canceled);

        assert!(matches!(
            phone.cancel(record.id()).await,
            Err(DispatchError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let store = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let phone = dispatcher("phone", &store, &blobs);
        let result = phone
            .request_transfer(vec![], node("phone"), "/d", node("watch"), false)
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidRequest(RecordError::EmptyBatch))));
    }

    #[tokio::test]
    async fn replay_executes_stored_records() {
        let store = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let src_dir = tempfile::tempdir().unwrap();
        let file = src_dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        let record = TransferRecord::transfer(
            vec![file.to_string_lossy().into_owned()],
            node("phone"),
            "/w",
            node("watch"),
            false,
        )
        .unwrap();
        store.put(&record).await.unwrap();

        // Not running: only the replay executes the copy.
        let phone = dispatcher("phone", &store, &blobs);
        assert_eq!(phone.replay_all().await.unwrap(), 1);
        assert!(store.get(&record.id()).unwrap().pending_save());
    }

    #[tokio::test]
    async fn offline_store_surfaces_error() {
        let store = MemoryRecordStore::new();
        let blobs = MemoryBlobStore::new();
        let phone = dispatcher("phone", &store, &blobs);
        store.set_offline(true);
        assert!(matches!(
            phone.replay_all().await,
            Err(DispatchError::Store(StoreError::Unavailable(_)))
        ));
    }
}
