//! In-memory record store.
//!
//! Clones share state, so handing one clone to each in-process node
//! behaves like a replicated store: every node sees every mutation.

use super::{RecordChange, RecordStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tandem_sync_core::TransferRecord;
use tandem_sync_types::TransactionId;
use tokio::sync::broadcast;

/// Capacity of the mutation broadcast channel.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// In-memory replicated record store for tests and single-process setups.
///
/// Records are kept in their encoded wire form so every read exercises the
/// same decoding a real replicated store would.
#[derive(Debug, Clone)]
pub struct MemoryRecordStore {
    inner: Arc<MemoryRecordStoreInner>,
}

#[derive(Debug)]
struct MemoryRecordStoreInner {
    records: DashMap<TransactionId, Vec<u8>>,
    changes: broadcast::Sender<RecordChange>,
    offline: AtomicBool,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MemoryRecordStoreInner {
                records: DashMap::new(),
                changes,
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// Simulate losing (or regaining) the store connection.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    /// Fetch one record by id.
    pub fn get(&self, id: &TransactionId) -> Option<TransferRecord> {
        self.inner
            .records
            .get(id)
            .and_then(|bytes| TransferRecord::from_bytes(bytes.value()).ok())
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list(&self) -> Result<Vec<TransferRecord>, StoreError> {
        self.check_online()?;
        let mut records = self
            .inner
            .records
            .iter()
            .map(|entry| TransferRecord::from_bytes(entry.value()))
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by_key(|r| r.id());
        Ok(records)
    }

    async fn put(&self, record: &TransferRecord) -> Result<(), StoreError> {
        self.check_online()?;
        let bytes = record.to_bytes()?;
        self.inner.records.insert(record.id(), bytes);
        // No subscribers is fine: the value is still stored.
        let _ = self
            .inner
            .changes
            .send(RecordChange::Put(Arc::new(record.clone())));
        Ok(())
    }

    async fn delete(&self, id: TransactionId) -> Result<(), StoreError> {
        self.check_online()?;
        if self.inner.records.remove(&id).is_some() {
            let _ = self.inner.changes.send(RecordChange::Deleted(id));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.inner.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_sync_types::{NodeId, TransferStatus};

    fn record() -> TransferRecord {
        TransferRecord::transfer(
            vec!["/src/a.txt".into()],
            NodeId::new("phone"),
            "/dest",
            NodeId::new("watch"),
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn put_then_list() {
        let store = MemoryRecordStore::new();
        let rec = record();
        store.put(&rec).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed, vec![rec]);
    }

    #[tokio::test]
    async fn subscribers_see_puts_and_deletes() {
        let store = MemoryRecordStore::new();
        let mut changes = store.subscribe();
        let rec = record();

        store.put(&rec).await.unwrap();
        store.delete(rec.id()).await.unwrap();

        assert!(matches!(
            changes.recv().await.unwrap(),
            RecordChange::Put(r) if r.id() == rec.id()
        ));
        assert!(matches!(
            changes.recv().await.unwrap(),
            RecordChange::Deleted(id) if id == rec.id()
        ));
    }

    #[tokio::test]
    async fn replace_deletes_then_puts() {
        let store = MemoryRecordStore::new();
        let mut rec = record();
        store.put(&rec).await.unwrap();
        let mut changes = store.subscribe();

        rec.fail(tandem_sync_core::Failure::Unknown).unwrap();
        store.replace(&rec).await.unwrap();

        assert!(matches!(changes.recv().await.unwrap(), RecordChange::Deleted(_)));
        assert!(matches!(changes.recv().await.unwrap(), RecordChange::Put(_)));
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(&rec.id()).unwrap().status(),
            TransferStatus::FailedUnknown
        );
    }

    #[tokio::test]
    async fn deleting_absent_record_is_silent() {
        let store = MemoryRecordStore::new();
        let mut changes = store.subscribe();
        store.delete(record().id()).await.unwrap();
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let a = MemoryRecordStore::new();
        let b = a.clone();
        a.put(&record()).await.unwrap();
        assert_eq!(b.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn offline_store_fails() {
        let store = MemoryRecordStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.list().await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.put(&record()).await.is_err());
        store.set_offline(false);
        assert!(store.list().await.is_ok());
    }
}
