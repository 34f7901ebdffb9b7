//! Replicated record store abstraction.
//!
//! Transfer records propagate between paired nodes through a replicated
//! key/value store. Tandem only needs four primitives from it:
//! - `list()` every stored record
//! - `put()` a whole record
//! - `delete()` a record by id
//! - `subscribe()` to a stream of mutations (from any node)
//!
//! There is no partial update. Changing a record means replacing it:
//! delete the old value, then put the new one ([`RecordStore::replace`]).

mod memory;

pub use memory::MemoryRecordStore;

use async_trait::async_trait;
use std::sync::Arc;
use tandem_sync_core::TransferRecord;
use tandem_sync_types::{TransactionId, TypesError};
use thiserror::Error;
use tokio::sync::broadcast;

/// Record store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No connection to the store.
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be encoded or decoded.
    #[error("record encoding failed: {0}")]
    Encoding(#[from] TypesError),
}

/// A mutation observed on the store.
#[derive(Debug, Clone)]
pub enum RecordChange {
    /// A record was inserted.
    Put(Arc<TransferRecord>),
    /// A record was removed.
    Deleted(TransactionId),
}

/// Replicated storage for transfer records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every record currently stored.
    async fn list(&self) -> Result<Vec<TransferRecord>, StoreError>;

    /// Insert a whole record under its id.
    async fn put(&self, record: &TransferRecord) -> Result<(), StoreError>;

    /// Remove a record. Removing an absent record is not an error.
    async fn delete(&self, id: TransactionId) -> Result<(), StoreError>;

    /// Stream of mutations made by any node.
    fn subscribe(&self) -> broadcast::Receiver<RecordChange>;

    /// Publish a new version of a record: delete the old value, then put.
    async fn replace(&self, record: &TransferRecord) -> Result<(), StoreError> {
        self.delete(record.id()).await?;
        self.put(record).await
    }
}
