//! Content-addressed payload storage.
//!
//! Between a source's copy and the destination's save, an item's bytes live
//! in a blob store under their BLAKE3 hash. The record carries only the
//! [`BlobRef`].

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tandem_sync_types::BlobRef;
use thiserror::Error;

/// Blob store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    /// No blob stored under this reference.
    #[error("blob not found: {0}")]
    NotFound(BlobRef),

    /// Backend failure.
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

/// Payload transfer between nodes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes and return their content address.
    async fn put(&self, bytes: Vec<u8>) -> Result<BlobRef, BlobError>;

    /// Fetch bytes by content address.
    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError>;
}

/// In-memory blob store.
///
/// Clones share storage. Contents are verified against their hash on read.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<DashMap<BlobRef, Arc<Vec<u8>>>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

fn content_address(bytes: &[u8]) -> BlobRef {
    BlobRef::from_hash(*blake3::hash(bytes).as_bytes())
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<BlobRef, BlobError> {
        let blob = content_address(&bytes);
        self.blobs.insert(blob, Arc::new(bytes));
        Ok(blob)
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        let bytes = self
            .blobs
            .get(blob)
            .map(|b| Arc::clone(b.value()))
            .ok_or(BlobError::NotFound(*blob))?;
        if content_address(&bytes) != *blob {
            return Err(BlobError::Unavailable(format!("corrupted blob {blob}")));
        }
        Ok(bytes.as_ref().clone())
    }
}
