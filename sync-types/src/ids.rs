//! Identity types for Tandem.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node (device) in a paired sync network.
///
/// Opaque to Tandem: the peer layer hands these out and compares them
/// byte-for-byte.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a NodeId from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Globally unique identifier of a transfer record.
///
/// The high 64 bits hold the creation time in Unix milliseconds, the low
/// 64 bits a random salt, so ids from different nodes never collide and
/// still sort roughly by creation time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(uuid::Uuid);

impl TransactionId {
    /// Generate a new id from the current time and a random salt.
    pub fn generate() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut salt = [0u8; 8];
        getrandom::getrandom(&mut salt).expect("getrandom failed");
        Self(uuid::Uuid::from_u64_pair(millis, u64::from_le_bytes(salt)))
    }

    /// Build an id from explicit parts.
    pub fn from_parts(created_millis: u64, salt: u64) -> Self {
        Self(uuid::Uuid::from_u64_pair(created_millis, salt))
    }

    /// Creation time in Unix milliseconds.
    pub fn created_millis(&self) -> u64 {
        self.0.as_u64_pair().0
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

/// Reference to an in-flight file payload held by the blob layer.
///
/// The BLAKE3 hash of the payload bytes; present on a record only between
/// the source reading an item and the destination saving it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef([u8; 32]);

impl BlobRef {
    /// Create a BlobRef from a content hash.
    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// Get the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({})", &self.to_string()[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display_is_raw_string() {
        let id = NodeId::new("watch-42");
        assert_eq!(id.to_string(), "watch-42");
        assert_eq!(id.as_str(), "watch-42");
    }

    #[test]
    fn node_id_serializes_transparently() {
        let id = NodeId::from("phone");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"phone\"");
    }

    #[test]
    fn transaction_ids_are_unique() {
        let a = TransactionId::generate();
        let b = TransactionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn transaction_id_carries_creation_time() {
        let id = TransactionId::from_parts(1_705_000_000_000, 7);
        assert_eq!(id.created_millis(), 1_705_000_000_000);
    }

    #[test]
    fn transaction_ids_order_by_creation_time() {
        let early = TransactionId::from_parts(1000, u64::MAX);
        let late = TransactionId::from_parts(2000, 0);
        assert!(early < late);
    }

    #[test]
    fn blob_ref_displays_as_hex() {
        let blob = BlobRef::from_hash([0xAB; 32]);
        assert_eq!(blob.to_string().len(), 64);
        assert!(blob.to_string().starts_with("abab"));
    }
}
