//! Error types for Tandem wire types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Unknown transfer status code
    #[error("invalid transfer status: {0}")]
    InvalidStatus(u8),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}
