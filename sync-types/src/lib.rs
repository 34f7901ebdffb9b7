//! # sync-types
//!
//! Wire format types for Tandem paired-directory sync.
//!
//! This crate provides the foundational types shared by every Tandem crate:
//! - [`NodeId`], [`TransactionId`], [`BlobRef`] - Identity types
//! - [`TransferStatus`] - Overall status of a replicated transfer record
//! - [`Message`] - Point-to-point messages (directory listing protocol)
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;
mod status;

pub use error::TypesError;
pub use ids::{BlobRef, NodeId, TransactionId};
pub use messages::{
    ListFilesRequest, ListFilesResponse, ListOutcome, Message, RemoteFile,
    TOPIC_LIST_FILES_REQUEST, TOPIC_LIST_FILES_RESPONSE,
};
pub use status::TransferStatus;
