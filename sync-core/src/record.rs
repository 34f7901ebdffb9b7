//! Transfer record state machine for Tandem.
//!
//! A [`TransferRecord`] describes one batch of copy and/or delete operations
//! between two nodes. The batch advances one item at a time through a single
//! cursor (`actionable_index`), so one replicated object carries a whole move
//! or multi-file copy with deterministic ordering.
//!
//! For the current item exactly one [`PendingAction`] is legal, derived from
//! the record's flags and history:
//!
//! ```text
//! Copy   : should_copy && !has_copied && blob == None     (owner: source)
//! Save   : should_copy && !has_copied && blob != None     (owner: destination)
//! Delete : (!should_copy || has_copied) && should_delete
//!          && !has_deleted                                 (owner: source)
//! ```
//!
//! Because the action is a pure function of applied state, re-delivering a
//! record that already reflects an action derives the next action instead of
//! repeating the old one.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tandem_sync_types::{BlobRef, NodeId, TransactionId, TransferStatus, TypesError};
use thiserror::Error;

/// Prefix of the store key under which records are replicated.
const STORE_KEY_PREFIX: &str = "/tandem_transaction_";

/// Errors raised by record construction and state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// A record needs at least one item.
    #[error("transfer record must contain at least one item")]
    EmptyBatch,

    /// A transition was attempted that the record's state does not allow.
    ///
    /// This is a contract violation by the caller, never a runtime condition.
    #[error("invalid transition `{operation}` on record {id}: {reason}")]
    InvalidTransition {
        /// Record the transition was attempted on.
        id: TransactionId,
        /// The attempted operation.
        operation: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// The single action the current item is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingAction {
    /// Source must read the item and attach a payload.
    Copy,
    /// Destination must save the attached payload.
    Save,
    /// Source must delete the item.
    Delete,
}

/// Terminal failure reasons a participant can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Failure {
    /// Source item missing or is a directory.
    FileNotFound,
    /// Destination directory path is occupied by a non-directory.
    BadDestination,
    /// Destination holds a different file with the same name.
    FileAlreadyExists,
    /// Source item cannot be read.
    NoReadPermission,
    /// Source item could not be deleted.
    NoDeletePermission,
    /// Anything else.
    Unknown,
}

impl From<Failure> for TransferStatus {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::FileNotFound => TransferStatus::FailedFileNotFound,
            Failure::BadDestination => TransferStatus::FailedBadDestination,
            Failure::FileAlreadyExists => TransferStatus::FailedFileAlreadyExists,
            Failure::NoReadPermission => TransferStatus::FailedNoReadPermission,
            Failure::NoDeletePermission => TransferStatus::FailedNoDeletePermission,
            Failure::Unknown => TransferStatus::FailedUnknown,
        }
    }
}

/// One replicated batch of file operations between two nodes.
///
/// Fields are private: the only way to change a record is through the
/// transition methods, which uphold `status == Complete` iff
/// `actionable_index == item_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    id: TransactionId,
    items: Vec<String>,
    source_node: NodeId,
    destination_node: NodeId,
    destination_directory: String,
    should_copy: bool,
    should_delete: bool,
    delete_only: bool,
    actionable_index: usize,
    has_copied: bool,
    has_deleted: bool,
    blob: Option<BlobRef>,
    status: TransferStatus,
}

impl TransferRecord {
    /// Create a copy (or move, with `delete_source`) of `items` from
    /// `source_node` into `destination_directory` on `destination_node`.
    pub fn transfer(
        items: Vec<String>,
        source_node: NodeId,
        destination_directory: impl Into<String>,
        destination_node: NodeId,
        delete_source: bool,
    ) -> Result<Self, RecordError> {
        Self::build(
            items,
            source_node,
            destination_directory.into(),
            destination_node,
            true,
            delete_source,
            false,
        )
    }

    /// Create a delete-only batch removing `items` on `source_node`.
    ///
    /// The destination names the observer that asked for the delete, so the
    /// observer's view learns when each item is gone.
    pub fn delete(
        items: Vec<String>,
        source_node: NodeId,
        observer_directory: impl Into<String>,
        observer_node: NodeId,
    ) -> Result<Self, RecordError> {
        Self::build(
            items,
            source_node,
            observer_directory.into(),
            observer_node,
            false,
            true,
            true,
        )
    }

    fn build(
        items: Vec<String>,
        source_node: NodeId,
        destination_directory: String,
        destination_node: NodeId,
        should_copy: bool,
        should_delete: bool,
        delete_only: bool,
    ) -> Result<Self, RecordError> {
        if items.is_empty() {
            return Err(RecordError::EmptyBatch);
        }
        Ok(Self {
            id: TransactionId::generate(),
            items,
            source_node,
            destination_node,
            destination_directory,
            should_copy,
            should_delete,
            delete_only,
            actionable_index: 0,
            has_copied: false,
            has_deleted: false,
            blob: None,
            status: TransferStatus::InProgress,
        })
    }

    // ===========================================
    // Accessors
    // ===========================================

    /// Globally unique id of this record.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Key under which the record lives in the replicated store.
    pub fn store_key(&self) -> String {
        format!("{}{}", STORE_KEY_PREFIX, self.id)
    }

    /// Whether a store key names a transfer record.
    pub fn is_record_key(key: &str) -> bool {
        key.starts_with(STORE_KEY_PREFIX)
    }

    /// Logical source paths, in processing order.
    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// Number of items in the batch.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Logical source path of one item.
    pub fn item(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(String::as_str)
    }

    /// File name of one item (its last path component).
    pub fn item_file_name(&self, index: usize) -> Option<&str> {
        self.item(index)
            .and_then(|item| Path::new(item).file_name())
            .and_then(|name| name.to_str())
    }

    /// Node that holds the source items.
    pub fn source_node(&self) -> &NodeId {
        &self.source_node
    }

    /// Node that receives the copies (or observes the delete).
    pub fn destination_node(&self) -> &NodeId {
        &self.destination_node
    }

    /// Logical destination directory.
    pub fn destination_directory(&self) -> &str {
        &self.destination_directory
    }

    /// Whether items are copied.
    pub fn should_copy(&self) -> bool {
        self.should_copy
    }

    /// Whether source items are deleted (after copying, if copying).
    pub fn should_delete(&self) -> bool {
        self.should_delete
    }

    /// Whether this batch only deletes.
    pub fn is_delete_only(&self) -> bool {
        self.delete_only
    }

    /// Cursor of the next item requiring action.
    pub fn actionable_index(&self) -> usize {
        self.actionable_index
    }

    /// Whether the current item has been saved at the destination.
    pub fn has_copied(&self) -> bool {
        self.has_copied
    }

    /// Whether the current item has been deleted at the source.
    pub fn has_deleted(&self) -> bool {
        self.has_deleted
    }

    /// Payload of the current item, between copy and save.
    pub fn blob(&self) -> Option<BlobRef> {
        self.blob
    }

    /// Overall status.
    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Whether the record can still advance.
    pub fn is_in_progress(&self) -> bool {
        self.status == TransferStatus::InProgress
    }

    /// Whether the item at `index` has been fully processed.
    pub fn is_item_complete(&self, index: usize) -> bool {
        self.status == TransferStatus::Complete || index < self.actionable_index
    }

    /// Whether the item at `index` has been deleted at the source.
    pub fn is_item_deleted(&self, index: usize) -> bool {
        self.should_delete
            && (index < self.actionable_index
                || (index == self.actionable_index && self.has_deleted))
    }

    // ===========================================
    // Derived pending action
    // ===========================================

    fn has_current_item(&self) -> bool {
        self.is_in_progress() && self.actionable_index < self.items.len()
    }

    /// Source must read the current item.
    pub fn pending_copy(&self) -> bool {
        self.has_current_item() && self.should_copy && !self.has_copied && self.blob.is_none()
    }

    /// Destination must save the attached payload.
    pub fn pending_save(&self) -> bool {
        self.has_current_item() && self.should_copy && !self.has_copied && self.blob.is_some()
    }

    /// Source must delete the current item.
    pub fn pending_delete(&self) -> bool {
        self.has_current_item()
            && (!self.should_copy || self.has_copied)
            && self.should_delete
            && !self.has_deleted
    }

    /// The one legal action for the current item, if any.
    pub fn pending_action(&self) -> Option<PendingAction> {
        if self.pending_copy() {
            Some(PendingAction::Copy)
        } else if self.pending_save() {
            Some(PendingAction::Save)
        } else if self.pending_delete() {
            Some(PendingAction::Delete)
        } else {
            None
        }
    }

    /// Node that must perform `action`.
    pub fn action_owner(&self, action: PendingAction) -> &NodeId {
        match action {
            PendingAction::Copy | PendingAction::Delete => &self.source_node,
            PendingAction::Save => &self.destination_node,
        }
    }

    // ===========================================
    // Transitions
    // ===========================================

    fn invalid(&self, operation: &'static str, reason: &'static str) -> RecordError {
        RecordError::InvalidTransition {
            id: self.id,
            operation,
            reason,
        }
    }

    /// Attach the payload read from the current source item.
    pub fn attach_blob(&mut self, blob: BlobRef) -> Result<(), RecordError> {
        if !self.pending_copy() {
            return Err(self.invalid("attach_blob", "current item is not pending copy"));
        }
        self.blob = Some(blob);
        Ok(())
    }

    /// Mark the current item as saved at the destination.
    ///
    /// Clears the payload. Without a pending delete the item is complete.
    pub fn set_has_copied(&mut self) -> Result<(), RecordError> {
        if !self.should_copy {
            return Err(self.invalid("set_has_copied", "record does not copy"));
        }
        if !self.has_current_item() {
            return Err(self.invalid("set_has_copied", "record is not actionable"));
        }
        if self.has_copied {
            return Err(self.invalid("set_has_copied", "current item already copied"));
        }
        self.has_copied = true;
        self.blob = None;
        if !self.should_delete {
            self.complete_current_item();
        }
        Ok(())
    }

    /// Mark the current item as deleted at the source.
    pub fn set_has_deleted(&mut self) -> Result<(), RecordError> {
        if !self.should_delete {
            return Err(self.invalid("set_has_deleted", "record does not delete"));
        }
        if self.should_copy && !self.has_copied {
            return Err(self.invalid("set_has_deleted", "current item not copied yet"));
        }
        if !self.has_current_item() {
            return Err(self.invalid("set_has_deleted", "record is not actionable"));
        }
        if self.has_deleted {
            return Err(self.invalid("set_has_deleted", "current item already deleted"));
        }
        self.has_deleted = true;
        self.complete_current_item();
        Ok(())
    }

    fn complete_current_item(&mut self) {
        self.actionable_index += 1;
        if self.actionable_index < self.items.len() {
            self.has_copied = false;
            self.has_deleted = false;
            self.blob = None;
        } else {
            self.status = TransferStatus::Complete;
        }
    }

    /// Halt the record with a terminal failure.
    pub fn fail(&mut self, failure: Failure) -> Result<(), RecordError> {
        if !self.is_in_progress() {
            return Err(self.invalid("fail", "record already terminal"));
        }
        self.status = failure.into();
        Ok(())
    }

    /// Halt the record as canceled.
    pub fn cancel(&mut self) -> Result<(), RecordError> {
        if !self.is_in_progress() {
            return Err(self.invalid("cancel", "record already terminal"));
        }
        self.status = TransferStatus::Canceled;
        Ok(())
    }

    // ===========================================
    // Encoding
    // ===========================================

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec_named(self).map_err(TypesError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        let record: Self = rmp_serde::from_slice(bytes).map_err(TypesError::Deserialization)?;
        if record.items.is_empty() {
            return Err(TypesError::InvalidData("record without items".into()));
        }
        if record.actionable_index > record.items.len() {
            return Err(TypesError::InvalidData(
                "actionable index beyond item count".into(),
            ));
        }
        Ok(record)
    }
}
