//! Routing record changes to subscribed observers.
//!
//! An observer subscribes to a target path (a file or a directory) on one
//! node. When a record changes, each subscription is tested against the
//! record's source side and destination side independently.
//!
//! Only indices whose classification can have changed are checked: on a
//! record's first notification (`actionable_index == 0`) every index is
//! unresolved, afterwards only the just-completed index and the current one
//! can differ from what observers already saw.

use std::path::{Path, PathBuf};
use tandem_sync_types::NodeId;

use crate::path::{same_path, PathAliases};
use crate::record::TransferRecord;

/// What an observer is subscribed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// File or directory of interest (local, alias-expanded).
    pub target: PathBuf,
    /// Node the target lives on.
    pub node: NodeId,
}

impl Subscription {
    /// Create a subscription.
    pub fn new(target: impl Into<PathBuf>, node: NodeId) -> Self {
        Self {
            target: target.into(),
            node,
        }
    }

    fn matches(&self, path: &Path) -> bool {
        same_path(&self.target, path)
    }
}

/// A notification to deliver to one observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEvent {
    /// A source item the observer watches changed status.
    SourceStatusChanged {
        /// Item index.
        index: usize,
    },
    /// A destination item the observer watches changed status.
    DestinationStatusChanged {
        /// Item index.
        index: usize,
    },
    /// A delete-only item the observer asked for is gone.
    DeleteTransactionSuccess {
        /// Item index.
        index: usize,
    },
}

/// Item indices whose classification may have changed.
pub fn indices_to_check(record: &TransferRecord) -> Vec<usize> {
    let cursor = record.actionable_index();
    let count = record.item_count();
    if cursor == 0 {
        return (0..count).collect();
    }
    let mut indices = vec![cursor - 1];
    if cursor < count {
        indices.push(cursor);
    }
    indices
}

/// Destination path of item `index`: destination directory + item file name.
pub fn destination_path(
    record: &TransferRecord,
    index: usize,
    aliases: &PathAliases,
) -> Option<PathBuf> {
    let name = record.item_file_name(index)?;
    Some(aliases.expand(record.destination_directory()).join(name))
}

/// Notifications `subscription` should receive for a changed `record`.
pub fn route(
    record: &TransferRecord,
    subscription: &Subscription,
    aliases: &PathAliases,
) -> Vec<RouteEvent> {
    let mut events = Vec::new();
    let indices = indices_to_check(record);

    if subscription.node == *record.source_node() {
        for &index in &indices {
            let Some(item) = record.item(index) else {
                continue;
            };
            let path = aliases.expand(item);
            let parent_matches = path.parent().is_some_and(|p| subscription.matches(p));
            if subscription.matches(&path) || parent_matches {
                events.push(RouteEvent::SourceStatusChanged { index });
            }
        }
    }

    if subscription.node == *record.destination_node() {
        let directory = aliases.expand(record.destination_directory());
        for &index in &indices {
            let Some(path) = destination_path(record, index, aliases) else {
                continue;
            };
            if subscription.matches(&directory) || subscription.matches(&path) {
                if record.is_item_complete(index) && record.is_delete_only() {
                    events.push(RouteEvent::DeleteTransactionSuccess { index });
                } else {
                    events.push(RouteEvent::DestinationStatusChanged { index });
                }
            }
        }
    }

    events
}
