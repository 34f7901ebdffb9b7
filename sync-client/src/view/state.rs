//! Entry list state of one directory view.
//!
//! Everything here is synchronous: the view task feeds already-probed
//! inputs in and publishes the returned updates. No two entries ever share
//! a case-insensitive path.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tandem_sync_core::path::{same_path, slot_key};
use tandem_sync_core::{
    DirectoryEntry, EntryComparator, EntryFilter, EntryKind, EntryMeta, TransferRecord,
};
use tandem_sync_types::NodeId;
use tracing::debug;

use super::ViewUpdate;
use crate::watch::{FsEvent, FsEventKind};

/// Which side of a record a notification concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordSide {
    Source,
    Destination,
    DeleteSuccess,
}

/// Local path of a file the paired node listed. `None` unless `name` is a
/// single plain component.
pub(crate) fn remote_entry_path(directory: &Path, name: &str) -> Option<PathBuf> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Some(directory.join(part)),
        _ => None,
    }
}

pub(crate) struct ViewState {
    directory: PathBuf,
    local_node: NodeId,
    filter: Arc<dyn EntryFilter>,
    comparator: Option<EntryComparator>,
    entries: Vec<DirectoryEntry>,
    auto_sync: BTreeMap<String, DirectoryEntry>,
    reconciled: bool,
}

impl ViewState {
    pub(crate) fn new(
        directory: PathBuf,
        local_node: NodeId,
        filter: Arc<dyn EntryFilter>,
        comparator: Option<EntryComparator>,
    ) -> Self {
        Self {
            directory,
            local_node,
            filter,
            comparator,
            entries: Vec::new(),
            auto_sync: BTreeMap::new(),
            reconciled: false,
        }
    }

    pub(crate) fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub(crate) fn is_reconciled(&self) -> bool {
        self.reconciled
    }

    pub(crate) fn auto_sync_candidates(&self) -> Vec<PathBuf> {
        self.auto_sync
            .values()
            .map(|entry| entry.path().to_path_buf())
            .collect()
    }

    fn position(&self, path: &Path) -> Option<usize> {
        self.entries.iter().position(|entry| entry.is_at(path))
    }

    fn sort(&mut self) {
        if let Some(comparator) = &self.comparator {
            self.entries.sort_by(|a, b| comparator(a, b));
        }
    }

    fn reset(&mut self) -> ViewUpdate {
        self.sort();
        ViewUpdate::Reset(self.entries.clone())
    }

    fn replace(&mut self, position: usize, entry: DirectoryEntry) -> ViewUpdate {
        self.entries[position] = entry.clone();
        ViewUpdate::Updated { position, entry }
    }

    fn append(&mut self, entry: DirectoryEntry) -> ViewUpdate {
        self.entries.push(entry.clone());
        ViewUpdate::Inserted {
            position: self.entries.len() - 1,
            entry,
        }
    }

    /// Initial build from in-flight records and a local scan.
    pub(crate) fn apply_initial(
        &mut self,
        pending: Vec<DirectoryEntry>,
        scanned: Vec<EntryMeta>,
    ) -> ViewUpdate {
        self.entries.clear();
        self.auto_sync.clear();

        for entry in pending {
            if self.filter.accepts(&entry) && self.position(entry.path()).is_none() {
                self.entries.push(entry);
            }
        }

        for meta in scanned {
            let entry = DirectoryEntry::Plain(meta);
            if self.filter.auto_sync(&entry) {
                self.auto_sync.insert(slot_key(entry.path()), entry.clone());
            }
            if self.filter.accepts(&entry) && self.position(entry.path()).is_none() {
                self.entries.push(entry);
            }
        }

        for entry in &self.entries {
            if entry.kind() == EntryKind::Pending {
                self.auto_sync.remove(&slot_key(entry.path()));
            }
        }

        debug!(
            directory = %self.directory.display(),
            entries = self.entries.len(),
            candidates = self.auto_sync.len(),
            "initial view built"
        );
        self.reset()
    }

    /// Merge the paired node's listing. `None` means the listing failed.
    pub(crate) fn apply_listing(&mut self, remote: Option<Vec<EntryMeta>>) -> ViewUpdate {
        if let Some(remote) = remote {
            for meta in remote {
                self.auto_sync.remove(&slot_key(&meta.path));
                if let Some(position) = self.position(&meta.path) {
                    self.entries[position] = DirectoryEntry::Synced(meta);
                }
            }
        }
        self.reconciled = true;
        self.reset()
    }

    /// Plain files still eligible for automatic sync.
    pub(crate) fn auto_sync_targets(&self) -> Vec<PathBuf> {
        self.auto_sync
            .values()
            .filter(|candidate| !candidate.is_directory())
            .filter(|candidate| self.filter.auto_sync(candidate))
            .filter(|candidate| match self.position(candidate.path()) {
                Some(position) => self.entries[position].kind() == EntryKind::Plain,
                None => true,
            })
            .map(|candidate| candidate.path().to_path_buf())
            .collect()
    }

    /// Apply one filesystem event. `meta` is the freshly probed state of the
    /// event's path (unused for removals).
    pub(crate) fn apply_fs_event(&mut self, event: &FsEvent, meta: EntryMeta) -> Vec<ViewUpdate> {
        match event.kind {
            FsEventKind::SelfDeleted | FsEventKind::SelfMoved => {
                self.entries.clear();
                self.auto_sync.clear();
                vec![ViewUpdate::Reset(Vec::new())]
            }
            FsEventKind::Deleted | FsEventKind::MovedOut => match self.position(&event.path) {
                Some(position) => {
                    let entry = self.entries.remove(position);
                    self.auto_sync.remove(&slot_key(&event.path));
                    vec![ViewUpdate::Removed { position, entry }]
                }
                None => Vec::new(),
            },
            FsEventKind::Created
            | FsEventKind::Modified
            | FsEventKind::AttributeChanged
            | FsEventKind::MovedIn => {
                if same_path(&event.path, &self.directory) {
                    return Vec::new();
                }
                match self.position(&event.path) {
                    None => {
                        let entry = DirectoryEntry::Plain(meta);
                        if !self.filter.accepts(&entry) {
                            return Vec::new();
                        }
                        vec![self.append(entry)]
                    }
                    Some(position) => match self.entries[position].kind() {
                        EntryKind::Pending => Vec::new(),
                        EntryKind::Synced => {
                            vec![self.replace(position, DirectoryEntry::Synced(meta))]
                        }
                        EntryKind::Plain => {
                            vec![self.replace(position, DirectoryEntry::Plain(meta))]
                        }
                    },
                }
            }
        }
    }

    /// Apply a record notification for item `index`, whose identity in this
    /// view is `meta.path`.
    pub(crate) fn apply_record(
        &mut self,
        side: RecordSide,
        record: Arc<TransferRecord>,
        index: usize,
        meta: EntryMeta,
    ) -> Vec<ViewUpdate> {
        if side == RecordSide::DeleteSuccess {
            return match self.position(&meta.path) {
                Some(position) => vec![self.replace(position, DirectoryEntry::Plain(meta))],
                None => Vec::new(),
            };
        }

        let path = meta.path.clone();
        let item_deleted = record.is_item_deleted(index);
        let from_here = *record.source_node() == self.local_node;
        let entry = if record.is_item_complete(index) {
            DirectoryEntry::Synced(meta)
        } else {
            DirectoryEntry::pending(meta, record, index)
        };
        self.auto_sync.remove(&slot_key(&path));

        match self.position(&path) {
            Some(position) => {
                let changed = self.entries[position].kind() != entry.kind();
                self.entries[position] = entry.clone();
                if changed {
                    vec![ViewUpdate::Updated { position, entry }]
                } else {
                    Vec::new()
                }
            }
            None => {
                if side != RecordSide::Destination || !self.filter.accepts(&entry) {
                    return Vec::new();
                }
                if from_here && item_deleted {
                    return Vec::new();
                }
                vec![self.append(entry)]
            }
        }
    }
}
