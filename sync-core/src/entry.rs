//! Directory entries shown by a directory view.
//!
//! Each row of a view is one [`DirectoryEntry`] in exactly one of three
//! variants:
//! - `Plain` - an ordinary filesystem entry not known to be in any transfer
//! - `Pending` - an item of an in-flight [`TransferRecord`]
//! - `Synced` - confirmed present on the paired node
//!
//! Variant changes replace the whole entry; entries are never mutated in
//! place.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::path::{compare_ignore_case, same_path};
use crate::record::TransferRecord;

/// Filesystem facts about one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    /// Absolute local path.
    pub path: PathBuf,
    /// Whether the path is a directory.
    pub is_directory: bool,
    /// Whether the path is readable.
    pub can_read: bool,
    /// Whether the path is writable.
    pub can_write: bool,
}

impl EntryMeta {
    /// Create entry metadata.
    pub fn new(
        path: impl Into<PathBuf>,
        is_directory: bool,
        can_read: bool,
        can_write: bool,
    ) -> Self {
        Self {
            path: path.into(),
            is_directory,
            can_read,
            can_write,
        }
    }

    /// Metadata for a path that does not exist locally yet.
    pub fn placeholder(path: impl Into<PathBuf>) -> Self {
        Self::new(path, false, false, false)
    }

    /// Last path component.
    pub fn name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Text after the last `.` of the name, or empty.
    pub fn suffix(&self) -> &str {
        self.name()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, suffix)| suffix)
            .unwrap_or("")
    }
}

/// Variant tag of a [`DirectoryEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Ordinary filesystem entry.
    Plain,
    /// Item of an in-flight transfer.
    Pending,
    /// Confirmed present on the paired node.
    Synced,
}

/// One row of a directory view.
///
/// Equality is slot equality: two entries are equal iff their paths match
/// ignoring case, regardless of variant.
#[derive(Debug, Clone)]
pub enum DirectoryEntry {
    /// Ordinary filesystem entry.
    Plain(EntryMeta),
    /// Item `index` of an in-flight record.
    Pending {
        /// Entry metadata.
        meta: EntryMeta,
        /// The record the item belongs to.
        record: Arc<TransferRecord>,
        /// Item index within the record.
        index: usize,
    },
    /// Confirmed present on the paired node.
    Synced(EntryMeta),
}

impl DirectoryEntry {
    /// Create a pending entry.
    pub fn pending(meta: EntryMeta, record: Arc<TransferRecord>, index: usize) -> Self {
        Self::Pending {
            meta,
            record,
            index,
        }
    }

    /// Entry metadata.
    pub fn meta(&self) -> &EntryMeta {
        match self {
            Self::Plain(meta) | Self::Synced(meta) => meta,
            Self::Pending { meta, .. } => meta,
        }
    }

    /// Absolute local path.
    pub fn path(&self) -> &Path {
        &self.meta().path
    }

    /// Whether the entry is a directory.
    pub fn is_directory(&self) -> bool {
        self.meta().is_directory
    }

    /// Variant tag.
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Plain(_) => EntryKind::Plain,
            Self::Pending { .. } => EntryKind::Pending,
            Self::Synced(_) => EntryKind::Synced,
        }
    }

    /// The record and item index of a pending entry.
    pub fn record(&self) -> Option<(&TransferRecord, usize)> {
        match self {
            Self::Pending { record, index, .. } => Some((record.as_ref(), *index)),
            _ => None,
        }
    }

    /// Whether this entry occupies the slot for `path`.
    pub fn is_at(&self, path: &Path) -> bool {
        same_path(self.path(), path)
    }
}

impl PartialEq for DirectoryEntry {
    fn eq(&self, other: &Self) -> bool {
        same_path(self.path(), other.path())
    }
}

impl Eq for DirectoryEntry {}

/// Ordering applied on full-list publications.
pub type EntryComparator = Arc<dyn Fn(&DirectoryEntry, &DirectoryEntry) -> Ordering + Send + Sync>;

/// Case-insensitive alphabetical order by path.
pub fn alphabetical() -> EntryComparator {
    Arc::new(|a, b| compare_ignore_case(a.path(), b.path()))
}

/// Directories before files, each group alphabetical.
pub fn directories_first() -> EntryComparator {
    Arc::new(|a, b| {
        b.is_directory()
            .cmp(&a.is_directory())
            .then_with(|| compare_ignore_case(a.path(), b.path()))
    })
}

/// Decides which entries a view shows and which it syncs automatically.
pub trait EntryFilter: Send + Sync {
    /// Whether the entry appears in the view.
    fn accepts(&self, entry: &DirectoryEntry) -> bool;

    /// Whether a plain entry should be sent to the paired node automatically.
    fn auto_sync(&self, _entry: &DirectoryEntry) -> bool {
        false
    }
}

/// Shows every entry, syncs nothing automatically.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl EntryFilter for AcceptAll {
    fn accepts(&self, _entry: &DirectoryEntry) -> bool {
        true
    }
}

/// Hides subdirectories.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesOnly;

impl EntryFilter for FilesOnly {
    fn accepts(&self, entry: &DirectoryEntry) -> bool {
        !entry.is_directory()
    }
}

/// Shows every entry and auto-syncs files with one of the given suffixes.
#[derive(Debug, Clone, Default)]
pub struct SuffixAutoSync {
    suffixes: Vec<String>,
}

impl SuffixAutoSync {
    /// Auto-sync files whose suffix matches one of `suffixes` (ignoring case).
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes
                .into_iter()
                .map(|s| s.into().to_lowercase())
                .collect(),
        }
    }
}

impl EntryFilter for SuffixAutoSync {
    fn accepts(&self, _entry: &DirectoryEntry) -> bool {
        true
    }

    fn auto_sync(&self, entry: &DirectoryEntry) -> bool {
        let suffix = entry.meta().suffix().to_lowercase();
        !entry.is_directory() && self.suffixes.iter().any(|s| *s == suffix)
    }
}
