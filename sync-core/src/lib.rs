//! # sync-core
//!
//! Pure logic for Tandem (no I/O, instant tests).
//!
//! This crate implements the transfer-record state machine, the directory
//! entry model, and observer routing without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! Everything here is a pure function of its inputs. A record's pending
//! action is derived from already-applied state, so re-delivering the same
//! record mutation derives the same (already performed) action and the
//! executor in `sync-client` can treat it as a no-op.
//!
//! The actual I/O (filesystem, replicated store, messaging) is performed by
//! `sync-client`, which interprets what these modules derive.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod path;
pub mod record;
pub mod routing;

pub use entry::{
    alphabetical, directories_first, AcceptAll, DirectoryEntry, EntryComparator, EntryFilter,
    EntryKind, EntryMeta, FilesOnly, SuffixAutoSync,
};
pub use path::{AliasError, PathAliases};
pub use record::{Failure, PendingAction, RecordError, TransferRecord};
pub use routing::{destination_path, indices_to_check, route, RouteEvent, Subscription};
