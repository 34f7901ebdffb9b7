//! # sync-client
//!
//! The sync engine for Tandem.
//!
//! This crate performs the I/O that `sync-core` leaves out:
//!
//! - **Dispatcher**: executes the locally-owned pending action of each
//!   replicated transfer record, republishes it, and routes status changes
//!   to registered observers
//! - **Directory views**: merge a local scan, in-flight records, the paired
//!   node's listing and live filesystem events into one ordered list
//! - **Collaborator seams**: record store, messaging, peers, blobs and
//!   filesystem watching are traits with in-memory implementations
//!
//! ## Example
//!
//! ```ignore
//! use tandem_sync_client::{Session, ViewOptions};
//!
//! let session = Session::builder(peers, store, messenger, blobs).start()?;
//! let mut view = session.observe("~/Music", ViewOptions::default()).await?;
//! let mut updates = view.take_updates().unwrap();
//! while let Some(update) = updates.recv().await {
//!     // render
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blob;
pub mod config;
pub mod dispatcher;
pub mod listing;
pub mod messaging;
pub mod peers;
pub mod probe;
pub mod session;
pub mod store;
pub mod view;
pub mod watch;

pub use blob::{BlobError, BlobStore, MemoryBlobStore};
pub use config::{Config, ConfigError};
pub use dispatcher::{DispatchError, Dispatcher, ObserverId, RecordObserver};
pub use listing::{ListingClient, ListingError, ListingResponder};
pub use messaging::{InboundMessage, LoopbackMessenger, LoopbackNetwork, Messenger, MessagingError};
pub use peers::{PeerError, PeerResolver, PeerSelection, PeerStrategy, StaticPeers};
pub use session::{ClientError, Session, SessionBuilder};
pub use store::{MemoryRecordStore, RecordChange, RecordStore, StoreError};
pub use view::{DirectoryView, ViewError, ViewOptions, ViewSnapshot, ViewUpdate};
pub use watch::{
    FsEvent, FsEventKind, ManualWatchSource, NotifyWatchSource, Watch, WatchError, WatchGuard,
    WatchSource,
};
