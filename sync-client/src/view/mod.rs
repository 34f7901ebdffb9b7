//! Directory views.
//!
//! A [`DirectoryView`] keeps an ordered, de-duplicated list of the entries of
//! one local directory, merged from four inputs:
//! - a one-off local scan plus the in-flight records destined here
//! - the paired node's listing of the same logical directory
//! - live filesystem events
//! - record notifications routed by the [`Dispatcher`]
//!
//! All mutations of one view run on a single task, in arrival order. Probing
//! the filesystem, loading records and the remote round trip happen on
//! worker tasks that hand their results back as commands. List changes go
//! out on a separate channel so a slow consumer never stalls reconciliation.
//!
//! ```text
//!  fs watch ──probe──┐
//!  dispatcher ─probe─┼──▶ commands ──▶ view task ──▶ updates
//!  load / listing ───┘
//! ```

mod state;

use crate::dispatcher::{Dispatcher, ObserverId, RecordObserver};
use crate::listing::ListingClient;
use crate::peers::{PeerResolver, PeerSelection};
use crate::probe;
use crate::watch::{FsEvent, WatchError, WatchGuard, WatchSource};
use state::{remote_entry_path, RecordSide, ViewState};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tandem_sync_core::path::same_path;
use tandem_sync_core::{
    destination_path, AcceptAll, DirectoryEntry, EntryComparator, EntryFilter, EntryMeta,
    TransferRecord,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Errors creating a view.
#[derive(Debug, Error)]
pub enum ViewError {
    /// The observed path is missing or not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The directory could not be watched.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// The view has stopped.
    #[error("view stopped")]
    Stopped,
}

/// A change to a view's entry list.
#[derive(Debug, Clone)]
pub enum ViewUpdate {
    /// The whole list was republished.
    Reset(Vec<DirectoryEntry>),
    /// An entry was appended at `position`.
    Inserted {
        /// Index of the new entry.
        position: usize,
        /// The new entry.
        entry: DirectoryEntry,
    },
    /// The entry at `position` was replaced.
    Updated {
        /// Index of the replaced entry.
        position: usize,
        /// The replacement.
        entry: DirectoryEntry,
    },
    /// The entry at `position` was removed.
    Removed {
        /// Index the entry occupied.
        position: usize,
        /// The removed entry.
        entry: DirectoryEntry,
    },
}

/// Point-in-time copy of a view's state.
#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    /// Entries in list order.
    pub entries: Vec<DirectoryEntry>,
    /// Whether the remote listing round trip has finished.
    pub reconciled: bool,
    /// Paths still eligible for automatic sync.
    pub auto_sync_candidates: Vec<PathBuf>,
}

type ReconciledCallback = Box<dyn FnOnce() + Send>;

/// How a view filters, orders and reports.
pub struct ViewOptions {
    filter: Arc<dyn EntryFilter>,
    comparator: Option<EntryComparator>,
    on_reconciled: Option<ReconciledCallback>,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            filter: Arc::new(AcceptAll),
            comparator: None,
            on_reconciled: None,
        }
    }
}

impl fmt::Debug for ViewOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewOptions")
            .field("comparator", &self.comparator.is_some())
            .field("on_reconciled", &self.on_reconciled.is_some())
            .finish_non_exhaustive()
    }
}

impl ViewOptions {
    /// Show only entries `filter` accepts; auto-sync what it marks eligible.
    pub fn with_filter(mut self, filter: impl EntryFilter + 'static) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    /// Order full publications with `comparator`.
    pub fn with_comparator(mut self, comparator: EntryComparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Run `callback` once, when reconciliation with the paired node ends
    /// (successfully or not).
    pub fn on_reconciled(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_reconciled = Some(Box::new(callback));
        self
    }
}

/// Collaborators a view needs. Built once per session.
#[derive(Clone)]
pub(crate) struct ViewContext {
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) listing: Arc<ListingClient>,
    pub(crate) peers: Arc<dyn PeerResolver>,
    pub(crate) selection: PeerSelection,
    pub(crate) watch_source: Arc<dyn WatchSource>,
}

enum ViewCommand {
    Initial {
        pending: Vec<DirectoryEntry>,
        scanned: Vec<EntryMeta>,
    },
    Listing(Option<Vec<EntryMeta>>),
    Fs {
        event: FsEvent,
        meta: EntryMeta,
    },
    Record {
        side: RecordSide,
        record: Arc<TransferRecord>,
        index: usize,
        meta: EntryMeta,
    },
    Snapshot(oneshot::Sender<ViewSnapshot>),
    Stop,
}

/// Forwards dispatcher notifications to the view's record worker.
struct ViewObserver {
    records: mpsc::UnboundedSender<(RecordSide, Arc<TransferRecord>, usize)>,
}

impl RecordObserver for ViewObserver {
    fn on_source_file_status_changed(&self, record: &Arc<TransferRecord>, index: usize) {
        let _ = self
            .records
            .send((RecordSide::Source, Arc::clone(record), index));
    }

    fn on_destination_file_status_changed(&self, record: &Arc<TransferRecord>, index: usize) {
        let _ = self
            .records
            .send((RecordSide::Destination, Arc::clone(record), index));
    }

    fn on_delete_transaction_success(&self, record: &Arc<TransferRecord>, index: usize) {
        let _ = self
            .records
            .send((RecordSide::DeleteSuccess, Arc::clone(record), index));
    }
}

/// Handle on a running directory view.
///
/// Stopping (or dropping) the handle stops the filesystem watch and the
/// dispatcher subscription immediately. Work already in flight finishes in
/// the background but no longer touches the view.
pub struct DirectoryView {
    directory: PathBuf,
    active: Arc<AtomicBool>,
    guard: Arc<Mutex<WatchGuard>>,
    dispatcher: Arc<Dispatcher>,
    observer: ObserverId,
    commands: mpsc::UnboundedSender<ViewCommand>,
    updates: Option<mpsc::UnboundedReceiver<ViewUpdate>>,
}

impl fmt::Debug for DirectoryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryView")
            .field("directory", &self.directory)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl DirectoryView {
    /// Start observing the logical `directory`.
    ///
    /// Fails immediately if the directory does not exist locally.
    pub(crate) async fn observe(
        ctx: &ViewContext,
        directory: &str,
        options: ViewOptions,
    ) -> Result<Self, ViewError> {
        let aliases = ctx.dispatcher.aliases().clone();
        let local_node = ctx.dispatcher.local_node().clone();
        let expanded = aliases.expand(directory);
        if !probe::is_directory(&expanded).await {
            return Err(ViewError::NotADirectory(expanded));
        }

        let (events, guard) = ctx.watch_source.watch(&expanded)?.into_parts();
        let guard = Arc::new(Mutex::new(guard));
        let active = Arc::new(AtomicBool::new(true));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let (records_tx, records_rx) = mpsc::unbounded_channel();

        let observer = ctx.dispatcher.register(
            Arc::new(ViewObserver {
                records: records_tx,
            }),
            directory,
            local_node.clone(),
        );

        tokio::spawn(forward_fs_events(events, commands.clone()));
        tokio::spawn(forward_records(
            records_rx,
            commands.clone(),
            aliases.clone(),
        ));
        tokio::spawn(load_initial(
            Arc::clone(ctx.dispatcher.store()),
            aliases.clone(),
            expanded.clone(),
            commands.clone(),
        ));

        let task = ViewTask {
            logical: directory.to_string(),
            state: ViewState::new(
                expanded.clone(),
                local_node,
                options.filter,
                options.comparator,
            ),
            ctx: ctx.clone(),
            observer,
            active: Arc::clone(&active),
            guard: Arc::clone(&guard),
            commands: commands.clone(),
            updates: updates_tx,
            on_reconciled: options.on_reconciled,
            loaded: false,
            deferred: Vec::new(),
        };
        tokio::spawn(task.run(command_rx));

        info!(directory = %expanded.display(), "observing directory");
        Ok(Self {
            directory: expanded,
            active,
            guard,
            dispatcher: Arc::clone(&ctx.dispatcher),
            observer,
            commands,
            updates: Some(updates),
        })
    }

    /// The local directory this view shows.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Whether the view is still running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Take the update stream. Returns `None` after the first call.
    pub fn take_updates(&mut self) -> Option<mpsc::UnboundedReceiver<ViewUpdate>> {
        self.updates.take()
    }

    /// Current entries and reconciliation state.
    pub async fn snapshot(&self) -> Result<ViewSnapshot, ViewError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ViewCommand::Snapshot(tx))
            .map_err(|_| ViewError::Stopped)?;
        rx.await.map_err(|_| ViewError::Stopped)
    }

    /// Stop observing. Idempotent.
    ///
    /// A view whose directory went away has already stopped watching; this
    /// still ends its task.
    pub fn stop(&self) {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        stop_watch(&self.guard);
        self.dispatcher.unregister(self.observer);
        let _ = self.commands.send(ViewCommand::Stop);
        if was_active {
            info!(directory = %self.directory.display(), "stopped observing directory");
        }
    }
}

impl Drop for DirectoryView {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stop_watch(guard: &Mutex<WatchGuard>) {
    if let Ok(mut guard) = guard.lock() {
        guard.stop();
    }
}

struct ViewTask {
    logical: String,
    state: ViewState,
    ctx: ViewContext,
    observer: ObserverId,
    active: Arc<AtomicBool>,
    guard: Arc<Mutex<WatchGuard>>,
    commands: mpsc::UnboundedSender<ViewCommand>,
    updates: mpsc::UnboundedSender<ViewUpdate>,
    on_reconciled: Option<ReconciledCallback>,
    loaded: bool,
    deferred: Vec<ViewCommand>,
}

impl ViewTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ViewCommand>) {
        while let Some(command) = commands.recv().await {
            if matches!(command, ViewCommand::Stop) {
                break;
            }
            self.handle(command);
        }
        debug!(directory = %self.logical, "view task finished");
    }

    fn handle(&mut self, command: ViewCommand) {
        match command {
            ViewCommand::Snapshot(reply) => {
                let _ = reply.send(ViewSnapshot {
                    entries: self.state.entries().to_vec(),
                    reconciled: self.state.is_reconciled(),
                    auto_sync_candidates: self.state.auto_sync_candidates(),
                });
            }
            ViewCommand::Stop => {}
            _ if !self.active.load(Ordering::SeqCst) => {
                debug!(directory = %self.logical, "dropping work for stopped view");
            }
            ViewCommand::Initial { pending, scanned } => {
                let update = self.state.apply_initial(pending, scanned);
                self.publish(update);
                self.loaded = true;
                self.request_listing();
                for command in std::mem::take(&mut self.deferred) {
                    self.handle(command);
                }
            }
            command @ (ViewCommand::Fs { .. } | ViewCommand::Record { .. }) if !self.loaded => {
                self.deferred.push(command);
            }
            ViewCommand::Fs { event, meta } => {
                let self_event = event.kind.is_self_event();
                for update in self.state.apply_fs_event(&event, meta) {
                    self.publish(update);
                }
                if self_event {
                    warn!(
                        directory = %self.logical,
                        kind = ?event.kind,
                        "observed directory went away"
                    );
                    self.detach();
                }
            }
            ViewCommand::Record {
                side,
                record,
                index,
                meta,
            } => {
                for update in self.state.apply_record(side, record, index, meta) {
                    self.publish(update);
                }
            }
            ViewCommand::Listing(remote) => {
                let update = self.state.apply_listing(remote);
                self.publish(update);
                let targets = self.state.auto_sync_targets();
                let callback = self.on_reconciled.take();
                tokio::spawn(auto_sync(
                    self.ctx.clone(),
                    self.logical.clone(),
                    targets,
                    callback,
                ));
            }
        }
    }

    /// Stop watching and leave the dispatcher. The task keeps answering
    /// snapshots until the handle stops it.
    fn detach(&self) {
        self.active.store(false, Ordering::SeqCst);
        stop_watch(&self.guard);
        self.ctx.dispatcher.unregister(self.observer);
    }

    fn publish(&self, update: ViewUpdate) {
        // The consumer may have dropped its receiver; the view keeps its
        // state regardless.
        let _ = self.updates.send(update);
    }

    fn request_listing(&self) {
        let ctx = self.ctx.clone();
        let logical = self.logical.clone();
        let directory = self.state_directory();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let remote = fetch_listing(&ctx, logical, &directory).await;
            let _ = commands.send(ViewCommand::Listing(remote));
        });
    }

    fn state_directory(&self) -> PathBuf {
        self.ctx.dispatcher.aliases().expand(&self.logical)
    }
}

async fn forward_fs_events(
    mut events: mpsc::UnboundedReceiver<FsEvent>,
    commands: mpsc::UnboundedSender<ViewCommand>,
) {
    while let Some(event) = events.recv().await {
        let meta = if event.kind.is_removal() || event.kind.is_self_event() {
            EntryMeta::placeholder(&event.path)
        } else {
            probe::probe(&event.path).await
        };
        if commands.send(ViewCommand::Fs { event, meta }).is_err() {
            break;
        }
    }
}

async fn forward_records(
    mut records: mpsc::UnboundedReceiver<(RecordSide, Arc<TransferRecord>, usize)>,
    commands: mpsc::UnboundedSender<ViewCommand>,
    aliases: tandem_sync_core::PathAliases,
) {
    while let Some((side, record, index)) = records.recv().await {
        let path = match side {
            RecordSide::Source => record.item(index).map(|item| aliases.expand(item)),
            RecordSide::Destination | RecordSide::DeleteSuccess => {
                destination_path(&record, index, &aliases)
            }
        };
        let Some(path) = path else {
            continue;
        };
        let meta = probe::probe(&path).await;
        let command = ViewCommand::Record {
            side,
            record,
            index,
            meta,
        };
        if commands.send(command).is_err() {
            break;
        }
    }
}

async fn load_initial(
    store: Arc<dyn crate::store::RecordStore>,
    aliases: tandem_sync_core::PathAliases,
    directory: PathBuf,
    commands: mpsc::UnboundedSender<ViewCommand>,
) {
    let records = store.list().await.unwrap_or_else(|e| {
        warn!(error = %e, "record store unavailable, showing local entries only");
        Vec::new()
    });

    let mut pending = Vec::new();
    for record in records {
        if !record.is_in_progress()
            || !same_path(&aliases.expand(record.destination_directory()), &directory)
        {
            continue;
        }
        let record = Arc::new(record);
        for index in record.actionable_index()..record.item_count() {
            let Some(path) = destination_path(&record, index, &aliases) else {
                continue;
            };
            let meta = probe::probe(&path).await;
            pending.push(DirectoryEntry::pending(meta, Arc::clone(&record), index));
        }
    }

    let scanned = probe::scan(&directory).await.unwrap_or_else(|e| {
        warn!(directory = %directory.display(), error = %e, "failed to scan directory");
        Vec::new()
    });
    let _ = commands.send(ViewCommand::Initial { pending, scanned });
}

async fn fetch_listing(
    ctx: &ViewContext,
    logical: String,
    directory: &Path,
) -> Option<Vec<EntryMeta>> {
    let peers = match ctx.peers.connected_peers().await {
        Ok(peers) => peers,
        Err(e) => {
            warn!(error = %e, "cannot resolve peers for listing");
            return None;
        }
    };
    let Some(peer) = ctx.selection.select(&peers) else {
        warn!(directory = %logical, "no connected peer, reconciling locally");
        return None;
    };

    let files = match ctx.listing.request(&peer, Some(logical.clone())).await {
        Ok(files) => files,
        Err(e) => {
            warn!(directory = %logical, peer = %peer, error = %e, "remote listing failed");
            return None;
        }
    };

    let mut remote = Vec::with_capacity(files.len());
    for file in files {
        let Some(path) = remote_entry_path(directory, &file.name) else {
            warn!(peer = %peer, name = %file.name, "ignoring listed name outside the directory");
            continue;
        };
        let mut meta = probe::probe(&path).await;
        meta.is_directory = file.is_directory;
        remote.push(meta);
    }
    debug!(
        directory = %logical,
        peer = %peer,
        files = remote.len(),
        "remote listing received"
    );
    Some(remote)
}

async fn auto_sync(
    ctx: ViewContext,
    logical: String,
    targets: Vec<PathBuf>,
    on_reconciled: Option<ReconciledCallback>,
) {
    if !targets.is_empty() {
        match ctx.peers.connected_peers().await {
            Ok(peers) => match ctx.selection.select(&peers) {
                Some(peer) => {
                    let local = ctx.dispatcher.local_node().clone();
                    for target in targets {
                        let item = target.to_string_lossy().into_owned();
                        let request = ctx.dispatcher.request_transfer(
                            vec![item],
                            local.clone(),
                            &logical,
                            peer.clone(),
                            false,
                        );
                        if let Err(e) = request.await {
                            warn!(path = %target.display(), error = %e, "auto-sync request failed");
                        }
                    }
                }
                None => debug!(directory = %logical, "no connected peer, skipping auto-sync"),
            },
            Err(e) => warn!(error = %e, "cannot resolve peers for auto-sync"),
        }
    }
    if let Some(callback) = on_reconciled {
        callback();
    }
}
