//! Watch source backed by the platform watcher (`notify`).

use super::{FsEvent, FsEventKind, Watch, WatchError, WatchGuard, WatchSource};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::Path;
use tandem_sync_core::path::same_path;
use tokio::sync::mpsc;
use tracing::warn;

/// Watches real directories with the platform's recommended backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyWatchSource;

impl NotifyWatchSource {
    /// Create a source.
    pub fn new() -> Self {
        Self
    }
}

impl WatchSource for NotifyWatchSource {
    fn watch(&self, directory: &Path) -> Result<Watch, WatchError> {
        let failed = |e: notify::Error| WatchError::Failed {
            path: directory.to_path_buf(),
            reason: e.to_string(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let root = directory.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for fs_event in map_event(&root, event) {
                    let _ = tx.send(fs_event);
                }
            }
            Err(e) => warn!(error = %e, "watch backend error"),
        })
        .map_err(failed)?;
        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .map_err(failed)?;

        Ok(Watch {
            events: rx,
            guard: WatchGuard::new(move || drop(watcher)),
        })
    }
}

fn map_event(root: &Path, event: Event) -> Vec<FsEvent> {
    let is_root = |path: &Path| same_path(path, root);

    match event.kind {
        EventKind::Remove(_) => event
            .paths
            .into_iter()
            .map(|path| {
                if is_root(&path) {
                    FsEvent::new(FsEventKind::SelfDeleted, path)
                } else {
                    FsEvent::new(FsEventKind::Deleted, path)
                }
            })
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => {
            let mut events = Vec::new();
            let mut paths = event.paths.into_iter();
            match mode {
                RenameMode::Both => {
                    if let Some(from) = paths.next() {
                        events.push(moved_out(root, from));
                    }
                    if let Some(to) = paths.next() {
                        events.push(FsEvent::new(FsEventKind::MovedIn, to));
                    }
                }
                RenameMode::To => {
                    events.extend(paths.map(|p| FsEvent::new(FsEventKind::MovedIn, p)));
                }
                _ => events.extend(paths.map(|p| moved_out(root, p))),
            }
            events
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => event
            .paths
            .into_iter()
            .filter(|p| !is_root(p))
            .map(|p| FsEvent::new(FsEventKind::AttributeChanged, p))
            .collect(),
        EventKind::Create(_) => event
            .paths
            .into_iter()
            .map(|p| FsEvent::new(FsEventKind::Created, p))
            .collect(),
        EventKind::Modify(_) => event
            .paths
            .into_iter()
            .filter(|p| !is_root(p))
            .map(|p| FsEvent::new(FsEventKind::Modified, p))
            .collect(),
        _ => Vec::new(),
    }
}

fn moved_out(root: &Path, path: std::path::PathBuf) -> FsEvent {
    if same_path(&path, root) {
        FsEvent::new(FsEventKind::SelfMoved, path)
    } else {
        FsEvent::new(FsEventKind::MovedOut, path)
    }
}
