//! Filesystem watch sources.
//!
//! A [`WatchSource`] turns a directory into a stream of typed [`FsEvent`]s
//! for its immediate children, plus the two events that report the watched
//! directory itself going away. Watching stops when the [`WatchGuard`] is
//! stopped or dropped.

mod manual;
mod native;

pub use manual::ManualWatchSource;
pub use native::NotifyWatchSource;

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

/// Watch errors.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The platform watcher could not be created or attached.
    #[error("failed to watch {path}: {reason}")]
    Failed {
        /// Directory that was to be watched.
        path: PathBuf,
        /// Backend error message.
        reason: String,
    },
}

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    /// A child was created.
    Created,
    /// A child's contents changed.
    Modified,
    /// A child's attributes changed.
    AttributeChanged,
    /// A child was renamed into the directory.
    MovedIn,
    /// A child was deleted.
    Deleted,
    /// A child was renamed out of the directory.
    MovedOut,
    /// The watched directory was deleted.
    SelfDeleted,
    /// The watched directory was renamed.
    SelfMoved,
}

impl FsEventKind {
    /// Whether the event means the watched directory is gone.
    pub fn is_self_event(self) -> bool {
        matches!(self, Self::SelfDeleted | Self::SelfMoved)
    }

    /// Whether the event means a child disappeared.
    pub fn is_removal(self) -> bool {
        matches!(self, Self::Deleted | Self::MovedOut)
    }
}

/// A typed filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    /// What happened.
    pub kind: FsEventKind,
    /// Affected path (the watched directory for self events).
    pub path: PathBuf,
}

impl FsEvent {
    /// Create an event.
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Keeps a watch alive. Stopping or dropping it ends the event stream.
pub struct WatchGuard {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchGuard {
    /// Guard that runs `stop` exactly once.
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// Stop watching. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }

    /// Whether the watch is still running.
    pub fn is_active(&self) -> bool {
        self.stop.is_some()
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchGuard")
            .field("active", &self.is_active())
            .finish()
    }
}

/// An active watch on one directory.
#[derive(Debug)]
pub struct Watch {
    /// Event stream. Ends when the guard stops.
    pub events: mpsc::UnboundedReceiver<FsEvent>,
    /// Keeps the watch alive.
    pub guard: WatchGuard,
}

impl Watch {
    /// Split into the event stream and the guard.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<FsEvent>, WatchGuard) {
        (self.events, self.guard)
    }
}

/// Creates watches on directories.
pub trait WatchSource: Send + Sync {
    /// Start watching the immediate children of `directory`.
    fn watch(&self, directory: &Path) -> Result<Watch, WatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn guard_stops_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut guard = WatchGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(guard.is_active());
        guard.stop();
        guard.stop();
        drop(guard);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_guard_stops() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        drop(WatchGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn kind_helpers() {
        assert!(FsEventKind::SelfMoved.is_self_event());
        assert!(!FsEventKind::MovedOut.is_self_event());
        assert!(FsEventKind::MovedOut.is_removal());
        assert!(!FsEventKind::MovedIn.is_removal());
    }
}
