//! Watch source driven by hand.
//!
//! Tests (and embedders with their own change feed) push events with
//! [`ManualWatchSource::emit`]; every active watch on that directory
//! receives them.

use super::{FsEvent, Watch, WatchError, WatchGuard, WatchSource};
use dashmap::DashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tandem_sync_core::path::slot_key;
use tokio::sync::mpsc;

type Watchers = DashMap<String, Vec<(u64, mpsc::UnboundedSender<FsEvent>)>>;

/// A watch source whose events are injected by the caller.
#[derive(Debug, Clone, Default)]
pub struct ManualWatchSource {
    watchers: Arc<Watchers>,
    next_id: Arc<AtomicU64>,
}

impl ManualWatchSource {
    /// Create a source with no watches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every watch on `directory`.
    ///
    /// Returns the number of watches that received it.
    pub fn emit(&self, directory: &Path, event: FsEvent) -> usize {
        let Some(mut senders) = self.watchers.get_mut(&slot_key(directory)) else {
            return 0;
        };
        senders.retain(|(_, tx)| !tx.is_closed());
        senders
            .iter()
            .filter(|(_, tx)| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Whether any watch on `directory` is active.
    pub fn is_watching(&self, directory: &Path) -> bool {
        self.watchers
            .get(&slot_key(directory))
            .is_some_and(|senders| senders.iter().any(|(_, tx)| !tx.is_closed()))
    }
}

impl WatchSource for ManualWatchSource {
    fn watch(&self, directory: &Path) -> Result<Watch, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = slot_key(directory);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.watchers.entry(key.clone()).or_default().push((id, tx));

        let watchers = Arc::clone(&self.watchers);
        let guard = WatchGuard::new(move || {
            if let Some(mut senders) = watchers.get_mut(&key) {
                senders.retain(|(other, _)| *other != id);
            }
        });
        Ok(Watch { events: rx, guard })
    }
}
