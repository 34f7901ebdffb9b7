//! Execution of a record's locally-owned pending action.
//!
//! Every action either advances the record or writes a terminal failure into
//! it. Re-executing an action whose effect is already on disk advances the
//! record without repeating the effect:
//! - saving bytes identical to an existing file marks the item copied
//! - deleting an already-absent file marks the item deleted

use crate::blob::BlobStore;
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Arc;
use tandem_sync_core::{Failure, PathAliases, PendingAction, RecordError, TransferRecord};
use tandem_sync_types::BlobRef;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// What a successful action does to the record.
enum Effect {
    Attach(BlobRef),
    Copied,
    Deleted,
}

/// Performs copy, save and delete actions against the local filesystem.
#[derive(Clone)]
pub struct ActionExecutor {
    blobs: Arc<dyn BlobStore>,
    aliases: PathAliases,
}

impl ActionExecutor {
    /// Create an executor that resolves paths with `aliases`.
    pub fn new(blobs: Arc<dyn BlobStore>, aliases: PathAliases) -> Self {
        Self { blobs, aliases }
    }

    /// Perform `action` on the record's current item and apply the outcome.
    ///
    /// Filesystem problems become record failures. Only a transition the
    /// record rejects is returned as an error.
    pub async fn execute(
        &self,
        action: PendingAction,
        record: &mut TransferRecord,
    ) -> Result<(), RecordError> {
        let outcome = match action {
            PendingAction::Copy => self.copy(record).await,
            PendingAction::Save => self.save(record).await,
            PendingAction::Delete => self.delete(record).await,
        };
        match outcome {
            Ok(Effect::Attach(blob)) => record.attach_blob(blob),
            Ok(Effect::Copied) => record.set_has_copied(),
            Ok(Effect::Deleted) => record.set_has_deleted(),
            Err(failure) => {
                warn!(
                    id = %record.id(),
                    index = record.actionable_index(),
                    ?action,
                    ?failure,
                    "transfer item failed"
                );
                record.fail(failure)
            }
        }
    }

    async fn copy(&self, record: &TransferRecord) -> Result<Effect, Failure> {
        let path = self.current_item_path(record)?;
        let metadata = fs::metadata(&path).await.map_err(read_failure)?;
        if metadata.is_dir() {
            return Err(Failure::FileNotFound);
        }
        let bytes = fs::read(&path).await.map_err(read_failure)?;
        let blob = self.blobs.put(bytes).await.map_err(|e| {
            warn!(error = %e, "failed to store payload");
            Failure::Unknown
        })?;
        debug!(id = %record.id(), path = %path.display(), %blob, "copied item");
        Ok(Effect::Attach(blob))
    }

    async fn save(&self, record: &TransferRecord) -> Result<Effect, Failure> {
        let directory = self.aliases.expand(record.destination_directory());
        ensure_directory(&directory).await?;

        let name = record
            .item_file_name(record.actionable_index())
            .ok_or(Failure::Unknown)?
            .to_string();
        let blob = record.blob().ok_or(Failure::Unknown)?;
        let bytes = self.blobs.get(&blob).await.map_err(|e| {
            warn!(error = %e, "failed to fetch payload");
            Failure::Unknown
        })?;

        let target = directory.join(name);
        match fs::metadata(&target).await {
            Ok(metadata) if metadata.is_dir() => return Err(Failure::FileAlreadyExists),
            Ok(_) => {
                let existing = fs::read(&target).await.map_err(|_| Failure::Unknown)?;
                if existing != bytes {
                    return Err(Failure::FileAlreadyExists);
                }
                debug!(id = %record.id(), path = %target.display(), "identical file already saved");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                write_new(&target, &bytes).await.map_err(|e| match e.kind() {
                    ErrorKind::AlreadyExists => Failure::FileAlreadyExists,
                    _ => Failure::Unknown,
                })?;
                debug!(id = %record.id(), path = %target.display(), "saved item");
            }
            Err(_) => return Err(Failure::Unknown),
        }
        Ok(Effect::Copied)
    }

    async fn delete(&self, record: &TransferRecord) -> Result<Effect, Failure> {
        let path = self.current_item_path(record)?;
        let removed = match fs::symlink_metadata(&path).await {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(_) => Err(Failure::NoDeletePermission),
            Ok(metadata) if metadata.is_dir() => fs::remove_dir(&path)
                .await
                .map_err(|_| Failure::NoDeletePermission),
            Ok(_) => fs::remove_file(&path)
                .await
                .map_err(|_| Failure::NoDeletePermission),
        };
        removed?;
        debug!(id = %record.id(), path = %path.display(), "deleted item");
        Ok(Effect::Deleted)
    }

    fn current_item_path(&self, record: &TransferRecord) -> Result<std::path::PathBuf, Failure> {
        record
            .item(record.actionable_index())
            .map(|item| self.aliases.expand(item))
            .ok_or(Failure::Unknown)
    }
}

fn read_failure(e: io::Error) -> Failure {
    match e.kind() {
        ErrorKind::NotFound => Failure::FileNotFound,
        ErrorKind::PermissionDenied => Failure::NoReadPermission,
        _ => Failure::Unknown,
    }
}

async fn ensure_directory(directory: &Path) -> Result<(), Failure> {
    match fs::metadata(directory).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(Failure::BadDestination),
        Err(e) if e.kind() == ErrorKind::NotFound => fs::create_dir_all(directory)
            .await
            .map_err(|_| Failure::BadDestination),
        Err(_) => Err(Failure::BadDestination),
    }
}

async fn write_new(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use tandem_sync_types::{NodeId, TransferStatus};
    use tempfile::TempDir;

    struct Fixture {
        src: TempDir,
        dest: TempDir,
        blobs: MemoryBlobStore,
        executor: ActionExecutor,
    }

    fn fixture() -> Fixture {
        let blobs = MemoryBlobStore::new();
        Fixture {
            src: tempfile::tempdir().unwrap(),
            dest: tempfile::tempdir().unwrap(),
            executor: ActionExecutor::new(Arc::new(blobs.clone()), PathAliases::default()),
            blobs,
        }
    }

    impl Fixture {
        fn source_file(&self, name: &str, bytes: &[u8]) -> String {
            let path = self.src.path().join(name);
            std::fs::write(&path, bytes).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn record(&self, items: Vec<String>, delete_source: bool) -> TransferRecord {
            TransferRecord::transfer(
                items,
                NodeId::new("src"),
                self.dest.path().to_string_lossy(),
                NodeId::new("dst"),
                delete_source,
            )
            .unwrap()
        }

        async fn run(&self, record: &mut TransferRecord) {
            let action = record.pending_action().unwrap();
            self.executor.execute(action, record).await.unwrap();
        }
    }

    #[tokio::test]
    async fn copy_then_save_completes_single_item() {
        let fx = fixture();
        let mut record = fx.record(vec![fx.source_file("a.txt", b"hello")], false);

        fx.run(&mut record).await;
        assert!(record.pending_save());
        assert_eq!(fx.blobs.len(), 1);

        fx.run(&mut record).await;
        assert_eq!(record.status(), TransferStatus::Complete);
        assert_eq!(std::fs::read(fx.dest.path().join("a.txt")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn copy_of_missing_file_fails() {
        let fx = fixture();
        let missing = fx.src.path().join("gone.txt").to_string_lossy().into_owned();
        let mut record = fx.record(vec![missing], false);

        fx.run(&mut record).await;
        assert_eq!(record.status(), TransferStatus::FailedFileNotFound);
    }

    #[tokio::test]
    async fn copy_of_directory_fails() {
        let fx = fixture();
        let dir = fx.src.path().join("sub");
        std::fs::create_dir(&dir).unwrap();
        let mut record = fx.record(vec![dir.to_string_lossy().into_owned()], false);

        fx.run(&mut record).await;
        assert_eq!(record.status(), TransferStatus::FailedFileNotFound);
    }

    #[tokio::test]
    async fn save_twice_with_identical_bytes_is_idempotent() {
        let fx = fixture();
        let mut record = fx.record(vec![fx.source_file("a.txt", b"same")], false);
        fx.run(&mut record).await;
        let before_save = record.clone();

        fx.run(&mut record).await;
        assert_eq!(record.status(), TransferStatus::Complete);

        // Re-delivery of the pre-save version.
        let mut replay = before_save;
        fx.run(&mut replay).await;
        assert_eq!(replay.status(), TransferStatus::Complete);
        assert_eq!(std::fs::read(fx.dest.path().join("a.txt")).unwrap(), b"same");
    }

    #[tokio::test]
    async fn save_over_different_file_fails() {
        let fx = fixture();
        std::fs::write(fx.dest.path().join("a.txt"), b"theirs").unwrap();
        let mut record = fx.record(vec![fx.source_file("a.txt", b"ours")], false);
        fx.run(&mut record).await;
        fx.run(&mut record).await;

        assert_eq!(record.status(), TransferStatus::FailedFileAlreadyExists);
        assert_eq!(std::fs::read(fx.dest.path().join("a.txt")).unwrap(), b"theirs");
    }

    #[tokio::test]
    async fn save_creates_missing_destination() {
        let fx = fixture();
        let nested = fx.dest.path().join("new/inner");
        let mut record = TransferRecord::transfer(
            vec![fx.source_file("a.txt", b"x")],
            NodeId::new("src"),
            nested.to_string_lossy(),
            NodeId::new("dst"),
            false,
        )
        .unwrap();
        fx.run(&mut record).await;
        fx.run(&mut record).await;

        assert_eq!(record.status(), TransferStatus::Complete);
        assert!(nested.join("a.txt").is_file());
    }

    #[tokio::test]
    async fn save_into_file_path_is_bad_destination() {
        let fx = fixture();
        let occupied = fx.dest.path().join("occupied");
        std::fs::write(&occupied, b"file").unwrap();
        let mut record = TransferRecord::transfer(
            vec![fx.source_file("a.txt", b"x")],
            NodeId::new("src"),
            occupied.to_string_lossy(),
            NodeId::new("dst"),
            false,
        )
        .unwrap();
        fx.run(&mut record).await;
        fx.run(&mut record).await;

        assert_eq!(record.status(), TransferStatus::FailedBadDestination);
    }

    #[tokio::test]
    async fn move_deletes_source_after_save() {
        let fx = fixture();
        let item = fx.source_file("a.txt", b"move me");
        let mut record = fx.record(vec![item.clone()], true);

        fx.run(&mut record).await;
        fx.run(&mut record).await;
        assert!(record.pending_delete());
        fx.run(&mut record).await;

        assert_eq!(record.status(), TransferStatus::Complete);
        assert!(!Path::new(&item).exists());
        assert!(fx.dest.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn delete_of_absent_file_is_idempotent() {
        let fx = fixture();
        let gone = fx.src.path().join("gone.txt").to_string_lossy().into_owned();
        let mut record = TransferRecord::delete(
            vec![gone],
            NodeId::new("src"),
            "/observer",
            NodeId::new("dst"),
        )
        .unwrap();

        fx.run(&mut record).await;
        assert_eq!(record.status(), TransferStatus::Complete);
    }
}
