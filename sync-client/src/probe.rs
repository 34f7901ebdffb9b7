//! Filesystem probing for directory entries.

use std::io;
use std::path::{Path, PathBuf};
use tandem_sync_core::EntryMeta;
use tokio::fs;

/// Read the current metadata of `path`.
///
/// A path that cannot be inspected yields a placeholder (not a directory,
/// neither readable nor writable): a pending item whose file has not
/// arrived yet looks exactly like that.
pub async fn probe(path: &Path) -> EntryMeta {
    match fs::metadata(path).await {
        Ok(metadata) => meta_from(path.to_path_buf(), &metadata),
        Err(_) => EntryMeta::placeholder(path),
    }
}

/// Whether `path` exists and is a directory.
pub async fn is_directory(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// List the immediate children of `directory`.
pub async fn scan(directory: &Path) -> io::Result<Vec<EntryMeta>> {
    let mut entries = Vec::new();
    let mut reader = fs::read_dir(directory).await?;
    while let Some(child) = reader.next_entry().await? {
        let path = child.path();
        // Entries can vanish between read_dir and stat.
        match fs::metadata(&path).await {
            Ok(metadata) => entries.push(meta_from(path, &metadata)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(_) => entries.push(EntryMeta::placeholder(path)),
        }
    }
    Ok(entries)
}

fn meta_from(path: PathBuf, metadata: &std::fs::Metadata) -> EntryMeta {
    let permissions = metadata.permissions();
    EntryMeta::new(
        path,
        metadata.is_dir(),
        readable(&permissions),
        !permissions.readonly(),
    )
}

#[cfg(unix)]
fn readable(permissions: &std::fs::Permissions) -> bool {
    use std::os::unix::fs::PermissionsExt;
    permissions.mode() & 0o444 != 0
}

#[cfg(not(unix))]
fn readable(_permissions: &std::fs::Permissions) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probes_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        let meta = probe(&file).await;
        assert!(!meta.is_directory);
        assert!(meta.can_read);
        assert!(meta.can_write);

        assert!(probe(dir.path()).await.is_directory);
        assert!(is_directory(dir.path()).await);
        assert!(!is_directory(&file).await);
    }

    #[tokio::test]
    async fn missing_path_is_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(probe(&missing).await, EntryMeta::placeholder(&missing));
    }

    #[tokio::test]
    async fn scan_lists_children() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("B")).unwrap();

        let mut entries = scan(dir.path()).await.unwrap();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_directory);
        assert_eq!(entries[1].name(), Some("a.txt"));
    }

    #[tokio::test]
    async fn scan_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan(&dir.path().join("gone")).await.is_err());
    }
}
