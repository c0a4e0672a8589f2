use async_trait::async_trait;
use log::debug;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::fs;

use crate::preview_types::{PreviewError, PreviewResult};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Hierarchical byte storage addressed by `/`-separated relative paths.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Lists the direct children of `path`, sorted by name. A missing
    /// directory lists as empty.
    async fn list_entries(&self, path: &str) -> PreviewResult<Vec<StoreEntry>>;

    async fn read(&self, path: &str) -> PreviewResult<Vec<u8>>;

    /// Replaces the content at `path` in one step; readers never observe a
    /// partially written file.
    async fn write(&self, path: &str, data: &[u8]) -> PreviewResult<()>;

    async fn exists(&self, path: &str) -> bool;

    async fn is_dir(&self, path: &str) -> bool;

    async fn mkdir(&self, path: &str) -> PreviewResult<()>;

    /// Removes a file or a whole directory tree. Missing paths are not an error.
    async fn delete(&self, path: &str) -> PreviewResult<()>;

    fn begin_batch(&self) {}

    fn commit_batch(&self) {}
}

/// [`FileStore`] rooted at a directory on the local filesystem.
pub struct LocalFileStore {
    root: PathBuf,
    batch_depth: AtomicUsize,
    batched_changes: AtomicUsize,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            batch_depth: AtomicUsize::new(0),
            batched_changes: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PreviewResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(PreviewError::InvalidPath(path.to_string())),
            }
        }
        Ok(self.root.join(relative))
    }

    fn record_change(&self, what: &str, path: &str) {
        if self.batch_depth.load(Ordering::SeqCst) > 0 {
            self.batched_changes.fetch_add(1, Ordering::SeqCst);
        } else {
            debug!("Storage change: {} {}", what, path);
        }
    }
}

fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn list_entries(&self, path: &str) -> PreviewResult<Vec<StoreEntry>> {
        let dir = self.resolve(path)?;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut listing = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().to_string();
            listing.push(StoreEntry {
                path: join_path(path, &name),
                name,
                size: metadata.len(),
                is_dir: metadata.is_dir(),
            });
        }

        listing.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    async fn read(&self, path: &str) -> PreviewResult<Vec<u8>> {
        let file = self.resolve(path)?;
        Ok(fs::read(&file).await?)
    }

    async fn write(&self, path: &str, data: &[u8]) -> PreviewResult<()> {
        let target = self.resolve(path)?;
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| PreviewError::InvalidPath(path.to_string()))?;

        let temp = target.with_file_name(format!(
            ".{}.part-{}-{}",
            file_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));

        let result = match fs::write(&temp, data).await {
            Ok(()) => fs::rename(&temp, &target).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            // A failed write may still have created part of the file
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        self.record_change("write", path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(file) => fs::try_exists(&file).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn is_dir(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(file) => fs::metadata(&file)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn mkdir(&self, path: &str) -> PreviewResult<()> {
        let dir = self.resolve(path)?;
        fs::create_dir_all(&dir).await?;
        self.record_change("mkdir", path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> PreviewResult<()> {
        let target = self.resolve(path)?;

        let metadata = match fs::metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            fs::remove_dir_all(&target).await?;
        } else {
            fs::remove_file(&target).await?;
        }

        self.record_change("delete", path);
        Ok(())
    }

    fn begin_batch(&self) {
        self.batch_depth.fetch_add(1, Ordering::SeqCst);
    }

    fn commit_batch(&self) {
        let previous = self
            .batch_depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| {
                Some(depth.saturating_sub(1))
            })
            .unwrap_or(0);

        if previous <= 1 {
            let changes = self.batched_changes.swap(0, Ordering::SeqCst);
            debug!("Committed storage batch with {} changes", changes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp_dir.path());

        store.mkdir("thumbnails/7").await.unwrap();
        store
            .write("thumbnails/7/10-10.png", b"png bytes")
            .await
            .unwrap();

        assert!(store.exists("thumbnails/7/10-10.png").await);
        assert!(store.is_dir("thumbnails/7").await);
        assert!(!store.is_dir("thumbnails/7/10-10.png").await);
        assert_eq!(
            store.read("thumbnails/7/10-10.png").await.unwrap(),
            b"png bytes"
        );

        let listing = store.list_entries("thumbnails/7/").await.unwrap();
        assert_eq!(
            listing,
            vec![StoreEntry {
                name: "10-10.png".to_string(),
                path: "thumbnails/7/10-10.png".to_string(),
                size: 9,
                is_dir: false,
            }]
        );
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp_dir.path());

        let listing = store.list_entries("thumbnails/404/").await.unwrap();
        assert!(listing.is_empty());
    }

    #[tokio::test]
    async fn test_write_leaves_no_temporary_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp_dir.path());

        store.mkdir("a").await.unwrap();
        store.write("a/1-1.png", b"first").await.unwrap();
        store.write("a/1-1.png", b"second").await.unwrap();

        let listing = store.list_entries("a").await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(store.read("a/1-1.png").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_failed_write_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp_dir.path());

        // A non-empty directory cannot be replaced by a file
        store.mkdir("a/1-1.png/inner").await.unwrap();
        assert!(store.write("a/1-1.png", b"data").await.is_err());

        let listing = store.list_entries("a").await.unwrap();
        assert_eq!(listing.len(), 1);
        assert!(listing[0].is_dir);

        // Missing parent directory
        assert!(store.write("missing/1-1.png", b"data").await.is_err());
        assert!(store.list_entries("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_directory_tree() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp_dir.path());

        store.mkdir("thumbnails/1").await.unwrap();
        store.write("thumbnails/1/4-4-max.png", b"x").await.unwrap();

        store.begin_batch();
        store.delete("thumbnails/1/").await.unwrap();
        store.delete("thumbnails/2/").await.unwrap();
        store.commit_batch();

        assert!(!store.exists("thumbnails/1").await);
        assert!(store.list_entries("thumbnails/1/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(temp_dir.path());

        let result = store.read("../etc/passwd").await;
        assert!(matches!(result, Err(PreviewError::InvalidPath(_))));
        assert!(!store.exists("../etc/passwd").await);
    }
}
