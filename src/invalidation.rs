//! Cache invalidation hooks.
//!
//! Previews are only ever removed a whole folder at a time: when a file's
//! content changes, or when it is deleted. Deleting a directory needs the ids
//! of everything below it, which are gone once the delete went through, so
//! they are captured up front into a [`PendingDelete`] that the caller hands
//! back after the delete.

use log::{debug, info};

use crate::file_index::SourceFile;
use crate::preview_types::PreviewResult;
use crate::resolver::PreviewResolver;

/// Files whose previews must go once a pending delete has been carried out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingDelete {
    path: String,
    files: Vec<SourceFile>,
}

impl PendingDelete {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn file_ids(&self) -> Vec<u64> {
        self.files.iter().map(|file| file.id).collect()
    }
}

impl PreviewResolver {
    /// Deletes every cached rendition of a file, master included.
    pub async fn invalidate(&self, file_id: u64) -> PreviewResult<()> {
        info!("Clearing previews for file {}", file_id);
        self.previews.delete_all(&[file_id]).await
    }

    /// Call after a file's content was written.
    pub async fn post_write(&self, path: &str) -> PreviewResult<()> {
        match self.index.file_info(path).await {
            Some(file) if !file.is_dir => self.invalidate(file.id).await,
            Some(_) => Ok(()),
            None => {
                debug!("No file info for written path {}", path);
                Ok(())
            }
        }
    }

    /// Call before deleting `path`. Captures the file and, for a directory,
    /// every file below it.
    pub async fn prepare_delete(&self, path: &str) -> Option<PendingDelete> {
        let root = self.index.file_info(path).await?;

        let mut files = Vec::new();
        let mut pending_dirs = Vec::new();
        if root.is_dir {
            pending_dirs.push(root.path.clone());
        }
        files.push(root);

        while let Some(dir) = pending_dirs.pop() {
            for child in self.index.children(&dir).await {
                if child.is_dir {
                    pending_dirs.push(child.path.clone());
                } else {
                    files.push(child);
                }
            }
        }

        debug!(
            "Prepared delete of {} covering {} files",
            path,
            files.len()
        );
        Some(PendingDelete {
            path: path.to_string(),
            files,
        })
    }

    /// Call once the delete prepared by [`Self::prepare_delete`] went through.
    pub async fn post_delete(&self, pending: PendingDelete) -> PreviewResult<()> {
        let file_ids = pending.file_ids();
        info!(
            "Clearing previews of {} files under deleted path {}",
            file_ids.len(),
            pending.path
        );
        self.previews.delete_all(&file_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreviewConfig;
    use crate::file_index::{FileIndex, MemoryFileIndex};
    use crate::file_store::{FileStore, LocalFileStore};
    use crate::naming;
    use crate::providers::ImageProvider;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        resolver: PreviewResolver,
        index: Arc<MemoryFileIndex>,
        store: Arc<LocalFileStore>,
        _temp_dir: TempDir,
    }

    fn create_fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(LocalFileStore::new(temp_dir.path()));
        let index = Arc::new(MemoryFileIndex::new());
        let resolver = PreviewResolver::builder(
            PreviewConfig::default(),
            store.clone() as Arc<dyn FileStore>,
            index.clone() as Arc<dyn FileIndex>,
        )
        .registration(ImageProvider::registration())
        .build()
        .unwrap();

        Fixture {
            resolver,
            index,
            store,
            _temp_dir: temp_dir,
        }
    }

    async fn seed_previews(store: &LocalFileStore, file_id: u64) {
        store
            .mkdir(&naming::cache_folder_path(file_id))
            .await
            .unwrap();
        store
            .write(&naming::entry_path(file_id, "64-48-max.png"), b"x")
            .await
            .unwrap();
        store
            .write(&naming::entry_path(file_id, "32-24-with-aspect.png"), b"y")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalidate_removes_everything() {
        let fixture = create_fixture();
        let file = fixture.index.add_file("a.png").unwrap();
        seed_previews(&fixture.store, file.id).await;

        fixture.resolver.invalidate(file.id).await.unwrap();

        let listing = fixture
            .store
            .list_entries(&naming::cache_folder_path(file.id))
            .await
            .unwrap();
        assert!(listing.is_empty());
    }

    #[tokio::test]
    async fn test_post_write_invalidates_written_file_only() {
        let fixture = create_fixture();
        let a = fixture.index.add_file("a.png").unwrap();
        let b = fixture.index.add_file("b.png").unwrap();
        seed_previews(&fixture.store, a.id).await;
        seed_previews(&fixture.store, b.id).await;

        fixture.resolver.post_write("/a.png").await.unwrap();

        assert!(fixture.resolver.previews.list(a.id).await.unwrap().is_empty());
        assert_eq!(fixture.resolver.previews.list(b.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_directory_delete_clears_descendants() {
        let fixture = create_fixture();
        fixture.index.add_directory("photos").unwrap();
        fixture.index.add_directory("photos/2024").unwrap();
        let top = fixture.index.add_file("photos/top.png").unwrap();
        let nested = fixture.index.add_file("photos/2024/nested.jpg").unwrap();
        let outside = fixture.index.add_file("other.png").unwrap();
        for id in [top.id, nested.id, outside.id] {
            seed_previews(&fixture.store, id).await;
        }

        let pending = fixture.resolver.prepare_delete("photos").await.unwrap();
        let mut ids = pending.file_ids();
        ids.sort();
        assert!(ids.contains(&top.id));
        assert!(ids.contains(&nested.id));
        assert!(!ids.contains(&outside.id));

        // The index forgets the subtree before the previews are cleared
        fixture.index.remove("photos");
        fixture.resolver.post_delete(pending).await.unwrap();

        assert!(fixture.resolver.previews.list(top.id).await.unwrap().is_empty());
        assert!(fixture
            .resolver
            .previews
            .list(nested.id)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            fixture.resolver.previews.list(outside.id).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_prepare_delete_unknown_path() {
        let fixture = create_fixture();
        assert!(fixture.resolver.prepare_delete("missing.png").await.is_none());
    }
}
