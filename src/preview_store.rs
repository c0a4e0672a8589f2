use log::debug;
use std::sync::Arc;

use crate::file_store::FileStore;
use crate::naming::{self, EntryName};
use crate::preview_types::PreviewResult;

/// A cache entry whose name parsed as a rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRendition {
    pub name: EntryName,
    pub path: String,
}

/// Thin wrapper over a [`FileStore`] scoped to the thumbnails tree. It keeps
/// no state of its own; every call goes to the underlying store.
#[derive(Clone)]
pub struct PreviewStore {
    store: Arc<dyn FileStore>,
}

impl PreviewStore {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }

    /// Lists the renditions cached for a file. Names that are not renditions
    /// are skipped.
    pub async fn list(&self, file_id: u64) -> PreviewResult<Vec<CachedRendition>> {
        let folder = naming::cache_folder_path(file_id);
        let entries = self.store.list_entries(&folder).await?;

        Ok(entries
            .into_iter()
            .filter(|entry| !entry.is_dir)
            .filter_map(|entry| match EntryName::parse(&entry.name) {
                Some(name) => Some(CachedRendition {
                    name,
                    path: entry.path,
                }),
                None => {
                    debug!("Ignoring foreign cache entry {}", entry.path);
                    None
                }
            })
            .collect())
    }

    pub async fn read(&self, path: &str) -> PreviewResult<Vec<u8>> {
        self.store.read(path).await
    }

    pub async fn write(&self, path: &str, data: &[u8]) -> PreviewResult<()> {
        self.store.write(path, data).await
    }

    pub async fn mkdir_if_missing(&self, path: &str) -> PreviewResult<()> {
        if !self.store.is_dir(path).await {
            self.store.mkdir(path).await?;
        }
        Ok(())
    }

    /// Creates `thumbnails/` and `thumbnails/<fileId>/` as needed.
    pub async fn ensure_folder(&self, file_id: u64) -> PreviewResult<()> {
        self.mkdir_if_missing(naming::THUMBNAILS_FOLDER).await?;
        self.mkdir_if_missing(&naming::cache_folder_path(file_id))
            .await
    }

    /// Deletes the cache folders of all given files inside one storage batch.
    pub async fn delete_all(&self, file_ids: &[u64]) -> PreviewResult<()> {
        self.store.begin_batch();
        let mut result = Ok(());
        for file_id in file_ids {
            let folder = naming::cache_folder_path(*file_id);
            if let Err(e) = self.store.delete(&folder).await {
                result = Err(e);
                break;
            }
            debug!("Deleted preview folder {}", folder);
        }
        self.store.commit_batch();
        result
    }
}
