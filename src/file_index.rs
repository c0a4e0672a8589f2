use async_trait::async_trait;
use log::warn;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::mimetype_detector;

/// Snapshot of a file in the user's storage. The id is stable across renames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub id: u64,
    pub path: String,
    pub mimetype: String,
    pub readable: bool,
    pub is_dir: bool,
}

/// Lookup of source files by logical path or by id.
#[async_trait]
pub trait FileIndex: Send + Sync {
    async fn file_info(&self, path: &str) -> Option<SourceFile>;

    async fn file_by_id(&self, id: u64) -> Option<SourceFile>;

    /// Direct children of a directory; empty for files and unknown paths.
    async fn children(&self, path: &str) -> Vec<SourceFile>;
}

pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn detect_mimetype(path: &str) -> String {
    mimetype_detector::from_path(path)
        .map(|mime| mime.to_string())
        .unwrap_or_else(|| mimetype_detector::OCTET_STREAM.to_string())
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

struct IndexState {
    next_id: u64,
    by_path: BTreeMap<String, SourceFile>,
}

/// In-process [`FileIndex`] that hands out ids in registration order.
pub struct MemoryFileIndex {
    state: Mutex<IndexState>,
}

impl Default for MemoryFileIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileIndex {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IndexState {
                next_id: 1,
                by_path: BTreeMap::new(),
            }),
        }
    }

    /// Registers a file, detecting its mimetype from the extension.
    pub fn add_file(&self, path: &str) -> Option<SourceFile> {
        self.insert(path, detect_mimetype(path), false)
    }

    pub fn add_file_with_mimetype(&self, path: &str, mimetype: &str) -> Option<SourceFile> {
        self.insert(path, mimetype.to_string(), false)
    }

    /// Registers a file under an id assigned elsewhere, e.g. by the caller's
    /// own file database.
    pub fn add_file_with_id(&self, id: u64, path: &str) -> Option<SourceFile> {
        let path = normalize_path(path);
        let mimetype = detect_mimetype(&path);
        let Some(next_id) = id.checked_add(1) else {
            warn!("File id {} is out of range", id);
            return None;
        };
        let mut state = self.state.lock().ok()?;

        if state.by_path.values().any(|file| file.id == id && file.path != path) {
            warn!("File id {} is already taken", id);
            return None;
        }

        let file = SourceFile {
            id,
            path: path.clone(),
            mimetype,
            readable: true,
            is_dir: false,
        };
        state.next_id = state.next_id.max(next_id);
        state.by_path.insert(path, file.clone());
        Some(file)
    }

    pub fn add_directory(&self, path: &str) -> Option<SourceFile> {
        self.insert(path, mimetype_detector::DIRECTORY.to_string(), true)
    }

    fn insert(&self, path: &str, mimetype: String, is_dir: bool) -> Option<SourceFile> {
        let path = normalize_path(path);
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => {
                warn!("Failed to acquire file index lock");
                return None;
            }
        };

        if let Some(existing) = state.by_path.get(&path) {
            return Some(existing.clone());
        }

        let file = SourceFile {
            id: state.next_id,
            path: path.clone(),
            mimetype,
            readable: true,
            is_dir,
        };
        state.next_id += 1;
        state.by_path.insert(path, file.clone());
        Some(file)
    }

    pub fn set_readable(&self, path: &str, readable: bool) {
        let path = normalize_path(path);
        if let Ok(mut state) = self.state.lock() {
            if let Some(file) = state.by_path.get_mut(&path) {
                file.readable = readable;
            }
        }
    }

    /// Moves a file to a new path, keeping its id.
    pub fn rename(&self, from: &str, to: &str) -> Option<SourceFile> {
        let from = normalize_path(from);
        let to = normalize_path(to);
        let mut state = self.state.lock().ok()?;

        let mut file = state.by_path.remove(&from)?;
        file.path = to.clone();
        state.by_path.insert(to, file.clone());
        Some(file)
    }

    /// Forgets a path and everything below it.
    pub fn remove(&self, path: &str) {
        let path = normalize_path(path);
        let prefix = format!("{}/", path);
        if let Ok(mut state) = self.state.lock() {
            state
                .by_path
                .retain(|key, _| key != &path && !key.starts_with(&prefix));
        }
    }
}

#[async_trait]
impl FileIndex for MemoryFileIndex {
    async fn file_info(&self, path: &str) -> Option<SourceFile> {
        let path = normalize_path(path);
        let state = self.state.lock().ok()?;
        state.by_path.get(&path).cloned()
    }

    async fn file_by_id(&self, id: u64) -> Option<SourceFile> {
        let state = self.state.lock().ok()?;
        state.by_path.values().find(|file| file.id == id).cloned()
    }

    async fn children(&self, path: &str) -> Vec<SourceFile> {
        let path = normalize_path(path);
        match self.state.lock() {
            Ok(state) => state
                .by_path
                .values()
                .filter(|file| file.path != path && parent_of(&file.path) == path)
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/photos//a.png"), "photos/a.png");
        assert_eq!(normalize_path("./photos/"), "photos");
        assert_eq!(normalize_path("/"), "");
    }

    #[tokio::test]
    async fn test_ids_are_stable_across_renames() {
        let index = MemoryFileIndex::new();
        let file = index.add_file("photos/a.png").unwrap();
        assert_eq!(file.mimetype, "image/png");

        let renamed = index.rename("photos/a.png", "archive/b.png").unwrap();
        assert_eq!(renamed.id, file.id);
        assert!(index.file_info("photos/a.png").await.is_none());
        assert_eq!(
            index.file_by_id(file.id).await.unwrap().path,
            "archive/b.png"
        );
    }

    #[tokio::test]
    async fn test_registering_twice_keeps_id() {
        let index = MemoryFileIndex::new();
        let first = index.add_file("a.jpg").unwrap();
        let second = index.add_file("/a.jpg").unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_explicit_ids() {
        let index = MemoryFileIndex::new();
        let file = index.add_file_with_id(42, "scan.png").unwrap();
        assert_eq!(file.id, 42);
        assert!(index.add_file_with_id(42, "other.png").is_none());

        let next = index.add_file("next.png").unwrap();
        assert_eq!(next.id, 43);
        assert_eq!(index.file_by_id(42).await.unwrap().path, "scan.png");
    }

    #[tokio::test]
    async fn test_largest_id_is_refused() {
        let index = MemoryFileIndex::new();
        assert!(index.add_file_with_id(u64::MAX, "a.png").is_none());
        assert!(index.file_info("a.png").await.is_none());

        let file = index.add_file_with_id(u64::MAX - 1, "b.png").unwrap();
        assert_eq!(file.id, u64::MAX - 1);
    }

    #[tokio::test]
    async fn test_children_are_direct_only() {
        let index = MemoryFileIndex::new();
        index.add_directory("photos").unwrap();
        index.add_directory("photos/2024").unwrap();
        index.add_file("photos/a.png").unwrap();
        index.add_file("photos/2024/b.png").unwrap();

        let mut names: Vec<String> = index
            .children("photos")
            .await
            .into_iter()
            .map(|f| f.path)
            .collect();
        names.sort();
        assert_eq!(names, vec!["photos/2024", "photos/a.png"]);
    }

    #[tokio::test]
    async fn test_remove_drops_subtree() {
        let index = MemoryFileIndex::new();
        index.add_directory("photos").unwrap();
        index.add_file("photos/a.png").unwrap();
        index.add_file("photos.png").unwrap();

        index.remove("photos");
        assert!(index.file_info("photos/a.png").await.is_none());
        assert!(index.file_info("photos.png").await.is_some());
    }
}
