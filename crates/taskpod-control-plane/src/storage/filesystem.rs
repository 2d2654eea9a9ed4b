//! Storage on the local filesystem: `{base}/{storage_id}/{absolute path}`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;

use taskpod_core::{EntryId, StorageData, StorageDataEntry};

use super::FileStorageHandler;
use crate::error::StorageError;

/// Filesystem-backed [`FileStorageHandler`].
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    base_path: PathBuf,
}

impl FileSystemStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn storage_path(&self, storage_id: &str) -> PathBuf {
        self.base_path.join(storage_id)
    }
}

#[async_trait]
impl FileStorageHandler for FileSystemStorage {
    async fn create_storage(&self, storage_id: &str) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(self.storage_path(storage_id))
            .await
            .map_err(|e| StorageError::io("create storage", storage_id, e))?;
        info!(storage_id = %storage_id, "Storage created");
        Ok(())
    }

    async fn delete_storage(&self, storage_id: &str) -> Result<(), StorageError> {
        let path = self.storage_path(storage_id);
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::io("stat storage", storage_id, e))?
        {
            return Err(StorageError::StorageNotFound(storage_id.to_string()));
        }
        tokio::fs::remove_dir_all(&path)
            .await
            .map_err(|e| StorageError::io("delete storage", storage_id, e))?;
        info!(storage_id = %storage_id, "Storage deleted");
        Ok(())
    }

    async fn storage_exists(&self, storage_id: &str) -> Result<bool, StorageError> {
        tokio::fs::try_exists(self.storage_path(storage_id))
            .await
            .map_err(|e| StorageError::io("stat storage", storage_id, e))
    }

    async fn save(&self, storage_id: &str, data: &StorageData) -> Result<(), StorageError> {
        check_segment(storage_id)?;
        let order = data.level_order();
        for id in &order {
            check_segment(data.entry(*id).storage_id())?;
        }

        let root = self.storage_path(storage_id);
        for id in order {
            let entry = data.entry(id);
            let path = root.join(data.absolute_path(id));
            match entry.data() {
                None => {
                    tokio::fs::create_dir_all(&path)
                        .await
                        .map_err(|e| StorageError::io("create directory", entry.name(), e))?;
                }
                Some(bytes) => {
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| StorageError::io("create directory", entry.name(), e))?;
                    }
                    tokio::fs::write(&path, bytes)
                        .await
                        .map_err(|e| StorageError::io("write", entry.name(), e))?;
                }
            }
            debug!(storage_id = %storage_id, entry = %entry.name(), "Entry saved");
        }
        Ok(())
    }

    async fn read(&self, storage_id: &str, root_name: &str) -> Result<StorageData, StorageError> {
        let root = self.storage_path(storage_id).join(root_name);
        let exists = tokio::fs::try_exists(&root)
            .await
            .map_err(|e| StorageError::io("stat", root_name, e))?;
        if !exists {
            return Err(StorageError::EntryNotFound {
                storage_id: storage_id.to_string(),
                entry: root_name.to_string(),
            });
        }

        let name = root_name.to_string();
        tokio::task::spawn_blocking(move || read_tree(&root))
            .await
            .map_err(|e| StorageError::io("read", name, io::Error::other(e)))?
    }
}

/// Storage ids and node names must each be one plain path segment.
fn check_segment(segment: &str) -> Result<(), StorageError> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\\')
    {
        return Err(StorageError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

/// Walk `root` and put every node of the tree on the worklist.
fn read_tree(root: &Path) -> Result<StorageData, StorageError> {
    let mut data = StorageData::new();
    let mut ids: HashMap<PathBuf, EntryId> = HashMap::new();

    for item in WalkDir::new(root).sort_by_file_name() {
        let item = item.map_err(|e| {
            let entry = e
                .path()
                .map_or_else(|| root.display().to_string(), |p| p.display().to_string());
            StorageError::io("read", entry, e.into())
        })?;
        let name = item.file_name().to_string_lossy().into_owned();
        let node = if item.file_type().is_dir() {
            StorageDataEntry::directory(name.clone())
        } else {
            let bytes = std::fs::read(item.path()).map_err(|e| StorageError::io("read", &name, e))?;
            StorageDataEntry::file(name.clone(), bytes)
        };

        let id = match item.path().parent().and_then(|parent| ids.get(parent)) {
            Some(parent) if item.depth() > 0 => {
                let id = data
                    .add_child(*parent, node)
                    .map_err(|e| StorageError::io("read", &name, io::Error::other(e)))?;
                data.enqueue(id);
                id
            }
            _ => data.push_root(node),
        };
        ids.insert(item.path().to_path_buf(), id);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskpod_core::StorageDataType;
    use tempfile::TempDir;

    fn storage() -> (TempDir, FileSystemStorage) {
        let dir = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(dir.path());
        (dir, storage)
    }

    fn drain(mut data: StorageData) -> Vec<(String, StorageDataType, Option<Vec<u8>>)> {
        let mut entries = Vec::new();
        while let Some(id) = data.poll() {
            let entry = data.entry(id);
            entries.push((
                entry.name().to_string(),
                entry.kind(),
                entry.data().map(<[u8]>::to_vec),
            ));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    #[tokio::test]
    async fn test_directory_round_trip() {
        let (_dir, storage) = storage();
        storage.create_storage("s").await.unwrap();

        let mut data = StorageData::new();
        let d = data.push_root(StorageDataEntry::directory("d"));
        data.add_child(d, StorageDataEntry::file("x", vec![1, 2, 3])).unwrap();
        data.add_child(d, StorageDataEntry::file("y", vec![4, 5])).unwrap();
        storage.save("s", &data).await.unwrap();

        let read = storage.read("s", "d").await.unwrap();
        assert_eq!(
            drain(read),
            vec![
                ("d".to_string(), StorageDataType::Directory, None),
                ("x".to_string(), StorageDataType::File, Some(vec![1, 2, 3])),
                ("y".to_string(), StorageDataType::File, Some(vec![4, 5])),
            ]
        );
    }

    #[tokio::test]
    async fn test_single_file_round_trip() {
        let (_dir, storage) = storage();
        storage
            .save("s", &StorageData::from_file("threshold", b"0.5".to_vec()))
            .await
            .unwrap();
        let mut read = storage.read("s", "threshold").await.unwrap();
        assert_eq!(read.len(), 1);
        let id = read.poll().unwrap();
        assert_eq!(read.entry(id).data(), Some(&b"0.5"[..]));
    }

    #[tokio::test]
    async fn test_nested_paths_follow_storage_ids() {
        let (dir, storage) = storage();
        let mut data = StorageData::new();
        let a = data.push_root(StorageDataEntry::directory("root").with_storage_id("a"));
        let b = data
            .add_child(a, StorageDataEntry::directory("mid").with_storage_id("b"))
            .unwrap();
        let c = data
            .add_child(b, StorageDataEntry::file("leaf", vec![9]).with_storage_id("c"))
            .unwrap();
        // Child-first worklist: directories are still created before the file.
        data.poll();
        data.enqueue(c);
        data.enqueue(a);
        storage.save("s", &data).await.unwrap();

        let written = std::fs::read(dir.path().join("s/a/b/c")).unwrap();
        assert_eq!(written, vec![9]);
    }

    #[tokio::test]
    async fn test_missing_entry() {
        let (_dir, storage) = storage();
        storage.create_storage("s").await.unwrap();
        let err = storage.read("s", "nope").await.unwrap_err();
        assert!(matches!(err, StorageError::EntryNotFound { .. }));
        assert_eq!(err.entry(), "nope");
    }

    #[tokio::test]
    async fn test_storage_lifecycle() {
        let (_dir, storage) = storage();
        assert!(!storage.storage_exists("s").await.unwrap());
        storage.create_storage("s").await.unwrap();
        assert!(storage.storage_exists("s").await.unwrap());
        storage.delete_storage("s").await.unwrap();
        assert!(!storage.storage_exists("s").await.unwrap());
        let err = storage.delete_storage("s").await.unwrap_err();
        assert!(matches!(err, StorageError::StorageNotFound(_)));
    }

    #[tokio::test]
    async fn test_save_refuses_path_segments() {
        let (dir, storage) = storage();
        let mut data = StorageData::new();
        let root = data.push_root(StorageDataEntry::directory("masks"));
        data.add_child(root, StorageDataEntry::file("escaped.txt", vec![1]).with_storage_id(".."))
            .unwrap();
        let err = storage.save("s", &data).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidSegment(ref s) if s == ".."));
        assert!(!dir.path().join("s").exists());

        for storage_id in ["", ".", "..", "a/b"] {
            let err = storage
                .save(storage_id, &StorageData::from_file("value", vec![1]))
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidSegment(_)), "{storage_id:?}");
        }
    }

    #[tokio::test]
    async fn test_write_failure_names_entry() {
        let (dir, storage) = storage();
        // A file where the storage directory should be.
        std::fs::write(dir.path().join("s"), b"").unwrap();
        let err = storage
            .save("s", &StorageData::from_file("value", vec![1]))
            .await
            .unwrap_err();
        assert_eq!(err.entry(), "value");
    }
}
