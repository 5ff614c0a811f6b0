//! Local disk storage backend

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{ObjectInfo, StorageBackend, normalize_key, validate_key};
use crate::error::StorageError;

const TEMP_PREFIX: &str = ".autostore-";
const TEMP_SUFFIX: &str = ".tmp";

/// Local disk storage backend
///
/// Stores objects as plain files below `<root>/<key>`, so an existing
/// directory tree can be opened as a store directly.
pub struct LocalStorage {
    root: PathBuf,
    uri: String,
    /// Directories this backend created temp files in
    temp_dirs: Mutex<HashSet<PathBuf>>,
}

impl LocalStorage {
    /// Create a new local storage backend
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        info!("Initialized local storage at {:?}", root);

        Ok(Self {
            uri: root.to_string_lossy().to_string(),
            root,
            temp_dirs: Mutex::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the file path for a key
    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let key = validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn temp_path_for(&self, path: &Path) -> PathBuf {
        let dir = path.parent().unwrap_or(&self.root);
        self.temp_dirs.lock().insert(dir.to_path_buf());
        dir.join(format!("{}{}{}", TEMP_PREFIX, Uuid::new_v4(), TEMP_SUFFIX))
    }

    fn relative_key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }

    async fn object_info(&self, path: &Path, key: String) -> Result<ObjectInfo, StorageError> {
        let metadata = fs::metadata(path).await.map_err(|e| map_not_found(e, &key))?;
        if metadata.is_dir() {
            return Err(StorageError::NotFound(key));
        }

        Ok(ObjectInfo {
            key,
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            e_tag: None,
        })
    }

    /// Walk a directory, collecting files (and temp files when asked)
    async fn walk(
        &self,
        start: PathBuf,
        recursive: bool,
        include_temp: bool,
    ) -> Result<Vec<PathBuf>, StorageError> {
        let mut files = Vec::new();
        let mut pending = vec![start];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();

                if file_type.is_dir() {
                    if recursive {
                        pending.push(path);
                    }
                    continue;
                }

                if is_temp_file(&path) != include_temp {
                    continue;
                }

                files.push(path);
            }
        }

        Ok(files)
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_PREFIX) && n.ends_with(TEMP_SUFFIX))
}

fn map_not_found(e: std::io::Error, key: &str) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn metadata(&self, key: &str) -> Result<ObjectInfo, StorageError> {
        let path = self.object_path(key)?;
        self.object_info(&path, validate_key(key)?).await
    }

    async fn read(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.object_path(key)?;
        debug!("Reading object from {:?}", path);

        let data = fs::read(&path).await.map_err(|e| map_not_found(e, key))?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        debug!("Writing {} bytes to {:?}", data.len(), path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write atomically using a temp file
        let temp_path = self.temp_path_for(&path);
        if let Err(e) = fs::write(&temp_path, &data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    async fn upload_file(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        debug!("Copying {:?} into {:?}", local_path, path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.temp_path_for(&path);
        if let Err(e) = fs::copy(local_path, &temp_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(map_not_found(e, &local_path.to_string_lossy()));
        }
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    async fn download_file(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        debug!("Copying {:?} to {:?}", path, local_path);

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::copy(&path, local_path)
            .await
            .map_err(|e| map_not_found(e, key))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;
        debug!("Deleting {:?}", path);

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StorageError::Io(e)),
        };

        if metadata.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
        Ok(true)
    }

    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectInfo>, StorageError> {
        let prefix = normalize_key(prefix)?;
        let start = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&prefix)
        };

        let mut objects = Vec::new();
        for path in self.walk(start, recursive, false).await? {
            let Some(key) = self.relative_key(&path) else {
                continue;
            };
            match self.object_info(&path, key).await {
                Ok(info) => objects.push(info),
                // Removed between listing and stat
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn is_dataset(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;

        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => {
                Ok(!self.walk(path, true, false).await?.is_empty())
            }
            Ok(_) => Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Remove leftover temp files from the directories this backend wrote to
    async fn cleanup(&self) -> Result<(), StorageError> {
        let dirs: Vec<PathBuf> = self.temp_dirs.lock().drain().collect();

        let mut leftovers = Vec::new();
        for dir in dirs {
            match self.walk(dir.clone(), false, true).await {
                Ok(found) => leftovers.extend(found),
                Err(e) => warn!("Failed to scan {:?} for temp files: {}", dir, e),
            }
        }

        for path in leftovers {
            debug!("Removing leftover temp file {:?}", path);
            if let Err(e) = fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!("Failed to remove temp file {:?}: {}", path, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_storage() -> (LocalStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path().join("store")).await.unwrap();
        (storage, temp_dir)
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let (storage, _dir) = create_test_storage().await;

        storage
            .write("nested/dir/file.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        assert!(storage.exists("nested/dir/file.txt").await.unwrap());
        assert_eq!(
            storage.read("/nested/dir/file.txt").await.unwrap(),
            Bytes::from_static(b"hello")
        );

        let info = storage.metadata("nested/dir/file.txt").await.unwrap();
        assert_eq!(info.key, "nested/dir/file.txt");
        assert_eq!(info.size, 5);
        assert!(info.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_read_missing() {
        let (storage, _dir) = create_test_storage().await;

        let err = storage.read("missing.txt").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!storage.exists("missing.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let (storage, _dir) = create_test_storage().await;

        let err = storage.read("../outside.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_delete_file_and_directory() {
        let (storage, _dir) = create_test_storage().await;

        storage.write("a.txt", Bytes::from_static(b"a")).await.unwrap();
        storage.write("set/1.txt", Bytes::from_static(b"1")).await.unwrap();
        storage.write("set/2.txt", Bytes::from_static(b"2")).await.unwrap();

        assert!(storage.delete("a.txt").await.unwrap());
        assert!(!storage.delete("a.txt").await.unwrap());
        assert!(storage.delete("set").await.unwrap());
        assert!(storage.list("", true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_recursive_and_flat() {
        let (storage, _dir) = create_test_storage().await;

        for key in ["b.txt", "a.txt", "sub/c.txt", "sub/deeper/d.txt"] {
            storage.write(key, Bytes::from_static(b"x")).await.unwrap();
        }

        let keys: Vec<String> = storage
            .list("", true)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["a.txt", "b.txt", "sub/c.txt", "sub/deeper/d.txt"]);

        let keys: Vec<String> = storage
            .list("", false)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["a.txt", "b.txt"]);

        let keys: Vec<String> = storage
            .list("sub", true)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["sub/c.txt", "sub/deeper/d.txt"]);

        assert!(storage.list("nope", true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_is_dataset() {
        let (storage, _dir) = create_test_storage().await;

        storage.write("single.csv", Bytes::from_static(b"a\n1\n")).await.unwrap();
        storage.write("parts/p1.csv", Bytes::from_static(b"a\n1\n")).await.unwrap();
        fs::create_dir_all(storage.root().join("empty")).await.unwrap();

        assert!(!storage.is_dataset("single.csv").await.unwrap());
        assert!(storage.is_dataset("parts").await.unwrap());
        assert!(!storage.is_dataset("empty").await.unwrap());
        assert!(!storage.is_dataset("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_upload_and_download_file() {
        let (storage, dir) = create_test_storage().await;

        let source = dir.path().join("source.bin");
        fs::write(&source, b"payload").await.unwrap();

        storage.upload_file(&source, "up/source.bin").await.unwrap();
        assert_eq!(
            storage.read("up/source.bin").await.unwrap(),
            Bytes::from_static(b"payload")
        );

        let target = dir.path().join("out/target.bin");
        storage.download_file("up/source.bin", &target).await.unwrap();
        assert_eq!(fs::read(&target).await.unwrap(), b"payload");

        let err = storage
            .download_file("missing.bin", &target)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cleanup_removes_temp_files() {
        let (storage, _dir) = create_test_storage().await;

        storage.write("keep.txt", Bytes::from_static(b"k")).await.unwrap();
        let stale = storage.root().join(".autostore-stale.tmp");
        let untouched = storage.root().join("other");
        fs::create_dir_all(&untouched).await.unwrap();
        let foreign = untouched.join(".autostore-foreign.tmp");
        fs::write(&foreign, b"not ours").await.unwrap();
        fs::write(&stale, b"partial").await.unwrap();

        let keys: Vec<String> = storage
            .list("", true)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["keep.txt"]);

        storage.cleanup().await.unwrap();
        assert!(!stale.exists());
        assert!(storage.exists("keep.txt").await.unwrap());

        // Only directories written through this backend are scanned
        assert!(foreign.exists());
    }

    #[tokio::test]
    async fn test_cleanup_without_writes_scans_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let stale = temp_dir.path().join(".autostore-old.tmp");
        fs::write(&stale, b"partial").await.unwrap();

        let storage = LocalStorage::new(temp_dir.path()).await.unwrap();
        storage.read("missing.txt").await.unwrap_err();
        storage.cleanup().await.unwrap();

        assert!(stale.exists());
    }
}
