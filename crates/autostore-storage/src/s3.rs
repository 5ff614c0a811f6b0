//! S3-compatible storage backend
//!
//! Uses the `object_store` crate to provide S3-compatible storage.
//! Supports AWS S3, MinIO, and other S3-compatible services. Any other
//! `ObjectStore` (such as the in-memory store) can be wrapped with
//! [`S3Storage::from_store`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, PutPayload};
use std::path::Path;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::backend::{ObjectInfo, StorageBackend, normalize_key, validate_key};
use crate::error::StorageError;
use crate::options::S3Config;

/// S3 storage backend
///
/// Stores objects at `<prefix>/<key>` inside the bucket.
pub struct S3Storage {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    uri: String,
    multipart_threshold: u64,
    multipart_chunk_size: usize,
}

impl S3Storage {
    /// Create a new S3 storage backend
    pub async fn new(config: S3Config) -> Result<Self, StorageError> {
        let bucket = config.bucket.clone().ok_or_else(|| {
            StorageError::Configuration("S3 bucket name is required".to_string())
        })?;

        // Environment credentials are used unless overridden below
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&bucket)
            .with_region(&config.region);

        // Set endpoint for MinIO or other S3-compatible services
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        // Set credentials
        if let Some(access_key) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        // Allow HTTP for local development (MinIO)
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder.build().map_err(|e| {
            StorageError::Configuration(format!("Failed to create S3 client: {}", e))
        })?;

        let prefix = normalize_key(config.prefix.as_deref().unwrap_or_default())?;
        let uri = if prefix.is_empty() {
            format!("s3://{}", bucket)
        } else {
            format!("s3://{}/{}", bucket, prefix)
        };

        info!(
            "Initialized S3 storage: bucket={}, region={}, endpoint={:?}, prefix={}",
            bucket, config.region, config.endpoint, prefix
        );

        Ok(Self {
            store: Arc::new(store),
            prefix,
            uri,
            multipart_threshold: config.multipart_threshold,
            multipart_chunk_size: config.multipart_chunk_size,
        })
    }

    /// Wrap an existing object store
    pub fn from_store(
        store: Arc<dyn ObjectStore>,
        uri: impl Into<String>,
        prefix: &str,
    ) -> Result<Self, StorageError> {
        let defaults = S3Config::default();
        Ok(Self {
            store,
            prefix: normalize_key(prefix)?,
            uri: uri.into(),
            multipart_threshold: defaults.multipart_threshold,
            multipart_chunk_size: defaults.multipart_chunk_size,
        })
    }

    pub fn with_multipart(mut self, threshold: u64, chunk_size: usize) -> Self {
        self.multipart_threshold = threshold;
        self.multipart_chunk_size = chunk_size.max(1);
        self
    }

    /// Get the object path for a key
    fn object_path(&self, key: &str) -> Result<ObjectPath, StorageError> {
        let key = validate_key(key)?;
        Ok(self.prefixed(&key))
    }

    fn prefixed(&self, key: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(key)
        } else if key.is_empty() {
            ObjectPath::from(self.prefix.as_str())
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, key))
        }
    }

    /// Strip the backend prefix from an object location
    fn relative_key(&self, location: &ObjectPath) -> String {
        let location = location.as_ref();
        if self.prefix.is_empty() {
            return location.to_string();
        }
        location
            .strip_prefix(self.prefix.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(location)
            .to_string()
    }

    fn object_info(&self, meta: ObjectMeta) -> ObjectInfo {
        ObjectInfo {
            key: self.relative_key(&meta.location),
            size: meta.size as u64,
            last_modified: Some(meta.last_modified),
            e_tag: meta.e_tag,
        }
    }

    /// All objects strictly below `dir` (not `dir` itself)
    async fn objects_below(&self, dir: &ObjectPath) -> Result<Vec<ObjectMeta>, StorageError> {
        let dir_prefix = format!("{}/", dir.as_ref());
        let listed: Vec<ObjectMeta> = self
            .store
            .list(Some(dir))
            .try_collect()
            .await
            .map_err(|e| StorageError::S3(format!("Failed to list objects: {}", e)))?;

        Ok(listed
            .into_iter()
            .filter(|m| dir.as_ref().is_empty() || m.location.as_ref().starts_with(&dir_prefix))
            .collect())
    }

    async fn multipart_upload(&self, local_path: &Path, path: &ObjectPath) -> Result<(), StorageError> {
        let file = File::open(local_path).await?;
        let mut stream = tokio_util::io::ReaderStream::new(file);

        let mut upload = self
            .store
            .put_multipart(path)
            .await
            .map_err(|e| StorageError::S3(format!("Failed to start multipart upload: {}", e)))?;

        let mut buffer = Vec::with_capacity(self.multipart_chunk_size);

        let result: Result<(), StorageError> = async {
            while let Some(chunk) = stream.next().await {
                buffer.extend_from_slice(&chunk?);

                // Last part can be smaller
                if buffer.len() >= self.multipart_chunk_size {
                    let part = std::mem::replace(
                        &mut buffer,
                        Vec::with_capacity(self.multipart_chunk_size),
                    );
                    upload
                        .put_part(PutPayload::from(Bytes::from(part)))
                        .await
                        .map_err(|e| StorageError::S3(format!("Failed to upload part: {}", e)))?;
                }
            }

            if !buffer.is_empty() {
                upload
                    .put_part(PutPayload::from(Bytes::from(std::mem::take(&mut buffer))))
                    .await
                    .map_err(|e| StorageError::S3(format!("Failed to upload final part: {}", e)))?;
            }

            upload.complete().await.map_err(|e| {
                StorageError::S3(format!("Failed to complete multipart upload: {}", e))
            })?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            if let Err(abort_err) = upload.abort().await {
                warn!(
                    "Failed to abort multipart upload (path: {:?}): {}",
                    path, abort_err
                );
            }
            return Err(e);
        }

        Ok(())
    }
}

fn map_store_error(e: object_store::Error, key: &str) -> StorageError {
    match e {
        object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
        _ => StorageError::S3(e.to_string()),
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => {
                // A prefix with objects below it exists as a directory
                Ok(!self.objects_below(&path).await?.is_empty())
            }
            Err(e) => Err(StorageError::S3(e.to_string())),
        }
    }

    async fn metadata(&self, key: &str) -> Result<ObjectInfo, StorageError> {
        let path = self.object_path(key)?;
        let meta = self
            .store
            .head(&path)
            .await
            .map_err(|e| map_store_error(e, key))?;
        Ok(self.object_info(meta))
    }

    async fn read(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.object_path(key)?;
        debug!("Reading object from S3: {:?}", path);

        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| map_store_error(e, key))?;

        result
            .bytes()
            .await
            .map_err(|e| StorageError::S3(format!("Failed to read bytes: {}", e)))
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        debug!("Writing {} bytes to S3: {:?}", data.len(), path);

        self.store
            .put(&path, PutPayload::from(data))
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;

        Ok(())
    }

    async fn upload_file(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        let size = fs::metadata(local_path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StorageError::NotFound(local_path.to_string_lossy().to_string())
                } else {
                    StorageError::Io(e)
                }
            })?
            .len();

        if size < self.multipart_threshold {
            debug!("Uploading {:?} ({} bytes) to S3: {:?}", local_path, size, path);
            let data = fs::read(local_path).await?;
            return self.write(key, Bytes::from(data)).await;
        }

        debug!(
            "Uploading {:?} ({} bytes) to S3 with multipart upload: {:?}",
            local_path, size, path
        );
        self.multipart_upload(local_path, &path).await
    }

    async fn download_file(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        debug!("Downloading S3 object {:?} to {:?}", path, local_path);

        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| map_store_error(e, key))?;

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = File::create(local_path).await?;
        let mut stream = result.into_stream();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| StorageError::S3(format!("Failed to read chunk: {}", e)))?;
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;
        debug!("Deleting from S3: {:?}", path);

        let mut deleted = false;

        match self.store.head(&path).await {
            Ok(_) => {
                self.store
                    .delete(&path)
                    .await
                    .map_err(|e| StorageError::S3(e.to_string()))?;
                deleted = true;
            }
            Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(StorageError::S3(e.to_string())),
        }

        // Deleting a prefix removes every object below it
        for meta in self.objects_below(&path).await? {
            self.store
                .delete(&meta.location)
                .await
                .map_err(|e| StorageError::S3(e.to_string()))?;
            deleted = true;
        }

        Ok(deleted)
    }

    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectInfo>, StorageError> {
        let prefix = normalize_key(prefix)?;
        let path = self.prefixed(&prefix);

        let metas = if recursive {
            self.objects_below(&path).await?
        } else {
            let result = self
                .store
                .list_with_delimiter(Some(&path))
                .await
                .map_err(|e| StorageError::S3(format!("Failed to list objects: {}", e)))?;
            result.objects
        };

        let mut objects: Vec<ObjectInfo> = metas.into_iter().map(|m| self.object_info(m)).collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn is_dataset(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;

        match self.store.head(&path).await {
            Ok(_) => Ok(false),
            Err(object_store::Error::NotFound { .. }) => {
                Ok(!self.objects_below(&path).await?.is_empty())
            }
            Err(e) => Err(StorageError::S3(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn create_test_storage(prefix: &str) -> S3Storage {
        S3Storage::from_store(Arc::new(InMemory::new()), "memory://test", prefix).unwrap()
    }

    #[tokio::test]
    async fn test_write_read_with_prefix() {
        let storage = create_test_storage("base/dir");

        storage
            .write("reports/q1.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert!(storage.exists("reports/q1.json").await.unwrap());
        assert_eq!(
            storage.read("reports/q1.json").await.unwrap(),
            Bytes::from_static(b"{}")
        );

        let info = storage.metadata("reports/q1.json").await.unwrap();
        assert_eq!(info.key, "reports/q1.json");
        assert_eq!(info.size, 2);
    }

    #[tokio::test]
    async fn test_read_missing() {
        let storage = create_test_storage("");
        let err = storage.read("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(storage.metadata("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_and_dataset() {
        let storage = create_test_storage("root");

        for key in ["a.csv", "parts/p1.csv", "parts/p2.csv", "parts/nested/p3.csv"] {
            storage.write(key, Bytes::from_static(b"x")).await.unwrap();
        }

        let keys: Vec<String> = storage
            .list("", true)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(
            keys,
            vec!["a.csv", "parts/nested/p3.csv", "parts/p1.csv", "parts/p2.csv"]
        );

        let keys: Vec<String> = storage
            .list("parts", false)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["parts/p1.csv", "parts/p2.csv"]);

        assert!(storage.is_dataset("parts").await.unwrap());
        assert!(!storage.is_dataset("a.csv").await.unwrap());
        assert!(!storage.is_dataset("missing").await.unwrap());
        assert!(storage.exists("parts").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_object_and_prefix() {
        let storage = create_test_storage("");

        storage.write("one.txt", Bytes::from_static(b"1")).await.unwrap();
        storage.write("set/a.txt", Bytes::from_static(b"a")).await.unwrap();
        storage.write("set/b.txt", Bytes::from_static(b"b")).await.unwrap();
        storage.write("settings.txt", Bytes::from_static(b"s")).await.unwrap();

        assert!(storage.delete("one.txt").await.unwrap());
        assert!(!storage.delete("one.txt").await.unwrap());
        assert!(storage.delete("set").await.unwrap());

        let keys: Vec<String> = storage
            .list("", true)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["settings.txt"]);
    }

    #[tokio::test]
    async fn test_multipart_upload_and_download() {
        let storage = create_test_storage("up").with_multipart(16, 8);
        let dir = tempfile::TempDir::new().unwrap();

        let source = dir.path().join("big.bin");
        let payload: Vec<u8> = (0..100u8).collect();
        fs::write(&source, &payload).await.unwrap();

        storage.upload_file(&source, "big.bin").await.unwrap();
        assert_eq!(storage.read("big.bin").await.unwrap().as_ref(), payload.as_slice());

        let target = dir.path().join("copy/big.bin");
        storage.download_file("big.bin", &target).await.unwrap();
        assert_eq!(fs::read(&target).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_small_upload_uses_single_put() {
        let storage = create_test_storage("");
        let dir = tempfile::TempDir::new().unwrap();

        let source = dir.path().join("small.txt");
        fs::write(&source, b"small").await.unwrap();

        storage.upload_file(&source, "small.txt").await.unwrap();
        assert_eq!(
            storage.read("small.txt").await.unwrap(),
            Bytes::from_static(b"small")
        );

        let err = storage
            .upload_file(&dir.path().join("absent"), "absent")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
