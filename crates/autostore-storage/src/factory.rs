//! Backend selection by URI scheme

use object_store::memory::InMemory;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::local::LocalStorage;
use crate::options::Options;
use crate::s3::S3Storage;
use crate::uri::StorageUri;

/// In-memory stores, shared per `memory://<name>` within the process
static MEMORY_STORES: LazyLock<Mutex<HashMap<String, Arc<InMemory>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

pub fn is_local_scheme(scheme: &str) -> bool {
    scheme.is_empty() || scheme.eq_ignore_ascii_case("file")
}

pub fn is_s3_scheme(scheme: &str) -> bool {
    scheme.eq_ignore_ascii_case("s3")
}

/// Create the backend serving a storage URI
pub async fn backend_for(
    uri: &StorageUri,
    options: &Options,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    debug!("Creating backend for {}", uri);

    match uri.scheme.as_str() {
        "" => Ok(Arc::new(LocalStorage::new(&uri.path).await?)),
        "file" => {
            let path = if uri.netloc.is_empty() {
                PathBuf::from(&uri.path)
            } else {
                // file://relative/dir
                PathBuf::from(format!("{}{}", uri.netloc, uri.path))
            };
            Ok(Arc::new(LocalStorage::new(path).await?))
        }
        "s3" => {
            let mut config = options.s3.clone();
            if config.bucket.is_none() {
                if uri.netloc.is_empty() {
                    return Err(StorageError::InvalidUri(format!(
                        "S3 URI without bucket: {}",
                        uri
                    )));
                }
                config.bucket = Some(uri.netloc.clone());
            }
            if config.prefix.is_none() {
                config.prefix = Some(uri.relative_key());
            }
            Ok(Arc::new(S3Storage::new(config).await?))
        }
        "memory" => {
            let store = MEMORY_STORES
                .lock()
                .entry(uri.netloc.clone())
                .or_insert_with(|| Arc::new(InMemory::new()))
                .clone();
            Ok(Arc::new(S3Storage::from_store(
                store,
                uri.to_string(),
                &uri.relative_key(),
            )?))
        }
        other => Err(StorageError::UnsupportedScheme(other.to_string())),
    }
}
