//! The AutoStore facade
//!
//! `AutoStore` gives dictionary-like access to a storage URI. Keys are
//! relative to the primary backend unless they are full URIs, in which
//! case a secondary backend for `scheme://netloc` is created on first use
//! and kept for the lifetime of the store.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use autostore_storage::{
    KeyRequest, Options, StorageBackend, StorageUri, backend_for, has_scheme, is_local_scheme,
    is_s3_scheme, matches_glob,
};

use crate::cache::{CacheService, CacheStats};
use crate::data::Data;
use crate::error::CoreError;
use crate::handlers::{DataHandler, HandlerRegistry, extension_of, normalize_extension};

const DEFAULT_OPTIONS_KEY: &str = "default";

/// Per-read overrides; merged with query parameters found in the key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Handler extension to use instead of the key's extension
    pub format: Option<String>,
    /// Fetch from the backend even when a cached copy exists
    pub ignore_cache: bool,
}

impl ReadOptions {
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn ignoring_cache(mut self) -> Self {
        self.ignore_cache = true;
        self
    }
}

/// A backend plus the key to use on it
struct Target {
    backend: Arc<dyn StorageBackend>,
    key: String,
}

/// Unified access to local and object storage
pub struct AutoStore {
    storage_uri: String,
    uri: StorageUri,
    options: Options,
    options_registry: HashMap<String, Options>,
    primary: Arc<dyn StorageBackend>,
    secondary: RwLock<HashMap<String, Arc<dyn StorageBackend>>>,
    cache: Option<Arc<CacheService>>,
    handlers: HandlerRegistry,
}

impl AutoStore {
    /// Open a store with default options for the URI's scheme
    pub async fn new(storage_uri: &str) -> Result<Self, CoreError> {
        Self::build(storage_uri, None, Vec::new()).await
    }

    /// Open a store with options for the primary backend
    pub async fn with_options(storage_uri: &str, options: Options) -> Result<Self, CoreError> {
        Self::build(storage_uri, Some(options), Vec::new()).await
    }

    /// Open a store with options for several schemes
    ///
    /// The entry matching the primary scheme configures the primary
    /// backend; the rest are used for full-URI keys of their scheme.
    pub async fn with_options_list(
        storage_uri: &str,
        options: Vec<Options>,
    ) -> Result<Self, CoreError> {
        let uri = StorageUri::parse(storage_uri)?;
        let primary = primary_options(&uri.scheme, &options);
        Self::build(storage_uri, primary, options).await
    }

    async fn build(
        storage_uri: &str,
        primary: Option<Options>,
        options_list: Vec<Options>,
    ) -> Result<Self, CoreError> {
        let uri = StorageUri::parse(storage_uri)?;

        let cache_options = primary
            .as_ref()
            .or_else(|| options_list.iter().find(|o| o.cache_enabled));
        let cache = match cache_options {
            Some(o) if o.cache_enabled => Some(Arc::new(
                CacheService::new(o.cache_dir.clone(), o.cache_expiry_hours).await?,
            )),
            _ => None,
        };

        let options = primary.unwrap_or_else(|| default_options(&uri.scheme));
        let backend = backend_for(&uri, &options).await?;

        let mut options_registry = HashMap::new();
        for o in options_list {
            let key = o
                .scheme_key()
                .unwrap_or_else(|| DEFAULT_OPTIONS_KEY.to_string());
            options_registry.insert(key, o);
        }

        info!(
            "Opened store at {} (cache: {})",
            storage_uri,
            if cache.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            storage_uri: storage_uri.to_string(),
            uri,
            options,
            options_registry,
            primary: backend,
            secondary: RwLock::new(HashMap::new()),
            cache,
            handlers: HandlerRegistry::with_defaults(),
        })
    }

    pub fn storage_uri(&self) -> &str {
        &self.storage_uri
    }

    /// Options of the primary backend
    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn cache(&self) -> Option<&Arc<CacheService>> {
        self.cache.as_ref()
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Register a custom format handler, overriding built-ins for its extensions
    pub fn register_handler(&mut self, handler: Arc<dyn DataHandler>) {
        self.handlers.register(handler);
    }

    /// Load the data stored under a key
    pub async fn get(&self, key: &str) -> Result<Data, CoreError> {
        self.read(key, ReadOptions::default()).await
    }

    /// Load the data stored under a key with explicit overrides
    pub async fn read(&self, key: &str, options: ReadOptions) -> Result<Data, CoreError> {
        let request = KeyRequest::parse(key);
        let format = options.format.or(request.format);
        let ignore_cache = options.ignore_cache || request.ignore_cache;
        let target = self.resolve(&request.key).await?;

        debug!(
            "Reading {} from {} (format: {:?}, ignore_cache: {})",
            target.key,
            target.backend.uri(),
            format,
            ignore_cache
        );

        match target.backend.is_dataset(&target.key).await {
            Ok(true) => {
                return self
                    .load_dataset(&target, format.as_deref(), ignore_cache)
                    .await;
            }
            Ok(false) => {}
            Err(e) => debug!("Dataset check failed for {}, reading as file: {}", target.key, e),
        }

        self.load_file(&target, format.as_deref(), ignore_cache).await
    }

    /// Load a key and deserialize it
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, CoreError> {
        let value = self.get(key).await?.into_json()?;
        Ok(serde_json::from_value(value)?)
    }

    /// Raw object bytes, without a format handler
    pub async fn read_bytes(&self, key: &str) -> Result<Bytes, CoreError> {
        let request = KeyRequest::parse(key);
        let target = self.resolve(&request.key).await?;
        self.fetch(&target, request.ignore_cache).await
    }

    async fn load_file(
        &self,
        target: &Target,
        format: Option<&str>,
        ignore_cache: bool,
    ) -> Result<Data, CoreError> {
        let (handler, ext) = self
            .handlers
            .handler_for_key(&target.key, format)
            .ok_or_else(|| {
                CoreError::FormatNotSupported(format!("No handler found for file: {}", target.key))
            })?;

        let bytes = self.fetch(target, ignore_cache).await?;
        handler.read(&bytes, &ext)
    }

    async fn load_dataset(
        &self,
        target: &Target,
        format: Option<&str>,
        ignore_cache: bool,
    ) -> Result<Data, CoreError> {
        let members = target.backend.list(&target.key, true).await?;

        let ext = match format {
            Some(format) => Some(normalize_extension(format)),
            None => extension_of(&target.key).or_else(|| {
                members
                    .iter()
                    .filter_map(|m| extension_of(&m.key))
                    .find(|ext| self.handlers.handler_for_extension(ext).is_some())
            }),
        };
        let (handler, ext) = ext
            .and_then(|ext| self.handlers.handler_for_extension(&ext).map(|h| (h, ext)))
            .ok_or_else(|| {
                CoreError::FormatNotSupported(format!(
                    "No handler found for dataset: {}",
                    target.key
                ))
            })?;

        let prefix = format!("{}/", target.key.trim_end_matches('/'));
        let mut parts = Vec::new();
        for member in members {
            let accepted = format.is_some()
                || extension_of(&member.key)
                    .is_some_and(|e| handler.extensions().contains(&e.as_str()));
            if !accepted {
                debug!("Skipping dataset member {}", member.key);
                continue;
            }

            let member_target = Target {
                backend: target.backend.clone(),
                key: member.key.clone(),
            };
            let bytes = self.fetch(&member_target, ignore_cache).await?;
            let name = member
                .key
                .strip_prefix(&prefix)
                .unwrap_or(&member.key)
                .to_string();
            parts.push((name, bytes));
        }

        debug!(
            "Loading dataset {} ({} members, handler: {})",
            target.key,
            parts.len(),
            handler.name()
        );
        handler.read_dataset(parts, &ext)
    }

    /// Object bytes, through the cache when one is configured
    async fn fetch(&self, target: &Target, ignore_cache: bool) -> Result<Bytes, CoreError> {
        let Some(cache) = &self.cache else {
            return Ok(target.backend.read(&target.key).await?);
        };
        let backend_uri = target.backend.uri();

        if !ignore_cache {
            match cache.get(backend_uri, &target.key).await {
                Ok(Some(bytes)) => return Ok(bytes),
                Ok(None) => {}
                Err(e) => warn!("Cache read failed for {}/{}: {}", backend_uri, target.key, e),
            }
        }

        let bytes = target.backend.read(&target.key).await?;
        if let Err(e) = cache.put(backend_uri, &target.key, &bytes).await {
            warn!("Cache write failed for {}/{}: {}", backend_uri, target.key, e);
        }
        Ok(bytes)
    }

    /// Store data under a key, picking the format from the key or the data
    pub async fn put(&self, key: &str, data: impl Into<Data>) -> Result<(), CoreError> {
        let request = KeyRequest::parse(key);
        self.save(&request.key, data.into(), request.format.as_deref())
            .await
    }

    /// Store data with an explicit format
    pub async fn write(
        &self,
        key: &str,
        data: impl Into<Data>,
        format: Option<&str>,
    ) -> Result<(), CoreError> {
        let request = KeyRequest::parse(key);
        let format = format.or(request.format.as_deref());
        self.save(&request.key, data.into(), format).await
    }

    /// Serialize a value and store it
    pub async fn put_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CoreError> {
        self.put(key, Data::Json(serde_json::to_value(value)?)).await
    }

    /// Store raw bytes, without a format handler
    pub async fn write_bytes(&self, key: &str, bytes: impl Into<Bytes>) -> Result<(), CoreError> {
        let request = KeyRequest::parse(key);
        let target = self.resolve(&request.key).await?;
        target.backend.write(&target.key, bytes.into()).await?;
        self.invalidate_target(&target).await;
        Ok(())
    }

    async fn save(&self, key: &str, data: Data, format: Option<&str>) -> Result<(), CoreError> {
        let (handler, ext) = self.handler_for_write(key, &data, format)?;
        let target = self.resolve(key).await?;

        debug!(
            "Writing {} data to {} on {} (handler: {})",
            data.kind(),
            target.key,
            target.backend.uri(),
            handler.name()
        );

        let bytes = handler.write(&data, &ext)?;
        target.backend.write(&target.key, bytes).await?;
        self.invalidate_target(&target).await;
        Ok(())
    }

    fn handler_for_write(
        &self,
        key: &str,
        data: &Data,
        format: Option<&str>,
    ) -> Result<(Arc<dyn DataHandler>, String), CoreError> {
        if let Some(format) = format {
            let ext = normalize_extension(format);
            let handler = self.handlers.handler_for_extension(&ext).ok_or_else(|| {
                CoreError::FormatNotSupported(format!("No handler found for format: {}", format))
            })?;
            return accepting(handler, ext, key, data);
        }

        // A known extension decides the format, so the stored bytes always
        // read back with the same handler
        let key_ext = extension_of(key);
        if let Some(ext) = &key_ext
            && let Some(handler) = self.handlers.handler_for_extension(ext)
        {
            return accepting(handler, ext.clone(), key, data);
        }

        let handler = self.handlers.handler_for_data(data).ok_or_else(|| {
            CoreError::FormatNotSupported(format!("No handler found for {} data", data.kind()))
        })?;
        let ext = key_ext
            .or_else(|| handler.extensions().first().map(|e| e.to_string()))
            .unwrap_or_default();
        Ok((handler, ext))
    }

    /// Whether a key exists (object or non-empty prefix)
    pub async fn contains(&self, key: &str) -> Result<bool, CoreError> {
        let request = KeyRequest::parse(key);
        let target = self.resolve(&request.key).await?;
        Ok(target.backend.exists(&target.key).await?)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CoreError> {
        self.contains(key).await
    }

    /// Delete a key and its cached copy, returns whether anything was deleted
    pub async fn delete(&self, key: &str) -> Result<bool, CoreError> {
        let request = KeyRequest::parse(key);
        let target = self.resolve(&request.key).await?;
        let deleted = target.backend.delete(&target.key).await?;
        self.invalidate_target(&target).await;

        debug!("Deleted {} (existed: {})", request.key, deleted);
        Ok(deleted)
    }

    /// Keys of the primary backend matching a glob pattern
    pub async fn list_files(&self, pattern: &str, recursive: bool) -> Result<Vec<String>, CoreError> {
        let objects = self.primary.list("", recursive).await?;
        Ok(objects
            .into_iter()
            .map(|o| o.key)
            .filter(|key| matches_glob(pattern, key))
            .collect())
    }

    /// Every key of the primary backend
    pub async fn keys(&self) -> Result<Vec<String>, CoreError> {
        self.list_files("*", true).await
    }

    /// Drop the cached copy of a key, returns whether one existed
    pub async fn invalidate_cache(&self, key: &str) -> Result<bool, CoreError> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };
        let request = KeyRequest::parse(key);
        let target = self.resolve(&request.key).await?;
        cache.invalidate(target.backend.uri(), &target.key).await
    }

    pub async fn cleanup_expired_cache(&self) -> Result<u64, CoreError> {
        match &self.cache {
            Some(cache) => cache.cleanup_expired().await,
            None => Ok(0),
        }
    }

    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }

    async fn invalidate_target(&self, target: &Target) {
        if let Some(cache) = &self.cache
            && let Err(e) = cache.invalidate(target.backend.uri(), &target.key).await
        {
            warn!(
                "Failed to invalidate cache for {}/{}: {}",
                target.backend.uri(),
                target.key,
                e
            );
        }
    }

    /// Release temporary resources of every backend
    pub async fn cleanup(&self) -> Result<(), CoreError> {
        self.primary.cleanup().await?;
        for backend in self.secondary.read().await.values() {
            backend.cleanup().await?;
        }
        Ok(())
    }

    async fn resolve(&self, key: &str) -> Result<Target, CoreError> {
        if !has_scheme(key) {
            return Ok(Target {
                backend: self.primary.clone(),
                key: key.to_string(),
            });
        }

        let uri = StorageUri::parse(key)?;
        Ok(Target {
            backend: self.secondary_backend(&uri).await?,
            key: uri.relative_key(),
        })
    }

    async fn secondary_backend(&self, uri: &StorageUri) -> Result<Arc<dyn StorageBackend>, CoreError> {
        let backend_key = uri.backend_key();
        if let Some(backend) = self.secondary.read().await.get(&backend_key) {
            return Ok(backend.clone());
        }

        let mut secondary = self.secondary.write().await;
        if let Some(backend) = secondary.get(&backend_key) {
            return Ok(backend.clone());
        }

        let options = self.secondary_options(&uri.scheme);
        let root = StorageUri {
            scheme: uri.scheme.clone(),
            netloc: uri.netloc.clone(),
            path: if uri.scheme == "file" && uri.netloc.is_empty() {
                "/".to_string()
            } else {
                String::new()
            },
        };

        info!("Creating secondary backend for {}", backend_key);
        let backend = backend_for(&root, &options).await?;
        secondary.insert(backend_key, backend.clone());
        Ok(backend)
    }

    fn secondary_options(&self, scheme: &str) -> Options {
        let mut options = self
            .options_registry
            .get(scheme)
            .or_else(|| self.options_registry.get(DEFAULT_OPTIONS_KEY))
            .cloned()
            .unwrap_or_else(|| default_options(scheme));

        options.scheme = Some(scheme.to_string());
        if is_s3_scheme(scheme) {
            // Bucket and prefix come from the key's URI
            options.s3.bucket = None;
            options.s3.prefix = None;
        }
        if let Some(cache) = &self.cache {
            options.cache_enabled = true;
            if options.cache_dir.is_none() {
                options.cache_dir = Some(cache.cache_dir().to_path_buf());
            }
            options.cache_expiry_hours = cache.expiry_hours();
        }
        options
    }

    /// Scheme of the primary storage URI (empty for plain paths)
    pub fn scheme(&self) -> &str {
        &self.uri.scheme
    }
}

impl std::fmt::Debug for AutoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoStore")
            .field("storage_uri", &self.storage_uri)
            .field("cache", &self.cache.as_ref().map(|c| c.cache_dir().to_path_buf()))
            .field("handlers", &self.handlers)
            .finish()
    }
}

fn accepting(
    handler: Arc<dyn DataHandler>,
    ext: String,
    key: &str,
    data: &Data,
) -> Result<(Arc<dyn DataHandler>, String), CoreError> {
    if handler.can_handle(data) {
        Ok((handler, ext))
    } else {
        Err(CoreError::InvalidData(format!(
            "Cannot write {} data to {} with the {} handler",
            data.kind(),
            key,
            handler.name()
        )))
    }
}

fn default_options(scheme: &str) -> Options {
    if is_local_scheme(scheme) {
        Options::default()
    } else {
        Options::for_scheme(scheme)
    }
}

/// Options for the primary backend out of a list
fn primary_options(scheme: &str, options: &[Options]) -> Option<Options> {
    if let Some(exact) = options
        .iter()
        .find(|o| o.scheme_key().as_deref() == Some(scheme))
    {
        return Some(exact.clone());
    }

    if is_local_scheme(scheme) {
        // Never configure a local primary with another backend's options
        return options
            .iter()
            .find(|o| o.scheme_key().is_none_or(|s| is_local_scheme(&s)))
            .cloned();
    }

    options.first().cloned()
}
