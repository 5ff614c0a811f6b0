//! Disk-backed cache service
//!
//! Every entry lives in its own directory named after the hash of
//! `<backend_uri>/<key>`:
//!
//! ```text
//! <cache_dir>/<hash>/data        cached object bytes
//! <cache_dir>/<hash>/meta.json   CacheEntryMeta
//! ```
//!
//! Maintenance only touches directories named like a hash, so other
//! content of the cache directory is left alone.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::hash::{DEFAULT_SEED, hash_obj};

const DATA_FILE: &str = "data";
const META_FILE: &str = "meta.json";
const ENTRY_NAME_LEN: usize = 32;

/// Metadata stored next to each cached object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    pub backend_uri: String,
    pub key: String,
    pub cached_at: DateTime<Utc>,
    pub size: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub entry_count: u64,
    pub total_size: u64,
}

/// `<system temp>/autostore_cache`
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("autostore_cache")
}

/// Cache of downloaded objects, keyed by backend URI and key
pub struct CacheService {
    cache_dir: PathBuf,
    expiry_hours: u64,
    stats: RwLock<CacheStats>,
}

impl CacheService {
    /// Create a cache service, creating the cache directory if needed
    ///
    /// An expiry of zero keeps entries until they are invalidated.
    pub async fn new(cache_dir: Option<PathBuf>, expiry_hours: u64) -> Result<Self, CoreError> {
        let cache_dir = cache_dir.unwrap_or_else(default_cache_dir);
        fs::create_dir_all(&cache_dir).await?;

        info!(
            "Initializing cache at {:?} (expiry: {} hours)",
            cache_dir, expiry_hours
        );

        Ok(Self {
            cache_dir,
            expiry_hours,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn expiry_hours(&self) -> u64 {
        self.expiry_hours
    }

    fn entry_dir(&self, backend_uri: &str, key: &str) -> PathBuf {
        let id = hash_obj(format!("{}/{}", backend_uri, key), DEFAULT_SEED);
        self.cache_dir.join(id)
    }

    fn is_expired(&self, meta: &CacheEntryMeta) -> bool {
        if self.expiry_hours == 0 {
            return false;
        }
        let deadline = i64::try_from(self.expiry_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|expiry| meta.cached_at.checked_add_signed(expiry));
        deadline.is_some_and(|deadline| deadline < Utc::now())
    }

    /// Get a cached object
    ///
    /// Expired entries and entries missing their data are removed and
    /// reported as misses.
    pub async fn get(&self, backend_uri: &str, key: &str) -> Result<Option<Bytes>, CoreError> {
        let dir = self.entry_dir(backend_uri, key);

        // No metadata: absent, or being rewritten by a concurrent put
        let Some(meta) = read_meta(&dir).await else {
            self.record_miss().await;
            return Ok(None);
        };

        if self.is_expired(&meta) {
            debug!("Cache entry expired: {}/{}", backend_uri, key);
            remove_entry(&dir).await;
            self.record_miss().await;
            return Ok(None);
        }

        match fs::read(dir.join(DATA_FILE)).await {
            Ok(data) => {
                debug!("Cache hit: {}/{}", backend_uri, key);
                self.record_hit().await;
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Cache metadata without data: {}/{}", backend_uri, key);
                remove_entry(&dir).await;
                self.record_miss().await;
                Ok(None)
            }
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    /// Store an object, replacing any previous entry
    pub async fn put(&self, backend_uri: &str, key: &str, data: &Bytes) -> Result<(), CoreError> {
        let dir = self.entry_dir(backend_uri, key);
        fs::create_dir_all(&dir).await?;

        debug!("Caching {}/{} ({} bytes)", backend_uri, key, data.len());

        // An entry only counts while its metadata exists
        match fs::remove_file(dir.join(META_FILE)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CoreError::Io(e)),
        }
        write_atomic(&dir, DATA_FILE, data).await?;

        let meta = CacheEntryMeta {
            backend_uri: backend_uri.to_string(),
            key: key.to_string(),
            cached_at: Utc::now(),
            size: data.len() as u64,
        };
        write_atomic(&dir, META_FILE, &serde_json::to_vec_pretty(&meta)?).await?;

        Ok(())
    }

    /// Remove a cached object, returns whether an entry existed
    pub async fn invalidate(&self, backend_uri: &str, key: &str) -> Result<bool, CoreError> {
        let dir = self.entry_dir(backend_uri, key);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!("Invalidated cache entry: {}/{}", backend_uri, key);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    /// Remove expired and broken entries
    pub async fn cleanup_expired(&self) -> Result<u64, CoreError> {
        let mut cleaned = 0u64;

        for dir in self.entry_dirs().await? {
            let remove = match read_meta(&dir).await {
                Some(meta) => self.is_expired(&meta),
                None => true,
            };
            if remove {
                debug!("Cleaning cache entry {:?}", dir);
                remove_entry(&dir).await;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            info!("Cleaned up {} expired cache entries", cleaned);
        }
        Ok(cleaned)
    }

    /// Remove every entry
    pub async fn clear(&self) -> Result<u64, CoreError> {
        info!("Clearing all cache entries");

        let mut count = 0u64;
        for dir in self.entry_dirs().await? {
            remove_entry(&dir).await;
            count += 1;
        }

        info!("Cleared {} cache entries", count);
        Ok(count)
    }

    /// Hit/miss counters of this service plus what is on disk
    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().await.clone();
        stats.entry_count = 0;
        stats.total_size = 0;

        match self.entry_dirs().await {
            Ok(dirs) => {
                for dir in dirs {
                    if let Some(meta) = read_meta(&dir).await {
                        stats.entry_count += 1;
                        stats.total_size += meta.size;
                    }
                }
            }
            Err(e) => warn!("Failed to scan cache directory: {}", e),
        }

        stats
    }

    async fn entry_dirs(&self) -> Result<Vec<PathBuf>, CoreError> {
        let mut dirs = Vec::new();
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(CoreError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if entry.file_type().await?.is_dir() && is_entry_name(&name.to_string_lossy()) {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }

    async fn record_hit(&self) {
        let mut stats = self.stats.write().await;
        stats.hit_count += 1;
    }

    async fn record_miss(&self) {
        let mut stats = self.stats.write().await;
        stats.miss_count += 1;
    }
}

async fn read_meta(dir: &Path) -> Option<CacheEntryMeta> {
    let raw = fs::read(dir.join(META_FILE)).await.ok()?;
    serde_json::from_slice(&raw).ok()
}

/// `hash_obj` digests: 32 lower-case hex characters
fn is_entry_name(name: &str) -> bool {
    name.len() == ENTRY_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Write a file through a temp file and a rename
async fn write_atomic(dir: &Path, name: &str, contents: &[u8]) -> Result<(), CoreError> {
    let path = dir.join(name);
    let temp_path = dir.join(format!(".{}-{}.tmp", name, Uuid::new_v4()));

    if let Err(e) = fs::write(&temp_path, contents).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(CoreError::Io(e));
    }
    if let Err(e) = fs::rename(&temp_path, &path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(CoreError::Io(e));
    }
    Ok(())
}

async fn remove_entry(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove cache entry {:?}: {}", dir, e);
    }
}

/// Spawn a background task that removes expired entries periodically
pub fn spawn_cleanup_task(
    cache: Arc<CacheService>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    info!(
        "Starting background cache cleanup task (interval: {:?})",
        interval
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        // The first tick fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            debug!("Running scheduled cache cleanup");

            if let Err(e) = cache.cleanup_expired().await {
                warn!("Error during scheduled cache cleanup: {}", e);
            }
        }
    })
}
