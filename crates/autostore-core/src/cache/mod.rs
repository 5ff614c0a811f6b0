//! Local read cache for remote objects

mod service;

pub use service::{CacheEntryMeta, CacheService, CacheStats, default_cache_dir, spawn_cleanup_task};
