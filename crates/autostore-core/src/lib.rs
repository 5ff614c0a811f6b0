//! AutoStore Core
//!
//! This crate provides the AutoStore facade: dictionary-like access to
//! files on local disk and object storage, with format handlers that turn
//! stored bytes into structured data and a local cache for remote reads.

pub mod cache;
pub mod data;
pub mod error;
pub mod handlers;
pub mod hash;
pub mod store;

pub use autostore_storage::{KeyRequest, ObjectInfo, Options, S3Config, StorageBackend, StorageUri};
pub use cache::{CacheService, CacheStats, spawn_cleanup_task};
pub use data::{Data, Table};
pub use error::CoreError;
pub use handlers::{DataHandler, HandlerRegistry};
pub use hash::{DEFAULT_SEED, HashInput, hash_obj};
pub use store::{AutoStore, ReadOptions};

/// Package version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
