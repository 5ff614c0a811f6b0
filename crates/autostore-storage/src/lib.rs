//! AutoStore Storage Layer
//!
//! This crate provides the storage abstraction behind AutoStore,
//! supporting local disk, S3-compatible and in-memory backends.

pub mod backend;
pub mod error;
pub mod factory;
pub mod local;
pub mod options;
pub mod s3;
pub mod uri;

pub use backend::{ObjectInfo, StorageBackend, matches_glob, normalize_key, validate_key};
pub use error::StorageError;
pub use factory::{backend_for, is_local_scheme, is_s3_scheme};
pub use local::LocalStorage;
pub use options::{Options, S3Config};
pub use s3::S3Storage;
pub use uri::{KeyRequest, StorageUri, has_scheme};
