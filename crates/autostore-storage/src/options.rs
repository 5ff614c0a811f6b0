//! Backend options

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options for a storage backend
///
/// An `Options` value without a scheme applies to any backend; with a
/// scheme it is only picked for URIs of that scheme.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Options {
    /// URI scheme these options apply to (`s3`, `file`, ...)
    #[serde(default)]
    pub scheme: Option<String>,
    /// Cache downloaded objects on local disk
    #[serde(default)]
    pub cache_enabled: bool,
    /// Cache directory (defaults to a directory under the system temp dir)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Age after which cached objects are refetched
    #[serde(default = "default_cache_expiry_hours")]
    pub cache_expiry_hours: u64,
    /// S3 settings, only used by S3 backends
    #[serde(default)]
    pub s3: S3Config,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            scheme: None,
            cache_enabled: false,
            cache_dir: None,
            cache_expiry_hours: default_cache_expiry_hours(),
            s3: S3Config::default(),
        }
    }
}

impl Options {
    /// Default options tagged with a scheme
    pub fn for_scheme(scheme: &str) -> Self {
        Self {
            scheme: Some(scheme.to_lowercase()),
            ..Default::default()
        }
    }

    pub fn with_cache(mut self, cache_dir: Option<PathBuf>, expiry_hours: u64) -> Self {
        self.cache_enabled = true;
        self.cache_dir = cache_dir;
        self.cache_expiry_hours = expiry_hours;
        self
    }

    pub fn is_s3(&self) -> bool {
        self.scheme_key().as_deref() == Some("s3")
    }

    /// Scheme, normalized for comparisons
    pub fn scheme_key(&self) -> Option<String> {
        self.scheme.as_ref().map(|s| s.to_lowercase())
    }
}

/// S3 storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3Config {
    /// S3 bucket name; the URI netloc is used when unset
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 region (e.g., "us-east-1")
    #[serde(default = "default_region")]
    pub region: String,
    /// S3 endpoint URL (for MinIO or other S3-compatible services)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// AWS access key ID
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// AWS secret access key
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Prefix for all objects; the URI path is used when unset
    #[serde(default)]
    pub prefix: Option<String>,
    /// Allow HTTP (not HTTPS) connections
    #[serde(default)]
    pub allow_http: bool,
    /// Files at least this large are uploaded with multipart uploads
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,
    /// Part size for multipart uploads
    #[serde(default = "default_multipart_chunk_size")]
    pub multipart_chunk_size: usize,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: None,
            region: default_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            prefix: None,
            allow_http: false,
            multipart_threshold: default_multipart_threshold(),
            multipart_chunk_size: default_multipart_chunk_size(),
        }
    }
}

fn default_cache_expiry_hours() -> u64 {
    24
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> u64 {
    8 * 1024 * 1024 // 8 MB
}

fn default_multipart_chunk_size() -> usize {
    5 * 1024 * 1024 // 5MB minimum part size for S3
}
