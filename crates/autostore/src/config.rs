//! Configuration loading

use anyhow::{Context, Result};
use autostore_core::Options;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Per-scheme backend options, used for full-URI keys
    #[serde(default)]
    pub backends: Vec<Options>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { uri: default_uri() }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Defaults to `autostore_cache` under the system temp dir
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_expiry_hours")]
    pub expiry_hours: u64,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            expiry_hours: default_expiry_hours(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_uri() -> String {
    "./data".to_string()
}

fn default_expiry_hours() -> u64 {
    24
}

fn default_cleanup_interval_hours() -> u64 {
    1
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from file, falling back to defaults when it is missing
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Options list handed to the store
    ///
    /// `[cache]` settings apply to every entry; with no `[[backends]]` a
    /// scheme-less entry carries them.
    pub fn store_options(&self) -> Vec<Options> {
        let mut options = self.backends.clone();
        if !self.cache.enabled {
            return options;
        }

        if options.is_empty() {
            options.push(Options::default());
        }
        for o in &mut options {
            o.cache_enabled = true;
            if o.cache_dir.is_none() {
                o.cache_dir = self.cache.dir.clone();
            }
            o.cache_expiry_hours = self.cache.expiry_hours;
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.uri, "./data");
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.expiry_hours, 24);
        assert_eq!(config.logging.format, "pretty");
        assert!(config.store_options().is_empty());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load(&path.to_string_lossy()).unwrap();
        assert_eq!(config.store.uri, "./data");
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[store]
uri = "s3://bucket/prefix"

[cache]
enabled = true
dir = "/tmp/autostore-test-cache"
expiry_hours = 6

[[backends]]
scheme = "s3"

[backends.s3]
region = "eu-west-1"
endpoint = "http://localhost:9000"
allow_http = true

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = Config::load(&file.path().to_string_lossy()).unwrap();
        assert_eq!(config.store.uri, "s3://bucket/prefix");
        assert_eq!(config.cache.cleanup_interval_hours, 1);
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.backends[0].s3.region, "eu-west-1");
        assert!(config.backends[0].s3.allow_http);
        assert_eq!(config.logging.format, "json");

        let options = config.store_options();
        assert!(options[0].cache_enabled);
        assert_eq!(options[0].cache_expiry_hours, 6);
        assert_eq!(
            options[0].cache_dir.as_deref(),
            Some(Path::new("/tmp/autostore-test-cache"))
        );
    }

    #[test]
    fn test_cache_without_backends() {
        let config = Config {
            cache: CacheConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let options = config.store_options();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].scheme, None);
        assert!(options[0].cache_enabled);
    }

    #[test]
    fn test_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[store\nuri = 1").unwrap();
        assert!(Config::load(&file.path().to_string_lossy()).is_err());
    }
}
