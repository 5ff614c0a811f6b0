//! Storage URI and key request parsing
//!
//! A storage URI is either a plain filesystem path (`./data`, `/srv/data`,
//! `C:\data`) or `scheme://netloc/path` (`s3://bucket/prefix`,
//! `file:///srv/data`, `memory://scratch`). Keys handed to the store may be
//! relative paths or full URIs, optionally followed by query parameters.

use url::form_urlencoded;

use crate::error::StorageError;

/// A parsed storage URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUri {
    /// Lower-cased scheme, empty for plain paths
    pub scheme: String,
    /// Authority part (bucket name for S3, store name for memory)
    pub netloc: String,
    /// Path part; for plain paths this is the whole input
    pub path: String,
}

impl StorageUri {
    pub fn parse(uri: &str) -> Result<Self, StorageError> {
        if uri.trim().is_empty() {
            return Err(StorageError::InvalidUri("empty URI".to_string()));
        }

        let Some((scheme, rest)) = split_scheme(uri) else {
            return Ok(Self {
                scheme: String::new(),
                netloc: String::new(),
                path: uri.to_string(),
            });
        };

        let (netloc, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        Ok(Self {
            scheme: scheme.to_lowercase(),
            netloc: netloc.to_string(),
            path: path.to_string(),
        })
    }

    /// Identity of the backend serving this URI (`scheme://netloc`)
    pub fn backend_key(&self) -> String {
        format!("{}://{}", self.scheme, self.netloc)
    }

    /// The path with leading slashes removed, suitable as a backend key
    pub fn relative_key(&self) -> String {
        self.path.trim_start_matches('/').to_string()
    }

    pub fn is_local(&self) -> bool {
        self.scheme.is_empty() || self.scheme == "file"
    }
}

impl std::fmt::Display for StorageUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scheme.is_empty() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}://{}{}", self.scheme, self.netloc, self.path)
        }
    }
}

/// A key with its query parameters split off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    /// Key without query string
    pub key: String,
    /// Format override from `?format=`
    pub format: Option<String>,
    /// Bypass the local cache for this read
    pub ignore_cache: bool,
}

impl KeyRequest {
    pub fn parse(raw: &str) -> Self {
        let (key, query) = match raw.split_once('?') {
            Some((key, query)) => (key, Some(query)),
            None => (raw, None),
        };

        let mut format = None;
        let mut ignore_cache = false;

        if let Some(query) = query {
            for (name, value) in form_urlencoded::parse(query.as_bytes()) {
                match name.as_ref() {
                    "format" if format.is_none() && !value.is_empty() => {
                        format = Some(value.trim_start_matches('.').to_string());
                    }
                    "ignore_cache" => {
                        ignore_cache = !matches!(value.to_lowercase().as_str(), "false" | "0");
                    }
                    _ => {}
                }
            }
        }

        Self {
            key: key.to_string(),
            format,
            ignore_cache,
        }
    }

    /// Whether the clean key is a full URI rather than a backend-relative path
    pub fn has_scheme(&self) -> bool {
        has_scheme(&self.key)
    }
}

/// Whether the given key carries a `scheme://` prefix
pub fn has_scheme(key: &str) -> bool {
    split_scheme(key).is_some()
}

fn split_scheme(uri: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = uri.split_once("://")?;

    // Single letters are drive letters, not schemes
    if scheme.len() < 2 {
        return None;
    }

    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    valid.then_some((scheme, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_paths() {
        let uri = StorageUri::parse("./data/store").unwrap();
        assert_eq!(uri.scheme, "");
        assert_eq!(uri.path, "./data/store");
        assert!(uri.is_local());

        let uri = StorageUri::parse("C:\\data\\store").unwrap();
        assert_eq!(uri.scheme, "");
        assert!(uri.is_local());
    }

    #[test]
    fn test_parse_s3_uri() {
        let uri = StorageUri::parse("S3://my-bucket/some/prefix").unwrap();
        assert_eq!(uri.scheme, "s3");
        assert_eq!(uri.netloc, "my-bucket");
        assert_eq!(uri.path, "/some/prefix");
        assert_eq!(uri.backend_key(), "s3://my-bucket");
        assert_eq!(uri.relative_key(), "some/prefix");
        assert!(!uri.is_local());
        assert_eq!(uri.to_string(), "s3://my-bucket/some/prefix");
    }

    #[test]
    fn test_parse_bucket_only() {
        let uri = StorageUri::parse("s3://bucket").unwrap();
        assert_eq!(uri.netloc, "bucket");
        assert_eq!(uri.relative_key(), "");
    }

    #[test]
    fn test_parse_file_uri() {
        let uri = StorageUri::parse("file:///srv/data").unwrap();
        assert_eq!(uri.scheme, "file");
        assert_eq!(uri.netloc, "");
        assert_eq!(uri.path, "/srv/data");
        assert!(uri.is_local());
    }

    #[test]
    fn test_parse_empty_uri() {
        assert!(StorageUri::parse("  ").is_err());
    }

    #[test]
    fn test_key_request_without_query() {
        let req = KeyRequest::parse("reports/q1.json");
        assert_eq!(req.key, "reports/q1.json");
        assert_eq!(req.format, None);
        assert!(!req.ignore_cache);
        assert!(!req.has_scheme());
    }

    #[test]
    fn test_key_request_with_params() {
        let req = KeyRequest::parse("s3://bucket/data.bin?format=.json&ignore_cache=true");
        assert_eq!(req.key, "s3://bucket/data.bin");
        assert_eq!(req.format.as_deref(), Some("json"));
        assert!(req.ignore_cache);
        assert!(req.has_scheme());
    }

    #[test]
    fn test_ignore_cache_flag_values() {
        assert!(KeyRequest::parse("a.txt?ignore_cache").ignore_cache);
        assert!(KeyRequest::parse("a.txt?ignore_cache=1").ignore_cache);
        assert!(!KeyRequest::parse("a.txt?ignore_cache=false").ignore_cache);
        assert!(!KeyRequest::parse("a.txt?ignore_cache=0").ignore_cache);
    }

    #[test]
    fn test_first_format_wins_and_empty_is_ignored() {
        let req = KeyRequest::parse("a?format=csv&format=json");
        assert_eq!(req.format.as_deref(), Some("csv"));

        let req = KeyRequest::parse("a?format=");
        assert_eq!(req.format, None);
    }

    #[test]
    fn test_has_scheme() {
        assert!(has_scheme("s3://bucket/key"));
        assert!(has_scheme("memory://scratch/key"));
        assert!(!has_scheme("plain/key.json"));
        assert!(!has_scheme("c://odd"));
        assert!(!has_scheme("1s://bad"));
    }
}
