//! Storage backend trait

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::StorageError;

/// Metadata about a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Key relative to the backend root
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time, if the backend reports one
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag, if the backend reports one
    pub e_tag: Option<String>,
}

/// Storage backend trait
///
/// Implementations store opaque objects under slash-separated keys that
/// are relative to the backend root (a directory, or a bucket prefix).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// The URI this backend was created for
    fn uri(&self) -> &str;

    /// Check if an object exists
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Get object metadata
    async fn metadata(&self, key: &str) -> Result<ObjectInfo, StorageError>;

    /// Read an object fully into memory
    async fn read(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Write an object, replacing any previous content
    async fn write(&self, key: &str, data: Bytes) -> Result<(), StorageError>;

    /// Upload a local file
    async fn upload_file(&self, local_path: &Path, key: &str) -> Result<(), StorageError>;

    /// Download an object into a local file
    async fn download_file(&self, key: &str, local_path: &Path) -> Result<(), StorageError>;

    /// Delete an object, returns whether anything was deleted
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// List objects below a prefix, sorted by key
    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectInfo>, StorageError>;

    /// Whether the key names a collection of objects rather than one object
    async fn is_dataset(&self, key: &str) -> Result<bool, StorageError>;

    /// Release temporary resources held by the backend
    async fn cleanup(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Normalize a key: strips leading slashes and `.` segments, collapses
/// repeated slashes and rejects `..` segments and NUL bytes.
///
/// The empty key is allowed and names the backend root.
pub fn normalize_key(key: &str) -> Result<String, StorageError> {
    if key.contains('\0') {
        return Err(StorageError::InvalidKey(format!(
            "Key contains NUL byte: {:?}",
            key
        )));
    }

    let mut segments = Vec::new();
    for segment in key.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(StorageError::InvalidKey(format!(
                    "Key escapes storage root: {}",
                    key
                )));
            }
            s => segments.push(s),
        }
    }

    Ok(segments.join("/"))
}

/// Normalize a key that must name an object
pub fn validate_key(key: &str) -> Result<String, StorageError> {
    let normalized = normalize_key(key)?;
    if normalized.is_empty() {
        return Err(StorageError::InvalidKey(format!("Empty key: {:?}", key)));
    }
    Ok(normalized)
}

/// Glob matching for listing
///
/// `*` and `?` match within one path segment, `**` matches across
/// segments and `**/` also matches zero directories. A pattern without a
/// `/` is matched against the last segment of the key only.
pub fn matches_glob(pattern: &str, key: &str) -> bool {
    let target = if pattern.contains('/') {
        key
    } else {
        key.rsplit('/').next().unwrap_or(key)
    };

    let parts = compile_pattern(pattern);
    let chars: Vec<char> = target.chars().collect();
    match_pattern(&parts, &chars)
}

#[derive(Debug, Clone, PartialEq)]
enum PatternPart {
    Literal(Vec<char>),
    AnyChar,
    SingleWildcard,
    MultiWildcard,
    /// `**/`: zero or more whole directories
    AnyDirs,
}

fn compile_pattern(pattern: &str) -> Vec<PatternPart> {
    let mut parts = Vec::new();
    let mut current = Vec::new();

    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if ch == '*' || ch == '?' {
            if !current.is_empty() {
                parts.push(PatternPart::Literal(std::mem::take(&mut current)));
            }

            if ch == '?' {
                parts.push(PatternPart::AnyChar);
                i += 1;
            } else if i + 1 < chars.len() && chars[i + 1] == '*' {
                if i + 2 < chars.len() && chars[i + 2] == '/' {
                    parts.push(PatternPart::AnyDirs);
                    i += 3;
                } else {
                    parts.push(PatternPart::MultiWildcard);
                    i += 2;
                }
            } else {
                parts.push(PatternPart::SingleWildcard);
                i += 1;
            }
        } else {
            current.push(ch);
            i += 1;
        }
    }

    if !current.is_empty() {
        parts.push(PatternPart::Literal(current));
    }

    parts
}

fn match_pattern(parts: &[PatternPart], path: &[char]) -> bool {
    let Some((part, rest)) = parts.split_first() else {
        return path.is_empty();
    };

    match part {
        PatternPart::Literal(lit) => {
            path.starts_with(lit) && match_pattern(rest, &path[lit.len()..])
        }
        PatternPart::AnyChar => {
            !path.is_empty() && path[0] != '/' && match_pattern(rest, &path[1..])
        }
        PatternPart::SingleWildcard => {
            let segment_end = path.iter().position(|&c| c == '/').unwrap_or(path.len());
            (0..=segment_end).any(|i| match_pattern(rest, &path[i..]))
        }
        PatternPart::MultiWildcard => (0..=path.len()).any(|i| match_pattern(rest, &path[i..])),
        PatternPart::AnyDirs => {
            match_pattern(rest, path)
                || path
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| **c == '/')
                    .any(|(i, _)| match_pattern(rest, &path[i + 1..]))
        }
    }
}
