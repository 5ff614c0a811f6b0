//! Non-cryptographic object hashing
//!
//! Produces stable MD5 hex digests for cache keys and user-facing
//! identifiers. JSON objects are serialized with sorted keys, `", "` and
//! `": "` separators and ASCII-only escapes so digests stay comparable with
//! ones produced by other tooling that hashes the same canonical text.

use serde::Serialize;
use serde_json::Value;
use serde_json::ser::Formatter;
use std::io;

/// Seed used when callers have no reason to pick another
pub const DEFAULT_SEED: u64 = 123;

/// Input accepted by [`hash_obj`]
#[derive(Debug, Clone, PartialEq)]
pub enum HashInput {
    Text(String),
    Bytes(Vec<u8>),
    /// Items joined with `_`
    Parts(Vec<String>),
    Json(Value),
}

impl From<&str> for HashInput {
    fn from(s: &str) -> Self {
        HashInput::Text(s.to_string())
    }
}

impl From<String> for HashInput {
    fn from(s: String) -> Self {
        HashInput::Text(s)
    }
}

impl From<&[u8]> for HashInput {
    fn from(b: &[u8]) -> Self {
        HashInput::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for HashInput {
    fn from(b: Vec<u8>) -> Self {
        HashInput::Bytes(b)
    }
}

impl From<Vec<String>> for HashInput {
    fn from(parts: Vec<String>) -> Self {
        HashInput::Parts(parts)
    }
}

impl From<Value> for HashInput {
    fn from(v: Value) -> Self {
        HashInput::Json(v)
    }
}

/// MD5 hex digest of `"{seed}:{text}"`
pub fn hash_obj(input: impl Into<HashInput>, seed: u64) -> String {
    let text = match input.into() {
        HashInput::Text(s) => s,
        HashInput::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
        HashInput::Parts(parts) => parts.join("_"),
        HashInput::Json(Value::String(s)) => s,
        HashInput::Json(Value::Array(items)) => items
            .iter()
            .map(item_text)
            .collect::<Vec<_>>()
            .join("_"),
        HashInput::Json(value) => canonical_json(&value),
    };

    format!("{:x}", md5::compute(format!("{}:{}", seed, text)))
}

fn item_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        Value::Number(n) => n.to_string(),
        other => canonical_json(other),
    }
}

/// Sorted keys, spaced separators, non-ASCII and DEL escaped as `\uXXXX`
fn canonical_json(value: &Value) -> String {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedAsciiFormatter);

    // Writing into a Vec cannot fail and Value always serializes
    if value.serialize(&mut serializer).is_err() {
        return value.to_string();
    }

    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

struct SpacedAsciiFormatter;

impl Formatter for SpacedAsciiFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() && ch != '\x7f' {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_text() {
        assert_eq!(hash_obj("hello", DEFAULT_SEED), "cee03c57f70cd10ff76b179266398e42");
        assert_eq!(hash_obj("hello", 7), "5d2719efebc069305b0447852ae95f8f");
    }

    #[test]
    fn test_hash_parts_and_bytes() {
        let parts = vec!["a".to_string(), "b".to_string(), "1".to_string()];
        assert_eq!(hash_obj(parts, DEFAULT_SEED), "20a0fb03644276c1e372587197c93734");
        assert_eq!(
            hash_obj(json!(["a", "b", 1]), DEFAULT_SEED),
            "20a0fb03644276c1e372587197c93734"
        );
        assert_eq!(
            hash_obj(b"bytes".as_slice(), DEFAULT_SEED),
            "0fac64094270b3f39aa682cc3e72e61f"
        );
    }

    #[test]
    fn test_hash_json_object_is_canonical() {
        let value = json!({"b": [1, 2], "a": "é"});
        assert_eq!(canonical_json(&value), r#"{"a": "\u00e9", "b": [1, 2]}"#);
        assert_eq!(hash_obj(value, DEFAULT_SEED), "234381a457bab251dd196f069477d633");
    }

    #[test]
    fn test_delete_character_is_escaped() {
        assert_eq!(canonical_json(&json!({"k": "a\u{7f}b"})), r#"{"k": "a\u007fb"}"#);
    }

    #[test]
    fn test_astral_characters_use_surrogate_pairs() {
        assert_eq!(
            canonical_json(&json!({"k": "😀"})),
            r#"{"k": "\ud83d\ude00"}"#
        );
    }
}
