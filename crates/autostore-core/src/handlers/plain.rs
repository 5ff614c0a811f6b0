//! Text and raw byte handlers

use bytes::Bytes;
use serde_json::Value;

use super::DataHandler;
use crate::data::Data;
use crate::error::CoreError;

/// Plain text files, kept as a single string
pub struct TextHandler;

impl DataHandler for TextHandler {
    fn name(&self) -> &'static str {
        "text"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[
            ".txt", ".md", ".log", ".html", ".xml", ".yaml", ".yml", ".sql", ".py", ".rs", ".ini",
            ".cfg",
        ]
    }

    fn priority(&self) -> i32 {
        10
    }

    fn can_handle(&self, data: &Data) -> bool {
        match data {
            Data::Text(_) | Data::Json(_) => true,
            Data::Bytes(b) => std::str::from_utf8(b).is_ok(),
            Data::Table(_) => false,
        }
    }

    fn prefers(&self, data: &Data) -> bool {
        matches!(data, Data::Text(_) | Data::Json(Value::String(_)))
    }

    fn read(&self, bytes: &[u8], _ext: &str) -> Result<Data, CoreError> {
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|e| CoreError::InvalidData(format!("Invalid UTF-8 text: {}", e)))?;
        Ok(Data::Text(text))
    }

    fn write(&self, data: &Data, _ext: &str) -> Result<Bytes, CoreError> {
        match data {
            Data::Text(s) | Data::Json(Value::String(s)) => Ok(Bytes::from(s.clone())),
            Data::Json(other) => Ok(Bytes::from(serde_json::to_string_pretty(other)?)),
            Data::Bytes(b) => match std::str::from_utf8(b) {
                Ok(_) => Ok(b.clone()),
                Err(e) => Err(CoreError::InvalidData(format!(
                    "Binary data is not valid UTF-8 text: {}",
                    e
                ))),
            },
            Data::Table(_) => Err(CoreError::InvalidData(
                "Cannot write table data as text".to_string(),
            )),
        }
    }
}

/// Opaque binary files
pub struct BytesHandler;

impl DataHandler for BytesHandler {
    fn name(&self) -> &'static str {
        "bytes"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".bin", ".dat", ".raw"]
    }

    fn priority(&self) -> i32 {
        10
    }

    fn can_handle(&self, data: &Data) -> bool {
        matches!(data, Data::Bytes(_) | Data::Text(_))
    }

    fn read(&self, bytes: &[u8], _ext: &str) -> Result<Data, CoreError> {
        Ok(Data::Bytes(Bytes::copy_from_slice(bytes)))
    }

    fn write(&self, data: &Data, _ext: &str) -> Result<Bytes, CoreError> {
        match data {
            Data::Bytes(b) => Ok(b.clone()),
            Data::Text(s) => Ok(Bytes::from(s.clone())),
            other => Err(CoreError::InvalidData(format!(
                "Cannot write {} data as raw bytes",
                other.kind()
            ))),
        }
    }

    /// Members are concatenated in key order
    fn read_dataset(&self, parts: Vec<(String, Bytes)>, _ext: &str) -> Result<Data, CoreError> {
        let mut out = Vec::new();
        for (_, bytes) in parts {
            out.extend_from_slice(&bytes);
        }
        Ok(Data::Bytes(Bytes::from(out)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_read_write() {
        let data = TextHandler.read("héllo".as_bytes(), ".txt").unwrap();
        assert_eq!(data, Data::Text("héllo".to_string()));
        assert_eq!(TextHandler.write(&data, ".txt").unwrap().as_ref(), "héllo".as_bytes());

        assert!(TextHandler.read(&[0xff, 0xfe], ".txt").is_err());
    }

    #[test]
    fn test_text_writes_json_pretty() {
        let bytes = TextHandler.write(&Data::Json(json!({"a": 1})), ".md").unwrap();
        assert_eq!(bytes.as_ref(), b"{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_bytes_handler() {
        let data = BytesHandler.read(&[0, 1, 2], ".bin").unwrap();
        assert_eq!(data, Data::Bytes(Bytes::from_static(&[0, 1, 2])));
        assert_eq!(BytesHandler.write(&data, ".bin").unwrap().as_ref(), &[0, 1, 2]);
        assert!(BytesHandler.write(&Data::Json(json!(1)), ".bin").is_err());
    }

    #[test]
    fn test_bytes_dataset_concatenates() {
        let data = BytesHandler
            .read_dataset(
                vec![
                    ("a.bin".to_string(), Bytes::from_static(b"ab")),
                    ("b.bin".to_string(), Bytes::from_static(b"cd")),
                ],
                ".bin",
            )
            .unwrap();
        assert_eq!(data, Data::Bytes(Bytes::from_static(b"abcd")));
    }
}
