//! JSON, JSON lines and TOML handlers

use bytes::Bytes;
use serde_json::Value;

use super::DataHandler;
use crate::data::Data;
use crate::error::CoreError;

/// Convert anything the structured handlers accept into a JSON value
fn to_value(data: &Data) -> Result<Value, CoreError> {
    match data {
        Data::Json(v) => Ok(v.clone()),
        Data::Text(s) => Ok(Value::String(s.clone())),
        Data::Table(t) => Ok(Value::Array(t.to_records())),
        Data::Bytes(_) => Err(CoreError::InvalidData(
            "binary data cannot be written as structured text".to_string(),
        )),
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, CoreError> {
    std::str::from_utf8(bytes).map_err(|e| CoreError::InvalidData(format!("Invalid UTF-8: {}", e)))
}

/// `.json` documents
pub struct JsonHandler;

impl DataHandler for JsonHandler {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".json"]
    }

    fn priority(&self) -> i32 {
        10
    }

    fn can_handle(&self, data: &Data) -> bool {
        !matches!(data, Data::Bytes(_))
    }

    fn prefers(&self, data: &Data) -> bool {
        matches!(data, Data::Json(_))
    }

    fn read(&self, bytes: &[u8], _ext: &str) -> Result<Data, CoreError> {
        Ok(Data::Json(serde_json::from_slice(bytes)?))
    }

    fn write(&self, data: &Data, _ext: &str) -> Result<Bytes, CoreError> {
        let value = to_value(data)?;
        Ok(Bytes::from(serde_json::to_vec_pretty(&value)?))
    }
}

/// `.jsonl` / `.ndjson`: one JSON value per line
pub struct JsonLinesHandler;

impl DataHandler for JsonLinesHandler {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".jsonl", ".ndjson"]
    }

    fn priority(&self) -> i32 {
        5
    }

    fn can_handle(&self, data: &Data) -> bool {
        !matches!(data, Data::Bytes(_))
    }

    fn prefers(&self, data: &Data) -> bool {
        matches!(data, Data::Json(Value::Array(_)) | Data::Table(_))
    }

    fn read(&self, bytes: &[u8], _ext: &str) -> Result<Data, CoreError> {
        let records = utf8(bytes)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<Value>, _>>()?;
        Ok(Data::Json(Value::Array(records)))
    }

    fn write(&self, data: &Data, _ext: &str) -> Result<Bytes, CoreError> {
        let records = match to_value(data)? {
            Value::Array(items) => items,
            single => vec![single],
        };

        let mut out = Vec::new();
        for record in &records {
            serde_json::to_writer(&mut out, record)?;
            out.push(b'\n');
        }
        Ok(Bytes::from(out))
    }

    fn read_dataset(&self, parts: Vec<(String, Bytes)>, ext: &str) -> Result<Data, CoreError> {
        let mut records = Vec::new();
        for (_, bytes) in parts {
            if let Data::Json(Value::Array(items)) = self.read(&bytes, ext)? {
                records.extend(items);
            }
        }
        Ok(Data::Json(Value::Array(records)))
    }
}

/// `.toml` documents
pub struct TomlHandler;

impl DataHandler for TomlHandler {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".toml"]
    }

    fn can_handle(&self, data: &Data) -> bool {
        matches!(data, Data::Json(Value::Object(_)))
    }

    fn read(&self, bytes: &[u8], _ext: &str) -> Result<Data, CoreError> {
        let value: Value =
            toml::from_str(utf8(bytes)?).map_err(|e| CoreError::Toml(e.to_string()))?;
        Ok(Data::Json(value))
    }

    fn write(&self, data: &Data, _ext: &str) -> Result<Bytes, CoreError> {
        let value = match data {
            Data::Json(v @ Value::Object(_)) => v,
            other => {
                return Err(CoreError::InvalidData(format!(
                    "TOML documents must be tables, got {}",
                    other.kind()
                )));
            }
        };
        let text = toml::to_string_pretty(value).map_err(|e| CoreError::Toml(e.to_string()))?;
        Ok(Bytes::from(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_read_write() {
        let data = Data::Json(json!({"key": "value", "numbers": [1, 2, 3]}));
        let bytes = JsonHandler.write(&data, ".json").unwrap();
        assert_eq!(JsonHandler.read(&bytes, ".json").unwrap(), data);

        assert!(JsonHandler.read(b"{not json", ".json").is_err());
        assert!(
            JsonHandler
                .write(&Data::Bytes(Bytes::from_static(b"x")), ".json")
                .is_err()
        );
    }

    #[test]
    fn test_json_writes_text_as_string() {
        let bytes = JsonHandler.write(&Data::Text("hi".to_string()), ".json").unwrap();
        assert_eq!(bytes.as_ref(), b"\"hi\"");
    }

    #[test]
    fn test_jsonl_read_skips_blank_lines() {
        let data = JsonLinesHandler
            .read(b"{\"a\":1}\n\n  {\"a\":2}\n", ".jsonl")
            .unwrap();
        assert_eq!(data, Data::Json(json!([{"a": 1}, {"a": 2}])));
    }

    #[test]
    fn test_jsonl_write() {
        let bytes = JsonLinesHandler
            .write(&Data::Json(json!([{"a": 1}, 2])), ".jsonl")
            .unwrap();
        assert_eq!(bytes.as_ref(), b"{\"a\":1}\n2\n");

        let bytes = JsonLinesHandler
            .write(&Data::Json(json!({"only": true})), ".jsonl")
            .unwrap();
        assert_eq!(bytes.as_ref(), b"{\"only\":true}\n");
    }

    #[test]
    fn test_jsonl_dataset_concatenates() {
        let data = JsonLinesHandler
            .read_dataset(
                vec![
                    ("p1.jsonl".to_string(), Bytes::from_static(b"1\n2\n")),
                    ("p2.jsonl".to_string(), Bytes::from_static(b"3\n")),
                ],
                ".jsonl",
            )
            .unwrap();
        assert_eq!(data, Data::Json(json!([1, 2, 3])));
    }

    #[test]
    fn test_toml_read_write() {
        let data = TomlHandler
            .read(b"name = \"store\"\n[limits]\nsize = 3\n", ".toml")
            .unwrap();
        assert_eq!(data, Data::Json(json!({"name": "store", "limits": {"size": 3}})));

        let flat = Data::Json(json!({"name": "store", "size": 3, "enabled": true}));
        let bytes = TomlHandler.write(&flat, ".toml").unwrap();
        assert_eq!(TomlHandler.read(&bytes, ".toml").unwrap(), flat);

        assert!(TomlHandler.write(&Data::Json(json!([1])), ".toml").is_err());
    }
}
