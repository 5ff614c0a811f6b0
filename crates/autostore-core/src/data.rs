//! Values moved in and out of the store

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Data read from or written to the store
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    /// Structured data (JSON, JSON lines, TOML)
    Json(Value),
    /// UTF-8 text
    Text(String),
    /// Opaque bytes
    Bytes(Bytes),
    /// Tabular data (CSV, TSV)
    Table(Table),
}

impl Data {
    /// Name of the variant, for error messages and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Data::Json(_) => "json",
            Data::Text(_) => "text",
            Data::Bytes(_) => "bytes",
            Data::Table(_) => "table",
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Data::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Data::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Data::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Data::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Convert to a JSON value
    ///
    /// Tables become an array of records keyed by column name. Bytes are
    /// only accepted when they are valid UTF-8 JSON.
    pub fn into_json(self) -> Result<Value, CoreError> {
        match self {
            Data::Json(v) => Ok(v),
            Data::Text(s) => Ok(Value::String(s)),
            Data::Table(t) => Ok(Value::Array(t.to_records())),
            Data::Bytes(b) => serde_json::from_slice(&b).map_err(|_| {
                CoreError::InvalidData(format!(
                    "{} bytes of binary data cannot be converted to JSON",
                    b.len()
                ))
            }),
        }
    }
}

impl From<Value> for Data {
    fn from(v: Value) -> Self {
        Data::Json(v)
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::Text(s)
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Data {
    fn from(b: Vec<u8>) -> Self {
        Data::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for Data {
    fn from(b: Bytes) -> Self {
        Data::Bytes(b)
    }
}

impl From<Table> for Data {
    fn from(t: Table) -> Self {
        Data::Table(t)
    }
}

/// A table of string cells with named columns
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row; it must have one cell per column
    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), CoreError> {
        if row.len() != self.columns.len() {
            return Err(CoreError::InvalidData(format!(
                "Row has {} cells, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append all rows of another table with the same columns
    pub fn append(&mut self, other: Table) -> Result<(), CoreError> {
        if self.columns.is_empty() && self.rows.is_empty() {
            *self = other;
            return Ok(());
        }
        if other.columns != self.columns {
            return Err(CoreError::InvalidData(format!(
                "Column mismatch: {:?} vs {:?}",
                self.columns, other.columns
            )));
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Values of one column; short rows yield empty cells
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(
            self.rows
                .iter()
                .map(|r| r.get(idx).map_or("", String::as_str))
                .collect(),
        )
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let record: Map<String, Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().map(|cell| Value::String(cell.clone())))
                    .collect();
                Value::Object(record)
            })
            .collect()
    }

    /// Build a table from an array of JSON objects
    ///
    /// Columns are the union of keys in first-seen order; missing cells are
    /// empty and non-string values are written in their JSON form.
    pub fn from_records(records: &[Value]) -> Result<Self, CoreError> {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            let Value::Object(map) = record else {
                return Err(CoreError::InvalidData(
                    "Table records must be JSON objects".to_string(),
                ));
            };
            for key in map.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .filter_map(Value::as_object)
            .map(|map| {
                columns
                    .iter()
                    .map(|c| match map.get(c) {
                        None | Some(Value::Null) => String::new(),
                        Some(Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                    })
                    .collect()
            })
            .collect();

        Ok(Self { columns, rows })
    }
}
