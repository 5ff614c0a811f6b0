//! CSV / TSV handler

use bytes::Bytes;
use serde_json::Value;

use super::DataHandler;
use crate::data::{Data, Table};
use crate::error::CoreError;

fn delimiter_for(ext: &str) -> u8 {
    if ext.eq_ignore_ascii_case(".tsv") {
        b'\t'
    } else {
        b','
    }
}

/// `.csv` / `.tsv` tables with a header row
pub struct CsvHandler;

impl DataHandler for CsvHandler {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".csv", ".tsv"]
    }

    fn priority(&self) -> i32 {
        10
    }

    fn can_handle(&self, data: &Data) -> bool {
        match data {
            Data::Table(_) => true,
            Data::Json(Value::Array(items)) => items.iter().all(Value::is_object),
            _ => false,
        }
    }

    fn read(&self, bytes: &[u8], ext: &str) -> Result<Data, CoreError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter_for(ext))
            .from_reader(bytes);

        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut table = Table::new(columns);

        for record in reader.records() {
            let record = record?;
            table.push_row(record.iter().map(str::to_string).collect())?;
        }

        Ok(Data::Table(table))
    }

    fn write(&self, data: &Data, ext: &str) -> Result<Bytes, CoreError> {
        let converted;
        let table = match data {
            Data::Table(t) => t,
            Data::Json(Value::Array(items)) => {
                converted = Table::from_records(items)?;
                &converted
            }
            other => {
                return Err(CoreError::InvalidData(format!(
                    "Cannot write {} data as a table",
                    other.kind()
                )));
            }
        };

        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter_for(ext))
            .from_writer(Vec::new());

        writer.write_record(&table.columns)?;
        for row in &table.rows {
            writer.write_record(row)?;
        }

        let out = writer
            .into_inner()
            .map_err(|e| CoreError::Io(e.into_error()))?;
        Ok(Bytes::from(out))
    }

    fn read_dataset(&self, parts: Vec<(String, Bytes)>, ext: &str) -> Result<Data, CoreError> {
        let mut combined = Table::default();
        for (key, bytes) in parts {
            if let Data::Table(table) = self.read(&bytes, ext)? {
                combined.append(table).map_err(|e| {
                    CoreError::InvalidData(format!("Dataset member {}: {}", key, e))
                })?;
            }
        }
        Ok(Data::Table(combined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_csv() {
        let data = CsvHandler
            .read(b"name,score\nada,10\n\"b, c\",7\n", ".csv")
            .unwrap();
        let table = data.as_table().unwrap();
        assert_eq!(table.columns, vec!["name", "score"]);
        assert_eq!(table.column("name"), Some(vec!["ada", "b, c"]));
    }

    #[test]
    fn test_read_uneven_rows_fails() {
        assert!(CsvHandler.read(b"a,b\n1\n", ".csv").is_err());
    }

    #[test]
    fn test_write_tsv() {
        let mut table = Table::new(vec!["a".to_string(), "b".to_string()]);
        table.push_row(vec!["1".to_string(), "x y".to_string()]).unwrap();

        let bytes = CsvHandler.write(&Data::Table(table.clone()), ".tsv").unwrap();
        assert_eq!(bytes.as_ref(), b"a\tb\n1\tx y\n");
        assert_eq!(CsvHandler.read(&bytes, ".tsv").unwrap(), Data::Table(table));
    }

    #[test]
    fn test_write_records() {
        let data = Data::Json(json!([{"a": "1"}, {"a": "2"}]));
        assert!(CsvHandler.can_handle(&data));

        let bytes = CsvHandler.write(&data, ".csv").unwrap();
        assert_eq!(bytes.as_ref(), b"a\n1\n2\n");

        assert!(!CsvHandler.can_handle(&Data::Json(json!({"a": 1}))));
        assert!(CsvHandler.write(&Data::Text("x".to_string()), ".csv").is_err());
    }

    #[test]
    fn test_dataset_concatenates_tables() {
        let data = CsvHandler
            .read_dataset(
                vec![
                    ("p1.csv".to_string(), Bytes::from_static(b"a,b\n1,2\n")),
                    ("p2.csv".to_string(), Bytes::from_static(b"a,b\n3,4\n")),
                ],
                ".csv",
            )
            .unwrap();
        assert_eq!(data.as_table().unwrap().len(), 2);

        let err = CsvHandler
            .read_dataset(
                vec![
                    ("p1.csv".to_string(), Bytes::from_static(b"a,b\n1,2\n")),
                    ("p2.csv".to_string(), Bytes::from_static(b"x\n3\n")),
                ],
                ".csv",
            )
            .unwrap_err();
        assert!(err.to_string().contains("p2.csv"));
    }
}
