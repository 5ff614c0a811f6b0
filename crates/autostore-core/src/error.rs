//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] autostore_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format not supported: {0}")]
    FormatNotSupported(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML error: {0}")]
    Toml(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl CoreError {
    /// Whether the error means the requested key does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::Storage(e) if e.is_not_found())
    }
}
