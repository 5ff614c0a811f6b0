//! Format handlers
//!
//! A handler converts between stored bytes and [`Data`] for a set of file
//! extensions. The registry picks a handler by extension for reads and by
//! extension or data variant for writes.

mod plain;
mod structured;
mod table;

use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::data::Data;
use crate::error::CoreError;

pub use plain::{BytesHandler, TextHandler};
pub use structured::{JsonHandler, JsonLinesHandler, TomlHandler};
pub use table::CsvHandler;

/// Converts between bytes and [`Data`] for a family of extensions
pub trait DataHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower-case extensions including the leading dot
    fn extensions(&self) -> &'static [&'static str];

    /// Preference when picking a handler by data variant (higher wins)
    fn priority(&self) -> i32 {
        0
    }

    /// Whether `write` accepts this data
    fn can_handle(&self, data: &Data) -> bool;

    /// Whether this handler is a natural pick for data stored under a key
    /// without a usable extension
    fn prefers(&self, data: &Data) -> bool {
        self.can_handle(data)
    }

    fn read(&self, bytes: &[u8], ext: &str) -> Result<Data, CoreError>;

    fn write(&self, data: &Data, ext: &str) -> Result<Bytes, CoreError>;

    /// Combine the members of a dataset
    ///
    /// The default yields a JSON object keyed by member key.
    fn read_dataset(&self, parts: Vec<(String, Bytes)>, ext: &str) -> Result<Data, CoreError> {
        let mut members = Map::new();
        for (key, bytes) in parts {
            let value = self.read(&bytes, ext)?.into_json()?;
            members.insert(key, value);
        }
        Ok(Data::Json(Value::Object(members)))
    }
}

/// Registry of format handlers
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn DataHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.name()))
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonHandler));
        registry.register(Arc::new(JsonLinesHandler));
        registry.register(Arc::new(TomlHandler));
        registry.register(Arc::new(CsvHandler));
        registry.register(Arc::new(TextHandler));
        registry.register(Arc::new(BytesHandler));
        registry
    }

    /// Register a handler; it takes precedence for its extensions
    pub fn register(&mut self, handler: Arc<dyn DataHandler>) {
        self.handlers.push(handler);
    }

    /// Find the handler for an extension (`csv`, `.CSV`, ...)
    pub fn handler_for_extension(&self, ext: &str) -> Option<Arc<dyn DataHandler>> {
        let ext = normalize_extension(ext);
        self.handlers
            .iter()
            .rev()
            .find(|h| h.extensions().contains(&ext.as_str()))
            .cloned()
    }

    /// Find the handler for a key, honoring a format override
    ///
    /// Returns the handler and the extension it was selected by.
    pub fn handler_for_key(
        &self,
        key: &str,
        format: Option<&str>,
    ) -> Option<(Arc<dyn DataHandler>, String)> {
        let ext = match format {
            Some(format) => normalize_extension(format),
            None => extension_of(key)?,
        };
        self.handler_for_extension(&ext).map(|h| (h, ext))
    }

    /// Find the preferred handler for the given data
    pub fn handler_for_data(&self, data: &Data) -> Option<Arc<dyn DataHandler>> {
        let mut best: Option<&Arc<dyn DataHandler>> = None;
        for handler in &self.handlers {
            if !handler.prefers(data) {
                continue;
            }
            if best.is_none_or(|b| handler.priority() > b.priority()) {
                best = Some(handler);
            }
        }
        best.cloned()
    }

    /// All registered extensions
    pub fn extensions(&self) -> Vec<&'static str> {
        let mut extensions: Vec<&'static str> = self
            .handlers
            .iter()
            .flat_map(|h| h.extensions().iter().copied())
            .collect();
        extensions.sort_unstable();
        extensions.dedup();
        extensions
    }
}

/// Lower-case extension with leading dot
pub fn normalize_extension(ext: &str) -> String {
    format!(".{}", ext.trim().trim_start_matches('.').to_lowercase())
}

/// Extension of the last key segment, if any
///
/// Dot files (`.env`) have no extension.
pub fn extension_of(key: &str) -> Option<String> {
    let name = key.trim_end_matches('/').rsplit('/').next()?;
    let idx = name.rfind('.')?;
    if idx == 0 || idx + 1 == name.len() {
        return None;
    }
    Some(name[idx..].to_lowercase())
}
