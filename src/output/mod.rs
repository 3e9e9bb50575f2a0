//! Incremental export sinks

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

pub mod csv;

pub use self::csv::CsvSink;

/// Output sink errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),

    /// `append` before `open`
    #[error("sink is not open: {0}")]
    SinkNotOpen(String),

    /// Any call after `close`
    #[error("sink is closed: {0}")]
    SinkClosed(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// A row that can be projected onto a fixed column list
///
/// Returning `None` renders the field as an empty string.
pub trait ExportRecord {
    /// Value for `column`, if the record carries one
    fn field(&self, column: &str) -> Option<String>;
}

impl ExportRecord for BTreeMap<String, String> {
    fn field(&self, column: &str) -> Option<String> {
        self.get(column).cloned()
    }
}

impl ExportRecord for HashMap<String, String> {
    fn field(&self, column: &str) -> Option<String> {
        self.get(column).cloned()
    }
}

impl ExportRecord for serde_json::Value {
    fn field(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Append-only destination with an `Unopened -> Open -> Closed` lifecycle
#[async_trait]
pub trait RecordSink<R: ExportRecord + Sync>: Send + Sync {
    /// Create the destination and write the header. No-op when already open.
    async fn open(&self) -> OutputResult<()>;

    /// Append rows in order. Returns the number of rows written.
    async fn append(&self, rows: &[R]) -> OutputResult<u64>;

    /// Flush and release the destination. Returns total rows written.
    async fn close(&self) -> OutputResult<u64>;
}
