//! Incremental CSV sink
//!
//! Header written once on `open`, rows appended as batches arrive, every
//! field quoted with internal quotes doubled, rows terminated by `\n`.

use async_trait::async_trait;
use csv::{QuoteStyle, Terminator, Writer, WriterBuilder};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{ExportRecord, OutputError, OutputResult, RecordSink};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// Lifecycle of a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    /// Created, destination not touched yet
    Unopened,
    /// Header written, accepting rows
    Open,
    /// Flushed and released
    Closed,
}

enum SinkState {
    Unopened,
    Open(OpenFile),
    Closed { rows: u64 },
}

struct OpenFile {
    writer: Writer<BufWriter<File>>,
    rows: u64,
}

/// Streaming CSV writer shared by concurrently finishing jobs
///
/// Appends are serialized through a FIFO async mutex, so byte output of two
/// batches never interleaves and batches land in `append` call order.
pub struct CsvSink {
    path: PathBuf,
    columns: Vec<String>,
    state: Mutex<SinkState>,
}

impl CsvSink {
    /// Sink writing `columns` to `path`. Nothing touches the disk until `open`.
    pub fn new<P, I, S>(path: P, columns: I) -> Self
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.as_ref().to_path_buf(),
            columns: columns.into_iter().map(Into::into).collect(),
            state: Mutex::new(SinkState::Unopened),
        }
    }

    /// Destination path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header columns
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Current lifecycle state
    pub async fn status(&self) -> SinkStatus {
        match &*self.state.lock().await {
            SinkState::Unopened => SinkStatus::Unopened,
            SinkState::Open(_) => SinkStatus::Open,
            SinkState::Closed { .. } => SinkStatus::Closed,
        }
    }

    /// Rows written so far
    pub async fn rows_written(&self) -> u64 {
        match &*self.state.lock().await {
            SinkState::Unopened => 0,
            SinkState::Open(file) => file.rows,
            SinkState::Closed { rows } => *rows,
        }
    }

    /// Create (truncating) the destination and write the header.
    ///
    /// Idempotent while open.
    ///
    /// # Errors
    /// [`OutputError::SinkClosed`] after `close`, IO/CSV errors otherwise.
    pub async fn open(&self) -> OutputResult<()> {
        let mut state = self.state.lock().await;
        match &*state {
            SinkState::Open(_) => return Ok(()),
            SinkState::Closed { .. } => {
                return Err(OutputError::SinkClosed(self.path.display().to_string()))
            }
            SinkState::Unopened => {}
        }

        info!("Opening CSV sink: path={}", self.path.display());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    OutputError::IoError(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        let file = File::create(&self.path)
            .map_err(|e| OutputError::IoError(format!("Failed to create file: {}", e)))?;

        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file));

        writer
            .write_record(&self.columns)
            .map_err(|e| OutputError::CsvError(format!("Failed to write header: {}", e)))?;
        writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush header: {}", e)))?;

        debug!(columns = self.columns.len(), "CSV header written");
        *state = SinkState::Open(OpenFile { writer, rows: 0 });
        Ok(())
    }

    /// Append `rows`, mapping each onto the column list, then flush.
    ///
    /// # Errors
    /// [`OutputError::SinkNotOpen`] before `open`, [`OutputError::SinkClosed`]
    /// after `close`.
    pub async fn append<R: ExportRecord>(&self, rows: &[R]) -> OutputResult<u64> {
        let mut state = self.state.lock().await;
        let file = match &mut *state {
            SinkState::Open(file) => file,
            SinkState::Unopened => {
                return Err(OutputError::SinkNotOpen(self.path.display().to_string()))
            }
            SinkState::Closed { .. } => {
                return Err(OutputError::SinkClosed(self.path.display().to_string()))
            }
        };

        for row in rows {
            let record = self
                .columns
                .iter()
                .map(|column| row.field(column).unwrap_or_default());
            file.writer
                .write_record(record)
                .map_err(|e| OutputError::CsvError(format!("Failed to write row: {}", e)))?;
            file.rows += 1;
        }

        file.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))?;

        debug!(
            batch_rows = rows.len(),
            total_rows = file.rows,
            "Appended batch"
        );
        Ok(rows.len() as u64)
    }

    /// Flush, sync, and release the file. Returns total rows written.
    ///
    /// # Errors
    /// [`OutputError::SinkNotOpen`] if never opened, [`OutputError::SinkClosed`]
    /// on a second close.
    pub async fn close(&self) -> OutputResult<u64> {
        let mut state = self.state.lock().await;
        let file = match std::mem::replace(&mut *state, SinkState::Unopened) {
            SinkState::Open(file) => file,
            SinkState::Unopened => {
                return Err(OutputError::SinkNotOpen(self.path.display().to_string()))
            }
            closed @ SinkState::Closed { .. } => {
                *state = closed;
                return Err(OutputError::SinkClosed(self.path.display().to_string()));
            }
        };

        let rows = file.rows;
        // Closed even if the final flush fails: the handle is gone either way
        *state = SinkState::Closed { rows };

        let buf_writer = file
            .writer
            .into_inner()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))?;
        let handle = buf_writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {}", e)))?;
        handle
            .sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {}", e)))?;

        info!("CSV sink closed: {} rows written", rows);
        Ok(rows)
    }
}

#[async_trait]
impl<R: ExportRecord + Sync> RecordSink<R> for CsvSink {
    async fn open(&self) -> OutputResult<()> {
        CsvSink::open(self).await
    }

    async fn append(&self, rows: &[R]) -> OutputResult<u64> {
        CsvSink::append(self, rows).await
    }

    async fn close(&self) -> OutputResult<u64> {
        CsvSink::close(self).await
    }
}
