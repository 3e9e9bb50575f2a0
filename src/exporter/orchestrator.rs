//! Export orchestration
//!
//! Wires a [`WorkerPool`] to a [`RecordSink`]. Large runs stream each batch
//! into the sink as it completes; small runs collect every batch in memory
//! and write once at the end. Both paths write the same rows.

use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, Instrument};

use super::config::{BATCH_CHANNEL_CAPACITY, STREAMING_THRESHOLD};
use super::job::{PoolReport, ResultBatch, WorkItem};
use super::pool::WorkerPool;
use super::ExportError;
use crate::metrics::{ExportMetrics, RequestCounters, RequestSnapshot};
use crate::output::{ExportRecord, OutputError, RecordSink};

/// How batches reach the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Each batch is appended as soon as its item completes
    Streaming,
    /// Batches are collected and written once after the pool finishes
    Buffered,
}

impl ExportMode {
    /// Streaming when `expected_items` exceeds `threshold` or when forced
    pub fn select(expected_items: usize, threshold: usize, force_streaming: bool) -> Self {
        if force_streaming || expected_items > threshold {
            Self::Streaming
        } else {
            Self::Buffered
        }
    }
}

impl Display for ExportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Streaming => write!(f, "streaming"),
            Self::Buffered => write!(f, "buffered"),
        }
    }
}

/// Outcome of one export run
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    /// Mode the run used
    pub mode: ExportMode,
    /// Pool counters
    pub pool: PoolReport,
    /// Rows written to the sink
    pub rows_written: u64,
    /// Request and error totals
    pub requests: RequestSnapshot,
}

impl ExportSummary {
    /// Items that produced rows
    pub fn items_succeeded(&self) -> usize {
        self.pool.succeeded()
    }

    /// Items dropped after a failure
    pub fn items_failed(&self) -> usize {
        self.pool.failed()
    }
}

/// Runs work items through a pool into a sink
pub struct ExportOrchestrator<S> {
    pool: WorkerPool,
    sink: S,
    counters: Arc<RequestCounters>,
    streaming_threshold: usize,
    force_streaming: bool,
    channel_capacity: usize,
}

impl<S> ExportOrchestrator<S> {
    /// Orchestrator with the default threshold (200 items)
    pub fn new(pool: WorkerPool, sink: S, counters: Arc<RequestCounters>) -> Self {
        Self {
            pool,
            sink,
            counters,
            streaming_threshold: STREAMING_THRESHOLD,
            force_streaming: false,
            channel_capacity: BATCH_CHANNEL_CAPACITY,
        }
    }

    /// Item count above which the run streams
    pub fn with_streaming_threshold(mut self, threshold: usize) -> Self {
        self.streaming_threshold = threshold;
        self
    }

    /// Stream regardless of item count
    pub fn force_streaming(mut self, force: bool) -> Self {
        self.force_streaming = force;
        self
    }

    /// Capacity of the pool-to-sink channel
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Mode a run over `expected_items` would use
    pub fn mode_for(&self, expected_items: usize) -> ExportMode {
        ExportMode::select(expected_items, self.streaming_threshold, self.force_streaming)
    }

    /// Process every item and write the resulting rows.
    ///
    /// Item failures are counted in the summary, not returned.
    ///
    /// # Errors
    /// Sink failures. When the sink fails mid-stream the remaining items
    /// still run but their batches are dropped.
    pub async fn run<P, R, E, F, Fut>(
        &self,
        items: Vec<WorkItem<P>>,
        process: F,
    ) -> Result<ExportSummary, ExportError>
    where
        S: RecordSink<R>,
        R: ExportRecord + Send + Sync,
        F: Fn(WorkItem<P>) -> Fut,
        Fut: Future<Output = Result<Vec<R>, E>>,
        E: Display,
    {
        let mode = self.mode_for(items.len());
        let metrics = ExportMetrics::start(mode.to_string());
        let span = info_span!("export", mode = %mode, items = items.len());

        let result = async {
            info!("Starting export");
            match mode {
                ExportMode::Streaming => self.run_streaming(items, process).await,
                ExportMode::Buffered => self.run_buffered(items, process).await,
            }
        }
        .instrument(span)
        .await;

        match result {
            Ok((pool, rows_written)) => {
                metrics.record_success(rows_written, pool.failed() as u64);
                Ok(ExportSummary {
                    mode,
                    pool,
                    rows_written,
                    requests: self.counters.snapshot(),
                })
            }
            Err(err) => {
                metrics.record_failure(&err.to_string());
                Err(err)
            }
        }
    }

    async fn run_streaming<P, R, E, F, Fut>(
        &self,
        items: Vec<WorkItem<P>>,
        process: F,
    ) -> Result<(PoolReport, u64), ExportError>
    where
        S: RecordSink<R>,
        R: ExportRecord + Send + Sync,
        F: Fn(WorkItem<P>) -> Fut,
        Fut: Future<Output = Result<Vec<R>, E>>,
        E: Display,
    {
        self.sink.open().await?;

        let (tx, mut rx) = mpsc::channel::<ResultBatch<R>>(self.channel_capacity);
        let sink = &self.sink;
        let consume = async move {
            while let Some(batch) = rx.recv().await {
                if let Err(err) = sink.append(&batch.rows).await {
                    error!(
                        item_id = %batch.item_id,
                        error = %err,
                        "Sink append failed, dropping remaining batches"
                    );
                    return Err(err);
                }
            }
            Ok::<(), OutputError>(())
        };

        let (report, consumed) = tokio::join!(self.pool.run(items, process, tx), consume);
        let closed = self.sink.close().await;
        consumed?;
        let rows = closed?;
        Ok((report, rows))
    }

    async fn run_buffered<P, R, E, F, Fut>(
        &self,
        items: Vec<WorkItem<P>>,
        process: F,
    ) -> Result<(PoolReport, u64), ExportError>
    where
        S: RecordSink<R>,
        R: ExportRecord + Send + Sync,
        F: Fn(WorkItem<P>) -> Fut,
        Fut: Future<Output = Result<Vec<R>, E>>,
        E: Display,
    {
        let (tx, mut rx) = mpsc::channel::<ResultBatch<R>>(self.channel_capacity);
        let collect = async move {
            let mut batches = Vec::new();
            while let Some(batch) = rx.recv().await {
                batches.push(batch);
            }
            batches
        };

        let (report, mut batches) = tokio::join!(self.pool.run(items, process, tx), collect);

        // Submission order for a deterministic single-shot file
        batches.sort_by_key(|batch| batch.item_index);
        let rows: Vec<R> = batches.into_iter().flat_map(|batch| batch.rows).collect();

        self.sink.open().await?;
        let appended = self.sink.append(&rows).await;
        let closed = self.sink.close().await;
        appended?;
        let written = closed?;
        Ok((report, written))
    }
}
