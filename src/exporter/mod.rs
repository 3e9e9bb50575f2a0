//! Crawl-and-export engine
//!
//! Every remote call goes through a shared [`rate_limit::RateLimiter`] and the
//! [`retry::RetryingExecutor`]; work items run on a [`pool::WorkerPool`] and
//! their rows flow through a bounded channel into an
//! [`output::RecordSink`](crate::output::RecordSink).
//!
//! # Components
//!
//! - [`rate_limit`] - Sliding-window admission control
//! - [`retry`] - Bounded retry loop with exponential backoff
//! - [`job`] - Work items, result batches, pool counters
//! - [`pool`] - Bounded-concurrency job runner
//! - [`orchestrator`] - Streaming vs. buffered export
//! - [`config`] - Constants and backoff calculation
//!
//! # Error Handling
//!
//! Per-call errors surface as
//! [`FetcherError`](crate::fetcher::FetcherError); per-item failures are logged
//! and dropped at the pool boundary; only [`ExportError`] aborts a run.

pub mod config;
pub mod job;
pub mod orchestrator;
pub mod pool;
pub mod rate_limit;
pub mod retry;

pub use job::{PoolReport, PoolState, ResultBatch, WorkItem};
pub use orchestrator::{ExportMode, ExportOrchestrator, ExportSummary};
pub use pool::WorkerPool;
pub use rate_limit::{RateLimitError, RateLimitSlot, RateLimiter};
pub use retry::{RequestAttempt, RetryPolicy, RetryingExecutor};

use crate::output::OutputError;

/// Errors that abort an export run
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Pool concurrency of zero
    #[error("invalid concurrency: {0} (must be at least 1)")]
    InvalidConcurrency(usize),

    /// Sink failure
    #[error("output error: {0}")]
    Output(#[from] OutputError),
}
