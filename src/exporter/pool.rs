//! Bounded worker pool
//!
//! Runs independent jobs with a fixed concurrency cap. Jobs launch in input
//! order, complete in whatever order their I/O resolves, and hand their rows
//! to a bounded channel. A job counts as complete only once the channel has
//! accepted its batch, so a slow consumer holds jobs in the active set and
//! stalls further launches.
//!
//! All jobs are polled from the task calling [`WorkerPool::run`]; the pool
//! counters have that loop as their only owner.

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use indicatif::ProgressBar;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, Instrument};

use super::config::DEFAULT_LAUNCH_DELAY;
use super::job::{PoolReport, PoolState, ResultBatch, WorkItem};
use super::ExportError;
use crate::metrics::record_item_outcome;

/// Fixed-concurrency job runner
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_concurrency: usize,
    launch_delay: Duration,
    progress: Option<ProgressBar>,
}

/// How one job ended
enum JobOutcome {
    Delivered { rows: usize },
    Failed { reason: String },
}

struct FinishedJob {
    index: usize,
    id: String,
    outcome: JobOutcome,
}

impl WorkerPool {
    /// Pool running at most `max_concurrency` jobs at once
    ///
    /// # Errors
    /// Returns [`ExportError::InvalidConcurrency`] when `max_concurrency` is 0.
    pub fn new(max_concurrency: usize) -> Result<Self, ExportError> {
        if max_concurrency == 0 {
            return Err(ExportError::InvalidConcurrency(max_concurrency));
        }

        Ok(Self {
            max_concurrency,
            launch_delay: DEFAULT_LAUNCH_DELAY,
            progress: None,
        })
    }

    /// Delay between consecutive launches
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    /// Advance `bar` by one per finished job
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Concurrency cap
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Delay between launches
    pub fn launch_delay(&self) -> Duration {
        self.launch_delay
    }

    /// Run `process` over every item, delivering each successful item's rows
    /// into `batches`.
    ///
    /// Returns once every item has finished. A failing or panicking job is
    /// logged with its identity, counted, and dropped; sibling jobs carry on.
    /// If the receiving side of `batches` is gone, remaining deliveries count
    /// as failures.
    pub async fn run<P, R, E, F, Fut>(
        &self,
        items: Vec<WorkItem<P>>,
        process: F,
        batches: mpsc::Sender<ResultBatch<R>>,
    ) -> PoolReport
    where
        F: Fn(WorkItem<P>) -> Fut,
        Fut: Future<Output = Result<Vec<R>, E>>,
        E: Display,
    {
        let started = Instant::now();
        let total = items.len();
        let span = info_span!(
            "worker_pool",
            items = total,
            max_concurrency = self.max_concurrency
        );

        async move {
            info!("Starting worker pool");
            if let Some(bar) = &self.progress {
                bar.set_length(total as u64);
            }

            let mut pending = items.into_iter().peekable();
            let mut in_flight = FuturesUnordered::new();
            let mut state = PoolState::default();
            let mut next_launch = Instant::now();

            loop {
                let can_launch = state.active < self.max_concurrency && pending.peek().is_some();
                if !can_launch && in_flight.is_empty() {
                    break;
                }

                tokio::select! {
                    biased;

                    Some(finished) = in_flight.next(), if !in_flight.is_empty() => {
                        self.record_finished(&mut state, finished);
                    }
                    _ = sleep_until(next_launch), if can_launch => {
                        if let Some(item) = pending.next() {
                            state.launch();
                            debug!(
                                item_id = %item.id,
                                item_index = item.index,
                                active = state.active,
                                "Launching job"
                            );
                            in_flight.push(run_job(item, &process, batches.clone()));
                            next_launch = Instant::now() + self.launch_delay;
                        }
                    }
                }
            }

            debug_assert!(state.is_drained());
            if let Some(bar) = &self.progress {
                bar.finish_with_message("done");
            }

            let report = PoolReport {
                state,
                elapsed: started.elapsed(),
            };
            info!(
                completed = report.completed(),
                failed = report.failed(),
                peak_active = report.peak_active(),
                elapsed_ms = report.elapsed.as_millis(),
                "Worker pool finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    fn record_finished(&self, state: &mut PoolState, finished: FinishedJob) {
        match finished.outcome {
            JobOutcome::Delivered { rows } => {
                state.finish(true);
                record_item_outcome(true);
                debug!(
                    item_id = %finished.id,
                    item_index = finished.index,
                    rows = rows,
                    "Job completed"
                );
            }
            JobOutcome::Failed { reason } => {
                state.finish(false);
                record_item_outcome(false);
                error!(
                    item_id = %finished.id,
                    item_index = finished.index,
                    error = %reason,
                    "Item dropped after processing failure"
                );
            }
        }

        if let Some(bar) = &self.progress {
            bar.inc(1);
        }
    }
}

async fn run_job<P, R, E, F, Fut>(
    item: WorkItem<P>,
    process: &F,
    batches: mpsc::Sender<ResultBatch<R>>,
) -> FinishedJob
where
    F: Fn(WorkItem<P>) -> Fut,
    Fut: Future<Output = Result<Vec<R>, E>>,
    E: Display,
{
    let index = item.index;
    let id = item.id.clone();
    let span = info_span!("export_item", item_id = %id, item_index = index);

    let outcome = async {
        match AssertUnwindSafe(process(item)).catch_unwind().await {
            Ok(Ok(rows)) => {
                let count = rows.len();
                let batch = ResultBatch::new(index, id.clone(), rows);
                match batches.send(batch).await {
                    Ok(()) => JobOutcome::Delivered { rows: count },
                    Err(_) => JobOutcome::Failed {
                        reason: "result channel closed before delivery".to_string(),
                    },
                }
            }
            Ok(Err(err)) => JobOutcome::Failed {
                reason: err.to_string(),
            },
            Err(panic) => JobOutcome::Failed {
                reason: format!("job panicked: {}", panic_message(panic.as_ref())),
            },
        }
    }
    .instrument(span)
    .await;

    FinishedJob { index, id, outcome }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
