//! Work items, result batches, and pool bookkeeping

use serde::Serialize;
use std::time::Duration;

/// One unit of input driving one job through the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem<P> {
    /// Stable submission index (0-based)
    pub index: usize,
    /// Identity used in logs and failure reports
    pub id: String,
    /// Caller-defined payload
    pub payload: P,
}

impl<P> WorkItem<P> {
    /// Create a work item
    pub fn new(index: usize, id: impl Into<String>, payload: P) -> Self {
        Self {
            index,
            id: id.into(),
            payload,
        }
    }

    /// Number a sequence of payloads in submission order
    pub fn enumerate<I, F>(payloads: I, id_of: F) -> Vec<Self>
    where
        I: IntoIterator<Item = P>,
        F: Fn(&P) -> String,
    {
        payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| {
                let id = id_of(&payload);
                Self { index, id, payload }
            })
            .collect()
    }
}

/// Rows produced by one completed work item
///
/// Moved into the delivery channel on completion; the producing job keeps no
/// handle to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultBatch<R> {
    /// Submission index of the producing item
    pub item_index: usize,
    /// Identity of the producing item
    pub item_id: String,
    /// Output rows, in the order the item produced them
    pub rows: Vec<R>,
}

impl<R> ResultBatch<R> {
    /// Batch produced by the item at `item_index`
    pub fn new(item_index: usize, item_id: impl Into<String>, rows: Vec<R>) -> Self {
        Self {
            item_index,
            item_id: item_id.into(),
            rows,
        }
    }

    /// Number of rows in the batch
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch carries no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Pool counters, owned by the pool's scheduling loop
///
/// `completed` counts every finished job, failed ones included, so the pool
/// is done exactly when `submitted == completed` and nothing is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolState {
    /// Jobs launched
    pub submitted: usize,
    /// Jobs currently in flight
    pub active: usize,
    /// Jobs finished (success or handled failure)
    pub completed: usize,
    /// Jobs that failed and were dropped
    pub failed: usize,
    /// Highest `active` observed
    pub peak_active: usize,
}

impl PoolState {
    /// Record a launch
    pub fn launch(&mut self) {
        self.submitted += 1;
        self.active += 1;
        self.peak_active = self.peak_active.max(self.active);
    }

    /// Record a finished job
    pub fn finish(&mut self, success: bool) {
        self.active = self.active.saturating_sub(1);
        self.completed += 1;
        if !success {
            self.failed += 1;
        }
    }

    /// Jobs that produced a batch
    pub fn succeeded(&self) -> usize {
        self.completed - self.failed
    }

    /// Whether the pool may report completion once its input is exhausted
    pub fn is_drained(&self) -> bool {
        self.active == 0 && self.submitted == self.completed
    }
}

/// Final report of one pool run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolReport {
    /// Counters at completion
    pub state: PoolState,
    /// Wall-clock run time
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl PoolReport {
    /// Jobs launched
    pub fn submitted(&self) -> usize {
        self.state.submitted
    }

    /// Jobs finished, failed ones included
    pub fn completed(&self) -> usize {
        self.state.completed
    }

    /// Jobs that produced a batch
    pub fn succeeded(&self) -> usize {
        self.state.succeeded()
    }

    /// Jobs dropped after a failure
    pub fn failed(&self) -> usize {
        self.state.failed
    }

    /// Highest number of simultaneously active jobs
    pub fn peak_active(&self) -> usize {
        self.state.peak_active
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
