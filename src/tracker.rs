//! Batched, interval-driven persistence of tracked records.
//!
//! The [`Tracker`] owns an in-memory queue of pending records. A background
//! task wakes every `flush_interval`, writes up to `max_batch_size` records in
//! one `put_batch` call and, while the backlog still exceeds one batch, keeps
//! writing without waiting. A failed batch is logged and dropped; the loop
//! never stalls on a bad batch.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metroid_store::StorageBackend;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{MetroidError, Result};
use crate::metroid::Metroid;

/// Default wait between flush cycles.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);
/// Default number of records per `put_batch` call.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 25;

/// Flush cadence and batch bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerOptions {
    pub flush_interval: Duration,
    pub max_batch_size: usize,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl TrackerOptions {
    /// Rejects a zero flush interval or batch size.
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval.is_zero() {
            return Err(MetroidError::InvalidConfig {
                reason: "flush interval must be greater than zero".to_string(),
            });
        }
        if self.max_batch_size == 0 {
            return Err(MetroidError::InvalidConfig {
                reason: "max batch size must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Running totals of flush outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub batches_written: u64,
    pub records_written: u64,
    pub batches_failed: u64,
    pub records_dropped: u64,
}

struct Shared {
    backend: Arc<dyn StorageBackend>,
    table: String,
    options: TrackerOptions,
    pending: Mutex<VecDeque<Metroid>>,
    stats: Mutex<FlushStats>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, VecDeque<Metroid>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, FlushStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes the oldest batch and returns how many records are still pending.
    async fn flush_cycle(&self) -> usize {
        let batch: Vec<Metroid> = {
            let mut pending = self.pending();
            let take = pending.len().min(self.options.max_batch_size);
            pending.drain(..take).collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        let items = batch.iter().map(Metroid::to_wire).collect();
        match self.backend.put_batch(&self.table, items).await {
            Ok(()) => {
                debug!(table = %self.table, count, "metroids tracked");
                let mut stats = self.stats();
                stats.batches_written += 1;
                stats.records_written += count as u64;
            }
            Err(e) => {
                error!(table = %self.table, count, error = %e, "failed to track metroid batch, dropping it");
                for metroid in &batch {
                    debug!(record = %metroid, "dropped metroid");
                }
                let mut stats = self.stats();
                stats.batches_failed += 1;
                stats.records_dropped += count as u64;
            }
        }

        self.pending().len()
    }

    /// Flushes until nothing is pending.
    async fn drain(&self) {
        while !self.pending().is_empty() {
            self.flush_cycle().await;
        }
    }
}

/// Buffers records and persists them in batches on its own cadence.
pub struct Tracker {
    shared: Arc<Shared>,
    stop_tok: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Tracker {
    pub fn new(backend: Arc<dyn StorageBackend>, table: impl Into<String>, options: TrackerOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                table: table.into(),
                options,
                pending: Mutex::new(VecDeque::new()),
                stats: Mutex::new(FlushStats::default()),
            }),
            stop_tok: CancellationToken::new(),
            task: None,
        }
    }

    /// Spawns the flush loop on the current tokio runtime. Calling it again
    /// while running, or after shutdown, does nothing.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&mut self) {
        if self.task.is_some() || self.stop_tok.is_cancelled() {
            return;
        }
        let shared = self.shared.clone();
        let stop_tok = self.stop_tok.clone();
        self.task = Some(tokio::spawn(run(shared, stop_tok)));
    }

    /// Queues a record for the next flush. Never blocks on I/O.
    ///
    /// Once the tracker is shut down records are dropped and counted in
    /// [`FlushStats::records_dropped`].
    pub fn track(&self, metroid: Metroid) {
        if self.stop_tok.is_cancelled() {
            warn!(table = %self.shared.table, record = %metroid, "tracker is shut down, dropping metroid");
            self.shared.stats().records_dropped += 1;
            return;
        }
        self.shared.pending().push_back(metroid);
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending().len()
    }

    pub fn stats(&self) -> FlushStats {
        *self.shared.stats()
    }

    pub fn options(&self) -> TrackerOptions {
        self.shared.options
    }

    /// Stops the flush loop, then writes out everything still queued.
    pub async fn shutdown(&mut self) {
        self.stop_tok.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "flush loop terminated abnormally");
            }
        }

        let remaining = self.pending_len();
        if remaining > 0 {
            info!(table = %self.shared.table, remaining, "flushing pending metroids before shutdown");
        }
        self.shared.drain().await;
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.stop_tok.cancel();
    }
}

async fn run(shared: Arc<Shared>, stop_tok: CancellationToken) {
    debug!(
        table = %shared.table,
        interval = ?shared.options.flush_interval,
        max_batch_size = shared.options.max_batch_size,
        "flush loop started"
    );
    loop {
        tokio::select! {
            biased;
            _ = stop_tok.cancelled() => break,
            _ = tokio::time::sleep(shared.options.flush_interval) => {}
        }

        // A backlog larger than one batch is written without waiting.
        while shared.flush_cycle().await > shared.options.max_batch_size {
            if stop_tok.is_cancelled() {
                break;
            }
        }
    }
    debug!(table = %shared.table, "flush loop stopped");
}
