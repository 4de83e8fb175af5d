//! Progress and log aggregation shared by every transfer worker.
//!
//! Counters live inside a `watch` channel so every update is applied under one
//! lock and a display layer can either poll [`Progress::snapshot`] or await
//! changes through [`Progress::subscribe`]. Failures and log events are kept in
//! a separate list that ends up in the [`RunSummary`].

use std::sync::Mutex;

use tokio::sync::watch;

use crate::error::Severity;
use crate::types::{
    LogEvent, ProgressSnapshot, RunSummary, TrackDescriptor, TrackFailure, TransferOutcome,
};

#[derive(Default)]
struct Records {
    failures: Vec<TrackFailure>,
    events: Vec<LogEvent>,
}

/// Thread-safe sink for per-track outcomes and leveled log events
pub struct Progress {
    counts: watch::Sender<ProgressSnapshot>,
    records: Mutex<Records>,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    /// Create an empty aggregator
    pub fn new() -> Self {
        let (counts, _rx) = watch::channel(ProgressSnapshot::default());
        Self {
            counts,
            records: Mutex::new(Records::default()),
        }
    }

    /// Current counts
    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.counts.borrow()
    }

    /// Receiver notified after every counter change
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.counts.subscribe()
    }

    /// Zero every counter and drop recorded failures and events
    ///
    /// Subscribers stay attached and are notified of the cleared snapshot.
    pub fn reset(&self) {
        self.counts.send_replace(ProgressSnapshot::default());
        self.with_records(|r| *r = Records::default());
    }

    /// Account for newly enumerated tracks
    pub fn add_total(&self, tracks: u64) {
        self.counts.send_modify(|c| c.total += tracks);
    }

    /// Account for tracks handed to the scheduler
    pub fn enqueue(&self, tracks: u64) {
        self.counts.send_modify(|c| c.queued += tracks);
    }

    /// A queued track was handed to a worker
    pub fn start(&self, track: &TrackDescriptor) {
        self.counts.send_modify(|c| {
            c.queued = c.queued.saturating_sub(1);
            c.active += 1;
        });
        self.log(Severity::Debug, format!("starting {}", track.title));
    }

    /// Record the outcome of a track that never reached the queue (skips, collisions)
    pub fn record(&self, track: &TrackDescriptor, outcome: &TransferOutcome) {
        self.apply(track, outcome, |_| {});
    }

    /// Record the outcome of a track a worker was handling
    pub fn finish(&self, track: &TrackDescriptor, outcome: &TransferOutcome) {
        self.apply(track, outcome, |c| c.active = c.active.saturating_sub(1));
    }

    /// Record a queued track that was never dispatched because the run was cancelled
    pub fn abandon(&self, track: &TrackDescriptor) {
        self.apply(track, &TransferOutcome::Cancelled, |c| {
            c.queued = c.queued.saturating_sub(1)
        });
    }

    /// Record a log event and forward it to `tracing`
    ///
    /// Every event is kept regardless of which levels are displayed.
    pub fn log(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Fatal => tracing::error!(fatal = true, "{message}"),
            Severity::Error => tracing::error!("{message}"),
            Severity::Warning => tracing::warn!("{message}"),
            Severity::Info => tracing::info!("{message}"),
            Severity::Debug => tracing::debug!("{message}"),
        }
        self.with_records(|r| r.events.push(LogEvent { severity, message }));
    }

    /// Build the run summary from everything recorded so far
    pub fn summary(&self, interrupted: bool) -> RunSummary {
        let counts = self.snapshot();
        let (failures, events) = self.with_records(|r| (r.failures.clone(), r.events.clone()));
        RunSummary {
            total: counts.total,
            downloaded: counts.downloaded,
            skipped: counts.skipped,
            failed: counts.failed,
            cancelled: counts.cancelled,
            bytes: counts.bytes,
            failures,
            events,
            interrupted,
        }
    }

    fn apply(
        &self,
        track: &TrackDescriptor,
        outcome: &TransferOutcome,
        leave: impl FnOnce(&mut ProgressSnapshot),
    ) {
        self.counts.send_modify(|c| {
            leave(c);
            match outcome {
                TransferOutcome::Downloaded { bytes } => {
                    c.downloaded += 1;
                    c.bytes += bytes;
                }
                TransferOutcome::Skipped { .. } => c.skipped += 1,
                TransferOutcome::Failed { .. } => c.failed += 1,
                TransferOutcome::Cancelled => c.cancelled += 1,
            }
        });

        match outcome {
            TransferOutcome::Downloaded { bytes } => {
                self.log(
                    Severity::Info,
                    format!("downloaded {} ({bytes} bytes)", track.title),
                );
            }
            TransferOutcome::Skipped { reason } => {
                self.log(Severity::Info, format!("skipped {}: {reason}", track.title));
            }
            TransferOutcome::Failed { kind, message } => {
                self.with_records(|r| {
                    r.failures.push(TrackFailure {
                        id: track.id.clone(),
                        title: track.title.clone(),
                        kind: *kind,
                        message: message.clone(),
                    })
                });
                self.log(
                    Severity::Error,
                    format!("failed to download {}: {message}", track.title),
                );
            }
            TransferOutcome::Cancelled => {
                self.log(Severity::Debug, format!("cancelled {}", track.title));
            }
        }
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut Records) -> T) -> T {
        // A panic while holding the lock leaves the lists intact, so keep using them
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut records)
    }
}
