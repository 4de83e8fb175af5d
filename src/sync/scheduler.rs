//! Bounded-concurrency dispatch of transfer requests.
//!
//! Requests are dispatched in order; each one waits for a semaphore permit so
//! at most `concurrency` transfers are in flight. A panicking transfer is
//! turned into a failed outcome so every request is accounted for exactly
//! once, and requests still waiting when the run is cancelled are recorded as
//! cancelled without opening a connection.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, FailureKind, Result};
use crate::types::{RunSummary, TransferOutcome, TransferRequest};

use super::progress::Progress;
use super::transfer::TransferWorker;

/// Dispatches transfer requests onto at most `concurrency` workers
#[derive(Clone, Debug)]
pub struct Scheduler {
    concurrency: usize,
}

impl Scheduler {
    /// Create a scheduler; `concurrency` must be at least 1
    pub fn new(concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(Error::config(
                "concurrency",
                "number of threads must be at least 1",
            ));
        }
        Ok(Self { concurrency })
    }

    /// Maximum number of transfers in flight
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every request to an outcome and summarize the run.
    ///
    /// Returns once all dispatched transfers have finished.
    pub async fn run(
        &self,
        requests: Vec<TransferRequest>,
        worker: Arc<TransferWorker>,
        progress: Arc<Progress>,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        progress.enqueue(requests.len() as u64);
        let mut pending = requests.into_iter();

        while let Some(request) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&permits).acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                progress.abandon(&request.track);
                for request in pending.by_ref() {
                    progress.abandon(&request.track);
                }
                break;
            };

            progress.start(&request.track);

            let worker = Arc::clone(&worker);
            let progress = Arc::clone(&progress);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(worker.transfer(&request, &cancel))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| TransferOutcome::Failed {
                        kind: FailureKind::Internal,
                        message: format!("transfer panicked: {}", panic_message(&*panic)),
                    });
                progress.finish(&request.track, &outcome);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "transfer task did not complete");
            }
        }

        progress.summary(cancel.is_cancelled())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
