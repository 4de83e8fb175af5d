//! Synchronization engine
//!
//! A run goes through these stages:
//! 1. validate the configuration and check the destination is a writable directory
//! 2. ping the server (authentication failures abort here)
//! 3. [`enumerate`] the library into track descriptors
//! 4. map each track to its local path ([`paths`]) and drop present ones ([`skip`])
//! 5. hand the remaining requests to the [`scheduler`], which runs [`transfer`]
//!    workers under a concurrency bound and reports to [`progress`]

pub mod enumerate;
pub mod paths;
pub mod progress;
pub mod scheduler;
pub mod skip;
pub mod transfer;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use progress::Progress;
pub use scheduler::Scheduler;
pub use transfer::TransferWorker;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use futures::TryStreamExt;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::error::{Error, Result, Severity};
use crate::subsonic::LibraryApi;
use crate::types::{RunSummary, SkipReason, TrackDescriptor, TransferOutcome, TransferRequest};

/// Mirrors a remote library into a local directory
pub struct Synchronizer {
    api: Arc<dyn LibraryApi>,
    config: SyncConfig,
    scheduler: Scheduler,
    progress: Arc<Progress>,
}

impl Synchronizer {
    /// Create a synchronizer; fails on invalid configuration
    pub fn new(api: Arc<dyn LibraryApi>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let scheduler = Scheduler::new(config.concurrency)?;
        Ok(Self {
            api,
            config,
            scheduler,
            progress: Arc::new(Progress::new()),
        })
    }

    /// Aggregator receiving the current run's outcomes, for display layers
    ///
    /// The same handle is reused by every run and cleared when a run starts.
    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    /// Run one synchronization pass.
    ///
    /// Errors are fatal conditions (unusable destination, authentication,
    /// enumeration failure); per-track failures are reported in the summary.
    /// Cancelling `cancel` stops dispatching, aborts in-flight transfers and
    /// returns a summary marked as interrupted.
    ///
    /// Each call reports only its own tracks. Runs on one synchronizer must
    /// not overlap, since they share the progress aggregator.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        self.progress.reset();
        let root = self.config.destination.as_path();
        preflight(root).await?;

        self.api.ping().await?;
        tracing::debug!("server reachable, credentials accepted");

        let tracks = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.progress.log(Severity::Warning, "interrupted while listing the library");
                return Ok(self.progress.summary(true));
            }
            tracks = enumerate::tracks(Arc::clone(&self.api)).try_collect::<Vec<_>>() => tracks?,
        };

        self.progress.add_total(tracks.len() as u64);
        if tracks.is_empty() {
            self.progress
                .log(Severity::Warning, "the server returned no tracks");
            return Ok(self.progress.summary(cancel.is_cancelled()));
        }
        self.progress.log(
            Severity::Info,
            format!("found {} tracks", tracks.len()),
        );

        let requests = self.plan(tracks, root).await;

        let worker = TransferWorker::new(
            Arc::clone(&self.api),
            root,
            self.config.retry.clone(),
            Arc::clone(&self.progress),
        )
        .with_extension_override(self.config.extension_override().is_some());

        Ok(self
            .scheduler
            .run(requests, Arc::new(worker), Arc::clone(&self.progress), &cancel)
            .await)
    }

    /// Map tracks to destinations and keep only those that need downloading
    async fn plan(&self, tracks: Vec<TrackDescriptor>, root: &Path) -> Vec<TransferRequest> {
        let mut claimed = HashSet::with_capacity(tracks.len());
        let mut requests = Vec::with_capacity(tracks.len());

        for track in tracks {
            let destination = paths::map(&track, &self.config);

            if !claimed.insert(destination.relative.clone()) {
                self.progress.log(
                    Severity::Warning,
                    format!(
                        "{} (id {}) maps to {destination}, which another track already uses",
                        track.title, track.id
                    ),
                );
                self.progress.record(
                    &track,
                    &TransferOutcome::Skipped {
                        reason: SkipReason::DuplicateDestination,
                    },
                );
                continue;
            }

            if !skip::should_download(&track, root, &destination, self.config.force).await {
                self.progress.record(
                    &track,
                    &TransferOutcome::Skipped {
                        reason: SkipReason::AlreadyPresent,
                    },
                );
                continue;
            }

            requests.push(TransferRequest {
                track,
                destination,
                transcode: self.config.transcode.clone(),
            });
        }
        requests
    }
}

/// Check that `root` is an existing directory we can create files in
async fn preflight(root: &Path) -> Result<()> {
    let unusable = |reason: String| Error::DestinationUnwritable {
        path: root.to_path_buf(),
        reason,
    };

    let metadata = tokio::fs::metadata(root)
        .await
        .map_err(|e| unusable(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(unusable("not a directory".into()));
    }

    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let probe = root.join(format!(".downsonic-probe-{random}"));
    tokio::fs::write(&probe, b"")
        .await
        .map_err(|e| unusable(format!("cannot create files: {e}")))?;
    tokio::fs::remove_file(&probe)
        .await
        .map_err(|e| unusable(format!("cannot remove files: {e}")))?;
    Ok(())
}
